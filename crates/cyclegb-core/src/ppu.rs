//! LCD controller timing and line composition.
//!
//! LY, the STAT mode and the coincidence flag are derived from the cycle
//! counter relative to the moment the current LCD frame started. The `Video`
//! scheduler slot fires on every mode boundary, where interrupts are raised
//! and the finished line is composed into the framebuffer.

use crate::hardware::{CGB_OBJP_INIT, DMG_PALETTE, Model, post_boot_video_cycles};
use crate::savestate::StateVisitor;
use crate::scheduler::{EventSlot, INT_STAT, INT_VBLANK, InterruptRequester, Scheduler};

// Screen resolution used by the Game Boy PPU
pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

// Line timing in dots (single-speed cycles)
const DOTS_PER_LINE: u64 = 456;
const LINES_PER_FRAME: u64 = 154;
pub const DOTS_PER_FRAME: u64 = DOTS_PER_LINE * LINES_PER_FRAME;
const MODE2_END: u64 = 80;
const MODE3_END: u64 = 252;

// Sprite limits
const MAX_SPRITES_PER_LINE: usize = 10;
const TOTAL_SPRITES: usize = 40;

// Internal memory sizes
const VRAM_BANK_SIZE: usize = 0x2000;
const OAM_SIZE: usize = 0xA0;
const PAL_RAM_SIZE: usize = 0x40;
const PAL_INDEX_MASK: u8 = 0x3F;
const PAL_UNUSED_BIT: u8 = 0x40;
const PAL_AUTO_INCREMENT_BIT: u8 = 0x80;

// Window X position is clipped if greater than this value
const WINDOW_X_MAX: u8 = 166;

// VRAM layout constants
const BG_MAP_0_BASE: usize = 0x1800;
const BG_MAP_1_BASE: usize = 0x1C00;
const TILE_DATA_0_BASE: usize = 0x0000;
const TILE_DATA_1_BASE: usize = 0x0800;

// LCD modes reported in STAT
const MODE_HBLANK: u8 = 0;
const MODE_VBLANK: u8 = 1;
const MODE_OAM: u8 = 2;
const MODE_TRANSFER: u8 = 3;

pub const LCDC_ENABLE: u8 = 0x80;

#[derive(Copy, Clone, Default)]
struct Sprite {
    x: i16,
    y: i16,
    tile: u8,
    flags: u8,
    oam_index: usize,
}

pub struct Ppu {
    pub vram: [[u8; VRAM_BANK_SIZE]; 2],
    pub vram_bank: usize,
    /// Object attribute memory plus the 0xFEA0-0xFEFF area, which CGB
    /// hardware backs with real cells.
    pub oam: [u8; 0x100],

    cgb: bool,
    /// CGB hardware running a DMG cartridge: DMG palettes index into the
    /// CGB palette RAM set up by the boot ROM.
    dmg_compat: bool,
    ds: bool,

    lcdc: u8,
    /// Interrupt enable bits 3-6 of STAT.
    stat: u8,
    scy: u8,
    scx: u8,
    lyc: u8,
    bgp: u8,
    obp0: u8,
    obp1: u8,
    wy: u8,
    wx: u8,

    bgpi: u8,
    bgpd: [u8; PAL_RAM_SIZE],
    obpi: u8,
    obpd: [u8; PAL_RAM_SIZE],
    /// Object priority mode register (OPRI)
    opri: u8,

    /// Cycle at which line 0 of the current LCD frame sequence started.
    lcd_start: u64,
    /// Coincidence flag held while the LCD is off.
    lyc_flag_off: bool,
    stat_irq_line: bool,
    /// Internal window line counter
    win_line_counter: u8,
    frame_counter: u64,

    framebuffer: Box<[u32; SCREEN_WIDTH * SCREEN_HEIGHT]>,
    line_priority: [bool; SCREEN_WIDTH],
    line_color_zero: [bool; SCREEN_WIDTH],
    /// Latched sprites for the current scanline
    line_sprites: [Sprite; MAX_SPRITES_PER_LINE],
    sprite_count: usize,
}

impl Ppu {
    pub fn new_with_mode(cgb: bool) -> Self {
        Self {
            vram: [[0; VRAM_BANK_SIZE]; 2],
            vram_bank: 0,
            oam: [0; 0x100],
            cgb,
            dmg_compat: false,
            ds: false,
            lcdc: 0,
            stat: 0,
            scy: 0,
            scx: 0,
            lyc: 0,
            bgp: 0,
            obp0: 0,
            obp1: 0,
            wy: 0,
            wx: 0,
            bgpi: PAL_UNUSED_BIT,
            bgpd: [0; PAL_RAM_SIZE],
            obpi: PAL_UNUSED_BIT,
            obpd: [0; PAL_RAM_SIZE],
            opri: 0,
            lcd_start: 0,
            lyc_flag_off: false,
            stat_irq_line: false,
            win_line_counter: 0,
            frame_counter: 0,
            framebuffer: Box::new([0; SCREEN_WIDTH * SCREEN_HEIGHT]),
            line_priority: [false; SCREEN_WIDTH],
            line_color_zero: [false; SCREEN_WIDTH],
            line_sprites: [Sprite::default(); MAX_SPRITES_PER_LINE],
            sprite_count: 0,
        }
    }

    pub fn new() -> Self {
        Self::new_with_mode(false)
    }

    /// Registers and LCD phase as the boot ROM leaves them at cycle `cc`.
    pub fn apply_boot_state(&mut self, model: Model, cc: u64, sched: &mut Scheduler) {
        self.lcdc = 0x91;
        self.stat = 0;
        self.bgp = 0xFC;
        self.win_line_counter = 0;
        self.stat_irq_line = false;
        for pair in self.bgpd.chunks_exact_mut(2) {
            pair[0] = 0xFF;
            pair[1] = 0x7F;
        }
        self.obpd = CGB_OBJP_INIT;
        self.lcd_start = cc.wrapping_sub(post_boot_video_cycles(model));
        sched.set_event_time(EventSlot::Video, self.next_boundary_after(cc));
    }

    /// Load the default CGB palettes used when running a DMG cartridge in
    /// compatibility mode. These values are based on the behavior of the
    /// official boot ROM.
    pub fn apply_dmg_compatibility_palettes(&mut self) {
        const OBJ_PAL: [u16; 4] = [0x7FFF, 0x421F, 0x1CF2, 0x0000];
        const BG_PAL: [u16; 4] = [0x7FFF, 0x1BEF, 0x6180, 0x0000];

        let (obj0, rest) = self.obpd.split_at_mut(8);
        let (obj1, _) = rest.split_at_mut(8);
        Self::write_palette(obj0, OBJ_PAL);
        Self::write_palette(obj1, OBJ_PAL);

        let (bg0, _) = self.bgpd.split_at_mut(8);
        Self::write_palette(bg0, BG_PAL);

        self.bgp = 0xFC;
        self.obp0 = 0xFF;
        self.obp1 = 0xFF;
        self.dmg_compat = true;
    }

    fn write_palette(slice: &mut [u8], pal: [u16; 4]) {
        for (i, &c) in pal.iter().enumerate() {
            slice[i * 2] = (c & 0xFF) as u8;
            slice[i * 2 + 1] = (c >> 8) as u8;
        }
    }

    pub fn is_cgb(&self) -> bool {
        self.cgb
    }

    #[inline(always)]
    fn cgb_regs(&self) -> bool {
        self.cgb && !self.dmg_compat
    }

    #[inline(always)]
    pub fn lcd_on(&self) -> bool {
        self.lcdc & LCDC_ENABLE != 0
    }

    pub fn framebuffer(&self) -> &[u32] {
        &self.framebuffer[..]
    }

    /// Returns the number of frames that have been completed since power on.
    pub fn frames(&self) -> u64 {
        self.frame_counter
    }

    pub fn window_line_counter(&self) -> u8 {
        self.win_line_counter
    }

    pub fn bg_palette_ram(&self) -> &[u8] {
        &self.bgpd
    }

    pub fn obj_palette_ram(&self) -> &[u8] {
        &self.obpd
    }

    pub fn bg_palette_ram_mut(&mut self) -> &mut [u8; PAL_RAM_SIZE] {
        &mut self.bgpd
    }

    pub fn obj_palette_ram_mut(&mut self) -> &mut [u8; PAL_RAM_SIZE] {
        &mut self.obpd
    }

    /// Fill the framebuffer with the color of a disabled LCD.
    pub fn blank(&mut self) {
        let white = if self.cgb { 0x00FFFFFF } else { DMG_PALETTE[0] };
        self.framebuffer.fill(white);
    }

    /// (line, dot) at cycle `cc`. Only meaningful while the LCD is on.
    #[inline(always)]
    fn position(&self, cc: u64) -> (u64, u64) {
        let dots = (cc.wrapping_sub(self.lcd_start) >> self.ds as u32) % DOTS_PER_FRAME;
        (dots / DOTS_PER_LINE, dots % DOTS_PER_LINE)
    }

    fn mode_of(ly: u64, dot: u64) -> u8 {
        if ly >= SCREEN_HEIGHT as u64 {
            MODE_VBLANK
        } else if dot < MODE2_END {
            MODE_OAM
        } else if dot < MODE3_END {
            MODE_TRANSFER
        } else {
            MODE_HBLANK
        }
    }

    pub fn mode(&self, cc: u64) -> u8 {
        if !self.lcd_on() {
            return MODE_HBLANK;
        }
        let (ly, dot) = self.position(cc);
        Self::mode_of(ly, dot)
    }

    pub fn ly(&self, cc: u64) -> u8 {
        if !self.lcd_on() {
            return 0;
        }
        let (ly, dot) = self.position(cc);
        // LY reads back 0 for most of line 153.
        if ly == LINES_PER_FRAME - 1 && dot >= 4 {
            0
        } else {
            ly as u8
        }
    }

    fn lyc_flag(&self, cc: u64) -> bool {
        if !self.lcd_on() {
            return self.lyc_flag_off;
        }
        let (ly, _) = self.position(cc);
        ly == self.lyc as u64
    }

    pub fn vram_accessible(&self, cc: u64) -> bool {
        self.mode(cc) != MODE_TRANSFER
    }

    pub fn oam_accessible(&self, cc: u64) -> bool {
        !matches!(self.mode(cc), MODE_OAM | MODE_TRANSFER)
    }

    /// True in the H-blank of a visible line.
    pub fn in_hblank(&self, cc: u64) -> bool {
        if !self.lcd_on() {
            return false;
        }
        let (ly, dot) = self.position(cc);
        ly < SCREEN_HEIGHT as u64 && dot >= MODE3_END
    }

    /// Start of the next VBlank after `cc`.
    pub fn next_vblank_time(&self, cc: u64) -> u64 {
        let frame_cycles = DOTS_PER_FRAME << self.ds as u32;
        let vblank = (SCREEN_HEIGHT as u64 * DOTS_PER_LINE) << self.ds as u32;
        let into = cc.wrapping_sub(self.lcd_start) % frame_cycles;
        let frame_start = cc.wrapping_sub(into);
        if into < vblank {
            frame_start.wrapping_add(vblank)
        } else {
            frame_start.wrapping_add(frame_cycles + vblank)
        }
    }

    fn next_boundary_after(&self, cc: u64) -> u64 {
        let dots = cc.wrapping_sub(self.lcd_start) >> self.ds as u32;
        let frame = dots - dots % DOTS_PER_FRAME;
        let pos = dots % DOTS_PER_FRAME;
        let (ly, dot) = (pos / DOTS_PER_LINE, pos % DOTS_PER_LINE);
        let line = ly * DOTS_PER_LINE;
        let next = if ly < SCREEN_HEIGHT as u64 && dot < MODE2_END {
            line + MODE2_END
        } else if ly < SCREEN_HEIGHT as u64 && dot < MODE3_END {
            line + MODE3_END
        } else {
            line + DOTS_PER_LINE
        };
        self.lcd_start.wrapping_add((frame + next) << self.ds as u32)
    }

    fn stat_signal(&self, cc: u64) -> bool {
        if !self.lcd_on() {
            return false;
        }
        let (ly, dot) = self.position(cc);
        let coincidence = self.stat & 0x40 != 0 && ly == self.lyc as u64;
        let mode_signal = match Self::mode_of(ly, dot) {
            MODE_HBLANK => self.stat & 0x08 != 0,
            // The OAM interrupt source also fires as VBlank begins.
            MODE_VBLANK => {
                self.stat & 0x10 != 0
                    || (ly == SCREEN_HEIGHT as u64 && dot < 4 && self.stat & 0x20 != 0)
            }
            MODE_OAM => self.stat & 0x20 != 0,
            _ => false,
        };
        coincidence || mode_signal
    }

    fn update_stat_irq(&mut self, cc: u64, irq: &mut InterruptRequester, sched: &mut Scheduler) {
        let current = self.stat_signal(cc);
        if current && !self.stat_irq_line {
            irq.flag_irq(INT_STAT, cc, sched);
        }
        self.stat_irq_line = current;
    }

    /// `Video` slot handler. Returns true when an H-blank of a visible line
    /// begins, which is when a pending HDMA block may run.
    pub fn event(&mut self, irq: &mut InterruptRequester, sched: &mut Scheduler) -> bool {
        let t = sched.event_time(EventSlot::Video);
        if !self.lcd_on() {
            sched.disable(EventSlot::Video);
            return false;
        }
        let (ly, dot) = self.position(t);
        let mut hblank = false;
        if dot == 0 && ly == SCREEN_HEIGHT as u64 {
            irq.flag_irq(INT_VBLANK, t, sched);
            self.frame_counter = self.frame_counter.wrapping_add(1);
            self.win_line_counter = 0;
        } else if dot == MODE3_END && ly < SCREEN_HEIGHT as u64 {
            self.oam_scan(ly as u8);
            self.render_scanline(ly as u8);
            hblank = true;
        }
        self.update_stat_irq(t, irq, sched);
        sched.set_event_time(EventSlot::Video, self.next_boundary_after(t));
        hblank
    }

    /// Double-speed toggle at `cc`: keep the current dot position.
    pub fn speed_change(&mut self, cc: u64, sched: &mut Scheduler) {
        let dots = cc.wrapping_sub(self.lcd_start) >> self.ds as u32;
        self.ds = !self.ds;
        self.lcd_start = cc.wrapping_sub(dots << self.ds as u32);
        if self.lcd_on() {
            sched.set_event_time(EventSlot::Video, self.next_boundary_after(cc));
        }
    }

    pub fn set_double_speed(&mut self, ds: bool) {
        self.ds = ds;
    }

    pub fn rebase(&mut self, dec: u64) {
        self.lcd_start = self.lcd_start.wrapping_sub(dec);
    }

    /// Restart the LCD at line `ly`, dot 0, as of `cc`.
    pub fn restart_at_line(&mut self, ly: u8, cc: u64, sched: &mut Scheduler) {
        let dots = (ly as u64 % LINES_PER_FRAME) * DOTS_PER_LINE;
        self.lcd_start = cc.wrapping_sub(dots << self.ds as u32);
        self.stat_irq_line = false;
        if self.lcd_on() {
            sched.set_event_time(EventSlot::Video, self.next_boundary_after(cc));
        } else {
            sched.disable(EventSlot::Video);
        }
    }

    fn sanitize_palette_index(value: u8) -> u8 {
        (value & (PAL_AUTO_INCREMENT_BIT | PAL_INDEX_MASK)) | PAL_UNUSED_BIT
    }

    fn palette_ram_index(index: u8) -> usize {
        (index & PAL_INDEX_MASK) as usize
    }

    fn step_palette_index(index: &mut u8) {
        let current = *index;
        let idx = current & PAL_INDEX_MASK;
        let next_idx = if current & PAL_AUTO_INCREMENT_BIT != 0 {
            idx.wrapping_add(1) & PAL_INDEX_MASK
        } else {
            idx
        };
        let auto = current & PAL_AUTO_INCREMENT_BIT;
        *index = auto | PAL_UNUSED_BIT | next_idx;
    }

    pub fn read_reg(&self, addr: u16, cc: u64) -> u8 {
        match addr {
            0xFF40 => self.lcdc,
            0xFF41 => {
                0x80 | (self.stat & 0x78) | (self.lyc_flag(cc) as u8) << 2 | self.mode(cc)
            }
            0xFF42 => self.scy,
            0xFF43 => self.scx,
            0xFF44 => self.ly(cc),
            0xFF45 => self.lyc,
            0xFF47 => self.bgp,
            0xFF48 => self.obp0,
            0xFF49 => self.obp1,
            0xFF4A => self.wy,
            0xFF4B => self.wx,
            0xFF68 if self.cgb_regs() => self.bgpi,
            0xFF69 if self.cgb_regs() => {
                if self.mode(cc) == MODE_TRANSFER {
                    0xFF
                } else {
                    self.bgpd[Self::palette_ram_index(self.bgpi)]
                }
            }
            0xFF6A if self.cgb_regs() => self.obpi,
            0xFF6B if self.cgb_regs() => {
                if self.mode(cc) == MODE_TRANSFER {
                    0xFF
                } else {
                    self.obpd[Self::palette_ram_index(self.obpi)]
                }
            }
            0xFF6C if self.cgb_regs() => self.opri | 0xFE,
            _ => 0xFF,
        }
    }

    /// Register write at `cc`. LCDC on/off transitions restart the frame
    /// timing; callers re-arm the frame blit.
    pub fn write_reg(
        &mut self,
        addr: u16,
        val: u8,
        cc: u64,
        irq: &mut InterruptRequester,
        sched: &mut Scheduler,
    ) {
        match addr {
            0xFF40 => {
                let was_on = self.lcd_on();
                if was_on && val & LCDC_ENABLE == 0 {
                    self.lyc_flag_off = self.lyc_flag(cc);
                    self.lcdc = val;
                    self.win_line_counter = 0;
                    self.stat_irq_line = false;
                    sched.disable(EventSlot::Video);
                    log::debug!("LCD off at cycle {cc}");
                } else if !was_on && val & LCDC_ENABLE != 0 {
                    self.lcdc = val;
                    self.lcd_start = cc;
                    self.win_line_counter = 0;
                    self.stat_irq_line = false;
                    self.update_stat_irq(cc, irq, sched);
                    sched.set_event_time(EventSlot::Video, self.next_boundary_after(cc));
                    log::debug!("LCD on at cycle {cc}");
                } else {
                    self.lcdc = val;
                }
            }
            0xFF41 => {
                self.stat = val & 0x78;
                self.update_stat_irq(cc, irq, sched);
            }
            0xFF42 => self.scy = val,
            0xFF43 => self.scx = val,
            0xFF45 => {
                self.lyc = val;
                if !self.lcd_on() {
                    self.lyc_flag_off = false;
                }
                self.update_stat_irq(cc, irq, sched);
            }
            0xFF47 => self.bgp = val,
            0xFF48 => self.obp0 = val,
            0xFF49 => self.obp1 = val,
            0xFF4A => self.wy = val,
            0xFF4B => self.wx = val,
            0xFF68 if self.cgb_regs() => self.bgpi = Self::sanitize_palette_index(val),
            0xFF69 if self.cgb_regs() => {
                if self.mode(cc) != MODE_TRANSFER {
                    let idx = Self::palette_ram_index(self.bgpi);
                    self.bgpd[idx] = val;
                }
                Self::step_palette_index(&mut self.bgpi);
            }
            0xFF6A if self.cgb_regs() => self.obpi = Self::sanitize_palette_index(val),
            0xFF6B if self.cgb_regs() => {
                if self.mode(cc) != MODE_TRANSFER {
                    let idx = Self::palette_ram_index(self.obpi);
                    self.obpd[idx] = val;
                }
                Self::step_palette_index(&mut self.obpi);
            }
            0xFF6C if self.cgb_regs() => self.opri = val & 0x01,
            _ => {}
        }
    }

    /// Raw register restore for state import. No side effects.
    pub fn restore_reg(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF40 => self.lcdc = val,
            0xFF41 => {
                self.stat = val & 0x78;
                self.lyc_flag_off = val & 0x04 != 0;
            }
            0xFF42 => self.scy = val,
            0xFF43 => self.scx = val,
            0xFF45 => self.lyc = val,
            0xFF47 => self.bgp = val,
            0xFF48 => self.obp0 = val,
            0xFF49 => self.obp1 = val,
            0xFF4A => self.wy = val,
            0xFF4B => self.wx = val,
            0xFF68 => self.bgpi = Self::sanitize_palette_index(val),
            0xFF6A => self.obpi = Self::sanitize_palette_index(val),
            0xFF6C => self.opri = val & 0x01,
            _ => {}
        }
    }

    fn decode_cgb_color(lo: u8, hi: u8) -> u32 {
        let raw = ((hi as u16) << 8) | lo as u16;
        let r = ((raw & 0x1F) as u8) << 3 | ((raw & 0x1F) as u8 >> 2);
        let g = (((raw >> 5) & 0x1F) as u8) << 3 | (((raw >> 5) & 0x1F) as u8 >> 2);
        let b = (((raw >> 10) & 0x1F) as u8) << 3 | (((raw >> 10) & 0x1F) as u8 >> 2);
        ((r as u32) << 16) | ((g as u32) << 8) | b as u32
    }

    #[inline(always)]
    fn dmg_shade(palette: u8, color_id: u8) -> u8 {
        (palette >> (color_id * 2)) & 0x03
    }

    /// Color for a background pixel and whether it counts as color 0.
    fn bg_color(&self, palette: usize, color_id: u8) -> (u32, bool) {
        if self.dmg_compat {
            let shade = Self::dmg_shade(self.bgp, color_id) as usize;
            let off = shade * 2;
            (Self::decode_cgb_color(self.bgpd[off], self.bgpd[off + 1]), color_id == 0)
        } else if self.cgb {
            let off = palette * 8 + color_id as usize * 2;
            (Self::decode_cgb_color(self.bgpd[off], self.bgpd[off + 1]), color_id == 0)
        } else {
            let shade = Self::dmg_shade(self.bgp, color_id);
            (DMG_PALETTE[shade as usize], color_id == 0)
        }
    }

    fn obj_color(&self, flags: u8, color_id: u8) -> u32 {
        if self.dmg_compat {
            let (pal, idx) = if flags & 0x10 != 0 { (self.obp1, 1) } else { (self.obp0, 0) };
            let off = idx * 8 + Self::dmg_shade(pal, color_id) as usize * 2;
            Self::decode_cgb_color(self.obpd[off], self.obpd[off + 1])
        } else if self.cgb {
            let off = (flags & 0x07) as usize * 8 + color_id as usize * 2;
            Self::decode_cgb_color(self.obpd[off], self.obpd[off + 1])
        } else {
            let pal = if flags & 0x10 != 0 { self.obp1 } else { self.obp0 };
            DMG_PALETTE[Self::dmg_shade(pal, color_id) as usize]
        }
    }

    /// Collect up to 10 sprites visible on `ly`.
    fn oam_scan(&mut self, ly: u8) {
        let sprite_height: i16 = if self.lcdc & 0x04 != 0 { 16 } else { 8 };
        self.sprite_count = 0;
        for i in 0..TOTAL_SPRITES {
            if self.sprite_count >= MAX_SPRITES_PER_LINE {
                break;
            }
            let base = i * 4;
            let y = self.oam[base] as i16 - 16;
            if ly as i16 >= y && (ly as i16) < y + sprite_height {
                self.line_sprites[self.sprite_count] = Sprite {
                    x: self.oam[base + 1] as i16 - 8,
                    y,
                    tile: self.oam[base + 2],
                    flags: self.oam[base + 3],
                    oam_index: i,
                };
                self.sprite_count += 1;
            }
        }
        if self.cgb_regs() && self.opri & 0x01 == 0 {
            // CGB-style priority: use OAM order only
            self.line_sprites[..self.sprite_count].sort_by_key(|s| s.oam_index);
        } else {
            // DMG-style priority: sort by X position then OAM index
            self.line_sprites[..self.sprite_count].sort_by_key(|s| (s.x, s.oam_index));
        }
    }

    /// Fetch one tile-map pixel: (color, is color 0, BG-over-OBJ attribute).
    fn map_pixel(&self, map_base: usize, map_x: usize, map_y: usize) -> (u32, bool, bool) {
        let tile_data_base = if self.lcdc & 0x10 != 0 {
            TILE_DATA_0_BASE
        } else {
            TILE_DATA_1_BASE
        };
        let map_idx = map_base + (map_y / 8) * 32 + map_x / 8;
        let tile_index = self.vram[0][map_idx];
        let addr = if self.lcdc & 0x10 != 0 {
            tile_data_base + tile_index as usize * 16
        } else {
            tile_data_base + ((tile_index as i8 as i16 + 128) as usize) * 16
        };
        let mut bit = 7 - map_x % 8;
        let mut tile_y = map_y % 8;
        let mut priority = false;
        let mut palette = 0usize;
        let mut bank = 0usize;
        if self.cgb_regs() {
            let attr = self.vram[1][map_idx];
            palette = (attr & 0x07) as usize;
            bank = ((attr >> 3) & 1) as usize;
            if attr & 0x20 != 0 {
                bit = map_x % 8;
            }
            if attr & 0x40 != 0 {
                tile_y = 7 - tile_y;
            }
            priority = attr & 0x80 != 0;
        }
        let lo = self.vram[bank][addr + tile_y * 2];
        let hi = self.vram[bank][addr + tile_y * 2 + 1];
        let color_id = ((hi >> bit) & 1) << 1 | ((lo >> bit) & 1);
        let (color, zero) = self.bg_color(palette, color_id);
        (color, zero, priority)
    }

    fn render_background(&mut self, ly: u8) {
        let map_base = if self.lcdc & 0x08 != 0 {
            BG_MAP_1_BASE
        } else {
            BG_MAP_0_BASE
        };
        let map_y = (ly as usize + self.scy as usize) & 0xFF;
        let row = ly as usize * SCREEN_WIDTH;
        for x in 0..SCREEN_WIDTH {
            let map_x = (x + self.scx as usize) & 0xFF;
            let (color, zero, priority) = self.map_pixel(map_base, map_x, map_y);
            self.framebuffer[row + x] = color;
            self.line_priority[x] = priority;
            self.line_color_zero[x] = zero;
        }
    }

    fn render_window(&mut self, ly: u8) {
        if self.lcdc & 0x20 == 0 || ly < self.wy || self.wx > WINDOW_X_MAX {
            return;
        }
        let map_base = if self.lcdc & 0x40 != 0 {
            BG_MAP_1_BASE
        } else {
            BG_MAP_0_BASE
        };
        let start = self.wx.saturating_sub(7) as usize;
        let skip = 7usize.saturating_sub(self.wx as usize);
        let map_y = self.win_line_counter as usize;
        let row = ly as usize * SCREEN_WIDTH;
        for x in start..SCREEN_WIDTH {
            let map_x = x - start + skip;
            let (color, zero, priority) = self.map_pixel(map_base, map_x, map_y);
            self.framebuffer[row + x] = color;
            self.line_priority[x] = priority;
            self.line_color_zero[x] = zero;
        }
        self.win_line_counter = self.win_line_counter.wrapping_add(1);
    }

    fn render_sprites(&mut self, ly: u8, bg_enabled: bool, master_priority: bool) {
        let sprite_height: i16 = if self.lcdc & 0x04 != 0 { 16 } else { 8 };
        let mut drawn = [false; SCREEN_WIDTH];
        let row = ly as usize * SCREEN_WIDTH;
        for i in 0..self.sprite_count {
            let s = self.line_sprites[i];
            let mut tile = s.tile;
            if sprite_height == 16 {
                tile &= 0xFE;
            }
            let mut line_idx = ly as i16 - s.y;
            if s.flags & 0x40 != 0 {
                line_idx = sprite_height - 1 - line_idx;
            }
            let bank = if self.cgb_regs() {
                ((s.flags >> 3) & 0x01) as usize
            } else {
                0
            };
            let addr = (tile as usize + (line_idx as usize >> 3)) * 16 + (line_idx as usize & 7) * 2;
            let lo = self.vram[bank][addr];
            let hi = self.vram[bank][addr + 1];
            for px in 0..8 {
                let bit = if s.flags & 0x20 != 0 { px } else { 7 - px };
                let color_id = ((hi >> bit) & 1) << 1 | ((lo >> bit) & 1);
                if color_id == 0 {
                    continue;
                }
                let sx = s.x + px as i16;
                if !(0i16..SCREEN_WIDTH as i16).contains(&sx) || drawn[sx as usize] {
                    continue;
                }
                let sx = sx as usize;
                drawn[sx] = true;
                let bg_zero = !bg_enabled || self.line_color_zero[sx];
                if master_priority {
                    if self.cgb_regs() && self.line_priority[sx] && !bg_zero {
                        continue;
                    }
                    if s.flags & 0x80 != 0 && !bg_zero {
                        continue;
                    }
                }
                self.framebuffer[row + sx] = self.obj_color(s.flags, color_id);
            }
        }
    }

    fn render_scanline(&mut self, ly: u8) {
        if ly as usize >= SCREEN_HEIGHT {
            return;
        }
        self.line_priority.fill(false);
        self.line_color_zero.fill(true);

        // LCDC bit 0 disables the background on DMG and only drops its
        // priority on CGB.
        let bg_enabled = self.cgb_regs() || self.lcdc & 0x01 != 0;
        let master_priority = !self.cgb_regs() || self.lcdc & 0x01 != 0;

        let (blank, _) = self.bg_color(0, 0);
        let row = ly as usize * SCREEN_WIDTH;
        self.framebuffer[row..row + SCREEN_WIDTH].fill(blank);

        if bg_enabled {
            self.render_background(ly);
            self.render_window(ly);
        }
        if self.lcdc & 0x02 != 0 {
            self.render_sprites(ly, bg_enabled, master_priority);
        }
    }

    pub fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.enter("ppu");
        for (i, bank) in self.vram.iter_mut().enumerate() {
            v.bytes(if i == 0 { "vram0" } else { "vram1" }, bank);
        }
        let mut vbk = self.vram_bank as u8;
        v.u8("vbk", &mut vbk);
        self.vram_bank = (vbk & 1) as usize;
        v.bytes("oam", &mut self.oam);
        v.bool("dmg_compat", &mut self.dmg_compat);
        v.bool("ds", &mut self.ds);
        v.u8("lcdc", &mut self.lcdc);
        v.u8("stat", &mut self.stat);
        v.u8("scy", &mut self.scy);
        v.u8("scx", &mut self.scx);
        v.u8("lyc", &mut self.lyc);
        v.u8("bgp", &mut self.bgp);
        v.u8("obp0", &mut self.obp0);
        v.u8("obp1", &mut self.obp1);
        v.u8("wy", &mut self.wy);
        v.u8("wx", &mut self.wx);
        v.u8("bgpi", &mut self.bgpi);
        v.bytes("bgpd", &mut self.bgpd);
        v.u8("obpi", &mut self.obpi);
        v.bytes("obpd", &mut self.obpd);
        v.u8("opri", &mut self.opri);
        v.u64("lcd_start", &mut self.lcd_start);
        v.bool("lyc_flag_off", &mut self.lyc_flag_off);
        v.bool("stat_irq_line", &mut self.stat_irq_line);
        v.u8("win_line", &mut self.win_line_counter);
        v.u64("frames", &mut self.frame_counter);
        v.exit();
    }

    /// The composed lines of the frame in progress. Visited last in the
    /// image so older images without it still load.
    pub fn sync_frame(&mut self, v: &mut dyn StateVisitor) {
        let mut pixels: Vec<u8> = self
            .framebuffer
            .iter()
            .flat_map(|px| px.to_le_bytes())
            .collect();
        v.enter("ppu");
        v.bytes("framebuffer", &mut pixels);
        v.exit();
        for (px, bytes) in self.framebuffer.iter_mut().zip(pixels.chunks_exact(4)) {
            *px = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lcd_on_at(cc: u64) -> (Ppu, InterruptRequester, Scheduler) {
        let mut ppu = Ppu::new_with_mode(false);
        let mut irq = InterruptRequester::new();
        let mut sched = Scheduler::new();
        ppu.write_reg(0xFF40, 0x91, cc, &mut irq, &mut sched);
        (ppu, irq, sched)
    }

    fn run_video_until(ppu: &mut Ppu, irq: &mut InterruptRequester, sched: &mut Scheduler, cc: u64) {
        while sched.event_time(EventSlot::Video) <= cc {
            ppu.event(irq, sched);
        }
    }

    #[test]
    fn modes_follow_line_timing() {
        let (ppu, _, sched) = lcd_on_at(1000);
        assert_eq!(ppu.mode(1000), MODE_OAM);
        assert_eq!(ppu.mode(1000 + 80), MODE_TRANSFER);
        assert_eq!(ppu.mode(1000 + 252), MODE_HBLANK);
        assert_eq!(ppu.ly(1000 + 456 * 3 + 10), 3);
        assert_eq!(ppu.mode(1000 + 456 * 144), MODE_VBLANK);
        assert_eq!(sched.event_time(EventSlot::Video), 1080);
    }

    #[test]
    fn vblank_interrupt_and_frame_count() {
        let (mut ppu, mut irq, mut sched) = lcd_on_at(0);
        run_video_until(&mut ppu, &mut irq, &mut sched, 456 * 144 - 1);
        assert_eq!(irq.ifreg() & INT_VBLANK, 0);
        run_video_until(&mut ppu, &mut irq, &mut sched, 456 * 144);
        assert_eq!(irq.ifreg() & INT_VBLANK, INT_VBLANK);
        assert_eq!(ppu.frames(), 1);
        assert_eq!(ppu.next_vblank_time(456 * 144 + 5), DOTS_PER_FRAME + 456 * 144);
    }

    #[test]
    fn lyc_match_raises_stat_once() {
        let (mut ppu, mut irq, mut sched) = lcd_on_at(0);
        ppu.write_reg(0xFF45, 2, 0, &mut irq, &mut sched);
        ppu.write_reg(0xFF41, 0x40, 0, &mut irq, &mut sched);
        run_video_until(&mut ppu, &mut irq, &mut sched, 456 * 2 - 1);
        assert_eq!(irq.ifreg() & INT_STAT, 0);
        run_video_until(&mut ppu, &mut irq, &mut sched, 456 * 2 + 300);
        assert_eq!(irq.ifreg() & INT_STAT, INT_STAT);
        assert_eq!(ppu.read_reg(0xFF41, 456 * 2 + 300) & 0x07, 0x04 | MODE_HBLANK);
    }

    #[test]
    fn mode3_blocks_vram() {
        let (ppu, _, _) = lcd_on_at(0);
        assert!(ppu.vram_accessible(10));
        assert!(!ppu.oam_accessible(10));
        assert!(!ppu.vram_accessible(100));
        assert!(ppu.vram_accessible(300));
        assert!(ppu.oam_accessible(300));
    }

    #[test]
    fn speed_change_keeps_position() {
        let (mut ppu, _, mut sched) = lcd_on_at(0);
        ppu.speed_change(456 * 10 + 100, &mut sched);
        assert_eq!(ppu.ly(456 * 10 + 100), 10);
        // One line now takes twice as many cycles.
        assert_eq!(ppu.ly(456 * 10 + 100 + 456 * 2), 11);
    }

    #[test]
    fn background_uses_dmg_palette() {
        let (mut ppu, mut irq, mut sched) = lcd_on_at(0);
        ppu.write_reg(0xFF47, 0xE4, 0, &mut irq, &mut sched);
        // Tile 0 row 0 fully color 3.
        ppu.vram[0][0] = 0xFF;
        ppu.vram[0][1] = 0xFF;
        run_video_until(&mut ppu, &mut irq, &mut sched, 300);
        assert_eq!(ppu.framebuffer()[0], DMG_PALETTE[3]);
        assert_eq!(ppu.framebuffer()[SCREEN_WIDTH], 0);
    }
}
