use log::{debug, warn};

use crate::{
    apu::Apu,
    cartridge::{Cartridge, infrared::IrSource, parse_game_shark},
    hardware::{Model, POST_BOOT_DIV_OFFSET},
    input::Joypad,
    ppu::{DOTS_PER_FRAME, Ppu, SCREEN_WIDTH},
    savestate::StateVisitor,
    scheduler::{DISABLED_TIME, EventSlot, InterruptRequester, Scheduler},
    serial::Serial,
    sinks::{AudioSink, VideoSink},
    timer::Timer,
};

const WRAM_BANK_SIZE: usize = 0x1000;
const WRAM_NAMES: [&str; 8] = [
    "wram0", "wram1", "wram2", "wram3", "wram4", "wram5", "wram6", "wram7",
];
const OAM_SIZE: u8 = 0xA0;
/// OAM DMA position while no transfer is running.
const OAM_DMA_IDLE: u8 = 0xFE;
/// Cycles from an LCD-off write to the first blank frame.
const LCD_OFF_BLIT_DELAY: u64 = 456 * 4;

/// Where the current OAM DMA reads from. Decides which bus the CPU loses
/// while the transfer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OamDmaSource {
    Rom,
    Sram,
    Vram,
    Wram,
    Invalid,
    Off,
}

impl OamDmaSource {
    fn classify(reg: u8, cgb: bool) -> Self {
        if reg < 0xA0 {
            if reg < 0x80 {
                OamDmaSource::Rom
            } else {
                OamDmaSource::Vram
            }
        } else if (reg as u16) < 0x100 - cgb as u16 * 0x20 {
            if reg < 0xC0 {
                OamDmaSource::Sram
            } else {
                OamDmaSource::Wram
            }
        } else {
            OamDmaSource::Invalid
        }
    }

    /// Bitmask over `addr >> 13` of the CPU areas that collide with this
    /// source.
    fn conflict_areas(self, cgb: bool) -> u8 {
        match (self, cgb) {
            (OamDmaSource::Rom | OamDmaSource::Sram, _) => 0xEF,
            (OamDmaSource::Vram, false) => 0x10,
            (OamDmaSource::Vram, true) => 0xD0,
            (OamDmaSource::Wram, false) => 0xEF,
            (OamDmaSource::Wram, true) => 0xC0,
            (OamDmaSource::Invalid | OamDmaSource::Off, _) => 0,
        }
    }

    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => OamDmaSource::Rom,
            1 => OamDmaSource::Sram,
            2 => OamDmaSource::Vram,
            3 => OamDmaSource::Wram,
            4 => OamDmaSource::Invalid,
            _ => OamDmaSource::Off,
        }
    }
}

#[derive(Debug, Clone)]
struct OamDma {
    /// FF46
    reg: u8,
    src: OamDmaSource,
    pos: u8,
    start_pos: u8,
    last_update: u64,
}

impl OamDma {
    fn new() -> Self {
        Self {
            reg: 0xFF,
            src: OamDmaSource::Off,
            pos: OAM_DMA_IDLE,
            start_pos: 0,
            last_update: DISABLED_TIME,
        }
    }
}

/// CGB VRAM DMA (FF51-FF55).
#[derive(Debug, Clone)]
struct Hdma {
    src: u16,
    dst: u16,
    /// FF55 as software reads it.
    ff55: u8,
    enabled: bool,
    gdma_req: bool,
    /// An H-blank block that arrived while the CPU was halted.
    halt_pending: bool,
}

impl Hdma {
    fn new() -> Self {
        Self {
            src: 0,
            dst: 0,
            ff55: 0xFF,
            enabled: false,
            gdma_req: false,
            halt_pending: false,
        }
    }
}

/// The memory bus. Owns the cartridge, the scheduler and every peripheral;
/// the CPU reaches all of them through this type.
pub struct Mmu {
    pub cart: Option<Cartridge>,
    pub sched: Scheduler,
    pub irq: InterruptRequester,
    pub timer: Timer,
    pub serial: Serial,
    pub ppu: Ppu,
    pub apu: Apu,
    pub joypad: Joypad,
    pub wram: Box<[[u8; WRAM_BANK_SIZE]; 8]>,
    pub hram: [u8; 0x7F],
    /// FF70
    svbk: u8,
    boot_rom: Option<Vec<u8>>,
    boot_mapped: bool,
    cgb: bool,
    dmg_compat: bool,
    /// FF4D bits 7 and 0.
    pub key1: u8,
    ds: bool,
    /// Cycle at which DIV was last zero.
    pub div_last_update: u64,
    oam_dma: OamDma,
    hdma: Hdma,
    cart_bus: u8,
    last_cart_bus_update: u64,
    pull_up_time: u64,
    pub stopped: bool,
    ended: bool,
    /// FF56
    rp: u8,
    /// FF72-FF75
    undoc: [u8; 4],
    game_shark: Vec<(u16, u8)>,
    pub video_sink: Option<Box<dyn VideoSink>>,
    pub audio_sink: Option<Box<dyn AudioSink>>,
}

impl Mmu {
    pub fn new(model: Model) -> Self {
        let cgb = model.is_cgb();
        Self {
            cart: None,
            sched: Scheduler::new(),
            irq: InterruptRequester::new(),
            timer: Timer::new(),
            serial: Serial::new(cgb),
            ppu: Ppu::new_with_mode(cgb),
            apu: Apu::new_with_mode(cgb),
            joypad: Joypad::new(),
            wram: Box::new([[0; WRAM_BANK_SIZE]; 8]),
            hram: [0; 0x7F],
            svbk: 0,
            boot_rom: None,
            boot_mapped: false,
            cgb,
            dmg_compat: false,
            key1: 0,
            ds: false,
            div_last_update: 0,
            oam_dma: OamDma::new(),
            hdma: Hdma::new(),
            cart_bus: 0xFF,
            last_cart_bus_update: 0,
            pull_up_time: crate::config::DEFAULT_CART_BUS_PULL_UP_TIME,
            stopped: false,
            ended: false,
            rp: 0x3E,
            undoc: [0x00, 0x00, 0x00, 0x00],
            game_shark: Vec::new(),
            video_sink: None,
            audio_sink: None,
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
    pub fn double_speed(&self) -> bool {
        self.ds
    }

    /// Run a DMG cartridge on CGB hardware: CGB-only registers go dark and
    /// the boot ROM's compatibility palettes are loaded.
    pub fn set_dmg_compat(&mut self) {
        self.dmg_compat = true;
        self.ppu.apply_dmg_compatibility_palettes();
    }

    pub fn load_cart(&mut self, cart: Cartridge) {
        self.cart = Some(cart);
    }

    /// Map a boot image at 0x0000. CGB images also cover 0x0200-0x08FF.
    pub fn load_boot_rom(&mut self, data: Vec<u8>) {
        self.boot_rom = Some(data);
        self.boot_mapped = true;
        self.sched
            .set_event_time(EventSlot::Blit, DOTS_PER_FRAME);
    }

    pub fn boot_rom_mapped(&self) -> bool {
        self.boot_mapped
    }

    /// Registers and timing as the boot ROM leaves them at cycle `cc`.
    pub fn apply_boot_state(&mut self, model: Model, cc: u64) {
        self.boot_mapped = false;
        self.div_last_update = 0u64.wrapping_sub(POST_BOOT_DIV_OFFSET);
        self.irq.set_if(0xE1, cc, &mut self.sched);
        self.joypad.restore(0xCF);
        self.ppu.apply_boot_state(model, cc, &mut self.sched);
        self.apu.apply_boot_state(cc);
        self.timer.reset_reference(cc, &mut self.sched);
        self.sched
            .set_event_time(EventSlot::Blit, self.ppu.next_vblank_time(cc));
    }

    pub fn set_cart_bus_pull_up_time(&mut self, cycles: u64) {
        self.pull_up_time = cycles;
    }

    /// `;`-separated `01VVAAAA` codes, written back every frame.
    pub fn set_game_shark(&mut self, codes: &str) {
        self.game_shark.clear();
        for code in codes.split(';').filter(|c| !c.trim().is_empty()) {
            match parse_game_shark(code) {
                Some(entry) => self.game_shark.push(entry),
                None => warn!("Ignoring malformed GameShark code {code:?}"),
            }
        }
    }

    /// Consume the end-of-run marker set by the `End` slot.
    pub fn take_ended(&mut self) -> bool {
        std::mem::take(&mut self.ended)
    }

    #[inline(always)]
    fn wram_bank(&self) -> usize {
        (self.svbk & 7).max(1) as usize
    }

    #[inline(always)]
    fn wram_index(&self, addr: u16) -> (usize, usize) {
        let off = addr as usize & 0x1FFF;
        let bank = if off < WRAM_BANK_SIZE {
            0
        } else if self.cgb {
            self.wram_bank()
        } else {
            1
        };
        (bank, off & (WRAM_BANK_SIZE - 1))
    }

    fn read_wram(&self, addr: u16) -> u8 {
        let (bank, off) = self.wram_index(addr);
        self.wram[bank][off]
    }

    fn write_wram(&mut self, addr: u16, data: u8) {
        let (bank, off) = self.wram_index(addr);
        self.wram[bank][off] = data;
    }

    /// WRAM bank that OAM DMA conflicts route to on CGB.
    fn dma_wram_bank(&self) -> usize {
        if self.oam_dma.reg >> 4 & 1 == 0 {
            0
        } else {
            self.wram_bank()
        }
    }

    #[inline(always)]
    fn latch_cart_bus(&mut self, data: u8, cc: u64) {
        self.cart_bus = data;
        self.last_cart_bus_update = cc;
    }

    /// Value on the cartridge data lines. It decays to 0xFF once nothing has
    /// driven it for the pull-up time.
    fn open_bus(&self, cc: u64) -> u8 {
        if cc.wrapping_sub(self.last_cart_bus_update) >= self.pull_up_time << self.ds as u32 {
            0xFF
        } else {
            self.cart_bus
        }
    }

    fn boot_rom_byte(&self, addr: u16) -> Option<u8> {
        if !self.boot_mapped {
            return None;
        }
        let rom = self.boot_rom.as_ref()?;
        let a = addr as usize;
        if a < 0x100 || (self.cgb && (0x200..0x900).contains(&a)) {
            rom.get(a).copied()
        } else {
            None
        }
    }

    fn rom_byte(&self, addr: u16) -> u8 {
        if let Some(b) = self.boot_rom_byte(addr) {
            return b;
        }
        self.cart.as_ref().map_or(0xFF, |c| c.read_rom(addr))
    }

    // ---- OAM DMA ----

    fn oam_dma_byte(&mut self, pos: u8, cc: u64) -> u8 {
        let addr = (self.oam_dma.reg as u16) << 8 | pos as u16;
        match self.oam_dma.src {
            OamDmaSource::Rom => self.cart.as_ref().map_or(0xFF, |c| c.read_rom(addr)),
            OamDmaSource::Sram => self
                .cart
                .as_mut()
                .map_or(0xFF, |c| c.dma_read_sram(addr, cc)),
            OamDmaSource::Vram => self.ppu.vram[self.ppu.vram_bank][addr as usize & 0x1FFF],
            OamDmaSource::Wram => self.read_wram(addr),
            OamDmaSource::Invalid | OamDmaSource::Off => 0xFF,
        }
    }

    /// Advance the transfer one byte. Returns false once it has finished.
    fn step_oam_dma(&mut self) -> bool {
        let dma = &mut self.oam_dma;
        dma.pos = dma.pos.wrapping_add(1);
        dma.last_update += 4;
        if dma.pos == dma.start_pos {
            dma.pos = 0;
            dma.start_pos = 0;
        }
        let (pos, at) = (dma.pos, dma.last_update);
        if pos < OAM_SIZE {
            self.ppu.oam[pos as usize] = self.oam_dma_byte(pos, at);
        } else if pos == OAM_SIZE && self.oam_dma.start_pos == 0 {
            self.oam_dma.pos = OAM_DMA_IDLE;
            self.oam_dma.src = OamDmaSource::Off;
            self.oam_dma.last_update = DISABLED_TIME;
            return false;
        }
        true
    }

    /// Catch the running OAM DMA up to `cc`.
    fn update_oam_dma(&mut self, cc: u64) {
        if self.oam_dma.last_update == DISABLED_TIME || cc < self.oam_dma.last_update {
            return;
        }
        let cycles = (cc - self.oam_dma.last_update) >> 2;
        if self.irq.halted() {
            self.oam_dma.last_update += 4 * cycles;
            return;
        }
        for _ in 0..cycles {
            if !self.step_oam_dma() {
                break;
            }
        }
    }

    fn start_oam_dma(&mut self, data: u8, cc: u64) {
        self.oam_dma.reg = data;
        self.oam_dma.src = OamDmaSource::classify(data, self.cgb);
        self.oam_dma.start_pos = self.oam_dma.pos.wrapping_add(2);
        if self.oam_dma.last_update == DISABLED_TIME {
            self.oam_dma.last_update = cc;
        }
        let t = self.sched.event_time(EventSlot::Oam).min(cc + 8);
        self.sched.set_event_time(EventSlot::Oam, t);
    }

    pub fn oam_dma_active(&self) -> bool {
        self.oam_dma.pos < OAM_SIZE
    }

    #[inline(always)]
    fn in_oam_dma_conflict(&self, addr: u16) -> bool {
        self.oam_dma.pos < OAM_SIZE
            && addr < 0xFE00
            && self.oam_dma.src.conflict_areas(self.cgb) >> (addr >> 13) & 1 != 0
    }

    fn oam_dma_conflict_read(&mut self, addr: u16) -> u8 {
        let pos = self.oam_dma.pos as usize;
        let src = self.oam_dma.src;
        if self.cgb && src != OamDmaSource::Wram && addr >= 0xC000 {
            return self.wram[self.dma_wram_bank()][addr as usize & 0xFFF];
        }
        let v = self.ppu.oam[pos];
        if self.cgb && src == OamDmaSource::Vram {
            self.ppu.oam[pos] = 0;
        }
        v
    }

    fn oam_dma_conflict_write(&mut self, addr: u16, data: u8) {
        let pos = self.oam_dma.pos as usize;
        let src = self.oam_dma.src;
        if self.cgb {
            if addr < 0xC000 {
                self.ppu.oam[pos] = if src != OamDmaSource::Vram { data } else { 0 };
            } else if src != OamDmaSource::Wram {
                let bank = self.dma_wram_bank();
                self.wram[bank][addr as usize & 0xFFF] = data;
            }
        } else {
            self.ppu.oam[pos] = if src == OamDmaSource::Wram {
                self.ppu.oam[pos] & data
            } else {
                data
            };
        }
    }

    // ---- CPU-visible accesses ----

    pub fn read(&mut self, addr: u16, cc: u64) -> u8 {
        self.update_oam_dma(cc);
        if self.in_oam_dma_conflict(addr) {
            return self.oam_dma_conflict_read(addr);
        }
        match addr {
            0x0000..=0x7FFF => {
                let v = self.rom_byte(addr);
                self.latch_cart_bus(v, cc);
                v
            }
            0x8000..=0x9FFF => {
                if self.ppu.vram_accessible(cc) {
                    self.ppu.vram[self.ppu.vram_bank][addr as usize & 0x1FFF]
                } else {
                    0xFF
                }
            }
            0xA000..=0xBFFF => {
                let bus = self.open_bus(cc);
                let v = match self.cart.as_mut() {
                    Some(cart) => cart.read_sram(addr, cc, bus),
                    None => bus,
                };
                self.latch_cart_bus(v, cc);
                v
            }
            0xC000..=0xFDFF => {
                let v = self.read_wram(addr);
                if !self.cgb {
                    self.latch_cart_bus(v, cc);
                }
                v
            }
            0xFE00..=0xFE9F => {
                if self.oam_dma_active() || !self.ppu.oam_accessible(cc) {
                    0xFF
                } else {
                    self.ppu.oam[addr as usize & 0xFF]
                }
            }
            0xFEA0..=0xFEFF => {
                if self.ppu.oam_accessible(cc) {
                    0x00
                } else {
                    0xFF
                }
            }
            0xFF00..=0xFF7F => self.read_io(addr, cc),
            0xFF80..=0xFFFE => self.hram[addr as usize - 0xFF80],
            0xFFFF => self.irq.iereg(),
        }
    }

    pub fn write(&mut self, addr: u16, data: u8, cc: u64) {
        self.update_oam_dma(cc);
        if self.in_oam_dma_conflict(addr) {
            self.oam_dma_conflict_write(addr, data);
            return;
        }
        match addr {
            0x0000..=0x7FFF => {
                self.latch_cart_bus(data, cc);
                if let Some(cart) = self.cart.as_mut() {
                    cart.write_rom(addr, data, cc);
                }
            }
            0x8000..=0x9FFF => {
                if self.ppu.vram_accessible(cc) {
                    let bank = self.ppu.vram_bank;
                    self.ppu.vram[bank][addr as usize & 0x1FFF] = data;
                }
            }
            0xA000..=0xBFFF => {
                self.latch_cart_bus(data, cc);
                if let Some(cart) = self.cart.as_mut() {
                    cart.write_sram(addr, data, cc);
                }
            }
            0xC000..=0xFDFF => self.write_wram(addr, data),
            0xFE00..=0xFE9F => {
                if !self.oam_dma_active() && self.ppu.oam_accessible(cc) {
                    self.ppu.oam[addr as usize & 0xFF] = data;
                }
            }
            0xFEA0..=0xFEFF => {}
            0xFF00..=0xFF7F => self.write_io(addr, data, cc),
            0xFF80..=0xFFFE => self.hram[addr as usize - 0xFF80] = data,
            0xFFFF => self.irq.set_ie(data, cc, &mut self.sched),
        }
    }

    /// Flag interrupts whose deadlines passed without their slot firing yet.
    fn update_irqs(&mut self, cc: u64) {
        if self.sched.event_time(EventSlot::Serial) <= cc {
            self.serial.event(&mut self.irq, &mut self.sched);
        }
        while self.sched.event_time(EventSlot::Tima) <= cc {
            self.timer.event(&mut self.irq, &mut self.sched);
        }
        while self.sched.event_time(EventSlot::Video) <= cc {
            self.video_event();
        }
    }

    fn read_io(&mut self, addr: u16, cc: u64) -> u8 {
        match addr {
            0xFF00 => self.joypad.read(cc, &mut self.irq, &mut self.sched),
            0xFF01 | 0xFF02 => self.serial.read(addr, cc, &mut self.irq, &mut self.sched),
            0xFF04 => (cc.wrapping_sub(self.div_last_update) >> 8) as u8,
            0xFF05 => self.timer.read_tima(cc),
            0xFF06 => self.timer.tma,
            0xFF07 => self.timer.tac | 0xF8,
            0xFF0F => {
                self.update_irqs(cc);
                self.irq.ifreg() | 0xE0
            }
            0xFF10..=0xFF3F => self.apu.read_reg(addr, cc, self.div_last_update),
            0xFF46 => self.oam_dma.reg,
            0xFF40..=0xFF4B => self.ppu.read_reg(addr, cc),
            0xFF4D if self.cgb_regs() => self.key1 | 0x7E,
            0xFF4F if self.cgb_regs() => 0xFE | self.ppu.vram_bank as u8,
            0xFF50 => 0xFE | !self.boot_mapped as u8,
            0xFF55 if self.cgb_regs() => self.hdma.ff55,
            0xFF56 if self.cgb_regs() => self.read_rp(cc),
            0xFF68..=0xFF6C => self.ppu.read_reg(addr, cc),
            0xFF70 if self.cgb_regs() => 0xF8 | self.svbk,
            0xFF72 | 0xFF73 if self.cgb => self.undoc[(addr - 0xFF72) as usize],
            0xFF74 if self.cgb_regs() => self.undoc[2],
            0xFF75 if self.cgb => self.undoc[3] | 0x8F,
            0xFF76 | 0xFF77 if self.cgb => self.apu.read_pcm(addr),
            _ => 0xFF,
        }
    }

    fn read_rp(&mut self, cc: u64) -> u8 {
        if self.rp & 0xC0 == 0xC0
            && let Some(cart) = self.cart.as_mut()
            && cart.ir.signal(IrSource::Remote, cc)
        {
            return self.rp & !0x02;
        }
        self.rp | 0x02
    }

    fn write_io(&mut self, addr: u16, data: u8, cc: u64) {
        match addr {
            0xFF00 => self.joypad.write(data, cc, &mut self.irq, &mut self.sched),
            0xFF01 => self.serial.write_sb(data, cc, &mut self.irq, &mut self.sched),
            0xFF02 => self.serial.write_sc(
                data,
                cc,
                self.div_last_update,
                &mut self.irq,
                &mut self.sched,
            ),
            0xFF04 => self.reset_div(cc),
            0xFF05 => self.timer.set_tima(data, cc, &mut self.sched),
            0xFF06 => self.timer.set_tma(data, cc, &mut self.sched),
            0xFF07 => self
                .timer
                .set_tac(data, cc, self.div_last_update, &mut self.sched),
            0xFF0F => {
                self.update_irqs(cc);
                self.irq.set_if(0xE0 | data, cc, &mut self.sched);
            }
            0xFF10..=0xFF3F => self.apu.write_reg(addr, data, cc, self.div_last_update),
            0xFF40 => self.write_lcdc(data, cc),
            0xFF46 => self.start_oam_dma(data, cc),
            0xFF41..=0xFF4B => self
                .ppu
                .write_reg(addr, data, cc, &mut self.irq, &mut self.sched),
            // KEY0: only the boot ROM gets to pick DMG compatibility.
            0xFF4C if self.cgb && self.boot_mapped && data & 0x04 != 0 => {
                self.dmg_compat = true;
                debug!("DMG compatibility selected at cycle {cc}");
            }
            0xFF4D if self.cgb_regs() => self.key1 = (self.key1 & 0x80) | (data & 0x01),
            0xFF4F if self.cgb_regs() => self.ppu.vram_bank = (data & 1) as usize,
            0xFF50 => {
                if self.boot_mapped && data & 1 != 0 {
                    self.boot_mapped = false;
                    debug!("Boot ROM unmapped at cycle {cc}");
                }
            }
            0xFF51 if self.cgb_regs() => self.hdma.src = (data as u16) << 8 | (self.hdma.src & 0xFF),
            0xFF52 if self.cgb_regs() => self.hdma.src = (self.hdma.src & 0xFF00) | (data & 0xF0) as u16,
            0xFF53 if self.cgb_regs() => self.hdma.dst = (data as u16) << 8 | (self.hdma.dst & 0xFF),
            0xFF54 if self.cgb_regs() => self.hdma.dst = (self.hdma.dst & 0xFF00) | (data & 0xF0) as u16,
            0xFF55 if self.cgb_regs() => self.write_hdma_control(data, cc),
            0xFF56 if self.cgb_regs() => {
                if let Some(cart) = self.cart.as_mut() {
                    cart.ir.set_signal(IrSource::ThisGb, data & 1 != 0);
                    cart.ir.remote.set_active(data & 0xC0 == 0xC0);
                }
                self.rp = (data & 0xC1) | (self.rp & 0x3E);
            }
            0xFF68..=0xFF6C => self
                .ppu
                .write_reg(addr, data, cc, &mut self.irq, &mut self.sched),
            0xFF70 if self.cgb_regs() => self.svbk = data & 7,
            0xFF72 | 0xFF73 if self.cgb => self.undoc[(addr - 0xFF72) as usize] = data,
            0xFF74 if self.cgb_regs() => self.undoc[2] = data,
            0xFF75 if self.cgb => self.undoc[3] = data & 0x70,
            _ => {}
        }
    }

    /// DIV write: every divider-derived clock restarts at `cc`.
    fn reset_div(&mut self, cc: u64) {
        self.serial.div_reset(cc, &mut self.sched);
        self.apu.div_reset(cc, self.div_last_update);
        self.timer
            .div_reset(cc, self.div_last_update, &mut self.sched);
        self.div_last_update = cc;
    }

    fn write_lcdc(&mut self, data: u8, cc: u64) {
        let was_on = self.ppu.lcd_on();
        self.ppu
            .write_reg(0xFF40, data, cc, &mut self.irq, &mut self.sched);
        let on = self.ppu.lcd_on();
        if !was_on && on {
            self.sched
                .set_event_time(EventSlot::Blit, self.ppu.next_vblank_time(cc));
        } else if was_on && !on {
            self.sched.set_event_time(
                EventSlot::Blit,
                cc + (LCD_OFF_BLIT_DELAY << self.ds as u32),
            );
            if self.hdma.enabled {
                self.sched.set_event_time(EventSlot::Dma, cc);
            }
        }
    }

    // ---- HDMA ----

    fn write_hdma_control(&mut self, data: u8, cc: u64) {
        self.hdma.ff55 = data & 0x7F;
        if self.hdma.enabled {
            if data & 0x80 == 0 {
                self.hdma.ff55 |= 0x80;
                self.hdma.enabled = false;
                self.hdma.halt_pending = false;
                if !self.hdma.gdma_req {
                    self.sched.disable(EventSlot::Dma);
                }
            }
            return;
        }
        if data & 0x80 != 0 {
            self.hdma.enabled = true;
            if !self.ppu.lcd_on() || self.ppu.in_hblank(cc) {
                self.sched.set_event_time(EventSlot::Dma, cc);
            }
        } else {
            debug!(
                "GDMA {:#06x} -> {:#06x}, {} bytes",
                self.hdma.src,
                0x8000 | (self.hdma.dst & 0x1FF0),
                ((data & 0x7F) as u32 + 1) * 0x10
            );
            self.hdma.gdma_req = true;
            self.sched.set_event_time(EventSlot::Dma, cc);
        }
    }

    fn dma_source_read(&mut self, src: u16, cc: u64) -> u8 {
        match src {
            0x8000..=0x9FFF | 0xE000..=0xFFFF => self.open_bus(cc + 4),
            0x0000..=0x7FFF => self.rom_byte(src),
            0xA000..=0xBFFF => {
                let bus = self.open_bus(cc);
                match self.cart.as_mut() {
                    Some(cart) => cart.read_sram(src, cc, bus),
                    None => bus,
                }
            }
            0xC000..=0xDFFF => self.read_wram(src),
        }
    }

    /// `Dma` slot handler: copy one H-blank block, or the whole GDMA length.
    /// Returns the cycle counter after the CPU stall.
    fn dma(&mut self, mut cc: u64) -> u64 {
        self.sched.disable(EventSlot::Dma);
        let gdma = std::mem::take(&mut self.hdma.gdma_req);
        if !gdma && !self.hdma.enabled {
            return cc;
        }
        if !gdma && self.irq.halted() {
            self.hdma.halt_pending = true;
            return cc;
        }

        let mut remaining = ((self.hdma.ff55 & 0x7F) as u32 + 1) * 0x10;
        let mut length = if gdma { remaining } else { 0x10 };
        if self.hdma.dst as u32 + length >= 0x10000 {
            length = 0x10000 - self.hdma.dst as u32;
            self.hdma.ff55 |= 0x80;
        }
        remaining -= length;
        if gdma && !self.ppu.lcd_on() {
            remaining = 0;
        }

        for _ in 0..length {
            let src = self.hdma.src;
            let data = self.dma_source_read(src, cc);
            self.hdma.src = src.wrapping_add(1);
            cc += 2 << self.ds as u32;
            self.update_oam_dma(cc);
            let bank = self.ppu.vram_bank;
            self.ppu.vram[bank][self.hdma.dst as usize & 0x1FFF] = data;
            self.hdma.dst = self.hdma.dst.wrapping_add(1);
        }
        cc += 4;

        self.hdma.ff55 = ((remaining / 0x10).wrapping_sub(1) & 0xFF) as u8 | (self.hdma.ff55 & 0x80);
        if self.hdma.ff55 & 0x80 != 0 && self.hdma.enabled {
            self.hdma.enabled = false;
        }
        cc
    }

    // ---- halt / stop / speed ----

    pub fn halt(&mut self, cc: u64) {
        self.update_oam_dma(cc);
        self.irq.halt(cc, &mut self.sched);
    }

    /// Leave halt. An H-blank block held back during the halt runs now.
    pub fn unhalt(&mut self, cc: u64) {
        self.irq.unhalt(&mut self.sched);
        if std::mem::take(&mut self.hdma.halt_pending) && self.hdma.enabled {
            self.sched.set_event_time(EventSlot::Dma, cc);
        }
    }

    /// STOP opcode. Performs the CGB speed switch when armed through KEY1,
    /// otherwise stops the CPU until a button press.
    pub fn stop(&mut self, cc: u64) {
        if self.cgb_regs() && self.key1 & 0x01 != 0 {
            self.speed_switch(cc);
            return;
        }
        self.halt(cc);
        self.stopped = true;
        self.sched.disable(EventSlot::Unhalt);
        debug!("CPU stopped at cycle {cc}");
    }

    fn speed_switch(&mut self, cc: u64) {
        self.reset_div(cc);
        self.apu.speed_change(cc, self.div_last_update);
        self.ppu.speed_change(cc, &mut self.sched);
        if let Some(cart) = self.cart.as_mut() {
            cart.speed_change(cc);
        }
        self.ds = !self.ds;
        self.key1 ^= 0x81;

        let blit = if self.ppu.lcd_on() {
            self.ppu.next_vblank_time(cc)
        } else {
            cc + (DOTS_PER_FRAME << self.ds as u32)
        };
        self.sched.set_event_time(EventSlot::Blit, blit);

        let end = self.sched.event_time(EventSlot::End);
        if end != DISABLED_TIME && end > cc {
            let left = end - cc;
            let scaled = if self.ds { left * 2 } else { left / 2 };
            self.sched.set_event_time(EventSlot::End, cc + scaled);
        }

        self.halt(cc);
        self.sched
            .set_event_time(EventSlot::Unhalt, cc + 0x20000 + 4);
        debug!(
            "Speed switch to {} speed at cycle {cc}",
            if self.ds { "double" } else { "normal" }
        );
    }

    // ---- events ----

    /// Handle the earliest pending slot other than `Interrupts`. Returns the
    /// cycle counter, which only moves for DMA stalls.
    pub fn event(&mut self, cc: u64) -> u64 {
        self.update_oam_dma(cc);
        match self.sched.min_event() {
            EventSlot::Unhalt => {
                self.sched.disable(EventSlot::Unhalt);
                self.stopped = false;
                self.unhalt(cc);
                let ie = self.irq.iereg();
                self.irq.set_ie(ie, cc, &mut self.sched);
            }
            EventSlot::End => {
                self.sched.disable(EventSlot::End);
                self.ended = true;
            }
            EventSlot::Blit => self.blit(cc),
            EventSlot::Serial => self.serial.event(&mut self.irq, &mut self.sched),
            EventSlot::Oam => self.oam_event(),
            EventSlot::Dma => return self.dma(cc),
            EventSlot::Tima => self.timer.event(&mut self.irq, &mut self.sched),
            EventSlot::Video => self.video_event(),
            EventSlot::Interrupts => {}
        }
        cc
    }

    fn oam_event(&mut self) {
        let dma = &self.oam_dma;
        if dma.last_update == DISABLED_TIME {
            self.sched.disable(EventSlot::Oam);
            return;
        }
        let target = if dma.pos < OAM_SIZE {
            OAM_SIZE
        } else {
            dma.start_pos
        };
        let steps = match target.wrapping_sub(dma.pos) {
            0 => 0x100,
            n => n as u64,
        };
        self.sched
            .set_event_time(EventSlot::Oam, dma.last_update + steps * 4);
    }

    fn video_event(&mut self) {
        let t = self.sched.event_time(EventSlot::Video);
        if self.ppu.event(&mut self.irq, &mut self.sched) && self.hdma.enabled {
            self.sched.set_event_time(EventSlot::Dma, t);
        }
    }

    fn blit(&mut self, cc: u64) {
        let t = self.sched.event_time(EventSlot::Blit);
        self.joypad.poll();
        if self.stopped && self.joypad.any_pressed() {
            self.sched.set_event_time(EventSlot::Unhalt, cc);
        }
        let next = if self.ppu.lcd_on() {
            self.ppu.next_vblank_time(t)
        } else {
            self.ppu.blank();
            t + (DOTS_PER_FRAME << self.ds as u32)
        };
        if let Some(sink) = self.video_sink.as_mut() {
            sink.frame(self.ppu.framebuffer(), SCREEN_WIDTH);
        }
        for i in 0..self.game_shark.len() {
            let (addr, value) = self.game_shark[i];
            self.write(addr, value, cc);
        }
        self.sched.set_event_time(EventSlot::Blit, next);
    }

    /// Mix cartridge audio and hand every sample owed up to `cc` to the sink.
    pub fn flush_audio(&mut self, cc: u64) -> usize {
        let tone = match self.cart.as_mut() {
            Some(cart) => cart.take_tone_samples(cc),
            None => Vec::new(),
        };
        self.apu.flush(cc, &tone, self.audio_sink.as_mut())
    }

    /// Subtract a whole number of 64 KiB blocks from every stored cycle
    /// stamp. Returns the new cycle counter.
    pub fn rebase(&mut self, cc: u64) -> u64 {
        self.update_oam_dma(cc);
        self.update_irqs(cc);
        let dec = if cc < 0x20000 {
            0
        } else {
            (cc & !0xFFFF) - 0x10000
        };
        if dec == 0 {
            return cc;
        }
        if self.oam_dma.last_update != DISABLED_TIME {
            self.oam_dma.last_update -= dec;
        }
        self.last_cart_bus_update = self.last_cart_bus_update.wrapping_sub(dec);
        self.div_last_update = self.div_last_update.wrapping_sub(dec);
        self.sched.rebase(dec);
        self.irq.rebase(dec);
        self.timer.rebase(dec);
        self.ppu.rebase(dec);
        self.apu.rebase(dec);
        if let Some(cart) = self.cart.as_mut() {
            cart.rebase(cc, dec);
        }
        cc - dec
    }

    // ---- import support ----

    /// Raw IO restore for BESS import. Side effects that depend on timing
    /// are rebuilt afterwards by `reset_counters`.
    pub fn restore_io(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF00 => self.joypad.restore(val),
            0xFF01 => self.serial.sb = val,
            0xFF02 => self.serial.sc = val,
            0xFF05 => self.timer.tima = val,
            0xFF06 => self.timer.tma = val,
            0xFF07 => self.timer.tac = val & 0x07,
            0xFF10..=0xFF3F => self.apu.restore_reg(addr, val),
            0xFF40..=0xFF45 | 0xFF47..=0xFF4B | 0xFF68 | 0xFF6A | 0xFF6C => {
                self.ppu.restore_reg(addr, val)
            }
            0xFF46 => self.oam_dma.reg = val,
            0xFF4D if self.cgb => self.key1 = val & 0x81,
            0xFF4F if self.cgb => self.ppu.vram_bank = (val & 1) as usize,
            0xFF50 => self.boot_mapped = val & 1 == 0 && self.boot_rom.is_some(),
            0xFF51 => self.hdma.src = (val as u16) << 8 | (self.hdma.src & 0xFF),
            0xFF52 => self.hdma.src = (self.hdma.src & 0xFF00) | (val & 0xF0) as u16,
            0xFF53 => self.hdma.dst = (val as u16) << 8 | (self.hdma.dst & 0xFF),
            0xFF54 => self.hdma.dst = (self.hdma.dst & 0xFF00) | (val & 0xF0) as u16,
            0xFF55 => self.hdma.ff55 = val,
            0xFF56 => self.rp = (val & 0xC1) | 0x3E,
            0xFF70 if self.cgb => self.svbk = val & 7,
            0xFF72..=0xFF75 => self.undoc[(addr - 0xFF72) as usize] = val,
            _ => {}
        }
    }

    /// Rebuild every derived counter for a machine restored at `cc`: DMA is
    /// idle, serial is disabled, DIV and TIMA restart at zero phase.
    pub fn reset_counters(&mut self, ly: u8, cc: u64) {
        self.oam_dma.pos = OAM_DMA_IDLE;
        self.oam_dma.start_pos = 0;
        self.oam_dma.src = OamDmaSource::Off;
        self.oam_dma.last_update = DISABLED_TIME;
        self.hdma.enabled = false;
        self.hdma.gdma_req = false;
        self.hdma.halt_pending = false;
        self.stopped = false;
        self.ended = false;
        self.last_cart_bus_update = cc;
        self.div_last_update = 0;
        for slot in EventSlot::ALL {
            self.sched.disable(slot);
        }
        self.irq.set_min_int_time(cc, &mut self.sched);
        self.timer.reset_reference(cc, &mut self.sched);
        self.ppu.set_double_speed(self.ds);
        self.apu.set_double_speed(self.ds);
        self.ppu.restart_at_line(ly, cc, &mut self.sched);
        self.apu.reset_reference(cc);
        if let Some(cart) = self.cart.as_mut() {
            cart.set_double_speed(self.ds);
            cart.reset_references(cc);
        }
        let blit = if self.ppu.lcd_on() {
            self.ppu.next_vblank_time(cc)
        } else {
            cc + (DOTS_PER_FRAME << self.ds as u32)
        };
        self.sched.set_event_time(EventSlot::Blit, blit);
    }

    pub fn set_double_speed(&mut self, ds: bool) {
        self.ds = ds;
    }

    // ---- memory areas ----

    pub fn vram(&self) -> &[u8] {
        self.ppu.vram.as_flattened()
    }

    pub fn wram(&self) -> &[u8] {
        self.wram.as_flattened()
    }

    pub fn oam(&self) -> &[u8] {
        &self.ppu.oam[..OAM_SIZE as usize]
    }

    pub fn rom(&self) -> &[u8] {
        self.cart.as_ref().map_or(&[], |c| c.rom())
    }

    pub fn sram(&self) -> &[u8] {
        self.cart.as_ref().map_or(&[], |c| c.sram())
    }

    pub fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.enter("mmu");
        self.sched.sync_state(v);
        self.irq.sync_state(v);
        self.timer.sync_state(v);
        self.serial.sync_state(v);
        self.ppu.sync_state(v);
        self.apu.sync_state(v);
        self.joypad.sync_state(v);
        if let Some(cart) = self.cart.as_mut() {
            cart.sync_state(v);
        }
        for (bank, name) in self.wram.iter_mut().zip(WRAM_NAMES) {
            v.bytes(name, bank);
        }
        v.bytes("hram", &mut self.hram);
        v.u8("svbk", &mut self.svbk);
        v.bool("boot_mapped", &mut self.boot_mapped);
        v.bool("dmg_compat", &mut self.dmg_compat);
        v.u8("key1", &mut self.key1);
        v.bool("ds", &mut self.ds);
        v.u64("div_last_update", &mut self.div_last_update);

        v.enter("oam_dma");
        v.u8("reg", &mut self.oam_dma.reg);
        let mut src = self.oam_dma.src.to_u8();
        v.u8("src", &mut src);
        self.oam_dma.src = OamDmaSource::from_u8(src);
        v.u8("pos", &mut self.oam_dma.pos);
        v.u8("start_pos", &mut self.oam_dma.start_pos);
        v.u64("last_update", &mut self.oam_dma.last_update);
        v.exit();

        v.enter("hdma");
        v.u16("src", &mut self.hdma.src);
        v.u16("dst", &mut self.hdma.dst);
        v.u8("ff55", &mut self.hdma.ff55);
        v.bool("enabled", &mut self.hdma.enabled);
        v.bool("gdma_req", &mut self.hdma.gdma_req);
        v.bool("halt_pending", &mut self.hdma.halt_pending);
        v.exit();

        v.u8("cart_bus", &mut self.cart_bus);
        v.u64("cart_bus_time", &mut self.last_cart_bus_update);
        v.bool("stopped", &mut self.stopped);
        v.u8("rp", &mut self.rp);
        v.bytes("undoc", &mut self.undoc);
        self.ppu.sync_frame(v);
        v.exit();

        if let Some(cart) = self.cart.as_mut() {
            cart.set_double_speed(self.ds);
        }
    }
}

impl std::fmt::Debug for Mmu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mmu")
            .field("cgb", &self.cgb)
            .field("ds", &self.ds)
            .field("svbk", &self.svbk)
            .field("oam_dma", &self.oam_dma)
            .field("hdma", &self.hdma)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cgb_mmu() -> Mmu {
        Mmu::new(Model::Cgb)
    }

    #[test]
    fn svbk_zero_selects_bank_one() {
        let mut mmu = cgb_mmu();
        mmu.write(0xFF70, 0, 0);
        mmu.write(0xD000, 0x11, 0);
        mmu.write(0xFF70, 1, 0);
        assert_eq!(mmu.read(0xD000, 0), 0x11);
        mmu.write(0xFF70, 3, 0);
        assert_eq!(mmu.read(0xD000, 0), 0x00);
        assert_eq!(mmu.read(0xFF70, 0), 0xFB);
    }

    #[test]
    fn echo_mirrors_wram() {
        let mut mmu = Mmu::new(Model::Dmg);
        mmu.write(0xC123, 0x5A, 0);
        assert_eq!(mmu.read(0xE123, 0), 0x5A);
    }

    #[test]
    fn oam_dma_source_classes() {
        assert_eq!(OamDmaSource::classify(0x00, false), OamDmaSource::Rom);
        assert_eq!(OamDmaSource::classify(0x80, false), OamDmaSource::Vram);
        assert_eq!(OamDmaSource::classify(0xA0, false), OamDmaSource::Sram);
        assert_eq!(OamDmaSource::classify(0xC0, false), OamDmaSource::Wram);
        assert_eq!(OamDmaSource::classify(0xFE, false), OamDmaSource::Wram);
        assert_eq!(OamDmaSource::classify(0xE0, true), OamDmaSource::Invalid);
    }

    #[test]
    fn gdma_copies_and_reports_done() {
        let mut mmu = cgb_mmu();
        for i in 0..0x20u16 {
            mmu.write(0xC000 + i, i as u8, 0);
        }
        mmu.write(0xFF51, 0xC0, 0);
        mmu.write(0xFF52, 0x00, 0);
        mmu.write(0xFF53, 0x80, 0);
        mmu.write(0xFF54, 0x00, 0);
        mmu.write(0xFF55, 0x01, 0);
        assert_eq!(mmu.sched.min_event(), EventSlot::Dma);
        let cc = mmu.event(0);
        // 32 bytes at two cycles each plus the trailing stall.
        assert_eq!(cc, 0x20 * 2 + 4);
        assert_eq!(mmu.ppu.vram[0][0x1F], 0x1F);
        assert_eq!(mmu.read(0xFF55, cc), 0xFF);
    }

    #[test]
    fn disabled_cart_bus_decays_to_ff() {
        let mut mmu = Mmu::new(Model::Dmg);
        mmu.write(0x2000, 0x42, 100);
        assert_eq!(mmu.read(0xA000, 104), 0x42);
        assert_eq!(mmu.read(0xA000, 200), 0xFF);
    }

    #[test]
    fn rebase_keeps_div_phase() {
        let mut mmu = Mmu::new(Model::Dmg);
        let cc = 0x8001_2344;
        mmu.write(0xFF04, 0, cc - 0x300);
        let before = mmu.read(0xFF04, cc);
        let new_cc = mmu.rebase(cc);
        assert!(new_cc < cc);
        assert_eq!(mmu.read(0xFF04, new_cc), before);
    }
}
