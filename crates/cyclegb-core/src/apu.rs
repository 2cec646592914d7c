//! Sound register file.
//!
//! Models what software can observe of the sound unit: register read masks,
//! NR52 power and channel status bits, DAC gating and the length counters
//! driven by the DIV-derived frame sequencer. Waveform synthesis is left to
//! the frontend; the sample stream carries silence plus any cartridge audio
//! (the HuC3 speaker) at one stereo sample per two base cycles.

use crate::savestate::StateVisitor;
use crate::sinks::AudioSink;

const POWER_ON_REGS: [u8; 0x30] = [
    0x80, 0xBF, 0xF3, 0xFF, 0xBF, 0xFF, 0x3F, 0x00, 0xFF, 0xBF, 0x7F, 0xFF, 0x9F, 0xFF, 0xBF, 0xFF,
    0xFF, 0x00, 0x00, 0xBF, 0x77, 0xF3, 0xF1, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Frame sequencer input: DIV bit 4 (bit 5 in double speed).
const SEQUENCER_BIT: u32 = 12;

#[derive(Default, Clone, Copy)]
struct FrameSequencer {
    step: u8,
}

impl FrameSequencer {
    fn new() -> Self {
        Self { step: 0 }
    }

    fn advance(&mut self) -> u8 {
        let s = self.step;
        self.step = (self.step + 1) & 7;
        s
    }

    /// Whether the step about to run clocks the length counters.
    fn next_clocks_length(&self) -> bool {
        self.step & 1 == 0
    }
}

#[derive(Default, Clone, Copy)]
struct LengthCounter {
    counter: u16,
    enabled: bool,
}

pub struct Apu {
    regs: [u8; 0x30],
    power: bool,
    channel_on: [bool; 4],
    lengths: [LengthCounter; 4],
    sequencer: FrameSequencer,
    cgb: bool,
    ds: bool,
    /// Cycle up to which the frame sequencer has been stepped.
    last_update: u64,
    /// Cycle up to which samples have been produced.
    last_sample: u64,
    samples: Vec<[i16; 2]>,
}

impl Apu {
    pub fn new_with_mode(cgb: bool) -> Self {
        Self {
            regs: [0; 0x30],
            power: false,
            channel_on: [false; 4],
            lengths: [LengthCounter::default(); 4],
            sequencer: FrameSequencer::new(),
            cgb,
            ds: false,
            last_update: 0,
            last_sample: 0,
            samples: Vec::new(),
        }
    }

    pub fn new() -> Self {
        Self::new_with_mode(false)
    }

    /// Registers as the boot ROM leaves them: powered, channel 1 playing
    /// its finished chime.
    pub fn apply_boot_state(&mut self, cc: u64) {
        self.regs = POWER_ON_REGS;
        self.power = true;
        self.channel_on = [true, false, false, false];
        self.lengths = [LengthCounter::default(); 4];
        self.last_update = cc;
        self.last_sample = cc;
    }

    fn read_mask(addr: u16) -> u8 {
        match addr {
            0xFF10 => 0x80,
            0xFF11 => 0x3F,
            0xFF12 => 0x00,
            0xFF13 => 0xFF,
            0xFF14 => 0xBF,
            0xFF16 => 0x3F,
            0xFF17 => 0x00,
            0xFF18 => 0xFF,
            0xFF19 => 0xBF,
            0xFF1A => 0x7F,
            0xFF1B => 0xFF,
            0xFF1C => 0x9F,
            0xFF1D => 0xFF,
            0xFF1E => 0xBF,
            0xFF20 => 0xFF,
            0xFF21 => 0x00,
            0xFF22 => 0x00,
            0xFF23 => 0xBF,
            0xFF24 => 0x00,
            0xFF25 => 0x00,
            0xFF26 => 0x70,
            0xFF15 | 0xFF1F => 0xFF,
            0xFF30..=0xFF3F => 0x00,
            _ => 0xFF,
        }
    }

    #[inline(always)]
    fn period(&self) -> u64 {
        1 << (SEQUENCER_BIT + 1 + self.ds as u32)
    }

    fn dac_on(&self, ch: usize) -> bool {
        match ch {
            0 => self.regs[0x02] & 0xF8 != 0,
            1 => self.regs[0x07] & 0xF8 != 0,
            2 => self.regs[0x0A] & 0x80 != 0,
            _ => self.regs[0x11] & 0xF8 != 0,
        }
    }

    fn max_length(ch: usize) -> u16 {
        if ch == 2 { 256 } else { 64 }
    }

    fn clock_lengths(&mut self) {
        for ch in 0..4 {
            let len = &mut self.lengths[ch];
            if len.enabled && len.counter > 0 {
                len.counter -= 1;
                if len.counter == 0 {
                    self.channel_on[ch] = false;
                }
            }
        }
    }

    fn any_length_running(&self) -> bool {
        self.lengths.iter().any(|l| l.enabled && l.counter > 0)
    }

    /// Step the frame sequencer over every DIV falling edge up to `cc`.
    pub fn update(&mut self, cc: u64, div_last_update: u64) {
        if cc <= self.last_update {
            return;
        }
        let period = self.period();
        let from = self.last_update.wrapping_sub(div_last_update) / period;
        let to = cc.wrapping_sub(div_last_update) / period;
        self.last_update = cc;
        if !self.power {
            return;
        }
        let mut edges = to.wrapping_sub(from);
        if !self.any_length_running() {
            self.sequencer.step = ((self.sequencer.step as u64 + edges) & 7) as u8;
            return;
        }
        while edges > 0 {
            edges -= 1;
            if self.sequencer.advance() & 1 == 0 {
                self.clock_lengths();
            }
        }
    }

    /// DIV write: a high sequencer input dropping to zero counts as an edge.
    pub fn div_reset(&mut self, cc: u64, div_last_update: u64) {
        self.update(cc, div_last_update);
        let half = self.period() >> 1;
        if self.power && cc.wrapping_sub(div_last_update) & half != 0 && self.sequencer.advance() & 1 == 0 {
            self.clock_lengths();
        }
    }

    pub fn speed_change(&mut self, cc: u64, div_last_update: u64) {
        self.update(cc, div_last_update);
        self.generate_samples(cc);
        self.ds = !self.ds;
    }

    pub fn set_double_speed(&mut self, ds: bool) {
        self.ds = ds;
    }

    pub fn read_reg(&mut self, addr: u16, cc: u64, div_last_update: u64) -> u8 {
        self.update(cc, div_last_update);
        match addr {
            0xFF26 => {
                let mut val = (self.power as u8) << 7 | Self::read_mask(addr);
                for (ch, &on) in self.channel_on.iter().enumerate() {
                    if on {
                        val |= 1 << ch;
                    }
                }
                val
            }
            0xFF30..=0xFF3F => {
                if self.channel_on[2] {
                    0xFF
                } else {
                    self.regs[(addr - 0xFF10) as usize]
                }
            }
            0xFF10..=0xFF2F => self.regs[(addr - 0xFF10) as usize] | Self::read_mask(addr),
            _ => 0xFF,
        }
    }

    /// FF76/FF77 digital outputs. With no synthesized waveform they read as
    /// silent channels.
    pub fn read_pcm(&self, _addr: u16) -> u8 {
        if self.cgb { 0x00 } else { 0xFF }
    }

    fn write_length(&mut self, ch: usize, val: u8) {
        let data = if ch == 2 { val as u16 } else { (val & 0x3F) as u16 };
        self.lengths[ch].counter = Self::max_length(ch) - data;
    }

    fn write_nrx4(&mut self, ch: usize, val: u8) {
        let was_enabled = self.lengths[ch].enabled;
        let enable = val & 0x40 != 0;
        let extra = !self.sequencer.next_clocks_length();
        self.lengths[ch].enabled = enable;
        // Enabling the counter in the first half of a length period clocks it.
        if extra && enable && !was_enabled && self.lengths[ch].counter > 0 {
            self.lengths[ch].counter -= 1;
            if self.lengths[ch].counter == 0 && val & 0x80 == 0 {
                self.channel_on[ch] = false;
            }
        }
        if val & 0x80 != 0 {
            if self.lengths[ch].counter == 0 {
                self.lengths[ch].counter = Self::max_length(ch);
                if extra && enable {
                    self.lengths[ch].counter -= 1;
                }
            }
            self.channel_on[ch] = self.dac_on(ch);
        }
    }

    pub fn write_reg(&mut self, addr: u16, val: u8, cc: u64, div_last_update: u64) {
        self.update(cc, div_last_update);
        self.generate_samples(cc);
        let idx = (addr - 0xFF10) as usize;
        if addr == 0xFF26 {
            self.write_power(val);
            return;
        }
        if (0xFF30..=0xFF3F).contains(&addr) {
            self.regs[idx] = val;
            return;
        }
        if !self.power {
            // DMG keeps the length counters writable while powered off.
            if !self.cgb {
                match addr {
                    0xFF11 => self.write_length(0, val),
                    0xFF16 => self.write_length(1, val),
                    0xFF1B => self.write_length(2, val),
                    0xFF20 => self.write_length(3, val),
                    _ => {}
                }
            }
            return;
        }
        self.regs[idx] = val;
        match addr {
            0xFF11 => self.write_length(0, val),
            0xFF16 => self.write_length(1, val),
            0xFF1B => self.write_length(2, val),
            0xFF20 => self.write_length(3, val),
            0xFF12 | 0xFF17 | 0xFF1A | 0xFF21 => {
                let ch = match addr {
                    0xFF12 => 0,
                    0xFF17 => 1,
                    0xFF1A => 2,
                    _ => 3,
                };
                if !self.dac_on(ch) {
                    self.channel_on[ch] = false;
                }
            }
            0xFF14 => self.write_nrx4(0, val),
            0xFF19 => self.write_nrx4(1, val),
            0xFF1E => self.write_nrx4(2, val),
            0xFF23 => self.write_nrx4(3, val),
            _ => {}
        }
    }

    fn write_power(&mut self, val: u8) {
        let on = val & 0x80 != 0;
        if on == self.power {
            return;
        }
        if on {
            self.power = true;
            self.sequencer = FrameSequencer::new();
        } else {
            self.regs[..0x16].fill(0);
            self.channel_on = [false; 4];
            for len in self.lengths.iter_mut() {
                len.enabled = false;
                if self.cgb {
                    len.counter = 0;
                }
            }
            self.power = false;
        }
        log::debug!("Sound power {}", if on { "on" } else { "off" });
    }

    /// Raw register restore for state import.
    pub fn restore_reg(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF26 => self.power = val & 0x80 != 0,
            0xFF10..=0xFF3F => self.regs[(addr - 0xFF10) as usize] = val,
            _ => {}
        }
    }

    /// Append the samples owed up to `cc`.
    pub fn generate_samples(&mut self, cc: u64) {
        let shift = 1 + self.ds as u32;
        if cc <= self.last_sample {
            return;
        }
        let count = (cc - self.last_sample) >> shift;
        self.last_sample += count << shift;
        self.samples.resize(self.samples.len() + count as usize, [0, 0]);
    }

    /// Mix cartridge audio into the pending samples and hand them to the sink.
    /// Returns the number of samples produced.
    pub fn flush(&mut self, cc: u64, tone: &[i16], sink: Option<&mut Box<dyn AudioSink>>) -> usize {
        self.generate_samples(cc);
        for (out, &t) in self.samples.iter_mut().zip(tone.iter()) {
            out[0] = out[0].saturating_add(t);
            out[1] = out[1].saturating_add(t);
        }
        let produced = self.samples.len();
        if let Some(sink) = sink
            && produced > 0
        {
            sink.samples(&self.samples);
        }
        self.samples.clear();
        produced
    }

    pub fn channel_active(&self, ch: usize) -> bool {
        self.channel_on.get(ch).copied().unwrap_or(false)
    }

    pub fn rebase(&mut self, dec: u64) {
        self.last_update = self.last_update.wrapping_sub(dec);
        self.last_sample = self.last_sample.wrapping_sub(dec);
    }

    /// Restart cycle accounting at `cc` after an import.
    pub fn reset_reference(&mut self, cc: u64) {
        self.last_update = cc;
        self.last_sample = cc;
        self.samples.clear();
        for ch in 0..4 {
            self.channel_on[ch] = self.power && self.channel_on[ch] && self.dac_on(ch);
        }
    }

    pub fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.enter("apu");
        v.bytes("regs", &mut self.regs);
        v.bool("power", &mut self.power);
        let mut on = 0u8;
        for (ch, &c) in self.channel_on.iter().enumerate() {
            on |= (c as u8) << ch;
        }
        v.u8("channel_on", &mut on);
        for ch in 0..4 {
            self.channel_on[ch] = on & (1 << ch) != 0;
        }
        for (ch, len) in self.lengths.iter_mut().enumerate() {
            let name = ["len1", "len2", "len3", "len4"][ch];
            v.enter(name);
            v.u16("counter", &mut len.counter);
            v.bool("enabled", &mut len.enabled);
            v.exit();
        }
        v.u8("seq_step", &mut self.sequencer.step);
        v.bool("ds", &mut self.ds);
        v.u64("last_update", &mut self.last_update);
        v.u64("last_sample", &mut self.last_sample);
        v.exit();
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn powered() -> Apu {
        let mut apu = Apu::new_with_mode(false);
        apu.write_reg(0xFF26, 0x80, 0, 0);
        apu
    }

    #[test]
    fn nr52_reports_power_and_channels() {
        let mut apu = powered();
        assert_eq!(apu.read_reg(0xFF26, 0, 0), 0xF0);
        apu.write_reg(0xFF12, 0xF0, 0, 0);
        apu.write_reg(0xFF14, 0x80, 0, 0);
        assert_eq!(apu.read_reg(0xFF26, 0, 0), 0xF1);
        // DAC off silences the channel.
        apu.write_reg(0xFF12, 0x00, 0, 0);
        assert_eq!(apu.read_reg(0xFF26, 0, 0), 0xF0);
    }

    #[test]
    fn length_counter_expires_on_sequencer_edges() {
        let mut apu = powered();
        apu.write_reg(0xFF17, 0xF0, 0, 0);
        apu.write_reg(0xFF16, 0x3E, 0, 0); // length 2
        apu.write_reg(0xFF19, 0xC0, 0, 0);
        assert!(apu.channel_active(1));
        // Steps 0 and 2 clock length; each step is 0x2000 cycles apart.
        apu.update(0x2000 * 3 - 1, 0);
        assert!(apu.channel_active(1));
        apu.update(0x2000 * 3, 0);
        assert!(!apu.channel_active(1));
    }

    #[test]
    fn power_off_clears_registers_and_blocks_writes() {
        let mut apu = powered();
        apu.write_reg(0xFF24, 0x77, 0, 0);
        apu.write_reg(0xFF26, 0x00, 0, 0);
        assert_eq!(apu.read_reg(0xFF24, 0, 0), 0x00);
        apu.write_reg(0xFF24, 0x55, 0, 0);
        assert_eq!(apu.read_reg(0xFF24, 0, 0), 0x00);
        apu.write_reg(0xFF30, 0xAB, 0, 0);
        assert_eq!(apu.read_reg(0xFF30, 0, 0), 0xAB);
        assert_eq!(apu.read_reg(0xFF26, 0, 0), 0x70);
    }

    #[test]
    fn samples_follow_two_cycle_rate() {
        let mut apu = powered();
        let tone = [0x10i16, -0x10];
        apu.generate_samples(9);
        assert_eq!(apu.flush(9, &tone, None), 4);
        apu.speed_change(9, 0);
        apu.generate_samples(9 + 16);
        assert_eq!(apu.flush(9 + 16, &[], None), 4);
    }
}
