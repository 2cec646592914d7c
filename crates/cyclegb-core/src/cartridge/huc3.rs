use super::infrared::sony_signal;
use super::time::Time;
use crate::savestate::StateVisitor;
use crate::sinks::HostTime;

const MINUTES_PER_DAY: u64 = 1440;
/// 1.5 s of tone at one sample per two cycles.
const TONE_LENGTH: i32 = 2_097_152 * 3 / 2;
const TONE_HIGH_PERIOD: u64 = 2097;
const TONE_LOW_PERIOD: u64 = 2796;
const TONE_BUF_LIMIT: usize = 0x20000;

/// HuC3 clock/IR/speaker controller.
///
/// Software talks to it through the SRAM window while the mapper's ram
/// flag selects one of the command modes (0xB write, 0xC read, 0xD commit,
/// 0xE infrared). The chip itself is a file of 256 nibbles. Minutes live at
/// 0x10-0x12 and days at 0x13-0x15.
#[derive(Debug, Clone)]
pub struct Huc3Chip {
    io: [u8; 0x100],
    io_index: u8,
    transfer: u8,
    ramflag: u8,
    ir_base_cycle: u64,
    rtc_cycles: u64,
    current_sample: i32,
    tone_last_update: u64,
    next_phase_change: u64,
    remaining_tone: i32,
    committing: bool,
    high_io_read_only: bool,
    ir_receiving: bool,
    ds: bool,
    tone_buf: Vec<i16>,
}

impl Huc3Chip {
    pub fn new() -> Self {
        Self {
            io: [0; 0x100],
            io_index: 0,
            transfer: 0,
            ramflag: 0,
            ir_base_cycle: 0,
            rtc_cycles: 0,
            current_sample: 0,
            tone_last_update: 0,
            next_phase_change: 0,
            remaining_tone: 0,
            committing: false,
            high_io_read_only: true,
            ir_receiving: false,
            ds: false,
            tone_buf: Vec::new(),
        }
    }

    pub fn set_ramflag(&mut self, flag: u8) {
        self.ramflag = flag;
        self.committing = flag == 0xD;
        self.ir_receiving = false;
    }

    fn minutes(&self) -> u64 {
        (self.io[0x10] & 0xF) as u64
            | ((self.io[0x11] & 0xF) as u64) << 4
            | ((self.io[0x12] & 0xF) as u64) << 8
    }

    fn days(&self) -> u64 {
        (self.io[0x13] & 0xF) as u64
            | ((self.io[0x14] & 0xF) as u64) << 4
            | ((self.io[0x15] & 0xF) as u64) << 8
    }

    fn store_clock(&mut self, minutes: u64, days: u64) {
        self.io[0x10] = (minutes & 0xF) as u8;
        self.io[0x11] = (minutes >> 4 & 0xF) as u8;
        self.io[0x12] = (minutes >> 8 & 0xF) as u8;
        self.io[0x13] = (days & 0xF) as u8;
        self.io[0x14] = (days >> 4 & 0xF) as u8;
        self.io[0x15] = (days >> 8 & 0xF) as u8;
    }

    fn advance(&mut self, mut diff: u64, minute: u64) {
        let mut minutes = self.minutes();
        let mut days = self.days();
        self.rtc_cycles += diff % minute;
        if self.rtc_cycles >= minute {
            minutes += 1;
            self.rtc_cycles -= minute;
        }
        diff /= minute;
        minutes += diff % MINUTES_PER_DAY;
        if minutes >= MINUTES_PER_DAY {
            days += 1;
            minutes -= MINUTES_PER_DAY;
        }
        days += diff / MINUTES_PER_DAY;
        self.store_clock(minutes, days);
    }

    /// The clock runs only while io[0x16] bit 0 is set.
    pub fn update(&mut self, time: &mut Time, cc: u64) {
        let minute = time.divisor() * 60;
        let diff = time.diff(cc);
        if self.io[0x16] & 1 != 0 {
            self.advance(diff, minute);
        }
    }

    /// Clock value in half-cycles since zero.
    pub fn time_now(&self, divisor: u64) -> u64 {
        ((self.days() * 86400 + self.minutes() * 60) * divisor + self.rtc_cycles) >> 1
    }

    /// Replace the clock with the wall time elapsed since `base`.
    pub fn set_base_time(&mut self, base: HostTime, now: HostTime, divisor: u64) {
        let elapsed_us = now.as_micros().saturating_sub(base.as_micros());
        let diff = (elapsed_us * divisor as u128 / 1_000_000) as u64;
        self.rtc_cycles = 0;
        self.store_clock(0, 0);
        self.advance(diff, divisor * 60);
    }

    /// The base timestamp that reproduces the current clock at `now`.
    pub fn base_time(&mut self, time: &mut Time, cc: u64) -> HostTime {
        self.update(time, cc);
        let divisor = time.divisor() as u128;
        let clock_us = (self.time_now(time.divisor()) as u128 * 2) * 1_000_000 / divisor;
        HostTime::from_micros(time.now().as_micros().saturating_sub(clock_us))
    }

    pub fn read(&mut self, cc: u64) -> u8 {
        match self.ramflag {
            0xB | 0xC => 0x80 | self.transfer,
            0xD => 0xFE | self.committing as u8,
            0xE => {
                if !self.ir_receiving {
                    self.ir_receiving = true;
                    self.ir_base_cycle = cc;
                }
                sony_signal(cc.saturating_sub(self.ir_base_cycle), 0xFFFFF) as u8
            }
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, data: u8, time: &mut Time, cc: u64) {
        match self.ramflag {
            0xB => self.transfer = 0x80 | data,
            0xD if self.committing && data & 1 == 0 => {
                self.commit(time, cc);
                self.committing = false;
            }
            _ => {}
        }
    }

    fn commit(&mut self, time: &mut Time, cc: u64) {
        match self.transfer & 0x70 {
            0x10 => {
                self.update(time, cc);
                self.accumulate_samples(cc);
                self.transfer = (self.io[self.io_index as usize] & 0xF) | (self.transfer & 0xF0);
                self.io_index = self.io_index.wrapping_add(1);
            }
            0x30 => {
                self.update(time, cc);
                self.accumulate_samples(cc);
                if self.io_index < 0x20 || !self.high_io_read_only {
                    self.io[self.io_index as usize] = self.transfer & 0xF;
                }
                self.io_index = self.io_index.wrapping_add(1);
            }
            0x40 => self.io_index = (self.transfer & 0xF) | (self.io_index & 0xF0),
            0x50 => self.io_index = ((self.transfer & 0xF) << 4) | (self.io_index & 0xF),
            0x60 => {
                match self.transfer & 0xF {
                    0x0 => {
                        self.update(time, cc);
                        self.io.copy_within(0x10..0x17, 0x00);
                        self.high_io_read_only = false;
                    }
                    0x1 => {
                        self.update(time, cc);
                        self.io.copy_within(0x00..0x07, 0x10);
                        self.high_io_read_only = false;
                    }
                    0x2 => self.high_io_read_only = true,
                    0xE => {
                        self.accumulate_samples(cc);
                        if self.io[0x27] & 0xF == 1 {
                            if self.remaining_tone >= 0 {
                                self.remaining_tone = -1;
                            } else {
                                self.remaining_tone = TONE_LENGTH;
                                self.next_phase_change = TONE_HIGH_PERIOD;
                                self.current_sample = 0x6000;
                            }
                        }
                        self.high_io_read_only = false;
                    }
                    _ => self.high_io_read_only = false,
                }
                self.transfer = 0x80 | 0x61;
            }
            _ => {}
        }
    }

    /// Render tone samples up to `cc` into the internal buffer.
    pub fn accumulate_samples(&mut self, cc: u64) {
        let mut samples = cc.saturating_sub(self.tone_last_update) >> (1 + self.ds as u32);
        self.tone_last_update = cc;
        let room = TONE_BUF_LIMIT.saturating_sub(self.tone_buf.len()) as u64;
        samples = samples.min(room);

        let gain = ((self.io[0x72] & 0x8) >> 2) as i32;
        while self.remaining_tone > 0 && samples > 0 {
            let mut chunk = samples.min(self.next_phase_change);
            self.remaining_tone -= chunk as i32;
            if self.remaining_tone < 0 {
                chunk = (chunk as i64 + self.remaining_tone as i64) as u64;
                self.remaining_tone = 0;
            }
            let value = (self.current_sample * gain).clamp(i16::MIN as i32, i16::MAX as i32);
            self.tone_buf
                .extend(std::iter::repeat_n(value as i16, chunk as usize));
            samples -= chunk;
            self.next_phase_change -= chunk;
            if self.next_phase_change == 0 {
                self.next_phase_change = if self.remaining_tone > 2_097_152 {
                    TONE_HIGH_PERIOD
                } else {
                    TONE_LOW_PERIOD
                };
                if TONE_LENGTH - self.remaining_tone == 501 * TONE_HIGH_PERIOD as i32 {
                    self.current_sample = -0x6000;
                }
                let decay = if self.remaining_tone > 2_097_152 { 0.997 } else { 0.995 };
                self.current_sample = -((self.current_sample as f64 * decay) as i32);
            }
            if chunk == 0 {
                break;
            }
        }
        self.tone_buf.extend(std::iter::repeat_n(0, samples as usize));
    }

    /// Drain rendered tone samples.
    pub fn take_samples(&mut self) -> Vec<i16> {
        std::mem::take(&mut self.tone_buf)
    }

    pub fn speed_change(&mut self, cc: u64) {
        self.accumulate_samples(cc);
        self.ds = !self.ds;
    }

    pub fn set_double_speed(&mut self, ds: bool) {
        self.ds = ds;
    }

    pub fn rebase(&mut self, cc: u64, dec: u64) {
        self.accumulate_samples(cc);
        self.tone_last_update = self.tone_last_update.saturating_sub(dec);
        self.ir_base_cycle = self.ir_base_cycle.saturating_sub(dec);
    }

    /// Restart sample accounting at `cc`, dropping anything pending.
    pub fn reset_tone_clock(&mut self, cc: u64) {
        self.tone_last_update = cc;
        self.tone_buf.clear();
    }

    /// Set the clock from minute and day counters.
    pub fn set_clock(&mut self, minutes: u16, days: u16) {
        self.store_clock(minutes as u64, days as u64);
        self.rtc_cycles = 0;
    }

    pub fn io(&self) -> &[u8; 0x100] {
        &self.io
    }

    pub fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.enter("huc3");
        v.bytes("io", &mut self.io);
        v.u8("io_index", &mut self.io_index);
        v.u8("transfer", &mut self.transfer);
        v.u8("ramflag", &mut self.ramflag);
        v.u64("ir_base_cycle", &mut self.ir_base_cycle);
        v.u64("rtc_cycles", &mut self.rtc_cycles);
        v.i32("current_sample", &mut self.current_sample);
        v.u64("tone_last_update", &mut self.tone_last_update);
        v.u64("next_phase_change", &mut self.next_phase_change);
        v.i32("remaining_tone", &mut self.remaining_tone);
        v.bool("committing", &mut self.committing);
        v.bool("high_io_read_only", &mut self.high_io_read_only);
        v.bool("ir_receiving", &mut self.ir_receiving);
        v.bool("ds", &mut self.ds);
        v.exit();
    }
}

impl Default for Huc3Chip {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::time::RTC_BASE_DIVISOR;

    fn command(chip: &mut Huc3Chip, time: &mut Time, value: u8, cc: u64) {
        chip.set_ramflag(0xB);
        chip.write(value, time, cc);
        chip.set_ramflag(0xD);
        chip.write(0xFE, time, cc);
    }

    fn write_nibble(chip: &mut Huc3Chip, time: &mut Time, index: u8, value: u8) {
        command(chip, time, 0x40 | (index & 0xF), 0);
        command(chip, time, 0x50 | (index >> 4), 0);
        command(chip, time, 0x30 | value, 0);
    }

    #[test]
    fn commit_reads_back_written_nibble() {
        let mut time = Time::new();
        let mut chip = Huc3Chip::new();
        write_nibble(&mut chip, &mut time, 0x05, 0x9);
        command(&mut chip, &mut time, 0x40 | 0x5, 0);
        command(&mut chip, &mut time, 0x50, 0);
        command(&mut chip, &mut time, 0x10, 0);
        chip.set_ramflag(0xC);
        assert_eq!(chip.read(0) & 0x0F, 0x9);
    }

    #[test]
    fn clock_runs_only_when_enabled() {
        let mut time = Time::new();
        let mut chip = Huc3Chip::new();
        let minute = RTC_BASE_DIVISOR * 60;
        chip.update(&mut time, 5 * minute);
        assert_eq!(chip.minutes(), 0);
        chip.io[0x16] = 1;
        chip.update(&mut time, 7 * minute);
        assert_eq!(chip.minutes(), 2);
        chip.update(&mut time, 7 * minute + MINUTES_PER_DAY * minute);
        assert_eq!(chip.days(), 1);
        assert_eq!(chip.minutes(), 2);
    }

    #[test]
    fn latch_command_copies_clock_to_low_io() {
        let mut time = Time::new();
        let mut chip = Huc3Chip::new();
        chip.set_clock(0x123, 0x045);
        command(&mut chip, &mut time, 0x60, 0);
        assert_eq!(&chip.io[0..6], &[0x3, 0x2, 0x1, 0x5, 0x4, 0x0]);
        assert_eq!(chip.transfer, 0xE1);
    }

    #[test]
    fn commit_status_reads_one_until_committed() {
        let mut time = Time::new();
        let mut chip = Huc3Chip::new();
        chip.set_ramflag(0xD);
        assert_eq!(chip.read(0), 0xFF);
        chip.write(0xFE, &mut time, 0);
        assert_eq!(chip.read(0), 0xFE);
    }

    #[test]
    fn tone_renders_when_enabled_and_amplified() {
        let mut time = Time::new();
        let mut chip = Huc3Chip::new();
        chip.io[0x27] = 1;
        chip.io[0x72] = 0x8;
        // The first toggle from power-on state switches the tone off.
        command(&mut chip, &mut time, 0x6E, 0);
        command(&mut chip, &mut time, 0x6E, 0);
        chip.accumulate_samples(200);
        let samples = chip.take_samples();
        assert_eq!(samples.len(), 100);
        assert!(samples.iter().all(|&s| s == (0x6000 * 2).min(i16::MAX as i32) as i16));
    }
}
