use super::time::Time;
use crate::savestate::StateVisitor;
use crate::sinks::HostTime;

pub const RTC_S: usize = 0;
pub const RTC_M: usize = 1;
pub const RTC_H: usize = 2;
pub const RTC_DL: usize = 3;
pub const RTC_DH: usize = 4;

const DH_DAY_BIT8: u8 = 0x01;
const DH_HALT: u8 = 0x40;
const DH_CARRY: u8 = 0x80;

/// Full MBC3 clock register set, live and latched, as stored in sidecar files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtcRegisters {
    pub dh: u8,
    pub dl: u8,
    pub h: u8,
    pub m: u8,
    pub s: u8,
    pub c: u32,
    pub latch_dh: u8,
    pub latch_dl: u8,
    pub latch_h: u8,
    pub latch_m: u8,
    pub latch_s: u8,
}

/// MBC3 real-time clock.
///
/// Seconds, minutes and hours are held signed so that out-of-range values
/// written by software (a seconds value of 60-63, say) tick through the
/// same way the chip does. Only the latched copy is visible on the bus.
#[derive(Debug, Clone)]
pub struct Mbc3Rtc {
    index: u8,
    enabled: bool,
    dh: u8,
    dl: u8,
    h: i8,
    m: i8,
    s: i8,
    c: u64,
    latched: [u8; 5],
}

impl Mbc3Rtc {
    pub fn new() -> Self {
        Self {
            index: 5,
            enabled: false,
            dh: 0,
            dl: 0,
            h: 0,
            m: 0,
            s: 0,
            c: 0,
            latched: [0; 5],
        }
    }

    fn days(&self) -> u64 {
        (((self.dh & DH_DAY_BIT8) as u64) << 8) | self.dl as u64
    }

    fn store_days(&mut self, days: u64) {
        self.dl = days as u8;
        self.dh = (self.dh & !DH_DAY_BIT8) | ((days >> 8) as u8 & DH_DAY_BIT8);
        if days >> 9 != 0 {
            self.dh |= DH_CARRY;
        }
    }

    /// Cascade `diff` divisor units into the counters unless halted.
    fn advance(&mut self, mut diff: u64, divisor: u64) {
        if self.dh & DH_HALT != 0 {
            return;
        }

        self.c += diff % divisor;
        if self.c >= divisor {
            self.s += 1;
            self.c -= divisor;
        }
        diff /= divisor;

        self.s += (diff % 60) as i8;
        if self.s >= 60 {
            self.m += 1;
            self.s -= 60;
        }
        diff /= 60;

        self.m += (diff % 60) as i8;
        if self.m >= 60 {
            self.h += 1;
            self.m -= 60;
        }
        diff /= 60;

        self.h += (diff % 24) as i8;
        let mut days = self.days();
        if self.h >= 24 {
            days += 1;
            self.h -= 24;
        }
        days += diff / 24;
        self.store_days(days);
    }

    /// Bring the live counters up to `cc`. Time elapsed while halted is
    /// consumed and dropped.
    pub fn update(&mut self, time: &mut Time, cc: u64) {
        let divisor = time.divisor();
        let diff = time.diff(cc);
        self.advance(diff, divisor);
    }

    /// Copy the live counters into the bus-visible latch.
    pub fn latch(&mut self, time: &mut Time, cc: u64) {
        self.update(time, cc);
        self.latched[RTC_DH] = self.dh;
        self.latched[RTC_DL] = self.dl;
        self.latched[RTC_H] = unsigned(self.h, 0x20);
        self.latched[RTC_M] = unsigned(self.m, 0x40);
        self.latched[RTC_S] = unsigned(self.s, 0x40);
    }

    /// Map a RAM bank number (8-0xC select registers) onto the clock.
    pub fn set_bank(&mut self, enabled: bool, bank: u8) {
        self.enabled = enabled;
        self.index = (bank & 0x0F).wrapping_sub(8);
    }

    pub fn is_active(&self) -> bool {
        self.enabled && self.index <= 4
    }

    pub fn selected(&self) -> Option<usize> {
        self.is_active().then_some(self.index as usize)
    }

    /// Latched value of the selected register.
    pub fn read(&self) -> u8 {
        match self.selected() {
            Some(reg) => self.latched[reg],
            None => 0xFF,
        }
    }

    pub fn read_register(&self, reg: usize) -> u8 {
        self.latched.get(reg).copied().unwrap_or(0xFF)
    }

    /// Write the selected register.
    pub fn write(&mut self, value: u8, time: &mut Time, cc: u64) {
        if let Some(reg) = self.selected() {
            self.write_register(reg, value, time, cc);
        }
    }

    pub fn write_register(&mut self, reg: usize, value: u8, time: &mut Time, cc: u64) {
        self.update(time, cc);
        match reg {
            RTC_S => {
                self.s = signed(value & 0x3F, 60, 0x40);
                self.c = 0;
            }
            RTC_M => self.m = signed(value & 0x3F, 60, 0x40),
            RTC_H => self.h = signed(value & 0x1F, 24, 0x20),
            RTC_DL => self.dl = value,
            RTC_DH => self.dh = value & 0xC1,
            _ => {}
        }
    }

    /// Set the live clock from a count of half-cycles.
    pub fn set_time(&mut self, dividers: u64, divisor: u64) {
        let cycles = dividers * 2;
        self.c = cycles % divisor;
        let secs = cycles / divisor;
        self.s = (secs % 60) as i8;
        self.m = (secs / 60 % 60) as i8;
        self.h = (secs / 3600 % 24) as i8;
        let days = secs / 86400;
        self.dh &= !(DH_DAY_BIT8 | DH_HALT | DH_CARRY);
        self.store_days(days & 0x3FF);
    }

    /// Current live clock value in half-cycles since zero.
    pub fn time_now(&self, divisor: u64) -> u64 {
        let secs = self.days() * 86400
            + unsigned(self.h, 0x20) as u64 % 32 * 3600
            + unsigned(self.m, 0x40) as u64 % 64 * 60
            + unsigned(self.s, 0x40) as u64 % 64;
        (secs * divisor + self.c) >> 1
    }

    /// Advance the clock by the wall time elapsed since `base`.
    pub fn set_base_time(&mut self, base: HostTime, now: HostTime, divisor: u64) {
        let elapsed_us = now.as_micros().saturating_sub(base.as_micros());
        let diff = (elapsed_us * divisor as u128 / 1_000_000) as u64;
        self.advance(diff, divisor);
    }

    pub fn registers(&mut self, time: &mut Time, cc: u64) -> RtcRegisters {
        self.update(time, cc);
        RtcRegisters {
            dh: self.dh & 0xC1,
            dl: self.dl,
            h: unsigned(self.h, 0x20) & 0x1F,
            m: unsigned(self.m, 0x40) & 0x3F,
            s: unsigned(self.s, 0x40) & 0x3F,
            c: self.c as u32,
            latch_dh: self.latched[RTC_DH] & 0xC1,
            latch_dl: self.latched[RTC_DL],
            latch_h: self.latched[RTC_H] & 0x1F,
            latch_m: self.latched[RTC_M] & 0x3F,
            latch_s: self.latched[RTC_S] & 0x3F,
        }
    }

    pub fn set_registers(&mut self, regs: &RtcRegisters) {
        self.dh = regs.dh & 0xC1;
        self.dl = regs.dl;
        self.h = signed(regs.h & 0x1F, 24, 0x20);
        self.m = signed(regs.m & 0x3F, 60, 0x40);
        self.s = signed(regs.s & 0x3F, 60, 0x40);
        self.c = regs.c as u64;
        self.latched = [
            regs.latch_s,
            regs.latch_m,
            regs.latch_h,
            regs.latch_dl,
            regs.latch_dh,
        ];
    }

    pub fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.enter("rtc");
        v.u8("index", &mut self.index);
        v.bool("enabled", &mut self.enabled);
        v.u8("dh", &mut self.dh);
        v.u8("dl", &mut self.dl);
        let mut h = self.h as u8;
        let mut m = self.m as u8;
        let mut s = self.s as u8;
        v.u8("h", &mut h);
        v.u8("m", &mut m);
        v.u8("s", &mut s);
        self.h = h as i8;
        self.m = m as i8;
        self.s = s as i8;
        v.u64("c", &mut self.c);
        v.bytes("latched", &mut self.latched);
        v.exit();
    }
}

impl Default for Mbc3Rtc {
    fn default() -> Self {
        Self::new()
    }
}

fn signed(value: u8, limit: u8, wrap: u8) -> i8 {
    if value >= limit {
        value as i8 - wrap as i8
    } else {
        value as i8
    }
}

fn unsigned(value: i8, wrap: u8) -> u8 {
    if value < 0 {
        (value + wrap as i8) as u8
    } else {
        value as u8
    }
}
