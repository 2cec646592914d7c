use crate::config::TimeMode;
use crate::savestate::StateVisitor;
use crate::sinks::{HostClock, HostTime, SystemClock};

/// Cycles per emulated second at divisor offset zero.
pub const RTC_BASE_DIVISOR: u64 = 0x40_0000;

/// Elapsed-time source shared by the cartridge clock chips.
///
/// In cycle mode time advances with the cycle counter (halved in double
/// speed). In wall mode it advances with the host clock, scaled by the
/// divisor so both modes produce cycle units.
pub struct Time {
    last_cycles: u64,
    last_secs: u64,
    use_cycles: bool,
    divisor: u64,
    ds: bool,
    clock: Box<dyn HostClock>,
}

impl Time {
    pub fn new() -> Self {
        Self::with_clock(Box::new(SystemClock))
    }

    pub fn with_clock(clock: Box<dyn HostClock>) -> Self {
        let last_secs = clock.now().secs;
        Self {
            last_cycles: 0,
            last_secs,
            use_cycles: true,
            divisor: RTC_BASE_DIVISOR,
            ds: false,
            clock,
        }
    }

    pub fn set_clock(&mut self, clock: Box<dyn HostClock>) {
        self.last_secs = clock.now().secs;
        self.clock = clock;
    }

    /// Hand the clock over to a replacement, leaving the system clock behind.
    pub fn take_clock(&mut self) -> Box<dyn HostClock> {
        std::mem::replace(&mut self.clock, Box::new(SystemClock))
    }

    pub fn now(&self) -> HostTime {
        self.clock.now()
    }

    pub fn divisor(&self) -> u64 {
        self.divisor
    }

    pub fn set_divisor_offset(&mut self, offset: i32) {
        self.divisor = (RTC_BASE_DIVISOR as i64 + offset as i64).max(1) as u64;
    }

    pub fn mode(&self) -> TimeMode {
        if self.use_cycles {
            TimeMode::Cycle
        } else {
            TimeMode::Wall
        }
    }

    pub fn double_speed(&self) -> bool {
        self.ds
    }

    /// Elapsed divisor units since the previous call.
    pub fn diff(&mut self, cc: u64) -> u64 {
        if self.use_cycles {
            let diff = cc.saturating_sub(self.last_cycles) >> self.ds as u32;
            self.last_cycles = cc;
            diff
        } else {
            let now = self.clock.now().secs;
            let diff = now.saturating_sub(self.last_secs) * self.divisor;
            self.last_secs = now;
            diff
        }
    }

    /// Callers bring their chip up to date before switching.
    pub fn set_mode(&mut self, mode: TimeMode, cc: u64) {
        self.use_cycles = mode == TimeMode::Cycle;
        self.last_cycles = cc;
        self.last_secs = self.clock.now().secs;
    }

    pub fn speed_change(&mut self) {
        self.ds = !self.ds;
    }

    pub fn set_double_speed(&mut self, ds: bool) {
        self.ds = ds;
    }

    /// Restart elapsed-time accounting at `cc`.
    pub fn reset_reference(&mut self, cc: u64) {
        self.last_cycles = cc;
        self.last_secs = self.clock.now().secs;
    }

    pub fn rebase(&mut self, dec: u64) {
        self.last_cycles = self.last_cycles.saturating_sub(dec);
    }

    pub fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.enter("time");
        v.u64("last_cycles", &mut self.last_cycles);
        v.bool("use_cycles", &mut self.use_cycles);
        v.bool("ds", &mut self.ds);
        v.exit();
    }
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Time")
            .field("last_cycles", &self.last_cycles)
            .field("use_cycles", &self.use_cycles)
            .field("divisor", &self.divisor)
            .field("ds", &self.ds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::FixedClock;

    #[test]
    fn cycle_mode_halves_in_double_speed() {
        let mut t = Time::new();
        assert_eq!(t.diff(1000), 1000);
        t.speed_change();
        assert_eq!(t.diff(3000), 1000);
    }

    #[test]
    fn wall_mode_scales_seconds_by_divisor() {
        let clock = FixedClock::new(HostTime::new(100, 0));
        let mut t = Time::with_clock(Box::new(clock.clone()));
        t.set_divisor_offset(-0x100);
        t.set_mode(TimeMode::Wall, 0);
        clock.advance_secs(3);
        assert_eq!(t.diff(12345), 3 * (RTC_BASE_DIVISOR - 0x100));
        assert_eq!(t.diff(99999), 0);
    }
}
