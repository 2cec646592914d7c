use crate::savestate::StateVisitor;
use crate::scheduler::{DISABLED_TIME, EventSlot, INT_TIMER, InterruptRequester, Scheduler};

/// log2 of the TIMA period in cycles for each TAC clock select.
const TIMA_SHIFTS: [u32; 4] = [10, 4, 6, 8];

/// TIMA/TMA/TAC, evaluated lazily.
///
/// TIMA is only brought up to date when it is observed or its inputs change.
/// The `Tima` scheduler slot holds the cycle at which the next overflow
/// interrupt is raised.
#[derive(Debug, Clone)]
pub struct Timer {
    pub tima: u8,
    pub tma: u8,
    pub tac: u8,
    /// Cycle of the last counted tick, aligned to the divider.
    last_update: u64,
    /// Start of the four-cycle window in which an overflowed TIMA reloads.
    tma_time: u64,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            tima: 0,
            tma: 0,
            tac: 0,
            last_update: 0,
            tma_time: DISABLED_TIME,
        }
    }

    #[inline(always)]
    fn enabled(&self) -> bool {
        self.tac & 0x04 != 0
    }

    #[inline(always)]
    fn shift(&self) -> u32 {
        TIMA_SHIFTS[(self.tac & 3) as usize]
    }

    fn next_overflow(&self, tima: u8) -> u64 {
        self.last_update + ((256 - tima as u64) << self.shift()) + 3
    }

    /// Count the ticks elapsed up to `cc`.
    pub fn update(&mut self, cc: u64) {
        if !self.enabled() || cc < self.last_update {
            return;
        }
        let shift = self.shift();
        let ticks = (cc - self.last_update) >> shift;
        self.last_update += ticks << shift;

        if cc >= self.tma_time {
            if cc >= self.tma_time + 4 {
                self.tma_time = DISABLED_TIME;
            }
            self.tima = self.tma;
        }

        let mut tmp = self.tima as u64 + ticks;
        while tmp > 0x100 {
            tmp -= 0x100 - self.tma as u64;
        }
        if tmp == 0x100 {
            tmp = 0;
            self.tma_time = self.last_update + 3;
            if cc >= self.tma_time {
                if cc >= self.tma_time + 4 {
                    self.tma_time = DISABLED_TIME;
                }
                tmp = self.tma as u64;
            }
        }
        self.tima = tmp as u8;
    }

    pub fn read_tima(&mut self, cc: u64) -> u8 {
        self.update(cc);
        self.tima
    }

    pub fn set_tima(&mut self, data: u8, cc: u64, sched: &mut Scheduler) {
        if self.enabled() {
            self.update(cc);
            // A write inside the reload window cancels the reload.
            if self.tma_time.wrapping_sub(cc) < 4 {
                self.tma_time = DISABLED_TIME;
            }
            sched.set_event_time(EventSlot::Tima, self.next_overflow(data));
        }
        self.tima = data;
    }

    pub fn set_tma(&mut self, data: u8, cc: u64, sched: &mut Scheduler) {
        if self.enabled() {
            self.update(cc);
            if self.tma_time.wrapping_sub(cc) < 4 {
                self.tima = data;
            }
            sched.set_event_time(EventSlot::Tima, self.next_overflow(self.tima));
        }
        self.tma = data;
    }

    /// The timer input is the selected divider bit ANDed with the enable bit.
    /// Dropping it from high to low counts one extra tick.
    fn input_high(tac: u8, cc: u64, div_last_update: u64) -> bool {
        let bit = TIMA_SHIFTS[(tac & 3) as usize] - 1;
        tac & 0x04 != 0 && (cc.wrapping_sub(div_last_update) >> bit) & 1 != 0
    }

    fn glitch_tick(&mut self, cc: u64, sched: &mut Scheduler) {
        if self.tima == 0xFF {
            self.tima = 0;
            self.tma_time = cc + 3;
            sched.set_event_time(EventSlot::Tima, cc + 3);
        } else {
            self.tima += 1;
        }
    }

    pub fn set_tac(&mut self, data: u8, cc: u64, div_last_update: u64, sched: &mut Scheduler) {
        let data = data & 0x07;
        if data == self.tac {
            return;
        }
        let was_high = Self::input_high(self.tac, cc, div_last_update);
        let now_high = Self::input_high(data, cc, div_last_update);
        if self.enabled() {
            self.update(cc);
            sched.disable(EventSlot::Tima);
        }
        self.tac = data;
        if was_high && !now_high {
            self.glitch_tick(cc, sched);
        }
        if self.enabled() {
            let period = 1u64 << self.shift();
            self.last_update = cc - (cc.wrapping_sub(div_last_update) & (period - 1));
            if self.tma_time == DISABLED_TIME {
                sched.set_event_time(EventSlot::Tima, self.next_overflow(self.tima));
            }
        }
    }

    /// DIV write. The divider restarts at `cc`.
    pub fn div_reset(&mut self, cc: u64, div_last_update: u64, sched: &mut Scheduler) {
        if !self.enabled() {
            return;
        }
        let high = Self::input_high(self.tac, cc, div_last_update);
        self.update(cc);
        if high {
            self.glitch_tick(cc, sched);
        }
        self.last_update = cc;
        if self.tma_time == DISABLED_TIME || self.tma_time < cc {
            sched.set_event_time(EventSlot::Tima, self.next_overflow(self.tima));
        }
    }

    /// `Tima` slot handler: raise the interrupt and schedule the next one.
    pub fn event(&mut self, irq: &mut InterruptRequester, sched: &mut Scheduler) {
        let time = sched.event_time(EventSlot::Tima);
        irq.flag_irq(INT_TIMER, time, sched);
        if self.enabled() {
            sched.set_event_time(EventSlot::Tima, time + ((256 - self.tma as u64) << self.shift()));
        } else {
            sched.disable(EventSlot::Tima);
        }
    }

    pub fn rebase(&mut self, dec: u64) {
        self.last_update = self.last_update.saturating_sub(dec);
        if self.tma_time != DISABLED_TIME {
            self.tma_time = self.tma_time.saturating_sub(dec);
        }
    }

    /// Restart tick accounting at `cc` without touching the registers.
    pub fn reset_reference(&mut self, cc: u64, sched: &mut Scheduler) {
        self.last_update = cc;
        self.tma_time = DISABLED_TIME;
        if self.enabled() {
            sched.set_event_time(EventSlot::Tima, self.next_overflow(self.tima));
        } else {
            sched.disable(EventSlot::Tima);
        }
    }

    pub fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.enter("timer");
        v.u8("tima", &mut self.tima);
        v.u8("tma", &mut self.tma);
        v.u8("tac", &mut self.tac);
        v.u64("last_update", &mut self.last_update);
        v.u64("tma_time", &mut self.tma_time);
        v.exit();
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_lazily_at_selected_rate() {
        let mut sched = Scheduler::new();
        let mut t = Timer::new();
        t.set_tac(0x05, 0, 0, &mut sched);
        assert_eq!(t.read_tima(15), 0);
        assert_eq!(t.read_tima(16), 1);
        assert_eq!(t.read_tima(16 * 10 + 3), 10);
        assert_eq!(sched.event_time(EventSlot::Tima), (256 << 4) + 3);
    }

    #[test]
    fn overflow_reloads_tma_after_delay() {
        let mut sched = Scheduler::new();
        let mut t = Timer::new();
        t.set_tma(0x80, 0, &mut sched);
        t.set_tac(0x05, 0, 0, &mut sched);
        t.set_tima(0xFF, 0, &mut sched);
        assert_eq!(t.read_tima(16), 0x00);
        assert_eq!(t.read_tima(19), 0x80);
        assert_eq!(t.read_tima(16 + 16 * 0x80 + 3), 0x80);
    }

    #[test]
    fn event_flags_interrupt_and_reschedules() {
        let mut sched = Scheduler::new();
        let mut irq = InterruptRequester::new();
        let mut t = Timer::new();
        t.set_tma(0xF0, 0, &mut sched);
        t.set_tac(0x05, 0, 0, &mut sched);
        t.set_tima(0xF0, 0, &mut sched);
        let first = sched.event_time(EventSlot::Tima);
        assert_eq!(first, (16 << 4) + 3);
        t.event(&mut irq, &mut sched);
        assert_eq!(irq.ifreg() & INT_TIMER, INT_TIMER);
        assert_eq!(sched.event_time(EventSlot::Tima), first + (16 << 4));
    }

    #[test]
    fn disabling_while_input_high_ticks_once() {
        let mut sched = Scheduler::new();
        let mut t = Timer::new();
        t.set_tac(0x05, 0, 0, &mut sched);
        // Bit 3 of the divider is high at cycle 8.
        t.set_tac(0x01, 8, 0, &mut sched);
        assert_eq!(t.tima, 1);
        assert!(!sched.is_enabled(EventSlot::Tima));
    }
}
