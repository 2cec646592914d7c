//! Deadline registry shared by every timed subsystem.
//!
//! Each subsystem owns one slot holding the absolute cycle at which it next
//! needs attention. The CPU runs instructions until the cycle counter reaches
//! the smallest deadline and then dispatches that slot.

use crate::savestate::StateVisitor;

/// Marks a slot that never fires.
pub const DISABLED_TIME: u64 = u64::MAX;

pub const INT_VBLANK: u8 = 0x01;
pub const INT_STAT: u8 = 0x02;
pub const INT_TIMER: u8 = 0x04;
pub const INT_SERIAL: u8 = 0x08;
pub const INT_JOYPAD: u8 = 0x10;

/// Event slots in dispatch priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSlot {
    Unhalt,
    End,
    Blit,
    Serial,
    Oam,
    Dma,
    Tima,
    Video,
    Interrupts,
}

impl EventSlot {
    pub const ALL: [EventSlot; 9] = [
        EventSlot::Unhalt,
        EventSlot::End,
        EventSlot::Blit,
        EventSlot::Serial,
        EventSlot::Oam,
        EventSlot::Dma,
        EventSlot::Tima,
        EventSlot::Video,
        EventSlot::Interrupts,
    ];

    fn name(self) -> &'static str {
        match self {
            EventSlot::Unhalt => "unhalt",
            EventSlot::End => "end",
            EventSlot::Blit => "blit",
            EventSlot::Serial => "serial",
            EventSlot::Oam => "oam",
            EventSlot::Dma => "dma",
            EventSlot::Tima => "tima",
            EventSlot::Video => "video",
            EventSlot::Interrupts => "interrupts",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    times: [u64; 9],
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            times: [DISABLED_TIME; 9],
        }
    }

    #[inline(always)]
    pub fn set_event_time(&mut self, slot: EventSlot, cycle: u64) {
        self.times[slot as usize] = cycle;
    }

    #[inline(always)]
    pub fn event_time(&self, slot: EventSlot) -> u64 {
        self.times[slot as usize]
    }

    #[inline(always)]
    pub fn disable(&mut self, slot: EventSlot) {
        self.times[slot as usize] = DISABLED_TIME;
    }

    pub fn is_enabled(&self, slot: EventSlot) -> bool {
        self.times[slot as usize] != DISABLED_TIME
    }

    /// Earliest pending deadline, or `DISABLED_TIME` when nothing is scheduled.
    #[inline(always)]
    pub fn min_event_time(&self) -> u64 {
        self.times.iter().copied().min().unwrap_or(DISABLED_TIME)
    }

    /// Slot owning the earliest deadline. Ties go to the higher-priority slot.
    pub fn min_event(&self) -> EventSlot {
        let mut best = EventSlot::Unhalt;
        let mut best_time = self.times[0];
        for slot in EventSlot::ALL.iter().copied().skip(1) {
            let t = self.times[slot as usize];
            if t < best_time {
                best = slot;
                best_time = t;
            }
        }
        best
    }

    /// Shift every live deadline down by `dec` cycles.
    pub fn rebase(&mut self, dec: u64) {
        for t in self.times.iter_mut() {
            if *t != DISABLED_TIME {
                *t = t.saturating_sub(dec);
            }
        }
    }

    pub fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.enter("sched");
        for slot in EventSlot::ALL {
            v.u64(slot.name(), &mut self.times[slot as usize]);
        }
        v.exit();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// IF/IE/IME bookkeeping. Owns the `Interrupts` slot of the scheduler.
#[derive(Debug, Clone)]
pub struct InterruptRequester {
    ifreg: u8,
    iereg: u8,
    ime: bool,
    halted: bool,
    min_int_time: u64,
}

impl InterruptRequester {
    pub fn new() -> Self {
        Self {
            ifreg: 0,
            iereg: 0,
            ime: false,
            halted: false,
            min_int_time: 0,
        }
    }

    #[inline(always)]
    pub fn ifreg(&self) -> u8 {
        self.ifreg
    }

    #[inline(always)]
    pub fn iereg(&self) -> u8 {
        self.iereg
    }

    #[inline(always)]
    pub fn ime(&self) -> bool {
        self.ime
    }

    #[inline(always)]
    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn min_int_time(&self) -> u64 {
        self.min_int_time
    }

    /// Interrupts that are both requested and enabled.
    #[inline(always)]
    pub fn pending(&self) -> u8 {
        self.ifreg & self.iereg & 0x1F
    }

    fn reschedule(&self, sched: &mut Scheduler, cc: u64) {
        if (self.ime || self.halted) && self.pending() != 0 {
            sched.set_event_time(EventSlot::Interrupts, self.min_int_time.max(cc));
        } else {
            sched.disable(EventSlot::Interrupts);
        }
    }

    /// Raise the interrupt bits in `bits` as of cycle `cc`.
    pub fn flag_irq(&mut self, bits: u8, cc: u64, sched: &mut Scheduler) {
        self.ifreg |= bits;
        if (self.ime || self.halted) && self.pending() != 0 {
            let at = self.min_int_time.max(cc);
            if at < sched.event_time(EventSlot::Interrupts) {
                sched.set_event_time(EventSlot::Interrupts, at);
            }
        }
    }

    pub fn set_if(&mut self, value: u8, cc: u64, sched: &mut Scheduler) {
        self.ifreg = value;
        self.reschedule(sched, cc);
    }

    pub fn set_ie(&mut self, value: u8, cc: u64, sched: &mut Scheduler) {
        self.iereg = value;
        self.reschedule(sched, cc);
    }

    /// IME takes effect one instruction later.
    pub fn ei(&mut self, cc: u64, sched: &mut Scheduler) {
        self.ime = true;
        self.min_int_time = cc + 1;
        if self.pending() != 0 {
            sched.set_event_time(EventSlot::Interrupts, self.min_int_time);
        }
    }

    /// RETI re-enables without the one-instruction delay.
    pub fn reti_enable(&mut self, cc: u64, sched: &mut Scheduler) {
        self.ime = true;
        self.min_int_time = self.min_int_time.min(cc);
        self.reschedule(sched, cc);
    }

    pub fn di(&mut self, sched: &mut Scheduler) {
        self.ime = false;
        if !self.halted {
            sched.disable(EventSlot::Interrupts);
        }
    }

    pub fn halt(&mut self, cc: u64, sched: &mut Scheduler) {
        self.halted = true;
        if self.pending() != 0 {
            sched.set_event_time(EventSlot::Interrupts, self.min_int_time.max(cc));
        }
    }

    pub fn unhalt(&mut self, sched: &mut Scheduler) {
        self.halted = false;
        if !self.ime {
            sched.disable(EventSlot::Interrupts);
        }
    }

    pub fn ack_irq(&mut self, bit: u8, sched: &mut Scheduler) {
        self.ifreg &= !bit;
        if self.pending() == 0 || !(self.ime || self.halted) {
            sched.disable(EventSlot::Interrupts);
        }
    }

    pub fn set_min_int_time(&mut self, cc: u64, sched: &mut Scheduler) {
        self.min_int_time = cc;
        if sched.event_time(EventSlot::Interrupts) < cc {
            sched.set_event_time(EventSlot::Interrupts, cc);
        }
    }

    /// Overwrite the whole register file, as an imported state dictates.
    pub fn restore(
        &mut self,
        ifreg: u8,
        iereg: u8,
        ime: bool,
        halted: bool,
        cc: u64,
        sched: &mut Scheduler,
    ) {
        self.ifreg = ifreg;
        self.iereg = iereg;
        self.ime = ime;
        self.halted = halted;
        self.min_int_time = cc;
        self.reschedule(sched, cc);
    }

    pub fn rebase(&mut self, dec: u64) {
        self.min_int_time = self.min_int_time.saturating_sub(dec);
    }

    pub fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.enter("irq");
        v.u8("if", &mut self.ifreg);
        v.u8("ie", &mut self.iereg);
        v.bool("ime", &mut self.ime);
        v.bool("halted", &mut self.halted);
        v.u64("min_int_time", &mut self.min_int_time);
        v.exit();
    }
}

impl Default for InterruptRequester {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_slots_never_win() {
        let mut s = Scheduler::new();
        assert_eq!(s.min_event_time(), DISABLED_TIME);
        s.set_event_time(EventSlot::Video, 500);
        s.set_event_time(EventSlot::Tima, 900);
        assert_eq!(s.min_event(), EventSlot::Video);
        assert_eq!(s.min_event_time(), 500);
    }

    #[test]
    fn ties_resolve_in_priority_order() {
        let mut s = Scheduler::new();
        s.set_event_time(EventSlot::Interrupts, 100);
        s.set_event_time(EventSlot::Tima, 100);
        s.set_event_time(EventSlot::Serial, 100);
        assert_eq!(s.min_event(), EventSlot::Serial);
        s.disable(EventSlot::Serial);
        assert_eq!(s.min_event(), EventSlot::Tima);
    }

    #[test]
    fn rebase_skips_disabled_slots() {
        let mut s = Scheduler::new();
        s.set_event_time(EventSlot::Blit, 0x9000_0000);
        s.rebase(0x8000_0000);
        assert_eq!(s.event_time(EventSlot::Blit), 0x1000_0000);
        assert_eq!(s.event_time(EventSlot::End), DISABLED_TIME);
    }

    #[test]
    fn ei_delays_dispatch_by_one_cycle() {
        let mut s = Scheduler::new();
        let mut irq = InterruptRequester::new();
        irq.set_ie(INT_TIMER, 0, &mut s);
        irq.flag_irq(INT_TIMER, 40, &mut s);
        assert_eq!(s.event_time(EventSlot::Interrupts), DISABLED_TIME);
        irq.ei(64, &mut s);
        assert_eq!(s.event_time(EventSlot::Interrupts), 65);
        irq.di(&mut s);
        assert_eq!(s.event_time(EventSlot::Interrupts), DISABLED_TIME);
    }

    #[test]
    fn halt_schedules_wakeup_without_ime() {
        let mut s = Scheduler::new();
        let mut irq = InterruptRequester::new();
        irq.set_ie(INT_VBLANK, 0, &mut s);
        irq.halt(100, &mut s);
        assert_eq!(s.event_time(EventSlot::Interrupts), DISABLED_TIME);
        irq.flag_irq(INT_VBLANK, 220, &mut s);
        assert_eq!(s.event_time(EventSlot::Interrupts), 220);
        irq.unhalt(&mut s);
        assert_eq!(s.event_time(EventSlot::Interrupts), DISABLED_TIME);
    }
}
