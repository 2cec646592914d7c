use crate::savestate::StateVisitor;
use crate::scheduler::{INT_JOYPAD, InterruptRequester, Scheduler};
use crate::sinks::{Buttons, InputSource};

/// P1/JOYP register. The button matrix is sampled from the host input
/// source whenever the register is observed.
pub struct Joypad {
    /// Select lines (bits 4-5). A cleared bit selects the group.
    select: u8,
    /// Input lines as last seen by software.
    lines: u8,
    buttons: Buttons,
    source: Option<Box<dyn InputSource>>,
}

impl Joypad {
    pub fn new() -> Self {
        Self {
            select: 0x30,
            lines: 0x0F,
            buttons: Buttons::none(),
            source: None,
        }
    }

    pub fn set_source(&mut self, source: Option<Box<dyn InputSource>>) {
        self.source = source;
    }

    pub fn take_source(&mut self) -> Option<Box<dyn InputSource>> {
        self.source.take()
    }

    /// Sample the host buttons.
    pub fn poll(&mut self) -> Buttons {
        if let Some(src) = self.source.as_mut() {
            self.buttons = src.poll();
        }
        self.buttons
    }

    pub fn any_pressed(&self) -> bool {
        self.buttons.0 != 0
    }

    fn input_lines(&self) -> u8 {
        let mut lines = 0x0F;
        if self.select & 0x10 == 0 {
            lines &= !(self.buttons.0 >> 4) & 0x0F;
        }
        if self.select & 0x20 == 0 {
            lines &= !self.buttons.0 & 0x0F;
        }
        lines
    }

    /// A line falling from high to low requests the joypad interrupt.
    fn refresh(&mut self, cc: u64, irq: &mut InterruptRequester, sched: &mut Scheduler) {
        let lines = self.input_lines();
        if self.lines & !lines != 0 {
            irq.flag_irq(INT_JOYPAD, cc, sched);
        }
        self.lines = lines;
    }

    pub fn read(&mut self, cc: u64, irq: &mut InterruptRequester, sched: &mut Scheduler) -> u8 {
        self.poll();
        self.refresh(cc, irq, sched);
        0xC0 | self.select | self.lines
    }

    pub fn write(&mut self, val: u8, cc: u64, irq: &mut InterruptRequester, sched: &mut Scheduler) {
        self.select = val & 0x30;
        self.poll();
        self.refresh(cc, irq, sched);
    }

    pub fn restore(&mut self, val: u8) {
        self.select = val & 0x30;
        self.lines = self.input_lines();
    }

    pub fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.enter("joypad");
        v.u8("select", &mut self.select);
        v.u8("lines", &mut self.lines);
        v.u8("buttons", &mut self.buttons.0);
        v.exit();
    }
}

impl Default for Joypad {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Joypad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Joypad")
            .field("select", &self.select)
            .field("lines", &self.lines)
            .field("buttons", &self.buttons)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::HeldButtons;

    #[test]
    fn selected_group_reads_active_low() {
        let held = HeldButtons::new();
        let mut pad = Joypad::new();
        pad.set_source(Some(Box::new(held.clone())));
        let mut irq = InterruptRequester::new();
        let mut sched = Scheduler::new();

        held.set(Buttons(Buttons::A | Buttons::DOWN));
        pad.write(0x20, 0, &mut irq, &mut sched); // directions
        assert_eq!(pad.read(0, &mut irq, &mut sched), 0xE7);
        pad.write(0x10, 0, &mut irq, &mut sched); // buttons
        assert_eq!(pad.read(0, &mut irq, &mut sched), 0xDE);
    }

    #[test]
    fn press_raises_joypad_interrupt() {
        let held = HeldButtons::new();
        let mut pad = Joypad::new();
        pad.set_source(Some(Box::new(held.clone())));
        let mut irq = InterruptRequester::new();
        let mut sched = Scheduler::new();
        pad.write(0x10, 0, &mut irq, &mut sched);
        assert_eq!(irq.ifreg() & INT_JOYPAD, 0);
        held.set(Buttons(Buttons::START));
        pad.read(4, &mut irq, &mut sched);
        assert_eq!(irq.ifreg() & INT_JOYPAD, INT_JOYPAD);
    }
}
