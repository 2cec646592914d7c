use crate::savestate::StateVisitor;
use crate::scheduler::DISABLED_TIME;

/// Cycles per half period of the 40 kHz carrier at 4.194304 MHz.
const CARRIER_HALF_PERIOD: u64 = 105;

/// Level of a Sony-protocol IR burst `cycles` after it started.
///
/// 10 ms of silence, a 2.4 ms start mark and a 0.6 ms space, then 20 bits
/// MSB first: 1.2 ms mark for a one, 0.6 ms for a zero, each followed by a
/// 0.6 ms space.
pub fn sony_signal(cycles: u64, data: u32) -> bool {
    let modulation = (cycles / CARRIER_HALF_PERIOD) & 1 != 0;
    // cycles * 1_000_000 / 4_194_304, approximated.
    let mut time_us = cycles * 36 / 151;

    if time_us < 10_000 {
        return false;
    }
    if time_us < 12_400 {
        return modulation;
    }
    if time_us < 13_000 {
        return false;
    }

    time_us -= 13_000;
    let mut mask = 1u32 << 19;
    while mask != 0 {
        let mark = if data & mask != 0 { 1200 } else { 600 };
        if time_us < mark {
            return modulation;
        }
        time_us -= mark;
        if time_us < 600 {
            return false;
        }
        time_us -= 600;
        mask >>= 1;
    }
    false
}

/// A TV-style remote pointed at the cartridge or CGB IR port.
#[derive(Debug, Clone)]
pub struct Remote {
    active: bool,
    last_update: u64,
    elapsed: u64,
    command: u8,
    next_command: u8,
    ds: bool,
}

impl Remote {
    pub fn new() -> Self {
        Self {
            active: false,
            last_update: 0,
            elapsed: 0,
            command: 0,
            next_command: 0x7F,
            ds: false,
        }
    }

    /// Command sent the next time the remote is activated.
    pub fn set_command(&mut self, command: u8) {
        self.next_command = command & 0x7F;
    }

    pub fn set_active(&mut self, active: bool) {
        if self.active != active {
            self.active = active;
            if active {
                self.last_update = DISABLED_TIME;
                self.command = self.next_command;
            }
        }
    }

    fn update(&mut self, cc: u64) {
        self.elapsed += cc.saturating_sub(self.last_update) >> self.ds as u32;
        self.last_update = cc;
    }

    pub fn signal(&mut self, cc: u64) -> bool {
        if self.last_update == DISABLED_TIME {
            self.elapsed = 0;
            self.last_update = cc;
        }
        self.update(cc);
        sony_signal(self.elapsed, ((self.command as u32) << 13) | 0x1FFF)
    }

    pub fn speed_change(&mut self, cc: u64) {
        if self.last_update != DISABLED_TIME {
            self.update(cc);
        }
        self.ds = !self.ds;
    }

    pub fn set_double_speed(&mut self, ds: bool) {
        self.ds = ds;
    }

    pub fn rebase(&mut self, dec: u64) {
        if self.last_update != DISABLED_TIME {
            self.last_update = self.last_update.saturating_sub(dec);
        }
    }

    pub fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.enter("remote");
        v.bool("active", &mut self.active);
        v.u64("last_update", &mut self.last_update);
        v.u64("elapsed", &mut self.elapsed);
        v.u8("command", &mut self.command);
        v.bool("ds", &mut self.ds);
        v.exit();
    }
}

impl Default for Remote {
    fn default() -> Self {
        Self::new()
    }
}

/// Which party drives an IR line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrSource {
    ThisGb,
    LinkedGb,
    Remote,
}

/// IR transceiver state shared by HuC1, HuC3 and the CGB RP register.
#[derive(Debug, Clone)]
pub struct Infrared {
    trigger: bool,
    this_gb: bool,
    linked_gb: bool,
    pub remote: Remote,
}

impl Infrared {
    pub fn new() -> Self {
        Self {
            trigger: true,
            this_gb: false,
            linked_gb: false,
            remote: Remote::new(),
        }
    }

    pub fn signal(&mut self, which: IrSource, cc: u64) -> bool {
        match which {
            IrSource::ThisGb => self.this_gb,
            IrSource::LinkedGb => self.linked_gb,
            IrSource::Remote => self.remote.signal(cc),
        }
    }

    pub fn set_signal(&mut self, which: IrSource, signal: bool) {
        match which {
            IrSource::ThisGb => {
                self.trigger |= self.this_gb != signal;
                self.this_gb = signal;
            }
            IrSource::LinkedGb => {
                self.trigger |= self.linked_gb != signal;
                self.linked_gb = signal;
            }
            IrSource::Remote => {}
        }
    }

    /// True when a local line changed since the last acknowledge.
    pub fn trigger(&self) -> bool {
        self.trigger
    }

    pub fn ack_trigger(&mut self) {
        self.trigger = false;
    }

    pub fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.enter("ir");
        self.remote.sync_state(v);
        v.bool("trigger", &mut self.trigger);
        v.bool("this_gb", &mut self.this_gb);
        v.bool("linked_gb", &mut self.linked_gb);
        v.exit();
    }
}

impl Default for Infrared {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycles_for_us(us: u64) -> u64 {
        us * 151 / 36 + 1
    }

    #[test]
    fn burst_starts_with_silence_then_start_mark() {
        assert!(!sony_signal(0, 0xFFFFF));
        assert!(!sony_signal(cycles_for_us(9_000), 0xFFFFF));
        let in_mark = cycles_for_us(11_000);
        let odd = (in_mark / CARRIER_HALF_PERIOD | 1) * CARRIER_HALF_PERIOD;
        assert!(sony_signal(odd, 0xFFFFF));
        assert!(!sony_signal(cycles_for_us(12_700), 0xFFFFF));
    }

    #[test]
    fn line_changes_raise_trigger() {
        let mut ir = Infrared::new();
        ir.ack_trigger();
        ir.set_signal(IrSource::ThisGb, false);
        assert!(!ir.trigger());
        ir.set_signal(IrSource::ThisGb, true);
        assert!(ir.trigger());
        assert!(ir.signal(IrSource::ThisGb, 0));
    }

    #[test]
    fn remote_restarts_burst_on_activation() {
        let mut remote = Remote::new();
        remote.set_active(true);
        assert!(!remote.signal(1000));
        assert!(!remote.signal(cycles_for_us(5_000) + 1000));
        remote.set_active(false);
        remote.set_active(true);
        assert!(!remote.signal(10_000_000));
        assert_eq!(remote.elapsed, 0);
    }
}
