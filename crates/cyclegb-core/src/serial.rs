use crate::savestate::StateVisitor;
use crate::scheduler::{DISABLED_TIME, EventSlot, INT_SERIAL, InterruptRequester, Scheduler};

/// Link cable endpoint. Called once per completed byte with the byte shifted
/// out; returns the byte shifted in from the other side.
pub trait LinkPort: Send {
    fn transfer(&mut self, byte: u8) -> u8;
}

/// Unconnected cable. The data line floats high unless loopback is set.
#[derive(Default)]
pub struct NullLinkPort {
    loopback: bool,
}

impl NullLinkPort {
    pub fn new(loopback: bool) -> Self {
        Self { loopback }
    }
}

impl LinkPort for NullLinkPort {
    fn transfer(&mut self, byte: u8) -> u8 {
        if self.loopback { byte } else { 0xFF }
    }
}

/// Serial bit period in cycles: 8192 Hz normally, 262144 Hz with the CGB
/// fast clock.
const fn bit_period(fast: bool) -> u64 {
    if fast { 0x10 } else { 0x200 }
}

/// SB/SC registers. Transfers clocked by this unit complete through the
/// `Serial` scheduler slot; the partner's byte is fetched from the link port
/// the first time a bit of it becomes visible.
pub struct Serial {
    pub sb: u8,
    pub sc: u8,
    /// Bits still to shift in the current transfer.
    cnt: u8,
    outgoing: u8,
    incoming: Option<u8>,
    cgb: bool,
    out_buf: Vec<u8>,
    port: Box<dyn LinkPort + Send>,
}

impl Serial {
    pub fn new(cgb: bool) -> Self {
        Self {
            sb: 0,
            sc: if cgb { 0x7F } else { 0x7E },
            cnt: 8,
            outgoing: 0,
            incoming: None,
            cgb,
            out_buf: Vec::new(),
            port: Box::new(NullLinkPort::default()),
        }
    }

    pub fn connect(&mut self, port: Box<dyn LinkPort + Send>) {
        self.port = port;
    }

    /// Detach the current cable, leaving an unconnected port behind.
    pub fn disconnect(&mut self) -> Box<dyn LinkPort + Send> {
        std::mem::replace(&mut self.port, Box::new(NullLinkPort::default()))
    }

    #[inline(always)]
    fn fast(&self) -> bool {
        self.cgb && self.sc & 0x02 != 0
    }

    fn incoming(&mut self) -> u8 {
        match self.incoming {
            Some(b) => b,
            None => {
                let b = self.port.transfer(self.outgoing);
                self.incoming = Some(b);
                b
            }
        }
    }

    /// Bring SB up to `cc`, finishing the transfer if its deadline passed.
    fn update(&mut self, cc: u64, irq: &mut InterruptRequester, sched: &mut Scheduler) {
        let time = sched.event_time(EventSlot::Serial);
        if time == DISABLED_TIME {
            return;
        }
        if time <= cc {
            self.sb = self.incoming();
            self.out_buf.push(self.outgoing);
            self.incoming = None;
            self.cnt = 0;
            self.sc &= 0x7F;
            irq.flag_irq(INT_SERIAL, time, sched);
            sched.disable(EventSlot::Serial);
        } else {
            let period = bit_period(self.fast());
            let target = (time - cc).div_ceil(period).min(8) as u8;
            if target < self.cnt {
                let shifted = 8 - target as u32;
                let incoming = self.incoming();
                self.sb = ((self.outgoing as u16) << shifted | (incoming as u16) >> (8 - shifted)) as u8;
                self.cnt = target;
            }
        }
    }

    pub fn read(&mut self, addr: u16, cc: u64, irq: &mut InterruptRequester, sched: &mut Scheduler) -> u8 {
        self.update(cc, irq, sched);
        match addr {
            0xFF01 => self.sb,
            _ => self.sc,
        }
    }

    pub fn write_sb(&mut self, data: u8, cc: u64, irq: &mut InterruptRequester, sched: &mut Scheduler) {
        self.update(cc, irq, sched);
        self.sb = data;
    }

    /// SC write. An internally clocked start aligns the first bit to the
    /// divider phase.
    pub fn write_sc(
        &mut self,
        data: u8,
        cc: u64,
        div_last_update: u64,
        irq: &mut InterruptRequester,
        sched: &mut Scheduler,
    ) {
        self.update(cc, irq, sched);
        self.cnt = 8;
        self.sc = data | if self.cgb { 0x7C } else { 0x7E };
        if data & 0x81 == 0x81 {
            let period = bit_period(self.fast());
            let align = if self.fast() { 8 } else { 0x100 };
            let start = cc.saturating_sub(cc.wrapping_sub(div_last_update) % align);
            self.outgoing = self.sb;
            self.incoming = None;
            sched.set_event_time(EventSlot::Serial, start + period * 8);
        } else {
            sched.disable(EventSlot::Serial);
        }
    }

    /// `Serial` slot handler.
    pub fn event(&mut self, irq: &mut InterruptRequester, sched: &mut Scheduler) {
        let time = sched.event_time(EventSlot::Serial);
        self.update(time, irq, sched);
    }

    /// DIV reset moves the bit clock phase.
    pub fn div_reset(&mut self, cc: u64, sched: &mut Scheduler) {
        let t = sched.event_time(EventSlot::Serial);
        if t == DISABLED_TIME || t <= cc {
            return;
        }
        let d = cc.wrapping_sub(t);
        let n = if self.fast() {
            t.wrapping_add(d % 8).wrapping_sub(2 * (d & 4))
        } else {
            t.wrapping_add(d % 0x100).wrapping_sub(2 * (d & 0x80))
        };
        sched.set_event_time(EventSlot::Serial, n.max(cc));
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out_buf)
    }

    pub fn peek_output(&self) -> &[u8] {
        &self.out_buf
    }

    pub fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.enter("serial");
        v.u8("sb", &mut self.sb);
        v.u8("sc", &mut self.sc);
        v.u8("cnt", &mut self.cnt);
        v.u8("outgoing", &mut self.outgoing);
        let mut latched = self.incoming.is_some();
        let mut byte = self.incoming.unwrap_or(0xFF);
        v.bool("incoming_latched", &mut latched);
        v.u8("incoming", &mut byte);
        self.incoming = latched.then_some(byte);
        v.exit();
    }
}

impl std::fmt::Debug for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Serial")
            .field("sb", &self.sb)
            .field("sc", &self.sc)
            .field("cnt", &self.cnt)
            .finish_non_exhaustive()
    }
}
