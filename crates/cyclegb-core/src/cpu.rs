use crate::hardware::{CpuRegs, Model, post_boot_regs};
use crate::mmu::Mmu;
use crate::savestate::StateVisitor;
use crate::scheduler::EventSlot;

// CPU flag bits as documented in gbdev.io/pandocs/The_CPU_Flags.html
const FLAG_Z: u8 = 0x80; // Zero
const FLAG_N: u8 = 0x40; // Subtract
const FLAG_H: u8 = 0x20; // Half Carry
const FLAG_C: u8 = 0x10; // Carry

// Interrupt vectors (gbdev.io/pandocs/Interrupts.html)
const INTERRUPT_VECTOR_BASE: u16 = 0x40;

/// Cycles per machine cycle. The counter advances this much at either speed.
const M_CYCLE: u64 = 4;
/// Cycle counter value past which stored stamps are rebased.
const REBASE_THRESHOLD: u64 = 0x8000_0000;
/// Internal cycles spent before an interrupt pushes the return address.
const INTERRUPT_ENTRY_CYCLES: u64 = 12;

pub struct Cpu {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub pc: u16,
    pub sp: u16,
    /// Cycle counter. The only clock in the machine.
    pub cc: u64,
    /// Set by HALT with IME clear and an interrupt pending: the next opcode
    /// fetch leaves PC where it is.
    halt_bug: bool,
}

impl Cpu {
    /// Post-boot register state for `model`, as the boot ROM leaves it.
    pub fn new(model: Model) -> Self {
        let mut cpu = Self::power_on();
        cpu.set_regs(post_boot_regs(model));
        cpu
    }

    /// Neutral register file with PC at 0, for executing a boot ROM.
    pub fn power_on() -> Self {
        Self {
            a: 0,
            f: 0,
            b: 0,
            c: 0,
            d: 0,
            e: 0,
            h: 0,
            l: 0,
            pc: 0x0000,
            sp: 0x0000,
            cc: 0,
            halt_bug: false,
        }
    }

    pub fn regs(&self) -> CpuRegs {
        CpuRegs {
            a: self.a,
            f: self.f,
            b: self.b,
            c: self.c,
            d: self.d,
            e: self.e,
            h: self.h,
            l: self.l,
            pc: self.pc,
            sp: self.sp,
        }
    }

    pub fn set_regs(&mut self, regs: CpuRegs) {
        self.a = regs.a;
        self.f = regs.f & 0xF0;
        self.b = regs.b;
        self.c = regs.c;
        self.d = regs.d;
        self.e = regs.e;
        self.h = regs.h;
        self.l = regs.l;
        self.pc = regs.pc;
        self.sp = regs.sp;
    }

    fn get_bc(&self) -> u16 {
        ((self.b as u16) << 8) | self.c as u16
    }

    fn set_bc(&mut self, val: u16) {
        self.b = (val >> 8) as u8;
        self.c = val as u8;
    }

    fn get_de(&self) -> u16 {
        ((self.d as u16) << 8) | self.e as u16
    }

    fn set_de(&mut self, val: u16) {
        self.d = (val >> 8) as u8;
        self.e = val as u8;
    }

    pub fn get_hl(&self) -> u16 {
        ((self.h as u16) << 8) | self.l as u16
    }

    fn set_hl(&mut self, val: u16) {
        self.h = (val >> 8) as u8;
        self.l = val as u8;
    }

    /// Register pair by opcode index: BC, DE, HL, SP.
    fn get_rr(&self, index: u8) -> u16 {
        match index & 3 {
            0 => self.get_bc(),
            1 => self.get_de(),
            2 => self.get_hl(),
            _ => self.sp,
        }
    }

    fn set_rr(&mut self, index: u8, val: u16) {
        match index & 3 {
            0 => self.set_bc(val),
            1 => self.set_de(val),
            2 => self.set_hl(val),
            _ => self.sp = val,
        }
    }

    /// Stack pair by opcode index: BC, DE, HL, AF.
    fn get_stack_rr(&self, index: u8) -> u16 {
        match index & 3 {
            3 => ((self.a as u16) << 8) | (self.f & 0xF0) as u16,
            i => self.get_rr(i),
        }
    }

    fn set_stack_rr(&mut self, index: u8, val: u16) {
        match index & 3 {
            3 => {
                self.a = (val >> 8) as u8;
                self.f = val as u8 & 0xF0;
            }
            i => self.set_rr(i, val),
        }
    }

    /// Branch condition by opcode index: NZ, Z, NC, C.
    fn condition(&self, index: u8) -> bool {
        match index & 3 {
            0 => self.f & FLAG_Z == 0,
            1 => self.f & FLAG_Z != 0,
            2 => self.f & FLAG_C == 0,
            _ => self.f & FLAG_C != 0,
        }
    }

    #[inline(always)]
    fn tick(&mut self) {
        self.cc += M_CYCLE;
    }

    #[inline(always)]
    fn fetch8(&mut self, mmu: &mut Mmu) -> u8 {
        let val = mmu.read(self.pc, self.cc);
        self.pc = self.pc.wrapping_add(1);
        self.tick();
        val
    }

    #[inline(always)]
    fn fetch16(&mut self, mmu: &mut Mmu) -> u16 {
        let lo = self.fetch8(mmu) as u16;
        let hi = self.fetch8(mmu) as u16;
        (hi << 8) | lo
    }

    #[inline(always)]
    fn fetch_opcode(&mut self, mmu: &mut Mmu) -> u8 {
        let op = mmu.read(self.pc, self.cc);
        if self.halt_bug {
            self.halt_bug = false;
        } else {
            self.pc = self.pc.wrapping_add(1);
        }
        self.tick();
        op
    }

    #[inline(always)]
    fn read8(&mut self, mmu: &mut Mmu, addr: u16) -> u8 {
        let val = mmu.read(addr, self.cc);
        self.tick();
        val
    }

    #[inline(always)]
    fn write8(&mut self, mmu: &mut Mmu, addr: u16, val: u8) {
        mmu.write(addr, val, self.cc);
        self.tick();
    }

    /// Formatted CPU state string for debugging.
    pub fn debug_state(&self) -> String {
        format!(
            "AF:{:04X} BC:{:04X} DE:{:04X} HL:{:04X} PC:{:04X} SP:{:04X} CC:{}",
            ((self.a as u16) << 8) | self.f as u16,
            self.get_bc(),
            self.get_de(),
            self.get_hl(),
            self.pc,
            self.sp,
            self.cc
        )
    }

    fn push_stack(&mut self, mmu: &mut Mmu, val: u16) {
        self.sp = self.sp.wrapping_sub(1);
        self.write8(mmu, self.sp, (val >> 8) as u8);
        self.sp = self.sp.wrapping_sub(1);
        self.write8(mmu, self.sp, val as u8);
    }

    fn pop_stack(&mut self, mmu: &mut Mmu) -> u16 {
        let lo = self.read8(mmu, self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        let hi = self.read8(mmu, self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        (hi << 8) | lo
    }

    fn read_reg(&mut self, mmu: &mut Mmu, index: u8) -> u8 {
        match index & 7 {
            0 => self.b,
            1 => self.c,
            2 => self.d,
            3 => self.e,
            4 => self.h,
            5 => self.l,
            6 => self.read8(mmu, self.get_hl()),
            _ => self.a,
        }
    }

    fn write_reg(&mut self, mmu: &mut Mmu, index: u8, val: u8) {
        match index & 7 {
            0 => self.b = val,
            1 => self.c = val,
            2 => self.d = val,
            3 => self.e = val,
            4 => self.h = val,
            5 => self.l = val,
            6 => {
                let addr = self.get_hl();
                self.write8(mmu, addr, val);
            }
            _ => self.a = val,
        }
    }

    fn inc8(&mut self, val: u8) -> u8 {
        let res = val.wrapping_add(1);
        self.f = (self.f & FLAG_C)
            | if res == 0 { FLAG_Z } else { 0 }
            | if val & 0x0F == 0x0F { FLAG_H } else { 0 };
        res
    }

    fn dec8(&mut self, val: u8) -> u8 {
        let res = val.wrapping_sub(1);
        self.f = (self.f & FLAG_C)
            | FLAG_N
            | if res == 0 { FLAG_Z } else { 0 }
            | if val & 0x0F == 0 { FLAG_H } else { 0 };
        res
    }

    fn add_hl(&mut self, val: u16) {
        let hl = self.get_hl();
        self.f = (self.f & FLAG_Z)
            | if (hl & 0x0FFF) + (val & 0x0FFF) > 0x0FFF {
                FLAG_H
            } else {
                0
            }
            | if hl as u32 + val as u32 > 0xFFFF {
                FLAG_C
            } else {
                0
            };
        self.set_hl(hl.wrapping_add(val));
    }

    /// SP plus a signed immediate. Flags come from the unsigned low byte add.
    fn sp_offset(&mut self, offset: u8) -> u16 {
        let sp = self.sp;
        let val = offset as i8 as i16 as u16;
        self.f = if (sp & 0x0F) + (val & 0x0F) > 0x0F {
            FLAG_H
        } else {
            0
        } | if (sp & 0xFF) + (val & 0xFF) > 0xFF {
            FLAG_C
        } else {
            0
        };
        sp.wrapping_add(val)
    }

    /// ADD ADC SUB SBC AND XOR OR CP, selected by opcode bits 3-5.
    fn alu(&mut self, op: u8, val: u8) {
        let a = self.a;
        let carry_in = if op & 1 != 0 && self.f & FLAG_C != 0 {
            1
        } else {
            0
        };
        match op & 7 {
            0 | 1 => {
                let res = a as u16 + val as u16 + carry_in as u16;
                self.a = res as u8;
                self.f = if self.a == 0 { FLAG_Z } else { 0 }
                    | if (a & 0x0F) + (val & 0x0F) + carry_in > 0x0F {
                        FLAG_H
                    } else {
                        0
                    }
                    | if res > 0xFF { FLAG_C } else { 0 };
            }
            2 | 3 | 7 => {
                let res = a.wrapping_sub(val).wrapping_sub(carry_in);
                self.f = FLAG_N
                    | if res == 0 { FLAG_Z } else { 0 }
                    | if (a & 0x0F) < (val & 0x0F) + carry_in {
                        FLAG_H
                    } else {
                        0
                    }
                    | if (a as u16) < val as u16 + carry_in as u16 {
                        FLAG_C
                    } else {
                        0
                    };
                if op & 7 != 7 {
                    self.a = res;
                }
            }
            4 => {
                self.a &= val;
                self.f = if self.a == 0 { FLAG_Z } else { 0 } | FLAG_H;
            }
            5 => {
                self.a ^= val;
                self.f = if self.a == 0 { FLAG_Z } else { 0 };
            }
            _ => {
                self.a |= val;
                self.f = if self.a == 0 { FLAG_Z } else { 0 };
            }
        }
    }

    /// RLC RRC RL RR SLA SRA SWAP SRL, selected by opcode bits 3-5.
    fn shift(&mut self, op: u8, val: u8) -> u8 {
        let carry_in = (self.f & FLAG_C != 0) as u8;
        let (res, carry) = match op & 7 {
            0 => (val.rotate_left(1), val & 0x80 != 0),
            1 => (val.rotate_right(1), val & 0x01 != 0),
            2 => ((val << 1) | carry_in, val & 0x80 != 0),
            3 => ((val >> 1) | (carry_in << 7), val & 0x01 != 0),
            4 => (val << 1, val & 0x80 != 0),
            5 => ((val >> 1) | (val & 0x80), val & 0x01 != 0),
            6 => (val.rotate_left(4), false),
            _ => (val >> 1, val & 0x01 != 0),
        };
        self.f = if res == 0 { FLAG_Z } else { 0 } | if carry { FLAG_C } else { 0 };
        res
    }

    fn handle_cb(&mut self, opcode: u8, mmu: &mut Mmu) {
        let r = opcode & 0x07;
        let bit = (opcode >> 3) & 0x07;
        match opcode {
            0x00..=0x3F => {
                let val = self.read_reg(mmu, r);
                let res = self.shift(bit, val);
                self.write_reg(mmu, r, res);
            }
            0x40..=0x7F => {
                // BIT (HL) only reads from memory.
                let val = self.read_reg(mmu, r);
                self.f =
                    (self.f & FLAG_C) | FLAG_H | if val & (1 << bit) == 0 { FLAG_Z } else { 0 };
            }
            0x80..=0xBF => {
                let val = self.read_reg(mmu, r);
                self.write_reg(mmu, r, val & !(1 << bit));
            }
            0xC0..=0xFF => {
                let val = self.read_reg(mmu, r);
                self.write_reg(mmu, r, val | (1 << bit));
            }
        }
    }

    fn daa(&mut self) {
        let mut correction = 0u8;
        let mut carry = false;
        if self.f & FLAG_H != 0 || (self.f & FLAG_N == 0 && (self.a & 0x0F) > 9) {
            correction |= 0x06;
        }
        if self.f & FLAG_C != 0 || (self.f & FLAG_N == 0 && self.a > 0x99) {
            correction |= 0x60;
            carry = true;
        }
        if self.f & FLAG_N == 0 {
            self.a = self.a.wrapping_add(correction);
        } else {
            self.a = self.a.wrapping_sub(correction);
        }
        self.f = if self.a == 0 { FLAG_Z } else { 0 }
            | (self.f & FLAG_N)
            | if carry { FLAG_C } else { 0 };
    }

    fn call(&mut self, mmu: &mut Mmu, target: u16) {
        self.tick();
        self.push_stack(mmu, self.pc);
        self.pc = target;
    }

    /// Execute one instruction.
    fn step(&mut self, mmu: &mut Mmu) {
        #[cfg(feature = "cpu-trace")]
        log::trace!("{}", self.debug_state());

        let opcode = self.fetch_opcode(mmu);
        match opcode {
            0x00 => {}
            0x01 | 0x11 | 0x21 | 0x31 => {
                let val = self.fetch16(mmu);
                self.set_rr(opcode >> 4, val);
            }
            0x02 => {
                let addr = self.get_bc();
                self.write8(mmu, addr, self.a);
            }
            0x12 => {
                let addr = self.get_de();
                self.write8(mmu, addr, self.a);
            }
            0x22 => {
                let addr = self.get_hl();
                self.write8(mmu, addr, self.a);
                self.set_hl(addr.wrapping_add(1));
            }
            0x32 => {
                let addr = self.get_hl();
                self.write8(mmu, addr, self.a);
                self.set_hl(addr.wrapping_sub(1));
            }
            0x03 | 0x13 | 0x23 | 0x33 => {
                let val = self.get_rr(opcode >> 4).wrapping_add(1);
                self.set_rr(opcode >> 4, val);
                self.tick();
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                let val = self.get_rr(opcode >> 4).wrapping_sub(1);
                self.set_rr(opcode >> 4, val);
                self.tick();
            }
            op @ 0x00..=0x3F if op & 0x07 == 0x04 => {
                let r = op >> 3;
                let val = self.read_reg(mmu, r);
                let res = self.inc8(val);
                self.write_reg(mmu, r, res);
            }
            op @ 0x00..=0x3F if op & 0x07 == 0x05 => {
                let r = op >> 3;
                let val = self.read_reg(mmu, r);
                let res = self.dec8(val);
                self.write_reg(mmu, r, res);
            }
            op @ 0x00..=0x3F if op & 0x07 == 0x06 => {
                let val = self.fetch8(mmu);
                self.write_reg(mmu, op >> 3, val);
            }
            0x07 | 0x0F | 0x17 | 0x1F => {
                self.a = self.shift(opcode >> 3, self.a);
                self.f &= FLAG_C;
            }
            0x08 => {
                let addr = self.fetch16(mmu);
                self.write8(mmu, addr, self.sp as u8);
                self.write8(mmu, addr.wrapping_add(1), (self.sp >> 8) as u8);
            }
            0x09 | 0x19 | 0x29 | 0x39 => {
                let val = self.get_rr(opcode >> 4);
                self.add_hl(val);
                self.tick();
            }
            0x0A => {
                let addr = self.get_bc();
                self.a = self.read8(mmu, addr);
            }
            0x1A => {
                let addr = self.get_de();
                self.a = self.read8(mmu, addr);
            }
            0x2A => {
                let addr = self.get_hl();
                self.a = self.read8(mmu, addr);
                self.set_hl(addr.wrapping_add(1));
            }
            0x3A => {
                let addr = self.get_hl();
                self.a = self.read8(mmu, addr);
                self.set_hl(addr.wrapping_sub(1));
            }
            0x10 => {
                // STOP skips its padding byte without a bus access.
                self.pc = self.pc.wrapping_add(1);
                mmu.stop(self.cc);
            }
            0x18 => {
                let offset = self.fetch8(mmu) as i8;
                self.pc = self.pc.wrapping_add(offset as u16);
                self.tick();
            }
            0x20 | 0x28 | 0x30 | 0x38 => {
                let offset = self.fetch8(mmu) as i8;
                if self.condition(opcode >> 3) {
                    self.pc = self.pc.wrapping_add(offset as u16);
                    self.tick();
                }
            }
            0x27 => self.daa(),
            0x2F => {
                self.a ^= 0xFF;
                self.f = (self.f & (FLAG_Z | FLAG_C)) | FLAG_N | FLAG_H;
            }
            0x37 => {
                self.f = (self.f & FLAG_Z) | FLAG_C;
            }
            0x3F => {
                self.f = (self.f & FLAG_Z) | if self.f & FLAG_C != 0 { 0 } else { FLAG_C };
            }
            0x76 => {
                if !mmu.irq.ime() && mmu.irq.pending() != 0 {
                    self.halt_bug = true;
                } else {
                    mmu.halt(self.cc);
                }
            }
            0x40..=0x7F => {
                let val = self.read_reg(mmu, opcode);
                self.write_reg(mmu, opcode >> 3, val);
            }
            0x80..=0xBF => {
                let val = self.read_reg(mmu, opcode);
                self.alu(opcode >> 3, val);
            }
            0xC0 | 0xC8 | 0xD0 | 0xD8 => {
                self.tick();
                if self.condition(opcode >> 3) {
                    self.pc = self.pop_stack(mmu);
                    self.tick();
                }
            }
            0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                let val = self.pop_stack(mmu);
                self.set_stack_rr(opcode >> 4, val);
            }
            0xC2 | 0xCA | 0xD2 | 0xDA => {
                let addr = self.fetch16(mmu);
                if self.condition(opcode >> 3) {
                    self.pc = addr;
                    self.tick();
                }
            }
            0xC3 => {
                self.pc = self.fetch16(mmu);
                self.tick();
            }
            0xC4 | 0xCC | 0xD4 | 0xDC => {
                let addr = self.fetch16(mmu);
                if self.condition(opcode >> 3) {
                    self.call(mmu, addr);
                }
            }
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                let val = self.get_stack_rr(opcode >> 4);
                self.tick();
                self.push_stack(mmu, val);
            }
            op if op & 0xC7 == 0xC6 => {
                let val = self.fetch8(mmu);
                self.alu(op >> 3, val);
            }
            op if op & 0xC7 == 0xC7 => self.call(mmu, (op & 0x38) as u16),
            0xC9 => {
                self.pc = self.pop_stack(mmu);
                self.tick();
            }
            0xD9 => {
                self.pc = self.pop_stack(mmu);
                self.tick();
                mmu.irq.reti_enable(self.cc, &mut mmu.sched);
            }
            0xCB => {
                let op = self.fetch8(mmu);
                self.handle_cb(op, mmu);
            }
            0xCD => {
                let addr = self.fetch16(mmu);
                self.call(mmu, addr);
            }
            0xE0 => {
                let addr = 0xFF00 | self.fetch8(mmu) as u16;
                self.write8(mmu, addr, self.a);
            }
            0xF0 => {
                let addr = 0xFF00 | self.fetch8(mmu) as u16;
                self.a = self.read8(mmu, addr);
            }
            0xE2 => {
                let addr = 0xFF00 | self.c as u16;
                self.write8(mmu, addr, self.a);
            }
            0xF2 => {
                let addr = 0xFF00 | self.c as u16;
                self.a = self.read8(mmu, addr);
            }
            0xEA => {
                let addr = self.fetch16(mmu);
                self.write8(mmu, addr, self.a);
            }
            0xFA => {
                let addr = self.fetch16(mmu);
                self.a = self.read8(mmu, addr);
            }
            0xE8 => {
                let offset = self.fetch8(mmu);
                self.sp = self.sp_offset(offset);
                self.tick();
                self.tick();
            }
            0xF8 => {
                let offset = self.fetch8(mmu);
                let val = self.sp_offset(offset);
                self.set_hl(val);
                self.tick();
            }
            0xE9 => self.pc = self.get_hl(),
            0xF9 => {
                self.sp = self.get_hl();
                self.tick();
            }
            0xF3 => mmu.irq.di(&mut mmu.sched),
            0xFB => mmu.irq.ei(self.cc, &mut mmu.sched),
            // D3 DB DD E3 E4 EB EC ED F4 FC FD
            _ => {}
        }
    }

    /// Service the `Interrupts` slot.
    fn interrupt(&mut self, mmu: &mut Mmu) {
        let requested_at = mmu.sched.event_time(EventSlot::Interrupts);
        if mmu.stopped {
            mmu.sched.disable(EventSlot::Interrupts);
            return;
        }
        if mmu.irq.halted() {
            if mmu.is_cgb() || self.cc.saturating_sub(requested_at) < 2 {
                self.tick();
            }
            mmu.unhalt(self.cc);
        }
        if !mmu.irq.ime() {
            return;
        }

        mmu.irq.di(&mut mmu.sched);
        self.cc += INTERRUPT_ENTRY_CYCLES;
        let ret = self.pc;
        self.sp = self.sp.wrapping_sub(1);
        self.write8(mmu, self.sp, (ret >> 8) as u8);
        // The high byte may have landed on IE and cancelled the request.
        let pending = mmu.irq.pending();
        self.sp = self.sp.wrapping_sub(1);
        self.write8(mmu, self.sp, ret as u8);
        if pending == 0 {
            self.pc = 0x0000;
            return;
        }
        let bit = pending & pending.wrapping_neg();
        mmu.irq.ack_irq(bit, &mut mmu.sched);
        self.pc = INTERRUPT_VECTOR_BASE + bit.trailing_zeros() as u16 * 8;
    }

    /// Fire the earliest deadline. Returns the time the `End` slot was due
    /// when that is the slot that fired.
    fn dispatch(&mut self, mmu: &mut Mmu) -> Option<u64> {
        match mmu.sched.min_event() {
            EventSlot::Interrupts => {
                self.interrupt(mmu);
                None
            }
            EventSlot::End => {
                let due = mmu.sched.event_time(EventSlot::End);
                self.cc = mmu.event(self.cc);
                Some(due)
            }
            _ => {
                self.cc = mmu.event(self.cc);
                None
            }
        }
    }

    /// Run until at least `cycles` base-clock cycles have elapsed, stopping
    /// at the first instruction boundary past the budget. Returns the cycles
    /// actually consumed, in base-clock units.
    pub fn run_for(&mut self, mmu: &mut Mmu, cycles: u64) -> u64 {
        let end = self.cc + (cycles << mmu.double_speed() as u32);
        mmu.sched.set_event_time(EventSlot::End, end);

        let mut end_due = end;
        loop {
            if self.cc >= REBASE_THRESHOLD {
                let old = self.cc;
                self.cc = mmu.rebase(old);
                end_due -= old - self.cc;
            }
            if mmu.irq.halted() {
                let next = mmu.sched.min_event_time();
                if next > self.cc {
                    self.cc += (next - self.cc + 3) & !3;
                }
            } else {
                while self.cc < mmu.sched.min_event_time() && !mmu.irq.halted() {
                    self.step(mmu);
                }
                if mmu.irq.halted() && self.cc < mmu.sched.min_event_time() {
                    continue;
                }
            }
            if let Some(due) = self.dispatch(mmu) {
                end_due = due;
            }
            if mmu.take_ended() {
                break;
            }
        }
        while mmu.sched.min_event_time() <= self.cc {
            self.dispatch(mmu);
        }
        mmu.flush_audio(self.cc);

        cycles + (self.cc.saturating_sub(end_due) >> mmu.double_speed() as u32)
    }

    pub fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.enter("cpu");
        v.u64("cc", &mut self.cc);
        v.u16("pc", &mut self.pc);
        v.u16("sp", &mut self.sp);
        v.u8("a", &mut self.a);
        v.u8("f", &mut self.f);
        v.u8("b", &mut self.b);
        v.u8("c", &mut self.c);
        v.u8("d", &mut self.d);
        v.u8("e", &mut self.e);
        v.u8("h", &mut self.h);
        v.u8("l", &mut self.l);
        v.bool("halt_bug", &mut self.halt_bug);
        v.exit();
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new(Model::Dmg)
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.debug_state())
    }
}
