mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{COUNTER_LOOP, SPIN, init_logging, machine_with, program_rom};
use cyclegb_core::GameBoy;
use cyclegb_core::scheduler::{EventSlot, INT_TIMER};
use cyclegb_core::sinks::{AudioSink, FrameCapture};

const FRAME: u64 = 70224;

#[derive(Default)]
struct SampleCounter {
    samples: usize,
}

impl AudioSink for SampleCounter {
    fn samples(&mut self, samples: &[[i16; 2]]) {
        self.samples += samples.len();
    }
}

#[test]
fn timer_overflow_flags_interrupt_once() {
    let mut gb = machine_with(program_rom(0x00, 0x00, &SPIN));
    let cc = gb.cpu.cc;
    gb.mmu.write(0xFF0F, 0x00, cc);
    gb.mmu.write(0xFF06, 0x80, cc);
    gb.mmu.write(0xFF05, 0xF0, cc);
    // 262144 Hz: one tick every 16 cycles.
    gb.mmu.write(0xFF07, 0x05, cc);

    let overflow = gb.mmu.sched.event_time(EventSlot::Tima);
    assert!(overflow > cc);
    assert_eq!(gb.mmu.irq.ifreg() & INT_TIMER, 0);

    gb.run_for(overflow - cc + 10);
    assert_eq!(gb.mmu.irq.ifreg() & INT_TIMER, INT_TIMER);
    assert_eq!(
        gb.mmu.sched.event_time(EventSlot::Tima),
        overflow + (0x100 - 0x80) * 16
    );
}

#[test]
fn oam_dma_conflict_returns_in_flight_byte() {
    let mut gb = machine_with(program_rom(0x00, 0x00, &SPIN));
    let cc = gb.cpu.cc;
    for i in 0..0xA0u16 {
        gb.mmu.write(0xC000 + i, i as u8 ^ 0x5A, cc);
    }
    gb.mmu.write(0xFF46, 0xC0, cc);
    assert!(!gb.mmu.oam_dma_active());

    // Two cycles of setup, then one byte every four.
    let mid = cc + 8 + 4 * 0x20;
    assert_eq!(gb.mmu.read(0xC150, mid), 0x20 ^ 0x5A);
    assert!(gb.mmu.oam_dma_active());

    let done = cc + 8 + 4 * 0xA0 + 4;
    assert_eq!(gb.mmu.read(0xC150, done), 0x50 ^ 0x5A);
    assert!(!gb.mmu.oam_dma_active());
    assert_eq!(gb.oam()[0x9F], 0x9F ^ 0x5A);
}

#[test]
fn run_for_stops_at_first_boundary_past_budget() {
    let mut gb = machine_with(program_rom(0x00, 0x00, &COUNTER_LOOP));
    let start = gb.cpu.cc;
    let spent = gb.run_for(1000);
    assert!(spent >= 1000);
    assert!(spent < 1000 + 32, "overshoot {spent}");
    assert_eq!(gb.cpu.cc - start, spent);
    assert!(gb.mmu.sched.min_event_time() >= gb.cpu.cc);
}

#[test]
fn identical_machines_stay_identical() {
    let rom = program_rom(0x00, 0x00, &COUNTER_LOOP);
    let mut a = machine_with(rom.clone());
    let mut b = machine_with(rom);
    let frames_a = Rc::new(RefCell::new(FrameCapture::new()));
    let frames_b = Rc::new(RefCell::new(FrameCapture::new()));
    a.set_video_sink(Some(Box::new(frames_a.clone())));
    b.set_video_sink(Some(Box::new(frames_b.clone())));

    for _ in 0..3 {
        assert_eq!(a.run_for(FRAME), b.run_for(FRAME));
    }
    assert_eq!(a.cpu.regs(), b.cpu.regs());
    assert_eq!(a.cpu.cc, b.cpu.cc);
    assert_eq!(a.wram(), b.wram());
    assert!(frames_a.borrow().frames >= 2);
    assert_eq!(frames_a.borrow().frames, frames_b.borrow().frames);
    assert_eq!(frames_a.borrow().last, frames_b.borrow().last);
}

#[test]
fn audio_sink_gets_one_sample_per_two_cycles() {
    let mut gb = machine_with(program_rom(0x00, 0x00, &SPIN));
    let counter = Rc::new(RefCell::new(SampleCounter::default()));
    gb.set_audio_sink(Some(Box::new(counter.clone())));
    gb.run_for(1); // settle the sample clock
    counter.borrow_mut().samples = 0;

    let spent = gb.run_for(20_000);
    let got = counter.borrow().samples as u64;
    assert!(got.abs_diff(spent / 2) <= 1, "{got} samples for {spent} cycles");
}

#[test]
fn serial_transfer_without_cable_reads_ff() {
    // LD A,'A'; LDH (SB),A; LD A,0x81; LDH (SC),A; JR -2
    let program = [0x3E, 0x41, 0xE0, 0x01, 0x3E, 0x81, 0xE0, 0x02, 0x18, 0xFE];
    let mut gb = machine_with(program_rom(0x00, 0x00, &program));
    gb.run_for(20_000);
    assert_eq!(gb.mmu.serial.peek_output(), b"A");
    let cc = gb.cpu.cc;
    assert_eq!(gb.mmu.read(0xFF01, cc), 0xFF);
    assert_eq!(gb.mmu.read(0xFF02, cc) & 0x80, 0);
}

#[test]
fn game_shark_code_is_written_every_frame() {
    let mut gb = machine_with(program_rom(0x00, 0x00, &SPIN));
    gb.set_game_shark("0199A0C0");
    gb.run_for(2 * FRAME);
    let cc = gb.cpu.cc;
    assert_eq!(gb.mmu.read(0xC0A0, cc), 0x99);
}

#[test]
fn counter_program_runs_from_cartridge() {
    init_logging();
    let mut gb = GameBoy::new();
    gb.load_rom(program_rom(0x00, 0x00, &COUNTER_LOOP)).unwrap();
    gb.run_for(FRAME);
    assert!(gb.wram()[..0x100].iter().any(|&b| b != 0));
}
