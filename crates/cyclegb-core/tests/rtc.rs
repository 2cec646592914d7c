mod common;

use std::fs;

use common::{build_rom, init_logging, machine_with};
use cyclegb_core::GameBoy;
use cyclegb_core::config::TimeMode;
use cyclegb_core::sinks::{FixedClock, HostTime};
use tempfile::tempdir;

const RTC_S: u8 = 0x08;
const RTC_M: u8 = 0x09;
const RTC_DH: u8 = 0x0C;

fn select(gb: &mut GameBoy, reg: u8, cc: u64) {
    gb.mmu.write(0x4000, reg, cc);
}

fn latch(gb: &mut GameBoy, cc: u64) {
    gb.mmu.write(0x6000, 0x00, cc);
    gb.mmu.write(0x6000, 0x01, cc + 4);
}

#[test]
fn latched_registers_hide_live_counters() {
    let mut gb = machine_with(build_rom(0x10, 0x02, 4, "CLOCK"));
    let mut cc = gb.cpu.cc;
    gb.mmu.write(0x0000, 0x0A, cc);
    select(&mut gb, RTC_S, cc + 4);
    gb.mmu.write(0xA000, 30, cc + 8);
    latch(&mut gb, cc + 12);
    assert_eq!(gb.mmu.read(0xA000, cc + 20), 30);

    // Ten emulated seconds later the latch still shows the old value.
    cc += 10 * 0x40_0000;
    assert_eq!(gb.mmu.read(0xA000, cc), 30);
    latch(&mut gb, cc + 4);
    assert_eq!(gb.mmu.read(0xA000, cc + 12), 40);
}

#[test]
fn halted_clock_survives_sidecar_round_trip() {
    init_logging();
    let dir = tempdir().unwrap();
    let rom_path = dir.path().join("clock.gb");
    fs::write(&rom_path, build_rom(0x10, 0x02, 4, "CLOCK")).unwrap();

    let mut gb = GameBoy::new();
    gb.load_rom_file(&rom_path).unwrap();
    let cc = gb.cpu.cc;
    gb.mmu.write(0x0000, 0x0A, cc);
    select(&mut gb, RTC_DH, cc + 4);
    gb.mmu.write(0xA000, 0x40, cc + 8);
    select(&mut gb, RTC_S, cc + 12);
    gb.mmu.write(0xA000, 12, cc + 16);
    select(&mut gb, RTC_M, cc + 20);
    gb.mmu.write(0xA000, 34, cc + 24);
    latch(&mut gb, cc + 28);
    gb.save_save_data().unwrap();

    let sidecar = fs::read(rom_path.with_extension("rtc")).unwrap();
    assert_eq!(sidecar.len(), 22);

    let mut again = GameBoy::new();
    again.load_rom_file(&rom_path).unwrap();
    let cc = again.cpu.cc;
    again.mmu.write(0x0000, 0x0A, cc);
    latch(&mut again, cc + 4);
    select(&mut again, RTC_S, cc + 12);
    assert_eq!(again.mmu.read(0xA000, cc + 16), 12);
    select(&mut again, RTC_M, cc + 20);
    assert_eq!(again.mmu.read(0xA000, cc + 24), 34);
}

#[test]
fn wall_mode_follows_host_clock() {
    let mut gb = machine_with(build_rom(0x10, 0x02, 4, "WALL"));
    let clock = FixedClock::new(HostTime::new(1_000, 0));
    gb.set_clock(Box::new(clock.clone()));
    gb.set_time_mode(TimeMode::Wall);

    let cc = gb.cpu.cc;
    gb.mmu.write(0x0000, 0x0A, cc);
    select(&mut gb, RTC_S, cc + 4);
    gb.mmu.write(0xA000, 0, cc + 8);

    clock.advance_secs(5);
    latch(&mut gb, cc + 12);
    assert_eq!(gb.mmu.read(0xA000, cc + 20), 5);
}

#[test]
fn time_now_counts_half_cycles() {
    let mut gb = machine_with(build_rom(0x10, 0x02, 4, "NOW"));
    gb.set_time(0);
    assert_eq!(gb.time_now(), 0);
    gb.cpu.cc += 2 * 0x40_0000;
    assert_eq!(gb.time_now(), 0x40_0000);
}
