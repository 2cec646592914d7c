#![allow(dead_code)]

use once_cell::sync::OnceCell;

use cyclegb_core::{CoreConfig, GameBoy};

static LOGGER: OnceCell<()> = OnceCell::new();

/// Route `log` output through env_logger once per test binary.
pub fn init_logging() {
    LOGGER.get_or_init(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Entry point: NOP; JP 0x0150.
const ENTRY: [u8; 4] = [0x00, 0xC3, 0x50, 0x01];
pub const PROGRAM_START: usize = 0x0150;

/// Header checksum over 0x134-0x14C.
pub fn fix_header_checksum(rom: &mut [u8]) {
    let sum = rom[0x0134..0x014D]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_sub(b).wrapping_sub(1));
    rom[0x014D] = sum;
}

/// A ROM image of `banks` 16 KiB banks. Every bank after the first is filled
/// with its own bank number so bank switches are visible.
pub fn build_rom(cart_type: u8, ram_size: u8, banks: usize, title: &str) -> Vec<u8> {
    let mut rom = vec![0u8; banks.max(2) * 0x4000];
    for (bank, chunk) in rom.chunks_mut(0x4000).enumerate().skip(1) {
        chunk.fill(bank as u8);
    }
    rom[0x0100..0x0104].copy_from_slice(&ENTRY);
    for (dst, src) in rom[0x0134..0x0143].iter_mut().zip(title.bytes()) {
        *dst = src;
    }
    rom[0x0147] = cart_type;
    rom[0x0148] = (banks.max(2) / 2).trailing_zeros() as u8;
    rom[0x0149] = ram_size;
    fix_header_checksum(&mut rom);
    rom
}

/// A 32 KiB ROM running `program` from 0x0150.
pub fn program_rom(cart_type: u8, ram_size: u8, program: &[u8]) -> Vec<u8> {
    let mut rom = build_rom(cart_type, ram_size, 2, "TESTPROG");
    rom[PROGRAM_START..PROGRAM_START + program.len()].copy_from_slice(program);
    rom
}

/// `JR -2`: spin forever.
pub const SPIN: [u8; 2] = [0x18, 0xFE];

/// LD HL,0xC000; loop: INC (HL); INC L; JR loop
pub const COUNTER_LOOP: [u8; 7] = [0x21, 0x00, 0xC0, 0x34, 0x2C, 0x18, 0xFC];

pub fn machine_with(rom: Vec<u8>) -> GameBoy {
    init_logging();
    let mut gb = GameBoy::with_config(CoreConfig::default());
    gb.load_rom(rom).unwrap();
    gb
}
