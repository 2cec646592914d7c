mod common;

use common::{SPIN, init_logging, program_rom};
use cyclegb_core::config::ModelSelect;
use cyclegb_core::hardware::{CGB_POST_BOOT_CYCLE, DMG_POST_BOOT_EXTRA};
use cyclegb_core::{CoreConfig, GameBoy, Model};
use tempfile::tempdir;

fn cgb_flagged(mut rom: Vec<u8>) -> Vec<u8> {
    rom[0x0143] = 0x80;
    common::fix_header_checksum(&mut rom);
    rom
}

fn machine(model: ModelSelect, rom: Vec<u8>) -> GameBoy {
    init_logging();
    let mut gb = GameBoy::with_config(CoreConfig {
        model,
        ..CoreConfig::default()
    });
    gb.load_rom(rom).unwrap();
    gb
}

#[test]
fn auto_model_follows_header() {
    let gb = machine(ModelSelect::Auto, program_rom(0x00, 0x00, &SPIN));
    assert_eq!(gb.model(), Model::Dmg);
    assert_eq!(gb.cpu.cc, CGB_POST_BOOT_CYCLE + DMG_POST_BOOT_EXTRA);
    assert_eq!(gb.cpu.regs().pc, 0x0100);
    assert_eq!(gb.cpu.regs().a, 0x01);

    let gb = machine(ModelSelect::Auto, cgb_flagged(program_rom(0x00, 0x00, &SPIN)));
    assert_eq!(gb.model(), Model::Cgb);
    assert_eq!(gb.cpu.cc, CGB_POST_BOOT_CYCLE);
    assert_eq!(gb.cpu.regs().a, 0x11);
}

#[test]
fn forced_cgb_runs_dmg_cart_in_compat_mode() {
    let mut gb = machine(ModelSelect::Cgb, program_rom(0x00, 0x00, &SPIN));
    assert!(gb.is_cgb());
    let cc = gb.cpu.cc;
    // CGB-only registers are dark in compatibility mode.
    gb.mmu.write(0xFF70, 0x03, cc);
    assert_eq!(gb.mmu.read(0xFF70, cc), 0xFF);

    let mut native = machine(ModelSelect::Cgb, cgb_flagged(program_rom(0x00, 0x00, &SPIN)));
    let cc = native.cpu.cc;
    native.mmu.write(0xFF70, 0x03, cc);
    assert_eq!(native.mmu.read(0xFF70, cc), 0xFB);
}

#[test]
fn forced_dmg_ignores_cgb_flag() {
    let gb = machine(ModelSelect::Dmg, cgb_flagged(program_rom(0x00, 0x00, &SPIN)));
    assert!(!gb.is_cgb());
}

#[test]
fn boot_rom_runs_until_unmapped() {
    init_logging();
    let dir = tempdir().unwrap();
    let boot_path = dir.path().join("dmg_boot.bin");
    // LD A,1; LDH (0x50),A; then the cartridge takes over at 0x0004.
    let mut boot = vec![0u8; 0x100];
    boot[..4].copy_from_slice(&[0x3E, 0x01, 0xE0, 0x50]);
    std::fs::write(&boot_path, &boot).unwrap();

    let mut gb = GameBoy::with_config(CoreConfig {
        model: ModelSelect::Dmg,
        dmg_bootrom_path: Some(boot_path),
        ..CoreConfig::default()
    });
    gb.load_rom(program_rom(0x00, 0x00, &SPIN)).unwrap();
    assert!(gb.mmu.boot_rom_mapped());
    assert_eq!(gb.cpu.regs().pc, 0x0000);
    assert_eq!(gb.mmu.read(0x0000, gb.cpu.cc), 0x3E);

    gb.run_for(2_000);
    assert!(!gb.mmu.boot_rom_mapped());
    assert!((0x0150..0x0152).contains(&gb.cpu.regs().pc));
    assert_eq!(gb.mmu.read(0x0000, gb.cpu.cc), 0x00);
}

#[test]
fn short_boot_image_is_skipped() {
    init_logging();
    let dir = tempdir().unwrap();
    let boot_path = dir.path().join("cgb_boot.bin");
    std::fs::write(&boot_path, [0u8; 0x100]).unwrap();

    let mut gb = GameBoy::with_config(CoreConfig {
        model: ModelSelect::Cgb,
        cgb_bootrom_path: Some(boot_path),
        ..CoreConfig::default()
    });
    gb.load_rom(program_rom(0x00, 0x00, &SPIN)).unwrap();
    assert!(!gb.mmu.boot_rom_mapped());
    assert_eq!(gb.cpu.regs().pc, 0x0100);
}
