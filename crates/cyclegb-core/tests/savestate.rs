mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{COUNTER_LOOP, build_rom, fix_header_checksum, init_logging, machine_with, program_rom};
use cyclegb_core::sinks::FrameCapture;
use cyclegb_core::{GameBoy, ImportError, StateError};

/// CGB program: bank-switch through MBC1 and restart OAM DMA from WRAM on
/// every pass, so both are in flight at almost any save point.
///
/// ```text
/// 0150 LD A,0xFF; LDH (BGP),A; LD HL,0xC000
/// 0157 INC (HL); INC L; LD A,L; AND 3; INC A; LD (0x2000),A
/// 0160 LD A,(0x4000); LD (HL),A; LD A,0xC0; LDH (DMA),A; JR 0157
/// ```
const BANK_DMA_LOOP: [u8; 26] = [
    0x3E, 0xFF, 0xE0, 0x47, 0x21, 0x00, 0xC0, 0x34, 0x2C, 0x7D, 0xE6, 0x03, 0x3C, 0xEA, 0x00,
    0x20, 0xFA, 0x00, 0x40, 0x77, 0x3E, 0xC0, 0xE0, 0x46, 0x18, 0xED,
];

fn bank_dma_rom() -> Vec<u8> {
    let mut rom = build_rom(0x01, 0x00, 4, "BANKDMA");
    rom[0x0150..0x0150 + BANK_DMA_LOOP.len()].copy_from_slice(&BANK_DMA_LOOP);
    rom[0x0143] = 0x80;
    fix_header_checksum(&mut rom);
    rom
}

fn capture(gb: &mut GameBoy) -> Rc<RefCell<FrameCapture>> {
    let frames = Rc::new(RefCell::new(FrameCapture::new()));
    gb.set_video_sink(Some(Box::new(frames.clone())));
    frames
}

#[test]
fn state_continues_identically_in_fresh_machine() {
    let rom = program_rom(0x03, 0x02, &COUNTER_LOOP);
    let mut original = machine_with(rom.clone());
    original.run_for(50_000);
    let image = original.save_state();

    let mut restored = machine_with(rom);
    restored.load_state(&image).unwrap();
    let (a, b) = (original.cart_info().unwrap(), restored.cart_info().unwrap());
    assert_eq!(a.title, b.title);
    assert_eq!(a.mapper, b.mapper);
    assert_eq!(a.rom_banks, b.rom_banks);
    assert_eq!(a.ram_banks, b.ram_banks);
    assert_eq!(original.cpu.cc, restored.cpu.cc);

    // Saved mid-frame: the first frame out of the restored machine must
    // include the lines composed before the save point.
    let frames_a = capture(&mut original);
    let frames_b = capture(&mut restored);
    for _ in 0..4 {
        assert_eq!(original.run_for(30_000), restored.run_for(30_000));
    }
    assert_eq!(original.cpu.regs(), restored.cpu.regs());
    assert_eq!(original.cpu.cc, restored.cpu.cc);
    assert_eq!(original.wram(), restored.wram());
    assert_eq!(original.vram(), restored.vram());
    assert_eq!(original.oam(), restored.oam());
    assert!(frames_a.borrow().frames >= 1);
    assert_eq!(frames_a.borrow().frames, frames_b.borrow().frames);
    assert_eq!(frames_a.borrow().last, frames_b.borrow().last);
}

#[test]
fn round_trip_holds_mid_dma_and_across_bank_switches() {
    let rom = bank_dma_rom();
    let mut reference = machine_with(rom.clone());
    assert!(reference.is_cgb());
    let mut mid_dma = 0;

    for point in 0..40u64 {
        reference.run_for(997 + point * 13);
        mid_dma += reference.mmu.oam_dma_active() as usize;
        let image = reference.save_state();

        let mut restored = machine_with(rom.clone());
        restored.load_state(&image).unwrap();
        let frames_a = capture(&mut reference);
        let frames_b = capture(&mut restored);

        let budget = 2_000 + point * 31;
        assert_eq!(reference.run_for(budget), restored.run_for(budget), "point {point}");
        assert_eq!(reference.cpu.regs(), restored.cpu.regs(), "point {point}");
        assert_eq!(reference.cpu.cc, restored.cpu.cc, "point {point}");
        assert_eq!(reference.wram(), restored.wram(), "point {point}");
        assert_eq!(reference.oam(), restored.oam(), "point {point}");
        let cc = reference.cpu.cc;
        assert_eq!(
            reference.mmu.read(0x4000, cc),
            restored.mmu.read(0x4000, cc),
            "point {point}"
        );
        assert_eq!(frames_a.borrow().frames, frames_b.borrow().frames);
        assert_eq!(frames_a.borrow().last, frames_b.borrow().last);
    }
    assert!(mid_dma > 0);
}

#[test]
fn truncated_or_padded_current_image_is_rejected() {
    let mut source = machine_with(program_rom(0x00, 0x00, &COUNTER_LOOP));
    source.run_for(20_000);
    let image = source.save_state();

    let mut gb = machine_with(program_rom(0x00, 0x00, &COUNTER_LOOP));
    gb.run_for(5_000);
    let regs = gb.cpu.regs();
    let cc = gb.cpu.cc;
    let wram = gb.wram().to_vec();

    assert!(matches!(
        gb.load_state(&image[..6]),
        Err(StateError::Truncated(_))
    ));
    assert!(matches!(
        gb.load_state(&image[..image.len() / 2]),
        Err(StateError::Truncated(_))
    ));
    let mut padded = image.clone();
    padded.push(0);
    assert_eq!(gb.load_state(&padded), Err(StateError::TrailingData(1)));

    assert_eq!(gb.cpu.regs(), regs);
    assert_eq!(gb.cpu.cc, cc);
    assert_eq!(gb.wram(), &wram[..]);

    gb.load_state(&image).unwrap();
    assert_eq!(gb.cpu.regs(), source.cpu.regs());
}

#[test]
fn state_size_matches_image() {
    let mut gb = machine_with(program_rom(0x00, 0x00, &COUNTER_LOOP));
    gb.run_for(10_000);
    let size = gb.state_size();
    assert_eq!(gb.save_state().len(), size);
}

#[test]
fn rejected_image_leaves_machine_untouched() {
    let mut gb = machine_with(program_rom(0x00, 0x00, &COUNTER_LOOP));
    gb.run_for(10_000);
    let mut image = gb.save_state();
    gb.run_for(10_000);
    let regs = gb.cpu.regs();
    let cc = gb.cpu.cc;
    let wram = gb.wram().to_vec();

    assert!(matches!(gb.load_state(b"nope"), Err(StateError::BadMagic)));

    // Corrupt the first field name.
    image[7] ^= 0x20;
    assert!(matches!(
        gb.load_state(&image),
        Err(StateError::FieldMismatch { .. })
    ));

    let mut newer = gb.save_state();
    newer[4] = 0xFF;
    newer[5] = 0xFF;
    assert!(matches!(gb.load_state(&newer), Err(StateError::Version(_))));

    assert_eq!(gb.cpu.regs(), regs);
    assert_eq!(gb.cpu.cc, cc);
    assert_eq!(gb.wram(), &wram[..]);
}

#[test]
fn image_from_other_mapper_is_refused() {
    let mut mbc1 = machine_with(program_rom(0x01, 0x00, &COUNTER_LOOP));
    let image = mbc1.save_state();
    let mut mbc5 = machine_with(program_rom(0x19, 0x00, &COUNTER_LOOP));
    assert!(mbc5.load_state(&image).is_err());
}

#[test]
fn loading_without_cartridge_fails() {
    init_logging();
    let mut gb = GameBoy::new();
    assert!(matches!(gb.load_state(b"CGBS\x01\x00"), Err(StateError::NotLoaded)));
}

/// A DMG BESS file: CORE with registers, LY 0x10 and a four-byte WRAM
/// buffer, then `MBC ` with the given writes, then END.
fn bess_blob(mbc_writes: &[(u16, u8)]) -> Vec<u8> {
    let wram = [0x11, 0x22, 0x33, 0x44];
    let mut out = wram.to_vec();
    let first = out.len() as u32;

    let mut core = Vec::new();
    core.extend_from_slice(&1u16.to_le_bytes());
    core.extend_from_slice(&0u16.to_le_bytes());
    core.extend_from_slice(b"G\0\0\0");
    core.extend_from_slice(&0x0150u16.to_le_bytes());
    // F A C B E D L H
    core.extend_from_slice(&[0xB0, 0x01, 0x13, 0x00, 0xD8, 0x00, 0x4D, 0x01]);
    core.extend_from_slice(&0xFFFEu16.to_le_bytes());
    // IME, IE, running, reserved
    core.extend_from_slice(&[0, 0, 0, 0]);
    let mut io = [0u8; 0x80];
    io[0x44] = 0x10;
    core.extend_from_slice(&io);
    // WRAM at offset 0; the other six buffers are empty.
    core.extend_from_slice(&(wram.len() as u32).to_le_bytes());
    core.extend_from_slice(&0u32.to_le_bytes());
    for _ in 0..6 {
        core.extend_from_slice(&[0; 8]);
    }

    let mut mbc = Vec::new();
    for &(addr, value) in mbc_writes {
        mbc.extend_from_slice(&addr.to_le_bytes());
        mbc.push(value);
    }

    for (label, body) in [(b"CORE", core), (b"MBC ", mbc), (b"END ", Vec::new())] {
        out.extend_from_slice(label);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
    }
    out.extend_from_slice(&first.to_le_bytes());
    out.extend_from_slice(b"BESS");
    out
}

#[test]
fn bess_import_restores_registers_memory_and_bank() {
    let mut gb = machine_with(build_rom(0x01, 0x00, 4, "IMPORT"));
    gb.run_for(5_000);
    gb.import_bess(&bess_blob(&[(0x2100, 0x03)])).unwrap();

    let regs = gb.cpu.regs();
    assert_eq!(regs.pc, 0x0150);
    assert_eq!(regs.a, 0x01);
    assert_eq!(regs.f, 0xB0);
    assert_eq!(regs.sp, 0xFFFE);
    assert_eq!((regs.h, regs.l), (0x01, 0x4D));
    assert_eq!(&gb.wram()[..4], &[0x11, 0x22, 0x33, 0x44]);
    assert_eq!(gb.cpu.cc, 0x10 << 8);
    let cc = gb.cpu.cc;
    assert_eq!(gb.mmu.read(0x4000, cc), 0x03);

    let start = gb.cpu.cc;
    assert!(gb.run_for(10_000) >= 10_000);
    assert!(gb.cpu.cc >= start + 10_000);
    assert_ne!(gb.cpu.regs().pc, 0x0150);
}

#[test]
fn bess_garbage_is_rejected_without_side_effects() {
    let mut gb = machine_with(program_rom(0x00, 0x00, &COUNTER_LOOP));
    gb.run_for(5_000);
    let regs = gb.cpu.regs();
    let cc = gb.cpu.cc;

    assert!(matches!(gb.import_bess(b"short"), Err(ImportError::NotBess)));

    let mut blob = vec![0u8; 64];
    blob.extend_from_slice(&0x1000u32.to_le_bytes());
    blob.extend_from_slice(b"BESS");
    assert!(gb.import_bess(&blob).is_err());

    assert_eq!(gb.cpu.regs(), regs);
    assert_eq!(gb.cpu.cc, cc);
}
