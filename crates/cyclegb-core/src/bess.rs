//! Read-only import of BESS ("Best Effort Save State") snapshots produced by
//! other emulators.
//!
//! The whole file is decoded and validated into [`BessState`] before any of it
//! touches the machine, so a rejected file leaves the running state alone.

use log::{debug, warn};

use crate::cartridge::rtc::RtcRegisters;
use crate::config::TimeMode;
use crate::cpu::Cpu;
use crate::error::ImportError;
use crate::hardware::{CpuRegs, Model};
use crate::mmu::Mmu;
use crate::sinks::HostTime;

const MAGIC: &[u8; 4] = b"BESS";
const MAJOR_REVISION: u16 = 1;

const CORE: &[u8; 4] = b"CORE";
const XOAM: &[u8; 4] = b"XOAM";
const MBC: &[u8; 4] = b"MBC ";
const RTC: &[u8; 4] = b"RTC ";
const HUC3: &[u8; 4] = b"HUC3";
const END: &[u8; 4] = b"END ";

/// Fixed CORE fields before the buffer table.
const CORE_FIXED_LEN: usize = 0x18 + 0x80;
const CORE_BUFFERS: usize = 7;
const RTC_BLOCK_LEN: usize = 0x30;
const HUC3_BLOCK_MIN_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Execution {
    Running,
    Halted,
    Stopped,
}

/// Decoded snapshot, not yet applied.
#[derive(Debug, Clone)]
pub struct BessState {
    regs: CpuRegs,
    ime: bool,
    ie: u8,
    execution: Execution,
    io: [u8; 0x80],
    wram: Vec<u8>,
    vram: Vec<u8>,
    sram: Vec<u8>,
    oam: Vec<u8>,
    hram: Vec<u8>,
    bg_palettes: Vec<u8>,
    obj_palettes: Vec<u8>,
    extra_oam: Vec<u8>,
    mbc_writes: Vec<(u16, u8)>,
    rtc: Option<(RtcRegisters, u64)>,
    huc3: Option<(u16, u16)>,
}

impl BessState {
    /// Scanline the snapshot was taken on.
    pub fn ly(&self) -> u8 {
        self.io[0x44]
    }
}

/// Little-endian cursor over one block.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ImportError> {
        let end = self.pos.checked_add(n).ok_or(ImportError::Truncated)?;
        let out = self.data.get(self.pos..end).ok_or(ImportError::Truncated)?;
        self.pos = end;
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> Result<(), ImportError> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8, ImportError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ImportError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ImportError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, ImportError> {
        let lo = self.u32()? as u64;
        let hi = self.u32()? as u64;
        Ok(hi << 32 | lo)
    }

    /// RTC registers are stored one per little-endian u32.
    fn padded_u8(&mut self) -> Result<u8, ImportError> {
        let v = self.u8()?;
        self.skip(3)?;
        Ok(v)
    }
}

/// Decode `data` for a machine running `model`.
///
/// Blocks are taken in file order and may appear on either side of `CORE`.
/// Repeated `MBC ` blocks append their writes; other repeats replace.
pub fn parse(data: &[u8], model: Model) -> Result<BessState, ImportError> {
    if data.len() < 8 || &data[data.len() - 4..] != MAGIC {
        return Err(ImportError::NotBess);
    }
    let mut trailer = Cursor::new(data, data.len() - 8);
    let mut pos = trailer.u32()? as usize;

    let mut state: Option<BessState> = None;
    let mut extra_oam = Vec::new();
    let mut mbc_writes = Vec::new();
    let mut rtc = None;
    let mut huc3 = None;
    loop {
        let mut header = Cursor::new(data, pos);
        let Ok(label) = header.take(4) else {
            return Err(ImportError::MissingEnd);
        };
        let len = header.u32()? as usize;
        let body_start = header.pos;
        let body_end = body_start
            .checked_add(len)
            .filter(|&end| end <= data.len())
            .ok_or(ImportError::Truncated)?;
        let mut block = Cursor::new(&data[..body_end], body_start);

        match label {
            l if l == CORE => {
                if len < CORE_FIXED_LEN + CORE_BUFFERS * 8 {
                    return Err(ImportError::Truncated);
                }
                state = Some(parse_core(&mut block, data, model)?);
            }
            l if l == END => break,
            l if l == XOAM => extra_oam = block.take(len.min(0x60))?.to_vec(),
            l if l == MBC => mbc_writes.extend(parse_mbc(&mut block, len)?),
            l if l == RTC => rtc = Some(parse_rtc(&mut block, len)?),
            l if l == HUC3 => huc3 = Some(parse_huc3(&mut block, len)?),
            other => debug!(
                "Skipping BESS block {:?} ({len} bytes)",
                String::from_utf8_lossy(other)
            ),
        }
        pos = body_end;
    }

    let mut state = state.ok_or(ImportError::MissingCore)?;
    state.extra_oam = extra_oam;
    state.mbc_writes = mbc_writes;
    state.rtc = rtc;
    state.huc3 = huc3;
    Ok(state)
}

fn parse_core(block: &mut Cursor<'_>, file: &[u8], model: Model) -> Result<BessState, ImportError> {
    let major = block.u16()?;
    if major != MAJOR_REVISION {
        return Err(ImportError::BadRevision(major));
    }
    block.skip(2)?;
    let found = block.u8()? as char;
    let expected = model.bess_letter();
    if found != expected {
        return Err(ImportError::WrongModel { expected, found });
    }
    block.skip(3)?;

    let pc = block.u16()?;
    let f = block.u8()?;
    let a = block.u8()?;
    let c = block.u8()?;
    let b = block.u8()?;
    let e = block.u8()?;
    let d = block.u8()?;
    let l = block.u8()?;
    let h = block.u8()?;
    let sp = block.u16()?;
    let regs = CpuRegs {
        a,
        f,
        b,
        c,
        d,
        e,
        h,
        l,
        pc,
        sp,
    };
    let ime = block.u8()? != 0;
    let ie = block.u8()?;
    let execution = match block.u8()? {
        0 => Execution::Running,
        1 => Execution::Halted,
        2 => Execution::Stopped,
        other => return Err(ImportError::BadExecutionState(other)),
    };
    block.skip(1)?;
    let mut io = [0u8; 0x80];
    io.copy_from_slice(block.take(0x80)?);

    let cgb = model.is_cgb();
    let limits = [
        if cgb { 0x8000 } else { 0x2000 },
        if cgb { 0x4000 } else { 0x2000 },
        usize::MAX,
        0xA0,
        0x7F,
        if cgb { 0x40 } else { 0 },
        if cgb { 0x40 } else { 0 },
    ];
    let mut buffers: [Vec<u8>; CORE_BUFFERS] = Default::default();
    for (buf, limit) in buffers.iter_mut().zip(limits) {
        let len = block.u32()? as usize;
        let offset = block.u32()? as usize;
        let take = len.min(limit);
        let src = offset
            .checked_add(take)
            .and_then(|end| file.get(offset..end))
            .ok_or(ImportError::Truncated)?;
        if len != take {
            warn!("BESS buffer of {len} bytes truncated to {take}");
        }
        *buf = src.to_vec();
    }
    let [wram, vram, sram, oam, hram, bg_palettes, obj_palettes] = buffers;

    Ok(BessState {
        regs,
        ime,
        ie,
        execution,
        io,
        wram,
        vram,
        sram,
        oam,
        hram,
        bg_palettes,
        obj_palettes,
        extra_oam: Vec::new(),
        mbc_writes: Vec::new(),
        rtc: None,
        huc3: None,
    })
}

/// `[u16 addr][u8 value]` register writes to replay through the mapper.
fn parse_mbc(block: &mut Cursor<'_>, len: usize) -> Result<Vec<(u16, u8)>, ImportError> {
    if len % 3 != 0 {
        return Err(ImportError::BadMbcBlock);
    }
    let mut writes = Vec::with_capacity(len / 3);
    for _ in 0..len / 3 {
        let addr = block.u16()?;
        let value = block.u8()?;
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => writes.push((addr, value)),
            _ => return Err(ImportError::BadMbcBlock),
        }
    }
    Ok(writes)
}

fn parse_rtc(block: &mut Cursor<'_>, len: usize) -> Result<(RtcRegisters, u64), ImportError> {
    if len < RTC_BLOCK_LEN {
        return Err(ImportError::Truncated);
    }
    let s = block.padded_u8()?;
    let m = block.padded_u8()?;
    let h = block.padded_u8()?;
    let dl = block.padded_u8()?;
    let dh = block.padded_u8()?;
    let latch_s = block.padded_u8()?;
    let latch_m = block.padded_u8()?;
    let latch_h = block.padded_u8()?;
    let latch_dl = block.padded_u8()?;
    let latch_dh = block.padded_u8()?;
    let timestamp = block.u64()?;
    let regs = RtcRegisters {
        dh,
        dl,
        h,
        m,
        s,
        c: 0,
        latch_dh,
        latch_dl,
        latch_h,
        latch_m,
        latch_s,
    };
    Ok((regs, timestamp))
}

fn parse_huc3(block: &mut Cursor<'_>, len: usize) -> Result<(u16, u16), ImportError> {
    if len < HUC3_BLOCK_MIN_LEN {
        return Err(ImportError::Truncated);
    }
    let _timestamp = block.u64()?;
    let minutes = block.u16()?;
    let days = block.u16()?;
    Ok((minutes, days))
}

fn copy_prefix(dst: &mut [u8], src: &[u8]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
}

/// Commit a decoded snapshot. The cycle counter restarts at `LY << 8`.
pub fn apply(state: &BessState, cpu: &mut Cpu, mmu: &mut Mmu) {
    cpu.set_regs(state.regs);

    copy_prefix(mmu.wram.as_flattened_mut(), &state.wram);
    copy_prefix(mmu.ppu.vram.as_flattened_mut(), &state.vram);
    copy_prefix(&mut mmu.ppu.oam[..0xA0], &state.oam);
    copy_prefix(&mut mmu.ppu.oam[0xA0..], &state.extra_oam);
    copy_prefix(&mut mmu.hram, &state.hram);
    copy_prefix(mmu.ppu.bg_palette_ram_mut(), &state.bg_palettes);
    copy_prefix(mmu.ppu.obj_palette_ram_mut(), &state.obj_palettes);

    for (i, &val) in state.io.iter().enumerate() {
        mmu.restore_io(0xFF00 + i as u16, val);
    }
    let ds = mmu.is_cgb() && mmu.key1 & 0x80 != 0;
    mmu.set_double_speed(ds);

    let ly = state.ly();
    let cc = (ly as u64) << 8;
    cpu.cc = cc;

    if let Some(cart) = mmu.cart.as_mut() {
        copy_prefix(cart.sram_mut(), &state.sram);
        for &(addr, value) in &state.mbc_writes {
            if addr < 0x8000 {
                cart.write_rom(addr, value, cc);
            }
        }
        if let Some((regs, timestamp)) = state.rtc {
            cart.set_rtc_registers(&regs, cc);
            if cart.time.mode() == TimeMode::Wall {
                let now = cart.time.now();
                let divisor = cart.time.divisor();
                cart.rtc
                    .set_base_time(HostTime::new(timestamp, 0), now, divisor);
            }
        }
        if let Some((minutes, days)) = state.huc3 {
            cart.huc3.set_clock(minutes, days);
        }
    }

    mmu.reset_counters(ly, cc);
    mmu.irq.restore(
        state.io[0x0F] | 0xE0,
        state.ie,
        state.ime,
        state.execution != Execution::Running,
        cc,
        &mut mmu.sched,
    );
    mmu.stopped = state.execution == Execution::Stopped;
    debug!("Imported BESS state at LY {ly}, cycle {cc}");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal BESS file: CORE with empty buffers, optional extra blocks, END.
    fn build(model_letter: u8, extra: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
        let mut out = vec![0xAA; 0x10];
        let first = out.len() as u32;

        let mut core = Vec::new();
        core.extend_from_slice(&1u16.to_le_bytes());
        core.extend_from_slice(&0u16.to_le_bytes());
        core.push(model_letter);
        core.extend_from_slice(&[0; 3]);
        core.extend_from_slice(&0x0150u16.to_le_bytes());
        core.extend_from_slice(&[0xB0, 0x01, 0x13, 0x00, 0xD8, 0x00, 0x4D, 0x01]);
        core.extend_from_slice(&0xFFFEu16.to_le_bytes());
        core.extend_from_slice(&[1, 0x01, 0, 0]);
        let mut io = [0u8; 0x80];
        io[0x44] = 0x10;
        core.extend_from_slice(&io);
        for _ in 0..CORE_BUFFERS {
            core.extend_from_slice(&0u32.to_le_bytes());
            core.extend_from_slice(&0u32.to_le_bytes());
        }
        assert_eq!(core.len(), CORE_FIXED_LEN + CORE_BUFFERS * 8);

        let push = |out: &mut Vec<u8>, label: &[u8; 4], body: &[u8]| {
            out.extend_from_slice(label);
            out.extend_from_slice(&(body.len() as u32).to_le_bytes());
            out.extend_from_slice(body);
        };
        push(&mut out, CORE, &core);
        for (label, body) in extra {
            push(&mut out, label, body);
        }
        push(&mut out, END, &[]);
        out.extend_from_slice(&first.to_le_bytes());
        out.extend_from_slice(MAGIC);
        out
    }

    #[test]
    fn decodes_core_registers() {
        let st = parse(&build(b'G', &[]), Model::Dmg).unwrap();
        assert_eq!(st.regs.pc, 0x0150);
        assert_eq!(st.regs.a, 0x01);
        assert_eq!(st.regs.f, 0xB0);
        assert_eq!(st.regs.h, 0x01);
        assert_eq!(st.regs.l, 0x4D);
        assert!(st.ime);
        assert_eq!(st.ie, 0x01);
        assert_eq!(st.ly(), 0x10);
    }

    #[test]
    fn rejects_wrong_model_and_missing_trailer() {
        assert_eq!(
            parse(&build(b'C', &[]), Model::Dmg).unwrap_err(),
            ImportError::WrongModel {
                expected: 'G',
                found: 'C'
            }
        );
        let mut data = build(b'G', &[]);
        let n = data.len();
        data[n - 1] = b'X';
        assert_eq!(parse(&data, Model::Dmg).unwrap_err(), ImportError::NotBess);
    }

    #[test]
    fn mbc_block_must_be_whole_writes_in_range() {
        let odd = build(b'G', &[(MBC, vec![0x00, 0x20, 0x01, 0x00])]);
        assert_eq!(parse(&odd, Model::Dmg).unwrap_err(), ImportError::BadMbcBlock);
        let vram = build(b'G', &[(MBC, vec![0x00, 0x80, 0x01])]);
        assert_eq!(parse(&vram, Model::Dmg).unwrap_err(), ImportError::BadMbcBlock);
        let ok = build(b'G', &[(MBC, vec![0x00, 0x00, 0x0A, 0x00, 0x21, 0x03])]);
        let st = parse(&ok, Model::Dmg).unwrap();
        assert_eq!(st.mbc_writes, vec![(0x0000, 0x0A), (0x2100, 0x03)]);
    }

    /// Like `build`, with `before` placed ahead of the CORE block.
    fn build_with_leading(before: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
        let tail = build(b'G', &[]);
        let first = u32::from_le_bytes(tail[tail.len() - 8..tail.len() - 4].try_into().unwrap());
        let mut out = tail[..first as usize].to_vec();
        let mut lead = Vec::new();
        for (label, body) in before {
            lead.extend_from_slice(*label);
            lead.extend_from_slice(&(body.len() as u32).to_le_bytes());
            lead.extend_from_slice(body);
        }
        // The CORE buffer table has no payloads, so blocks can shift freely.
        out.extend_from_slice(&lead);
        out.extend_from_slice(&tail[first as usize..tail.len() - 8]);
        out.extend_from_slice(&first.to_le_bytes());
        out.extend_from_slice(MAGIC);
        out
    }

    #[test]
    fn blocks_ahead_of_core_still_apply() {
        let data = build_with_leading(&[
            (MBC, vec![0x00, 0x21, 0x03]),
            (XOAM, vec![0x55; 0x60]),
        ]);
        let st = parse(&data, Model::Dmg).unwrap();
        assert_eq!(st.mbc_writes, vec![(0x2100, 0x03)]);
        assert_eq!(st.extra_oam, vec![0x55; 0x60]);
        assert_eq!(st.regs.pc, 0x0150);
    }

    #[test]
    fn end_without_core_is_rejected() {
        let mut data = vec![0u8; 4];
        data.extend_from_slice(END);
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(MAGIC);
        assert_eq!(parse(&data, Model::Dmg).unwrap_err(), ImportError::MissingCore);
    }

    #[test]
    fn truncated_block_is_rejected() {
        let mut data = build(b'G', &[]);
        // Point the trailer at the last few bytes so the block header overruns.
        let n = data.len();
        let bad = (n - 10) as u32;
        data[n - 8..n - 4].copy_from_slice(&bad.to_le_bytes());
        assert!(parse(&data, Model::Dmg).is_err());
    }
}
