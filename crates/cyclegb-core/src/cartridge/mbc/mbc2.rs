use super::{BankMap, Geometry, MapperEffect, Mbc, RamAccess};
use crate::savestate::StateVisitor;

/// MBC2 with its built-in 512x4-bit RAM. Address bit 8 selects between the
/// RAM enable and the ROM bank register.
#[derive(Debug, Clone)]
pub struct Mbc2 {
    rom_bank: u8,
    enable_ram: bool,
}

impl Mbc2 {
    pub fn new() -> Self {
        Self {
            rom_bank: 1,
            enable_ram: false,
        }
    }
}

impl Default for Mbc2 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mbc for Mbc2 {
    fn write(&mut self, addr: u16, data: u8) -> Option<MapperEffect> {
        match addr & 0x4100 {
            0x0000 => self.enable_ram = data & 0x0F == 0x0A,
            0x0100 => self.rom_bank = data & 0x0F,
            _ => {}
        }
        None
    }

    fn bank_map(&self, geo: Geometry) -> BankMap {
        BankMap {
            rom0: 0,
            romx: geo.rom(self.rom_bank.max(1) as usize),
            ram: 0,
            access: RamAccess::enabled(self.enable_ram),
            disabled_ram: !self.enable_ram,
        }
    }

    fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.u8("rom_bank", &mut self.rom_bank);
        v.bool("enable_ram", &mut self.enable_ram);
    }
}
