use super::{BankMap, Geometry, MapperEffect, Mbc, RamAccess};
use crate::savestate::StateVisitor;

/// Hudson HuC1. RAM flag 0xE switches the window to the IR transceiver.
#[derive(Debug, Clone)]
pub struct HuC1 {
    rom_bank: u8,
    ram_bank: u8,
    ram_flag: u8,
}

impl HuC1 {
    pub fn new() -> Self {
        Self {
            rom_bank: 1,
            ram_bank: 0,
            ram_flag: 0,
        }
    }
}

impl Default for HuC1 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mbc for HuC1 {
    fn write(&mut self, addr: u16, data: u8) -> Option<MapperEffect> {
        match addr >> 13 & 3 {
            0 => {
                self.ram_flag = data & 0x0F;
                return (self.ram_flag != 0x0E).then_some(MapperEffect::IrOff);
            }
            1 => self.rom_bank = data & 0x3F,
            2 => self.ram_bank = data & 3,
            _ => {}
        }
        None
    }

    fn bank_map(&self, geo: Geometry) -> BankMap {
        let access = match self.ram_flag {
            0x0 => RamAccess::READ_ONLY,
            0xA => RamAccess::READ_WRITE,
            0xE => RamAccess::CHIP,
            _ => RamAccess::DISABLED,
        };
        BankMap {
            rom0: 0,
            romx: geo.rom(self.rom_bank as usize),
            ram: geo.ram(self.ram_bank as usize),
            access,
            disabled_ram: !matches!(self.ram_flag, 0x0 | 0xA | 0xE),
        }
    }

    fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.u8("rom_bank", &mut self.rom_bank);
        v.u8("ram_bank", &mut self.ram_bank);
        v.u8("ram_flag", &mut self.ram_flag);
    }
}

/// Hudson HuC3. RAM flags 0xB-0xE talk to the clock/tone/IR chip.
#[derive(Debug, Clone)]
pub struct HuC3 {
    rom_bank: u8,
    ram_bank: u8,
    ram_flag: u8,
}

impl HuC3 {
    pub fn new() -> Self {
        Self {
            rom_bank: 1,
            ram_bank: 0,
            ram_flag: 0,
        }
    }
}

impl Default for HuC3 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mbc for HuC3 {
    fn write(&mut self, addr: u16, data: u8) -> Option<MapperEffect> {
        match addr >> 13 & 3 {
            0 => {
                self.ram_flag = data & 0x0F;
                return Some(MapperEffect::Huc3Ramflag(self.ram_flag));
            }
            1 => self.rom_bank = data,
            2 => self.ram_bank = data,
            _ => {}
        }
        None
    }

    fn bank_map(&self, geo: Geometry) -> BankMap {
        let access = match self.ram_flag {
            0x0 => RamAccess::READ_ONLY,
            0xA => RamAccess::READ_WRITE,
            0xB..=0xE => RamAccess::CHIP,
            _ => RamAccess::DISABLED,
        };
        BankMap {
            rom0: 0,
            romx: geo.rom(self.rom_bank as usize).max(1),
            ram: geo.ram(self.ram_bank as usize),
            access,
            // Unmapped reads go to the chip, never to the bus.
            disabled_ram: false,
        }
    }

    fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.u8("rom_bank", &mut self.rom_bank);
        v.u8("ram_bank", &mut self.ram_bank);
        v.u8("ram_flag", &mut self.ram_flag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEO: Geometry = Geometry {
        rom_banks: 64,
        ram_banks: 4,
    };

    #[test]
    fn huc1_flag_modes() {
        let mut mbc = HuC1::new();
        assert_eq!(mbc.bank_map(GEO).access, RamAccess::READ_ONLY);
        assert_eq!(mbc.write(0x0000, 0x0E), None);
        assert!(mbc.bank_map(GEO).access.chip);
        assert_eq!(mbc.write(0x0000, 0x0A), Some(MapperEffect::IrOff));
        assert_eq!(mbc.bank_map(GEO).access, RamAccess::READ_WRITE);
        mbc.write(0x0000, 0x05);
        assert!(mbc.bank_map(GEO).disabled_ram);
    }

    #[test]
    fn huc3_never_maps_rom_bank_zero_high() {
        let mut mbc = HuC3::new();
        mbc.write(0x2000, 0x40);
        assert_eq!(mbc.bank_map(GEO).romx, 1);
        assert_eq!(
            mbc.write(0x0000, 0x0B),
            Some(MapperEffect::Huc3Ramflag(0x0B))
        );
        let map = mbc.bank_map(GEO);
        assert!(map.access.chip);
        assert!(!map.disabled_ram);
    }
}
