use super::{BankMap, Geometry, MapperEffect, Mbc};
use crate::savestate::StateVisitor;

/// MBC5 with its 9-bit ROM bank register.
#[derive(Debug, Clone)]
pub struct Mbc5 {
    rom_bank: u16,
    ram_bank: u8,
    enable_ram: bool,
}

impl Mbc5 {
    pub fn new() -> Self {
        Self {
            rom_bank: 1,
            ram_bank: 0,
            enable_ram: false,
        }
    }
}

impl Default for Mbc5 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mbc for Mbc5 {
    fn write(&mut self, addr: u16, data: u8) -> Option<MapperEffect> {
        match addr >> 13 & 3 {
            // Only the exact value enables RAM on this chip.
            0 => self.enable_ram = data == 0x0A,
            1 => {
                self.rom_bank = if addr < 0x3000 {
                    (self.rom_bank & 0x100) | data as u16
                } else {
                    ((data as u16) << 8 & 0x100) | (self.rom_bank & 0xFF)
                }
            }
            2 => self.ram_bank = data & 0x0F,
            _ => {}
        }
        None
    }

    fn bank_map(&self, geo: Geometry) -> BankMap {
        BankMap::plain(
            geo,
            self.rom_bank as usize,
            self.ram_bank as usize,
            self.enable_ram,
        )
    }

    fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.u16("rom_bank", &mut self.rom_bank);
        v.u8("ram_bank", &mut self.ram_bank);
        v.bool("enable_ram", &mut self.enable_ram);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nine_bit_rom_bank_and_zero_allowed() {
        let geo = Geometry {
            rom_banks: 512,
            ram_banks: 16,
        };
        let mut mbc = Mbc5::new();
        mbc.write(0x2000, 0x00);
        assert_eq!(mbc.bank_map(geo).romx, 0);
        mbc.write(0x3000, 0x01);
        mbc.write(0x2000, 0x23);
        assert_eq!(mbc.bank_map(geo).romx, 0x123);
    }

    #[test]
    fn enable_requires_exact_value() {
        let geo = Geometry {
            rom_banks: 2,
            ram_banks: 1,
        };
        let mut mbc = Mbc5::new();
        mbc.write(0x0000, 0x1A);
        assert!(mbc.bank_map(geo).disabled_ram);
        mbc.write(0x0000, 0x0A);
        assert!(!mbc.bank_map(geo).disabled_ram);
    }
}
