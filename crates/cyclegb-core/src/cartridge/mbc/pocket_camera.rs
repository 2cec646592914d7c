use super::{BankMap, Geometry, MapperEffect, Mbc, RamAccess};
use crate::savestate::StateVisitor;

/// Pocket Camera controller. RAM bank bit 4 maps the sensor registers.
#[derive(Debug, Clone)]
pub struct PocketCamera {
    rom_bank: u8,
    ram_bank: u8,
    enable_ram: bool,
}

impl PocketCamera {
    pub fn new() -> Self {
        Self {
            rom_bank: 1,
            ram_bank: 0,
            enable_ram: false,
        }
    }
}

impl Default for PocketCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl Mbc for PocketCamera {
    fn write(&mut self, addr: u16, data: u8) -> Option<MapperEffect> {
        match addr >> 13 & 3 {
            0 => self.enable_ram = data & 0x0F == 0x0A,
            1 => self.rom_bank = data & 0x3F,
            2 => self.ram_bank = data & 0x1F,
            _ => {}
        }
        None
    }

    fn bank_map(&self, geo: Geometry) -> BankMap {
        // RAM stays readable with the enable latch off.
        let access = if self.ram_bank & 0x10 != 0 {
            RamAccess::CHIP
        } else {
            RamAccess {
                read: true,
                write: self.enable_ram,
                chip: false,
            }
        };
        BankMap {
            rom0: 0,
            romx: geo.rom(self.rom_bank as usize),
            ram: geo.ram(self.ram_bank as usize),
            access,
            disabled_ram: false,
        }
    }

    fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.u8("rom_bank", &mut self.rom_bank);
        v.u8("ram_bank", &mut self.ram_bank);
        v.bool("enable_ram", &mut self.enable_ram);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_bank_and_write_latch() {
        let geo = Geometry {
            rom_banks: 64,
            ram_banks: 16,
        };
        let mut mbc = PocketCamera::new();
        assert_eq!(mbc.bank_map(geo).access, RamAccess::READ_ONLY);
        mbc.write(0x0000, 0x0A);
        assert_eq!(mbc.bank_map(geo).access, RamAccess::READ_WRITE);
        mbc.write(0x4000, 0x10);
        assert!(mbc.bank_map(geo).access.chip);
    }
}
