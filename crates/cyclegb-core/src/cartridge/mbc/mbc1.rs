use super::{BankMap, Geometry, MapperEffect, Mbc, RamAccess};
use crate::savestate::StateVisitor;

/// MBC1, including the 8 Mbit multicart wiring where the upper bank bits
/// land one position lower.
#[derive(Debug, Clone)]
pub struct Mbc1 {
    enable_ram: bool,
    mode: bool,
    reg1: u8,
    reg2: u8,
    rom_mask: u8,
    rom_shift: u8,
}

impl Mbc1 {
    pub fn new() -> Self {
        Self::with_wiring(0x1F, 5)
    }

    pub fn new_multi64() -> Self {
        Self::with_wiring(0x0F, 4)
    }

    fn with_wiring(rom_mask: u8, rom_shift: u8) -> Self {
        Self {
            enable_ram: false,
            mode: false,
            reg1: 1,
            reg2: 0,
            rom_mask,
            rom_shift,
        }
    }

    pub fn is_multi64(&self) -> bool {
        self.rom_shift == 4
    }

    fn upper(&self) -> usize {
        (self.reg2 as usize) << self.rom_shift
    }
}

impl Default for Mbc1 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mbc for Mbc1 {
    fn write(&mut self, addr: u16, data: u8) -> Option<MapperEffect> {
        match addr >> 13 & 3 {
            0 => self.enable_ram = data & 0x0F == 0x0A,
            1 => {
                self.reg1 = if data & 0x1F != 0 {
                    data & self.rom_mask
                } else {
                    1
                }
            }
            2 => self.reg2 = data & 3,
            _ => self.mode = data & 1 != 0,
        }
        None
    }

    fn bank_map(&self, geo: Geometry) -> BankMap {
        let rom0 = if self.mode { self.upper() } else { 0 };
        let ram = if self.mode { self.reg2 as usize } else { 0 };
        BankMap {
            rom0: geo.rom(rom0),
            romx: geo.rom(self.upper() | self.reg1 as usize),
            ram: geo.ram(ram),
            access: RamAccess::enabled(self.enable_ram),
            disabled_ram: !self.enable_ram,
        }
    }

    fn can_map(&self, addr: u16, bank: usize, _geo: Geometry) -> bool {
        (addr < 0x4000) == (bank & self.rom_mask as usize == 0)
    }

    fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.bool("enable_ram", &mut self.enable_ram);
        v.bool("mode", &mut self.mode);
        v.u8("reg1", &mut self.reg1);
        v.u8("reg2", &mut self.reg2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEO: Geometry = Geometry {
        rom_banks: 128,
        ram_banks: 4,
    };

    #[test]
    fn bank_zero_reads_as_one() {
        let mut mbc = Mbc1::new();
        mbc.write(0x2000, 0x00);
        assert_eq!(mbc.bank_map(GEO).romx, 1);
        mbc.write(0x2000, 0x20);
        assert_eq!(mbc.bank_map(GEO).romx, 1);
    }

    #[test]
    fn mode_one_moves_upper_bits_into_bank_zero_and_ram() {
        let mut mbc = Mbc1::new();
        mbc.write(0x2000, 0x05);
        mbc.write(0x4000, 0x02);
        let map = mbc.bank_map(GEO);
        assert_eq!((map.rom0, map.romx, map.ram), (0, 0x45, 0));
        mbc.write(0x6000, 0x01);
        let map = mbc.bank_map(GEO);
        assert_eq!((map.rom0, map.romx, map.ram), (0x40, 0x45, 2));
    }

    #[test]
    fn multicart_wiring_shifts_upper_bits_by_four() {
        let mut mbc = Mbc1::new_multi64();
        mbc.write(0x2000, 0x13);
        mbc.write(0x4000, 0x01);
        mbc.write(0x6000, 0x01);
        let geo = Geometry {
            rom_banks: 64,
            ram_banks: 0,
        };
        let map = mbc.bank_map(geo);
        assert_eq!((map.rom0, map.romx), (0x10, 0x13));
    }
}
