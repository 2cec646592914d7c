//! Multicart mappers that switch whole 32 KiB games.

use super::{BankMap, Geometry, MapperEffect, Mbc, RamAccess};
use crate::savestate::StateVisitor;

fn pair_map(geo: Geometry, bank: usize) -> BankMap {
    BankMap {
        rom0: bank & geo.rom_banks.saturating_sub(2),
        romx: geo.rom(bank | 1),
        ram: 0,
        access: RamAccess::DISABLED,
        disabled_ram: true,
    }
}

/// Wisdom Tree: the low address byte of any ROM write picks the game.
#[derive(Debug, Clone, Default)]
pub struct WisdomTree {
    rom_bank: u16,
}

impl WisdomTree {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Mbc for WisdomTree {
    fn write(&mut self, addr: u16, _data: u8) -> Option<MapperEffect> {
        self.rom_bank = (addr & 0xFF) << 1;
        None
    }

    fn bank_map(&self, geo: Geometry) -> BankMap {
        pair_map(geo, self.rom_bank as usize)
    }

    fn can_map(&self, _addr: u16, _bank: usize, _geo: Geometry) -> bool {
        true
    }

    fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.u16("rom_bank", &mut self.rom_bank);
    }
}

/// M161: the first ROM write locks in one of eight games.
#[derive(Debug, Clone, Default)]
pub struct M161 {
    rom_bank: u8,
    mapped: bool,
}

impl M161 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Mbc for M161 {
    fn write(&mut self, _addr: u16, data: u8) -> Option<MapperEffect> {
        if !self.mapped {
            self.rom_bank = (data & 7) << 1;
            self.mapped = true;
        }
        None
    }

    fn bank_map(&self, geo: Geometry) -> BankMap {
        pair_map(geo, self.rom_bank as usize)
    }

    fn can_map(&self, _addr: u16, _bank: usize, _geo: Geometry) -> bool {
        true
    }

    fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.u8("rom_bank", &mut self.rom_bank);
        v.bool("mapped", &mut self.mapped);
    }
}

/// MMM01. Boots into the menu in the last 32 KiB of the image. Once reg0
/// bit 6 is set the selected game is mapped and the outer bank bits lock.
#[derive(Debug, Clone)]
pub struct Mmm01 {
    reg0: u8,
    reg1: u8,
    reg2: u8,
    reg3: u8,
}

impl Mmm01 {
    pub fn new() -> Self {
        Self {
            reg0: 0,
            reg1: 1,
            reg2: 0,
            reg3: 0,
        }
    }

    fn is_mapped(&self) -> bool {
        self.reg0 & 0x40 != 0
    }

    fn enable_ram(&self) -> bool {
        self.reg0 & 0x0F == 0x0A
    }

    fn rom_mask(&self) -> u8 {
        self.reg3 >> 1 & 0x1E
    }

    fn ram_mask(&self) -> u8 {
        self.reg0 >> 4 & 3
    }

    fn is_muxed(&self) -> bool {
        self.reg3 & 0x40 != 0
    }

    fn rom_low(&self, upper: bool) -> usize {
        let reg = self.reg1 & 0x1F;
        let mut bank = reg & self.rom_mask();
        if upper {
            bank |= (reg & !self.rom_mask()).max(1);
        }
        bank as usize
    }

    fn rom_mid(&self) -> usize {
        (self.reg1 >> 5 & 3) as usize
    }

    fn rom_high(&self) -> usize {
        (self.reg2 >> 4 & 3) as usize
    }

    fn ram_low(&self, ignore_mode: bool) -> usize {
        let mode = self.reg3 & 1 != 0 || ignore_mode;
        if mode { (self.reg2 & 3) as usize } else { 0 }
    }

    fn ram_high(&self) -> usize {
        (self.reg2 >> 2 & 3) as usize
    }

    fn rom_bank(&self, upper: bool) -> usize {
        let mid = if self.is_muxed() {
            self.ram_low(upper)
        } else {
            self.rom_mid()
        };
        self.rom_low(upper) | mid << 5 | self.rom_high() << 7
    }
}

impl Default for Mmm01 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mbc for Mmm01 {
    fn write(&mut self, addr: u16, data: u8) -> Option<MapperEffect> {
        let mapped = self.is_mapped();
        match addr >> 13 & 3 {
            0 => {
                self.reg0 = if mapped {
                    (self.reg0 & 0x70) | (data & 0x0F)
                } else {
                    data & 0x7F
                };
            }
            1 => {
                if !mapped {
                    self.reg1 = (self.reg1 & 0x1F) | (data & 0x60);
                }
                let mask = self.rom_mask();
                self.reg1 &= mask | 0x60;
                self.reg1 |= !mask & data & 0x1F;
                // Bit 0 stays writable after mapping.
                self.reg1 = (self.reg1 & 0x7E) | (data & 0x01);
            }
            2 => {
                if !mapped {
                    self.reg2 = (self.reg2 & 0x03) | (data & 0x7C);
                }
                let mask = self.ram_mask();
                self.reg2 &= mask | 0x7C;
                self.reg2 |= !mask & data & 3;
            }
            _ => {
                if !mapped {
                    self.reg3 = (self.reg3 & 0x01) | (data & 0x7E);
                }
                if self.reg2 & 0x40 == 0 {
                    self.reg3 = (self.reg3 & 0x7E) | (data & 0x01);
                }
            }
        }
        None
    }

    fn bank_map(&self, geo: Geometry) -> BankMap {
        let (rom0, romx) = if self.is_mapped() {
            (self.rom_bank(false), self.rom_bank(true))
        } else {
            (0x1FE, 0x1FF)
        };
        let ram_low = if self.is_muxed() {
            self.rom_mid()
        } else {
            self.ram_low(false)
        };
        BankMap {
            rom0: geo.rom(rom0),
            romx: geo.rom(romx),
            ram: geo.ram(ram_low | self.ram_high() << 2),
            access: RamAccess::enabled(self.enable_ram()),
            disabled_ram: !self.enable_ram(),
        }
    }

    fn can_map(&self, addr: u16, bank: usize, _geo: Geometry) -> bool {
        if self.is_mapped() {
            (addr < 0x4000) == (bank & (self.reg3 >> 2 & 0x0F) as usize == 0)
        } else if addr < 0x4000 {
            bank == 0x1FE
        } else {
            bank == 0x1FF
        }
    }

    fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.u8("reg0", &mut self.reg0);
        v.u8("reg1", &mut self.reg1);
        v.u8("reg2", &mut self.reg2);
        v.u8("reg3", &mut self.reg3);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wisdom_tree_selects_pair_from_address() {
        let geo = Geometry {
            rom_banks: 16,
            ram_banks: 0,
        };
        let mut mbc = WisdomTree::new();
        mbc.write(0x0003, 0xFF);
        let map = mbc.bank_map(geo);
        assert_eq!((map.rom0, map.romx), (6, 7));
    }

    #[test]
    fn m161_latches_first_write_only() {
        let geo = Geometry {
            rom_banks: 16,
            ram_banks: 0,
        };
        let mut mbc = M161::new();
        mbc.write(0x4000, 0x02);
        mbc.write(0x4000, 0x05);
        let map = mbc.bank_map(geo);
        assert_eq!((map.rom0, map.romx), (4, 5));
        assert!(map.disabled_ram);
    }

    #[test]
    fn mmm01_boots_into_last_32k_then_maps_game() {
        let geo = Geometry {
            rom_banks: 64,
            ram_banks: 0,
        };
        let mut mbc = Mmm01::new();
        let map = mbc.bank_map(geo);
        assert_eq!((map.rom0, map.romx), (62, 63));
        mbc.write(0x2000, 0x02);
        mbc.write(0x0000, 0x40);
        let map = mbc.bank_map(geo);
        assert_eq!((map.rom0, map.romx), (0, 2));
    }
}
