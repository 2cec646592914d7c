use super::{BankMap, Geometry, MapperEffect, Mbc, RamAccess};
use crate::savestate::StateVisitor;

/// MBC3 and MBC30, with or without the clock chip.
///
/// With a clock fitted, RAM banks 8-0xC select clock registers. Bank numbers
/// past the fitted RAM but below 8, or above 0xC, float the bus.
#[derive(Debug, Clone)]
pub struct Mbc3 {
    rom_bank: u8,
    ram_bank: u8,
    enable_ram: bool,
    has_rtc: bool,
    rom_mask: u8,
    ram_mask: u8,
}

impl Mbc3 {
    pub fn new(has_rtc: bool, mbc30: bool) -> Self {
        let (rom_mask, ram_mask) = if mbc30 { (0xFF, 0x07) } else { (0x7F, 0x03) };
        Self {
            rom_bank: 1,
            ram_bank: 0,
            enable_ram: false,
            has_rtc,
            rom_mask,
            ram_mask,
        }
    }

    pub fn is_mbc30(&self) -> bool {
        self.rom_mask == 0xFF
    }

    fn rtc_selected(&self) -> bool {
        self.has_rtc && self.enable_ram && (0x08..=0x0C).contains(&self.ram_bank)
    }

    fn out_of_range(&self, geo: Geometry) -> bool {
        let bank = self.ram_bank as usize;
        self.has_rtc && ((bank > geo.ram_banks.wrapping_sub(1) && bank < 0x08) || bank > 0x0C)
    }

    fn rtc_select(&self) -> Option<MapperEffect> {
        self.has_rtc.then_some(MapperEffect::RtcSelect {
            enabled: self.enable_ram,
            bank: self.ram_bank,
        })
    }
}

impl Mbc for Mbc3 {
    fn write(&mut self, addr: u16, data: u8) -> Option<MapperEffect> {
        match addr >> 13 & 3 {
            0 => {
                self.enable_ram = data & 0x0F == 0x0A;
                self.rtc_select()
            }
            1 => {
                self.rom_bank = data & self.rom_mask;
                None
            }
            2 => {
                self.ram_bank = data & if self.has_rtc { 0x0F } else { self.ram_mask };
                self.rtc_select()
            }
            _ => self.has_rtc.then_some(MapperEffect::RtcLatch),
        }
    }

    fn bank_map(&self, geo: Geometry) -> BankMap {
        let disabled = !self.enable_ram || self.out_of_range(geo);
        let access = if self.rtc_selected() {
            RamAccess::CHIP
        } else {
            RamAccess::enabled(!disabled)
        };
        BankMap {
            rom0: 0,
            romx: geo.rom(self.rom_bank.max(1) as usize),
            ram: geo.ram(self.ram_bank as usize),
            access,
            disabled_ram: disabled,
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

    const GEO: Geometry = Geometry {
        rom_banks: 128,
        ram_banks: 4,
    };

    #[test]
    fn clock_banks_route_to_chip() {
        let mut mbc = Mbc3::new(true, false);
        assert_eq!(
            mbc.write(0x0000, 0x0A),
            Some(MapperEffect::RtcSelect {
                enabled: true,
                bank: 0
            })
        );
        mbc.write(0x4000, 0x08);
        assert!(mbc.bank_map(GEO).access.chip);
        mbc.write(0x4000, 0x02);
        assert_eq!(mbc.bank_map(GEO).access, RamAccess::READ_WRITE);
        assert_eq!(mbc.write(0x6000, 0x01), Some(MapperEffect::RtcLatch));
    }

    #[test]
    fn invalid_banks_disable_ram_only_with_clock() {
        let geo = Geometry {
            rom_banks: 8,
            ram_banks: 1,
        };
        let mut mbc = Mbc3::new(true, false);
        mbc.write(0x0000, 0x0A);
        mbc.write(0x4000, 0x05);
        assert!(mbc.bank_map(geo).disabled_ram);
        mbc.write(0x4000, 0x0D);
        assert!(mbc.bank_map(geo).disabled_ram);

        let mut plain = Mbc3::new(false, false);
        plain.write(0x0000, 0x0A);
        plain.write(0x4000, 0x03);
        let map = plain.bank_map(geo);
        assert!(!map.disabled_ram);
        assert_eq!(map.ram, 0);
    }

    #[test]
    fn mbc30_widens_rom_mask() {
        let geo = Geometry {
            rom_banks: 256,
            ram_banks: 8,
        };
        let mut mbc = Mbc3::new(false, true);
        mbc.write(0x2000, 0xFF);
        assert_eq!(mbc.bank_map(geo).romx, 0xFF);
        let mut mbc3 = Mbc3::new(false, false);
        mbc3.write(0x2000, 0xFF);
        assert_eq!(mbc3.bank_map(geo).romx, 0x7F);
    }
}
