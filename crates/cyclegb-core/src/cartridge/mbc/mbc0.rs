use super::{BankMap, Geometry, MapperEffect, Mbc};
use crate::savestate::StateVisitor;

/// ROM-only cartridge, optionally with 8 KiB of RAM behind an enable latch.
#[derive(Debug, Clone, Default)]
pub struct Mbc0 {
    enable_ram: bool,
}

impl Mbc0 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Mbc for Mbc0 {
    fn write(&mut self, addr: u16, data: u8) -> Option<MapperEffect> {
        if addr < 0x2000 {
            self.enable_ram = data & 0x0F == 0x0A;
        }
        None
    }

    fn bank_map(&self, geo: Geometry) -> BankMap {
        BankMap::plain(geo, 1, 0, self.enable_ram)
    }

    fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.bool("enable_ram", &mut self.enable_ram);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_writes_are_ignored() {
        let mut mbc = Mbc0::new();
        let geo = Geometry {
            rom_banks: 2,
            ram_banks: 1,
        };
        mbc.write(0x2000, 0x05);
        let map = mbc.bank_map(geo);
        assert_eq!((map.rom0, map.romx), (0, 1));
        assert!(map.disabled_ram);
        mbc.write(0x0000, 0x0A);
        assert!(mbc.bank_map(geo).access.write);
    }
}
