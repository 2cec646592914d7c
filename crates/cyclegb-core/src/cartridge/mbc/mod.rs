//! Cartridge bank controllers.
//!
//! Every controller is a small register file. After each ROM-area write the
//! cartridge asks it for a [`BankMap`], the effective bank selection masked
//! into the physical ROM/RAM size, and caches it for the bus.

mod huc;
mod mbc0;
mod mbc1;
mod mbc2;
mod mbc3;
mod mbc5;
mod multicart;
mod pocket_camera;

pub use huc::{HuC1, HuC3};
pub use mbc0::Mbc0;
pub use mbc1::Mbc1;
pub use mbc2::Mbc2;
pub use mbc3::Mbc3;
pub use mbc5::Mbc5;
pub use multicart::{M161, Mmm01, WisdomTree};
pub use pocket_camera::PocketCamera;

use crate::savestate::StateVisitor;

pub const ROM_BANK_SIZE: usize = 0x4000;
pub const RAM_BANK_SIZE: usize = 0x2000;

/// Physical bank counts a controller masks its registers into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub rom_banks: usize,
    pub ram_banks: usize,
}

impl Geometry {
    pub fn rom(&self, bank: usize) -> usize {
        bank & (self.rom_banks - 1)
    }

    /// With no RAM fitted every bank number collapses to 0.
    pub fn ram(&self, bank: usize) -> usize {
        bank & self.ram_banks.saturating_sub(1)
    }
}

/// Who answers accesses to the 0xA000-0xBFFF window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RamAccess {
    pub read: bool,
    pub write: bool,
    /// Routed to the clock, IR or camera chip instead of RAM.
    pub chip: bool,
}

impl RamAccess {
    pub const DISABLED: RamAccess = RamAccess {
        read: false,
        write: false,
        chip: false,
    };
    pub const READ_ONLY: RamAccess = RamAccess {
        read: true,
        write: false,
        chip: false,
    };
    pub const READ_WRITE: RamAccess = RamAccess {
        read: true,
        write: true,
        chip: false,
    };
    pub const CHIP: RamAccess = RamAccess {
        read: true,
        write: true,
        chip: true,
    };

    pub fn enabled(enable: bool) -> Self {
        if enable {
            Self::READ_WRITE
        } else {
            Self::DISABLED
        }
    }
}

/// Effective bank selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankMap {
    pub rom0: usize,
    pub romx: usize,
    pub ram: usize,
    pub access: RamAccess,
    /// Unmapped SRAM reads float to the cart bus.
    pub disabled_ram: bool,
}

impl BankMap {
    pub fn plain(geo: Geometry, romx: usize, ram: usize, enable: bool) -> Self {
        Self {
            rom0: 0,
            romx: geo.rom(romx),
            ram: geo.ram(ram),
            access: RamAccess::enabled(enable),
            disabled_ram: !enable,
        }
    }
}

/// Side effect of a controller write on chips the cartridge owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperEffect {
    RtcSelect { enabled: bool, bank: u8 },
    RtcLatch,
    Huc3Ramflag(u8),
    IrOff,
}

pub trait Mbc {
    /// Handle a write to 0x0000-0x7FFF.
    fn write(&mut self, addr: u16, data: u8) -> Option<MapperEffect>;

    fn bank_map(&self, geo: Geometry) -> BankMap;

    /// Whether `bank` can appear at `addr`. Used when patching ROM with cheat
    /// codes.
    fn can_map(&self, addr: u16, bank: usize, _geo: Geometry) -> bool {
        (addr < 0x4000) == (bank == 0)
    }

    fn sync_state(&mut self, v: &mut dyn StateVisitor);
}

#[derive(Debug, Clone)]
pub enum Mapper {
    Mbc0(Mbc0),
    Mbc1(Mbc1),
    Mbc2(Mbc2),
    Mbc3(Mbc3),
    Mbc5(Mbc5),
    HuC1(HuC1),
    HuC3(HuC3),
    PocketCamera(PocketCamera),
    WisdomTree(WisdomTree),
    M161(M161),
    Mmm01(Mmm01),
}

impl Mapper {
    pub fn inner(&self) -> &dyn Mbc {
        match self {
            Mapper::Mbc0(m) => m,
            Mapper::Mbc1(m) => m,
            Mapper::Mbc2(m) => m,
            Mapper::Mbc3(m) => m,
            Mapper::Mbc5(m) => m,
            Mapper::HuC1(m) => m,
            Mapper::HuC3(m) => m,
            Mapper::PocketCamera(m) => m,
            Mapper::WisdomTree(m) => m,
            Mapper::M161(m) => m,
            Mapper::Mmm01(m) => m,
        }
    }

    pub fn inner_mut(&mut self) -> &mut dyn Mbc {
        match self {
            Mapper::Mbc0(m) => m,
            Mapper::Mbc1(m) => m,
            Mapper::Mbc2(m) => m,
            Mapper::Mbc3(m) => m,
            Mapper::Mbc5(m) => m,
            Mapper::HuC1(m) => m,
            Mapper::HuC3(m) => m,
            Mapper::PocketCamera(m) => m,
            Mapper::WisdomTree(m) => m,
            Mapper::M161(m) => m,
            Mapper::Mmm01(m) => m,
        }
    }

    pub fn write(&mut self, addr: u16, data: u8) -> Option<MapperEffect> {
        self.inner_mut().write(addr, data)
    }

    pub fn bank_map(&self, geo: Geometry) -> BankMap {
        self.inner().bank_map(geo)
    }

    pub fn can_map(&self, addr: u16, bank: usize, geo: Geometry) -> bool {
        self.inner().can_map(addr, bank, geo)
    }

    pub fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.enter("mbc");
        self.inner_mut().sync_state(v);
        v.exit();
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mapper::Mbc0(_) => "NULL",
            Mapper::Mbc1(m) if m.is_multi64() => "MBC1M",
            Mapper::Mbc1(_) => "MBC1",
            Mapper::Mbc2(_) => "MBC2",
            Mapper::Mbc3(m) if m.is_mbc30() => "MBC30",
            Mapper::Mbc3(_) => "MBC3",
            Mapper::Mbc5(_) => "MBC5",
            Mapper::HuC1(_) => "HuC1",
            Mapper::HuC3(_) => "HuC3",
            Mapper::PocketCamera(_) => "Pocket Camera",
            Mapper::WisdomTree(_) => "Wisdom Tree",
            Mapper::M161(_) => "M161",
            Mapper::Mmm01(_) => "MMM01",
        }
    }

    pub fn is_mbc2(&self) -> bool {
        matches!(self, Mapper::Mbc2(_))
    }

    pub fn is_huc1(&self) -> bool {
        matches!(self, Mapper::HuC1(_))
    }

    pub fn is_huc3(&self) -> bool {
        matches!(self, Mapper::HuC3(_))
    }

    pub fn is_camera(&self) -> bool {
        matches!(self, Mapper::PocketCamera(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_mappers() -> Vec<Mapper> {
        vec![
            Mapper::Mbc0(Mbc0::new()),
            Mapper::Mbc1(Mbc1::new()),
            Mapper::Mbc1(Mbc1::new_multi64()),
            Mapper::Mbc2(Mbc2::new()),
            Mapper::Mbc3(Mbc3::new(false, false)),
            Mapper::Mbc3(Mbc3::new(true, true)),
            Mapper::Mbc5(Mbc5::new()),
            Mapper::HuC1(HuC1::new()),
            Mapper::HuC3(HuC3::new()),
            Mapper::PocketCamera(PocketCamera::new()),
            Mapper::WisdomTree(WisdomTree::new()),
            Mapper::M161(M161::new()),
            Mapper::Mmm01(Mmm01::new()),
        ]
    }

    #[test]
    fn banks_stay_in_physical_range() {
        let geometries = [
            Geometry {
                rom_banks: 2,
                ram_banks: 0,
            },
            Geometry {
                rom_banks: 8,
                ram_banks: 1,
            },
            Geometry {
                rom_banks: 64,
                ram_banks: 4,
            },
            Geometry {
                rom_banks: 512,
                ram_banks: 16,
            },
        ];
        for geo in geometries {
            for mut mapper in all_mappers() {
                for addr in (0x0000u16..0x8000).step_by(0x1000) {
                    for value in [0x00u8, 0x01, 0x0A, 0x1F, 0x40, 0x7F, 0x80, 0xC3, 0xFF] {
                        mapper.write(addr | (value as u16 & 0xFF), value);
                        let map = mapper.bank_map(geo);
                        assert!(map.rom0 < geo.rom_banks, "{} rom0", mapper.name());
                        assert!(map.romx < geo.rom_banks, "{} romx", mapper.name());
                        assert!(map.ram < geo.ram_banks.max(1), "{} ram", mapper.name());
                    }
                }
            }
        }
    }

    #[test]
    fn default_can_map_separates_bank_zero() {
        let mbc = Mbc5::new();
        let geo = Geometry {
            rom_banks: 4,
            ram_banks: 0,
        };
        assert!(mbc.can_map(0x0100, 0, geo));
        assert!(!mbc.can_map(0x0100, 1, geo));
        assert!(mbc.can_map(0x4100, 3, geo));
    }
}
