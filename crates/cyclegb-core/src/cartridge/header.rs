use crate::error::{LoadError, UnsupportedMapper};

pub const HEADER_END: usize = 0x150;

/// Controller family chosen from the header and, in multicart
/// compatibility mode, from the image layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartKind {
    Plain,
    Mbc1,
    Mbc1Multi64,
    Mbc2,
    Mbc3,
    Mbc30,
    Mbc5,
    HuC1,
    HuC3,
    PocketCamera,
    WisdomTree,
    M161,
    Mmm01,
}

/// Summary of a loaded cartridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartInfo {
    pub title: String,
    pub cart_type: u8,
    pub mapper: String,
    pub rom_banks: usize,
    pub ram_banks: usize,
    pub cgb: bool,
    pub header_checksum_ok: bool,
    pub battery: bool,
    pub rtc: bool,
    pub multicart: bool,
}

pub(crate) struct Header<'a> {
    data: &'a [u8],
}

impl<'a> Header<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, LoadError> {
        if data.len() < HEADER_END {
            return Err(LoadError::TruncatedHeader);
        }
        Ok(Self { data })
    }

    pub fn title(&self) -> String {
        let mut slice = &self.data[0x0134..0x0143];
        if let Some(pos) = slice.iter().position(|&b| b == 0) {
            slice = &slice[..pos];
        }
        String::from_utf8_lossy(slice).trim().to_string()
    }

    pub fn cgb_flag(&self) -> bool {
        self.data[0x0143] & 0x80 != 0
    }

    pub fn cart_type(&self) -> u8 {
        self.data[0x0147]
    }

    pub fn checksum_ok(&self) -> bool {
        let sum = self.data[0x0134..0x014D]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_sub(b).wrapping_sub(1));
        sum == self.data[0x014D]
    }

    pub fn battery(&self) -> bool {
        matches!(
            self.cart_type(),
            0x03 | 0x06 | 0x09 | 0x0F | 0x10 | 0x13 | 0x1B | 0x1E | 0xFC | 0xFE | 0xFF
        )
    }

    pub fn rtc(&self) -> bool {
        matches!(self.cart_type(), 0x0F | 0x10 | 0xFE)
    }

    pub fn ram_banks(&self) -> usize {
        match self.data[0x0149] {
            0x00 if matches!(self.cart_type(), 0x05 | 0x06) => 1,
            0x00 => 0,
            0x01 | 0x02 => 1,
            0x03 => 4,
            0x04 => 16,
            0x05 => 8,
            _ => 4,
        }
    }

    /// Controller family from header byte 0x147.
    pub fn kind(&self, multicart_compat: bool) -> Result<CartKind, LoadError> {
        let unsupported = |kind| Err(LoadError::Unsupported(kind));
        let kind = match self.cart_type() {
            0x00 | 0x08 | 0x09 => CartKind::Plain,
            0x01..=0x03 => CartKind::Mbc1,
            0x05 | 0x06 => CartKind::Mbc2,
            0x0B..=0x0D => {
                if multicart_compat && mmm01_menu(self.data) {
                    CartKind::Mmm01
                } else {
                    return unsupported(UnsupportedMapper::Mmm01);
                }
            }
            0x0F..=0x13 => CartKind::Mbc3,
            0x1B if multicart_compat && self.data[0x014A] == 0xE1 => {
                return unsupported(UnsupportedMapper::EmsMulticart);
            }
            0x19..=0x1E => CartKind::Mbc5,
            0x20 => return unsupported(UnsupportedMapper::Mbc6),
            0x22 => return unsupported(UnsupportedMapper::Mbc7),
            0xBE if multicart_compat => return unsupported(UnsupportedMapper::BungMulticart),
            0xC0 if multicart_compat && self.data[0x014A] == 0xD1 => CartKind::WisdomTree,
            0xFC => CartKind::PocketCamera,
            0xFD => return unsupported(UnsupportedMapper::Tama5),
            0xFE => CartKind::HuC3,
            0xFF => CartKind::HuC1,
            other => return Err(LoadError::UnknownMapper(other)),
        };
        Ok(kind)
    }
}

/// Bank count for an image: the next power of two, at least two.
pub fn rom_bank_count(len: usize) -> usize {
    (len / 0x4000).next_power_of_two().max(2)
}

/// Header of the last 32 KiB of the image carries an MMM01 menu.
pub fn mmm01_menu(rom: &[u8]) -> bool {
    if rom.len() < 0x8000 {
        return false;
    }
    let base = rom.len() / 0x8000 * 0x8000 - 0x8000;
    matches!(rom.get(base + 0x0147), Some(0x0B..=0x0D) | Some(0x11))
}

/// Refine the header's choice using image layout heuristics.
pub(crate) fn refine_kind(
    kind: CartKind,
    header: &Header<'_>,
    rom: &[u8],
    rom_banks: usize,
    ram_banks: usize,
    multicart_compat: bool,
) -> CartKind {
    match kind {
        CartKind::Plain if multicart_compat && rom_banks == 16 && header.title() == "TETRIS SET" => {
            CartKind::M161
        }
        CartKind::Plain if multicart_compat && rom_banks > 2 => CartKind::WisdomTree,
        CartKind::Mbc1
            if multicart_compat && header.cart_type() == 0x01 && rom.get(0x0149) == Some(&0) && rom_banks == 64 =>
        {
            CartKind::Mbc1Multi64
        }
        CartKind::Mbc3 if multicart_compat && header.cart_type() == 0x11 && mmm01_menu(rom) => {
            CartKind::Mmm01
        }
        CartKind::Mbc3 if rom_banks > 0x80 || ram_banks > 4 => CartKind::Mbc30,
        other => other,
    }
}

pub fn mapper_name(cart_type: u8, kind: CartKind) -> &'static str {
    match cart_type {
        0x00 => match kind {
            CartKind::WisdomTree => "Wisdom Tree",
            CartKind::M161 => "M161",
            _ => "NULL",
        },
        0x01 if kind == CartKind::Mbc1Multi64 => "MBC1M",
        0x01 => "MBC1",
        0x02 if kind == CartKind::Mbc1Multi64 => "MBC1M [RAM]",
        0x02 => "MBC1 [RAM]",
        0x03 if kind == CartKind::Mbc1Multi64 => "MBC1M [RAM,battery]",
        0x03 => "MBC1 [RAM,battery]",
        0x05 => "MBC2",
        0x06 => "MBC2 [battery]",
        0x08 => "NULL [RAM]",
        0x09 => "NULL [RAM,battery]",
        0x0B => "MMM01",
        0x0C => "MMM01 [RAM]",
        0x0D => "MMM01 [RAM,battery]",
        0x0F => "MBC3 [RTC,battery]",
        0x10 => "MBC3 [RAM,RTC,battery]",
        0x11 if kind == CartKind::Mmm01 => "MMM01",
        0x11 => "MBC3",
        0x12 => "MBC3 [RAM]",
        0x13 => "MBC3 [RAM,battery]",
        0x19 => "MBC5",
        0x1A => "MBC5 [RAM]",
        0x1B => "MBC5 [RAM,battery]",
        0x1C => "MBC5 [rumble]",
        0x1D => "MBC5 [RAM,rumble]",
        0x1E => "MBC5 [RAM,rumble,battery]",
        0xC0 => "Wisdom Tree",
        0xFC => "Pocket Camera",
        0xFD => "Bandai TAMA5",
        0xFE => "HuC3",
        0xFF => "HuC1 [RAM,battery]",
        _ => "Unknown",
    }
}
