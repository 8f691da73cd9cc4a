use crate::{consts::BLOCK_SIZE_U64, session::CardVersion};

use bitfield::bitfield;
use size::{consts::KiB, Size};

/// Card Specific Data block.
pub type CsdData = [u8; 16];

bitfield! {
    /// Card Specific Data, version 1 (standard capacity SD and MMC).
    pub struct CsdV1(u128);
    impl Debug;
    pub u8, csd_structure, _: 127, 126;
    pub u8, tran_speed, _: 103, 96;
    pub u8, read_bl_len, _: 83, 80;
    pub u16, c_size, _: 73, 62;
    pub u8, c_size_mult, _: 49, 47;
    pub write_protected, _: 12;
}

bitfield! {
    /// Card Specific Data, version 2 (SDHC/SDXC).
    pub struct CsdV2(u128);
    impl Debug;
    pub u8, csd_structure, _: 127, 126;
    pub u8, tran_speed, _: 103, 96;
    pub u32, c_size, _: 69, 48;
    pub write_protected, _: 12;
}

/// Decoded CSD register.
#[derive(Debug)]
pub enum Csd {
    V1(CsdV1),
    V2(CsdV2),
}

impl Csd {
    /// CSD_STRUCTURE value of the version 2 layout.
    const STRUCTURE_V2: u8 = 1;

    /// Decodes the register, MMC always uses the version 1 capacity layout.
    pub fn parse(data: CsdData, card: CardVersion) -> Self {
        let v1 = CsdV1::from(data);
        let is_sd = card != CardVersion::MmcV3;

        if is_sd && v1.csd_structure() == Self::STRUCTURE_V2 {
            Csd::V2(CsdV2::from(data))
        } else {
            Csd::V1(v1)
        }
    }
}

/// Capacity decoded from the CSD.
pub trait CapacityProvider {
    fn card_capacity(&self) -> Size;

    /// Capacity in 512-byte sectors.
    fn card_capacity_blocks(&self) -> u64;
}

impl From<CsdData> for CsdV1 {
    fn from(data: CsdData) -> Self {
        Self(u128::from_be_bytes(data))
    }
}

impl From<CsdData> for CsdV2 {
    fn from(data: CsdData) -> Self {
        Self(u128::from_be_bytes(data))
    }
}

impl CsdV1 {
    fn capacity_bytes(&self) -> u64 {
        (u64::from(self.c_size()) + 1) << (self.c_size_mult() + self.read_bl_len() + 2)
    }
}

impl CapacityProvider for CsdV1 {
    fn card_capacity(&self) -> Size {
        Size::from_bytes(self.capacity_bytes())
    }

    fn card_capacity_blocks(&self) -> u64 {
        self.capacity_bytes() / BLOCK_SIZE_U64
    }
}

impl CapacityProvider for CsdV2 {
    fn card_capacity(&self) -> Size {
        Size::from_bytes(self.card_capacity_blocks() * BLOCK_SIZE_U64)
    }

    fn card_capacity_blocks(&self) -> u64 {
        (u64::from(self.c_size()) + 1) * (KiB as u64)
    }
}

impl CapacityProvider for Csd {
    fn card_capacity(&self) -> Size {
        match self {
            Csd::V1(csd) => csd.card_capacity(),
            Csd::V2(csd) => csd.card_capacity(),
        }
    }

    fn card_capacity_blocks(&self) -> u64 {
        match self {
            Csd::V1(csd) => csd.card_capacity_blocks(),
            Csd::V2(csd) => csd.card_capacity_blocks(),
        }
    }
}
