/// Size of a sector in bytes.
pub const BLOCK_SIZE: usize = 512;
/// Size of a sector in bytes, as u64.
pub const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

pub mod commands {
    /// CMD base value.
    pub const CMD_BASE: u8 = 0x40;
    /// GO_IDLE_STATE - init card in spi mode if CS low.
    pub const CMD0: u8 = CMD_BASE;
    /// SEND_OP_COND - activates the initialization process of an MMC.
    pub const CMD1: u8 = CMD_BASE + 1;
    /// SEND_IF_COND - verify SD Memory Card interface operating condition.
    pub const CMD8: u8 = CMD_BASE + 8;
    /// SEND_CSD - read the Card Specific Data (CSD register).
    pub const CMD9: u8 = CMD_BASE + 9;
    /// STOP_TRANSMISSION - end multiple block read sequence.
    pub const CMD12: u8 = CMD_BASE + 12;
    /// SET_BLOCKLEN - set the block length for standard capacity cards.
    pub const CMD16: u8 = CMD_BASE + 16;
    /// READ_SINGLE_BLOCK - read a single data block from the card.
    pub const CMD17: u8 = CMD_BASE + 17;
    /// READ_MULTIPLE_BLOCK - read a multiple data blocks from the card.
    pub const CMD18: u8 = CMD_BASE + 18;
    /// WRITE_BLOCK - write a single data block to the card.
    pub const CMD24: u8 = CMD_BASE + 24;
    /// WRITE_MULTIPLE_BLOCK - write blocks of data until a stop token.
    pub const CMD25: u8 = CMD_BASE + 25;
    /// APP_CMD - escape for application specific command.
    pub const CMD55: u8 = CMD_BASE + 55;
    /// READ_OCR - read the OCR register of a card.
    pub const CMD58: u8 = CMD_BASE + 58;
    /// SD_SEND_OP_COND - Sends host capacity support information and activates
    /// the card's initialization process.
    pub const ACMD41: u8 = CMD_BASE + 41;

    /// Command index without the framing bits.
    pub const fn index(cmd: u8) -> u8 {
        cmd & !CMD_BASE
    }
}

pub mod args {
    /// SEND_IF_COND argument: 2.7-3.6V and check pattern 0xAA.
    pub const IF_COND_PATTERN: u32 = 0x0000_01AA;
    /// Mask of the echoed voltage and check pattern in the R7 payload.
    pub const IF_COND_ECHO_MASK: u32 = 0x0000_0FFF;
    /// Host capacity support bit of ACMD41.
    pub const HCS: u32 = 0x4000_0000;
    /// Block length forced by SET_BLOCKLEN.
    pub const BLOCK_LEN: u32 = super::BLOCK_SIZE as u32;
}

pub mod crcs {
    /// Precomputed frame CRC of `CMD0(0)`.
    pub const CMD0: u8 = 0x95;
    /// Precomputed frame CRC of `CMD8(0x1AA)`.
    pub const CMD8: u8 = 0x87;
    /// Frame CRC for every other command, ignored while CRC checking is off.
    pub const NONE: u8 = 0x00;
}

pub mod tokens {
    /// Card keeps MISO high when it is not busy.
    pub const AVAILABLE: u8 = 0xFF;
    /// Start data token for read or write single block.
    pub const DATA_START_BLOCK: u8 = 0xFE;
    /// Stop token for write multiple blocks.
    pub const STOP_TRAN: u8 = 0xFD;
    /// Start data token for write multiple blocks.
    pub const WRITE_MULTIPLE: u8 = 0xFC;
    /// Mask for data response tokens after a write block operation.
    pub const DATA_RES_MASK: u8 = 0x0F;
    /// Write data accepted token.
    pub const DATA_RES_ACCEPTED: u8 = 0x05;
}
