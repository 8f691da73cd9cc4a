/// Represents config for [`SdSpi`](crate::SdSpi).
///
/// Every bound encodes a card timing tolerance; ticks are counted by the
/// injected [`TickCounter`](crate::TickCounter).
pub trait SdSpiConfig {
    /// Dummy bytes clocked with the card deselected at power up.
    const POWER_UP_CYCLES: usize;
    /// Tick budget for the card to release MISO (read `0xFF`).
    const READY_TIMEOUT_TICKS: u32;
    /// Tick budget for the start token of a data block.
    const READ_TOKEN_TIMEOUT_TICKS: u32;
    /// Max attempts to read R1 of GO_IDLE_STATE.
    const RESET_RESPONSE_ATTEMPTS: usize;
    /// Extra polls for the idle acknowledgement of GO_IDLE_STATE.
    const RESET_IDLE_POLLS: usize;
    /// Max attempts to read R1 of SEND_IF_COND.
    const IF_COND_RESPONSE_ATTEMPTS: usize;
    /// Max attempts to read R1 of any other command.
    const CMD_RESPONSE_ATTEMPTS: usize;
    /// Max repetitions of an initialization command while the card is idle.
    const INIT_ATTEMPTS: usize;
    /// Check CRC16 of received blocks and send CRC16 of written ones.
    const VERIFY_DATA_CRC: bool;
}

/// Default implementation of [`SdSpiConfig`](crate::SdSpiConfig).
pub struct DefaultSdSpiConfig;

impl SdSpiConfig for DefaultSdSpiConfig {
    const POWER_UP_CYCLES: usize = 100;
    const READY_TIMEOUT_TICKS: u32 = 500;
    const READ_TOKEN_TIMEOUT_TICKS: u32 = 500;
    const RESET_RESPONSE_ATTEMPTS: usize = 100;
    const RESET_IDLE_POLLS: usize = 1000;
    const IF_COND_RESPONSE_ATTEMPTS: usize = 100;
    const CMD_RESPONSE_ATTEMPTS: usize = 10;
    const INIT_ATTEMPTS: usize = 10000;
    const VERIFY_DATA_CRC: bool = false;
}
