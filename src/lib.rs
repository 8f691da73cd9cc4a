//! microSD block device driver written in Embedded Rust.
//!
//! This crate is intended to allow you to init/read/write SD/MMC cards by SPI bus
//! as fixed 512-byte sector devices.
//!
//! The driver detects MMC v3, SD v1 and SD v2+ (SDSC and SDHC/SDXC) cards and
//! exposes them through a flat block device API ([`SdSpi::read`],
//! [`SdSpi::write`], ...) and through [`DiskioDevice`].
//!
//! ## Features
//!
//! * `log` (default): log messages through the `log` crate.
//! * `defmt-log`: log messages over defmt instead, disable default features.

#![cfg_attr(not(test), no_std)]

mod block;
mod command;
mod config;
mod consts;
mod crc;
mod csd;
mod init;
mod response;
mod session;
mod transport;

#[cfg(test)]
mod sim;

#[cfg(feature = "log")]
pub(crate) use log::{debug, error, info, warn};

#[cfg(feature = "defmt-log")]
pub(crate) use defmt::{debug, error, info, warn};

#[cfg(all(feature = "defmt-log", feature = "log"))]
compile_error!("Cannot enable both log and defmt-log");

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
compile_error!("Must enable either log or defmt-log");

pub use crate::{
    config::{DefaultSdSpiConfig, SdSpiConfig},
    consts::BLOCK_SIZE,
    csd::{CapacityProvider, Csd, CsdData, CsdV1, CsdV2},
    response::{Ocr, R1Response, Response},
    session::{CardSession, CardVersion, DiskStatus},
    transport::{BusSpeed, SpeedControl, TickCounter},
};
pub use diskio::{DiskioDevice, Error as DiskioError, IoctlCmd, Lba, Status, StatusFlag};

use crate::transport::CardBus;

use embedded_hal::blocking::spi::Transfer;
use size::Size;
use switch_hal::OutputSwitch;

/// [`SdSpi`] hardware error.
///
/// `S` - select switch error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<S> {
    /// Couldn't set a select.
    SelectError(S),
    /// No response when waiting for the card to not be busy.
    TimeoutWaitAvailable,
    /// No response when executing this command.
    TimeoutCommand(u8),
    /// Command answered with error flags (command, R1).
    ErrorCommand(u8, u8),
    /// SEND_IF_COND echoed a different check pattern.
    CheckPatternMismatch(u32),
    /// No start token when reading data from the card.
    TimeoutReadBuffer,
    /// Card sent an error token instead of data.
    ReadError(u8),
    /// CRC mismatch (card, host).
    CrcError(u16, u16),
    /// Card didn't accept written data (data response).
    WriteError(u8),
    /// Couldn't find the card.
    CardNotFound,
}

/// Result of the flat block device operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum DiskError {
    /// Any hardware failure: timeout, bad response or rejected data.
    Io,
    /// Card is not initialized.
    NotReady,
    /// Wrong unit, zero sectors or a buffer too small for the request.
    ParamError,
}

/// SD Card SPI driver.
///
/// `Spi` - SPI, able to switch its clock rate.
/// `Cs` - Chip select output switch.
/// `Timer` - Tick counter for timeouts.
/// `Config` - Config implementation of driver config trait.
///
/// Calls must be serialized, the driver is not `Sync`.
pub struct SdSpi<Spi, Cs, Timer, Config = DefaultSdSpiConfig> {
    bus: CardBus<Spi, Cs, Timer, Config>,
    session: CardSession,
}

impl<Spi, Cs, Timer, Config> SdSpi<Spi, Cs, Timer, Config>
where
    Spi: Transfer<u8> + SpeedControl,
    Cs: OutputSwitch,
    Timer: TickCounter,
    Config: SdSpiConfig,
{
    /// Only one card per driver.
    const UNIT: u8 = 0;

    /// Creates a new [`SdSpi<Spi, Cs, Timer, Config>`].
    ///
    /// `spi` - SPI instance.
    /// `cs` - chip select output switch.
    /// `timer` - tick counter.
    pub fn new(spi: Spi, cs: Cs, timer: Timer) -> Self {
        SdSpi {
            bus: CardBus::new(spi, cs, timer),
            session: CardSession::new(),
        }
    }

    /// Destroys the driver and returns the peripherals.
    pub fn release(self) -> (Spi, Cs, Timer) {
        self.bus.release()
    }

    /// Negotiated card state.
    pub fn session(&self) -> &CardSession {
        &self.session
    }

    /// Card status.
    pub fn status(&self) -> DiskStatus {
        self.session.status()
    }

    /// Runs the power up negotiation unless the card is already ready.
    ///
    /// A ready session is returned as is without touching the card, call
    /// [`SdSpi::reset`] first to force a new negotiation.
    pub fn initialize(&mut self) -> DiskStatus {
        if self.session.is_ready() {
            warn!("SD already is initialized");
        } else {
            // failure is reported through the status
            let _ = self.bus.negotiate(&mut self.session);
        }

        self.session.status()
    }

    /// Forgets the negotiated card, the next [`SdSpi::initialize`] starts over.
    pub fn reset(&mut self) {
        info!("SD reset, was: {:?}", self.session.status());
        self.session.reset();
    }

    /// Validate request, returns the transfer size in bytes.
    fn validate_request(&self, unit: u8, buf_len: usize, count: u32) -> Result<usize, DiskError> {
        if !self.session.is_ready() {
            return Err(DiskError::NotReady);
        }

        match transfer_len(count) {
            Some(len) if unit == Self::UNIT && count != 0 && len <= buf_len => Ok(len),
            _ => {
                error!(
                    "SD invalid request, unit: {}, count: {}, buffer: {}",
                    unit, count, buf_len
                );
                Err(DiskError::ParamError)
            }
        }
    }

    /// Read `count` sectors starting at `sector` into `buf`.
    pub fn read(&self, unit: u8, buf: &mut [u8], sector: u32, count: u32) -> Result<(), DiskError> {
        let len = self.validate_request(unit, buf.len(), count)?;

        self.bus.read_sectors(&mut buf[..len], sector).map_err(|_| {
            error!("SD read failed, sector: {}, count: {}", sector, count);
            DiskError::Io
        })
    }

    /// Write `count` sectors from `buf` starting at `sector`.
    pub fn write(&self, unit: u8, buf: &[u8], sector: u32, count: u32) -> Result<(), DiskError> {
        let len = self.validate_request(unit, buf.len(), count)?;

        self.bus.write_sectors(&buf[..len], sector).map_err(|_| {
            error!("SD write failed, sector: {}, count: {}", sector, count);
            DiskError::Io
        })
    }

    /// Control commands are not supported.
    pub fn ioctl(&self, _unit: u8, _cmd: u8, _buf: &mut [u8]) -> Result<(), DiskError> {
        Err(DiskError::Io)
    }

    /// Read and decode the Card Specific Data register.
    pub fn read_csd(&self) -> Result<Csd, DiskError> {
        let version = self.session.version().ok_or(DiskError::NotReady)?;
        let mut csd_data: CsdData = Default::default();

        self.bus.read_csd(&mut csd_data).map_err(|_| {
            error!("SD CSD read failed");
            DiskError::Io
        })?;

        Ok(Csd::parse(csd_data, version))
    }

    /// Card capacity from the CSD register.
    pub fn card_capacity(&self) -> Result<Size, DiskError> {
        self.read_csd().map(|csd| csd.card_capacity())
    }
}

impl<Spi, Cs, Timer, Config> SdSpi<Spi, Cs, Timer, Config>
where
    Spi: Transfer<u8> + SpeedControl,
    Cs: OutputSwitch,
    Timer: TickCounter,
    Config: SdSpiConfig,
{
    /// Validate buffer for read/write.
    fn validate_buffer_len(buf_len: usize) -> Result<usize, DiskioError<Error<Cs::Error>>> {
        if buf_len == 0 || buf_len % BLOCK_SIZE != 0 {
            error!(
                "SD invalid buffer, length: {}, block size: {}",
                buf_len, BLOCK_SIZE
            );
            Err(DiskioError::InvalidArgument)
        } else {
            Ok(buf_len / BLOCK_SIZE)
        }
    }

    /// Validate initialized and convert lba.
    fn validate_lba(&self, lba: Lba) -> Result<u32, DiskioError<Error<Cs::Error>>> {
        if !self.session.is_ready() {
            return Err(DiskioError::NotInitialized);
        }

        u32::try_from(lba).map_err(|_| DiskioError::InvalidArgument)
    }
}

/// Byte length of `count` sectors, `None` when it does not fit the address space.
fn transfer_len(count: u32) -> Option<usize> {
    usize::try_from(count)
        .ok()
        .and_then(|count| count.checked_mul(BLOCK_SIZE))
}

impl<Spi, Cs, Timer, Config> DiskioDevice for SdSpi<Spi, Cs, Timer, Config>
where
    Spi: Transfer<u8> + SpeedControl,
    Cs: OutputSwitch,
    Cs::Error: core::fmt::Debug,
    Timer: TickCounter,
    Config: SdSpiConfig,
{
    type HardwareError = Error<Cs::Error>;

    fn status(&self) -> Status {
        if self.session.is_ready() {
            Status::default()
        } else {
            StatusFlag::NotInitialized.into()
        }
    }

    fn reset(&mut self) {
        info!("SD reset invoked");
        self.session.reset();
    }

    fn initialize(&mut self) -> Result<(), DiskioError<Self::HardwareError>> {
        if self.session.is_ready() {
            warn!("SD already is initialized");
            return Err(DiskioError::AlreadyInitialized);
        }

        self.bus
            .negotiate(&mut self.session)
            .map(|_| ())
            .map_err(|_| DiskioError::Hardware(Error::CardNotFound))
    }

    fn read(&self, buf: &mut [u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        Self::validate_buffer_len(buf.len())?;
        let sector = self.validate_lba(lba)?;

        self.bus
            .read_sectors(buf, sector)
            .map_err(DiskioError::Hardware)
    }

    fn write(&self, buf: &[u8], lba: Lba) -> Result<(), DiskioError<Self::HardwareError>> {
        Self::validate_buffer_len(buf.len())?;
        let sector = self.validate_lba(lba)?;

        self.bus
            .write_sectors(buf, sector)
            .map_err(DiskioError::Hardware)
    }

    fn ioctl(&self, _cmd: IoctlCmd) -> Result<(), DiskioError<Self::HardwareError>> {
        Err(DiskioError::NotSupported)
    }
}
