use crate::{
    command::ensure_ready,
    config::SdSpiConfig,
    consts::{commands, tokens, BLOCK_SIZE},
    crc::crc16,
    csd::CsdData,
    transport::{CardBus, SpeedControl, TickCounter},
    warn, Error,
};

use embedded_hal::blocking::spi::Transfer;
use switch_hal::OutputSwitch;

/// Error type alias.
type ErrorFor<Cs> = Error<<Cs as OutputSwitch>::Error>;

impl<Spi, Cs, Timer, Config> CardBus<Spi, Cs, Timer, Config>
where
    Spi: Transfer<u8> + SpeedControl,
    Cs: OutputSwitch,
    Timer: TickCounter,
    Config: SdSpiConfig,
{
    /// Read one data block into `data`.
    ///
    /// Nothing past the first non-idle byte is consumed unless it is the start token.
    pub(crate) fn read_block(&self, data: &mut [u8]) -> Result<(), ErrorFor<Cs>> {
        let ticks = Config::READ_TOKEN_TIMEOUT_TICKS;
        let token = match self.poll_until(ticks, |byte| byte != tokens::AVAILABLE) {
            Some(token) => token,
            None => return Err(Error::TimeoutReadBuffer),
        };

        if token != tokens::DATA_START_BLOCK {
            warn!("Unexpected data token: 0x{:02X}", token);
            return Err(Error::ReadError(token));
        }

        self.receive_slice(data);

        let card_crc = u16::from_be_bytes([self.receive(), self.receive()]);

        if Config::VERIFY_DATA_CRC {
            let host_crc = crc16(data);

            if card_crc != host_crc {
                return Err(Error::CrcError(card_crc, host_crc));
            }
        }

        Ok(())
    }

    /// Write one data block framed by `token`.
    pub(crate) fn write_block(&self, token: u8, data: &[u8]) -> Result<(), ErrorFor<Cs>> {
        let crc = if Config::VERIFY_DATA_CRC {
            crc16(data)
        } else {
            0x0000
        };

        self.wait_ready();
        self.send(token);
        self.send_slice(data);
        self.send_slice(&crc.to_be_bytes());

        let response = self.receive();

        // Programming finishes before the next command.
        if !self.wait_ready() {
            warn!("Card still busy after write");
        }

        if (response & tokens::DATA_RES_MASK) != tokens::DATA_RES_ACCEPTED {
            Err(Error::WriteError(response))
        } else {
            Ok(())
        }
    }

    /// Ends a multiple block read.
    fn stop_transmission(&self) {
        self.command(commands::CMD12, 0x0000_0000);
        self.skip_byte();

        if !self.wait_ready() {
            warn!("Card busy after STOP_TRANSMISSION");
        }
    }

    /// Read the Card Specific Data register.
    pub(crate) fn read_csd(&self, data: &mut CsdData) -> Result<(), ErrorFor<Cs>> {
        self.cs_scope(|s| {
            ensure_ready(s.command(commands::CMD9, 0x0000_0000), commands::CMD9)?;
            s.read_block(data)
        })
    }

    /// Read `buf.len() / BLOCK_SIZE` sectors starting at `sector`.
    pub(crate) fn read_sectors(&self, buf: &mut [u8], sector: u32) -> Result<(), ErrorFor<Cs>> {
        self.cs_scope(|s| {
            if buf.len() == BLOCK_SIZE {
                ensure_ready(s.command(commands::CMD17, sector), commands::CMD17)?;
                s.read_block(buf)
            } else {
                ensure_ready(s.command(commands::CMD18, sector), commands::CMD18)?;
                for chunk in buf.chunks_mut(BLOCK_SIZE) {
                    s.read_block(chunk)?;
                }
                s.stop_transmission();

                Ok(())
            }
        })
    }

    /// Write `buf.len() / BLOCK_SIZE` sectors starting at `sector`.
    pub(crate) fn write_sectors(&self, buf: &[u8], sector: u32) -> Result<(), ErrorFor<Cs>> {
        self.cs_scope(|s| {
            if buf.len() == BLOCK_SIZE {
                ensure_ready(s.command(commands::CMD24, sector), commands::CMD24)?;
                s.write_block(tokens::DATA_START_BLOCK, buf)
            } else {
                ensure_ready(s.command(commands::CMD25, sector), commands::CMD25)?;
                for block in buf.chunks(BLOCK_SIZE) {
                    s.write_block(tokens::WRITE_MULTIPLE, block)?;
                }
                s.send(tokens::STOP_TRAN);
                s.skip_byte();

                if !s.wait_ready() {
                    warn!("Card busy after stop token");
                }

                Ok(())
            }
        })
    }
}
