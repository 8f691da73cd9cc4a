use crate::{
    command::ensure_ready,
    config::SdSpiConfig,
    consts::{args, commands, tokens},
    error, info,
    response::{Ocr, R1Response, Response},
    session::{CardSession, CardVersion},
    transport::{BusSpeed, CardBus, SpeedControl, TickCounter},
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
    /// Power up sequence: the card needs clock cycles while deselected.
    fn power_up(&self) -> Result<(), ErrorFor<Cs>> {
        self.deselect()?;
        self.set_speed(BusSpeed::Enumeration);

        for _ in 0..Config::POWER_UP_CYCLES {
            self.send(tokens::AVAILABLE);
        }

        self.set_speed(BusSpeed::Operating);

        Ok(())
    }

    /// Enter SD to SPI mode.
    fn enter_spi_mode(&self) -> Result<(), ErrorFor<Cs>> {
        info!("Enter to SPI mode for SD");

        let response = self.send_command(
            commands::CMD0,
            0x0000_0000,
            Config::RESET_RESPONSE_ATTEMPTS,
            None,
        );

        if response.is(R1Response::IN_IDLE_STATE) {
            Ok(())
        } else {
            warn!(
                "Wrong response from CMD{}: 0x{:02X}",
                commands::index(commands::CMD0),
                response.raw()
            );
            Err(Error::TimeoutCommand(commands::index(commands::CMD0)))
        }
    }

    /// Repeats `op` while the card reports idle state.
    ///
    /// Returns the last response and whether every attempt was used.
    fn retry_while_idle<F>(&self, mut response: Response, op: F) -> (Response, bool)
    where
        F: Fn(&Self) -> Response,
    {
        let mut attempts = Config::INIT_ATTEMPTS;

        while attempts > 0 && response.is(R1Response::IN_IDLE_STATE) {
            attempts -= 1;
            response = op(self);
        }

        (response, attempts == 0)
    }

    /// Force 512 byte blocks.
    fn set_block_length(&self) -> Result<(), ErrorFor<Cs>> {
        let response = self.command(commands::CMD16, args::BLOCK_LEN);
        ensure_ready(response, commands::CMD16)
    }

    /// Cards without SEND_IF_COND: SD v1, or MMC v3 as a fallback.
    fn init_legacy(&self) -> Result<CardVersion, ErrorFor<Cs>> {
        info!("Card rejected SEND_IF_COND, trying SD v1");

        let send_op_cond = |s: &Self| s.app_command(commands::ACMD41, 0x0000_0000);
        let (response, _) = self.retry_while_idle(send_op_cond(self), send_op_cond);

        let version = if response.is(R1Response::READY_STATE) {
            CardVersion::SdV1
        } else {
            let raw = response.raw();
            warn!("ACMD41 not accepted: 0x{:02X}, trying MMC v3", raw);

            let mmc_op_cond = |s: &Self| s.command(commands::CMD1, 0x0000_0000);
            let (response, _) = self.retry_while_idle(mmc_op_cond(self), mmc_op_cond);

            if !response.is(R1Response::READY_STATE) {
                return Err(Error::TimeoutCommand(commands::index(commands::CMD1)));
            }

            CardVersion::MmcV3
        };

        self.set_block_length()?;

        Ok(version)
    }

    /// Cards answering SEND_IF_COND: SD v2 and later.
    fn init_v2(&self, echo: u32) -> Result<CardVersion, ErrorFor<Cs>> {
        info!("Verifying SD v2 interface condition");

        if (echo & args::IF_COND_ECHO_MASK) != args::IF_COND_PATTERN {
            return Err(Error::CheckPatternMismatch(echo));
        }

        // A card leaving idle on the very last attempt still counts as a timeout.
        let idle = Response::R1(R1Response::IN_IDLE_STATE);
        let op_cond = |s: &Self| s.app_command(commands::ACMD41, args::HCS);
        let (response, exhausted) = self.retry_while_idle(idle, op_cond);

        if exhausted || !response.is(R1Response::READY_STATE) {
            return Err(Error::TimeoutCommand(commands::index(commands::ACMD41)));
        }

        let mut ocr = 0;
        let tries = Config::CMD_RESPONSE_ATTEMPTS;
        let response = self.send_command(commands::CMD58, 0x0000_0000, tries, Some(&mut ocr));
        ensure_ready(response, commands::CMD58)?;

        if Ocr(ocr).card_capacity_status() {
            info!("Block addressed card, block length is fixed");
        } else {
            self.set_block_length()?;
        }

        Ok(CardVersion::SdV2Plus)
    }

    /// Detect the card family and configure 512 byte blocks.
    fn check_type(&self) -> Result<CardVersion, ErrorFor<Cs>> {
        self.enter_spi_mode()?;

        let mut echo = 0;
        let response = self.send_command(
            commands::CMD8,
            args::IF_COND_PATTERN,
            Config::IF_COND_RESPONSE_ATTEMPTS,
            Some(&mut echo),
        );

        if response.is(R1Response::IN_IDLE_STATE) {
            self.init_v2(echo)
        } else {
            self.init_legacy()
        }
    }

    fn power_up_and_detect(&self) -> Result<CardVersion, ErrorFor<Cs>> {
        self.power_up()?;
        self.cs_scope(Self::check_type)
    }

    /// Initialize SD, the session turns ready only on success.
    pub(crate) fn negotiate(&self, session: &mut CardSession) -> Result<CardVersion, ErrorFor<Cs>> {
        info!("SD initialize started");

        let result = self.power_up_and_detect();

        match result {
            Ok(version) => {
                info!("SD successfully initialized, version: {:?}", version);
                session.mark_ready(version);
            }
            Err(_) => {
                error!("Failed to initialize SD");
                session.reset();
            }
        }

        result
    }
}
