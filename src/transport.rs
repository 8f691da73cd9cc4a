use crate::{config::SdSpiConfig, consts::tokens, debug, Error};

use core::{cell::RefCell, marker::PhantomData};
use embedded_hal::blocking::spi::Transfer;
use switch_hal::OutputSwitch;

/// SPI clock rate selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum BusSpeed {
    /// Slow clock (100-400 kHz) used while the card is enumerated.
    Enumeration,
    /// Full operating clock.
    Operating,
}

/// Lets the driver switch the SPI clock rate.
pub trait SpeedControl {
    /// Reconfigures the peripheral. Returns once the new rate is effective.
    fn set_speed(&mut self, speed: BusSpeed);
}

/// Free-running tick counter used for bounded waits.
pub trait TickCounter {
    /// Resets the counter to zero and starts it.
    fn start(&mut self);
    /// Ticks elapsed since [`TickCounter::start`].
    fn ticks(&mut self) -> u32;
    /// Stops the counter.
    fn stop(&mut self);
}

/// Byte level access to the card.
///
/// `Spi` - SPI.
/// `Cs` - Chip select output switch.
/// `Timer` - Tick counter for timeouts.
/// `Config` - Config implementation of driver config trait.
pub struct CardBus<Spi, Cs, Timer, Config> {
    spi: RefCell<Spi>,
    cs: RefCell<Cs>,
    timer: RefCell<Timer>,
    config: PhantomData<Config>,
}

impl<Spi, Cs, Timer, Config> CardBus<Spi, Cs, Timer, Config>
where
    Spi: Transfer<u8> + SpeedControl,
    Cs: OutputSwitch,
    Timer: TickCounter,
    Config: SdSpiConfig,
{
    /// Receive transfer token.
    const RECEIVE_TRANSFER_TOKEN: u8 = 0xFF;

    pub(crate) fn new(spi: Spi, cs: Cs, timer: Timer) -> Self {
        CardBus {
            spi: RefCell::new(spi),
            cs: RefCell::new(cs),
            timer: RefCell::new(timer),
            config: PhantomData::<Config>,
        }
    }

    /// Returns the owned peripherals.
    pub(crate) fn release(self) -> (Spi, Cs, Timer) {
        (
            self.spi.into_inner(),
            self.cs.into_inner(),
            self.timer.into_inner(),
        )
    }

    /// Activate chip select.
    pub(crate) fn select(&self) -> Result<(), Error<Cs::Error>> {
        self.cs.borrow_mut().on().map_err(Error::SelectError)
    }

    /// Deactivate chip select.
    pub(crate) fn deselect(&self) -> Result<(), Error<Cs::Error>> {
        self.cs.borrow_mut().off().map_err(Error::SelectError)
    }

    /// Runs `f` with the card selected, the card is deselected on every outcome.
    pub(crate) fn cs_scope<T, F>(&self, f: F) -> Result<T, Error<Cs::Error>>
    where
        F: FnOnce(&Self) -> Result<T, Error<Cs::Error>>,
    {
        self.select()?;
        let result = f(self);
        let released = self.deselect();

        let value = result?;
        released.map(|_| value)
    }

    pub(crate) fn set_speed(&self, speed: BusSpeed) {
        debug!("SD bus speed: {:?}", speed);
        self.spi.borrow_mut().set_speed(speed);
    }

    /// Send one byte and receive one byte.
    ///
    /// A failed peripheral transfer reads as an idle line.
    pub(crate) fn exchange(&self, data: u8) -> u8 {
        let mut buf = [data];
        match self.spi.borrow_mut().transfer(&mut buf) {
            Ok(received) => received[0],
            Err(_) => {
                debug!("SPI transfer failed, sent: 0x{:02X}", data);
                tokens::AVAILABLE
            }
        }
    }

    /// Receive a byte from the SD card by clocking in an 0xFF byte.
    pub(crate) fn receive(&self) -> u8 {
        self.exchange(Self::RECEIVE_TRANSFER_TOKEN)
    }

    /// Send a byte to the SD card.
    pub(crate) fn send(&self, data: u8) {
        self.exchange(data);
    }

    /// Receive a slice from the SD card.
    pub(crate) fn receive_slice(&self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte = self.receive();
        }
    }

    /// Send a slice to the SD card.
    pub(crate) fn send_slice(&self, data: &[u8]) {
        for byte in data.iter() {
            self.send(*byte);
        }
    }

    /// Skip byte.
    pub(crate) fn skip_byte(&self) {
        self.receive();
    }

    /// Polls received bytes until `accept` matches one or `budget` ticks elapse.
    pub(crate) fn poll_until<F: Fn(u8) -> bool>(&self, budget: u32, accept: F) -> Option<u8> {
        let mut timer = self.timer.borrow_mut();
        let mut found = None;

        timer.start();
        while timer.ticks() < budget {
            let byte = self.receive();

            if accept(byte) {
                found = Some(byte);
                break;
            }
        }
        timer.stop();

        found
    }

    /// Wait available state of card.
    pub(crate) fn wait_ready(&self) -> bool {
        let ticks = Config::READY_TIMEOUT_TICKS;
        let idle = self.poll_until(ticks, |byte| byte == tokens::AVAILABLE);
        idle.is_some()
    }
}
