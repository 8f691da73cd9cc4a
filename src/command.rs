use crate::{
    config::SdSpiConfig,
    consts::{commands, crcs},
    debug,
    response::{R1Response, Response},
    transport::{CardBus, SpeedControl, TickCounter},
    warn, Error,
};

use embedded_hal::blocking::spi::Transfer;
use switch_hal::OutputSwitch;

/// Six byte command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    cmd: u8,
    arg: u32,
    crc: u8,
}

impl CommandFrame {
    /// Frame size on the wire.
    pub const SIZE: usize = 6;

    /// Builds the frame, only the CRC-checked commands get a real CRC.
    pub fn new(cmd: u8, arg: u32) -> Self {
        let crc = match cmd {
            commands::CMD0 => crcs::CMD0,
            commands::CMD8 => crcs::CMD8,
            _ => crcs::NONE,
        };

        CommandFrame { cmd, arg, crc }
    }

    /// Wire representation, argument is big-endian.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let arg = self.arg.to_be_bytes();
        [self.cmd, arg[0], arg[1], arg[2], arg[3], self.crc]
    }
}

/// Commands answered with R1 followed by a 32 bit payload (R3/R7).
fn has_extended_response(cmd: u8) -> bool {
    cmd == commands::CMD8 || cmd == commands::CMD58
}

/// Requires a ready R1 without error flags.
pub(crate) fn ensure_ready<S>(response: Response, cmd: u8) -> Result<(), Error<S>> {
    match response {
        Response::NotReady => Err(Error::TimeoutWaitAvailable),
        Response::R1(r1) if !r1.is_valid() => Err(Error::TimeoutCommand(commands::index(cmd))),
        Response::R1(r1) if r1 == R1Response::READY_STATE => Ok(()),
        other => Err(Error::ErrorCommand(commands::index(cmd), other.raw())),
    }
}

impl<Spi, Cs, Timer, Config> CardBus<Spi, Cs, Timer, Config>
where
    Spi: Transfer<u8> + SpeedControl,
    Cs: OutputSwitch,
    Timer: TickCounter,
    Config: SdSpiConfig,
{
    /// Send command.
    ///
    /// `tries` - count of polls for a valid R1.
    /// `extended` - destination of the R3/R7 payload of CMD8 and CMD58.
    pub(crate) fn send_command(
        &self,
        cmd: u8,
        arg: u32,
        tries: usize,
        extended: Option<&mut u32>,
    ) -> Response {
        let index = commands::index(cmd);

        if cmd != commands::CMD0 && !self.wait_ready() {
            warn!("Card busy, CMD{} not sent", index);
            return Response::NotReady;
        }

        self.send_slice(&CommandFrame::new(cmd, arg).to_bytes());

        let mut r1 = R1Response(0xFF);
        for _ in 0..tries {
            r1 = R1Response(self.receive());

            if r1.is_valid() {
                break;
            }
        }

        // Some cards need many more cycles to acknowledge the reset.
        if cmd == commands::CMD0 {
            for _ in 0..Config::RESET_IDLE_POLLS {
                if r1 == R1Response::IN_IDLE_STATE {
                    break;
                }
                r1 = R1Response(self.receive());
            }
        }

        debug!("CMD{}(0x{:08X}) -> 0x{:02X}", index, arg, r1.0);

        if has_extended_response(cmd) {
            let mut payload = [0u8; 4];
            self.receive_slice(&mut payload);

            match extended {
                Some(out) => *out = u32::from_be_bytes(payload),
                None => {
                    warn!("CMD{} payload has no destination", index);
                    return Response::PayloadDropped;
                }
            }
        }

        Response::R1(r1)
    }

    /// Send a command with the default R1 attempts.
    pub(crate) fn command(&self, cmd: u8, arg: u32) -> Response {
        self.send_command(cmd, arg, Config::CMD_RESPONSE_ATTEMPTS, None)
    }

    /// Send APP_CMD followed by an application specific command.
    pub(crate) fn app_command(&self, cmd: u8, arg: u32) -> Response {
        self.command(commands::CMD55, 0x0000_0000);
        self.command(cmd, arg)
    }
}
