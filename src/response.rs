use crate::consts::tokens;

use bitfield::bitfield;

bitfield! {
    /// R1 response bitset.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct R1Response(u8);
    impl Debug;
    pub in_idle_state, _: 0;
    pub erase_reset, _: 1;
    pub illegal_command, _: 2;
    pub command_crc_error, _: 3;
    pub erase_sequence_error, _: 4;
    pub address_error, _: 5;
    pub parameter_error, _: 6;
    pub unresolved, _: 7;
}

impl R1Response {
    /// Card finished initialization, no error flags.
    pub const READY_STATE: R1Response = R1Response(0x00);
    /// Card is in idle state, no error flags.
    pub const IN_IDLE_STATE: R1Response = R1Response(0x01);

    /// A valid R1 always has the top bit clear.
    pub fn is_valid(&self) -> bool {
        !self.unresolved()
    }
}

bitfield! {
    /// Operation Conditions Register, R3 payload of READ_OCR.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Ocr(u32);
    impl Debug;
    pub u16, voltage_window, _: 23, 15;
    pub card_capacity_status, _: 30;
    pub power_up_complete, _: 31;
}

/// Outcome of a single command exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// The card never released the bus, the frame was not sent.
    NotReady,
    /// An extended response was read but the caller gave no destination for it.
    PayloadDropped,
    /// Collected status byte, unresolved when every poll returned a busy byte.
    R1(R1Response),
}

impl Response {
    /// Raw status byte, busy variants report `0xFF`.
    pub fn raw(&self) -> u8 {
        match self {
            Response::NotReady | Response::PayloadDropped => tokens::AVAILABLE,
            Response::R1(r1) => r1.0,
        }
    }

    /// Checks a resolved R1 against an expected value.
    pub fn is(&self, expected: R1Response) -> bool {
        matches!(self, Response::R1(r1) if *r1 == expected)
    }
}
