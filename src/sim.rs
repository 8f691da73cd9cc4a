//! Simulated SD card for unit tests.
//!
//! The card answers on the byte level the way a real card in SPI mode does:
//! frames are decoded from MOSI, responses are queued on MISO, and the idle
//! line reads `0xFF`.

use crate::{
    config::{DefaultSdSpiConfig, SdSpiConfig},
    consts::{args, tokens, BLOCK_SIZE},
    crc::crc16,
    transport::{BusSpeed, CardBus, SpeedControl, TickCounter},
    SdSpi,
};

use embedded_hal::blocking::spi::Transfer;
use std::{
    cell::RefCell,
    collections::{BTreeMap, VecDeque},
    rc::Rc,
};
use switch_hal::OutputSwitch;

pub type SimBus = CardBus<SimSpi, SimCs, SimTimer, DefaultSdSpiConfig>;
pub type SimDriver = SdSpi<SimSpi, SimCs, SimTimer>;
pub type Shared = Rc<RefCell<Card>>;

/// Peripheral failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimError;

/// Chip select transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Select,
    Deselect,
}

/// Chip select history of a single bracketed operation.
pub const SELECTED_ONCE: [Event; 2] = [Event::Select, Event::Deselect];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Mmc,
    SdV1,
    SdV2 { high_capacity: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Power {
    Native,
    Idle,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Rx {
    Idle,
    Command(Vec<u8>),
    AwaitToken { multi: bool, sector: u32 },
    Data {
        multi: bool,
        sector: u32,
        buf: Vec<u8>,
    },
}

/// Card content before anything was written.
pub fn sector_pattern(sector: u32) -> Vec<u8> {
    (0..BLOCK_SIZE)
        .map(|i| (sector as u8).wrapping_mul(31).wrapping_add(i as u8))
        .collect()
}

pub struct Card {
    kind: Kind,
    init_polls: usize,
    echo: u32,
    data_response: u8,
    response_delay: usize,
    overrides: BTreeMap<u8, u8>,
    hold_busy: bool,
    fail_transfers: bool,
    fail_select: bool,
    stall_reads_after: Option<usize>,
    power: Power,
    app_cmd: bool,
    rx: Rx,
    output: VecDeque<u8>,
    multi_read: Option<u32>,
    blocks_streamed: usize,
    storage: BTreeMap<u32, Vec<u8>>,
    commands: Vec<(u8, u32, u8)>,
    write_tokens: Vec<u8>,
    last_crc: [u8; 2],
    exchanges: usize,
    deselected_exchanges: usize,
    cs_events: Vec<Event>,
    selected: bool,
    speeds: Vec<BusSpeed>,
    timer_running: bool,
    ticks: u32,
}

impl Card {
    fn new(kind: Kind, init_polls: usize) -> Self {
        Card {
            kind,
            init_polls,
            echo: args::IF_COND_PATTERN,
            data_response: 0xE5,
            response_delay: 1,
            overrides: BTreeMap::new(),
            hold_busy: false,
            fail_transfers: false,
            fail_select: false,
            stall_reads_after: None,
            power: Power::Native,
            app_cmd: false,
            rx: Rx::Idle,
            output: VecDeque::new(),
            multi_read: None,
            blocks_streamed: 0,
            storage: BTreeMap::new(),
            commands: Vec::new(),
            write_tokens: Vec::new(),
            last_crc: [0xFF; 2],
            exchanges: 0,
            deselected_exchanges: 0,
            cs_events: Vec::new(),
            selected: false,
            speeds: Vec::new(),
            timer_running: false,
            ticks: 0,
        }
    }

    /// SD v1 card that answers ACMD41 with idle `init_polls` times.
    pub fn sd_v1(init_polls: usize) -> Self {
        Self::new(Kind::SdV1, init_polls)
    }

    /// SD v2 card, block addressed when `high_capacity`.
    pub fn sd_v2(high_capacity: bool) -> Self {
        Self::new(Kind::SdV2 { high_capacity }, 2)
    }

    /// MMC v3 card that answers CMD1 with idle `init_polls` times.
    pub fn mmc(init_polls: usize) -> Self {
        Self::new(Kind::Mmc, init_polls)
    }

    pub fn with_init_polls(mut self, init_polls: usize) -> Self {
        self.init_polls = init_polls;
        self
    }

    pub fn with_echo(mut self, echo: u32) -> Self {
        self.echo = echo;
        self
    }

    /// Answers `cmd` (index) with `r1` instead of the regular response.
    pub fn with_override(mut self, cmd: u8, r1: u8) -> Self {
        self.overrides.insert(cmd, r1);
        self
    }

    pub fn with_data_response(mut self, response: u8) -> Self {
        self.data_response = response;
        self
    }

    pub fn power_on_idle(&mut self) {
        self.power = Power::Idle;
    }

    pub fn power_on_ready(&mut self) {
        self.power = Power::Ready;
    }

    /// Queues raw bytes on MISO.
    pub fn script(&mut self, bytes: &[u8]) {
        self.output.extend(bytes.iter().copied());
    }

    /// Busy line (`0x00`) whenever nothing else is queued.
    pub fn hold_busy(&mut self, busy: bool) {
        self.hold_busy = busy;
    }

    pub fn fail_transfers(&mut self, fail: bool) {
        self.fail_transfers = fail;
    }

    pub fn fail_select(&mut self, fail: bool) {
        self.fail_select = fail;
    }

    /// Idle bytes before every command response.
    pub fn set_response_delay(&mut self, delay: usize) {
        self.response_delay = delay;
    }

    /// Multi block reads stop streaming after `blocks`.
    pub fn stall_reads_after(&mut self, blocks: usize) {
        self.stall_reads_after = Some(blocks);
    }

    pub fn sector(&self, sector: u32) -> Vec<u8> {
        self.storage
            .get(&sector)
            .cloned()
            .unwrap_or_else(|| sector_pattern(sector))
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges
    }

    pub fn deselected_exchanges(&self) -> usize {
        self.deselected_exchanges
    }

    /// Received frames as `(index, argument, crc)`.
    pub fn commands(&self) -> Vec<(u8, u32, u8)> {
        self.commands.clone()
    }

    pub fn command_indexes(&self) -> Vec<u8> {
        self.commands.iter().map(|(cmd, _, _)| *cmd).collect()
    }

    pub fn cs_events(&self) -> Vec<Event> {
        self.cs_events.clone()
    }

    pub fn selected(&self) -> bool {
        self.selected
    }

    pub fn speeds(&self) -> Vec<BusSpeed> {
        self.speeds.clone()
    }

    pub fn write_tokens(&self) -> Vec<u8> {
        self.write_tokens.clone()
    }

    pub fn last_crc(&self) -> [u8; 2] {
        self.last_crc
    }

    pub fn timer_running(&self) -> bool {
        self.timer_running
    }

    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    fn exchange(&mut self, input: u8) -> u8 {
        self.exchanges += 1;

        if !self.selected {
            self.deselected_exchanges += 1;
            return tokens::AVAILABLE;
        }

        let output = self.next_output();
        self.receive(input);
        output
    }

    fn next_output(&mut self) -> u8 {
        if self.output.is_empty() {
            if let Some(sector) = self.multi_read {
                let stalled = self
                    .stall_reads_after
                    .map_or(false, |blocks| self.blocks_streamed >= blocks);

                if !stalled {
                    self.output.push_back(tokens::AVAILABLE);
                    let data = self.sector(sector);
                    self.queue_block(&data);
                    self.multi_read = Some(sector + 1);
                    self.blocks_streamed += 1;
                }
            }
        }

        match self.output.pop_front() {
            Some(byte) => byte,
            None if self.hold_busy => 0x00,
            None => tokens::AVAILABLE,
        }
    }

    fn queue_block(&mut self, data: &[u8]) {
        self.output.push_back(tokens::DATA_START_BLOCK);
        self.output.extend(data.iter().copied());
        self.output.extend(crc16(data).to_be_bytes());
    }

    fn receive(&mut self, input: u8) {
        match core::mem::replace(&mut self.rx, Rx::Idle) {
            Rx::Idle => {
                if input & 0xC0 == 0x40 {
                    self.rx = Rx::Command(vec![input]);
                }
            }
            Rx::Command(mut frame) => {
                frame.push(input);
                if frame.len() == 6 {
                    self.execute(&frame);
                } else {
                    self.rx = Rx::Command(frame);
                }
            }
            Rx::AwaitToken { multi, sector } => match input {
                tokens::DATA_START_BLOCK | tokens::WRITE_MULTIPLE => {
                    self.write_tokens.push(input);
                    self.rx = Rx::Data {
                        multi,
                        sector,
                        buf: Vec::new(),
                    };
                }
                tokens::STOP_TRAN if multi => {
                    self.write_tokens.push(input);
                    self.output.extend([0x00, 0x00, 0x00]);
                }
                _ => self.rx = Rx::AwaitToken { multi, sector },
            },
            Rx::Data {
                multi,
                sector,
                mut buf,
            } => {
                buf.push(input);
                if buf.len() < BLOCK_SIZE + 2 {
                    self.rx = Rx::Data { multi, sector, buf };
                    return;
                }

                self.last_crc = [buf[BLOCK_SIZE], buf[BLOCK_SIZE + 1]];
                if self.data_response & 0x0F == tokens::DATA_RES_ACCEPTED {
                    buf.truncate(BLOCK_SIZE);
                    self.storage.insert(sector, buf);
                }
                self.output.extend([self.data_response, 0x00, 0x00]);

                if multi {
                    self.rx = Rx::AwaitToken {
                        multi,
                        sector: sector + 1,
                    };
                }
            }
        }
    }

    fn ocr(&self) -> u32 {
        let mut ocr = 0x00FF_8000;
        if self.power == Power::Ready {
            ocr |= 0x8000_0000;
            if self.kind == (Kind::SdV2 { high_capacity: true }) {
                ocr |= args::HCS;
            }
        }
        ocr
    }

    fn status(&self) -> u8 {
        match self.power {
            Power::Ready => 0x00,
            _ => 0x01,
        }
    }

    fn advance_init(&mut self) -> u8 {
        if self.init_polls > 0 {
            self.init_polls -= 1;
            0x01
        } else {
            self.power = Power::Ready;
            0x00
        }
    }

    fn execute(&mut self, frame: &[u8]) {
        let cmd = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        self.commands.push((cmd, arg, frame[5]));

        let app = core::mem::replace(&mut self.app_cmd, false);
        self.multi_read = None;
        self.blocks_streamed = 0;
        if cmd == 12 {
            self.output.clear();
        }

        if self.power == Power::Native && cmd != 0 {
            return;
        }

        let mut reply = match self.overrides.get(&cmd) {
            Some(&r1) => vec![r1],
            None => self.reply(cmd, arg, app),
        };

        for _ in 0..self.response_delay {
            self.output.push_back(tokens::AVAILABLE);
        }
        self.output.extend(reply.drain(..));
    }

    fn reply(&mut self, cmd: u8, arg: u32, app: bool) -> Vec<u8> {
        let illegal = self.status() | 0x04;

        match (cmd, app) {
            (0, _) => {
                self.power = Power::Idle;
                vec![0x01]
            }
            (8, _) => match self.kind {
                Kind::SdV2 { .. } => {
                    let mut reply = vec![self.status()];
                    reply.extend(self.echo.to_be_bytes());
                    reply
                }
                _ => vec![illegal],
            },
            (55, _) => match self.kind {
                Kind::Mmc => vec![illegal],
                _ => {
                    self.app_cmd = true;
                    vec![self.status()]
                }
            },
            (41, true) => match self.kind {
                Kind::Mmc => vec![illegal],
                Kind::SdV2 { high_capacity: true } if arg & args::HCS == 0 => vec![self.status()],
                _ => vec![self.advance_init()],
            },
            (1, _) => match self.kind {
                Kind::Mmc => vec![self.advance_init()],
                _ => vec![illegal],
            },
            (58, _) => {
                let mut reply = vec![self.status()];
                reply.extend(self.ocr().to_be_bytes());
                reply
            }
            _ if self.power != Power::Ready => vec![illegal],
            (16, _) => vec![0x00],
            (9, _) => {
                let mut reply = vec![0x00, tokens::AVAILABLE];
                let csd: [u8; 16] = match self.kind {
                    Kind::SdV2 { high_capacity: true } => [
                        0x40, 0x0E, 0x00, 0x32, 0x5B, 0x59, 0x00, 0x00, 0x3B, 0x37, 0x7F, 0x80,
                        0x0A, 0x40, 0x00, 0x8B,
                    ],
                    _ => [
                        0x00, 0x26, 0x00, 0x32, 0x5F, 0x59, 0x83, 0xC8, 0xAD, 0xDB, 0xCF, 0xFF,
                        0xD2, 0x40, 0x40, 0xA5,
                    ],
                };
                reply.push(tokens::DATA_START_BLOCK);
                reply.extend(csd);
                reply.extend(crc16(&csd).to_be_bytes());
                reply
            }
            (12, _) => vec![tokens::AVAILABLE, 0x00],
            (17, _) => {
                let mut reply = vec![0x00, tokens::AVAILABLE];
                reply.push(tokens::DATA_START_BLOCK);
                let data = self.sector(arg);
                reply.extend(data.iter().copied());
                reply.extend(crc16(&data).to_be_bytes());
                reply
            }
            (18, _) => {
                self.multi_read = Some(arg);
                vec![0x00]
            }
            (24, _) | (25, _) => {
                self.rx = Rx::AwaitToken {
                    multi: cmd == 25,
                    sector: arg,
                };
                vec![0x00]
            }
            _ => vec![illegal],
        }
    }
}

pub struct SimSpi(Shared);

impl Transfer<u8> for SimSpi {
    type Error = SimError;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error> {
        let mut card = self.0.borrow_mut();
        if card.fail_transfers {
            card.exchanges += 1;
            return Err(SimError);
        }

        for word in words.iter_mut() {
            *word = card.exchange(*word);
        }

        Ok(words)
    }
}

impl SpeedControl for SimSpi {
    fn set_speed(&mut self, speed: BusSpeed) {
        self.0.borrow_mut().speeds.push(speed);
    }
}

pub struct SimCs(Shared);

impl OutputSwitch for SimCs {
    type Error = SimError;

    fn on(&mut self) -> Result<(), Self::Error> {
        let mut card = self.0.borrow_mut();
        if card.fail_select {
            return Err(SimError);
        }
        card.selected = true;
        card.cs_events.push(Event::Select);
        Ok(())
    }

    fn off(&mut self) -> Result<(), Self::Error> {
        let mut card = self.0.borrow_mut();
        card.selected = false;
        card.cs_events.push(Event::Deselect);
        Ok(())
    }
}

/// Advances by one tick every time it is read.
pub struct SimTimer(Shared);

impl TickCounter for SimTimer {
    fn start(&mut self) {
        let mut card = self.0.borrow_mut();
        card.ticks = 0;
        card.timer_running = true;
    }

    fn ticks(&mut self) -> u32 {
        let mut card = self.0.borrow_mut();
        let ticks = card.ticks;
        card.ticks += 1;
        ticks
    }

    fn stop(&mut self) {
        self.0.borrow_mut().timer_running = false;
    }
}

fn parts(card: Card) -> (SimSpi, SimCs, SimTimer, Shared) {
    let shared = Rc::new(RefCell::new(card));
    (
        SimSpi(shared.clone()),
        SimCs(shared.clone()),
        SimTimer(shared.clone()),
        shared,
    )
}

/// Bus with the card deselected.
pub fn bus(card: Card) -> (SimBus, Shared) {
    bus_with::<DefaultSdSpiConfig>(card)
}

/// Deselected bus with a custom config.
pub fn bus_with<Config: SdSpiConfig>(
    card: Card,
) -> (CardBus<SimSpi, SimCs, SimTimer, Config>, Shared) {
    let (spi, cs, timer, shared) = parts(card);
    (CardBus::new(spi, cs, timer), shared)
}

/// Bus with the card selected, chip select history cleared.
pub fn selected_bus(card: Card) -> (SimBus, Shared) {
    let (bus, shared) = bus(card);
    assert!(bus.select().is_ok());
    shared.borrow_mut().cs_events.clear();
    (bus, shared)
}

/// Uninitialized driver.
pub fn driver(card: Card) -> (SimDriver, Shared) {
    let (spi, cs, timer, shared) = parts(card);
    (SdSpi::new(spi, cs, timer), shared)
}

/// Driver that completed negotiation, bookkeeping of the card cleared.
pub fn ready_driver(card: Card) -> (SimDriver, Shared) {
    let (mut driver, shared) = driver(card);
    assert_eq!(driver.initialize(), crate::DiskStatus::Ready);
    {
        let mut card = shared.borrow_mut();
        card.commands.clear();
        card.cs_events.clear();
        card.exchanges = 0;
    }
    (driver, shared)
}
