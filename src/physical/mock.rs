//! Simulated WG0X board.
//!
//! Implements [`EthercatCom`] on top of an in-memory slave controller:
//! register space, the two mailbox sync managers, the board's local bus and
//! an SPI EEPROM behind the FPGA page buffer. Faults can be scripted per
//! frame to exercise the transport's retry paths.

use std::collections::{HashMap, VecDeque};

use super::{EthercatCom, Telegram};
use crate::application::eeprom::{
    SpiEepromCmd, SpiOp, EEPROM_STATUS_READ_OPCODE, SPI_BUFFER_ADDR, SPI_COMMAND_ADDR,
    SPI_COMMAND_SIZE,
};
use crate::application::records::MAX_EEPROM_PAGE_SIZE;
use crate::checksum::{trailing_checksum, verify_checksum};
use crate::data_link::mailbox_frame::{
    MailboxHeader, MailboxOp, MBX_COMMAND_PHY_ADDR, MBX_COMMAND_SIZE, MBX_HEADER_SIZE,
    MBX_STATUS_PHY_ADDR, MBX_STATUS_SIZE,
};
use crate::data_link::syncman::{
    SyncMan, SyncManActivate, SyncManPdiControl, SyncManStatus, SYNCMAN_BASE_ADDR, SYNCMAN_SIZE,
};
use crate::physical::Command;

const ESC_MEMORY_SIZE: usize = 0x3000;
const LOCAL_BUS_SIZE: usize = 0x10000;
const SPI_CONTROL_ADDR: usize = SPI_COMMAND_ADDR as usize + 2;
const SPI_BUSY_BIT: u8 = 1 << 5;
const SPI_OP_MASK: u8 = 0x0F;

/// What goes wrong with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The frame never reaches the board
    LoseRequest,
    /// The board processes the frame but it never comes back
    LoseResponse,
    /// Every telegram of the frame comes back with this working counter
    WorkingCounter(u16),
}

/// Which frame a fault applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    AnyFrame,
    /// Read of a mailbox result (more than the single flush byte)
    MailboxResult,
    /// Write into the command mailbox
    MailboxCommand,
}

impl Trigger {
    fn matches(self, telegrams: &[Telegram]) -> bool {
        match self {
            Trigger::AnyFrame => true,
            Trigger::MailboxResult => telegrams.iter().any(|t| {
                t.command.is_read() && t.ado == MBX_STATUS_PHY_ADDR && t.data.len() > 1
            }),
            Trigger::MailboxCommand => telegrams
                .iter()
                .any(|t| !t.command.is_read() && t.ado == MBX_COMMAND_PHY_ADDR),
        }
    }
}

fn covers(start: u16, len: usize, addr: usize) -> bool {
    (start as usize..start as usize + len).contains(&addr)
}

/// A single WG0X board on a simulated ring
pub struct MockSlave {
    station: u16,
    position: u16,

    esc: Vec<u8>,
    local_bus: Vec<u8>,
    eeprom: HashMap<u16, Vec<u8>>,

    command_full: bool,
    status_full: bool,
    last_response: Vec<u8>,
    repeat_request: bool,
    repeat_ack: bool,

    faults: VecDeque<(Trigger, Fault)>,
    spi_busy_remaining: usize,
    eeprom_busy_remaining: usize,
    corrupt_next_result: bool,

    frames: usize,
    commands_processed: usize,

    /// Whether the board acknowledges sync manager repeat requests
    pub supports_repeat: bool,
    /// Status polls reporting busy after each SPI transfer
    pub spi_busy_polls: usize,
    /// EEPROM status reads reporting not-ready after a page write
    pub eeprom_busy_polls: usize,
    /// Echo a wrong operation in the SPI command register
    pub corrupt_spi_echo: bool,
    /// Leave commands in the command mailbox without executing them
    pub hold_commands: bool,
    /// 264 for the large EEPROM part, 256 for the small one
    pub eeprom_page_size: usize,
    /// A detached board answers nothing
    pub present: bool,
}

impl MockSlave {
    pub fn new(station: u16, position: u16) -> Self {
        Self {
            station,
            position,
            esc: vec![0; ESC_MEMORY_SIZE],
            local_bus: vec![0; LOCAL_BUS_SIZE],
            eeprom: HashMap::new(),
            command_full: false,
            status_full: false,
            last_response: Vec::new(),
            repeat_request: false,
            repeat_ack: false,
            faults: VecDeque::new(),
            spi_busy_remaining: 0,
            eeprom_busy_remaining: 0,
            corrupt_next_result: false,
            frames: 0,
            commands_processed: 0,
            supports_repeat: true,
            spi_busy_polls: 0,
            eeprom_busy_polls: 0,
            corrupt_spi_echo: false,
            hold_commands: false,
            eeprom_page_size: MAX_EEPROM_PAGE_SIZE,
            present: true,
        }
    }

    /// Queues a fault for the next frame matching `trigger`
    pub fn inject(&mut self, trigger: Trigger, fault: Fault) {
        self.faults.push_back((trigger, fault));
    }

    pub fn pending_faults(&self) -> usize {
        self.faults.len()
    }

    /// Flips a bit in the payload of the next posted mailbox result
    pub fn corrupt_next_result(&mut self) {
        self.corrupt_next_result = true;
    }

    /// Puts a stale result into the status mailbox
    pub fn post_garbage(&mut self) {
        let base = MBX_STATUS_PHY_ADDR as usize;
        self.esc[base..base + 4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        self.status_full = true;
    }

    pub fn status_mailbox_full(&self) -> bool {
        self.status_full
    }

    pub fn write_local_bus(&mut self, address: u16, data: &[u8]) {
        let start = address as usize;
        self.local_bus[start..start + data.len()].copy_from_slice(data);
    }

    pub fn local_bus(&self, address: u16, length: usize) -> &[u8] {
        let start = address as usize;
        &self.local_bus[start..start + length]
    }

    pub fn set_eeprom_page(&mut self, page: u16, data: &[u8]) {
        let mut image = vec![0xFF; MAX_EEPROM_PAGE_SIZE];
        image[..data.len()].copy_from_slice(data);
        self.eeprom.insert(page, image);
    }

    /// Current content of `page`; erased pages read as 0xFF
    pub fn eeprom_page(&self, page: u16) -> Vec<u8> {
        self.eeprom
            .get(&page)
            .cloned()
            .unwrap_or_else(|| vec![0xFF; MAX_EEPROM_PAGE_SIZE])
    }

    pub fn commands_processed(&self) -> usize {
        self.commands_processed
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    fn take_fault(&mut self, telegrams: &[Telegram]) -> Option<Fault> {
        let idx = self
            .faults
            .iter()
            .position(|(trigger, _)| trigger.matches(telegrams))?;
        self.faults.remove(idx).map(|(_, fault)| fault)
    }

    fn addressed(&self, telegram: &Telegram) -> bool {
        match telegram.command {
            Command::Nprd | Command::Npwr => telegram.adp == self.station,
            Command::Aprd | Command::Apwr => telegram.adp == self.position,
        }
    }

    fn syncman_image(&self, num: u8) -> [u8; SYNCMAN_SIZE] {
        let (start_address, control, full, activate, pdi_control) = if num == 0 {
            (
                MBX_COMMAND_PHY_ADDR,
                0x26,
                self.command_full,
                SyncManActivate::ENABLE,
                SyncManPdiControl::empty(),
            )
        } else {
            let mut activate = SyncManActivate::ENABLE;
            activate.set(SyncManActivate::REPEAT_REQUEST, self.repeat_request);
            let mut pdi = SyncManPdiControl::empty();
            pdi.set(SyncManPdiControl::REPEAT_ACK, self.repeat_ack);
            (MBX_STATUS_PHY_ADDR, 0x22, self.status_full, activate, pdi)
        };
        let mut status = SyncManStatus::empty();
        status.set(SyncManStatus::MAILBOX_FULL, full);
        SyncMan {
            start_address,
            length: MBX_COMMAND_SIZE as u16,
            control,
            status,
            activate,
            pdi_control,
        }
        .encode()
    }

    fn process(&mut self, telegram: &mut Telegram) {
        if !self.present || !self.addressed(telegram) {
            return;
        }
        let accepted = if telegram.command.is_read() {
            self.read(telegram.ado, &mut telegram.data)
        } else {
            self.write(telegram.ado, &telegram.data)
        };
        if accepted {
            telegram.wkc += 1;
        }
    }

    fn read(&mut self, ado: u16, data: &mut [u8]) -> bool {
        let start = ado as usize;
        let end = start + data.len();

        if covers(MBX_STATUS_PHY_ADDR, MBX_STATUS_SIZE, start) {
            if !self.status_full {
                return false;
            }
            data.copy_from_slice(&self.esc[start..end]);
            if covers(ado, data.len(), MBX_STATUS_PHY_ADDR as usize + MBX_STATUS_SIZE - 1) {
                self.status_full = false;
            }
            return true;
        }

        if covers(MBX_COMMAND_PHY_ADDR, MBX_COMMAND_SIZE, start) {
            return false;
        }

        if covers(SYNCMAN_BASE_ADDR, 2 * SYNCMAN_SIZE, start) {
            let mut regs = [0u8; 2 * SYNCMAN_SIZE];
            regs[..SYNCMAN_SIZE].copy_from_slice(&self.syncman_image(0));
            regs[SYNCMAN_SIZE..].copy_from_slice(&self.syncman_image(1));
            let offset = start - SYNCMAN_BASE_ADDR as usize;
            let Some(src) = regs.get(offset..offset + data.len()) else {
                return false;
            };
            data.copy_from_slice(src);
            return true;
        }

        match self.esc.get(start..end) {
            Some(src) => {
                data.copy_from_slice(src);
                true
            }
            None => false,
        }
    }

    fn write(&mut self, ado: u16, data: &[u8]) -> bool {
        let start = ado as usize;
        let end = start + data.len();

        if covers(MBX_COMMAND_PHY_ADDR, MBX_COMMAND_SIZE, start) {
            if self.command_full || end > MBX_COMMAND_PHY_ADDR as usize + MBX_COMMAND_SIZE {
                return false;
            }
            self.esc[start..end].copy_from_slice(data);
            if covers(ado, data.len(), MBX_COMMAND_PHY_ADDR as usize + MBX_COMMAND_SIZE - 1) {
                self.command_full = true;
                if !self.hold_commands {
                    self.execute_command();
                    self.command_full = false;
                }
            }
            return true;
        }

        if covers(MBX_STATUS_PHY_ADDR, MBX_STATUS_SIZE, start) {
            return false;
        }

        if covers(SYNCMAN_BASE_ADDR, 2 * SYNCMAN_SIZE, start) {
            let status_activate = SyncMan::activate_address(1) as usize;
            if let Some(&byte) = status_activate.checked_sub(start).and_then(|i| data.get(i)) {
                self.set_status_activate(SyncManActivate::from_bits_retain(byte));
            }
            return true;
        }

        match self.esc.get_mut(start..end) {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    fn set_status_activate(&mut self, activate: SyncManActivate) {
        let request = activate.contains(SyncManActivate::REPEAT_REQUEST);
        if request == self.repeat_request {
            return;
        }
        self.repeat_request = request;
        if self.supports_repeat {
            let response = self.last_response.clone();
            self.post_result(&response);
            self.repeat_ack = request;
        }
    }

    fn post_result(&mut self, response: &[u8]) {
        let base = MBX_STATUS_PHY_ADDR as usize;
        self.esc[base..base + response.len()].copy_from_slice(response);
        self.status_full = true;
    }

    fn execute_command(&mut self) {
        let base = MBX_COMMAND_PHY_ADDR as usize;
        let Ok(header) = MailboxHeader::decode(&self.esc[base..base + MBX_HEADER_SIZE]) else {
            return;
        };
        self.commands_processed += 1;

        let payload_start = base + MBX_HEADER_SIZE;
        match header.op {
            MailboxOp::Write => {
                let payload = self.esc[payload_start..payload_start + header.length + 1].to_vec();
                if verify_checksum(&payload) {
                    self.local_bus_write(header.address, &payload[..header.length]);
                }
            }
            MailboxOp::Read => {
                let mut response = self.local_bus_read(header.address, header.length);
                response.push(trailing_checksum(&response));
                self.last_response = response.clone();
                if self.corrupt_next_result {
                    self.corrupt_next_result = false;
                    response[0] ^= 0x01;
                }
                self.post_result(&response);
            }
        }
    }

    fn local_bus_read(&mut self, address: u16, length: usize) -> Vec<u8> {
        let start = address as usize;
        let mut data = self.local_bus[start..start + length].to_vec();
        if covers(address, length, SPI_CONTROL_ADDR) && self.spi_busy_remaining > 0 {
            self.spi_busy_remaining -= 1;
            data[SPI_CONTROL_ADDR - start] |= SPI_BUSY_BIT;
        }
        data
    }

    fn local_bus_write(&mut self, address: u16, data: &[u8]) {
        self.write_local_bus(address, data);
        if covers(address, data.len(), SPI_CONTROL_ADDR) {
            let cmd_start = SPI_COMMAND_ADDR as usize;
            let raw = &self.local_bus[cmd_start..cmd_start + SPI_COMMAND_SIZE];
            if let Ok(cmd) = SpiEepromCmd::decode(raw) {
                if cmd.start {
                    self.run_spi(cmd);
                }
            }
        }
    }

    fn run_spi(&mut self, cmd: SpiEepromCmd) {
        let buffer = SPI_BUFFER_ADDR as usize;
        match cmd.op() {
            Some(SpiOp::Read) => {
                let page = self.eeprom_page(cmd.page);
                let size = self.eeprom_page_size;
                self.local_bus[buffer..buffer + size].copy_from_slice(&page[..size]);
            }
            Some(SpiOp::Write) => {
                let mut page = self.eeprom_page(cmd.page);
                let size = self.eeprom_page_size;
                page[..size].copy_from_slice(&self.local_bus[buffer..buffer + size]);
                self.eeprom.insert(cmd.page, page);
                self.eeprom_busy_remaining = self.eeprom_busy_polls;
            }
            Some(SpiOp::Arbitrary) => {
                if self.local_bus[buffer] == EEPROM_STATUS_READ_OPCODE {
                    let mut status = 0x80;
                    if self.eeprom_busy_remaining > 0 {
                        self.eeprom_busy_remaining -= 1;
                        status = 0;
                    }
                    if self.eeprom_page_size != MAX_EEPROM_PAGE_SIZE {
                        status |= 0x01;
                    }
                    self.local_bus[buffer + 1] = status;
                }
            }
            None => {}
        }

        let mut echo = cmd.operation & SPI_OP_MASK;
        if self.corrupt_spi_echo {
            echo ^= 0x04;
        }
        self.local_bus[SPI_CONTROL_ADDR] = echo;
        self.spi_busy_remaining = self.spi_busy_polls;
    }
}

impl EthercatCom for MockSlave {
    fn txandrx_once(&mut self, telegrams: &mut [Telegram]) -> bool {
        self.frames += 1;
        match self.take_fault(telegrams) {
            Some(Fault::LoseRequest) => false,
            Some(Fault::LoseResponse) => {
                telegrams.iter_mut().for_each(|t| self.process(t));
                false
            }
            Some(Fault::WorkingCounter(wkc)) => {
                telegrams.iter_mut().for_each(|t| {
                    self.process(t);
                    t.wkc = wkc;
                });
                true
            }
            None => {
                telegrams.iter_mut().for_each(|t| self.process(t));
                true
            }
        }
    }
}
