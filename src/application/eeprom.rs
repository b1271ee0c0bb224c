//! SPI EEPROM programming through the mailbox.
//!
//! The FPGA contains a small SPI state machine. Every EEPROM access goes:
//!
//! 1. write command data or page data into the FPGA page buffer
//! 2. write a command into the SPI command register to start the transfer
//! 3. poll the command register until the busy bit clears
//! 4. read the EEPROM reply back out of the page buffer
//!
//! Page writes take longer than the SPI transfer itself, so after a write the
//! EEPROM status register is polled until the device reports ready.

use std::thread;
use std::time::Duration;

use bitflags::bitflags;
use tracing::{error, warn};

use super::records::{
    ActuatorInfo, MotorHeatingModelEepromConfig, ACTUATOR_INFO_PAGE, ACTUATOR_INFO_SIZE,
    MAX_EEPROM_PAGE_SIZE, MOTOR_HEATING_CONFIG_SIZE, NUM_EEPROM_PAGES,
};
use crate::data_link::{ensure_len, Field};
use crate::error::{DriverError, Result};
use crate::physical::EthercatCom;
use crate::transport::MailboxTransport;
use crate::types::Config;

pub const SPI_COMMAND_ADDR: u16 = 0x0230;
pub const SPI_COMMAND_SIZE: usize = 3;
pub const SPI_BUFFER_ADDR: u16 = 0xF400;

/// EEPROM opcode that shifts out the status register
pub const EEPROM_STATUS_READ_OPCODE: u8 = 0xD7;

const PAGE: Field = Field::new(0, 2);
const CONTROL: Field = PAGE.after(1);
const OPERATION_MASK: u8 = 0x0F;
const START_BIT: u8 = 1 << 4;
const BUSY_BIT: u8 = 1 << 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SpiOp {
    Read = 0,
    Write = 1,
    /// Shifts the buffer out while storing whatever the EEPROM shifts in
    Arbitrary = 3,
}

impl SpiOp {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(SpiOp::Read),
            1 => Some(SpiOp::Write),
            3 => Some(SpiOp::Arbitrary),
            _ => None,
        }
    }
}

/// SPI state machine command/status register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiEepromCmd {
    /// Page number, or transfer length minus one for arbitrary transfers
    pub page: u16,
    pub operation: u8,
    pub start: bool,
    pub busy: bool,
}

impl SpiEepromCmd {
    fn build(page: u16, op: SpiOp) -> Self {
        Self {
            page,
            operation: op as u8,
            start: true,
            busy: false,
        }
    }

    pub fn build_read(page: u16) -> Self {
        Self::build(page, SpiOp::Read)
    }

    pub fn build_write(page: u16) -> Self {
        Self::build(page, SpiOp::Write)
    }

    pub fn build_arbitrary(length: usize) -> Self {
        Self::build(length.saturating_sub(1) as u16, SpiOp::Arbitrary)
    }

    pub fn op(&self) -> Option<SpiOp> {
        SpiOp::from_raw(self.operation)
    }

    pub fn encode(&self) -> [u8; SPI_COMMAND_SIZE] {
        let mut buf = [0u8; SPI_COMMAND_SIZE];
        PAGE.put_u16(&mut buf, self.page);
        let mut control = self.operation & OPERATION_MASK;
        if self.start {
            control |= START_BIT;
        }
        if self.busy {
            control |= BUSY_BIT;
        }
        CONTROL.put_u8(&mut buf, control);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        ensure_len(buf, SPI_COMMAND_SIZE, "SPI command")?;
        let control = CONTROL.u8(buf);
        Ok(Self {
            page: PAGE.u16(buf),
            operation: control & OPERATION_MASK,
            start: control & START_BIT != 0,
            busy: control & BUSY_BIT != 0,
        })
    }
}

bitflags! {
    /// EEPROM status register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EepromStatus: u8 {
        /// Page size is 256 bytes instead of 264
        const PAGE_SIZE = 1 << 0;
        const PROTECT = 1 << 1;
        const COMPARE = 1 << 6;
        const READY = 1 << 7;
    }
}

/// Polling limits for EEPROM access
#[derive(Debug, Clone)]
pub struct EepromConfig {
    pub spi_ready_attempts: usize,
    pub eeprom_ready_attempts: usize,
    /// Sleep between polls. Every poll is also a mailbox round trip, so
    /// polls end up about a millisecond apart on a real bus.
    pub poll_interval_us: u64,
    /// Warn when an EEPROM write needed more status polls than this
    pub slow_write_warning: usize,
}

impl Default for EepromConfig {
    fn default() -> Self {
        Self {
            spi_ready_attempts: 10,
            eeprom_ready_attempts: 20,
            poll_interval_us: 100,
            slow_write_warning: 10,
        }
    }
}

impl Config for EepromConfig {
    fn validate(&self) -> Result<()> {
        if self.spi_ready_attempts == 0 || self.eeprom_ready_attempts == 0 {
            return Err(DriverError::InvalidParameter(
                "EEPROM poll attempts must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Page oriented access to the board EEPROM
pub struct EepromProgrammer<'a, M: MailboxTransport + ?Sized> {
    mailbox: &'a M,
    config: EepromConfig,
}

impl<'a, M: MailboxTransport + ?Sized> EepromProgrammer<'a, M> {
    pub fn new(mailbox: &'a M, config: EepromConfig) -> Self {
        Self { mailbox, config }
    }

    fn pause(&self) {
        thread::sleep(Duration::from_micros(self.config.poll_interval_us));
    }

    fn check_bounds(page: u16, length: usize) -> Result<()> {
        if length > MAX_EEPROM_PAGE_SIZE {
            return Err(DriverError::InvalidParameter(format!(
                "EEPROM length {} > {}",
                length, MAX_EEPROM_PAGE_SIZE
            )));
        }
        if page >= NUM_EEPROM_PAGES {
            return Err(DriverError::InvalidParameter(format!(
                "EEPROM page {} > {}",
                page,
                NUM_EEPROM_PAGES - 1
            )));
        }
        Ok(())
    }

    pub fn read_spi_command(&self, com: &mut dyn EthercatCom) -> Result<SpiEepromCmd> {
        let raw = self
            .mailbox
            .read_mailbox(com, SPI_COMMAND_ADDR, SPI_COMMAND_SIZE)
            .map_err(|e| {
                error!(%e, "reading SPI command register with mailbox");
                e
            })?;
        SpiEepromCmd::decode(&raw)
    }

    /// Polls until the SPI state machine is idle
    pub fn wait_for_spi_ready(&self, com: &mut dyn EthercatCom) -> Result<()> {
        for _ in 0..self.config.spi_ready_attempts {
            if !self.read_spi_command(com)?.busy {
                return Ok(());
            }
            self.pause();
        }
        error!(
            attempts = self.config.spi_ready_attempts,
            "timed out waiting for SPI state machine to be idle"
        );
        Err(DriverError::SpiEeprom(
            "timed out waiting for SPI state machine".into(),
        ))
    }

    /// Starts `cmd` and waits for the state machine to finish it
    pub fn send_spi_command(&self, com: &mut dyn EthercatCom, cmd: &SpiEepromCmd) -> Result<()> {
        self.wait_for_spi_ready(com)?;

        self.mailbox
            .write_mailbox(com, SPI_COMMAND_ADDR, &cmd.encode())
            .map_err(|e| {
                error!(%e, "error writing SPI EEPROM command");
                e
            })?;

        for tries in 0..self.config.spi_ready_attempts {
            let stat = self.read_spi_command(com)?;
            if stat.operation != cmd.operation {
                error!(
                    got = stat.operation,
                    expected = cmd.operation,
                    "invalid readback of SPI EEPROM operation"
                );
                return Err(DriverError::SpiEeprom(format!(
                    "operation readback 0x{:X}, expected 0x{:X}",
                    stat.operation, cmd.operation
                )));
            }
            if !stat.busy {
                if tries > 0 {
                    warn!(tries, "EEPROM state machine took several polls");
                }
                return Ok(());
            }
            self.pause();
        }

        error!(
            attempts = self.config.spi_ready_attempts,
            "EEPROM SPI state machine still busy"
        );
        Err(DriverError::SpiEeprom("state machine stayed busy".into()))
    }

    /// Reads `length` bytes of EEPROM `page`.
    ///
    /// EEPROMs with 256 byte pages leave the tail of a 264 byte read
    /// untouched, so the FPGA buffer is zeroed first and those bytes read 0.
    pub fn read_page(&self, com: &mut dyn EthercatCom, page: u16, length: usize) -> Result<Vec<u8>> {
        if length == 0 {
            return Err(DriverError::InvalidParameter("EEPROM read length 0".into()));
        }
        Self::check_bounds(page, length)?;

        self.mailbox
            .write_mailbox(com, SPI_BUFFER_ADDR, &[0u8; MAX_EEPROM_PAGE_SIZE])
            .map_err(|e| {
                error!(%e, "error zeroing EEPROM data buffer");
                e
            })?;

        self.send_spi_command(com, &SpiEepromCmd::build_read(page))
            .map_err(|e| {
                error!(page, %e, "error sending SPI read command");
                e
            })?;

        let mut data = self
            .mailbox
            .read_mailbox(com, SPI_BUFFER_ADDR, length)
            .map_err(|e| {
                error!(%e, "error reading EEPROM data from buffer");
                e
            })?;
        data.resize(length, 0);
        Ok(data)
    }

    /// Writes one EEPROM page; short data is padded with 0xFF to a full page
    pub fn write_page(&self, com: &mut dyn EthercatCom, page: u16, data: &[u8]) -> Result<()> {
        Self::check_bounds(page, data.len())?;

        self.wait_for_spi_ready(com)?;

        let mut buf = [0xFFu8; MAX_EEPROM_PAGE_SIZE];
        buf[..data.len()].copy_from_slice(data);

        self.mailbox
            .write_mailbox(com, SPI_BUFFER_ADDR, &buf)
            .map_err(|e| {
                error!(%e, "write of SPI EEPROM buffer failed");
                e
            })?;

        self.send_spi_command(com, &SpiEepromCmd::build_write(page))
            .map_err(|e| {
                error!(page, %e, "error giving SPI EEPROM write command");
                e
            })?;

        self.wait_for_eeprom_ready(com)
    }

    /// Polls the EEPROM status register until a page write has completed
    pub fn wait_for_eeprom_ready(&self, com: &mut dyn EthercatCom) -> Result<()> {
        let mut tries = 0;
        loop {
            let status = self.read_status_register(com)?;
            if status.contains(EepromStatus::READY) {
                break;
            }
            tries += 1;
            if tries >= self.config.eeprom_ready_attempts {
                error!(tries, "EEPROM still busy");
                return Err(DriverError::Eeprom(format!("still busy after {} polls", tries)));
            }
            self.pause();
        }

        if tries > self.config.slow_write_warning {
            warn!(tries, "EEPROM took a long time to be ready");
        }
        Ok(())
    }

    /// Reads the EEPROM status register with a 2 byte arbitrary transfer.
    ///
    /// The opcode goes out first; the status shifts in while the dummy second
    /// byte is sent, so it lands in the second buffer byte.
    pub fn read_status_register(&self, com: &mut dyn EthercatCom) -> Result<EepromStatus> {
        let data = [EEPROM_STATUS_READ_OPCODE, 0x00];
        self.mailbox
            .write_mailbox(com, SPI_BUFFER_ADDR, &data)
            .map_err(|e| {
                error!(%e, "writing SPI buffer");
                e
            })?;

        self.send_spi_command(com, &SpiEepromCmd::build_arbitrary(data.len()))
            .map_err(|e| {
                error!(%e, "sending SPI arbitrary command");
                e
            })?;

        let reply = self
            .mailbox
            .read_mailbox(com, SPI_BUFFER_ADDR, data.len())
            .map_err(|e| {
                error!(%e, "reading status register data from SPI buffer");
                e
            })?;
        let status = reply.get(1).copied().ok_or_else(|| {
            DriverError::SpiEeprom(format!("status reply has {} bytes, expected 2", reply.len()))
        })?;
        Ok(EepromStatus::from_bits_retain(status))
    }

    pub fn read_actuator_info(&self, com: &mut dyn EthercatCom) -> Result<ActuatorInfo> {
        let page = self.read_page(com, ACTUATOR_INFO_PAGE, ACTUATOR_INFO_SIZE)?;
        ActuatorInfo::from_page(&page)
    }

    pub fn read_motor_heating_config(
        &self,
        com: &mut dyn EthercatCom,
    ) -> Result<MotorHeatingModelEepromConfig> {
        let page = self.read_page(
            com,
            MotorHeatingModelEepromConfig::EEPROM_PAGE,
            MOTOR_HEATING_CONFIG_SIZE,
        )?;
        MotorHeatingModelEepromConfig::from_page(&page)
    }

    /// Programs the actuator info page. The record must carry valid CRCs,
    /// see [`ActuatorInfo::generate_crc`].
    pub fn program_actuator_info(&self, com: &mut dyn EthercatCom, info: &ActuatorInfo) -> Result<()> {
        if !info.verify_crc() {
            return Err(DriverError::CrcMismatch("actuator info"));
        }
        self.write_page(com, ACTUATOR_INFO_PAGE, info.as_bytes())
            .map_err(|e| {
                error!(%e, "writing actuator information to EEPROM");
                e
            })
    }

    pub fn program_motor_heating_config(
        &self,
        com: &mut dyn EthercatCom,
        config: &MotorHeatingModelEepromConfig,
    ) -> Result<()> {
        if !config.verify_crc() {
            return Err(DriverError::CrcMismatch("motor heating model config"));
        }
        self.write_page(com, MotorHeatingModelEepromConfig::EEPROM_PAGE, config.as_bytes())
            .map_err(|e| {
                error!(%e, "writing motor heating model configuration to EEPROM");
                e
            })
    }
}
