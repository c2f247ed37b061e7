//! Serial Transportation.
use std::{
    fmt::Display,
    io::{Read, Write},
    time::Duration,
};

use clap::{ValueEnum, builder::PossibleValue};
use serialport::{ClearBuffer, SerialPort};

use super::Transport;
use crate::error::{Error, Result};

const SERIAL_TIMEOUT_MS: u64 = 1000;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Baudrate {
    Baud19200,
    #[default]
    Baud38400,
    Baud57600,
    Baud115200,
}

impl From<Baudrate> for u32 {
    fn from(value: Baudrate) -> Self {
        match value {
            Baudrate::Baud19200 => 19200,
            Baudrate::Baud38400 => 38400,
            Baudrate::Baud57600 => 57600,
            Baudrate::Baud115200 => 115200,
        }
    }
}

impl Display for Baudrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}

impl ValueEnum for Baudrate {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            Baudrate::Baud19200,
            Baudrate::Baud38400,
            Baudrate::Baud57600,
            Baudrate::Baud115200,
        ]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        match self {
            Baudrate::Baud19200 => Some(PossibleValue::new("Baud19200").aliases(["19200"])),
            Baudrate::Baud38400 => Some(PossibleValue::new("Baud38400").aliases(["38400"])),
            Baudrate::Baud57600 => Some(PossibleValue::new("Baud57600").aliases(["57600"])),
            Baudrate::Baud115200 => {
                Some(PossibleValue::new("Baud115200").aliases(["115200", "115_200"]))
            }
        }
    }
}

pub struct SerialTransport {
    serial_port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn scan_ports() -> Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    pub fn open(port: &str, baudrate: impl Into<u32>) -> Result<Self> {
        let baudrate = baudrate.into();
        log::info!("Opening serial port: \"{}\" @ {} baud", port, baudrate);
        let port = serialport::new(port, baudrate)
            .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
            .open()?;
        Ok(SerialTransport { serial_port: port })
    }

    pub fn open_nth(nth: usize, baudrate: impl Into<u32>) -> Result<Self> {
        let ports = serialport::available_ports()?;

        match ports.get(nth) {
            Some(port) => Self::open(&port.port_name, baudrate),
            None => Err(Error::Transport(serialport::Error::new(
                serialport::ErrorKind::NoDevice,
                "No serial ports found!",
            ))),
        }
    }

    pub fn open_any(baudrate: impl Into<u32>) -> Result<Self> {
        Self::open_nth(0, baudrate)
    }
}

impl Transport for SerialTransport {
    fn send_raw(&mut self, raw: &[u8]) -> Result<()> {
        self.serial_port
            .write_all(raw)
            .map_err(serialport::Error::from)?;
        self.serial_port.flush().map_err(serialport::Error::from)?;
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.serial_port.bytes_to_read()? as usize)
    }

    fn recv_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.serial_port
            .read_exact(&mut buf)
            .map_err(serialport::Error::from)?;
        log::trace!("<= {:02x}", buf[0]);
        Ok(buf[0])
    }

    fn set_reset(&mut self, asserted: bool) -> Result<()> {
        // Arduino-style auto reset: DTR/RTS are capacitively coupled to RESET
        self.serial_port.write_data_terminal_ready(asserted)?;
        self.serial_port.write_request_to_send(asserted)?;
        Ok(())
    }

    fn set_break(&mut self, low: bool) -> Result<()> {
        if low {
            self.serial_port.set_break()?;
        } else {
            self.serial_port.clear_break()?;
        }
        Ok(())
    }

    fn flush_input(&mut self) -> Result<()> {
        let stale = self.serial_port.bytes_to_read()?;
        if stale > 0 {
            log::debug!("discarding {} stale bytes", stale);
        }
        self.serial_port.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn restart(&mut self, baudrate: u32) -> Result<()> {
        self.serial_port.clear_break()?;
        self.serial_port.set_baud_rate(baudrate)?;
        self.serial_port.clear(ClearBuffer::All)?;
        log::debug!("serial port restarted @ {} baud", baudrate);
        Ok(())
    }
}
