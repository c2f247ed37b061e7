//! The STK500 v1 wire protocol, as spoken by Optiboot

use scroll::Pwrite;

use crate::clock::Clock;
use crate::constants::{commands, parameters, status, timeouts};
use crate::error::{Error, Result};
use crate::page::FlashPageBlock;
use crate::transport::Transport;

/// STK500 Command. Every request ends with `CRC_EOP`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Ask the bootloader to answer `INSYNC OK`.
    GetSync,
    /// Set the word address used by the next page command.
    LoadAddress { address: u16 },
    /// Write one page of flash. `data` is already padded to the page size.
    ProgPage { data: Vec<u8> },
    /// Read `len` bytes of flash from the loaded address.
    ReadPage { len: u16 },
    /// Read the three device signature bytes.
    ReadSign,
    /// Read a bootloader parameter, e.g. the software version.
    GetParameter { param: u8 },
    /// End the session, the bootloader starts the application.
    LeaveProgmode,
}

impl Command {
    pub fn load_address(address: u16) -> Self {
        Command::LoadAddress { address }
    }

    pub fn prog_page(block: &FlashPageBlock) -> Self {
        Command::ProgPage {
            data: block.padded().collect(),
        }
    }

    pub fn read_page(len: usize) -> Self {
        Command::ReadPage { len: len as u16 }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::GetSync => "STK_GET_SYNC",
            Command::LoadAddress { .. } => "STK_LOAD_ADDRESS",
            Command::ProgPage { .. } => "STK_PROG_PAGE",
            Command::ReadPage { .. } => "STK_READ_PAGE",
            Command::ReadSign => "STK_READ_SIGN",
            Command::GetParameter { .. } => "STK_GET_PARAMETER",
            Command::LeaveProgmode => "STK_LEAVE_PROGMODE",
        }
    }

    pub fn into_raw(self) -> Result<Vec<u8>> {
        match self {
            Command::GetSync => Ok(vec![commands::GET_SYNC, status::CRC_EOP]),
            Command::LoadAddress { address } => {
                let mut buf = [commands::LOAD_ADDRESS, 0, 0, status::CRC_EOP];
                buf.pwrite_with(address, 1, scroll::LE)?;
                Ok(buf.to_vec())
            }
            Command::ProgPage { data } => {
                // CMD, SIZE(BE), MEMTYPE, DATA, EOP
                let mut buf = vec![0u8; 4 + data.len() + 1];
                buf[0] = commands::PROG_PAGE;
                buf.pwrite_with(data.len() as u16, 1, scroll::BE)?;
                buf[3] = status::MEMTYPE_FLASH;
                buf[4..4 + data.len()].copy_from_slice(&data);
                buf[4 + data.len()] = status::CRC_EOP;
                Ok(buf)
            }
            Command::ReadPage { len } => {
                let mut buf = [
                    commands::READ_PAGE,
                    0,
                    0,
                    status::MEMTYPE_FLASH,
                    status::CRC_EOP,
                ];
                buf.pwrite_with(len, 1, scroll::BE)?;
                Ok(buf.to_vec())
            }
            Command::ReadSign => Ok(vec![commands::READ_SIGN, status::CRC_EOP]),
            Command::GetParameter { param } => {
                Ok(vec![commands::GET_PARAMETER, param, status::CRC_EOP])
            }
            Command::LeaveProgmode => Ok(vec![commands::LEAVE_PROGMODE, status::CRC_EOP]),
        }
    }
}

/// An STK500 session over a transport.
///
/// Each call sends one request and waits for its answer against the clock;
/// nothing is retried here.
pub struct Stk500<T, C> {
    transport: T,
    clock: C,
}

impl<T: Transport, C: Clock> Stk500<T, C> {
    pub fn new(transport: T, clock: C) -> Self {
        Stk500 { transport, clock }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Wait until `expected` bytes have arrived and check the last one.
    ///
    /// Earlier bytes are counted but not inspected. A wrong final byte fails
    /// at once; so does running out of time, whatever was received so far.
    pub fn wait_response(
        &mut self,
        command: &'static str,
        success: u8,
        expected: usize,
        timeout_ms: u64,
    ) -> Result<()> {
        let start = self.clock.now_ms();
        let mut received = 0;
        loop {
            if self.transport.bytes_available()? > 0 {
                let byte = self.transport.recv_byte()?;
                received += 1;
                if received == expected {
                    if byte == success {
                        return Ok(());
                    }
                    log::debug!("{} unexpected response: {:02x}", command, byte);
                    return Err(Error::UnexpectedResponse {
                        command,
                        expected: success,
                        actual: byte,
                    });
                }
            }
            if self.clock.elapsed_since(start) > timeout_ms {
                log::debug!("{} receive timeout", command);
                return Err(Error::Timeout {
                    command,
                    expected,
                    received,
                    timeout_ms,
                });
            }
        }
    }

    /// Fill `out` from the transport, allowing `idle_ms` between two bytes.
    fn read_payload(&mut self, command: &'static str, out: &mut [u8], idle_ms: u64) -> Result<()> {
        let mut received = 0;
        let mut last = self.clock.now_ms();
        while received < out.len() {
            if self.transport.bytes_available()? > 0 {
                out[received] = self.transport.recv_byte()?;
                received += 1;
                last = self.clock.now_ms();
            } else if self.clock.elapsed_since(last) > idle_ms {
                return Err(Error::Timeout {
                    command,
                    expected: out.len(),
                    received,
                    timeout_ms: idle_ms,
                });
            }
        }
        Ok(())
    }

    /// One `GET_SYNC` round trip.
    pub fn sync(&mut self) -> Result<()> {
        self.transport.send(Command::GetSync)?;
        self.wait_response("STK_GET_SYNC", status::OK, 2, timeouts::SYNC_MS)
    }

    pub fn set_address(&mut self, word_address: u16) -> Result<()> {
        self.transport.send(Command::load_address(word_address))?;
        self.wait_response(
            "STK_LOAD_ADDRESS",
            status::OK,
            2,
            timeouts::LOAD_ADDRESS_MS,
        )
    }

    /// Program a full page; bytes past the block's size go out as 0xFF.
    pub fn write_page(&mut self, block: &FlashPageBlock) -> Result<()> {
        self.transport.send(Command::prog_page(block))?;
        self.wait_response("STK_PROG_PAGE", status::OK, 2, timeouts::PROG_PAGE_MS)
    }

    /// Read a full page from the loaded address into `block`.
    ///
    /// The block's address is left alone; its size becomes the full capacity.
    pub fn read_page(&mut self, block: &mut FlashPageBlock) -> Result<()> {
        let capacity = block.capacity();
        self.transport.send(Command::read_page(capacity))?;
        self.wait_response(
            "STK_READ_PAGE - start",
            status::INSYNC,
            1,
            timeouts::READ_PAGE_HEADER_MS,
        )?;

        let mut page = vec![0u8; capacity];
        self.read_payload("STK_READ_PAGE", &mut page, timeouts::READ_PAGE_BYTE_MS)?;

        let address = block.start_address;
        block.clear();
        block.start_address = address;
        block.extend(&page)?;

        self.wait_response(
            "STK_READ_PAGE - end",
            status::OK,
            1,
            timeouts::READ_PAGE_TRAILER_MS,
        )
    }

    pub fn end_session(&mut self) -> Result<()> {
        self.transport.send(Command::LeaveProgmode)?;
        self.wait_response(
            "STK_LEAVE_PROGMODE",
            status::OK,
            2,
            timeouts::LEAVE_PROGMODE_MS,
        )
    }

    pub fn read_signature(&mut self) -> Result<[u8; 3]> {
        self.transport.send(Command::ReadSign)?;
        self.wait_response("STK_READ_SIGN", status::INSYNC, 1, timeouts::QUERY_MS)?;
        let mut signature = [0u8; 3];
        self.read_payload("STK_READ_SIGN", &mut signature, timeouts::QUERY_MS)?;
        self.wait_response("STK_READ_SIGN", status::OK, 1, timeouts::QUERY_MS)?;
        Ok(signature)
    }

    pub fn read_parameter(&mut self, param: u8) -> Result<u8> {
        self.transport.send(Command::GetParameter { param })?;
        self.wait_response("STK_GET_PARAMETER", status::INSYNC, 1, timeouts::QUERY_MS)?;
        let mut value = [0u8; 1];
        self.read_payload("STK_GET_PARAMETER", &mut value, timeouts::QUERY_MS)?;
        self.wait_response("STK_GET_PARAMETER", status::OK, 1, timeouts::QUERY_MS)?;
        Ok(value[0])
    }

    /// Bootloader software version, `(major, minor)`.
    pub fn read_version(&mut self) -> Result<(u8, u8)> {
        let major = self.read_parameter(parameters::SW_MAJOR)?;
        let minor = self.read_parameter(parameters::SW_MINOR)?;
        Ok((major, minor))
    }
}
