//! Abstract byte transport to the bootloader.
use crate::error::Result;
use crate::protocol::Command;

pub use self::serial::{Baudrate, SerialTransport};

#[cfg(test)]
pub(crate) mod mock;
mod serial;

/// Abstraction of the serial link and the target's reset wiring.
pub trait Transport {
    fn send_raw(&mut self, raw: &[u8]) -> Result<()>;
    /// Bytes that can be received without blocking.
    fn bytes_available(&mut self) -> Result<usize>;
    /// Only valid when `bytes_available` is non-zero.
    fn recv_byte(&mut self) -> Result<u8>;

    /// Drive the target's reset line.
    fn set_reset(&mut self, asserted: bool) -> Result<()>;
    /// Hold the transmit line low (break condition) or release it.
    fn set_break(&mut self, low: bool) -> Result<()>;
    /// Drop anything received but not yet read.
    fn flush_input(&mut self) -> Result<()>;
    /// Bring the link back up at `baudrate` with empty buffers.
    fn restart(&mut self, baudrate: u32) -> Result<()>;

    fn send(&mut self, cmd: Command) -> Result<()> {
        let name = cmd.name();
        let req = cmd.into_raw()?;
        log::debug!("=> {} {}", name, hex::encode(&req));
        self.send_raw(&req)
    }
}
