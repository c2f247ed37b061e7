//! Error types for the programmer

use std::fmt;

use thiserror::Error;

/// Which full pass over the firmware image was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    Writing,
    Verifying,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pass::Writing => write!(f, "write"),
            Pass::Verifying => write!(f, "verify"),
        }
    }
}

/// Why a single Intel-HEX line could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("record does not start with ':'")]
    MissingColon,
    #[error("record is {0} characters, at least 11 are required")]
    TooShort(usize),
    #[error("invalid hex digits in {0} field")]
    InvalidDigits(&'static str),
    #[error("record ends before its {0} field")]
    Truncated(&'static str),
    #[error("{0} record carries {1} data bytes, expected 2")]
    BadLength(&'static str, u8),
}

/// Programmer errors
#[derive(Debug, Error)]
pub enum Error {
    /// A hex line failed to decode
    #[error("malformed hex record at byte {offset}: {source}")]
    MalformedRecord {
        offset: u64,
        #[source]
        source: RecordError,
    },

    /// Fewer characters left in the file than the shortest valid record
    #[error("incomplete hex record at byte {offset}: only {len} characters left")]
    IncompleteRecord { offset: u64, len: usize },

    /// Record checksum does not match its contents
    #[error(
        "checksum mismatch in hex record at byte {offset}: record says 0x{expected:02X}, computed 0x{computed:02X}"
    )]
    ChecksumMismatch {
        offset: u64,
        expected: u8,
        computed: u8,
    },

    /// Bootloader handshake never achieved
    #[error("sync failure on attempt {attempt} of {attempts}")]
    SyncFailure {
        attempt: usize,
        attempts: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("failed to set address 0x{address:04X}")]
    AddressSetFailure {
        address: u16,
        #[source]
        source: Box<Error>,
    },

    #[error("failed to program page at address 0x{address:04X}")]
    WriteFailure {
        address: u16,
        #[source]
        source: Box<Error>,
    },

    #[error("failed to read page at address 0x{address:04X}")]
    ReadFailure {
        address: u16,
        #[source]
        source: Box<Error>,
    },

    /// A whole pass ran over its wall-clock budget
    #[error("flash process timeout: {pass} pass ran {elapsed_ms}ms, budget is {budget_ms}ms")]
    FlashTimeout {
        pass: Pass,
        elapsed_ms: u64,
        budget_ms: u64,
    },

    /// Read-back differs from the image
    #[error(
        "programmed image does not match hex image at base address 0x{address:04X}, offset {offset} (expected 0x{expected:02X}, read 0x{actual:02X})"
    )]
    VerifyMismatch {
        address: u16,
        offset: usize,
        expected: u8,
        actual: u8,
    },

    #[error("failed to leave programming mode")]
    CloseFailure {
        #[source]
        source: Box<Error>,
    },

    /// Not enough response bytes arrived in time
    #[error("{command}: received {received} of {expected} response bytes within {timeout_ms}ms")]
    Timeout {
        command: &'static str,
        expected: usize,
        received: usize,
        timeout_ms: u64,
    },

    /// The decisive response byte was wrong
    #[error("{command}: unexpected response 0x{actual:02X}, expected 0x{expected:02X}")]
    UnexpectedResponse {
        command: &'static str,
        expected: u8,
        actual: u8,
    },

    /// Data placed above what a 16-bit word address can reach
    #[error("hex record at byte {offset} targets byte address 0x{address:X}, out of reach of the bootloader")]
    AddressOutOfRange { offset: u64, address: u32 },

    /// Write past the end of a page buffer
    #[error("page buffer full ({capacity} bytes)")]
    PageOverflow { capacity: usize },

    #[error("unknown chip: {0}")]
    UnknownChip(String),

    #[error("invalid chip database: {0}")]
    ChipDatabase(#[from] serde_yaml::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] scroll::Error),

    #[error("hex writer error: {0}")]
    HexWrite(#[from] ihex::WriterError),

    /// Serial port failure
    #[error("transport error: {0}")]
    Transport(#[from] serialport::Error),

    /// Firmware file failure
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

/// Result type for programmer operations
pub type Result<T, E = Error> = std::result::Result<T, E>;
