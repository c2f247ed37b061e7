/// Default flash page of the common Optiboot targets, 64 words.
pub const DEFAULT_PAGE_SIZE: usize = 128;

/// Fill value for the unused tail of a page.
pub const PAGE_FILL: u8 = 0xff;

/// Wall-clock budget for a whole write or verify pass.
pub const FLASH_PROCESS_TIMEOUT_MS: u64 = 80_000;

/// Number of consecutive sync answers required before programming.
pub const SYNC_ATTEMPTS: usize = 3;

/// STK500 v1 command bytes.
pub mod commands {
    pub const GET_SYNC: u8 = 0x30;
    pub const GET_PARAMETER: u8 = 0x41;
    pub const LEAVE_PROGMODE: u8 = 0x51;
    pub const LOAD_ADDRESS: u8 = 0x55;
    pub const PROG_PAGE: u8 = 0x64;
    pub const READ_PAGE: u8 = 0x74;
    pub const READ_SIGN: u8 = 0x75;
}

/// STK500 v1 status bytes, terminator and memory types.
pub mod status {
    pub const INSYNC: u8 = 0x14;
    pub const OK: u8 = 0x10;
    pub const NOSYNC: u8 = 0x15;
    pub const CRC_EOP: u8 = 0x20;
    pub const MEMTYPE_FLASH: u8 = b'F';
}

/// `GET_PARAMETER` selectors understood by Optiboot.
pub mod parameters {
    pub const SW_MAJOR: u8 = 0x81;
    pub const SW_MINOR: u8 = 0x82;
}

/// Response budgets, in milliseconds.
pub mod timeouts {
    pub const SYNC_MS: u64 = 500;
    pub const LOAD_ADDRESS_MS: u64 = 100;
    pub const PROG_PAGE_MS: u64 = 1000;
    pub const READ_PAGE_HEADER_MS: u64 = 500;
    /// Idle budget between two payload bytes of a page read.
    pub const READ_PAGE_BYTE_MS: u64 = 2000;
    pub const READ_PAGE_TRAILER_MS: u64 = 500;
    pub const LEAVE_PROGMODE_MS: u64 = 100;
    pub const QUERY_MS: u64 = 500;
}

/// Intel-HEX line geometry.
pub mod record {
    /// `:` + byte count + address + type + checksum.
    pub const MIN_CHARS: usize = 11;
    /// CRLF after every record.
    pub const TERMINATOR_CHARS: usize = 2;
    /// Longest line the reader pulls in one go: a 255-byte record plus its terminator.
    pub const MAX_CHARS: usize = MIN_CHARS + 255 * 2 + TERMINATOR_CHARS;
    /// Data bytes per record written by the dump command.
    pub const DUMP_CHUNK: usize = 16;
}

/// Target reset timing, in milliseconds.
pub mod reset {
    pub const LINE_PULSE_MS: u64 = 1;
    pub const WATCHDOG_HOLD_MS: u64 = 1000;
    pub const WATCHDOG_SETTLE_MS: u64 = 100;
}
