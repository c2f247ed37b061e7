//! Chip flashing logic.

use std::path::Path;

use crate::assembler::PageAssembler;
use crate::clock::{Clock, SystemClock};
use crate::constants::{DEFAULT_PAGE_SIZE, FLASH_PROCESS_TIMEOUT_MS, SYNC_ATTEMPTS, reset};
use crate::device::Chip;
use crate::error::{Error, Pass, Result};
use crate::page::FlashPageBlock;
use crate::protocol::Stk500;
use crate::source::{self, LineSource};
use crate::transport::{Baudrate, SerialTransport, Transport};

/// How the target is kicked into its bootloader. Fixed for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ResetMethod {
    /// Pulse the reset line (DTR/RTS).
    #[default]
    Line,
    /// Hold TX low until the target's watchdog fires, then restart the port.
    Watchdog,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub reset: ResetMethod,
    pub baudrate: u32,
    /// Flash page size in bytes.
    pub page_size: usize,
    /// Reject hex records whose checksum does not add up.
    pub verify_checksums: bool,
    /// Budget for each of the write and verify passes.
    pub pass_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            reset: ResetMethod::Line,
            baudrate: Baudrate::default().into(),
            page_size: DEFAULT_PAGE_SIZE,
            verify_checksums: false,
            pass_timeout_ms: FLASH_PROCESS_TIMEOUT_MS,
        }
    }
}

impl Config {
    pub fn for_chip(chip: &Chip) -> Self {
        Config {
            page_size: chip.page_size,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Resetting,
    Syncing,
    Writing,
    Verifying,
    Closing,
    Success,
    Failed,
}

/// Position within the hex file after a page went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub pass: Pass,
    pub consumed: u64,
    pub total: u64,
}

/// What the bootloader reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetInfo {
    pub signature: [u8; 3],
    pub bootloader_version: (u8, u8),
}

pub struct Flashing<T, C> {
    link: Stk500<T, C>,
    config: Config,
    state: State,
}

impl Flashing<SerialTransport, SystemClock> {
    /// Open `port`, or the first serial port found.
    pub fn new_from_serial(port: Option<&str>, config: Config) -> Result<Self> {
        let transport = match port {
            Some(port) => SerialTransport::open(port, config.baudrate)?,
            None => SerialTransport::open_any(config.baudrate)?,
        };
        Ok(Flashing::new(transport, SystemClock::new(), config))
    }
}

impl<T: Transport, C: Clock> Flashing<T, C> {
    pub fn new(transport: T, clock: C, config: Config) -> Self {
        Flashing {
            link: Stk500::new(transport, clock),
            config,
            state: State::Idle,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.link.transport_mut()
    }

    fn enter(&mut self, state: State) {
        log::debug!("programmer state: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn fail(&mut self, err: Error) -> Error {
        log::error!("{}", err);
        self.enter(State::Failed);
        err
    }

    /// Write the hex file at `path` to the target and verify it.
    pub fn program_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        match source::open(path) {
            Ok(file) => self.program(file, |_| ()),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Reset, sync, write every page, read every page back and compare, then
    /// leave programming mode. Any failure stops the whole operation; flash
    /// may be left partially programmed.
    pub fn program<S: LineSource>(
        &mut self,
        source: S,
        mut progress: impl FnMut(Progress),
    ) -> Result<()> {
        let mut hex = match PageAssembler::new(source) {
            Ok(hex) => hex.verify_checksums(self.config.verify_checksums),
            Err(e) => return Err(self.fail(e)),
        };
        self.session(|this| {
            this.enter(State::Writing);
            this.write_pass(&mut hex, &mut progress)?;
            this.enter(State::Verifying);
            this.verify_pass(&mut hex, &mut progress)
        })?;
        log::info!("Flash success!");
        Ok(())
    }

    /// Read the signature and bootloader version.
    pub fn identify(&mut self) -> Result<TargetInfo> {
        self.session(|this| {
            let signature = this.link.read_signature()?;
            let bootloader_version = this.link.read_version()?;
            Ok(TargetInfo {
                signature,
                bootloader_version,
            })
        })
    }

    /// Read `len` bytes of flash starting at address 0.
    pub fn read_flash(&mut self, len: usize) -> Result<Vec<u8>> {
        let page_size = self.config.page_size;
        self.session(|this| {
            let mut image = Vec::with_capacity(len);
            let mut block = FlashPageBlock::new(page_size);
            while image.len() < len {
                let address = (image.len() / 2) as u16;
                block.clear();
                block.start_address = address;
                this.link
                    .set_address(address)
                    .map_err(|e| Error::AddressSetFailure {
                        address,
                        source: Box::new(e),
                    })?;
                this.link
                    .read_page(&mut block)
                    .map_err(|e| Error::ReadFailure {
                        address,
                        source: Box::new(e),
                    })?;
                let take = block.size_bytes().min(len - image.len());
                image.extend_from_slice(&block.data()[..take]);
            }
            Ok(image)
        })
    }

    /// Reset and sync, run `body`, then leave programming mode.
    fn session<R>(&mut self, body: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        match self.run_session(body) {
            Ok(r) => {
                self.enter(State::Success);
                Ok(r)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn run_session<R>(&mut self, body: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.enter(State::Resetting);
        self.reset()?;
        self.enter(State::Syncing);
        self.sync()?;
        let r = body(self)?;
        self.enter(State::Closing);
        self.close()?;
        Ok(r)
    }

    pub fn reset(&mut self) -> Result<()> {
        log::info!("Resetting target MCU ({:?})", self.config.reset);
        let baudrate = self.config.baudrate;
        match self.config.reset {
            ResetMethod::Line => {
                self.link.transport_mut().set_reset(true)?;
                self.link.clock().delay_ms(reset::LINE_PULSE_MS);
                self.link.transport_mut().set_reset(false)?;
                // chatter from the application before the pulse
                self.link.transport_mut().flush_input()?;
            }
            ResetMethod::Watchdog => {
                self.link.transport_mut().set_break(true)?;
                self.link.clock().delay_ms(reset::WATCHDOG_HOLD_MS);
                self.link.transport_mut().restart(baudrate)?;
                self.link.clock().delay_ms(reset::WATCHDOG_SETTLE_MS);
            }
        }
        Ok(())
    }

    /// Require `SYNC_ATTEMPTS` answers in a row; the first miss is fatal.
    pub fn sync(&mut self) -> Result<()> {
        for attempt in 1..=SYNC_ATTEMPTS {
            self.link.sync().map_err(|e| Error::SyncFailure {
                attempt,
                attempts: SYNC_ATTEMPTS,
                source: Box::new(e),
            })?;
            log::debug!("sync {}/{}", attempt, SYNC_ATTEMPTS);
        }
        log::info!("Bootloader in sync");
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.link.end_session().map_err(|e| Error::CloseFailure {
            source: Box::new(e),
        })?;
        log::info!("Left programming mode");
        Ok(())
    }

    fn check_budget(&self, pass: Pass, start_ms: u64) -> Result<()> {
        let elapsed_ms = self.link.clock().elapsed_since(start_ms);
        if elapsed_ms > self.config.pass_timeout_ms {
            return Err(Error::FlashTimeout {
                pass,
                elapsed_ms,
                budget_ms: self.config.pass_timeout_ms,
            });
        }
        Ok(())
    }

    fn load_address(&mut self, address: u16) -> Result<()> {
        self.link
            .set_address(address)
            .map_err(|e| Error::AddressSetFailure {
                address,
                source: Box::new(e),
            })
    }

    fn write_pass<S: LineSource>(
        &mut self,
        hex: &mut PageAssembler<S>,
        progress: &mut impl FnMut(Progress),
    ) -> Result<()> {
        hex.rewind()?;
        let mut block = FlashPageBlock::new(self.config.page_size);
        let start = self.link.clock().now_ms();
        log::info!("Writing firmware");

        let mut pages = 0;
        while hex.more_to_consume() {
            self.check_budget(Pass::Writing, start)?;
            hex.fill(&mut block)?;
            if block.is_empty() {
                continue;
            }

            let address = block.start_address;
            self.load_address(address)?;
            self.link
                .write_page(&block)
                .map_err(|e| Error::WriteFailure {
                    address,
                    source: Box::new(e),
                })?;
            log::debug!("wrote {} bytes @ 0x{:04x}", block.size_bytes(), address);
            pages += 1;
            progress(Progress {
                pass: Pass::Writing,
                consumed: hex.consumed(),
                total: hex.total(),
            });
        }

        log::info!("Firmware write complete, {} pages", pages);
        Ok(())
    }

    fn verify_pass<S: LineSource>(
        &mut self,
        hex: &mut PageAssembler<S>,
        progress: &mut impl FnMut(Progress),
    ) -> Result<()> {
        hex.rewind()?;
        let mut expected = FlashPageBlock::new(self.config.page_size);
        let mut actual = FlashPageBlock::new(self.config.page_size);
        let start = self.link.clock().now_ms();
        log::info!("Reading back flash to verify");

        while hex.more_to_consume() {
            self.check_budget(Pass::Verifying, start)?;
            hex.fill(&mut expected)?;
            if expected.is_empty() {
                continue;
            }

            let address = expected.start_address;
            self.load_address(address)?;
            actual.clear();
            actual.start_address = address;
            self.link
                .read_page(&mut actual)
                .map_err(|e| Error::ReadFailure {
                    address,
                    source: Box::new(e),
                })?;
            compare_blocks(&expected, &actual)?;
            progress(Progress {
                pass: Pass::Verifying,
                consumed: hex.consumed(),
                total: hex.total(),
            });
        }

        log::info!("Firmware image match success!");
        Ok(())
    }
}

/// Compare the meaningful bytes of `expected` against a page read back.
pub fn compare_blocks(expected: &FlashPageBlock, actual: &FlashPageBlock) -> Result<()> {
    let pairs = expected.data().iter().zip(actual.data());
    for (offset, (&want, &got)) in pairs.enumerate() {
        if want != got {
            log_page("hex image", expected.data());
            log_page("target", actual.data());
            return Err(Error::VerifyMismatch {
                address: expected.start_address,
                offset,
                expected: want,
                actual: got,
            });
        }
    }
    Ok(())
}

fn log_page(label: &str, data: &[u8]) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    let mut dump = Vec::new();
    if hxdmp::hexdump(data, &mut dump).is_ok() {
        log::debug!("{}:\n{}", label, String::from_utf8_lossy(&dump));
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::clock::MockClock;
    use crate::transport::mock::MockTarget;

    fn hex_image(data: &[u8]) -> Cursor<Vec<u8>> {
        let mut text = String::new();
        for (i, chunk) in data.chunks(16).enumerate() {
            let address = (i * 16) as u16;
            let mut raw = vec![chunk.len() as u8, (address >> 8) as u8, address as u8, 0];
            raw.extend_from_slice(chunk);
            let sum = raw.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
            raw.push(sum.wrapping_neg());
            text.push_str(&format!(":{}\r\n", hex::encode_upper(raw)));
        }
        text.push_str(":00000001FF\r\n");
        Cursor::new(text.into_bytes())
    }

    fn firmware(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 3) as u8).collect()
    }

    fn programmer(target: MockTarget, config: Config) -> Flashing<MockTarget, MockClock> {
        Flashing::new(target, MockClock::default(), config)
    }

    #[test]
    fn test_program_success() {
        let data = firmware(300);
        let mut prog = programmer(MockTarget::new(), Config::default());
        let mut seen = vec![];
        prog.program(hex_image(&data), |p| seen.push(p)).unwrap();

        assert_eq!(prog.state(), State::Success);
        let target = prog.transport_mut();
        assert_eq!(&target.flash[..300], &data[..]);
        assert!(target.flash[300..384].iter().all(|&b| b == 0xFF));
        assert_eq!(target.pages_written, vec![0, 64, 128]);
        assert_eq!(target.resets, 1);
        assert_eq!(target.syncs, 3);
        assert!(target.left_progmode);

        assert_eq!(seen.len(), 6);
        assert!(seen[..3].iter().all(|p| p.pass == Pass::Writing));
        assert!(seen[3..].iter().all(|p| p.pass == Pass::Verifying));
        let last = seen.last().unwrap();
        assert_eq!(last.consumed, last.total);
    }

    #[test]
    fn test_three_record_image() {
        let text = ":03000000AABBCC3C\r\n:03000300DDEEFF0B\r\n:00000001FF\r\n";
        let mut prog = programmer(MockTarget::new(), Config::default());
        prog.program(Cursor::new(text.as_bytes().to_vec()), |_| ())
            .unwrap();

        let target = prog.transport_mut();
        assert_eq!(target.pages_written, vec![0]);
        assert_eq!(&target.flash[..7], &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0xFF]);
    }

    #[test]
    fn test_exact_page_writes_no_blank_page() {
        let data = firmware(128);
        let mut prog = programmer(MockTarget::new(), Config::default());
        prog.program(hex_image(&data), |_| ()).unwrap();
        assert_eq!(prog.transport_mut().pages_written, vec![0]);
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.baudrate, 38400);
        assert_eq!(config.reset, ResetMethod::Line);
        assert_eq!(config.page_size, 128);
        assert!(!config.verify_checksums);
    }

    #[test]
    fn test_line_reset_discards_stale_input() {
        let mut target = MockTarget::new();
        target.queue(b"hello from the app\r\n");
        let mut prog = programmer(target, Config::default());
        prog.program(hex_image(&firmware(64)), |_| ()).unwrap();
        assert_eq!(prog.transport_mut().resets, 1);
        assert_eq!(prog.transport_mut().syncs, 3);
        assert_eq!(prog.state(), State::Success);
    }

    #[test]
    fn test_watchdog_reset() {
        let config = Config {
            reset: ResetMethod::Watchdog,
            baudrate: 57600,
            ..Default::default()
        };
        let mut prog = programmer(MockTarget::new(), config);
        prog.reset().unwrap();
        let target = prog.transport_mut();
        assert_eq!(target.breaks, 1);
        assert_eq!(target.restarts, vec![57600]);
        assert_eq!(target.resets, 0);
        assert!(prog.link.clock().peek() >= 1100);
    }

    #[test]
    fn test_sync_needs_three_in_a_row() {
        let target = MockTarget::new().sync_answers(&[true, true, false]);
        let mut prog = programmer(target, Config::default());
        let err = prog.program(hex_image(&firmware(16)), |_| ()).unwrap_err();

        assert!(matches!(
            err,
            Error::SyncFailure {
                attempt: 3,
                attempts: 3,
                ..
            }
        ));
        assert_eq!(prog.state(), State::Failed);
        assert!(prog.transport_mut().pages_written.is_empty());
    }

    #[test]
    fn test_sync_is_not_retried() {
        let target = MockTarget::new().sync_answers(&[true, false, true, true]);
        let mut prog = programmer(target, Config::default());
        let err = prog.program(hex_image(&firmware(16)), |_| ()).unwrap_err();
        assert!(matches!(err, Error::SyncFailure { attempt: 2, .. }));
        assert_eq!(prog.transport_mut().syncs, 2);
    }

    #[test]
    fn test_silent_target() {
        let mut prog = programmer(MockTarget::new().silent(), Config::default());
        let err = prog.program(hex_image(&firmware(16)), |_| ()).unwrap_err();
        match err {
            Error::SyncFailure { attempt, source, .. } => {
                assert_eq!(attempt, 1);
                assert!(matches!(*source, Error::Timeout { received: 0, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_verify_mismatch() {
        let data = firmware(300);
        let target = MockTarget::new().corrupt(130, 0x00);
        let mut prog = programmer(target, Config::default());
        let err = prog.program(hex_image(&data), |_| ()).unwrap_err();

        assert!(matches!(
            err,
            Error::VerifyMismatch {
                address: 64,
                offset: 2,
                expected: 134,
                actual: 0
            }
        ));
        assert_eq!(prog.state(), State::Failed);
        assert!(!prog.transport_mut().left_progmode);
    }

    #[test]
    fn test_compare_blocks() {
        let written = FlashPageBlock::with_data(0x0010, 128, &[0x01, 0x02, 0x03]).unwrap();
        let read = FlashPageBlock::with_data(0x0010, 128, &[0x01, 0xFF, 0x03]).unwrap();
        let err = compare_blocks(&written, &read).unwrap_err();
        assert!(matches!(
            err,
            Error::VerifyMismatch {
                address: 0x0010,
                offset: 1,
                expected: 0x02,
                actual: 0xFF
            }
        ));
        assert_eq!(
            err.to_string(),
            "programmed image does not match hex image at base address 0x0010, offset 1 (expected 0x02, read 0xFF)"
        );
        compare_blocks(&written, &written).unwrap();
    }

    #[test]
    fn test_write_pass_budget() {
        let config = Config {
            pass_timeout_ms: 0,
            ..Default::default()
        };
        let mut prog = programmer(MockTarget::new(), config);
        let err = prog.program(hex_image(&firmware(300)), |_| ()).unwrap_err();
        assert!(matches!(
            err,
            Error::FlashTimeout {
                pass: Pass::Writing,
                budget_ms: 0,
                ..
            }
        ));
        assert!(prog.transport_mut().pages_written.is_empty());
    }

    #[test]
    fn test_malformed_file_aborts() {
        let text = ":03000000AABBCC3C\r\n03000300DDEEFF0B\r\n:00000001FF\r\n";
        let mut prog = programmer(MockTarget::new(), Config::default());
        let err = prog
            .program(Cursor::new(text.as_bytes().to_vec()), |_| ())
            .unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { offset: 19, .. }));
        assert_eq!(prog.state(), State::Failed);
        let target = prog.transport_mut();
        assert!(target.pages_written.is_empty());
        assert!(!target.left_progmode);
    }

    #[test]
    fn test_strict_checksums() {
        let text = ":03000000AABBCC3C\r\n:00000001FF\r\n";
        let config = Config {
            verify_checksums: true,
            ..Default::default()
        };
        let mut prog = programmer(MockTarget::new(), config);
        let err = prog
            .program(Cursor::new(text.as_bytes().to_vec()), |_| ())
            .unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_missing_file() {
        let mut prog = programmer(MockTarget::new(), Config::default());
        let err = prog.program_file("/nonexistent/firmware.hex").unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(prog.state(), State::Failed);
        assert_eq!(prog.transport_mut().resets, 0);
    }

    #[test]
    fn test_read_flash() {
        let mut target = MockTarget::new();
        for (i, b) in target.flash.iter_mut().take(512).enumerate() {
            *b = i as u8;
        }
        let mut prog = programmer(target, Config::default());
        let image = prog.read_flash(200).unwrap();
        assert_eq!(image.len(), 200);
        assert!(image.iter().enumerate().all(|(i, &b)| b == i as u8));
        assert!(prog.transport_mut().left_progmode);
    }

    #[test]
    fn test_identify() {
        let mut prog = programmer(MockTarget::new(), Config::default());
        let info = prog.identify().unwrap();
        assert_eq!(info.signature, [0x1e, 0x95, 0x0f]);
        assert_eq!(info.bootloader_version, (8, 3));
        assert_eq!(prog.state(), State::Success);
    }
}
