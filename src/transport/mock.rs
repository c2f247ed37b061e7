//! In-memory Optiboot stand-in for tests.
use std::collections::VecDeque;

use super::Transport;
use crate::constants::{commands, status};
use crate::error::{Error, Result};

/// Parses STK500 frames as they are sent and queues the bootloader's answers.
pub(crate) struct MockTarget {
    rx: VecDeque<u8>,
    frame: Vec<u8>,
    pub flash: Vec<u8>,
    address: u16,
    /// Every byte ever sent to the target.
    pub sent: Vec<u8>,
    pub syncs: usize,
    /// Word addresses of every programmed page, in order.
    pub pages_written: Vec<u16>,
    pub left_progmode: bool,
    pub resets: usize,
    pub breaks: usize,
    pub restarts: Vec<u32>,
    sync_answers: Vec<bool>,
    silent: bool,
    stall_read_after: Option<usize>,
    corrupt: Option<(usize, u8)>,
}

impl MockTarget {
    pub fn new() -> Self {
        MockTarget {
            rx: VecDeque::new(),
            frame: vec![],
            flash: vec![0xff; 32 * 1024],
            address: 0,
            sent: vec![],
            syncs: 0,
            pages_written: vec![],
            left_progmode: false,
            resets: 0,
            breaks: 0,
            restarts: vec![],
            sync_answers: vec![],
            silent: false,
            stall_read_after: None,
            corrupt: None,
        }
    }

    /// Never answer anything.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Answer the n-th sync with `INSYNC OK` if `answers[n]` is true and
    /// `INSYNC NOSYNC` otherwise. Syncs beyond the list succeed.
    pub fn sync_answers(mut self, answers: &[bool]) -> Self {
        self.sync_answers = answers.to_vec();
        self
    }

    /// Stop sending page data after `n` bytes.
    pub fn stall_read_after(mut self, n: usize) -> Self {
        self.stall_read_after = Some(n);
        self
    }

    /// Report `value` instead of the stored byte at `byte_address` on read.
    pub fn corrupt(mut self, byte_address: usize, value: u8) -> Self {
        self.corrupt = Some((byte_address, value));
        self
    }

    pub fn queue(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    fn frame_len(&self) -> Option<usize> {
        let len = match *self.frame.first()? {
            commands::LOAD_ADDRESS => 4,
            commands::GET_PARAMETER => 3,
            commands::READ_PAGE => 5,
            commands::PROG_PAGE => {
                let size = u16::from_be_bytes([*self.frame.get(1)?, *self.frame.get(2)?]);
                4 + size as usize + 1
            }
            _ => 2,
        };
        Some(len)
    }

    fn process(&mut self) {
        while let Some(len) = self.frame_len() {
            if self.frame.len() < len {
                break;
            }
            let frame: Vec<u8> = self.frame.drain(..len).collect();
            if !self.silent {
                self.handle(&frame);
            }
        }
    }

    fn handle(&mut self, frame: &[u8]) {
        let ok = [status::INSYNC, status::OK];
        match frame[0] {
            commands::GET_SYNC => {
                let good = self.sync_answers.get(self.syncs).copied().unwrap_or(true);
                self.syncs += 1;
                if good {
                    self.queue(&ok);
                } else {
                    self.queue(&[status::INSYNC, status::NOSYNC]);
                }
            }
            commands::LOAD_ADDRESS => {
                self.address = u16::from_le_bytes([frame[1], frame[2]]);
                self.queue(&ok);
            }
            commands::PROG_PAGE => {
                let start = self.address as usize * 2;
                let data = &frame[4..frame.len() - 1];
                self.flash[start..start + data.len()].copy_from_slice(data);
                self.pages_written.push(self.address);
                self.queue(&ok);
            }
            commands::READ_PAGE => {
                let len = u16::from_be_bytes([frame[1], frame[2]]) as usize;
                let start = self.address as usize * 2;
                let mut page = self.flash[start..start + len].to_vec();
                if let Some((at, value)) = self.corrupt {
                    if (start..start + len).contains(&at) {
                        page[at - start] = value;
                    }
                }
                self.queue(&[status::INSYNC]);
                match self.stall_read_after {
                    Some(n) => self.queue(&page[..n]),
                    None => {
                        self.queue(&page);
                        self.queue(&[status::OK]);
                    }
                }
            }
            commands::READ_SIGN => {
                self.queue(&[status::INSYNC, 0x1e, 0x95, 0x0f, status::OK]);
            }
            commands::GET_PARAMETER => {
                let value = match frame[1] {
                    0x81 => 8,
                    0x82 => 3,
                    _ => 0,
                };
                self.queue(&[status::INSYNC, value, status::OK]);
            }
            commands::LEAVE_PROGMODE => {
                self.left_progmode = true;
                self.queue(&ok);
            }
            _ => self.queue(&[status::NOSYNC]),
        }
    }
}

impl Transport for MockTarget {
    fn send_raw(&mut self, raw: &[u8]) -> Result<()> {
        self.sent.extend_from_slice(raw);
        self.frame.extend_from_slice(raw);
        self.process();
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.rx.len())
    }

    fn recv_byte(&mut self) -> Result<u8> {
        self.rx.pop_front().ok_or_else(|| {
            Error::Transport(serialport::Error::new(
                serialport::ErrorKind::Io(std::io::ErrorKind::UnexpectedEof),
                "no byte available",
            ))
        })
    }

    fn set_reset(&mut self, asserted: bool) -> Result<()> {
        if asserted {
            self.resets += 1;
        }
        Ok(())
    }

    fn set_break(&mut self, low: bool) -> Result<()> {
        if low {
            self.breaks += 1;
        }
        Ok(())
    }

    fn flush_input(&mut self) -> Result<()> {
        self.rx.clear();
        Ok(())
    }

    fn restart(&mut self, baudrate: u32) -> Result<()> {
        self.restarts.push(baudrate);
        self.rx.clear();
        Ok(())
    }
}
