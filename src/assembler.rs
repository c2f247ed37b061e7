//! Turns a stream of hex records into flash page blocks.

use crate::constants::record;
use crate::error::{Error, Result};
use crate::format::{HexRecord, RecordType};
use crate::page::FlashPageBlock;
use crate::source::LineSource;

/// Walks a hex file one record at a time and packs the data into pages.
///
/// Records are assumed to be contiguous and in address order. Each record is
/// expected to occupy exactly `11 + 2 * byte_count` characters plus CRLF.
pub struct PageAssembler<S> {
    source: S,
    consumed: u64,
    total: u64,
    /// Data bytes of the record under the cursor already placed in a page.
    placed: usize,
    /// Byte offset set by the last extended address record.
    base: u32,
    verify_checksums: bool,
    line: Vec<u8>,
}

impl<S: LineSource> PageAssembler<S> {
    pub fn new(mut source: S) -> Result<Self> {
        let total = source.size()?;
        log::debug!("hex image: {} bytes", total);
        Ok(PageAssembler {
            source,
            consumed: 0,
            total,
            placed: 0,
            base: 0,
            verify_checksums: false,
            line: vec![0u8; record::MAX_CHARS],
        })
    }

    pub fn verify_checksums(mut self, enable: bool) -> Self {
        self.verify_checksums = enable;
        self
    }

    /// Go back to the start of the file.
    pub fn rewind(&mut self) -> Result<()> {
        self.total = self.source.size()?;
        self.consumed = 0;
        self.placed = 0;
        self.base = 0;
        Ok(())
    }

    pub fn more_to_consume(&self) -> bool {
        self.consumed < self.total
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Fill `block` with the next page worth of data and return its size.
    ///
    /// The first record contributing to the block fixes its start address.
    /// A record that does not fit is split: the rest of it opens the next block.
    /// A change of extended address closes the block early.
    pub fn fill(&mut self, block: &mut FlashPageBlock) -> Result<usize> {
        block.clear();
        let mut started = false;

        while self.more_to_consume() && !block.is_full() {
            let offset = self.consumed;
            let want = record::MAX_CHARS.min((self.total - offset) as usize);
            let len = self.source.read_at(offset, &mut self.line[..want])?;
            if len < record::MIN_CHARS {
                log::error!("Incomplete hex record @ byte {}", offset);
                return Err(Error::IncompleteRecord { offset, len });
            }

            let rec = HexRecord::decode(&self.line[..len])
                .map_err(|source| Error::MalformedRecord { offset, source })?;
            if self.verify_checksums {
                let computed = rec
                    .computed_checksum()
                    .map_err(|source| Error::MalformedRecord { offset, source })?;
                if computed != rec.checksum {
                    return Err(Error::ChecksumMismatch {
                        offset,
                        expected: rec.checksum,
                        computed,
                    });
                }
            }

            match rec.record_type {
                RecordType::Data => (),
                RecordType::EndOfFile => {
                    log::trace!("end of file record @ byte {}", offset);
                    self.consumed = self.total;
                    break;
                }
                RecordType::ExtendedSegmentAddress | RecordType::ExtendedLinearAddress => {
                    let base = rec
                        .address_base()
                        .unwrap_or(Ok(self.base))
                        .map_err(|source| Error::MalformedRecord { offset, source })?;
                    if base != self.base && !block.is_empty() {
                        break;
                    }
                    log::trace!("address base 0x{:x} @ byte {}", base, offset);
                    self.base = base;
                    self.consumed += rec.stride();
                    continue;
                }
                RecordType::Unsupported(kind) => {
                    log::warn!(
                        "Skipping unsupported record type 0x{:02x} @ byte {}",
                        kind,
                        offset
                    );
                    self.consumed += rec.stride();
                    continue;
                }
            }

            if !started {
                let address = self.base + rec.address as u32 + self.placed as u32;
                // byte address -> word address
                block.start_address = u16::try_from(address / 2)
                    .map_err(|_| Error::AddressOutOfRange { offset, address })?;
                started = true;
            }

            let count = rec.byte_count as usize;
            while self.placed < count && !block.is_full() {
                let byte = rec
                    .data_byte(self.placed)
                    .map_err(|source| Error::MalformedRecord { offset, source })?;
                block.push(byte)?;
                self.placed += 1;
            }
            if self.placed == count {
                self.placed = 0;
                self.consumed += rec.stride();
            }
        }

        // never move past the end even if the last line lacks its terminator
        self.consumed = self.consumed.min(self.total);
        Ok(block.size_bytes())
    }
}
