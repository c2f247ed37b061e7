//! Flash page blocks, the unit exchanged with the bootloader.

use crate::constants::PAGE_FILL;
use crate::error::{Error, Result};

/// Byte buffer with a fixed capacity that refuses writes past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl PageBuffer {
    pub fn new(capacity: usize) -> Self {
        PageBuffer {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, byte: u8) -> Result<()> {
        if self.is_full() {
            return Err(Error::PageOverflow {
                capacity: self.capacity,
            });
        }
        self.data.push(byte);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Valid bytes followed by fill up to the capacity.
    pub fn padded(&self) -> impl Iterator<Item = u8> + '_ {
        self.data
            .iter()
            .copied()
            .chain(std::iter::repeat(PAGE_FILL))
            .take(self.capacity)
    }
}

/// One page of program memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashPageBlock {
    /// Word address, as sent with `LOAD_ADDRESS`.
    pub start_address: u16,
    buffer: PageBuffer,
}

impl FlashPageBlock {
    pub fn new(capacity: usize) -> Self {
        FlashPageBlock {
            start_address: 0,
            buffer: PageBuffer::new(capacity),
        }
    }

    pub fn with_data(start_address: u16, capacity: usize, data: &[u8]) -> Result<Self> {
        let mut block = FlashPageBlock::new(capacity);
        block.start_address = start_address;
        block.extend(data)?;
        Ok(block)
    }

    pub fn push(&mut self, byte: u8) -> Result<()> {
        self.buffer.push(byte)
    }

    pub fn extend(&mut self, bytes: &[u8]) -> Result<()> {
        bytes.iter().try_for_each(|&b| self.buffer.push(b))
    }

    pub fn clear(&mut self) {
        self.start_address = 0;
        self.buffer.clear();
    }

    /// Number of meaningful bytes.
    pub fn size_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.is_full()
    }

    pub fn data(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn padded(&self) -> impl Iterator<Item = u8> + '_ {
        self.buffer.padded()
    }
}
