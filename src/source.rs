//! Random-access byte source holding a firmware image.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::Result;

/// Anything a hex file can be read from by byte offset.
pub trait LineSource {
    /// Total size in bytes.
    fn size(&mut self) -> Result<u64>;

    /// Read up to `buf.len()` bytes at `offset`. Short only at end of file.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;
}

impl<R: Read + Seek> LineSource for R {
    fn size(&mut self) -> Result<u64> {
        Ok(self.seek(SeekFrom::End(0))?)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

pub fn open<P: AsRef<Path>>(path: P) -> Result<File> {
    let p = path.as_ref();
    let file = File::open(p)?;
    log::info!("Opened {}", p.display());
    Ok(file)
}
