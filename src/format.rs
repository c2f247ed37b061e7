//! Intel-HEX records
use crate::constants::record;
use crate::error::{RecordError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    Data,
    EndOfFile,
    /// Upper address bits in 16-byte paragraphs.
    ExtendedSegmentAddress,
    /// Upper 16 bits of a 32-bit byte address.
    ExtendedLinearAddress,
    /// Start address records and anything else: decoded but not acted on.
    Unsupported(u8),
}

impl From<u8> for RecordType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => RecordType::Data,
            0x01 => RecordType::EndOfFile,
            0x02 => RecordType::ExtendedSegmentAddress,
            0x04 => RecordType::ExtendedLinearAddress,
            other => RecordType::Unsupported(other),
        }
    }
}

/// One decoded line of an Intel-HEX file.
///
/// The data field is kept as undecoded hex digits borrowed from the line;
/// bytes are pulled out one at a time with [`HexRecord::data_byte`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord<'a> {
    pub byte_count: u8,
    /// Byte address from the record, not yet converted to words.
    pub address: u16,
    pub record_type: RecordType,
    pub checksum: u8,
    digits: &'a [u8],
}

impl<'a> HexRecord<'a> {
    /// Decode one line. Anything after the checksum (line terminator, the
    /// start of the next line) is ignored.
    pub fn decode(line: &'a [u8]) -> Result<Self, RecordError> {
        if line.first() != Some(&b':') {
            return Err(RecordError::MissingColon);
        }
        if line.len() < record::MIN_CHARS {
            return Err(RecordError::TooShort(line.len()));
        }

        let byte_count = decode_pair(&line[1..3]).ok_or(RecordError::InvalidDigits("byte count"))?;
        let mut address = [0u8; 2];
        hex::decode_to_slice(&line[3..7], &mut address)
            .map_err(|_| RecordError::InvalidDigits("address"))?;
        let record_type =
            decode_pair(&line[7..9]).ok_or(RecordError::InvalidDigits("record type"))?;

        let data_end = 9 + byte_count as usize * 2;
        let checksum = line
            .get(data_end..data_end + 2)
            .ok_or(RecordError::Truncated("checksum"))
            .and_then(|pair| decode_pair(pair).ok_or(RecordError::InvalidDigits("checksum")))?;

        Ok(HexRecord {
            byte_count,
            address: u16::from_be_bytes(address),
            record_type: record_type.into(),
            checksum,
            digits: &line[9..data_end],
        })
    }

    /// The raw hex digits of the data field, `byte_count * 2` characters.
    pub fn data_digits(&self) -> &'a [u8] {
        self.digits
    }

    pub fn data_byte(&self, index: usize) -> Result<u8, RecordError> {
        self.digits
            .get(index * 2..index * 2 + 2)
            .and_then(decode_pair)
            .ok_or(RecordError::InvalidDigits("data"))
    }

    /// Characters this record occupies in the file, terminator included.
    pub fn stride(&self) -> u64 {
        (record::MIN_CHARS + self.byte_count as usize * 2 + record::TERMINATOR_CHARS) as u64
    }

    /// Byte offset added to the address of the data records that follow an
    /// extended address record. `None` for every other record type.
    pub fn address_base(&self) -> Option<Result<u32, RecordError>> {
        let (name, shift) = match self.record_type {
            RecordType::ExtendedSegmentAddress => ("extended segment address", 4),
            RecordType::ExtendedLinearAddress => ("extended linear address", 16),
            _ => return None,
        };
        if self.byte_count != 2 {
            return Some(Err(RecordError::BadLength(name, self.byte_count)));
        }
        Some(
            self.data_byte(0)
                .and_then(|hi| Ok(u16::from_be_bytes([hi, self.data_byte(1)?])))
                .map(|value| (value as u32) << shift),
        )
    }

    /// Two's complement of the sum of every byte before the checksum.
    pub fn computed_checksum(&self) -> Result<u8, RecordError> {
        let mut sum = self
            .byte_count
            .wrapping_add((self.address >> 8) as u8)
            .wrapping_add(self.address as u8)
            .wrapping_add(self.record_type.into());
        for i in 0..self.byte_count as usize {
            sum = sum.wrapping_add(self.data_byte(i)?);
        }
        Ok(sum.wrapping_neg())
    }
}

impl From<RecordType> for u8 {
    fn from(value: RecordType) -> Self {
        match value {
            RecordType::Data => 0x00,
            RecordType::EndOfFile => 0x01,
            RecordType::ExtendedSegmentAddress => 0x02,
            RecordType::ExtendedLinearAddress => 0x04,
            RecordType::Unsupported(other) => other,
        }
    }
}

fn decode_pair(pair: &[u8]) -> Option<u8> {
    let mut out = [0u8; 1];
    hex::decode_to_slice(pair, &mut out).ok()?;
    Some(out[0])
}

/// Render `data` as a CRLF-terminated Intel-HEX file starting at byte address 0.
///
/// Images past 64 KiB get extended linear address records.
pub fn write_ihex(data: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut upper = 0u16;
    for (i, chunk) in data.chunks(record::DUMP_CHUNK).enumerate() {
        let address = i * record::DUMP_CHUNK;
        if (address >> 16) as u16 != upper {
            upper = (address >> 16) as u16;
            out.push_str(&ihex::Record::ExtendedLinearAddress(upper).to_record_string()?);
            out.push_str("\r\n");
        }
        let rec = ihex::Record::Data {
            offset: address as u16,
            value: chunk.to_vec(),
        };
        out.push_str(&rec.to_record_string()?);
        out.push_str("\r\n");
    }
    out.push_str(&ihex::Record::EndOfFile.to_record_string()?);
    out.push_str("\r\n");
    Ok(out)
}
