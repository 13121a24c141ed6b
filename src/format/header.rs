//! # Stream and block headers
//!
//! A BQZ stream starts with a 32-byte [`StreamHeader`] followed by any number of
//! block frames. Each frame is a 32-byte [`BlockHeader`] and the (optionally zstd
//! compressed) payload it describes. Both headers start with a magic number.

use std::io::Write;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{HeaderError, InputError, Result};

/// Magic number for stream identification: "BQZS" in ASCII (0x535A5142)
const MAGIC: u32 = 0x535A_5142;

/// Magic number for block identification: "BQZBLOCK" in ASCII (0x4B434F4C425A5142)
const BLOCK_MAGIC: u64 = 0x4B43_4F4C_425A_5142;

/// Current format version number
const FORMAT: u8 = 1;

/// Size of the stream header in bytes
pub const SIZE_HEADER: usize = 32;

/// Size of a block header in bytes
pub const SIZE_BLOCK_HEADER: usize = 32;

/// Default number of records per block
pub const DEFAULT_BLOCK_RECORDS: u32 = 8192;

/// Default zstd compression level
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Reserved bytes of the stream header
pub const RESERVED_BYTES: [u8; 14] = [42; 14];

/// Reserved bytes of a block header
pub const RESERVED_BYTES_BLOCK: [u8; 12] = [42; 12];

/// Number of 64-bit words used to store a packed sequence of `slen` nucleotides
#[must_use]
pub fn sequence_words(slen: u32) -> usize {
    (slen as usize).div_ceil(32)
}

/// Stream header of a BQZ stream
///
/// # Layout
///
/// | bytes  | field           |
/// |--------|-----------------|
/// | 0..4   | magic           |
/// | 4      | format          |
/// | 5..9   | `slen`          |
/// | 9      | compressed flag |
/// | 10..14 | zstd level      |
/// | 14..18 | block records   |
/// | 18..32 | reserved        |
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamHeader {
    /// Magic number to identify the stream ("BQZS")
    pub magic: u32,

    /// Version of the format
    pub format: u8,

    /// Sequence length of every record
    pub slen: u32,

    /// Whether block payloads are zstd compressed
    pub compressed: bool,

    /// Compression level the payloads were written with
    pub level: i32,

    /// Maximum number of records per block
    pub block_records: u32,

    /// Reserved for future extensions
    pub reserved: [u8; 14],
}
impl StreamHeader {
    /// Creates a header for compressed records of `slen` nucleotides
    #[must_use]
    pub fn new(slen: u32) -> Self {
        Self {
            magic: MAGIC,
            format: FORMAT,
            slen,
            compressed: true,
            level: DEFAULT_COMPRESSION_LEVEL,
            block_records: DEFAULT_BLOCK_RECORDS,
            reserved: RESERVED_BYTES,
        }
    }

    #[must_use]
    pub fn with_compression(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn with_block_records(mut self, block_records: u32) -> Self {
        self.block_records = block_records;
        self
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Size of one record in 64-bit words (flag + packed sequence)
    #[must_use]
    pub fn record_words(&self) -> usize {
        1 + sequence_words(self.slen)
    }

    /// Size of one record in bytes
    #[must_use]
    pub fn record_bytes(&self) -> usize {
        8 * self.record_words()
    }

    /// Parses a header, validating the magic number, format version and sequence length
    pub fn from_bytes(buffer: &[u8; SIZE_HEADER]) -> Result<Self> {
        let magic = LittleEndian::read_u32(&buffer[0..4]);
        if magic != MAGIC {
            return Err(HeaderError::InvalidMagicNumber(magic).into());
        }
        let format = buffer[4];
        if format != FORMAT {
            return Err(HeaderError::InvalidFormatVersion(format).into());
        }
        let slen = LittleEndian::read_u32(&buffer[5..9]);
        if slen == 0 {
            return Err(HeaderError::InvalidSequenceLength(slen).into());
        }
        let mut reserved = [0u8; 14];
        reserved.copy_from_slice(&buffer[18..32]);
        Ok(Self {
            magic,
            format,
            slen,
            compressed: buffer[9] != 0,
            level: LittleEndian::read_i32(&buffer[10..14]),
            block_records: LittleEndian::read_u32(&buffer[14..18]),
            reserved,
        })
    }

    /// Parses a header from a slice that must be exactly [`SIZE_HEADER`] bytes long
    pub fn from_buffer(buffer: &[u8]) -> Result<Self> {
        let bytes: &[u8; SIZE_HEADER] = buffer
            .try_into()
            .map_err(|_| HeaderError::InvalidSize(buffer.len(), SIZE_HEADER))?;
        Self::from_bytes(bytes)
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buffer = [0u8; SIZE_HEADER];
        LittleEndian::write_u32(&mut buffer[0..4], self.magic);
        buffer[4] = self.format;
        LittleEndian::write_u32(&mut buffer[5..9], self.slen);
        buffer[9] = u8::from(self.compressed);
        LittleEndian::write_i32(&mut buffer[10..14], self.level);
        LittleEndian::write_u32(&mut buffer[14..18], self.block_records);
        buffer[18..32].copy_from_slice(&self.reserved);
        writer.write_all(&buffer)?;
        Ok(())
    }
}

/// Header of a single block frame
///
/// # Layout
///
/// | bytes  | field             |
/// |--------|-------------------|
/// | 0..8   | magic             |
/// | 8..12  | payload size      |
/// | 12..16 | decompressed size |
/// | 16..20 | record count      |
/// | 20..32 | reserved          |
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockHeader {
    /// Magic number to identify the block ("BQZBLOCK")
    pub magic: u64,

    /// Size of the payload as stored
    pub size: u32,

    /// Size of the payload once decompressed
    pub decompressed_size: u32,

    /// Number of records in the block
    pub records: u32,

    /// Reserved for future extensions
    pub reserved: [u8; 12],
}
impl BlockHeader {
    #[must_use]
    pub fn new(size: u32, decompressed_size: u32, records: u32) -> Self {
        Self {
            magic: BLOCK_MAGIC,
            size,
            decompressed_size,
            records,
            reserved: RESERVED_BYTES_BLOCK,
        }
    }

    /// Parses the header of block `seq`, validating its magic number
    pub fn from_bytes(buffer: &[u8; SIZE_BLOCK_HEADER], seq: usize) -> Result<Self> {
        let magic = LittleEndian::read_u64(&buffer[0..8]);
        if magic != BLOCK_MAGIC {
            return Err(InputError::InvalidBlockMagicNumber(magic, seq).into());
        }
        let mut reserved = [0u8; 12];
        reserved.copy_from_slice(&buffer[20..32]);
        Ok(Self {
            magic,
            size: LittleEndian::read_u32(&buffer[8..12]),
            decompressed_size: LittleEndian::read_u32(&buffer[12..16]),
            records: LittleEndian::read_u32(&buffer[16..20]),
            reserved,
        })
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buffer = [0u8; SIZE_BLOCK_HEADER];
        LittleEndian::write_u64(&mut buffer[0..8], self.magic);
        LittleEndian::write_u32(&mut buffer[8..12], self.size);
        LittleEndian::write_u32(&mut buffer[12..16], self.decompressed_size);
        LittleEndian::write_u32(&mut buffer[16..20], self.records);
        buffer[20..32].copy_from_slice(&self.reserved);
        writer.write_all(&buffer)?;
        Ok(())
    }
}
