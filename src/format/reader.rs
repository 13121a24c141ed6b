use std::io::{self, BufRead, BufReader, Read};

use log::debug;

use crate::codec::BlockSource;
use crate::error::{HeaderError, InputError, Result};
use crate::pipeline::RawBlock;

use super::header::{BlockHeader, StreamHeader, SIZE_BLOCK_HEADER, SIZE_HEADER};

/// Reads block frames from a BQZ stream
///
/// The stream header is read on construction. Frames are then pulled one at a time
/// by the pipeline's reader stage; the reader peeks past each frame to know whether
/// it was the last one.
pub struct FrameReader<R: Read> {
    inner: BufReader<R>,
    header: StreamHeader,
    frames: usize,
}
impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Result<Self> {
        let mut inner = BufReader::new(inner);
        let mut buffer = [0u8; SIZE_HEADER];
        let got = read_full(&mut inner, &mut buffer)?;
        if got != SIZE_HEADER {
            return Err(HeaderError::InvalidSize(got, SIZE_HEADER).into());
        }
        let header = StreamHeader::from_bytes(&buffer)?;
        debug!(
            "Opened BQZ stream: slen={} compressed={} block_records={}",
            header.slen, header.compressed, header.block_records
        );
        Ok(Self {
            inner,
            header,
            frames: 0,
        })
    }

    #[must_use]
    pub fn header(&self) -> StreamHeader {
        self.header
    }

    /// Number of frames read so far
    #[must_use]
    pub fn frames(&self) -> usize {
        self.frames
    }

    fn at_eof(&mut self, seq: usize) -> Result<bool> {
        match self.inner.fill_buf() {
            Ok(buf) => Ok(buf.is_empty()),
            Err(source) => Err(InputError::Read { seq, source }.into()),
        }
    }

    fn read_exact_frame(&mut self, buf: &mut [u8], seq: usize) -> Result<()> {
        let got = read_full(&mut self.inner, buf).map_err(|source| InputError::Read { seq, source })?;
        if got != buf.len() {
            return Err(InputError::TruncatedBlock {
                seq,
                expected: buf.len(),
                got,
            }
            .into());
        }
        Ok(())
    }
}
impl<R: Read + Send> BlockSource for FrameReader<R> {
    fn read_chunk(&mut self, block: &mut RawBlock) -> Result<bool> {
        let seq = block.seq();
        if self.at_eof(seq)? {
            // Streams without frames still produce one (empty) final block
            block.payload.clear();
            block.decompressed_len = 0;
            block.expected_records = Some(0);
            self.frames += 1;
            return Ok(true);
        }

        let mut buffer = [0u8; SIZE_BLOCK_HEADER];
        self.read_exact_frame(&mut buffer, seq)?;
        let header = BlockHeader::from_bytes(&buffer, seq)?;

        block.payload.resize(header.size as usize, 0);
        self.read_exact_frame(&mut block.payload, seq)?;
        block.decompressed_len = header.decompressed_size as usize;
        block.expected_records = Some(header.records as usize);
        self.frames += 1;

        self.at_eof(seq)
    }
}

/// Fills `buf` as far as the reader allows; returns the number of bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::Error;
    use std::io::Cursor;

    fn stream(frames: &[(&[u8], u32)]) -> anyhow::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        StreamHeader::new(32)
            .with_compression(false)
            .write_bytes(&mut bytes)?;
        for (payload, records) in frames {
            let size = u32::try_from(payload.len())?;
            BlockHeader::new(size, size, *records).write_bytes(&mut bytes)?;
            bytes.extend_from_slice(payload);
        }
        Ok(bytes)
    }

    #[test]
    fn test_reads_frames_and_flags_last() -> anyhow::Result<()> {
        let bytes = stream(&[(&[1; 16], 1), (&[2; 32], 2)])?;
        let mut reader = FrameReader::new(Cursor::new(bytes))?;
        assert_eq!(reader.header().slen, 32);

        let mut block = RawBlock::default();
        assert!(!reader.read_chunk(&mut block)?);
        assert_eq!(block.payload, vec![1; 16]);
        assert_eq!(block.expected_records, Some(1));

        assert!(reader.read_chunk(&mut block)?);
        assert_eq!(block.payload, vec![2; 32]);
        assert_eq!(block.decompressed_len, 32);
        assert_eq!(reader.frames(), 2);
        Ok(())
    }

    #[test]
    fn test_empty_stream_yields_empty_final_block() -> anyhow::Result<()> {
        let mut reader = FrameReader::new(Cursor::new(stream(&[])?))?;
        let mut block = RawBlock::default();
        assert!(reader.read_chunk(&mut block)?);
        assert!(block.payload.is_empty());
        assert_eq!(block.expected_records, Some(0));
        Ok(())
    }

    #[test]
    fn test_truncated_payload() -> anyhow::Result<()> {
        let mut bytes = stream(&[(&[7; 64], 2)])?;
        bytes.truncate(bytes.len() - 10);
        let mut reader = FrameReader::new(Cursor::new(bytes))?;
        let err = reader.read_chunk(&mut RawBlock::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::InputError(InputError::TruncatedBlock {
                expected: 64,
                got: 54,
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn test_short_stream_header() {
        let result = FrameReader::new(Cursor::new(vec![0u8; 12]));
        assert!(matches!(
            result,
            Err(Error::HeaderError(HeaderError::InvalidSize(12, SIZE_HEADER)))
        ));
    }
}
