use crate::error::{FormatError, Result};
use crate::pipeline::RecordBuffer;

use super::{ParseProgress, RecordParser};

/// Parses little-endian records of a fixed number of 64-bit words
#[derive(Debug, Clone, Copy)]
pub struct FixedRecordParser {
    record_words: usize,
}
impl FixedRecordParser {
    pub fn new(record_words: usize) -> Result<Self> {
        if record_words == 0 {
            return Err(FormatError::EmptyRecordSize.into());
        }
        Ok(Self { record_words })
    }

    #[must_use]
    pub fn record_bytes(&self) -> usize {
        self.record_words * 8
    }
}
impl RecordParser for FixedRecordParser {
    fn record_words(&self) -> usize {
        self.record_words
    }

    fn parse_into(&self, bytes: &[u8], buffer: &mut RecordBuffer) -> Result<ParseProgress> {
        debug_assert_eq!(buffer.record_words(), self.record_words);
        let record_bytes = self.record_bytes();
        let complete = bytes.len() / record_bytes;
        let records = complete.min(buffer.remaining());

        // Trailing bytes are only reachable once every complete record is taken
        let trailing = bytes.len() % record_bytes;
        if records == complete && trailing != 0 {
            return Err(FormatError::PartialRecord(trailing, record_bytes).into());
        }

        buffer.extend_from_le_bytes(bytes, records);
        Ok(ParseProgress {
            records,
            consumed: records * record_bytes,
        })
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::Error;

    fn encode(records: &[[u64; 2]]) -> Vec<u8> {
        records
            .iter()
            .flatten()
            .flat_map(|word| word.to_le_bytes())
            .collect()
    }

    #[test]
    fn test_parse_stops_when_buffer_is_full() -> anyhow::Result<()> {
        let parser = FixedRecordParser::new(2)?;
        let bytes = encode(&[[1, 10], [2, 20], [3, 30]]);
        let mut buffer = RecordBuffer::new(2, 2);

        let progress = parser.parse_into(&bytes, &mut buffer)?;
        assert_eq!(progress.records, 2);
        assert_eq!(progress.consumed, 32);
        assert!(buffer.is_full());
        assert_eq!(buffer.record(1), &[2, 20]);

        let mut next = RecordBuffer::new(2, 2);
        let progress = parser.parse_into(&bytes[progress.consumed..], &mut next)?;
        assert_eq!(progress.records, 1);
        assert_eq!(next.record(0), &[3, 30]);
        Ok(())
    }

    #[test]
    fn test_partial_record_is_rejected() -> anyhow::Result<()> {
        let parser = FixedRecordParser::new(2)?;
        let mut bytes = encode(&[[1, 10]]);
        bytes.extend_from_slice(&[0; 5]);
        let mut buffer = RecordBuffer::new(2, 4);
        match parser.parse_into(&bytes, &mut buffer) {
            Err(Error::FormatError(FormatError::PartialRecord(5, 16))) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_partial_record_deferred_while_buffer_full() -> anyhow::Result<()> {
        let parser = FixedRecordParser::new(1)?;
        let mut bytes = encode(&[[1, 2]]);
        bytes.push(0);
        let mut buffer = RecordBuffer::new(1, 1);
        let progress = parser.parse_into(&bytes, &mut buffer)?;
        assert_eq!(progress.records, 1);
        Ok(())
    }

    #[test]
    fn test_zero_record_size() {
        assert!(FixedRecordParser::new(0).is_err());
    }
}
