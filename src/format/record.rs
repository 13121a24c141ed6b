use std::ops::Range;

use crate::codec::RecordValidator;
use crate::pipeline::RecordBuffer;

use super::header::sequence_words;

/// Checks that packed records are in canonical 2-bit form
///
/// A record is a flag word followed by `ceil(slen / 32)` sequence words. It is
/// valid when decoding its sequence and encoding it again reproduces the stored
/// words exactly, which fails if any padding bit past `slen` is set.
#[derive(Debug, Clone, Copy)]
pub struct PackedRecordValidator {
    slen: u32,
}
impl PackedRecordValidator {
    #[must_use]
    pub fn new(slen: u32) -> Self {
        Self { slen }
    }

    #[must_use]
    pub fn record_words(&self) -> usize {
        1 + sequence_words(self.slen)
    }

    fn check(&self, record: &[u64], dbuf: &mut Vec<u8>, ebuf: &mut Vec<u64>) -> bool {
        if record.len() != self.record_words() {
            return false;
        }
        let words = &record[1..];
        dbuf.clear();
        ebuf.clear();
        bitnuc::decode(words, self.slen as usize, dbuf).is_ok()
            && bitnuc::encode(dbuf, ebuf).is_ok()
            && ebuf.as_slice() == words
    }
}
impl RecordValidator for PackedRecordValidator {
    fn is_valid_record(&self, record: &[u64]) -> bool {
        self.check(record, &mut Vec::new(), &mut Vec::new())
    }

    fn first_invalid(&self, buffer: &RecordBuffer, range: Range<usize>) -> Option<usize> {
        let mut dbuf = Vec::with_capacity(self.slen as usize);
        let mut ebuf = Vec::with_capacity(sequence_words(self.slen));
        buffer
            .records_in(range)
            .find(|(_, record)| !self.check(record, &mut dbuf, &mut ebuf))
            .map(|(index, _)| index)
    }
}
