use rand::Rng;

use crate::{error::WriteError, Result};

/// Seed for the random draws made by [`Policy::RandomDraw`]
///
/// A fixed seed keeps packed streams reproducible across runs.
pub const RNG_SEED: u64 = 42;

/// Policy for handling sequences with non-ACGT nucleotides while packing records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Policy {
    #[default]
    IgnoreSequence,
    BreakOnInvalid,
    RandomDraw,
    SetToA,
    SetToC,
    SetToG,
    SetToT,
}
impl Policy {
    /// Convert the sequence according to the N-policy
    ///
    /// Clears `ibuf` first, then fills it with the corrected sequence.
    ///
    /// Returns whether the sequence should be written at all, or an error if the policy
    /// is [`Policy::BreakOnInvalid`].
    pub fn handle<R: Rng>(self, sequence: &[u8], ibuf: &mut Vec<u8>, rng: &mut R) -> Result<bool> {
        ibuf.clear();
        let substitute = match self {
            Self::IgnoreSequence => return Ok(false),
            Self::BreakOnInvalid => {
                let sequence = String::from_utf8_lossy(sequence).into_owned();
                return Err(WriteError::InvalidNucleotideSequence(sequence).into());
            }
            Self::RandomDraw => None,
            Self::SetToA => Some(b'A'),
            Self::SetToC => Some(b'C'),
            Self::SetToG => Some(b'G'),
            Self::SetToT => Some(b'T'),
        };
        ibuf.extend(sequence.iter().map(|&n| match n {
            b'A' | b'C' | b'G' | b'T' => n,
            _ => substitute.unwrap_or_else(|| b"ACGT"[rng.random_range(0..4)]),
        }));
        Ok(true)
    }
}
