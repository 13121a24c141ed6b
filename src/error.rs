/// Custom Result type for bqpipe operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the bqpipe library, encompassing all possible error cases
/// that can occur while writing or processing a block stream.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub enum Error {
    /// Errors related to stream and block header processing
    HeaderError(#[from] HeaderError),
    /// Errors raised while pulling raw blocks from the input stream
    InputError(#[from] InputError),
    /// Errors raised while decompressing blocks or parsing records
    FormatError(#[from] FormatError),
    /// A record buffer contained at least one invalid record
    ValidationError(#[from] ValidationError),
    /// Internal faults in the pipeline machinery
    ResourceError(#[from] ResourceError),
    /// Errors that occur during write operations
    WriteError(#[from] WriteError),
    /// Standard I/O errors from the Rust standard library
    IoError(#[from] std::io::Error),
    /// Errors from the bitnuc nucleotide processing library
    BitnucError(#[from] bitnuc::NucleotideError),
    /// Generic errors that can occur in any part of the system
    AnyhowError(#[from] anyhow::Error),
}

/// Errors specific to processing and validating stream headers
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    /// The magic number in the header does not match the expected value
    #[error("Invalid magic number: {0}")]
    InvalidMagicNumber(u32),

    /// The format version in the header is not supported
    #[error("Invalid format version: {0}")]
    InvalidFormatVersion(u8),

    /// The sequence length stored in the header is zero
    #[error("Invalid sequence length: {0}")]
    InvalidSequenceLength(u32),

    /// The size of the data does not match what was specified in the header
    ///
    /// # Arguments
    /// * First `usize` - The actual number of bytes provided
    /// * Second `usize` - The expected number of bytes according to the header
    #[error("Invalid number of bytes provided: {0}. Expected: {1}")]
    InvalidSize(usize, usize),
}

/// Errors raised while reading raw blocks from the input stream
#[derive(thiserror::Error, Debug)]
pub enum InputError {
    /// The block header magic number does not match
    ///
    /// # Arguments
    /// * `u64` - The magic number that was found
    /// * `usize` - The sequence id of the block
    #[error("Invalid block magic number: {0:#x} (block {1})")]
    InvalidBlockMagicNumber(u64, usize),

    /// The stream ended in the middle of a block frame
    ///
    /// # Fields
    /// * `seq` - Sequence id of the truncated block
    /// * `expected` - Number of bytes the frame declared
    /// * `got` - Number of bytes that could be read
    #[error("Block {seq} is truncated: expected {expected} bytes, got {got}")]
    TruncatedBlock {
        seq: usize,
        expected: usize,
        got: usize,
    },

    /// Reading from the underlying stream failed
    #[error("Failed to read block {seq}: {source}")]
    Read {
        seq: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while decompressing blocks or decoding records
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    /// The block could not be decompressed
    #[error("Failed to decompress block {seq}: {source}")]
    Decompress {
        seq: usize,
        #[source]
        source: std::io::Error,
    },

    /// The decompressed size does not match the size declared in the block header
    #[error("Block {seq} decompressed to {got} bytes, expected {expected}")]
    DecompressedSize {
        seq: usize,
        expected: usize,
        got: usize,
    },

    /// The block contains a trailing partial record
    ///
    /// # Arguments
    /// * First `usize` - Number of trailing bytes
    /// * Second `usize` - Size of a single record in bytes
    #[error("Found a partial record of {0} bytes (record size is {1})")]
    PartialRecord(usize, usize),

    /// The number of records decoded from a block differs from its header
    #[error("Block {seq} declared {expected} records but contained {got}")]
    RecordCount {
        seq: usize,
        expected: usize,
        got: usize,
    },

    /// A record buffer was created with a record size of zero
    #[error("Record size must be greater than zero")]
    EmptyRecordSize,
}

/// A record buffer failed validation
///
/// # Fields
/// * `buffer` - Id of the failing record buffer
/// * `record` - Index of the first invalid record within the buffer
/// * `fragments` - Number of fragments of the buffer that reported failures
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Record buffer {buffer} failed validation: first invalid record at index {record} ({fragments} failing fragment(s))")]
pub struct ValidationError {
    pub buffer: usize,
    pub record: usize,
    pub fragments: usize,
}

/// Internal faults in the pipeline machinery, never recoverable
#[derive(thiserror::Error, Debug)]
pub enum ResourceError {
    /// An item was released to a pool that had nothing checked out
    #[error("Release to the {0} pool without a matching acquire")]
    OverRelease(&'static str),

    /// A second item was placed into an occupied stall slot
    #[error("The {0} stall slot is already occupied")]
    StallSlotOccupied(&'static str),

    /// A block reached the reorder set with an id that was already released or is pending
    #[error("Sequence id {seq} was already released or is pending (next expected is {next})")]
    UnexpectedSequence { seq: usize, next: usize },

    /// A stage handler panicked
    #[error("Stage handler panicked: {0}")]
    HandlerPanicked(String),

    /// Work was submitted after the scheduler stopped
    #[error("The scheduler is no longer accepting work")]
    SchedulerStopped,

    /// Configuration values that would make the pipeline unable to progress
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

/// Errors that can occur while writing a block stream
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// The length of the sequence being written does not match what was specified in the header
    ///
    /// # Fields
    /// * `expected` - The sequence length specified in the header
    /// * `got` - The actual length of the sequence being written
    #[error("Sequence length ({got}) does not match the header ({expected})")]
    UnexpectedSequenceLength { expected: u32, got: usize },

    /// The sequence contains invalid nucleotide characters
    ///
    /// # Arguments
    /// * `String` - Description of the invalid nucleotides found
    #[error("Invalid nucleotides found in sequence: {0}")]
    InvalidNucleotideSequence(String),

    /// Attempted to write data without first setting up the header
    #[error("Missing header in writer builder")]
    MissingHeader,

    /// The number of records per block was set to zero
    #[error("Block size must hold at least one record")]
    EmptyBlock,
}
