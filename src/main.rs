use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::info;
use memmap2::Mmap;
use seq_io::fastq::{Reader, Record};

use bqpipe::pipeline::{DEFAULT_BUFFER_RECORDS, DEFAULT_DECOMPRESS_BATCH, DEFAULT_PROGRESS_INTERVAL};
use bqpipe::{
    validate_stream, BlockWriter, BlockWriterBuilder, PipelineConfigBuilder, Policy, StreamHeader,
};

#[derive(Parser)]
#[command(name = "bqpipe", version, about = "Pack and validate BQZ block streams")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pack a FASTQ file into a BQZ stream
    Pack(PackArgs),
    /// Run the parallel validation pipeline over a BQZ stream
    Check(CheckArgs),
}

#[derive(clap::Args)]
struct PackArgs {
    /// Input FASTQ (optionally compressed)
    input: PathBuf,

    /// Output BQZ path
    #[arg(short, long)]
    output: PathBuf,

    /// Sequence length (defaults to the length of the first record)
    #[arg(short = 'L', long)]
    slen: Option<u32>,

    /// Records per block
    #[arg(short, long, default_value_t = bqpipe::format::DEFAULT_BLOCK_RECORDS)]
    block_records: u32,

    /// zstd compression level
    #[arg(short, long, default_value_t = bqpipe::format::DEFAULT_COMPRESSION_LEVEL)]
    level: i32,

    /// Store blocks without compression
    #[arg(short, long)]
    uncompressed: bool,

    /// How to handle non-ACGT nucleotides
    #[arg(short, long, value_enum, default_value_t = PolicyArg::Ignore)]
    policy: PolicyArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Ignore,
    Break,
    Random,
    A,
    C,
    G,
    T,
}
impl From<PolicyArg> for Policy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Ignore => Policy::IgnoreSequence,
            PolicyArg::Break => Policy::BreakOnInvalid,
            PolicyArg::Random => Policy::RandomDraw,
            PolicyArg::A => Policy::SetToA,
            PolicyArg::C => Policy::SetToC,
            PolicyArg::G => Policy::SetToG,
            PolicyArg::T => Policy::SetToT,
        }
    }
}

#[derive(clap::Args)]
struct CheckArgs {
    /// Input BQZ stream
    input: PathBuf,

    /// Worker threads (0 = all cores)
    #[arg(short = 'T', long, default_value_t = 0)]
    threads: usize,

    /// Records per record buffer
    #[arg(short = 'B', long, default_value_t = DEFAULT_BUFFER_RECORDS)]
    buffer_records: usize,

    /// Capacity of every block and buffer pool (0 = twice the thread count)
    #[arg(short = 'P', long, default_value_t = 0)]
    pool_capacity: usize,

    /// Raw blocks per decompression task
    #[arg(long, default_value_t = DEFAULT_DECOMPRESS_BATCH)]
    decompress_batch: usize,

    /// Validated records between progress lines (0 = off)
    #[arg(long, default_value_t = DEFAULT_PROGRESS_INTERVAL)]
    progress_interval: u64,
}

fn pack(args: &PackArgs) -> Result<()> {
    let (handle, _format) = niffler::from_path(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    let mut reader = Reader::new(handle);

    let mut writer = None;
    let mut skipped = 0usize;
    while let Some(record) = reader.next() {
        let record = record?;
        let seq = record.seq();
        if writer.is_none() {
            writer = Some(open_writer(args, seq.len())?);
        }
        if let Some(writer) = writer.as_mut() {
            if !writer.write_nucleotides(0, seq)? {
                skipped += 1;
            }
        }
    }

    match writer.as_mut() {
        Some(writer) => {
            writer.finish()?;
            info!(
                "Packed {} records into {} blocks ({skipped} skipped)",
                writer.records_written(),
                writer.blocks_written()
            );
        }
        None => anyhow::bail!("No records found in {}", args.input.display()),
    }
    Ok(())
}

fn open_writer(args: &PackArgs, first_len: usize) -> Result<BlockWriter<BufWriter<File>>> {
    let slen = match args.slen {
        Some(slen) => slen,
        None => u32::try_from(first_len)?,
    };
    let header = StreamHeader::new(slen)
        .with_compression(!args.uncompressed)
        .with_level(args.level)
        .with_block_records(args.block_records);
    let output = File::create(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    Ok(BlockWriterBuilder::default()
        .header(header)
        .policy(args.policy.into())
        .build(BufWriter::new(output))?)
}

fn check(args: &CheckArgs) -> Result<()> {
    let file = File::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    // SAFETY: the mapping is read-only and the file is not modified while mapped
    let mmap = unsafe { Mmap::map(&file)? };

    let mut builder = PipelineConfigBuilder::default()
        .threads(args.threads)
        .buffer_records(args.buffer_records)
        .decompress_batch(args.decompress_batch)
        .progress_interval(args.progress_interval);
    if args.pool_capacity > 0 {
        builder = builder.pool_capacity(args.pool_capacity);
    }
    let config = builder.build()?;

    let start = Instant::now();
    let stats = validate_stream(Cursor::new(mmap), config)?;
    info!(
        "Validated {} records from {} blocks in {:.2?}",
        stats.records_validated,
        stats.blocks_read,
        start.elapsed()
    );
    println!("blocks_read\t{}", stats.blocks_read);
    println!("blocks_decompressed\t{}", stats.blocks_decompressed);
    println!("records_parsed\t{}", stats.records_parsed);
    println!("records_validated\t{}", stats.records_validated);
    println!("buffers_parsed\t{}", stats.buffers_parsed);
    println!("buffers_validated\t{}", stats.buffers_validated);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    match &cli.command {
        Command::Pack(args) => pack(args),
        Command::Check(args) => check(args),
    }
}
