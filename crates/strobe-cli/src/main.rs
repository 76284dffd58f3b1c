#![forbid(unsafe_code)]

//! Record and inspect command-stream captures from the command line.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};

use strobe_csr::{
    BatchBuffer, CommandStreamReceiver, CsrConfig, GraphicsAllocation, MemoryManager,
};
use strobe_hw::{EngineKind, Gen8Family, Stepping};
use strobe_trace::{AddressSpaceTag, CaptureReader, ContentHint, FileSink, Record, TimeoutAction};

#[derive(Parser, Debug)]
#[command(name = "strobe", about = "Record and inspect command-stream captures.")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a batch buffer through a simulated engine and record the
    /// resulting capture file.
    Capture(CaptureArgs),
    /// Pretty-print the records of an existing capture file.
    Dump(DumpArgs),
}

#[derive(ClapArgs, Debug)]
struct CaptureArgs {
    /// Capture file destination.
    output: PathBuf,

    /// Raw batch buffer bytes; an all-no-op batch is synthesized when omitted.
    #[arg(long, value_name = "PATH")]
    batch: Option<PathBuf>,

    /// Engine to submit on (rcs, bcs, vcs, vecs).
    #[arg(long, default_value = "rcs")]
    engine: String,

    /// Hardware stepping written into the capture header (a, b, c).
    #[arg(long, default_value = "a")]
    stepping: String,

    /// Number of times to submit the batch.
    #[arg(long, default_value_t = 1)]
    submissions: u32,

    /// Omit address comments for byte-stable output across runs.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    no_comments: bool,
}

#[derive(ClapArgs, Debug)]
struct DumpArgs {
    /// Capture file to read.
    input: PathBuf,
}

/// The CLI runs no allocator above the receiver, so residency
/// notifications have nowhere to go.
struct NoopMemoryManager;

impl MemoryManager for NoopMemoryManager {
    fn push_allocation_for_residency(&mut self, _allocation: &GraphicsAllocation) {}

    fn push_allocation_for_eviction(&mut self, _allocation: &GraphicsAllocation) {}

    fn tag_address(&self) -> u64 {
        0
    }
}

fn parse_engine(name: &str) -> Result<EngineKind> {
    for engine in EngineKind::ALL {
        if engine.name() == name {
            return Ok(engine);
        }
    }
    bail!("unknown engine {name:?} (expected rcs, bcs, vcs or vecs)");
}

fn parse_stepping(name: &str) -> Result<Stepping> {
    match name {
        "a" => Ok(Stepping::A),
        "b" => Ok(Stepping::B),
        "c" => Ok(Stepping::C),
        other => bail!("unknown stepping {other:?} (expected a, b or c)"),
    }
}

fn capture(args: CaptureArgs) -> Result<()> {
    let engine = parse_engine(&args.engine)?;
    let stepping = parse_stepping(&args.stepping)?;

    let batch_bytes = match &args.batch {
        Some(path) => fs::read(path)
            .with_context(|| format!("reading batch buffer {}", path.display()))?,
        None => vec![0u8; 64],
    };
    if batch_bytes.is_empty() {
        bail!("batch buffer is empty");
    }
    if batch_bytes.len() % 4 != 0 {
        bail!("batch buffer length must be a multiple of 4 bytes");
    }

    let mut sink = FileSink::create(&args.output)
        .with_context(|| format!("creating capture file {}", args.output.display()))?;
    sink.set_comments(!args.no_comments);

    let config = CsrConfig {
        stepping,
        ..CsrConfig::default()
    };
    let mut receiver =
        CommandStreamReceiver::new(Arc::new(Gen8Family), sink, NoopMemoryManager, config)?;

    let gpu_address = receiver.allocate_gpu_address(batch_bytes.len() as u64);
    let batch_len = batch_bytes.len() as u64;
    let mut allocation = GraphicsAllocation::new(batch_bytes, gpu_address);

    for _ in 0..args.submissions {
        receiver.increment_task_count();
        receiver.make_resident(&mut allocation)?;
        let batch = BatchBuffer::new(&allocation, 0, batch_len);
        receiver.flush(&batch, engine)?;
    }
    drop(receiver);

    println!("wrote {}", args.output.display());
    Ok(())
}

fn space_name(space: AddressSpaceTag) -> &'static str {
    match space {
        AddressSpaceTag::Local => "local",
        AddressSpaceTag::Nonlocal => "nonlocal",
    }
}

fn hint_name(hint: ContentHint) -> &'static str {
    match hint {
        ContentHint::None => "data",
        ContentHint::BatchBuffer => "batch",
        ContentHint::CommandBuffer => "ring",
        ContentHint::LogicalContext => "context",
    }
}

fn dump(args: DumpArgs) -> Result<()> {
    let file = fs::File::open(&args.input)
        .with_context(|| format!("opening capture file {}", args.input.display()))?;
    let capture = CaptureReader::open(file)
        .with_context(|| format!("parsing capture file {}", args.input.display()))?;

    println!(
        "device id {:#x}, stepping {}",
        capture.device_id, capture.stepping
    );
    for record in &capture.records {
        match record {
            Record::MmioWrite { offset, value } => {
                println!("mmio  {offset:#010x} <- {value:#010x}");
            }
            Record::MemoryWrite {
                physical,
                space,
                hint,
                data,
            } => {
                println!(
                    "mem   {physical:#012x} {:>8} bytes  {} ({})",
                    data.len(),
                    hint_name(*hint),
                    space_name(*space),
                );
            }
            Record::ReserveGgtt {
                virtual_addr,
                len,
                physical,
            } => {
                println!("ggtt  {virtual_addr:#012x} -> {physical:#012x} ({len} bytes)");
            }
            Record::ReservePpgtt {
                virtual_addr,
                len,
                physical,
            } => {
                println!("ppgtt {virtual_addr:#012x} -> {physical:#012x} ({len} bytes)");
            }
            Record::RegisterPoll {
                register,
                mask,
                expected,
                poll_not_equal,
                timeout_action,
            } => {
                let relation = if *poll_not_equal { "!=" } else { "==" };
                let action = match timeout_action {
                    TimeoutAction::Abort => "abort",
                    TimeoutAction::Ignore => "ignore",
                };
                println!(
                    "poll  {register:#010x} & {mask:#010x} {relation} {expected:#010x} (timeout: {action})"
                );
            }
            Record::Comment(text) => {
                println!(";; {text}");
            }
        }
    }
    println!("{} records", capture.records.len());
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match args.command {
        Command::Capture(args) => capture(args),
        Command::Dump(args) => dump(args),
    }
}
