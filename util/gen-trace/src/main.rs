//! Generates a synthetic multi-threaded memory access trace.
//!
//! Each thread accesses a region shared by all threads and a private region of its own.

// Imports
use {
	anyhow::Context,
	clap::Parser,
	numaprof::{
		trace::{AccessKind, Record},
		TraceWriter,
		MAX_THREADS,
	},
	numaprof_util::logger,
	rand::{rngs::StdRng, Rng, SeedableRng},
	std::{fs, io::BufWriter, path::PathBuf},
};

/// Arguments
#[derive(Debug)]
#[derive(clap::Parser)]
struct Args {
	/// Output trace file
	output: PathBuf,

	/// Threads
	#[clap(long = "threads", default_value_t = 4)]
	threads: u32,

	/// Accesses per thread
	#[clap(long = "accesses", default_value_t = 100_000)]
	accesses: u64,

	/// Pages shared by all threads
	#[clap(long = "shared-pages", default_value_t = 16)]
	shared_pages: u64,

	/// Pages private to each thread
	#[clap(long = "private-pages", default_value_t = 64)]
	private_pages: u64,

	/// Chance of an access hitting the shared region
	#[clap(long = "shared-ratio", default_value_t = 0.2)]
	shared_ratio: f64,

	/// Chance of an access being a write
	#[clap(long = "write-ratio", default_value_t = 0.3)]
	write_ratio: f64,

	/// Random seed
	#[clap(long = "seed", default_value_t = 0)]
	seed: u64,
}

/// Page size used to lay out the regions
const PAGE_SIZE: u64 = 4096;

/// Start of the shared region
const SHARED_BASE: u64 = 0x1000_0000;

/// Start of the private regions
const PRIVATE_BASE: u64 = 0x4000_0000;

fn main() -> Result<(), anyhow::Error> {
	// Get arguments
	let args = Args::parse();
	logger::pre_init::debug(format!("Args: {args:?}"));

	// Initialize logging
	logger::init(None, false);

	anyhow::ensure!(
		(1..=MAX_THREADS as u32).contains(&args.threads),
		"Thread count must be between 1 and {MAX_THREADS}"
	);
	anyhow::ensure!(
		args.shared_pages > 0 && args.private_pages > 0,
		"Regions must have at least 1 page"
	);
	anyhow::ensure!(
		(0.0..=1.0).contains(&args.shared_ratio) && (0.0..=1.0).contains(&args.write_ratio),
		"Ratios must be between 0 and 1"
	);

	// Create the writer
	let file = fs::File::create(&args.output).context("Unable to create output file")?;
	let mut writer = TraceWriter::new(BufWriter::new(file)).context("Unable to create trace writer")?;

	// Start all threads
	for thread in 0..args.threads {
		// Note: Os thread ids just need to be unique, so we mimic a process' ids.
		let os_tid = 1000 + u64::from(thread);
		writer
			.write(&Record::ThreadStart { thread, os_tid })
			.context("Unable to write thread start")?;
	}

	// Then interleave accesses from every thread
	let mut rng = StdRng::seed_from_u64(args.seed);
	for _ in 0..args.accesses {
		for thread in 0..args.threads {
			let addr = match rng.gen_bool(args.shared_ratio) {
				true => SHARED_BASE + rng.gen_range(0..args.shared_pages * PAGE_SIZE),
				false => {
					let private_base = PRIVATE_BASE + u64::from(thread) * args.private_pages * PAGE_SIZE;
					private_base + rng.gen_range(0..args.private_pages * PAGE_SIZE)
				},
			};
			let kind = match rng.gen_bool(args.write_ratio) {
				true => AccessKind::Write,
				false => AccessKind::Read,
			};

			writer
				.write(&Record::Access { thread, addr, kind })
				.context("Unable to write access")?;
		}
	}

	// Finally finish writing the trace
	writer.finish().context("Unable to finish writing trace")?;
	tracing::info!(
		threads = args.threads,
		accesses = u64::from(args.threads) * args.accesses,
		"Wrote trace to {:?}",
		args.output
	);

	Ok(())
}
