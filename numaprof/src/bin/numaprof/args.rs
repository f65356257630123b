//! Arguments

// Imports
use std::path::PathBuf;

/// Arguments
#[derive(Debug)]
#[derive(clap::Parser)]
pub struct Args {
	/// Log file
	///
	/// Specifies a file to perform verbose logging to.
	/// You can use `RUST_LOG_FILE` to set filtering options
	#[clap(long = "log-file")]
	pub log_file: Option<PathBuf>,

	/// Whether to append to the log file
	#[clap(long = "log-file-append")]
	pub log_file_append: bool,

	/// Trace file
	pub trace_file: PathBuf,

	/// Config file
	///
	/// Any options given on the command line override the ones in this file.
	#[clap(long = "config")]
	pub config_file: Option<PathBuf>,

	/// Enable communication detection
	#[clap(short = 'c', long = "comm")]
	pub communication: bool,

	/// Enable page usage detection
	#[clap(short = 'p', long = "page")]
	pub page: bool,

	/// Communication shift (in bits)
	#[clap(long = "cs")]
	pub comm_shift: Option<u32>,

	/// Page size (in bits)
	#[clap(long = "ps")]
	pub page_shift: Option<u32>,

	/// Report interval (in milliseconds, 0 to disable)
	#[clap(short = 'i', long = "interval")]
	pub interval_ms: Option<u64>,

	/// Output directory for reports
	#[clap(short = 'o', long = "output-dir")]
	pub output_dir: Option<PathBuf>,

	/// Observer threads
	#[clap(long = "workers")]
	pub workers: Option<usize>,
}
