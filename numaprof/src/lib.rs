//! Memory access profiler (`numaprof`)
//!
//! Derives an inter-thread communication matrix and a per-page usage
//! profile from a stream of memory accesses, reported in intervals.

// Modules
pub mod comm;
pub mod config;
pub mod page;
pub mod profiler;
pub mod replay;
pub mod report;
pub mod reporter;
pub mod thread_registry;
pub mod trace;

// Exports
pub use self::{
	config::{Config, MAX_THREADS},
	profiler::{Profiler, Snapshot, Summary},
	replay::Replayer,
	reporter::{DirSink, IntervalReporter, ReportSink},
	thread_registry::{ThreadIdx, ThreadRegistry},
	trace::{TraceReader, TraceWriter},
};
