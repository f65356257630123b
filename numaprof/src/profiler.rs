//! Profiler
//!
//! Ties the thread registry and the enabled analyses together.
//!
//! Observers hold the interval gate's shared side while recording an access,
//! while snapshots hold its exclusive side while draining the counters. This
//! ensures each access is attributed to exactly one interval.

// Imports
use {
	crate::{
		comm::{self, CommSnapshot, CommunicationClassifier},
		config::{Config, MAX_THREADS},
		page::{self, PageSnapshot, PageUsageAggregator},
		thread_registry::{ThreadIdx, ThreadRegistry},
	},
	anyhow::Context,
	parking_lot::RwLock,
	std::fmt,
};

/// Profiler
#[derive(Debug)]
pub struct Profiler {
	/// Config
	config: Config,

	/// Thread registry
	registry: ThreadRegistry,

	/// Communication classifier, if enabled
	comm: Option<CommunicationClassifier>,

	/// Page usage aggregator, if enabled
	pages: Option<PageUsageAggregator>,

	/// Interval gate
	interval_gate: RwLock<()>,
}

impl Profiler {
	/// Creates a new profiler
	///
	/// # Errors
	/// Returns an error if `config` is invalid.
	pub fn new(config: Config) -> Result<Self, anyhow::Error> {
		config.validate().context("Invalid configuration")?;

		let comm = config
			.communication
			.then(|| CommunicationClassifier::with_capacity(comm::RESERVED_LINES));
		let pages = config
			.page
			.then(|| PageUsageAggregator::with_capacity(page::RESERVED_PAGES));

		Ok(Self {
			config,
			registry: ThreadRegistry::new(),
			comm,
			pages,
			interval_gate: RwLock::new(()),
		})
	}

	/// Registers a started thread, returning its index
	///
	/// # Errors
	/// Returns an error if too many threads were started.
	pub fn thread_started(&self, os_tid: u64) -> Result<ThreadIdx, anyhow::Error> {
		self.registry.register(os_tid)
	}

	/// Records an access to `addr` by `thread`
	pub fn access(&self, thread: ThreadIdx, addr: u64) {
		let _interval = self.interval_gate.read();

		if let Some(comm) = &self.comm {
			comm.observe(addr >> self.config.comm_shift, thread);
		}
		if let Some(pages) = &self.pages {
			pages.observe(addr >> self.config.page_shift, thread);
		}
	}

	/// Takes a snapshot of the current interval and starts a new one.
	pub fn snapshot_and_reset(&self) -> Snapshot {
		let _interval = self.interval_gate.write();

		let threads = self.registry.len();
		Snapshot {
			threads,
			comm: self.comm.as_ref().map(|comm| comm.matrix().take(threads)),
			pages: self.pages.as_ref().map(|pages| pages.take(threads)),
		}
	}

	/// Returns the config
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns the thread registry
	pub fn registry(&self) -> &ThreadRegistry {
		&self.registry
	}

	/// Returns the communication classifier, if enabled
	pub fn comm(&self) -> Option<&CommunicationClassifier> {
		self.comm.as_ref()
	}

	/// Returns the page usage aggregator, if enabled
	pub fn pages(&self) -> Option<&PageUsageAggregator> {
		self.pages.as_ref()
	}

	/// Returns a summary of this profiler
	pub fn summary(&self) -> Summary {
		Summary {
			max_threads: MAX_THREADS,
			comm_shift:  self.config.comm_shift,
			page_shift:  self.config.page_shift,
			interval_ms: self.config.interval_ms,
			threads:     self.registry.len(),
		}
	}
}

/// Snapshot of a single interval
#[derive(Clone, Debug)]
pub struct Snapshot {
	/// Number of threads
	pub threads: usize,

	/// Communication matrix, if enabled
	pub comm: Option<CommSnapshot>,

	/// Page usage, if enabled
	pub pages: Option<PageSnapshot>,
}

/// Profiler summary
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct Summary {
	pub max_threads: usize,
	pub comm_shift:  u32,
	pub page_shift:  u32,
	pub interval_ms: u64,
	pub threads:     usize,
}

impl fmt::Display for Summary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"MAXTHREADS: {} COMMSIZE: {} PAGESIZE: {} INTERVAL: {} THREADS: {}",
			self.max_threads, self.comm_shift, self.page_shift, self.interval_ms, self.threads
		)
	}
}
