//! Trace replay

// Imports
use {
	crate::{
		profiler::Profiler,
		thread_registry::ThreadIdx,
		trace::{AccessKind, Record, TraceReader},
	},
	anyhow::Context,
	crossbeam::channel,
	std::{
		collections::HashMap,
		io,
		mem,
		thread,
		time::{Duration, Instant},
	},
};

/// Accesses sent to a worker at once
const BATCH_LEN: usize = 4096;

/// Batches that may be queued for each worker
const QUEUED_BATCHES: usize = 16;

/// Replayer
#[derive(Debug)]
pub struct Replayer {
	/// Observer threads.
	///
	/// With a single worker, accesses are observed on the calling thread.
	workers: usize,

	/// Debug output period
	///
	/// Interval in which to output replay progress
	debug_output_period: Duration,
}

impl Replayer {
	/// Creates a new replayer
	///
	/// # Panics
	/// Panics if `workers` is 0.
	pub fn new(workers: usize, debug_output_period: Duration) -> Self {
		assert!(workers > 0, "At least one worker is required");
		Self {
			workers,
			debug_output_period,
		}
	}

	/// Replays all records from `trace_reader` into `profiler`
	pub fn run<R: io::Read>(
		&mut self,
		trace_reader: &mut TraceReader<R>,
		profiler: &Profiler,
	) -> Result<ReplayOutput, anyhow::Error> {
		match self.workers {
			1 => self.run_with(trace_reader, profiler, |thread, addr| profiler.access(thread, addr)),
			workers => thread::scope(|s| {
				// Spawn all workers
				let senders = (0..workers)
					.map(|worker_idx| {
						let (tx, rx) = channel::bounded::<Vec<(ThreadIdx, u64)>>(QUEUED_BATCHES);
						thread::Builder::new()
							.name(format!("numaprof-worker-{worker_idx}"))
							.spawn_scoped(s, move || {
								for batch in rx {
									for (thread, addr) in batch {
										profiler.access(thread, addr);
									}
								}
							})
							.context("Unable to spawn worker")?;
						Ok(tx)
					})
					.collect::<Result<Vec<_>, anyhow::Error>>()?;

				// Then dispatch accesses by thread, so each thread's accesses stay in order
				let mut batches = vec![Vec::with_capacity(BATCH_LEN); workers];
				let mut send_err = None;
				let output = self.run_with(trace_reader, profiler, |thread, addr| {
					let worker_idx = thread.to_usize() % workers;
					let batch = &mut batches[worker_idx];
					batch.push((thread, addr));
					if batch.len() >= BATCH_LEN {
						let batch = mem::replace(batch, Vec::with_capacity(BATCH_LEN));
						if senders[worker_idx].send(batch).is_err() {
							send_err.get_or_insert(worker_idx);
						}
					}
				});

				// Flush whatever is left and let the workers finish
				for (sender, batch) in senders.iter().zip(batches) {
					if !batch.is_empty() {
						let _ = sender.send(batch);
					}
				}
				drop(senders);

				if let Some(worker_idx) = send_err {
					anyhow::bail!("Worker {worker_idx} stopped early");
				}

				output
			}),
		}
	}

	/// Replays all records, handing each access to `observe`
	fn run_with<R: io::Read>(
		&mut self,
		trace_reader: &mut TraceReader<R>,
		profiler: &Profiler,
		mut observe: impl FnMut(ThreadIdx, u64),
	) -> Result<ReplayOutput, anyhow::Error> {
		// Note: We start in the past so that we output right away at the start
		let mut last_debug_time = Instant::now()
			.checked_sub(self.debug_output_period)
			.unwrap_or_else(Instant::now);

		// Create the record iterator
		let total_records = trace_reader.records_remaining();
		let record_it = std::iter::from_fn(|| trace_reader.read_next().transpose());

		// Go through all records
		let mut threads = HashMap::<u32, ThreadIdx>::new();
		let mut output = ReplayOutput::default();
		for (record_idx, record_res) in record_it.enumerate() {
			let record = record_res.context("Unable to read next record")?;

			match record {
				Record::ThreadStart { thread, os_tid } => {
					let thread_idx = profiler
						.thread_started(os_tid)
						.with_context(|| format!("Unable to start thread {thread} (os tid {os_tid})"))?;
					if let Some(prev_idx) = threads.insert(thread, thread_idx) {
						tracing::warn!(thread, ?prev_idx, ?thread_idx, "Thread was started twice");
					}
					output.thread_starts += 1;
				},
				Record::Access { thread, addr, kind } => {
					let thread_idx = match threads.get(&thread) {
						Some(&thread_idx) => thread_idx,
						None => anyhow::bail!("Record #{record_idx}: Access by thread {thread} before it started"),
					};
					observe(thread_idx, addr);

					match kind {
						AccessKind::Read => output.reads += 1,
						AccessKind::Read2 => output.second_reads += 1,
						AccessKind::Write => output.writes += 1,
					}
				},
			}

			// Then show debug output, if it's been long enough
			let cur_time = Instant::now();
			if cur_time.duration_since(last_debug_time) >= self.debug_output_period {
				let records_processed_percentage = 100.0 * (record_idx as f64 / total_records as f64);
				tracing::info!(
					"[{records_processed_percentage:.2}%] Replayed {} accesses from {} threads",
					output.accesses(),
					profiler.registry().len(),
				);
				last_debug_time = cur_time;
			}
		}

		Ok(output)
	}
}

/// Output for [`Replayer::run`]
#[derive(PartialEq, Eq, Clone, Copy, Default, Debug)]
pub struct ReplayOutput {
	/// Reads
	pub reads: u64,

	/// Second reads of dual-read instructions
	pub second_reads: u64,

	/// Writes
	pub writes: u64,

	/// Thread starts
	pub thread_starts: u64,
}

impl ReplayOutput {
	/// Returns the total number of accesses
	pub fn accesses(&self) -> u64 {
		self.reads + self.second_reads + self.writes
	}
}
