//! Interval reporter
//!
//! Periodically snapshots the profiler from a background thread and writes
//! the reports, then writes the final reports once the profiled program exits.

// Imports
use {
	crate::{
		profiler::{Profiler, Snapshot, Summary},
		report::{self, ReportKind},
	},
	anyhow::Context,
	crossbeam::channel,
	numaprof_util::DisplayWrapper,
	std::{
		fs,
		path::PathBuf,
		sync::Arc,
		thread,
		time::Duration,
	},
};

/// Report sink
pub trait ReportSink {
	/// Writes report number `seq` of kind `kind`
	fn write_report(&mut self, kind: ReportKind, seq: u64, contents: &str) -> Result<(), anyhow::Error>;
}

/// Sink that writes each report to its own file in a directory.
///
/// Files are named `<seq>.<kind>.csv`, with `seq` padded to 6 digits.
#[derive(Clone, Debug)]
pub struct DirSink {
	/// Output directory
	dir: PathBuf,
}

impl DirSink {
	/// Creates a sink writing to `dir`
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	/// Returns the file name of a report
	pub fn file_name(kind: ReportKind, seq: u64) -> String {
		format!("{seq:06}.{kind}.csv")
	}
}

impl ReportSink for DirSink {
	fn write_report(&mut self, kind: ReportKind, seq: u64, contents: &str) -> Result<(), anyhow::Error> {
		let file_name = Self::file_name(kind, seq);
		let path = self.dir.join(&file_name);

		// Note: We write to a temporary file first so a failed write never leaves a partial report behind.
		let tmp_path = self.dir.join(format!(".{file_name}.tmp"));
		if let Err(err) = fs::write(&tmp_path, contents) {
			let _ = fs::remove_file(&tmp_path);
			return Err(err).with_context(|| format!("Unable to write report {tmp_path:?}"));
		}
		if let Err(err) = fs::rename(&tmp_path, &path) {
			let _ = fs::remove_file(&tmp_path);
			return Err(err).with_context(|| format!("Unable to move report into {path:?}"));
		}

		println!("{file_name}");
		Ok(())
	}
}

impl<S: ReportSink + ?Sized> ReportSink for Box<S> {
	fn write_report(&mut self, kind: ReportKind, seq: u64, contents: &str) -> Result<(), anyhow::Error> {
		(**self).write_report(kind, seq, contents)
	}
}

/// Interval reporter
pub struct IntervalReporter<S> {
	/// Profiler
	profiler: Arc<Profiler>,

	/// Sink
	sink: S,

	/// Next communication report number
	comm_seq: u64,

	/// Next page report number
	page_seq: u64,
}

impl<S: ReportSink> IntervalReporter<S> {
	/// Creates a new reporter
	pub fn new(profiler: Arc<Profiler>, sink: S) -> Self {
		Self {
			profiler,
			sink,
			comm_seq: 0,
			page_seq: 0,
		}
	}

	/// Snapshots the profiler and writes a report for each enabled analysis.
	///
	/// Reports that fail to be written are skipped.
	pub fn report(&mut self) {
		let snapshot = self.profiler.snapshot_and_reset();
		tracing::debug!(
			"Interval {}: {}",
			self.comm_seq.max(self.page_seq),
			DisplayWrapper::new(|f| self::fmt_digest(&snapshot, f))
		);

		if let Some(comm) = &snapshot.comm {
			let contents = report::format_comm(comm);
			Self::write(&mut self.sink, ReportKind::Comm, &mut self.comm_seq, &contents);
		}
		if let Some(pages) = &snapshot.pages {
			let contents = report::format_pages(pages);
			Self::write(&mut self.sink, ReportKind::Page, &mut self.page_seq, &contents);
		}
	}

	/// Writes a report to the sink, advancing its sequence number regardless of success
	fn write(sink: &mut S, kind: ReportKind, seq: &mut u64, contents: &str) {
		if let Err(err) = sink.write_report(kind, *seq, contents) {
			tracing::warn!(%kind, seq = *seq, ?err, "Unable to write report, skipping it");
		}
		*seq += 1;
	}

	/// Returns the sink
	pub fn sink(&self) -> &S {
		&self.sink
	}
}

impl<S: ReportSink + Send + 'static> IntervalReporter<S> {
	/// Spawns the reporter on a background thread.
	///
	/// Reports every `interval`, or only at the end if `None`.
	///
	/// # Errors
	/// Returns an error if unable to spawn the thread.
	pub fn spawn(self, interval: Option<Duration>) -> Result<ReporterHandle<S>, anyhow::Error> {
		let mut reporter = self;
		let (shutdown_tx, shutdown_rx) = channel::bounded(1);
		let thread = thread::Builder::new()
			.name("numaprof-reporter".to_owned())
			.spawn(move || {
				let ticker = match interval {
					Some(interval) => channel::tick(interval),
					None => channel::never(),
				};

				loop {
					// Note: A disconnected shutdown channel means the handle was dropped,
					//       which we treat as the program exiting.
					let shutdown = channel::select! {
						recv(ticker) -> _ => None,
						recv(shutdown_rx) -> msg => Some(msg.unwrap_or(Shutdown::Exit)),
					};

					match shutdown {
						None => reporter.report(),
						Some(Shutdown::Exit) => break reporter.finish(),
						Some(Shutdown::Abort) => break reporter,
					}
				}
			})
			.context("Unable to spawn reporter thread")?;

		Ok(ReporterHandle { shutdown_tx, thread })
	}
}

impl<S: ReportSink> IntervalReporter<S> {
	/// Writes the final reports
	fn finish(mut self) -> Self {
		self.report();
		tracing::debug!("Wrote final reports");
		self
	}
}

/// Shutdown request
#[derive(Clone, Copy, Debug)]
enum Shutdown {
	/// Program exited, write the final reports
	Exit,

	/// Stop without writing any more reports
	Abort,
}

/// Handle to a spawned [`IntervalReporter`]
pub struct ReporterHandle<S> {
	/// Shutdown sender
	shutdown_tx: channel::Sender<Shutdown>,

	/// Reporter thread
	thread: thread::JoinHandle<IntervalReporter<S>>,
}

impl<S> ReporterHandle<S> {
	/// Signals that the profiled program exited.
	///
	/// Waits for any in-progress report, writes the final reports and
	/// returns the profiler's summary along with the reporter.
	///
	/// # Errors
	/// Returns an error if the reporter thread panicked.
	pub fn finish(self) -> Result<(Summary, IntervalReporter<S>), anyhow::Error> {
		let reporter = self.shutdown(Shutdown::Exit)?;
		Ok((reporter.profiler.summary(), reporter))
	}

	/// Stops the reporter without writing any more reports.
	///
	/// # Errors
	/// Returns an error if the reporter thread panicked.
	pub fn abort(self) -> Result<IntervalReporter<S>, anyhow::Error> {
		self.shutdown(Shutdown::Abort)
	}

	/// Sends a shutdown request and joins the thread
	fn shutdown(self, request: Shutdown) -> Result<IntervalReporter<S>, anyhow::Error> {
		// Note: If the thread already exited, joining will report why.
		let _ = self.shutdown_tx.send(request);
		self.thread
			.join()
			.map_err(|err| anyhow::anyhow!("Reporter thread panicked: {err:?}"))
	}
}

/// Formats a short digest of a snapshot
fn fmt_digest(snapshot: &Snapshot, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
	write!(f, "{} threads", snapshot.threads)?;

	if let Some(comm) = &snapshot.comm {
		write!(
			f,
			", {} communication events over {} thread pairs",
			comm.total(),
			comm.non_zero_cells()
		)?;
	}

	if let Some(pages) = &snapshot.pages {
		let accesses_per_page = pages
			.touched_pages()
			.map(|row| row.accesses.iter().sum::<u64>() as f64)
			.collect::<average::Variance>();
		write!(
			f,
			", {} touched pages of {}, {:.2} ± {:.2} accesses per touched page",
			accesses_per_page.len(),
			pages.pages.len(),
			accesses_per_page.mean(),
			accesses_per_page.error()
		)?;
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use {
		super::{DirSink, IntervalReporter, ReportSink},
		crate::{config::Config, profiler::Profiler, report::ReportKind},
		std::{sync::Arc, thread, time::Duration},
	};

	/// Sink that keeps reports in memory
	#[derive(Default)]
	struct MemSink {
		reports: Vec<(ReportKind, u64, String)>,
	}

	impl ReportSink for MemSink {
		fn write_report(&mut self, kind: ReportKind, seq: u64, contents: &str) -> Result<(), anyhow::Error> {
			self.reports.push((kind, seq, contents.to_owned()));
			Ok(())
		}
	}

	/// Sink that fails every other report
	#[derive(Default)]
	struct FlakySink {
		calls:   usize,
		written: Vec<u64>,
	}

	impl ReportSink for FlakySink {
		fn write_report(&mut self, _kind: ReportKind, seq: u64, _contents: &str) -> Result<(), anyhow::Error> {
			self.calls += 1;
			anyhow::ensure!(self.calls % 2 == 0, "Disk full");
			self.written.push(seq);
			Ok(())
		}
	}

	fn profiler(communication: bool, page: bool, interval_ms: u64) -> Arc<Profiler> {
		let config = Config {
			communication,
			page,
			interval_ms,
			..Config::default()
		};
		Arc::new(Profiler::new(config).expect("Unable to create profiler"))
	}

	#[test]
	fn without_interval_only_final_report_is_written() {
		let profiler = profiler(true, true, 0);
		let handle = IntervalReporter::new(Arc::clone(&profiler), MemSink::default())
			.spawn(None)
			.expect("Unable to spawn reporter");

		let a = profiler.thread_started(10).expect("Unable to start thread");
		let b = profiler.thread_started(11).expect("Unable to start thread");
		profiler.access(a, 0x1000);
		profiler.access(b, 0x1000);
		thread::sleep(Duration::from_millis(20));

		let (summary, reporter) = handle.finish().expect("Unable to finish reporter");
		assert_eq!(summary.threads, 2);

		let reports = &reporter.sink().reports;
		assert_eq!(reports.len(), 2);
		assert_eq!(reports[0].0, ReportKind::Comm);
		assert_eq!(reports[0].1, 0);
		assert_eq!(reports[0].2, "1,0\n0,1\n\n");
		assert_eq!(reports[1].0, ReportKind::Page);
		assert_eq!(reports[1].1, 0);
		assert_eq!(reports[1].2, "nr, addr, firstacc,T0,T1\n0,1,0,1,1\n");
	}

	#[test]
	fn periodic_reports_are_numbered_and_disjoint() {
		let profiler = profiler(false, true, 5);
		let handle = IntervalReporter::new(Arc::clone(&profiler), MemSink::default())
			.spawn(Some(Duration::from_millis(5)))
			.expect("Unable to spawn reporter");

		let thread = profiler.thread_started(1).expect("Unable to start thread");
		let mut total = 0;
		for round in 0..10 {
			for access in 0..100 {
				profiler.access(thread, (round * 100 + access) << 12);
				total += 1;
			}
			thread::sleep(Duration::from_millis(3));
		}

		let (_, reporter) = handle.finish().expect("Unable to finish reporter");
		let reports = &reporter.sink().reports;
		assert!(!reports.is_empty());

		// Numbered sequentially
		for (expected_seq, (kind, seq, _)) in reports.iter().enumerate() {
			assert_eq!(*kind, ReportKind::Page);
			assert_eq!(*seq, expected_seq as u64);
		}

		// And every access is in exactly one report
		let reported = reports
			.iter()
			.flat_map(|(_, _, contents)| contents.lines().skip(1))
			.map(|line| {
				line.rsplit(',')
					.next()
					.expect("Line had no columns")
					.parse::<u64>()
					.expect("Unable to parse count")
			})
			.sum::<u64>();
		assert_eq!(reported, total);
	}

	#[test]
	fn failed_writes_are_skipped() {
		let profiler = profiler(true, false, 0);
		let mut reporter = IntervalReporter::new(profiler, FlakySink::default());
		for _ in 0..4 {
			reporter.report();
		}

		assert_eq!(reporter.sink().calls, 4);
		assert_eq!(reporter.sink().written, [1, 3]);
	}

	#[test]
	fn abort_skips_final_report() {
		let profiler = profiler(true, false, 0);
		let handle = IntervalReporter::new(profiler, MemSink::default())
			.spawn(None)
			.expect("Unable to spawn reporter");

		let reporter = handle.abort().expect("Unable to abort reporter");
		assert!(reporter.sink().reports.is_empty());
	}

	#[test]
	fn dir_sink_writes_numbered_files() {
		let dir = tempfile::tempdir().expect("Unable to create temporary directory");
		let mut sink = DirSink::new(dir.path());
		sink.write_report(ReportKind::Comm, 0, "0\n\n")
			.expect("Unable to write report");
		sink.write_report(ReportKind::Page, 12, "nr, addr, firstacc\n")
			.expect("Unable to write report");

		let comm = std::fs::read_to_string(dir.path().join("000000.comm.csv")).expect("Unable to read report");
		assert_eq!(comm, "0\n\n");
		let page = std::fs::read_to_string(dir.path().join("000012.page.csv")).expect("Unable to read report");
		assert_eq!(page, "nr, addr, firstacc\n");

		// No temporary files are left behind
		assert_eq!(std::fs::read_dir(dir.path()).expect("Unable to read dir").count(), 2);
	}

	#[test]
	fn dir_sink_reports_missing_dir() {
		let dir = tempfile::tempdir().expect("Unable to create temporary directory");
		let mut sink = DirSink::new(dir.path().join("missing"));
		assert!(sink.write_report(ReportKind::Comm, 0, "").is_err());
	}

	#[test]
	fn dir_sink_cleans_up_when_unable_to_move() {
		let dir = tempfile::tempdir().expect("Unable to create temporary directory");

		// A non-empty directory in the report's place can't be replaced
		let blocker = dir.path().join(DirSink::file_name(ReportKind::Page, 3));
		std::fs::create_dir(&blocker).expect("Unable to create directory");
		std::fs::write(blocker.join("keep"), "").expect("Unable to create file");

		let mut sink = DirSink::new(dir.path());
		let err = sink
			.write_report(ReportKind::Page, 3, "nr, addr, firstacc\n")
			.expect_err("Replaced a non-empty directory");
		assert!(format!("{err:?}").contains("Unable to move report"), "Unexpected error: {err:?}");

		let entries = std::fs::read_dir(dir.path())
			.expect("Unable to read dir")
			.map(|entry| entry.expect("Unable to read entry").file_name())
			.collect::<Vec<_>>();
		assert_eq!(entries, [blocker.file_name().expect("Blocker had no file name")]);
	}
}
