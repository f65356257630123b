//! End-to-end replay tests

// Imports
use {
	assert_cmd::Command,
	numaprof::{
		trace::{AccessKind, Record},
		Config,
		DirSink,
		IntervalReporter,
		Profiler,
		Replayer,
		TraceReader,
		TraceWriter,
	},
	predicates::prelude::*,
	std::{fs, io, path::Path, sync::Arc, time::Duration},
};

/// Writes a trace with `records` to `path`
fn write_trace(path: &Path, records: &[Record]) {
	let file = fs::File::create(path).expect("Unable to create trace file");
	let mut writer = TraceWriter::new(io::BufWriter::new(file)).expect("Unable to create trace writer");
	for record in records {
		writer.write(record).expect("Unable to write record");
	}
	writer.finish().expect("Unable to finish trace");
}

/// Trace where threads 0, 1, 2, 0 access address `0x1000` in turn
fn four_access_trace() -> Vec<Record> {
	let mut records = (0..3)
		.map(|thread| Record::ThreadStart {
			thread,
			os_tid: 5000 + u64::from(thread),
		})
		.collect::<Vec<_>>();
	records.extend([0, 1, 2, 0].map(|thread| Record::Access {
		thread,
		addr: 0x1000,
		kind: AccessKind::Read,
	}));
	records
}

#[test]
fn final_reports_are_written() {
	let dir = tempfile::tempdir().expect("Unable to create temporary directory");
	let trace_path = dir.path().join("four.trace");
	write_trace(&trace_path, &four_access_trace());

	let config = Config {
		communication: true,
		page: true,
		output_dir: dir.path().join("reports"),
		..Config::default()
	};
	fs::create_dir_all(&config.output_dir).expect("Unable to create output directory");
	let profiler = Arc::new(Profiler::new(config.clone()).expect("Unable to create profiler"));
	let reporter = IntervalReporter::new(Arc::clone(&profiler), DirSink::new(&config.output_dir))
		.spawn(None)
		.expect("Unable to spawn reporter");

	let trace_file = fs::File::open(&trace_path).expect("Unable to open trace");
	let mut trace_reader = TraceReader::from_reader(io::BufReader::new(trace_file)).expect("Unable to parse trace");
	let output = Replayer::new(1, Duration::from_secs(60))
		.run(&mut trace_reader, &profiler)
		.expect("Unable to replay trace");
	assert_eq!(output.accesses(), 4);

	let (summary, _) = reporter.finish().expect("Unable to finish reporter");
	assert_eq!(summary.threads, 3);

	let comm = fs::read_to_string(config.output_dir.join("000000.comm.csv")).expect("Unable to read report");
	assert_eq!(comm, "2,1,0\n2,0,1\n0,2,2\n\n");

	let page = fs::read_to_string(config.output_dir.join("000000.page.csv")).expect("Unable to read report");
	assert_eq!(page, "nr, addr, firstacc,T0,T1,T2\n0,1,0,2,1,1\n");
}

#[test]
fn binary_writes_reports() {
	let dir = tempfile::tempdir().expect("Unable to create temporary directory");
	let trace_path = dir.path().join("four.trace");
	write_trace(&trace_path, &four_access_trace());

	Command::cargo_bin("numaprof")
		.expect("Unable to find binary")
		.arg(&trace_path)
		.arg("-c")
		.arg("--workers")
		.arg("2")
		.arg("--output-dir")
		.arg(dir.path())
		.assert()
		.success()
		.stdout(predicate::str::contains("MAXTHREADS: 64 COMMSIZE: 6 PAGESIZE: 12 INTERVAL: 0"))
		.stdout(predicate::str::contains("000000.comm.csv"))
		.stdout(predicate::function(|stdout: &str| stdout.matches("THREADS: 3").count() == 1))
		.stderr(predicate::str::contains("MAXTHREADS").not());

	assert!(dir.path().join("000000.comm.csv").exists());
	assert!(!dir.path().join("000000.page.csv").exists());
}

#[test]
fn binary_requires_an_analysis() {
	let dir = tempfile::tempdir().expect("Unable to create temporary directory");
	let trace_path = dir.path().join("four.trace");
	write_trace(&trace_path, &four_access_trace());

	Command::cargo_bin("numaprof")
		.expect("Unable to find binary")
		.arg(&trace_path)
		.assert()
		.failure()
		.stderr(predicate::str::contains("Usage"))
		.stderr(predicate::function(|stderr: &str| {
			stderr
				.matches("at least one of communication (-c) or page usage (-p)")
				.count() == 1
		}));
}

#[test]
fn binary_rejects_unrepresentable_period() {
	let dir = tempfile::tempdir().expect("Unable to create temporary directory");
	let trace_path = dir.path().join("four.trace");
	write_trace(&trace_path, &four_access_trace());

	let config_path = dir.path().join("config.json");
	fs::write(&config_path, r#"{ "page": true, "debug_output_period_secs": 1e20 }"#).expect("Unable to write config");

	Command::cargo_bin("numaprof")
		.expect("Unable to find binary")
		.arg(&trace_path)
		.arg("--config")
		.arg(&config_path)
		.arg("-o")
		.arg(dir.path())
		.assert()
		.failure()
		.stderr(predicate::str::contains("Debug output period"))
		.stderr(predicate::str::contains("panicked").not());

	assert!(!dir.path().join("000000.page.csv").exists());
}

#[test]
fn binary_reads_config_file() {
	let dir = tempfile::tempdir().expect("Unable to create temporary directory");
	let trace_path = dir.path().join("four.trace");
	write_trace(&trace_path, &four_access_trace());

	let config_path = dir.path().join("config.json");
	fs::write(&config_path, r#"{ "page": true, "page_shift": 8 }"#).expect("Unable to write config");

	Command::cargo_bin("numaprof")
		.expect("Unable to find binary")
		.arg(&trace_path)
		.arg("--config")
		.arg(&config_path)
		.arg("-o")
		.arg(dir.path())
		.assert()
		.success()
		.stdout(predicate::str::contains("PAGESIZE: 8"));

	let page = fs::read_to_string(dir.path().join("000000.page.csv")).expect("Unable to read report");
	assert_eq!(page, "nr, addr, firstacc,T0,T1,T2\n0,16,0,2,1,1\n");
}
