//! Memory access profiler (`numaprof`)

// Modules
mod args;

// Imports
use {
	self::args::Args,
	anyhow::Context,
	clap::{CommandFactory, Parser},
	numaprof::{Config, DirSink, IntervalReporter, Profiler, Replayer, TraceReader},
	numaprof_util::logger,
	std::{fs, io, sync::Arc, time::Duration},
};

fn main() -> Result<(), anyhow::Error> {
	// Get arguments
	let args = Args::parse();
	logger::pre_init::debug(format!("Args: {args:?}"));
	if args.log_file_append && args.log_file.is_none() {
		logger::pre_init::warn("`--log-file-append` has no effect without `--log-file`");
	}

	// Initialize logging
	logger::init(args.log_file.as_deref(), args.log_file_append);

	// Build the config and make sure it's usable before we start
	let config = self::load_config(&args).context("Unable to load config")?;
	tracing::debug!(?config, "Loaded config");
	// Note: The error itself is printed once `main` returns it.
	if let Err(err) = config.validate() {
		eprintln!("{}", Args::command().render_help());
		return Err(err.context("Invalid configuration"));
	}
	let debug_output_period = config.debug_output_period()?;

	// Open the trace file
	let trace_file = fs::File::open(&args.trace_file).context("Unable to open trace file")?;
	let mut trace_reader =
		TraceReader::from_reader(io::BufReader::new(trace_file)).context("Unable to parse trace")?;
	tracing::debug!(header = ?trace_reader.header(), "Parsed trace");

	fs::create_dir_all(&config.output_dir).context("Unable to create output directory")?;

	// Create the profiler and start reporting
	let profiler = Arc::new(Profiler::new(config).context("Unable to create profiler")?);
	println!("\n{}\n", profiler.summary());

	let config = profiler.config();
	let interval = match config.interval_ms {
		0 => None,
		interval_ms => Some(Duration::from_millis(interval_ms)),
	};
	let reporter = IntervalReporter::new(Arc::clone(&profiler), DirSink::new(&config.output_dir))
		.spawn(interval)
		.context("Unable to start reporter")?;

	// Then replay the whole trace
	let mut replayer = Replayer::new(config.workers, debug_output_period);
	let output = match replayer.run(&mut trace_reader, &profiler) {
		Ok(output) => output,
		Err(err) => {
			// Note: The data is unreliable at this point, so don't write the final reports.
			reporter.abort().context("Unable to stop reporter")?;
			return Err(err).context("Unable to replay trace");
		},
	};
	tracing::info!(?output, "Finished replaying trace");

	// Finally write the final reports
	let (summary, _) = reporter.finish().context("Unable to finish reporter")?;
	println!("\n{summary}\n");

	Ok(())
}

/// Loads the config from the config file, if any, and overrides it with the arguments
fn load_config(args: &Args) -> Result<Config, anyhow::Error> {
	let mut config = match &args.config_file {
		Some(config_file) => {
			let config_file = fs::File::open(config_file).context("Unable to open config file")?;
			serde_json::from_reader::<_, Config>(io::BufReader::new(config_file))
				.context("Unable to parse config file")?
		},
		None => Config::default(),
	};

	config.communication |= args.communication;
	config.page |= args.page;
	if let Some(comm_shift) = args.comm_shift {
		config.comm_shift = comm_shift;
	}
	if let Some(page_shift) = args.page_shift {
		config.page_shift = page_shift;
	}
	if let Some(interval_ms) = args.interval_ms {
		config.interval_ms = interval_ms;
	}
	if let Some(output_dir) = &args.output_dir {
		config.output_dir.clone_from(output_dir);
	}
	if let Some(workers) = args.workers {
		config.workers = workers;
	}

	Ok(config)
}
