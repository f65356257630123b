//! Logger
//!
//! Logs to stderr, filtered by `RUST_LOG` (defaults to `info`), and
//! optionally to a file, filtered by `RUST_LOG_FILE` (defaults to `debug`).

// Imports
use {
	std::{
		fs,
		path::Path,
		sync::{Mutex, PoisonError},
	},
	tracing::{metadata::LevelFilter, Level},
	tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer},
};

/// Messages logged before the logger was initialized
static PRE_INIT_MESSAGES: Mutex<Vec<(Level, String)>> = Mutex::new(Vec::new());

/// Pre-initialization logging.
///
/// Messages are buffered and emitted once [`init`](super::init) runs.
pub mod pre_init {
	// Imports
	use {
		super::PRE_INIT_MESSAGES,
		std::sync::PoisonError,
		tracing::Level,
	};

	/// Buffers a message at `level`
	pub fn log(level: Level, msg: impl Into<String>) {
		PRE_INIT_MESSAGES
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.push((level, msg.into()));
	}

	/// Buffers a `debug` message
	pub fn debug(msg: impl Into<String>) {
		self::log(Level::DEBUG, msg);
	}

	/// Buffers a `warn` message
	pub fn warn(msg: impl Into<String>) {
		self::log(Level::WARN, msg);
	}
}

/// Initializes the logger.
///
/// If `log_file` is passed, all logs will additionally be written to it.
///
/// # Panics
/// Panics if a global subscriber was already set.
pub fn init(log_file: Option<&Path>, log_file_append: bool) {
	// Create the stderr layer
	let stderr_layer = fmt::layer()
		.with_writer(std::io::stderr)
		.with_filter(self::env_filter("RUST_LOG", LevelFilter::INFO));

	// And the file layer, if we have a log file
	let mut file_err = None;
	let file_layer = log_file.and_then(|log_file| {
		let file = fs::OpenOptions::new()
			.create(true)
			.write(true)
			.append(log_file_append)
			.truncate(!log_file_append)
			.open(log_file);
		match file {
			Ok(file) => Some(
				fmt::layer()
					.with_ansi(false)
					.with_writer(Mutex::new(file))
					.with_filter(self::env_filter("RUST_LOG_FILE", LevelFilter::DEBUG)),
			),
			Err(err) => {
				file_err = Some(format!("Unable to open log file {log_file:?}: {err}"));
				None
			},
		}
	});

	tracing_subscriber::registry().with(stderr_layer).with(file_layer).init();

	// Then emit everything we buffered
	if let Some(err) = file_err {
		tracing::warn!("{err}");
	}
	let pre_init_messages = std::mem::take(&mut *PRE_INIT_MESSAGES.lock().unwrap_or_else(PoisonError::into_inner));
	for (level, msg) in pre_init_messages {
		match level {
			level if level == Level::ERROR => tracing::error!("{msg}"),
			level if level == Level::WARN => tracing::warn!("{msg}"),
			level if level == Level::INFO => tracing::info!("{msg}"),
			level if level == Level::DEBUG => tracing::debug!("{msg}"),
			_ => tracing::trace!("{msg}"),
		}
	}
}

/// Creates an env filter from env variable `var`, falling back to `default`
fn env_filter(var: &str, default: LevelFilter) -> EnvFilter {
	EnvFilter::builder()
		.with_default_directive(default.into())
		.with_env_var(var)
		.from_env_lossy()
}
