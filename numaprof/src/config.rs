//! Configuration

// Imports
use {
	anyhow::Context,
	std::{path::PathBuf, time::Duration},
};

/// Maximum number of distinct threads that may be profiled
pub const MAX_THREADS: usize = 64;

/// Configuration
#[derive(Clone, Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
	/// Cache line granularity, in bits
	pub comm_shift: u32,

	/// Page granularity, in bits
	pub page_shift: u32,

	/// Report interval (in milliseconds).
	///
	/// A value of 0 disables periodic reports, leaving only the final one.
	pub interval_ms: u64,

	/// Whether communication detection is enabled
	pub communication: bool,

	/// Whether page usage detection is enabled
	pub page: bool,

	/// Directory to write reports into
	pub output_dir: PathBuf,

	/// Observer threads used when replaying a trace
	pub workers: usize,

	/// Replay progress output period (in seconds)
	pub debug_output_period_secs: f64,
}

impl Config {
	/// Checks that this configuration can be used to start profiling.
	///
	/// # Errors
	/// Returns an error if no analysis is enabled, if a shift can't be applied
	/// to a 64-bit address, if there are no workers, or if the debug output
	/// period isn't representable as a duration.
	pub fn validate(&self) -> Result<(), anyhow::Error> {
		anyhow::ensure!(
			self.communication || self.page,
			"Need to choose at least one of communication (-c) or page usage (-p) detection"
		);
		anyhow::ensure!(
			self.comm_shift < u64::BITS,
			"Communication shift must be less than {} bits, found {}",
			u64::BITS,
			self.comm_shift
		);
		anyhow::ensure!(
			self.page_shift < u64::BITS,
			"Page shift must be less than {} bits, found {}",
			u64::BITS,
			self.page_shift
		);
		anyhow::ensure!(self.workers > 0, "At least one worker is required");
		self.debug_output_period()?;

		Ok(())
	}

	/// Returns the replay progress output period
	pub fn debug_output_period(&self) -> Result<Duration, anyhow::Error> {
		Duration::try_from_secs_f64(self.debug_output_period_secs).with_context(|| {
			format!(
				"Debug output period must be a non-negative number of seconds, found {}",
				self.debug_output_period_secs
			)
		})
	}
}

impl Default for Config {
	fn default() -> Self {
		Self {
			comm_shift:               6,
			page_shift:               12,
			interval_ms:              0,
			communication:            false,
			page:                     false,
			output_dir:               PathBuf::from("."),
			workers:                  1,
			debug_output_period_secs: 1.0,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::Config;

	#[test]
	fn no_analysis_is_rejected() {
		let err = Config::default().validate().expect_err("Config without analyses was accepted");
		assert!(err.to_string().contains("at least one"), "Unexpected error: {err}");
	}

	#[test]
	fn single_analysis_is_accepted() {
		let config = Config {
			page: true,
			..Config::default()
		};
		config.validate().expect("Page-only config was rejected");
	}

	#[test]
	fn oversized_shift_is_rejected() {
		let config = Config {
			communication: true,
			comm_shift: 64,
			..Config::default()
		};
		assert!(config.validate().is_err());
	}

	#[test]
	fn unrepresentable_period_is_rejected() {
		let config = serde_json::from_str::<Config>(r#"{ "page": true, "debug_output_period_secs": 1e20 }"#)
			.expect("Unable to parse config");
		let err = config.validate().expect_err("Oversized period was accepted");
		assert!(format!("{err:?}").contains("Debug output period"), "Unexpected error: {err:?}");

		let config = Config {
			page: true,
			debug_output_period_secs: -1.0,
			..Config::default()
		};
		assert!(config.validate().is_err());
	}

	#[test]
	fn partial_json_uses_defaults() {
		let config = serde_json::from_str::<Config>(r#"{ "communication": true, "interval_ms": 250 }"#)
			.expect("Unable to parse config");
		assert!(config.communication);
		assert!(!config.page);
		assert_eq!(config.interval_ms, 250);
		assert_eq!(config.comm_shift, 6);
		assert_eq!(config.page_shift, 12);
		assert_eq!(config.workers, 1);
	}
}
