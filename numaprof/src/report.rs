//! Report formatting
//!
//! Renders snapshots as comma-separated tables.

// Imports
use {
	crate::{comm::CommSnapshot, page::PageSnapshot},
	itertools::Itertools,
	std::fmt::{self, Write},
};

/// Report kind
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ReportKind {
	/// Communication matrix
	Comm,

	/// Page usage
	Page,
}

impl ReportKind {
	/// Returns the name of this kind, as used in report file names
	pub fn name(self) -> &'static str {
		match self {
			Self::Comm => "comm",
			Self::Page => "page",
		}
	}
}

impl fmt::Display for ReportKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.pad(self.name())
	}
}

/// First-touch value written for pages without one
pub const UNSET_FIRST_TOUCH: &str = "-1";

/// Formats a communication matrix.
///
/// Each cell holds the communication between both threads in either direction.
/// Rows go from the highest thread index to the lowest, columns from the lowest
/// to the highest, and the table ends with an empty line.
pub fn format_comm(snapshot: &CommSnapshot) -> String {
	let threads = snapshot.threads();

	let mut output = String::new();
	for row in (0..threads).rev() {
		let cells = (0..threads).map(|col| snapshot.combined(row, col)).join(",");
		output.push_str(&cells);
		output.push('\n');
	}
	output.push('\n');

	output
}

/// Formats page usage.
///
/// Starts with a header, followed by one line per page with its id,
/// first toucher (or [`UNSET_FIRST_TOUCH`]) and accesses by each thread.
pub fn format_pages(snapshot: &PageSnapshot) -> String {
	let mut output = String::from("nr, addr, firstacc");
	for thread in 0..snapshot.threads {
		// Note: Writing to a `String` can't fail
		let _ = write!(output, ",T{thread}");
	}
	output.push('\n');

	for row in &snapshot.pages {
		let _ = write!(output, "0,{},", row.page);
		match row.first_touch {
			Some(thread) => {
				let _ = write!(output, "{thread}");
			},
			None => output.push_str(UNSET_FIRST_TOUCH),
		}
		for count in &row.accesses {
			let _ = write!(output, ",{count}");
		}
		output.push('\n');
	}

	output
}

#[cfg(test)]
mod tests {
	use {
		super::{format_comm, format_pages},
		crate::{
			comm::CommSnapshot,
			page::{PageRow, PageSnapshot},
			thread_registry::ThreadIdx,
		},
	};

	#[test]
	fn comm_rows_are_descending() {
		// [to][from], row-major
		let snapshot = CommSnapshot::from_counts(3, vec![
			0, 1, 1, //
			1, 0, 0, //
			1, 1, 0, //
		])
		.expect("Unable to create snapshot");

		assert_eq!(format_comm(&snapshot), "2,1,0\n2,0,1\n0,2,2\n\n");
	}

	#[test]
	fn comm_without_threads_is_blank() {
		let snapshot = CommSnapshot::from_counts(0, vec![]).expect("Unable to create snapshot");
		assert_eq!(format_comm(&snapshot), "\n");
	}

	#[test]
	fn pages_have_header_and_sentinel() {
		let snapshot = PageSnapshot {
			threads: 2,
			pages:   vec![
				PageRow {
					page:        16,
					first_touch: Some(ThreadIdx::new(1).expect("Invalid thread index")),
					accesses:    vec![3, 4],
				},
				PageRow {
					page:        4096,
					first_touch: None,
					accesses:    vec![0, 0],
				},
			],
		};

		assert_eq!(
			format_pages(&snapshot),
			"nr, addr, firstacc,T0,T1\n0,16,1,3,4\n0,4096,-1,0,0\n"
		);
	}
}
