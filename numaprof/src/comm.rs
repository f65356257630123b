//! Communication classifier
//!
//! Tracks, for each cache line, the two most recent distinct threads that
//! accessed it, and counts a communication event whenever a thread takes a
//! line over from other threads.

// Imports
use {
	crate::{config::MAX_THREADS, thread_registry::ThreadIdx},
	dashmap::DashMap,
	std::sync::atomic::{self, AtomicU32, AtomicU64},
};

/// Lines to reserve space for up front
pub const RESERVED_LINES: usize = 1 << 20;

/// Communication classifier
#[derive(Debug)]
pub struct CommunicationClassifier {
	/// Line states, by line id
	lines: DashMap<u64, LineSlots>,

	/// Communication matrix
	matrix: CommMatrix,
}

impl CommunicationClassifier {
	/// Creates an empty classifier
	pub fn new() -> Self {
		Self::with_capacity(0)
	}

	/// Creates an empty classifier with space reserved for `lines` lines
	pub fn with_capacity(lines: usize) -> Self {
		Self {
			lines:  DashMap::with_capacity(lines),
			matrix: CommMatrix::new(),
		}
	}

	/// Observes an access to cache line `line` by `accessor`
	pub fn observe(&self, line: u64, accessor: ThreadIdx) {
		// Note: Most accesses hit an existing line, which only needs the shard's read lock.
		if let Some(slots) = self.lines.get(&line) {
			self.update(&slots, accessor);
			return;
		}

		let slots = self.lines.entry(line).or_default();
		self.update(&slots, accessor);
	}

	/// Updates a line's slots after an access by `accessor`.
	///
	/// Concurrent updates on the same line may race on the slots, but
	/// every counted event is counted exactly once.
	fn update(&self, slots: &LineSlots, accessor: ThreadIdx) {
		let [slot0, slot1] = &slots.0;
		let prev0 = ThreadIdx::from_slot(slot0.load(atomic::Ordering::Relaxed));
		let prev1 = ThreadIdx::from_slot(slot1.load(atomic::Ordering::Relaxed));

		match (prev0, prev1) {
			// First access to the line, nothing to communicate with
			(None, None) => slot0.store(accessor.to_slot(), atomic::Ordering::Relaxed),

			// Single previous accessor, we take over the line if we're someone else
			(Some(a), None) | (None, Some(a)) =>
				if a != accessor {
					self.charge(accessor, a);
					slot1.store(a.to_slot(), atomic::Ordering::Relaxed);
					slot0.store(accessor.to_slot(), atomic::Ordering::Relaxed);
				},

			// Two previous accessors
			(Some(a), Some(b)) => match accessor {
				// We were the most recent, nothing changed
				_ if accessor == a => (),

				// We were the older one, so only the most recent is displaced
				_ if accessor == b => {
					self.charge(accessor, a);
					slot1.store(a.to_slot(), atomic::Ordering::Relaxed);
					slot0.store(accessor.to_slot(), atomic::Ordering::Relaxed);
				},

				// Else both are displaced
				_ => {
					self.charge(accessor, a);
					self.charge(accessor, b);
					slot1.store(a.to_slot(), atomic::Ordering::Relaxed);
					slot0.store(accessor.to_slot(), atomic::Ordering::Relaxed);
				},
			},
		}
	}

	/// Charges a communication from `prev` to `accessor`, unless they're the same thread
	fn charge(&self, accessor: ThreadIdx, prev: ThreadIdx) {
		if accessor != prev {
			self.matrix.increment(accessor, prev);
		}
	}

	/// Returns the matrix
	pub fn matrix(&self) -> &CommMatrix {
		&self.matrix
	}

	/// Returns the number of tracked lines
	pub fn lines_len(&self) -> usize {
		self.lines.len()
	}
}

impl Default for CommunicationClassifier {
	fn default() -> Self {
		Self::new()
	}
}

/// Line slots.
///
/// Slot 0 holds the most recent accessor and slot 1 the one before it,
/// each as [`ThreadIdx::to_slot`], with 0 meaning empty.
#[derive(Debug, Default)]
struct LineSlots([AtomicU32; 2]);

/// Communication matrix.
///
/// Cell `[a][b]` counts the times `a` took a line over from `b`.
#[derive(Debug)]
pub struct CommMatrix {
	/// All cells, row-major, `MAX_THREADS` x `MAX_THREADS`
	cells: Box<[AtomicU64]>,
}

impl CommMatrix {
	/// Creates a zeroed matrix
	pub fn new() -> Self {
		Self {
			cells: (0..MAX_THREADS * MAX_THREADS).map(|_| AtomicU64::new(0)).collect(),
		}
	}

	/// Increments cell `[to][from]`.
	///
	/// Counters wrap on overflow.
	pub fn increment(&self, to: ThreadIdx, from: ThreadIdx) {
		self.cells[Self::cell_idx(to, from)].fetch_add(1, atomic::Ordering::Relaxed);
	}

	/// Returns cell `[to][from]`
	pub fn get(&self, to: ThreadIdx, from: ThreadIdx) -> u64 {
		self.cells[Self::cell_idx(to, from)].load(atomic::Ordering::Relaxed)
	}

	/// Takes the first `threads` x `threads` cells, leaving them zeroed.
	///
	/// # Panics
	/// Panics if `threads` exceeds `MAX_THREADS`.
	pub fn take(&self, threads: usize) -> CommSnapshot {
		assert!(threads <= MAX_THREADS, "Thread count {threads} exceeds maximum of {MAX_THREADS}");

		let counts = (0..threads)
			.flat_map(|to| (0..threads).map(move |from| (to, from)))
			.map(|(to, from)| self.cells[to * MAX_THREADS + from].swap(0, atomic::Ordering::Relaxed))
			.collect();

		CommSnapshot { threads, counts }
	}

	/// Returns the index of cell `[to][from]`
	fn cell_idx(to: ThreadIdx, from: ThreadIdx) -> usize {
		to.to_usize() * MAX_THREADS + from.to_usize()
	}
}

impl Default for CommMatrix {
	fn default() -> Self {
		Self::new()
	}
}

/// Communication matrix snapshot
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct CommSnapshot {
	/// Number of threads
	threads: usize,

	/// Counts, row-major, `threads` x `threads`
	counts: Vec<u64>,
}

impl CommSnapshot {
	/// Creates a snapshot from row-major counts
	///
	/// # Errors
	/// Returns an error if `counts` isn't `threads` x `threads`.
	pub fn from_counts(threads: usize, counts: Vec<u64>) -> Result<Self, anyhow::Error> {
		anyhow::ensure!(
			counts.len() == threads * threads,
			"Expected {} counts for {threads} threads, found {}",
			threads * threads,
			counts.len()
		);

		Ok(Self { threads, counts })
	}

	/// Returns the number of threads
	pub fn threads(&self) -> usize {
		self.threads
	}

	/// Returns the count of `to` taking lines over from `from`
	///
	/// # Panics
	/// Panics if either index is out of bounds.
	pub fn get(&self, to: usize, from: usize) -> u64 {
		assert!(to < self.threads && from < self.threads, "Index out of bounds");
		self.counts[to * self.threads + from]
	}

	/// Returns the communication between `a` and `b`, in either direction.
	pub fn combined(&self, a: usize, b: usize) -> u64 {
		self.get(a, b).wrapping_add(self.get(b, a))
	}

	/// Returns the sum of all counts
	pub fn total(&self) -> u64 {
		self.counts.iter().fold(0, |total, &count| total.wrapping_add(count))
	}

	/// Returns the number of non-zero cells
	pub fn non_zero_cells(&self) -> usize {
		self.counts.iter().filter(|&&count| count != 0).count()
	}
}
