//! Page usage aggregator
//!
//! Counts accesses to each page by each thread, and records which
//! thread touched each page first.

// Imports
use {
	crate::{config::MAX_THREADS, thread_registry::ThreadIdx},
	dashmap::DashMap,
	std::sync::atomic::{self, AtomicU32, AtomicU64},
};

/// Pages to reserve space for up front
pub const RESERVED_PAGES: usize = 1 << 16;

/// Page usage aggregator
#[derive(Debug)]
pub struct PageUsageAggregator {
	/// Page usages, by page id
	pages: DashMap<u64, PageUsage>,
}

impl PageUsageAggregator {
	/// Creates an empty aggregator
	pub fn new() -> Self {
		Self::with_capacity(0)
	}

	/// Creates an empty aggregator with space reserved for `pages` pages
	pub fn with_capacity(pages: usize) -> Self {
		Self {
			pages: DashMap::with_capacity(pages),
		}
	}

	/// Observes an access to page `page` by `accessor`
	pub fn observe(&self, page: u64, accessor: ThreadIdx) {
		if let Some(usage) = self.pages.get(&page) {
			usage.register_access(accessor);
			return;
		}

		self.pages.entry(page).or_default().register_access(accessor);
	}

	/// Returns the first thread to touch `page`, if any
	pub fn first_touch(&self, page: u64) -> Option<ThreadIdx> {
		self.pages.get(&page).and_then(|usage| usage.first_touch())
	}

	/// Returns the number of accesses by `accessor` to `page`
	pub fn accesses(&self, page: u64, accessor: ThreadIdx) -> u64 {
		self.pages
			.get(&page)
			.map_or(0, |usage| usage.accesses[accessor.to_usize()].load(atomic::Ordering::Relaxed))
	}

	/// Returns the number of tracked pages
	pub fn pages_len(&self) -> usize {
		self.pages.len()
	}

	/// Takes the usage of all pages for the first `threads` threads, leaving them zeroed.
	///
	/// Pages are kept, only their counters and first touch are reset.
	/// The snapshot is sorted by page id.
	///
	/// # Panics
	/// Panics if `threads` exceeds `MAX_THREADS`.
	pub fn take(&self, threads: usize) -> PageSnapshot {
		assert!(threads <= MAX_THREADS, "Thread count {threads} exceeds maximum of {MAX_THREADS}");

		let mut pages = self
			.pages
			.iter()
			.map(|entry| {
				let usage = entry.value();
				PageRow {
					page:        *entry.key(),
					first_touch: ThreadIdx::from_slot(usage.first_touch.swap(0, atomic::Ordering::Relaxed)),
					accesses:    usage.accesses[..threads]
						.iter()
						.map(|count| count.swap(0, atomic::Ordering::Relaxed))
						.collect(),
				}
			})
			.collect::<Vec<_>>();
		pages.sort_unstable_by_key(|row| row.page);

		PageSnapshot { threads, pages }
	}
}

impl Default for PageUsageAggregator {
	fn default() -> Self {
		Self::new()
	}
}

/// Page usage
#[derive(Debug)]
struct PageUsage {
	/// First thread to touch the page, as [`ThreadIdx::to_slot`], with 0 meaning unset
	first_touch: AtomicU32,

	/// Accesses, by thread index.
	///
	/// Counters wrap on overflow.
	accesses: [AtomicU64; MAX_THREADS],
}

impl PageUsage {
	/// Registers an access by `accessor`
	fn register_access(&self, accessor: ThreadIdx) {
		// Note: The load skips the compare-exchange once a page has an owner.
		if self.first_touch.load(atomic::Ordering::Relaxed) == 0 {
			// Note: Only one thread can win this, others will see the owner is set.
			let _ = self.first_touch.compare_exchange(
				0,
				accessor.to_slot(),
				atomic::Ordering::AcqRel,
				atomic::Ordering::Relaxed,
			);
		}

		self.accesses[accessor.to_usize()].fetch_add(1, atomic::Ordering::Relaxed);
	}

	/// Returns the first thread to touch this page
	fn first_touch(&self) -> Option<ThreadIdx> {
		ThreadIdx::from_slot(self.first_touch.load(atomic::Ordering::Acquire))
	}
}

impl Default for PageUsage {
	fn default() -> Self {
		Self {
			first_touch: AtomicU32::new(0),
			accesses:    std::array::from_fn(|_| AtomicU64::new(0)),
		}
	}
}

/// Page usage snapshot
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct PageSnapshot {
	/// Number of threads
	pub threads: usize,

	/// All pages, sorted by page id
	pub pages: Vec<PageRow>,
}

impl PageSnapshot {
	/// Returns the total accesses across all pages
	pub fn total_accesses(&self) -> u64 {
		self.pages
			.iter()
			.flat_map(|row| &row.accesses)
			.fold(0, |total, &count| total.wrapping_add(count))
	}

	/// Returns an iterator over the pages that were accessed
	pub fn touched_pages(&self) -> impl Iterator<Item = &PageRow> + '_ {
		self.pages.iter().filter(|row| row.accesses.iter().any(|&count| count != 0))
	}
}

/// Usage of a single page
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct PageRow {
	/// Page id
	pub page: u64,

	/// First thread to touch the page
	pub first_touch: Option<ThreadIdx>,

	/// Accesses, by thread index
	pub accesses: Vec<u64>,
}
