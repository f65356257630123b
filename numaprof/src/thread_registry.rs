//! Thread registry
//!
//! Assigns each observed thread a compact index in `0..MAX_THREADS`,
//! in the order the threads were first seen.

// Imports
use {
	crate::config::MAX_THREADS,
	parking_lot::RwLock,
	std::{
		collections::HashMap,
		fmt,
		sync::atomic::{self, AtomicUsize},
	},
};

/// Thread registry
#[derive(Debug)]
pub struct ThreadRegistry {
	/// Registered threads
	inner: RwLock<Inner>,

	/// Number of registered threads.
	///
	/// Mirrors `inner.os_tids.len()` so readers don't need the lock.
	len: AtomicUsize,
}

/// Registry state, guarded by the lock
#[derive(Debug, Default)]
struct Inner {
	/// Index of each os thread id
	idxs: HashMap<u64, ThreadIdx>,

	/// Os thread ids, by index
	os_tids: Vec<u64>,
}

impl ThreadRegistry {
	/// Creates an empty registry
	pub fn new() -> Self {
		Self {
			inner: RwLock::new(Inner::default()),
			len:   AtomicUsize::new(0),
		}
	}

	/// Registers an os thread id, returning its index.
	///
	/// Registering the same id again returns the index it was first assigned.
	///
	/// # Errors
	/// Returns an error if `MAX_THREADS` threads were already registered.
	pub fn register(&self, os_tid: u64) -> Result<ThreadIdx, anyhow::Error> {
		// Fast path: already registered
		if let Some(idx) = self.get(os_tid) {
			return Ok(idx);
		}

		// Note: Someone might have registered it between our read and this write.
		let mut inner = self.inner.write();
		if let Some(&idx) = inner.idxs.get(&os_tid) {
			return Ok(idx);
		}

		let idx = ThreadIdx::new(inner.os_tids.len()).map_err(|_| {
			anyhow::anyhow!("Too many threads: thread {os_tid} would exceed the maximum of {MAX_THREADS}")
		})?;
		inner.idxs.insert(os_tid, idx);
		inner.os_tids.push(os_tid);
		self.len.store(inner.os_tids.len(), atomic::Ordering::Release);
		tracing::debug!(os_tid, ?idx, "Registered thread");

		Ok(idx)
	}

	/// Returns the index of an os thread id, if registered
	pub fn get(&self, os_tid: u64) -> Option<ThreadIdx> {
		self.inner.read().idxs.get(&os_tid).copied()
	}

	/// Returns the number of registered threads
	pub fn len(&self) -> usize {
		self.len.load(atomic::Ordering::Acquire)
	}

	/// Returns if no threads are registered
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns all registered os thread ids, by index
	pub fn os_tids(&self) -> Vec<u64> {
		self.inner.read().os_tids.clone()
	}
}

impl Default for ThreadRegistry {
	fn default() -> Self {
		Self::new()
	}
}

/// Compact thread index.
///
/// Guaranteed to be less than `MAX_THREADS`.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct ThreadIdx(u32);

impl ThreadIdx {
	/// Creates a thread index.
	///
	/// # Errors
	/// Returns an error if `idx` isn't less than `MAX_THREADS`.
	pub fn new(idx: usize) -> Result<Self, anyhow::Error> {
		anyhow::ensure!(idx < MAX_THREADS, "Thread index {idx} exceeds maximum of {MAX_THREADS}");
		Ok(Self(idx as u32))
	}

	/// Returns this index as a `usize`
	pub fn to_usize(self) -> usize {
		self.0 as usize
	}

	/// Returns the slot value for this index.
	///
	/// Slots reserve 0 for "empty", so this is always non-zero.
	pub fn to_slot(self) -> u32 {
		self.0 + 1
	}

	/// Creates an index from a slot value, returning `None` for an empty slot
	pub fn from_slot(slot: u32) -> Option<Self> {
		slot.checked_sub(1).map(Self)
	}
}

impl fmt::Debug for ThreadIdx {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("ThreadIdx").field(&self.0).finish()
	}
}

impl fmt::Display for ThreadIdx {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}
