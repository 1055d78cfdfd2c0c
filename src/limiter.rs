use std::collections::HashSet;

use tracing::{debug, trace};

use crate::directory::DirectoryId;

/// Global admission control over every directory's in-flight fetch
/// operations. This is really just a way of limiting the number of async
/// requests issued at any given time; without it the number of concurrent
/// operations is unbounded.
///
/// There is one limiter per engine, shared by reference through the engine
/// state; all updates happen synchronously under the state lock.
#[derive(Debug)]
pub(crate) struct JobLimiter {
	running: usize,
	cap: usize,
	waiting: HashSet<DirectoryId>,
	waking_up: bool,
}

impl JobLimiter {
	pub(crate) fn new(cap: usize) -> Self {
		Self {
			running: 0,
			cap: cap.max(1),
			waiting: HashSet::new(),
			waking_up: false,
		}
	}

	/// Claim one job slot for `directory`. When the cap is reached the
	/// directory is parked in the waiting set instead and `false` is
	/// returned; it will be revisited by [`Self::next_waiting`] once a slot
	/// frees up.
	pub(crate) fn try_start(&mut self, directory: DirectoryId, job: &str) -> bool {
		debug_assert!(self.running <= self.cap);

		if self.running >= self.cap {
			trace!(%directory, job, "job cap reached, parking directory");
			self.waiting.insert(directory);
			return false;
		}

		debug!(%directory, job, "starting job");
		self.running += 1;

		true
	}

	/// Release one job slot.
	pub(crate) fn end(&mut self, directory: DirectoryId, job: &str) {
		debug!(%directory, job, "stopping job");
		debug_assert!(self.running > 0, "ended a job that was never started");
		self.running = self.running.saturating_sub(1);
	}

	/// Pop an arbitrary parked directory, provided a slot is free. The
	/// caller loops, re-running the coordinator for each popped directory,
	/// until this returns `None`.
	pub(crate) fn next_waiting(&mut self) -> Option<DirectoryId> {
		if self.running >= self.cap {
			return None;
		}

		let directory = *self.waiting.iter().next()?;
		self.waiting.remove(&directory);

		Some(directory)
	}

	/// Reentrancy guard for the wake-up loop; a wake-up that indirectly
	/// triggers another wake-up must not recurse.
	pub(crate) fn begin_wake_up(&mut self) -> bool {
		if self.waking_up {
			return false;
		}
		self.waking_up = true;

		true
	}

	pub(crate) fn end_wake_up(&mut self) {
		self.waking_up = false;
	}

	pub(crate) fn forget(&mut self, directory: DirectoryId) {
		self.waiting.remove(&directory);
	}

	#[cfg(test)]
	pub(crate) fn running(&self) -> usize {
		self.running
	}
}
