use std::collections::{HashMap, VecDeque};

use crate::file::FileId;

/// An order-preserving, duplicate-free FIFO of files waiting for attribute
/// work, with O(1) membership test and O(1) removal.
///
/// Removal is lazy: `remove` only drops the liveness entry, and stale deque
/// slots are skipped when the head is inspected. Entries are stamped with a
/// sequence number so that a file removed and re-enqueued takes its new
/// position at the back rather than resurrecting the stale slot.
#[derive(Debug, Default)]
pub(crate) struct WorkQueue {
	entries: VecDeque<(FileId, u64)>,
	live: HashMap<FileId, u64>,
	next_seq: u64,
}

impl WorkQueue {
	/// Append a file unless it is already queued. Enqueueing a present file
	/// is a no-op that leaves length and order unchanged.
	pub(crate) fn enqueue(&mut self, file: FileId) {
		if self.live.contains_key(&file) {
			return;
		}

		let seq = self.next_seq;
		self.next_seq += 1;
		self.live.insert(file, seq);
		self.entries.push_back((file, seq));
	}

	/// Unlink a file from the queue. Removing an absent file is a no-op.
	pub(crate) fn remove(&mut self, file: FileId) {
		self.live.remove(&file);
	}

	/// The file at the front of the queue, if any.
	pub(crate) fn head(&mut self) -> Option<FileId> {
		while let Some(&(file, seq)) = self.entries.front() {
			if self.live.get(&file) == Some(&seq) {
				return Some(file);
			}
			self.entries.pop_front();
		}

		None
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.live.is_empty()
	}

	pub(crate) fn len(&self) -> usize {
		self.live.len()
	}
}
