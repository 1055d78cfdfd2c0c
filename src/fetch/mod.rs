//! One module per attribute fetcher. Each fetcher owns a single in-flight
//! slot per directory: `start` claims the slot and spawns the I/O task,
//! the task re-locks engine state on completion and applies its result only
//! if its operation id still occupies the slot.

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{file::FileId, request::AttributeKind};

pub(crate) mod deep_count;
pub(crate) mod extension;
pub(crate) mod file_info;
pub(crate) mod file_list;
pub(crate) mod filesystem_info;
pub(crate) mod mount;
pub(crate) mod shallow_count;
pub(crate) mod thumbnail;

/// Identifies one spawned fetch operation. A completion whose id no longer
/// matches the directory's slot is stale and must be discarded.
pub(crate) type OpId = Uuid;

/// Job names as they appear in the limiter's logs.
pub(crate) const fn job_name(kind: AttributeKind) -> &'static str {
	match kind {
		AttributeKind::FileList => "file list",
		AttributeKind::FileInfo => "file info",
		AttributeKind::ShallowCount => "shallow count",
		AttributeKind::DeepCount => "deep count",
		AttributeKind::FilesystemInfo => "filesystem info",
		AttributeKind::Mount => "mount",
		AttributeKind::Thumbnail => "thumbnail",
		AttributeKind::ExtensionInfo => "extension info",
	}
}

/// An in-flight fetch bound to one directory slot.
#[derive(Debug)]
pub(crate) struct ActiveFetch {
	pub(crate) op: OpId,
	/// The file being serviced; `None` for directory-level work.
	pub(crate) file: Option<FileId>,
	handle: JoinHandle<()>,
}

impl ActiveFetch {
	pub(crate) fn new(op: OpId, file: Option<FileId>, handle: JoinHandle<()>) -> Self {
		Self { op, file, handle }
	}

	pub(crate) fn abort(&self) {
		self.handle.abort();
	}
}

/// Per-directory fetch slots, one per attribute kind. At most one operation
/// of a given kind runs per directory at any time.
#[derive(Debug, Default)]
pub(crate) struct FetchSlots {
	slots: [Option<ActiveFetch>; crate::request::KIND_COUNT],
}

impl FetchSlots {
	pub(crate) fn get(&self, kind: AttributeKind) -> Option<&ActiveFetch> {
		self.slots[kind.index()].as_ref()
	}

	pub(crate) fn is_active(&self, kind: AttributeKind) -> bool {
		self.slots[kind.index()].is_some()
	}

	pub(crate) fn set(&mut self, kind: AttributeKind, fetch: ActiveFetch) {
		debug_assert!(self.slots[kind.index()].is_none());
		self.slots[kind.index()] = Some(fetch);
	}

	/// Abort and clear the slot, if occupied. Any later completion from the
	/// aborted task fails the op-id check and is discarded.
	pub(crate) fn cancel(&mut self, kind: AttributeKind) -> Option<ActiveFetch> {
		let fetch = self.slots[kind.index()].take()?;
		fetch.abort();
		Some(fetch)
	}

	/// Release the slot if `op` still owns it. Returns `false` for stale
	/// completions.
	pub(crate) fn finish(&mut self, kind: AttributeKind, op: OpId) -> bool {
		match &self.slots[kind.index()] {
			Some(active) if active.op == op => {
				self.slots[kind.index()] = None;
				true
			}
			_ => false,
		}
	}

	/// Whether `op` still owns the slot, without releasing it. Long-running
	/// fetches use this between intermediate result batches.
	pub(crate) fn still_owns(&self, kind: AttributeKind, op: OpId) -> bool {
		self.slots[kind.index()]
			.as_ref()
			.is_some_and(|active| active.op == op)
	}

	pub(crate) fn cancel_all(&mut self) {
		for slot in &mut self.slots {
			if let Some(fetch) = slot.take() {
				fetch.abort();
			}
		}
	}
}
