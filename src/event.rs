//! Broadcast notifications emitted by the engine.

use tokio::sync::broadcast;

use crate::{directory::DirectoryId, error::ResourceError, file::FileId};

/// Notifications about directory and file state, broadcast to every
/// subscriber. Losing events (lagged receiver) is acceptable for observers;
/// exact-once delivery is reserved for ready callbacks.
#[derive(Debug, Clone)]
pub enum DirectoryEvent {
	/// New files appeared in the directory's membership.
	FilesAdded {
		directory: DirectoryId,
		files: Vec<FileId>,
	},
	/// Attributes changed for these files (including transitions to gone or
	/// to known-failed, so stale "loading" observers always get cleared).
	FilesChanged {
		directory: DirectoryId,
		files: Vec<FileId>,
	},
	/// The initial file-list load finished successfully.
	DoneLoading { directory: DirectoryId },
	/// The initial file-list load failed.
	LoadError {
		directory: DirectoryId,
		error: ResourceError,
	},
	/// A recursive count made progress; partial totals are readable from the
	/// file's snapshot.
	DeepCountUpdated {
		directory: DirectoryId,
		file: FileId,
	},
	/// Every pending external provider for this file has completed.
	ProvidersDone {
		directory: DirectoryId,
		file: FileId,
	},
}

/// Event bus for broadcasting engine events.
#[derive(Debug)]
pub(crate) struct EventBus {
	sender: broadcast::Sender<DirectoryEvent>,
}

impl EventBus {
	pub(crate) fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Emit an event, ignoring send errors (no receivers).
	pub(crate) fn emit(&self, event: DirectoryEvent) {
		let _ = self.sender.send(event);
	}

	pub(crate) fn subscribe(&self) -> broadcast::Receiver<DirectoryEvent> {
		self.sender.subscribe()
	}
}
