//! Recursive counts and cumulative size over a whole subtree.
//!
//! The walk is iterative over a pending-directory list, stays on the
//! filesystem the root lives on, and counts unreadable subdirectories instead
//! of aborting. Every hard link counts as a file entry, but each inode's size
//! goes into the byte total only once. One job slot covers the entire walk;
//! partial totals are published after each directory.

use std::{collections::HashSet, path::PathBuf, sync::Arc};

use futures::StreamExt;
use tracing::trace;
use uuid::Uuid;

use crate::{
	directory::DirectoryId,
	engine::{EngineInner, State},
	event::DirectoryEvent,
	file::{DeepCountStatus, DeepCounts, FileId},
	request::AttributeKind,
	resource::{EntryKind, FilesystemId},
};

use super::{job_name, ActiveFetch, OpId};

const KIND: AttributeKind = AttributeKind::DeepCount;

pub(crate) fn start(
	engine: &Arc<EngineInner>,
	state: &mut State,
	directory: DirectoryId,
	file: FileId,
	doing_io: &mut bool,
) {
	let State {
		directories,
		limiter,
	} = state;
	let Some(dir) = directories.get_mut(&directory) else {
		return;
	};

	if dir.slots.is_active(KIND) {
		*doing_io = true;
		return;
	}

	let Some(record) = dir.record(file) else {
		return;
	};
	if !dir.is_needy(record, KIND) {
		return;
	}

	if !record.is_directory() {
		// nothing beneath a non-directory; resolved without I/O
		if let Some(record) = dir.record_mut(file) {
			record.deep_counts = DeepCounts {
				status: DeepCountStatus::Done,
				..DeepCounts::default()
			};
		}
		dir.state_changed = true;
		engine.events.emit(DirectoryEvent::FilesChanged {
			directory,
			files: vec![file],
		});
		return;
	}

	*doing_io = true;
	if !limiter.try_start(directory, job_name(KIND)) {
		return;
	}

	let op = Uuid::new_v4();
	let root = record.location.clone();
	if let Some(record) = dir.record_mut(file) {
		record.deep_counts.reset_in_progress();
	}
	let engine = Arc::clone(engine);
	let handle = tokio::spawn(async move {
		walk(engine, directory, op, file, root).await;
	});
	dir.slots.set(KIND, ActiveFetch::new(op, Some(file), handle));
}

pub(crate) fn stop(state: &mut State, directory: DirectoryId) {
	let State {
		directories,
		limiter,
	} = state;
	let Some(dir) = directories.get_mut(&directory) else {
		return;
	};
	let Some(active) = dir.slots.get(KIND) else {
		return;
	};

	let still_wanted = active
		.file
		.and_then(|file| dir.record(file))
		.is_some_and(|record| dir.is_needy(record, KIND));
	if !still_wanted {
		if let Some(cancelled) = dir.slots.cancel(KIND) {
			// a partial walk is worthless; back to square one
			if let Some(record) = cancelled.file.and_then(|file| dir.record_mut(file)) {
				record.deep_counts = DeepCounts::default();
			}
		}
		limiter.end(directory, job_name(KIND));
	}
}

async fn walk(
	engine: Arc<EngineInner>,
	directory: DirectoryId,
	op: OpId,
	file: FileId,
	root: PathBuf,
) {
	let root_filesystem = match engine.resource.query_info(&root).await {
		Ok(info) => info.filesystem_id,
		Err(_) => None,
	};

	let mut pending = vec![root];
	let mut counts = DeepCounts {
		status: DeepCountStatus::InProgress,
		..DeepCounts::default()
	};
	let mut seen_inodes: HashSet<(Option<FilesystemId>, u64)> = HashSet::new();

	while let Some(location) = pending.pop() {
		match engine
			.resource
			.enumerate_children(&location, engine.config.page_size)
			.await
		{
			Ok(mut pages) => {
				let mut failed = false;
				while let Some(page) = pages.next().await {
					let Ok(entries) = page else {
						failed = true;
						break;
					};
					for entry in entries {
						if matches!(entry.kind, EntryKind::Directory) {
							counts.directories += 1;
							let same_filesystem = entry.filesystem_id.is_none()
								|| root_filesystem.is_none()
								|| entry.filesystem_id == root_filesystem;
							if same_filesystem {
								pending.push(location.join(&entry.name));
							}
						} else {
							counts.files += 1;
							// extra links to a counted inode add no size
							let seen = entry.inode.is_some_and(|inode| {
								!seen_inodes.insert((entry.filesystem_id.clone(), inode))
							});
							if !seen {
								counts.total_bytes += entry.size;
							}
						}
					}
				}
				if failed {
					counts.unreadable += 1;
				}
			}
			Err(_) => counts.unreadable += 1,
		}

		if !publish(&engine, directory, op, file, counts) {
			return;
		}
	}

	counts.status = DeepCountStatus::Done;
	let mut state = engine.state.lock();
	finish(&engine, &mut state, directory, op, file, counts);
}

/// Publish intermediate totals; returns `false` when the walk lost its slot
/// and should stop.
fn publish(
	engine: &Arc<EngineInner>,
	directory: DirectoryId,
	op: OpId,
	file: FileId,
	counts: DeepCounts,
) -> bool {
	let mut state = engine.state.lock();
	let Some(dir) = state.directories.get_mut(&directory) else {
		return false;
	};
	if !dir.slots.still_owns(KIND, op) {
		return false;
	}

	if let Some(record) = dir.record_mut(file) {
		record.deep_counts = counts;
	}
	engine
		.events
		.emit(DirectoryEvent::DeepCountUpdated { directory, file });

	true
}

fn finish(
	engine: &Arc<EngineInner>,
	state: &mut State,
	directory: DirectoryId,
	op: OpId,
	file: FileId,
	counts: DeepCounts,
) {
	{
		let Some(dir) = state.directories.get_mut(&directory) else {
			return;
		};
		if !dir.slots.finish(KIND, op) {
			trace!(directory = %directory, "stale deep count completion discarded");
			return;
		}
	}
	state.limiter.end(directory, job_name(KIND));

	let Some(dir) = state.directories.get_mut(&directory) else {
		return;
	};
	if let Some(record) = dir.record_mut(file) {
		record.deep_counts = counts;
	}
	engine
		.events
		.emit(DirectoryEvent::DeepCountUpdated { directory, file });
	engine.events.emit(DirectoryEvent::FilesChanged {
		directory,
		files: vec![file],
	});

	engine.state_changed(state, directory);
}
