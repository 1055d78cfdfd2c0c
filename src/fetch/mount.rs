//! Mount resolution.
//!
//! Files that are themselves mount points (and mountables, via their
//! activation location) resolve synchronously against the already-known
//! mounts, with no round trip. A directory's own record resolves its
//! enclosing mount asynchronously, but the answer only counts if the mount's
//! root is the directory itself; anything else means "no mount of its own".

use std::sync::Arc;

use tracing::trace;
use uuid::Uuid;

use crate::{
	directory::DirectoryId,
	engine::{EngineInner, State},
	event::DirectoryEvent,
	file::FileId,
	request::AttributeKind,
	resource::{EntryKind, MountInfo},
};

use super::{job_name, ActiveFetch, OpId};

const KIND: AttributeKind = AttributeKind::Mount;

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

	// lacks_mount guarantees the info is in
	let Some(info) = record.info.value.as_ref() else {
		return;
	};

	if info.is_mount_point || matches!(info.kind, EntryKind::Mountable) {
		let root = if info.is_mount_point {
			record.location.clone()
		} else {
			info.activation_location
				.clone()
				.unwrap_or_else(|| record.location.clone())
		};
		let mount = engine.resource.known_mount_for_root(&root);

		if let Some(record) = dir.record_mut(file) {
			record.mount.set_known(mount);
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
	let location = record.location.clone();
	let engine = Arc::clone(engine);
	let handle = tokio::spawn(async move {
		let found = engine.resource.find_enclosing_mount(&location).await.ok();
		// only a mount rooted exactly here belongs to this record
		let mount = found.filter(|mount| mount.root == location);
		let mut state = engine.state.lock();
		finish(&engine, &mut state, directory, op, file, mount);
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
		dir.slots.cancel(KIND);
		limiter.end(directory, job_name(KIND));
	}
}

fn finish(
	engine: &Arc<EngineInner>,
	state: &mut State,
	directory: DirectoryId,
	op: OpId,
	file: FileId,
	mount: Option<MountInfo>,
) {
	{
		let Some(dir) = state.directories.get_mut(&directory) else {
			return;
		};
		if !dir.slots.finish(KIND, op) {
			trace!(directory = %directory, "stale mount completion discarded");
			return;
		}
	}
	state.limiter.end(directory, job_name(KIND));

	let Some(dir) = state.directories.get_mut(&directory) else {
		return;
	};
	if let Some(record) = dir.record_mut(file) {
		record.mount.set_known(mount);
		engine.events.emit(DirectoryEvent::FilesChanged {
			directory,
			files: vec![file],
		});
	}

	engine.state_changed(state, directory);
}
