//! Stat-level info for a single file. A not-found answer transitions the
//! record to gone and detaches it from the membership.

use std::sync::Arc;

use tracing::trace;
use uuid::Uuid;

use crate::{
	directory::DirectoryId,
	engine::{EngineInner, State},
	error::ResourceError,
	event::DirectoryEvent,
	file::FileId,
	request::AttributeKind,
	resource::EntryInfo,
};

use super::{job_name, ActiveFetch, OpId};

const KIND: AttributeKind = AttributeKind::FileInfo;

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

	*doing_io = true;
	if !limiter.try_start(directory, job_name(KIND)) {
		return;
	}

	let op = Uuid::new_v4();
	let location = record.location.clone();
	let engine = Arc::clone(engine);
	let handle = tokio::spawn(async move {
		let result = engine.resource.query_info(&location).await;
		let mut state = engine.state.lock();
		finish(&engine, &mut state, directory, op, file, result);
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
	result: Result<EntryInfo, ResourceError>,
) {
	{
		let Some(dir) = state.directories.get_mut(&directory) else {
			return;
		};
		if !dir.slots.finish(KIND, op) {
			trace!(directory = %directory, "stale file info completion discarded");
			return;
		}
	}
	state.limiter.end(directory, job_name(KIND));

	let Some(dir) = state.directories.get_mut(&directory) else {
		return;
	};
	match result {
		Ok(info) => {
			if let Some(record) = dir.record_mut(file) {
				record.update_info(info);
			}
		}
		Err(error) if error.is_not_found() => {
			if let Some(record) = dir.record_mut(file) {
				record.mark_gone();
			}
			if !dir.is_self(file) {
				dir.detach(file);
			}
		}
		Err(error) => {
			if let Some(record) = dir.record_mut(file) {
				record.info.set_failed(error);
			}
		}
	}

	// announced even when nothing visibly changed, so observers stuck in a
	// "loading" state always settle
	engine.events.emit(DirectoryEvent::FilesChanged {
		directory,
		files: vec![file],
	});

	engine.state_changed(state, directory);
}
