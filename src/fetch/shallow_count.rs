//! Number of immediate children of a directory, honoring the hidden-files
//! setting. Asking for the count of a non-directory resolves immediately to a
//! stored failure, without any I/O.

use std::sync::Arc;

use futures::StreamExt;
use tracing::trace;
use uuid::Uuid;

use crate::{
	directory::DirectoryId,
	engine::{EngineInner, State},
	error::ResourceError,
	event::DirectoryEvent,
	file::FileId,
	request::AttributeKind,
};

use super::{job_name, ActiveFetch, OpId};

const KIND: AttributeKind = AttributeKind::ShallowCount;

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
		let location = record.location.clone();
		if let Some(record) = dir.record_mut(file) {
			record
				.shallow_count
				.set_failed(ResourceError::NotADirectory(location));
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
		let show_hidden = engine.config.show_hidden_files;
		let result = async {
			let mut pages = engine
				.resource
				.enumerate_children(&location, engine.config.page_size)
				.await?;

			let mut count = 0u64;
			while let Some(page) = pages.next().await {
				count += page?
					.iter()
					.filter(|entry| show_hidden || (!entry.is_hidden && !entry.is_backup))
					.count() as u64;
			}

			Ok(count)
		}
		.await;

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
	result: Result<u64, ResourceError>,
) {
	{
		let Some(dir) = state.directories.get_mut(&directory) else {
			return;
		};
		if !dir.slots.finish(KIND, op) {
			trace!(directory = %directory, "stale shallow count completion discarded");
			return;
		}
	}
	state.limiter.end(directory, job_name(KIND));

	let Some(dir) = state.directories.get_mut(&directory) else {
		return;
	};
	if let Some(record) = dir.record_mut(file) {
		match result {
			Ok(count) => record.shallow_count.set_known(count),
			Err(error) => record.shallow_count.set_failed(error),
		}
		engine.events.emit(DirectoryEvent::FilesChanged {
			directory,
			files: vec![file],
		});
	}

	engine.state_changed(state, directory);
}
