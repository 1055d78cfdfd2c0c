//! External info providers, drained strictly one at a time per file. Each
//! completed provider merges its attributes (or records its failure) and the
//! next one starts on the following coordinator pass.

use std::sync::Arc;

use tracing::trace;
use uuid::Uuid;

use crate::{
	directory::DirectoryId,
	engine::{EngineInner, State},
	error::ProviderError,
	event::DirectoryEvent,
	file::FileId,
	provider::ProviderUpdate,
	request::AttributeKind,
};

use super::{job_name, ActiveFetch, OpId};

const KIND: AttributeKind = AttributeKind::ExtensionInfo;

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
	let Some(provider) = record.pending_providers.front().map(Arc::clone) else {
		return;
	};

	*doing_io = true;
	if !limiter.try_start(directory, job_name(KIND)) {
		return;
	}

	let op = Uuid::new_v4();
	let snapshot = record.snapshot();
	let engine = Arc::clone(engine);
	let handle = tokio::spawn(async move {
		let result = provider.update_file_info(&snapshot).await;
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
	result: Result<ProviderUpdate, ProviderError>,
) {
	{
		let Some(dir) = state.directories.get_mut(&directory) else {
			return;
		};
		if !dir.slots.finish(KIND, op) {
			trace!(directory = %directory, "stale extension info completion discarded");
			return;
		}
	}
	state.limiter.end(directory, job_name(KIND));

	let Some(dir) = state.directories.get_mut(&directory) else {
		return;
	};
	if let Some(record) = dir.record_mut(file) {
		record.pending_providers.pop_front();
		match result {
			Ok(update) => record.extension_attributes.extend(update.attributes),
			Err(error) => record.extension_errors.push(error),
		}

		if record.pending_providers.is_empty() {
			record.extension_info_done = true;
			engine
				.events
				.emit(DirectoryEvent::ProvidersDone { directory, file });
		}
		engine.events.emit(DirectoryEvent::FilesChanged {
			directory,
			files: vec![file],
		});
	}

	engine.state_changed(state, directory);
}
