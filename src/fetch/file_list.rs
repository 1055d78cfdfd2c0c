//! The initial enumeration of a directory's children, loaded in pages.
//!
//! A (re)load marks every current member unconfirmed; each page confirms the
//! members it mentions, and whatever is still unconfirmed when the load
//! finishes is gone. A failed load clears the unconfirmed marks instead, so
//! a transient error never makes files vanish.

use std::{path::PathBuf, sync::Arc};

use futures::StreamExt;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{
	directory::DirectoryId,
	engine::{EngineInner, State},
	error::ResourceError,
	event::DirectoryEvent,
	request::AttributeKind,
	resource::EntryInfo,
};

use super::{job_name, ActiveFetch, OpId};

const KIND: AttributeKind = AttributeKind::FileList;

/// Reconcile the list load with current interest: start it when somebody
/// waits on the file list and it is not loaded, cancel it when nobody cares
/// anymore.
pub(crate) fn start_or_stop(engine: &Arc<EngineInner>, state: &mut State, directory: DirectoryId) {
	let State {
		directories,
		limiter,
	} = state;
	let Some(dir) = directories.get_mut(&directory) else {
		return;
	};

	let wanted = dir.wants_file_list();

	if dir.slots.is_active(KIND) {
		if !wanted {
			debug!(directory = %directory, "cancelling file list load");
			dir.slots.cancel(KIND);
			limiter.end(directory, job_name(KIND));
			dir.clear_unconfirmed();
			dir.self_file.loading_directory = false;
		}
		return;
	}

	if !wanted || dir.loaded {
		return;
	}

	if !limiter.try_start(directory, job_name(KIND)) {
		return;
	}

	trace!(directory = %directory, location = %dir.location.display(), "starting file list load");
	dir.mark_all_unconfirmed();
	dir.self_file.loading_directory = true;

	let op = Uuid::new_v4();
	let location = dir.location.clone();
	let task_engine = Arc::clone(engine);
	let handle = tokio::spawn(async move {
		load(task_engine, directory, op, location).await;
	});
	dir.slots.set(KIND, ActiveFetch::new(op, None, handle));
}

async fn load(engine: Arc<EngineInner>, directory: DirectoryId, op: OpId, location: PathBuf) {
	let mut pages = match engine
		.resource
		.enumerate_children(&location, engine.config.page_size)
		.await
	{
		Ok(pages) => pages,
		Err(error) => {
			let mut state = engine.state.lock();
			fail(&engine, &mut state, directory, op, error);
			return;
		}
	};

	loop {
		match pages.next().await {
			Some(Ok(entries)) => {
				if !apply_page(&engine, directory, op, entries) {
					return;
				}
			}
			Some(Err(error)) => {
				let mut state = engine.state.lock();
				fail(&engine, &mut state, directory, op, error);
				return;
			}
			None => {
				let mut state = engine.state.lock();
				complete(&engine, &mut state, directory, op);
				return;
			}
		}
	}
}

/// Fold one page into the membership. Returns `false` when the load lost its
/// slot and should stop.
fn apply_page(
	engine: &Arc<EngineInner>,
	directory: DirectoryId,
	op: OpId,
	entries: Vec<EntryInfo>,
) -> bool {
	let mut state = engine.state.lock();
	let Some(dir) = state.directories.get_mut(&directory) else {
		return false;
	};
	if !dir.slots.still_owns(KIND, op) {
		return false;
	}

	let mut added = Vec::new();
	let mut changed = Vec::new();
	for entry in entries {
		let (file, is_new, did_change) = dir.admit_entry(entry);
		if is_new {
			if let Some(record) = dir.record_mut(file) {
				record.is_added = true;
				record.arm_providers(&engine.providers);
			}
			added.push(file);
		} else if did_change {
			changed.push(file);
		}
		dir.enqueue(file);
	}

	if !added.is_empty() {
		engine.events.emit(DirectoryEvent::FilesAdded {
			directory,
			files: added,
		});
	}
	if !changed.is_empty() {
		engine.events.emit(DirectoryEvent::FilesChanged {
			directory,
			files: changed,
		});
	}

	engine.state_changed(&mut state, directory);

	true
}

fn complete(engine: &Arc<EngineInner>, state: &mut State, directory: DirectoryId, op: OpId) {
	{
		let Some(dir) = state.directories.get_mut(&directory) else {
			return;
		};
		if !dir.slots.finish(KIND, op) {
			trace!(directory = %directory, "stale file list completion discarded");
			return;
		}
	}
	state.limiter.end(directory, job_name(KIND));

	let Some(dir) = state.directories.get_mut(&directory) else {
		return;
	};

	let gone = dir.sweep_unconfirmed();
	dir.loaded = true;
	dir.loaded_notified = true;
	dir.load_error = None;
	dir.self_file.loading_directory = false;

	// the load just told us exactly how many children there are
	let visible = dir
		.members()
		.filter(|record| record.should_show(engine.config.show_hidden_files))
		.count() as u64;
	dir.self_file.shallow_count.set_known(visible);

	debug!(directory = %directory, files = dir.member_ids().count(), "file list loaded");
	if !gone.is_empty() {
		engine.events.emit(DirectoryEvent::FilesChanged {
			directory,
			files: gone,
		});
	}
	engine.events.emit(DirectoryEvent::DoneLoading { directory });

	engine.state_changed(state, directory);
}

fn fail(
	engine: &Arc<EngineInner>,
	state: &mut State,
	directory: DirectoryId,
	op: OpId,
	error: ResourceError,
) {
	{
		let Some(dir) = state.directories.get_mut(&directory) else {
			return;
		};
		if !dir.slots.finish(KIND, op) {
			return;
		}
	}
	state.limiter.end(directory, job_name(KIND));

	let Some(dir) = state.directories.get_mut(&directory) else {
		return;
	};

	debug!(directory = %directory, %error, "file list load failed");
	dir.clear_unconfirmed();
	dir.loaded = true;
	dir.loaded_notified = true;
	dir.load_error = Some(error.clone());
	dir.self_file.loading_directory = false;

	engine
		.events
		.emit(DirectoryEvent::LoadError { directory, error });
	engine.events.emit(DirectoryEvent::DoneLoading { directory });

	engine.state_changed(state, directory);
}
