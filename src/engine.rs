use std::{collections::HashMap, path::PathBuf, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{
	config::EngineConfig,
	directory::{Directory, DirectoryId},
	error::EngineError,
	event::{DirectoryEvent, EventBus},
	fetch,
	file::{FileId, FileSnapshot},
	limiter::JobLimiter,
	monitor::{CallbackId, ClientId, HiddenFilesPolicy, Monitor, ReadyCallback, ReadyNotice},
	provider::InfoProvider,
	request::{AttributeKind, Request},
	resource::DirectoryResource,
};

/// Everything mutable, behind one lock.
///
/// The lock is never held across an await point: every fetch does its I/O in
/// a spawned task and re-locks only to apply the result, so each state
/// mutation runs to completion before the next one starts.
pub(crate) struct State {
	pub(crate) directories: HashMap<DirectoryId, Directory>,
	pub(crate) limiter: JobLimiter,
}

pub(crate) struct EngineInner {
	pub(crate) state: Mutex<State>,
	pub(crate) resource: Arc<dyn DirectoryResource>,
	pub(crate) providers: Vec<Arc<dyn InfoProvider>>,
	pub(crate) config: EngineConfig,
	pub(crate) events: EventBus,
}

/// The attribute-resolution engine.
///
/// Handles are cheap clones of one shared engine. Callers open directories,
/// register interest through monitors or one-shot ready callbacks, and watch
/// results arrive through [`DirectoryEvent`]s and snapshots; the engine
/// schedules all the I/O behind the scenes and never does any unless someone
/// asked for the result.
#[derive(Clone)]
pub struct Engine {
	inner: Arc<EngineInner>,
}

impl Engine {
	pub fn new(resource: Arc<dyn DirectoryResource>) -> Self {
		Self::with_config(resource, EngineConfig::default())
	}

	pub fn with_config(resource: Arc<dyn DirectoryResource>, config: EngineConfig) -> Self {
		Self::with_providers(resource, config, Vec::new())
	}

	pub fn with_providers(
		resource: Arc<dyn DirectoryResource>,
		config: EngineConfig,
		providers: Vec<Arc<dyn InfoProvider>>,
	) -> Self {
		Self {
			inner: Arc::new(EngineInner {
				state: Mutex::new(State {
					directories: HashMap::new(),
					limiter: JobLimiter::new(config.max_jobs),
				}),
				resource,
				providers,
				events: EventBus::new(config.event_capacity),
				config,
			}),
		}
	}

	pub fn subscribe(&self) -> broadcast::Receiver<DirectoryEvent> {
		self.inner.events.subscribe()
	}

	/// Open (or return the already-open handle for) a directory. Opening is
	/// free: no I/O happens until someone registers interest.
	pub fn open_directory(&self, location: impl Into<PathBuf>) -> DirectoryId {
		let location = location.into();
		let mut state = self.inner.state.lock();

		if let Some(directory) = state
			.directories
			.values()
			.find(|directory| directory.location == location)
		{
			return directory.id;
		}

		let mut directory = Directory::new(location, self.inner.config.show_hidden_files);
		directory.self_file.arm_providers(&self.inner.providers);
		let id = directory.id;
		debug!(directory = %id, location = %directory.location.display(), "opening directory");
		state.directories.insert(id, directory);

		id
	}

	/// Tear a directory down: every in-flight fetch is aborted, every pending
	/// waiter dropped (their receivers resolve to an error), all records
	/// forgotten.
	pub fn close_directory(&self, directory: DirectoryId) -> Result<(), EngineError> {
		let mut state = self.inner.state.lock();
		let mut removed = state
			.directories
			.remove(&directory)
			.ok_or(EngineError::UnknownDirectory(directory))?;

		debug!(directory = %directory, "closing directory");
		for kind in crate::request::ALL_KINDS {
			if removed.slots.is_active(kind) {
				state.limiter.end(directory, fetch::job_name(kind));
			}
		}
		removed.slots.cancel_all();
		state.limiter.forget(directory);

		self.inner.wake_up(&mut state);

		Ok(())
	}

	/// Register a standing monitor. Re-registering for the same
	/// `(target, client)` replaces the previous request. If the monitor asks
	/// for the file list and files are already known, they are announced
	/// right away.
	pub fn register_monitor(
		&self,
		directory: DirectoryId,
		client: ClientId,
		target: Option<FileId>,
		request: Request,
		hidden_policy: HiddenFilesPolicy,
	) -> Result<(), EngineError> {
		let mut state = self.inner.state.lock();
		let dir = state
			.directories
			.get_mut(&directory)
			.ok_or(EngineError::UnknownDirectory(directory))?;

		trace!(directory = %directory, ?target, ?request, "registering monitor");
		dir.monitors.insert(Monitor {
			target,
			client,
			request,
			hidden_policy,
		});

		match target {
			Some(file) => dir.enqueue(file),
			None => dir.enqueue_all(),
		}

		if request.wants(AttributeKind::FileList) {
			let existing = dir.member_ids().collect::<Vec<_>>();
			if !existing.is_empty() {
				self.inner.events.emit(DirectoryEvent::FilesAdded {
					directory,
					files: existing,
				});
			}
		}

		self.inner.state_changed(&mut state, directory);

		Ok(())
	}

	/// Remove a standing monitor; fetches nobody wants anymore get cancelled.
	pub fn unregister_monitor(
		&self,
		directory: DirectoryId,
		client: ClientId,
		target: Option<FileId>,
	) -> Result<(), EngineError> {
		let mut state = self.inner.state.lock();
		let dir = state
			.directories
			.get_mut(&directory)
			.ok_or(EngineError::UnknownDirectory(directory))?;

		dir.monitors.remove(target, client);
		self.inner.state_changed(&mut state, directory);

		Ok(())
	}

	/// Ask to be told, exactly once, when `request` is satisfied for
	/// `target` (`None` meaning the directory as a whole). The notice arrives
	/// on the returned receiver; the callback id can cancel it. If the
	/// request is already satisfied, the notice still arrives asynchronously,
	/// never inline.
	pub fn call_when_ready(
		&self,
		directory: DirectoryId,
		target: Option<FileId>,
		request: Request,
	) -> Result<(CallbackId, oneshot::Receiver<ReadyNotice>), EngineError> {
		let id = Uuid::new_v4();
		let receiver = self
			.register_ready_callback(directory, target, request, id)?
			.ok_or(EngineError::UnknownDirectory(directory))?;

		Ok((id, receiver))
	}

	/// Like [`Self::call_when_ready`] with a caller-chosen id. Registering an
	/// id that is already pending for the same target is a no-op returning
	/// `Ok(None)`.
	pub fn register_ready_callback(
		&self,
		directory: DirectoryId,
		target: Option<FileId>,
		request: Request,
		id: CallbackId,
	) -> Result<Option<oneshot::Receiver<ReadyNotice>>, EngineError> {
		let mut state = self.inner.state.lock();
		let dir = state
			.directories
			.get_mut(&directory)
			.ok_or(EngineError::UnknownDirectory(directory))?;

		let (sender, receiver) = oneshot::channel();
		if !dir.callbacks.insert(ReadyCallback {
			target,
			request,
			id,
			sender,
		}) {
			trace!(directory = %directory, callback = %id, "duplicate ready callback ignored");
			return Ok(None);
		}

		match target {
			Some(file) => dir.enqueue(file),
			None => dir.enqueue_all(),
		}
		self.inner.state_changed(&mut state, directory);

		Ok(Some(receiver))
	}

	/// Withdraw a pending ready callback. Returns whether it was still
	/// pending; its receiver resolves to an error.
	pub fn cancel_callback(
		&self,
		directory: DirectoryId,
		target: Option<FileId>,
		id: CallbackId,
	) -> Result<bool, EngineError> {
		let mut state = self.inner.state.lock();
		let dir = state
			.directories
			.get_mut(&directory)
			.ok_or(EngineError::UnknownDirectory(directory))?;

		let removed = dir.callbacks.cancel(target, id);
		if removed {
			self.inner.state_changed(&mut state, directory);
		}

		Ok(removed)
	}

	/// Synchronously answer whether `request` is already satisfied, without
	/// scheduling anything.
	pub fn check_if_ready(
		&self,
		directory: DirectoryId,
		target: Option<FileId>,
		request: Request,
	) -> Result<bool, EngineError> {
		let state = self.inner.state.lock();
		let dir = state
			.directories
			.get(&directory)
			.ok_or(EngineError::UnknownDirectory(directory))?;

		Ok(dir.request_is_satisfied(target, request))
	}

	/// Flip the named attribute categories of one file back to unknown and
	/// cancel any fetch currently producing them. They are re-fetched only if
	/// somebody still wants them.
	pub fn invalidate_attributes(
		&self,
		directory: DirectoryId,
		file: FileId,
		request: Request,
	) -> Result<(), EngineError> {
		let mut state = self.inner.state.lock();
		let State {
			directories,
			limiter,
		} = &mut *state;
		let dir = directories
			.get_mut(&directory)
			.ok_or(EngineError::UnknownDirectory(directory))?;

		for kind in request.kinds() {
			if dir
				.slots
				.get(kind)
				.is_some_and(|active| active.file == Some(file))
			{
				dir.slots.cancel(kind);
				limiter.end(directory, fetch::job_name(kind));
			}
		}

		{
			let providers = &self.inner.providers;
			let record = dir.record_mut(file).ok_or(EngineError::UnknownFile(file))?;
			for kind in request.kinds() {
				match kind {
					AttributeKind::FileList => {}
					AttributeKind::FileInfo => record.info.invalidate(),
					AttributeKind::ShallowCount => record.shallow_count.invalidate(),
					AttributeKind::DeepCount => {
						record.deep_counts = Default::default();
					}
					AttributeKind::FilesystemInfo => record.filesystem_info.invalidate(),
					AttributeKind::Mount => record.mount.invalidate(),
					AttributeKind::Thumbnail => record.thumbnail_up_to_date = false,
					AttributeKind::ExtensionInfo => record.arm_providers(providers),
				}
			}
		}

		dir.enqueue(file);
		self.inner.state_changed(&mut state, directory);

		Ok(())
	}

	/// Throw away the file list and reload it from scratch. Files that
	/// disappeared come back gone; surviving records get fresh info and keep
	/// their derived attributes.
	pub fn force_reload(&self, directory: DirectoryId) -> Result<(), EngineError> {
		let mut state = self.inner.state.lock();
		let State {
			directories,
			limiter,
		} = &mut *state;
		let dir = directories
			.get_mut(&directory)
			.ok_or(EngineError::UnknownDirectory(directory))?;

		debug!(directory = %directory, "force reload");
		if dir.slots.cancel(AttributeKind::FileList).is_some() {
			limiter.end(directory, fetch::job_name(AttributeKind::FileList));
			dir.clear_unconfirmed();
			dir.self_file.loading_directory = false;
		}
		dir.loaded = false;
		dir.loaded_notified = false;
		dir.load_error = None;
		dir.self_file.shallow_count.invalidate();
		dir.self_file.info.invalidate();

		// every surviving record gets fresh info along with the new list
		let members = dir.member_ids().collect::<Vec<_>>();
		for file in members {
			if let Some(record) = dir.record_mut(file) {
				record.info.invalidate();
			}
			dir.enqueue(file);
		}

		self.inner.state_changed(&mut state, directory);

		Ok(())
	}

	/// Snapshot of the directory's current (non-gone) membership.
	pub fn files(&self, directory: DirectoryId) -> Result<Vec<FileSnapshot>, EngineError> {
		let state = self.inner.state.lock();
		let dir = state
			.directories
			.get(&directory)
			.ok_or(EngineError::UnknownDirectory(directory))?;

		Ok(dir.members().map(|record| record.snapshot()).collect())
	}

	pub fn file(&self, directory: DirectoryId, file: FileId) -> Result<FileSnapshot, EngineError> {
		let state = self.inner.state.lock();
		let dir = state
			.directories
			.get(&directory)
			.ok_or(EngineError::UnknownDirectory(directory))?;

		dir.record(file)
			.map(|record| record.snapshot())
			.ok_or(EngineError::UnknownFile(file))
	}

	pub fn file_by_name(
		&self,
		directory: DirectoryId,
		name: &str,
	) -> Result<Option<FileSnapshot>, EngineError> {
		let state = self.inner.state.lock();
		let dir = state
			.directories
			.get(&directory)
			.ok_or(EngineError::UnknownDirectory(directory))?;

		Ok(dir
			.by_name(name)
			.and_then(|id| dir.record(id))
			.map(|record| record.snapshot()))
	}

	/// The record standing for the directory itself.
	pub fn self_file(&self, directory: DirectoryId) -> Result<FileSnapshot, EngineError> {
		let state = self.inner.state.lock();
		let dir = state
			.directories
			.get(&directory)
			.ok_or(EngineError::UnknownDirectory(directory))?;

		Ok(dir.self_file.snapshot())
	}

	pub fn self_file_id(&self, directory: DirectoryId) -> Result<FileId, EngineError> {
		let state = self.inner.state.lock();
		state
			.directories
			.get(&directory)
			.map(|dir| dir.self_file.id)
			.ok_or(EngineError::UnknownDirectory(directory))
	}

	/// Abort everything. Equivalent to closing every open directory.
	pub fn shutdown(&self) {
		let ids = {
			let state = self.inner.state.lock();
			state.directories.keys().copied().collect::<Vec<_>>()
		};
		for id in ids {
			let _ = self.close_directory(id);
		}
	}
}

impl EngineInner {
	/// The coordinator: run start/stop decisions and callback promotion until
	/// the state stops changing. Reentrant calls just mark the state dirty;
	/// the outermost call loops until it is clean again, then lets parked
	/// directories retry.
	pub(crate) fn state_changed(self: &Arc<Self>, state: &mut State, directory: DirectoryId) {
		{
			let Some(dir) = state.directories.get_mut(&directory) else {
				return;
			};
			if dir.in_service_loop {
				dir.state_changed = true;
				return;
			}
			dir.in_service_loop = true;
		}

		loop {
			if let Some(dir) = state.directories.get_mut(&directory) {
				dir.state_changed = false;
			} else {
				return;
			}

			self.start_or_stop_io(state, directory);

			if self.call_ready_callbacks(state, directory) {
				if let Some(dir) = state.directories.get_mut(&directory) {
					dir.state_changed = true;
				}
			}

			match state.directories.get_mut(&directory) {
				Some(dir) if dir.state_changed => {}
				Some(dir) => {
					dir.in_service_loop = false;
					break;
				}
				None => return,
			}
		}

		// A fetch may have ended above; give parked directories a chance.
		self.wake_up(state);
	}

	/// One start/stop pass: reconcile the file-list load, cancel fetches
	/// nobody wants anymore, then drain the queue tiers front to back,
	/// stopping as soon as any fetch is (or stays) in flight.
	fn start_or_stop_io(self: &Arc<Self>, state: &mut State, directory: DirectoryId) {
		fetch::file_list::start_or_stop(self, state, directory);

		fetch::shallow_count::stop(state, directory);
		fetch::deep_count::stop(state, directory);
		fetch::file_info::stop(state, directory);
		fetch::thumbnail::stop(state, directory);
		fetch::mount::stop(state, directory);
		fetch::filesystem_info::stop(state, directory);
		fetch::extension::stop(state, directory);

		let mut doing_io = false;

		loop {
			let Some(dir) = state.directories.get_mut(&directory) else {
				return;
			};
			let Some(file) = dir.high_queue.head() else {
				break;
			};

			fetch::file_info::start(self, state, directory, file, &mut doing_io);
			if doing_io {
				return;
			}

			let Some(dir) = state.directories.get_mut(&directory) else {
				return;
			};
			dir.high_queue.remove(file);
			dir.low_queue.enqueue(file);
		}

		loop {
			let Some(dir) = state.directories.get_mut(&directory) else {
				return;
			};
			let Some(file) = dir.low_queue.head() else {
				break;
			};

			fetch::shallow_count::start(self, state, directory, file, &mut doing_io);
			fetch::deep_count::start(self, state, directory, file, &mut doing_io);
			fetch::mount::start(self, state, directory, file, &mut doing_io);
			fetch::filesystem_info::start(self, state, directory, file, &mut doing_io);
			fetch::thumbnail::start(self, state, directory, file, &mut doing_io);
			if doing_io {
				return;
			}

			let Some(dir) = state.directories.get_mut(&directory) else {
				return;
			};
			dir.low_queue.remove(file);
			dir.extension_queue.enqueue(file);
		}

		loop {
			let Some(dir) = state.directories.get_mut(&directory) else {
				return;
			};
			let Some(file) = dir.extension_queue.head() else {
				break;
			};

			fetch::extension::start(self, state, directory, file, &mut doing_io);
			if doing_io {
				return;
			}

			let Some(dir) = state.directories.get_mut(&directory) else {
				return;
			};
			dir.extension_queue.remove(file);
		}
	}

	/// Move newly satisfied waiters to the ready set and make sure a dispatch
	/// tick is queued. Waiters are never invoked from here; returns whether
	/// any became ready.
	fn call_ready_callbacks(self: &Arc<Self>, state: &mut State, directory: DirectoryId) -> bool {
		let Some(dir) = state.directories.get_mut(&directory) else {
			return false;
		};

		let mut found_any = false;
		{
			// split borrow: promotion needs the registry mutably and the
			// satisfaction check reads the rest of the directory
			let snapshot_check: Vec<(Option<FileId>, Request)> = dir
				.callbacks
				.pending_targets_and_requests()
				.filter(|&(target, request)| dir.request_is_satisfied(target, request))
				.collect();
			if !snapshot_check.is_empty() {
				found_any = dir.callbacks.promote(|target, request| {
					snapshot_check.contains(&(target, request))
				});
			}
		}

		if (found_any || dir.callbacks.has_ready()) && !dir.dispatch_scheduled {
			dir.dispatch_scheduled = true;
			let engine = Arc::clone(self);
			tokio::spawn(async move {
				tokio::task::yield_now().await;
				engine.dispatch_ready_callbacks(directory);
			});
		}

		found_any
	}

	/// The deferred dispatch tick: swap the ready table out, build the
	/// notices under the lock, send them after dropping it.
	fn dispatch_ready_callbacks(self: &Arc<Self>, directory: DirectoryId) {
		let mut to_send = Vec::new();

		{
			let mut state = self.state.lock();
			let Some(dir) = state.directories.get_mut(&directory) else {
				return;
			};
			dir.dispatch_scheduled = false;

			for callback in dir.callbacks.take_ready() {
				let files = if callback.request.wants(AttributeKind::FileList) {
					dir.members().map(|record| record.snapshot()).collect()
				} else {
					Vec::new()
				};
				to_send.push((
					callback.sender,
					ReadyNotice {
						directory,
						target: callback.target,
						request: callback.request,
						files,
					},
				));
			}

			if !to_send.is_empty() {
				// interest shrank, some fetches may no longer be wanted
				self.state_changed(&mut state, directory);
			}
		}

		for (sender, notice) in to_send {
			let _ = sender.send(notice);
		}
	}

	/// Retry every directory parked on the job cap while slots are free.
	/// Guarded against reentry from the nested `state_changed` calls.
	pub(crate) fn wake_up(self: &Arc<Self>, state: &mut State) {
		if !state.limiter.begin_wake_up() {
			return;
		}

		while let Some(directory) = state.limiter.next_waiting() {
			if state.directories.contains_key(&directory) {
				self.state_changed(state, directory);
			}
		}

		state.limiter.end_wake_up();
	}
}
