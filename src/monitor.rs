use std::collections::HashMap;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::{
	directory::DirectoryId,
	file::{FileId, FileRecord, FileSnapshot},
	request::{AttributeKind, Request, RequestCounter},
};

/// Identifies the client owning a monitor registration.
pub type ClientId = Uuid;

/// Identifies one ready-callback registration, for cancellation and for
/// idempotent re-registration.
pub type CallbackId = Uuid;

/// How a monitor treats hidden and backup files when it applies to the whole
/// directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HiddenFilesPolicy {
	/// Follow the engine-wide `show_hidden_files` setting.
	#[default]
	EngineDefault,
	Include,
	Exclude,
}

impl HiddenFilesPolicy {
	pub(crate) const fn show_hidden(self, engine_default: bool) -> bool {
		match self {
			Self::EngineDefault => engine_default,
			Self::Include => true,
			Self::Exclude => false,
		}
	}
}

/// A standing registration of interest in a file's (or the whole
/// directory's) attributes, active until explicitly removed.
#[derive(Debug, Clone)]
pub(crate) struct Monitor {
	/// `None` targets every non-self-owned, policy-visible file.
	pub(crate) target: Option<FileId>,
	pub(crate) client: ClientId,
	pub(crate) request: Request,
	pub(crate) hidden_policy: HiddenFilesPolicy,
}

impl Monitor {
	/// Whether this monitor covers `file`, honoring its hidden-files policy
	/// for wildcard registrations.
	pub(crate) fn includes(
		&self,
		file: &FileRecord,
		is_self_owned: bool,
		engine_show_hidden: bool,
	) -> bool {
		match self.target {
			Some(target) => target == file.id,
			None => {
				!is_self_owned && file.should_show(self.hidden_policy.show_hidden(engine_show_hidden))
			}
		}
	}
}

/// Persistent per-directory registrations of long-lived interest, keyed by
/// target. At most one monitor per `(target, client)` pair; re-registering
/// replaces the old one.
#[derive(Debug, Default)]
pub(crate) struct MonitorTable {
	monitors: HashMap<Option<FileId>, Vec<Monitor>>,
	counters: RequestCounter,
}

impl MonitorTable {
	pub(crate) fn insert(&mut self, monitor: Monitor) {
		self.remove(monitor.target, monitor.client);

		self.counters.add(monitor.request);
		self.monitors.entry(monitor.target).or_default().push(monitor);
	}

	pub(crate) fn remove(&mut self, target: Option<FileId>, client: ClientId) -> Option<Monitor> {
		let list = self.monitors.get_mut(&target)?;
		let position = list.iter().position(|monitor| monitor.client == client)?;
		let monitor = list.remove(position);

		if list.is_empty() {
			self.monitors.remove(&target);
		}
		self.counters.remove(monitor.request);

		Some(monitor)
	}

	/// Drop every monitor aimed at a specific file (used when the file is
	/// torn down).
	pub(crate) fn remove_all_for(&mut self, target: FileId) -> usize {
		let Some(list) = self.monitors.remove(&Some(target)) else {
			return 0;
		};

		for monitor in &list {
			self.counters.remove(monitor.request);
		}

		list.len()
	}

	pub(crate) fn for_target(&self, target: Option<FileId>) -> &[Monitor] {
		self.monitors.get(&target).map_or(&[], Vec::as_slice)
	}

	pub(crate) fn wants(&self, kind: AttributeKind) -> bool {
		self.counters.count(kind) > 0
	}
}

/// What a fired ready callback delivers.
#[derive(Debug)]
pub struct ReadyNotice {
	pub directory: DirectoryId,
	pub target: Option<FileId>,
	pub request: Request,
	/// The directory's membership, populated when the request included the
	/// file list.
	pub files: Vec<FileSnapshot>,
}

/// A one-shot continuation waiting for a specific attribute set to become
/// available.
pub(crate) struct ReadyCallback {
	pub(crate) target: Option<FileId>,
	pub(crate) request: Request,
	pub(crate) id: CallbackId,
	pub(crate) sender: oneshot::Sender<ReadyNotice>,
}

impl std::fmt::Debug for ReadyCallback {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ReadyCallback")
			.field("target", &self.target)
			.field("request", &self.request)
			.field("id", &self.id)
			.finish_non_exhaustive()
	}
}

/// Per-directory one-shot completion waiters, split into an unsatisfied and a
/// ready set.
///
/// Entries move to the ready set during the coordinator's promotion pass but
/// are never invoked inline: dispatch happens on the next idle tick, which
/// swaps the whole ready table out first, so continuations re-registering
/// during dispatch can neither be skipped nor double-fired.
#[derive(Debug, Default)]
pub(crate) struct ReadyCallbackRegistry {
	unsatisfied: HashMap<Option<FileId>, Vec<ReadyCallback>>,
	ready: HashMap<Option<FileId>, Vec<ReadyCallback>>,
	counters: RequestCounter,
}

impl ReadyCallbackRegistry {
	/// Register a waiter. Re-registering a `(target, id)` pair that is still
	/// pending (unsatisfied or ready-but-unfired) is a no-op returning
	/// `false`; the new sender is dropped.
	pub(crate) fn insert(&mut self, callback: ReadyCallback) -> bool {
		let pending = |table: &HashMap<Option<FileId>, Vec<ReadyCallback>>| {
			table
				.get(&callback.target)
				.is_some_and(|list| list.iter().any(|cb| cb.id == callback.id))
		};

		if pending(&self.unsatisfied) || pending(&self.ready) {
			return false;
		}

		self.counters.add(callback.request);
		self.unsatisfied
			.entry(callback.target)
			.or_default()
			.push(callback);

		true
	}

	/// Remove a pending waiter from whichever set holds it.
	pub(crate) fn cancel(&mut self, target: Option<FileId>, id: CallbackId) -> bool {
		let mut removed = false;

		for table in [&mut self.unsatisfied, &mut self.ready] {
			if let Some(list) = table.get_mut(&target) {
				if let Some(position) = list.iter().position(|cb| cb.id == id) {
					let callback = list.remove(position);
					self.counters.remove(callback.request);
					removed = true;
				}
				if list.is_empty() {
					table.remove(&target);
				}
			}
		}

		removed
	}

	/// Move every unsatisfied waiter whose request now passes `satisfied`
	/// into the ready set. Returns whether anything moved.
	pub(crate) fn promote(
		&mut self,
		mut satisfied: impl FnMut(Option<FileId>, Request) -> bool,
	) -> bool {
		let mut found_any = false;

		self.unsatisfied.retain(|&target, list| {
			let mut index = 0;
			while index < list.len() {
				if satisfied(target, list[index].request) {
					let callback = list.remove(index);
					self.ready.entry(target).or_default().push(callback);
					found_any = true;
				} else {
					index += 1;
				}
			}

			!list.is_empty()
		});

		found_any
	}

	/// Swap the ready table out for an empty one, handing the previous
	/// contents to the dispatcher. Counter entries for the taken callbacks
	/// are released here.
	pub(crate) fn take_ready(&mut self) -> Vec<ReadyCallback> {
		let taken = std::mem::take(&mut self.ready)
			.into_values()
			.flatten()
			.collect::<Vec<_>>();

		for callback in &taken {
			self.counters.remove(callback.request);
		}

		taken
	}

	/// The `(target, request)` of every unsatisfied waiter, for the
	/// promotion pass.
	pub(crate) fn pending_targets_and_requests(
		&self,
	) -> impl Iterator<Item = (Option<FileId>, Request)> + '_ {
		self.unsatisfied
			.iter()
			.flat_map(|(&target, list)| list.iter().map(move |cb| (target, cb.request)))
	}

	pub(crate) fn unsatisfied_for(&self, target: Option<FileId>) -> &[ReadyCallback] {
		self.unsatisfied.get(&target).map_or(&[], Vec::as_slice)
	}

	pub(crate) fn wants(&self, kind: AttributeKind) -> bool {
		self.counters.count(kind) > 0
	}

	pub(crate) fn has_ready(&self) -> bool {
		!self.ready.is_empty()
	}
}
