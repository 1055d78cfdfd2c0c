use std::{collections::HashMap, path::PathBuf};

use uuid::Uuid;

use crate::{
	error::ResourceError,
	fetch::FetchSlots,
	file::{FileId, FileRecord},
	monitor::{MonitorTable, ReadyCallbackRegistry},
	queue::WorkQueue,
	request::{AttributeKind, Request},
	resource::EntryInfo,
};

/// A unique identifier for an open directory using the [`uuid`](https://docs.rs/uuid) crate.
pub type DirectoryId = Uuid;

/// Everything the engine tracks for one open directory: its membership, its
/// self record, the registered interest (monitors and one-shot callbacks),
/// the three work-queue tiers and the per-kind fetch slots.
///
/// Files move through the tiers front to back: the high tier services basic
/// file info, the low tier the derived attributes (counts, filesystem info,
/// mounts, thumbnails), the extension tier the external providers. A file
/// with no remaining work in a tier is demoted to the next one.
pub(crate) struct Directory {
	pub(crate) id: DirectoryId,
	pub(crate) location: PathBuf,
	/// Engine-wide hidden-files default, the baseline for per-monitor
	/// policies.
	show_hidden: bool,

	/// The record standing for the directory itself. Wildcard monitors and
	/// callbacks never cover it; it has to be targeted explicitly.
	pub(crate) self_file: FileRecord,
	/// Every member record ever handed out, gone ones included so holders of
	/// an id can still snapshot them. Membership excludes gone records.
	files: HashMap<FileId, FileRecord>,
	names: HashMap<String, FileId>,

	pub(crate) monitors: MonitorTable,
	pub(crate) callbacks: ReadyCallbackRegistry,

	pub(crate) high_queue: WorkQueue,
	pub(crate) low_queue: WorkQueue,
	pub(crate) extension_queue: WorkQueue,
	pub(crate) slots: FetchSlots,

	/// The initial enumeration has finished, successfully or not. One-shot
	/// waiters on the file list are gated on this.
	pub(crate) loaded: bool,
	/// The done-loading notification went out; waiters additionally gate on
	/// this so they never observe a loaded-but-unannounced directory.
	pub(crate) loaded_notified: bool,
	pub(crate) load_error: Option<ResourceError>,

	/// Reentrancy guard plus dirty flag for the coordinator pass.
	pub(crate) in_service_loop: bool,
	pub(crate) state_changed: bool,
	/// A ready-callback dispatch tick is already queued.
	pub(crate) dispatch_scheduled: bool,
}

impl Directory {
	pub(crate) fn new(location: PathBuf, show_hidden: bool) -> Self {
		let name = location.file_name().map_or_else(
			|| location.display().to_string(),
			|name| name.to_string_lossy().into_owned(),
		);

		Self {
			id: Uuid::new_v4(),
			self_file: FileRecord::new(name, location.clone()),
			location,
			show_hidden,
			files: HashMap::new(),
			names: HashMap::new(),
			monitors: MonitorTable::default(),
			callbacks: ReadyCallbackRegistry::default(),
			high_queue: WorkQueue::default(),
			low_queue: WorkQueue::default(),
			extension_queue: WorkQueue::default(),
			slots: FetchSlots::default(),
			loaded: false,
			loaded_notified: false,
			load_error: None,
			in_service_loop: false,
			state_changed: false,
			dispatch_scheduled: false,
		}
	}

	pub(crate) fn is_self(&self, file: FileId) -> bool {
		self.self_file.id == file
	}

	pub(crate) fn record(&self, file: FileId) -> Option<&FileRecord> {
		if self.is_self(file) {
			Some(&self.self_file)
		} else {
			self.files.get(&file)
		}
	}

	pub(crate) fn record_mut(&mut self, file: FileId) -> Option<&mut FileRecord> {
		if self.is_self(file) {
			Some(&mut self.self_file)
		} else {
			self.files.get_mut(&file)
		}
	}

	pub(crate) fn by_name(&self, name: &str) -> Option<FileId> {
		self.names.get(name).copied()
	}

	/// Current membership: every non-gone member record, excluding the self
	/// record.
	pub(crate) fn members(&self) -> impl Iterator<Item = &FileRecord> {
		self.files.values().filter(|record| !record.is_gone)
	}

	pub(crate) fn member_ids(&self) -> impl Iterator<Item = FileId> + '_ {
		self.members().map(|record| record.id)
	}

	/// Admit a freshly enumerated entry into the membership. Existing records
	/// are confirmed and updated in place; unknown names become new records.
	/// Returns the record's id, whether it is new, and whether its visible
	/// info changed.
	pub(crate) fn admit_entry(&mut self, entry: EntryInfo) -> (FileId, bool, bool) {
		if let Some(id) = self.by_name(&entry.name) {
			if let Some(record) = self.files.get_mut(&id) {
				record.unconfirmed = false;
				let changed = record.update_info(entry);
				return (id, false, changed);
			}
		}

		let mut record = FileRecord::new(entry.name.clone(), self.location.join(&entry.name));
		record.update_info(entry);
		let id = record.id;
		self.names.insert(record.name.clone(), id);
		self.files.insert(id, record);

		(id, true, true)
	}

	/// Begin a (re)load: every current member is unconfirmed until a page
	/// confirms it.
	pub(crate) fn mark_all_unconfirmed(&mut self) {
		for record in self.files.values_mut() {
			if !record.is_gone {
				record.unconfirmed = true;
			}
		}
	}

	pub(crate) fn clear_unconfirmed(&mut self) {
		for record in self.files.values_mut() {
			record.unconfirmed = false;
		}
	}

	/// End of a successful load: members no page confirmed are gone. They are
	/// detached from the name index and the work queues but their records
	/// survive for id holders.
	pub(crate) fn sweep_unconfirmed(&mut self) -> Vec<FileId> {
		let mut gone = Vec::new();

		for record in self.files.values_mut() {
			if record.unconfirmed && !record.is_gone {
				record.unconfirmed = false;
				record.mark_gone();
				gone.push(record.id);
			}
		}
		for &id in &gone {
			self.detach(id);
		}

		gone
	}

	/// Detach a gone record from the name index, the queues and any interest
	/// registered directly against it.
	pub(crate) fn detach(&mut self, file: FileId) {
		if let Some(record) = self.files.get(&file) {
			if self.names.get(&record.name) == Some(&file) {
				self.names.remove(&record.name);
			}
		}
		self.remove_from_queues(file);
		self.monitors.remove_all_for(file);
	}

	pub(crate) fn remove_from_queues(&mut self, file: FileId) {
		self.high_queue.remove(file);
		self.low_queue.remove(file);
		self.extension_queue.remove(file);
	}

	/// Queue a file for attribute work; it enters at the high tier and is
	/// demoted as each tier runs dry for it.
	pub(crate) fn enqueue(&mut self, file: FileId) {
		self.high_queue.enqueue(file);
	}

	/// Queue the whole membership plus the self record.
	pub(crate) fn enqueue_all(&mut self) {
		let ids = self.member_ids().collect::<Vec<_>>();
		for id in ids {
			self.enqueue(id);
		}
		let self_id = self.self_file.id;
		self.enqueue(self_id);
	}

	/// Whether anyone (monitor or unsatisfied one-shot waiter) wants `kind`
	/// for this file. Wildcard registrations never cover the self record,
	/// and wildcard monitors only cover files their hidden-files policy
	/// shows.
	pub(crate) fn wants_kind_for(&self, record: &FileRecord, kind: AttributeKind) -> bool {
		let is_self = self.is_self(record.id);

		if self.callbacks.wants(kind) {
			let covers = |target| {
				self.callbacks
					.unsatisfied_for(target)
					.iter()
					.any(|cb| cb.request.wants(kind))
			};
			if covers(Some(record.id)) || (!is_self && covers(None)) {
				return true;
			}
		}

		if self.monitors.wants(kind) {
			let direct = self
				.monitors
				.for_target(Some(record.id))
				.iter()
				.any(|monitor| monitor.request.wants(kind));
			let wildcard = self.monitors.for_target(None).iter().any(|monitor| {
				monitor.request.wants(kind) && monitor.includes(record, is_self, self.show_hidden)
			});
			if direct || wildcard {
				return true;
			}
		}

		false
	}

	/// The needy check: the record lacks `kind` and someone wants it.
	pub(crate) fn is_needy(&self, record: &FileRecord, kind: AttributeKind) -> bool {
		if record.is_gone {
			return false;
		}

		let lacks = match kind {
			AttributeKind::FileList => false,
			AttributeKind::FileInfo => record.lacks_info(),
			AttributeKind::ShallowCount => record.should_get_shallow_count_now(),
			AttributeKind::DeepCount => record.lacks_deep_count(),
			AttributeKind::FilesystemInfo => record.lacks_filesystem_info(),
			AttributeKind::Mount => record.lacks_mount(self.is_self(record.id)),
			AttributeKind::Thumbnail => record.lacks_thumbnail(),
			AttributeKind::ExtensionInfo => record.lacks_extension_info(),
		};

		lacks && self.wants_kind_for(record, kind)
	}

	pub(crate) fn needs_high_priority_work(&self, record: &FileRecord) -> bool {
		self.is_needy(record, AttributeKind::FileInfo)
	}

	pub(crate) fn needs_low_priority_work(&self, record: &FileRecord) -> bool {
		[
			AttributeKind::ShallowCount,
			AttributeKind::DeepCount,
			AttributeKind::FilesystemInfo,
			AttributeKind::Mount,
			AttributeKind::Thumbnail,
		]
		.into_iter()
		.any(|kind| self.is_needy(record, kind))
	}

	pub(crate) fn needs_extension_work(&self, record: &FileRecord) -> bool {
		self.is_needy(record, AttributeKind::ExtensionInfo)
	}

	/// Whether anyone wants the file list itself kept loaded.
	pub(crate) fn wants_file_list(&self) -> bool {
		self.monitors.wants(AttributeKind::FileList) || self.callbacks.wants(AttributeKind::FileList)
	}

	/// Whether a waiter with this target and request has everything it asked
	/// for. A `None` target scans the whole membership, so a directory-level
	/// waiter on file info holds until every member's info is in.
	pub(crate) fn request_is_satisfied(&self, target: Option<FileId>, request: Request) -> bool {
		if request.wants(AttributeKind::FileList) && !(self.loaded && self.loaded_notified) {
			return false;
		}

		for kind in request.kinds() {
			if kind == AttributeKind::FileList {
				continue;
			}

			let satisfied = match target {
				Some(file) => self
					.record(file)
					.is_none_or(|record| record.satisfies(kind, self.is_self(file))),
				None => self.members().all(|record| record.satisfies(kind, false)),
			};
			if !satisfied {
				return false;
			}
		}

		true
	}
}
