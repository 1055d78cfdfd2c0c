use std::{
	collections::{HashMap, VecDeque},
	path::PathBuf,
	sync::Arc,
};

use image::DynamicImage;
use uuid::Uuid;

use crate::{
	error::{ProviderError, ResourceError},
	provider::InfoProvider,
	request::AttributeKind,
	resource::{EntryInfo, EntryKind, FilesystemInfo, MountInfo},
};

/// A unique identifier for a file record using the [`uuid`](https://docs.rs/uuid) crate.
pub type FileId = Uuid;

/// The three states every attribute category can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrState {
	/// Never fetched (or invalidated since the last fetch).
	Unknown,
	/// Fetched, value valid.
	Known,
	/// Fetched, the operation errored; the failure is retrievable and the
	/// category will not be retried until explicitly invalidated.
	KnownFailed,
}

/// One attribute cell: a value, an up-to-date flag and an optional stored
/// failure. A stale value survives invalidation so observers can keep showing
/// it while a refetch is pending.
#[derive(Debug, Clone)]
pub(crate) struct Attr<T> {
	pub(crate) value: Option<T>,
	pub(crate) error: Option<ResourceError>,
	pub(crate) up_to_date: bool,
}

impl<T> Default for Attr<T> {
	fn default() -> Self {
		Self {
			value: None,
			error: None,
			up_to_date: false,
		}
	}
}

impl<T> Attr<T> {
	pub(crate) fn set_known(&mut self, value: T) {
		self.value = Some(value);
		self.error = None;
		self.up_to_date = true;
	}

	pub(crate) fn set_failed(&mut self, error: ResourceError) {
		self.value = None;
		self.error = Some(error);
		self.up_to_date = true;
	}

	pub(crate) fn invalidate(&mut self) {
		self.up_to_date = false;
		self.error = None;
	}

	pub(crate) fn state(&self) -> AttrState {
		if !self.up_to_date {
			AttrState::Unknown
		} else if self.error.is_some() {
			AttrState::KnownFailed
		} else {
			AttrState::Known
		}
	}
}

/// A read-only view of one attribute category, handed out in snapshots.
#[derive(Debug, Clone)]
pub enum Attribute<T> {
	Unknown,
	Known(T),
	Failed(ResourceError),
}

impl<T> Attribute<T> {
	#[must_use]
	pub const fn is_known(&self) -> bool {
		matches!(self, Self::Known(_))
	}

	pub fn known(&self) -> Option<&T> {
		match self {
			Self::Known(value) => Some(value),
			_ => None,
		}
	}
}

impl<T: Clone> Attr<T> {
	fn snapshot(&self) -> Attribute<T> {
		match self.state() {
			AttrState::Unknown => Attribute::Unknown,
			AttrState::KnownFailed => Attribute::Failed(
				self.error.clone().unwrap_or_else(|| {
					ResourceError::Other("failure state without stored error".into())
				}),
			),
			AttrState::Known => self
				.value
				.clone()
				.map_or(Attribute::Unknown, Attribute::Known),
		}
	}
}

/// Progress of the recursive subtree count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeepCountStatus {
	#[default]
	NotStarted,
	InProgress,
	Done,
}

/// Accumulated recursive counts over a subtree. Readable while the walk is
/// still in progress, so observers can show partial totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeepCounts {
	pub status: DeepCountStatus,
	pub directories: u64,
	pub files: u64,
	/// Subdirectories that could not be enumerated; counted instead of
	/// aborting the walk.
	pub unreadable: u64,
	pub total_bytes: u64,
}

impl DeepCounts {
	pub(crate) fn reset_in_progress(&mut self) {
		*self = Self {
			status: DeepCountStatus::InProgress,
			..Self::default()
		};
	}
}

/// One filesystem entry (or a directory's own "self" record) plus everything
/// the engine has learned about it so far.
pub(crate) struct FileRecord {
	pub(crate) id: FileId,
	pub(crate) name: String,
	pub(crate) location: PathBuf,

	pub(crate) info: Attr<EntryInfo>,
	/// Records transition to gone when a fetch reports them not-found, or
	/// when a finished list load no longer contains them. Gone records are
	/// detached from the directory's membership but stay valid for holders
	/// of the id.
	pub(crate) is_gone: bool,
	/// Set once the record has been reported through a files-added event.
	pub(crate) is_added: bool,
	/// While a list load is running, records not yet seen in any page are
	/// unconfirmed; leftovers at the end of the load are gone.
	pub(crate) unconfirmed: bool,
	/// The directory this record stands for is currently running its own
	/// file-list load, which will deliver the shallow count for free.
	pub(crate) loading_directory: bool,

	pub(crate) shallow_count: Attr<u64>,
	pub(crate) deep_counts: DeepCounts,
	pub(crate) filesystem_info: Attr<FilesystemInfo>,
	/// `Known(None)` means "resolved: no mount".
	pub(crate) mount: Attr<Option<MountInfo>>,

	pub(crate) thumbnail_path: Option<PathBuf>,
	pub(crate) thumbnail: Option<Arc<DynamicImage>>,
	pub(crate) thumbnail_up_to_date: bool,

	pub(crate) pending_providers: VecDeque<Arc<dyn InfoProvider>>,
	pub(crate) extension_attributes: HashMap<String, String>,
	pub(crate) extension_errors: Vec<ProviderError>,
	/// True once the provider queue has been drained at least once since the
	/// last invalidation.
	pub(crate) extension_info_done: bool,
}

impl FileRecord {
	pub(crate) fn new(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
		Self {
			id: Uuid::new_v4(),
			name: name.into(),
			location: location.into(),
			info: Attr::default(),
			is_gone: false,
			is_added: false,
			unconfirmed: false,
			loading_directory: false,
			shallow_count: Attr::default(),
			deep_counts: DeepCounts::default(),
			filesystem_info: Attr::default(),
			mount: Attr::default(),
			thumbnail_path: None,
			thumbnail: None,
			thumbnail_up_to_date: false,
			pending_providers: VecDeque::new(),
			extension_attributes: HashMap::new(),
			extension_errors: Vec::new(),
			extension_info_done: true,
		}
	}

	pub(crate) fn entry_kind(&self) -> EntryKind {
		self.info
			.value
			.as_ref()
			.map_or(EntryKind::File, |info| info.kind)
	}

	pub(crate) fn is_directory(&self) -> bool {
		matches!(self.entry_kind(), EntryKind::Directory)
	}

	/// Apply freshly fetched stat info, reporting whether anything visible
	/// changed. Also refreshes the thumbnail source path; a changed path
	/// re-arms the thumbnail fetch.
	pub(crate) fn update_info(&mut self, new: EntryInfo) -> bool {
		if self.thumbnail_path != new.thumbnail_path {
			self.thumbnail_path.clone_from(&new.thumbnail_path);
			self.thumbnail_up_to_date = false;
		}

		let changed = match &self.info.value {
			Some(old) => {
				old.size != new.size
					|| old.kind != new.kind
					|| old.modified_at != new.modified_at
					|| old.is_hidden != new.is_hidden
					|| old.is_mount_point != new.is_mount_point
			}
			None => true,
		};

		self.info.set_known(new);

		changed
	}

	pub(crate) fn mark_gone(&mut self) {
		self.is_gone = true;
		self.info.up_to_date = true;
	}

	/// Visibility under a hidden-files policy; files with unknown info count
	/// as visible.
	pub(crate) fn should_show(&self, show_hidden: bool) -> bool {
		if show_hidden {
			return true;
		}

		self.info
			.value
			.as_ref()
			.is_none_or(|info| !info.is_hidden && !info.is_backup)
	}

	pub(crate) fn lacks_info(&self) -> bool {
		!self.info.up_to_date && !self.is_gone
	}

	pub(crate) fn lacks_shallow_count(&self) -> bool {
		!self.shallow_count.up_to_date
	}

	/// The shallow count is skipped while the directory is listing itself;
	/// the load delivers the count when it finishes.
	pub(crate) fn should_get_shallow_count_now(&self) -> bool {
		self.lacks_shallow_count() && !self.loading_directory
	}

	pub(crate) fn lacks_deep_count(&self) -> bool {
		self.deep_counts.status != DeepCountStatus::Done
	}

	pub(crate) fn lacks_filesystem_info(&self) -> bool {
		!self.filesystem_info.up_to_date
	}

	pub(crate) fn lacks_thumbnail(&self) -> bool {
		self.thumbnail_path.is_some() && !self.thumbnail_up_to_date
	}

	pub(crate) fn lacks_mount(&self, is_self_owned: bool) -> bool {
		if self.mount.up_to_date {
			return false;
		}

		let Some(info) = self.info.value.as_ref() else {
			return false;
		};

		info.is_mount_point
			|| matches!(info.kind, EntryKind::Mountable)
			|| (info.is_directory() && is_self_owned)
	}

	pub(crate) fn lacks_extension_info(&self) -> bool {
		!self.pending_providers.is_empty()
	}

	/// (Re)queue the external providers for this record. With no providers
	/// configured the record counts as done immediately.
	pub(crate) fn arm_providers(&mut self, providers: &[Arc<dyn InfoProvider>]) {
		self.pending_providers = providers.iter().map(Arc::clone).collect();
		self.extension_attributes.clear();
		self.extension_errors.clear();
		self.extension_info_done = providers.is_empty();
	}

	/// Whether a waiter asking for `kind` on this record has nothing left to
	/// wait for. Count categories are trivially satisfied on non-directories;
	/// gone records satisfy everything.
	pub(crate) fn satisfies(&self, kind: AttributeKind, is_self_owned: bool) -> bool {
		if self.is_gone {
			return true;
		}

		match kind {
			AttributeKind::FileList => true,
			AttributeKind::FileInfo => !self.lacks_info(),
			AttributeKind::ShallowCount => !self.is_directory() || !self.lacks_shallow_count(),
			AttributeKind::DeepCount => !self.is_directory() || !self.lacks_deep_count(),
			AttributeKind::FilesystemInfo => !self.lacks_filesystem_info(),
			AttributeKind::Mount => !self.lacks_mount(is_self_owned),
			AttributeKind::Thumbnail => !self.lacks_thumbnail(),
			AttributeKind::ExtensionInfo => !self.lacks_extension_info(),
		}
	}

	pub(crate) fn snapshot(&self) -> FileSnapshot {
		FileSnapshot {
			id: self.id,
			name: self.name.clone(),
			location: self.location.clone(),
			is_gone: self.is_gone,
			info: self.info.snapshot(),
			shallow_count: self.shallow_count.snapshot(),
			deep_counts: self.deep_counts,
			filesystem_info: self.filesystem_info.snapshot(),
			mount: self.mount.snapshot(),
			thumbnail: self.thumbnail.clone(),
			thumbnail_state: if self.thumbnail_up_to_date {
				if self.thumbnail.is_some() {
					AttrState::Known
				} else {
					AttrState::KnownFailed
				}
			} else {
				AttrState::Unknown
			},
			extension_attributes: self.extension_attributes.clone(),
			extension_errors: self.extension_errors.clone(),
			extension_info_done: self.extension_info_done,
		}
	}
}

/// A cloneable, read-only view of one file record at a point in time.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
	pub id: FileId,
	pub name: String,
	pub location: PathBuf,
	pub is_gone: bool,
	pub info: Attribute<EntryInfo>,
	pub shallow_count: Attribute<u64>,
	pub deep_counts: DeepCounts,
	pub filesystem_info: Attribute<FilesystemInfo>,
	pub mount: Attribute<Option<MountInfo>>,
	pub thumbnail: Option<Arc<DynamicImage>>,
	pub thumbnail_state: AttrState,
	pub extension_attributes: HashMap<String, String>,
	pub extension_errors: Vec<ProviderError>,
	pub extension_info_done: bool,
}
