use std::{
	path::{Path, PathBuf},
	time::SystemTime,
};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::ResourceError;

/// An opaque token identifying which physical or logical filesystem a
/// location resides on. The recursive counter compares these to avoid
/// descending across filesystem boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilesystemId(pub String);

impl<S: Into<String>> From<S> for FilesystemId {
	fn from(id: S) -> Self {
		Self(id.into())
	}
}

/// The broad type of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryKind {
	#[default]
	File,
	Directory,
	Symlink,
	/// Something that can be mounted (device node, network share link, ...).
	Mountable,
	Special,
}

/// Stat-level information for one directory entry, as reported by the
/// directory resource.
#[derive(Debug, Clone, Default)]
pub struct EntryInfo {
	pub name: String,
	pub kind: EntryKind,
	pub size: u64,
	pub inode: Option<u64>,
	pub filesystem_id: Option<FilesystemId>,
	pub is_hidden: bool,
	pub is_backup: bool,
	pub is_mount_point: bool,
	pub modified_at: Option<SystemTime>,
	/// Where this entry's thumbnail source lives, if one is known.
	pub thumbnail_path: Option<PathBuf>,
	/// For mountables, the location that actually gets mounted.
	pub activation_location: Option<PathBuf>,
}

impl EntryInfo {
	#[must_use]
	pub const fn is_directory(&self) -> bool {
		matches!(self.kind, EntryKind::Directory)
	}
}

/// Information about the filesystem backing a location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesystemInfo {
	pub read_only: bool,
	pub remote: bool,
	pub filesystem_type: Option<String>,
}

/// A resolved mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
	pub root: PathBuf,
	pub name: String,
	pub can_unmount: bool,
}

/// One page of a child enumeration. The stream yields pages until the
/// enumeration is exhausted; an `Err` item ends the enumeration with a
/// failure.
pub type EntryPage = Result<Vec<EntryInfo>, ResourceError>;

/// A cancellable page stream: dropping it abandons the enumeration.
pub type PageStream = BoxStream<'static, EntryPage>;

/// The engine's only window onto actual I/O.
///
/// Every operation is async, single-shot and cancellable by dropping the
/// returned future (or page stream); the engine never touches the filesystem
/// directly. Implementations are free to be backed by the local filesystem, a
/// remote protocol, or an in-memory tree for tests.
#[async_trait]
pub trait DirectoryResource: Send + Sync + 'static {
	/// Enumerate the immediate children of `location` in pages of at most
	/// `page_size` entries.
	async fn enumerate_children(
		&self,
		location: &Path,
		page_size: usize,
	) -> Result<PageStream, ResourceError>;

	/// Query stat-level information for a single location.
	async fn query_info(&self, location: &Path) -> Result<EntryInfo, ResourceError>;

	/// Query information about the filesystem backing `location`.
	async fn query_filesystem_info(&self, location: &Path)
		-> Result<FilesystemInfo, ResourceError>;

	/// Resolve the mount enclosing `location`.
	async fn find_enclosing_mount(&self, location: &Path) -> Result<MountInfo, ResourceError>;

	/// Load the raw contents of a file (used for thumbnail sources).
	async fn load_contents(&self, location: &Path) -> Result<Vec<u8>, ResourceError>;

	/// Synchronous lookup of an already-known mount whose root is exactly
	/// `root`. Used for files that are themselves mount points, where no
	/// round trip is needed.
	fn known_mount_for_root(&self, _root: &Path) -> Option<MountInfo> {
		None
	}
}
