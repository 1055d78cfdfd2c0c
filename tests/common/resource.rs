//! An in-memory directory tree implementing the resource trait, with
//! configurable latency and a high-water mark over concurrent operations.

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use sd_directory_engine::{
	DirectoryResource, EntryInfo, EntryKind, FilesystemInfo, MountInfo, PageStream, ResourceError,
};

#[derive(Debug, Clone)]
pub struct Node {
	pub kind: EntryKind,
	pub size: u64,
	pub inode: Option<u64>,
	pub fs_id: Option<String>,
	pub hidden: bool,
	pub backup: bool,
	/// Enumerating this node's children fails with permission denied.
	pub readable: bool,
	pub is_mount_point: bool,
	pub thumbnail_source: Option<PathBuf>,
	pub activation_location: Option<PathBuf>,
}

impl Default for Node {
	fn default() -> Self {
		Self {
			kind: EntryKind::File,
			size: 0,
			inode: None,
			fs_id: None,
			hidden: false,
			backup: false,
			readable: true,
			is_mount_point: false,
			thumbnail_source: None,
			activation_location: None,
		}
	}
}

#[derive(Default)]
struct Tree {
	nodes: HashMap<PathBuf, Node>,
	contents: HashMap<PathBuf, Vec<u8>>,
	mounts: Vec<MountInfo>,
	filesystems: HashMap<PathBuf, FilesystemInfo>,
}

/// Shared handle; clones see the same tree.
#[derive(Clone, Default)]
pub struct FakeResource {
	tree: Arc<Mutex<Tree>>,
	latency: Duration,
	running: Arc<AtomicUsize>,
	high_water: Arc<AtomicUsize>,
}

struct OpGuard {
	running: Arc<AtomicUsize>,
}

impl OpGuard {
	fn enter(resource: &FakeResource) -> Self {
		let now = resource.running.fetch_add(1, Ordering::SeqCst) + 1;
		resource.high_water.fetch_max(now, Ordering::SeqCst);
		Self {
			running: Arc::clone(&resource.running),
		}
	}
}

impl Drop for OpGuard {
	fn drop(&mut self) {
		self.running.fetch_sub(1, Ordering::SeqCst);
	}
}

impl FakeResource {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_latency(latency: Duration) -> Self {
		Self {
			latency,
			..Self::default()
		}
	}

	pub fn add_dir(&self, path: impl Into<PathBuf>) {
		self.add_node(path, |node| node.kind = EntryKind::Directory);
	}

	pub fn add_file(&self, path: impl Into<PathBuf>, size: u64) {
		self.add_node(path, |node| node.size = size);
	}

	pub fn add_node(&self, path: impl Into<PathBuf>, build: impl FnOnce(&mut Node)) {
		let mut node = Node::default();
		build(&mut node);
		self.tree.lock().nodes.insert(path.into(), node);
	}

	pub fn remove(&self, path: impl AsRef<Path>) {
		let mut tree = self.tree.lock();
		tree.nodes.remove(path.as_ref());
		tree.contents.remove(path.as_ref());
	}

	pub fn update_node(&self, path: impl AsRef<Path>, update: impl FnOnce(&mut Node)) {
		if let Some(node) = self.tree.lock().nodes.get_mut(path.as_ref()) {
			update(node);
		}
	}

	/// Store raw bytes and point the node's thumbnail source at them.
	pub fn set_contents(&self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
		let path = path.into();
		let mut tree = self.tree.lock();
		if let Some(node) = tree.nodes.get_mut(&path) {
			node.thumbnail_source = Some(path.clone());
		}
		tree.contents.insert(path, bytes);
	}

	pub fn add_mount(&self, mount: MountInfo) {
		self.tree.lock().mounts.push(mount);
	}

	pub fn set_filesystem_info(&self, path: impl Into<PathBuf>, info: FilesystemInfo) {
		self.tree.lock().filesystems.insert(path.into(), info);
	}

	/// Most concurrent operations ever observed.
	pub fn high_water(&self) -> usize {
		self.high_water.load(Ordering::SeqCst)
	}

	fn entry_for(path: &Path, node: &Node) -> EntryInfo {
		let name = path
			.file_name()
			.map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
		EntryInfo {
			name,
			kind: node.kind,
			size: node.size,
			inode: node.inode,
			filesystem_id: node.fs_id.clone().map(Into::into),
			is_hidden: node.hidden,
			is_backup: node.backup,
			is_mount_point: node.is_mount_point,
			modified_at: None,
			thumbnail_path: node.thumbnail_source.clone(),
			activation_location: node.activation_location.clone(),
		}
	}
}

#[async_trait]
impl DirectoryResource for FakeResource {
	async fn enumerate_children(
		&self,
		location: &Path,
		page_size: usize,
	) -> Result<PageStream, ResourceError> {
		let _guard = OpGuard::enter(self);
		tokio::time::sleep(self.latency).await;

		let pages = {
			let tree = self.tree.lock();
			let node = tree
				.nodes
				.get(location)
				.ok_or_else(|| ResourceError::NotFound(location.to_path_buf()))?;
			if node.kind != EntryKind::Directory {
				return Err(ResourceError::NotADirectory(location.to_path_buf()));
			}
			if !node.readable {
				return Err(ResourceError::PermissionDenied(location.to_path_buf()));
			}

			let mut children: Vec<EntryInfo> = tree
				.nodes
				.iter()
				.filter(|(path, _)| path.parent() == Some(location))
				.map(|(path, node)| Self::entry_for(path, node))
				.collect();
			children.sort_by(|a, b| a.name.cmp(&b.name));

			children
				.chunks(page_size.max(1))
				.map(|chunk| Ok(chunk.to_vec()))
				.collect::<Vec<_>>()
		};

		let latency = self.latency;
		Ok(stream::iter(pages)
			.then(move |page| async move {
				tokio::time::sleep(latency).await;
				page
			})
			.boxed())
	}

	async fn query_info(&self, location: &Path) -> Result<EntryInfo, ResourceError> {
		let _guard = OpGuard::enter(self);
		tokio::time::sleep(self.latency).await;

		let tree = self.tree.lock();
		tree.nodes
			.get(location)
			.map(|node| Self::entry_for(location, node))
			.ok_or_else(|| ResourceError::NotFound(location.to_path_buf()))
	}

	async fn query_filesystem_info(
		&self,
		location: &Path,
	) -> Result<FilesystemInfo, ResourceError> {
		let _guard = OpGuard::enter(self);
		tokio::time::sleep(self.latency).await;

		let tree = self.tree.lock();
		if !tree.nodes.contains_key(location) {
			return Err(ResourceError::NotFound(location.to_path_buf()));
		}

		Ok(tree.filesystems.get(location).cloned().unwrap_or_default())
	}

	async fn find_enclosing_mount(&self, location: &Path) -> Result<MountInfo, ResourceError> {
		let _guard = OpGuard::enter(self);
		tokio::time::sleep(self.latency).await;

		let tree = self.tree.lock();
		tree.mounts
			.iter()
			.filter(|mount| location.starts_with(&mount.root))
			.max_by_key(|mount| mount.root.as_os_str().len())
			.cloned()
			.ok_or_else(|| ResourceError::NoMount(location.to_path_buf()))
	}

	async fn load_contents(&self, location: &Path) -> Result<Vec<u8>, ResourceError> {
		let _guard = OpGuard::enter(self);
		tokio::time::sleep(self.latency).await;

		let tree = self.tree.lock();
		tree.contents
			.get(location)
			.cloned()
			.ok_or_else(|| ResourceError::NotFound(location.to_path_buf()))
	}

	fn known_mount_for_root(&self, root: &Path) -> Option<MountInfo> {
		let tree = self.tree.lock();
		tree.mounts.iter().find(|mount| mount.root == root).cloned()
	}
}
