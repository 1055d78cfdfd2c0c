//! A [`DirectoryResource`] backed by the local filesystem through
//! [`tokio::fs`]. Hidden and backup files follow the dotfile and `~` suffix
//! conventions; on unix the inode and device numbers feed hard-link
//! deduplication and the filesystem-boundary check.

use std::{
	io,
	path::{Path, PathBuf},
};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs;

use crate::{
	error::ResourceError,
	resource::{
		DirectoryResource, EntryInfo, EntryKind, FilesystemInfo, MountInfo, PageStream,
	},
};

const THUMBNAIL_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// The local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsResource;

fn map_io(location: &Path, error: io::Error) -> ResourceError {
	match error.kind() {
		io::ErrorKind::NotFound => ResourceError::NotFound(location.to_path_buf()),
		io::ErrorKind::PermissionDenied => ResourceError::PermissionDenied(location.to_path_buf()),
		_ => ResourceError::io(location, error),
	}
}

fn entry_info(name: String, location: &Path, metadata: &std::fs::Metadata) -> EntryInfo {
	let file_type = metadata.file_type();
	let kind = if file_type.is_dir() {
		EntryKind::Directory
	} else if file_type.is_symlink() {
		EntryKind::Symlink
	} else if file_type.is_file() {
		EntryKind::File
	} else {
		EntryKind::Special
	};

	let thumbnail_path = (kind == EntryKind::File
		&& location
			.extension()
			.and_then(|extension| extension.to_str())
			.is_some_and(|extension| {
				THUMBNAIL_EXTENSIONS
					.iter()
					.any(|known| known.eq_ignore_ascii_case(extension))
			}))
	.then(|| location.to_path_buf());

	#[cfg(unix)]
	let (inode, filesystem_id) = {
		use std::os::unix::fs::MetadataExt;
		(
			Some(metadata.ino()),
			Some(metadata.dev().to_string().into()),
		)
	};
	#[cfg(not(unix))]
	let (inode, filesystem_id) = (None, None);

	EntryInfo {
		is_hidden: name.starts_with('.'),
		is_backup: name.ends_with('~'),
		name,
		kind,
		size: metadata.len(),
		inode,
		filesystem_id,
		is_mount_point: false,
		modified_at: metadata.modified().ok(),
		thumbnail_path,
		activation_location: None,
	}
}

#[async_trait]
impl DirectoryResource for FsResource {
	async fn enumerate_children(
		&self,
		location: &Path,
		page_size: usize,
	) -> Result<PageStream, ResourceError> {
		let location = location.to_path_buf();
		let read_dir = fs::read_dir(&location)
			.await
			.map_err(|error| map_io(&location, error))?;

		let stream = futures::stream::unfold(Some(read_dir), move |state| {
			let location = location.clone();
			async move {
				let mut read_dir = state?;
				let mut page = Vec::with_capacity(page_size);

				loop {
					match read_dir.next_entry().await {
						Ok(Some(entry)) => {
							let name = entry.file_name().to_string_lossy().into_owned();
							let path = entry.path();
							if let Ok(metadata) = fs::symlink_metadata(&path).await {
								page.push(entry_info(name, &path, &metadata));
							}
							if page.len() >= page_size {
								return Some((Ok(page), Some(read_dir)));
							}
						}
						Ok(None) => {
							return (!page.is_empty()).then_some((Ok(page), None));
						}
						Err(error) => {
							return Some((Err(map_io(&location, error)), None));
						}
					}
				}
			}
		});

		Ok(stream.boxed())
	}

	async fn query_info(&self, location: &Path) -> Result<EntryInfo, ResourceError> {
		let metadata = fs::symlink_metadata(location)
			.await
			.map_err(|error| map_io(location, error))?;
		let name = location.file_name().map_or_else(
			|| location.display().to_string(),
			|name| name.to_string_lossy().into_owned(),
		);

		Ok(entry_info(name, location, &metadata))
	}

	async fn query_filesystem_info(
		&self,
		location: &Path,
	) -> Result<FilesystemInfo, ResourceError> {
		let metadata = fs::metadata(location)
			.await
			.map_err(|error| map_io(location, error))?;

		Ok(FilesystemInfo {
			read_only: metadata.permissions().readonly(),
			remote: false,
			filesystem_type: None,
		})
	}

	async fn find_enclosing_mount(&self, location: &Path) -> Result<MountInfo, ResourceError> {
		// the plain filesystem backend has no mount table
		Err(ResourceError::NoMount(location.to_path_buf()))
	}

	async fn load_contents(&self, location: &Path) -> Result<Vec<u8>, ResourceError> {
		fs::read(location)
			.await
			.map_err(|error| map_io(location, error))
	}
}
