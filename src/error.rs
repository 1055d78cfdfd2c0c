use std::{io, path::PathBuf, sync::Arc};

use thiserror::Error;

use crate::directory::DirectoryId;

/// Failure of a single directory-resource operation.
///
/// The engine never retries these on its own; a failed category stays
/// known-failed, with the error stored on the file record, until the caller
/// explicitly invalidates it.
#[derive(Debug, Error, Clone)]
pub enum ResourceError {
	#[error("not found: {}", .0.display())]
	NotFound(PathBuf),
	#[error("permission denied: {}", .0.display())]
	PermissionDenied(PathBuf),
	#[error("not a directory: {}", .0.display())]
	NotADirectory(PathBuf),
	#[error("no enclosing mount for {}", .0.display())]
	NoMount(PathBuf),
	#[error("i/o error on {}: {error}", .path.display())]
	Io {
		path: PathBuf,
		// io::Error is not Clone and stored failures are handed out in
		// snapshots, so keep it behind an Arc.
		error: Arc<io::Error>,
	},
	#[error("{0}")]
	Other(String),
}

impl ResourceError {
	pub fn io(path: impl Into<PathBuf>, error: io::Error) -> Self {
		Self::Io {
			path: path.into(),
			error: Arc::new(error),
		}
	}

	#[must_use]
	pub const fn is_not_found(&self) -> bool {
		matches!(self, Self::NotFound(_))
	}
}

/// Failure of an external info provider run against one file.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
	#[error("provider {provider} failed: {message}")]
	Failed { provider: String, message: String },
	#[error("provider {0} does not apply to this file")]
	NotApplicable(String),
}

/// API misuse surfaced to callers of the engine.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("unknown directory <id='{0}'>")]
	UnknownDirectory(DirectoryId),
	#[error("unknown file <id='{0}'>")]
	UnknownFile(uuid::Uuid),
}
