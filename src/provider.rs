use std::collections::HashMap;

use async_trait::async_trait;

use crate::{error::ProviderError, file::FileSnapshot};

/// Attribute key/value pairs contributed by an external provider for one
/// file. Keys are provider-scoped strings ("vcs:status", "sync:state", ...).
#[derive(Debug, Clone, Default)]
pub struct ProviderUpdate {
	pub attributes: HashMap<String, String>,
}

impl ProviderUpdate {
	#[must_use]
	pub fn single(key: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			attributes: HashMap::from([(key.into(), value.into())]),
		}
	}
}

/// A pluggable source of external per-file metadata.
///
/// Each file with pending extension info holds a queue of providers, drained
/// strictly one at a time; the next provider is only consulted after the
/// current one completes. A provider that resolves immediately and one that
/// goes off and does real I/O are both just futures here.
#[async_trait]
pub trait InfoProvider: Send + Sync + 'static {
	/// A short stable name, used in logs and error reports.
	fn name(&self) -> &str;

	/// Produce this provider's metadata for `file`.
	async fn update_file_info(&self, file: &FileSnapshot) -> Result<ProviderUpdate, ProviderError>;
}
