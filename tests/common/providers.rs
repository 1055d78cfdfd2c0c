//! Scripted info providers for exercising the extension queue.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;

use sd_directory_engine::{FileSnapshot, InfoProvider, ProviderError, ProviderUpdate};

/// Records the order providers ran per file, shared across providers.
pub type RunLog = Arc<Mutex<Vec<String>>>;

pub struct StaticProvider {
	pub name: String,
	pub key: String,
	pub value: String,
	pub delay: Duration,
	pub log: RunLog,
}

#[async_trait]
impl InfoProvider for StaticProvider {
	fn name(&self) -> &str {
		&self.name
	}

	async fn update_file_info(&self, file: &FileSnapshot) -> Result<ProviderUpdate, ProviderError> {
		tokio::time::sleep(self.delay).await;
		self.log.lock().push(format!("{}:{}", self.name, file.name));
		Ok(ProviderUpdate::single(self.key.clone(), self.value.clone()))
	}
}

pub struct FailingProvider {
	pub name: String,
	pub log: RunLog,
}

#[async_trait]
impl InfoProvider for FailingProvider {
	fn name(&self) -> &str {
		&self.name
	}

	async fn update_file_info(&self, file: &FileSnapshot) -> Result<ProviderUpdate, ProviderError> {
		self.log.lock().push(format!("{}:{}", self.name, file.name));
		Err(ProviderError::Failed {
			provider: self.name.clone(),
			message: "scripted failure".into(),
		})
	}
}
