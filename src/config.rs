use serde::{Deserialize, Serialize};

/// Tunables for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
	/// Keep in-flight fetch operations across all directories down to this
	/// number.
	pub max_jobs: usize,
	/// How many directory entries each enumeration page may carry.
	pub page_size: usize,
	/// Whether hidden and backup files count for wildcard monitors and the
	/// shallow child count. Individual monitors can override this.
	pub show_hidden_files: bool,
	/// Thumbnails are downscaled during decode when either dimension exceeds
	/// this.
	pub max_thumbnail_dimension: u32,
	/// Capacity of the broadcast event bus.
	pub event_capacity: usize,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			max_jobs: 10,
			page_size: 100,
			show_hidden_files: false,
			max_thumbnail_dimension: 512,
			event_capacity: 1024,
		}
	}
}
