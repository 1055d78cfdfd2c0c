//!
//! # Directory Engine
//!
//! An asynchronous attribute-resolution engine for directories of files. Open
//! a directory, say which attributes you care about, and the engine fetches
//! exactly those, in priority order, through a pluggable I/O backend.
//!
//! Interest comes in two shapes:
//! - Monitors: standing registrations that keep attributes loaded and
//!   deliver ongoing change notifications over a broadcast bus;
//! - Ready callbacks: one-shot waiters resolved exactly once, as soon as the
//!   requested attributes are all available.
//!
//! The engine never does I/O nobody asked for, caps the number of in-flight
//! operations across all directories, runs at most one fetch per attribute
//! kind per directory, and cancels work as soon as the last interested party
//! leaves.
//!
//! ## Basic example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sd_directory_engine::{AttributeKind, Engine, FsResource, Request};
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = Engine::new(Arc::new(FsResource::default()));
//!
//!     let home = engine.open_directory("/home/me");
//!     let (_, ready) = engine
//!         .call_when_ready(
//!             home,
//!             None,
//!             Request::of([AttributeKind::FileList, AttributeKind::FileInfo]),
//!         )
//!         .unwrap();
//!
//!     let notice = ready.await.unwrap();
//!     for file in &notice.files {
//!         println!("{}", file.name);
//!     }
//! }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod config;
mod directory;
mod engine;
mod error;
mod event;
mod fetch;
mod file;
mod fs;
mod limiter;
mod monitor;
mod provider;
mod queue;
mod request;
mod resource;

pub use config::EngineConfig;
pub use directory::DirectoryId;
pub use engine::Engine;
pub use error::{EngineError, ProviderError, ResourceError};
pub use event::DirectoryEvent;
pub use file::{Attribute, AttrState, DeepCountStatus, DeepCounts, FileId, FileSnapshot};
pub use fs::FsResource;
pub use monitor::{CallbackId, ClientId, HiddenFilesPolicy, ReadyNotice};
pub use provider::{InfoProvider, ProviderUpdate};
pub use request::{AttributeKind, Request};
pub use resource::{
	DirectoryResource, EntryInfo, EntryKind, EntryPage, FilesystemId, FilesystemInfo, MountInfo,
	PageStream,
};
