//! Thumbnail loading and decoding. The decoder runs with dimension limits so
//! a hostile or corrupt image cannot balloon memory, and oversized results
//! are downscaled right after decode so the full-size pixels never stick
//! around. A failed load or decode settles the category with no image, it is
//! not retried.

use std::{io::Cursor, path::Path, sync::Arc};

use image::{DynamicImage, ImageReader, Limits};
use tracing::trace;
use uuid::Uuid;

use crate::{
	directory::DirectoryId,
	engine::{EngineInner, State},
	error::ResourceError,
	event::DirectoryEvent,
	file::FileId,
	request::AttributeKind,
};

use super::{job_name, ActiveFetch, OpId};

const KIND: AttributeKind = AttributeKind::Thumbnail;

/// Sources larger than this are rejected by the decoder outright.
const MAX_SOURCE_DIMENSION: u32 = 16_384;

fn decode(path: &Path, bytes: Vec<u8>, max: u32) -> Result<DynamicImage, ResourceError> {
	let mut reader = ImageReader::new(Cursor::new(bytes))
		.with_guessed_format()
		.map_err(|error| ResourceError::io(path, error))?;

	let mut limits = Limits::default();
	limits.max_image_width = Some(MAX_SOURCE_DIMENSION);
	limits.max_image_height = Some(MAX_SOURCE_DIMENSION);
	reader.limits(limits);

	let decoded = reader.decode().map_err(|error| {
		ResourceError::Other(format!(
			"decoding thumbnail {} failed: {error}",
			path.display()
		))
	})?;

	Ok(if decoded.width() > max || decoded.height() > max {
		decoded.thumbnail(max, max)
	} else {
		decoded
	})
}

pub(crate) fn start(
	engine: &Arc<EngineInner>,
	state: &mut State,
	directory: DirectoryId,
	file: FileId,
	doing_io: &mut bool,
) {
	let State {
		directories,
		limiter,
	} = state;
	let Some(dir) = directories.get_mut(&directory) else {
		return;
	};

	if dir.slots.is_active(KIND) {
		*doing_io = true;
		return;
	}

	let Some(record) = dir.record(file) else {
		return;
	};
	if !dir.is_needy(record, KIND) {
		return;
	}
	let Some(path) = record.thumbnail_path.clone() else {
		return;
	};

	*doing_io = true;
	if !limiter.try_start(directory, job_name(KIND)) {
		return;
	}

	let op = Uuid::new_v4();
	let engine = Arc::clone(engine);
	let handle = tokio::spawn(async move {
		let max = engine.config.max_thumbnail_dimension;
		let result = engine
			.resource
			.load_contents(&path)
			.await
			.and_then(|bytes| decode(&path, bytes, max));

		let mut state = engine.state.lock();
		finish(&engine, &mut state, directory, op, file, result);
	});
	dir.slots.set(KIND, ActiveFetch::new(op, Some(file), handle));
}

pub(crate) fn stop(state: &mut State, directory: DirectoryId) {
	let State {
		directories,
		limiter,
	} = state;
	let Some(dir) = directories.get_mut(&directory) else {
		return;
	};
	let Some(active) = dir.slots.get(KIND) else {
		return;
	};

	let still_wanted = active
		.file
		.and_then(|file| dir.record(file))
		.is_some_and(|record| dir.is_needy(record, KIND));
	if !still_wanted {
		dir.slots.cancel(KIND);
		limiter.end(directory, job_name(KIND));
	}
}

fn finish(
	engine: &Arc<EngineInner>,
	state: &mut State,
	directory: DirectoryId,
	op: OpId,
	file: FileId,
	result: Result<DynamicImage, ResourceError>,
) {
	{
		let Some(dir) = state.directories.get_mut(&directory) else {
			return;
		};
		if !dir.slots.finish(KIND, op) {
			trace!(directory = %directory, "stale thumbnail completion discarded");
			return;
		}
	}
	state.limiter.end(directory, job_name(KIND));

	let Some(dir) = state.directories.get_mut(&directory) else {
		return;
	};
	if let Some(record) = dir.record_mut(file) {
		match result {
			Ok(decoded) => record.thumbnail = Some(Arc::new(decoded)),
			Err(error) => {
				trace!(directory = %directory, %error, "thumbnail failed");
				record.thumbnail = None;
			}
		}
		record.thumbnail_up_to_date = true;
		engine.events.emit(DirectoryEvent::FilesChanged {
			directory,
			files: vec![file],
		});
	}

	engine.state_changed(state, directory);
}
