use std::{io::Cursor, sync::Arc, time::Duration};

use futures_concurrency::future::Join;
use pretty_assertions::assert_eq;
use tokio::{sync::oneshot, time::timeout};
use tracing_test::traced_test;
use uuid::Uuid;

use sd_directory_engine::{
	AttrState, AttributeKind, DeepCountStatus, DeepCounts, DirectoryEvent, Engine, EngineConfig,
	EntryKind, FilesystemInfo, HiddenFilesPolicy, MountInfo, ReadyNotice, Request, ResourceError,
};

mod common;

use common::{
	providers::{FailingProvider, StaticProvider},
	resource::FakeResource,
	wait_for_event, EVENT_TIMEOUT,
};

async fn notice(receiver: oneshot::Receiver<ReadyNotice>) -> ReadyNotice {
	timeout(EVENT_TIMEOUT, receiver)
		.await
		.expect("timed out waiting for ready notice")
		.expect("ready callback dropped without firing")
}

#[tokio::test]
#[traced_test]
async fn file_list_waiter_gets_the_membership() {
	let resource = FakeResource::new();
	resource.add_dir("/watched");
	resource.add_file("/watched/a.txt", 1);
	resource.add_file("/watched/b.txt", 2);
	resource.add_file("/watched/c.txt", 3);

	let engine = Engine::new(Arc::new(resource));
	let dir = engine.open_directory("/watched");

	let request = Request::of([AttributeKind::FileList]);
	assert!(!engine.check_if_ready(dir, None, request).unwrap());

	let (_, receiver) = engine.call_when_ready(dir, None, request).unwrap();
	let notice = notice(receiver).await;

	let mut names = notice
		.files
		.iter()
		.map(|file| file.name.clone())
		.collect::<Vec<_>>();
	names.sort();
	assert_eq!(names, ["a.txt", "b.txt", "c.txt"]);

	assert!(engine.check_if_ready(dir, None, request).unwrap());
}

#[tokio::test]
#[traced_test]
async fn monitors_get_files_added_and_done_loading() {
	let resource = FakeResource::new();
	resource.add_dir("/watched");
	resource.add_file("/watched/a.txt", 1);

	let engine = Engine::new(Arc::new(resource));
	let mut events = engine.subscribe();
	let dir = engine.open_directory("/watched");

	engine
		.register_monitor(
			dir,
			Uuid::new_v4(),
			None,
			Request::of([AttributeKind::FileList, AttributeKind::FileInfo]),
			HiddenFilesPolicy::default(),
		)
		.unwrap();

	wait_for_event(&mut events, |event| {
		matches!(event, DirectoryEvent::FilesAdded { directory, .. } if *directory == dir)
	})
	.await;
	wait_for_event(&mut events, |event| {
		matches!(event, DirectoryEvent::DoneLoading { directory } if *directory == dir)
	})
	.await;

	let files = engine.files(dir).unwrap();
	assert_eq!(files.len(), 1);
	assert!(files[0].info.is_known());
}

#[tokio::test]
#[traced_test]
async fn job_cap_is_never_exceeded() {
	let resource = FakeResource::with_latency(Duration::from_millis(10));
	for i in 0..12 {
		let root = format!("/dirs/d{i}");
		resource.add_dir(&root);
		for j in 0..3 {
			resource.add_file(format!("{root}/f{j}"), 1);
		}
	}

	let engine = Engine::with_config(
		Arc::new(resource.clone()),
		EngineConfig {
			max_jobs: 4,
			..EngineConfig::default()
		},
	);

	let receivers = (0..12)
		.map(|i| {
			let dir = engine.open_directory(format!("/dirs/d{i}"));
			let (_, receiver) = engine
				.call_when_ready(dir, None, Request::of([AttributeKind::FileList]))
				.unwrap();
			async move { notice(receiver).await }
		})
		.collect::<Vec<_>>();

	let notices = receivers.join().await;
	assert_eq!(notices.len(), 12);
	for n in &notices {
		assert_eq!(n.files.len(), 3);
	}

	assert!(
		resource.high_water() <= 4,
		"observed {} concurrent operations with a cap of 4",
		resource.high_water()
	);
}

#[tokio::test]
#[traced_test]
async fn ready_callbacks_fire_exactly_once_and_cancel_cleanly() {
	let resource = FakeResource::new();
	resource.add_dir("/watched");
	resource.add_file("/watched/a.txt", 1);

	let engine = Engine::new(Arc::new(resource));
	let dir = engine.open_directory("/watched");
	let request = Request::of([AttributeKind::FileList]);

	// duplicate explicit id is a no-op
	let id = Uuid::new_v4();
	let first = engine
		.register_ready_callback(dir, None, request, id)
		.unwrap();
	assert!(first.is_some());
	let second = engine
		.register_ready_callback(dir, None, request, id)
		.unwrap();
	assert!(second.is_none());

	let fired = notice(first.unwrap()).await;
	assert_eq!(fired.target, None);

	// a cancelled waiter never fires; its receiver just errors out
	let (cancel_id, receiver) = engine
		.call_when_ready(dir, None, Request::of([AttributeKind::DeepCount]))
		.unwrap();
	assert!(engine.cancel_callback(dir, None, cancel_id).unwrap());
	assert!(receiver.await.is_err());
}

#[tokio::test]
#[traced_test]
async fn file_info_waiter_is_not_held_up_by_deep_count() {
	let resource = FakeResource::with_latency(Duration::from_millis(20));
	resource.add_dir("/watched");
	for i in 0..8 {
		let sub = format!("/watched/sub{i}");
		resource.add_dir(&sub);
		resource.add_file(format!("{sub}/f"), 1);
	}

	let engine = Engine::new(Arc::new(resource));
	let dir = engine.open_directory("/watched");
	let self_id = engine.self_file_id(dir).unwrap();

	let (_, info_rx) = engine
		.call_when_ready(dir, Some(self_id), Request::of([AttributeKind::FileInfo]))
		.unwrap();
	let (_, deep_rx) = engine
		.call_when_ready(
			dir,
			Some(self_id),
			Request::of([AttributeKind::FileInfo, AttributeKind::DeepCount]),
		)
		.unwrap();

	// info is one stat; the deep walk crosses nine directories
	notice(info_rx).await;
	let snapshot = engine.file(dir, self_id).unwrap();
	assert!(snapshot.info.is_known());

	notice(deep_rx).await;
	let snapshot = engine.file(dir, self_id).unwrap();
	assert_eq!(snapshot.deep_counts.status, DeepCountStatus::Done);
	assert_eq!(snapshot.deep_counts.files, 8);
}

#[tokio::test]
#[traced_test]
async fn deep_count_totals_hard_link_sizes_once_and_stays_on_the_filesystem() {
	let resource = FakeResource::new();
	resource.add_node("/deep", |node| {
		node.kind = EntryKind::Directory;
		node.fs_id = Some("root".into());
	});
	resource.add_node("/deep/a", |node| {
		node.size = 10;
		node.inode = Some(1);
		node.fs_id = Some("root".into());
	});
	// hard link to a: a file entry of its own, but its size counts once
	resource.add_node("/deep/b", |node| {
		node.size = 10;
		node.inode = Some(1);
		node.fs_id = Some("root".into());
	});
	resource.add_node("/deep/sub", |node| {
		node.kind = EntryKind::Directory;
		node.fs_id = Some("root".into());
	});
	resource.add_node("/deep/sub/c", |node| {
		node.size = 5;
		node.inode = Some(2);
		node.fs_id = Some("root".into());
	});
	// a different filesystem: counted, never descended into
	resource.add_node("/deep/other", |node| {
		node.kind = EntryKind::Directory;
		node.fs_id = Some("elsewhere".into());
	});
	resource.add_file("/deep/other/x", 100);
	// unreadable: counted both as a directory and as unreadable
	resource.add_node("/deep/locked", |node| {
		node.kind = EntryKind::Directory;
		node.fs_id = Some("root".into());
		node.readable = false;
	});

	let engine = Engine::new(Arc::new(resource));
	let dir = engine.open_directory("/deep");
	let self_id = engine.self_file_id(dir).unwrap();

	let (_, receiver) = engine
		.call_when_ready(
			dir,
			Some(self_id),
			Request::of([AttributeKind::FileInfo, AttributeKind::DeepCount]),
		)
		.unwrap();
	notice(receiver).await;

	let snapshot = engine.file(dir, self_id).unwrap();
	assert_eq!(
		snapshot.deep_counts,
		DeepCounts {
			status: DeepCountStatus::Done,
			directories: 3,
			files: 3,
			unreadable: 1,
			total_bytes: 15,
		}
	);
}

#[tokio::test]
#[traced_test]
async fn shallow_count_honors_hidden_files_and_reports_failures() {
	let resource = FakeResource::new();
	resource.add_dir("/count");
	resource.add_file("/count/a", 1);
	resource.add_file("/count/b", 1);
	resource.add_dir("/count/s");
	resource.add_node("/count/.h", |node| node.hidden = true);
	resource.add_node("/count/x~", |node| node.backup = true);
	resource.add_node("/locked", |node| {
		node.kind = EntryKind::Directory;
		node.readable = false;
	});

	let engine = Engine::new(Arc::new(resource));

	let dir = engine.open_directory("/count");
	let self_id = engine.self_file_id(dir).unwrap();
	let (_, receiver) = engine
		.call_when_ready(
			dir,
			Some(self_id),
			Request::of([AttributeKind::FileInfo, AttributeKind::ShallowCount]),
		)
		.unwrap();
	notice(receiver).await;
	let snapshot = engine.file(dir, self_id).unwrap();
	assert_eq!(snapshot.shallow_count.known(), Some(&3));

	let locked = engine.open_directory("/locked");
	let locked_self = engine.self_file_id(locked).unwrap();
	let (_, receiver) = engine
		.call_when_ready(
			locked,
			Some(locked_self),
			Request::of([AttributeKind::FileInfo, AttributeKind::ShallowCount]),
		)
		.unwrap();
	notice(receiver).await;
	let snapshot = engine.file(locked, locked_self).unwrap();
	assert!(matches!(
		snapshot.shallow_count,
		sd_directory_engine::Attribute::Failed(ResourceError::PermissionDenied(_))
	));
}

#[tokio::test]
#[traced_test]
async fn shallow_count_of_a_plain_file_fails_without_io() {
	let resource = FakeResource::new();
	resource.add_dir("/watched");
	resource.add_file("/watched/plain", 1);

	let engine = Engine::new(Arc::new(resource));
	let mut events = engine.subscribe();
	let dir = engine.open_directory("/watched");

	let (_, receiver) = engine
		.call_when_ready(dir, None, Request::of([AttributeKind::FileList]))
		.unwrap();
	let file = notice(receiver).await.files[0].id;

	engine
		.register_monitor(
			dir,
			Uuid::new_v4(),
			Some(file),
			Request::of([AttributeKind::ShallowCount]),
			HiddenFilesPolicy::default(),
		)
		.unwrap();

	wait_for_event(&mut events, |event| {
		matches!(event, DirectoryEvent::FilesChanged { files, .. } if files.contains(&file))
	})
	.await;

	let snapshot = engine.file(dir, file).unwrap();
	assert!(matches!(
		snapshot.shallow_count,
		sd_directory_engine::Attribute::Failed(ResourceError::NotADirectory(_))
	));
}

#[tokio::test]
#[traced_test]
async fn reload_marks_vanished_files_gone() {
	let resource = FakeResource::new();
	resource.add_dir("/watched");
	resource.add_file("/watched/keep", 1);
	resource.add_file("/watched/drop", 1);

	let engine = Engine::new(Arc::new(resource.clone()));
	let mut events = engine.subscribe();
	let dir = engine.open_directory("/watched");

	engine
		.register_monitor(
			dir,
			Uuid::new_v4(),
			None,
			Request::of([AttributeKind::FileList]),
			HiddenFilesPolicy::default(),
		)
		.unwrap();
	wait_for_event(&mut events, |event| {
		matches!(event, DirectoryEvent::DoneLoading { directory } if *directory == dir)
	})
	.await;

	let dropped = engine.file_by_name(dir, "drop").unwrap().unwrap().id;
	resource.remove("/watched/drop");
	engine.force_reload(dir).unwrap();

	wait_for_event(&mut events, |event| {
		matches!(event, DirectoryEvent::DoneLoading { directory } if *directory == dir)
	})
	.await;

	let names = engine
		.files(dir)
		.unwrap()
		.iter()
		.map(|file| file.name.clone())
		.collect::<Vec<_>>();
	assert_eq!(names, ["keep"]);

	// the record survives for id holders, flagged gone
	assert!(engine.file(dir, dropped).unwrap().is_gone);
	assert!(engine.file_by_name(dir, "drop").unwrap().is_none());
}

#[tokio::test]
#[traced_test]
async fn invalidated_info_is_refetched_while_interest_remains() {
	let resource = FakeResource::new();
	resource.add_dir("/watched");
	resource.add_file("/watched/a", 1);

	let engine = Engine::new(Arc::new(resource.clone()));
	let mut events = engine.subscribe();
	let dir = engine.open_directory("/watched");

	engine
		.register_monitor(
			dir,
			Uuid::new_v4(),
			None,
			Request::of([AttributeKind::FileList, AttributeKind::FileInfo]),
			HiddenFilesPolicy::default(),
		)
		.unwrap();
	wait_for_event(&mut events, |event| {
		matches!(event, DirectoryEvent::DoneLoading { directory } if *directory == dir)
	})
	.await;

	let file = engine.file_by_name(dir, "a").unwrap().unwrap();
	assert_eq!(file.info.known().unwrap().size, 1);

	resource.update_node("/watched/a", |node| node.size = 42);
	engine
		.invalidate_attributes(dir, file.id, Request::of([AttributeKind::FileInfo]))
		.unwrap();

	wait_for_event(&mut events, |event| {
		matches!(event, DirectoryEvent::FilesChanged { files, .. } if files.contains(&file.id))
	})
	.await;

	let refreshed = engine.file(dir, file.id).unwrap();
	assert_eq!(refreshed.info.known().unwrap().size, 42);
}

#[tokio::test]
#[traced_test]
async fn vanished_file_goes_gone_on_refetch() {
	let resource = FakeResource::new();
	resource.add_dir("/watched");
	resource.add_file("/watched/a", 1);

	let engine = Engine::new(Arc::new(resource.clone()));
	let mut events = engine.subscribe();
	let dir = engine.open_directory("/watched");

	engine
		.register_monitor(
			dir,
			Uuid::new_v4(),
			None,
			Request::of([AttributeKind::FileList, AttributeKind::FileInfo]),
			HiddenFilesPolicy::default(),
		)
		.unwrap();
	wait_for_event(&mut events, |event| {
		matches!(event, DirectoryEvent::DoneLoading { directory } if *directory == dir)
	})
	.await;

	let file = engine.file_by_name(dir, "a").unwrap().unwrap().id;
	resource.remove("/watched/a");
	engine
		.invalidate_attributes(dir, file, Request::of([AttributeKind::FileInfo]))
		.unwrap();

	wait_for_event(&mut events, |event| {
		matches!(event, DirectoryEvent::FilesChanged { files, .. } if files.contains(&file))
	})
	.await;

	assert!(engine.file(dir, file).unwrap().is_gone);
	assert!(engine.files(dir).unwrap().is_empty());
}

#[tokio::test]
#[traced_test]
async fn force_reload_refetches_every_members_info() {
	// the latency keeps the reload in flight, so a waiter resolved against
	// stale pre-reload info would observably read the old size
	let resource = FakeResource::with_latency(Duration::from_millis(30));
	resource.add_dir("/watched");
	resource.add_file("/watched/a", 1);

	let engine = Engine::new(Arc::new(resource.clone()));
	let mut events = engine.subscribe();
	let dir = engine.open_directory("/watched");

	engine
		.register_monitor(
			dir,
			Uuid::new_v4(),
			None,
			Request::of([AttributeKind::FileList]),
			HiddenFilesPolicy::default(),
		)
		.unwrap();
	wait_for_event(&mut events, |event| {
		matches!(event, DirectoryEvent::DoneLoading { directory } if *directory == dir)
	})
	.await;

	let file = engine.file_by_name(dir, "a").unwrap().unwrap().id;
	resource.update_node("/watched/a", |node| node.size = 42);
	engine.force_reload(dir).unwrap();

	// a waiter registered right after the reload must see fresh info, not
	// resolve instantly against the pre-reload record
	let (_, receiver) = engine
		.call_when_ready(dir, Some(file), Request::of([AttributeKind::FileInfo]))
		.unwrap();
	notice(receiver).await;

	let refreshed = engine.file(dir, file).unwrap();
	assert_eq!(refreshed.info.known().unwrap().size, 42);
}

#[tokio::test]
#[traced_test]
async fn refetch_with_unchanged_info_still_announces() {
	let resource = FakeResource::new();
	resource.add_dir("/watched");
	resource.add_file("/watched/a", 1);

	let engine = Engine::new(Arc::new(resource));
	let mut events = engine.subscribe();
	let dir = engine.open_directory("/watched");

	engine
		.register_monitor(
			dir,
			Uuid::new_v4(),
			None,
			Request::of([AttributeKind::FileList, AttributeKind::FileInfo]),
			HiddenFilesPolicy::default(),
		)
		.unwrap();
	wait_for_event(&mut events, |event| {
		matches!(event, DirectoryEvent::DoneLoading { directory } if *directory == dir)
	})
	.await;

	// nothing on disk changed, but the refetch must still be announced so
	// observers showing a "loading" state settle
	let file = engine.file_by_name(dir, "a").unwrap().unwrap().id;
	engine
		.invalidate_attributes(dir, file, Request::of([AttributeKind::FileInfo]))
		.unwrap();

	wait_for_event(&mut events, |event| {
		matches!(event, DirectoryEvent::FilesChanged { files, .. } if files.contains(&file))
	})
	.await;
	assert!(engine.file(dir, file).unwrap().info.is_known());
}

#[tokio::test]
#[traced_test]
async fn invalidating_an_in_flight_fetch_discards_the_stale_result() {
	let resource = FakeResource::with_latency(Duration::from_millis(40));
	resource.add_dir("/watched");
	resource.add_file("/watched/a", 1);

	// a cap of one makes a leaked job slot wedge everything that follows
	let engine = Engine::with_config(
		Arc::new(resource.clone()),
		EngineConfig {
			max_jobs: 1,
			..EngineConfig::default()
		},
	);
	let mut events = engine.subscribe();
	let dir = engine.open_directory("/watched");

	engine
		.register_monitor(
			dir,
			Uuid::new_v4(),
			None,
			Request::of([AttributeKind::FileList, AttributeKind::FileInfo]),
			HiddenFilesPolicy::default(),
		)
		.unwrap();
	wait_for_event(&mut events, |event| {
		matches!(event, DirectoryEvent::DoneLoading { directory } if *directory == dir)
	})
	.await;

	let file = engine.file_by_name(dir, "a").unwrap().unwrap().id;
	resource.update_node("/watched/a", |node| node.size = 42);
	engine
		.invalidate_attributes(dir, file, Request::of([AttributeKind::FileInfo]))
		.unwrap();

	// the refetch is now held in flight by the latency; invalidating again
	// cancels it and starts over against the newest data
	tokio::time::sleep(Duration::from_millis(10)).await;
	resource.update_node("/watched/a", |node| node.size = 43);
	engine
		.invalidate_attributes(dir, file, Request::of([AttributeKind::FileInfo]))
		.unwrap();

	wait_for_event(&mut events, |event| {
		matches!(event, DirectoryEvent::FilesChanged { files, .. } if files.contains(&file))
	})
	.await;
	assert_eq!(engine.file(dir, file).unwrap().info.known().unwrap().size, 43);

	// the cancelled fetch released its slot; a follow-up fetch still runs
	let self_id = engine.self_file_id(dir).unwrap();
	let (_, receiver) = engine
		.call_when_ready(
			dir,
			Some(self_id),
			Request::of([AttributeKind::FileInfo, AttributeKind::ShallowCount]),
		)
		.unwrap();
	notice(receiver).await;
}

#[tokio::test]
#[traced_test]
async fn thumbnails_are_decoded_and_downscaled() {
	let mut png = Vec::new();
	image::DynamicImage::new_rgb8(64, 64)
		.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
		.unwrap();

	let resource = FakeResource::new();
	resource.add_dir("/pics");
	resource.add_file("/pics/big.png", png.len() as u64);
	resource.set_contents("/pics/big.png", png);
	resource.add_file("/pics/broken.png", 3);
	resource.set_contents("/pics/broken.png", b"nope".to_vec());

	let engine = Engine::with_config(
		Arc::new(resource),
		EngineConfig {
			max_thumbnail_dimension: 16,
			..EngineConfig::default()
		},
	);
	let dir = engine.open_directory("/pics");

	let (_, receiver) = engine
		.call_when_ready(dir, None, Request::of([AttributeKind::FileList]))
		.unwrap();
	let listed = notice(receiver).await;
	let big = listed.files.iter().find(|f| f.name == "big.png").unwrap().id;
	let broken = listed
		.files
		.iter()
		.find(|f| f.name == "broken.png")
		.unwrap()
		.id;

	let (_, big_rx) = engine
		.call_when_ready(dir, Some(big), Request::of([AttributeKind::Thumbnail]))
		.unwrap();
	let (_, broken_rx) = engine
		.call_when_ready(dir, Some(broken), Request::of([AttributeKind::Thumbnail]))
		.unwrap();
	notice(big_rx).await;
	notice(broken_rx).await;

	let snapshot = engine.file(dir, big).unwrap();
	assert_eq!(snapshot.thumbnail_state, AttrState::Known);
	let thumbnail = snapshot.thumbnail.expect("decoded thumbnail");
	assert!(thumbnail.width() <= 16 && thumbnail.height() <= 16);

	let snapshot = engine.file(dir, broken).unwrap();
	assert_eq!(snapshot.thumbnail_state, AttrState::KnownFailed);
	assert!(snapshot.thumbnail.is_none());
}

#[tokio::test]
#[traced_test]
async fn a_cancelled_thumbnail_fetch_never_applies() {
	let mut png = Vec::new();
	image::DynamicImage::new_rgb8(8, 8)
		.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
		.unwrap();

	let resource = FakeResource::with_latency(Duration::from_millis(50));
	resource.add_dir("/pics");
	resource.add_file("/pics/a.png", png.len() as u64);
	resource.set_contents("/pics/a.png", png);

	// a cap of one makes a leaked job slot wedge everything that follows
	let engine = Engine::with_config(
		Arc::new(resource),
		EngineConfig {
			max_jobs: 1,
			..EngineConfig::default()
		},
	);
	let dir = engine.open_directory("/pics");

	let (_, receiver) = engine
		.call_when_ready(dir, None, Request::of([AttributeKind::FileList]))
		.unwrap();
	let file = notice(receiver).await.files[0].id;

	let (id, receiver) = engine
		.call_when_ready(dir, Some(file), Request::of([AttributeKind::Thumbnail]))
		.unwrap();

	// the load is held in flight by the latency; withdrawing the last
	// interest cancels it mid-air
	tokio::time::sleep(Duration::from_millis(10)).await;
	assert!(engine.cancel_callback(dir, Some(file), id).unwrap());
	assert!(receiver.await.is_err());

	// even after the fetch would have completed, nothing landed
	tokio::time::sleep(Duration::from_millis(100)).await;
	let snapshot = engine.file(dir, file).unwrap();
	assert_eq!(snapshot.thumbnail_state, AttrState::Unknown);
	assert!(snapshot.thumbnail.is_none());

	// the cancelled fetch released its slot; a follow-up fetch still runs
	let self_id = engine.self_file_id(dir).unwrap();
	let (_, receiver) = engine
		.call_when_ready(
			dir,
			Some(self_id),
			Request::of([AttributeKind::FileInfo, AttributeKind::ShallowCount]),
		)
		.unwrap();
	notice(receiver).await;
}

#[tokio::test]
#[traced_test]
async fn providers_run_in_order_and_their_failures_are_recorded() {
	let log = common::providers::RunLog::default();
	let providers: Vec<Arc<dyn sd_directory_engine::InfoProvider>> = vec![
		Arc::new(StaticProvider {
			name: "vcs".into(),
			key: "vcs:status".into(),
			value: "clean".into(),
			delay: Duration::from_millis(5),
			log: Arc::clone(&log),
		}),
		Arc::new(StaticProvider {
			name: "sync".into(),
			key: "sync:state".into(),
			value: "uploaded".into(),
			delay: Duration::ZERO,
			log: Arc::clone(&log),
		}),
		Arc::new(FailingProvider {
			name: "flaky".into(),
			log: Arc::clone(&log),
		}),
	];

	let resource = FakeResource::new();
	resource.add_dir("/watched");
	resource.add_file("/watched/f", 1);

	let engine = Engine::with_providers(Arc::new(resource), EngineConfig::default(), providers);
	let mut events = engine.subscribe();
	let dir = engine.open_directory("/watched");

	let (_, receiver) = engine
		.call_when_ready(dir, None, Request::of([AttributeKind::FileList]))
		.unwrap();
	let file = notice(receiver).await.files[0].id;

	engine
		.register_monitor(
			dir,
			Uuid::new_v4(),
			Some(file),
			Request::of([AttributeKind::ExtensionInfo]),
			HiddenFilesPolicy::default(),
		)
		.unwrap();

	wait_for_event(&mut events, |event| {
		matches!(event, DirectoryEvent::ProvidersDone { file: done, .. } if *done == file)
	})
	.await;

	assert_eq!(&*log.lock(), &["vcs:f", "sync:f", "flaky:f"]);

	let snapshot = engine.file(dir, file).unwrap();
	assert!(snapshot.extension_info_done);
	assert_eq!(
		snapshot.extension_attributes.get("vcs:status").map(String::as_str),
		Some("clean")
	);
	assert_eq!(
		snapshot.extension_attributes.get("sync:state").map(String::as_str),
		Some("uploaded")
	);
	assert_eq!(snapshot.extension_errors.len(), 1);
}

#[tokio::test]
#[traced_test]
async fn mount_points_resolve_from_known_mounts_without_a_round_trip() {
	let resource = FakeResource::new();
	resource.add_dir("/mnt");
	resource.add_node("/mnt/usb", |node| {
		node.kind = EntryKind::Directory;
		node.is_mount_point = true;
	});
	resource.add_mount(MountInfo {
		root: "/mnt/usb".into(),
		name: "usb".into(),
		can_unmount: true,
	});

	let engine = Engine::new(Arc::new(resource));
	let dir = engine.open_directory("/mnt");

	let (_, receiver) = engine
		.call_when_ready(dir, None, Request::of([AttributeKind::FileList]))
		.unwrap();
	let usb = notice(receiver).await.files[0].id;

	let (_, receiver) = engine
		.call_when_ready(dir, Some(usb), Request::of([AttributeKind::Mount]))
		.unwrap();
	notice(receiver).await;

	let snapshot = engine.file(dir, usb).unwrap();
	let mount = snapshot.mount.known().unwrap().as_ref().unwrap();
	assert_eq!(mount.name, "usb");
}

#[tokio::test]
#[traced_test]
async fn a_directory_only_owns_a_mount_rooted_exactly_at_itself() {
	let resource = FakeResource::new();
	resource.add_dir("/mnt");
	resource.add_dir("/mnt/usb");
	resource.add_dir("/mnt/usb/photos");
	resource.add_mount(MountInfo {
		root: "/mnt/usb".into(),
		name: "usb".into(),
		can_unmount: true,
	});

	let engine = Engine::new(Arc::new(resource));

	// the mount root itself
	let usb = engine.open_directory("/mnt/usb");
	let usb_self = engine.self_file_id(usb).unwrap();
	let (_, receiver) = engine
		.call_when_ready(usb, Some(usb_self), Request::of([AttributeKind::Mount]))
		.unwrap();
	notice(receiver).await;
	let snapshot = engine.file(usb, usb_self).unwrap();
	assert!(snapshot.mount.known().unwrap().is_some());

	// a directory merely inside the mount gets "no mount of its own"
	let photos = engine.open_directory("/mnt/usb/photos");
	let photos_self = engine.self_file_id(photos).unwrap();
	let (_, receiver) = engine
		.call_when_ready(photos, Some(photos_self), Request::of([AttributeKind::Mount]))
		.unwrap();
	notice(receiver).await;
	let snapshot = engine.file(photos, photos_self).unwrap();
	assert!(snapshot.mount.known().unwrap().is_none());
}

#[tokio::test]
#[traced_test]
async fn filesystem_info_is_fetched_per_file() {
	let resource = FakeResource::new();
	resource.add_dir("/watched");
	resource.add_file("/watched/a", 1);
	resource.set_filesystem_info(
		"/watched/a",
		FilesystemInfo {
			read_only: true,
			remote: false,
			filesystem_type: Some("squashfs".into()),
		},
	);

	let engine = Engine::new(Arc::new(resource));
	let dir = engine.open_directory("/watched");

	let (_, receiver) = engine
		.call_when_ready(dir, None, Request::of([AttributeKind::FileList]))
		.unwrap();
	let file = notice(receiver).await.files[0].id;

	let (_, receiver) = engine
		.call_when_ready(dir, Some(file), Request::of([AttributeKind::FilesystemInfo]))
		.unwrap();
	notice(receiver).await;

	let info = engine.file(dir, file).unwrap();
	let filesystem = info.filesystem_info.known().unwrap();
	assert!(filesystem.read_only);
	assert_eq!(filesystem.filesystem_type.as_deref(), Some("squashfs"));
}

#[tokio::test]
#[traced_test]
async fn dropping_the_last_interest_cancels_the_deep_walk() {
	let resource = FakeResource::with_latency(Duration::from_millis(50));
	resource.add_dir("/big");
	for i in 0..10 {
		let sub = format!("/big/sub{i}");
		resource.add_dir(&sub);
		resource.add_file(format!("{sub}/f"), 1);
	}

	let engine = Engine::new(Arc::new(resource));
	let mut events = engine.subscribe();
	let dir = engine.open_directory("/big");
	let self_id = engine.self_file_id(dir).unwrap();

	let client = Uuid::new_v4();
	engine
		.register_monitor(
			dir,
			client,
			Some(self_id),
			Request::of([AttributeKind::FileInfo, AttributeKind::DeepCount]),
			HiddenFilesPolicy::default(),
		)
		.unwrap();

	wait_for_event(&mut events, |event| {
		matches!(event, DirectoryEvent::DeepCountUpdated { file, .. } if *file == self_id)
	})
	.await;

	engine.unregister_monitor(dir, client, Some(self_id)).unwrap();
	tokio::time::sleep(Duration::from_millis(150)).await;

	// a cancelled walk leaves no half-finished totals behind
	let snapshot = engine.file(dir, self_id).unwrap();
	assert_eq!(snapshot.deep_counts.status, DeepCountStatus::NotStarted);
}

#[tokio::test]
#[traced_test]
async fn closing_a_directory_invalidates_its_handle() {
	let resource = FakeResource::new();
	resource.add_dir("/watched");

	let engine = Engine::new(Arc::new(resource));
	let dir = engine.open_directory("/watched");
	let reopened = engine.open_directory("/watched");
	assert_eq!(dir, reopened);

	engine.close_directory(dir).unwrap();
	assert!(engine.files(dir).is_err());
	assert!(engine.close_directory(dir).is_err());
}
