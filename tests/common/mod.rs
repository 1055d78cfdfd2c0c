pub mod providers;
pub mod resource;

use std::time::Duration;

use tokio::sync::broadcast;

use sd_directory_engine::DirectoryEvent;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Drain the event stream until `pred` matches, panicking on timeout.
pub async fn wait_for_event(
	events: &mut broadcast::Receiver<DirectoryEvent>,
	mut pred: impl FnMut(&DirectoryEvent) -> bool,
) -> DirectoryEvent {
	tokio::time::timeout(EVENT_TIMEOUT, async {
		loop {
			match events.recv().await {
				Ok(event) if pred(&event) => return event,
				Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
				Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
			}
		}
	})
	.await
	.expect("timed out waiting for event")
}
