use std::time::Duration;

use tokio::time::timeout;

use crate::Event;
use crate::EventStream;
use crate::EventType;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

/// Waits for the next event of any type.
pub async fn next_event(
    stream: &EventStream,
    limit: Duration,
) -> Event {
    timeout(limit, stream.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream closed")
}
