use std::sync::Arc;
use std::time::Duration;

use lease_ring::path;
use lease_ring::Event;
use lease_ring::EventStream;
use lease_ring::EventType;
use lease_ring::KvRing;
use lease_ring::MemStore;
use lease_ring::Ring;
use lease_ring::RingConfig;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Item keepalive long enough to outlive any test.
pub const KEEPALIVE_SECS: i64 = 600;

/// Upper bound on how long a test waits for a single event.
pub const EVENT_WAIT: Duration = Duration::from_secs(120);

pub struct TestRing {
    pub store: Arc<MemStore>,
    pub ring: KvRing<MemStore>,
    pub ctx: CancellationToken,
}

pub fn setup_ring(subscription: &str) -> TestRing {
    crate::enable_logger();
    let store = Arc::new(MemStore::new());
    let ring = KvRing::new(store.clone(), &path("default", subscription), RingConfig::default());
    TestRing {
        store,
        ring,
        ctx: CancellationToken::new(),
    }
}

impl TestRing {
    pub async fn add_all(
        &self,
        values: &[&str],
    ) {
        for value in values {
            self.ring
                .add(&self.ctx, value, KEEPALIVE_SECS)
                .await
                .expect("add should succeed");
        }
    }

    pub fn triggers_prefix(&self) -> String {
        format!("{}/triggers/", self.ring.path())
    }
}

pub async fn next_event(stream: &EventStream) -> Event {
    timeout(EVENT_WAIT, stream.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream closed")
}

pub async fn next_trigger(stream: &EventStream) -> Vec<String> {
    loop {
        let event = next_event(stream).await;
        match event.event_type {
            EventType::Trigger => return event.values,
            EventType::Error | EventType::Closing => panic!("unexpected {:?}", event),
            _ => continue,
        }
    }
}

pub async fn collect_triggers(
    stream: &EventStream,
    count: usize,
) -> Vec<Vec<String>> {
    let mut triggers = Vec::with_capacity(count);
    for _ in 0..count {
        triggers.push(next_trigger(stream).await);
    }
    triggers
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn singletons(values: &[&str]) -> Vec<Vec<String>> {
    values.iter().map(|v| vec![v.to_string()]).collect()
}
