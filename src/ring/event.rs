use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// An item joined the ring
    Add,
    /// An item left the ring, explicitly or by lease expiry
    Remove,
    /// It is the turn of the items in `values`
    Trigger,
    /// A watch fault; the watcher restarts on its own
    Error,
    /// The watcher stopped; no further events follow
    Closing,
}

/// One notification delivered to a watcher's caller.
#[derive(Debug)]
pub struct Event {
    pub event_type: EventType,
    /// One value for `Add`/`Remove`, `items` values for `Trigger`
    pub values: Vec<String>,
    pub err: Option<Error>,
}

impl Event {
    pub fn add(value: impl Into<String>) -> Self {
        Self::with_values(EventType::Add, vec![value.into()])
    }

    pub fn remove(value: impl Into<String>) -> Self {
        Self::with_values(EventType::Remove, vec![value.into()])
    }

    pub fn trigger(values: Vec<String>) -> Self {
        Self::with_values(EventType::Trigger, values)
    }

    pub fn error(err: Error) -> Self {
        Self {
            event_type: EventType::Error,
            values: Vec::new(),
            err: Some(err),
        }
    }

    pub fn closing() -> Self {
        Self::with_values(EventType::Closing, Vec::new())
    }

    fn with_values(
        event_type: EventType,
        values: Vec<String>,
    ) -> Self {
        Self {
            event_type,
            values,
            err: None,
        }
    }
}

/// Receiving side of a watcher's event channel.
///
/// Handles are cheap to clone and every clone reads from the same channel,
/// so callers that watch the same key share one stream of events.
#[derive(Debug, Clone)]
pub struct EventStream {
    rx: Arc<Mutex<mpsc::Receiver<Event>>>,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::Receiver<Event>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// A stream that reports `err` once and then closes.
    pub(crate) fn failed(err: Error) -> Self {
        let (tx, rx) = mpsc::channel(2);
        let _ = tx.try_send(Event::error(err));
        let _ = tx.try_send(Event::closing());
        Self::new(rx)
    }

    /// Next event, or `None` once the watcher has stopped.
    pub async fn recv(&self) -> Option<Event> {
        self.rx.lock().await.recv().await
    }

    pub fn into_stream(self) -> impl Stream<Item = Event> {
        futures::stream::unfold(self, |events| async move {
            let event = events.recv().await?;
            Some((event, events))
        })
    }
}
