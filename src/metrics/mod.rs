
use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use tracing::warn;

use crate::Error;
use crate::Result;

lazy_static! {
    pub static ref TRIGGERS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ring_triggers_total", "Trigger events delivered to watchers"),
        &["ring"]
    )
    .expect("metric can not be created");

    pub static ref TRIGGER_RACES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "ring_trigger_races_total",
            "Conditional trigger writes lost to a concurrent writer"
        ),
        &["ring"]
    )
    .expect("metric can not be created");

    pub static ref WATCHER_RESTARTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ring_watcher_restarts_total", "Watcher sessions torn down by a watch fault"),
        &["ring"]
    )
    .expect("metric can not be created");

    pub static ref STORE_RETRIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ring_store_retries_total", "Store calls retried after a transient fault"),
        &["op"]
    )
    .expect("metric can not be created");

    pub static ref ACTIVE_WATCHERS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("ring_active_watchers", "Watcher tasks currently running"),
        &["ring"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER_ONCE: Once = Once::new();

pub fn register_custom_metrics(registry: &Registry) -> Result<()> {
    registry.register(Box::new(TRIGGERS_TOTAL.clone()))?;
    registry.register(Box::new(TRIGGER_RACES_TOTAL.clone()))?;
    registry.register(Box::new(WATCHER_RESTARTS_TOTAL.clone()))?;
    registry.register(Box::new(STORE_RETRIES_TOTAL.clone()))?;
    registry.register(Box::new(ACTIVE_WATCHERS.clone()))?;
    Ok(())
}

/// Text exposition of the crate registry, for an embedding daemon to serve.
pub fn metrics_text() -> Result<String> {
    REGISTER_ONCE.call_once(|| {
        if let Err(e) = register_custom_metrics(&REGISTRY) {
            warn!("could not register ring metrics: {:?}", e);
        }
    });

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| Error::Fatal(format!("metrics are not utf8: {e}")))
}
