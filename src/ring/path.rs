use crate::constants::ITEMS_SEGMENT;
use crate::constants::RINGS_ROOT;
use crate::constants::TRIGGERS_SEGMENT;
use crate::WatcherKey;

/// Path of the ring serving `subscription` in `namespace`.
///
/// ```
/// assert_eq!(lease_ring::path("default", "linux"), "/rings/default/linux");
/// ```
pub fn path(
    namespace: &str,
    subscription: &str,
) -> String {
    format!("/{RINGS_ROOT}/{namespace}/{subscription}")
}

pub(crate) fn items_prefix(ring_path: &str) -> String {
    format!("{}/{ITEMS_SEGMENT}/", ring_path.trim_end_matches('/'))
}

pub(crate) fn triggers_prefix(ring_path: &str) -> String {
    format!("{}/{TRIGGERS_SEGMENT}/", ring_path.trim_end_matches('/'))
}

pub(crate) fn item_key(
    items_prefix: &str,
    value: &str,
) -> String {
    format!("{items_prefix}{value}")
}

/// `<triggers>/<name>/<items>/<cadence>`; one key per distinct watcher key.
pub(crate) fn trigger_key(
    triggers_prefix: &str,
    key: &WatcherKey,
) -> String {
    format!(
        "{triggers_prefix}{}/{}/{}",
        key.name,
        key.items,
        cadence_segment(key.interval, &key.cron)
    )
}

// cron expressions carry spaces and slashes, neither of which belongs in a
// single key segment
fn cadence_segment(
    interval: i64,
    cron: &str,
) -> String {
    let cron = cron.trim();
    if cron.is_empty() {
        interval.to_string()
    } else {
        cron.split_whitespace().collect::<Vec<_>>().join("_").replace('/', "%2F")
    }
}
