/// Cycles `items` until `requested` values have been produced.
///
/// Returns an empty vector for an empty input.
pub fn repeat_items(
    items: &[String],
    requested: usize,
) -> Vec<String> {
    if items.is_empty() {
        return Vec::new();
    }
    (0..requested).map(|i| items[i % items.len()].clone()).collect()
}

/// One trigger's worth of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Window {
    /// Values delivered to the watcher, always `items` long
    pub(crate) values: Vec<String>,
    /// Item the next trigger points at
    pub(crate) next: String,
}

/// Builds the window from `fetched`, the distinct ring members in ring
/// order starting at the item that just fired (at most `items + 1` of
/// them).
///
/// The next trigger points one past the delivered window. When the ring
/// holds fewer than `items + 1` members the delivered values wrap around
/// and the next trigger points back at the first fetched item, so every
/// window of a short ring starts at the same place.
pub(crate) fn next_window(
    fetched: &[String],
    items: usize,
) -> Option<Window> {
    if fetched.is_empty() || items == 0 {
        return None;
    }
    Some(Window {
        values: repeat_items(fetched, items),
        next: fetched.get(items).unwrap_or(&fetched[0]).clone(),
    })
}
