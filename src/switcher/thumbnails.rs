//! Recent tab captures for the overlay cards.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::native::protocol::TabId;

/// Captures kept at once; older ones are evicted.
pub const MAX_THUMBNAILS: usize = 20;

/// Pages the browser refuses to capture.
const RESTRICTED_PREFIXES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "devtools://",
    "edge://",
    "about:",
];

pub struct ThumbnailCache {
    entries: LruCache<TabId, String>,
}

impl ThumbnailCache {
    pub fn new() -> Self {
        Self::with_capacity(NonZeroUsize::MIN.saturating_add(MAX_THUMBNAILS - 1))
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Whether a tab showing `url` can be captured at all.
    pub fn capturable(url: &str) -> bool {
        !RESTRICTED_PREFIXES.iter().any(|p| url.starts_with(p))
    }

    /// Store a fresh capture, making it the most recent.
    pub fn insert(&mut self, tab: TabId, data_url: String) {
        if let Some((evicted, _)) = self.entries.push(tab, data_url)
            && evicted != tab
        {
            tracing::trace!(tab = %evicted, "evicted thumbnail");
        }
    }

    /// Look up without touching recency; rendering cards is not a use.
    pub fn get(&self, tab: TabId) -> Option<&str> {
        self.entries.peek(&tab).map(String::as_str)
    }

    pub fn remove(&mut self, tab: TabId) {
        self.entries.pop(&tab);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ThumbnailCache {
    fn default() -> Self {
        Self::new()
    }
}
