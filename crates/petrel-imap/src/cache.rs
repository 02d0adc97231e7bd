//! The message-fetch cache path.
//!
//! A display or download URL is served from the first source that works:
//! the folder's offline store, a valid entry in the shared message
//! cache, or the network, optionally teeing the network stream into a
//! cache writer. Writers have exactly-once-write semantics and are
//! doomed on failure or interruption; a doomed entry can never be read
//! again. A read that finds another caller mid-write waits for that
//! writer to finish and then answers from the settled entry; it never
//! races the writer with a duplicate fetch.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Result of a cache entry lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// No entry.
    Miss,
    /// A complete entry.
    Hit(Vec<u8>),
    /// Somebody else is writing this entry right now. Reads are never
    /// served from a half-written entry; [`settle_lookup`] waits until
    /// the writer commits or dooms, then answers with the settled
    /// `Hit`/`Miss`.
    InProgress,
}

/// Write handle for one cache entry.
pub trait CacheWriter: Send {
    /// Appends bytes to the pending entry.
    fn write(&mut self, data: &[u8]);

    /// Commits the entry; later lookups may hit it.
    fn commit(self: Box<Self>);

    /// Dooms the entry: it becomes permanently unusable and later
    /// lookups MUST miss.
    fn doom(self: Box<Self>);
}

/// The shared message entry cache.
pub trait MessageCache: Send + Sync {
    /// Looks up an entry.
    fn lookup(&self, key: &str) -> CacheLookup;

    /// Opens a writer for the key, or `None` when the entry is doomed,
    /// already being written, or otherwise unavailable.
    fn open_writer(&self, key: &str) -> Option<Box<dyn CacheWriter>>;

    /// Dooms an existing entry in place (failed header sniff on a hit).
    fn doom(&self, key: &str) {
        let _ = key;
    }
}

/// Where the message bytes will come from.
#[derive(Debug, PartialEq, Eq)]
pub enum FetchPath {
    /// Stream from the folder's offline store.
    Offline,
    /// Stream a complete cache entry.
    CacheHit(Vec<u8>),
    /// Fetch from the server; `tee` says whether to also write the
    /// stream into the cache.
    Network {
        /// Tee into a cache writer while streaming to the listener.
        tee: bool,
    },
}

/// Sniffs whether a buffer starts like an RFC 822 message: a colon
/// appears before any newline, or the buffer opens with a mailbox
/// `From ` line. The first hundred bytes are enough.
#[must_use]
pub fn looks_like_rfc822(head: &[u8]) -> bool {
    if head.starts_with(b"From ") {
        return true;
    }
    for &b in head.iter().take(100) {
        match b {
            b':' => return true,
            b'\r' | b'\n' => return false,
            _ => {}
        }
    }
    false
}

/// Polling interval while another caller's writer is open.
const WRITER_POLL: Duration = Duration::from_millis(50);

/// Looks up an entry, waiting out any in-flight writer.
///
/// When somebody else is mid-write on this key, the read waits until
/// that writer commits or dooms and then answers with the settled
/// `Hit`/`Miss`; it never returns `InProgress`. Every writer resolves
/// (commit on success, doom on failure or interruption), so the wait is
/// bounded by the writer's lifetime. `cancelled` lets the caller
/// abandon the wait on death or pseudo-interrupt; `None` comes back in
/// that case.
pub async fn settle_lookup(
    cache: &dyn MessageCache,
    key: &str,
    mut cancelled: impl FnMut() -> bool,
) -> Option<CacheLookup> {
    loop {
        match cache.lookup(key) {
            CacheLookup::InProgress => {
                if cancelled() {
                    return None;
                }
                tokio::time::sleep(WRITER_POLL).await;
            }
            resolved => return Some(resolved),
        }
    }
}

/// Decides the fetch source for a message-display URL.
///
/// `offline` says the message is in the offline store; `lookup` is the
/// cache's settled answer for the canonical key (see [`settle_lookup`]);
/// `message_size`/`ceiling` gate the tee (oversized messages are never
/// cached).
#[must_use]
pub fn plan_fetch_path(
    offline: bool,
    lookup: CacheLookup,
    message_size: u32,
    ceiling: u32,
) -> FetchPath {
    if offline {
        return FetchPath::Offline;
    }
    match lookup {
        CacheLookup::Hit(data) => {
            if looks_like_rfc822(&data) {
                FetchPath::CacheHit(data)
            } else {
                // Caller dooms the entry; we fetch fresh.
                FetchPath::Network {
                    tee: message_size <= ceiling,
                }
            }
        }
        CacheLookup::InProgress => {
            // Callers settle the lookup first; a stray unsettled answer
            // must at least not race the open writer with a second tee.
            debug_assert!(false, "unsettled cache lookup reached planning");
            FetchPath::Network { tee: false }
        }
        CacheLookup::Miss => FetchPath::Network {
            tee: message_size <= ceiling,
        },
    }
}

#[derive(Debug, Default)]
struct MemoryCacheInner {
    entries: HashMap<String, Vec<u8>>,
    doomed: HashSet<String>,
    in_progress: HashSet<String>,
}

/// In-memory [`MessageCache`], used by tests and as the second-level
/// cache when the disk cache is disabled.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    inner: Arc<Mutex<MemoryCacheInner>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryCacheInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Dooms an existing entry directly (cache-hit sniff failures).
    pub fn doom_entry(&self, key: &str) {
        let mut inner = self.lock();
        inner.entries.remove(key);
        inner.doomed.insert(key.to_string());
    }
}

impl MessageCache for MemoryCache {
    fn lookup(&self, key: &str) -> CacheLookup {
        let inner = self.lock();
        if inner.doomed.contains(key) {
            return CacheLookup::Miss;
        }
        if inner.in_progress.contains(key) {
            return CacheLookup::InProgress;
        }
        inner
            .entries
            .get(key)
            .map_or(CacheLookup::Miss, |data| CacheLookup::Hit(data.clone()))
    }

    fn open_writer(&self, key: &str) -> Option<Box<dyn CacheWriter>> {
        let mut inner = self.lock();
        if inner.doomed.contains(key) || inner.in_progress.contains(key) {
            return None;
        }
        inner.in_progress.insert(key.to_string());
        Some(Box::new(MemoryCacheWriter {
            key: key.to_string(),
            buf: Vec::new(),
            cache: Arc::clone(&self.inner),
        }))
    }

    fn doom(&self, key: &str) {
        self.doom_entry(key);
    }
}

struct MemoryCacheWriter {
    key: String,
    buf: Vec<u8>,
    cache: Arc<Mutex<MemoryCacheInner>>,
}

impl CacheWriter for MemoryCacheWriter {
    fn write(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    fn commit(self: Box<Self>) {
        let mut inner = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.in_progress.remove(&self.key);
        if !inner.doomed.contains(&self.key) {
            inner.entries.insert(self.key, self.buf);
        }
    }

    fn doom(self: Box<Self>) {
        let mut inner = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.in_progress.remove(&self.key);
        inner.entries.remove(&self.key);
        inner.doomed.insert(self.key);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rfc822_sniff() {
        assert!(looks_like_rfc822(b"From someone@example.com Sat Jan  1"));
        assert!(looks_like_rfc822(b"Received: from relay\r\n"));
        assert!(!looks_like_rfc822(b"<!DOCTYPE html>\n<html>"));
        assert!(!looks_like_rfc822(b"\r\nMessage-ID: x"));
        assert!(!looks_like_rfc822(b""));
    }

    #[test]
    fn offline_wins() {
        assert_eq!(
            plan_fetch_path(true, CacheLookup::Hit(b"From: a\r\n".to_vec()), 100, 1000),
            FetchPath::Offline
        );
    }

    #[test]
    fn valid_hit_streams_from_cache() {
        let data = b"Subject: hi\r\n\r\nbody".to_vec();
        assert_eq!(
            plan_fetch_path(false, CacheLookup::Hit(data.clone()), 100, 1000),
            FetchPath::CacheHit(data)
        );
    }

    #[test]
    fn garbage_hit_falls_through_to_network() {
        assert_eq!(
            plan_fetch_path(false, CacheLookup::Hit(b"garbage\nhere".to_vec()), 100, 1000),
            FetchPath::Network { tee: true }
        );
    }

    #[test]
    fn oversized_message_never_tees() {
        assert_eq!(
            plan_fetch_path(false, CacheLookup::Miss, 2000, 1000),
            FetchPath::Network { tee: false }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn settle_waits_for_writer_commit() {
        let cache = MemoryCache::new();
        let mut writer = cache.open_writer("k").unwrap();
        writer.write(b"Subject: x\r\n");
        assert_eq!(cache.lookup("k"), CacheLookup::InProgress);

        // The writer commits while the reader is waiting; the same read
        // resolves to the committed entry, not a duplicate fetch.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            writer.commit();
        });

        let settled = settle_lookup(&cache, "k", || false).await.unwrap();
        assert_eq!(settled, CacheLookup::Hit(b"Subject: x\r\n".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn settle_waits_for_writer_doom() {
        let cache = MemoryCache::new();
        let writer = cache.open_writer("k").unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            writer.doom();
        });

        let settled = settle_lookup(&cache, "k", || false).await.unwrap();
        assert_eq!(settled, CacheLookup::Miss);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_abandons_on_cancel() {
        let cache = MemoryCache::new();
        let _writer = cache.open_writer("k").unwrap();
        assert!(settle_lookup(&cache, "k", || true).await.is_none());
    }

    #[tokio::test]
    async fn settle_passes_resolved_lookups_through() {
        let cache = MemoryCache::new();
        assert_eq!(
            settle_lookup(&cache, "k", || false).await,
            Some(CacheLookup::Miss)
        );
    }

    #[test]
    fn memory_cache_commit_then_hit() {
        let cache = MemoryCache::new();
        let mut writer = cache.open_writer("k").unwrap();
        writer.write(b"Subject: x");
        writer.write(b"\r\n");
        writer.commit();

        assert_eq!(
            cache.lookup("k"),
            CacheLookup::Hit(b"Subject: x\r\n".to_vec())
        );
    }

    #[test]
    fn writer_in_progress_visible() {
        let cache = MemoryCache::new();
        let writer = cache.open_writer("k").unwrap();
        assert_eq!(cache.lookup("k"), CacheLookup::InProgress);
        // A second writer is refused while the first is open.
        assert!(cache.open_writer("k").is_none());
        writer.commit();
        assert!(matches!(cache.lookup("k"), CacheLookup::Hit(_)));
    }

    #[test]
    fn doomed_entry_always_misses() {
        let cache = MemoryCache::new();
        let mut writer = cache.open_writer("k").unwrap();
        writer.write(b"partial");
        writer.doom();

        assert_eq!(cache.lookup("k"), CacheLookup::Miss);
        assert!(cache.open_writer("k").is_none());
    }

    #[test]
    fn doom_entry_after_commit() {
        let cache = MemoryCache::new();
        let writer = cache.open_writer("k").unwrap();
        writer.commit();
        cache.doom_entry("k");
        assert_eq!(cache.lookup("k"), CacheLookup::Miss);
    }
}
