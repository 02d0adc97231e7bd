//! Command tag allocation.
//!
//! Tags are plain decimal numbers from a monotonically increasing counter,
//! seeded randomly on first use so reconnects do not reuse a recent tag
//! window. On 32-bit wrap the counter resets to 1, never 0.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::Tag;

/// Allocates monotonically increasing decimal tags.
#[derive(Debug)]
pub struct TagAllocator {
    counter: AtomicU32,
}

impl TagAllocator {
    /// Creates an allocator seeded with `1 + (random mod 100)`.
    #[must_use]
    pub fn new() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.subsec_nanos());
        Self {
            counter: AtomicU32::new(1 + nanos % 100),
        }
    }

    /// Creates an allocator with a fixed seed, for deterministic tests.
    #[must_use]
    pub const fn with_seed(seed: u32) -> Self {
        Self {
            counter: AtomicU32::new(seed),
        }
    }

    /// Allocates the next tag.
    pub fn next(&self) -> Tag {
        let mut n = self.counter.fetch_add(1, Ordering::Relaxed);
        if n == 0 {
            // Wrapped: 0 is never a tag.
            n = self.counter.fetch_add(1, Ordering::Relaxed);
        }
        Tag::new(n.to_string())
    }

    /// Returns the next value without allocating.
    #[must_use]
    pub fn peek(&self) -> u32 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Default for TagAllocator {
    fn default() -> Self {
        Self::new()
    }
}
