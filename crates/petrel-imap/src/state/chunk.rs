//! Fetch-by-chunks tuning.
//!
//! Large bodies are fetched as `BODY[]<offset.length>` chunks whose size
//! adapts to observed transfer times: quick chunks grow the window, slow
//! ones shrink it back toward the configured start. Changed values are
//! flushed to user preferences on the owning thread at connection close,
//! so the tuner tracks a dirty flag instead of writing anywhere itself.

use std::time::Duration;

use crate::config::EngineConfig;

/// Adaptive chunk sizing for body fetches.
#[derive(Debug, Clone)]
pub struct ChunkTuner {
    size: u32,
    threshold: u32,
    start: u32,
    add: u32,
    too_fast: Duration,
    ideal: Duration,
    dirty: bool,
}

impl ChunkTuner {
    /// Seeds the tuner from preferences.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            size: config.chunk_size,
            threshold: config.chunk_threshold,
            start: config.chunk_size,
            add: config.chunk_add,
            too_fast: Duration::from_secs(u64::from(config.chunk_fast)),
            ideal: Duration::from_secs(u64::from(config.chunk_ideal)),
            dirty: false,
        }
    }

    /// Current chunk size in bytes.
    #[must_use]
    pub const fn chunk_size(&self) -> u32 {
        self.size
    }

    /// Current chunking threshold in bytes.
    #[must_use]
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Whether this message should be fetched in chunks at all.
    #[must_use]
    pub const fn should_chunk(
        &self,
        message_size: u32,
        fetch_by_chunks: bool,
        imap4rev1: bool,
    ) -> bool {
        fetch_by_chunks && imap4rev1 && message_size > self.threshold
    }

    /// Adjusts the window from one chunk's observed transfer.
    ///
    /// A full-size chunk inside the fast band grows the window; anything
    /// past the ideal band shrinks it, snapping back to the start size
    /// first, then stepping down, never below twice the step.
    pub fn adjust(&mut self, elapsed: Duration, bytes_fetched: u32) {
        if elapsed <= self.too_fast {
            if bytes_fetched >= self.size {
                self.size += self.add;
                self.threshold = self.size + self.size / 2;
                self.dirty = true;
            }
        } else if elapsed > self.ideal {
            if self.size > self.start {
                self.size = self.start;
            } else if self.size > self.add * 2 {
                self.size -= self.add;
            }
            self.threshold = self.size + self.size / 2;
            self.dirty = true;
        }
    }

    /// Takes the values to persist, if they changed. `(size, threshold)`.
    pub const fn take_dirty(&mut self) -> Option<(u32, u32)> {
        if self.dirty {
            self.dirty = false;
            Some((self.size, self.threshold))
        } else {
            None
        }
    }
}

/// One chunk's bounds within a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset within the body.
    pub offset: u32,
    /// Chunk length in bytes.
    pub length: u32,
}

/// Yields the next chunk to request, or `None` once `offset` has reached
/// the advertised size.
#[must_use]
pub const fn next_chunk(offset: u32, message_size: u32, chunk_size: u32) -> Option<Chunk> {
    if offset >= message_size {
        return None;
    }
    Some(Chunk {
        offset,
        length: chunk_size,
    })
}
