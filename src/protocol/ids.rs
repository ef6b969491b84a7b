//! Protocol message id generation.
//!
//! Ids look like `5f2c0a9b1e-1`: a 10-character per-session stem followed by a
//! counter. They are minted on the bus side so the correlation can be written
//! before the send is handed to the protocol thread.

use std::sync::atomic::{AtomicU64, Ordering};

/// Length of the per-session id stem.
pub const STEM_LEN: usize = 10;

/// Source of unique protocol message ids.
pub trait MessageIdSource: Send + Sync {
    /// Return a fresh id, never handed out before by this source.
    fn next_id(&self) -> String;
}

/// `<stem>-<counter>` ids with a random stem and a counter starting at 1.
#[derive(Debug)]
pub struct SequentialIds {
    stem: String,
    counter: AtomicU64,
}

impl SequentialIds {
    /// Create a source with a random stem.
    pub fn new() -> Self {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        Self::with_stem(simple.chars().take(STEM_LEN).collect::<String>())
    }

    /// Create a source with a fixed stem.
    pub fn with_stem(stem: impl Into<String>) -> Self {
        Self {
            stem: stem.into(),
            counter: AtomicU64::new(0),
        }
    }

    /// The per-session stem.
    pub fn stem(&self) -> &str {
        &self.stem
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageIdSource for SequentialIds {
    fn next_id(&self) -> String {
        let n = self
            .counter
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1);
        format!("{}-{n}", self.stem)
    }
}
