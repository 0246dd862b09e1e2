use crate::util::RingBuffer;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

pub const ROAST_LOG_CAPACITY: usize = 10;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoastLogEntry {
    /// Value of the roast counter once this roast was counted.
    pub sequence: u64,
    pub text: String,
    pub expression: String,
    pub recorded_at: SystemTime,
}

/// The last ten roasts. Entries are immutable once recorded.
#[derive(Clone, Debug)]
pub struct RoastLog {
    entries: RingBuffer<RoastLogEntry>,
}

impl RoastLog {
    pub fn new() -> Self {
        Self {
            entries: RingBuffer::new(ROAST_LOG_CAPACITY),
        }
    }

    pub fn record(&mut self, entry: RoastLogEntry) {
        if let Some(evicted) = self.entries.push(entry) {
            tracing::trace!(sequence = evicted.sequence, "roast log entry evicted");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&RoastLogEntry> {
        self.entries.newest()
    }

    pub fn newest_first(&self) -> impl Iterator<Item = &RoastLogEntry> {
        self.entries.iter_newest_first()
    }

    pub fn texts(&self) -> Vec<String> {
        self.newest_first().map(|e| e.text.clone()).collect()
    }
}

impl Default for RoastLog {
    fn default() -> Self {
        Self::new()
    }
}
