//! Recording toggle
//!
//! A shared on/off switch read by the proxy on every response and flipped by
//! the admin API. Reads and writes are relaxed atomics: a request racing a
//! toggle may or may not be recorded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Cloneable handle to the recording flag
#[derive(Debug, Clone)]
pub struct RecordingState {
    enabled: Arc<AtomicBool>,
}

/// Serialized form of the flag
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Recording,
    Stopped,
}

impl RecordingState {
    pub fn new(record_on_start: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(record_on_start)),
        }
    }

    pub fn start(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_recording(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> RecordingStatus {
        if self.is_recording() {
            RecordingStatus::Recording
        } else {
            RecordingStatus::Stopped
        }
    }
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::new(true)
    }
}
