use crate::{AmbientState, ThreadId};

/// Status as reported by the host's per-thread status feed. Absent fields
/// default to false/none.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThreadStatus {
    pub is_processing: bool,
    pub is_reviewing: bool,
    pub processing_started_at: Option<u64>,
    pub last_duration_ms: Option<u64>,
    pub updated_at: Option<u64>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ThreadStatusSnapshot {
    pub is_processing: bool,
    pub is_reviewing: bool,
    pub processing_started_at: Option<u64>,
    pub last_duration_ms: Option<u64>,
}

impl ThreadStatusSnapshot {
    pub fn is_busy(&self) -> bool {
        self.is_processing || self.is_reviewing
    }

    pub fn processing_elapsed_ms(&self, now_ms: u64) -> Option<u64> {
        if !self.is_processing {
            return None;
        }
        self.processing_started_at
            .map(|started| now_ms.saturating_sub(started))
    }

    /// Processing without a known start time is never stale.
    pub fn is_processing_stale(&self, now_ms: u64, threshold_ms: u64) -> bool {
        self.processing_elapsed_ms(now_ms)
            .is_some_and(|elapsed| elapsed >= threshold_ms)
    }
}

/// Only the active thread has a live turn-id signal, so only the active thread
/// gets the turn id OR'd into `is_processing`.
pub fn resolve_thread_status(ambient: &AmbientState, thread_id: &ThreadId) -> ThreadStatusSnapshot {
    let reported = ambient.thread_statuses.get(thread_id);
    let mut snapshot = reported
        .map(|status| ThreadStatusSnapshot {
            is_processing: status.is_processing,
            is_reviewing: status.is_reviewing,
            processing_started_at: status.processing_started_at,
            last_duration_ms: status.last_duration_ms,
        })
        .unwrap_or_default();

    if ambient.is_active_thread(thread_id) && ambient.active_turn_id.is_some() {
        snapshot.is_processing = true;
    }
    snapshot
}
