use crate::{DispatchState, ThreadId, WorkspaceId, resolve_thread_status};
use std::cmp::Reverse;
use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedReason {
    #[default]
    None,
    Reviewing,
    Processing,
    AwaitingTurnStartEvent,
    WorkspaceUnresolved,
    CommandRequiresActiveThread,
    GlobalProcessing,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueHealthEntry {
    pub thread_id: ThreadId,
    pub queue_length: usize,
    pub in_flight: bool,
    pub blocked_reason: BlockedReason,
    pub last_failure_reason: Option<String>,
    pub is_stale: bool,
    pub blocked_for_ms: Option<u64>,
    pub last_status_updated_at: Option<u64>,
    pub last_failure_at: Option<u64>,
    pub workspace_id: Option<WorkspaceId>,
    pub workspace_resolved: bool,
}

impl QueueHealthEntry {
    fn weight(&self) -> usize {
        self.queue_length + usize::from(self.in_flight)
    }
}

impl DispatchState {
    /// Diagnostic view over every thread with queued, in-flight or failure
    /// state, plus the active thread and any busy thread.
    pub fn queue_health_entries(&self, now_ms: u64) -> Vec<QueueHealthEntry> {
        let active = self.ambient.active_thread_id.as_ref();
        let thread_ids = self
            .queue
            .thread_ids()
            .chain(self.in_flight.keys())
            .chain(self.failures.keys())
            .chain(self.ambient.thread_statuses.keys())
            .chain(active)
            .collect::<BTreeSet<_>>();

        let mut entries = thread_ids
            .into_iter()
            .filter_map(|thread_id| self.health_entry(thread_id, now_ms))
            .collect::<Vec<_>>();

        entries.sort_by_key(|entry| {
            (
                !self.ambient.is_active_thread(&entry.thread_id),
                !entry.is_stale,
                Reverse(entry.weight()),
                entry.thread_id.clone(),
            )
        });
        entries
    }

    fn health_entry(&self, thread_id: &ThreadId, now_ms: u64) -> Option<QueueHealthEntry> {
        let queue_length = self.queue.len(thread_id);
        let in_flight = self.in_flight.get(thread_id);
        let failure = self.failures.get(thread_id);
        let status = resolve_thread_status(&self.ambient, thread_id);
        let is_active = self.ambient.is_active_thread(thread_id);

        let has_artifacts = queue_length > 0 || in_flight.is_some() || failure.is_some();
        if !has_artifacts && !is_active && !status.is_busy() {
            return None;
        }

        let processing_stale =
            status.is_processing_stale(now_ms, self.policy.processing_stale_after_ms);
        let turn_start_stale = in_flight.is_some_and(|in_flight| {
            !in_flight.turn_started
                && now_ms.saturating_sub(in_flight.started_at)
                    >= self.policy.turn_start_stale_after_ms
        });

        let blocked_reason = self.blocked_reason(thread_id, now_ms);
        let blocked_for_ms = match blocked_reason {
            BlockedReason::None => None,
            BlockedReason::Reviewing => None,
            BlockedReason::Processing => status
                .processing_elapsed_ms(now_ms)
                .or_else(|| in_flight.map(|f| now_ms.saturating_sub(f.started_at))),
            BlockedReason::AwaitingTurnStartEvent => {
                in_flight.map(|f| now_ms.saturating_sub(f.started_at))
            }
            BlockedReason::WorkspaceUnresolved
            | BlockedReason::CommandRequiresActiveThread
            | BlockedReason::GlobalProcessing => self
                .queue
                .head(thread_id)
                .map(|head| now_ms.saturating_sub(head.created_at)),
        };

        let resolution = self.resolver.resolve(thread_id, &self.ambient, &self.queue);
        Some(QueueHealthEntry {
            thread_id: thread_id.clone(),
            queue_length,
            in_flight: in_flight.is_some(),
            blocked_reason,
            last_failure_reason: failure.map(|f| f.reason.clone()),
            is_stale: processing_stale || turn_start_stale,
            blocked_for_ms,
            last_status_updated_at: self
                .ambient
                .thread_statuses
                .get(thread_id)
                .and_then(|status| status.updated_at),
            last_failure_at: failure.map(|f| f.failed_at),
            workspace_id: resolution.workspace_id,
            workspace_resolved: resolution.resolved,
        })
    }
}
