use crate::{DispatchPolicy, DispatchState, Effect, InFlight, ThreadId, ThreadStatusSnapshot};

pub const PROCESSING_STALE_REASON: &str =
    "Recovered a thread that stayed in processing past the stale threshold";
pub const TURN_START_LOST_REASON: &str =
    "Turn never started after dispatch; message requeued for another attempt";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InFlightAssessment {
    Pending,
    TurnStarted,
    Completed,
    ProcessingStale,
    TurnStartLost,
}

/// Classifies one in-flight record against the thread's current status.
pub fn assess_in_flight(
    in_flight: &InFlight,
    status: &ThreadStatusSnapshot,
    is_active: bool,
    now_ms: u64,
    policy: &DispatchPolicy,
) -> InFlightAssessment {
    if !is_active && status.is_processing_stale(now_ms, policy.processing_stale_after_ms) {
        return InFlightAssessment::ProcessingStale;
    }
    if status.is_busy() {
        return InFlightAssessment::TurnStarted;
    }
    if in_flight.turn_started {
        return InFlightAssessment::Completed;
    }
    if now_ms.saturating_sub(in_flight.started_at) >= policy.turn_start_stale_after_ms {
        return InFlightAssessment::TurnStartLost;
    }
    InFlightAssessment::Pending
}

impl DispatchState {
    pub(crate) fn reconcile_staleness(&mut self, now_ms: u64, effects: &mut Vec<Effect>) {
        let mut thread_ids = self.in_flight.keys().cloned().collect::<Vec<_>>();
        thread_ids.sort();

        for thread_id in thread_ids {
            let Some(in_flight) = self.in_flight.get(&thread_id) else {
                continue;
            };
            let status = crate::resolve_thread_status(&self.ambient, &thread_id);
            let is_active = self.ambient.is_active_thread(&thread_id);

            match assess_in_flight(in_flight, &status, is_active, now_ms, &self.policy) {
                InFlightAssessment::Pending => {}
                InFlightAssessment::TurnStarted => {
                    if let Some(in_flight) = self.in_flight.get_mut(&thread_id)
                        && !in_flight.turn_started
                    {
                        in_flight.turn_started = true;
                        self.mark_queue_dirty();
                    }
                }
                InFlightAssessment::Completed => {
                    self.in_flight.remove(&thread_id);
                    self.mark_queue_dirty();
                }
                InFlightAssessment::ProcessingStale => {
                    self.in_flight.remove(&thread_id);
                    self.recover(thread_id, PROCESSING_STALE_REASON, now_ms, effects);
                }
                InFlightAssessment::TurnStartLost => {
                    if let Some(in_flight) = self.in_flight.remove(&thread_id) {
                        self.queue.prepend(&thread_id, in_flight.message);
                    }
                    self.recover(thread_id, TURN_START_LOST_REASON, now_ms, effects);
                }
            }
        }
    }

    /// Leaves the retry counter alone: a lost turn is not a transport failure.
    fn recover(
        &mut self,
        thread_id: ThreadId,
        reason: &str,
        now_ms: u64,
        effects: &mut Vec<Effect>,
    ) {
        self.bump_generation(&thread_id);
        let failure = self.failures.entry(thread_id.clone()).or_default();
        failure.reason = reason.to_owned();
        failure.failed_at = now_ms;
        self.mark_queue_dirty();
        effects.push(Effect::RecoverStaleThread { thread_id });
    }
}
