/// Thresholds the scheduler and staleness reconciler work against.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DispatchPolicy {
    pub processing_stale_after_ms: u64,
    pub turn_start_stale_after_ms: u64,
    pub max_auto_retries: u32,
}

impl DispatchPolicy {
    pub const DEFAULT_PROCESSING_STALE_AFTER_MS: u64 = 90_000;
    pub const DEFAULT_TURN_START_STALE_AFTER_MS: u64 = 30_000;
    pub const DEFAULT_MAX_AUTO_RETRIES: u32 = 1;
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            processing_stale_after_ms: Self::DEFAULT_PROCESSING_STALE_AFTER_MS,
            turn_start_stale_after_ms: Self::DEFAULT_TURN_START_STALE_AFTER_MS,
            max_auto_retries: Self::DEFAULT_MAX_AUTO_RETRIES,
        }
    }
}
