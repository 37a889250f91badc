use outbox_domain::{DispatchPolicy, WorkspaceResolver};
use std::time::Duration;

pub const PROCESSING_STALE_MS_ENV: &str = "OUTBOX_PROCESSING_STALE_MS";
pub const TURN_START_STALE_MS_ENV: &str = "OUTBOX_TURN_START_STALE_MS";
pub const MAX_AUTO_RETRIES_ENV: &str = "OUTBOX_MAX_AUTO_RETRIES";
pub const PERSIST_DEBOUNCE_MS_ENV: &str = "OUTBOX_PERSIST_DEBOUNCE_MS";
pub const STALENESS_TICK_MS_ENV: &str = "OUTBOX_STALENESS_TICK_MS";
pub const WORKSPACE_CACHE_CAPACITY_ENV: &str = "OUTBOX_WORKSPACE_CACHE_CAPACITY";

const DEFAULT_PERSIST_DEBOUNCE: Duration = Duration::from_millis(250);
const DEFAULT_STALENESS_TICK: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EngineConfig {
    pub policy: DispatchPolicy,
    pub persist_debounce: Duration,
    pub staleness_tick: Duration,
    pub workspace_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: DispatchPolicy::default(),
            persist_debounce: DEFAULT_PERSIST_DEBOUNCE,
            staleness_tick: DEFAULT_STALENESS_TICK,
            workspace_cache_capacity: WorkspaceResolver::DEFAULT_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Reads overrides from the environment. Empty or unparseable values keep
    /// the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |name: &str| -> Option<u64> {
            let raw = lookup(name)?;
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<u64>() {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::warn!(name, value = trimmed, error = %err, "ignoring invalid config value");
                    None
                }
            }
        };

        Self {
            policy: DispatchPolicy {
                processing_stale_after_ms: number(PROCESSING_STALE_MS_ENV)
                    .unwrap_or(defaults.policy.processing_stale_after_ms),
                turn_start_stale_after_ms: number(TURN_START_STALE_MS_ENV)
                    .unwrap_or(defaults.policy.turn_start_stale_after_ms),
                max_auto_retries: number(MAX_AUTO_RETRIES_ENV)
                    .and_then(|value| u32::try_from(value).ok())
                    .unwrap_or(defaults.policy.max_auto_retries),
            },
            persist_debounce: number(PERSIST_DEBOUNCE_MS_ENV)
                .map(Duration::from_millis)
                .unwrap_or(defaults.persist_debounce),
            staleness_tick: number(STALENESS_TICK_MS_ENV)
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.staleness_tick),
            workspace_cache_capacity: number(WORKSPACE_CACHE_CAPACITY_ENV)
                .and_then(|value| usize::try_from(value).ok())
                .filter(|capacity| *capacity > 0)
                .unwrap_or(defaults.workspace_cache_capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> EngineConfig {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        EngineConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_without_overrides() {
        let config = config_from(&[]);
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.policy.processing_stale_after_ms, 90_000);
        assert_eq!(config.policy.turn_start_stale_after_ms, 30_000);
        assert_eq!(config.policy.max_auto_retries, 1);
        assert_eq!(config.persist_debounce, Duration::from_millis(250));
        assert_eq!(config.workspace_cache_capacity, 256);
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            (PROCESSING_STALE_MS_ENV, "1000"),
            (TURN_START_STALE_MS_ENV, " 500 "),
            (MAX_AUTO_RETRIES_ENV, "3"),
            (PERSIST_DEBOUNCE_MS_ENV, "0"),
            (STALENESS_TICK_MS_ENV, "50"),
            (WORKSPACE_CACHE_CAPACITY_ENV, "8"),
        ]);
        assert_eq!(config.policy.processing_stale_after_ms, 1_000);
        assert_eq!(config.policy.turn_start_stale_after_ms, 500);
        assert_eq!(config.policy.max_auto_retries, 3);
        assert_eq!(config.persist_debounce, Duration::ZERO);
        assert_eq!(config.staleness_tick, Duration::from_millis(50));
        assert_eq!(config.workspace_cache_capacity, 8);
    }

    #[test]
    fn invalid_or_empty_values_fall_back() {
        let config = config_from(&[
            (PROCESSING_STALE_MS_ENV, "soon"),
            (TURN_START_STALE_MS_ENV, ""),
            (MAX_AUTO_RETRIES_ENV, "-1"),
            (STALENESS_TICK_MS_ENV, "0"),
            (WORKSPACE_CACHE_CAPACITY_ENV, "0"),
        ]);
        assert_eq!(config, EngineConfig::default());
    }
}
