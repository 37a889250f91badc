use anyhow::anyhow;
use std::path::PathBuf;

pub(crate) fn optional_trimmed_path_from_env(name: &str) -> anyhow::Result<Option<PathBuf>> {
    let value = match std::env::var_os(name) {
        Some(value) => value,
        None => return Ok(None),
    };

    let value = value.to_string_lossy();
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("{name} is set but empty"));
    }

    Ok(Some(PathBuf::from(trimmed)))
}

pub(crate) fn home_dir() -> anyhow::Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("HOME is not set"))
}

#[cfg(test)]
pub(crate) fn lock_env_for_tests() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::{lock_env_for_tests, optional_trimmed_path_from_env};
    use crate::test_support::EnvVarGuard;
    use std::path::PathBuf;

    const VAR: &str = "OUTBOX_TEST_TRIMMED_PATH_ENV";

    #[test]
    fn optional_trimmed_path_from_env_returns_none_when_unset() {
        let _lock = lock_env_for_tests();
        let _env = EnvVarGuard::remove(VAR);

        let loaded = optional_trimmed_path_from_env(VAR).expect("unset env should not error");
        assert!(loaded.is_none());
    }

    #[test]
    fn optional_trimmed_path_from_env_errors_on_empty() {
        let _lock = lock_env_for_tests();
        let _env = EnvVarGuard::set(VAR, "   ");

        let err = optional_trimmed_path_from_env(VAR).expect_err("empty env should error");
        assert!(
            err.to_string()
                .contains("OUTBOX_TEST_TRIMMED_PATH_ENV is set but empty"),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn optional_trimmed_path_from_env_trims_value() {
        let _lock = lock_env_for_tests();
        let _env = EnvVarGuard::set(VAR, " outbox-test ");

        let loaded = optional_trimmed_path_from_env(VAR).expect("non-empty env should succeed");
        assert_eq!(loaded, Some(PathBuf::from("outbox-test")));
    }
}
