use outbox_domain::paths;
use std::path::PathBuf;

use crate::env::{home_dir, optional_trimmed_path_from_env};
use crate::time::unix_epoch_nanos_now;

/// `OUTBOX_ROOT` if set, a fresh temp dir under test, `$HOME/outbox` otherwise.
pub fn resolve_outbox_root() -> anyhow::Result<PathBuf> {
    if let Some(root) = optional_trimmed_path_from_env(paths::OUTBOX_ROOT_ENV)? {
        return Ok(root);
    }

    if cfg!(test) {
        let nanos = unix_epoch_nanos_now();
        let pid = std::process::id();
        return Ok(std::env::temp_dir().join(format!("outbox-test-{pid}-{nanos}")));
    }

    Ok(home_dir()?.join("outbox"))
}
