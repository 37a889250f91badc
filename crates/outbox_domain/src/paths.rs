use std::path::{Path, PathBuf};

pub const OUTBOX_ROOT_ENV: &str = "OUTBOX_ROOT";

pub fn sqlite_path(outbox_root: &Path) -> PathBuf {
    outbox_root.join("outbox.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_path_lives_under_root() {
        let base = PathBuf::from("outbox-root");
        assert_eq!(sqlite_path(&base), base.join("outbox.db"));
        assert_eq!(OUTBOX_ROOT_ENV, "OUTBOX_ROOT");
    }
}
