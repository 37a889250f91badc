use anyhow::Context as _;
use outbox_domain::{QUEUE_STORAGE_KEY, QueuePersistence, paths};
use std::path::PathBuf;
use std::sync::Arc;

use crate::roots::resolve_outbox_root;
use crate::sqlite_store::SqliteStore;

/// Queue persistence on top of the sqlite key/value table.
#[derive(Clone)]
pub struct QueueStoreService {
    sqlite: SqliteStore,
}

impl QueueStoreService {
    pub fn new() -> anyhow::Result<Arc<Self>> {
        let outbox_root = resolve_outbox_root()?;
        std::fs::create_dir_all(&outbox_root)
            .with_context(|| format!("failed to create {}", outbox_root.display()))?;
        Self::open(paths::sqlite_path(&outbox_root))
    }

    pub fn open(db_path: PathBuf) -> anyhow::Result<Arc<Self>> {
        let sqlite = SqliteStore::new(db_path).context("failed to init sqlite store")?;
        Ok(Arc::new(Self { sqlite }))
    }

    fn load_queue_internal(&self) -> anyhow::Result<Option<String>> {
        self.sqlite
            .get_app_setting_text(QUEUE_STORAGE_KEY)
            .context("failed to load queued messages")
    }

    fn save_queue_internal(&self, payload: Option<String>) -> anyhow::Result<()> {
        let bytes = payload.as_ref().map(String::len).unwrap_or(0);
        self.sqlite
            .set_app_setting_text(QUEUE_STORAGE_KEY, payload)
            .context("failed to save queued messages")?;
        tracing::trace!(bytes, "queue snapshot written");
        Ok(())
    }
}

impl QueuePersistence for QueueStoreService {
    fn load_queue(&self) -> Result<Option<String>, String> {
        self.load_queue_internal().map_err(|e| format!("{e:#}"))
    }

    fn save_queue(&self, payload: Option<String>) -> Result<(), String> {
        self.save_queue_internal(payload)
            .map_err(|e| format!("{e:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::lock_env_for_tests;
    use crate::test_support::EnvVarGuard;
    use outbox_domain::{QueueStore, QueuedMessage, ThreadId, encode_persisted_queue};

    fn temp_root(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "outbox-service-{name}-{}-{}",
            std::process::id(),
            crate::time::unix_epoch_nanos_now()
        ))
    }

    #[test]
    fn queue_round_trips_through_sqlite() {
        let service = QueueStoreService::open(temp_root("round_trip").join("outbox.db")).unwrap();
        assert_eq!(service.load_queue().unwrap(), None);

        let t1 = ThreadId::new("t1");
        let mut queue = QueueStore::new();
        queue.enqueue(
            &t1,
            QueuedMessage {
                id: "m1".to_owned(),
                text: "hello".to_owned(),
                created_at: 5,
                images: vec!["a.png".to_owned()],
                workspace_id: None,
                model: None,
                effort: None,
                collaboration_mode: None,
            },
        );
        let payload = encode_persisted_queue(&queue.to_map()).unwrap();
        service.save_queue(payload).unwrap();

        let raw = service.load_queue().unwrap().unwrap();
        let loaded = QueueStore::from_persisted_json(&raw);
        assert_eq!(loaded, queue);
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["t1"][0]["createdAt"], 5);
    }

    #[test]
    fn saving_none_removes_the_key() {
        let service = QueueStoreService::open(temp_root("remove").join("outbox.db")).unwrap();
        service.save_queue(Some("{}".to_owned())).unwrap();
        service.save_queue(None).unwrap();
        assert_eq!(service.load_queue().unwrap(), None);
    }

    #[test]
    fn new_creates_root_from_env() {
        let _lock = lock_env_for_tests();
        let root = temp_root("env_root");
        let _env = EnvVarGuard::set(paths::OUTBOX_ROOT_ENV, &root);

        let service = QueueStoreService::new().unwrap();
        service.save_queue(Some("{}".to_owned())).unwrap();
        assert!(paths::sqlite_path(&root).exists());
    }
}
