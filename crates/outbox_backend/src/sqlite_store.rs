use anyhow::{Context as _, anyhow};
use rusqlite::{Connection, OptionalExtension as _, params};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use crate::time::now_unix_seconds;

const LATEST_SCHEMA_VERSION: u32 = 1;

const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/migrations/0001_init.sql"
    )),
)];

/// Handle to a sqlite database owned by a dedicated worker thread. Cloning is
/// cheap; every clone talks to the same worker.
#[derive(Clone)]
pub struct SqliteStore {
    tx: mpsc::Sender<DbCommand>,
}

enum DbCommand {
    GetAppSettingText {
        key: String,
        reply: mpsc::Sender<anyhow::Result<Option<String>>>,
    },
    SetAppSettingText {
        key: String,
        value: Option<String>,
        reply: mpsc::Sender<anyhow::Result<()>>,
    },
}

impl SqliteStore {
    pub fn new(db_path: PathBuf) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel::<DbCommand>();

        std::thread::Builder::new()
            .name("outbox-sqlite".to_owned())
            .spawn(move || {
                let mut db = SqliteDatabase::open(&db_path);
                if let Err(err) = &db {
                    tracing::error!(error = %format!("{err:#}"), path = %db_path.display(), "failed to open sqlite db");
                }
                while let Ok(cmd) = rx.recv() {
                    match (&mut db, cmd) {
                        (Ok(db), DbCommand::GetAppSettingText { key, reply }) => {
                            let _ = reply.send(db.get_app_setting_text(&key));
                        }
                        (Ok(db), DbCommand::SetAppSettingText { key, value, reply }) => {
                            let _ = reply.send(db.set_app_setting_text(&key, value.as_deref()));
                        }
                        (Err(err), cmd) => {
                            respond_db_open_error(err, cmd);
                        }
                    }
                }
            })
            .context("failed to spawn sqlite worker thread")?;

        Ok(Self { tx })
    }

    pub fn get_app_setting_text(&self, key: impl Into<String>) -> anyhow::Result<Option<String>> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(DbCommand::GetAppSettingText {
                key: key.into(),
                reply: reply_tx,
            })
            .context("sqlite worker is not running")?;
        reply_rx.recv().context("sqlite worker terminated")?
    }

    /// `None` deletes the key.
    pub fn set_app_setting_text(
        &self,
        key: impl Into<String>,
        value: Option<String>,
    ) -> anyhow::Result<()> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(DbCommand::SetAppSettingText {
                key: key.into(),
                value,
                reply: reply_tx,
            })
            .context("sqlite worker is not running")?;
        reply_rx.recv().context("sqlite worker terminated")?
    }
}

fn respond_db_open_error(err: &anyhow::Error, cmd: DbCommand) {
    let message = format!("{err:#}");
    match cmd {
        DbCommand::GetAppSettingText { reply, .. } => {
            let _ = reply.send(Err(anyhow!(message)));
        }
        DbCommand::SetAppSettingText { reply, .. } => {
            let _ = reply.send(Err(anyhow!(message)));
        }
    }
}

struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut conn = Connection::open(db_path)
            .with_context(|| format!("failed to open sqlite db {}", db_path.display()))?;

        configure_connection(&mut conn).context("failed to configure sqlite connection")?;
        apply_migrations(&mut conn).context("failed to apply sqlite migrations")?;

        Ok(Self { conn })
    }

    fn get_app_setting_text(&mut self, key: &str) -> anyhow::Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM app_settings_text WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("failed to load app setting text {key}"))
    }

    fn set_app_setting_text(&mut self, key: &str, value: Option<&str>) -> anyhow::Result<()> {
        let now = now_unix_seconds();
        let tx = self.conn.transaction()?;
        if let Some(value) = value {
            tx.execute(
                "INSERT INTO app_settings_text (key, value, created_at, updated_at)
                 VALUES (?1, ?2, COALESCE((SELECT created_at FROM app_settings_text WHERE key = ?1), ?3), ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                params![key, value, now],
            )?;
        } else {
            tx.execute("DELETE FROM app_settings_text WHERE key = ?1", params![key])?;
        }
        tx.commit()
            .with_context(|| format!("failed to store app setting text {key}"))?;
        Ok(())
    }
}

fn configure_connection(conn: &mut Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )
    .context("failed to apply sqlite PRAGMAs")?;
    Ok(())
}

fn apply_migrations(conn: &mut Connection) -> anyhow::Result<()> {
    let current: u32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))
        .context("failed to read user_version")? as u32;

    if current > LATEST_SCHEMA_VERSION {
        return Err(anyhow!(
            "sqlite schema version is newer than this build: db={}, app={}",
            current,
            LATEST_SCHEMA_VERSION
        ));
    }

    if current == LATEST_SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch("BEGIN IMMEDIATE;")
        .context("failed to begin migration transaction")?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        conn.execute_batch(sql)
            .with_context(|| format!("failed to apply migration v{version:04}"))?;
        conn.pragma_update(None, "user_version", *version as i64)
            .context("failed to update user_version")?;
        tracing::debug!(version = *version, "applied sqlite migration");
    }

    conn.execute_batch("COMMIT;")
        .context("failed to commit migration transaction")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db_path(test_name: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push("outbox-tests");
        let _ = std::fs::create_dir_all(&dir);
        dir.push(format!(
            "{test_name}-{}-{}.db",
            std::process::id(),
            crate::time::unix_epoch_nanos_now()
        ));
        dir
    }

    fn open_db(path: &Path) -> SqliteDatabase {
        SqliteDatabase::open(path).unwrap()
    }

    #[test]
    fn migrations_create_schema() {
        let path = temp_db_path("migrations_create_schema");
        let db = open_db(&path);

        let count: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = 'app_settings_text'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);

        let version: i64 = db
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, LATEST_SCHEMA_VERSION as i64);
    }

    #[test]
    fn reopening_skips_applied_migrations() {
        let path = temp_db_path("reopening_skips_applied_migrations");
        {
            let mut db = open_db(&path);
            db.set_app_setting_text("k", Some("v")).unwrap();
        }
        let mut db = open_db(&path);
        assert_eq!(db.get_app_setting_text("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn newer_schema_is_rejected() {
        let path = temp_db_path("newer_schema_is_rejected");
        {
            let db = open_db(&path);
            db.conn
                .pragma_update(None, "user_version", (LATEST_SCHEMA_VERSION + 1) as i64)
                .unwrap();
        }
        let err = SqliteDatabase::open(&path).err().unwrap();
        assert!(
            format!("{err:#}").contains("newer than this build"),
            "unexpected error: {err:#}"
        );
    }

    #[test]
    fn app_setting_text_upserts_and_deletes() {
        let path = temp_db_path("app_setting_text_upserts_and_deletes");
        let mut db = open_db(&path);

        assert_eq!(db.get_app_setting_text("queue").unwrap(), None);
        db.set_app_setting_text("queue", Some("one")).unwrap();
        let created_at: i64 = db
            .conn
            .query_row(
                "SELECT created_at FROM app_settings_text WHERE key = 'queue'",
                [],
                |row| row.get(0),
            )
            .unwrap();

        db.set_app_setting_text("queue", Some("two")).unwrap();
        assert_eq!(db.get_app_setting_text("queue").unwrap().as_deref(), Some("two"));
        let created_after: i64 = db
            .conn
            .query_row(
                "SELECT created_at FROM app_settings_text WHERE key = 'queue'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(created_at, created_after);

        db.set_app_setting_text("queue", None).unwrap();
        assert_eq!(db.get_app_setting_text("queue").unwrap(), None);
    }

    #[test]
    fn store_round_trips_through_worker() {
        let path = temp_db_path("store_round_trips_through_worker");
        let store = SqliteStore::new(path).unwrap();

        store
            .set_app_setting_text("payload", Some(r#"{"t1":[]}"#.to_owned()))
            .unwrap();
        let clone = store.clone();
        assert_eq!(
            clone.get_app_setting_text("payload").unwrap().as_deref(),
            Some(r#"{"t1":[]}"#)
        );
    }

    #[test]
    fn open_failure_is_reported_per_command() {
        let blocker = temp_db_path("open_failure_is_reported_per_command");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let store = SqliteStore::new(blocker.join("nested").join("outbox.db")).unwrap();

        let err = store.get_app_setting_text("anything").unwrap_err();
        assert!(
            format!("{err:#}").contains("failed to create"),
            "unexpected error: {err:#}"
        );
        assert!(store.set_app_setting_text("anything", None).is_err());
    }
}
