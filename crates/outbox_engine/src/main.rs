use anyhow::{Context as _, anyhow, bail};
use outbox_backend::QueueStoreService;
use outbox_domain::{
    Action, AmbientState, DispatchState, MigrationReport, QueueHealthEntry, QueuePersistence,
    QueueStore, WorkspaceResolver, encode_persisted_queue, legacy_message_count,
    migrate_legacy_workspace_ids,
};
use outbox_engine::EngineConfig;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthReport {
    legacy_queue_message_count: usize,
    threads: Vec<QueueHealthEntry>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let store = QueueStoreService::new()?;
    let raw = store.load_queue().map_err(|message| anyhow!(message))?;
    let queue = raw
        .as_deref()
        .map(QueueStore::from_persisted_json)
        .unwrap_or_default();

    match std::env::args().nth(1).as_deref() {
        None | Some("health") => print_health(queue),
        Some("migrate") => migrate(&store, queue),
        Some(other) => bail!("unknown command {other:?}; expected `health` or `migrate`"),
    }
}

fn print_health(queue: QueueStore) -> anyhow::Result<()> {
    let config = EngineConfig::from_env();
    let legacy_queue_message_count = legacy_message_count(&queue);

    let mut state = DispatchState::new(config.policy, config.workspace_cache_capacity);
    let now = now_unix_ms();
    state.apply(Action::QueueLoaded { queue }, now);

    let report = HealthReport {
        legacy_queue_message_count,
        threads: state.queue_health_entries(now),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to encode report")?
    );
    Ok(())
}

/// Offline there is no live thread mapping, so only tags on sibling messages
/// in the same thread can fill the gaps.
fn migrate(store: &QueueStoreService, mut queue: QueueStore) -> anyhow::Result<()> {
    let report: MigrationReport = migrate_legacy_workspace_ids(
        &mut queue,
        &AmbientState::default(),
        &WorkspaceResolver::default(),
    );
    if report.migrated_messages > 0 {
        let payload =
            encode_persisted_queue(&queue.to_map()).context("failed to encode queue")?;
        store
            .save_queue(payload)
            .map_err(|message| anyhow!(message))?;
        tracing::info!(
            migrated_messages = report.migrated_messages,
            migrated_threads = report.migrated_threads,
            "legacy queue migration written"
        );
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to encode report")?
    );
    Ok(())
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
