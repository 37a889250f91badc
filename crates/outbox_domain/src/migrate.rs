use crate::{AmbientState, QueueStore, ThreadId, WorkspaceId, WorkspaceResolver};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub migrated_messages: usize,
    pub migrated_threads: usize,
}

/// Queued messages that predate workspace tagging.
pub fn legacy_message_count(queue: &QueueStore) -> usize {
    queue
        .iter()
        .flat_map(|(_, messages)| messages.iter())
        .filter(|message| message.workspace_id.is_none())
        .count()
}

/// Backfills `workspace_id` on untagged messages, one thread at a time, from
/// the best-known workspace for that thread. Already-tagged messages are left
/// alone; threads with no known workspace stay untouched.
pub fn migrate_legacy_workspace_ids(
    queue: &mut QueueStore,
    ambient: &AmbientState,
    resolver: &WorkspaceResolver,
) -> MigrationReport {
    let affected = queue
        .iter()
        .filter(|(_, messages)| messages.iter().any(|m| m.workspace_id.is_none()))
        .map(|(thread_id, _)| thread_id.clone())
        .collect::<Vec<_>>();

    let mut report = MigrationReport::default();
    for thread_id in affected {
        let Some(workspace_id) = best_known_workspace_id(&thread_id, queue, ambient, resolver)
        else {
            continue;
        };
        let Some(messages) = queue.messages_mut(&thread_id) else {
            continue;
        };

        let mut touched = 0;
        for message in messages.iter_mut().filter(|m| m.workspace_id.is_none()) {
            message.workspace_id = Some(workspace_id.clone());
            touched += 1;
        }
        if touched > 0 {
            report.migrated_messages += touched;
            report.migrated_threads += 1;
        }
    }
    report
}

fn best_known_workspace_id(
    thread_id: &ThreadId,
    queue: &QueueStore,
    ambient: &AmbientState,
    resolver: &WorkspaceResolver,
) -> Option<WorkspaceId> {
    let active_workspace = ambient
        .active_workspace_id
        .as_ref()
        .filter(|_| ambient.is_active_thread(thread_id));
    ambient
        .thread_workspaces
        .get(thread_id)
        .or_else(|| resolver.last_known(thread_id))
        .or(active_workspace)
        .or_else(|| queue.tagged_workspace_id(thread_id))
        .cloned()
}
