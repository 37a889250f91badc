use crate::{QueueStore, QueuedMessage, RunSettings, ThreadId, ThreadStatus, Workspace, WorkspaceId};

#[derive(Clone, Debug)]
pub enum Action {
    QueueLoaded {
        queue: QueueStore,
    },

    ActiveThreadChanged {
        thread_id: Option<ThreadId>,
        workspace_id: Option<WorkspaceId>,
    },
    ActiveTurnChanged {
        turn_id: Option<String>,
    },
    ThreadStatusUpdated {
        thread_id: ThreadId,
        status: ThreadStatus,
    },
    /// `None` drops the live mapping; the resolver cache keeps the last one.
    ThreadWorkspaceObserved {
        thread_id: ThreadId,
        workspace_id: Option<WorkspaceId>,
    },
    WorkspaceUpdated {
        workspace: Workspace,
    },
    FlagsChanged {
        steer_enabled: bool,
        apps_enabled: bool,
    },
    RunSettingsChanged {
        settings: RunSettings,
    },

    /// Composer submit on the active thread.
    SendRequested {
        message_id: String,
        text: String,
        images: Vec<String>,
    },
    /// `thread_id: None` targets the active thread.
    QueueMessage {
        thread_id: Option<ThreadId>,
        message_id: String,
        text: String,
        images: Vec<String>,
    },
    RemoveQueuedMessage {
        thread_id: ThreadId,
        message_id: String,
    },
    UpdateQueuedMessage {
        thread_id: ThreadId,
        message_id: String,
        text: String,
    },
    SteerQueuedMessage {
        thread_id: ThreadId,
        message_id: String,
    },
    SteerFailed {
        thread_id: ThreadId,
        message: QueuedMessage,
        error: String,
    },
    RetryThreadQueue {
        thread_id: ThreadId,
    },
    ClearThreadQueue {
        thread_id: ThreadId,
    },

    DispatchSucceeded {
        thread_id: ThreadId,
        generation: u64,
    },
    DispatchFailed {
        thread_id: ThreadId,
        generation: u64,
        error: String,
    },

    MigrateLegacyWorkspaceIds,
    Tick,
}
