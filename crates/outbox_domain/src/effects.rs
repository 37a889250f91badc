use crate::{MigrationReport, QueuedMessage, SendOptions, SlashCommand, ThreadId, Workspace};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Effect {
    SaveQueue,
    Dispatch(DispatchRequest),
    SteerMessage {
        thread_id: ThreadId,
        message: QueuedMessage,
        options: SendOptions,
        clear_active_images: bool,
    },
    RecoverStaleThread {
        thread_id: ThreadId,
    },
    LegacyMigrationFinished {
        report: MigrationReport,
    },
}

/// One dispatch attempt. `generation` must be echoed back in the completion
/// action; completions for an older generation are ignored.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DispatchRequest {
    pub thread_id: ThreadId,
    pub generation: u64,
    pub message: QueuedMessage,
    /// Set when the target workspace must be connected before sending.
    pub connect: Option<Workspace>,
    pub clear_active_images: bool,
    pub route: DispatchRoute,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DispatchRoute {
    Command {
        command: SlashCommand,
        text: String,
    },
    NewThread {
        workspace: Workspace,
        follow_up: Option<String>,
        options: SendOptions,
    },
    ActiveThread {
        text: String,
        images: Vec<String>,
        options: Option<SendOptions>,
    },
    OtherThread {
        workspace: Workspace,
        text: String,
        images: Vec<String>,
        options: Option<SendOptions>,
    },
}
