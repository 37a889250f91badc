use crate::{SendOptions, ThreadId, Workspace, WorkspaceId};

/// Durable storage for the serialized queue. `None` means the key is absent.
pub trait QueuePersistence: Send + Sync {
    fn load_queue(&self) -> Result<Option<String>, String>;

    fn save_queue(&self, payload: Option<String>) -> Result<(), String>;
}

/// Host-supplied send and command handlers. Calls block until the host has
/// accepted or rejected the request; the error string is surfaced as the
/// thread's last failure reason.
pub trait MessageTransport: Send + Sync {
    fn connect_workspace(&self, workspace: &Workspace) -> Result<(), String>;

    /// Sends to the active thread.
    fn send_user_message(
        &self,
        text: &str,
        images: &[String],
        options: Option<&SendOptions>,
    ) -> Result<(), String>;

    fn send_user_message_to_thread(
        &self,
        workspace: &Workspace,
        thread_id: &ThreadId,
        text: &str,
        images: &[String],
        options: Option<&SendOptions>,
    ) -> Result<(), String>;

    fn start_fork(&self, text: &str) -> Result<(), String>;

    fn start_review(&self, text: &str) -> Result<(), String>;

    fn start_resume(&self, text: &str) -> Result<(), String>;

    fn start_compact(&self, text: &str) -> Result<(), String>;

    fn start_apps(&self, text: &str) -> Result<(), String>;

    fn start_mcp(&self, text: &str) -> Result<(), String>;

    fn start_status(&self, text: &str) -> Result<(), String>;

    fn start_thread_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<ThreadId>, String>;

    fn clear_active_images(&self);

    fn on_recover_stale_thread(&self, _thread_id: &ThreadId) {}
}
