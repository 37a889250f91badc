use crate::{RunSettings, ThreadId, ThreadStatus, Workspace, WorkspaceId};
use std::collections::HashMap;

/// Read-only inputs supplied by the host application. The engine never derives
/// these itself; it only reacts to their changes.
#[derive(Clone, Debug, Default)]
pub struct AmbientState {
    pub active_thread_id: Option<ThreadId>,
    pub active_turn_id: Option<String>,
    pub active_workspace_id: Option<WorkspaceId>,
    pub thread_statuses: HashMap<ThreadId, ThreadStatus>,
    pub thread_workspaces: HashMap<ThreadId, WorkspaceId>,
    pub workspaces: HashMap<WorkspaceId, Workspace>,
    pub steer_enabled: bool,
    pub apps_enabled: bool,
    pub run_settings: RunSettings,
}

impl AmbientState {
    pub fn is_active_thread(&self, thread_id: &ThreadId) -> bool {
        self.active_thread_id.as_ref() == Some(thread_id)
    }

    pub fn workspace(&self, workspace_id: &WorkspaceId) -> Option<&Workspace> {
        self.workspaces.get(workspace_id)
    }
}
