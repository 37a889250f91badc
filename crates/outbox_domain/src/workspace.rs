use crate::{AmbientState, QueueStore, ThreadId, WorkspaceId};
use std::collections::HashMap;

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub connected: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WorkspaceResolution {
    pub workspace: Option<Workspace>,
    pub workspace_id: Option<WorkspaceId>,
    pub resolved: bool,
}

#[derive(Clone, Debug)]
struct CachedWorkspace {
    workspace_id: WorkspaceId,
    touched: u64,
}

/// Maps threads to the workspace a send must go through. Remembers the last
/// mapping observed for each thread so a thread keeps resolving after the live
/// mapping disappears; the memory is bounded and evicts the least recently
/// observed thread first.
#[derive(Clone, Debug)]
pub struct WorkspaceResolver {
    capacity: usize,
    clock: u64,
    last_known: HashMap<ThreadId, CachedWorkspace>,
}

impl Default for WorkspaceResolver {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl WorkspaceResolver {
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            clock: 0,
            last_known: HashMap::new(),
        }
    }

    pub fn observe(&mut self, thread_id: &ThreadId, workspace_id: &WorkspaceId) {
        self.clock = self.clock.saturating_add(1);
        self.last_known.insert(
            thread_id.clone(),
            CachedWorkspace {
                workspace_id: workspace_id.clone(),
                touched: self.clock,
            },
        );

        while self.last_known.len() > self.capacity {
            let Some(oldest) = self
                .last_known
                .iter()
                .min_by_key(|(_, cached)| cached.touched)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            self.last_known.remove(&oldest);
        }
    }

    pub fn last_known(&self, thread_id: &ThreadId) -> Option<&WorkspaceId> {
        self.last_known.get(thread_id).map(|c| &c.workspace_id)
    }

    pub fn len(&self) -> usize {
        self.last_known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_known.is_empty()
    }

    /// Best-known workspace id for a thread: active workspace for the active
    /// thread, then the live mapping, then the cached mapping, then any tag on
    /// a message queued for that thread.
    pub fn workspace_id_for(
        &self,
        thread_id: &ThreadId,
        ambient: &AmbientState,
        queue: &QueueStore,
    ) -> Option<WorkspaceId> {
        if ambient.is_active_thread(thread_id)
            && let Some(active) = &ambient.active_workspace_id
        {
            return Some(active.clone());
        }
        ambient
            .thread_workspaces
            .get(thread_id)
            .or_else(|| self.last_known(thread_id))
            .or_else(|| queue.tagged_workspace_id(thread_id))
            .cloned()
    }

    pub fn resolve(
        &self,
        thread_id: &ThreadId,
        ambient: &AmbientState,
        queue: &QueueStore,
    ) -> WorkspaceResolution {
        let workspace_id = self.workspace_id_for(thread_id, ambient, queue);
        let workspace = workspace_id
            .as_ref()
            .and_then(|id| ambient.workspace(id))
            .cloned();
        WorkspaceResolution {
            resolved: workspace.is_some(),
            workspace,
            workspace_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueuedMessage;

    fn workspace(id: &str) -> Workspace {
        Workspace {
            id: WorkspaceId::new(id),
            name: id.to_owned(),
            connected: true,
        }
    }

    fn ambient_with_workspaces(ids: &[&str]) -> AmbientState {
        let mut ambient = AmbientState::default();
        for id in ids {
            ambient.workspaces.insert(WorkspaceId::new(*id), workspace(id));
        }
        ambient
    }

    #[test]
    fn active_thread_uses_active_workspace() {
        let mut ambient = ambient_with_workspaces(&["w1", "w2"]);
        let t1 = ThreadId::new("t1");
        ambient.active_thread_id = Some(t1.clone());
        ambient.active_workspace_id = Some(WorkspaceId::new("w1"));
        ambient
            .thread_workspaces
            .insert(t1.clone(), WorkspaceId::new("w2"));

        let resolver = WorkspaceResolver::default();
        let resolution = resolver.resolve(&t1, &ambient, &QueueStore::new());
        assert!(resolution.resolved);
        assert_eq!(resolution.workspace_id, Some(WorkspaceId::new("w1")));
    }

    #[test]
    fn live_mapping_beats_cached_mapping() {
        let mut ambient = ambient_with_workspaces(&["w1", "w2"]);
        let t2 = ThreadId::new("t2");
        let mut resolver = WorkspaceResolver::default();
        resolver.observe(&t2, &WorkspaceId::new("w1"));
        ambient
            .thread_workspaces
            .insert(t2.clone(), WorkspaceId::new("w2"));

        let resolution = resolver.resolve(&t2, &ambient, &QueueStore::new());
        assert_eq!(resolution.workspace_id, Some(WorkspaceId::new("w2")));
    }

    #[test]
    fn cached_mapping_survives_live_mapping_removal() {
        let ambient = ambient_with_workspaces(&["w1"]);
        let t2 = ThreadId::new("t2");
        let mut resolver = WorkspaceResolver::default();
        resolver.observe(&t2, &WorkspaceId::new("w1"));

        let resolution = resolver.resolve(&t2, &ambient, &QueueStore::new());
        assert!(resolution.resolved);
        assert_eq!(resolution.workspace.unwrap().id, WorkspaceId::new("w1"));
    }

    #[test]
    fn queued_message_tag_is_last_resort() {
        let ambient = ambient_with_workspaces(&["w3"]);
        let t3 = ThreadId::new("t3");
        let mut queue = QueueStore::new();
        queue.enqueue(
            &t3,
            QueuedMessage {
                id: "m".to_owned(),
                text: "hi".to_owned(),
                created_at: 0,
                images: Vec::new(),
                workspace_id: Some(WorkspaceId::new("w3")),
                model: None,
                effort: None,
                collaboration_mode: None,
            },
        );

        let resolution = WorkspaceResolver::default().resolve(&t3, &ambient, &queue);
        assert!(resolution.resolved);
        assert_eq!(resolution.workspace_id, Some(WorkspaceId::new("w3")));
    }

    #[test]
    fn known_id_without_workspace_object_is_unresolved() {
        let mut ambient = AmbientState::default();
        let t4 = ThreadId::new("t4");
        ambient
            .thread_workspaces
            .insert(t4.clone(), WorkspaceId::new("gone"));

        let resolution = WorkspaceResolver::default().resolve(&t4, &ambient, &QueueStore::new());
        assert!(!resolution.resolved);
        assert_eq!(resolution.workspace_id, Some(WorkspaceId::new("gone")));
        assert!(resolution.workspace.is_none());
    }

    #[test]
    fn cache_evicts_least_recently_observed() {
        let mut resolver = WorkspaceResolver::new(2);
        let (a, b, c) = (ThreadId::new("a"), ThreadId::new("b"), ThreadId::new("c"));
        let w = WorkspaceId::new("w");
        resolver.observe(&a, &w);
        resolver.observe(&b, &w);
        resolver.observe(&a, &w);
        resolver.observe(&c, &w);

        assert_eq!(resolver.len(), 2);
        assert!(resolver.last_known(&a).is_some());
        assert!(resolver.last_known(&b).is_none());
        assert!(resolver.last_known(&c).is_some());
    }
}
