use crate::{QueuedMessage, ThreadId, WorkspaceId};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet, VecDeque};

pub const QUEUE_STORAGE_KEY: &str = "queued_messages_by_thread";

/// Per-thread FIFO lists of pending messages. Threads whose list becomes empty
/// are dropped from the map.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct QueueStore {
    threads: BTreeMap<ThreadId, VecDeque<QueuedMessage>>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, thread_id: &ThreadId, message: QueuedMessage) {
        self.threads
            .entry(thread_id.clone())
            .or_default()
            .push_back(message);
    }

    pub fn dequeue_head(&mut self, thread_id: &ThreadId) -> Option<QueuedMessage> {
        let queue = self.threads.get_mut(thread_id)?;
        let head = queue.pop_front();
        if queue.is_empty() {
            self.threads.remove(thread_id);
        }
        head
    }

    pub fn prepend(&mut self, thread_id: &ThreadId, message: QueuedMessage) {
        self.threads
            .entry(thread_id.clone())
            .or_default()
            .push_front(message);
    }

    pub fn remove(&mut self, thread_id: &ThreadId, message_id: &str) -> Option<QueuedMessage> {
        let queue = self.threads.get_mut(thread_id)?;
        let pos = queue.iter().position(|m| m.id == message_id)?;
        let removed = queue.remove(pos);
        if queue.is_empty() {
            self.threads.remove(thread_id);
        }
        removed
    }

    pub fn clear(&mut self, thread_id: &ThreadId) -> Vec<QueuedMessage> {
        self.threads
            .remove(thread_id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn head(&self, thread_id: &ThreadId) -> Option<&QueuedMessage> {
        self.threads.get(thread_id).and_then(|q| q.front())
    }

    pub fn get(&self, thread_id: &ThreadId, message_id: &str) -> Option<&QueuedMessage> {
        self.threads
            .get(thread_id)
            .and_then(|q| q.iter().find(|m| m.id == message_id))
    }

    pub fn messages(&self, thread_id: &ThreadId) -> impl Iterator<Item = &QueuedMessage> {
        self.threads.get(thread_id).into_iter().flatten()
    }

    pub fn len(&self, thread_id: &ThreadId) -> usize {
        self.threads.get(thread_id).map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn thread_ids(&self) -> impl Iterator<Item = &ThreadId> {
        self.threads.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ThreadId, &VecDeque<QueuedMessage>)> {
        self.threads.iter()
    }

    pub(crate) fn messages_mut(
        &mut self,
        thread_id: &ThreadId,
    ) -> Option<&mut VecDeque<QueuedMessage>> {
        self.threads.get_mut(thread_id)
    }

    pub fn tagged_workspace_id(&self, thread_id: &ThreadId) -> Option<&WorkspaceId> {
        self.messages(thread_id)
            .find_map(|message| message.workspace_id.as_ref())
    }

    pub fn to_map(&self) -> BTreeMap<ThreadId, Vec<QueuedMessage>> {
        self.threads
            .iter()
            .map(|(thread_id, queue)| (thread_id.clone(), queue.iter().cloned().collect()))
            .collect()
    }

    /// Puts `loaded` in front of what is already queued, skipping messages whose
    /// id is already present.
    pub fn merge_loaded(&mut self, loaded: QueueStore) {
        for (thread_id, loaded_queue) in loaded.threads {
            let current = self.threads.remove(&thread_id).unwrap_or_default();
            let mut seen = HashSet::new();
            let merged = loaded_queue
                .into_iter()
                .chain(current)
                .filter(|message| seen.insert(message.id.clone()))
                .collect::<VecDeque<_>>();
            self.threads.insert(thread_id, merged);
        }
    }

    pub fn from_persisted_json(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => sanitize_persisted_queue(&value),
            Err(_) => Self::new(),
        }
    }
}

/// Encodes a thread → messages map for storage. An empty map encodes to `None`,
/// meaning the storage key should be removed.
pub fn encode_persisted_queue(
    map: &BTreeMap<ThreadId, Vec<QueuedMessage>>,
) -> serde_json::Result<Option<String>> {
    let non_empty = map
        .iter()
        .filter(|(_, messages)| !messages.is_empty())
        .collect::<BTreeMap<_, _>>();
    if non_empty.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(&non_empty).map(Some)
}

/// Rebuilds a queue from untrusted persisted JSON, dropping every entry that
/// fails the shape check instead of rejecting the whole payload.
pub fn sanitize_persisted_queue(value: &Value) -> QueueStore {
    let mut store = QueueStore::new();
    let Some(threads) = value.as_object() else {
        return store;
    };

    for (thread_id, entries) in threads {
        if thread_id.trim().is_empty() {
            continue;
        }
        let Some(entries) = entries.as_array() else {
            continue;
        };
        let thread_id = ThreadId::new(thread_id.clone());
        for entry in entries {
            if let Some(message) = sanitize_message(entry) {
                store.enqueue(&thread_id, message);
            }
        }
    }
    store
}

fn sanitize_message(value: &Value) -> Option<QueuedMessage> {
    let obj = value.as_object()?;

    let id = obj.get("id")?.as_str()?.trim();
    if id.is_empty() {
        return None;
    }
    let text = obj.get("text")?.as_str()?;
    let created_at = timestamp(obj.get("createdAt")?)?;

    let images = match obj.get("images") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(ToOwned::to_owned))
            .collect::<Option<Vec<_>>>()?,
        Some(_) => return None,
    };

    let workspace_id = optional_string(obj, "workspaceId")?
        .filter(|id| !id.trim().is_empty())
        .map(WorkspaceId::new);

    Some(QueuedMessage {
        id: id.to_owned(),
        text: text.to_owned(),
        created_at,
        images,
        workspace_id,
        model: optional_string(obj, "model")?,
        effort: optional_string(obj, "effort")?,
        collaboration_mode: optional_string(obj, "collaborationMode")?,
    })
}

fn timestamp(value: &Value) -> Option<u64> {
    if let Some(ms) = value.as_u64() {
        return Some(ms);
    }
    let ms = value.as_f64()?;
    if ms.is_finite() && ms >= 0.0 {
        Some(ms as u64)
    } else {
        None
    }
}

/// Outer `None` means the field has the wrong type.
fn optional_string(obj: &Map<String, Value>, key: &str) -> Option<Option<String>> {
    match obj.get(key) {
        None | Some(Value::Null) => Some(None),
        Some(Value::String(s)) => Some(Some(s.clone())),
        Some(_) => None,
    }
}
