use outbox_backend::QueueStoreService;
use outbox_domain::{
    MessageTransport, SendOptions, ThreadId, ThreadStatus, Workspace, WorkspaceId,
};
use outbox_engine::{Engine, EngineConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingTransport {
    calls: Mutex<Vec<String>>,
}

impl RecordingTransport {
    fn record(&self, call: String) -> Result<(), String> {
        self.calls.lock().unwrap().push(call);
        Ok(())
    }

    fn has(&self, call: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == call)
    }
}

impl MessageTransport for RecordingTransport {
    fn connect_workspace(&self, workspace: &Workspace) -> Result<(), String> {
        self.record(format!("connect {}", workspace.id))
    }

    fn send_user_message(
        &self,
        text: &str,
        _images: &[String],
        _options: Option<&SendOptions>,
    ) -> Result<(), String> {
        self.record(format!("send {text}"))
    }

    fn send_user_message_to_thread(
        &self,
        _workspace: &Workspace,
        thread_id: &ThreadId,
        text: &str,
        _images: &[String],
        _options: Option<&SendOptions>,
    ) -> Result<(), String> {
        self.record(format!("send_to {thread_id} {text}"))
    }

    fn start_fork(&self, text: &str) -> Result<(), String> {
        self.record(text.to_owned())
    }

    fn start_review(&self, text: &str) -> Result<(), String> {
        self.record(text.to_owned())
    }

    fn start_resume(&self, text: &str) -> Result<(), String> {
        self.record(text.to_owned())
    }

    fn start_compact(&self, text: &str) -> Result<(), String> {
        self.record(text.to_owned())
    }

    fn start_apps(&self, text: &str) -> Result<(), String> {
        self.record(text.to_owned())
    }

    fn start_mcp(&self, text: &str) -> Result<(), String> {
        self.record(text.to_owned())
    }

    fn start_status(&self, text: &str) -> Result<(), String> {
        self.record(text.to_owned())
    }

    fn start_thread_for_workspace(
        &self,
        _workspace_id: &WorkspaceId,
    ) -> Result<Option<ThreadId>, String> {
        Ok(None)
    }

    fn clear_active_images(&self) {}
}

fn config() -> EngineConfig {
    EngineConfig {
        persist_debounce: Duration::from_millis(5),
        staleness_tick: Duration::from_secs(3600),
        ..EngineConfig::default()
    }
}

fn w1() -> Workspace {
    Workspace {
        id: WorkspaceId::new("w1"),
        name: "w1".to_owned(),
        connected: true,
    }
}

#[tokio::test]
async fn queued_messages_survive_restart_and_dispatch_once_resolved() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("outbox.db");
    let (t1, t2) = (ThreadId::new("t1"), ThreadId::new("t2"));

    {
        let transport = Arc::new(RecordingTransport::default());
        let store = QueueStoreService::open(db_path.clone()).unwrap();
        let (handle, _) = Engine::start(transport.clone(), store, config());

        handle.upsert_workspace(w1()).await.unwrap();
        handle
            .set_active_thread(Some(t1.clone()), Some(WorkspaceId::new("w1")))
            .await
            .unwrap();
        handle
            .update_thread_status(
                t1.clone(),
                ThreadStatus {
                    is_processing: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        handle.queue_message("alpha", Vec::new()).await.unwrap().unwrap();
        handle
            .queue_message_for_thread(t2.clone(), "bravo", Vec::new())
            .await
            .unwrap()
            .unwrap();
        handle.shutdown().await.unwrap();
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    let transport = Arc::new(RecordingTransport::default());
    let store = QueueStoreService::open(db_path).unwrap();
    let (handle, _) = Engine::start(transport.clone(), store, config());

    let queued = handle.queued_by_thread().await.unwrap();
    assert_eq!(queued[&t1][0].text, "alpha");
    assert_eq!(
        queued[&t1][0].workspace_id,
        Some(WorkspaceId::new("w1"))
    );
    assert_eq!(queued[&t2][0].text, "bravo");
    assert_eq!(handle.legacy_queue_message_count().await.unwrap(), 1);

    handle.upsert_workspace(w1()).await.unwrap();
    handle
        .observe_thread_workspace(t2.clone(), Some(WorkspaceId::new("w1")))
        .await
        .unwrap();
    assert_eq!(handle.legacy_queue_message_count().await.unwrap(), 0);
    handle
        .set_active_thread(Some(t1.clone()), Some(WorkspaceId::new("w1")))
        .await
        .unwrap();

    for _ in 0..300 {
        if transport.has("send alpha") && transport.has("send_to t2 bravo") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(transport.has("send alpha"), "alpha was not dispatched");
    assert!(transport.has("send_to t2 bravo"), "bravo was not dispatched");
    assert!(!transport.calls.lock().unwrap().iter().any(|c| c.starts_with("connect")));

    handle.shutdown().await.unwrap();
}
