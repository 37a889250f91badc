use anyhow::{Context as _, anyhow};
use outbox_domain::{
    Action, DispatchRequest, DispatchRoute, DispatchState, Effect, MessageTransport,
    MigrationReport, QueueHealthEntry, QueuePersistence, QueueStore, QueuedMessage, RunSettings,
    SlashCommand, ThreadId, ThreadStatus, Workspace, WorkspaceId,
};
use rand::{Rng as _, rngs::OsRng};
use std::collections::{BTreeMap, VecDeque};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::EngineConfig;

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    QueueChanged { rev: u64 },
    PersistenceFailed { message: String },
}

#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> anyhow::Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(command(tx))
            .await
            .context("engine unavailable")?;
        rx.await.context("engine stopped")
    }

    pub async fn current_rev(&self) -> anyhow::Result<u64> {
        self.request(|reply| EngineCommand::GetRev { reply }).await
    }

    /// Applies one action and returns the revision after it settled.
    pub async fn apply(&self, action: Action) -> anyhow::Result<u64> {
        self.request(|reply| EngineCommand::ApplyAction {
            action: Box::new(action),
            reply,
        })
        .await
    }

    /// Composer send: steers into a busy active thread when allowed, queues
    /// otherwise. Returns the generated message id, or `None` when nothing
    /// was accepted.
    pub async fn handle_send(
        &self,
        text: impl Into<String>,
        images: Vec<String>,
    ) -> anyhow::Result<Option<String>> {
        let text = text.into();
        self.request(|reply| EngineCommand::QueueMessage {
            thread_id: None,
            text,
            images,
            steer_when_busy: true,
            reply,
        })
        .await
    }

    /// Queues for the active thread.
    pub async fn queue_message(
        &self,
        text: impl Into<String>,
        images: Vec<String>,
    ) -> anyhow::Result<Option<String>> {
        let text = text.into();
        self.request(|reply| EngineCommand::QueueMessage {
            thread_id: None,
            text,
            images,
            steer_when_busy: false,
            reply,
        })
        .await
    }

    pub async fn queue_message_for_thread(
        &self,
        thread_id: ThreadId,
        text: impl Into<String>,
        images: Vec<String>,
    ) -> anyhow::Result<Option<String>> {
        let text = text.into();
        self.request(|reply| EngineCommand::QueueMessage {
            thread_id: Some(thread_id),
            text,
            images,
            steer_when_busy: false,
            reply,
        })
        .await
    }

    pub async fn remove_queued_message(
        &self,
        thread_id: ThreadId,
        message_id: impl Into<String>,
    ) -> anyhow::Result<u64> {
        self.apply(Action::RemoveQueuedMessage {
            thread_id,
            message_id: message_id.into(),
        })
        .await
    }

    pub async fn update_queued_message(
        &self,
        thread_id: ThreadId,
        message_id: impl Into<String>,
        text: impl Into<String>,
    ) -> anyhow::Result<u64> {
        self.apply(Action::UpdateQueuedMessage {
            thread_id,
            message_id: message_id.into(),
            text: text.into(),
        })
        .await
    }

    /// Returns true once the message has left the queue for the transport. A
    /// rejected steer puts it back at the head of the queue.
    pub async fn steer_queued_message(
        &self,
        thread_id: ThreadId,
        message_id: impl Into<String>,
    ) -> anyhow::Result<bool> {
        let message_id = message_id.into();
        self.request(|reply| EngineCommand::SteerQueuedMessage {
            thread_id,
            message_id,
            reply,
        })
        .await
    }

    pub async fn retry_thread_queue(&self, thread_id: ThreadId) -> anyhow::Result<u64> {
        self.apply(Action::RetryThreadQueue { thread_id }).await
    }

    pub async fn clear_thread_queue(&self, thread_id: ThreadId) -> anyhow::Result<u64> {
        self.apply(Action::ClearThreadQueue { thread_id }).await
    }

    pub async fn migrate_legacy_queue_workspace_ids(&self) -> anyhow::Result<MigrationReport> {
        self.request(|reply| EngineCommand::MigrateLegacy { reply })
            .await
    }

    pub async fn active_queue(&self) -> anyhow::Result<Vec<QueuedMessage>> {
        self.request(|reply| EngineCommand::GetActiveQueue { reply })
            .await
    }

    pub async fn queued_by_thread(
        &self,
    ) -> anyhow::Result<BTreeMap<ThreadId, Vec<QueuedMessage>>> {
        self.request(|reply| EngineCommand::GetQueuedByThread { reply })
            .await
    }

    pub async fn queue_health_entries(&self) -> anyhow::Result<Vec<QueueHealthEntry>> {
        self.request(|reply| EngineCommand::GetQueueHealth { reply })
            .await
    }

    pub async fn legacy_queue_message_count(&self) -> anyhow::Result<usize> {
        self.request(|reply| EngineCommand::GetLegacyCount { reply })
            .await
    }

    pub async fn set_active_thread(
        &self,
        thread_id: Option<ThreadId>,
        workspace_id: Option<WorkspaceId>,
    ) -> anyhow::Result<u64> {
        self.apply(Action::ActiveThreadChanged {
            thread_id,
            workspace_id,
        })
        .await
    }

    pub async fn set_active_turn(&self, turn_id: Option<String>) -> anyhow::Result<u64> {
        self.apply(Action::ActiveTurnChanged { turn_id }).await
    }

    pub async fn update_thread_status(
        &self,
        thread_id: ThreadId,
        status: ThreadStatus,
    ) -> anyhow::Result<u64> {
        self.apply(Action::ThreadStatusUpdated { thread_id, status })
            .await
    }

    pub async fn observe_thread_workspace(
        &self,
        thread_id: ThreadId,
        workspace_id: Option<WorkspaceId>,
    ) -> anyhow::Result<u64> {
        self.apply(Action::ThreadWorkspaceObserved {
            thread_id,
            workspace_id,
        })
        .await
    }

    pub async fn upsert_workspace(&self, workspace: Workspace) -> anyhow::Result<u64> {
        self.apply(Action::WorkspaceUpdated { workspace }).await
    }

    pub async fn set_flags(&self, steer_enabled: bool, apps_enabled: bool) -> anyhow::Result<u64> {
        self.apply(Action::FlagsChanged {
            steer_enabled,
            apps_enabled,
        })
        .await
    }

    pub async fn set_run_settings(&self, settings: RunSettings) -> anyhow::Result<u64> {
        self.apply(Action::RunSettingsChanged { settings }).await
    }

    /// Writes the current queue snapshot now instead of waiting for the
    /// debounce.
    pub async fn flush(&self) -> anyhow::Result<()> {
        self.request(|reply| EngineCommand::Flush { reply })
            .await?
            .map_err(|message| anyhow!(message))
    }

    /// Flushes and stops the engine. Later calls on any handle fail.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.request(|reply| EngineCommand::Shutdown { reply })
            .await?
            .map_err(|message| anyhow!(message))
    }
}

pub enum EngineCommand {
    GetRev {
        reply: oneshot::Sender<u64>,
    },
    ApplyAction {
        action: Box<Action>,
        reply: oneshot::Sender<u64>,
    },
    DispatchAction {
        action: Box<Action>,
    },
    QueueMessage {
        thread_id: Option<ThreadId>,
        text: String,
        images: Vec<String>,
        steer_when_busy: bool,
        reply: oneshot::Sender<Option<String>>,
    },
    SteerQueuedMessage {
        thread_id: ThreadId,
        message_id: String,
        reply: oneshot::Sender<bool>,
    },
    MigrateLegacy {
        reply: oneshot::Sender<MigrationReport>,
    },
    GetActiveQueue {
        reply: oneshot::Sender<Vec<QueuedMessage>>,
    },
    GetQueuedByThread {
        reply: oneshot::Sender<BTreeMap<ThreadId, Vec<QueuedMessage>>>,
    },
    GetQueueHealth {
        reply: oneshot::Sender<Vec<QueueHealthEntry>>,
    },
    GetLegacyCount {
        reply: oneshot::Sender<usize>,
    },
    DispatchFinished {
        thread_id: ThreadId,
        generation: u64,
        result: Result<(), String>,
    },
    Tick,
    FlushQueue,
    Flush {
        reply: oneshot::Sender<Result<(), String>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<(), String>>,
    },
}

pub struct Engine {
    state: DispatchState,
    rev: u64,
    config: EngineConfig,
    transport: Arc<dyn MessageTransport>,
    persistence: Arc<dyn QueuePersistence>,
    events: broadcast::Sender<EngineEvent>,
    tx: mpsc::Sender<EngineCommand>,
    save_pending: bool,
}

impl Engine {
    pub fn start(
        transport: Arc<dyn MessageTransport>,
        persistence: Arc<dyn QueuePersistence>,
        config: EngineConfig,
    ) -> (EngineHandle, broadcast::Sender<EngineEvent>) {
        let (tx, mut rx) = mpsc::channel::<EngineCommand>(256);
        let (events, _) = broadcast::channel::<EngineEvent>(256);

        let mut engine = Self {
            state: DispatchState::new(config.policy, config.workspace_cache_capacity),
            rev: 0,
            config: config.clone(),
            transport,
            persistence,
            events: events.clone(),
            tx: tx.clone(),
            save_pending: false,
        };

        let tick_tx = tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.staleness_tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tick_tx.send(EngineCommand::Tick).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            engine.bootstrap().await;
            while let Some(cmd) = rx.recv().await {
                if engine.handle(cmd).await.is_break() {
                    break;
                }
            }
            tracing::debug!("outbox engine stopped");
        });

        (EngineHandle { tx }, events)
    }

    async fn bootstrap(&mut self) {
        let persistence = self.persistence.clone();
        let loaded = tokio::task::spawn_blocking(move || persistence.load_queue())
            .await
            .ok()
            .unwrap_or_else(|| Err("failed to join load queue task".to_owned()));

        let raw = match loaded {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(message) => {
                tracing::warn!(error = %message, "failed to load queued messages");
                let _ = self.events.send(EngineEvent::PersistenceFailed { message });
                return;
            }
        };

        let queue = QueueStore::from_persisted_json(&raw);
        tracing::info!(
            threads = queue.thread_ids().count(),
            "restored queued messages"
        );
        self.process_action_queue(Action::QueueLoaded { queue })
            .await;
    }

    async fn handle(&mut self, cmd: EngineCommand) -> ControlFlow<()> {
        match cmd {
            EngineCommand::GetRev { reply } => {
                let _ = reply.send(self.rev);
            }
            EngineCommand::ApplyAction { action, reply } => {
                self.process_action_queue(*action).await;
                let _ = reply.send(self.rev);
            }
            EngineCommand::DispatchAction { action } => {
                self.process_action_queue(*action).await;
            }
            EngineCommand::QueueMessage {
                thread_id,
                text,
                images,
                steer_when_busy,
                reply,
            } => {
                let message_id = generate_message_id();
                let target = thread_id
                    .clone()
                    .or_else(|| self.state.ambient().active_thread_id.clone());
                let action = if steer_when_busy && thread_id.is_none() {
                    Action::SendRequested {
                        message_id: message_id.clone(),
                        text,
                        images,
                    }
                } else {
                    Action::QueueMessage {
                        thread_id,
                        message_id: message_id.clone(),
                        text,
                        images,
                    }
                };
                let effects = self.process_action_queue(action).await;
                let accepted = self.message_accepted(target.as_ref(), &message_id, &effects);
                let _ = reply.send(accepted.then_some(message_id));
            }
            EngineCommand::SteerQueuedMessage {
                thread_id,
                message_id,
                reply,
            } => {
                let effects = self
                    .process_action_queue(Action::SteerQueuedMessage {
                        thread_id,
                        message_id: message_id.clone(),
                    })
                    .await;
                let steered = effects.iter().any(|effect| {
                    matches!(effect, Effect::SteerMessage { message, .. } if message.id == message_id)
                });
                let _ = reply.send(steered);
            }
            EngineCommand::MigrateLegacy { reply } => {
                let effects = self
                    .process_action_queue(Action::MigrateLegacyWorkspaceIds)
                    .await;
                let report = effects
                    .iter()
                    .find_map(|effect| match effect {
                        Effect::LegacyMigrationFinished { report } => Some(*report),
                        _ => None,
                    })
                    .unwrap_or_default();
                let _ = reply.send(report);
            }
            EngineCommand::GetActiveQueue { reply } => {
                let _ = reply.send(self.state.active_queue());
            }
            EngineCommand::GetQueuedByThread { reply } => {
                let _ = reply.send(self.state.queued_by_thread());
            }
            EngineCommand::GetQueueHealth { reply } => {
                let _ = reply.send(self.state.queue_health_entries(now_unix_ms()));
            }
            EngineCommand::GetLegacyCount { reply } => {
                let _ = reply.send(self.state.legacy_queue_message_count());
            }
            EngineCommand::DispatchFinished {
                thread_id,
                generation,
                result,
            } => {
                let action = match result {
                    Ok(()) => Action::DispatchSucceeded {
                        thread_id,
                        generation,
                    },
                    Err(error) => {
                        tracing::warn!(thread_id = %thread_id, generation, error = %error, "dispatch failed");
                        Action::DispatchFailed {
                            thread_id,
                            generation,
                            error,
                        }
                    }
                };
                self.process_action_queue(action).await;
            }
            EngineCommand::Tick => {
                self.process_action_queue(Action::Tick).await;
            }
            EngineCommand::FlushQueue => {
                if self.save_pending {
                    let _ = self.flush_queue().await;
                }
            }
            EngineCommand::Flush { reply } => {
                let _ = reply.send(self.flush_queue().await);
            }
            EngineCommand::Shutdown { reply } => {
                let _ = reply.send(self.flush_queue().await);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn message_accepted(
        &self,
        thread_id: Option<&ThreadId>,
        message_id: &str,
        effects: &[Effect],
    ) -> bool {
        let handed_off = effects.iter().any(|effect| match effect {
            Effect::SteerMessage { message, .. } => message.id == message_id,
            Effect::Dispatch(request) => request.message.id == message_id,
            _ => false,
        });
        handed_off
            || thread_id.is_some_and(|thread_id| {
                self.state.queue().get(thread_id, message_id).is_some()
                    || self
                        .state
                        .in_flight(thread_id)
                        .is_some_and(|in_flight| in_flight.message.id == message_id)
            })
    }

    /// Runs the action and every follow-up it produces. Returns the effects
    /// observed along the way.
    async fn process_action_queue(&mut self, initial: Action) -> Vec<Effect> {
        let mut actions = VecDeque::from([initial]);
        let mut observed = Vec::new();

        while let Some(action) = actions.pop_front() {
            let is_tick = matches!(action, Action::Tick);
            let new_effects = self.state.apply(action, now_unix_ms());
            if !is_tick || !new_effects.is_empty() {
                self.rev = self.rev.saturating_add(1);
                let _ = self.events.send(EngineEvent::QueueChanged { rev: self.rev });
            }

            for effect in new_effects {
                observed.push(effect.clone());
                match self.run_effect(effect).await {
                    Ok(mut followups) => actions.append(&mut followups),
                    Err(err) => {
                        tracing::error!(error = %err, "effect failed");
                    }
                }
            }
        }
        observed
    }

    async fn run_effect(&mut self, effect: Effect) -> anyhow::Result<VecDeque<Action>> {
        match effect {
            Effect::SaveQueue => {
                self.schedule_save();
                Ok(VecDeque::new())
            }
            Effect::Dispatch(request) => {
                let thread_id = request.thread_id.clone();
                let generation = request.generation;
                tracing::debug!(
                    thread_id = %thread_id,
                    generation,
                    message_id = %request.message.id,
                    "dispatching queued message"
                );

                let transport = self.transport.clone();
                let tx = self.tx.clone();
                let spawned = std::thread::Builder::new()
                    .name("outbox-dispatch".to_owned())
                    .spawn(move || {
                        let result = perform_dispatch(transport.as_ref(), &request);
                        let _ = tx.blocking_send(EngineCommand::DispatchFinished {
                            thread_id: request.thread_id,
                            generation: request.generation,
                            result,
                        });
                    });
                match spawned {
                    Ok(_) => Ok(VecDeque::new()),
                    Err(err) => Ok(VecDeque::from([Action::DispatchFailed {
                        thread_id,
                        generation,
                        error: format!("failed to spawn dispatch thread: {err}"),
                    }])),
                }
            }
            Effect::SteerMessage {
                thread_id,
                message,
                options,
                clear_active_images,
            } => {
                let fallback = Action::SteerFailed {
                    thread_id: thread_id.clone(),
                    message: message.clone(),
                    error: "failed to spawn steer thread".to_owned(),
                };

                let transport = self.transport.clone();
                let tx = self.tx.clone();
                let spawned = std::thread::Builder::new()
                    .name("outbox-steer".to_owned())
                    .spawn(move || {
                        match transport.send_user_message(
                            &message.text,
                            &message.images,
                            Some(&options),
                        ) {
                            Ok(()) => {
                                if clear_active_images {
                                    transport.clear_active_images();
                                }
                            }
                            Err(error) => {
                                tracing::warn!(thread_id = %thread_id, error = %error, "steer failed");
                                let _ = tx.blocking_send(EngineCommand::DispatchAction {
                                    action: Box::new(Action::SteerFailed {
                                        thread_id,
                                        message,
                                        error,
                                    }),
                                });
                            }
                        }
                    });
                match spawned {
                    Ok(_) => Ok(VecDeque::new()),
                    Err(_) => Ok(VecDeque::from([fallback])),
                }
            }
            Effect::RecoverStaleThread { thread_id } => {
                tracing::info!(thread_id = %thread_id, "recovering stale thread");
                self.transport.on_recover_stale_thread(&thread_id);
                Ok(VecDeque::new())
            }
            Effect::LegacyMigrationFinished { report } => {
                tracing::info!(
                    migrated_messages = report.migrated_messages,
                    migrated_threads = report.migrated_threads,
                    "legacy queue migration finished"
                );
                Ok(VecDeque::new())
            }
        }
    }

    fn schedule_save(&mut self) {
        if self.save_pending {
            return;
        }
        self.save_pending = true;

        let tx = self.tx.clone();
        let delay = self.config.persist_debounce;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(EngineCommand::FlushQueue).await;
        });
    }

    async fn flush_queue(&mut self) -> Result<(), String> {
        self.save_pending = false;
        let saved = match self.state.persisted_queue_json() {
            Ok(payload) => {
                let persistence = self.persistence.clone();
                tokio::task::spawn_blocking(move || persistence.save_queue(payload))
                    .await
                    .ok()
                    .unwrap_or_else(|| Err("failed to join save queue task".to_owned()))
            }
            Err(err) => Err(format!("failed to encode queued messages: {err}")),
        };

        if let Err(message) = &saved {
            tracing::warn!(error = %message, "failed to persist queued messages");
            let _ = self.events.send(EngineEvent::PersistenceFailed {
                message: message.clone(),
            });
        }
        saved
    }
}

/// Performs one dispatch attempt against the host. Blocks until every host
/// call has returned.
pub fn perform_dispatch(
    transport: &dyn MessageTransport,
    request: &DispatchRequest,
) -> Result<(), String> {
    if let Some(workspace) = &request.connect {
        transport
            .connect_workspace(workspace)
            .map_err(|err| format!("failed to connect workspace {}: {err}", workspace.name))?;
    }

    match &request.route {
        DispatchRoute::Command { command, text } => run_command(transport, *command, text)?,
        DispatchRoute::NewThread {
            workspace,
            follow_up,
            options,
        } => {
            let created = transport.start_thread_for_workspace(&workspace.id)?;
            if let Some(text) = follow_up {
                let Some(thread_id) = created else {
                    return Err("new thread was not created".to_owned());
                };
                transport.send_user_message_to_thread(
                    workspace,
                    &thread_id,
                    text,
                    &[],
                    Some(options),
                )?;
            }
        }
        DispatchRoute::ActiveThread {
            text,
            images,
            options,
        } => transport.send_user_message(text, images, options.as_ref())?,
        DispatchRoute::OtherThread {
            workspace,
            text,
            images,
            options,
        } => transport.send_user_message_to_thread(
            workspace,
            &request.thread_id,
            text,
            images,
            options.as_ref(),
        )?,
    }

    if request.clear_active_images {
        transport.clear_active_images();
    }
    Ok(())
}

fn run_command(
    transport: &dyn MessageTransport,
    command: SlashCommand,
    text: &str,
) -> Result<(), String> {
    match command {
        SlashCommand::Apps => transport.start_apps(text),
        SlashCommand::Fork => transport.start_fork(text),
        SlashCommand::Mcp => transport.start_mcp(text),
        SlashCommand::Review => transport.start_review(text),
        SlashCommand::Compact => transport.start_compact(text),
        SlashCommand::Resume => transport.start_resume(text),
        SlashCommand::Status => transport.start_status(text),
        SlashCommand::New => Err(format!("no command handler for {}", command.as_str())),
    }
}

pub(crate) fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn generate_message_id() -> String {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0);
    let rand: u64 = OsRng.r#gen();
    format!("queued-{micros:x}-{rand:x}")
}
