use crate::{
    Action, AmbientState, BlockedReason, DispatchPolicy, DispatchRequest, DispatchRoute, Effect,
    QueueStore, QueuedMessage, SendOptions, SlashCommand, ThreadId, Workspace, WorkspaceResolver,
    encode_persisted_queue, legacy_message_count, migrate_legacy_workspace_ids,
    parse_slash_command, resolve_thread_status, slash_command_remainder,
};
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InFlight {
    pub message: QueuedMessage,
    pub generation: u64,
    pub started_at: u64,
    pub turn_started: bool,
    /// The transport accepted the message.
    pub delivered: bool,
    pub is_command: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FailureRecord {
    pub reason: String,
    pub failed_at: u64,
    pub auto_retries: u32,
}

/// Owns the queue, in-flight and failure maps. Every action is followed by a
/// staleness pass and as many scheduling passes as there are eligible threads.
#[derive(Clone, Debug, Default)]
pub struct DispatchState {
    pub(crate) queue: QueueStore,
    pub(crate) ambient: AmbientState,
    pub(crate) resolver: WorkspaceResolver,
    pub(crate) in_flight: HashMap<ThreadId, InFlight>,
    pub(crate) failures: HashMap<ThreadId, FailureRecord>,
    pub(crate) policy: DispatchPolicy,
    generations: HashMap<ThreadId, u64>,
    queue_dirty: bool,
}

impl DispatchState {
    pub fn new(policy: DispatchPolicy, workspace_cache_capacity: usize) -> Self {
        Self {
            policy,
            resolver: WorkspaceResolver::new(workspace_cache_capacity),
            ..Self::default()
        }
    }

    pub fn apply(&mut self, action: Action, now_ms: u64) -> Vec<Effect> {
        let mut effects = self.handle(action, now_ms);
        self.migrate_untagged_messages();
        self.reconcile_staleness(now_ms, &mut effects);
        while let Some(request) = self.schedule(now_ms) {
            effects.push(Effect::Dispatch(request));
        }
        if std::mem::take(&mut self.queue_dirty) {
            effects.push(Effect::SaveQueue);
        }
        effects
    }

    /// Fills in missing workspace ids as soon as any mapping can resolve them.
    fn migrate_untagged_messages(&mut self) {
        if legacy_message_count(&self.queue) == 0 {
            return;
        }
        let report = migrate_legacy_workspace_ids(&mut self.queue, &self.ambient, &self.resolver);
        if report.migrated_messages > 0 {
            self.queue_dirty = true;
        }
    }

    fn handle(&mut self, action: Action, now_ms: u64) -> Vec<Effect> {
        match action {
            Action::QueueLoaded { queue } => {
                self.queue.merge_loaded(queue);
                self.queue_dirty = true;
                Vec::new()
            }

            Action::ActiveThreadChanged {
                thread_id,
                workspace_id,
            } => {
                if let (Some(thread_id), Some(workspace_id)) = (&thread_id, &workspace_id) {
                    self.resolver.observe(thread_id, workspace_id);
                }
                self.ambient.active_thread_id = thread_id;
                self.ambient.active_workspace_id = workspace_id;
                Vec::new()
            }
            Action::ActiveTurnChanged { turn_id } => {
                self.ambient.active_turn_id = turn_id;
                Vec::new()
            }
            Action::ThreadStatusUpdated { thread_id, status } => {
                self.ambient.thread_statuses.insert(thread_id, status);
                Vec::new()
            }
            Action::ThreadWorkspaceObserved {
                thread_id,
                workspace_id,
            } => {
                match workspace_id {
                    Some(workspace_id) => {
                        self.resolver.observe(&thread_id, &workspace_id);
                        self.ambient.thread_workspaces.insert(thread_id, workspace_id);
                    }
                    None => {
                        self.ambient.thread_workspaces.remove(&thread_id);
                    }
                }
                Vec::new()
            }
            Action::WorkspaceUpdated { workspace } => {
                self.ambient.workspaces.insert(workspace.id.clone(), workspace);
                Vec::new()
            }
            Action::FlagsChanged {
                steer_enabled,
                apps_enabled,
            } => {
                self.ambient.steer_enabled = steer_enabled;
                self.ambient.apps_enabled = apps_enabled;
                Vec::new()
            }
            Action::RunSettingsChanged { settings } => {
                self.ambient.run_settings = settings;
                Vec::new()
            }

            Action::SendRequested {
                message_id,
                text,
                images,
            } => self.handle_send(message_id, text, images, now_ms),
            Action::QueueMessage {
                thread_id,
                message_id,
                text,
                images,
            } => {
                let Some(thread_id) = thread_id.or_else(|| self.ambient.active_thread_id.clone())
                else {
                    return Vec::new();
                };
                if let Some(message) =
                    self.build_message(&thread_id, message_id, &text, images, now_ms)
                {
                    self.queue.enqueue(&thread_id, message);
                    self.queue_dirty = true;
                }
                Vec::new()
            }
            Action::RemoveQueuedMessage {
                thread_id,
                message_id,
            } => {
                if self.queue.remove(&thread_id, &message_id).is_some() {
                    self.queue_dirty = true;
                }
                Vec::new()
            }
            Action::UpdateQueuedMessage {
                thread_id,
                message_id,
                text,
            } => {
                self.update_queued_message(&thread_id, &message_id, &text);
                Vec::new()
            }
            Action::SteerQueuedMessage {
                thread_id,
                message_id,
            } => self.steer_queued_message(thread_id, &message_id),
            Action::SteerFailed {
                thread_id,
                message,
                error,
            } => {
                self.queue.prepend(&thread_id, message);
                let failure = self.failures.entry(thread_id).or_default();
                failure.reason = error;
                failure.failed_at = now_ms;
                self.queue_dirty = true;
                Vec::new()
            }
            Action::RetryThreadQueue { thread_id } => {
                self.bump_generation(&thread_id);
                if let Some(in_flight) = self.in_flight.remove(&thread_id) {
                    self.queue.prepend(&thread_id, in_flight.message);
                }
                self.failures.remove(&thread_id);
                self.queue_dirty = true;
                Vec::new()
            }
            Action::ClearThreadQueue { thread_id } => {
                self.bump_generation(&thread_id);
                self.queue.clear(&thread_id);
                self.in_flight.remove(&thread_id);
                self.failures.remove(&thread_id);
                self.queue_dirty = true;
                vec![Effect::RecoverStaleThread { thread_id }]
            }

            Action::DispatchSucceeded {
                thread_id,
                generation,
            } => {
                match self.in_flight.get_mut(&thread_id) {
                    Some(in_flight) if in_flight.generation == generation => {
                        in_flight.delivered = true;
                        if in_flight.is_command {
                            self.in_flight.remove(&thread_id);
                        }
                    }
                    // The turn may already have run to completion and released the
                    // slot; the send still succeeded if nothing newer was started.
                    None if self.generations.get(&thread_id) == Some(&generation) => {
                        self.failures.remove(&thread_id);
                        return Vec::new();
                    }
                    _ => return Vec::new(),
                }
                self.failures.remove(&thread_id);
                self.queue_dirty = true;
                Vec::new()
            }
            Action::DispatchFailed {
                thread_id,
                generation,
                error,
            } => {
                if !self
                    .in_flight
                    .get(&thread_id)
                    .is_some_and(|in_flight| in_flight.generation == generation)
                {
                    return Vec::new();
                }
                if let Some(in_flight) = self.in_flight.remove(&thread_id) {
                    self.queue.prepend(&thread_id, in_flight.message);
                }
                let failure = self.failures.entry(thread_id).or_default();
                failure.reason = error;
                failure.failed_at = now_ms;
                failure.auto_retries = failure.auto_retries.saturating_add(1);
                self.queue_dirty = true;
                Vec::new()
            }

            Action::MigrateLegacyWorkspaceIds => {
                let report =
                    migrate_legacy_workspace_ids(&mut self.queue, &self.ambient, &self.resolver);
                if report.migrated_messages > 0 {
                    self.queue_dirty = true;
                }
                vec![Effect::LegacyMigrationFinished { report }]
            }
            Action::Tick => Vec::new(),
        }
    }

    /// Steers straight into a busy active thread when nothing is queued ahead
    /// of the message; everything else goes through the queue.
    fn handle_send(
        &mut self,
        message_id: String,
        text: String,
        images: Vec<String>,
        now_ms: u64,
    ) -> Vec<Effect> {
        let Some(thread_id) = self.ambient.active_thread_id.clone() else {
            return Vec::new();
        };
        let Some(message) = self.build_message(&thread_id, message_id, &text, images, now_ms)
        else {
            return Vec::new();
        };

        let is_command = parse_slash_command(&message.text, self.ambient.apps_enabled).is_some();
        let status = resolve_thread_status(&self.ambient, &thread_id);
        if self.ambient.steer_enabled
            && status.is_processing
            && !is_command
            && self.queue.len(&thread_id) == 0
        {
            let options = self.steer_options(&message);
            return vec![Effect::SteerMessage {
                thread_id,
                message,
                options,
                clear_active_images: true,
            }];
        }

        self.queue.enqueue(&thread_id, message);
        self.queue_dirty = true;
        Vec::new()
    }

    fn steer_queued_message(&mut self, thread_id: ThreadId, message_id: &str) -> Vec<Effect> {
        if !self.ambient.steer_enabled || !self.ambient.is_active_thread(&thread_id) {
            return Vec::new();
        }
        let Some(queued) = self.queue.get(&thread_id, message_id) else {
            return Vec::new();
        };
        if parse_slash_command(&queued.text, self.ambient.apps_enabled).is_some() {
            return Vec::new();
        }
        let Some(message) = self.queue.remove(&thread_id, message_id) else {
            return Vec::new();
        };
        self.queue_dirty = true;

        let options = self.steer_options(&message);
        vec![Effect::SteerMessage {
            thread_id,
            message,
            options,
            clear_active_images: false,
        }]
    }

    fn steer_options(&self, message: &QueuedMessage) -> SendOptions {
        SendOptions::from_settings(message.run_settings().or(&self.ambient.run_settings), true)
    }

    fn update_queued_message(&mut self, thread_id: &ThreadId, message_id: &str, text: &str) {
        let text = text.trim();
        let is_command = parse_slash_command(text, self.ambient.apps_enabled).is_some();
        let Some(entry) = self
            .queue
            .messages_mut(thread_id)
            .and_then(|messages| messages.iter_mut().find(|m| m.id == message_id))
        else {
            return;
        };

        entry.text = text.to_owned();
        if is_command {
            entry.images.clear();
        }
        if entry.text.is_empty() && entry.images.is_empty() {
            self.queue.remove(thread_id, message_id);
        }
        self.queue_dirty = true;
    }

    /// Trims the text, drops images from commands, tags the resolved
    /// workspace and captures the current run settings. Returns `None` for an
    /// empty message.
    fn build_message(
        &self,
        thread_id: &ThreadId,
        message_id: String,
        text: &str,
        mut images: Vec<String>,
        now_ms: u64,
    ) -> Option<QueuedMessage> {
        let text = text.trim();
        if parse_slash_command(text, self.ambient.apps_enabled).is_some() {
            images.clear();
        }
        if text.is_empty() && images.is_empty() {
            return None;
        }

        let workspace_id = self
            .resolver
            .workspace_id_for(thread_id, &self.ambient, &self.queue);
        let settings = self.ambient.run_settings.clone();
        Some(QueuedMessage {
            id: message_id,
            text: text.to_owned(),
            created_at: now_ms,
            images,
            workspace_id,
            model: settings.model,
            effort: settings.effort,
            collaboration_mode: settings.collaboration_mode,
        })
    }

    pub(crate) fn bump_generation(&mut self, thread_id: &ThreadId) -> u64 {
        let generation = self.generations.entry(thread_id.clone()).or_insert(0);
        *generation += 1;
        *generation
    }

    pub(crate) fn mark_queue_dirty(&mut self) {
        self.queue_dirty = true;
    }

    /// Picks at most one eligible thread and starts dispatching its head.
    fn schedule(&mut self, now_ms: u64) -> Option<DispatchRequest> {
        let candidate = self
            .dispatch_candidates()
            .into_iter()
            .find(|thread_id| self.is_dispatch_eligible(thread_id, now_ms))?;
        self.start_dispatch(candidate, now_ms)
    }

    fn dispatch_candidates(&self) -> Vec<ThreadId> {
        let active = self
            .ambient
            .active_thread_id
            .as_ref()
            .filter(|thread_id| self.queue.len(thread_id) > 0);
        active
            .into_iter()
            .chain(
                self.queue
                    .thread_ids()
                    .filter(|thread_id| !self.ambient.is_active_thread(thread_id)),
            )
            .cloned()
            .collect()
    }

    pub fn is_dispatch_eligible(&self, thread_id: &ThreadId, now_ms: u64) -> bool {
        self.queue.head(thread_id).is_some()
            && self.blocked_reason(thread_id, now_ms) == BlockedReason::None
            && !self.retry_cap_reached(thread_id)
    }

    pub fn retry_cap_reached(&self, thread_id: &ThreadId) -> bool {
        self.failures
            .get(thread_id)
            .is_some_and(|failure| failure.auto_retries > self.policy.max_auto_retries)
    }

    /// First reason, in display precedence, that keeps this thread from
    /// dispatching its queue head.
    pub fn blocked_reason(&self, thread_id: &ThreadId, now_ms: u64) -> BlockedReason {
        let is_active = self.ambient.is_active_thread(thread_id);
        let status = resolve_thread_status(&self.ambient, thread_id);

        if status.is_reviewing {
            return BlockedReason::Reviewing;
        }
        if status.is_processing
            && (is_active
                || !status.is_processing_stale(now_ms, self.policy.processing_stale_after_ms))
        {
            return BlockedReason::Processing;
        }
        if let Some(in_flight) = self.in_flight.get(thread_id) {
            return if in_flight.turn_started {
                BlockedReason::Processing
            } else {
                BlockedReason::AwaitingTurnStartEvent
            };
        }

        let Some(head) = self.queue.head(thread_id) else {
            return BlockedReason::None;
        };
        if !self
            .resolver
            .resolve(thread_id, &self.ambient, &self.queue)
            .resolved
        {
            return BlockedReason::WorkspaceUnresolved;
        }
        if !is_active && parse_slash_command(&head.text, self.ambient.apps_enabled).is_some() {
            return BlockedReason::CommandRequiresActiveThread;
        }
        if !is_active && self.globally_blocked(thread_id, now_ms) {
            return BlockedReason::GlobalProcessing;
        }
        BlockedReason::None
    }

    /// A background candidate defers while any other background thread is
    /// reviewing or processing without having gone stale.
    fn globally_blocked(&self, candidate: &ThreadId, now_ms: u64) -> bool {
        self.ambient
            .thread_statuses
            .keys()
            .filter(|thread_id| !self.ambient.is_active_thread(thread_id))
            .filter(|thread_id| {
                let status = resolve_thread_status(&self.ambient, thread_id);
                status.is_reviewing
                    || (status.is_processing
                        && !status
                            .is_processing_stale(now_ms, self.policy.processing_stale_after_ms))
            })
            .any(|thread_id| thread_id != candidate)
    }

    fn start_dispatch(&mut self, thread_id: ThreadId, now_ms: u64) -> Option<DispatchRequest> {
        let workspace = self
            .resolver
            .resolve(&thread_id, &self.ambient, &self.queue)
            .workspace?;
        let message = self.queue.dequeue_head(&thread_id)?;
        let generation = self.bump_generation(&thread_id);
        let is_active = self.ambient.is_active_thread(&thread_id);
        let command = parse_slash_command(&message.text, self.ambient.apps_enabled);
        let route = self.route_for(&message, command, &workspace, is_active);

        self.in_flight.insert(
            thread_id.clone(),
            InFlight {
                message: message.clone(),
                generation,
                started_at: now_ms,
                turn_started: false,
                delivered: false,
                is_command: command.is_some(),
            },
        );
        self.queue_dirty = true;

        Some(DispatchRequest {
            thread_id,
            generation,
            message,
            connect: (!workspace.connected).then_some(workspace),
            clear_active_images: is_active,
            route,
        })
    }

    fn route_for(
        &self,
        message: &QueuedMessage,
        command: Option<SlashCommand>,
        workspace: &Workspace,
        is_active: bool,
    ) -> DispatchRoute {
        let overrides = message.run_settings();
        match command {
            Some(SlashCommand::New) => DispatchRoute::NewThread {
                workspace: workspace.clone(),
                follow_up: Some(slash_command_remainder(&message.text, SlashCommand::New))
                    .filter(|rest| !rest.is_empty())
                    .map(ToOwned::to_owned),
                options: SendOptions::from_settings(
                    overrides.or(&self.ambient.run_settings),
                    false,
                ),
            },
            Some(command) => DispatchRoute::Command {
                command,
                text: message.text.clone(),
            },
            None => {
                let options = (!overrides.is_empty()).then(|| {
                    SendOptions::from_settings(overrides.or(&self.ambient.run_settings), false)
                });
                if is_active {
                    DispatchRoute::ActiveThread {
                        text: message.text.clone(),
                        images: message.images.clone(),
                        options,
                    }
                } else {
                    DispatchRoute::OtherThread {
                        workspace: workspace.clone(),
                        text: message.text.clone(),
                        images: message.images.clone(),
                        options,
                    }
                }
            }
        }
    }

    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    pub fn ambient(&self) -> &AmbientState {
        &self.ambient
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    pub fn in_flight(&self, thread_id: &ThreadId) -> Option<&InFlight> {
        self.in_flight.get(thread_id)
    }

    pub fn failure(&self, thread_id: &ThreadId) -> Option<&FailureRecord> {
        self.failures.get(thread_id)
    }

    pub fn queued_by_thread(&self) -> BTreeMap<ThreadId, Vec<QueuedMessage>> {
        self.queue.to_map()
    }

    pub fn active_queue(&self) -> Vec<QueuedMessage> {
        self.ambient
            .active_thread_id
            .as_ref()
            .map(|thread_id| self.queue.messages(thread_id).cloned().collect())
            .unwrap_or_default()
    }

    pub fn legacy_queue_message_count(&self) -> usize {
        legacy_message_count(&self.queue)
    }

    /// Queue snapshot for storage. Messages handed to the transport but not
    /// yet accepted sit at the head of their thread so a restart re-sends them.
    pub fn persisted_queue(&self) -> BTreeMap<ThreadId, Vec<QueuedMessage>> {
        let mut map = self.queue.to_map();
        for (thread_id, in_flight) in &self.in_flight {
            if in_flight.delivered || in_flight.turn_started {
                continue;
            }
            map.entry(thread_id.clone())
                .or_default()
                .insert(0, in_flight.message.clone());
        }
        map
    }

    pub fn persisted_queue_json(&self) -> serde_json::Result<Option<String>> {
        encode_persisted_queue(&self.persisted_queue())
    }
}
