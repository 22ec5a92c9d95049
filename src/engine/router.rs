//! Routes the shared event stream into the conversation on screen.
//!
//! Every event first passes the session scope check: it must be addressed to
//! the active view (its concrete id, or the placeholder while the server id is
//! unknown). Out-of-scope events are dropped, but turn-ending ones still mark
//! their session idle so background conversations never look stuck.

use chrono::Utc;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use super::identity::{IdentityChange, SessionReconciler};
use super::permissions::{Decision, PermissionManager, PendingPermission, RequestOutcome};
use super::stream::{FlushTick, StreamAssembler};
use super::tools::ToolCorrelator;
use crate::backends::{CommandSink, Provider, RouteContext};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::history::AttachmentUploader;
use crate::protocol::{
    ClientCommand, CommandOptions, Completion, ContentBlock, ProviderCommand, ProviderStatus,
    ResponsePayload, SessionEvent, SessionRef, TokenBudget,
};
use crate::storage::ClientState;
use crate::transcript::{diff, ImageAttachment, MessageKind, Transcript, TranscriptMessage};

/// What the host should react to after routing an event.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterEffect {
    TranscriptChanged,
    /// Point the view (and URL) at another session id.
    NavigateToSession(String),
    ReplacePlaceholder { placeholder: String, real: String },
    /// The named session finished its turn.
    SessionIdle(String),
    StatusChanged,
    TokenBudget(TokenBudget),
    PermissionsChanged,
    ProjectsRefresh(Value),
    TasksRefresh(Value),
}

#[derive(Default)]
struct Effects(Vec<RouterEffect>);

impl Effects {
    fn push(&mut self, effect: RouterEffect) {
        if !self.0.contains(&effect) {
            self.0.push(effect);
        }
    }

    fn into_vec(self) -> Vec<RouterEffect> {
        self.0
    }
}

/// Busy and status indicators for the active view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewStatus {
    pub is_loading: bool,
    pub can_abort: bool,
    pub provider_status: Option<ProviderStatus>,
    pub token_budget: Option<TokenBudget>,
    pub awaiting_permission: bool,
}

pub struct SessionEventRouter {
    transcript: Transcript,
    identity: SessionReconciler,
    stream: StreamAssembler,
    tools: ToolCorrelator,
    permissions: PermissionManager,
    status: ViewStatus,
    /// Sessions with a turn in flight, across all conversations.
    processing: HashSet<String>,
    /// Placeholders of busy conversations the user navigated away from,
    /// oldest first, still waiting for their `session-created`.
    detached: VecDeque<String>,
    sink: Arc<dyn CommandSink>,
    state: Option<ClientState>,
    last_event: Option<Arc<SessionEvent>>,
}

impl SessionEventRouter {
    pub fn new(
        config: &EngineConfig,
        sink: Arc<dyn CommandSink>,
        ticks: UnboundedSender<FlushTick>,
        state: Option<ClientState>,
    ) -> Self {
        diff::configure_shared_cache(config.diff_cache_capacity);
        Self {
            transcript: Transcript::new(),
            identity: SessionReconciler::new(),
            stream: StreamAssembler::new(config.stream_debounce(), ticks),
            tools: ToolCorrelator::new(),
            permissions: PermissionManager::new(state.clone()),
            status: ViewStatus::default(),
            processing: HashSet::new(),
            detached: VecDeque::new(),
            sink,
            state,
            last_event: None,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Mutable transcript access for history paging.
    pub fn transcript_mut(&mut self) -> &mut Transcript {
        &mut self.transcript
    }

    pub fn identity(&self) -> &SessionReconciler {
        &self.identity
    }

    pub fn active_view_id(&self) -> Option<&str> {
        self.identity.active_view_id()
    }

    pub fn status(&self) -> &ViewStatus {
        &self.status
    }

    pub fn pending_permissions(&self) -> &[PendingPermission] {
        self.permissions.pending()
    }

    pub fn is_processing(&self, session_id: &str) -> bool {
        self.processing.contains(session_id)
    }

    pub fn processing_sessions(&self) -> impl Iterator<Item = &str> {
        self.processing.iter().map(String::as_str)
    }

    // ========================================================================
    // Inbound events
    // ========================================================================

    pub fn route(&mut self, event: Arc<SessionEvent>, ctx: &RouteContext) -> Vec<RouterEffect> {
        if let Some(last) = &self.last_event {
            if Arc::ptr_eq(last, &event) {
                log::debug!("Skipping redelivered {} event", event.name());
                return Vec::new();
            }
        }
        self.last_event = Some(Arc::clone(&event));

        let mut effects = Effects::default();

        if event.bypasses_session_scope() {
            self.handle_global(&event, ctx, &mut effects);
            return effects.into_vec();
        }

        if !self.in_scope(&event) {
            if event.is_lifecycle() {
                if let Some(session_id) = event.session_id() {
                    self.mark_idle(session_id, &mut effects);
                }
            }
            log::debug!(
                "Dropping {} for session {:?} (viewing {:?})",
                event.name(),
                event.session_id(),
                self.identity.active_view_id()
            );
            return effects.into_vec();
        }

        self.dispatch(&event, ctx, &mut effects);
        effects.into_vec()
    }

    fn in_scope(&self, event: &SessionEvent) -> bool {
        if let SessionEvent::SystemInit {
            session_id,
            init_session_id,
            ..
        } = event
        {
            return match self.identity.concrete_id() {
                None => true,
                Some(id) if id == init_session_id => true,
                // A new id is a rollover only when reported for the conversation
                // on screen; an init tagged with another session is that session's.
                Some(id) => {
                    self.identity.is_awaiting_reply()
                        && session_id.as_deref().map_or(true, |envelope| envelope == id)
                }
            };
        }

        match event.session_id() {
            None => self.identity.concrete_id().is_none(),
            Some(id) => self.identity.active_view_id() == Some(id),
        }
    }

    fn handle_global(&mut self, event: &SessionEvent, ctx: &RouteContext, effects: &mut Effects) {
        match event {
            SessionEvent::SessionCreated { session_id } => {
                match self.identity.confirm(session_id) {
                    IdentityChange::Ignored => self.confirm_detached(session_id, ctx),
                    change => self.apply_identity_change(change, ctx, effects),
                }
            }
            SessionEvent::ProjectsUpdated { payload } => {
                effects.push(RouterEffect::ProjectsRefresh(payload.clone()));
            }
            SessionEvent::ProjectTasksUpdated { payload } => {
                effects.push(RouterEffect::TasksRefresh(payload.clone()));
            }
            _ => {}
        }
    }

    fn dispatch(&mut self, event: &SessionEvent, ctx: &RouteContext, effects: &mut Effects) {
        match event {
            SessionEvent::TokenBudget { budget, .. } => {
                self.status.token_budget = Some(budget.clone());
                effects.push(RouterEffect::TokenBudget(budget.clone()));
            }
            SessionEvent::Response { payload, .. } => self.handle_response(payload, ctx, effects),
            SessionEvent::RawOutput { text, .. } => self.stream.on_raw_output(text),
            SessionEvent::InteractivePrompt { text, .. } => {
                self.close_stream(effects);
                self.push_message(TranscriptMessage::assistant(text.as_str()), effects);
            }
            SessionEvent::PermissionRequest {
                session_id,
                request,
            } => {
                match self
                    .permissions
                    .on_request(request, session_id.as_deref(), self.sink.as_ref())
                {
                    Ok(RequestOutcome::Queued) => {
                        self.status.awaiting_permission = true;
                        effects.push(RouterEffect::PermissionsChanged);
                        effects.push(RouterEffect::StatusChanged);
                    }
                    Ok(RequestOutcome::Duplicate) | Ok(RequestOutcome::AutoApproved) => {}
                    Err(e) => {
                        log::error!("Failed to answer permission {}: {}", request.request_id, e);
                        self.push_message(
                            TranscriptMessage::error(format!("Permission response failed: {}", e)),
                            effects,
                        );
                    }
                }
            }
            SessionEvent::PermissionCancelled { request_id, .. } => {
                if self.permissions.on_cancelled(request_id) {
                    self.status.awaiting_permission = !self.permissions.is_empty();
                    effects.push(RouterEffect::PermissionsChanged);
                    effects.push(RouterEffect::StatusChanged);
                }
            }
            SessionEvent::ProviderError { message, .. } | SessionEvent::Error { message, .. } => {
                self.close_stream(effects);
                self.push_message(TranscriptMessage::error(format!("Error: {}", message)), effects);
                self.finish_turn(ctx, effects);
            }
            SessionEvent::SystemInit {
                init_session_id, ..
            } => {
                let change = self.identity.on_system_init(init_session_id);
                self.apply_identity_change(change, ctx, effects);
            }
            SessionEvent::ToolUse { call, .. } => {
                self.close_stream(effects);
                let session = self.identity.active_view_id().map(str::to_string);
                if self.tools.on_tool_use(call, &mut self.transcript, session.as_deref()) {
                    effects.push(RouterEffect::TranscriptChanged);
                }
            }
            SessionEvent::Complete {
                provider,
                completion,
                ..
            } => {
                self.close_stream(effects);
                self.show_completion_text(*provider, completion, effects);
                self.finish_turn(ctx, effects);
            }
            SessionEvent::SessionAborted { success, .. } => {
                self.close_stream(effects);
                if !success {
                    log::warn!("Backend reported a failed abort");
                }
                self.finish_turn(ctx, effects);
            }
            SessionEvent::SessionStatus { is_processing, .. } => {
                if let Some(id) = self.identity.active_view_id().map(str::to_string) {
                    if *is_processing {
                        self.processing.insert(id);
                    } else {
                        self.processing.remove(&id);
                    }
                }
                self.status.is_loading = *is_processing;
                self.status.can_abort = *is_processing;
                if !is_processing {
                    self.status.provider_status = None;
                }
                effects.push(RouterEffect::StatusChanged);
            }
            SessionEvent::ProviderStatus { status, .. } => {
                self.status.is_loading = true;
                self.status.can_abort = status.can_interrupt;
                self.status.provider_status = Some(status.clone());
                effects.push(RouterEffect::StatusChanged);
            }
            SessionEvent::Unknown { kind } => {
                log::debug!("Ignoring unrecognized event type {}", kind);
            }
            SessionEvent::SessionCreated { .. }
            | SessionEvent::ProjectsUpdated { .. }
            | SessionEvent::ProjectTasksUpdated { .. } => self.handle_global(event, ctx, effects),
        }
    }

    fn handle_response(&mut self, payload: &ResponsePayload, ctx: &RouteContext, effects: &mut Effects) {
        match payload {
            ResponsePayload::TextDelta(text) => self.stream.on_delta(text),
            ResponsePayload::TextBlockStop => self.close_stream(effects),
            ResponsePayload::Message { blocks } => {
                let session = self.identity.active_view_id().map(str::to_string);
                for block in blocks {
                    match block {
                        ContentBlock::Text(text) => {
                            self.close_stream(effects);
                            if !self.repeats_last_reply(text) && !text.trim().is_empty() {
                                self.push_message(TranscriptMessage::assistant(text.as_str()), effects);
                            }
                        }
                        ContentBlock::ToolUse(call) => {
                            self.close_stream(effects);
                            if self.tools.on_tool_use(call, &mut self.transcript, session.as_deref()) {
                                effects.push(RouterEffect::TranscriptChanged);
                            }
                        }
                        ContentBlock::ToolResult(outcome) => {
                            if self.tools.on_tool_result(outcome, &mut self.transcript) {
                                effects.push(RouterEffect::TranscriptChanged);
                            }
                        }
                    }
                }
            }
            ResponsePayload::TurnComplete => {
                self.close_stream(effects);
                self.finish_turn(ctx, effects);
            }
            ResponsePayload::Failed(message) => {
                self.close_stream(effects);
                self.push_message(TranscriptMessage::error(format!("Error: {}", message)), effects);
                self.finish_turn(ctx, effects);
            }
            ResponsePayload::Ignored => {}
        }
    }

    /// Full assistant messages often repeat text that was already streamed.
    fn repeats_last_reply(&self, text: &str) -> bool {
        self.transcript.last().is_some_and(|last| {
            last.kind == MessageKind::Assistant && !last.is_tool_use() && last.content == text
        })
    }

    fn show_completion_text(&mut self, provider: Provider, completion: &Completion, effects: &mut Effects) {
        let Some(text) = completion.result_text.as_deref() else {
            return;
        };
        if provider == Provider::Cursor && !self.repeats_last_reply(text) {
            self.push_message(TranscriptMessage::assistant(text), effects);
        }
    }

    fn close_stream(&mut self, effects: &mut Effects) {
        let session = self.identity.active_view_id().map(str::to_string);
        if self.stream.on_stream_stop(&mut self.transcript, session.as_deref()) {
            effects.push(RouterEffect::TranscriptChanged);
        }
    }

    fn push_message(&mut self, message: TranscriptMessage, effects: &mut Effects) {
        let session = self.identity.active_view_id().map(str::to_string);
        self.transcript.push(message.with_session(session));
        effects.push(RouterEffect::TranscriptChanged);
    }

    fn finish_turn(&mut self, ctx: &RouteContext, effects: &mut Effects) {
        self.identity.finish_turn();
        self.status.is_loading = false;
        self.status.can_abort = false;
        self.status.provider_status = None;
        effects.push(RouterEffect::StatusChanged);
        if let Some(id) = self.identity.active_view_id().map(str::to_string) {
            self.processing.remove(&id);
            effects.push(RouterEffect::SessionIdle(id));
        }
        self.persist_transcript(ctx);
    }

    /// A turn ended for `session_id` while it was not the routed view.
    fn mark_idle(&mut self, session_id: &str, effects: &mut Effects) {
        self.processing.remove(session_id);
        if self.identity.is_same_conversation(session_id) {
            self.identity.finish_turn();
            self.status.is_loading = false;
            self.status.can_abort = false;
            self.status.provider_status = None;
            effects.push(RouterEffect::StatusChanged);
        }
        effects.push(RouterEffect::SessionIdle(session_id.to_string()));
    }

    fn apply_identity_change(&mut self, change: IdentityChange, ctx: &RouteContext, effects: &mut Effects) {
        match change {
            IdentityChange::Unchanged | IdentityChange::Ignored => {}
            IdentityChange::Adopted(id) => {
                if self.transcript.adopt_unattributed(&id) > 0 {
                    effects.push(RouterEffect::TranscriptChanged);
                }
                if self.identity.is_awaiting_reply() {
                    self.processing.insert(id.clone());
                }
                effects.push(RouterEffect::NavigateToSession(id));
            }
            IdentityChange::Replaced { placeholder, real } => {
                let moved = self.transcript.reattribute(&placeholder, &real)
                    + self.transcript.adopt_unattributed(&real);
                if moved > 0 {
                    effects.push(RouterEffect::TranscriptChanged);
                }
                self.permissions.reattribute(&placeholder, &real);
                if self.processing.remove(&placeholder) || self.identity.is_awaiting_reply() {
                    self.processing.insert(real.clone());
                }
                if let (Some(state), Some(project)) = (&self.state, ctx.project_name.as_deref()) {
                    if let Err(e) = state.rekey_transcript(project, &placeholder, &real) {
                        log::warn!("Failed to move cached transcript to {}: {}", real, e);
                    }
                }
                effects.push(RouterEffect::ReplacePlaceholder { placeholder, real });
            }
            IdentityChange::Rollover { from, to } => {
                if self.processing.remove(&from) {
                    self.processing.insert(to.clone());
                }
                effects.push(RouterEffect::NavigateToSession(to));
            }
        }
    }

    /// Hand a server id to the oldest conversation left while it was still a
    /// placeholder. Only background bookkeeping moves; the view is untouched.
    fn confirm_detached(&mut self, real: &str, ctx: &RouteContext) {
        let Some(placeholder) = self.detached.pop_front() else {
            log::debug!("Session {} created for another client", real);
            return;
        };
        log::info!("Detached session {} confirmed as {}", placeholder, real);
        if self.processing.remove(&placeholder) {
            self.processing.insert(real.to_string());
        }
        if let (Some(state), Some(project)) = (&self.state, ctx.project_name.as_deref()) {
            if let Err(e) = state.rekey_transcript(project, &placeholder, real) {
                log::warn!("Failed to move cached transcript to {}: {}", real, e);
            }
        }
    }

    /// Flush a debounce tick into the transcript.
    pub fn on_tick(&mut self, tick: FlushTick) -> Vec<RouterEffect> {
        let session = self.identity.active_view_id().map(str::to_string);
        if self.stream.on_tick(tick, &mut self.transcript, session.as_deref()) {
            vec![RouterEffect::TranscriptChanged]
        } else {
            Vec::new()
        }
    }

    // ========================================================================
    // User actions
    // ========================================================================

    /// Append the user turn and send it to the selected provider.
    ///
    /// Returns `None` when there is nothing to send.
    pub fn submit(
        &mut self,
        text: &str,
        images: Vec<ImageAttachment>,
        ctx: &RouteContext,
    ) -> Result<Option<ClientCommand>, EngineError> {
        if text.trim().is_empty() && images.is_empty() {
            return Ok(None);
        }

        let concrete_id = self.identity.concrete_id().map(str::to_string);
        let view_id = self.identity.begin_submit(Utc::now());

        let mut message = TranscriptMessage::user(text).with_session(Some(view_id.clone()));
        message.images = images.clone();
        self.transcript.push(message);

        self.processing.insert(view_id.clone());
        self.status.is_loading = true;
        self.status.can_abort = true;
        self.status.provider_status = Some(ProviderStatus {
            text: "Processing".to_string(),
            tokens: 0,
            can_interrupt: true,
        });

        let command = ClientCommand::for_provider(
            ctx.provider,
            ProviderCommand {
                command: text.to_string(),
                session_id: concrete_id.clone(),
                options: CommandOptions {
                    project_path: ctx.project_path.clone(),
                    cwd: ctx.project_path.clone(),
                    resume: concrete_id.is_some(),
                    session_id: concrete_id,
                    model: ctx.model.clone(),
                    permission_mode: ctx.permission_mode.clone(),
                    allowed_tools: self.permissions.allow_list().to_vec(),
                    images,
                },
            },
        );

        if let Err(e) = self.sink.send(command.clone()) {
            log::error!("Failed to send {} command: {}", ctx.provider, e);
            self.push_message(TranscriptMessage::error(format!("Error: {}", e)), &mut Effects::default());
            self.identity.finish_turn();
            self.processing.remove(&view_id);
            self.status = ViewStatus {
                token_budget: self.status.token_budget.take(),
                awaiting_permission: self.status.awaiting_permission,
                ..Default::default()
            };
            return Err(e);
        }

        if let (Some(state), Some(project)) = (&self.state, ctx.project_name.as_deref()) {
            if let Err(e) = state.save_draft(project, "") {
                log::warn!("Failed to clear draft for {}: {}", project, e);
            }
        }
        Ok(Some(command))
    }

    /// Upload attachments, then submit. An upload failure leaves an error entry
    /// in the transcript and sends nothing.
    pub async fn submit_with_attachments(
        &mut self,
        text: &str,
        images: Vec<ImageAttachment>,
        uploader: &dyn AttachmentUploader,
        ctx: &RouteContext,
    ) -> Result<Option<ClientCommand>, EngineError> {
        let uploaded = if images.is_empty() {
            images
        } else {
            let project = ctx.project_name.as_deref().unwrap_or_default();
            match uploader.upload_images(project, images).await {
                Ok(uploaded) => uploaded,
                Err(e) => {
                    log::error!("Image upload failed: {}", e);
                    self.push_message(
                        TranscriptMessage::error(format!("Failed to upload images: {}", e)),
                        &mut Effects::default(),
                    );
                    return Err(e);
                }
            }
        };
        self.submit(text, uploaded, ctx)
    }

    pub fn save_draft(&self, text: &str, ctx: &RouteContext) {
        if let (Some(state), Some(project)) = (&self.state, ctx.project_name.as_deref()) {
            if let Err(e) = state.save_draft(project, text) {
                log::warn!("Failed to save draft for {}: {}", project, e);
            }
        }
    }

    pub fn load_draft(&self, ctx: &RouteContext) -> Option<String> {
        let (state, project) = (self.state.as_ref()?, ctx.project_name.as_deref()?);
        state.load_draft(project).unwrap_or_else(|e| {
            log::warn!("Failed to load draft for {}: {}", project, e);
            None
        })
    }

    /// Ask the backend to stop the running turn.
    pub fn abort(&mut self, ctx: &RouteContext) -> Result<Option<ClientCommand>, EngineError> {
        let Some(session_id) = self.identity.active_view_id() else {
            return Ok(None);
        };
        if !self.status.can_abort {
            return Ok(None);
        }
        let command = ClientCommand::AbortSession(SessionRef {
            session_id: session_id.to_string(),
            provider: ctx.provider,
        });
        self.sink.send(command.clone())?;
        Ok(Some(command))
    }

    /// Ask whether the confirmed session still has a turn running.
    pub fn check_status(&self, ctx: &RouteContext) -> Result<Option<ClientCommand>, EngineError> {
        let Some(session_id) = self.identity.concrete_id() else {
            return Ok(None);
        };
        let command = ClientCommand::CheckSessionStatus(SessionRef {
            session_id: session_id.to_string(),
            provider: ctx.provider,
        });
        self.sink.send(command.clone())?;
        Ok(Some(command))
    }

    /// Answer queued permission requests.
    pub fn decide(&mut self, ids: &[String], decision: &Decision) -> Result<Vec<RouterEffect>, EngineError> {
        let outcome = self.permissions.decide(ids, decision, self.sink.as_ref())?;
        Ok(self.after_decision(outcome.queue_empty))
    }

    /// Allow a request and every queued one sharing its remember key.
    pub fn remember(&mut self, request_id: &str) -> Result<Vec<RouterEffect>, EngineError> {
        let outcome = self.permissions.remember(request_id, self.sink.as_ref())?;
        Ok(self.after_decision(outcome.queue_empty))
    }

    fn after_decision(&mut self, queue_empty: bool) -> Vec<RouterEffect> {
        let mut effects = Effects::default();
        effects.push(RouterEffect::PermissionsChanged);
        if queue_empty && self.status.awaiting_permission {
            self.status.awaiting_permission = false;
            effects.push(RouterEffect::StatusChanged);
        }
        effects.into_vec()
    }

    /// Show another conversation, or a blank one with `None`.
    pub fn switch_session(&mut self, session_id: Option<&str>, ctx: &RouteContext) -> Vec<RouterEffect> {
        self.persist_transcript(ctx);
        self.stream.cancel();
        self.tools.abandon_all();
        if let Some(placeholder) = self.identity.placeholder() {
            if self.processing.contains(placeholder) && session_id != Some(placeholder) {
                self.detached.push_back(placeholder.to_string());
            }
        }
        if let Some(id) = session_id {
            self.detached.retain(|p| p != id);
        }
        self.identity.switch_to(session_id);
        self.permissions.retain_for_session(session_id);
        self.last_event = None;

        let cached = match (&self.state, ctx.project_name.as_deref(), session_id) {
            (Some(state), Some(project), Some(id)) => state
                .load_cached_transcript(project, id)
                .unwrap_or_else(|e| {
                    log::warn!("Ignoring unreadable cached transcript for {}: {}", id, e);
                    Vec::new()
                }),
            _ => Vec::new(),
        };
        self.transcript = Transcript::from_messages(cached);

        let busy = session_id.is_some_and(|id| self.processing.contains(id));
        self.status = ViewStatus {
            is_loading: busy,
            can_abort: busy,
            provider_status: None,
            token_budget: None,
            awaiting_permission: !self.permissions.is_empty(),
        };

        vec![
            RouterEffect::TranscriptChanged,
            RouterEffect::PermissionsChanged,
            RouterEffect::StatusChanged,
        ]
    }

    /// Reset the transcript of the current conversation.
    pub fn clear(&mut self) -> Vec<RouterEffect> {
        self.stream.cancel();
        self.tools.abandon_all();
        self.transcript.clear();
        vec![RouterEffect::TranscriptChanged]
    }

    /// Cancel timers and persist what is on screen.
    pub fn teardown(&mut self, ctx: &RouteContext) {
        self.stream.cancel();
        self.persist_transcript(ctx);
    }

    fn persist_transcript(&self, ctx: &RouteContext) {
        let (Some(state), Some(project), Some(session_id)) = (
            &self.state,
            ctx.project_name.as_deref(),
            self.identity.active_view_id(),
        ) else {
            return;
        };
        if self.transcript.is_empty() {
            return;
        }
        if let Err(e) = state.cache_transcript(project, session_id, &self.transcript) {
            log::warn!("Failed to cache transcript for {}: {}", session_id, e);
        }
    }
}
