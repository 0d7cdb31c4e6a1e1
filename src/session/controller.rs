use chrono::Utc;
use log::{ info, warn, error };
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::aggregator::{ MessageAggregator, ReconcileScope };
use super::poller::{ PollOutcome, PollerConfig, TranscriptPoller };
use crate::error::{ CallStartError, NoUserInputError };
use crate::knowledge::{ format_conversation, KnowledgeBase };
use crate::models::call::{ transcript_from_messages, CallRecord, CallUpdate, Message };
use crate::models::onboarding::{ OnboardingResponse, Question };
use crate::provider::{ AssistantProvisioner, CallEvent, CallProvider, LiveSession, StartOptions };
use crate::store::Stores;

pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Starting,
    Active,
    /// Stopped locally, waiting for the provider to finalize the call.
    Waiting,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::Starting => "starting",
            CallState::Active => "active",
            CallState::Waiting => "waiting",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallFlow {
    Conversation,
    Onboarding(Question),
}

/// Collaborators shared by every controller.
#[derive(Clone)]
pub struct CallContext {
    pub provider: Arc<dyn CallProvider>,
    pub provisioner: Arc<AssistantProvisioner>,
    pub stores: Stores,
    pub knowledge: Arc<dyn KnowledgeBase>,
    pub poller: PollerConfig,
    pub start_timeout: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct StartRequest {
    pub assistant_id: Option<String>,
    pub first_message: Option<String>,
    pub capture_device: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallStarted {
    pub call_id: String,
    pub assistant_id: String,
}

/// In-memory state of the call in progress.
#[derive(Debug)]
pub struct CallSession {
    pub call_id: String,
    pub assistant_id: String,
    pub started_at: i64,
    pub events: Vec<CallEvent>,
    aggregator: MessageAggregator,
}

impl CallSession {
    fn new(call_id: &str, assistant_id: &str, started_at: i64) -> Self {
        Self {
            call_id: call_id.to_string(),
            assistant_id: assistant_id.to_string(),
            started_at,
            events: Vec::new(),
            aggregator: MessageAggregator::new(Some(call_id.to_string())),
        }
    }

    fn observe(&mut self, event: CallEvent) {
        self.aggregator.observe(&event, Utc::now().timestamp_millis());
        self.events.push(event);
    }

    pub fn transcript(&self) -> &str {
        self.aggregator.transcript()
    }

    pub fn messages(&self) -> &[Message] {
        self.aggregator.messages()
    }
}

#[derive(Debug)]
pub enum StopOutcome {
    Completed {
        record: CallRecord,
        onboarding: Option<OnboardingResponse>,
    },
    NoUserInput {
        call_id: String,
        question: Question,
    },
    TranscriptUnavailable {
        call_id: String,
        partial: Vec<Message>,
    },
    PersistenceFailed {
        call_id: String,
        reason: String,
    },
    NotActive,
}

impl StopOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StopOutcome::Completed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            StopOutcome::Completed { .. } => "completed",
            StopOutcome::NoUserInput { .. } => "no_user_input",
            StopOutcome::TranscriptUnavailable { .. } => "transcript_unavailable",
            StopOutcome::PersistenceFailed { .. } => "persistence_failed",
            StopOutcome::NotActive => "not_active",
        }
    }

    /// Message suitable for showing to the user.
    pub fn describe(&self) -> String {
        match self {
            StopOutcome::Completed { .. } => "Call saved.".to_string(),
            StopOutcome::NoUserInput { .. } =>
                "We didn't catch an answer. Please try again and speak after the assistant.".to_string(),
            StopOutcome::TranscriptUnavailable { .. } =>
                "Could not retrieve the call transcript. Please try again later.".to_string(),
            StopOutcome::PersistenceFailed { .. } =>
                "Something went wrong while saving the call.".to_string(),
            StopOutcome::NotActive => "There is no active call to stop.".to_string(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        match self {
            StopOutcome::Completed { record, .. } => &record.messages,
            StopOutcome::TranscriptUnavailable { partial, .. } => partial,
            _ => &[],
        }
    }
}

/// Drives one voice call at a time for a single user.
///
/// `idle → starting → active → waiting → idle`. Cancelling from `starting` or
/// `active` goes straight back to `idle` and discards everything observed.
pub struct CallController {
    user_id: String,
    ctx: CallContext,
    state: CallState,
    flow: CallFlow,
    session: Option<CallSession>,
    live: Option<LiveSession>,
}

impl CallController {
    pub fn new(user_id: &str, ctx: CallContext) -> Self {
        Self {
            user_id: user_id.to_string(),
            ctx,
            state: CallState::Idle,
            flow: CallFlow::Conversation,
            session: None,
            live: None,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn flow(&self) -> CallFlow {
        self.flow
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    pub fn transcript(&self) -> &str {
        self.session.as_ref().map(|s| s.transcript()).unwrap_or("")
    }

    pub async fn start_call(
        &mut self,
        request: StartRequest,
        flow: CallFlow
    ) -> Result<CallStarted, CallStartError> {
        if self.state != CallState::Idle {
            return Err(CallStartError::AlreadyActive);
        }
        if !request.capture_device {
            return Err(CallStartError::NoCaptureDevice);
        }

        self.state = CallState::Starting;
        match self.open_session(request).await {
            Ok((live, assistant_id)) => {
                let call_id = live.call_id().to_string();
                let started_at = Utc::now().timestamp_millis();

                if
                    let Err(e) = self.ctx.stores.calls.create_call_record(
                        &self.user_id,
                        &call_id,
                        &assistant_id,
                        started_at
                    ).await
                {
                    error!("Failed to persist start of call {} for user {}: {}", call_id, self.user_id, e);
                }

                info!("Call {} active for user {} ({:?})", call_id, self.user_id, flow);
                self.flow = flow;
                self.session = Some(CallSession::new(&call_id, &assistant_id, started_at));
                self.live = Some(live);
                self.state = CallState::Active;
                Ok(CallStarted { call_id, assistant_id })
            }
            Err(e) => {
                warn!("Call start failed for user {}: {}", self.user_id, e);
                self.state = CallState::Idle;
                Err(e)
            }
        }
    }

    async fn open_session(
        &self,
        request: StartRequest
    ) -> Result<(LiveSession, String), CallStartError> {
        let assistant_id = match request.assistant_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None =>
                self.ctx.provisioner
                    .resolve(&self.user_id).await
                    .map_err(|e| CallStartError::AssistantUnavailable(e.to_string()))?,
        };

        let options = StartOptions { first_message: request.first_message };
        let start = self.ctx.provider.start_session(&assistant_id, &options);
        match tokio::time::timeout(self.ctx.start_timeout, start).await {
            Ok(Ok(live)) => Ok((live, assistant_id)),
            Ok(Err(e)) => Err(CallStartError::Rejected(e)),
            Err(_) => Err(CallStartError::Timeout(self.ctx.start_timeout)),
        }
    }

    /// Next live event of the active call, already folded into the session.
    /// Pends forever while no call is active or after the stream closed.
    pub async fn next_event(&mut self) -> CallEvent {
        let live = match self.live.as_mut() {
            Some(live) if !live.is_closed() => live,
            _ => std::future::pending().await,
        };
        let event = match live.next_event().await {
            Some(event) => event,
            None => std::future::pending().await,
        };
        if let Some(session) = self.session.as_mut() {
            session.observe(event.clone());
        }
        event
    }

    /// Discards the call in progress without reconciling or persisting it.
    pub async fn cancel_call(&mut self) -> bool {
        if !matches!(self.state, CallState::Starting | CallState::Active) {
            return false;
        }
        if let Some(mut live) = self.live.take() {
            if let Err(e) = self.ctx.provider.stop_session(&mut live).await {
                warn!("Failed to end cancelled call {}: {}", live.call_id(), e);
            }
        }
        if let Some(session) = self.session.take() {
            info!("Call {} cancelled by user {}", session.call_id, self.user_id);
        }
        self.state = CallState::Idle;
        true
    }

    pub async fn stop_call(&mut self) -> StopOutcome {
        if self.state != CallState::Active {
            warn!("stop_call for user {} while {}", self.user_id, self.state);
            return StopOutcome::NotActive;
        }
        let (mut live, mut session) = match (self.live.take(), self.session.take()) {
            (Some(live), Some(session)) => (live, session),
            _ => {
                self.state = CallState::Idle;
                return StopOutcome::NotActive;
            }
        };

        self.state = CallState::Waiting;
        if let Err(e) = self.ctx.provider.stop_session(&mut live).await {
            // Usually the provider already hung up; reconciliation still applies.
            warn!("Failed to end call {}: {}", session.call_id, e);
        }
        for event in live.drain() {
            session.observe(event);
        }
        drop(live);

        let outcome = self.reconcile(session).await;
        info!("Call for user {} finished: {}", self.user_id, outcome.label());
        self.state = CallState::Idle;
        outcome
    }

    async fn reconcile(&self, session: CallSession) -> StopOutcome {
        let poller = TranscriptPoller::new(Arc::clone(&self.ctx.provider), self.ctx.poller);
        let outcome = poller.poll(&session.call_id).await;
        let attempts = outcome.attempts();
        let call = match outcome {
            PollOutcome::Ready { call, .. } => {
                info!("Reconciling call {} after {} poll(s)", session.call_id, attempts);
                call
            }
            PollOutcome::TimedOut { last, .. } => {
                warn!(
                    "Transcript for call {} unavailable after {} attempts",
                    session.call_id,
                    attempts
                );
                let provider_messages = last.map(|c| c.conversation()).unwrap_or_default();
                let partial = session.aggregator
                    .reconcile(&provider_messages, self.flow_scope())
                    .unwrap_or_default();
                return StopOutcome::TranscriptUnavailable {
                    call_id: session.call_id,
                    partial,
                };
            }
        };

        let provider_messages = call.conversation();
        let answer = match self.flow {
            CallFlow::Onboarding(question) => {
                match session.aggregator.reconcile(&provider_messages, ReconcileScope::UserInput) {
                    Ok(answer) => Some((question, answer)),
                    Err(NoUserInputError) => {
                        warn!("Call {} produced no answer to {}", session.call_id, question);
                        return StopOutcome::NoUserInput {
                            call_id: session.call_id,
                            question,
                        };
                    }
                }
            }
            CallFlow::Conversation => None,
        };

        let messages = match
            session.aggregator.reconcile(&provider_messages, ReconcileScope::Conversation)
        {
            Ok(messages) => messages,
            Err(NoUserInputError) => {
                info!("Call {} ended without conversation content", session.call_id);
                Vec::new()
            }
        };

        let end_time = Utc::now().timestamp_millis();
        let update = CallUpdate {
            end_time,
            transcript: call
                .transcript()
                .map(str::to_string)
                .unwrap_or_else(|| transcript_from_messages(&messages)),
            summary: call.summary().map(str::to_string),
            messages,
        };

        let record = match
            self.ctx.stores.calls.update_call_record(&self.user_id, &session.call_id, update).await
        {
            Ok(record) => record,
            Err(e) => {
                error!("Failed to persist call {} for user {}: {}", session.call_id, self.user_id, e);
                return StopOutcome::PersistenceFailed {
                    call_id: session.call_id,
                    reason: e.to_string(),
                };
            }
        };

        let onboarding = match answer {
            Some((question, answer)) => {
                match
                    self.ctx.stores.onboarding.record_answer(
                        &self.user_id,
                        question,
                        answer,
                        &session.call_id,
                        &session.assistant_id
                    ).await
                {
                    Ok(doc) => Some(doc),
                    Err(e) => {
                        error!("Failed to save {} answer for user {}: {}", question, self.user_id, e);
                        return StopOutcome::PersistenceFailed {
                            call_id: session.call_id,
                            reason: e.to_string(),
                        };
                    }
                }
            }
            None => None,
        };

        if !record.messages.is_empty() {
            let text = format_conversation(&record.messages);
            if
                let Err(e) = self.ctx.knowledge.upload_conversation(
                    &self.user_id,
                    &text,
                    end_time
                ).await
            {
                warn!("Knowledge base upload for call {} failed: {}", record.call_id, e);
            }
        }

        StopOutcome::Completed { record, onboarding }
    }

    fn flow_scope(&self) -> ReconcileScope {
        match self.flow {
            CallFlow::Onboarding(_) => ReconcileScope::UserInput,
            CallFlow::Conversation => ReconcileScope::Conversation,
        }
    }
}
