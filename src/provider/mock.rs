use async_trait::async_trait;
use std::sync::atomic::{ AtomicU32, Ordering };
use std::sync::{ Arc, Mutex };
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{
    AssistantProvisioner,
    AssistantTemplate,
    CallEvent,
    CallProvider,
    LiveSession,
    ProviderCall,
    ProviderMessage,
    StartOptions,
};
use crate::error::ProviderError;
use crate::knowledge::MemoryKnowledgeBase;
use crate::models::call::{ CallStatus, Role };
use crate::session::controller::DEFAULT_START_TIMEOUT;
use crate::session::{ CallContext, PollerConfig };
use crate::store::Stores;

const CALL_ID: &str = "call-1";

#[derive(Clone)]
pub enum Scripted {
    Call(ProviderCall),
    Fail(u16),
}

pub fn call(status: CallStatus, messages: &[(Role, &str)]) -> Scripted {
    Scripted::Call(ProviderCall {
        id: CALL_ID.into(),
        status,
        messages: messages
            .iter()
            .map(|(role, content)| ProviderMessage {
                role: *role,
                content: content.to_string(),
                time: None,
            })
            .collect(),
        artifact: None,
        analysis: None,
    })
}

pub fn template() -> AssistantTemplate {
    AssistantTemplate {
        name: "Mirai".into(),
        system_prompt: "prompt".into(),
        first_message: "Hi".into(),
        model_provider: "openai".into(),
        model: "gpt-4o".into(),
        voice_provider: "11labs".into(),
        voice_id: "v".into(),
    }
}

/// Controller collaborators wired around a mock provider.
pub fn context(
    provider: Arc<MockProvider>,
    stores: &Stores,
    knowledge: Arc<MemoryKnowledgeBase>
) -> CallContext {
    CallContext {
        provider: provider.clone(),
        provisioner: Arc::new(
            AssistantProvisioner::new(provider, stores.assistants.clone(), template())
        ),
        stores: stores.clone(),
        knowledge,
        poller: PollerConfig::default(),
        start_timeout: DEFAULT_START_TIMEOUT,
    }
}

/// Scripted provider. `get_call` answers follow the script, repeating the
/// last entry once it runs out.
pub struct MockProvider {
    script: Mutex<Vec<Scripted>>,
    reject_start: bool,
    start_delay: Option<Duration>,
    sender: Mutex<Option<mpsc::Sender<CallEvent>>>,
    starts: AtomicU32,
    stops: AtomicU32,
    polls: Mutex<Vec<Instant>>,
    assistants: AtomicU32,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(vec![call(CallStatus::InProgress, &[])]),
            reject_start: false,
            start_delay: None,
            sender: Mutex::new(None),
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
            polls: Mutex::new(Vec::new()),
            assistants: AtomicU32::new(0),
        }
    }

    pub fn with_script(self, script: Vec<Scripted>) -> Self {
        *self.script.lock().unwrap() = script;
        self
    }

    pub fn rejecting_start(mut self) -> Self {
        self.reject_start = true;
        self
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    /// Sender feeding the most recently started session.
    pub fn events(&self) -> mpsc::Sender<CallEvent> {
        self.sender.lock().unwrap().clone().expect("no session started")
    }

    /// Drops the provider-side sender so the session sees its close signal.
    pub fn hang_up(&self) {
        self.sender.lock().unwrap().take();
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> Vec<Instant> {
        self.polls.lock().unwrap().clone()
    }

    pub fn assistants_created(&self) -> u32 {
        self.assistants.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CallProvider for MockProvider {
    async fn start_session(
        &self,
        _assistant_id: &str,
        _options: &StartOptions
    ) -> Result<LiveSession, ProviderError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject_start {
            return Err(ProviderError::Status { status: 400, body: "assistant not found".into() });
        }
        let (session, tx) = LiveSession::new(CALL_ID, None);
        *self.sender.lock().unwrap() = Some(tx);
        Ok(session)
    }

    async fn stop_session(&self, session: &mut LiveSession) -> Result<(), ProviderError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        session.release();
        Ok(())
    }

    async fn get_call(&self, call_id: &str) -> Result<ProviderCall, ProviderError> {
        let attempt = {
            let mut polls = self.polls.lock().unwrap();
            polls.push(Instant::now());
            polls.len() - 1
        };
        let script = self.script.lock().unwrap();
        let step = script.get(attempt).or_else(|| script.last()).cloned();
        match step {
            Some(Scripted::Call(mut call)) => {
                call.id = call_id.to_string();
                Ok(call)
            }
            Some(Scripted::Fail(status)) => {
                Err(ProviderError::Status { status, body: "unavailable".into() })
            }
            None => Err(ProviderError::InvalidResponse("empty script".into())),
        }
    }

    async fn create_assistant(&self, _template: &AssistantTemplate) -> Result<String, ProviderError> {
        let n = self.assistants.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("asst-{}", n))
    }
}
