pub mod assistant;
pub mod http;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use serde::{ Deserialize, Serialize };
use std::error::Error as StdError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ProviderError;
use crate::models::call::{ CallStatus, Message, Role };
use self::http::HttpCallProvider;

pub use self::assistant::{ AssistantProvisioner, AssistantTemplate };

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Live event observed while a call is in progress.
#[derive(Clone, Debug, PartialEq)]
pub enum CallEvent {
    /// Partial transcript chunk of the current turn.
    Transcript { text: String },
    /// A finished user utterance.
    UserUtterance { text: String },
    /// A finished assistant reply; closes the current turn.
    AssistantMessage { text: String },
    Status(CallStatus),
    /// The event stream closed. Emitted once, after every other event.
    Ended,
}

#[derive(Clone, Debug, Default)]
pub struct StartOptions {
    pub first_message: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMessage {
    pub role: Role,
    #[serde(default, alias = "message")]
    pub content: String,
    #[serde(default)]
    pub time: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallArtifact {
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub messages: Vec<ProviderMessage>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAnalysis {
    #[serde(default)]
    pub summary: Option<String>,
}

/// Authoritative call state returned by the provider's call endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCall {
    pub id: String,
    pub status: CallStatus,
    #[serde(default)]
    pub messages: Vec<ProviderMessage>,
    #[serde(default)]
    pub artifact: Option<CallArtifact>,
    #[serde(default)]
    pub analysis: Option<CallAnalysis>,
}

impl ProviderCall {
    /// Conversation messages, preferring the top-level list over the artifact
    /// copy. Empty entries are dropped.
    pub fn conversation(&self) -> Vec<Message> {
        let source = if !self.messages.is_empty() {
            &self.messages
        } else {
            match &self.artifact {
                Some(artifact) => &artifact.messages,
                None => &self.messages,
            }
        };

        source
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .map(|m| {
                let msg = Message::new(m.role, m.content.trim());
                match m.time {
                    Some(t) => msg.at(t as i64),
                    None => msg,
                }
            })
            .collect()
    }

    pub fn transcript(&self) -> Option<&str> {
        self.artifact
            .as_ref()
            .and_then(|a| a.transcript.as_deref())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn summary(&self) -> Option<&str> {
        self.analysis
            .as_ref()
            .and_then(|a| a.summary.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Handle to one live call, owned by the session that started it.
///
/// Events arrive in FIFO order on an internal channel. When every sender is
/// gone the session yields a single [`CallEvent::Ended`] and then `None`.
/// Dropping the session aborts the background reader feeding it.
pub struct LiveSession {
    call_id: String,
    control_url: Option<String>,
    events: mpsc::Receiver<CallEvent>,
    closed: bool,
    reader: Option<JoinHandle<()>>,
}

impl LiveSession {
    pub fn new(call_id: &str, control_url: Option<String>) -> (Self, mpsc::Sender<CallEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let session = Self {
            call_id: call_id.to_string(),
            control_url,
            events: rx,
            closed: false,
            reader: None,
        };
        (session, tx)
    }

    pub fn with_reader(mut self, reader: JoinHandle<()>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn control_url(&self) -> Option<&str> {
        self.control_url.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn next_event(&mut self) -> Option<CallEvent> {
        if self.closed {
            return None;
        }
        match self.events.recv().await {
            Some(event) => Some(event),
            None => {
                self.closed = true;
                Some(CallEvent::Ended)
            }
        }
    }

    /// Takes every event already queued without waiting. Buffered events
    /// stay readable after [`LiveSession::release`].
    pub fn drain(&mut self) -> Vec<CallEvent> {
        let mut queued = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            queued.push(event);
        }
        queued
    }

    /// Stops the background reader and refuses further events.
    pub fn release(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.events.close();
        self.closed = true;
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[async_trait]
pub trait CallProvider: Send + Sync {
    async fn start_session(
        &self,
        assistant_id: &str,
        options: &StartOptions
    ) -> Result<LiveSession, ProviderError>;

    async fn stop_session(&self, session: &mut LiveSession) -> Result<(), ProviderError>;

    async fn get_call(&self, call_id: &str) -> Result<ProviderCall, ProviderError>;

    async fn create_assistant(&self, template: &AssistantTemplate) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: Option<String>,
}

pub fn new_client(
    config: &ProviderConfig
) -> Result<Arc<dyn CallProvider>, Box<dyn StdError + Send + Sync>> {
    let client = HttpCallProvider::from_config(config)?;
    Ok(Arc::new(client))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_yields_events_in_order_then_ended_once() {
        let (mut session, tx) = LiveSession::new("call-1", None);
        tx.send(CallEvent::Transcript { text: "a".into() }).await.unwrap();
        tx.send(CallEvent::UserUtterance { text: "b".into() }).await.unwrap();
        drop(tx);

        assert_eq!(session.next_event().await, Some(CallEvent::Transcript { text: "a".into() }));
        assert_eq!(session.next_event().await, Some(CallEvent::UserUtterance { text: "b".into() }));
        assert_eq!(session.next_event().await, Some(CallEvent::Ended));
        assert_eq!(session.next_event().await, None);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn release_closes_the_stream() {
        let (mut session, tx) = LiveSession::new("call-1", None);
        session.release();
        assert!(tx.send(CallEvent::Ended).await.is_err());
        assert_eq!(session.next_event().await, None);
    }

    #[tokio::test]
    async fn drain_returns_buffered_events_after_release() {
        let (mut session, tx) = LiveSession::new("call-1", None);
        tx.send(CallEvent::UserUtterance { text: "last words".into() }).await.unwrap();
        tx.send(CallEvent::Transcript { text: "tail".into() }).await.unwrap();
        session.release();

        assert_eq!(session.drain(), vec![
            CallEvent::UserUtterance { text: "last words".into() },
            CallEvent::Transcript { text: "tail".into() }
        ]);
        assert!(session.drain().is_empty());
    }

    #[test]
    fn artifact_without_messages_defaults_to_empty() {
        let call: ProviderCall = serde_json
            ::from_str(r#"{"id":"c1","status":"queued","artifact":{}}"#)
            .unwrap();
        assert!(call.conversation().is_empty());
        assert_eq!(call.transcript(), None);
    }

    #[test]
    fn conversation_prefers_top_level_messages() {
        let call: ProviderCall = serde_json
            ::from_str(
                r#"{
                "id": "c1",
                "status": "ended",
                "messages": [
                    {"role": "system", "message": "You are Mirai", "time": 1000.0},
                    {"role": "bot", "message": "Hi, how are you?", "time": 1200.5},
                    {"role": "user", "message": " hello ", "time": 1500.0},
                    {"role": "tool_calls"}
                ],
                "artifact": {"transcript": "AI: Hi\nUser: hello", "messages": []},
                "analysis": {"summary": "Short greeting."}
            }"#
            )
            .unwrap();

        let messages = call.conversation();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[2].content, "hello");
        assert_eq!(messages[2].timestamp, Some(1500));
        assert_eq!(call.transcript(), Some("AI: Hi\nUser: hello"));
        assert_eq!(call.summary(), Some("Short greeting."));
    }

    #[test]
    fn conversation_falls_back_to_artifact() {
        let call: ProviderCall = serde_json
            ::from_str(
                r#"{"id":"c1","status":"ended","artifact":{"messages":[{"role":"user","message":"hey"}]}}"#
            )
            .unwrap();
        assert_eq!(call.conversation(), vec![Message::user("hey")]);
        assert_eq!(call.transcript(), None);
        assert_eq!(call.summary(), None);
    }
}
