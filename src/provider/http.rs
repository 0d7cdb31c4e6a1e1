use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, info, warn, error };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };
use std::error::Error as StdError;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

use super::{ AssistantTemplate, CallEvent, CallProvider, LiveSession, ProviderCall, ProviderConfig, StartOptions };
use crate::error::ProviderError;
use crate::models::call::CallStatus;

const DEFAULT_BASE_URL: &str = "https://api.vapi.ai";

pub struct HttpCallProvider {
    http: HttpClient,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartCallRequest<'a> {
    assistant_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    assistant_overrides: Option<AssistantOverrides<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AssistantOverrides<'a> {
    first_message: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartCallResponse {
    id: String,
    #[serde(default)]
    monitor: Option<CallMonitor>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CallMonitor {
    listen_url: Option<String>,
    control_url: Option<String>,
}

#[derive(Deserialize)]
struct CreatedAssistant {
    id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateAssistantRequest<'a> {
    name: &'a str,
    first_message: &'a str,
    model: AssistantModel<'a>,
    voice: AssistantVoice<'a>,
}

#[derive(Serialize)]
struct AssistantModel<'a> {
    provider: &'a str,
    model: &'a str,
    messages: Vec<PromptMessage<'a>>,
}

#[derive(Serialize)]
struct PromptMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AssistantVoice<'a> {
    provider: &'a str,
    voice_id: &'a str,
}

/// Text frames pushed on the call's monitor socket.
#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum ProviderEvent {
    #[serde(rename = "transcript")] Transcript {
        transcript: String,
    },
    #[serde(rename = "voice-input")] VoiceInput {
        input: String,
    },
    #[serde(rename = "assistant-message")] AssistantMessage {
        #[serde(alias = "message")]
        content: String,
    },
    #[serde(rename = "status-update")] StatusUpdate {
        status: CallStatus,
    },
    #[serde(rename = "call-end", alias = "hang")]
    CallEnd,
    #[serde(other)]
    Other,
}

impl ProviderEvent {
    fn into_call_event(self) -> Option<CallEvent> {
        match self {
            ProviderEvent::Transcript { transcript } if !transcript.trim().is_empty() => {
                Some(CallEvent::Transcript { text: transcript.trim().to_string() })
            }
            ProviderEvent::VoiceInput { input } if !input.trim().is_empty() => {
                Some(CallEvent::UserUtterance { text: input.trim().to_string() })
            }
            ProviderEvent::AssistantMessage { content } if !content.trim().is_empty() => {
                Some(CallEvent::AssistantMessage { text: content.trim().to_string() })
            }
            ProviderEvent::StatusUpdate { status } => Some(CallEvent::Status(status)),
            _ => None,
        }
    }
}

fn parse_event_frame(text: &str) -> Result<Option<ProviderEvent>, serde_json::Error> {
    let event: ProviderEvent = serde_json::from_str(text)?;
    Ok(match event {
        ProviderEvent::Other => None,
        other => Some(other),
    })
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::Status { status: status.as_u16(), body })
}

impl HttpCallProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| format!("Invalid API key format: {}", e))?
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)?;

        Ok(Self {
            http,
            base_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        if config.api_key.is_empty() {
            return Err("Call provider API key is required".into());
        }
        Self::new(config.api_key.clone(), config.base_url.clone())
    }

    async fn attach_event_stream(
        &self,
        call_id: &str,
        listen_url: &str,
        control_url: Option<String>
    ) -> Result<LiveSession, ProviderError> {
        let (ws, _) = connect_async(listen_url).await.map_err(|e|
            ProviderError::Stream(format!("Failed to open event stream for call {}: {}", call_id, e))
        )?;
        let (session, tx) = LiveSession::new(call_id, control_url);
        let reader_call_id = call_id.to_string();
        let reader = tokio::spawn(async move {
            forward_events(reader_call_id, ws, tx).await;
        });
        Ok(session.with_reader(reader))
    }
}

async fn forward_events<S>(call_id: String, ws: S, tx: mpsc::Sender<CallEvent>)
    where S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin
{
    let mut ws = ws;
    while let Some(frame) = ws.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                match parse_event_frame(&text) {
                    Ok(Some(ProviderEvent::CallEnd)) => {
                        info!("Provider reported end of call {}", call_id);
                        break;
                    }
                    Ok(Some(event)) => {
                        if let Some(call_event) = event.into_call_event() {
                            if tx.send(call_event).await.is_err() {
                                debug!("Session for call {} released, stopping reader", call_id);
                                return;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Skipping malformed event for call {}: {}", call_id, e),
                }
            }
            Ok(WsMessage::Close(_)) => {
                info!("Event stream closed for call {}", call_id);
                break;
            }
            // Audio and keep-alive frames carry no conversation state.
            Ok(_) => {}
            Err(e) => {
                error!("Event stream error for call {}: {}", call_id, e);
                break;
            }
        }
    }
}

#[async_trait]
impl CallProvider for HttpCallProvider {
    async fn start_session(
        &self,
        assistant_id: &str,
        options: &StartOptions
    ) -> Result<LiveSession, ProviderError> {
        let url = format!("{}/call/web", self.base_url);
        let req = StartCallRequest {
            assistant_id,
            assistant_overrides: options.first_message
                .as_deref()
                .map(|first_message| AssistantOverrides { first_message }),
        };
        let resp = check_status(self.http.post(&url).json(&req).send().await?).await?;
        let started: StartCallResponse = resp.json().await?;
        let monitor = started.monitor.unwrap_or_default();
        info!("Provider opened call {} for assistant {}", started.id, assistant_id);

        let listen_url = monitor.listen_url.ok_or_else(||
            ProviderError::InvalidResponse(format!("Call {} has no event stream URL", started.id))
        )?;

        match self.attach_event_stream(&started.id, &listen_url, monitor.control_url.clone()).await {
            Ok(session) => Ok(session),
            Err(e) => {
                // The call is live on the provider side; hang it up before reporting.
                let (mut orphan, _) = LiveSession::new(&started.id, monitor.control_url);
                if let Err(stop_err) = self.stop_session(&mut orphan).await {
                    warn!("Failed to end orphaned call {}: {}", started.id, stop_err);
                }
                Err(e)
            }
        }
    }

    async fn stop_session(&self, session: &mut LiveSession) -> Result<(), ProviderError> {
        let result = match session.control_url() {
            Some(control_url) => {
                let body = serde_json::json!({ "type": "end-call" });
                match self.http.post(control_url).json(&body).send().await {
                    Ok(resp) => check_status(resp).await.map(|_| ()),
                    Err(e) => Err(ProviderError::Http(e)),
                }
            }
            None => {
                warn!("Call {} has no control URL; relying on provider hang-up", session.call_id());
                Ok(())
            }
        };
        session.release();
        result
    }

    async fn get_call(&self, call_id: &str) -> Result<ProviderCall, ProviderError> {
        let url = format!("{}/call/{}", self.base_url, call_id);
        let resp = check_status(self.http.get(&url).send().await?).await?;
        let call = resp.json::<ProviderCall>().await?;
        Ok(call)
    }

    async fn create_assistant(&self, template: &AssistantTemplate) -> Result<String, ProviderError> {
        let url = format!("{}/assistant", self.base_url);
        let req = CreateAssistantRequest {
            name: &template.name,
            first_message: &template.first_message,
            model: AssistantModel {
                provider: &template.model_provider,
                model: &template.model,
                messages: vec![PromptMessage {
                    role: "system",
                    content: &template.system_prompt,
                }],
            },
            voice: AssistantVoice {
                provider: &template.voice_provider,
                voice_id: &template.voice_id,
            },
        };
        let resp = check_status(self.http.post(&url).json(&req).send().await?).await?;
        let created: CreatedAssistant = resp.json().await?;
        info!("Provisioned assistant {}", created.id);
        Ok(created.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn maps_event_frames() {
        let transcript = parse_event_frame(r#"{"type":"transcript","role":"user","transcript":"I want"}"#)
            .unwrap()
            .and_then(ProviderEvent::into_call_event);
        assert_eq!(transcript, Some(CallEvent::Transcript { text: "I want".into() }));

        let input = parse_event_frame(r#"{"type":"voice-input","input":"I want to rest"}"#)
            .unwrap()
            .and_then(ProviderEvent::into_call_event);
        assert_eq!(input, Some(CallEvent::UserUtterance { text: "I want to rest".into() }));

        let reply = parse_event_frame(r#"{"type":"assistant-message","message":"Tell me more"}"#)
            .unwrap()
            .and_then(ProviderEvent::into_call_event);
        assert_eq!(reply, Some(CallEvent::AssistantMessage { text: "Tell me more".into() }));

        let status = parse_event_frame(r#"{"type":"status-update","status":"ended"}"#)
            .unwrap()
            .and_then(ProviderEvent::into_call_event);
        assert_eq!(status, Some(CallEvent::Status(CallStatus::Ended)));
    }

    #[test]
    fn ignores_unknown_and_empty_frames() {
        assert!(parse_event_frame(r#"{"type":"speech-update","status":"started"}"#).unwrap().is_none());
        let blank = parse_event_frame(r#"{"type":"voice-input","input":"  "}"#)
            .unwrap()
            .and_then(ProviderEvent::into_call_event);
        assert!(blank.is_none());
        assert!(parse_event_frame("not json").is_err());
    }

    #[tokio::test]
    async fn reader_forwards_until_call_end() {
        let frames = vec![
            Ok(WsMessage::Text(r#"{"type":"transcript","transcript":"hel"}"#.to_string())),
            Ok(WsMessage::Binary(vec![0, 1, 2])),
            Ok(WsMessage::Text(r#"{"type":"voice-input","input":"hello"}"#.to_string())),
            Ok(WsMessage::Text(r#"{"type":"call-end"}"#.to_string())),
            Ok(WsMessage::Text(r#"{"type":"voice-input","input":"late"}"#.to_string()))
        ];
        let (mut session, tx) = LiveSession::new("c1", None);
        forward_events("c1".into(), stream::iter(frames), tx).await;

        assert_eq!(session.next_event().await, Some(CallEvent::Transcript { text: "hel".into() }));
        assert_eq!(session.next_event().await, Some(CallEvent::UserUtterance { text: "hello".into() }));
        assert_eq!(session.next_event().await, Some(CallEvent::Ended));
    }

    #[test]
    fn requires_api_key() {
        let config = ProviderConfig { api_key: String::new(), base_url: None };
        assert!(HttpCallProvider::from_config(&config).is_err());
    }
}
