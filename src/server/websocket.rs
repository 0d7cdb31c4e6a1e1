use crate::models::call::Role;
use crate::models::websocket::{ ClientMessage, ServerMessage };
use crate::provider::CallEvent;
use crate::service::CallService;
use crate::session::{ CallController, CallFlow, CallState, StartRequest };

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::net::SocketAddr;
use std::num::NonZeroU32;

use tokio::io::{ AsyncRead, AsyncWrite };
use tokio::net::TcpListener;

use tokio_tungstenite::{ accept_hdr_async, WebSocketStream };
use tokio_tungstenite::tungstenite::handshake::server::{ ErrorResponse, Request, Response };
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;

use governor::{ DefaultDirectRateLimiter, Quota, RateLimiter };

use chrono::Utc;
use hmac::{ Hmac, Mac };
use sha2::Sha256;
use url::form_urlencoded;

use futures::{ Sink, SinkExt, StreamExt };
use log::{ debug, error, info, warn };
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const MAX_MESSAGE_SIZE: usize = 1 * 1024 * 1024;
const MAX_CLOCK_SKEW_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    MissingUser,
    MissingSignature,
    StaleTimestamp,
    BadSignature,
}

impl AuthError {
    fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingUser => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            AuthError::MissingUser => "missing user_id",
            AuthError::MissingSignature => "missing ts/sig",
            AuthError::StaleTimestamp => "timestamp out of range",
            AuthError::BadSignature => "bad signature",
        };
        write!(f, "{}", reason)
    }
}

pub fn sign(secret: &str, user_id: &str, ts: i64) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => {
            return String::new();
        }
    };
    mac.update(format!("{}:{}", user_id, ts).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Checks the handshake query string and returns the connecting user.
///
/// Without a secret only `user_id` is required. With one, `sig` must be the
/// hex HMAC-SHA256 of `"{user_id}:{ts}"` and `ts` within five minutes of `now`.
pub fn authorize(query: &str, secret: Option<&str>, now: i64) -> Result<String, AuthError> {
    let params: HashMap<String, String> = form_urlencoded
        ::parse(query.as_bytes())
        .into_owned()
        .collect();

    let user_id = params
        .get("user_id")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or(AuthError::MissingUser)?
        .to_string();

    let secret = match secret {
        Some(s) if !s.is_empty() => s,
        _ => {
            return Ok(user_id);
        }
    };

    let (ts, sig) = match (params.get("ts"), params.get("sig")) {
        (Some(ts), Some(sig)) => (ts, sig),
        _ => {
            return Err(AuthError::MissingSignature);
        }
    };
    let ts: i64 = ts.parse().map_err(|_| AuthError::StaleTimestamp)?;
    if (now - ts).abs() > MAX_CLOCK_SKEW_SECS {
        return Err(AuthError::StaleTimestamp);
    }

    let expected = hex::decode(sig).map_err(|_| AuthError::BadSignature)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::BadSignature)?;
    mac.update(format!("{}:{}", user_id, ts).as_bytes());
    mac.verify_slice(&expected).map_err(|_| AuthError::BadSignature)?;

    Ok(user_id)
}

fn reject(err: &AuthError) -> ErrorResponse {
    let mut res = ErrorResponse::new(Some(err.to_string()));
    *res.status_mut() = err.status();
    res
}

pub async fn start_ws_server(
    addr: &str,
    service: CallService,
    secret: Option<String>,
    rate_limit: NonZeroU32
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!("WS server listening on: {}", addr);
    if secret.is_none() {
        warn!("No server secret configured. Connections are identified by user_id only.");
    }

    let limiter: DefaultDirectRateLimiter = RateLimiter::direct(Quota::per_second(rate_limit));

    loop {
        let (stream, peer) = listener.accept().await?;

        if limiter.check().is_err() {
            warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        info!("Incoming connection from: {}", peer);
        let service = service.clone();
        let secret = secret.clone();

        tokio::spawn(async move {
            if let Err(e) = process_connection(peer, stream, service, secret).await {
                error!("Failed to process connection for {}: {}", peer, e);
            }
        });
    }
}

async fn process_connection<S>(
    peer: SocketAddr,
    stream: S,
    service: CallService,
    secret: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let mut user_id: Option<String> = None;
    let auth_callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let query = req.uri().query().unwrap_or("");
        match authorize(query, secret.as_deref(), Utc::now().timestamp()) {
            Ok(user) => {
                user_id = Some(user);
                Ok(response)
            }
            Err(e) => {
                warn!("Rejected handshake from {}: {}", peer, e);
                Err(reject(&e))
            }
        }
    };

    let ws = match accept_hdr_async(stream, auth_callback).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("Handshake failed for {}: {}", peer, e);
            return Err(Box::new(e));
        }
    };
    let user_id = user_id.ok_or("handshake accepted without a user")?;
    handle_connection(peer, ws, service.controller(&user_id)).await;
    Ok(())
}

async fn send<S>(tx: &mut S, msg: &ServerMessage) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: Sink<Message> + Unpin, S::Error: Error + Send + Sync + 'static
{
    let json = serde_json::to_string(msg)?;
    tx.send(Message::Text(json)).await?;
    Ok(())
}

fn state_message(state: CallState) -> ServerMessage {
    ServerMessage::State { state: state.to_string() }
}

/// Client-facing form of a live event. Transcript updates carry the whole
/// running transcript of the turn, not just the latest chunk.
pub fn event_message(event: &CallEvent, transcript: &str, timestamp: i64) -> Option<ServerMessage> {
    match event {
        CallEvent::Transcript { .. } =>
            Some(ServerMessage::Transcript { text: transcript.to_string() }),
        CallEvent::UserUtterance { text } =>
            Some(ServerMessage::Message {
                role: Role::User,
                content: text.clone(),
                timestamp,
            }),
        CallEvent::AssistantMessage { text } =>
            Some(ServerMessage::Message {
                role: Role::Assistant,
                content: text.clone(),
                timestamp,
            }),
        CallEvent::Status(_) | CallEvent::Ended => None,
    }
}

fn ends_call(event: &CallEvent) -> bool {
    match event {
        CallEvent::Ended => true,
        CallEvent::Status(status) => status.is_terminal(),
        _ => false,
    }
}

async fn finish_call<S>(
    controller: &mut CallController,
    tx: &mut S
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: Sink<Message> + Unpin, S::Error: Error + Send + Sync + 'static
{
    if controller.state() == CallState::Active {
        send(tx, &state_message(CallState::Waiting)).await?;
    }
    let outcome = controller.stop_call().await;
    send(tx, &(ServerMessage::CallFinished {
        success: outcome.is_success(),
        outcome: outcome.label().to_string(),
        message: outcome.describe(),
        messages: outcome.messages().to_vec(),
    })).await?;
    send(tx, &state_message(controller.state())).await
}

async fn handle_client_message<S>(
    controller: &mut CallController,
    message: ClientMessage,
    tx: &mut S
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: Sink<Message> + Unpin, S::Error: Error + Send + Sync + 'static
{
    match message {
        ClientMessage::StartCall { assistant_id, first_message, microphone, question } => {
            let flow = question.map(CallFlow::Onboarding).unwrap_or(CallFlow::Conversation);
            let request = StartRequest {
                assistant_id,
                first_message,
                capture_device: microphone,
            };
            send(tx, &state_message(CallState::Starting)).await?;
            match controller.start_call(request, flow).await {
                Ok(started) => {
                    send(tx, &(ServerMessage::CallStarted {
                        call_id: started.call_id,
                        assistant_id: started.assistant_id,
                    })).await?;
                }
                Err(e) => {
                    send(tx, &(ServerMessage::Error { message: e.to_string() })).await?;
                }
            }
            send(tx, &state_message(controller.state())).await
        }
        ClientMessage::StopCall => finish_call(controller, tx).await,
        ClientMessage::CancelCall => {
            if !controller.cancel_call().await {
                send(tx, &(ServerMessage::Error { message: "There is no call to cancel.".into() })).await?;
            }
            send(tx, &state_message(controller.state())).await
        }
    }
}

pub async fn handle_connection<S>(
    peer: SocketAddr,
    websocket: WebSocketStream<S>,
    mut controller: CallController
)
    where S: AsyncRead + AsyncWrite + Unpin
{
    info!("New WebSocket connection: {}", peer);
    let (mut tx, mut rx) = websocket.split();
    let connection_id = Uuid::new_v4().to_string();
    info!("Assigned connection ID {} to {}", connection_id, peer);

    loop {
        tokio::select! {
            msg = rx.next() => {
                let message = match msg {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        match e {
                            | tokio_tungstenite::tungstenite::Error::ConnectionClosed
                            | tokio_tungstenite::tungstenite::Error::Protocol(_)
                            | tokio_tungstenite::tungstenite::Error::Utf8 => {
                                info!("WebSocket connection closed or protocol error for {}: {}", peer, e);
                            }
                            tokio_tungstenite::tungstenite::Error::Io(ref io_err) if
                                io_err.kind() == std::io::ErrorKind::ConnectionReset
                            => {
                                info!("WebSocket connection reset by peer {}", peer);
                            }
                            tokio_tungstenite::tungstenite::Error::Capacity(ref cap_err) => {
                                error!("WebSocket capacity error for {}: {}", peer, cap_err);
                                let _ = send(&mut tx, &(ServerMessage::Error {
                                    message: "Server capacity error".to_string(),
                                })).await;
                            }
                            _ => {
                                error!("Error receiving message from {}: {}", peer, e);
                            }
                        }
                        break;
                    }
                    None => break,
                };

                if message.len() > MAX_MESSAGE_SIZE {
                    warn!(
                        "Message from {} exceeds size limit ({} > {})",
                        peer,
                        message.len(),
                        MAX_MESSAGE_SIZE
                    );
                    let error_msg = ServerMessage::Error { message: "Message too large".to_string() };
                    if send(&mut tx, &error_msg).await.is_err() {
                        error!("Failed to send size limit error to {}", peer);
                    }
                    break;
                }

                match message {
                    Message::Text(text) => {
                        let result = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_message) =>
                                handle_client_message(&mut controller, client_message, &mut tx).await,
                            Err(e) => {
                                warn!("Failed to parse message from {}: {}", peer, e);
                                send(&mut tx, &(ServerMessage::Error {
                                    message: format!("Failed to parse message: {}", e),
                                })).await
                            }
                        };
                        if let Err(e) = result {
                            error!("Error replying to {}: {}", peer, e);
                            break;
                        }
                    }
                    Message::Close(_) => {
                        info!("Received close frame from {}", peer);
                        break;
                    }
                    Message::Ping(ping_data) => {
                        if tx.send(Message::Pong(ping_data)).await.is_err() {
                            error!("Failed to send pong to {}", peer);
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Binary(_) => {
                        warn!("Ignoring binary message from {}", peer);
                    }
                    Message::Frame(_) => {}
                }
            }
            event = controller.next_event() => {
                debug!("Call event for {}: {:?}", peer, event);
                let timestamp = Utc::now().timestamp_millis();
                let result = match event_message(&event, controller.transcript(), timestamp) {
                    Some(msg) => send(&mut tx, &msg).await,
                    None => Ok(()),
                };
                let result = match result {
                    Ok(()) if ends_call(&event) => {
                        info!("Provider ended the call for {}", peer);
                        finish_call(&mut controller, &mut tx).await
                    }
                    other => other,
                };
                if let Err(e) = result {
                    error!("Error forwarding call event to {}: {}", peer, e);
                    break;
                }
            }
        }
    }

    if controller.cancel_call().await {
        info!("Discarded unfinished call for {}", peer);
    }
    info!("WebSocket connection closed for {} (Conn ID: {})", peer, connection_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::MemoryKnowledgeBase;
    use crate::models::call::CallStatus;
    use crate::provider::mock::{ call, context, MockProvider };
    use crate::store::Stores;
    use serde_json::{ json, Value };
    use std::sync::Arc;
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;

    const SECRET: &str = "s3cret";

    fn query(user: &str, ts: i64, sig: &str) -> String {
        format!("user_id={}&ts={}&sig={}", user, ts, sig)
    }

    #[test]
    fn user_only_without_secret() {
        assert_eq!(authorize("user_id=u1", None, 0), Ok("u1".to_string()));
        assert_eq!(authorize("", None, 0), Err(AuthError::MissingUser));
        assert_eq!(authorize("user_id=%20", Some(SECRET), 0), Err(AuthError::MissingUser));
    }

    #[test]
    fn accepts_valid_signature() {
        let now = 1_700_000_000;
        let sig = sign(SECRET, "u1", now - 10);
        assert_eq!(authorize(&query("u1", now - 10, &sig), Some(SECRET), now), Ok("u1".into()));
    }

    #[test]
    fn rejects_signature_for_another_user() {
        let now = 1_700_000_000;
        let sig = sign(SECRET, "u1", now);
        assert_eq!(
            authorize(&query("u2", now, &sig), Some(SECRET), now),
            Err(AuthError::BadSignature)
        );
        assert_eq!(
            authorize(&query("u1", now, "zz"), Some(SECRET), now),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn rejects_stale_or_missing_timestamp() {
        let now = 1_700_000_000;
        let sig = sign(SECRET, "u1", now - 301);
        assert_eq!(
            authorize(&query("u1", now - 301, &sig), Some(SECRET), now),
            Err(AuthError::StaleTimestamp)
        );
        assert_eq!(authorize("user_id=u1", Some(SECRET), now), Err(AuthError::MissingSignature));
    }

    #[test]
    fn rejection_status_codes() {
        assert_eq!(reject(&AuthError::MissingUser).status(), StatusCode::BAD_REQUEST);
        assert_eq!(reject(&AuthError::BadSignature).status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn transcript_events_send_the_running_text() {
        let event = CallEvent::Transcript { text: "tired".into() };
        match event_message(&event, "I feel tired", 1) {
            Some(ServerMessage::Transcript { text }) => assert_eq!(text, "I feel tired"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(event_message(&CallEvent::Ended, "", 1).is_none());
    }

    #[test]
    fn terminal_events_end_the_call() {
        assert!(ends_call(&CallEvent::Ended));
        assert!(ends_call(&CallEvent::Status(CallStatus::Ended)));
        assert!(!ends_call(&CallEvent::Status(CallStatus::InProgress)));
        assert!(!ends_call(&(CallEvent::UserUtterance { text: "hi".into() })));
    }

    struct Connection {
        client: WebSocketStream<DuplexStream>,
        server: JoinHandle<()>,
        provider: Arc<MockProvider>,
        stores: Stores,
    }

    async fn connect(provider: MockProvider) -> Connection {
        let provider = Arc::new(provider);
        let stores = Stores::in_memory();
        let ctx = context(provider.clone(), &stores, Arc::new(MemoryKnowledgeBase::new()));
        let controller = CallController::new("u1", ctx);

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (client, server) = tokio::join!(
            tokio_tungstenite::client_async("ws://localhost/", client_io),
            tokio_tungstenite::accept_async(server_io)
        );
        let (client, _) = client.unwrap();
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let server = tokio::spawn(handle_connection(peer, server.unwrap(), controller));
        Connection { client, server, provider, stores }
    }

    async fn send_json(client: &mut WebSocketStream<DuplexStream>, value: Value) {
        client.send(Message::Text(value.to_string())).await.unwrap();
    }

    async fn recv_json(client: &mut WebSocketStream<DuplexStream>) -> Value {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text).unwrap();
                }
                Some(Ok(_)) => {}
                other => panic!("connection ended early: {:?}", other),
            }
        }
    }

    async fn expect_state(client: &mut WebSocketStream<DuplexStream>, state: &str) {
        let msg = recv_json(client).await;
        assert_eq!(msg["type"], "state", "got {}", msg);
        assert_eq!(msg["state"], state);
    }

    async fn start(conn: &mut Connection) {
        send_json(
            &mut conn.client,
            json!({ "type": "start_call", "assistant_id": "asst-1", "microphone": true })
        ).await;
        expect_state(&mut conn.client, "starting").await;
        let started = recv_json(&mut conn.client).await;
        assert_eq!(started["type"], "call_started");
        assert_eq!(started["call_id"], "call-1");
        assert_eq!(started["assistant_id"], "asst-1");
        expect_state(&mut conn.client, "active").await;
    }

    #[tokio::test]
    async fn hang_up_finishes_the_call_for_the_client() {
        let provider = MockProvider::new().with_script(
            vec![call(CallStatus::Ended, &[(Role::User, "hello"), (Role::Assistant, "hi there")])]
        );
        let mut conn = connect(provider).await;
        start(&mut conn).await;

        conn.provider
            .events()
            .send(CallEvent::UserUtterance { text: "hello".into() }).await
            .unwrap();
        let forwarded = recv_json(&mut conn.client).await;
        assert_eq!(forwarded["type"], "message");
        assert_eq!(forwarded["role"], "user");
        assert_eq!(forwarded["content"], "hello");

        conn.provider.hang_up();
        expect_state(&mut conn.client, "waiting").await;
        let finished = recv_json(&mut conn.client).await;
        assert_eq!(finished["type"], "call_finished");
        assert_eq!(finished["success"], true);
        assert_eq!(finished["outcome"], "completed");
        assert_eq!(finished["messages"].as_array().map(Vec::len), Some(2));
        expect_state(&mut conn.client, "idle").await;

        assert_eq!(conn.provider.stops(), 1);
        assert_eq!(conn.provider.polls().len(), 1);
        let history = conn.stores.calls.get_call_history("u1").await.unwrap();
        assert!(history[0].end_time.is_some());
    }

    #[tokio::test]
    async fn terminal_status_update_finishes_the_call() {
        let provider = MockProvider::new().with_script(
            vec![call(CallStatus::Ended, &[(Role::User, "bye")])]
        );
        let mut conn = connect(provider).await;
        start(&mut conn).await;

        conn.provider.events().send(CallEvent::Status(CallStatus::Ended)).await.unwrap();
        expect_state(&mut conn.client, "waiting").await;
        let finished = recv_json(&mut conn.client).await;
        assert_eq!(finished["type"], "call_finished");
        assert_eq!(finished["outcome"], "completed");
        expect_state(&mut conn.client, "idle").await;
    }

    #[tokio::test]
    async fn disconnect_while_active_cancels_without_polling() {
        let mut conn = connect(MockProvider::new()).await;
        start(&mut conn).await;

        conn.client.close(None).await.unwrap();
        conn.server.await.unwrap();

        assert_eq!(conn.provider.stops(), 1);
        assert!(conn.provider.polls().is_empty());
        let history = conn.stores.calls.get_call_history("u1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].end_time.is_none());
    }

    #[tokio::test]
    async fn unparseable_frames_get_an_error_reply() {
        let mut conn = connect(MockProvider::new()).await;
        conn.client.send(Message::Text("{not json".into())).await.unwrap();
        let reply = recv_json(&mut conn.client).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(conn.provider.starts(), 0);
    }
}
