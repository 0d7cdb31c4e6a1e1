use serde::{ Serialize, Deserialize };

use super::call::{ Message, Role };
use super::onboarding::Question;

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "start_call")] StartCall {
        #[serde(default)]
        assistant_id: Option<String>,
        #[serde(default)]
        first_message: Option<String>,
        /// Whether the client has a usable microphone.
        #[serde(default)]
        microphone: bool,
        /// Onboarding question this call answers; absent for a regular conversation.
        #[serde(default)]
        question: Option<Question>,
    },
    #[serde(rename = "stop_call")]
    StopCall,
    #[serde(rename = "cancel_call")]
    CancelCall,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "call_started")] CallStarted {
        call_id: String,
        assistant_id: String,
    },
    #[serde(rename = "transcript")] Transcript {
        text: String,
    },
    #[serde(rename = "message")] Message {
        role: Role,
        content: String,
        timestamp: i64,
    },
    #[serde(rename = "state")] State {
        state: String,
    },
    #[serde(rename = "call_finished")] CallFinished {
        success: bool,
        outcome: String,
        message: String,
        messages: Vec<Message>,
    },
    #[serde(rename = "error")] Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_call_with_defaults() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"start_call"}"#).unwrap();
        match msg {
            ClientMessage::StartCall { assistant_id, microphone, question, .. } => {
                assert!(assistant_id.is_none());
                assert!(!microphone);
                assert!(question.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_onboarding_start() {
        let msg: ClientMessage = serde_json
            ::from_str(r#"{"type":"start_call","microphone":true,"question":"goals"}"#)
            .unwrap();
        assert!(
            matches!(msg, ClientMessage::StartCall { microphone: true, question: Some(Question::Goals), .. })
        );
    }
}
