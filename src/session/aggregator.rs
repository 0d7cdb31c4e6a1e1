use std::collections::HashSet;

use crate::error::NoUserInputError;
use crate::models::call::{ Message, Role };
use crate::provider::CallEvent;

/// Which roles survive reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileScope {
    /// Only what the user said. Onboarding answers are built from this.
    UserInput,
    /// User and assistant turns of a regular conversation.
    Conversation,
}

impl ReconcileScope {
    fn includes(&self, role: Role) -> bool {
        match self {
            ReconcileScope::UserInput => role == Role::User,
            ReconcileScope::Conversation => matches!(role, Role::User | Role::Assistant),
        }
    }
}

/// Collects the live side of a call: the running transcript of the current
/// turn and the discrete messages seen so far.
#[derive(Debug, Default)]
pub struct MessageAggregator {
    conversation_id: Option<String>,
    transcript: String,
    messages: Vec<Message>,
}

impl MessageAggregator {
    pub fn new(conversation_id: Option<String>) -> Self {
        Self {
            conversation_id,
            ..Default::default()
        }
    }

    /// Folds one live event in. Transcript chunks are space-joined in arrival
    /// order; an assistant reply ends the turn and clears the buffer.
    pub fn observe(&mut self, event: &CallEvent, timestamp: i64) {
        match event {
            CallEvent::Transcript { text } => {
                if !self.transcript.is_empty() {
                    self.transcript.push(' ');
                }
                self.transcript.push_str(text);
            }
            CallEvent::UserUtterance { text } => {
                self.push(Message::user(text.as_str()).at(timestamp));
            }
            CallEvent::AssistantMessage { text } => {
                self.push(Message::assistant(text.as_str()).at(timestamp));
                self.transcript.clear();
            }
            CallEvent::Status(_) | CallEvent::Ended => {}
        }
    }

    fn push(&mut self, mut message: Message) {
        message.conversation_id = self.conversation_id.clone();
        self.messages.push(message);
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Merges local messages with the provider's authoritative list.
    ///
    /// Entries are deduplicated by exact content; the first occurrence wins and
    /// local messages are considered before provider ones.
    pub fn reconcile(
        &self,
        provider_messages: &[Message],
        scope: ReconcileScope
    ) -> Result<Vec<Message>, NoUserInputError> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut merged = Vec::new();

        for msg in self.messages.iter().chain(provider_messages.iter()) {
            if !scope.includes(msg.role) {
                continue;
            }
            if seen.insert(msg.content.as_str()) {
                let mut kept = msg.clone();
                if kept.conversation_id.is_none() {
                    kept.conversation_id = self.conversation_id.clone();
                }
                merged.push(kept);
            }
        }

        if merged.is_empty() {
            return Err(NoUserInputError);
        }
        Ok(merged)
    }
}
