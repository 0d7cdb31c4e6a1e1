use async_trait::async_trait;
use log::{ error, warn };
use redis::{ Client, AsyncCommands };

use super::{ AssistantStore, CallStore, OnboardingStore };
use crate::error::PersistenceError;
use crate::models::call::{ CallRecord, CallUpdate, Message };
use crate::models::onboarding::{ OnboardingResponse, Question };

const MAX_ANSWER_ATTEMPTS: usize = 5;

/// Redis layout:
/// `{prefix}calls:{user}` hash of call id to record JSON,
/// `{prefix}call-owner:{call}` owning user id,
/// `{prefix}onboarding:{user}` onboarding JSON,
/// `{prefix}assistant:{user}` assistant id.
pub struct RedisStore {
    client: Client,
    key_prefix: String,
}

impl RedisStore {
    pub fn new(host: &str, key_prefix: &str) -> Result<Self, PersistenceError> {
        Ok(Self {
            client: Client::open(host)?,
            key_prefix: key_prefix.to_string(),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn calls_key(&self, user_id: &str) -> String {
        format!("{}calls:{}", self.key_prefix, user_id)
    }

    fn owner_key(&self, call_id: &str) -> String {
        format!("{}call-owner:{}", self.key_prefix, call_id)
    }

    fn onboarding_key(&self, user_id: &str) -> String {
        format!("{}onboarding:{}", self.key_prefix, user_id)
    }

    fn assistant_key(&self, user_id: &str) -> String {
        format!("{}assistant:{}", self.key_prefix, user_id)
    }
}

#[async_trait]
impl CallStore for RedisStore {
    async fn create_call_record(
        &self,
        user_id: &str,
        call_id: &str,
        assistant_id: &str,
        start_time: i64
    ) -> Result<(), PersistenceError> {
        let mut conn = self.get_connection().await?;
        let claimed: bool = conn.set_nx(self.owner_key(call_id), user_id).await?;
        if !claimed {
            return Err(PersistenceError::DuplicateCall { call_id: call_id.to_string() });
        }

        let record = CallRecord::started(user_id, call_id, assistant_id, start_time);
        let stored = match serde_json::to_string(&record) {
            Ok(json) => {
                conn.hset::<_, _, _, ()>(self.calls_key(user_id), call_id, json).await.map_err(
                    PersistenceError::from
                )
            }
            Err(e) => Err(PersistenceError::from(e)),
        };
        if let Err(e) = stored {
            // Release the claim so the id is not left owned by a missing record.
            if let Err(release) = conn.del::<_, ()>(self.owner_key(call_id)).await {
                warn!("Failed to release owner key for call {}: {}", call_id, release);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn update_call_record(
        &self,
        user_id: &str,
        call_id: &str,
        update: CallUpdate
    ) -> Result<CallRecord, PersistenceError> {
        let mut conn = self.get_connection().await?;
        let key = self.calls_key(user_id);
        let existing: Option<String> = conn.hget(&key, call_id).await?;
        let json = existing.ok_or_else(|| PersistenceError::CallNotFound {
            user_id: user_id.to_string(),
            call_id: call_id.to_string(),
        })?;

        let mut record: CallRecord = serde_json::from_str(&json)?;
        record.apply(update);
        let _: () = conn.hset(&key, call_id, serde_json::to_string(&record)?).await?;
        Ok(record)
    }

    async fn get_call_history(&self, user_id: &str) -> Result<Vec<CallRecord>, PersistenceError> {
        let mut conn = self.get_connection().await?;
        let entries: Vec<String> = conn.hvals(self.calls_key(user_id)).await?;
        let mut records = Vec::with_capacity(entries.len());

        for entry in &entries {
            match serde_json::from_str::<CallRecord>(entry) {
                Ok(record) => records.push(record),
                Err(e) => error!("Error parsing call record for user {}: {}", user_id, e),
            }
        }
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(records)
    }
}

#[async_trait]
impl OnboardingStore for RedisStore {
    async fn get_onboarding(&self, user_id: &str) -> Result<OnboardingResponse, PersistenceError> {
        let mut conn = self.get_connection().await?;
        let stored: Option<String> = conn.get(self.onboarding_key(user_id)).await?;
        match stored {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(OnboardingResponse::new(user_id)),
        }
    }

    async fn record_answer(
        &self,
        user_id: &str,
        question: Question,
        messages: Vec<Message>,
        call_id: &str,
        assistant_id: &str
    ) -> Result<OnboardingResponse, PersistenceError> {
        let key = self.onboarding_key(user_id);
        // A dedicated connection, so WATCH only guards this update.
        let mut conn = self.get_connection().await?;

        for attempt in 1..=MAX_ANSWER_ATTEMPTS {
            redis::cmd("WATCH").arg(&key).query_async::<_, ()>(&mut conn).await?;
            let stored: Option<String> = conn.get(&key).await?;
            let doc = apply_answer(
                stored,
                user_id,
                question,
                messages.clone(),
                call_id,
                assistant_id
            )?;

            let committed: Option<()> = redis
                ::pipe()
                .atomic()
                .set(&key, serde_json::to_string(&doc)?)
                .ignore()
                .query_async(&mut conn).await?;
            if committed.is_some() {
                return Ok(doc);
            }
            warn!(
                "Onboarding for user {} changed during update, retrying ({}/{})",
                user_id,
                attempt,
                MAX_ANSWER_ATTEMPTS
            );
        }

        Err(PersistenceError::Contended { key, attempts: MAX_ANSWER_ATTEMPTS })
    }
}

/// Folds one answer into the stored onboarding JSON, starting from an empty
/// document when the user has none yet.
fn apply_answer(
    stored: Option<String>,
    user_id: &str,
    question: Question,
    messages: Vec<Message>,
    call_id: &str,
    assistant_id: &str
) -> Result<OnboardingResponse, PersistenceError> {
    let mut doc = match stored {
        Some(json) => serde_json::from_str(&json)?,
        None => OnboardingResponse::new(user_id),
    };
    doc.record_answer(question, messages, call_id, assistant_id);
    Ok(doc)
}

#[async_trait]
impl AssistantStore for RedisStore {
    async fn get_assistant_id(&self, user_id: &str) -> Result<Option<String>, PersistenceError> {
        let mut conn = self.get_connection().await?;
        let assistant_id: Option<String> = conn.get(self.assistant_key(user_id)).await?;
        Ok(assistant_id)
    }

    async fn set_assistant_id(&self, user_id: &str, assistant_id: &str) -> Result<(), PersistenceError> {
        let mut conn = self.get_connection().await?;
        let _: () = conn.set(self.assistant_key(user_id), assistant_id).await?;
        Ok(())
    }
}
