use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ AssistantStore, CallStore, OnboardingStore };
use crate::error::PersistenceError;
use crate::models::call::{ CallRecord, CallUpdate, Message };
use crate::models::onboarding::{ OnboardingResponse, Question };

/// Process-local store for development and tests.
#[derive(Default)]
pub struct MemoryStore {
    calls: RwLock<HashMap<String, CallRecord>>,
    onboarding: RwLock<HashMap<String, OnboardingResponse>>,
    assistants: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallStore for MemoryStore {
    async fn create_call_record(
        &self,
        user_id: &str,
        call_id: &str,
        assistant_id: &str,
        start_time: i64
    ) -> Result<(), PersistenceError> {
        let mut calls = self.calls.write().await;
        if calls.contains_key(call_id) {
            return Err(PersistenceError::DuplicateCall { call_id: call_id.to_string() });
        }
        calls.insert(
            call_id.to_string(),
            CallRecord::started(user_id, call_id, assistant_id, start_time)
        );
        Ok(())
    }

    async fn update_call_record(
        &self,
        user_id: &str,
        call_id: &str,
        update: CallUpdate
    ) -> Result<CallRecord, PersistenceError> {
        let mut calls = self.calls.write().await;
        match calls.get_mut(call_id) {
            Some(record) if record.user_id == user_id => {
                record.apply(update);
                Ok(record.clone())
            }
            _ =>
                Err(PersistenceError::CallNotFound {
                    user_id: user_id.to_string(),
                    call_id: call_id.to_string(),
                }),
        }
    }

    async fn get_call_history(&self, user_id: &str) -> Result<Vec<CallRecord>, PersistenceError> {
        let calls = self.calls.read().await;
        let mut records: Vec<CallRecord> = calls
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(records)
    }
}

#[async_trait]
impl OnboardingStore for MemoryStore {
    async fn get_onboarding(&self, user_id: &str) -> Result<OnboardingResponse, PersistenceError> {
        let docs = self.onboarding.read().await;
        Ok(docs.get(user_id).cloned().unwrap_or_else(|| OnboardingResponse::new(user_id)))
    }

    async fn record_answer(
        &self,
        user_id: &str,
        question: Question,
        messages: Vec<Message>,
        call_id: &str,
        assistant_id: &str
    ) -> Result<OnboardingResponse, PersistenceError> {
        let mut docs = self.onboarding.write().await;
        let doc = docs.entry(user_id.to_string()).or_insert_with(|| OnboardingResponse::new(user_id));
        doc.record_answer(question, messages, call_id, assistant_id);
        Ok(doc.clone())
    }
}

#[async_trait]
impl AssistantStore for MemoryStore {
    async fn get_assistant_id(&self, user_id: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.assistants.read().await.get(user_id).cloned())
    }

    async fn set_assistant_id(&self, user_id: &str, assistant_id: &str) -> Result<(), PersistenceError> {
        self.assistants.write().await.insert(user_id.to_string(), assistant_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_ids_are_unique() {
        let store = MemoryStore::new();
        store.create_call_record("u1", "c1", "a1", 1).await.unwrap();
        let dup = store.create_call_record("u2", "c1", "a1", 2).await;
        assert!(matches!(dup, Err(PersistenceError::DuplicateCall { .. })));
    }

    #[tokio::test]
    async fn update_requires_owner() {
        let store = MemoryStore::new();
        store.create_call_record("u1", "c1", "a1", 1).await.unwrap();
        let update = CallUpdate {
            end_time: 5,
            messages: vec![Message::user("hello")],
            transcript: "user: hello".into(),
            summary: None,
        };
        let other = store.update_call_record("u2", "c1", update.clone()).await;
        assert!(matches!(other, Err(PersistenceError::CallNotFound { .. })));

        let record = store.update_call_record("u1", "c1", update).await.unwrap();
        assert_eq!(record.end_time, Some(5));
        assert_eq!(record.messages, vec![Message::user("hello")]);
    }

    #[tokio::test]
    async fn history_is_newest_first_and_per_user() {
        let store = MemoryStore::new();
        store.create_call_record("u1", "c1", "a1", 100).await.unwrap();
        store.create_call_record("u1", "c2", "a1", 300).await.unwrap();
        store.create_call_record("u2", "c3", "a1", 200).await.unwrap();

        let history = store.get_call_history("u1").await.unwrap();
        let ids: Vec<&str> = history.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c1"]);
    }

    #[tokio::test]
    async fn onboarding_defaults_and_records() {
        let store = MemoryStore::new();
        let empty = store.get_onboarding("u1").await.unwrap();
        assert!(!empty.is_completed);
        assert_eq!(empty.user_id, "u1");

        let doc = store
            .record_answer("u1", Question::Goals, vec![Message::user("sleep better")], "c1", "a1").await
            .unwrap();
        assert!(doc.goals.completed);
        assert_eq!(store.get_onboarding("u1").await.unwrap(), doc);
    }
}
