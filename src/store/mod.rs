pub mod memory;
pub mod redis;

use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::sync::Arc;

use crate::cli::Args;
use crate::error::PersistenceError;
use crate::models::call::{ CallRecord, CallUpdate, Message };
use crate::models::onboarding::{ OnboardingResponse, Question };

#[async_trait]
pub trait CallStore: Send + Sync {
    async fn create_call_record(
        &self,
        user_id: &str,
        call_id: &str,
        assistant_id: &str,
        start_time: i64
    ) -> Result<(), PersistenceError>;

    async fn update_call_record(
        &self,
        user_id: &str,
        call_id: &str,
        update: CallUpdate
    ) -> Result<CallRecord, PersistenceError>;

    /// All calls of a user, newest first.
    async fn get_call_history(&self, user_id: &str) -> Result<Vec<CallRecord>, PersistenceError>;
}

#[async_trait]
pub trait OnboardingStore: Send + Sync {
    /// Returns an empty document for users who have not started onboarding.
    async fn get_onboarding(&self, user_id: &str) -> Result<OnboardingResponse, PersistenceError>;

    async fn record_answer(
        &self,
        user_id: &str,
        question: Question,
        messages: Vec<Message>,
        call_id: &str,
        assistant_id: &str
    ) -> Result<OnboardingResponse, PersistenceError>;
}

#[async_trait]
pub trait AssistantStore: Send + Sync {
    async fn get_assistant_id(&self, user_id: &str) -> Result<Option<String>, PersistenceError>;

    async fn set_assistant_id(&self, user_id: &str, assistant_id: &str) -> Result<(), PersistenceError>;
}

#[derive(Clone)]
pub struct Stores {
    pub calls: Arc<dyn CallStore>,
    pub onboarding: Arc<dyn OnboardingStore>,
    pub assistants: Arc<dyn AssistantStore>,
}

impl Stores {
    fn shared<S>(store: Arc<S>) -> Self
        where S: CallStore + OnboardingStore + AssistantStore + 'static
    {
        Self {
            calls: store.clone(),
            onboarding: store.clone(),
            assistants: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::shared(Arc::new(memory::MemoryStore::new()))
    }
}

pub fn create_stores(args: &Args) -> Result<Stores, Box<dyn Error + Send + Sync>> {
    match args.store_type.to_lowercase().as_str() {
        "redis" => {
            let store = redis::RedisStore::new(&args.store_host, &args.store_redis_prefix)?;
            Ok(Stores::shared(Arc::new(store)))
        }
        "memory" => Ok(Stores::in_memory()),
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported store type: {}", args.store_type)
                    )
                )
            ),
    }
}

pub fn initialize_stores(args: &Args) -> Result<Stores, Box<dyn Error + Send + Sync>> {
    info!("Call records will be stored in: {} at {}", args.store_type, args.store_host);
    create_stores(args)
}
