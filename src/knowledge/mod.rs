pub mod http;

use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::cli::Args;
use crate::error::KnowledgeError;
use crate::models::call::{ Message, Role };

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn upload_conversation(
        &self,
        user_id: &str,
        formatted_text: &str,
        timestamp: i64
    ) -> Result<(), KnowledgeError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct Upload {
    pub user_id: String,
    pub text: String,
    pub timestamp: i64,
}

/// Keeps uploads in memory; used when no knowledge service is configured.
#[derive(Default)]
pub struct MemoryKnowledgeBase {
    uploads: Mutex<Vec<Upload>>,
}

impl MemoryKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().await.clone()
    }
}

#[async_trait]
impl KnowledgeBase for MemoryKnowledgeBase {
    async fn upload_conversation(
        &self,
        user_id: &str,
        formatted_text: &str,
        timestamp: i64
    ) -> Result<(), KnowledgeError> {
        self.uploads.lock().await.push(Upload {
            user_id: user_id.to_string(),
            text: formatted_text.to_string(),
            timestamp,
        });
        Ok(())
    }
}

pub fn create_knowledge_base(
    args: &Args
) -> Result<Arc<dyn KnowledgeBase>, Box<dyn Error + Send + Sync>> {
    match args.knowledge_type.to_lowercase().as_str() {
        "http" => {
            let url = args.knowledge_url
                .clone()
                .filter(|u| !u.trim().is_empty())
                .ok_or("KNOWLEDGE_URL is required for the http knowledge base")?;
            let api_key = Some(args.knowledge_api_key.clone()).filter(|k| !k.is_empty());
            info!("Conversations will be uploaded to knowledge base at {}", url);
            Ok(Arc::new(http::HttpKnowledgeBase::new(url, api_key)?))
        }
        "memory" => {
            info!("Conversations will be kept in an in-memory knowledge base");
            Ok(Arc::new(MemoryKnowledgeBase::new()))
        }
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported knowledge base type: {}", args.knowledge_type)
                    )
                )
            ),
    }
}

pub fn format_conversation(messages: &[Message]) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let mut result = String::from("Conversation:\n");
    for msg in messages {
        let role_display = match msg.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
            Role::Other => "Other",
        };

        result.push_str(&format!("{}: {}\n", role_display, msg.content));
    }

    result
}
