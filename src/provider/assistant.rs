use log::{ info, warn };
use std::sync::Arc;

use super::CallProvider;
use crate::cli::Args;
use crate::error::ProviderError;
use crate::store::AssistantStore;

/// Configuration used when a user has no assistant yet.
#[derive(Debug, Clone)]
pub struct AssistantTemplate {
    pub name: String,
    pub system_prompt: String,
    pub first_message: String,
    pub model_provider: String,
    pub model: String,
    pub voice_provider: String,
    pub voice_id: String,
}

impl AssistantTemplate {
    pub fn from_args(args: &Args) -> Self {
        Self {
            name: args.assistant_name.clone(),
            system_prompt: args.assistant_prompt.clone(),
            first_message: args.assistant_first_message.clone(),
            model_provider: args.assistant_model_provider.clone(),
            model: args.assistant_model.clone(),
            voice_provider: args.assistant_voice_provider.clone(),
            voice_id: args.assistant_voice_id.clone(),
        }
    }
}

/// Resolves the assistant a user talks to, creating one on first use.
pub struct AssistantProvisioner {
    provider: Arc<dyn CallProvider>,
    store: Arc<dyn AssistantStore>,
    template: AssistantTemplate,
}

impl AssistantProvisioner {
    pub fn new(
        provider: Arc<dyn CallProvider>,
        store: Arc<dyn AssistantStore>,
        template: AssistantTemplate
    ) -> Self {
        Self { provider, store, template }
    }

    pub async fn resolve(&self, user_id: &str) -> Result<String, ProviderError> {
        match self.store.get_assistant_id(user_id).await {
            Ok(Some(existing)) => {
                return Ok(existing);
            }
            Ok(None) => {}
            Err(e) => warn!("Assistant lookup failed for user {}: {}", user_id, e),
        }

        let assistant_id = self.provider.create_assistant(&self.template).await?;
        info!("Created assistant {} for user {}", assistant_id, user_id);
        if let Err(e) = self.store.set_assistant_id(user_id, &assistant_id).await {
            warn!("Failed to remember assistant {} for user {}: {}", assistant_id, user_id, e);
        }
        Ok(assistant_id)
    }
}
