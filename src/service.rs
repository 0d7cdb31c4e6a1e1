use log::info;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::Args;
use crate::error::PersistenceError;
use crate::knowledge::create_knowledge_base;
use crate::models::call::CallRecord;
use crate::models::onboarding::OnboardingResponse;
use crate::provider::{ new_client, AssistantProvisioner, AssistantTemplate, CallProvider, ProviderConfig };
use crate::session::{ CallContext, CallController, PollerConfig };
use crate::store::initialize_stores;

/// Process-wide collaborators. Each connection gets its own controller.
#[derive(Clone)]
pub struct CallService {
    ctx: CallContext,
}

impl CallService {
    pub fn new(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let provider = Self::initialize_provider(args)?;
        let stores = initialize_stores(args)?;
        let knowledge = create_knowledge_base(args)?;

        let template = AssistantTemplate::from_args(args);
        info!(
            "Assistant template: Name={}, Model={}/{}, Voice={}/{}",
            template.name,
            template.model_provider,
            template.model,
            template.voice_provider,
            template.voice_id
        );
        let provisioner = Arc::new(
            AssistantProvisioner::new(provider.clone(), stores.assistants.clone(), template)
        );

        let poller = PollerConfig {
            max_attempts: args.poll_attempts,
            interval: Duration::from_millis(args.poll_interval_ms),
        };
        info!("Transcript polling: {} attempts every {:?}", poller.max_attempts, poller.interval);

        Ok(Self::from_context(CallContext {
            provider,
            provisioner,
            stores,
            knowledge,
            poller,
            start_timeout: Duration::from_secs(args.call_start_timeout_secs),
        }))
    }

    pub fn from_context(ctx: CallContext) -> Self {
        Self { ctx }
    }

    fn initialize_provider(args: &Args) -> Result<Arc<dyn CallProvider>, Box<dyn Error + Send + Sync>> {
        let config = ProviderConfig {
            api_key: args.provider_api_key.clone(),
            base_url: args.provider_base_url.clone(),
        };
        let provider = new_client(&config)?;
        info!(
            "Call provider configured: BaseURL={}",
            config.base_url.as_deref().unwrap_or("provider default")
        );
        Ok(provider)
    }

    pub fn controller(&self, user_id: &str) -> CallController {
        CallController::new(user_id, self.ctx.clone())
    }

    pub async fn call_history(&self, user_id: &str) -> Result<Vec<CallRecord>, PersistenceError> {
        self.ctx.stores.calls.get_call_history(user_id).await
    }

    pub async fn onboarding(&self, user_id: &str) -> Result<OnboardingResponse, PersistenceError> {
        self.ctx.stores.onboarding.get_onboarding(user_id).await
    }
}
