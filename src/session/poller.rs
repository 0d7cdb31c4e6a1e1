use log::{ debug, info, warn };
use std::sync::Arc;
use std::time::Duration;

use crate::provider::{ CallProvider, ProviderCall };

pub const DEFAULT_POLL_ATTEMPTS: u32 = 5;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_POLL_ATTEMPTS,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug)]
pub enum PollOutcome {
    /// The provider finalized the call and returned its messages.
    Ready {
        call: ProviderCall,
        attempts: u32,
    },
    /// The budget ran out. `last` is the most recent successful fetch, if any.
    TimedOut {
        last: Option<ProviderCall>,
        attempts: u32,
    },
}

impl PollOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Ready { attempts, .. } | PollOutcome::TimedOut { attempts, .. } => *attempts,
        }
    }
}

/// Waits for the provider to publish the finalized record of a call.
pub struct TranscriptPoller {
    provider: Arc<dyn CallProvider>,
    config: PollerConfig,
}

impl TranscriptPoller {
    pub fn new(provider: Arc<dyn CallProvider>, config: PollerConfig) -> Self {
        Self { provider, config }
    }

    /// Polls until the call is terminal with a non-empty message list, or the
    /// attempt budget is spent. Failed requests use up an attempt like any other.
    pub async fn poll(&self, call_id: &str) -> PollOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last = None;

        for attempt in 1..=max_attempts {
            match self.provider.get_call(call_id).await {
                Ok(call) => {
                    let message_count = call.conversation().len();
                    debug!(
                        "Poll {}/{} for call {}: status={:?}, messages={}",
                        attempt,
                        max_attempts,
                        call_id,
                        call.status,
                        message_count
                    );
                    if call.status.is_terminal() && message_count > 0 {
                        info!("Transcript for call {} ready after {} attempt(s)", call_id, attempt);
                        return PollOutcome::Ready { call, attempts: attempt };
                    }
                    last = Some(call);
                }
                Err(e) => {
                    warn!("Poll {}/{} for call {} failed: {}", attempt, max_attempts, call_id, e);
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.config.interval).await;
            }
        }

        warn!("Gave up waiting for transcript of call {} after {} attempts", call_id, max_attempts);
        PollOutcome::TimedOut { last, attempts: max_attempts }
    }
}
