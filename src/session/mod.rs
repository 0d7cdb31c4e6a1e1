pub mod aggregator;
pub mod controller;
pub mod poller;

pub use aggregator::{ MessageAggregator, ReconcileScope };
pub use controller::{ CallContext, CallController, CallFlow, CallStarted, CallState, StartRequest, StopOutcome };
pub use poller::{ PollOutcome, PollerConfig, TranscriptPoller };
