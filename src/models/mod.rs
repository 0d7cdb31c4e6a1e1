pub mod call;
pub mod onboarding;
pub mod websocket;
