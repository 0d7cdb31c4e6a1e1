use clap::Parser;
use std::num::NonZeroU32;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Host address and port for the WebSocket server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Optional port for the HTTP API (call history, onboarding). Disabled if not set.
    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Optional secret used to verify signed connection requests. If set, clients must send `ts` and `sig`.
    #[arg(long, env = "SERVER_SECRET")]
    pub server_secret: Option<String>,

    /// Maximum new WebSocket connections accepted per second.
    #[arg(long, env = "CONNECTION_RATE_LIMIT", default_value = "10")]
    pub connection_rate_limit: NonZeroU32,

    // --- Store Args ---
    /// Call record store type (redis, memory)
    #[arg(long, env = "STORE_TYPE", default_value = "redis")]
    pub store_type: String,

    /// Store host endpoint (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "STORE_HOST", default_value = "redis://127.0.0.1:6379")]
    pub store_host: String,

    /// Prefix for Redis keys.
    #[arg(long, env = "STORE_REDIS_PREFIX", default_value = "mirai:")]
    pub store_redis_prefix: String,

    // --- Voice Provider Args ---
    /// API Key for the voice call provider.
    #[arg(long, env = "PROVIDER_API_KEY", default_value = "")]
    pub provider_api_key: String,

    /// Base URL for the voice call provider API.
    #[arg(long, env = "PROVIDER_BASE_URL")] // No default, the client falls back to the public API
    pub provider_base_url: Option<String>,

    /// Seconds to wait for the provider to accept a new call.
    #[arg(long, env = "CALL_START_TIMEOUT_SECS", default_value = "15")]
    pub call_start_timeout_secs: u64,

    /// How many times to ask the provider for the final transcript after a call ends.
    #[arg(long, env = "POLL_ATTEMPTS", default_value = "5")]
    pub poll_attempts: u32,

    /// Milliseconds between transcript polls.
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "2000")]
    pub poll_interval_ms: u64,

    // --- Assistant Template Args ---
    /// Name given to newly provisioned assistants.
    #[arg(long, env = "ASSISTANT_NAME", default_value = "Mirai")]
    pub assistant_name: String,

    /// System prompt for newly provisioned assistants.
    #[arg(
        long,
        env = "ASSISTANT_PROMPT",
        default_value = "You are Mirai, the user's ideal future self. Speak warmly, listen closely and keep answers short."
    )]
    pub assistant_prompt: String,

    /// First sentence the assistant says when a call connects.
    #[arg(long, env = "ASSISTANT_FIRST_MESSAGE", default_value = "Hi, it's me. How are you feeling today?")]
    pub assistant_first_message: String,

    /// Model provider used by provisioned assistants (e.g., openai).
    #[arg(long, env = "ASSISTANT_MODEL_PROVIDER", default_value = "openai")]
    pub assistant_model_provider: String,

    /// Model used by provisioned assistants (e.g., gpt-4o).
    #[arg(long, env = "ASSISTANT_MODEL", default_value = "gpt-4o")]
    pub assistant_model: String,

    /// Voice provider used by provisioned assistants (e.g., 11labs).
    #[arg(long, env = "ASSISTANT_VOICE_PROVIDER", default_value = "11labs")]
    pub assistant_voice_provider: String,

    /// Voice id used by provisioned assistants.
    #[arg(long, env = "ASSISTANT_VOICE_ID", default_value = "burt")]
    pub assistant_voice_id: String,

    // --- Knowledge Base Args ---
    /// Knowledge base type conversations are uploaded to (http, memory)
    #[arg(long, env = "KNOWLEDGE_TYPE", default_value = "memory")]
    pub knowledge_type: String,

    /// Base URL of the knowledge base service. Required for the http type.
    #[arg(long, env = "KNOWLEDGE_URL")]
    pub knowledge_url: Option<String>,

    /// API Key for the knowledge base service.
    #[arg(long, env = "KNOWLEDGE_API_KEY", default_value = "")]
    pub knowledge_api_key: String,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}
