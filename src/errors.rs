use thiserror::Error;

#[derive(Debug, Error)]
pub enum PilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("Browser backend error: {0}")]
    Backend(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Timed out after {0}s waiting for the model")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Task cancelled")]
    Cancelled,
}

pub type PilotResult<T> = Result<T, PilotError>;
