use crate::error::{RagError, Result};
use std::env;
use std::time::Duration;

pub const DEFAULT_EMBEDDING_ENDPOINT: &str =
    "https://dashscope.aliyuncs.com/compatible-mode/v1/embeddings";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-v4";
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1024;

pub const DEFAULT_CHAT_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Configuration for the embedding service
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub dimension: usize,
    pub timeout: Duration,
}

/// Configuration for the chat-completion service
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Chunk splitter settings, sizes in characters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_size: usize,
    pub overlap: usize,
    /// Most- to least-preferred. The empty string splits into characters.
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingConfig {
            max_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            separators: ["\n\n", "\n", " ", ""].iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(RagError::Config("chunk max_size must be positive".into()));
        }
        if self.overlap >= self.max_size {
            return Err(RagError::Config(format!(
                "chunk overlap ({}) must be smaller than max_size ({})",
                self.overlap, self.max_size
            )));
        }
        Ok(())
    }
}

/// Complete application configuration, validated once at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub chat: ChatConfig,
    pub chunking: ChunkingConfig,
}

impl Config {
    /// Build a configuration with default endpoints and explicit credentials
    pub fn new(embedding_api_key: impl Into<String>, chat_api_key: impl Into<String>) -> Self {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        Config {
            embedding: EmbeddingConfig {
                api_key: embedding_api_key.into(),
                endpoint: DEFAULT_EMBEDDING_ENDPOINT.to_string(),
                model: DEFAULT_EMBEDDING_MODEL.to_string(),
                dimension: DEFAULT_EMBEDDING_DIMENSION,
                timeout,
            },
            chat: ChatConfig {
                api_key: chat_api_key.into(),
                base_url: DEFAULT_CHAT_BASE_URL.to_string(),
                model: DEFAULT_CHAT_MODEL.to_string(),
                temperature: DEFAULT_TEMPERATURE,
                max_tokens: DEFAULT_MAX_TOKENS,
                timeout,
            },
            chunking: ChunkingConfig::default(),
        }
    }

    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let embedding_key = get("DASHSCOPE_API_KEY").unwrap_or_default();
        let chat_key = get("DEEPSEEK_API_KEY").unwrap_or_default();
        let mut config = Config::new(embedding_key, chat_key);

        if let Some(endpoint) = get("EMBEDDING_ENDPOINT") {
            config.embedding.endpoint = endpoint;
        }
        if let Some(model) = get("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Some(dimension) = get("EMBEDDING_DIMENSION") {
            config.embedding.dimension = dimension.trim().parse().map_err(|_| {
                RagError::Config(format!("EMBEDDING_DIMENSION is not a number: {}", dimension))
            })?;
        }
        if let Some(base_url) = get("CHAT_BASE_URL") {
            config.chat.base_url = base_url;
        }
        if let Some(model) = get("CHAT_MODEL") {
            config.chat.model = model;
        }
        if let Some(secs) = get("REQUEST_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                RagError::Config(format!("REQUEST_TIMEOUT_SECS is not a number: {}", secs))
            })?;
            config.embedding.timeout = Duration::from_secs(secs);
            config.chat.timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedding.api_key.trim().is_empty() {
            return Err(RagError::Config(
                "DASHSCOPE_API_KEY is required. Please set it in .env file.".into(),
            ));
        }
        if self.chat.api_key.trim().is_empty() {
            return Err(RagError::Config(
                "DEEPSEEK_API_KEY is required. Please set it in .env file or provide it directly."
                    .into(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(RagError::Config("embedding dimension must be positive".into()));
        }
        if self.embedding.timeout.is_zero() || self.chat.timeout.is_zero() {
            return Err(RagError::Config("request timeout must be positive".into()));
        }
        self.chunking.validate()
    }
}
