//! TOML configuration parsing and validation.
//!
//! Secrets and model endpoints have no built-in defaults: a config file
//! that omits them fails to load. The token signing secret may also be
//! supplied through the `AETHERIUM_AUTH_SECRET` environment variable,
//! which takes precedence over the file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable that overrides `[auth].secret`.
pub const AUTH_SECRET_ENV: &str = "AETHERIUM_AUTH_SECRET";

/// Shortest accepted signing secret, in bytes.
const MIN_SECRET_LEN: usize = 16;

/// Longest accepted token lifetime: one year.
const MAX_TOKEN_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Browser origins allowed to call the API with credentials.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_token_ttl_minutes")]
    pub token_ttl_minutes: i64,
}

fn default_token_ttl_minutes() -> i64 {
    30
}

impl AuthConfig {
    /// The signing secret after validation. Only call on a loaded config.
    pub fn secret(&self) -> &str {
        self.secret.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `ollama` or `openai` (any OpenAI-compatible endpoint).
    pub provider: String,
    pub url: String,
    pub model: String,
    /// Per-request timeout. Unset means requests may run indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 3,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            top_k: default_top_k(),
        }
    }
}

fn default_collection() -> String {
    "book_project".to_string()
}
fn default_top_k() -> usize {
    3
}

/// Optional per-task system prompt overrides.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PromptsConfig {
    pub suggest: Option<String>,
    pub improve: Option<String>,
    pub summarize: Option<String>,
    pub review: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if let Ok(secret) = std::env::var(AUTH_SECRET_ENV) {
        if !secret.is_empty() {
            config.auth.secret = Some(secret);
        }
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.auth.secret.as_deref() {
        None | Some("") => anyhow::bail!(
            "auth.secret must be set in the config file or via {}",
            AUTH_SECRET_ENV
        ),
        Some(s) if s.len() < MIN_SECRET_LEN => {
            anyhow::bail!("auth.secret must be at least {} bytes", MIN_SECRET_LEN)
        }
        Some(_) => {}
    }

    if !(1..=MAX_TOKEN_TTL_MINUTES).contains(&config.auth.token_ttl_minutes) {
        anyhow::bail!(
            "auth.token_ttl_minutes must be between 1 and {}",
            MAX_TOKEN_TTL_MINUTES
        );
    }

    match config.llm.provider.as_str() {
        "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be ollama or openai.",
            other
        ),
    }
    if config.llm.url.trim().is_empty() {
        anyhow::bail!("llm.url must not be empty");
    }
    if config.llm.model.trim().is_empty() {
        anyhow::bail!("llm.model must not be empty");
    }

    if config.memory.collection.trim().is_empty() {
        anyhow::bail!("memory.collection must not be empty");
    }

    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    if embedding.is_enabled() {
        if embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        if embedding.provider != "local" {
            if embedding.dims.is_none() || embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    embedding.provider
                );
            }
            if embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    embedding.provider
                );
            }
        }
        if embedding.provider == "ollama" && embedding.url.is_none() {
            anyhow::bail!("embedding.url must be specified when provider is 'ollama'");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[db]
path = "./data/aetherium.sqlite"

[server]
bind = "127.0.0.1:8000"

[auth]
secret = "0123456789abcdef0123456789abcdef"

[llm]
provider = "ollama"
url = "http://localhost:11434"
model = "phi3:mini"
"#;

    fn parse(extra: &str) -> Result<Config> {
        let config: Config = toml::from_str(&format!("{}{}", BASE, extra))?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_defaults_applied() {
        let config = parse("").unwrap();
        assert_eq!(config.auth.token_ttl_minutes, 30);
        assert_eq!(config.memory.collection, "book_project");
        assert_eq!(config.memory.top_k, 3);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.server.cors_origins, vec!["http://localhost:5173"]);
        assert!(config.llm.timeout_secs.is_none());
    }

    #[test]
    fn test_missing_secret_rejected() {
        let text = BASE.replace("secret = \"0123456789abcdef0123456789abcdef\"", "");
        let config: Config = toml::from_str(&text).unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("auth.secret"));
    }

    #[test]
    fn test_short_secret_rejected() {
        let text = BASE.replace("0123456789abcdef0123456789abcdef", "short");
        let config: Config = toml::from_str(&text).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_token_ttl_bounds() {
        let text = BASE.replace("[llm]", "token_ttl_minutes = 1000000000000\n\n[llm]");
        let config: Config = toml::from_str(&text).unwrap();
        assert_eq!(config.auth.token_ttl_minutes, 1_000_000_000_000);
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("token_ttl_minutes"));

        let text = BASE.replace("[llm]", "token_ttl_minutes = 0\n\n[llm]");
        let config: Config = toml::from_str(&text).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_llm_model_is_parse_error() {
        let text = BASE.replace("model = \"phi3:mini\"", "");
        assert!(toml::from_str::<Config>(&text).is_err());
    }

    #[test]
    fn test_unknown_llm_provider_rejected() {
        let text = BASE.replace("provider = \"ollama\"", "provider = \"gpt4all\"");
        let config: Config = toml::from_str(&text).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_ollama_embeddings_need_url() {
        let err = parse(
            r#"
[embedding]
provider = "ollama"
model = "all-minilm"
dims = 384
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.url"));
    }

    #[test]
    fn test_openai_embeddings_need_dims() {
        let err = parse(
            r#"
[embedding]
provider = "openai"
model = "text-embedding-3-small"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_prompt_overrides_parsed() {
        let config = parse(
            r#"
[prompts]
review = "Be brief."
"#,
        )
        .unwrap();
        assert_eq!(config.prompts.review.as_deref(), Some("Be brief."));
        assert!(config.prompts.improve.is_none());
    }
}
