use serde::{Deserialize, Serialize};

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}

/// Top-level runtime configuration, assembled from environment variables
/// with sensible local-development defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub data_dir: String,
    pub bind_host: String,
    pub port: u16,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    /// Exact origins allowed by CORS; empty means no browser origins.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".into(),
            bind_host: "127.0.0.1".into(),
            port: 7420,
            access: AccessConfig::default(),
            llm: LlmConfig::default(),
            cors_origins: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let cors_origins = std::env::var("STI_CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            data_dir: env_string("STI_DATA_DIR", &defaults.data_dir),
            bind_host: env_string("STI_BIND_HOST", &defaults.bind_host),
            port: env_parse("STI_PORT", defaults.port),
            access: AccessConfig::from_env(),
            llm: LlmConfig::from_env(),
            cors_origins,
        }
    }
}

/// Shared-secret access gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    pub enabled: bool,
    /// The shared secret. The gate refuses to enable without one.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Session cookie lifetime in hours.
    pub session_hours: u64,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            session_hours: 24 * 7,
        }
    }
}

impl AccessConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_bool("STI_ACCESS_ENABLED", defaults.enabled),
            token: std::env::var("STI_ACCESS_TOKEN").ok().filter(|t| !t.is_empty()),
            session_hours: env_parse("STI_ACCESS_SESSION_HOURS", defaults.session_hours),
        }
    }
}

/// Settings for the OpenAI-compatible completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://localhost:11434/v1".into(),
            model: "llama3.2".into(),
            max_tokens: 512,
            temperature: 0.3,
            timeout_secs: 30,
            api_key: None,
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_bool("STI_LLM_ENABLED", defaults.enabled),
            base_url: env_string("STI_LLM_BASE_URL", &defaults.base_url),
            model: env_string("STI_LLM_MODEL", &defaults.model),
            max_tokens: env_parse("STI_LLM_MAX_TOKENS", defaults.max_tokens),
            temperature: env_parse("STI_LLM_TEMPERATURE", defaults.temperature),
            timeout_secs: env_parse("STI_LLM_TIMEOUT_SECS", defaults.timeout_secs),
            api_key: std::env::var("STI_LLM_API_KEY").ok().filter(|k| !k.is_empty()),
        }
    }
}
