//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.wa-relay/config.json`) and environment.
//! Secrets may live in either place; environment variables win when set.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// WhatsApp Cloud API settings (webhook secret, outbound credentials).
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,

    /// Completion provider settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Conversation history settings.
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Duplicate delivery suppression.
    #[serde(default)]
    pub dedup: DedupConfig,
}

/// Bind address, port, and webhook route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 8000).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Route that receives both the GET handshake and POST events (default "/webhook").
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
}

fn default_gateway_port() -> u16 {
    8000
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_webhook_path() -> String {
    "/webhook".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            webhook_path: default_webhook_path(),
        }
    }
}

/// WhatsApp Cloud API config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppConfig {
    /// App secret used to sign webhook bodies. Overridden by WHATSAPP_APP_SECRET.
    pub app_secret: Option<String>,
    /// Token echoed back during the subscribe handshake. Overridden by WHATSAPP_VERIFY_TOKEN.
    pub verify_token: Option<String>,
    /// Bearer token for the send-message API. Overridden by WHATSAPP_ACCESS_TOKEN.
    pub access_token: Option<String>,
    /// Numeric sender id. Overridden by WHATSAPP_PHONE_NUMBER_ID.
    pub phone_number_id: Option<String>,
    /// Graph API version segment, e.g. "v18.0". Overridden by WHATSAPP_API_VERSION.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Graph API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Timeout for one outbound send.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

fn default_api_version() -> String {
    "v18.0".to_string()
}

fn default_api_base() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_send_timeout_secs() -> u64 {
    10
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            app_secret: None,
            verify_token: None,
            access_token: None,
            phone_number_id: None,
            api_version: default_api_version(),
            api_base: default_api_base(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

/// OpenAI-compatible completion provider config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAiConfig {
    /// API key. Overridden by OPENAI_API_KEY.
    pub api_key: Option<String>,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_openai_timeout_secs")]
    pub timeout_secs: u64,
    /// Assistant instructions sent as the first message of every request. Overridden by OPENAI_SYSTEM_PROMPT.
    pub system_prompt: Option<String>,
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    500
}

fn default_openai_timeout_secs() -> u64 {
    30
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_openai_timeout_secs(),
            system_prompt: None,
        }
    }
}

/// Conversation history config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationConfig {
    /// Number of stored messages sent as context (default 10).
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// When set, conversations are persisted to this JSON file. Relative paths resolve against the config file's parent.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

fn default_history_limit() -> usize {
    10
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            store_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupConfig {
    /// Seconds a message id stays suppressed after first delivery (default 300).
    #[serde(default = "default_dedup_window_secs")]
    pub window_secs: u64,
}

fn default_dedup_window_secs() -> u64 {
    300
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_secs: default_dedup_window_secs(),
        }
    }
}

impl DedupConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Values that must be present before the server can start.
#[derive(Debug, Clone)]
pub struct Secrets {
    pub app_secret: String,
    pub verify_token: String,
    pub access_token: String,
    pub phone_number_id: String,
    pub api_version: String,
    pub openai_api_key: String,
    pub system_prompt: String,
}

impl Secrets {
    /// Resolve every required value from env and config. Fails listing all missing keys at once.
    pub fn resolve(config: &Config) -> Result<Self> {
        let wa = &config.whatsapp;
        let fields = [
            ("WHATSAPP_APP_SECRET", wa.app_secret.as_deref()),
            ("WHATSAPP_VERIFY_TOKEN", wa.verify_token.as_deref()),
            ("WHATSAPP_ACCESS_TOKEN", wa.access_token.as_deref()),
            ("WHATSAPP_PHONE_NUMBER_ID", wa.phone_number_id.as_deref()),
            ("WHATSAPP_API_VERSION", Some(wa.api_version.as_str())),
            ("OPENAI_API_KEY", config.openai.api_key.as_deref()),
            ("OPENAI_SYSTEM_PROMPT", config.openai.system_prompt.as_deref()),
        ];
        let mut values = Vec::with_capacity(fields.len());
        let mut missing = Vec::new();
        for (env_key, fallback) in fields {
            match resolve_value(env_key, fallback) {
                Some(v) => values.push(v),
                None => missing.push(env_key),
            }
        }
        if !missing.is_empty() {
            anyhow::bail!(
                "missing required configuration: {} (set in config file or environment)",
                missing.join(", ")
            );
        }
        let mut it = values.into_iter();
        let mut next = || it.next().unwrap_or_default();
        Ok(Self {
            app_secret: next(),
            verify_token: next(),
            access_token: next(),
            phone_number_id: next(),
            api_version: next(),
            openai_api_key: next(),
            system_prompt: next(),
        })
    }
}

/// Env var (trimmed, non-empty) overrides the config value (trimmed, non-empty).
fn resolve_value(env_key: &str, config_value: Option<&str>) -> Option<String> {
    std::env::var(env_key)
        .ok()
        .and_then(|s| non_empty(&s))
        .or_else(|| config_value.and_then(non_empty))
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("WA_RELAY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".wa-relay").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Resolve the conversation store file: relative paths are resolved against the config file's parent.
pub fn resolve_store_path(config: &Config, config_path: &Path) -> Option<PathBuf> {
    let p = config.conversation.store_path.as_ref()?;
    if p.as_os_str().is_empty() {
        return None;
    }
    if p.is_absolute() {
        return Some(p.clone());
    }
    let parent = config_path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Some(parent.join(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_platform_expectations() {
        let c = Config::default();
        assert_eq!(c.gateway.port, 8000);
        assert_eq!(c.gateway.webhook_path, "/webhook");
        assert_eq!(c.whatsapp.send_timeout_secs, 10);
        assert_eq!(c.conversation.history_limit, 10);
        assert_eq!(c.dedup.window(), Duration::from_secs(300));
        assert_eq!(c.openai.max_tokens, 500);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: Config = serde_json::from_str(
            r#"{"whatsapp":{"appSecret":"s","phoneNumberId":"123"},"dedup":{"windowSecs":60}}"#,
        )
        .unwrap();
        assert_eq!(c.whatsapp.app_secret.as_deref(), Some("s"));
        assert_eq!(c.whatsapp.api_version, "v18.0");
        assert_eq!(c.dedup.window_secs, 60);
        assert_eq!(c.gateway.bind, "127.0.0.1");
    }

    #[test]
    fn store_path_relative_resolves_against_config_dir() {
        let mut c = Config::default();
        c.conversation.store_path = Some(PathBuf::from("data/conversations.json"));
        let path = Path::new("/home/user/.wa-relay/config.json");
        assert_eq!(
            resolve_store_path(&c, path),
            Some(PathBuf::from("/home/user/.wa-relay/data/conversations.json"))
        );
    }

    #[test]
    fn store_path_unset_is_none() {
        let c = Config::default();
        assert_eq!(resolve_store_path(&c, Path::new("/x/config.json")), None);
    }

    #[test]
    fn blank_values_do_not_count() {
        assert_eq!(resolve_value("WA_RELAY_TEST_UNSET_KEY", Some("   ")), None);
        assert_eq!(
            resolve_value("WA_RELAY_TEST_UNSET_KEY", Some(" v ")),
            Some("v".to_string())
        );
    }
}
