use crate::error::{GatewayError, Result};
use crate::models::default_allowed_models;
use crate::providers::ProviderPreset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";
const DEFAULT_LISTEN_PORT: u16 = 8787;
const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const MIN_TIMEOUT_MS: u64 = 1_000;
const MAX_TIMEOUT_MS: u64 = 600_000;

/// What to do when a client asks for a stream while streaming is disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingPolicy {
    /// Refuse the request with a 400.
    #[default]
    Reject,
    /// Call the upstream without streaming and replay the result as one SSE envelope.
    Downgrade,
}

impl StreamingPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "reject" => Some(Self::Reject),
            "downgrade" => Some(Self::Downgrade),
            _ => None,
        }
    }
}

/// The on-disk TOML config. Every field is optional; anything left out falls
/// through to an environment override or a built-in default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub listen_host: Option<String>,
    pub listen_port: Option<u16>,
    pub upstream: UpstreamSection,
    pub access: AccessSection,
    pub streaming: StreamingSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSection {
    pub provider: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessSection {
    pub local_api_keys: Option<Vec<String>>,
    pub allowed_models: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSection {
    pub disabled: Option<bool>,
    pub policy: Option<StreamingPolicy>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir. Finding nothing is fine:
    /// the gateway can run from environment variables alone.
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::info!("No config file found, using environment and defaults");
        Ok(Self::default())
    }

    fn preset(&self) -> Option<&'static ProviderPreset> {
        self.upstream
            .provider
            .as_deref()
            .and_then(ProviderPreset::from_name)
    }

    fn base_url(&self) -> Option<String> {
        self.upstream
            .base_url
            .clone()
            .or_else(|| self.preset().map(|p| p.base_url.to_string()))
    }

    /// Explicit key first, then the variable named by `api_key_env` (or the preset's default).
    fn api_key(&self) -> Option<String> {
        if let Some(ref key) = self.upstream.api_key {
            return Some(key.clone());
        }
        let var = self
            .upstream
            .api_key_env
            .clone()
            .or_else(|| self.preset().map(|p| p.default_api_key_env.to_string()))?;
        std::env::var(var).ok().filter(|v| !v.trim().is_empty())
    }
}

/// Values taken from the process environment. `None` means "not set", so the
/// file or the default wins for that field.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub listen_host: Option<String>,
    pub listen_port: Option<u16>,
    pub upstream_base_url: Option<String>,
    pub upstream_api_key: Option<String>,
    pub local_api_keys: Option<Vec<String>>,
    pub allowed_models: Option<Vec<String>>,
    pub request_timeout_ms: Option<u64>,
    pub disable_streaming: Option<bool>,
    pub streaming_policy: Option<StreamingPolicy>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            listen_host: get("LISTEN_HOST"),
            listen_port: get("LISTEN_PORT").and_then(|v| v.parse().ok()),
            upstream_base_url: get("UPSTREAM_BASE_URL"),
            upstream_api_key: get("UPSTREAM_API_KEY"),
            local_api_keys: get("LOCAL_API_KEYS").map(|v| parse_csv(&v)).filter(|v| !v.is_empty()),
            allowed_models: get("ALLOWED_MODELS").map(|v| parse_csv(&v)).filter(|v| !v.is_empty()),
            request_timeout_ms: get("REQUEST_TIMEOUT_MS").and_then(|v| v.parse().ok()),
            disable_streaming: get("DISABLE_STREAMING").map(|v| parse_bool(&v)),
            streaming_policy: get("STREAMING_POLICY").and_then(|v| StreamingPolicy::parse(&v)),
        }
    }
}

/// Three-tier resolution: environment override, then file value, then default.
pub fn resolve<T>(env: Option<T>, file: Option<T>, default: T) -> T {
    env.or(file).unwrap_or(default)
}

/// The effective configuration handed to the rest of the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_host: String,
    pub listen_port: u16,
    pub upstream_base_url: String,
    pub upstream_api_key: String,
    pub local_api_keys: Vec<String>,
    pub allowed_models: Vec<String>,
    pub request_timeout_ms: u64,
    pub disable_streaming: bool,
    pub streaming_policy: StreamingPolicy,
}

impl GatewayConfig {
    pub fn resolve(file: &FileConfig, env: &EnvOverrides) -> Self {
        let upstream_base_url = resolve(
            env.upstream_base_url.clone(),
            file.base_url(),
            String::new(),
        )
        .trim()
        .trim_end_matches('/')
        .to_string();

        let mut allowed_models = normalize_list(resolve(
            env.allowed_models.clone(),
            file.access.allowed_models.clone(),
            Vec::new(),
        ));
        if allowed_models.is_empty() {
            allowed_models = default_allowed_models();
        }

        Self {
            listen_host: resolve(
                env.listen_host.clone(),
                file.listen_host.clone(),
                DEFAULT_LISTEN_HOST.to_string(),
            ),
            listen_port: resolve(env.listen_port, file.listen_port, DEFAULT_LISTEN_PORT),
            upstream_base_url,
            upstream_api_key: resolve(env.upstream_api_key.clone(), file.api_key(), String::new()),
            local_api_keys: normalize_list(resolve(
                env.local_api_keys.clone(),
                file.access.local_api_keys.clone(),
                Vec::new(),
            )),
            allowed_models,
            request_timeout_ms: clamp_timeout(resolve(
                env.request_timeout_ms,
                file.upstream.request_timeout_ms,
                DEFAULT_TIMEOUT_MS,
            )),
            disable_streaming: resolve(env.disable_streaming, file.streaming.disabled, false),
            streaming_policy: resolve(
                env.streaming_policy,
                file.streaming.policy,
                StreamingPolicy::default(),
            ),
        }
    }

    /// Both an upstream URL and a key are required before any request is forwarded.
    pub fn is_configured(&self) -> bool {
        !self.upstream_base_url.is_empty() && !self.upstream_api_key.is_empty()
    }

    /// `{base_url}/chat/completions`. The base URL carries the version path
    /// (`https://api.openai.com/v1`); nothing else is inserted.
    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.upstream_base_url)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::resolve(&FileConfig::default(), &EnvOverrides::default())
    }
}

fn parse_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn normalize_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn clamp_timeout(ms: u64) -> u64 {
    ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("claude-gateway.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("claude-gateway")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("claude-gateway").join("config.toml"));
        }
        if let Some(home) = home_dir() {
            paths.push(home.join(".config").join("claude-gateway").join("config.toml"));
        }
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(".claude-gateway.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env_from(pairs: &[(&str, &str)]) -> EnvOverrides {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvOverrides::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_load_config() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
listen_port = 5000

[upstream]
base_url = "https://my-server.com/v1/"
api_key = "sk-test"
request_timeout_ms = 30000

[access]
allowed_models = ["claude-sonnet-4-20250514"]

[streaming]
disabled = true
policy = "downgrade"
"#
        )
        .unwrap();

        let file = FileConfig::load(f.path()).unwrap();
        let config = GatewayConfig::resolve(&file, &EnvOverrides::default());

        assert_eq!(config.listen_port, 5000);
        assert_eq!(config.listen_host, "127.0.0.1");
        assert_eq!(config.upstream_base_url, "https://my-server.com/v1");
        assert_eq!(
            config.chat_completions_url(),
            "https://my-server.com/v1/chat/completions"
        );
        assert_eq!(config.request_timeout_ms, 30000);
        assert_eq!(config.allowed_models, vec!["claude-sonnet-4-20250514"]);
        assert!(config.disable_streaming);
        assert_eq!(config.streaming_policy, StreamingPolicy::Downgrade);
        assert!(config.is_configured());
    }

    #[test]
    fn test_resolve_precedence() {
        assert_eq!(resolve(Some(1), Some(2), 3), 1);
        assert_eq!(resolve(None, Some(2), 3), 2);
        assert_eq!(resolve(None::<i32>, None, 3), 3);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = FileConfig::default();
        file.upstream.base_url = Some("https://file.example/v1".to_string());
        file.upstream.api_key = Some("file-key".to_string());
        file.streaming.disabled = Some(true);

        let env = env_from(&[
            ("UPSTREAM_BASE_URL", "https://env.example/v1"),
            ("DISABLE_STREAMING", "off"),
            ("LOCAL_API_KEYS", " a, ,b "),
        ]);
        let config = GatewayConfig::resolve(&file, &env);

        assert_eq!(config.upstream_base_url, "https://env.example/v1");
        assert_eq!(config.upstream_api_key, "file-key");
        assert!(!config.disable_streaming);
        assert_eq!(config.local_api_keys, vec!["a", "b"]);
    }

    #[test]
    fn test_env_parsing() {
        let env = env_from(&[
            ("LISTEN_PORT", "9000"),
            ("REQUEST_TIMEOUT_MS", "not-a-number"),
            ("DISABLE_STREAMING", "YES"),
            ("STREAMING_POLICY", "Downgrade"),
            ("ALLOWED_MODELS", ""),
        ]);
        assert_eq!(env.listen_port, Some(9000));
        assert_eq!(env.request_timeout_ms, None);
        assert_eq!(env.disable_streaming, Some(true));
        assert_eq!(env.streaming_policy, Some(StreamingPolicy::Downgrade));
        assert_eq!(env.allowed_models, None);
    }

    #[test]
    fn test_timeout_is_clamped() {
        let low = env_from(&[("REQUEST_TIMEOUT_MS", "5")]);
        assert_eq!(
            GatewayConfig::resolve(&FileConfig::default(), &low).request_timeout_ms,
            1_000
        );

        let high = env_from(&[("REQUEST_TIMEOUT_MS", "99999999")]);
        assert_eq!(
            GatewayConfig::resolve(&FileConfig::default(), &high).request_timeout_ms,
            600_000
        );
    }

    #[test]
    fn test_defaults() {
        let mut file = FileConfig::default();
        file.access.allowed_models = Some(vec!["  ".to_string()]);
        let config = GatewayConfig::resolve(&file, &EnvOverrides::default());

        assert_eq!(config.listen_port, 8787);
        assert_eq!(config.request_timeout_ms, 60_000);
        assert_eq!(config.streaming_policy, StreamingPolicy::Reject);
        assert_eq!(config.allowed_models, default_allowed_models());
        assert!(!config.is_configured());
    }

    #[test]
    fn test_base_url_from_preset() {
        let mut file = FileConfig::default();
        file.upstream.provider = Some("openai".to_string());
        file.upstream.api_key = Some("sk".to_string());
        let config = GatewayConfig::resolve(&file, &EnvOverrides::default());
        assert_eq!(config.upstream_base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_explicit_base_url_beats_preset() {
        let mut file = FileConfig::default();
        file.upstream.provider = Some("openai".to_string());
        file.upstream.base_url = Some("https://proxy.internal/v1".to_string());
        let config = GatewayConfig::resolve(&file, &EnvOverrides::default());
        assert_eq!(config.upstream_base_url, "https://proxy.internal/v1");
    }

    #[test]
    fn test_chat_completions_url_appends_only_endpoint() {
        let env = env_from(&[("UPSTREAM_BASE_URL", "https://host.example/v1/")]);
        let config = GatewayConfig::resolve(&FileConfig::default(), &env);
        assert_eq!(
            config.chat_completions_url(),
            "https://host.example/v1/chat/completions"
        );

        let env = env_from(&[("UPSTREAM_BASE_URL", "https://host.example")]);
        let config = GatewayConfig::resolve(&FileConfig::default(), &env);
        assert_eq!(
            config.chat_completions_url(),
            "https://host.example/chat/completions"
        );
    }
}
