use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::error::Result;
use crate::paths::Paths;
use crate::types::Environment;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
    /// Per-provider proxy; overrides `network.proxy`.
    #[serde(default)]
    pub proxy: Option<String>,
}

/// Which executor new sessions are provisioned with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Local,
    Remote,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Backend::Local),
            "remote" => Ok(Backend::Remote),
            other => Err(format!("unknown backend '{}', expected local or remote", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefaults {
    #[serde(default = "default_model")]
    pub model: String,
    /// Explicit provider name; when unset the first provider with a key wins.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_display_width")]
    pub display_width: u32,
    #[serde(default = "default_display_height")]
    pub display_height: u32,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub blocked_domains: Vec<String>,
    #[serde(default)]
    pub auto_acknowledge_safety_checks: bool,
    #[serde(default = "default_start_url")]
    pub start_url: String,
}

fn default_model() -> String {
    "computer-use-preview".to_string()
}

fn default_max_iterations() -> u32 {
    50
}

fn default_display_width() -> u32 {
    1024
}

fn default_display_height() -> u32 {
    768
}

fn default_start_url() -> String {
    "https://www.bing.com".to_string()
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            model: default_model(),
            provider: None,
            max_iterations: default_max_iterations(),
            display_width: default_display_width(),
            display_height: default_display_height(),
            environment: Environment::default(),
            backend: Backend::default(),
            blocked_domains: vec![],
            auto_acknowledge_safety_checks: false,
            start_url: default_start_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentsConfig {
    #[serde(default)]
    pub defaults: AgentDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    /// How long a correlated action request waits for its response.
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,
}

fn default_action_timeout_ms() -> u64 {
    30_000
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            action_timeout_ms: default_action_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsConfig {
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Delay between the last observer leaving and the eviction check.
    #[serde(default = "default_eviction_grace_ms")]
    pub eviction_grace_ms: u64,
}

fn default_idle_timeout_secs() -> u64 {
    1800
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_eviction_grace_ms() -> u64 {
    5000
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            eviction_grace_ms: default_eviction_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    #[serde(default)]
    pub headed: bool,
    #[serde(default)]
    pub executable: Option<String>,
    /// Where per-session browser profiles live; defaults to `~/.surfpilot/profiles`.
    #[serde(default)]
    pub profiles_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Empty means any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_gateway_host() -> String {
    "0.0.0.0".to_string()
}

fn default_gateway_port() -> u16 {
    18890
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            allowed_origins: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    #[serde(default)]
    pub proxy: Option<String>,
    /// Hosts that bypass `proxy`. Entries match exact hosts, `*.suffix` or `.suffix`.
    #[serde(default)]
    pub no_proxy: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl Default for Config {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert("openai".to_string(), ProviderConfig {
            api_key: String::new(),
            api_base: Some("https://api.openai.com/v1".to_string()),
            proxy: None,
        });

        Self {
            providers,
            agents: AgentsConfig::default(),
            remote: RemoteConfig::default(),
            sessions: SessionsConfig::default(),
            browser: BrowserConfig::default(),
            gateway: GatewayConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            debug!(path = %config_path.display(), "Loading config");
            Self::load(&config_path)
        } else {
            debug!(path = %config_path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// Name of the provider the oracle should use: the explicit one, else the
    /// first configured provider with a key, else `openai`.
    pub fn provider_name(&self) -> String {
        if let Some(name) = self.agents.defaults.provider.as_ref() {
            let name = name.trim();
            if !name.is_empty() {
                return name.to_string();
            }
        }
        let mut names: Vec<&String> = self
            .providers
            .iter()
            .filter(|(_, p)| !p.api_key.trim().is_empty())
            .map(|(n, _)| n)
            .collect();
        names.sort();
        names
            .first()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "openai".to_string())
    }

    /// API key for the active provider, falling back to `OPENAI_API_KEY`.
    pub fn api_key(&self) -> Option<String> {
        let configured = self
            .get_provider(&self.provider_name())
            .map(|p| p.api_key.trim().to_string())
            .filter(|k| !k.is_empty());
        configured.or_else(|| {
            std::env::var("OPENAI_API_KEY")
                .ok()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
        })
    }

    /// Profiles directory for locally launched browsers.
    pub fn profiles_dir(&self, paths: &Paths) -> std::path::PathBuf {
        match self.browser.profiles_dir.as_ref() {
            Some(dir) if !dir.trim().is_empty() => crate::paths::expand_home(dir),
            _ => paths.profiles_dir(),
        }
    }
}
