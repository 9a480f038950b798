use crate::error::ConfigError;
use crate::host::HostKind;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::debug;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "dingtalk.toml";

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_true")]
    pub enable: bool,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub allow_remote_access: bool,

    /// Public path the app is served under, e.g. `/` or `/h5/`.
    #[serde(default = "default_base")]
    pub base: String,

    #[serde(default)]
    pub host: HostKind,

    /// App dev server the gateway forwards to. Defaults to the host's usual port.
    #[serde(default)]
    pub upstream: Option<String>,

    /// Page opened inside DingTalk. Inferred from the gateway address when unset.
    #[serde(default)]
    pub target_url: Option<String>,

    #[serde(default)]
    pub corp_id: Option<String>,

    #[serde(default)]
    pub debug: bool,

    /// Cookie names echoed back as non-HttpOnly `Set-Cookie` headers.
    #[serde(default)]
    pub debug_cookies: Vec<String>,

    #[serde(default)]
    pub chii: ChiiConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ChiiConfig {
    #[serde(default = "default_true")]
    pub enable: bool,

    #[serde(default)]
    pub embedded: bool,

    #[serde(default = "default_chii_command")]
    pub command: String,

    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    9527
}

fn default_base() -> String {
    "/".to_string()
}

fn default_chii_command() -> String {
    "chii".to_string()
}

fn default_ready_timeout_ms() -> u64 {
    10_000
}

impl Default for ChiiConfig {
    fn default() -> Self {
        Self {
            enable: default_true(),
            embedded: false,
            command: default_chii_command(),
            ready_timeout_ms: default_ready_timeout_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable: default_true(),
            port: default_port(),
            allow_remote_access: false,
            base: default_base(),
            host: HostKind::default(),
            upstream: None,
            target_url: None,
            corp_id: None,
            debug: false,
            debug_cookies: Vec::new(),
            chii: ChiiConfig::default(),
        }
    }
}

impl Config {
    /// Whether the remote-debugging bridge, its proxy and the injector are active.
    pub fn bridge_enabled(&self) -> bool {
        self.enable && self.chii.enable
    }

    /// `base` with exactly one leading and one trailing slash.
    pub fn normalized_base(&self) -> String {
        let trimmed = self.base.trim_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("/{}/", trimmed)
        }
    }

    pub fn upstream_url(&self) -> Result<Url, ConfigError> {
        let raw = match &self.upstream {
            Some(upstream) => upstream.clone(),
            None => format!("http://localhost:{}", self.host.default_dev_port()),
        };
        Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl {
            field: "upstream",
            source,
        })
    }

    pub fn parsed_target_url(&self) -> Result<Option<Url>, ConfigError> {
        self.target_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
                    field: "target_url",
                    source,
                })
            })
            .transpose()
    }
}

/// Loads the configuration file, falling back to defaults when it does not exist.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        debug!("Config file {:?} does not exist, using defaults", path);
        return Ok(Config::default());
    }

    debug!("Loading config from: {:?}", path);

    let content = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;

    // Surface bad URLs at startup instead of on the first request
    config.upstream_url()?;
    config.parsed_target_url()?;

    debug!("Loaded config: {:?}", config);
    Ok(config)
}
