//! Session configuration persistence and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

static PROXY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(https?|socks[45]?)://.+:\d{1,5}$").expect("valid proxy regex"));

/// Persisted session configuration (gptdrive.json).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub session_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default = "default_false")]
    pub disable_moderation: bool,
    #[serde(default = "default_false")]
    pub verbose: bool,
    #[serde(default = "default_false")]
    pub headless: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_path: Option<PathBuf>,
    #[serde(default)]
    pub chrome_args: Vec<String>,
    /// Optional JSON file overriding the built-in locator catalogue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalogue_path: Option<PathBuf>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_interval_secs: u64,
    #[serde(default = "default_challenge_retries")]
    pub challenge_retries: u32,
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Path to config file (not serialized).
    #[serde(skip)]
    pub config_path: PathBuf,
}

/// Bounded waits used across the session, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_challenge_secs")]
    pub challenge_secs: u64,
    #[serde(default = "default_element_secs")]
    pub element_secs: u64,
    #[serde(default = "default_click_secs")]
    pub click_secs: u64,
    #[serde(default = "default_intro_secs")]
    pub intro_secs: u64,
    #[serde(default = "default_continue_click_secs")]
    pub continue_click_secs: u64,
    #[serde(default = "default_theme_options_secs")]
    pub theme_options_secs: u64,
    #[serde(default = "default_launch_secs")]
    pub launch_secs: u64,
    #[serde(default = "default_escape_presses")]
    pub escape_presses: u32,
}

fn default_false() -> bool {
    false
}
fn default_keep_alive() -> u64 {
    60
}
fn default_challenge_retries() -> u32 {
    3
}
fn default_challenge_secs() -> u64 {
    10
}
fn default_element_secs() -> u64 {
    60
}
fn default_click_secs() -> u64 {
    10
}
fn default_intro_secs() -> u64 {
    5
}
fn default_continue_click_secs() -> u64 {
    5
}
fn default_theme_options_secs() -> u64 {
    10
}
fn default_launch_secs() -> u64 {
    30
}
fn default_escape_presses() -> u32 {
    5
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            challenge_secs: default_challenge_secs(),
            element_secs: default_element_secs(),
            click_secs: default_click_secs(),
            intro_secs: default_intro_secs(),
            continue_click_secs: default_continue_click_secs(),
            theme_options_secs: default_theme_options_secs(),
            launch_secs: default_launch_secs(),
            escape_presses: default_escape_presses(),
        }
    }
}

impl Timeouts {
    pub fn challenge(&self) -> Duration {
        Duration::from_secs(self.challenge_secs)
    }

    pub fn element(&self) -> Duration {
        Duration::from_secs(self.element_secs)
    }

    pub fn click(&self) -> Duration {
        Duration::from_secs(self.click_secs)
    }

    pub fn intro(&self) -> Duration {
        Duration::from_secs(self.intro_secs)
    }

    pub fn continue_click(&self) -> Duration {
        Duration::from_secs(self.continue_click_secs)
    }

    pub fn theme_options(&self) -> Duration {
        Duration::from_secs(self.theme_options_secs)
    }

    pub fn launch(&self) -> Duration {
        Duration::from_secs(self.launch_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_token: String::new(),
            conversation_id: None,
            proxy: None,
            disable_moderation: false,
            verbose: false,
            headless: false,
            chrome_path: None,
            chrome_args: Vec::new(),
            catalogue_path: None,
            keep_alive_interval_secs: default_keep_alive(),
            challenge_retries: default_challenge_retries(),
            timeouts: Timeouts::default(),
            config_path: PathBuf::new(),
        }
    }
}

impl SessionConfig {
    /// Create a config for a session token with every other field defaulted.
    pub fn with_token(session_token: impl Into<String>) -> Self {
        Self {
            session_token: session_token.into(),
            ..Self::default()
        }
    }

    /// Load config from a JSON file (or defaults), then apply env overrides.
    pub fn load(config_path: &Path) -> Self {
        let mut config: SessionConfig = std::fs::read_to_string(config_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        config.config_path = config_path.to_path_buf();
        config.apply_env();
        config
    }

    /// Env vars take precedence over the file for secrets and machine-specific paths.
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("GPTDRIVE_SESSION_TOKEN") {
            if !token.is_empty() {
                self.session_token = token;
            }
        }
        if let Ok(proxy) = std::env::var("GPTDRIVE_PROXY") {
            if !proxy.is_empty() {
                self.proxy = Some(proxy);
            }
        }
        if let Ok(path) = std::env::var("GPTDRIVE_CHROME_PATH") {
            if !path.is_empty() {
                self.chrome_path = Some(PathBuf::from(path));
            }
        }
    }

    /// Save config to disk.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&self.config_path, json)?;
        info!("Saved session config to {}", self.config_path.display());
        Ok(())
    }

    /// Reject configurations that cannot start a session.
    pub fn validate(&self) -> Result<()> {
        if self.session_token.trim().is_empty() {
            return Err(Error::Config("session_token is required".into()));
        }
        if let Some(proxy) = &self.proxy {
            validate_proxy(proxy)?;
        }
        if self.keep_alive_interval_secs == 0 {
            return Err(Error::Config("keep_alive_interval_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs)
    }

    /// `tracing` filter directive matching the configured verbosity.
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

/// Proxies must look like `scheme://host:port` with an http(s) or socks scheme.
pub fn validate_proxy(proxy: &str) -> Result<()> {
    if PROXY_RE.is_match(proxy) {
        Ok(())
    } else {
        Err(Error::InvalidProxy(proxy.to_string()))
    }
}
