//! Chrome launch options.

use std::path::{Path, PathBuf};
use std::time::Duration;

use gptdrive_core::SessionConfig;
use serde::{Deserialize, Serialize};

/// How the browser process is started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_path: Option<PathBuf>,
    #[serde(default = "default_false")]
    pub headless: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "default_window_size")]
    pub window_size: (u32, u32),
    #[serde(default = "default_launch_secs")]
    pub launch_timeout_secs: u64,
}

fn default_false() -> bool {
    false
}
fn default_window_size() -> (u32, u32) {
    (1024, 768)
}
fn default_launch_secs() -> u64 {
    30
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: false,
            proxy: None,
            extra_args: Vec::new(),
            window_size: default_window_size(),
            launch_timeout_secs: default_launch_secs(),
        }
    }
}

impl From<&SessionConfig> for LaunchOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            chrome_path: config.chrome_path.clone(),
            headless: config.headless,
            proxy: config.proxy.clone(),
            extra_args: config.chrome_args.clone(),
            window_size: default_window_size(),
            launch_timeout_secs: config.timeouts.launch_secs,
        }
    }
}

impl LaunchOptions {
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }

    /// Command-line arguments for a Chrome instance debugging on `port`.
    pub fn chrome_args(&self, port: u16, user_data_dir: &Path) -> Vec<String> {
        let mut args = vec![
            format!("--remote-debugging-port={port}"),
            "--remote-debugging-address=127.0.0.1".to_string(),
            format!("--user-data-dir={}", user_data_dir.display()),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
            "--disable-popup-blocking".to_string(),
            format!("--window-size={},{}", self.window_size.0, self.window_size.1),
        ];
        if let Some(proxy) = &self.proxy {
            args.push(format!("--proxy-server={proxy}"));
        }
        if self.headless {
            args.push("--headless=new".to_string());
            args.push("--disable-gpu".to_string());
        }
        for extra in &self.extra_args {
            if !extra.trim().is_empty() {
                args.push(extra.to_string());
            }
        }
        args.push("about:blank".to_string());
        args
    }

    /// A headed browser on a Linux host without a display needs Xvfb.
    pub fn needs_virtual_display(&self) -> bool {
        cfg!(target_os = "linux") && !self.headless && std::env::var_os("DISPLAY").is_none()
    }

    /// Binaries to try, configured path first.
    pub fn binary_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(path) = &self.chrome_path {
            candidates.push(path.clone());
        }
        candidates.extend(
            [
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                "/Applications/Chromium.app/Contents/MacOS/Chromium",
                "google-chrome",
                "google-chrome-stable",
                "chromium",
                "chromium-browser",
                "chrome",
            ]
            .iter()
            .map(PathBuf::from),
        );
        candidates
    }
}
