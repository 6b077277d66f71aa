//! Chrome process and virtual display lifecycle.
//!
//! Both are owned values: dropping them kills the child process, and
//! `shutdown` does the same deterministically.

use std::net::TcpListener;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use gptdrive_core::{Error, Result};
use serde::Deserialize;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::LaunchOptions;

/// An entry of the DevTools `/json/list` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub ws_url: String,
}

// ---------------------------------------------------------------
// Virtual display
// ---------------------------------------------------------------

/// Xvfb server for headed Chrome on hosts without a display.
pub struct VirtualDisplay {
    child: Option<Child>,
    display: String,
}

impl VirtualDisplay {
    pub async fn start(width: u32, height: u32) -> Result<Self> {
        let number = free_display_number()
            .ok_or_else(|| Error::Browser("no free X display number".into()))?;
        let display = format!(":{number}");

        let child = Command::new("Xvfb")
            .arg(&display)
            .args(["-screen", "0", &format!("{width}x{height}x24"), "-nolisten", "tcp"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Browser(format!("failed to start Xvfb: {e}")))?;

        // Xvfb creates its socket shortly after start.
        let socket = format!("/tmp/.X11-unix/X{number}");
        let deadline = Instant::now() + Duration::from_secs(5);
        while !Path::new(&socket).exists() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let display_name = &display;
        info!("Started virtual display {}", display_name);
        Ok(Self {
            child: Some(child),
            display,
        })
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    pub async fn shutdown(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!("Failed to stop virtual display {}: {}", self.display, e);
            } else {
                debug!("Stopped virtual display {}", self.display);
            }
        }
    }
}

fn free_display_number() -> Option<u32> {
    (99..200).find(|n| {
        !Path::new(&format!("/tmp/.X{n}-lock")).exists()
            && !Path::new(&format!("/tmp/.X11-unix/X{n}")).exists()
    })
}

// ---------------------------------------------------------------
// Chrome
// ---------------------------------------------------------------

/// A running Chrome with remote debugging enabled.
pub struct ChromeProcess {
    child: Option<Child>,
    port: u16,
    display: Option<VirtualDisplay>,
    _profile: TempDir,
}

impl ChromeProcess {
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        let port = pick_ephemeral_port()?;
        let profile = tempfile::Builder::new().prefix("gptdrive-profile-").tempdir()?;

        let mut display = if options.needs_virtual_display() {
            Some(VirtualDisplay::start(options.window_size.0, options.window_size.1).await?)
        } else {
            None
        };

        let args = options.chrome_args(port, profile.path());
        let mut last_error = None;
        let mut child = None;
        for candidate in options.binary_candidates() {
            let mut cmd = Command::new(&candidate);
            cmd.args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true);
            if let Some(d) = &display {
                cmd.env("DISPLAY", d.display());
            }
            match cmd.spawn() {
                Ok(proc) => {
                    info!("Launched {} on DevTools port {}", candidate.display(), port);
                    child = Some(proc);
                    break;
                }
                Err(e) => last_error = Some(format!("{}: {}", candidate.display(), e)),
            }
        }

        let Some(child) = child else {
            if let Some(d) = display.as_mut() {
                d.shutdown().await;
            }
            return Err(Error::Browser(format!(
                "failed to launch browser: {}",
                last_error.unwrap_or_else(|| "no candidates available".to_string())
            )));
        };

        let mut process = Self {
            child: Some(child),
            port,
            display,
            _profile: profile,
        };
        if let Err(e) = wait_for_devtools(port, options.launch_timeout()).await {
            process.shutdown().await;
            return Err(e);
        }
        Ok(process)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    pub async fn shutdown(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.kill().await {
                Ok(()) => info!("Browser process stopped"),
                Err(e) => warn!("Failed to kill browser process: {}", e),
            }
        }
        if let Some(display) = self.display.as_mut() {
            display.shutdown().await;
        }
    }
}

fn pick_ephemeral_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

pub fn devtools_url(port: u16, path: &str) -> String {
    format!("http://127.0.0.1:{port}{path}")
}

async fn wait_for_devtools(port: u16, timeout: Duration) -> Result<()> {
    let url = devtools_url(port, "/json/version");
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(resp) = reqwest::get(&url).await {
            if resp.status().is_success() {
                debug!("DevTools endpoint ready on port {}", port);
                return Ok(());
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Err(Error::OperationTimeout(format!(
        "DevTools endpoint {url} not ready after {timeout:?}"
    )))
}
