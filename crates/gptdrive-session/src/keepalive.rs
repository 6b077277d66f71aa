//! Background task that keeps the web session's auth state fresh.
//!
//! Every tick writes a `getSession` broadcast into the page's local storage,
//! which makes the site's auth client refresh its token. Failures are logged
//! and the loop carries on; only cancellation stops it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gptdrive_browser::BrowserHandle;
use gptdrive_core::Result;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};

const REFRESH_SCRIPT: &str = r#"window.localStorage.setItem("nextauth.message", arguments[0]);"#;

/// The local-storage message the site's auth client listens for.
pub fn refresh_message(timestamp: i64) -> Value {
    json!({
        "event": "session",
        "data": { "trigger": "getSession" },
        "timestamp": timestamp,
    })
}

async fn tick(browser: &dyn BrowserHandle) -> Result<()> {
    let message = refresh_message(chrono::Utc::now().timestamp()).to_string();
    browser
        .execute(REFRESH_SCRIPT, vec![Value::String(message)])
        .await?;
    Ok(())
}

/// Background task that keeps the site's auth session fresh.
///
/// Cancelled on [`KeepAlive::stop`] or when dropped; only `stop` waits for
/// the task to finish.
pub struct KeepAlive {
    cancel: CancellationToken,
    /// `None` once stopped.
    task: Option<JoinHandle<()>>,
    /// Successful refresh ticks.
    ticks: Arc<AtomicU64>,
}

impl KeepAlive {
    /// Start ticking immediately, then once per `interval`.
    pub fn spawn(browser: Arc<dyn BrowserHandle>, interval: Duration, span: Span) -> Self {
        let cancel = CancellationToken::new();
        let ticks = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(
            run(browser, interval, cancel.clone(), ticks.clone()).instrument(span),
        );

        Self {
            cancel,
            task: Some(task),
            ticks,
        }
    }

    /// Whether the task is still alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Refreshes performed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Cancel the loop and wait for it to exit. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Keep-alive task ended abnormally: {}", e);
                }
            }
            debug!("Keep-alive stopped after {} ticks", self.ticks());
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    browser: Arc<dyn BrowserHandle>,
    interval: Duration,
    cancel: CancellationToken,
    ticks: Arc<AtomicU64>,
) {
    info!("Keep-alive started, interval {:?}", interval);
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = tick(browser.as_ref()) => outcome,
        };
        match outcome {
            Ok(()) => {
                let n = ticks.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Keep-alive tick {}", n);
            }
            Err(e) => warn!("Keep-alive tick failed: {}", e),
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!("Keep-alive loop exited");
}
