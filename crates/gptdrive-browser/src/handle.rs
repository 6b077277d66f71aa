//! The browser capability the session layer is written against.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use gptdrive_core::{Cookie, Error, Locator, Result};
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::network::NetworkEntry;

/// Interval between polls in every bounded wait.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Opaque reference to a live page element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Element {
    pub id: String,
}

impl Element {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Browser tab identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabId(pub String);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Non-character keys the session presses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Backspace,
    Escape,
}

impl Key {
    pub fn name(&self) -> &'static str {
        match self {
            Key::Enter => "Enter",
            Key::Backspace => "Backspace",
            Key::Escape => "Escape",
        }
    }

    pub fn key_code(&self) -> u32 {
        match self {
            Key::Enter => 13,
            Key::Backspace => 8,
            Key::Escape => 27,
        }
    }

    /// Text the key produces, if any.
    pub fn text(&self) -> Option<&'static str> {
        match self {
            Key::Enter => Some("\r"),
            _ => None,
        }
    }
}

/// One browser process with tabs, element access and a network log.
///
/// Not meant for concurrent foreground use: one caller drives it while at
/// most a keep-alive task runs idempotent scripts alongside.
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    // ---------------------------------------------------------------
    // Page
    // ---------------------------------------------------------------

    async fn navigate(&self, url: &str) -> Result<()>;
    async fn current_url(&self) -> Result<String>;
    async fn page_source(&self) -> Result<String>;

    /// Run a function body with `args` bound to `arguments`; returns its value.
    async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value>;

    // ---------------------------------------------------------------
    // Elements
    // ---------------------------------------------------------------

    async fn find(&self, locator: &Locator) -> Result<Option<Element>>;
    async fn find_all(&self, locator: &Locator) -> Result<Vec<Element>>;
    /// Number of matches. Hands out no element references.
    async fn count(&self, locator: &Locator) -> Result<usize>;
    /// Drop the page-side references behind every element handed out so
    /// far. Elements found before the call must not be used afterwards.
    async fn release_elements(&self) -> Result<()>;
    async fn text(&self, element: &Element) -> Result<String>;
    async fn attribute(&self, element: &Element, name: &str) -> Result<Option<String>>;
    async fn inner_html(&self, element: &Element) -> Result<String>;
    async fn is_clickable(&self, element: &Element) -> Result<bool>;
    async fn click(&self, element: &Element) -> Result<()>;
    async fn hover(&self, element: &Element) -> Result<()>;
    /// Assign the whole value at once, firing an `input` event.
    async fn set_value(&self, element: &Element, value: &str) -> Result<()>;
    /// Type `text` as key events into the element.
    async fn send_keys(&self, element: &Element, text: &str) -> Result<()>;
    async fn press_key(&self, element: &Element, key: Key) -> Result<()>;
    async fn remove(&self, element: &Element) -> Result<()>;

    // ---------------------------------------------------------------
    // Network
    // ---------------------------------------------------------------

    /// Entries recorded on the current tab, oldest first.
    async fn network_log(&self) -> Result<Vec<NetworkEntry>>;
    async fn response_body(&self, request_id: &str) -> Result<Vec<u8>>;
    async fn set_cookie(&self, cookie: &Cookie) -> Result<()>;
    async fn delete_cookie(&self, name: &str, url: &str) -> Result<()>;
    async fn block_urls(&self, patterns: &[String]) -> Result<()>;

    // ---------------------------------------------------------------
    // Tabs
    // ---------------------------------------------------------------

    /// Open a blank tab and make it current.
    async fn open_tab(&self) -> Result<TabId>;
    async fn close_tab(&self, tab: &TabId) -> Result<()>;
    async fn switch_tab(&self, tab: &TabId) -> Result<()>;
    async fn current_tab(&self) -> Result<TabId>;

    /// Shut the browser down. Safe to call more than once.
    async fn quit(&self) -> Result<()>;

    // ---------------------------------------------------------------
    // Bounded waits
    // ---------------------------------------------------------------

    async fn is_present(&self, locator: &Locator) -> bool {
        matches!(self.count(locator).await, Ok(n) if n > 0)
    }

    async fn wait_present(&self, locator: &Locator, timeout: Duration) -> Result<Element> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.find(locator).await {
                Ok(Some(element)) => return Ok(element),
                Ok(None) => {}
                Err(e) => debug!("Lookup of {} failed while waiting: {}", locator, e),
            }
            if Instant::now() >= deadline {
                return Err(Error::OperationTimeout(format!(
                    "{} not present after {:?}",
                    locator, timeout
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_absent(&self, locator: &Locator, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(0) = self.count(locator).await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::OperationTimeout(format!(
                    "{} still present after {:?}",
                    locator, timeout
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_clickable(&self, locator: &Locator, timeout: Duration) -> Result<Element> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(Some(element)) = self.find(locator).await {
                if let Ok(true) = self.is_clickable(&element).await {
                    return Ok(element);
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::OperationTimeout(format!(
                    "{} not clickable after {:?}",
                    locator, timeout
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait for the element to become clickable and click it. Never fails;
    /// returns whether the click happened.
    async fn safe_click(&self, locator: &Locator, timeout: Duration) -> bool {
        let element = match self.wait_clickable(locator, timeout).await {
            Ok(element) => element,
            Err(e) => {
                debug!("Safe click skipped: {}", e);
                return false;
            }
        };
        match self.click(&element).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Safe click on {} failed: {}", locator, e);
                false
            }
        }
    }
}
