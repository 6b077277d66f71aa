//! Guarded menu navigation.
//!
//! A menu walk is a chain of dependent clicks. The first click that cannot
//! be performed aborts the walk and presses Escape a bounded number of times
//! so no dialog is left half open.

use std::time::Duration;

use gptdrive_browser::{BrowserHandle, Key};
use gptdrive_core::{Locator, Result};
use tracing::debug;

/// One click of a menu walk.
#[derive(Debug, Clone)]
pub struct MenuStep<'a> {
    /// Label used in logs.
    pub name: &'static str,
    pub locator: &'a Locator,
    /// How long the target may take to become clickable.
    pub timeout: Duration,
}

impl<'a> MenuStep<'a> {
    pub fn new(name: &'static str, locator: &'a Locator, timeout: Duration) -> Self {
        Self {
            name,
            locator,
            timeout,
        }
    }
}

/// Walks menus on one page and closes them again.
pub struct MenuNavigator<'a> {
    browser: &'a dyn BrowserHandle,
    /// Element that receives the Escape presses.
    body: &'a Locator,
    /// Escape presses per unwind.
    escape_presses: u32,
}

impl<'a> MenuNavigator<'a> {
    pub fn new(browser: &'a dyn BrowserHandle, body: &'a Locator, escape_presses: u32) -> Self {
        Self {
            browser,
            body,
            escape_presses,
        }
    }

    /// Click each step in order. Returns false, after unwinding, on the
    /// first step that could not be clicked.
    pub async fn walk(&self, steps: &[MenuStep<'_>]) -> bool {
        for step in steps {
            if !self.browser.safe_click(step.locator, step.timeout).await {
                debug!("Menu step '{}' unavailable ({}), unwinding", step.name, step.locator);
                self.unwind().await;
                return false;
            }
            debug!("Menu step '{}' clicked", step.name);
        }
        true
    }

    /// Press Escape on the page body to close whatever is open.
    pub async fn unwind(&self) {
        if let Err(e) = self.press_escapes().await {
            debug!("Menu unwind interrupted: {}", e);
        }
    }

    async fn press_escapes(&self) -> Result<()> {
        let Some(body) = self.browser.find(self.body).await? else {
            return Ok(());
        };
        for _ in 0..self.escape_presses {
            self.browser.press_key(&body, Key::Escape).await?;
        }
        Ok(())
    }
}
