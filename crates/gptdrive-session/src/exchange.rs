//! One request/response exchange with the chat UI.
//!
//! An exchange moves `Idle -> Submitting -> Streaming -> Extracting ->
//! Resolved`, or ends in `Failed` from any non-terminal step. Every failure
//! on this path is returned to the caller; only the optional continuation
//! step is best effort.

use std::time::Duration;

use gptdrive_browser::{find_latest_json_response, BrowserHandle, Element, Key};
use gptdrive_core::{Catalogue, Error, InputMode, Result, Timeouts, Urls};
use serde_json::Value;
use tracing::{debug, warn};

use crate::markup::MarkupConverter;

/// Where an exchange is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Submitting,
    Streaming,
    Extracting,
    Resolved,
    Failed,
}

impl ExchangeState {
    pub fn can_advance_to(self, next: ExchangeState) -> bool {
        use ExchangeState::*;
        matches!(
            (self, next),
            (Idle, Submitting)
                | (Submitting, Streaming)
                | (Streaming, Extracting)
                | (Extracting, Resolved)
                | (Submitting | Streaming | Extracting, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExchangeState::Resolved | ExchangeState::Failed)
    }
}

/// Caller knobs for [`crate::ChatSession::send_message`].
#[derive(Debug, Clone)]
pub struct MessageOptions {
    /// Bound on the streaming wait.
    pub timeout: Duration,
    pub input_mode: InputMode,
    /// Pause between characters in [`InputMode::Slow`].
    pub input_delay: Duration,
    pub continue_generating: bool,
}

impl Default for MessageOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(240),
            input_mode: InputMode::Instant,
            input_delay: Duration::from_millis(100),
            continue_generating: true,
        }
    }
}

/// Caller knobs for [`crate::ChatSession::regenerate_response`].
#[derive(Debug, Clone)]
pub struct RegenerateOptions {
    /// Bound on the streaming wait.
    pub message_timeout: Duration,
    /// How long the regenerate button may take to become clickable.
    pub click_timeout: Duration,
    pub continue_generating: bool,
}

impl Default for RegenerateOptions {
    fn default() -> Self {
        Self {
            message_timeout: Duration::from_secs(240),
            click_timeout: Duration::from_secs(20),
            continue_generating: true,
        }
    }
}

/// A single prompt/answer round on the current page.
///
/// Borrowed from the session for the duration of one call; the final
/// [`ExchangeState`] is read back afterwards.
pub struct Exchange<'a> {
    browser: &'a dyn BrowserHandle,
    catalogue: &'a Catalogue,
    /// Turns the answer surface's HTML into the returned text.
    converter: &'a dyn MarkupConverter,
    timeouts: &'a Timeouts,
    state: ExchangeState,
}

impl<'a> Exchange<'a> {
    pub fn new(
        browser: &'a dyn BrowserHandle,
        catalogue: &'a Catalogue,
        converter: &'a dyn MarkupConverter,
        timeouts: &'a Timeouts,
    ) -> Self {
        Self {
            browser,
            catalogue,
            converter,
            timeouts,
            state: ExchangeState::Idle,
        }
    }

    /// Current state; terminal once `send` or `regenerate` returned.
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    fn advance(&mut self, next: ExchangeState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal exchange transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("Exchange {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() && !self.state.is_terminal() {
            self.advance(ExchangeState::Failed);
        }
        result
    }

    /// Submit `message` and return the sanitized answer.
    pub async fn send(&mut self, message: &str, options: &MessageOptions) -> Result<String> {
        let result = self.run_send(message, options).await;
        self.settle(result)
    }

    /// Ask the UI for a new answer to the last prompt.
    pub async fn regenerate(&mut self, options: &RegenerateOptions) -> Result<String> {
        let result = self.run_regenerate(options).await;
        self.settle(result)
    }

    async fn run_send(&mut self, message: &str, options: &MessageOptions) -> Result<String> {
        self.advance(ExchangeState::Submitting);
        self.submit(message, options).await?;
        self.finish(options.timeout, options.continue_generating).await
    }

    async fn run_regenerate(&mut self, options: &RegenerateOptions) -> Result<String> {
        self.advance(ExchangeState::Submitting);
        let button = &self.catalogue.selectors.regenerate_response;
        if !self.browser.safe_click(button, options.click_timeout).await {
            return Err(Error::OperationTimeout(format!(
                "regenerate button not clickable after {:?}",
                options.click_timeout
            )));
        }
        self.finish(options.message_timeout, options.continue_generating)
            .await
    }

    async fn finish(&mut self, timeout: Duration, continue_generating: bool) -> Result<String> {
        self.advance(ExchangeState::Streaming);
        self.wait_for_stream(timeout).await?;

        self.advance(ExchangeState::Extracting);
        let mut content = self.extract().await?;
        if continue_generating {
            if let Some(more) = self.continue_generating(timeout).await {
                content = more;
            }
        }

        self.advance(ExchangeState::Resolved);
        Ok(content)
    }

    // ---------------------------------------------------------------
    // Steps
    // ---------------------------------------------------------------

    async fn submit(&self, message: &str, options: &MessageOptions) -> Result<()> {
        let mut textbox = self.locate_textbox().await?;

        match options.input_mode {
            InputMode::Instant => {
                if let Err(e) = self.browser.set_value(&textbox, message).await {
                    if !e.is_stale() {
                        return Err(e);
                    }
                    debug!("Prompt input went stale, looking it up again");
                    textbox = self.locate_textbox().await?;
                    self.browser.set_value(&textbox, message).await?;
                }
            }
            InputMode::Slow => {
                let mut buf = [0u8; 4];
                for ch in message.chars() {
                    let key = ch.encode_utf8(&mut buf);
                    if let Err(e) = self.browser.send_keys(&textbox, key).await {
                        if !e.is_stale() {
                            return Err(e);
                        }
                        debug!("Prompt input went stale mid-typing, looking it up again");
                        textbox = self.locate_textbox().await?;
                        self.browser.send_keys(&textbox, key).await?;
                    }
                    tokio::time::sleep(options.input_delay).await;
                }
            }
        }

        // A typed key makes the UI notice the assigned value.
        self.browser.send_keys(&textbox, "a").await?;
        self.browser.press_key(&textbox, Key::Backspace).await?;
        self.browser.press_key(&textbox, Key::Enter).await?;
        debug!("Prompt submitted ({} chars)", message.chars().count());
        Ok(())
    }

    async fn locate_textbox(&self) -> Result<Element> {
        self.browser
            .wait_clickable(&self.catalogue.selectors.textbox, self.timeouts.element())
            .await
    }

    async fn wait_for_stream(&self, timeout: Duration) -> Result<()> {
        self.browser
            .wait_absent(&self.catalogue.selectors.streaming, timeout)
            .await
    }

    async fn extract(&self) -> Result<String> {
        let selectors = &self.catalogue.selectors;

        let large = self.browser.find_all(&selectors.big_response).await?;
        if let Some(last) = large.last() {
            let class = self.browser.attribute(last, "class").await?.unwrap_or_default();
            if class.contains(&selectors.error_marker_class) {
                let text = self.browser.text(last).await?;
                return Err(Error::ResponseIsError(text.trim().to_string()));
            }
        }

        let answers = self.browser.find_all(&selectors.small_response).await?;
        let Some(last) = answers.last() else {
            return Err(Error::ResponseNotFound);
        };
        let html = self.browser.inner_html(last).await?;
        Ok(self.converter.convert(&html))
    }

    /// One "continue generating" round. `None` leaves the answer as it was.
    async fn continue_generating(&self, timeout: Duration) -> Option<String> {
        let button = &self.catalogue.selectors.continue_generating;
        if !self
            .browser
            .safe_click(button, self.timeouts.continue_click())
            .await
        {
            return None;
        }
        debug!("Continuing generation");

        if let Err(e) = self.wait_for_stream(timeout).await {
            warn!("Continued generation did not finish: {}", e);
            return None;
        }
        match self.extract().await {
            Ok(content) if !content.is_empty() => Some(content),
            Ok(_) => None,
            Err(e) => {
                warn!("Could not read continued answer: {}", e);
                None
            }
        }
    }
}

// ---------------------------------------------------------------
// Network log lookups
// ---------------------------------------------------------------

/// Body of the newest completed JSON response whose URL contains `fragment`.
pub async fn latest_json_body(browser: &dyn BrowserHandle, fragment: &str) -> Result<Option<Value>> {
    let log = browser.network_log().await?;
    let Some(entry) = find_latest_json_response(&log, fragment) else {
        return Ok(None);
    };
    let body = browser.response_body(&entry.request_id).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

/// Id of the newest conversation in the sidebar listing the page fetched.
pub async fn resolve_conversation_id(
    browser: &dyn BrowserHandle,
    urls: &Urls,
) -> Result<Option<String>> {
    let Some(listing) = latest_json_body(browser, &urls.conversations_api).await? else {
        return Ok(None);
    };
    Ok(listing
        .pointer("/items/0/id")
        .and_then(Value::as_str)
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExchangeState::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [Idle, Submitting, Streaming, Extracting, Resolved];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_failure_transitions() {
        assert!(Submitting.can_advance_to(Failed));
        assert!(Streaming.can_advance_to(Failed));
        assert!(Extracting.can_advance_to(Failed));
        assert!(!Idle.can_advance_to(Failed));
        assert!(!Resolved.can_advance_to(Failed));
        assert!(!Idle.can_advance_to(Streaming));
        assert!(!Streaming.can_advance_to(Resolved));
    }

    #[test]
    fn test_terminal_states() {
        assert!(Resolved.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Streaming.is_terminal());
    }

    #[test]
    fn test_option_defaults() {
        let msg = MessageOptions::default();
        assert_eq!(msg.timeout, Duration::from_secs(240));
        assert_eq!(msg.input_mode, InputMode::Instant);
        let regen = RegenerateOptions::default();
        assert_eq!(regen.click_timeout, Duration::from_secs(20));
    }
}
