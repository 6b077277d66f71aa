//! The chat session: one browser, one login, one conversation at a time.

use std::sync::Arc;
use std::time::Duration;

use gptdrive_browser::{BrowserHandle, ChromeBrowser, LaunchOptions};
use gptdrive_core::{
    Accounts, Catalogue, ChatResponse, Conversations, Cookie, Error, Result, SessionConfig,
    SessionData, SharedConversations, Theme,
};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, info_span, instrument, warn, Instrument, Span};
use uuid::Uuid;

use crate::challenge::{fetch_in_auxiliary_tab, validate_session_payload, ChallengeResolver};
use crate::exchange::{
    latest_json_body, resolve_conversation_id, Exchange, ExchangeState, MessageOptions,
    RegenerateOptions,
};
use crate::keepalive::KeepAlive;
use crate::markup::{MarkdownConverter, MarkupConverter};
use crate::menu::{MenuNavigator, MenuStep};

const INVALID_CONVERSATION_TEXT: &str = "unable to load conversation";
const SHARED_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// An authenticated chat session driving one browser.
///
/// Operations take `&mut self` where they change the page or the session's
/// bookkeeping; none of them may run concurrently. Call [`ChatSession::close`]
/// when done.
pub struct ChatSession {
    /// Unique per session; recorded on the tracing span.
    id: Uuid,
    /// Parent span of every operation and of the keep-alive task.
    span: Span,
    browser: Arc<dyn BrowserHandle>,
    /// Element locators and site URLs.
    catalogue: Catalogue,
    config: SessionConfig,
    /// Answer HTML to text.
    converter: Box<dyn MarkupConverter>,
    /// Conversation the page is on, once known.
    conversation_id: Option<String>,
    /// Last applied chat history setting; selects New chat vs Clear chat.
    history_enabled: bool,
    /// Onboarding buttons are only clicked away on the first page open.
    info_dismissed: bool,
    /// False after a failed start or `close()`.
    active: bool,
    keep_alive: Option<KeepAlive>,
    last_exchange: Option<ExchangeState>,
}

impl ChatSession {
    /// Launch a local Chrome and start a session in it.
    pub async fn launch(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let catalogue = Catalogue::load_or_default(config.catalogue_path.as_deref())?;
        let browser = ChromeBrowser::launch(&LaunchOptions::from(&config)).await?;
        Self::start(Arc::new(browser), config, catalogue).await
    }

    /// Start a session on an already running browser.
    ///
    /// On failure the browser is shut down before the error is returned.
    pub async fn start(
        browser: Arc<dyn BrowserHandle>,
        config: SessionConfig,
        catalogue: Catalogue,
    ) -> Result<Self> {
        let id = Uuid::new_v4();
        let span = info_span!("session", id = %id);
        let mut session = Self {
            id,
            span: span.clone(),
            browser,
            catalogue,
            conversation_id: config.conversation_id.clone(),
            config,
            converter: Box::new(MarkdownConverter),
            history_enabled: true,
            info_dismissed: false,
            active: true,
            keep_alive: None,
            last_exchange: None,
        };

        if let Err(e) = session.initialize().instrument(span.clone()).await {
            span.in_scope(|| warn!("Session start failed: {}", e));
            session.active = false;
            if let Err(quit_err) = session.browser.quit().await {
                span.in_scope(|| warn!("Browser shutdown after failed start: {}", quit_err));
            }
            return Err(e);
        }

        session.keep_alive = Some(KeepAlive::spawn(
            session.browser.clone(),
            session.config.keep_alive_interval(),
            span.clone(),
        ));
        span.in_scope(|| info!("Session ready"));
        Ok(session)
    }

    /// Replace the answer converter.
    pub fn with_converter(mut self, converter: Box<dyn MarkupConverter>) -> Self {
        self.converter = converter;
        self
    }

    async fn initialize(&mut self) -> Result<()> {
        self.config.validate()?;
        let urls = &self.catalogue.urls;

        let cookie = Cookie::session(
            &urls.session_cookie_name,
            &self.config.session_token,
            &urls.cookie_domain,
        );
        self.browser.set_cookie(&cookie).await?;
        if self.config.disable_moderation {
            self.browser.block_urls(&[urls.moderations.clone()]).await?;
            debug!("Moderation endpoint blocked");
        }

        self.resolve_challenge().await?;

        let target = match &self.conversation_id {
            Some(id) => urls.conversation(id),
            None => urls.chat.clone(),
        };
        self.browser.navigate(&target).await?;
        self.dismiss_blocking_elements().await
    }

    async fn resolve_challenge(&self) -> Result<Value> {
        ChallengeResolver::new(
            self.browser.as_ref(),
            &self.catalogue,
            self.config.timeouts.challenge(),
            self.config.challenge_retries,
        )
        .resolve()
        .await
    }

    /// Clear overlays the site puts over a freshly opened page.
    async fn dismiss_blocking_elements(&mut self) -> Result<()> {
        let selectors = &self.catalogue.selectors;
        let timeouts = &self.config.timeouts;
        let browser = self.browser.as_ref();

        if let Ok(intro) = browser.wait_present(&selectors.intro, timeouts.intro()).await {
            match browser.remove(&intro).await {
                Ok(()) => debug!("Intro overlay removed"),
                Err(e) => debug!("Intro overlay vanished before removal: {}", e),
            }
        }

        let alerts = browser.find_all(&selectors.alert).await?;
        if let Some(alert) = alerts.first() {
            let text = browser.text(alert).await.unwrap_or_default();
            if text.to_lowercase().contains(INVALID_CONVERSATION_TEXT) {
                return Err(Error::InvalidConversationId(text.trim().to_string()));
            }
            debug!("Dismissing alert: {}", text.trim());
            if let Err(e) = browser.remove(alert).await {
                debug!("Alert removal failed: {}", e);
            }
        }

        if !self.info_dismissed {
            for button in &selectors.info_buttons {
                browser.safe_click(button, timeouts.click()).await;
            }
            self.info_dismissed = true;
        }
        self.release_elements().await;
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.active {
            Ok(())
        } else {
            Err(Error::SessionClosed)
        }
    }

    fn menu(&self) -> MenuNavigator<'_> {
        MenuNavigator::new(
            self.browser.as_ref(),
            &self.catalogue.selectors.body,
            self.config.timeouts.escape_presses,
        )
    }

    /// Let the page drop the element references an operation collected.
    async fn release_elements(&self) {
        if let Err(e) = self.browser.release_elements().await {
            debug!("Element release failed: {}", e);
        }
    }

    // ---------------------------------------------------------------
    // Exchanges
    // ---------------------------------------------------------------

    /// Send a prompt and wait for the complete answer.
    #[instrument(skip_all, parent = &self.span)]
    pub async fn send_message(
        &mut self,
        message: &str,
        options: &MessageOptions,
    ) -> Result<ChatResponse> {
        self.ensure_active()?;
        let mut exchange = Exchange::new(
            self.browser.as_ref(),
            &self.catalogue,
            self.converter.as_ref(),
            &self.config.timeouts,
        );
        let result = exchange.send(message, options).await;
        self.last_exchange = Some(exchange.state());
        self.complete_exchange(result).await
    }

    /// Ask the site to answer the last prompt again.
    #[instrument(skip_all, parent = &self.span)]
    pub async fn regenerate_response(
        &mut self,
        options: &RegenerateOptions,
    ) -> Result<ChatResponse> {
        self.ensure_active()?;
        let mut exchange = Exchange::new(
            self.browser.as_ref(),
            &self.catalogue,
            self.converter.as_ref(),
            &self.config.timeouts,
        );
        let result = exchange.regenerate(options).await;
        self.last_exchange = Some(exchange.state());
        self.complete_exchange(result).await
    }

    async fn complete_exchange(&mut self, result: Result<String>) -> Result<ChatResponse> {
        self.release_elements().await;
        let content = match result {
            Ok(content) => content,
            Err(Error::ResponseNotFound) => {
                warn!("No answer on the page, resetting the conversation");
                if let Err(e) = self.reset().await {
                    warn!("Reset after missing answer failed: {}", e);
                }
                return Err(Error::ResponseNotFound);
            }
            Err(e) => return Err(e),
        };

        if self.conversation_id.is_none() {
            match resolve_conversation_id(self.browser.as_ref(), &self.catalogue.urls).await {
                Ok(Some(id)) => {
                    info!("Conversation id resolved: {}", id);
                    self.conversation_id = Some(id);
                }
                Ok(None) => warn!("Conversation id not found in the network log"),
                Err(e) => warn!("Conversation id lookup failed: {}", e),
            }
        }
        Ok(ChatResponse::new(content, self.conversation_id.clone()))
    }

    // ---------------------------------------------------------------
    // Conversations
    // ---------------------------------------------------------------

    /// Start a new conversation. Leaves no current conversation id.
    #[instrument(skip_all, parent = &self.span)]
    pub async fn reset_conversation(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.reset().await
    }

    async fn reset(&mut self) -> Result<()> {
        self.conversation_id = None;

        let url = self.browser.current_url().await?;
        if !self.catalogue.urls.is_on_site(&url) {
            debug!("Not on the chat site ({}), nothing to reset", url);
            return Ok(());
        }

        let selectors = &self.catalogue.selectors;
        let (name, button) = if self.history_enabled {
            ("new chat", &selectors.new_chat)
        } else {
            ("clear chat", &selectors.clear_chat)
        };
        let step = MenuStep::new(name, button, self.config.timeouts.element());
        if self.menu().walk(&[step]).await {
            info!("Conversation reset");
        } else {
            warn!("Conversation not reset: '{}' unavailable", name);
        }
        self.release_elements().await;
        Ok(())
    }

    /// Open an existing conversation by id.
    #[instrument(skip_all, parent = &self.span, fields(conversation_id = %conversation_id))]
    pub async fn switch_conversation(&mut self, conversation_id: &str) -> Result<()> {
        self.ensure_active()?;
        let url = self.catalogue.urls.conversation(conversation_id);
        self.browser.navigate(&url).await?;
        match self.dismiss_blocking_elements().await {
            Ok(()) => {
                self.conversation_id = Some(conversation_id.to_string());
                info!("Switched conversation");
                Ok(())
            }
            Err(e) => {
                self.conversation_id = None;
                Err(e)
            }
        }
    }

    /// Delete every conversation of the account.
    #[instrument(skip_all, parent = &self.span)]
    pub async fn clear_conversations(&mut self) -> Result<()> {
        self.ensure_active()?;
        let selectors = &self.catalogue.selectors;
        let click = self.config.timeouts.click();
        let menu = self.menu();
        let cleared = menu
            .walk(&[
                MenuStep::new("menu", &selectors.menu_button, click),
                MenuStep::new("clear conversations", &selectors.menu_clear_conversations, click),
                MenuStep::new(
                    "confirm clear",
                    &selectors.menu_confirm_clear_conversations,
                    click,
                ),
            ])
            .await;
        if cleared {
            menu.unwind().await;
            info!("Conversations cleared");
            self.conversation_id = None;
        } else {
            warn!("Conversations not cleared: menu unavailable");
        }
        self.release_elements().await;
        Ok(())
    }

    /// Sidebar listing from the newest conversations response on the page.
    #[instrument(skip_all, parent = &self.span)]
    pub async fn get_conversations(&self) -> Result<Option<Conversations>> {
        self.ensure_active()?;
        let fragment = &self.catalogue.urls.conversations_api;
        match latest_json_body(self.browser.as_ref(), fragment).await? {
            Some(body) => Ok(Some(serde_json::from_value(body)?)),
            None => {
                debug!("No conversations response recorded yet");
                Ok(None)
            }
        }
    }

    /// Open the shared-links dialog and wait for its listing, up to `timeout`.
    #[instrument(skip_all, parent = &self.span)]
    pub async fn get_shared_conversations(
        &self,
        timeout: Duration,
    ) -> Result<Option<SharedConversations>> {
        self.ensure_active()?;
        let selectors = &self.catalogue.selectors;
        let fragment = &self.catalogue.urls.shared_conversations_api;
        let click = self.config.timeouts.click();
        let menu = self.menu();
        let deadline = Instant::now() + timeout;
        let mut dialog_open = false;
        let mut dialog_tried = false;

        let listing = loop {
            if let Some(body) = latest_json_body(self.browser.as_ref(), fragment).await? {
                break Some(serde_json::from_value(body)?);
            }
            if !dialog_tried {
                dialog_tried = true;
                dialog_open = menu
                    .walk(&[
                        MenuStep::new("menu", &selectors.menu_button, click),
                        MenuStep::new("settings", &selectors.menu_settings, click),
                        MenuStep::new("data controls", &selectors.data_controls, click),
                        MenuStep::new("manage shared links", &selectors.shared_links_manage, click),
                    ])
                    .await;
                continue;
            }
            if Instant::now() >= deadline {
                warn!("No shared conversations response within {:?}", timeout);
                break None;
            }
            tokio::time::sleep(SHARED_POLL_INTERVAL).await;
        };

        if dialog_open {
            menu.unwind().await;
        }
        self.release_elements().await;
        Ok(listing)
    }

    // ---------------------------------------------------------------
    // Account
    // ---------------------------------------------------------------

    /// Log in as another account with `session_token`.
    #[instrument(skip_all, parent = &self.span)]
    pub async fn switch_account(&mut self, session_token: &str) -> Result<SessionData> {
        self.ensure_active()?;
        self.conversation_id = None;

        let urls = &self.catalogue.urls;
        let cookie = Cookie::session(&urls.session_cookie_name, session_token, &urls.cookie_domain);
        self.browser.set_cookie(&cookie).await?;

        let payload = self.resolve_challenge().await?;
        let data = SessionData::from_value(payload)?;
        self.config.session_token = session_token.to_string();

        let chat = self.catalogue.urls.chat.clone();
        self.browser.navigate(&chat).await?;
        self.dismiss_blocking_elements().await?;
        info!("Switched account to {}", data.user);
        Ok(data)
    }

    /// Current auth session, read in an auxiliary tab.
    #[instrument(skip_all, parent = &self.span)]
    pub async fn get_session_data(&self) -> Result<SessionData> {
        self.ensure_active()?;
        let payload = fetch_in_auxiliary_tab(
            self.browser.as_ref(),
            &self.catalogue.selectors,
            &self.catalogue.urls.auth_session,
            self.config.timeouts.challenge(),
        )
        .await?;
        validate_session_payload(&payload)?;
        SessionData::from_value(payload)
    }

    /// Drop the session cookie. The session stays open but unauthenticated.
    #[instrument(skip_all, parent = &self.span)]
    pub async fn logout(&mut self) -> Result<()> {
        self.ensure_active()?;
        let urls = &self.catalogue.urls;
        self.browser
            .delete_cookie(&urls.session_cookie_name, &urls.base)
            .await?;

        match fetch_in_auxiliary_tab(
            self.browser.as_ref(),
            &self.catalogue.selectors,
            &urls.auth_session,
            self.config.timeouts.challenge(),
        )
        .await
        {
            Ok(payload) if validate_session_payload(&payload).is_err() => info!("Logged out"),
            Ok(_) => warn!("Auth session still present after logout"),
            Err(e) => warn!("Could not confirm logout: {}", e),
        }
        self.conversation_id = None;
        Ok(())
    }

    /// Account details from the newest account check response on the page.
    #[instrument(skip_all, parent = &self.span)]
    pub async fn get_user_data(&self) -> Result<Option<Accounts>> {
        self.ensure_active()?;
        let fragment = &self.catalogue.urls.accounts_check_api;
        match latest_json_body(self.browser.as_ref(), fragment).await? {
            Some(body) => Accounts::from_value(&body).map(Some),
            None => {
                debug!("No account check response recorded yet");
                Ok(None)
            }
        }
    }

    // ---------------------------------------------------------------
    // Settings
    // ---------------------------------------------------------------

    /// Turn chat history on or off. Decides whether a reset opens a new
    /// chat or clears the current one.
    #[instrument(skip_all, parent = &self.span, fields(enabled = enabled))]
    pub async fn toggle_chat_history(&mut self, enabled: bool) -> Result<()> {
        self.ensure_active()?;
        if let Some(recorded) = self.apply_chat_history(enabled).await {
            self.history_enabled = recorded;
        }
        self.release_elements().await;
        Ok(())
    }

    /// Returns the state the toggle was left in, or `None` when it could not
    /// be read or changed.
    async fn apply_chat_history(&self, enabled: bool) -> Option<bool> {
        let selectors = &self.catalogue.selectors;
        let click = self.config.timeouts.click();
        let menu = self.menu();

        let opened = menu
            .walk(&[
                MenuStep::new("menu", &selectors.menu_button, click),
                MenuStep::new("settings", &selectors.menu_settings, click),
                MenuStep::new("data controls", &selectors.data_controls, click),
            ])
            .await;
        if !opened {
            warn!("Chat history setting unavailable");
            return None;
        }

        let toggle = match self
            .browser
            .wait_clickable(&selectors.chat_history_toggle, click)
            .await
        {
            Ok(toggle) => toggle,
            Err(e) => {
                warn!("Chat history toggle unavailable: {}", e);
                menu.unwind().await;
                return None;
            }
        };

        let checked = match self.browser.attribute(&toggle, "aria-checked").await {
            Ok(Some(value)) => value == "true",
            Ok(None) => {
                warn!("Chat history toggle has no checked state, leaving it alone");
                menu.unwind().await;
                return None;
            }
            Err(e) => {
                warn!("Chat history toggle state unreadable: {}", e);
                menu.unwind().await;
                return None;
            }
        };

        if checked == enabled {
            debug!("Chat history already {}", on_off(enabled));
        } else if let Err(e) = self.browser.click(&toggle).await {
            warn!("Chat history toggle click failed: {}", e);
            menu.unwind().await;
            return None;
        }
        menu.unwind().await;

        info!("Chat history {}", on_off(enabled));
        Some(enabled)
    }

    /// Select a color theme. `Opposite` does nothing while the site follows
    /// the system theme.
    #[instrument(skip_all, parent = &self.span, fields(theme = %theme))]
    pub async fn switch_theme(&mut self, theme: Theme) -> Result<()> {
        self.ensure_active()?;
        self.apply_theme(theme).await;
        self.release_elements().await;
        Ok(())
    }

    async fn apply_theme(&self, theme: Theme) {
        let selectors = &self.catalogue.selectors;
        let click = self.config.timeouts.click();
        let menu = self.menu();

        if !menu.walk(&self.settings_steps()).await {
            warn!("Theme settings unavailable");
            return;
        }

        let current = self.detect_theme().await;
        let Some(target) = theme.resolve_target(current) else {
            debug!("Theme stays {} for request {}", current, theme);
            menu.unwind().await;
            return;
        };

        let combobox = match self.browser.wait_clickable(&selectors.theme_button, click).await {
            Ok(el) => el,
            Err(e) => {
                warn!("Theme selector unavailable: {}", e);
                menu.unwind().await;
                return;
            }
        };
        if let Err(e) = self.browser.hover(&combobox).await {
            debug!("Hover over theme selector failed: {}", e);
        }
        if let Err(e) = self.browser.click(&combobox).await {
            warn!("Theme selector click failed: {}", e);
            menu.unwind().await;
            return;
        }

        if let Err(e) = self
            .browser
            .wait_present(&selectors.theme_options, self.config.timeouts.theme_options())
            .await
        {
            warn!("Theme options did not appear: {}", e);
            menu.unwind().await;
            return;
        }

        let mut switched = false;
        for option in self.browser.find_all(&selectors.theme_options).await.unwrap_or_default() {
            let label = self.browser.text(&option).await.unwrap_or_default();
            if label.trim() == target.label() {
                switched = self.browser.click(&option).await.is_ok();
                break;
            }
        }
        menu.unwind().await;

        if switched {
            info!("Theme switched from {} to {}", current, target);
        } else {
            warn!("Theme option '{}' not found", target.label());
        }
    }

    /// Theme the site currently shows.
    #[instrument(skip_all, parent = &self.span)]
    pub async fn current_theme(&self) -> Result<Theme> {
        self.ensure_active()?;
        let menu = self.menu();
        let opened = menu.walk(&self.settings_steps()).await;
        let theme = self.detect_theme().await;
        if opened {
            menu.unwind().await;
        }
        self.release_elements().await;
        Ok(theme)
    }

    fn settings_steps(&self) -> [MenuStep<'_>; 2] {
        let selectors = &self.catalogue.selectors;
        let click = self.config.timeouts.click();
        [
            MenuStep::new("menu", &selectors.menu_button, click),
            MenuStep::new("settings", &selectors.menu_settings, click),
        ]
    }

    /// Combobox label when the settings dialog is open, otherwise the root
    /// element's class list.
    async fn detect_theme(&self) -> Theme {
        let selectors = &self.catalogue.selectors;
        if let Ok(Some(button)) = self.browser.find(&selectors.theme_button).await {
            if let Ok(label) = self.browser.text(&button).await {
                if let Some(theme) = Theme::from_label(&label) {
                    return theme;
                }
            }
        }

        let class = match self.browser.find(&selectors.html).await {
            Ok(Some(html)) => self
                .browser
                .attribute(&html, "class")
                .await
                .ok()
                .flatten()
                .unwrap_or_default(),
            _ => String::new(),
        };
        theme_from_class(&class)
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Stop the keep-alive task and shut the browser down. Safe to call
    /// more than once.
    pub async fn close(&mut self) {
        if !self.active {
            self.span.in_scope(|| debug!("Session already closed"));
            return;
        }
        self.active = false;

        if let Some(mut keep_alive) = self.keep_alive.take() {
            keep_alive.stop().instrument(self.span.clone()).await;
        }
        if let Err(e) = self.browser.quit().await {
            self.span.in_scope(|| warn!("Browser shutdown reported: {}", e));
        }
        self.span.in_scope(|| info!("Session closed"));
    }

    // ---------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------

    /// Session id, as logged on the session span.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current conversation, if one was opened or resolved.
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Whether operations are still accepted.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Chat history setting as last applied by this session.
    pub fn history_enabled(&self) -> bool {
        self.history_enabled
    }

    /// Whether the background refresh task is alive.
    pub fn keep_alive_running(&self) -> bool {
        self.keep_alive.as_ref().is_some_and(KeepAlive::is_running)
    }

    /// Refresh ticks performed so far.
    pub fn keep_alive_ticks(&self) -> u64 {
        self.keep_alive.as_ref().map_or(0, KeepAlive::ticks)
    }

    /// Final state of the most recent exchange.
    pub fn last_exchange(&self) -> Option<ExchangeState> {
        self.last_exchange
    }

    /// Configuration in effect, including a token set by `switch_account`.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Locators and URLs in use.
    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if self.active {
            self.span.in_scope(|| {
                warn!("Session dropped without close(); call close() to release the browser")
            });
        }
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

fn theme_from_class(class: &str) -> Theme {
    let mut classes = class.split_whitespace();
    if classes.clone().any(|c| c == "dark") {
        Theme::Dark
    } else if classes.any(|c| c == "light") {
        Theme::Light
    } else {
        Theme::System
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_theme_from_class() {
        assert_eq!(theme_from_class("dark"), Theme::Dark);
        assert_eq!(theme_from_class("h-full light"), Theme::Light);
        assert_eq!(theme_from_class(""), Theme::System);
        assert_eq!(theme_from_class("darkish"), Theme::System);
    }

    #[test]
    fn test_on_off() {
        assert_eq!(on_off(true), "enabled");
        assert_eq!(on_off(false), "disabled");
    }
}
