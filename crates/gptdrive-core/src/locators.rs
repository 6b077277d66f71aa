//! Locator catalogue: every page element and URL the session relies on.
//!
//! The site's markup changes often, so the whole catalogue can be replaced
//! from a JSON file without touching the session logic.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// How a locator's selector is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Css,
    #[serde(rename = "xpath")]
    XPath,
    Id,
    LinkText,
    TagName,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Css => "css",
            Strategy::XPath => "xpath",
            Strategy::Id => "id",
            Strategy::LinkText => "link_text",
            Strategy::TagName => "tag_name",
        }
    }
}

/// A (strategy, selector) pair identifying a page element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    pub strategy: Strategy,
    pub selector: String,
}

impl Locator {
    pub fn new(strategy: Strategy, selector: impl Into<String>) -> Self {
        Self {
            strategy,
            selector: selector.into(),
        }
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Self::new(Strategy::Css, selector)
    }

    pub fn xpath(selector: impl Into<String>) -> Self {
        Self::new(Strategy::XPath, selector)
    }

    pub fn id(selector: impl Into<String>) -> Self {
        Self::new(Strategy::Id, selector)
    }

    pub fn link_text(selector: impl Into<String>) -> Self {
        Self::new(Strategy::LinkText, selector)
    }

    pub fn tag_name(selector: impl Into<String>) -> Self {
        Self::new(Strategy::TagName, selector)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.strategy.as_str(), self.selector)
    }
}

/// Page elements, grouped roughly by the operation that needs them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    // ---------------------------------------------------------------
    // Page structure
    // ---------------------------------------------------------------
    pub html: Locator,
    pub body: Locator,
    pub pre: Locator,
    pub challenge_form: Locator,
    pub alert: Locator,
    pub intro: Locator,
    /// Onboarding dialog buttons, clicked in order.
    pub info_buttons: Vec<Locator>,

    // ---------------------------------------------------------------
    // Conversation
    // ---------------------------------------------------------------
    pub textbox: Locator,
    pub streaming: Locator,
    pub big_response: Locator,
    pub small_response: Locator,
    pub continue_generating: Locator,
    pub regenerate_response: Locator,
    pub new_chat: Locator,
    pub clear_chat: Locator,

    // ---------------------------------------------------------------
    // Menus
    // ---------------------------------------------------------------
    pub menu_button: Locator,
    pub menu_settings: Locator,
    pub menu_clear_conversations: Locator,
    pub menu_confirm_clear_conversations: Locator,
    pub theme_button: Locator,
    pub theme_options: Locator,
    pub data_controls: Locator,
    pub chat_history_toggle: Locator,
    pub shared_links_manage: Locator,

    /// Class fragment marking an answer surface as an error message.
    pub error_marker_class: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            html: Locator::xpath("/html"),
            body: Locator::tag_name("body"),
            pre: Locator::tag_name("pre"),
            challenge_form: Locator::id("challenge-form"),
            alert: Locator::xpath(r#"//div[@role="alert"]"#),
            intro: Locator::id("headlessui-portal-root"),
            info_buttons: vec![
                Locator::xpath(r#"//*[@id="radix-:rf:"]/div[2]/div/div[2]/button"#),
                Locator::xpath(r#"//*[@id="radix-:rf:"]/div[2]/div/div[2]/button[2]"#),
                Locator::xpath(r#"//*[@id="radix-:rf:"]/div[2]/div/div[2]/button[2]"#),
            ],
            textbox: Locator::xpath(r#"//*[@id="prompt-textarea"]"#),
            streaming: Locator::xpath(
                r#"//div[starts-with(@class, "result-streaming markdown prose")]"#,
            ),
            big_response: Locator::xpath(r#"//div[@class="flex-1 overflow-hidden"]//div[p]"#),
            small_response: Locator::xpath(
                r#"//div[starts-with(@class, "markdown prose w-full break-words")]"#,
            ),
            continue_generating: Locator::xpath(
                "/html/body/div[1]/div[1]/div[2]/div/main/div[3]/form/div/div[1]/div/button[2]",
            ),
            regenerate_response: Locator::xpath(
                "/html/body/div[1]/div[1]/div[2]/div/main/div[2]/form/div/div[1]/div/div[2]/div/button",
            ),
            new_chat: Locator::link_text("New chat"),
            clear_chat: Locator::link_text("Clear chat"),
            menu_button: Locator::xpath("/html/body/div[1]/div[1]/div[1]/div/div/div/nav/div[4]/div/button"),
            menu_settings: Locator::link_text("Settings"),
            menu_clear_conversations: Locator::xpath(
                "//div[contains(text(), 'Clear all chats')]/following-sibling::button",
            ),
            menu_confirm_clear_conversations: Locator::xpath(
                r#"//button[@class="btn relative btn-primary"]/div[text()="Confirm deletion"]"#,
            ),
            theme_button: Locator::css("button[role='combobox']"),
            theme_options: Locator::css("[role='option']"),
            data_controls: Locator::css(
                r#"button[data-state="inactive"][id^="radix-"][id$="-trigger-DataControls"]"#,
            ),
            chat_history_toggle: Locator::css(r#"button[aria-label="Chat history & training"]"#),
            shared_links_manage: Locator::xpath("//button[.//div[text()='Manage']]"),
            error_marker_class: "text-red".into(),
        }
    }
}

/// Site endpoints and cookie identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Urls {
    pub base: String,
    pub chat: String,
    pub auth_session: String,
    pub moderations: String,
    pub cookie_domain: String,
    pub session_cookie_name: String,
    /// URL fragments matched against the network log.
    pub conversations_api: String,
    pub shared_conversations_api: String,
    pub accounts_check_api: String,
}

impl Default for Urls {
    fn default() -> Self {
        Self {
            base: "https://chat.openai.com".into(),
            chat: "https://chat.openai.com/chat".into(),
            auth_session: "https://chat.openai.com/api/auth/session".into(),
            moderations: "https://chat.openai.com/backend-api/moderations".into(),
            cookie_domain: "chat.openai.com".into(),
            session_cookie_name: "__Secure-next-auth.session-token".into(),
            conversations_api: "/backend-api/conversations".into(),
            shared_conversations_api: "/backend-api/shared_conversations".into(),
            accounts_check_api: "backend-api/accounts/check/".into(),
        }
    }
}

impl Urls {
    /// URL of a single conversation page.
    pub fn conversation(&self, conversation_id: &str) -> String {
        format!("{}/{}", self.chat, conversation_id)
    }

    /// Whether a browser URL belongs to the chat site.
    pub fn is_on_site(&self, url: &str) -> bool {
        url.starts_with(&self.base)
    }
}

/// Full catalogue handed to a session at start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalogue {
    pub selectors: Selectors,
    pub urls: Urls,
}

impl Catalogue {
    /// Load a catalogue override. Missing keys keep their built-in values.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read catalogue {}: {}", path.display(), e))
        })?;
        let catalogue: Catalogue = serde_json::from_str(&raw)?;
        info!("Loaded locator catalogue from {}", path.display());
        Ok(catalogue)
    }

    /// Load from `path` when given, otherwise the built-in catalogue.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}
