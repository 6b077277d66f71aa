//! Value objects returned by a chat session.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

// ---------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------

/// One answer produced by the remote UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Sanitized markdown of the answer surface.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ChatResponse {
    pub fn new(content: impl Into<String>, conversation_id: Option<String>) -> Self {
        Self {
            content: content.into(),
            conversation_id,
        }
    }
}

impl fmt::Display for ChatResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.content)
    }
}

/// How a prompt is put into the input box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Assign the whole value at once through a script.
    #[default]
    Instant,
    /// Type character by character with a delay between keys.
    Slow,
}

/// Site color theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Theme {
    Light,
    Dark,
    /// Whatever the current theme is not. Meaningless while the site follows the system.
    Opposite,
    System,
}

impl Theme {
    /// Label of the matching option in the settings theme dropdown.
    pub fn label(&self) -> &'static str {
        match self {
            Theme::Light => "Light",
            Theme::Dark => "Dark",
            Theme::Opposite => "Opposite",
            Theme::System => "System",
        }
    }

    /// Concrete theme to select, or `None` when nothing should change.
    pub fn resolve_target(self, current: Theme) -> Option<Theme> {
        let target = match (self, current) {
            (Theme::Opposite, Theme::Light) => Theme::Dark,
            (Theme::Opposite, Theme::Dark) => Theme::Light,
            (Theme::Opposite, _) => return None,
            (t, _) => t,
        };
        if target == current {
            None
        } else {
            Some(target)
        }
    }

    /// Parse the text the site shows for its current theme.
    pub fn from_label(label: &str) -> Option<Theme> {
        match label.trim().to_lowercase().as_str() {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            "system" => Some(Theme::System),
            _ => None,
        }
    }
}

impl FromStr for Theme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            "opposite" => Ok(Theme::Opposite),
            "system" => Ok(Theme::System),
            other => Err(Error::Config(format!("unknown theme: {}", other))),
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Session cookie injected into the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
}

impl Cookie {
    /// Domain-scoped, http-only, secure cookie at path `/`.
    pub fn session(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: "/".into(),
            http_only: true,
            secure: true,
        }
    }
}

// ---------------------------------------------------------------
// Identity
// ---------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(deserialize_with = "null_as_default")]
    pub image: String,
    #[serde(deserialize_with = "null_as_default")]
    pub picture: String,
    #[serde(deserialize_with = "null_as_default")]
    pub idp: String,
    #[serde(deserialize_with = "null_as_default")]
    pub iat: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub mfa: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub groups: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub intercom_hash: String,
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Snapshot of the auth session endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub user: User,
    #[serde(deserialize_with = "deserialize_expires")]
    pub expires: DateTime<Utc>,
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "authProvider", default, deserialize_with = "null_as_default")]
    pub auth_provider: String,
}

impl SessionData {
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

impl fmt::Display for SessionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (expires {})", self.user, self.expires.to_rfc3339())
    }
}

const EXPIRES_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

fn deserialize_expires<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    NaiveDateTime::parse_from_str(&raw, EXPIRES_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

/// Reads an explicit `null` as the field's default.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------
// Listings
// ---------------------------------------------------------------

/// Entry of the conversation sidebar listing. Timestamps are kept as the site sends them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Conversation {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    pub create_time: Value,
    pub update_time: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Conversations {
    #[serde(deserialize_with = "null_as_default")]
    pub items: Vec<Conversation>,
    #[serde(deserialize_with = "null_as_default")]
    pub total: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub limit: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub offset: u64,
    #[serde(rename = "has_missing_conversations", deserialize_with = "null_as_default")]
    pub has_missing: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedConversation {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    pub create_time: Value,
    pub update_time: Value,
    pub mapping: Value,
    pub current_node: Value,
    #[serde(deserialize_with = "null_as_default")]
    pub conversation_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedConversations {
    #[serde(deserialize_with = "null_as_default")]
    pub items: Vec<SharedConversation>,
    #[serde(deserialize_with = "null_as_default")]
    pub total: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub limit: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub offset: u64,
    #[serde(rename = "has_missing_conversations", deserialize_with = "null_as_default")]
    pub has_missing: bool,
}

// ---------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Account {
    #[serde(deserialize_with = "null_as_default")]
    pub account_user_role: String,
    #[serde(deserialize_with = "null_as_default")]
    pub account_user_id: String,
    pub processor: Value,
    #[serde(deserialize_with = "null_as_default")]
    pub account_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub is_most_recent_expired_subscription_gratis: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub has_previously_paid_subscription: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Entitlement {
    pub subscription_id: Option<Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub has_active_subscription: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub subscription_plan: String,
    pub expires_at: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LastActiveSubscription {
    pub subscription_id: Option<Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub purchase_origin_platform: String,
    #[serde(deserialize_with = "null_as_default")]
    pub will_renew: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultAccount {
    pub account: Account,
    #[serde(deserialize_with = "null_as_default")]
    pub features: Vec<String>,
    pub entitlement: Entitlement,
    pub last_active_subscription: LastActiveSubscription,
}

/// Account check payload; only the default account is surfaced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accounts {
    pub default: DefaultAccount,
}

impl Accounts {
    /// Parse `{"accounts": {"default": {...}}}`.
    pub fn from_value(value: &Value) -> Result<Self> {
        let default = value
            .get("accounts")
            .and_then(|a| a.get("default"))
            .cloned()
            .ok_or_else(|| Error::Browser("account payload has no default account".into()))?;
        Ok(Self {
            default: serde_json::from_value(default)?,
        })
    }
}
