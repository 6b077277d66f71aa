//! Clearing the anti-bot interstitial and reading the auth session.
//!
//! The auth endpoint is opened in an auxiliary tab so the chat page keeps
//! its state. The tab is always closed and focus returned, whatever the
//! outcome of the attempt.

use std::time::Duration;

use gptdrive_browser::{BrowserHandle, TabId};
use gptdrive_core::{Catalogue, Error, Result, Selectors};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Resolves the challenge by repeatedly loading the auth session endpoint.
pub struct ChallengeResolver<'a> {
    browser: &'a dyn BrowserHandle,
    catalogue: &'a Catalogue,
    timeout: Duration,
    retries: u32,
}

impl<'a> ChallengeResolver<'a> {
    pub fn new(
        browser: &'a dyn BrowserHandle,
        catalogue: &'a Catalogue,
        timeout: Duration,
        retries: u32,
    ) -> Self {
        Self {
            browser,
            catalogue,
            timeout,
            retries,
        }
    }

    /// Returns the validated auth session payload.
    ///
    /// One initial attempt plus `retries` more; only a challenge that never
    /// clears is retried. Credential rejection fails immediately.
    pub async fn resolve(&self) -> Result<Value> {
        let attempts = 1 + self.retries;
        for attempt in 1..=attempts {
            debug!("Challenge attempt {}/{}", attempt, attempts);
            match fetch_in_auxiliary_tab(
                self.browser,
                &self.catalogue.selectors,
                &self.catalogue.urls.auth_session,
                self.timeout,
            )
            .await
            {
                Ok(payload) => {
                    validate_session_payload(&payload)?;
                    info!("Challenge cleared on attempt {}", attempt);
                    return Ok(payload);
                }
                Err(Error::OperationTimeout(reason)) => {
                    warn!("Challenge still present on attempt {}: {}", attempt, reason);
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::ChallengeFailed { attempts })
    }
}

/// Load `url` in a fresh tab, wait for the challenge form to go away and
/// read the JSON body. The tab is released before returning.
pub async fn fetch_in_auxiliary_tab(
    browser: &dyn BrowserHandle,
    selectors: &Selectors,
    url: &str,
    challenge_timeout: Duration,
) -> Result<Value> {
    let original = browser.current_tab().await?;
    let aux = browser.open_tab().await?;

    let outcome = async {
        browser.navigate(url).await?;
        browser
            .wait_absent(&selectors.challenge_form, challenge_timeout)
            .await?;
        read_json_page(browser, selectors).await
    }
    .await;

    let released = release_tab(browser, &aux, &original).await;
    let payload = outcome?;
    released?;
    Ok(payload)
}

async fn release_tab(
    browser: &dyn BrowserHandle,
    aux: &TabId,
    original: &TabId,
) -> Result<()> {
    let closed = browser.close_tab(aux).await;
    if let Err(e) = &closed {
        warn!("Failed to close auxiliary tab {}: {}", aux, e);
    }
    browser.switch_tab(original).await?;
    closed
}

/// Parse a page rendering a JSON document. Chrome wraps raw JSON in a
/// `<pre>` block, so fall back to its text. An empty page yields `Null`.
pub async fn read_json_page(browser: &dyn BrowserHandle, selectors: &Selectors) -> Result<Value> {
    let source = browser.page_source().await?;
    let trimmed = source.trim();
    let raw = if trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        match browser.find(&selectors.pre).await? {
            Some(pre) => browser.text(&pre).await?.trim().to_string(),
            None => String::new(),
        }
    };
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&raw)?)
}

/// Reject sessions the auth endpoint did not vouch for.
pub fn validate_session_payload(payload: &Value) -> Result<()> {
    let empty = match payload {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if empty {
        return Err(Error::InvalidCredential(
            "auth session is empty; the session token was not accepted".into(),
        ));
    }
    if payload.get("error").and_then(Value::as_str) == Some("RefreshAccessTokenError") {
        return Err(Error::InvalidCredential(
            "session token has expired or is invalid".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_payload_is_invalid_credential() {
        assert!(matches!(
            validate_session_payload(&Value::Null),
            Err(Error::InvalidCredential(_))
        ));
        assert!(matches!(
            validate_session_payload(&json!({})),
            Err(Error::InvalidCredential(_))
        ));
    }

    #[test]
    fn test_refresh_error_is_invalid_credential() {
        let payload = json!({"error": "RefreshAccessTokenError"});
        assert!(matches!(
            validate_session_payload(&payload),
            Err(Error::InvalidCredential(_))
        ));
    }

    #[test]
    fn test_valid_payload() {
        let payload = json!({"user": {"id": "u1"}, "accessToken": "t"});
        assert!(validate_session_payload(&payload).is_ok());
    }
}
