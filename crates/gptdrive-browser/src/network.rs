//! Network log entries recorded from DevTools events.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const RESPONSE_RECEIVED: &str = "Network.responseReceived";
pub const LOADING_FINISHED: &str = "Network.loadingFinished";

/// Response metadata carried by a `Network.responseReceived` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub mime_type: String,
    pub status: u16,
    pub url: String,
}

/// One logged network event. The log is ordered oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEntry {
    pub method: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseMeta>,
}

impl NetworkEntry {
    /// Build an entry from a raw `Network.*` event; other events are ignored.
    pub fn from_event(method: &str, params: &Value) -> Option<Self> {
        if !method.starts_with("Network.") {
            return None;
        }
        let request_id = params.get("requestId")?.as_str()?.to_string();
        let response = params.get("response").map(|r| ResponseMeta {
            mime_type: r
                .get("mimeType")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            status: r
                .get("status")
                .and_then(|v| v.as_u64())
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or(0),
            url: r
                .get("url")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        });
        Some(Self {
            method: method.to_string(),
            request_id,
            response,
        })
    }

    pub fn response_received(
        request_id: impl Into<String>,
        url: impl Into<String>,
        mime_type: impl Into<String>,
        status: u16,
    ) -> Self {
        Self {
            method: RESPONSE_RECEIVED.to_string(),
            request_id: request_id.into(),
            response: Some(ResponseMeta {
                mime_type: mime_type.into(),
                status,
                url: url.into(),
            }),
        }
    }

    pub fn loading_finished(request_id: impl Into<String>) -> Self {
        Self {
            method: LOADING_FINISHED.to_string(),
            request_id: request_id.into(),
            response: None,
        }
    }
}

/// Newest completed, status-200 JSON response whose URL contains `url_fragment`.
///
/// A response counts as completed once its request id also has a
/// `Network.loadingFinished` entry, so a body fetched for it is whole.
pub fn find_latest_json_response<'a>(
    log: &'a [NetworkEntry],
    url_fragment: &str,
) -> Option<&'a NetworkEntry> {
    let finished: HashSet<&str> = log
        .iter()
        .filter(|e| e.method == LOADING_FINISHED)
        .map(|e| e.request_id.as_str())
        .collect();

    log.iter().rev().find(|entry| {
        entry.method == RESPONSE_RECEIVED
            && finished.contains(entry.request_id.as_str())
            && entry.response.as_ref().map_or(false, |r| {
                r.mime_type.contains("json") && r.status == 200 && r.url.contains(url_fragment)
            })
    })
}
