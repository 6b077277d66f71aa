//! [`BrowserHandle`] backed by a local Chrome over the DevTools protocol.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use gptdrive_core::{Cookie, Error, Locator, Result};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cdp::{CdpClient, CdpEvent};
use crate::chrome::{devtools_url, ChromeProcess, TargetInfo};
use crate::config::LaunchOptions;
use crate::handle::{BrowserHandle, Element, Key, TabId};
use crate::network::NetworkEntry;
use crate::scripts;

const MAX_LOG_ENTRIES: usize = 5000;
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Object group every element reference is created in.
const ELEMENT_GROUP: &str = "gptdrive-elements";

type NetworkLog = Arc<Mutex<VecDeque<NetworkEntry>>>;

/// One attached page target and its network recorder.
struct PageTarget {
    client: CdpClient,
    log: NetworkLog,
    recorder: tokio::task::JoinHandle<()>,
}

impl Drop for PageTarget {
    fn drop(&mut self) {
        self.recorder.abort();
    }
}

pub struct ChromeBrowser {
    process: tokio::sync::Mutex<Option<ChromeProcess>>,
    port: u16,
    http: reqwest::Client,
    tabs: RwLock<HashMap<TabId, Arc<PageTarget>>>,
    current: RwLock<Option<TabId>>,
    blocked: RwLock<Vec<String>>,
    closed: AtomicBool,
}

impl ChromeBrowser {
    /// Launch Chrome and attach to its first page.
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        let mut process = ChromeProcess::launch(options).await?;
        let port = process.port();
        let browser = Self {
            process: tokio::sync::Mutex::new(None),
            port,
            http: reqwest::Client::new(),
            tabs: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            blocked: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        };

        let first_page = match browser.list_targets().await {
            Ok(targets) => targets.into_iter().find(|t| t.target_type == "page"),
            Err(e) => {
                process.shutdown().await;
                return Err(e);
            }
        };
        let Some(target) = first_page else {
            process.shutdown().await;
            return Err(Error::Browser("browser exposed no page target".into()));
        };
        if let Err(e) = browser.attach(&target).await {
            process.shutdown().await;
            return Err(e);
        }

        *browser.process.lock().await = Some(process);
        info!("Browser ready (DevTools port {})", port);
        Ok(browser)
    }

    async fn list_targets(&self) -> Result<Vec<TargetInfo>> {
        let resp = self
            .http
            .get(devtools_url(self.port, "/json/list"))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        resp.json().await.map_err(|e| Error::Http(e.to_string()))
    }

    async fn attach(&self, target: &TargetInfo) -> Result<TabId> {
        let (client, events) = CdpClient::connect(&target.ws_url).await?;
        for domain in ["Page", "Runtime", "DOM", "Network"] {
            client.enable_domain(domain).await?;
        }
        let blocked = self.blocked.read().clone();
        if !blocked.is_empty() {
            client
                .send("Network.setBlockedURLs", json!({ "urls": blocked }))
                .await?;
        }

        let log: NetworkLog = Arc::new(Mutex::new(VecDeque::new()));
        let recorder = tokio::spawn(record_network(events, Arc::clone(&log)));
        let tab = TabId(target.id.clone());
        self.tabs.write().insert(
            tab.clone(),
            Arc::new(PageTarget {
                client,
                log,
                recorder,
            }),
        );
        *self.current.write() = Some(tab.clone());
        debug!("Attached to tab {}", tab);
        Ok(tab)
    }

    fn page(&self) -> Result<Arc<PageTarget>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        let current = self
            .current
            .read()
            .clone()
            .ok_or_else(|| Error::Browser("no current tab".into()))?;
        self.tabs
            .read()
            .get(&current)
            .cloned()
            .ok_or_else(|| Error::Browser(format!("tab {current} is not attached")))
    }

    async fn evaluate(&self, expression: &str, by_value: bool) -> Result<Value> {
        let page = self.page()?;
        let result = page
            .client
            .send("Runtime.evaluate", evaluate_params(expression, by_value))
            .await?;
        check_exception(&result)?;
        Ok(result.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn call_on(&self, element: &Element, function: &str, args: Vec<Value>) -> Result<Value> {
        let page = self.page()?;
        let arguments: Vec<Value> = args.into_iter().map(|v| json!({ "value": v })).collect();
        let result = page
            .client
            .send(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": element.id,
                    "functionDeclaration": function,
                    "arguments": arguments,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        check_exception(&result)?;
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn dispatch_key(&self, key_type: &str, mut params: Value) -> Result<()> {
        params["type"] = Value::String(key_type.to_string());
        self.page()?
            .client
            .send("Input.dispatchKeyEvent", params)
            .await?;
        Ok(())
    }

    async fn mouse_event(&self, element: &Element, events: &[&str]) -> Result<()> {
        let center = self.call_on(element, &scripts::center_fn(), vec![]).await?;
        let (x, y) = point_of(&center)
            .ok_or_else(|| Error::Browser("element has no layout box".into()))?;
        let page = self.page()?;
        for event in events {
            page.client
                .send("Input.dispatchMouseEvent", build_mouse_params(event, x, y))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserHandle for ChromeBrowser {
    async fn navigate(&self, url: &str) -> Result<()> {
        let page = self.page()?;
        let result = page.client.send("Page.navigate", json!({ "url": url })).await?;
        if let Some(error_text) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(Error::Browser(format!("navigation to {url} failed: {error_text}")));
        }

        let deadline = Instant::now() + NAVIGATION_TIMEOUT;
        loop {
            if let Ok(state) = self.evaluate(scripts::READY_STATE, true).await {
                if state.get("value").and_then(|v| v.as_str()) == Some("complete") {
                    debug!("Loaded {}", url);
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::OperationTimeout(format!("loading {url}")));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn current_url(&self) -> Result<String> {
        let result = self.evaluate(scripts::CURRENT_URL, true).await?;
        Ok(string_value(&result))
    }

    async fn page_source(&self) -> Result<String> {
        let result = self.evaluate(scripts::PAGE_SOURCE, true).await?;
        Ok(string_value(&result))
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        let result = self
            .evaluate(&scripts::wrap_script(script, &args), true)
            .await?;
        Ok(result.get("value").cloned().unwrap_or(Value::Null))
    }

    async fn find(&self, locator: &Locator) -> Result<Option<Element>> {
        let result = self
            .evaluate(&scripts::find_one_expression(locator), false)
            .await?;
        Ok(remote_object_id(&result).map(Element::new))
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<Element>> {
        let result = self
            .evaluate(&scripts::find_all_expression(locator), false)
            .await?;
        let Some(array_id) = remote_object_id(&result) else {
            return Ok(Vec::new());
        };
        let page = self.page()?;
        let props = page
            .client
            .send(
                "Runtime.getProperties",
                json!({ "objectId": array_id, "ownProperties": true }),
            )
            .await;
        if let Err(e) = page
            .client
            .send("Runtime.releaseObject", json!({ "objectId": array_id }))
            .await
        {
            debug!("Releasing lookup array failed: {}", e);
        }
        Ok(array_element_ids(&props?)
            .into_iter()
            .map(Element::new)
            .collect())
    }

    async fn count(&self, locator: &Locator) -> Result<usize> {
        let result = self
            .evaluate(&scripts::count_expression(locator), true)
            .await?;
        Ok(result.get("value").and_then(Value::as_u64).unwrap_or(0) as usize)
    }

    async fn release_elements(&self) -> Result<()> {
        self.page()?
            .client
            .send(
                "Runtime.releaseObjectGroup",
                json!({ "objectGroup": ELEMENT_GROUP }),
            )
            .await?;
        Ok(())
    }

    async fn text(&self, element: &Element) -> Result<String> {
        let value = self.call_on(element, &scripts::text_fn(), vec![]).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn attribute(&self, element: &Element, name: &str) -> Result<Option<String>> {
        let value = self
            .call_on(element, &scripts::attribute_fn(), vec![json!(name)])
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn inner_html(&self, element: &Element) -> Result<String> {
        let value = self.call_on(element, &scripts::inner_html_fn(), vec![]).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn is_clickable(&self, element: &Element) -> Result<bool> {
        let value = self.call_on(element, &scripts::is_clickable_fn(), vec![]).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn click(&self, element: &Element) -> Result<()> {
        self.mouse_event(element, &["mouseMoved", "mousePressed", "mouseReleased"])
            .await
    }

    async fn hover(&self, element: &Element) -> Result<()> {
        self.mouse_event(element, &["mouseMoved"]).await
    }

    async fn set_value(&self, element: &Element, value: &str) -> Result<()> {
        self.call_on(element, &scripts::set_value_fn(), vec![json!(value)])
            .await?;
        Ok(())
    }

    async fn send_keys(&self, element: &Element, text: &str) -> Result<()> {
        self.call_on(element, &scripts::focus_fn(), vec![]).await?;
        for ch in text.chars() {
            let s = ch.to_string();
            self.dispatch_key("keyDown", build_char_params(&s)).await?;
            self.dispatch_key("keyUp", build_char_params(&s)).await?;
        }
        Ok(())
    }

    async fn press_key(&self, element: &Element, key: Key) -> Result<()> {
        self.call_on(element, &scripts::focus_fn(), vec![]).await?;
        self.dispatch_key("keyDown", build_key_params(key)).await?;
        self.dispatch_key("keyUp", build_key_params(key)).await
    }

    async fn remove(&self, element: &Element) -> Result<()> {
        self.call_on(element, &scripts::remove_fn(), vec![]).await?;
        Ok(())
    }

    async fn network_log(&self) -> Result<Vec<NetworkEntry>> {
        let page = self.page()?;
        let entries = page.log.lock().iter().cloned().collect();
        Ok(entries)
    }

    async fn response_body(&self, request_id: &str) -> Result<Vec<u8>> {
        let result = self
            .page()?
            .client
            .send("Network.getResponseBody", json!({ "requestId": request_id }))
            .await?;
        decode_body(&result)
    }

    async fn set_cookie(&self, cookie: &Cookie) -> Result<()> {
        let result = self
            .page()?
            .client
            .send(
                "Network.setCookie",
                json!({
                    "name": cookie.name,
                    "value": cookie.value,
                    "domain": cookie.domain,
                    "path": cookie.path,
                    "httpOnly": cookie.http_only,
                    "secure": cookie.secure,
                }),
            )
            .await?;
        if result.get("success").and_then(|v| v.as_bool()) == Some(false) {
            return Err(Error::Browser(format!("cookie {} was rejected", cookie.name)));
        }
        Ok(())
    }

    async fn delete_cookie(&self, name: &str, url: &str) -> Result<()> {
        self.page()?
            .client
            .send("Network.deleteCookies", json!({ "name": name, "url": url }))
            .await?;
        Ok(())
    }

    async fn block_urls(&self, patterns: &[String]) -> Result<()> {
        {
            let mut blocked = self.blocked.write();
            for p in patterns {
                if !blocked.contains(p) {
                    blocked.push(p.clone());
                }
            }
        }
        let urls = self.blocked.read().clone();
        self.page()?
            .client
            .send("Network.setBlockedURLs", json!({ "urls": urls }))
            .await?;
        Ok(())
    }

    async fn open_tab(&self) -> Result<TabId> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        let target: TargetInfo = self
            .http
            .put(devtools_url(self.port, "/json/new?about:blank"))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let tab = self.attach(&target).await?;
        self.activate(&tab).await;
        Ok(tab)
    }

    async fn close_tab(&self, tab: &TabId) -> Result<()> {
        if self.tabs.write().remove(tab).is_none() {
            return Err(Error::Browser(format!("unknown tab {tab}")));
        }
        {
            let mut current = self.current.write();
            if current.as_ref() == Some(tab) {
                *current = None;
            }
        }
        self.http
            .get(devtools_url(self.port, &format!("/json/close/{tab}")))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        debug!("Closed tab {}", tab);
        Ok(())
    }

    async fn switch_tab(&self, tab: &TabId) -> Result<()> {
        if !self.tabs.read().contains_key(tab) {
            return Err(Error::Browser(format!("unknown tab {tab}")));
        }
        *self.current.write() = Some(tab.clone());
        self.activate(tab).await;
        Ok(())
    }

    async fn current_tab(&self) -> Result<TabId> {
        self.current
            .read()
            .clone()
            .ok_or_else(|| Error::Browser("no current tab".into()))
    }

    async fn quit(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.tabs.write().clear();
        *self.current.write() = None;
        if let Some(mut process) = self.process.lock().await.take() {
            process.shutdown().await;
        }
        Ok(())
    }
}

impl ChromeBrowser {
    async fn activate(&self, tab: &TabId) {
        let url = devtools_url(self.port, &format!("/json/activate/{tab}"));
        if let Err(e) = self.http.get(url).send().await {
            warn!("Failed to activate tab {}: {}", tab, e);
        }
    }
}

async fn record_network(mut events: mpsc::UnboundedReceiver<CdpEvent>, log: NetworkLog) {
    while let Some(event) = events.recv().await {
        if let Some(entry) = NetworkEntry::from_event(&event.method, &event.params) {
            let mut log = log.lock();
            if log.len() >= MAX_LOG_ENTRIES {
                log.pop_front();
            }
            log.push_back(entry);
        }
    }
}

// ---------------------------------------------------------------
// Protocol helpers
// ---------------------------------------------------------------

/// Element lookups return references, created in [`ELEMENT_GROUP`] so they
/// can be released together.
fn evaluate_params(expression: &str, by_value: bool) -> Value {
    let mut params = json!({
        "expression": expression,
        "returnByValue": by_value,
        "awaitPromise": true,
    });
    if !by_value {
        params["objectGroup"] = Value::String(ELEMENT_GROUP.to_string());
    }
    params
}

fn check_exception(result: &Value) -> Result<()> {
    let Some(exception) = result.get("exceptionDetails") else {
        return Ok(());
    };
    let message = exception
        .get("exception")
        .and_then(|e| e.get("description"))
        .and_then(|d| d.as_str())
        .or_else(|| exception.get("text").and_then(|t| t.as_str()))
        .unwrap_or("unknown exception")
        .to_string();
    if scripts::is_stale_exception(&message) {
        Err(Error::StaleElement(message))
    } else {
        Err(Error::Browser(format!("script error: {message}")))
    }
}

fn string_value(result: &Value) -> String {
    result
        .get("value")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Object id of a remote object, `None` for `null`/`undefined`.
fn remote_object_id(result: &Value) -> Option<String> {
    if result.get("subtype").and_then(|v| v.as_str()) == Some("null") {
        return None;
    }
    result
        .get("objectId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Element object ids from `Runtime.getProperties` of an array, in index order.
fn array_element_ids(props: &Value) -> Vec<String> {
    let mut indexed: Vec<(usize, String)> = props
        .get("result")
        .and_then(|r| r.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|p| {
                    let index = p.get("name")?.as_str()?.parse::<usize>().ok()?;
                    let id = p.get("value")?.get("objectId")?.as_str()?.to_string();
                    Some((index, id))
                })
                .collect()
        })
        .unwrap_or_default();
    indexed.sort_by_key(|(i, _)| *i);
    indexed.into_iter().map(|(_, id)| id).collect()
}

fn point_of(value: &Value) -> Option<(f64, f64)> {
    Some((value.get("x")?.as_f64()?, value.get("y")?.as_f64()?))
}

fn decode_body(result: &Value) -> Result<Vec<u8>> {
    let body = result.get("body").and_then(|v| v.as_str()).unwrap_or_default();
    if result.get("base64Encoded").and_then(|v| v.as_bool()) == Some(true) {
        base64::engine::general_purpose::STANDARD
            .decode(body)
            .map_err(|e| Error::Browser(format!("bad response body encoding: {e}")))
    } else {
        Ok(body.as_bytes().to_vec())
    }
}

pub fn build_mouse_params(event_type: &str, x: f64, y: f64) -> Value {
    json!({
        "type": event_type,
        "x": x,
        "y": y,
        "button": if event_type == "mouseMoved" { "none" } else { "left" },
        "clickCount": if event_type == "mouseMoved" { 0 } else { 1 },
    })
}

pub fn build_char_params(text: &str) -> Value {
    json!({
        "text": text,
        "unmodifiedText": text,
        "key": text,
    })
}

pub fn build_key_params(key: Key) -> Value {
    let mut params = json!({
        "key": key.name(),
        "code": key.name(),
        "windowsVirtualKeyCode": key.key_code(),
        "nativeVirtualKeyCode": key.key_code(),
    });
    if let Some(text) = key.text() {
        params["text"] = json!(text);
        params["unmodifiedText"] = json!(text);
    }
    params
}
