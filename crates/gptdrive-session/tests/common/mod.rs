//! Scripted in-memory browser for session tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use gptdrive_browser::{BrowserHandle, Element, Key, NetworkEntry, TabId};
use gptdrive_core::{Catalogue, Cookie, Error, Locator, Result, SessionConfig};
use gptdrive_session::ChatSession;

/// A page element the fake can hand out.
#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    pub text: String,
    pub html: String,
    pub attrs: HashMap<String, String>,
    pub clickable: bool,
}

impl FakeElement {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            html: String::new(),
            attrs: HashMap::new(),
            clickable: true,
        }
    }

    pub fn with_html(mut self, html: &str) -> Self {
        self.html = html.to_string();
        self
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn unclickable(mut self) -> Self {
        self.clickable = false;
        self
    }
}

/// Page change a click on a scripted element triggers.
#[derive(Debug, Clone)]
pub enum ClickEffect {
    Place(Locator, FakeElement),
    Clear(Locator),
}

#[derive(Default)]
struct State {
    next_id: u64,
    elements: HashMap<String, FakeElement>,
    placements: HashMap<Locator, Vec<String>>,
    navigate_hooks: Vec<(String, Locator, FakeElement)>,
    stale_once: HashSet<String>,
    renew_on_touch: HashSet<String>,
    click_hooks: HashMap<String, Vec<ClickEffect>>,

    pages: HashMap<String, String>,
    tab_urls: HashMap<TabId, String>,
    tab_counter: u64,
    current: Option<TabId>,

    network: Vec<NetworkEntry>,
    bodies: HashMap<String, Vec<u8>>,

    navigations: Vec<String>,
    scripts: Vec<String>,
    clicks: Vec<String>,
    hovers: Vec<String>,
    typed: HashMap<String, String>,
    values: HashMap<String, String>,
    keys: Vec<(String, Key)>,
    cookies: Vec<Cookie>,
    deleted_cookies: Vec<(String, String)>,
    blocked: Vec<String>,
    releases: u32,
    quits: u32,
}

pub struct FakeBrowser {
    state: Mutex<State>,
}

impl Default for FakeBrowser {
    fn default() -> Self {
        let main = TabId("tab-0".into());
        let mut state = State::default();
        state.tab_urls.insert(main.clone(), "about:blank".into());
        state.current = Some(main);
        Self {
            state: Mutex::new(state),
        }
    }
}

impl FakeBrowser {
    // ---------------------------------------------------------------
    // Scripting
    // ---------------------------------------------------------------

    /// Add an element matched by `locator`; returns its id.
    pub fn place(&self, locator: &Locator, element: FakeElement) -> String {
        let mut state = self.state.lock();
        place_locked(&mut state, locator, element)
    }

    /// Remove every element matched by `locator`.
    pub fn clear(&self, locator: &Locator) {
        clear_locked(&mut self.state.lock(), locator);
    }

    /// Make `locator` match `element` once a URL containing `fragment` is opened.
    pub fn on_navigate(&self, fragment: &str, locator: &Locator, element: FakeElement) {
        self.state
            .lock()
            .navigate_hooks
            .push((fragment.to_string(), locator.clone(), element));
    }

    /// Next typing or value assignment into `id` fails as stale.
    pub fn stale_once(&self, id: &str) {
        self.state.lock().stale_once.insert(id.to_string());
    }

    /// Next typing or value assignment into `id` fails as stale, and the
    /// page re-renders the element under a new id.
    pub fn renew_on_touch(&self, id: &str) {
        self.state.lock().renew_on_touch.insert(id.to_string());
    }

    /// Apply `effect` when `id` is clicked.
    pub fn on_click(&self, id: &str, effect: ClickEffect) {
        self.state
            .lock()
            .click_hooks
            .entry(id.to_string())
            .or_default()
            .push(effect);
    }

    pub fn set_page(&self, url: &str, source: &str) {
        self.state
            .lock()
            .pages
            .insert(url.to_string(), source.to_string());
    }

    /// Record a finished JSON response in the network log.
    pub fn add_json_response(&self, request_id: &str, url: &str, body: Value) {
        let mut state = self.state.lock();
        state.network.push(NetworkEntry::response_received(
            request_id,
            url,
            "application/json",
            200,
        ));
        state.network.push(NetworkEntry::loading_finished(request_id));
        state
            .bodies
            .insert(request_id.to_string(), body.to_string().into_bytes());
    }

    // ---------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------

    pub fn clicks(&self) -> Vec<String> {
        self.state.lock().clicks.clone()
    }

    pub fn clicked(&self, id: &str) -> bool {
        self.state.lock().clicks.iter().any(|c| c == id)
    }

    pub fn hovers(&self) -> Vec<String> {
        self.state.lock().hovers.clone()
    }

    pub fn typed(&self, id: &str) -> String {
        self.state.lock().typed.get(id).cloned().unwrap_or_default()
    }

    pub fn value(&self, id: &str) -> Option<String> {
        self.state.lock().values.get(id).cloned()
    }

    pub fn keys(&self) -> Vec<(String, Key)> {
        self.state.lock().keys.clone()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.state.lock().scripts.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().navigations.clone()
    }

    pub fn cookies(&self) -> Vec<Cookie> {
        self.state.lock().cookies.clone()
    }

    pub fn deleted_cookies(&self) -> Vec<(String, String)> {
        self.state.lock().deleted_cookies.clone()
    }

    pub fn blocked(&self) -> Vec<String> {
        self.state.lock().blocked.clone()
    }

    /// Times the element references were released.
    pub fn releases(&self) -> u32 {
        self.state.lock().releases
    }

    pub fn quits(&self) -> u32 {
        self.state.lock().quits
    }

    pub fn open_tabs(&self) -> usize {
        self.state.lock().tab_urls.len()
    }

    pub fn current_tab_id(&self) -> Option<TabId> {
        self.state.lock().current.clone()
    }

    fn element(&self, element: &Element) -> Result<FakeElement> {
        self.state
            .lock()
            .elements
            .get(&element.id)
            .cloned()
            .ok_or_else(|| Error::StaleElement(element.id.clone()))
    }

    fn take_stale(&self, element: &Element) -> Result<()> {
        let mut state = self.state.lock();
        if state.renew_on_touch.remove(&element.id) {
            renew_locked(&mut state, &element.id);
            return Err(Error::StaleElement(element.id.clone()));
        }
        if state.stale_once.remove(&element.id) || !state.elements.contains_key(&element.id) {
            return Err(Error::StaleElement(element.id.clone()));
        }
        Ok(())
    }
}

fn place_locked(state: &mut State, locator: &Locator, element: FakeElement) -> String {
    state.next_id += 1;
    let id = format!("el-{}", state.next_id);
    state.elements.insert(id.clone(), element);
    state
        .placements
        .entry(locator.clone())
        .or_default()
        .push(id.clone());
    id
}

/// Move the element `id` to a fresh id, keeping its placements.
fn renew_locked(state: &mut State, id: &str) {
    let Some(element) = state.elements.remove(id) else {
        return;
    };
    state.next_id += 1;
    let fresh = format!("el-{}", state.next_id);
    state.elements.insert(fresh.clone(), element);
    for ids in state.placements.values_mut() {
        for placed in ids.iter_mut().filter(|placed| placed.as_str() == id) {
            *placed = fresh.clone();
        }
    }
}

fn clear_locked(state: &mut State, locator: &Locator) {
    if let Some(ids) = state.placements.remove(locator) {
        for id in ids {
            state.elements.remove(&id);
        }
    }
}

#[async_trait]
impl BrowserHandle for FakeBrowser {
    async fn navigate(&self, url: &str) -> Result<()> {
        let mut state = self.state.lock();
        let tab = state
            .current
            .clone()
            .ok_or_else(|| Error::Browser("no current tab".into()))?;
        state.tab_urls.insert(tab, url.to_string());
        state.navigations.push(url.to_string());

        let hooks: Vec<(Locator, FakeElement)> = state
            .navigate_hooks
            .iter()
            .filter(|(fragment, _, _)| url.contains(fragment.as_str()))
            .map(|(_, loc, el)| (loc.clone(), el.clone()))
            .collect();
        for (locator, element) in hooks {
            place_locked(&mut state, &locator, element);
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let state = self.state.lock();
        Ok(state
            .current
            .as_ref()
            .and_then(|t| state.tab_urls.get(t))
            .cloned()
            .unwrap_or_default())
    }

    async fn page_source(&self) -> Result<String> {
        let url = self.current_url().await?;
        Ok(self
            .state
            .lock()
            .pages
            .get(&url)
            .cloned()
            .unwrap_or_else(|| "<html><head></head><body></body></html>".into()))
    }

    async fn execute(&self, script: &str, _args: Vec<Value>) -> Result<Value> {
        self.state.lock().scripts.push(script.to_string());
        Ok(Value::Null)
    }

    async fn find(&self, locator: &Locator) -> Result<Option<Element>> {
        Ok(self.find_all(locator).await?.into_iter().next())
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<Element>> {
        let state = self.state.lock();
        Ok(state
            .placements
            .get(locator)
            .map(|ids| ids.iter().map(Element::new).collect())
            .unwrap_or_default())
    }

    async fn count(&self, locator: &Locator) -> Result<usize> {
        Ok(self
            .state
            .lock()
            .placements
            .get(locator)
            .map_or(0, Vec::len))
    }

    async fn release_elements(&self) -> Result<()> {
        self.state.lock().releases += 1;
        Ok(())
    }

    async fn text(&self, element: &Element) -> Result<String> {
        Ok(self.element(element)?.text)
    }

    async fn attribute(&self, element: &Element, name: &str) -> Result<Option<String>> {
        Ok(self.element(element)?.attrs.get(name).cloned())
    }

    async fn inner_html(&self, element: &Element) -> Result<String> {
        Ok(self.element(element)?.html)
    }

    async fn is_clickable(&self, element: &Element) -> Result<bool> {
        Ok(self.element(element)?.clickable)
    }

    async fn click(&self, element: &Element) -> Result<()> {
        self.element(element)?;
        let mut state = self.state.lock();
        state.clicks.push(element.id.clone());
        let effects = state.click_hooks.remove(&element.id).unwrap_or_default();
        for effect in effects {
            match effect {
                ClickEffect::Place(locator, placed) => {
                    place_locked(&mut state, &locator, placed);
                }
                ClickEffect::Clear(locator) => clear_locked(&mut state, &locator),
            }
        }
        Ok(())
    }

    async fn hover(&self, element: &Element) -> Result<()> {
        self.element(element)?;
        self.state.lock().hovers.push(element.id.clone());
        Ok(())
    }

    async fn set_value(&self, element: &Element, value: &str) -> Result<()> {
        self.take_stale(element)?;
        self.state
            .lock()
            .values
            .insert(element.id.clone(), value.to_string());
        Ok(())
    }

    async fn send_keys(&self, element: &Element, text: &str) -> Result<()> {
        self.take_stale(element)?;
        self.state
            .lock()
            .typed
            .entry(element.id.clone())
            .or_default()
            .push_str(text);
        Ok(())
    }

    async fn press_key(&self, element: &Element, key: Key) -> Result<()> {
        self.element(element)?;
        self.state.lock().keys.push((element.id.clone(), key));
        Ok(())
    }

    async fn remove(&self, element: &Element) -> Result<()> {
        let mut state = self.state.lock();
        if state.elements.remove(&element.id).is_none() {
            return Err(Error::StaleElement(element.id.clone()));
        }
        for ids in state.placements.values_mut() {
            ids.retain(|id| id != &element.id);
        }
        Ok(())
    }

    async fn network_log(&self) -> Result<Vec<NetworkEntry>> {
        Ok(self.state.lock().network.clone())
    }

    async fn response_body(&self, request_id: &str) -> Result<Vec<u8>> {
        self.state
            .lock()
            .bodies
            .get(request_id)
            .cloned()
            .ok_or_else(|| Error::Browser(format!("no body for {request_id}")))
    }

    async fn set_cookie(&self, cookie: &Cookie) -> Result<()> {
        self.state.lock().cookies.push(cookie.clone());
        Ok(())
    }

    async fn delete_cookie(&self, name: &str, url: &str) -> Result<()> {
        self.state
            .lock()
            .deleted_cookies
            .push((name.to_string(), url.to_string()));
        Ok(())
    }

    async fn block_urls(&self, patterns: &[String]) -> Result<()> {
        self.state.lock().blocked.extend(patterns.iter().cloned());
        Ok(())
    }

    async fn open_tab(&self) -> Result<TabId> {
        let mut state = self.state.lock();
        state.tab_counter += 1;
        let tab = TabId(format!("tab-{}", state.tab_counter));
        state.tab_urls.insert(tab.clone(), "about:blank".into());
        state.current = Some(tab.clone());
        Ok(tab)
    }

    async fn close_tab(&self, tab: &TabId) -> Result<()> {
        let mut state = self.state.lock();
        if state.tab_urls.remove(tab).is_none() {
            return Err(Error::Browser(format!("unknown tab {tab}")));
        }
        if state.current.as_ref() == Some(tab) {
            state.current = None;
        }
        Ok(())
    }

    async fn switch_tab(&self, tab: &TabId) -> Result<()> {
        let mut state = self.state.lock();
        if !state.tab_urls.contains_key(tab) {
            return Err(Error::Browser(format!("unknown tab {tab}")));
        }
        state.current = Some(tab.clone());
        Ok(())
    }

    async fn current_tab(&self) -> Result<TabId> {
        self.state
            .lock()
            .current
            .clone()
            .ok_or_else(|| Error::Browser("no current tab".into()))
    }

    async fn quit(&self) -> Result<()> {
        self.state.lock().quits += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------

pub const TOKEN: &str = "token-1";
pub const CONVERSATION_ID: &str = "7f3c2a10-conv";
pub const ANSWER_HTML: &str = "<p>Hello <strong>there</strong></p>";

pub fn session_payload(name: &str) -> Value {
    json!({
        "user": {
            "id": "user-1",
            "name": name,
            "email": "user@example.com",
            "mfa": false,
            "groups": []
        },
        "expires": "2026-11-18T10:00:00.000Z",
        "accessToken": "access-1",
        "authProvider": "auth0"
    })
}

pub fn test_config() -> SessionConfig {
    SessionConfig::with_token(TOKEN)
}

/// A browser showing a logged-in chat page with one answer on it.
pub fn chat_site(catalogue: &Catalogue) -> Arc<FakeBrowser> {
    let fake = Arc::new(FakeBrowser::default());
    let selectors = &catalogue.selectors;
    let urls = &catalogue.urls;

    fake.set_page(&urls.auth_session, &session_payload("Test User").to_string());
    fake.place(&selectors.body, FakeElement::new(""));
    fake.place(&selectors.textbox, FakeElement::new(""));
    fake.place(&selectors.new_chat, FakeElement::new("New chat"));
    fake.place(
        &selectors.small_response,
        FakeElement::new("Hello there").with_html(ANSWER_HTML),
    );
    fake.add_json_response(
        "1000.1",
        "https://chat.openai.com/backend-api/conversations?offset=0&limit=28",
        json!({
            "items": [{"id": CONVERSATION_ID, "title": "Greeting"}],
            "total": 1,
            "limit": 28,
            "offset": 0,
            "has_missing_conversations": false
        }),
    );
    fake
}

pub async fn start(fake: &Arc<FakeBrowser>, config: SessionConfig) -> Result<ChatSession> {
    ChatSession::start(fake.clone(), config, Catalogue::default()).await
}
