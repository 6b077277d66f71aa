//! JavaScript snippets evaluated in the page.
//!
//! Locators are resolved in the page itself so every strategy goes through
//! one code path. Element functions run with the element bound to `this` and
//! throw [`STALE_MARKER`] once the element has left the document.

use gptdrive_core::Locator;
use serde_json::Value;

pub const STALE_MARKER: &str = "__gptdrive_stale__";

const RESOLVE_FN: &str = r#"function(strategy, selector) {
  switch (strategy) {
    case 'css':
      return Array.from(document.querySelectorAll(selector));
    case 'id': {
      const el = document.getElementById(selector);
      return el ? [el] : [];
    }
    case 'tag_name':
      return Array.from(document.getElementsByTagName(selector));
    case 'link_text':
      return Array.from(document.querySelectorAll('a'))
        .filter((a) => (a.innerText || '').trim() === selector);
    case 'xpath': {
      const snap = document.evaluate(selector, document, null,
        XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
      const out = [];
      for (let i = 0; i < snap.snapshotLength; i++) out.push(snap.snapshotItem(i));
      return out;
    }
  }
  return [];
}"#;

fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn resolve_call(locator: &Locator) -> String {
    format!(
        "({})({}, {})",
        RESOLVE_FN,
        js_string(locator.strategy.as_str()),
        js_string(&locator.selector)
    )
}

/// Expression evaluating to every element matching `locator`, in document order.
pub fn find_all_expression(locator: &Locator) -> String {
    resolve_call(locator)
}

/// Expression evaluating to the first match or `null`.
pub fn find_one_expression(locator: &Locator) -> String {
    format!("({})[0] || null", resolve_call(locator))
}

/// Expression evaluating to the number of matches.
pub fn count_expression(locator: &Locator) -> String {
    format!("({}).length", resolve_call(locator))
}

/// Wrap a function body so it sees `args` as `arguments`.
pub fn wrap_script(body: &str, args: &[Value]) -> String {
    let args = Value::Array(args.to_vec()).to_string();
    format!("(function() {{\n{body}\n}}).apply(null, {args})")
}

fn element_fn(body: &str) -> String {
    format!(
        "function() {{ if (!this.isConnected) throw new Error('{STALE_MARKER}'); {body} }}"
    )
}

pub fn text_fn() -> String {
    element_fn("return this.innerText === undefined ? this.textContent : this.innerText;")
}

pub fn inner_html_fn() -> String {
    element_fn("return this.innerHTML;")
}

pub fn attribute_fn() -> String {
    element_fn("return this.getAttribute(arguments[0]);")
}

/// Rendered with a non-empty box and not disabled.
pub fn is_clickable_fn() -> String {
    element_fn(
        "const r = this.getBoundingClientRect(); \
         const style = window.getComputedStyle(this); \
         return r.width > 0 && r.height > 0 && style.visibility !== 'hidden' \
           && style.display !== 'none' && !this.disabled \
           && this.getAttribute('aria-disabled') !== 'true';",
    )
}

/// Scroll into view and report the element's center in viewport coordinates.
pub fn center_fn() -> String {
    element_fn(
        "this.scrollIntoView({block: 'center', inline: 'center'}); \
         const r = this.getBoundingClientRect(); \
         return {x: r.left + r.width / 2, y: r.top + r.height / 2};",
    )
}

pub fn focus_fn() -> String {
    element_fn("this.focus(); return true;")
}

/// Assign through the native value setter and fire `input`, so framework
/// managed inputs pick up the change.
pub fn set_value_fn() -> String {
    element_fn(
        "const proto = this instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype \
           : this instanceof HTMLInputElement ? HTMLInputElement.prototype : null; \
         const desc = proto ? Object.getOwnPropertyDescriptor(proto, 'value') : null; \
         if (desc && desc.set) { desc.set.call(this, arguments[0]); } \
         else if (this.isContentEditable) { this.innerText = arguments[0]; } \
         else { this.value = arguments[0]; } \
         this.dispatchEvent(new Event('input', {bubbles: true})); \
         return true;",
    )
}

pub fn remove_fn() -> String {
    element_fn("this.remove(); return true;")
}

pub const READY_STATE: &str = "document.readyState";
pub const CURRENT_URL: &str = "window.location.href";
pub const PAGE_SOURCE: &str = "document.documentElement ? document.documentElement.outerHTML : ''";

/// Whether a JS exception text means the element is gone.
pub fn is_stale_exception(message: &str) -> bool {
    message.contains(STALE_MARKER)
}
