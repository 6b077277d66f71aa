//! Browser handle: Chrome lifecycle, DevTools protocol, element waits and network log.
//!
//! The session layer only talks to [`BrowserHandle`]; [`ChromeBrowser`] is the
//! concrete implementation driving a local Chrome over CDP.

pub mod cdp;
pub mod chrome;
pub mod config;
pub mod devtools;
pub mod handle;
pub mod network;
pub mod scripts;

pub use chrome::{ChromeProcess, VirtualDisplay};
pub use config::LaunchOptions;
pub use devtools::ChromeBrowser;
pub use handle::{BrowserHandle, Element, Key, TabId, POLL_INTERVAL};
pub use network::{find_latest_json_response, NetworkEntry, ResponseMeta};
