//! Chat session automation on top of a [`gptdrive_browser::BrowserHandle`].
//!
//! [`ChatSession`] owns the browser, clears the anti-bot challenge, keeps the
//! login warm in the background and runs one request/response exchange at a
//! time through the [`exchange`] state machine.

pub mod challenge;
pub mod exchange;
pub mod keepalive;
pub mod markup;
pub mod menu;
pub mod session;

pub use challenge::ChallengeResolver;
pub use exchange::{ExchangeState, MessageOptions, RegenerateOptions};
pub use keepalive::KeepAlive;
pub use markup::{MarkdownConverter, MarkupConverter};
pub use session::ChatSession;
