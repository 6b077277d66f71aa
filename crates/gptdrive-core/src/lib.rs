//! gptdrive core: error taxonomy, configuration, value objects and the
//! element locator catalogue shared by the browser and session crates.

pub mod config;
pub mod error;
pub mod locators;
pub mod types;

pub use config::{SessionConfig, Timeouts};
pub use error::{Error, Result};
pub use locators::{Catalogue, Locator, Selectors, Strategy, Urls};
pub use types::*;
