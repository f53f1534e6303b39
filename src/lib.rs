//! # red-international
//!
//! Config-driven feature flags for web pages. A small JSON document maps
//! service names to an enabled state; the controller shows or hides every
//! element tagged with those services and keeps doing so as new elements
//! are added to the page.
//!
//! ## Features
//!
//! - Strictly validated flag sets (`{"service": bool, ...}`)
//! - Local override cache (in-memory or redb) that wins over the endpoint
//! - Single-attempt remote fetch with fail-open defaults
//! - Three targeting conventions: `data-red-service="x"`, `id="red-x"`,
//!   `class="red-x"`
//! - Debounced reapplication when flagged elements appear
//! - Bundled HTML page host built on `scraper`
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use red_international::{HtmlPage, VisibilityController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let page = Arc::new(HtmlPage::parse(r#"<div id="red-chat">Live chat</div>"#));
//!     let controller = VisibilityController::new(page.clone())?;
//!     controller.initialize().await;
//!
//!     if controller.is_active("chat") {
//!         println!("chat enabled");
//!     }
//!     println!("{}", page.to_html());
//!     controller.shutdown().await;
//!     Ok(())
//! }
//! ```

mod controller;

pub mod events;
pub mod flags;
pub mod loader;
pub mod page;
pub mod storage;
pub mod visibility;

pub use crate::controller::{
    ControllerBuilder,
    ControllerConfig,
    ControllerError,
    ControllerResult,
    DEFAULT_DEBOUNCE_MS,
    DEFAULT_ENDPOINT,
    DEFAULT_STORAGE_KEY,
    VisibilityController,
};

pub use crate::events::{
    ConfigAppliedEvent,
    ConfigLoadedEvent,
    ControllerEvent,
    EventDispatcher,
    EventHandler,
    LoadFailedEvent,
    LoadStage,
    LoggingHandler,
    ReapplyScheduledEvent,
};

pub use crate::flags::{FlagSet, FlagSetError};

pub use crate::loader::{
    CacheMiss,
    ConfigSource,
    FetchError,
    LoadOutcome,
    ReqwestConfigSource,
};

pub use crate::page::{
    AddedElement,
    ElementSnapshot,
    ElementTree,
    HtmlPage,
    MutationCallback,
    MutationFeed,
    NodeId,
    Page,
    PageError,
    SubscriptionId,
};

pub use crate::storage::{CacheError, FlagCache, MemoryFlagCache, RedbFlagCache};

pub use crate::visibility::{ApplyReport, ChangeWatcher, apply_flags};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
