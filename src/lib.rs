//! index-rss-watcher: alerts on new index-change announcements.
//!
//! ## Architecture overview
//!
//! ```text
//! ┌───────────┐ FetchResult ┌───────────┐ matches() ┌───────────┐
//! │ source/   │ ──────────► │ watch.rs  │ ────────► │ filter.rs │
//! │ (HTTP)    │             │ (loop)    │           └───────────┘
//! └───────────┘             │           │ has_seen / record_seen
//!                           │           │ ────────► ┌───────────┐
//!                           │           │           │ store.rs  │
//!                           │           │ notify()  └───────────┘
//!                           │           │ ────────► ┌───────────┐
//!                           └───────────┘           │ notify/   │
//!                                                   └───────────┘
//! ```
//!
//! * **`source/`**: the `FeedSource` trait, the `Entry` type, RSS parsing,
//!   and the conditional-GET fetcher with URL fallback.
//! * **`filter`**: the case-insensitive keyword / layered pattern predicate.
//! * **`store`**: the SQLite-backed set of entry ids already handled.
//! * **`notify`**: SMS / voice formatting and the messaging providers.
//! * **`watch`**: the polling loop, backoff and delivery policy.
//! * **`config`**, **`logging`**, **`error`**: startup plumbing.

pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod notify;
pub mod source;
pub mod store;
pub mod watch;

pub use config::Config;
pub use error::{ConfigError, FailureKind, FetchFailure, NotifyError, StoreError};
pub use filter::{Filter, FilterConfig, FilterField, FilterMode};
pub use notify::{DeliveryMode, MessageProvider, Notifier, NotifyResult, NotifySettings};
pub use source::{Entry, FeedFetcher, FeedSource, FetchResult, FetchSettings};
pub use store::{SeenRecord, SeenStore};
pub use watch::{Backoff, DeliveryPolicy, WatchSettings, WatchState, Watcher};
