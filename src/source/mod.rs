//! Feed source abstraction layer.
//!
//! This module defines the [`FeedSource`] trait the watch loop polls, the
//! [`FetchResult`] it returns, and the common [`Entry`] type. The HTTP
//! implementation lives in [`fetcher`]; RSS parsing lives in [`rss`].
//!
//! ## For contributors
//!
//! The watch loop only ever sees a `FeedSource`. Tests drive it with scripted
//! sources; production uses [`FeedFetcher`]. A source classifies its own
//! failures: it never returns `Err`, only a [`FetchResult::TransportError`].

mod entry;
pub mod fetcher;
pub mod rss;

pub use entry::Entry;
pub use fetcher::{FeedFetcher, FetchSettings, FetchState, ProbeReport};

#[cfg(test)]
pub(crate) use entry::tests::make_entry;

use async_trait::async_trait;

use crate::error::FetchFailure;

/// Outcome of one fetch of the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    /// The server reported no change since the last fetch.
    NotModified,
    /// A fresh document, parsed into entries in feed order.
    Entries {
        entries: Vec<Entry>,
        etag: Option<String>,
        last_modified: Option<String>,
    },
    /// Every candidate failed; carries the last failure seen.
    TransportError(FetchFailure),
}

impl FetchResult {
    /// Short name for log fields.
    pub fn label(&self) -> &'static str {
        match self {
            FetchResult::NotModified => "not-modified",
            FetchResult::Entries { .. } => "entries",
            FetchResult::TransportError(_) => "transport-error",
        }
    }
}

/// Something the watch loop can poll for entries.
///
/// The loop calls [`fetch()`](FeedSource::fetch) once per cycle and never
/// concurrently, so implementations may keep mutable caching state.
#[async_trait]
pub trait FeedSource: Send {
    /// Human-readable label used in log lines.
    fn name(&self) -> &str;

    /// Fetch the feed once.
    async fn fetch(&mut self) -> FetchResult;
}
