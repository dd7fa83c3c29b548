//! The feed entry type the rest of the watcher operates on.
//!
//! `Entry` is what the fetcher hands to the filter, the dedup store and the
//! notifier. It is built once from a parsed RSS item and never mutated.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// A single feed item, normalised from the RSS document.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Entry {
    /// Stable identifier used for de-duplication.
    ///
    /// The `<guid>` element when present, else `<link>`, else a SHA-256
    /// digest of title and link (see [`Entry::derive_id`]).
    pub id: String,

    /// Human-readable headline.
    pub title: String,

    /// The item's `<description>`, usually a short summary.
    pub summary: Option<String>,

    /// The item's `content:encoded` body, when the feed carries one.
    pub content: Option<String>,

    /// URL to the full announcement.
    pub link: Option<String>,

    /// Publication timestamp. `None` when absent or unparseable.
    pub published: Option<DateTime<Utc>>,
}

impl Entry {
    /// Pick the identifier for an item.
    ///
    /// Empty or whitespace-only GUIDs and links are treated as absent so that
    /// two different items can never collapse onto an empty id.
    pub fn derive_id(guid: Option<&str>, title: &str, link: Option<&str>) -> String {
        let non_blank = |s: &&str| !s.trim().is_empty();

        if let Some(guid) = guid.filter(non_blank) {
            return guid.trim().to_string();
        }
        if let Some(link) = link.filter(non_blank) {
            return link.trim().to_string();
        }

        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        hasher.update(b"\n");
        hasher.update(link.unwrap_or_default().as_bytes());
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }
}
