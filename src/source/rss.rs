//! RSS document parsing.
//!
//! Turns a raw response body into [`Entry`] values. This is pure (no I/O)
//! so tests can exercise it without a server.

use chrono::{DateTime, Utc};

use super::Entry;

/// Parse a response body as an RSS 2.0 channel.
pub fn parse_feed(body: &[u8]) -> Result<Vec<Entry>, rss::Error> {
    let channel = rss::Channel::read_from(body)?;
    Ok(parse_channel(&channel))
}

/// Convert an already-parsed [`rss::Channel`] into entries, in feed order.
pub fn parse_channel(channel: &rss::Channel) -> Vec<Entry> {
    channel
        .items()
        .iter()
        .map(|item| {
            let title = item.title().unwrap_or("(untitled)").to_string();
            let id = Entry::derive_id(item.guid().map(|g| g.value()), &title, item.link());

            // Parse RFC-2822 date; gracefully degrade to None on failure.
            let published = item
                .pub_date()
                .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
                .map(|dt| dt.with_timezone(&Utc));

            Entry {
                id,
                title,
                summary: item.description().map(String::from),
                content: item.content().map(String::from),
                link: item.link().map(String::from),
                published,
            }
        })
        .collect()
}
