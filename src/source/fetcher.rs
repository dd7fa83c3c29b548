//! Conditional HTTP fetching of the watched feed.
//!
//! One [`FeedFetcher`] owns one pooled `reqwest::Client` for the lifetime of
//! the process and tries each candidate URL in order until one of them gives
//! a usable answer. Caching validators are kept per URL: they are only ever
//! sent back to the URL that issued them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::rss::parse_feed;
use super::{Entry, FeedSource, FetchResult};
use crate::error::{FailureKind, FetchFailure};

/// User agent sent with every feed request.
pub const USER_AGENT: &str = concat!("index-rss-watcher/", env!("CARGO_PKG_VERSION"));

/// Connection settings for the feed client.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Candidate feed URLs, highest priority first.
    pub candidates: Vec<String>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl FetchSettings {
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Caching state carried between ticks. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchState {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// The URL that produced `etag`, `last_modified` and `body_digest`.
    pub validator_url: Option<String>,
    /// SHA-256 of the last body parsed from `validator_url`.
    pub body_digest: Option<String>,
}

impl FetchState {
    fn validators_for(&self, url: &str) -> Option<(Option<&str>, Option<&str>)> {
        (self.validator_url.as_deref() == Some(url))
            .then(|| (self.etag.as_deref(), self.last_modified.as_deref()))
    }
}

/// Reachability of one candidate, as reported by [`FeedFetcher::probe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub url: String,
    pub outcome: Result<usize, FetchFailure>,
}

/// Outcome of a single candidate attempt inside one tick.
enum Attempt {
    Done(FetchResult),
    NotFound,
    Failed(FetchFailure),
}

/// A classified HTTP answer, before any caching decision.
enum Response {
    NotModified,
    NotFound,
    Body {
        body: Vec<u8>,
        etag: Option<String>,
        last_modified: Option<String>,
    },
}

fn status_failure(url: &str, status: StatusCode) -> FetchFailure {
    FetchFailure::new(url, FailureKind::HttpStatus(status.as_u16()), status.to_string())
}

fn parse(url: &str, body: &[u8]) -> Result<Vec<Entry>, FetchFailure> {
    parse_feed(body).map_err(|err| FetchFailure::new(url, FailureKind::Parse, err.to_string()))
}

/// Fetches the feed over HTTP with conditional requests and URL fallback.
pub struct FeedFetcher {
    client: Client,
    candidates: Vec<String>,
    state: FetchState,
}

impl FeedFetcher {
    pub fn new(settings: FetchSettings) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.request_timeout)
            .connect_timeout(settings.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            candidates: settings.candidates,
            state: FetchState::default(),
        })
    }

    /// Current caching state.
    pub fn state(&self) -> &FetchState {
        &self.state
    }

    /// Unconditionally GET every candidate and report whether it yields a
    /// parseable feed. Does not touch the caching state.
    pub async fn probe(&self) -> Vec<ProbeReport> {
        let mut reports = Vec::with_capacity(self.candidates.len());
        for url in &self.candidates {
            let outcome = match self.request(url, None).await {
                Ok(Response::Body { body, .. }) => parse(url, &body).map(|entries| entries.len()),
                Ok(Response::NotFound) => Err(status_failure(url, StatusCode::NOT_FOUND)),
                Ok(Response::NotModified) => Err(status_failure(url, StatusCode::NOT_MODIFIED)),
                Err(failure) => Err(failure),
            };
            reports.push(ProbeReport {
                url: url.clone(),
                outcome,
            });
        }
        reports
    }

    /// GET `url`, sending `validators` when given, and classify the answer.
    async fn request(
        &self,
        url: &str,
        validators: Option<(Option<&str>, Option<&str>)>,
    ) -> Result<Response, FetchFailure> {
        let mut request = self.client.get(url);
        if let Some((etag, last_modified)) = validators {
            if let Some(etag) = etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = last_modified {
                request = request.header(IF_MODIFIED_SINCE, last_modified);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|err| FetchFailure::from_reqwest(url, &err))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(Response::NotModified);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(Response::NotFound);
        }
        if !status.is_success() {
            return Err(status_failure(url, status));
        }

        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        let etag = header(ETAG);
        let last_modified = header(LAST_MODIFIED);

        let body = response
            .bytes()
            .await
            .map_err(|err| FetchFailure::from_reqwest(url, &err))?;

        Ok(Response::Body {
            body: body.to_vec(),
            etag,
            last_modified,
        })
    }

    async fn attempt(&mut self, url: &str) -> Attempt {
        let response = self.request(url, self.state.validators_for(url)).await;
        let (body, etag, last_modified) = match response {
            Ok(Response::NotModified) => return Attempt::Done(FetchResult::NotModified),
            Ok(Response::NotFound) => return Attempt::NotFound,
            Ok(Response::Body {
                body,
                etag,
                last_modified,
            }) => (body, etag, last_modified),
            Err(failure) => return Attempt::Failed(failure),
        };
        let digest = hex::encode(Sha256::digest(&body));

        let same_url = self.state.validator_url.as_deref() == Some(url);
        if same_url && self.state.body_digest.as_deref() == Some(digest.as_str()) {
            // Server ignored the validators but sent the same document.
            self.state.etag = etag.or(self.state.etag.take());
            self.state.last_modified = last_modified.or(self.state.last_modified.take());
            return Attempt::Done(FetchResult::NotModified);
        }

        let entries = match parse(url, &body) {
            Ok(entries) => entries,
            Err(failure) => return Attempt::Failed(failure),
        };

        // Validators from a different URL are meaningless here; only keep
        // old ones when the same resource simply omitted a header.
        let (old_etag, old_modified) = if same_url {
            (self.state.etag.take(), self.state.last_modified.take())
        } else {
            (None, None)
        };
        self.state = FetchState {
            etag: etag.or(old_etag),
            last_modified: last_modified.or(old_modified),
            validator_url: Some(url.to_string()),
            body_digest: Some(digest),
        };

        Attempt::Done(FetchResult::Entries {
            entries,
            etag: self.state.etag.clone(),
            last_modified: self.state.last_modified.clone(),
        })
    }
}

#[async_trait]
impl FeedSource for FeedFetcher {
    fn name(&self) -> &str {
        self.candidates.first().map(String::as_str).unwrap_or("(no feed)")
    }

    async fn fetch(&mut self) -> FetchResult {
        let mut last_failure = None;
        let mut saw_not_found = false;

        for url in self.candidates.clone() {
            match self.attempt(&url).await {
                Attempt::Done(result) => {
                    debug!(url = %url, outcome = result.label(), "feed fetched");
                    return result;
                }
                Attempt::NotFound => {
                    debug!(url = %url, "feed candidate returned 404, trying next");
                    saw_not_found = true;
                }
                Attempt::Failed(failure) => {
                    warn!(url = %url, class = %failure.kind, error = %failure.message, "feed candidate failed");
                    last_failure = Some(failure);
                }
            }
        }

        match last_failure {
            Some(failure) => FetchResult::TransportError(failure),
            None if saw_not_found => FetchResult::Entries {
                entries: Vec::new(),
                etag: None,
                last_modified: None,
            },
            None => FetchResult::TransportError(FetchFailure::new(
                "",
                FailureKind::Network,
                "no candidate feed URLs configured",
            )),
        }
    }
}
