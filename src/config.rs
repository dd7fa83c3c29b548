//! Configuration.
//!
//! Everything is read once at startup into a [`Config`] that is handed to the
//! constructors of the fetcher, filter, store, notifier and watcher. Values
//! come from the process environment (after any `.env` file has been loaded
//! by `main`); every variable has a default except the provider credentials.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::filter::{FilterConfig, FilterField, FilterMode, DEFAULT_CHANGE_TERMS, DEFAULT_INDEX_TERMS};
use crate::notify::{DeliveryMode, NotifySettings, TWILIO_API_BASE};
use crate::source::FetchSettings;
use crate::watch::{DeliveryPolicy, WatchSettings};

/// S&P Dow Jones Indices announcement feed.
pub const DEFAULT_FEED_URL: &str =
    "https://www.spglobal.com/spdji/en/rss/rss-details/?rssFeedName=index-news-announcements";

#[derive(Debug, Clone)]
pub struct Config {
    pub feed_urls: Vec<String>,
    pub poll_interval: Duration,
    pub max_backoff: Duration,
    pub fetch_timeout: Duration,
    pub db_path: PathBuf,
    pub filter: FilterConfig,
    pub policy: DeliveryPolicy,
    pub notify: NotifySettings,
    pub log_level: String,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its
    /// value. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let feed_urls = match get("FEED_URLS").or_else(|| get("FEED_URL")) {
            Some(raw) => split_list(&raw),
            None => vec![DEFAULT_FEED_URL.to_string()],
        };
        if feed_urls.is_empty() {
            return Err(ConfigError::Missing("FEED_URLS"));
        }
        for url in &feed_urls {
            reqwest::Url::parse(url).map_err(|e| ConfigError::Invalid {
                key: "FEED_URLS",
                value: url.clone(),
                reason: e.to_string(),
            })?;
        }

        let poll_interval = seconds(get("POLL_INTERVAL_SEC"), "POLL_INTERVAL_SEC", 30)?;
        let max_backoff = seconds(get("MAX_BACKOFF_SEC"), "MAX_BACKOFF_SEC", 900)?;
        let fetch_timeout = seconds(get("FETCH_TIMEOUT_SEC"), "FETCH_TIMEOUT_SEC", 10)?;

        let mode = match get("FILTER_MODE").as_deref().map(str::trim) {
            None | Some("keyword") => {
                FilterMode::Keyword(get("FILTER_KEYWORD").unwrap_or_else(|| "replace".into()))
            }
            Some("layered") => FilterMode::Layered {
                change_terms: get("FILTER_CHANGE_TERMS")
                    .map(|raw| split_list(&raw))
                    .unwrap_or_else(|| to_strings(DEFAULT_CHANGE_TERMS)),
                index_terms: get("FILTER_INDEX_TERMS")
                    .map(|raw| split_list(&raw))
                    .unwrap_or_else(|| to_strings(DEFAULT_INDEX_TERMS)),
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "FILTER_MODE",
                    value: other.to_string(),
                    reason: "expected \"keyword\" or \"layered\"".into(),
                })
            }
        };

        let fields = match get("FILTER_FIELDS") {
            None => FilterConfig::default().fields,
            Some(raw) => split_list(&raw)
                .iter()
                .map(|name| {
                    FilterField::parse(name).ok_or_else(|| ConfigError::Invalid {
                        key: "FILTER_FIELDS",
                        value: name.clone(),
                        reason: "expected title, summary or content".into(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        let policy = match get("DELIVERY_POLICY").as_deref().map(str::trim) {
            None | Some("at-most-once") => DeliveryPolicy::AtMostOnce,
            Some("at-least-once") => DeliveryPolicy::AtLeastOnce,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "DELIVERY_POLICY",
                    value: other.to_string(),
                    reason: "expected \"at-most-once\" or \"at-least-once\"".into(),
                })
            }
        };

        let mode_flag = flag(get("USE_VOICE"), "USE_VOICE")?;
        let notify = NotifySettings {
            mode: if mode_flag {
                DeliveryMode::Voice
            } else {
                DeliveryMode::Text
            },
            account_sid: get("TWILIO_SID"),
            auth_token: get("TWILIO_TOKEN"),
            from: get("TWILIO_FROM"),
            to: get("TWILIO_TO"),
            api_base: get("TWILIO_API_BASE").unwrap_or_else(|| TWILIO_API_BASE.to_string()),
            dry_run: flag(get("NOTIFY_DRY_RUN"), "NOTIFY_DRY_RUN")?,
            sms_max_chars: count(get("SMS_MAX_CHARS"), "SMS_MAX_CHARS", 320)?,
            voice_max_chars: count(get("VOICE_MAX_CHARS"), "VOICE_MAX_CHARS", 200)?,
        };

        Ok(Self {
            feed_urls,
            poll_interval,
            max_backoff,
            fetch_timeout,
            db_path: get("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./rss_state.db")),
            filter: FilterConfig { mode, fields },
            policy,
            notify,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".into()),
        })
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            request_timeout: self.fetch_timeout,
            ..FetchSettings::new(self.feed_urls.clone())
        }
    }

    pub fn watch_settings(&self) -> WatchSettings {
        WatchSettings {
            base_interval: self.poll_interval,
            max_backoff: self.max_backoff,
            policy: self.policy,
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn to_strings(terms: &[&str]) -> Vec<String> {
    terms.iter().map(|s| s.to_string()).collect()
}

fn number(value: Option<String>, key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            value: raw,
            reason: "expected a non-negative whole number".into(),
        }),
    }
}

fn seconds(value: Option<String>, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match number(value, key, default)? {
        0 => Err(ConfigError::Invalid {
            key,
            value: "0".into(),
            reason: "must be at least one second".into(),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn count(value: Option<String>, key: &'static str, default: usize) -> Result<usize, ConfigError> {
    match number(value, key, default as u64)? {
        0 => Err(ConfigError::Invalid {
            key,
            value: "0".into(),
            reason: "must be positive".into(),
        }),
        n => Ok(n as usize),
    }
}

fn flag(value: Option<String>, key: &'static str) -> Result<bool, ConfigError> {
    match value.as_deref().map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("0") | Some("false") | Some("no") => Ok(false),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some(other) => Err(ConfigError::Invalid {
            key,
            value: other.to_string(),
            reason: "expected 0 or 1".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = load(&[]).unwrap();
        assert_eq!(config.feed_urls, vec![DEFAULT_FEED_URL.to_string()]);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
        assert_eq!(config.db_path, PathBuf::from("./rss_state.db"));
        assert_eq!(config.filter, FilterConfig::default());
        assert_eq!(config.policy, DeliveryPolicy::AtMostOnce);
        assert_eq!(config.notify.mode, DeliveryMode::Text);
        assert!(config.notify.account_sid.is_none());
        assert!(!config.notify.dry_run);
    }

    #[test]
    fn candidate_urls_keep_their_order() {
        let config = load(&[(
            "FEED_URLS",
            "https://a.example/feed, https://b.example/feed,,",
        )])
        .unwrap();
        assert_eq!(
            config.feed_urls,
            vec!["https://a.example/feed", "https://b.example/feed"]
        );
    }

    #[test]
    fn layered_mode_and_voice_channel() {
        let config = load(&[
            ("FILTER_MODE", "layered"),
            ("FILTER_INDEX_TERMS", "Russell 2000"),
            ("FILTER_FIELDS", "title,description"),
            ("USE_VOICE", "1"),
            ("DELIVERY_POLICY", "at-least-once"),
            ("TWILIO_SID", "AC123"),
        ])
        .unwrap();

        match &config.filter.mode {
            FilterMode::Layered {
                change_terms,
                index_terms,
            } => {
                assert_eq!(change_terms, &to_strings(DEFAULT_CHANGE_TERMS));
                assert_eq!(index_terms, &vec!["Russell 2000".to_string()]);
            }
            other => panic!("unexpected mode {other:?}"),
        }
        assert_eq!(
            config.filter.fields,
            vec![FilterField::Title, FilterField::Summary]
        );
        assert_eq!(config.notify.mode, DeliveryMode::Voice);
        assert_eq!(config.notify.account_sid.as_deref(), Some("AC123"));
        assert_eq!(config.policy, DeliveryPolicy::AtLeastOnce);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = load(&[("TWILIO_TOKEN", "  "), ("POLL_INTERVAL_SEC", "")]).unwrap();
        assert!(config.notify.auth_token.is_none());
        assert_eq!(config.poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            load(&[("POLL_INTERVAL_SEC", "soon")]),
            Err(ConfigError::Invalid { key: "POLL_INTERVAL_SEC", .. })
        ));
        assert!(matches!(
            load(&[("POLL_INTERVAL_SEC", "0")]),
            Err(ConfigError::Invalid { key: "POLL_INTERVAL_SEC", .. })
        ));
        assert!(matches!(
            load(&[("FILTER_MODE", "fuzzy")]),
            Err(ConfigError::Invalid { key: "FILTER_MODE", .. })
        ));
        assert!(matches!(
            load(&[("USE_VOICE", "maybe")]),
            Err(ConfigError::Invalid { key: "USE_VOICE", .. })
        ));
        assert!(matches!(
            load(&[("FEED_URL", "not a url")]),
            Err(ConfigError::Invalid { key: "FEED_URLS", .. })
        ));
        assert!(matches!(
            load(&[("FEED_URLS", " , ")]),
            Err(ConfigError::Missing("FEED_URLS"))
        ));
    }

    #[test]
    fn settings_views() {
        let config = load(&[("FETCH_TIMEOUT_SEC", "3"), ("MAX_BACKOFF_SEC", "120")]).unwrap();
        let fetch = config.fetch_settings();
        assert_eq!(fetch.request_timeout, Duration::from_secs(3));
        assert_eq!(fetch.candidates, config.feed_urls);

        let watch = config.watch_settings();
        assert_eq!(watch.max_backoff, Duration::from_secs(120));
        assert_eq!(watch.base_interval, Duration::from_secs(30));
    }
}
