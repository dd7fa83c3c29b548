//! Alert delivery.
//!
//! [`Notifier`] turns an [`Entry`] into an SMS body or a spoken message and
//! hands it to a [`MessageProvider`]. It makes exactly one provider call per
//! entry and never retries: whatever happens is reported as a
//! [`NotifyResult`] and the watch loop carries on.
//!
//! The provider is built lazily on the first alert, so a process started
//! without credentials keeps polling and reports
//! [`NotifyError::MissingCredentials`] for every alert instead of failing at
//! startup.

mod twilio;

pub use twilio::{twiml_say, TwilioProvider, TWILIO_API_BASE};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::NotifyError;
use crate::source::Entry;

/// Below this many characters of room a summary line is left out.
const MIN_SUMMARY_CHARS: usize = 20;

/// Channel used for alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Short text message.
    Text,
    /// Phone call reading the alert aloud.
    Voice,
}

/// Outcome of a single alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyResult {
    /// Accepted by the provider, with its reference id.
    Sent(String),
    Failed(NotifyError),
}

impl NotifyResult {
    pub fn is_sent(&self) -> bool {
        matches!(self, NotifyResult::Sent(_))
    }
}

/// The outbound messaging API.
#[async_trait]
pub trait MessageProvider: Send + Sync {
    /// Send `body` as a text message; returns the provider's reference id.
    async fn send_text(&self, to: &str, body: &str) -> Result<String, NotifyError>;

    /// Call `to` and speak `spoken`; returns the provider's reference id.
    async fn place_call(&self, to: &str, spoken: &str) -> Result<String, NotifyError>;
}

/// Logs alerts instead of sending them.
#[derive(Debug, Default)]
pub struct DryRunProvider {
    sent: AtomicU64,
}

#[async_trait]
impl MessageProvider for DryRunProvider {
    async fn send_text(&self, to: &str, body: &str) -> Result<String, NotifyError> {
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        info!(to, body, "dry run: text message not sent");
        Ok(format!("dry-run-{n}"))
    }

    async fn place_call(&self, to: &str, spoken: &str) -> Result<String, NotifyError> {
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        info!(to, spoken, "dry run: voice call not placed");
        Ok(format!("dry-run-{n}"))
    }
}

/// Notification settings as read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifySettings {
    pub mode: DeliveryMode,
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub api_base: String,
    pub dry_run: bool,
    pub sms_max_chars: usize,
    pub voice_max_chars: usize,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Text,
            account_sid: None,
            auth_token: None,
            from: None,
            to: None,
            api_base: TWILIO_API_BASE.to_string(),
            dry_run: false,
            sms_max_chars: 320,
            voice_max_chars: 200,
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub struct Notifier {
    settings: NotifySettings,
    provider: OnceCell<Arc<dyn MessageProvider>>,
}

impl Notifier {
    /// A notifier whose provider is built from `settings` on first use.
    pub fn new(settings: NotifySettings) -> Self {
        Self {
            settings,
            provider: OnceCell::new(),
        }
    }

    /// A notifier using an already-constructed provider.
    pub fn with_provider(settings: NotifySettings, provider: Arc<dyn MessageProvider>) -> Self {
        Self {
            settings,
            provider: OnceCell::new_with(Some(provider)),
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.settings.mode
    }

    /// Check that a provider can be built, without sending anything.
    pub async fn check_credentials(&self) -> Result<(), NotifyError> {
        self.provider().await.map(|_| ())
    }

    async fn provider(&self) -> Result<&Arc<dyn MessageProvider>, NotifyError> {
        // A failed build is not cached; credentials are re-checked next time.
        self.provider
            .get_or_try_init(|| async { self.build_provider() })
            .await
    }

    fn build_provider(&self) -> Result<Arc<dyn MessageProvider>, NotifyError> {
        if self.settings.dry_run {
            return Ok(Arc::new(DryRunProvider::default()));
        }

        let s = &self.settings;
        let required = [
            ("TWILIO_SID", present(&s.account_sid)),
            ("TWILIO_TOKEN", present(&s.auth_token)),
            ("TWILIO_FROM", present(&s.from)),
            ("TWILIO_TO", present(&s.to)),
        ];
        let missing: Vec<&'static str> = required
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| *name)
            .collect();

        match required {
            [(_, Some(sid)), (_, Some(token)), (_, Some(from)), (_, Some(_))] => {
                let provider = TwilioProvider::new(&s.api_base, sid, token, from)?;
                Ok(Arc::new(provider))
            }
            _ => Err(NotifyError::MissingCredentials(missing)),
        }
    }

    /// Send one alert for `entry`.
    pub async fn notify(&self, entry: &Entry) -> NotifyResult {
        let provider = match self.provider().await {
            Ok(provider) => provider,
            Err(err) => {
                warn!(entry = %entry.id, error = %err, "notification skipped");
                return NotifyResult::Failed(err);
            }
        };
        let to = present(&self.settings.to).unwrap_or("(dry run)");

        let outcome = match self.settings.mode {
            DeliveryMode::Text => {
                let body = format_text(entry, self.settings.sms_max_chars);
                provider.send_text(to, &body).await
            }
            DeliveryMode::Voice => {
                let spoken = format_spoken(entry, self.settings.voice_max_chars);
                provider.place_call(to, &spoken).await
            }
        };

        match outcome {
            Ok(reference) => {
                info!(entry = %entry.id, title = %entry.title, reference = %reference, "notified");
                NotifyResult::Sent(reference)
            }
            Err(err) => {
                warn!(entry = %entry.id, error = %err, "notification failed");
                NotifyResult::Failed(err)
            }
        }
    }
}

/// SMS body for an entry, at most `max_chars` characters.
///
/// The summary line is shortened first so the link survives truncation.
pub fn format_text(entry: &Entry, max_chars: usize) -> String {
    let published = entry
        .published
        .map(|d| d.to_rfc2822())
        .unwrap_or_else(|| "unknown".into());
    let head = format!(
        "🚨 Index Change Alert\nTitle: {}\nPublished: {}",
        entry.title.trim(),
        published
    );
    let link = format!("\nLink: {}", entry.link.as_deref().unwrap_or("-"));

    let summary = entry
        .summary
        .as_deref()
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty());
    let summary_line = summary.and_then(|summary| {
        let label = "\nSummary: ";
        let used = head.chars().count() + link.chars().count() + label.chars().count();
        let budget = max_chars.saturating_sub(used);
        (budget >= MIN_SUMMARY_CHARS).then(|| format!("{label}{}", truncate_chars(&summary, budget)))
    });

    let text = format!("{head}{}{link}", summary_line.unwrap_or_default());
    truncate_chars(&text, max_chars)
}

/// Speech-safe message for an entry, at most `max_chars` characters.
///
/// Symbols a speech engine would spell out or skip are replaced or dropped,
/// and the text is cut at a word boundary.
pub fn format_spoken(entry: &Entry, max_chars: usize) -> String {
    let title = sanitize_for_speech(&entry.title);
    let title = title.trim_end_matches(['.', ',', ';', ':', '-']);
    let text = format!("Index change alert. {title}.");
    if text.chars().count() <= max_chars {
        return text;
    }

    let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    let cut = match cut.rfind(' ') {
        Some(pos) if pos > 0 => &cut[..pos],
        _ => cut.as_str(),
    };
    format!("{}.", cut.trim_end_matches(['.', ',', ';', ':', '-', ' ']))
}

fn sanitize_for_speech(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str(" and "),
            '%' => out.push_str(" percent "),
            c if c.is_alphanumeric() || c.is_whitespace() => out.push(c),
            '.' | ',' | ';' | ':' | '?' | '!' | '\'' | '-' => out.push(c),
            _ => out.push(' '),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
