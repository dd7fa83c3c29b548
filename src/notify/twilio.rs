//! Twilio REST API provider.
//!
//! Creates `Message` resources for SMS and `Call` resources (with inline
//! TwiML) for voice alerts. The returned resource SID is the reference id.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::MessageProvider;
use crate::error::NotifyError;

/// Production API root.
pub const TWILIO_API_BASE: &str = "https://api.twilio.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct CreatedResource {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

pub struct TwilioProvider {
    client: Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    from: String,
}

impl TwilioProvider {
    pub fn new(
        api_base: &str,
        account_sid: &str,
        auth_token: &str,
        from: &str,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Http(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
            from: from.to_string(),
        })
    }

    async fn create(&self, resource: &str, form: &[(&str, &str)]) -> Result<String, NotifyError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/{}.json",
            self.api_base, self.account_sid, resource
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ApiError>().await {
                Ok(err) => err.message,
                Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
            };
            return Err(NotifyError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let created: CreatedResource = response
            .json()
            .await
            .map_err(|e| NotifyError::Http(format!("unexpected response body: {e}")))?;
        Ok(created.sid)
    }
}

#[async_trait]
impl MessageProvider for TwilioProvider {
    async fn send_text(&self, to: &str, body: &str) -> Result<String, NotifyError> {
        self.create("Messages", &[("To", to), ("From", self.from.as_str()), ("Body", body)])
            .await
    }

    async fn place_call(&self, to: &str, spoken: &str) -> Result<String, NotifyError> {
        let twiml = twiml_say(spoken);
        self.create("Calls", &[("To", to), ("From", self.from.as_str()), ("Twiml", twiml.as_str())])
            .await
    }
}

/// Wrap text in a minimal TwiML document that reads it aloud.
pub fn twiml_say(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    format!("<Response><Say>{escaped}</Say></Response>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twiml_escapes_markup() {
        assert_eq!(
            twiml_say("A <b> & 'c'"),
            "<Response><Say>A &lt;b&gt; &amp; &apos;c&apos;</Say></Response>"
        );
    }

    #[test]
    fn api_base_trailing_slash_is_trimmed() {
        let provider = TwilioProvider::new("http://localhost:1234/", "AC1", "t", "+1").unwrap();
        assert_eq!(provider.api_base, "http://localhost:1234");
    }
}
