// src/sms/africastalking.rs

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{RecipientStatus, SmsProvider};
use crate::config::SmsSettings;
use crate::error::SmsError;
use crate::phone::CanonicalPhone;

/// Africa's Talking bulk SMS API client.
/// Based on: https://developers.africastalking.com/docs/sms/sending/bulk
pub struct AfricasTalkingClient {
    client: Client,
    username: String,
    api_key: String,
    sender_id: Option<String>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(rename = "SMSMessageData")]
    data: Option<MessageData>,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    #[serde(rename = "Recipients", default)]
    recipients: Vec<Recipient>,
}

#[derive(Debug, Deserialize)]
struct Recipient {
    #[serde(default = "unknown_status")]
    status: String,
    #[serde(rename = "messageId")]
    message_id: Option<String>,
}

fn unknown_status() -> String {
    "Unknown".to_string()
}

impl AfricasTalkingClient {
    /// `NotConfigured` when credentials are missing, `Provider` when the HTTP
    /// client cannot be built.
    pub fn from_settings(settings: &SmsSettings) -> Result<Self, SmsError> {
        if !settings.has_credentials() {
            return Err(SmsError::NotConfigured);
        }

        let client = Client::builder()
            .timeout(settings.send_timeout)
            .build()
            .map_err(|e| SmsError::provider(format!("cannot build SMS HTTP client: {e}")))?;

        Ok(Self {
            client,
            username: settings.username.clone(),
            api_key: settings.api_key.clone(),
            sender_id: settings.sender_id.clone(),
            url: settings.base_url.clone(),
        })
    }
}

#[async_trait]
impl SmsProvider for AfricasTalkingClient {
    async fn submit(
        &self,
        recipient: &CanonicalPhone,
        message: &str,
    ) -> Result<Vec<RecipientStatus>, SmsError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("username", self.username.as_str()),
            ("to", recipient.as_str()),
            ("message", message),
        ];
        if let Some(from) = self.sender_id.as_deref() {
            form.push(("from", from));
        }

        let response = self
            .client
            .post(&self.url)
            .header("apiKey", &self.api_key)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| SmsError::Provider(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SmsError::Provider(e.without_url().to_string()))?;

        tracing::debug!("Africa's Talking response: {}", status);

        if !status.is_success() {
            return Err(SmsError::Provider(format!("HTTP {}: {}", status, body.trim())));
        }

        let parsed: SendResponse = serde_json::from_str(&body)
            .map_err(|e| SmsError::Provider(format!("Failed to parse provider response: {e}")))?;

        Ok(parsed
            .data
            .map(|d| d.recipients)
            .unwrap_or_default()
            .into_iter()
            .map(|r| RecipientStatus {
                status: r.status,
                message_id: r.message_id,
            })
            .collect())
    }
}
