// src/sms/mod.rs
//
// Outbound SMS. `SmsGateway` owns normalization, the lazily built provider
// handle, the per-call timeout and the mapping of provider replies onto a
// `DeliveryResult`. Providers only know how to talk to their API.

pub mod africastalking;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::config::SmsSettings;
use crate::error::SmsError;
use crate::phone::{self, CanonicalPhone};

pub const PROVIDER_NAME: &str = "africastalking";

const SUCCESS_STATUS: &str = "Success";

/// Per-recipient status as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientStatus {
    pub status: String,
    pub message_id: Option<String>,
}

#[async_trait]
pub trait SmsProvider: Send + Sync {
    /// Submit `message` to a single, already normalized recipient.
    async fn submit(
        &self,
        recipient: &CanonicalPhone,
        message: &str,
    ) -> Result<Vec<RecipientStatus>, SmsError>;
}

/// Builds the provider handle on first use.
///
/// `Err(SmsError::NotConfigured)` when credentials are missing; any other error
/// means the provider could not be set up at all.
pub type ProviderFactory =
    Box<dyn Fn(&SmsSettings) -> Result<Arc<dyn SmsProvider>, SmsError> + Send + Sync>;

/// Outcome of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub provider: &'static str,
    pub normalized_phone: Option<String>,
    /// Provider message id on success.
    pub outcome: Result<Option<String>, SmsError>,
}

impl DeliveryResult {
    fn failed(normalized_phone: Option<String>, err: SmsError) -> Self {
        Self {
            provider: PROVIDER_NAME,
            normalized_phone,
            outcome: Err(err),
        }
    }

    pub fn ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn message_id(&self) -> Option<&str> {
        match &self.outcome {
            Ok(id) => id.as_deref(),
            Err(_) => None,
        }
    }

    pub fn error(&self) -> Option<String> {
        self.outcome.as_ref().err().map(ToString::to_string)
    }

    pub fn sms_error(&self) -> Option<&SmsError> {
        self.outcome.as_ref().err()
    }
}

pub struct SmsGateway {
    settings: SmsSettings,
    factory: ProviderFactory,
    provider: OnceCell<Result<Arc<dyn SmsProvider>, SmsError>>,
}

impl SmsGateway {
    /// Gateway backed by Africa's Talking, built from `settings` on first send.
    pub fn new(settings: SmsSettings) -> Self {
        Self::with_factory(
            settings,
            Box::new(|s: &SmsSettings| {
                africastalking::AfricasTalkingClient::from_settings(s)
                    .map(|c| Arc::new(c) as Arc<dyn SmsProvider>)
            }),
        )
    }

    pub fn with_factory(settings: SmsSettings, factory: ProviderFactory) -> Self {
        Self {
            settings,
            factory,
            provider: OnceCell::new(),
        }
    }

    /// Gateway with an already constructed provider.
    pub fn with_provider(settings: SmsSettings, provider: Arc<dyn SmsProvider>) -> Self {
        Self {
            settings,
            factory: Box::new(|_| Err(SmsError::NotConfigured)),
            provider: OnceCell::new_with(Some(Ok(provider))),
        }
    }

    async fn provider(&self) -> Result<Arc<dyn SmsProvider>, SmsError> {
        // OnceCell re-checks under its own lock, so concurrent first callers
        // wait for a single factory invocation.
        self.provider
            .get_or_init(|| async {
                let provider = (self.factory)(&self.settings);
                match &provider {
                    Ok(_) => {
                        tracing::info!(username = %self.settings.username, "SMS provider initialised")
                    }
                    Err(SmsError::NotConfigured) => {
                        tracing::error!("Africa's Talking credentials not configured")
                    }
                    Err(err) => tracing::error!(error = %err, "SMS provider could not be initialised"),
                }
                provider
            })
            .await
            .clone()
    }

    /// Send one SMS. Never fails: every problem is reported in the result.
    pub async fn send(&self, phone: &str, message: &str) -> DeliveryResult {
        let Some(normalized) = phone::normalize(phone) else {
            let masked = phone::mask(phone);
            tracing::warn!(phone = %masked, "SMS skipped, invalid phone");
            return DeliveryResult::failed(None, SmsError::InvalidPhone { masked });
        };

        let masked = normalized.masked();

        let provider = match self.provider().await {
            Ok(provider) => provider,
            Err(err) => return DeliveryResult::failed(Some(normalized.into_string()), err),
        };

        let outcome = match tokio::time::timeout(
            self.settings.send_timeout,
            provider.submit(&normalized, message),
        )
        .await
        {
            Err(_) => Err(SmsError::Timeout(self.settings.send_timeout)),
            Ok(Err(err)) => Err(scrub(err, &normalized)),
            Ok(Ok(recipients)) => interpret(recipients),
        };

        match &outcome {
            Ok(id) => {
                tracing::info!(phone = %masked, msg_id = id.as_deref().unwrap_or("-"), "SMS sent")
            }
            Err(err) => tracing::warn!(phone = %masked, error = %err, "SMS failed"),
        }

        DeliveryResult {
            provider: PROVIDER_NAME,
            normalized_phone: Some(normalized.into_string()),
            outcome,
        }
    }
}

fn interpret(recipients: Vec<RecipientStatus>) -> Result<Option<String>, SmsError> {
    let Some(first) = recipients.into_iter().next() else {
        return Err(SmsError::NoRecipients);
    };
    if first.status == SUCCESS_STATUS {
        Ok(first.message_id)
    } else {
        Err(SmsError::Rejected {
            status: first.status,
        })
    }
}

/// Replace the recipient number in free-text provider errors with its mask,
/// then truncate. Truncating first could cut a number in half and let the
/// remaining digits through unmatched.
fn scrub(err: SmsError, phone: &CanonicalPhone) -> SmsError {
    let masked = phone.masked();
    let redact = |text: &str| {
        text.replace(phone.as_str(), &masked)
            .replace(phone.as_str().trim_start_matches('+'), &masked)
            .replace(phone.national_digits(), &masked)
    };
    match err {
        SmsError::Provider(text) => SmsError::provider(redact(&text)),
        other => other,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// What a scripted provider does on one call.
    #[derive(Debug, Clone)]
    pub enum Step {
        Deliver(&'static str),
        Status(&'static str),
        Empty,
        Fail(String),
        Hang,
    }

    /// Provider double that replays `Step`s in order and records recipients.
    #[derive(Default)]
    pub struct ScriptedProvider {
        steps: Mutex<VecDeque<Step>>,
        pub calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedProvider {
        pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SmsProvider for ScriptedProvider {
        async fn submit(
            &self,
            recipient: &CanonicalPhone,
            message: &str,
        ) -> Result<Vec<RecipientStatus>, SmsError> {
            self.calls
                .lock()
                .unwrap()
                .push((recipient.as_str().to_string(), message.to_string()));
            let step = self
                .steps
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Step::Deliver("ATXid_default"));
            match step {
                Step::Deliver(id) => Ok(vec![RecipientStatus {
                    status: "Success".into(),
                    message_id: Some(id.into()),
                }]),
                Step::Status(status) => Ok(vec![RecipientStatus {
                    status: status.into(),
                    message_id: None,
                }]),
                Step::Empty => Ok(vec![]),
                Step::Fail(text) => Err(SmsError::Provider(text)),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(vec![])
                }
            }
        }
    }

    pub fn settings() -> SmsSettings {
        SmsSettings {
            username: "clinic".into(),
            api_key: "secret".into(),
            sender_id: None,
            base_url: "http://127.0.0.1:9".into(),
            send_timeout: Duration::from_secs(5),
        }
    }

    pub fn gateway(provider: Arc<ScriptedProvider>) -> SmsGateway {
        SmsGateway::with_provider(settings(), provider)
    }
}
