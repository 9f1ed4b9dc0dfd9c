use std::env;
use std::time::Duration;

use anyhow::Context;
use chrono_tz::Tz;

pub const DEFAULT_CLINIC_TIMEZONE: &str = "Africa/Kinshasa";
pub const DEFAULT_MAX_REMINDERS_PER_RUN: usize = 200;

const AT_LIVE_URL: &str = "https://api.africastalking.com/version1/messaging";
const AT_SANDBOX_URL: &str = "https://api.sandbox.africastalking.com/version1/messaging";

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub db_max_connections: u32,
    /// Shared secret for the cron trigger. Empty disables the endpoint.
    pub cron_secret_token: String,
    pub sms: SmsSettings,
    pub reminders: ReminderSettings,
}

#[derive(Clone, Debug)]
pub struct SmsSettings {
    pub username: String,
    pub api_key: String,
    pub sender_id: Option<String>,
    pub base_url: String,
    pub send_timeout: Duration,
}

impl SmsSettings {
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.api_key.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct ReminderSettings {
    pub clinic_tz: Tz,
    pub max_per_run: usize,
    /// Printed in the message footer when set.
    pub clinic_phone: Option<String>,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            clinic_tz: chrono_tz::Africa::Kinshasa,
            max_per_run: DEFAULT_MAX_REMINDERS_PER_RUN,
            clinic_phone: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;
        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string());
        let db_max_connections = lookup("DB_MAX_CONNECTIONS")
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(5);
        let cron_secret_token = lookup("CRON_SECRET_TOKEN").unwrap_or_default();

        Ok(Self {
            database_url,
            bind_addr,
            db_max_connections,
            cron_secret_token,
            sms: SmsSettings::from_lookup(&lookup),
            reminders: ReminderSettings::from_lookup(&lookup)?,
        })
    }
}

impl SmsSettings {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let username = non_empty(lookup("AFRICASTALKING_USERNAME")).unwrap_or_default();
        let api_key = non_empty(lookup("AFRICASTALKING_API_KEY")).unwrap_or_default();
        let sender_id = non_empty(lookup("AFRICASTALKING_SENDER_ID"));
        let base_url = non_empty(lookup("AFRICASTALKING_BASE_URL")).unwrap_or_else(|| {
            if username == "sandbox" {
                AT_SANDBOX_URL.to_string()
            } else {
                AT_LIVE_URL.to_string()
            }
        });
        let send_timeout = lookup("SMS_SEND_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Self {
            username,
            api_key,
            sender_id,
            base_url,
            send_timeout,
        }
    }
}

impl ReminderSettings {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let tz_name = non_empty(lookup("CLINIC_TIMEZONE"))
            .unwrap_or_else(|| DEFAULT_CLINIC_TIMEZONE.to_string());
        let clinic_tz: Tz = tz_name
            .parse()
            .map_err(|e| anyhow::anyhow!("CLINIC_TIMEZONE {tz_name:?} is not a valid zone: {e}"))?;
        let max_per_run = lookup("SMS_MAX_REMINDERS_PER_RUN")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_REMINDERS_PER_RUN);
        let clinic_phone = non_empty(lookup("CLINIC_PHONE"));

        Ok(Self {
            clinic_tz,
            max_per_run,
            clinic_phone,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://x")])).unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:8080");
        assert_eq!(cfg.reminders.clinic_tz, chrono_tz::Africa::Kinshasa);
        assert_eq!(cfg.reminders.max_per_run, 200);
        assert_eq!(cfg.reminders.clinic_phone, None);
        assert!(cfg.cron_secret_token.is_empty());
        assert!(!cfg.sms.has_credentials());
        assert_eq!(cfg.sms.base_url, AT_LIVE_URL);
        assert_eq!(cfg.sms.send_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_database_url_required() {
        assert!(Config::from_lookup(lookup_from(&[])).is_err());
    }

    #[test]
    fn test_sandbox_username_selects_sandbox_url() {
        let sms = SmsSettings::from_lookup(lookup_from(&[
            ("AFRICASTALKING_USERNAME", "sandbox"),
            ("AFRICASTALKING_API_KEY", "k"),
            ("AFRICASTALKING_SENDER_ID", "  "),
        ]));
        assert!(sms.has_credentials());
        assert_eq!(sms.base_url, AT_SANDBOX_URL);
        assert_eq!(sms.sender_id, None);
    }

    #[test]
    fn test_reminder_settings_parse() {
        let settings = ReminderSettings::from_lookup(lookup_from(&[
            ("CLINIC_TIMEZONE", "America/New_York"),
            ("SMS_MAX_REMINDERS_PER_RUN", "50"),
            ("CLINIC_PHONE", "+243 81 000 0000"),
        ]))
        .unwrap();
        assert_eq!(settings.clinic_tz, chrono_tz::America::New_York);
        assert_eq!(settings.max_per_run, 50);
        assert_eq!(settings.clinic_phone.as_deref(), Some("+243 81 000 0000"));
    }

    #[test]
    fn test_unknown_timezone_is_rejected() {
        let res = ReminderSettings::from_lookup(lookup_from(&[("CLINIC_TIMEZONE", "Mars/Olympus")]));
        assert!(res.is_err());
    }
}
