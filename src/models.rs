use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::config::ReminderSettings;
use crate::sms::SmsGateway;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub gateway: Arc<SmsGateway>,
    pub reminders: ReminderSettings,
    pub cron_secret_token: Arc<str>,
    /// Held for the duration of a reminder run started over HTTP.
    pub run_guard: Arc<tokio::sync::Mutex<()>>,
}

/* -------------------------
   Domain enums
--------------------------*/

/// Appointment lifecycle, stored as text in `appointment.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 5] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::Completed,
        AppointmentStatus::NoShow,
    ];

    /// Statuses that still expect the patient to show up.
    pub const REMINDABLE: [AppointmentStatus; 2] =
        [AppointmentStatus::Scheduled, AppointmentStatus::Confirmed];

    pub fn accepts_reminders(self) -> bool {
        Self::REMINDABLE.contains(&self)
    }

    /// Still expected to happen, so it may not be placed in the past.
    pub fn is_open(self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "SCHEDULED",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::NoShow => "NO_SHOW",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SCHEDULED" => Some(AppointmentStatus::Scheduled),
            "CONFIRMED" => Some(AppointmentStatus::Confirmed),
            "CANCELLED" => Some(AppointmentStatus::Cancelled),
            "COMPLETED" => Some(AppointmentStatus::Completed),
            "NO_SHOW" => Some(AppointmentStatus::NoShow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Success => "SUCCESS",
            DeliveryStatus::Failed => "FAILED",
        }
    }
}

/* -------------------------
   Reminder domain
--------------------------*/

#[derive(Debug, Clone)]
pub struct PatientContact {
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DoctorProfile {
    pub display_name: String,
    pub specialization: String,
}

#[derive(Debug, Clone, Default)]
pub struct DoctorInfo {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub profile: Option<DoctorProfile>,
}

/// An appointment with everything needed to decide on and render a reminder.
#[derive(Debug, Clone)]
pub struct ReminderCandidate {
    pub appointment_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub reminders_enabled: bool,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub patient: PatientContact,
    pub doctor: Option<DoctorInfo>,
}

/// One row to append to `reminder_delivery_log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeliveryLog {
    pub appointment_id: Uuid,
    pub phone: String,
    pub provider: String,
    pub status: DeliveryStatus,
    pub message_id: Option<String>,
    pub error_message: Option<String>,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, FromRow)]
pub struct ReminderCandidateRow {
    pub appointment_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub status: String,
    pub reminders_enabled: bool,
    pub reminder_sent_at: Option<DateTime<Utc>>,

    pub p_first: String,
    pub p_last: String,
    pub p_phone: Option<String>,

    pub d_id: Option<Uuid>,
    pub d_username: Option<String>,
    pub d_first: Option<String>,
    pub d_last: Option<String>,
    pub d_has_profile: bool,
    pub d_display_name: Option<String>,
    pub d_specialization: Option<String>,
}

impl TryFrom<ReminderCandidateRow> for ReminderCandidate {
    type Error = String;

    fn try_from(r: ReminderCandidateRow) -> Result<Self, Self::Error> {
        let status = AppointmentStatus::parse(&r.status)
            .ok_or_else(|| format!("unknown appointment status {:?}", r.status))?;

        let doctor = r.d_id.map(|_| DoctorInfo {
            username: r.d_username.unwrap_or_default(),
            first_name: r.d_first.unwrap_or_default(),
            last_name: r.d_last.unwrap_or_default(),
            profile: r.d_has_profile.then(|| DoctorProfile {
                display_name: r.d_display_name.unwrap_or_default(),
                specialization: r.d_specialization.unwrap_or_default(),
            }),
        });

        Ok(ReminderCandidate {
            appointment_id: r.appointment_id,
            scheduled_at: r.scheduled_at,
            status,
            reminders_enabled: r.reminders_enabled,
            reminder_sent_at: r.reminder_sent_at,
            patient: PatientContact {
                first_name: r.p_first,
                last_name: r.p_last,
                phone: r.p_phone,
            },
            doctor,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeliveryLogRow {
    pub log_id: Uuid,
    pub appointment_id: Uuid,
    pub phone: String,
    pub provider: String,
    /// "SUCCESS" or "FAILED"
    pub status: String,
    pub message_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
