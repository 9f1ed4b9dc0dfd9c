// src/reminders/store.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::window::ReminderWindow;
use crate::error::ReminderError;
use crate::models::{
    AppointmentStatus, DeliveryLogRow, NewDeliveryLog, ReminderCandidate, ReminderCandidateRow,
};

/// Persistence the reminder job depends on.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    async fn eligible_appointments(
        &self,
        window: &ReminderWindow,
    ) -> Result<Vec<ReminderCandidate>, ReminderError>;

    /// `true` while no reminder has been stamped on the appointment.
    async fn still_pending(&self, appointment_id: Uuid) -> Result<bool, ReminderError>;

    async fn record_delivery(&self, entry: &NewDeliveryLog) -> Result<(), ReminderError>;

    /// Stamp `reminder_sent_at`. Returns `false` if it was already set.
    async fn mark_reminded(
        &self,
        appointment_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, ReminderError>;
}

#[derive(Clone)]
pub struct PgReminderStore {
    db: PgPool,
}

impl PgReminderStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ReminderStore for PgReminderStore {
    async fn eligible_appointments(
        &self,
        window: &ReminderWindow,
    ) -> Result<Vec<ReminderCandidate>, ReminderError> {
        let statuses: Vec<&str> = AppointmentStatus::REMINDABLE
            .iter()
            .map(|s| s.as_str())
            .collect();

        let rows: Vec<ReminderCandidateRow> = sqlx::query_as::<_, ReminderCandidateRow>(
            r#"
            SELECT
              a.appointment_id,
              a.scheduled_at,
              a.status,
              a.reminders_enabled,
              a.reminder_sent_at,

              p.first_name AS p_first,
              p.last_name  AS p_last,
              p.phone      AS p_phone,

              u.user_id    AS d_id,
              u.username   AS d_username,
              u.first_name AS d_first,
              u.last_name  AS d_last,
              (dp.user_id IS NOT NULL) AS d_has_profile,
              dp.display_name   AS d_display_name,
              dp.specialization AS d_specialization

            FROM appointment a
            JOIN patient p ON p.patient_id = a.patient_id
            LEFT JOIN app_user u ON u.user_id = a.doctor_user_id
            LEFT JOIN doctor_profile dp ON dp.user_id = u.user_id

            WHERE a.scheduled_at >= $1
              AND a.scheduled_at <  $2
              AND a.status = ANY($3)
              AND a.reminders_enabled = true
              AND a.reminder_sent_at IS NULL
              AND p.phone IS NOT NULL
              AND btrim(p.phone) <> ''

            ORDER BY a.scheduled_at ASC
            "#,
        )
        .bind(window.start)
        .bind(window.end)
        .bind(&statuses)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|row| {
                ReminderCandidate::try_from(row)
                    .map_err(|e| ReminderError::Database(sqlx::Error::Decode(e.into())))
            })
            .collect()
    }

    async fn still_pending(&self, appointment_id: Uuid) -> Result<bool, ReminderError> {
        let pending: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1
                FROM appointment
                WHERE appointment_id = $1
                  AND reminder_sent_at IS NULL
            )
            "#,
        )
        .bind(appointment_id)
        .fetch_one(&self.db)
        .await?;

        Ok(pending)
    }

    async fn record_delivery(&self, entry: &NewDeliveryLog) -> Result<(), ReminderError> {
        sqlx::query(
            r#"
            INSERT INTO reminder_delivery_log
              (appointment_id, phone, provider, status, message_id, error_message)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.appointment_id)
        .bind(&entry.phone)
        .bind(&entry.provider)
        .bind(entry.status.as_str())
        .bind(entry.message_id.as_deref())
        .bind(entry.error_message.as_deref())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn mark_reminded(
        &self,
        appointment_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, ReminderError> {
        let res = sqlx::query(
            r#"
            UPDATE appointment
            SET reminder_sent_at = $2
            WHERE appointment_id = $1
              AND reminder_sent_at IS NULL
            "#,
        )
        .bind(appointment_id)
        .bind(at)
        .execute(&self.db)
        .await?;

        Ok(res.rows_affected() == 1)
    }
}

/// Delivery-log rows for one appointment, newest first.
pub async fn delivery_logs_for(
    db: &PgPool,
    appointment_id: Uuid,
) -> Result<Vec<DeliveryLogRow>, sqlx::Error> {
    sqlx::query_as::<_, DeliveryLogRow>(
        r#"
        SELECT
          log_id,
          appointment_id,
          phone,
          provider,
          status,
          message_id,
          error_message,
          created_at
        FROM reminder_delivery_log
        WHERE appointment_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(appointment_id)
    .fetch_all(db)
    .await
}
