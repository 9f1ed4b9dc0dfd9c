// src/reminders/job.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::message::{self, ReminderMessage};
use super::store::ReminderStore;
use super::window::ReminderWindow;
use crate::config::ReminderSettings;
use crate::error::ReminderError;
use crate::models::{DeliveryStatus, NewDeliveryLog, ReminderCandidate};
use crate::phone;
use crate::sms::SmsGateway;

/// Human-readable transcript of a run, returned by the cron endpoint and
/// printed by the `send_reminders` binary.
#[derive(Debug, Default, Clone)]
pub struct RunLog {
    lines: Vec<String>,
}

impl RunLog {
    pub fn line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn output(&self) -> String {
        self.lines.join("\n")
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    /// Already reminded by a concurrent run between query and send.
    pub skipped: usize,
    /// Per-appointment reads or writes that failed. The run carries on past them.
    pub storage_errors: usize,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.storage_errors == 0
    }
}

pub struct ReminderJob<S> {
    store: S,
    gateway: Arc<SmsGateway>,
    settings: ReminderSettings,
}

impl<S: ReminderStore> ReminderJob<S> {
    pub fn new(store: S, gateway: Arc<SmsGateway>, settings: ReminderSettings) -> Self {
        Self {
            store,
            gateway,
            settings,
        }
    }

    /// Send reminders for appointments on the clinic-local day after `now`.
    pub async fn run(
        &self,
        now: DateTime<Utc>,
        log: &mut RunLog,
    ) -> Result<RunSummary, ReminderError> {
        let tz = self.settings.clinic_tz;
        let window = ReminderWindow::tomorrow(now, tz)?;

        log.line(format!("Clinic timezone: {tz}"));
        log.line(format!(
            "Clinic local time: {}",
            now.with_timezone(&tz).format("%Y-%m-%d %H:%M")
        ));
        log.line(format!("Looking for appointments on: {}", window.day));
        log.line(format!("Query range (UTC): {} to {}", window.start, window.end));

        let appointments = self.store.eligible_appointments(&window).await?;
        let total = appointments.len();
        log.line(format!("Found {total} appointment(s) to remind"));

        if total == 0 {
            log.line("No reminders to send.");
            return Ok(RunSummary::default());
        }

        if total > self.settings.max_per_run {
            let err = ReminderError::SafetyCapExceeded {
                found: total,
                max: self.settings.max_per_run,
            };
            log.line(err.to_string());
            tracing::error!(severity = "CRITICAL", found = total, max = self.settings.max_per_run, "{err}");
            return Err(err);
        }

        let contact_line = message::contact_line(self.settings.clinic_phone.as_deref());
        let mut summary = RunSummary {
            total,
            ..Default::default()
        };
        let mut warned_unconfigured = false;

        for appt in &appointments {
            // another run may have stamped it since the query
            match self.store.still_pending(appt.appointment_id).await {
                Ok(true) => {}
                Ok(false) => {
                    summary.skipped += 1;
                    log.line(format!("Skipping appointment {}: already reminded", appt.appointment_id));
                    continue;
                }
                Err(err) => {
                    summary.storage_errors += 1;
                    tracing::error!(appointment_id = %appt.appointment_id, error = %err, "pending re-check failed, not sending");
                    log.line(format!("Skipping appointment {}: {err}", appt.appointment_id));
                    continue;
                }
            }

            let phone_raw = appt.patient.phone.as_deref().unwrap_or_default().trim();
            let masked = phone::mask(phone_raw);
            log.line(format!(
                "Sending reminder to {} {} at {}...",
                appt.patient.last_name, appt.patient.first_name, masked
            ));

            let body = self.render(appt, &contact_line);
            let result = self.gateway.send(phone_raw, &body).await;

            let entry = NewDeliveryLog {
                appointment_id: appt.appointment_id,
                phone: result
                    .normalized_phone
                    .clone()
                    .unwrap_or_else(|| phone_raw.to_string()),
                provider: result.provider.to_string(),
                status: if result.ok() {
                    DeliveryStatus::Success
                } else {
                    DeliveryStatus::Failed
                },
                message_id: result.message_id().map(str::to_string),
                error_message: result.error(),
            };
            let recorded = match self.store.record_delivery(&entry).await {
                Ok(()) => true,
                Err(err) => {
                    summary.storage_errors += 1;
                    tracing::error!(appointment_id = %appt.appointment_id, error = %err, "delivery log write failed");
                    log.line(format!("  Delivery log not written: {err}"));
                    false
                }
            };

            match &result.outcome {
                Ok(_) => {
                    summary.sent += 1;
                    log.line(format!("  Sent to {masked}"));
                    // the stamp must follow a recorded attempt
                    if recorded {
                        self.stamp(appt, &mut summary, log).await;
                    }
                }
                Err(err) => {
                    summary.failed += 1;
                    if err.is_configuration() && !warned_unconfigured {
                        warned_unconfigured = true;
                        tracing::warn!("SMS provider not configured, every reminder in this run will fail");
                    }
                    log.line(format!("  Failed for {masked}: {err}"));
                }
            }
        }

        log.line("");
        log.line(format!("Processed: {}", summary.total));
        log.line(format!("Sent: {}", summary.sent));
        if summary.failed > 0 {
            log.line(format!("Failed: {}", summary.failed));
        }
        if summary.skipped > 0 {
            log.line(format!("Skipped: {}", summary.skipped));
        }
        if summary.storage_errors > 0 {
            log.line(format!("Storage errors: {}", summary.storage_errors));
        }
        log.line("Done.");

        tracing::info!(
            total = summary.total,
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            storage_errors = summary.storage_errors,
            "SMS reminder run complete"
        );

        Ok(summary)
    }

    async fn stamp(&self, appt: &ReminderCandidate, summary: &mut RunSummary, log: &mut RunLog) {
        match self.store.mark_reminded(appt.appointment_id, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(appointment_id = %appt.appointment_id, "reminder_sent_at was already set")
            }
            Err(err) => {
                summary.storage_errors += 1;
                tracing::error!(appointment_id = %appt.appointment_id, error = %err, "reminder_sent_at not stamped");
                log.line(format!("  Appointment not stamped: {err}"));
            }
        }
    }

    fn render(&self, appt: &ReminderCandidate, contact_line: &str) -> String {
        let doctor = message::doctor_display(appt.doctor.as_ref());
        ReminderMessage {
            patient: &appt.patient,
            scheduled_at: appt.scheduled_at,
            doctor: &doctor,
            contact_line,
        }
        .render(self.settings.clinic_tz)
    }
}
