// src/reminders/window.rs

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::ReminderError;
use crate::models::ReminderCandidate;

/// Half-open UTC range `[start, end)` covering one clinic-local calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderWindow {
    pub day: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReminderWindow {
    /// The clinic-local day after the one containing `now`.
    pub fn tomorrow(now: DateTime<Utc>, tz: Tz) -> Result<Self, ReminderError> {
        let today = now.with_timezone(&tz).date_naive();
        let day = today
            .succ_opt()
            .ok_or_else(|| ReminderError::Window(format!("no day after {today}")))?;
        Self::for_day(day, tz)
    }

    pub fn for_day(day: NaiveDate, tz: Tz) -> Result<Self, ReminderError> {
        let next = day
            .succ_opt()
            .ok_or_else(|| ReminderError::Window(format!("no day after {day}")))?;

        Ok(Self {
            day,
            start: local_midnight(day, tz)?,
            end: local_midnight(next, tz)?,
        })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// First instant of `day` in `tz`, as UTC.
///
/// A midnight skipped by a DST jump resolves to the first local time that
/// exists that day.
fn local_midnight(day: NaiveDate, tz: Tz) -> Result<DateTime<Utc>, ReminderError> {
    let midnight = day.and_time(NaiveTime::MIN);

    // gaps are at most a couple of hours; walk forward in 15-minute steps
    for step in 0..=12 {
        let local = midnight + Duration::minutes(15 * step);
        match tz.from_local_datetime(&local) {
            LocalResult::Single(t) => return Ok(t.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => return Ok(earliest.with_timezone(&Utc)),
            LocalResult::None => continue,
        }
    }

    Err(ReminderError::Window(format!(
        "local midnight of {day} does not exist in {tz}"
    )))
}

impl ReminderCandidate {
    /// Rust mirror of the eligibility query in `PgReminderStore`.
    pub fn is_eligible(&self, window: &ReminderWindow) -> bool {
        window.contains(self.scheduled_at)
            && self.status.accepts_reminders()
            && self.reminders_enabled
            && self.reminder_sent_at.is_none()
            && self
                .patient
                .phone
                .as_deref()
                .is_some_and(|p| !p.trim().is_empty())
    }
}
