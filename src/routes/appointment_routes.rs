// src/routes/appointment_routes.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::{StaffContext, ROLE_DOCTOR},
    models::{AppState, AppointmentStatus, DoctorInfo, DoctorProfile},
    reminders::message::doctor_display,
    routes::{nullable, patient_routes::ensure_patient_exists, ApiOk},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route("/appointments/doctors", get(list_doctors))
        .route(
            "/appointments/{appointment_id}",
            get(get_appointment)
                .patch(patch_appointment)
                .delete(delete_appointment),
        )
}

fn ensure_manage(staff: &StaffContext) -> Result<(), ApiError> {
    staff.require(
        staff.is_front_desk(),
        "Only admin/manager/receptionist can manage appointments",
    )
}

/// Open appointments (SCHEDULED / CONFIRMED) may not be placed in the past.
pub fn validate_schedule(
    status: AppointmentStatus,
    scheduled_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    if status.is_open() && scheduled_at < now {
        return Err(ApiError::validation("Appointment cannot be in the past."));
    }
    Ok(())
}

/* ============================================================
   Response DTOs
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct AppointmentDto {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub doctor_user_id: Option<Uuid>,
    pub scheduled_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub reason: String,
    pub notes: String,
    pub visit_id: Option<Uuid>,
    pub reminders_enabled: bool,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct AppointmentRow {
    appointment_id: Uuid,
    patient_id: Uuid,
    p_first: String,
    p_last: String,
    doctor_user_id: Option<Uuid>,
    scheduled_at: DateTime<Utc>,
    status: String,
    reason: String,
    notes: String,
    visit_id: Option<Uuid>,
    reminders_enabled: bool,
    reminder_sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AppointmentRow> for AppointmentDto {
    type Error = ApiError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        let status = AppointmentStatus::parse(&row.status).ok_or_else(|| {
            ApiError::Internal(format!(
                "appointment {} has unknown status {:?}",
                row.appointment_id, row.status
            ))
        })?;

        Ok(AppointmentDto {
            appointment_id: row.appointment_id,
            patient_id: row.patient_id,
            patient_name: format!("{} {}", row.p_last, row.p_first).trim().to_string(),
            doctor_user_id: row.doctor_user_id,
            scheduled_at: row.scheduled_at,
            status,
            reason: row.reason,
            notes: row.notes,
            visit_id: row.visit_id,
            reminders_enabled: row.reminders_enabled,
            reminder_sent_at: row.reminder_sent_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const APPOINTMENT_SELECT: &str = r#"
    SELECT
      a.appointment_id, a.patient_id,
      p.first_name AS p_first, p.last_name AS p_last,
      a.doctor_user_id, a.scheduled_at, a.status, a.reason, a.notes,
      a.visit_id, a.reminders_enabled, a.reminder_sent_at,
      a.created_at, a.updated_at
    FROM appointment a
    JOIN patient p ON p.patient_id = a.patient_id
"#;

async fn load_appointment(db: &PgPool, appointment_id: Uuid) -> Result<AppointmentDto, ApiError> {
    let sql = format!("{APPOINTMENT_SELECT} WHERE a.appointment_id = $1");
    let row = sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(appointment_id)
        .fetch_optional(db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "appointment not found".into()))?;

    AppointmentDto::try_from(row)
}

#[derive(Debug, Serialize)]
pub struct DoctorDto {
    pub user_id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub display: String,
    pub specialization: Option<String>,
}

#[derive(Debug, FromRow)]
struct DoctorRow {
    user_id: Uuid,
    username: String,
    first_name: String,
    last_name: String,
    has_profile: bool,
    display_name: Option<String>,
    specialization: Option<String>,
}

impl From<DoctorRow> for DoctorDto {
    fn from(row: DoctorRow) -> Self {
        let info = DoctorInfo {
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            profile: row.has_profile.then(|| DoctorProfile {
                display_name: row.display_name.unwrap_or_default(),
                specialization: row.specialization.clone().unwrap_or_default(),
            }),
        };
        let display = doctor_display(Some(&info));

        DoctorDto {
            user_id: row.user_id,
            username: info.username,
            first_name: info.first_name,
            last_name: info.last_name,
            display,
            specialization: row
                .specialization
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }
}

/* ============================================================
   GET /appointments
   ============================================================ */

#[derive(Debug, Default, Deserialize)]
pub struct AppointmentListQuery {
    pub patient: Option<Uuid>,
    pub status: Option<String>,
    // "true" / "false"
    pub upcoming: Option<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct AppointmentFilter {
    patient_id: Option<Uuid>,
    status: Option<AppointmentStatus>,
    upcoming: bool,
}

impl AppointmentFilter {
    fn from_query(q: AppointmentListQuery) -> Result<Self, ApiError> {
        let status = match q.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => Some(
                AppointmentStatus::parse(s)
                    .ok_or_else(|| ApiError::validation(format!("unknown status {s:?}")))?,
            ),
            None => None,
        };

        Ok(AppointmentFilter {
            patient_id: q.patient,
            status,
            upcoming: q
                .upcoming
                .as_deref()
                .is_some_and(|u| u.trim().eq_ignore_ascii_case("true")),
        })
    }
}

pub async fn list_appointments(
    State(state): State<AppState>,
    _staff: StaffContext,
    Query(q): Query<AppointmentListQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentDto>>>, ApiError> {
    let filter = AppointmentFilter::from_query(q)?;
    let open: Vec<&str> = AppointmentStatus::ALL
        .into_iter()
        .filter(|s| s.is_open())
        .map(AppointmentStatus::as_str)
        .collect();

    // upcoming: scheduled from now on and still open
    let sql = format!(
        r#"{APPOINTMENT_SELECT}
        WHERE ($1::uuid IS NULL OR a.patient_id = $1)
          AND ($2::text IS NULL OR a.status = $2)
          AND (NOT $3 OR (a.scheduled_at >= $4 AND a.status = ANY($5)))
        ORDER BY a.scheduled_at DESC
        "#
    );

    let rows = sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(filter.patient_id)
        .bind(filter.status.map(AppointmentStatus::as_str))
        .bind(filter.upcoming)
        .bind(Utc::now())
        .bind(&open)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    let data = rows
        .into_iter()
        .map(AppointmentDto::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ApiOk { data }))
}

/* ============================================================
   GET /appointments/doctors
   ============================================================ */

pub async fn list_doctors(
    State(state): State<AppState>,
    _staff: StaffContext,
) -> Result<Json<ApiOk<Vec<DoctorDto>>>, ApiError> {
    let rows = sqlx::query_as::<_, DoctorRow>(
        r#"
        SELECT
          u.user_id,
          u.username,
          COALESCE(u.first_name, '') AS first_name,
          COALESCE(u.last_name, '') AS last_name,
          (dp.user_id IS NOT NULL) AS has_profile,
          dp.display_name,
          dp.specialization
        FROM app_user u
        LEFT JOIN doctor_profile dp ON dp.user_id = u.user_id
        WHERE u.roles = $1
          AND u.is_active = true
        ORDER BY u.last_name, u.first_name, u.username
        "#,
    )
    .bind(ROLE_DOCTOR)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk {
        data: rows.into_iter().map(DoctorDto::from).collect(),
    }))
}

async fn ensure_doctor(db: &PgPool, user_id: Uuid) -> Result<(), ApiError> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1
            FROM app_user
            WHERE user_id = $1
              AND roles = $2
              AND is_active = true
        )
        "#,
    )
    .bind(user_id)
    .bind(ROLE_DOCTOR)
    .fetch_one(db)
    .await
    .map_err(ApiError::db)?;

    if exists {
        Ok(())
    } else {
        Err(ApiError::validation("doctor_user_id is not an active doctor"))
    }
}

/* ============================================================
   GET /appointments/{id}
   ============================================================ */

pub async fn get_appointment(
    State(state): State<AppState>,
    _staff: StaffContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let data = load_appointment(&state.db, appointment_id).await?;
    Ok(Json(ApiOk { data }))
}

/* ============================================================
   POST /appointments
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_user_id: Option<Uuid>,
    pub scheduled_at: DateTime<Utc>,
    pub status: Option<AppointmentStatus>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub visit_id: Option<Uuid>,
    pub reminders_enabled: Option<bool>,
}

pub async fn create_appointment(
    State(state): State<AppState>,
    staff: StaffContext,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<ApiOk<AppointmentDto>>), ApiError> {
    ensure_manage(&staff)?;

    let status = req.status.unwrap_or(AppointmentStatus::Scheduled);
    validate_schedule(status, req.scheduled_at, Utc::now())?;

    ensure_patient_exists(&state.db, req.patient_id).await?;
    if let Some(doctor) = req.doctor_user_id {
        ensure_doctor(&state.db, doctor).await?;
    }

    let appointment_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO appointment (
          patient_id,
          doctor_user_id,
          scheduled_at,
          status,
          reason,
          notes,
          visit_id,
          reminders_enabled
        )
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
        RETURNING appointment_id
        "#,
    )
    .bind(req.patient_id)
    .bind(req.doctor_user_id)
    .bind(req.scheduled_at)
    .bind(status.as_str())
    .bind(req.reason.as_deref().map(str::trim).unwrap_or(""))
    .bind(req.notes.as_deref().unwrap_or(""))
    .bind(req.visit_id)
    .bind(req.reminders_enabled.unwrap_or(false))
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("APPOINTMENT_CREATE_FAILED", format!("{e}")))?;

    tracing::info!(%appointment_id, user_id = %staff.user_id, "appointment created");

    let data = load_appointment(&state.db, appointment_id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data })))
}

/* ============================================================
   PATCH /appointments/{id}
   ============================================================ */

#[derive(Debug, Default, Deserialize)]
pub struct PatchAppointmentRequest {
    #[serde(default, deserialize_with = "nullable")]
    pub doctor_user_id: Option<Option<Uuid>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: Option<AppointmentStatus>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub visit_id: Option<Option<Uuid>>,
    pub reminders_enabled: Option<bool>,
}

/// Editable columns after a PATCH has been applied.
#[derive(Debug, Clone, PartialEq)]
struct AppointmentChanges {
    doctor_user_id: Option<Uuid>,
    scheduled_at: DateTime<Utc>,
    status: AppointmentStatus,
    reason: String,
    notes: String,
    visit_id: Option<Uuid>,
    reminders_enabled: bool,
}

impl PatchAppointmentRequest {
    /// Merge onto the stored appointment. The past-date rule is only checked
    /// when the time or the status changes, so notes on an old appointment
    /// stay editable.
    fn apply(
        self,
        current: &AppointmentDto,
        now: DateTime<Utc>,
    ) -> Result<AppointmentChanges, ApiError> {
        let rescheduling = self.scheduled_at.is_some() || self.status.is_some();

        let merged = AppointmentChanges {
            doctor_user_id: self.doctor_user_id.unwrap_or(current.doctor_user_id),
            scheduled_at: self.scheduled_at.unwrap_or(current.scheduled_at),
            status: self.status.unwrap_or(current.status),
            reason: self
                .reason
                .map(|r| r.trim().to_string())
                .unwrap_or_else(|| current.reason.clone()),
            notes: self.notes.unwrap_or_else(|| current.notes.clone()),
            visit_id: self.visit_id.unwrap_or(current.visit_id),
            reminders_enabled: self.reminders_enabled.unwrap_or(current.reminders_enabled),
        };

        if rescheduling {
            validate_schedule(merged.status, merged.scheduled_at, now)?;
        }
        Ok(merged)
    }
}

pub async fn patch_appointment(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<PatchAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    ensure_manage(&staff)?;

    let current = load_appointment(&state.db, appointment_id).await?;
    let changes = req.apply(&current, Utc::now())?;

    if let Some(doctor) = changes.doctor_user_id.filter(|d| Some(*d) != current.doctor_user_id) {
        ensure_doctor(&state.db, doctor).await?;
    }

    // reminder_sent_at is owned by the reminder job and never written here
    let updated = sqlx::query(
        r#"
        UPDATE appointment
        SET doctor_user_id = $2,
            scheduled_at = $3,
            status = $4,
            reason = $5,
            notes = $6,
            visit_id = $7,
            reminders_enabled = $8,
            updated_at = now()
        WHERE appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .bind(changes.doctor_user_id)
    .bind(changes.scheduled_at)
    .bind(changes.status.as_str())
    .bind(&changes.reason)
    .bind(&changes.notes)
    .bind(changes.visit_id)
    .bind(changes.reminders_enabled)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("APPOINTMENT_UPDATE_FAILED", format!("{e}")))?;

    if updated.rows_affected() == 0 {
        return Err(ApiError::NotFound("NOT_FOUND", "appointment not found".into()));
    }

    tracing::info!(%appointment_id, user_id = %staff.user_id, "appointment updated");

    let data = load_appointment(&state.db, appointment_id).await?;
    Ok(Json(ApiOk { data }))
}

/* ============================================================
   DELETE /appointments/{id}
   ============================================================ */

pub async fn delete_appointment(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ensure_manage(&staff)?;

    let deleted = sqlx::query("DELETE FROM appointment WHERE appointment_id = $1")
        .bind(appointment_id)
        .execute(&state.db)
        .await
        .map_err(|e| delete_error(e, "appointment"))?;

    if deleted.rows_affected() == 0 {
        return Err(ApiError::NotFound("NOT_FOUND", "appointment not found".into()));
    }

    tracing::info!(%appointment_id, user_id = %staff.user_id, "appointment deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Rows still referenced elsewhere come back as 409 instead of a 500.
pub(crate) fn delete_error(err: sqlx::Error, what: &str) -> ApiError {
    match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => ApiError::Conflict(
            "IN_USE",
            format!("{what} is still referenced and cannot be deleted"),
        ),
        _ => ApiError::db(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
    }

    fn stored(status: AppointmentStatus, scheduled_at: DateTime<Utc>) -> AppointmentDto {
        AppointmentDto {
            appointment_id: Uuid::from_u128(1),
            patient_id: Uuid::from_u128(2),
            patient_name: "KABILA Marie".into(),
            doctor_user_id: Some(Uuid::from_u128(3)),
            scheduled_at,
            status,
            reason: "Contrôle".into(),
            notes: String::new(),
            visit_id: None,
            reminders_enabled: true,
            reminder_sent_at: None,
            created_at: now() - Duration::days(30),
            updated_at: now() - Duration::days(30),
        }
    }

    #[test]
    fn test_open_appointments_cannot_be_in_the_past() {
        let yesterday = now() - Duration::days(1);
        let err = validate_schedule(AppointmentStatus::Scheduled, yesterday, now()).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest("VALIDATION_ERROR", _)));
        assert!(validate_schedule(AppointmentStatus::Confirmed, yesterday, now()).is_err());

        assert!(validate_schedule(AppointmentStatus::Completed, yesterday, now()).is_ok());
        assert!(validate_schedule(AppointmentStatus::Cancelled, yesterday, now()).is_ok());
        assert!(validate_schedule(AppointmentStatus::Scheduled, now(), now()).is_ok());
    }

    #[test]
    fn test_list_filter_parsing() {
        let filter = AppointmentFilter::from_query(AppointmentListQuery {
            patient: Some(Uuid::from_u128(7)),
            status: Some(" CONFIRMED ".into()),
            upcoming: Some("True".into()),
        })
        .unwrap();
        assert_eq!(
            filter,
            AppointmentFilter {
                patient_id: Some(Uuid::from_u128(7)),
                status: Some(AppointmentStatus::Confirmed),
                upcoming: true,
            }
        );

        let empty = AppointmentFilter::from_query(AppointmentListQuery {
            status: Some("".into()),
            upcoming: Some("false".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(empty, AppointmentFilter::default());

        let err = AppointmentFilter::from_query(AppointmentListQuery {
            status: Some("done".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest("VALIDATION_ERROR", _)));
    }

    #[test]
    fn test_create_request_accepts_reminders_flag() {
        let req: CreateAppointmentRequest = serde_json::from_str(
            r#"{
                "patient_id": "00000000-0000-0000-0000-000000000002",
                "scheduled_at": "2026-03-11T08:30:00Z",
                "status": "CONFIRMED",
                "reminders_enabled": true
            }"#,
        )
        .unwrap();
        assert_eq!(req.status, Some(AppointmentStatus::Confirmed));
        assert_eq!(req.reminders_enabled, Some(true));
        assert_eq!(req.doctor_user_id, None);
    }

    #[test]
    fn test_patch_of_notes_on_past_appointment_is_allowed() {
        let current = stored(AppointmentStatus::Scheduled, now() - Duration::days(2));
        let req: PatchAppointmentRequest =
            serde_json::from_str(r#"{"notes": "patient called"}"#).unwrap();

        let changes = req.apply(&current, now()).unwrap();
        assert_eq!(changes.notes, "patient called");
        assert_eq!(changes.scheduled_at, current.scheduled_at);
        assert_eq!(changes.doctor_user_id, current.doctor_user_id);
    }

    #[test]
    fn test_patch_rescheduling_into_the_past_is_rejected() {
        let current = stored(AppointmentStatus::Scheduled, now() + Duration::days(2));
        let req = PatchAppointmentRequest {
            scheduled_at: Some(now() - Duration::hours(1)),
            ..Default::default()
        };
        assert!(req.apply(&current, now()).is_err());

        // reopening an old cancelled appointment without moving it
        let cancelled = stored(AppointmentStatus::Cancelled, now() - Duration::days(1));
        let reopen = PatchAppointmentRequest {
            status: Some(AppointmentStatus::Scheduled),
            ..Default::default()
        };
        assert!(reopen.apply(&cancelled, now()).is_err());

        let complete = PatchAppointmentRequest {
            status: Some(AppointmentStatus::Completed),
            ..Default::default()
        };
        let overdue = stored(AppointmentStatus::Scheduled, now() - Duration::days(1));
        let changes = complete.apply(&overdue, now()).unwrap();
        assert_eq!(changes.status, AppointmentStatus::Completed);
    }

    #[test]
    fn test_patch_null_clears_doctor() {
        let current = stored(AppointmentStatus::Scheduled, now() + Duration::days(1));
        let req: PatchAppointmentRequest =
            serde_json::from_str(r#"{"doctor_user_id": null, "reminders_enabled": false}"#).unwrap();

        let changes = req.apply(&current, now()).unwrap();
        assert_eq!(changes.doctor_user_id, None);
        assert!(!changes.reminders_enabled);
    }

    #[test]
    fn test_doctor_row_display() {
        let dto = DoctorDto::from(DoctorRow {
            user_id: Uuid::from_u128(3),
            username: "jmukwamu".into(),
            first_name: "Justin".into(),
            last_name: "MUKWAMU".into(),
            has_profile: true,
            display_name: Some(String::new()),
            specialization: Some("Pédiatre".into()),
        });
        assert_eq!(dto.display, "Dr MUKWAMU Justin, Pédiatre");
        assert_eq!(dto.specialization.as_deref(), Some("Pédiatre"));

        let bare = DoctorDto::from(DoctorRow {
            user_id: Uuid::from_u128(4),
            username: "drx".into(),
            first_name: String::new(),
            last_name: String::new(),
            has_profile: false,
            display_name: None,
            specialization: None,
        });
        assert_eq!(bare.display, "Dr drx");
        assert_eq!(bare.specialization, None);
    }
}
