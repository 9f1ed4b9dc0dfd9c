// src/routes/visit_routes.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::StaffContext,
    models::AppState,
    routes::{appointment_routes::delete_error, nullable, patient_routes::ensure_patient_exists, ApiOk},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/visits", get(list_visits).post(create_visit))
        .route(
            "/visits/{visit_id}",
            get(get_visit).patch(patch_visit).delete(delete_visit),
        )
}

/* ============================================================
   Vital signs
   ============================================================ */

/// Measurements taken during a visit. Every field is optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(default)]
pub struct Vitals {
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub temperature_c: Option<f64>,
    pub bp_systolic: Option<i16>,
    pub bp_diastolic: Option<i16>,
    pub head_circumference_cm: Option<f64>,
}

fn check_range<T: PartialOrd + Copy>(
    field: &str,
    value: Option<T>,
    min: T,
    max: T,
) -> Result<(), ApiError> {
    match value {
        Some(v) if v < min || v > max => Err(ApiError::validation(format!(
            "{field} is outside the plausible range"
        ))),
        _ => Ok(()),
    }
}

impl Vitals {
    pub fn validate(&self) -> Result<(), ApiError> {
        check_range("weight_kg", self.weight_kg, 0.1, 500.0)?;
        check_range("height_cm", self.height_cm, 20.0, 260.0)?;
        check_range("temperature_c", self.temperature_c, 25.0, 45.0)?;
        check_range("bp_systolic", self.bp_systolic, 40, 300)?;
        check_range("bp_diastolic", self.bp_diastolic, 20, 200)?;
        check_range("head_circumference_cm", self.head_circumference_cm, 20.0, 70.0)?;

        if let (Some(sys), Some(dia)) = (self.bp_systolic, self.bp_diastolic) {
            if dia >= sys {
                return Err(ApiError::validation("bp_diastolic must be below bp_systolic"));
            }
        }
        Ok(())
    }
}

/* ============================================================
   Rows / permissions
   ============================================================ */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct VisitRow {
    pub visit_id: Uuid,
    pub patient_id: Uuid,
    pub reason: String,
    pub notes: String,
    pub diagnosis: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub vitals: Vitals,
    pub created_by_user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const VISIT_COLUMNS: &str = r#"
    visit_id, patient_id, reason, notes, diagnosis,
    weight_kg, height_cm, temperature_c, bp_systolic, bp_diastolic, head_circumference_cm,
    created_by_user_id, created_at, updated_at
"#;

/// Admins edit any visit; doctors only the ones they recorded.
fn can_edit(staff: &StaffContext, created_by: Uuid) -> bool {
    staff.is_admin() || (staff.is_clinician() && created_by == staff.user_id)
}

pub(crate) async fn load_visit(db: &PgPool, visit_id: Uuid) -> Result<VisitRow, ApiError> {
    let sql = format!("SELECT {VISIT_COLUMNS} FROM visit WHERE visit_id = $1");
    sqlx::query_as::<_, VisitRow>(&sql)
        .bind(visit_id)
        .fetch_optional(db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "visit not found".into()))
}

/// Loads the visit and checks the caller may change it (or its prescriptions).
pub(crate) async fn load_editable_visit(
    db: &PgPool,
    staff: &StaffContext,
    visit_id: Uuid,
) -> Result<VisitRow, ApiError> {
    let visit = load_visit(db, visit_id).await?;
    staff.require(
        can_edit(staff, visit.created_by_user_id),
        "Only the doctor who recorded the visit or an admin can change it",
    )?;
    Ok(visit)
}

/* ============================================================
   GET /visits
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct VisitListQuery {
    pub patient: Option<Uuid>,
}

pub async fn list_visits(
    State(state): State<AppState>,
    _staff: StaffContext,
    Query(q): Query<VisitListQuery>,
) -> Result<Json<ApiOk<Vec<VisitRow>>>, ApiError> {
    let sql = format!(
        r#"
        SELECT {VISIT_COLUMNS}
        FROM visit
        WHERE ($1::uuid IS NULL OR patient_id = $1)
        ORDER BY created_at DESC
        "#
    );

    let rows = sqlx::query_as::<_, VisitRow>(&sql)
        .bind(q.patient)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn get_visit(
    State(state): State<AppState>,
    _staff: StaffContext,
    Path(visit_id): Path<Uuid>,
) -> Result<Json<ApiOk<VisitRow>>, ApiError> {
    let data = load_visit(&state.db, visit_id).await?;
    Ok(Json(ApiOk { data }))
}

/* ============================================================
   POST /visits
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateVisitRequest {
    pub patient_id: Uuid,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub diagnosis: Option<String>,
    #[serde(flatten)]
    pub vitals: Vitals,
}

pub async fn create_visit(
    State(state): State<AppState>,
    staff: StaffContext,
    Json(req): Json<CreateVisitRequest>,
) -> Result<(StatusCode, Json<ApiOk<VisitRow>>), ApiError> {
    staff.require(staff.is_clinician(), "Only doctors and admins can record visits")?;
    req.vitals.validate()?;
    ensure_patient_exists(&state.db, req.patient_id).await?;

    let v = req.vitals;
    let sql = format!(
        r#"
        INSERT INTO visit (
          patient_id, reason, notes, diagnosis,
          weight_kg, height_cm, temperature_c, bp_systolic, bp_diastolic, head_circumference_cm,
          created_by_user_id
        )
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
        RETURNING {VISIT_COLUMNS}
        "#
    );

    let row = sqlx::query_as::<_, VisitRow>(&sql)
        .bind(req.patient_id)
        .bind(req.reason.as_deref().map(str::trim).unwrap_or(""))
        .bind(req.notes.as_deref().unwrap_or(""))
        .bind(req.diagnosis.as_deref().map(str::trim).unwrap_or(""))
        .bind(v.weight_kg)
        .bind(v.height_cm)
        .bind(v.temperature_c)
        .bind(v.bp_systolic)
        .bind(v.bp_diastolic)
        .bind(v.head_circumference_cm)
        .bind(staff.user_id)
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;

    tracing::info!(visit_id = %row.visit_id, user_id = %staff.user_id, "visit recorded");
    Ok((StatusCode::CREATED, Json(ApiOk { data: row })))
}

/* ============================================================
   PATCH /visits/{id}
   ============================================================ */

#[derive(Debug, Default, Deserialize)]
pub struct PatchVisitRequest {
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub diagnosis: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub weight_kg: Option<Option<f64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub height_cm: Option<Option<f64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub temperature_c: Option<Option<f64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub bp_systolic: Option<Option<i16>>,
    #[serde(default, deserialize_with = "nullable")]
    pub bp_diastolic: Option<Option<i16>>,
    #[serde(default, deserialize_with = "nullable")]
    pub head_circumference_cm: Option<Option<f64>>,
}

#[derive(Debug, PartialEq)]
struct VisitChanges {
    reason: String,
    notes: String,
    diagnosis: String,
    vitals: Vitals,
}

impl PatchVisitRequest {
    fn apply(self, current: &VisitRow) -> Result<VisitChanges, ApiError> {
        let was = current.vitals;
        let vitals = Vitals {
            weight_kg: self.weight_kg.unwrap_or(was.weight_kg),
            height_cm: self.height_cm.unwrap_or(was.height_cm),
            temperature_c: self.temperature_c.unwrap_or(was.temperature_c),
            bp_systolic: self.bp_systolic.unwrap_or(was.bp_systolic),
            bp_diastolic: self.bp_diastolic.unwrap_or(was.bp_diastolic),
            head_circumference_cm: self
                .head_circumference_cm
                .unwrap_or(was.head_circumference_cm),
        };
        vitals.validate()?;

        Ok(VisitChanges {
            reason: self
                .reason
                .map(|r| r.trim().to_string())
                .unwrap_or_else(|| current.reason.clone()),
            notes: self.notes.unwrap_or_else(|| current.notes.clone()),
            diagnosis: self
                .diagnosis
                .map(|d| d.trim().to_string())
                .unwrap_or_else(|| current.diagnosis.clone()),
            vitals,
        })
    }
}

pub async fn patch_visit(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(visit_id): Path<Uuid>,
    Json(req): Json<PatchVisitRequest>,
) -> Result<Json<ApiOk<VisitRow>>, ApiError> {
    let current = load_editable_visit(&state.db, &staff, visit_id).await?;
    let changes = req.apply(&current)?;
    let v = changes.vitals;

    let sql = format!(
        r#"
        UPDATE visit
        SET reason = $2,
            notes = $3,
            diagnosis = $4,
            weight_kg = $5,
            height_cm = $6,
            temperature_c = $7,
            bp_systolic = $8,
            bp_diastolic = $9,
            head_circumference_cm = $10,
            updated_at = now()
        WHERE visit_id = $1
        RETURNING {VISIT_COLUMNS}
        "#
    );

    let row = sqlx::query_as::<_, VisitRow>(&sql)
        .bind(visit_id)
        .bind(&changes.reason)
        .bind(&changes.notes)
        .bind(&changes.diagnosis)
        .bind(v.weight_kg)
        .bind(v.height_cm)
        .bind(v.temperature_c)
        .bind(v.bp_systolic)
        .bind(v.bp_diastolic)
        .bind(v.head_circumference_cm)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "visit not found".into()))?;

    Ok(Json(ApiOk { data: row }))
}

/* ============================================================
   DELETE /visits/{id}
   ============================================================ */

pub async fn delete_visit(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(visit_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    load_editable_visit(&state.db, &staff, visit_id).await?;

    sqlx::query("DELETE FROM visit WHERE visit_id = $1")
        .bind(visit_id)
        .execute(&state.db)
        .await
        .map_err(|e| delete_error(e, "visit"))?;

    tracing::info!(%visit_id, user_id = %staff.user_id, "visit deleted");
    Ok(StatusCode::NO_CONTENT)
}
