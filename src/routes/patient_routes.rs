// src/routes/patient_routes.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::StaffContext,
    models::AppState,
    phone,
    routes::{appointment_routes::delete_error, ApiOk},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PatientRow {
    pub patient_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub sex: String,
    pub date_of_birth: NaiveDate,
    pub phone: String,
    pub address: String,
    pub is_active: bool,
    #[serde(skip)]
    pub created_by_user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

// phone may be NULL in older rows
const PATIENT_COLUMNS: &str = r#"
    patient_id, first_name, last_name, sex, date_of_birth, COALESCE(phone, '') AS phone,
    address, is_active, created_by_user_id, created_at
"#;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients", get(list_patients).post(create_patient))
        .route(
            "/patients/{patient_id}",
            get(get_patient).patch(update_patient).delete(delete_patient),
        )
}

/// Front desk sees every patient; other staff only the ones they registered.
fn can_access(staff: &StaffContext, patient: &PatientRow) -> bool {
    staff.is_front_desk() || patient.created_by_user_id == staff.user_id
}

async fn load_patient(
    db: &PgPool,
    staff: &StaffContext,
    patient_id: Uuid,
) -> Result<PatientRow, ApiError> {
    let sql = format!("SELECT {PATIENT_COLUMNS} FROM patient WHERE patient_id = $1");
    let row = sqlx::query_as::<_, PatientRow>(&sql)
        .bind(patient_id)
        .fetch_optional(db)
        .await
        .map_err(ApiError::db)?;

    // someone else's patient is reported as missing
    match row {
        Some(p) if can_access(staff, &p) => Ok(p),
        _ => Err(ApiError::NotFound("NOT_FOUND", "patient not found".into())),
    }
}

pub(crate) async fn ensure_patient_exists(db: &PgPool, patient_id: Uuid) -> Result<(), ApiError> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1
            FROM patient
            WHERE patient_id = $1
        )
        "#,
    )
    .bind(patient_id)
    .fetch_one(db)
    .await
    .map_err(ApiError::db)?;

    if exists {
        Ok(())
    } else {
        Err(ApiError::validation("patient_id does not match any patient"))
    }
}

/* ============================================================
   Validation
   ============================================================ */

fn required(field: &str, value: &str) -> Result<String, ApiError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ApiError::validation(format!("{field} is required")));
    }
    Ok(v.to_string())
}

fn validate_sex(sex: &str) -> Result<String, ApiError> {
    match sex.trim() {
        "M" | "F" => Ok(sex.trim().to_string()),
        _ => Err(ApiError::validation("sex must be M or F")),
    }
}

fn validate_birth_date(date_of_birth: NaiveDate, today: NaiveDate) -> Result<NaiveDate, ApiError> {
    if date_of_birth > today {
        return Err(ApiError::validation("date_of_birth cannot be in the future"));
    }
    Ok(date_of_birth)
}

/// Phone is optional (a child may not have one); when given it is stored in
/// canonical `+243…` form so reminders can reach it.
pub fn clean_phone(raw: &str) -> Result<String, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(String::new());
    }
    phone::normalize(raw)
        .map(|p| p.into_string())
        .ok_or_else(|| ApiError::validation("phone is not a valid phone number"))
}

/* ============================================================
   GET /patients
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct PatientListQuery {
    pub q: Option<String>,
    pub include_inactive: Option<bool>,
}

pub async fn list_patients(
    State(state): State<AppState>,
    staff: StaffContext,
    Query(q): Query<PatientListQuery>,
) -> Result<Json<ApiOk<Vec<PatientRow>>>, ApiError> {
    let term = q
        .q
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{s}%"));
    let owner = (!staff.is_front_desk()).then_some(staff.user_id);

    let sql = format!(
        r#"
        SELECT {PATIENT_COLUMNS}
        FROM patient
        WHERE ($1::uuid IS NULL OR created_by_user_id = $1)
          AND ($2 OR is_active = true)
          AND ($3::text IS NULL OR first_name ILIKE $3 OR last_name ILIKE $3 OR phone ILIKE $3)
        ORDER BY last_name, first_name
        LIMIT 200
        "#
    );

    let rows = sqlx::query_as::<_, PatientRow>(&sql)
        .bind(owner)
        .bind(q.include_inactive.unwrap_or(false))
        .bind(term)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

/* ============================================================
   POST /patients
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreatePatientRequest {
    pub first_name: String,
    pub last_name: String,
    pub sex: String,
    pub date_of_birth: NaiveDate,
    pub phone: Option<String>,
    pub address: String,
}

#[derive(Debug, PartialEq)]
struct PatientFields {
    first_name: String,
    last_name: String,
    sex: String,
    date_of_birth: NaiveDate,
    phone: String,
    address: String,
    is_active: bool,
}

impl CreatePatientRequest {
    fn validate(self, today: NaiveDate) -> Result<PatientFields, ApiError> {
        Ok(PatientFields {
            first_name: required("first_name", &self.first_name)?,
            last_name: required("last_name", &self.last_name)?,
            sex: validate_sex(&self.sex)?,
            date_of_birth: validate_birth_date(self.date_of_birth, today)?,
            phone: clean_phone(self.phone.as_deref().unwrap_or(""))?,
            address: required("address", &self.address)?,
            is_active: true,
        })
    }
}

pub async fn create_patient(
    State(state): State<AppState>,
    staff: StaffContext,
    Json(req): Json<CreatePatientRequest>,
) -> Result<(StatusCode, Json<ApiOk<PatientRow>>), ApiError> {
    let fields = req.validate(Utc::now().date_naive())?;

    let sql = format!(
        r#"
        INSERT INTO patient (first_name, last_name, sex, date_of_birth, phone, address, is_active, created_by_user_id)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
        RETURNING {PATIENT_COLUMNS}
        "#
    );

    let row = sqlx::query_as::<_, PatientRow>(&sql)
        .bind(&fields.first_name)
        .bind(&fields.last_name)
        .bind(&fields.sex)
        .bind(fields.date_of_birth)
        .bind(&fields.phone)
        .bind(&fields.address)
        .bind(fields.is_active)
        .bind(staff.user_id)
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;

    tracing::info!(patient_id = %row.patient_id, user_id = %staff.user_id, "patient created");
    Ok((StatusCode::CREATED, Json(ApiOk { data: row })))
}

/* ============================================================
   GET /patients/{id}
   ============================================================ */

pub async fn get_patient(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    let data = load_patient(&state.db, &staff, patient_id).await?;
    Ok(Json(ApiOk { data }))
}

/* ============================================================
   PATCH /patients/{id}
   ============================================================ */

#[derive(Debug, Default, Deserialize)]
pub struct UpdatePatientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub sex: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    // "" or null clears it
    #[serde(default, deserialize_with = "crate::routes::nullable")]
    pub phone: Option<Option<String>>,
    pub address: Option<String>,
    pub is_active: Option<bool>,
}

impl UpdatePatientRequest {
    fn apply(self, existing: &PatientRow, today: NaiveDate) -> Result<PatientFields, ApiError> {
        let phone = match self.phone {
            None => existing.phone.clone(),
            Some(p) => clean_phone(p.as_deref().unwrap_or(""))?,
        };

        Ok(PatientFields {
            first_name: match self.first_name {
                Some(s) => required("first_name", &s)?,
                None => existing.first_name.clone(),
            },
            last_name: match self.last_name {
                Some(s) => required("last_name", &s)?,
                None => existing.last_name.clone(),
            },
            sex: match self.sex {
                Some(s) => validate_sex(&s)?,
                None => existing.sex.clone(),
            },
            date_of_birth: match self.date_of_birth {
                Some(d) => validate_birth_date(d, today)?,
                None => existing.date_of_birth,
            },
            phone,
            address: match self.address {
                Some(s) => required("address", &s)?,
                None => existing.address.clone(),
            },
            is_active: self.is_active.unwrap_or(existing.is_active),
        })
    }
}

pub async fn update_patient(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<UpdatePatientRequest>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    let existing = load_patient(&state.db, &staff, patient_id).await?;
    let fields = req.apply(&existing, Utc::now().date_naive())?;

    let sql = format!(
        r#"
        UPDATE patient
        SET first_name = $1,
            last_name = $2,
            sex = $3,
            date_of_birth = $4,
            phone = $5,
            address = $6,
            is_active = $7
        WHERE patient_id = $8
        RETURNING {PATIENT_COLUMNS}
        "#
    );

    let updated = sqlx::query_as::<_, PatientRow>(&sql)
        .bind(&fields.first_name)
        .bind(&fields.last_name)
        .bind(&fields.sex)
        .bind(fields.date_of_birth)
        .bind(&fields.phone)
        .bind(&fields.address)
        .bind(fields.is_active)
        .bind(patient_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "patient not found".into()))?;

    Ok(Json(ApiOk { data: updated }))
}

/* ============================================================
   DELETE /patients/{id}
   ============================================================ */

pub async fn delete_patient(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(patient_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    load_patient(&state.db, &staff, patient_id).await?;

    sqlx::query("DELETE FROM patient WHERE patient_id = $1")
        .bind(patient_id)
        .execute(&state.db)
        .await
        .map_err(|e| delete_error(e, "patient"))?;

    tracing::info!(%patient_id, user_id = %staff.user_id, "patient deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth_context::{ROLE_DOCTOR, ROLE_RECEPTIONIST};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    fn existing(created_by: Uuid) -> PatientRow {
        PatientRow {
            patient_id: Uuid::from_u128(1),
            first_name: "Marie".into(),
            last_name: "KABILA".into(),
            sex: "F".into(),
            date_of_birth: NaiveDate::from_ymd_opt(2019, 5, 2).unwrap(),
            phone: "+243812345678".into(),
            address: "Av. de la Paix 12, Kinshasa".into(),
            is_active: true,
            created_by_user_id: created_by,
            created_at: Utc::now(),
        }
    }

    fn create_body(phone: Option<&str>) -> CreatePatientRequest {
        CreatePatientRequest {
            first_name: " Marie ".into(),
            last_name: "KABILA".into(),
            sex: "F".into(),
            date_of_birth: NaiveDate::from_ymd_opt(2019, 5, 2).unwrap(),
            phone: phone.map(str::to_string),
            address: "Av. de la Paix 12".into(),
        }
    }

    #[test]
    fn test_phone_is_stored_canonical() {
        assert_eq!(clean_phone("0812 345 678").unwrap(), "+243812345678");
        assert_eq!(clean_phone("  ").unwrap(), "");
        let err = clean_phone("12ab").unwrap_err();
        assert!(matches!(err, ApiError::BadRequest("VALIDATION_ERROR", _)));
    }

    #[test]
    fn test_create_validation() {
        let fields = create_body(Some("0812345678")).validate(today()).unwrap();
        assert_eq!(fields.first_name, "Marie");
        assert_eq!(fields.phone, "+243812345678");
        assert!(fields.is_active);

        // a child without a phone
        assert_eq!(create_body(None).validate(today()).unwrap().phone, "");

        let mut bad_sex = create_body(None);
        bad_sex.sex = "X".into();
        assert!(bad_sex.validate(today()).is_err());

        let mut unborn = create_body(None);
        unborn.date_of_birth = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        assert!(unborn.validate(today()).is_err());

        let mut no_address = create_body(None);
        no_address.address = "   ".into();
        assert!(no_address.validate(today()).is_err());
    }

    #[test]
    fn test_update_keeps_absent_fields_and_clears_phone() {
        let row = existing(Uuid::nil());

        let req: UpdatePatientRequest = serde_json::from_str(r#"{"phone": null}"#).unwrap();
        let fields = req.apply(&row, today()).unwrap();
        assert_eq!(fields.phone, "");
        assert_eq!(fields.first_name, "Marie");

        let req: UpdatePatientRequest =
            serde_json::from_str(r#"{"phone": "0998877665", "is_active": false}"#).unwrap();
        let fields = req.apply(&row, today()).unwrap();
        assert_eq!(fields.phone, "+243998877665");
        assert!(!fields.is_active);

        let untouched = UpdatePatientRequest::default().apply(&row, today()).unwrap();
        assert_eq!(untouched.phone, row.phone);

        let req: UpdatePatientRequest = serde_json::from_str(r#"{"first_name": ""}"#).unwrap();
        assert!(req.apply(&row, today()).is_err());
    }

    #[test]
    fn test_doctors_only_reach_their_own_patients() {
        let doctor = StaffContext { user_id: Uuid::from_u128(9), role: ROLE_DOCTOR };
        let desk = StaffContext { user_id: Uuid::from_u128(5), role: ROLE_RECEPTIONIST };

        assert!(can_access(&doctor, &existing(Uuid::from_u128(9))));
        assert!(!can_access(&doctor, &existing(Uuid::from_u128(5))));
        assert!(can_access(&desk, &existing(Uuid::from_u128(9))));
    }
}
