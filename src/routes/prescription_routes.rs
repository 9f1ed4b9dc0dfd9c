// src/routes/prescription_routes.rs

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::StaffContext,
    models::AppState,
    routes::{visit_routes::load_editable_visit, ApiOk},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/prescriptions", get(list_prescriptions).post(create_prescription))
        .route(
            "/prescriptions/{prescription_id}",
            get(get_prescription)
                .patch(patch_prescription)
                .delete(delete_prescription),
        )
}

/* ============================================================
   DTOs
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct PrescriptionDto {
    pub prescription_id: Uuid,
    pub visit_id: Uuid,
    pub notes: String,
    pub items: Vec<PrescriptionItemRow>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct PrescriptionRow {
    prescription_id: Uuid,
    visit_id: Uuid,
    notes: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PrescriptionItemRow {
    pub item_id: Uuid,
    #[serde(skip)]
    pub prescription_id: Uuid,
    pub medication_name: String,
    pub dosage: String,
    pub route: String,
    pub frequency: String,
    pub duration: String,
    pub instructions: String,
    pub allow_outside_purchase: bool,
}

/// One medication line as sent by the client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PrescriptionItemInput {
    pub medication_name: String,
    pub dosage: String,
    pub route: String,
    pub frequency: String,
    pub duration: String,
    pub instructions: String,
    pub allow_outside_purchase: bool,
}

impl PrescriptionItemInput {
    fn cleaned(self, line: usize) -> Result<Self, ApiError> {
        let medication_name = self.medication_name.trim().to_string();
        if medication_name.is_empty() {
            return Err(ApiError::validation(format!(
                "items[{line}].medication_name is required"
            )));
        }
        Ok(PrescriptionItemInput {
            medication_name,
            dosage: self.dosage.trim().to_string(),
            route: self.route.trim().to_string(),
            frequency: self.frequency.trim().to_string(),
            duration: self.duration.trim().to_string(),
            instructions: self.instructions.trim().to_string(),
            allow_outside_purchase: self.allow_outside_purchase,
        })
    }
}

fn clean_items(items: Vec<PrescriptionItemInput>) -> Result<Vec<PrescriptionItemInput>, ApiError> {
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| item.cleaned(i))
        .collect()
}

/// Attach item rows (already in line order) to their prescriptions.
fn fold_items(
    rows: Vec<PrescriptionRow>,
    items: Vec<PrescriptionItemRow>,
) -> Vec<PrescriptionDto> {
    let mut by_prescription: HashMap<Uuid, Vec<PrescriptionItemRow>> = HashMap::new();
    for item in items {
        by_prescription
            .entry(item.prescription_id)
            .or_default()
            .push(item);
    }

    rows.into_iter()
        .map(|r| PrescriptionDto {
            items: by_prescription.remove(&r.prescription_id).unwrap_or_default(),
            prescription_id: r.prescription_id,
            visit_id: r.visit_id,
            notes: r.notes,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
        .collect()
}

async fn load_items(db: &PgPool, prescription_ids: &[Uuid]) -> Result<Vec<PrescriptionItemRow>, ApiError> {
    sqlx::query_as::<_, PrescriptionItemRow>(
        r#"
        SELECT item_id, prescription_id, medication_name, dosage, route,
               frequency, duration, instructions, allow_outside_purchase
        FROM prescription_item
        WHERE prescription_id = ANY($1)
        ORDER BY prescription_id, line_no
        "#,
    )
    .bind(prescription_ids)
    .fetch_all(db)
    .await
    .map_err(ApiError::db)
}

async fn load_prescription(db: &PgPool, prescription_id: Uuid) -> Result<PrescriptionDto, ApiError> {
    let row = sqlx::query_as::<_, PrescriptionRow>(
        r#"
        SELECT prescription_id, visit_id, notes, created_at, updated_at
        FROM prescription
        WHERE prescription_id = $1
        "#,
    )
    .bind(prescription_id)
    .fetch_optional(db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "prescription not found".into()))?;

    let items = load_items(db, &[prescription_id]).await?;
    fold_items(vec![row], items)
        .pop()
        .ok_or_else(|| ApiError::Internal("prescription lost while loading items".into()))
}

async fn insert_items(
    tx: &mut Transaction<'_, Postgres>,
    prescription_id: Uuid,
    items: &[PrescriptionItemInput],
) -> Result<(), ApiError> {
    for (line_no, it) in items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO prescription_item (
              prescription_id, line_no, medication_name, dosage, route,
              frequency, duration, instructions, allow_outside_purchase
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            "#,
        )
        .bind(prescription_id)
        .bind(line_no as i32)
        .bind(&it.medication_name)
        .bind(&it.dosage)
        .bind(&it.route)
        .bind(&it.frequency)
        .bind(&it.duration)
        .bind(&it.instructions)
        .bind(it.allow_outside_purchase)
        .execute(&mut **tx)
        .await
        .map_err(|e| ApiError::BadRequest("PRESCRIPTION_ITEM_CREATE_FAILED", format!("{e}")))?;
    }
    Ok(())
}

/* ============================================================
   GET /prescriptions
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct PrescriptionListQuery {
    pub visit: Option<Uuid>,
}

pub async fn list_prescriptions(
    State(state): State<AppState>,
    _staff: StaffContext,
    Query(q): Query<PrescriptionListQuery>,
) -> Result<Json<ApiOk<Vec<PrescriptionDto>>>, ApiError> {
    let rows = sqlx::query_as::<_, PrescriptionRow>(
        r#"
        SELECT prescription_id, visit_id, notes, created_at, updated_at
        FROM prescription
        WHERE ($1::uuid IS NULL OR visit_id = $1)
        ORDER BY created_at DESC
        LIMIT 200
        "#,
    )
    .bind(q.visit)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let ids: Vec<Uuid> = rows.iter().map(|r| r.prescription_id).collect();
    let items = load_items(&state.db, &ids).await?;

    Ok(Json(ApiOk { data: fold_items(rows, items) }))
}

pub async fn get_prescription(
    State(state): State<AppState>,
    _staff: StaffContext,
    Path(prescription_id): Path<Uuid>,
) -> Result<Json<ApiOk<PrescriptionDto>>, ApiError> {
    let data = load_prescription(&state.db, prescription_id).await?;
    Ok(Json(ApiOk { data }))
}

/* ============================================================
   POST /prescriptions
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreatePrescriptionRequest {
    pub visit_id: Uuid,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub items: Vec<PrescriptionItemInput>,
}

pub async fn create_prescription(
    State(state): State<AppState>,
    staff: StaffContext,
    Json(req): Json<CreatePrescriptionRequest>,
) -> Result<(StatusCode, Json<ApiOk<PrescriptionDto>>), ApiError> {
    let items = clean_items(req.items)?;
    load_editable_visit(&state.db, &staff, req.visit_id).await?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let prescription_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO prescription (visit_id, notes)
        VALUES ($1, $2)
        RETURNING prescription_id
        "#,
    )
    .bind(req.visit_id)
    .bind(&req.notes)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::BadRequest("PRESCRIPTION_CREATE_FAILED", format!("{e}")))?;

    insert_items(&mut tx, prescription_id, &items).await?;
    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%prescription_id, items = items.len(), user_id = %staff.user_id, "prescription created");

    let data = load_prescription(&state.db, prescription_id).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data })))
}

/* ============================================================
   PATCH /prescriptions/{id}
   ============================================================ */

/// `items`, when present, replaces every line of the prescription.
#[derive(Debug, Default, Deserialize)]
pub struct PatchPrescriptionRequest {
    pub notes: Option<String>,
    pub items: Option<Vec<PrescriptionItemInput>>,
}

pub async fn patch_prescription(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(prescription_id): Path<Uuid>,
    Json(req): Json<PatchPrescriptionRequest>,
) -> Result<Json<ApiOk<PrescriptionDto>>, ApiError> {
    let items = req.items.map(clean_items).transpose()?;
    let current = load_prescription(&state.db, prescription_id).await?;
    load_editable_visit(&state.db, &staff, current.visit_id).await?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    sqlx::query(
        r#"
        UPDATE prescription
        SET notes = COALESCE($2, notes),
            updated_at = now()
        WHERE prescription_id = $1
        "#,
    )
    .bind(prescription_id)
    .bind(req.notes)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    if let Some(items) = &items {
        sqlx::query("DELETE FROM prescription_item WHERE prescription_id = $1")
            .bind(prescription_id)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::db)?;
        insert_items(&mut tx, prescription_id, items).await?;
    }

    tx.commit().await.map_err(ApiError::db)?;

    let data = load_prescription(&state.db, prescription_id).await?;
    Ok(Json(ApiOk { data }))
}

/* ============================================================
   DELETE /prescriptions/{id}
   ============================================================ */

pub async fn delete_prescription(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(prescription_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let current = load_prescription(&state.db, prescription_id).await?;
    load_editable_visit(&state.db, &staff, current.visit_id).await?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;
    sqlx::query("DELETE FROM prescription_item WHERE prescription_id = $1")
        .bind(prescription_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;
    sqlx::query("DELETE FROM prescription WHERE prescription_id = $1")
        .bind(prescription_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;
    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%prescription_id, user_id = %staff.user_id, "prescription deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: u128) -> PrescriptionRow {
        PrescriptionRow {
            prescription_id: Uuid::from_u128(id),
            visit_id: Uuid::from_u128(100),
            notes: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn item(prescription: u128, name: &str) -> PrescriptionItemRow {
        PrescriptionItemRow {
            item_id: Uuid::new_v4(),
            prescription_id: Uuid::from_u128(prescription),
            medication_name: name.into(),
            dosage: String::new(),
            route: String::new(),
            frequency: String::new(),
            duration: String::new(),
            instructions: String::new(),
            allow_outside_purchase: false,
        }
    }

    #[test]
    fn test_items_are_trimmed_and_require_a_name() {
        let items: Vec<PrescriptionItemInput> = serde_json::from_str(
            r#"[
                {"medication_name": " Amoxicilline ", "dosage": "250 mg", "frequency": "3x/jour"},
                {"medication_name": "Paracétamol", "allow_outside_purchase": true}
            ]"#,
        )
        .unwrap();
        let cleaned = clean_items(items).unwrap();
        assert_eq!(cleaned[0].medication_name, "Amoxicilline");
        assert_eq!(cleaned[0].route, "");
        assert!(cleaned[1].allow_outside_purchase);

        let missing = vec![
            PrescriptionItemInput { medication_name: "ORS".into(), ..Default::default() },
            PrescriptionItemInput { medication_name: "  ".into(), ..Default::default() },
        ];
        let err = clean_items(missing).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest("VALIDATION_ERROR", ref m) if m.contains("items[1]")));
    }

    #[test]
    fn test_fold_keeps_line_order_per_prescription() {
        let folded = fold_items(
            vec![row(2), row(1)],
            vec![item(1, "ORS"), item(2, "Zinc"), item(1, "Amoxicilline")],
        );

        assert_eq!(folded.len(), 2);
        assert_eq!(folded[0].prescription_id, Uuid::from_u128(2));
        let names: Vec<&str> = folded[1].items.iter().map(|i| i.medication_name.as_str()).collect();
        assert_eq!(names, ["ORS", "Amoxicilline"]);
    }

    #[test]
    fn test_prescription_without_items_has_empty_list() {
        let folded = fold_items(vec![row(3)], vec![]);
        assert!(folded[0].items.is_empty());
    }

    #[test]
    fn test_patch_without_items_keeps_lines() {
        let req: PatchPrescriptionRequest = serde_json::from_str(r#"{"notes": "à jeun"}"#).unwrap();
        assert!(req.items.is_none());

        let req: PatchPrescriptionRequest = serde_json::from_str(r#"{"items": []}"#).unwrap();
        assert_eq!(req.items.map(|i| i.len()), Some(0));
    }
}
