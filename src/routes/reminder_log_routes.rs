// src/routes/reminder_log_routes.rs

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::StaffContext,
    models::{AppState, DeliveryLogRow},
    reminders::store::delivery_logs_for,
    routes::ApiOk,
};

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/appointments/{appointment_id}/reminder_logs",
        get(list_reminder_logs),
    )
}

pub async fn list_reminder_logs(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<DeliveryLogRow>>>, ApiError> {
    tracing::debug!(user_id = %staff.user_id, %appointment_id, "listing reminder logs");

    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1
            FROM appointment
            WHERE appointment_id = $1
        )
        "#,
    )
    .bind(appointment_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    if !exists {
        return Err(ApiError::NotFound("NOT_FOUND", "appointment not found".into()));
    }

    let rows = delivery_logs_for(&state.db, appointment_id)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}
