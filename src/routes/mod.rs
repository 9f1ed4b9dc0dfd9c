use crate::models::AppState;
use axum::Router;
use serde::{Deserialize, Deserializer, Serialize};

pub mod appointment_routes;
pub mod cron_routes;
pub mod patient_routes;
pub mod prescription_routes;
pub mod reminder_log_routes;
pub mod visit_routes;

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

/// For PATCH bodies: absent -> `None`, `null` -> `Some(None)`.
/// Use with `#[serde(default, deserialize_with = "nullable")]`.
pub(crate) fn nullable<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(appointment_routes::router())
        .merge(cron_routes::router())
        .merge(reminder_log_routes::router())
        .merge(patient_routes::router())
        .merge(visit_routes::router())
        .merge(prescription_routes::router());

    Router::new().nest("/api/v1", api).with_state(state)
}
