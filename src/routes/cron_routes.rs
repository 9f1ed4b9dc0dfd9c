// src/routes/cron_routes.rs

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    auth::cron_token_matches,
    error::{ApiError, ReminderError},
    models::AppState,
    reminders::{PgReminderStore, ReminderJob, RunLog, RunSummary},
    routes::ApiOk,
};

// Hit by the hosting platform's scheduler as `?token=<CRON_SECRET_TOKEN>`.
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/appointments/cron/send-reminders",
        get(send_reminders).post(send_reminders),
    )
}

#[derive(Debug, Deserialize)]
pub struct CronQuery {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CronRunData {
    pub ok: bool,
    pub output: String,
    pub summary: RunSummary,
}

pub async fn send_reminders(
    State(state): State<AppState>,
    Query(q): Query<CronQuery>,
) -> Result<Json<ApiOk<CronRunData>>, ApiError> {
    if !cron_token_matches(q.token.as_deref(), &state.cron_secret_token) {
        tracing::warn!("reminder trigger rejected: bad token");
        return Err(ApiError::invalid_cron_token());
    }

    let Ok(running) = state.run_guard.clone().try_lock_owned() else {
        return Err(ApiError::Conflict(
            "RUN_IN_PROGRESS",
            "a reminder run is already in progress".into(),
        ));
    };

    let job = ReminderJob::new(
        PgReminderStore::new(state.db.clone()),
        state.gateway.clone(),
        state.reminders.clone(),
    );

    // the guard moves into the task: a dropped request must not release it early,
    // and a panic inside the job surfaces as a JoinError
    let (result, log) = tokio::spawn(async move {
        let _running = running;
        let mut log = RunLog::default();
        let result = job.run(Utc::now(), &mut log).await;
        (result, log)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("reminder job crashed: {e}")))?;

    run_response(result, &log).map(Json)
}

fn run_response(
    result: Result<RunSummary, ReminderError>,
    log: &RunLog,
) -> Result<ApiOk<CronRunData>, ApiError> {
    match result {
        Ok(summary) => Ok(ApiOk {
            data: CronRunData {
                ok: summary.is_clean(),
                output: log.output(),
                summary,
            },
        }),
        Err(err) => {
            tracing::error!("reminder run failed: {err}");
            Err(ApiError::from(err).with_output(log.output()))
        }
    }
}
