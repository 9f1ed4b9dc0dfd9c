// One reminder run, for platform cron jobs that execute a command.
//
// Usage: send_reminders

use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clinic_reminders::{
    config::Config,
    db,
    reminders::{PgReminderStore, ReminderJob, RunLog},
    sms::SmsGateway,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url, cfg.db_max_connections).await?;

    let job = ReminderJob::new(
        PgReminderStore::new(pool),
        Arc::new(SmsGateway::new(cfg.sms.clone())),
        cfg.reminders.clone(),
    );

    let mut log = RunLog::default();
    let result = job.run(Utc::now(), &mut log).await;

    for line in log.lines() {
        println!("{line}");
    }

    match result {
        Ok(summary) if summary.is_clean() => Ok(ExitCode::SUCCESS),
        Ok(_) => Ok(ExitCode::FAILURE),
        Err(err) => {
            eprintln!("{err}");
            Ok(ExitCode::FAILURE)
        }
    }
}
