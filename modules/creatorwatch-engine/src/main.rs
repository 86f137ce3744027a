use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use apify_client::ApifyClient;
use brevo_client::BrevoClient;
use creatorwatch_common::{AppConfig, PipelineResult, SourceKind};
use creatorwatch_engine::alert::{NoopBackend, NotifyBackend, SlackWebhook};
use creatorwatch_engine::scheduler;
use creatorwatch_engine::traits::ApifyActorSource;
use creatorwatch_engine::{Pipeline, PipelineSettings};
use creatorwatch_store::PgStore;

#[derive(Parser, Debug)]
#[command(name = "creatorwatch", about = "Daily TikTok creator report pipeline")]
struct Cli {
    /// Send the report email even if it was already sent for this date.
    #[arg(long)]
    resend_email: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_tracing()?;

    info!("creatorwatch starting...");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    // Migrations and lock sweep once at startup; each run then gets its own connection.
    let store = PgStore::connect(&config.database_url).await?;
    store.migrate().await?;
    let swept = store.sweep_expired_locks(Utc::now()).await?;
    if swept > 0 {
        info!(swept, "Removed expired run locks");
    }
    store.close().await;

    let notifier: Arc<dyn NotifyBackend> = match &config.slack_webhook_url {
        Some(url) => {
            info!("Slack alerts enabled");
            Arc::new(SlackWebhook::new(url.clone()))
        }
        None => {
            info!("No SLACK_WEBHOOK_URL set, alerts go to the log only");
            Arc::new(NoopBackend)
        }
    };

    if config.run_once {
        let result = run_pipeline(&config, notifier, cli.resend_email).await?;
        info!("Run complete. {result}");
        return one_shot_exit(&result);
    }

    if config.run_on_startup {
        match run_pipeline(&config, notifier.clone(), cli.resend_email).await {
            Ok(result) => info!("Startup run complete. {result}"),
            Err(e) => warn!(error = %e, "Startup run could not start"),
        }
    }

    info!(hour = config.schedule_hour, timezone = %config.timezone, "Scheduler started");
    scheduler::run_daily(config.timezone, config.schedule_hour, || {
        let config = &config;
        let notifier = notifier.clone();
        async move {
            // A forced resend applies to the first run only.
            match run_pipeline(config, notifier, false).await {
                Ok(result) => info!("Scheduled run complete. {result}"),
                Err(e) => warn!(error = %e, "Scheduled run could not start"),
            }
        }
    })
    .await;

    Ok(())
}

/// A one-shot run exits non-zero on failure so cron and process supervisors see it.
/// Lock release and store close have already happened inside the pipeline.
fn one_shot_exit(result: &PipelineResult) -> Result<()> {
    if result.success {
        return Ok(());
    }
    let reason = result.error.as_deref().unwrap_or("unknown error");
    error!(error = reason, "Pipeline run failed");
    anyhow::bail!("pipeline run failed: {reason}")
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("creatorwatch=info".parse()?);
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

/// Connect, build the pipeline and run it for yesterday. Errors only when the
/// store cannot be reached; everything after that is folded into the result.
async fn run_pipeline(
    config: &AppConfig,
    notifier: Arc<dyn NotifyBackend>,
    force_resend: bool,
) -> Result<PipelineResult> {
    let store = Arc::new(PgStore::connect(&config.database_url).await?);

    let primary = ApifyActorSource::new(
        ApifyClient::new(config.apify_token.clone()),
        config.primary_actor_id.clone(),
        SourceKind::Primary,
    );
    let fallback = ApifyActorSource::new(
        ApifyClient::new(config.apify_token.clone()),
        config.fallback_actor_id.clone(),
        SourceKind::Fallback,
    );

    let mut pipeline = Pipeline::new(
        PipelineSettings::from_config(config, force_resend),
        store,
        Arc::new(primary),
        Arc::new(fallback),
        notifier,
    );
    if let Some(email) = &config.email {
        let mailer = BrevoClient::new(email.brevo_api_key.clone());
        pipeline = pipeline.with_email(Arc::new(mailer), email.clone());
    }

    Ok(pipeline.run().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_one_shot_exits_cleanly() {
        let result = PipelineResult {
            success: true,
            ..Default::default()
        };
        assert!(one_shot_exit(&result).is_ok());
    }

    #[test]
    fn failed_one_shot_exits_with_error() {
        let result = PipelineResult {
            success: false,
            error: Some("upsert_records failed".into()),
            ..Default::default()
        };
        let err = one_shot_exit(&result).unwrap_err();
        assert!(err.to_string().contains("upsert_records failed"));
    }

    #[test]
    fn skipped_lock_counts_as_success() {
        let result = PipelineResult {
            success: true,
            lock_active: true,
            ..Default::default()
        };
        assert!(one_shot_exit(&result).is_ok());
    }
}
