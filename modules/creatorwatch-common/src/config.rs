use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;

use crate::error::ConfigError;

pub const DEFAULT_PRIMARY_ACTOR_ID: &str = "apidojo/tiktok-profile-scraper";
pub const DEFAULT_FALLBACK_ACTOR_ID: &str = "clockworks/tiktok-profile-scraper";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Transactional email settings. Present only when the whole block is configured.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailConfig {
    pub brevo_api_key: String,
    pub from: String,
    pub from_name: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject_prefix: String,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    // Apify
    pub apify_token: String,
    pub primary_actor_id: String,
    pub fallback_actor_id: String,

    // Database
    pub database_url: String,

    // Subject
    pub profile_handle: String,
    pub max_posts: u32,
    pub timezone: Tz,

    // Decision engine
    pub low_results_threshold: u32,
    pub lock_ttl_minutes: u32,
    pub run_timeout_minutes: u64,
    pub poll_interval_seconds: u64,
    pub max_retries: u32,
    pub fallback_max_per_48h: u32,
    pub max_missing_createtime_pct: f64,
    pub max_missing_url_pct: f64,

    // Backups
    pub backup_dir: PathBuf,
    pub backup_retention_days: u32,

    // Scheduling
    pub schedule_hour: u32,
    pub run_on_startup: bool,
    pub run_once: bool,

    // Observability
    pub log_format: LogFormat,
    pub slack_webhook_url: Option<String>,

    pub email: Option<EmailConfig>,
}

impl AppConfig {
    /// Load `.env` (if present) and the process environment, then validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.log_keys();
        Ok(config)
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| var(key).ok_or(ConfigError::Missing(key));

        let apify_token = required("APIFY_TOKEN")?;
        if !apify_token.starts_with("apify_api_") {
            return Err(invalid("APIFY_TOKEN", "must start with \"apify_api_\""));
        }

        let database_url = required("DATABASE_URL")?;
        if !database_url.starts_with("postgres://") && !database_url.starts_with("postgresql://") {
            return Err(invalid(
                "DATABASE_URL",
                "must start with \"postgres://\" or \"postgresql://\"",
            ));
        }

        let timezone = match var("TIMEZONE") {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| invalid("TIMEZONE", format!("unknown timezone {name:?}")))?,
            None => chrono_tz::Asia::Jerusalem,
        };

        let log_format = match var("LOG_FORMAT").as_deref() {
            None | Some("text") | Some("pretty") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(invalid(
                    "LOG_FORMAT",
                    format!("expected text or json, got {other:?}"),
                ))
            }
        };

        let config = Self {
            apify_token,
            primary_actor_id: var("APIFY_PRIMARY_ACTOR_ID")
                .unwrap_or_else(|| DEFAULT_PRIMARY_ACTOR_ID.to_string()),
            fallback_actor_id: var("APIFY_FALLBACK_ACTOR_ID")
                .unwrap_or_else(|| DEFAULT_FALLBACK_ACTOR_ID.to_string()),
            database_url,
            profile_handle: required("PROFILE_HANDLE")?,
            max_posts: parse_or("MAX_POSTS", var("MAX_POSTS"), 50)?,
            timezone,
            low_results_threshold: parse_or(
                "LOW_RESULTS_THRESHOLD",
                var("LOW_RESULTS_THRESHOLD"),
                10,
            )?,
            lock_ttl_minutes: parse_or("LOCK_TTL_MINUTES", var("LOCK_TTL_MINUTES"), 30)?,
            run_timeout_minutes: parse_or("RUN_TIMEOUT_MINUTES", var("RUN_TIMEOUT_MINUTES"), 10)?,
            poll_interval_seconds: parse_or(
                "POLL_INTERVAL_SECONDS",
                var("POLL_INTERVAL_SECONDS"),
                5,
            )?,
            max_retries: parse_or("MAX_RETRIES", var("MAX_RETRIES"), 3)?,
            fallback_max_per_48h: parse_or("FALLBACK_MAX_PER_48H", var("FALLBACK_MAX_PER_48H"), 1)?,
            max_missing_createtime_pct: parse_or(
                "MAX_MISSING_CREATETIME_PCT",
                var("MAX_MISSING_CREATETIME_PCT"),
                0.3,
            )?,
            max_missing_url_pct: parse_or("MAX_MISSING_URL_PCT", var("MAX_MISSING_URL_PCT"), 0.3)?,
            backup_dir: var("BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("backups")),
            backup_retention_days: parse_or(
                "BACKUP_RETENTION_DAYS",
                var("BACKUP_RETENTION_DAYS"),
                14,
            )?,
            schedule_hour: parse_or("SCHEDULE_HOUR", var("SCHEDULE_HOUR"), 7)?,
            run_on_startup: parse_flag("RUN_ON_STARTUP", var("RUN_ON_STARTUP"))?,
            run_once: parse_flag("RUN_ONCE", var("RUN_ONCE"))?,
            log_format,
            slack_webhook_url: var("SLACK_WEBHOOK_URL"),
            email: load_email(&var)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=200).contains(&self.max_posts) {
            return Err(invalid("MAX_POSTS", "must be between 1 and 200"));
        }
        if !(1..=365).contains(&self.backup_retention_days) {
            return Err(invalid("BACKUP_RETENTION_DAYS", "must be between 1 and 365"));
        }
        if !(0.0..=1.0).contains(&self.max_missing_createtime_pct) {
            return Err(invalid("MAX_MISSING_CREATETIME_PCT", "must be between 0 and 1"));
        }
        if !(0.0..=1.0).contains(&self.max_missing_url_pct) {
            return Err(invalid("MAX_MISSING_URL_PCT", "must be between 0 and 1"));
        }
        if self.schedule_hour > 23 {
            return Err(invalid("SCHEDULE_HOUR", "must be between 0 and 23"));
        }
        if self.lock_ttl_minutes == 0 {
            return Err(invalid("LOCK_TTL_MINUTES", "must be positive"));
        }
        if self.run_timeout_minutes == 0 {
            return Err(invalid("RUN_TIMEOUT_MINUTES", "must be positive"));
        }
        if self.poll_interval_seconds == 0 {
            return Err(invalid("POLL_INTERVAL_SECONDS", "must be positive"));
        }
        Ok(())
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let n = val.len().min(10);
            format!("{}...({} chars)", &val[..n], val.len())
        }

        tracing::info!("Config loaded:");
        tracing::info!("  APIFY_TOKEN: {}", preview(&self.apify_token));
        tracing::info!("  APIFY_PRIMARY_ACTOR_ID: {}", self.primary_actor_id);
        tracing::info!("  APIFY_FALLBACK_ACTOR_ID: {}", self.fallback_actor_id);
        tracing::info!("  PROFILE_HANDLE: {}", self.profile_handle);
        tracing::info!("  TIMEZONE: {}", self.timezone);
        tracing::info!("  BACKUP_DIR: {}", self.backup_dir.display());
        match &self.email {
            Some(email) => {
                tracing::info!("  BREVO_API_KEY: {}", preview(&email.brevo_api_key));
                tracing::info!("  EMAIL_TO: {} recipient(s)", email.to.len());
            }
            None => tracing::info!("  EMAIL: <not configured>"),
        }
        tracing::info!(
            "  SLACK_WEBHOOK_URL: {}",
            if self.slack_webhook_url.is_some() { "<set>" } else { "<not set>" }
        );
    }
}

const EMAIL_KEYS: [&str; 8] = [
    "EMAIL_PROVIDER",
    "BREVO_API_KEY",
    "EMAIL_FROM",
    "EMAIL_FROM_NAME",
    "EMAIL_TO",
    "EMAIL_CC",
    "EMAIL_BCC",
    "EMAIL_SUBJECT_PREFIX",
];

fn load_email<F>(var: &F) -> Result<Option<EmailConfig>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if EMAIL_KEYS.iter().all(|key| var(key).is_none()) {
        return Ok(None);
    }

    if let Some(provider) = var("EMAIL_PROVIDER") {
        if !provider.eq_ignore_ascii_case("brevo") {
            return Err(invalid("EMAIL_PROVIDER", format!("unsupported provider {provider:?}")));
        }
    }

    let brevo_api_key = var("BREVO_API_KEY").ok_or(ConfigError::Missing("BREVO_API_KEY"))?;
    let from = var("EMAIL_FROM").ok_or(ConfigError::Missing("EMAIL_FROM"))?;
    let to = split_list(var("EMAIL_TO"));
    if to.is_empty() {
        return Err(ConfigError::Missing("EMAIL_TO"));
    }
    if !from.contains('@') {
        return Err(invalid("EMAIL_FROM", format!("not an email address: {from:?}")));
    }
    for addr in &to {
        if !addr.contains('@') {
            return Err(invalid("EMAIL_TO", format!("not an email address: {addr:?}")));
        }
    }

    Ok(Some(EmailConfig {
        brevo_api_key,
        from,
        from_name: var("EMAIL_FROM_NAME").unwrap_or_else(|| "Creatorwatch".to_string()),
        to,
        cc: split_list(var("EMAIL_CC")),
        bcc: split_list(var("EMAIL_BCC")),
        subject_prefix: var("EMAIL_SUBJECT_PREFIX").unwrap_or_else(|| "Daily Report".to_string()),
    }))
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T: FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| invalid(key, format!("could not parse {v:?}"))),
    }
}

fn parse_flag(key: &'static str, raw: Option<String>) -> Result<bool, ConfigError> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("false") | Some("0") | Some("no") => Ok(false),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some(other) => Err(invalid(key, format!("expected true/false, got {other:?}"))),
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}
