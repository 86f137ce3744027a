use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wrapper for Apify API responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

/// Error envelope returned by the Apify API on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub message: String,
}

/// Lifecycle status of an actor run, as reported by Apify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    #[serde(rename = "READY")]
    Ready,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "TIMING-OUT")]
    TimingOut,
    #[serde(rename = "TIMED-OUT")]
    TimedOut,
    #[serde(rename = "ABORTING")]
    Aborting,
    #[serde(rename = "ABORTED")]
    Aborted,
}

impl RunStatus {
    /// Whether the run has finished (successfully or not).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::TimedOut | RunStatus::Aborted
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Ready => "READY",
            RunStatus::Running => "RUNNING",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
            RunStatus::TimingOut => "TIMING-OUT",
            RunStatus::TimedOut => "TIMED-OUT",
            RunStatus::Aborting => "ABORTING",
            RunStatus::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// Apify actor run metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct RunData {
    pub id: String,
    pub status: RunStatus,
    #[serde(rename = "defaultDatasetId")]
    pub default_dataset_id: String,
    #[serde(rename = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "finishedAt")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Input for the apidojo/tiktok-profile-scraper actor.
#[derive(Debug, Clone, Serialize)]
pub struct ApidojoProfileInput {
    pub usernames: Vec<String>,
    #[serde(rename = "maxItems")]
    pub max_items: u32,
    /// Inclusive lower date bound, `YYYY-MM-DD`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    /// Inclusive upper date bound, `YYYY-MM-DD`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
}

/// Input for the clockworks/tiktok-profile-scraper actor.
#[derive(Debug, Clone, Serialize)]
pub struct ClockworksProfileInput {
    pub profiles: Vec<String>,
    #[serde(rename = "resultsPerPage")]
    pub results_per_page: u32,
    #[serde(rename = "profileScrapeSections")]
    pub profile_scrape_sections: Vec<String>,
    #[serde(rename = "oldestPostDateUnified", skip_serializing_if = "Option::is_none")]
    pub oldest_post_date: Option<String>,
    #[serde(rename = "newestPostDate", skip_serializing_if = "Option::is_none")]
    pub newest_post_date: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_data_parses_hyphenated_statuses() {
        let json = r#"{"id":"run1","status":"TIMED-OUT","defaultDatasetId":"ds1"}"#;
        let run: RunData = serde_json::from_str(json).unwrap();
        assert_eq!(run.status, RunStatus::TimedOut);
        assert!(run.status.is_terminal());
        assert!(run.started_at.is_none());
    }

    #[test]
    fn transitional_statuses_are_not_terminal() {
        assert!(!RunStatus::TimingOut.is_terminal());
        assert!(!RunStatus::Aborting.is_terminal());
        assert!(!RunStatus::Ready.is_terminal());
    }

    #[test]
    fn clockworks_input_skips_absent_date_bounds() {
        let input = ClockworksProfileInput {
            profiles: vec!["creator".into()],
            results_per_page: 50,
            profile_scrape_sections: vec!["videos".into()],
            oldest_post_date: None,
            newest_post_date: None,
        };
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["resultsPerPage"], 50);
        assert!(json.get("oldestPostDateUnified").is_none());
    }
}
