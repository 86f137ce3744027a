pub mod error;
pub mod types;

pub use error::{ApifyError, Result};
pub use types::{ApidojoProfileInput, ClockworksProfileInput, RunData, RunStatus};

use serde::de::DeserializeOwned;
use serde::Serialize;
use types::{ApiErrorBody, ApiResponse};

const BASE_URL: &str = "https://api.apify.com/v2";

/// Actor for apidojo/tiktok-profile-scraper.
pub const APIDOJO_TIKTOK_PROFILE_SCRAPER: &str = "apidojo/tiktok-profile-scraper";

/// Actor for clockworks/tiktok-profile-scraper.
pub const CLOCKWORKS_TIKTOK_PROFILE_SCRAPER: &str = "clockworks/tiktok-profile-scraper";

#[derive(Clone)]
pub struct ApifyClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl ApifyClient {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url: BASE_URL.to_string(),
        }
    }

    /// Point the client at a different API root (local proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Start an actor run. Returns immediately with run metadata.
    pub async fn start_run<I: Serialize + ?Sized>(
        &self,
        actor_id: &str,
        input: &I,
    ) -> Result<RunData> {
        let url = format!("{}/acts/{}/runs", self.base_url, actor_path(actor_id));
        tracing::debug!(actor_id, "Starting Apify actor run");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(input)
            .send()
            .await?;

        let api_resp: ApiResponse<RunData> = parse_response(resp).await?;
        tracing::info!(actor_id, run_id = %api_resp.data.id, "Apify run started");
        Ok(api_resp.data)
    }

    /// Read the current state of a run. Does not wait.
    pub async fn get_run(&self, run_id: &str) -> Result<RunData> {
        let url = format!("{}/actor-runs/{}", self.base_url, run_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let api_resp: ApiResponse<RunData> = parse_response(resp).await?;
        tracing::debug!(run_id, status = %api_resp.data.status, "Apify run status");
        Ok(api_resp.data)
    }

    /// Fetch dataset items from a completed run.
    pub async fn get_dataset_items<T: DeserializeOwned>(&self, dataset_id: &str) -> Result<Vec<T>> {
        let url = format!("{}/datasets/{}/items?format=json", self.base_url, dataset_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let items: Vec<T> = parse_response(resp).await?;
        tracing::info!(dataset_id, count = items.len(), "Fetched dataset items");
        Ok(items)
    }
}

/// Actor IDs are written `owner/name`; the REST path wants `owner~name`.
fn actor_path(actor_id: &str) -> String {
    actor_id.replacen('/', "~", 1)
}

async fn parse_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        return Err(ApifyError::Api {
            status: status.as_u16(),
            message,
        });
    }

    Ok(serde_json::from_str(&body)?)
}
