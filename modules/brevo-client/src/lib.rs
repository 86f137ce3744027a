pub mod error;
pub mod types;

pub use error::{BrevoError, Result};
pub use types::{
    parse_recipients, Attachment, Recipient, SendEmailRequest, SendEmailResponse, Sender,
};

use types::ApiErrorBody;

const BASE_URL: &str = "https://api.brevo.com/v3";

#[derive(Clone)]
pub struct BrevoClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl BrevoClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Send one transactional email. Makes a single attempt; retry policy is the caller's.
    pub async fn send_email(&self, request: &SendEmailRequest) -> Result<SendEmailResponse> {
        let url = format!("{}/smtp/email", self.base_url);
        tracing::debug!(
            to = request.to.len(),
            cc = request.cc.len(),
            bcc = request.bcc.len(),
            subject = %request.subject,
            "Sending email via Brevo"
        );

        let resp = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|e| e.message)
                .unwrap_or_else(|_| body.chars().take(200).collect());
            return Err(BrevoError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let sent: SendEmailResponse = serde_json::from_str(&body)?;
        tracing::info!(message_id = %sent.message_id, "Email accepted by Brevo");
        Ok(sent)
    }
}
