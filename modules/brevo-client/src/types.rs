use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct Sender {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Recipient {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }
}

/// A file attached to the email. `content` is base64-encoded.
#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    pub name: String,
    pub content: String,
}

/// Body of `POST /v3/smtp/email`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailRequest {
    pub sender: Sender,
    pub to: Vec<Recipient>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<Recipient>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<Recipient>,
    pub subject: String,
    pub text_content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachment: Vec<Attachment>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailResponse {
    pub message_id: String,
}

/// Error body Brevo returns alongside 4xx/5xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: Option<String>,
    pub message: String,
}

/// Split a comma-separated address list, dropping blanks.
pub fn parse_recipients(list: &str) -> Vec<Recipient> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Recipient::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_recipients_trims_and_skips_blanks() {
        let parsed = parse_recipients(" a@example.com, ,b@example.com,");
        assert_eq!(
            parsed,
            vec![Recipient::new("a@example.com"), Recipient::new("b@example.com")]
        );
    }

    #[test]
    fn request_omits_empty_cc_and_bcc() {
        let req = SendEmailRequest {
            sender: Sender {
                name: "Reports".into(),
                email: "reports@example.com".into(),
            },
            to: parse_recipients("ops@example.com"),
            cc: vec![],
            bcc: vec![],
            subject: "Daily".into(),
            text_content: "body".into(),
            attachment: vec![],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("cc").is_none());
        assert!(json.get("attachment").is_none());
        assert_eq!(json["textContent"], "body");
    }
}
