use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{ListPrompt, MessageSender, OutboundMessage, SendError, SendFuture, SendReceipt};
use crate::config::WhatsAppConfig;
use crate::redact::phone_label;

const DEFAULT_TIMEOUT_SECONDS: u64 = 15;

/// WhatsApp Cloud API client. Without a phone number id and access token
/// every send is logged and reported as delivered.
#[derive(Clone)]
pub struct WhatsAppClient {
    client: reqwest::Client,
    messages_url: Option<String>,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CloudApiSendResponse {
    #[serde(default)]
    messages: Vec<CloudApiMessageId>,
}

#[derive(Debug, Deserialize)]
struct CloudApiMessageId {
    id: String,
}

impl WhatsAppClient {
    pub fn new(config: &WhatsAppConfig) -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS))
            .build()
            .map_err(|err| SendError::Permanent {
                code: "WHATSAPP_CLIENT_BUILD".to_string(),
                message: err.to_string(),
            })?;

        let messages_url = config.phone_number_id.as_deref().map(|phone_number_id| {
            format!(
                "{}/{phone_number_id}/messages",
                config.api_url.trim_end_matches('/')
            )
        });

        Ok(Self {
            client,
            messages_url,
            access_token: config.access_token.clone(),
        })
    }

    async fn post(&self, message: OutboundMessage) -> Result<SendReceipt, SendError> {
        let kind = message.kind();
        let recipient = message.recipient().map(phone_label);
        let (Some(url), Some(token)) = (self.messages_url.as_deref(), self.access_token.as_deref())
        else {
            info!(
                kind,
                phone = recipient.as_deref().unwrap_or("-"),
                "whatsapp delivery not configured; simulated delivery"
            );
            return Ok(SendReceipt::default());
        };

        let payload = cloud_api_payload(&message);
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|err| SendError::Transient {
                code: if err.is_timeout() {
                    "WHATSAPP_TIMEOUT".to_string()
                } else {
                    "WHATSAPP_NETWORK_ERROR".to_string()
                },
                message: format!("WhatsApp request failed: {err}"),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let code = format!("WHATSAPP_HTTP_{}", status.as_u16());
            let message = if body.is_empty() {
                format!("WhatsApp responded with status {status}")
            } else {
                format!("WhatsApp responded with status {status}: {body}")
            };
            return Err(if is_transient_status(status) {
                SendError::Transient { code, message }
            } else {
                SendError::Permanent { code, message }
            });
        }

        let message_id = serde_json::from_str::<CloudApiSendResponse>(&body)
            .ok()
            .and_then(|parsed| parsed.messages.into_iter().next())
            .map(|entry| entry.id);
        debug!(
            kind,
            phone = recipient.as_deref().unwrap_or("-"),
            message_id = message_id.as_deref().unwrap_or("-"),
            "whatsapp message accepted"
        );
        Ok(SendReceipt { message_id })
    }
}

impl MessageSender for WhatsAppClient {
    fn send<'a>(&'a self, message: OutboundMessage) -> SendFuture<'a> {
        Box::pin(self.post(message))
    }
}

/// Digits only. Mexican mobile numbers arrive as `521` + 10 digits but must
/// be addressed as `52` + 10 digits.
pub fn normalize_phone_number(phone: &str) -> String {
    let digits = phone
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>();
    if digits.len() == 13 && digits.starts_with("521") {
        return format!("52{}", &digits[3..]);
    }
    digits
}

fn cloud_api_payload(message: &OutboundMessage) -> Value {
    match message {
        OutboundMessage::Text { to, body } => json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": normalize_phone_number(to),
            "type": "text",
            "text": { "body": body },
        }),
        OutboundMessage::Buttons { to, body, buttons } => json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": normalize_phone_number(to),
            "type": "interactive",
            "interactive": {
                "type": "button",
                "body": { "text": body },
                "action": {
                    "buttons": buttons
                        .iter()
                        .map(|button| json!({
                            "type": "reply",
                            "reply": { "id": button.id, "title": button.title },
                        }))
                        .collect::<Vec<_>>(),
                },
            },
        }),
        OutboundMessage::List { to, prompt } => list_payload(to, prompt),
        OutboundMessage::Image { to, url, caption } => json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": normalize_phone_number(to),
            "type": "image",
            "image": { "link": url, "caption": caption },
        }),
        OutboundMessage::MarkRead { message_id } => json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": message_id,
        }),
    }
}

fn list_payload(to: &str, prompt: &ListPrompt) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": normalize_phone_number(to),
        "type": "interactive",
        "interactive": {
            "type": "list",
            "header": { "type": "text", "text": prompt.header },
            "body": { "text": prompt.body },
            "footer": { "text": prompt.footer },
            "action": {
                "button": prompt.button,
                "sections": prompt.sections,
            },
        },
    })
}

fn is_transient_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 425 | 429 | 500 | 502 | 503 | 504)
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::{cloud_api_payload, is_transient_status, normalize_phone_number};
    use crate::messaging::{OutboundMessage, ReplyButton};

    #[test]
    fn strips_mexican_mobile_prefix() {
        assert_eq!(normalize_phone_number("5215512345678"), "525512345678");
        assert_eq!(normalize_phone_number("+52 1 55 1234 5678"), "525512345678");
        assert_eq!(normalize_phone_number("+1 (415) 555-0100"), "14155550100");
    }

    #[test]
    fn classifies_retryable_http_status_codes_as_transient() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn button_payload_uses_reply_buttons() {
        let payload = cloud_api_payload(&OutboundMessage::Buttons {
            to: "5215512345678".to_string(),
            body: "Pick one".to_string(),
            buttons: vec![ReplyButton::new("btn_accept_request", "✅ Accept")],
        });

        assert_eq!(payload["to"], "525512345678");
        assert_eq!(payload["interactive"]["type"], "button");
        assert_eq!(
            payload["interactive"]["action"]["buttons"][0]["reply"]["id"],
            "btn_accept_request"
        );
    }

    #[test]
    fn mark_read_payload_has_no_recipient() {
        let payload = cloud_api_payload(&OutboundMessage::MarkRead {
            message_id: "wamid.1".to_string(),
        });
        assert_eq!(payload["status"], "read");
        assert!(payload.get("to").is_none());
    }
}
