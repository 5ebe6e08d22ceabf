use serde::Deserialize;
use serde_json::{Value, json};

pub const UNKNOWN_SENDER_NAME: &str = "Unknown";

/// One normalized inbound chat event.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub sender_phone: String,
    pub sender_name: String,
    pub message_id: Option<String>,
    pub kind: InboundKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundKind {
    Text {
        body: String,
    },
    ListReply {
        id: String,
        title: String,
        description: String,
    },
    ButtonReply {
        id: String,
        title: String,
    },
    Location {
        latitude: f64,
        longitude: f64,
        name: Option<String>,
        address: Option<String>,
    },
    Image {
        media_id: Option<String>,
        caption: Option<String>,
    },
    Audio {
        media_id: Option<String>,
    },
    Document {
        media_id: Option<String>,
        filename: Option<String>,
    },
    Unsupported {
        message_type: String,
    },
}

impl InboundEvent {
    pub fn text(sender_phone: &str, sender_name: &str, body: &str) -> Self {
        Self::new(
            sender_phone,
            sender_name,
            InboundKind::Text {
                body: body.to_string(),
            },
        )
    }

    pub fn button(sender_phone: &str, sender_name: &str, id: &str) -> Self {
        Self::new(
            sender_phone,
            sender_name,
            InboundKind::ButtonReply {
                id: id.to_string(),
                title: id.to_string(),
            },
        )
    }

    pub fn list_reply(sender_phone: &str, sender_name: &str, id: &str) -> Self {
        Self::new(
            sender_phone,
            sender_name,
            InboundKind::ListReply {
                id: id.to_string(),
                title: id.to_string(),
                description: String::new(),
            },
        )
    }

    pub fn new(sender_phone: &str, sender_name: &str, kind: InboundKind) -> Self {
        Self {
            sender_phone: sender_phone.to_string(),
            sender_name: sender_name.to_string(),
            message_id: None,
            kind,
        }
    }

    /// Trimmed text body, if this is a text message.
    pub fn text_body(&self) -> Option<&str> {
        match &self.kind {
            InboundKind::Text { body } => Some(body.trim()),
            _ => None,
        }
    }

    /// Lowercased, trimmed text used for keyword matching.
    pub fn keyword(&self) -> Option<String> {
        self.text_body().map(str::to_lowercase)
    }

    /// Id of the tapped list row or reply button.
    pub fn reply_id(&self) -> Option<&str> {
        match &self.kind {
            InboundKind::ListReply { id, .. } | InboundKind::ButtonReply { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn button_id(&self) -> Option<&str> {
        match &self.kind {
            InboundKind::ButtonReply { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn list_id(&self) -> Option<&str> {
        match &self.kind {
            InboundKind::ListReply { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Matches a text command or a button with the given id.
    pub fn is_command(&self, words: &[&str], button_id: &str) -> bool {
        if self.button_id() == Some(button_id) {
            return true;
        }
        self.keyword()
            .is_some_and(|text| words.iter().any(|word| *word == text))
    }

    pub fn message_type(&self) -> &str {
        match &self.kind {
            InboundKind::Text { .. } => "text",
            InboundKind::ListReply { .. } | InboundKind::ButtonReply { .. } => "interactive",
            InboundKind::Location { .. } => "location",
            InboundKind::Image { .. } => "image",
            InboundKind::Audio { .. } => "audio",
            InboundKind::Document { .. } => "document",
            InboundKind::Unsupported { message_type } => message_type,
        }
    }

    /// Compact content record for the message log.
    pub fn log_content(&self) -> Value {
        match &self.kind {
            InboundKind::Text { body } => json!({ "text": body }),
            InboundKind::ListReply {
                id,
                title,
                description,
            } => json!({
                "type": "list_reply",
                "id": id,
                "title": title,
                "description": description,
            }),
            InboundKind::ButtonReply { id, title } => json!({
                "type": "button_reply",
                "id": id,
                "title": title,
            }),
            InboundKind::Location {
                latitude,
                longitude,
                name,
                address,
            } => json!({
                "latitude": latitude,
                "longitude": longitude,
                "name": name.as_deref().unwrap_or_default(),
                "address": address.as_deref().unwrap_or_default(),
            }),
            InboundKind::Image { media_id, caption } => json!({
                "imageId": media_id,
                "caption": caption.as_deref().unwrap_or_default(),
            }),
            InboundKind::Audio { media_id } => json!({ "audioId": media_id }),
            InboundKind::Document { media_id, filename } => json!({
                "documentId": media_id,
                "filename": filename.as_deref().unwrap_or_default(),
            }),
            InboundKind::Unsupported { message_type } => json!({ "type": message_type }),
        }
    }
}

/// Delivery status reported for a previously sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub message_id: String,
    pub recipient_phone: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookBatch {
    pub events: Vec<InboundEvent>,
    pub statuses: Vec<StatusUpdate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookChange {
    pub value: Option<WebhookValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookValue {
    #[serde(default)]
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub contacts: Vec<WireContact>,
    #[serde(default)]
    pub statuses: Vec<WireStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireContact {
    pub profile: Option<WireProfile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireProfile {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireStatus {
    pub id: String,
    #[serde(default)]
    pub recipient_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub from: String,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub message_type: String,
    pub text: Option<WireText>,
    pub interactive: Option<WireInteractive>,
    pub location: Option<WireLocation>,
    pub image: Option<WireMedia>,
    pub audio: Option<WireMedia>,
    pub document: Option<WireMedia>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireText {
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireInteractive {
    #[serde(rename = "type")]
    pub interactive_type: String,
    pub list_reply: Option<WireReply>,
    pub button_reply: Option<WireReply>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireReply {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireMedia {
    pub id: Option<String>,
    pub caption: Option<String>,
    pub filename: Option<String>,
}

impl WebhookPayload {
    /// Flattens every change in the notification, preserving message order.
    pub fn into_batch(self) -> WebhookBatch {
        let mut batch = WebhookBatch::default();
        if self.object.is_none() {
            return batch;
        }

        for value in self
            .entry
            .into_iter()
            .flat_map(|entry| entry.changes)
            .filter_map(|change| change.value)
        {
            batch
                .statuses
                .extend(value.statuses.into_iter().map(|status| StatusUpdate {
                    message_id: status.id,
                    recipient_phone: status.recipient_id,
                    status: status.status,
                }));

            let sender_name = value
                .contacts
                .first()
                .and_then(|contact| contact.profile.as_ref())
                .and_then(|profile| profile.name.clone())
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_SENDER_NAME.to_string());

            batch.events.extend(value.messages.into_iter().map(|message| InboundEvent {
                sender_phone: message.from.clone(),
                sender_name: sender_name.clone(),
                message_id: message.id.clone(),
                kind: message.into_kind(),
            }));
        }
        batch
    }
}

impl WireMessage {
    fn into_kind(self) -> InboundKind {
        let unsupported = InboundKind::Unsupported {
            message_type: self.message_type.clone(),
        };
        match self.message_type.as_str() {
            "text" => match self.text {
                Some(text) => InboundKind::Text { body: text.body },
                None => unsupported,
            },
            "interactive" => match self.interactive {
                Some(WireInteractive {
                    interactive_type,
                    list_reply: Some(reply),
                    ..
                }) if interactive_type == "list_reply" => InboundKind::ListReply {
                    id: reply.id,
                    title: reply.title,
                    description: reply.description.unwrap_or_default(),
                },
                Some(WireInteractive {
                    interactive_type,
                    button_reply: Some(reply),
                    ..
                }) if interactive_type == "button_reply" => InboundKind::ButtonReply {
                    id: reply.id,
                    title: reply.title,
                },
                _ => InboundKind::Unsupported {
                    message_type: "interactive".to_string(),
                },
            },
            "location" => match self.location {
                Some(location) => InboundKind::Location {
                    latitude: location.latitude,
                    longitude: location.longitude,
                    name: location.name,
                    address: location.address,
                },
                None => unsupported,
            },
            "image" => InboundKind::Image {
                media_id: self.image.as_ref().and_then(|media| media.id.clone()),
                caption: self.image.and_then(|media| media.caption),
            },
            "audio" => InboundKind::Audio {
                media_id: self.audio.and_then(|media| media.id),
            },
            "document" => InboundKind::Document {
                media_id: self.document.as_ref().and_then(|media| media.id.clone()),
                filename: self.document.and_then(|media| media.filename),
            },
            _ => unsupported,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{InboundEvent, InboundKind, UNKNOWN_SENDER_NAME, WebhookPayload};

    fn parse(value: serde_json::Value) -> WebhookPayload {
        serde_json::from_value(value).expect("payload should deserialize")
    }

    #[test]
    fn decodes_text_list_and_button_messages_in_order() {
        let payload = parse(json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "changes": [{
                    "value": {
                        "contacts": [{ "profile": { "name": "Ana" } }],
                        "messages": [
                            { "from": "5215512345678", "id": "wamid.1", "type": "text", "text": { "body": " Menu " } },
                            { "from": "5215512345678", "id": "wamid.2", "type": "interactive",
                              "interactive": { "type": "list_reply", "list_reply": { "id": "service_plumbing", "title": "🔧 Plumbing" } } },
                            { "from": "5215512345678", "id": "wamid.3", "type": "interactive",
                              "interactive": { "type": "button_reply", "button_reply": { "id": "btn_book_provider", "title": "✅ Book Provider" } } }
                        ]
                    }
                }]
            }]
        }));

        let batch = payload.into_batch();
        assert_eq!(batch.events.len(), 3);
        assert_eq!(batch.events[0].sender_name, "Ana");
        assert_eq!(batch.events[0].keyword().as_deref(), Some("menu"));
        assert_eq!(batch.events[1].list_id(), Some("service_plumbing"));
        assert_eq!(batch.events[2].button_id(), Some("btn_book_provider"));
        assert_eq!(batch.events[2].message_id.as_deref(), Some("wamid.3"));
    }

    #[test]
    fn decodes_location_media_and_statuses() {
        let payload = parse(json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [
                            { "from": "1", "type": "location", "location": { "latitude": 19.4, "longitude": -99.1, "address": "Reforma 222" } },
                            { "from": "1", "type": "image", "image": { "id": "m1", "caption": "leak" } },
                            { "from": "1", "type": "sticker" }
                        ],
                        "statuses": [{ "id": "wamid.9", "recipient_id": "1", "status": "delivered" }]
                    }
                }]
            }]
        }));

        let batch = payload.into_batch();
        assert_eq!(batch.events[0].sender_name, UNKNOWN_SENDER_NAME);
        assert!(matches!(
            batch.events[0].kind,
            InboundKind::Location { latitude, .. } if (latitude - 19.4).abs() < f64::EPSILON
        ));
        assert_eq!(
            batch.events[1].kind,
            InboundKind::Image {
                media_id: Some("m1".to_string()),
                caption: Some("leak".to_string()),
            }
        );
        assert_eq!(batch.events[2].message_type(), "sticker");
        assert_eq!(batch.statuses[0].status, "delivered");
    }

    #[test]
    fn payload_without_object_is_ignored() {
        let payload = parse(json!({ "entry": [] }));
        assert!(payload.into_batch().events.is_empty());
    }

    #[test]
    fn commands_match_text_or_button() {
        let text = InboundEvent::text("1", "A", "  Go Online ");
        assert!(text.is_command(&["go online"], "btn_go_online"));
        let button = InboundEvent::button("1", "A", "btn_go_online");
        assert!(button.is_command(&["go online"], "btn_go_online"));
        assert!(!button.is_command(&["go offline"], "btn_go_offline"));
    }
}
