use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::redact::phone_label;

mod whatsapp;

pub use whatsapp::{WhatsAppClient, normalize_phone_number};

pub const MAX_BUTTONS: usize = 3;
pub const MAX_BUTTON_TITLE_CHARS: usize = 20;
pub const MAX_LIST_ROWS: usize = 10;
pub const MAX_ROW_TITLE_CHARS: usize = 24;
pub const MAX_ROW_DESCRIPTION_CHARS: usize = 72;

pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<SendReceipt, SendError>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyButton {
    pub id: String,
    pub title: String,
}

impl ReplyButton {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<ListRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPrompt {
    pub header: String,
    pub body: String,
    pub footer: String,
    pub button: String,
    pub sections: Vec<ListSection>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Text {
        to: String,
        body: String,
    },
    Buttons {
        to: String,
        body: String,
        buttons: Vec<ReplyButton>,
    },
    List {
        to: String,
        prompt: ListPrompt,
    },
    Image {
        to: String,
        url: String,
        caption: String,
    },
    MarkRead {
        message_id: String,
    },
}

impl OutboundMessage {
    pub fn recipient(&self) -> Option<&str> {
        match self {
            Self::Text { to, .. }
            | Self::Buttons { to, .. }
            | Self::List { to, .. }
            | Self::Image { to, .. } => Some(to),
            Self::MarkRead { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Buttons { .. } => "buttons",
            Self::List { .. } => "list",
            Self::Image { .. } => "image",
            Self::MarkRead { .. } => "mark_read",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum SendError {
    #[error("transient send failure {code}: {message}")]
    Transient { code: String, message: String },
    #[error("permanent send failure {code}: {message}")]
    Permanent { code: String, message: String },
}

impl SendError {
    pub fn code(&self) -> &str {
        match self {
            Self::Transient { code, .. } | Self::Permanent { code, .. } => code,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Outbound chat capability. Implementations deliver one message per call.
pub trait MessageSender: Send + Sync {
    fn send<'a>(&'a self, message: OutboundMessage) -> SendFuture<'a>;
}

/// Fire-and-log wrapper used by the conversation layer. A failed send is
/// logged and reported as `false`; it never aborts the caller.
#[derive(Clone)]
pub struct Outbox {
    sender: Arc<dyn MessageSender>,
}

impl Outbox {
    pub fn new(sender: Arc<dyn MessageSender>) -> Self {
        Self { sender }
    }

    pub async fn send_text(&self, to: &str, body: impl Into<String>) -> bool {
        self.dispatch(OutboundMessage::Text {
            to: to.to_string(),
            body: body.into(),
        })
        .await
    }

    pub async fn send_buttons(&self, to: &str, body: impl Into<String>, buttons: &[ReplyButton]) -> bool {
        if buttons.len() > MAX_BUTTONS {
            warn!(
                phone = %phone_label(to),
                requested = buttons.len(),
                "button prompt exceeds limit; extra buttons dropped"
            );
        }
        let buttons = buttons
            .iter()
            .take(MAX_BUTTONS)
            .map(|button| ReplyButton {
                id: button.id.clone(),
                title: truncate_chars(&button.title, MAX_BUTTON_TITLE_CHARS),
            })
            .collect();

        self.dispatch(OutboundMessage::Buttons {
            to: to.to_string(),
            body: body.into(),
            buttons,
        })
        .await
    }

    pub async fn send_list(&self, to: &str, prompt: ListPrompt) -> bool {
        self.dispatch(OutboundMessage::List {
            to: to.to_string(),
            prompt: clamp_list_prompt(prompt),
        })
        .await
    }

    pub async fn send_image(&self, to: &str, url: &str, caption: &str) -> bool {
        self.dispatch(OutboundMessage::Image {
            to: to.to_string(),
            url: url.to_string(),
            caption: caption.to_string(),
        })
        .await
    }

    pub async fn mark_read(&self, message_id: &str) -> bool {
        self.dispatch(OutboundMessage::MarkRead {
            message_id: message_id.to_string(),
        })
        .await
    }

    async fn dispatch(&self, message: OutboundMessage) -> bool {
        let kind = message.kind();
        let recipient = message.recipient().map(phone_label);
        match self.sender.send(message).await {
            Ok(_) => true,
            Err(err) => {
                warn!(
                    kind,
                    phone = recipient.as_deref().unwrap_or("-"),
                    code = err.code(),
                    transient = err.is_transient(),
                    "outbound message failed: {err}"
                );
                false
            }
        }
    }
}

/// Truncates to `max_chars` characters, replacing the tail with an ellipsis.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }

    let mut truncated = value.chars().take(max_chars - 1).collect::<String>();
    truncated.push('…');
    truncated
}

fn clamp_list_prompt(mut prompt: ListPrompt) -> ListPrompt {
    let mut remaining = MAX_LIST_ROWS;
    for section in &mut prompt.sections {
        section.rows.truncate(remaining);
        remaining -= section.rows.len();
        for row in &mut section.rows {
            row.title = truncate_chars(&row.title, MAX_ROW_TITLE_CHARS);
            row.description = truncate_chars(&row.description, MAX_ROW_DESCRIPTION_CHARS);
        }
    }
    prompt.sections.retain(|section| !section.rows.is_empty());
    prompt
}
