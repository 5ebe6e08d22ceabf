use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::FOOTER_TEXT;
use crate::directory::star_string;
use crate::inbound::{InboundEvent, InboundKind};
use crate::kv::{KvError, TtlStore, compose_key};
use crate::messaging::{ListPrompt, ListRow, ListSection, Outbox};
use crate::models::{NewTranscriptMessage, TranscriptKind};
use crate::redact::phone_label;
use crate::repos::{EntityStore, StoreError};

const CUSTOMER_SCOPE: &str = "chat:customer";
const PROVIDER_SCOPE: &str = "chat:provider";
pub const RATING_ROW_PREFIX: &str = "rate_";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("chat session storage failed: {0}")]
    Storage(#[from] KvError),
    #[error("chat session serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The bridge between a matched customer and provider. Stored once under
/// each participant's phone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub request_id: Uuid,
    pub customer_phone: String,
    pub provider_phone: String,
    pub customer_name: String,
    pub provider_name: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    Customer,
    Provider,
}

impl ChatSession {
    pub fn role_of(&self, phone: &str) -> Option<ChatRole> {
        if self.customer_phone == phone {
            Some(ChatRole::Customer)
        } else if self.provider_phone == phone {
            Some(ChatRole::Provider)
        } else {
            None
        }
    }

    fn name_of(&self, role: ChatRole) -> &str {
        match role {
            ChatRole::Customer => &self.customer_name,
            ChatRole::Provider => &self.provider_name,
        }
    }

    fn phone_of(&self, role: ChatRole) -> &str {
        match role {
            ChatRole::Customer => &self.customer_phone,
            ChatRole::Provider => &self.provider_phone,
        }
    }
}

impl ChatRole {
    fn counterpart(self) -> Self {
        match self {
            Self::Customer => Self::Provider,
            Self::Provider => Self::Customer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Relayed {
        recipient_phone: String,
        delivered: bool,
    },
    NoActiveSession,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// Request completed, chat ended, customer asked for a rating.
    Completed(ChatSession),
    /// Request completed and the customer asked for a rating, but no chat
    /// was live for it.
    CompletedWithoutChat,
    /// Request was not in an assigned state.
    NotCompletable,
}

#[derive(Clone)]
pub struct ChatRelay {
    kv: Arc<dyn TtlStore>,
    store: Arc<dyn EntityStore>,
    outbox: Outbox,
    key_prefix: String,
    ttl: Duration,
}

impl ChatRelay {
    pub fn new(
        kv: Arc<dyn TtlStore>,
        store: Arc<dyn EntityStore>,
        outbox: Outbox,
        key_prefix: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            kv,
            store,
            outbox,
            key_prefix: key_prefix.into(),
            ttl,
        }
    }

    /// Writes both paired records and tells both parties they are connected.
    /// A participant's previous bridge for another request is torn down.
    pub async fn start(
        &self,
        request_id: Uuid,
        customer_phone: &str,
        provider_phone: &str,
        customer_name: &str,
        provider_name: &str,
    ) -> Result<ChatSession, RelayError> {
        for phone in [customer_phone, provider_phone] {
            let previous = self
                .session(phone)
                .await?
                .filter(|previous| previous.request_id != request_id);
            if let Some(previous) = previous {
                self.remove_pair(&previous).await?;
            }
        }

        let session = ChatSession {
            request_id,
            customer_phone: customer_phone.to_string(),
            provider_phone: provider_phone.to_string(),
            customer_name: customer_name.to_string(),
            provider_name: provider_name.to_string(),
            started_at: Utc::now(),
        };
        let encoded = serde_json::to_string(&session)?;
        self.kv
            .set_ex(&self.customer_key(customer_phone), encoded.clone(), self.ttl)
            .await?;
        self.kv
            .set_ex(&self.provider_key(provider_phone), encoded, self.ttl)
            .await?;

        info!(request_id = %request_id, "chat session started");
        self.outbox
            .send_text(
                customer_phone,
                format!(
                    "💬 *Chat Started*\n\nYou're now connected with {provider_name}. You can send messages directly!"
                ),
            )
            .await;
        self.outbox
            .send_text(
                provider_phone,
                format!(
                    "💬 *Chat Started*\n\nYou're now connected with {customer_name}. You can send messages directly!"
                ),
            )
            .await;

        Ok(session)
    }

    /// Resolves the live chat for either participant. A record whose pair is
    /// gone is removed and reported as absent.
    pub async fn session(&self, phone: &str) -> Result<Option<ChatSession>, RelayError> {
        let own_keys = [
            (self.customer_key(phone), ChatRole::Customer),
            (self.provider_key(phone), ChatRole::Provider),
        ];

        for (key, role) in own_keys {
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };
            let session = match serde_json::from_str::<ChatSession>(&raw) {
                Ok(session) => session,
                Err(err) => {
                    warn!(phone = %phone_label(phone), "discarding unreadable chat session: {err}");
                    self.kv.delete(&key).await?;
                    continue;
                }
            };

            if self.pair_is_intact(&session, role).await? {
                return Ok(Some(session));
            }
            debug!(
                request_id = %session.request_id,
                phone = %phone_label(phone),
                "removing orphaned chat record"
            );
            self.kv.delete(&key).await?;
        }

        Ok(None)
    }

    /// Forwards an inbound message to the other participant and appends it to
    /// the transcript.
    pub async fn relay(
        &self,
        sender_phone: &str,
        event: &InboundEvent,
    ) -> Result<RelayOutcome, RelayError> {
        let Some(session) = self.session(sender_phone).await? else {
            return Ok(RelayOutcome::NoActiveSession);
        };
        let Some(role) = session.role_of(sender_phone) else {
            return Ok(RelayOutcome::NoActiveSession);
        };

        let sender = self.store.find_user_by_phone(sender_phone).await?;
        let sender_name = sender
            .as_ref()
            .map(|user| user.name.clone())
            .unwrap_or_else(|| session.name_of(role).to_string());
        let recipient_phone = session.phone_of(role.counterpart()).to_string();

        let rendered = render_relayed(&event.kind);
        let delivered = self
            .outbox
            .send_text(&recipient_phone, format!("👤 {sender_name}: {}", rendered.notice))
            .await;

        match sender {
            Some(user) => {
                if let Err(err) = self
                    .store
                    .append_transcript(NewTranscriptMessage {
                        request_id: session.request_id,
                        sender_id: user.id,
                        content: rendered.content,
                        kind: rendered.kind,
                    })
                    .await
                {
                    warn!(request_id = %session.request_id, "failed to persist chat transcript: {err}");
                }
            }
            None => warn!(
                request_id = %session.request_id,
                phone = %phone_label(sender_phone),
                "chat sender has no user record; transcript row skipped"
            ),
        }

        debug!(
            request_id = %session.request_id,
            from = %phone_label(sender_phone),
            to = %phone_label(&recipient_phone),
            delivered,
            "chat message relayed"
        );
        Ok(RelayOutcome::Relayed {
            recipient_phone,
            delivered,
        })
    }

    /// Deletes both records and notifies both parties. `None` when `ended_by`
    /// has no live chat for `request_id`.
    pub async fn end(
        &self,
        request_id: Uuid,
        ended_by: &str,
    ) -> Result<Option<ChatSession>, RelayError> {
        let Some(session) = self
            .session(ended_by)
            .await?
            .filter(|session| session.request_id == request_id)
        else {
            return Ok(None);
        };

        self.remove_pair(&session).await?;

        let ended_by_name = match session.role_of(ended_by) {
            Some(role) => session.name_of(role).to_string(),
            None => ended_by.to_string(),
        };
        self.outbox
            .send_text(
                &session.customer_phone,
                format!(
                    "💬 Chat ended by {ended_by_name}.\n\nType \"menu\" to start a new service request."
                ),
            )
            .await;
        self.outbox
            .send_text(
                &session.provider_phone,
                format!("💬 Chat ended by {ended_by_name}.\n\nType \"menu\" to return to your dashboard."),
            )
            .await;

        info!(request_id = %request_id, "chat session ended");
        Ok(Some(session))
    }

    /// Completes the request, ends its chat and asks the customer to rate.
    pub async fn mark_complete(
        &self,
        request_id: Uuid,
        provider_phone: &str,
    ) -> Result<CompletionOutcome, RelayError> {
        if !self.store.complete_service_request(request_id).await? {
            return Ok(CompletionOutcome::NotCompletable);
        }
        info!(request_id = %request_id, "service request completed");

        let ended = self.end(request_id, provider_phone).await?;
        let rating_target = match &ended {
            Some(session) => Some((session.customer_phone.clone(), session.provider_name.clone())),
            None => self.rating_target(request_id).await?,
        };

        match rating_target {
            Some((customer_phone, provider_name)) => {
                self.outbox
                    .send_text(
                        &customer_phone,
                        format!(
                            "✅ The service has been completed!\n\nHow was your experience with {provider_name}?"
                        ),
                    )
                    .await;
                self.outbox
                    .send_list(&customer_phone, rating_prompt(request_id, &provider_name))
                    .await;
            }
            None => warn!(request_id = %request_id, "completed request has no reachable customer"),
        }
        self.outbox
            .send_text(
                provider_phone,
                "✅ Service marked as completed!\n\nThe customer will be asked to rate your service.",
            )
            .await;

        Ok(match ended {
            Some(session) => CompletionOutcome::Completed(session),
            None => CompletionOutcome::CompletedWithoutChat,
        })
    }

    /// Customer phone and provider name for a request, read from the store.
    async fn rating_target(&self, request_id: Uuid) -> Result<Option<(String, String)>, RelayError> {
        let Some(request) = self.store.get_service_request(request_id).await? else {
            return Ok(None);
        };
        let Some(customer) = self.store.get_user(request.customer_id).await? else {
            return Ok(None);
        };
        let provider_name = match request.provider_id {
            Some(provider_id) => self
                .store
                .get_provider_detail(provider_id)
                .await?
                .map(|provider| provider.name),
            None => None,
        };
        Ok(Some((
            customer.phone,
            provider_name.unwrap_or_else(|| "your provider".to_string()),
        )))
    }

    async fn pair_is_intact(
        &self,
        session: &ChatSession,
        found_as: ChatRole,
    ) -> Result<bool, RelayError> {
        let pair_key = match found_as {
            ChatRole::Customer => self.provider_key(&session.provider_phone),
            ChatRole::Provider => self.customer_key(&session.customer_phone),
        };
        let Some(raw) = self.kv.get(&pair_key).await? else {
            return Ok(false);
        };
        Ok(serde_json::from_str::<ChatSession>(&raw)
            .is_ok_and(|pair| pair.request_id == session.request_id))
    }

    async fn remove_pair(&self, session: &ChatSession) -> Result<(), RelayError> {
        self.kv
            .delete(&self.customer_key(&session.customer_phone))
            .await?;
        self.kv
            .delete(&self.provider_key(&session.provider_phone))
            .await?;
        Ok(())
    }

    fn customer_key(&self, phone: &str) -> String {
        compose_key(&self.key_prefix, CUSTOMER_SCOPE, phone)
    }

    fn provider_key(&self, phone: &str) -> String {
        compose_key(&self.key_prefix, PROVIDER_SCOPE, phone)
    }
}

struct RenderedMessage {
    notice: String,
    content: String,
    kind: TranscriptKind,
}

fn render_relayed(kind: &InboundKind) -> RenderedMessage {
    match kind {
        InboundKind::Text { body } => RenderedMessage {
            notice: body.clone(),
            content: body.clone(),
            kind: TranscriptKind::Text,
        },
        InboundKind::Image { media_id, caption } => {
            let caption = caption.as_deref().unwrap_or_default();
            RenderedMessage {
                notice: if caption.is_empty() {
                    "📷 Image".to_string()
                } else {
                    format!("📷 Image: {caption}")
                },
                content: json!({ "imageId": media_id, "caption": caption }).to_string(),
                kind: TranscriptKind::Image,
            }
        }
        InboundKind::Location {
            latitude,
            longitude,
            name,
            address,
        } => {
            let label = name
                .as_deref()
                .filter(|value| !value.is_empty())
                .or(address.as_deref().filter(|value| !value.is_empty()))
                .map(str::to_string)
                .unwrap_or_else(|| format!("{latitude}, {longitude}"));
            RenderedMessage {
                notice: format!("📍 Location: {label}"),
                content: json!({
                    "lat": latitude,
                    "lng": longitude,
                    "name": name,
                    "address": address,
                })
                .to_string(),
                kind: TranscriptKind::Location,
            }
        }
        InboundKind::Audio { media_id } => RenderedMessage {
            notice: "🎤 Voice message".to_string(),
            content: json!({ "audioId": media_id }).to_string(),
            kind: TranscriptKind::Text,
        },
        other => RenderedMessage {
            notice: "📎 Message (unsupported type)".to_string(),
            content: json!({ "type": unsupported_type(other) }).to_string(),
            kind: TranscriptKind::Text,
        },
    }
}

fn unsupported_type(kind: &InboundKind) -> &str {
    match kind {
        InboundKind::Document { .. } => "document",
        InboundKind::ListReply { .. } | InboundKind::ButtonReply { .. } => "interactive",
        InboundKind::Unsupported { message_type } => message_type,
        _ => "unknown",
    }
}

pub fn rating_row_id(stars: i32, request_id: Uuid) -> String {
    format!("{RATING_ROW_PREFIX}{stars}_{request_id}")
}

/// Parses `rate_<stars>_<requestId>`.
pub fn parse_rating_row_id(row_id: &str) -> Option<(i32, Uuid)> {
    let (stars, request_id) = row_id.strip_prefix(RATING_ROW_PREFIX)?.split_once('_')?;
    let stars = stars.parse::<i32>().ok().filter(|stars| (1..=5).contains(stars))?;
    Some((stars, Uuid::parse_str(request_id).ok()?))
}

pub fn rating_prompt(request_id: Uuid, provider_name: &str) -> ListPrompt {
    let labels = [
        (5, "Excellent"),
        (4, "Good"),
        (3, "Okay"),
        (2, "Poor"),
        (1, "Terrible"),
    ];
    ListPrompt {
        header: "Rate Your Service".to_string(),
        body: format!("Tap below to rate {provider_name} from 1 to 5 stars."),
        footer: FOOTER_TEXT.to_string(),
        button: "Rate Service".to_string(),
        sections: vec![ListSection {
            title: "Your Rating".to_string(),
            rows: labels
                .into_iter()
                .map(|(stars, label)| ListRow {
                    id: rating_row_id(stars, request_id),
                    title: star_string(stars),
                    description: label.to_string(),
                })
                .collect(),
        }],
    }
}
