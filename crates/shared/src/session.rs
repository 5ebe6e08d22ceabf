use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::kv::{KvError, TtlStore, compose_key};
use crate::redact::phone_label;

const SESSION_SCOPE: &str = "wa_session";
const STATE_TAG: &str = "state";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session storage failed: {0}")]
    Storage(#[from] KvError),
    #[error("session serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("conversation state must serialize to an object with a state tag")]
    UntaggedState,
}

/// Conversation state for one phone number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub phone_number: String,
    pub state: String,
    pub data: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

/// Phone-keyed session storage. Every write replaces the whole record and
/// restarts the expiry window.
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn TtlStore>,
    key_prefix: String,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn TtlStore>, key_prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            kv,
            key_prefix: key_prefix.into(),
            ttl,
        }
    }

    pub async fn get(&self, phone: &str) -> Result<Option<SessionRecord>, SessionError> {
        let Some(raw) = self.kv.get(&self.key(phone)).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<SessionRecord>(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!(phone = %phone_label(phone), "discarding unreadable session: {err}");
                Ok(None)
            }
        }
    }

    pub async fn put(
        &self,
        phone: &str,
        state: &str,
        data: Map<String, Value>,
    ) -> Result<SessionRecord, SessionError> {
        let record = SessionRecord {
            phone_number: phone.to_string(),
            state: state.to_string(),
            data,
            updated_at: Utc::now(),
        };
        let encoded = serde_json::to_string(&record)?;
        self.kv.set_ex(&self.key(phone), encoded, self.ttl).await?;
        Ok(record)
    }

    pub async fn delete(&self, phone: &str) -> Result<bool, SessionError> {
        Ok(self.kv.delete(&self.key(phone)).await?)
    }

    /// Persists a typed conversation state as its tag plus data map.
    pub async fn put_state<S: Serialize>(
        &self,
        phone: &str,
        state: &S,
    ) -> Result<SessionRecord, SessionError> {
        let (tag, data) = encode_state(state)?;
        self.put(phone, &tag, data).await
    }

    fn key(&self, phone: &str) -> String {
        compose_key(&self.key_prefix, SESSION_SCOPE, phone)
    }
}

/// Splits a tagged state into `(tag, data)`.
pub fn encode_state<S: Serialize>(state: &S) -> Result<(String, Map<String, Value>), SessionError> {
    let Value::Object(mut data) = serde_json::to_value(state)? else {
        return Err(SessionError::UntaggedState);
    };
    let Some(Value::String(tag)) = data.remove(STATE_TAG) else {
        return Err(SessionError::UntaggedState);
    };
    Ok((tag, data))
}

/// Rejoins a stored record into a typed state. `None` when the tag is not
/// one of `S`'s variants or the data does not fit that variant.
pub fn decode_state<S: DeserializeOwned>(record: &SessionRecord) -> Option<S> {
    let mut data = record.data.clone();
    data.insert(STATE_TAG.to_string(), Value::String(record.state.clone()));
    serde_json::from_value(Value::Object(data)).ok()
}
