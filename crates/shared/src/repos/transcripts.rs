use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use crate::models::{NewTranscriptMessage, TranscriptKind, TranscriptMessage};

use super::{Store, StoreError};

impl Store {
    pub async fn append_transcript(
        &self,
        message: &NewTranscriptMessage,
    ) -> Result<TranscriptMessage, StoreError> {
        let row = sqlx::query(
            "INSERT INTO messages (request_id, sender_id, content, message_type)
             VALUES ($1, $2, $3, $4)
             RETURNING id, request_id, sender_id, content, message_type, created_at",
        )
        .bind(message.request_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(message.kind.as_str())
        .fetch_one(&self.pool)
        .await?;

        transcript_from_row(&row)
    }

    pub async fn list_transcript(
        &self,
        request_id: Uuid,
    ) -> Result<Vec<TranscriptMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, request_id, sender_id, content, message_type, created_at
             FROM messages
             WHERE request_id = $1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transcript_from_row).collect()
    }
}

fn transcript_from_row(row: &PgRow) -> Result<TranscriptMessage, StoreError> {
    let kind: String = row.try_get("message_type")?;
    Ok(TranscriptMessage {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        sender_id: row.try_get("sender_id")?,
        content: row.try_get("content")?,
        kind: TranscriptKind::from_db(&kind).ok_or_else(|| {
            StoreError::InvalidData(format!("unknown transcript kind persisted: {kind}"))
        })?,
        created_at: row.try_get("created_at")?,
    })
}
