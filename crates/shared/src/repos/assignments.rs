use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use crate::models::{Assignment, AssignmentStatus};

use super::{Store, StoreError};

impl Store {
    pub async fn create_assignment(
        &self,
        request_id: Uuid,
        provider_id: Uuid,
    ) -> Result<Assignment, StoreError> {
        let inserted = sqlx::query(
            "INSERT INTO assignments (request_id, provider_id, status)
             VALUES ($1, $2, 'pending')
             ON CONFLICT (request_id, provider_id) WHERE status = 'pending' DO NOTHING
             RETURNING id, request_id, provider_id, status, accepted_at, created_at",
        )
        .bind(request_id)
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return assignment_from_row(&row);
        }

        let existing = sqlx::query(
            "SELECT id, request_id, provider_id, status, accepted_at, created_at
             FROM assignments
             WHERE request_id = $1
               AND provider_id = $2
               AND status = 'pending'",
        )
        .bind(request_id)
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some(row) => assignment_from_row(&row),
            None => Err(StoreError::NotFound(format!(
                "pending assignment for request {request_id} vanished during insert"
            ))),
        }
    }

    pub async fn get_assignment(&self, assignment_id: Uuid) -> Result<Option<Assignment>, StoreError> {
        let row = sqlx::query(
            "SELECT id, request_id, provider_id, status, accepted_at, created_at
             FROM assignments
             WHERE id = $1",
        )
        .bind(assignment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| assignment_from_row(&row)).transpose()
    }

    pub async fn claim_assignment(
        &self,
        assignment_id: Uuid,
        target: AssignmentStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE assignments
             SET status = $2,
                 accepted_at = CASE WHEN $2 = 'accepted' THEN NOW() ELSE accepted_at END,
                 updated_at = NOW()
             WHERE id = $1
               AND status = 'pending'",
        )
        .bind(assignment_id)
        .bind(target.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Moves an accepted assignment to cancelled; used when its request
    /// closed before the acceptance could be applied.
    pub async fn revoke_accepted_assignment(&self, assignment_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE assignments
             SET status = 'cancelled',
                 updated_at = NOW()
             WHERE id = $1
               AND status = 'accepted'",
        )
        .bind(assignment_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn cancel_pending_assignments(&self, request_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE assignments
             SET status = 'cancelled',
                 updated_at = NOW()
             WHERE request_id = $1
               AND status = 'pending'",
        )
        .bind(request_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn assignment_from_row(row: &PgRow) -> Result<Assignment, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Assignment {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        provider_id: row.try_get("provider_id")?,
        status: AssignmentStatus::from_db(&status).ok_or_else(|| {
            StoreError::InvalidData(format!("unknown assignment status persisted: {status}"))
        })?,
        accepted_at: row.try_get("accepted_at")?,
        created_at: row.try_get("created_at")?,
    })
}
