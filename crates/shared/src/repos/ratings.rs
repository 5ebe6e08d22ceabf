use sqlx::Row;
use uuid::Uuid;

use crate::models::{NewRating, Review};

use super::{Store, StoreError};

impl Store {
    pub async fn create_rating(&self, rating: &NewRating) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO ratings (request_id, rater_id, ratee_id, stars, comment)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (request_id, rater_id) DO NOTHING",
        )
        .bind(rating.request_id)
        .bind(rating.rater_id)
        .bind(rating.ratee_id)
        .bind(rating.stars)
        .bind(&rating.comment)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "UPDATE providers
             SET rating_average = (
                   SELECT COALESCE(AVG(stars)::DOUBLE PRECISION, 0)
                   FROM ratings
                   WHERE ratee_id = $1
                 ),
                 updated_at = NOW()
             WHERE user_id = $1",
        )
        .bind(rating.ratee_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn recent_reviews(&self, ratee_id: Uuid, limit: i64) -> Result<Vec<Review>, StoreError> {
        let rows = sqlx::query(
            "SELECT r.stars, r.comment, u.name AS reviewer_name, r.created_at
             FROM ratings r
             JOIN users u ON u.id = r.rater_id
             WHERE r.ratee_id = $1
             ORDER BY r.created_at DESC
             LIMIT $2",
        )
        .bind(ratee_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Review {
                    stars: row.try_get("stars")?,
                    comment: row.try_get("comment")?,
                    reviewer_name: row.try_get("reviewer_name")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
