use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use crate::catalog::ServiceCategory;
use crate::models::{NewProviderProfile, ProviderDetail, ProviderProfile, ProviderStats, ProviderSummary};

use super::{Store, StoreError, parse_services, service_strings};

impl Store {
    pub async fn create_provider_profile(
        &self,
        profile: &NewProviderProfile,
    ) -> Result<ProviderProfile, StoreError> {
        let row = sqlx::query(
            "INSERT INTO providers (user_id, service_types, bio)
             VALUES ($1, $2, $3)
             RETURNING id, user_id, service_types, is_online, rating_average, total_jobs, bio",
        )
        .bind(profile.user_id)
        .bind(service_strings(&profile.service_types))
        .bind(&profile.bio)
        .fetch_one(&self.pool)
        .await?;

        provider_from_row(&row)
    }

    pub async fn find_provider_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<ProviderProfile>, StoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, service_types, is_online, rating_average, total_jobs, bio
             FROM providers
             WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| provider_from_row(&row)).transpose()
    }

    pub async fn set_provider_online(
        &self,
        provider_id: Uuid,
        online: bool,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE providers
             SET is_online = $2,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(provider_id)
        .bind(online)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_online_providers(
        &self,
        category: ServiceCategory,
        limit: i64,
    ) -> Result<Vec<ProviderSummary>, StoreError> {
        let rows = sqlx::query(
            "SELECT
                p.id AS provider_id,
                p.user_id,
                u.name,
                p.service_types,
                p.rating_average,
                p.total_jobs,
                p.bio
             FROM providers p
             JOIN users u ON u.id = p.user_id
             WHERE p.is_online = TRUE
               AND $1 = ANY(p.service_types)
             ORDER BY p.rating_average DESC, p.total_jobs DESC, u.name ASC
             LIMIT $2",
        )
        .bind(category.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ProviderSummary {
                    provider_id: row.try_get("provider_id")?,
                    user_id: row.try_get("user_id")?,
                    name: row.try_get("name")?,
                    service_types: parse_services(row.try_get("service_types")?)?,
                    rating_average: row.try_get("rating_average")?,
                    total_jobs: row.try_get("total_jobs")?,
                    bio: row.try_get("bio")?,
                })
            })
            .collect()
    }

    pub async fn get_provider_detail(
        &self,
        provider_id: Uuid,
    ) -> Result<Option<ProviderDetail>, StoreError> {
        let row = sqlx::query(
            "SELECT
                p.id AS provider_id,
                p.user_id,
                u.name,
                u.phone,
                p.service_types,
                p.rating_average,
                p.total_jobs,
                p.bio,
                p.is_online
             FROM providers p
             JOIN users u ON u.id = p.user_id
             WHERE p.id = $1",
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ProviderDetail {
                provider_id: row.try_get("provider_id")?,
                user_id: row.try_get("user_id")?,
                name: row.try_get("name")?,
                phone: row.try_get("phone")?,
                service_types: parse_services(row.try_get("service_types")?)?,
                rating_average: row.try_get("rating_average")?,
                total_jobs: row.try_get("total_jobs")?,
                bio: row.try_get("bio")?,
                is_online: row.try_get("is_online")?,
            })
        })
        .transpose()
    }

    pub async fn provider_stats(
        &self,
        provider_id: Uuid,
    ) -> Result<Option<ProviderStats>, StoreError> {
        let row = sqlx::query(
            "SELECT
                p.rating_average,
                p.total_jobs,
                p.is_online,
                (SELECT COUNT(*)
                 FROM service_requests r
                 WHERE r.provider_id = p.id
                   AND r.status = 'completed') AS completed_jobs
             FROM providers p
             WHERE p.id = $1",
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ProviderStats {
                rating_average: row.try_get("rating_average")?,
                total_jobs: row.try_get("total_jobs")?,
                completed_jobs: row.try_get("completed_jobs")?,
                is_online: row.try_get("is_online")?,
            })
        })
        .transpose()
    }
}

fn provider_from_row(row: &PgRow) -> Result<ProviderProfile, StoreError> {
    Ok(ProviderProfile {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        service_types: parse_services(row.try_get("service_types")?)?,
        is_online: row.try_get("is_online")?,
        rating_average: row.try_get("rating_average")?,
        total_jobs: row.try_get("total_jobs")?,
        bio: row.try_get("bio")?,
    })
}
