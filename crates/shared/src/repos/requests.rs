use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use crate::catalog::ServiceCategory;
use crate::models::{NewServiceRequest, ProviderRequestSummary, RequestStatus, ServiceRequest};

use super::{Store, StoreError, status_strings};

const REQUEST_COLUMNS: &str = "id, customer_id, service_type, status, origin_lat, origin_lng, \
     address, description, provider_id, accepted_at, completed_at, created_at";

/// Statuses from which an assigned job may be completed.
pub(crate) const COMPLETABLE_STATUSES: [RequestStatus; 3] = [
    RequestStatus::ProviderAssigned,
    RequestStatus::ProviderArriving,
    RequestStatus::InProgress,
];

impl Store {
    pub async fn create_service_request(
        &self,
        request: &NewServiceRequest,
    ) -> Result<ServiceRequest, StoreError> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO service_requests (
                id,
                customer_id,
                service_type,
                status,
                origin_lat,
                origin_lng,
                address,
                description,
                provider_id
             ) VALUES ($1, $2, $3, 'created', $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO NOTHING
             RETURNING {REQUEST_COLUMNS}"
        ))
        .bind(request.id)
        .bind(request.customer_id)
        .bind(request.service_type.as_str())
        .bind(request.origin_lat)
        .bind(request.origin_lng)
        .bind(&request.address)
        .bind(&request.description)
        .bind(request.provider_id)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => request_from_row(&row),
            None => self
                .get_service_request(request.id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("service request {}", request.id))),
        }
    }

    pub async fn get_service_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<ServiceRequest>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM service_requests WHERE id = $1"
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| request_from_row(&row)).transpose()
    }

    pub async fn find_active_request_for_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Option<ServiceRequest>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS}
             FROM service_requests
             WHERE customer_id = $1
               AND status NOT IN ('completed', 'cancelled', 'paid')
             ORDER BY created_at DESC
             LIMIT 1"
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| request_from_row(&row)).transpose()
    }

    pub async fn list_requests_for_customer(
        &self,
        customer_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ServiceRequest>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS}
             FROM service_requests
             WHERE customer_id = $1
             ORDER BY created_at DESC
             LIMIT $2"
        ))
        .bind(customer_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(request_from_row).collect()
    }

    pub async fn list_requests_for_provider(
        &self,
        provider_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ProviderRequestSummary>, StoreError> {
        let rows = sqlx::query(
            "SELECT
                r.id,
                r.customer_id,
                r.service_type,
                r.status,
                r.origin_lat,
                r.origin_lng,
                r.address,
                r.description,
                r.provider_id,
                r.accepted_at,
                r.completed_at,
                r.created_at,
                u.name AS customer_name
             FROM service_requests r
             JOIN users u ON u.id = r.customer_id
             WHERE r.provider_id = $1
             ORDER BY r.created_at DESC
             LIMIT $2",
        )
        .bind(provider_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ProviderRequestSummary {
                    request: request_from_row(row)?,
                    customer_name: row.try_get("customer_name")?,
                })
            })
            .collect()
    }

    pub async fn transition_request(
        &self,
        request_id: Uuid,
        from: &[RequestStatus],
        to: RequestStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE service_requests
             SET status = $3,
                 accepted_at = CASE WHEN $3 = 'provider_assigned' THEN NOW() ELSE accepted_at END,
                 completed_at = CASE WHEN $3 = 'completed' THEN NOW() ELSE completed_at END,
                 updated_at = NOW()
             WHERE id = $1
               AND status = ANY($2)",
        )
        .bind(request_id)
        .bind(status_strings(from))
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn complete_service_request(&self, request_id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let provider_id: Option<Option<Uuid>> = sqlx::query_scalar(
            "UPDATE service_requests
             SET status = 'completed',
                 completed_at = NOW(),
                 updated_at = NOW()
             WHERE id = $1
               AND status = ANY($2)
             RETURNING provider_id",
        )
        .bind(request_id)
        .bind(status_strings(&COMPLETABLE_STATUSES))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(provider_id) = provider_id else {
            tx.rollback().await?;
            return Ok(false);
        };

        if let Some(provider_id) = provider_id {
            sqlx::query(
                "UPDATE providers
                 SET total_jobs = total_jobs + 1,
                     updated_at = NOW()
                 WHERE id = $1",
            )
            .bind(provider_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}

fn request_from_row(row: &PgRow) -> Result<ServiceRequest, StoreError> {
    let service_type: String = row.try_get("service_type")?;
    let status: String = row.try_get("status")?;
    Ok(ServiceRequest {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        service_type: ServiceCategory::from_id(&service_type).ok_or_else(|| {
            StoreError::InvalidData(format!("unknown service type persisted: {service_type}"))
        })?,
        status: RequestStatus::from_db(&status).ok_or_else(|| {
            StoreError::InvalidData(format!("unknown request status persisted: {status}"))
        })?,
        origin_lat: row.try_get("origin_lat")?,
        origin_lng: row.try_get("origin_lng")?,
        address: row.try_get("address")?,
        description: row.try_get("description")?,
        provider_id: row.try_get("provider_id")?,
        accepted_at: row.try_get("accepted_at")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
    })
}
