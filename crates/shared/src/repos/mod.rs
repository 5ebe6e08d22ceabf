use std::future::Future;
use std::pin::Pin;

use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::catalog::ServiceCategory;
use crate::models::{
    Assignment, AssignmentStatus, MessageLogEntry, NewProviderProfile, NewRating,
    NewServiceRequest, NewTranscriptMessage, NewUser, ProviderDetail, ProviderProfile,
    ProviderRequestSummary, ProviderStats, ProviderSummary, RequestStatus, Review, ServiceRequest,
    TranscriptMessage, User,
};

mod assignments;
mod memory;
mod providers;
mod ratings;
mod requests;
mod transcripts;
mod users;

pub use memory::MemoryStore;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Postgres-backed entity store.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

/// Durable entities used by the conversation layer: users, provider
/// profiles, service requests, assignments, ratings, transcripts.
pub trait EntityStore: Send + Sync {
    fn ping(&self) -> StoreFuture<'_, ()>;

    fn find_user_by_phone<'a>(&'a self, phone: &'a str) -> StoreFuture<'a, Option<User>>;
    fn get_user(&self, user_id: Uuid) -> StoreFuture<'_, Option<User>>;
    fn create_user(&self, user: NewUser) -> StoreFuture<'_, User>;

    fn create_provider_profile(
        &self,
        profile: NewProviderProfile,
    ) -> StoreFuture<'_, ProviderProfile>;
    fn find_provider_by_user(&self, user_id: Uuid) -> StoreFuture<'_, Option<ProviderProfile>>;
    fn set_provider_online(&self, provider_id: Uuid, online: bool) -> StoreFuture<'_, bool>;
    /// Online providers offering `category`, best rated first.
    fn list_online_providers(
        &self,
        category: ServiceCategory,
        limit: i64,
    ) -> StoreFuture<'_, Vec<ProviderSummary>>;
    fn get_provider_detail(&self, provider_id: Uuid) -> StoreFuture<'_, Option<ProviderDetail>>;
    /// Newest first. Reviews are keyed by the provider's user id.
    fn recent_reviews(&self, ratee_id: Uuid, limit: i64) -> StoreFuture<'_, Vec<Review>>;
    fn provider_stats(&self, provider_id: Uuid) -> StoreFuture<'_, Option<ProviderStats>>;

    fn create_service_request(
        &self,
        request: NewServiceRequest,
    ) -> StoreFuture<'_, ServiceRequest>;
    fn get_service_request(&self, request_id: Uuid) -> StoreFuture<'_, Option<ServiceRequest>>;
    /// Most recent non-terminal request of a customer.
    fn find_active_request_for_customer(
        &self,
        customer_id: Uuid,
    ) -> StoreFuture<'_, Option<ServiceRequest>>;
    fn list_requests_for_customer(
        &self,
        customer_id: Uuid,
        limit: i64,
    ) -> StoreFuture<'_, Vec<ServiceRequest>>;
    fn list_requests_for_provider(
        &self,
        provider_id: Uuid,
        limit: i64,
    ) -> StoreFuture<'_, Vec<ProviderRequestSummary>>;
    /// Moves a request to `to` only while its status is one of `from`.
    fn transition_request<'a>(
        &'a self,
        request_id: Uuid,
        from: &'a [RequestStatus],
        to: RequestStatus,
    ) -> StoreFuture<'a, bool>;
    /// Completes an assigned request and credits the provider with a job.
    fn complete_service_request(&self, request_id: Uuid) -> StoreFuture<'_, bool>;

    /// Returns the existing pending assignment for the pair if there is one.
    fn create_assignment(&self, request_id: Uuid, provider_id: Uuid)
    -> StoreFuture<'_, Assignment>;
    fn get_assignment(&self, assignment_id: Uuid) -> StoreFuture<'_, Option<Assignment>>;
    /// Atomically moves a pending assignment to `target`. `false` when it was
    /// no longer pending.
    fn claim_assignment(
        &self,
        assignment_id: Uuid,
        target: AssignmentStatus,
    ) -> StoreFuture<'_, bool>;
    fn revoke_accepted_assignment(&self, assignment_id: Uuid) -> StoreFuture<'_, bool>;
    fn cancel_pending_assignments(&self, request_id: Uuid) -> StoreFuture<'_, u64>;

    /// Records a rating once per (request, rater) and refreshes the ratee's
    /// provider average. `false` when already rated.
    fn create_rating(&self, rating: NewRating) -> StoreFuture<'_, bool>;

    fn append_transcript(
        &self,
        message: NewTranscriptMessage,
    ) -> StoreFuture<'_, TranscriptMessage>;
    fn list_transcript(&self, request_id: Uuid) -> StoreFuture<'_, Vec<TranscriptMessage>>;

    fn log_message(&self, entry: MessageLogEntry) -> StoreFuture<'_, ()>;
}

impl EntityStore for Store {
    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(Store::ping(self))
    }

    fn find_user_by_phone<'a>(&'a self, phone: &'a str) -> StoreFuture<'a, Option<User>> {
        Box::pin(Store::find_user_by_phone(self, phone))
    }

    fn get_user(&self, user_id: Uuid) -> StoreFuture<'_, Option<User>> {
        Box::pin(Store::get_user(self, user_id))
    }

    fn create_user(&self, user: NewUser) -> StoreFuture<'_, User> {
        Box::pin(async move { Store::create_user(self, &user).await })
    }

    fn create_provider_profile(
        &self,
        profile: NewProviderProfile,
    ) -> StoreFuture<'_, ProviderProfile> {
        Box::pin(async move { Store::create_provider_profile(self, &profile).await })
    }

    fn find_provider_by_user(&self, user_id: Uuid) -> StoreFuture<'_, Option<ProviderProfile>> {
        Box::pin(Store::find_provider_by_user(self, user_id))
    }

    fn set_provider_online(&self, provider_id: Uuid, online: bool) -> StoreFuture<'_, bool> {
        Box::pin(Store::set_provider_online(self, provider_id, online))
    }

    fn list_online_providers(
        &self,
        category: ServiceCategory,
        limit: i64,
    ) -> StoreFuture<'_, Vec<ProviderSummary>> {
        Box::pin(Store::list_online_providers(self, category, limit))
    }

    fn get_provider_detail(&self, provider_id: Uuid) -> StoreFuture<'_, Option<ProviderDetail>> {
        Box::pin(Store::get_provider_detail(self, provider_id))
    }

    fn recent_reviews(&self, ratee_id: Uuid, limit: i64) -> StoreFuture<'_, Vec<Review>> {
        Box::pin(Store::recent_reviews(self, ratee_id, limit))
    }

    fn provider_stats(&self, provider_id: Uuid) -> StoreFuture<'_, Option<ProviderStats>> {
        Box::pin(Store::provider_stats(self, provider_id))
    }

    fn create_service_request(
        &self,
        request: NewServiceRequest,
    ) -> StoreFuture<'_, ServiceRequest> {
        Box::pin(async move { Store::create_service_request(self, &request).await })
    }

    fn get_service_request(&self, request_id: Uuid) -> StoreFuture<'_, Option<ServiceRequest>> {
        Box::pin(Store::get_service_request(self, request_id))
    }

    fn find_active_request_for_customer(
        &self,
        customer_id: Uuid,
    ) -> StoreFuture<'_, Option<ServiceRequest>> {
        Box::pin(Store::find_active_request_for_customer(self, customer_id))
    }

    fn list_requests_for_customer(
        &self,
        customer_id: Uuid,
        limit: i64,
    ) -> StoreFuture<'_, Vec<ServiceRequest>> {
        Box::pin(Store::list_requests_for_customer(self, customer_id, limit))
    }

    fn list_requests_for_provider(
        &self,
        provider_id: Uuid,
        limit: i64,
    ) -> StoreFuture<'_, Vec<ProviderRequestSummary>> {
        Box::pin(Store::list_requests_for_provider(self, provider_id, limit))
    }

    fn transition_request<'a>(
        &'a self,
        request_id: Uuid,
        from: &'a [RequestStatus],
        to: RequestStatus,
    ) -> StoreFuture<'a, bool> {
        Box::pin(Store::transition_request(self, request_id, from, to))
    }

    fn complete_service_request(&self, request_id: Uuid) -> StoreFuture<'_, bool> {
        Box::pin(Store::complete_service_request(self, request_id))
    }

    fn create_assignment(
        &self,
        request_id: Uuid,
        provider_id: Uuid,
    ) -> StoreFuture<'_, Assignment> {
        Box::pin(Store::create_assignment(self, request_id, provider_id))
    }

    fn get_assignment(&self, assignment_id: Uuid) -> StoreFuture<'_, Option<Assignment>> {
        Box::pin(Store::get_assignment(self, assignment_id))
    }

    fn claim_assignment(
        &self,
        assignment_id: Uuid,
        target: AssignmentStatus,
    ) -> StoreFuture<'_, bool> {
        Box::pin(Store::claim_assignment(self, assignment_id, target))
    }

    fn revoke_accepted_assignment(&self, assignment_id: Uuid) -> StoreFuture<'_, bool> {
        Box::pin(Store::revoke_accepted_assignment(self, assignment_id))
    }

    fn cancel_pending_assignments(&self, request_id: Uuid) -> StoreFuture<'_, u64> {
        Box::pin(Store::cancel_pending_assignments(self, request_id))
    }

    fn create_rating(&self, rating: NewRating) -> StoreFuture<'_, bool> {
        Box::pin(async move { Store::create_rating(self, &rating).await })
    }

    fn append_transcript(
        &self,
        message: NewTranscriptMessage,
    ) -> StoreFuture<'_, TranscriptMessage> {
        Box::pin(async move { Store::append_transcript(self, &message).await })
    }

    fn list_transcript(&self, request_id: Uuid) -> StoreFuture<'_, Vec<TranscriptMessage>> {
        Box::pin(Store::list_transcript(self, request_id))
    }

    fn log_message(&self, entry: MessageLogEntry) -> StoreFuture<'_, ()> {
        Box::pin(async move { Store::log_message(self, &entry).await })
    }
}

pub(crate) fn status_strings(statuses: &[RequestStatus]) -> Vec<String> {
    statuses
        .iter()
        .map(|status| status.as_str().to_string())
        .collect()
}

pub(crate) fn parse_services(values: Vec<String>) -> Result<Vec<ServiceCategory>, StoreError> {
    values
        .iter()
        .map(|value| {
            ServiceCategory::from_id(value).ok_or_else(|| {
                StoreError::InvalidData(format!("unknown service type persisted: {value}"))
            })
        })
        .collect()
}

pub(crate) fn service_strings(services: &[ServiceCategory]) -> Vec<String> {
    services
        .iter()
        .map(|service| service.as_str().to_string())
        .collect()
}
