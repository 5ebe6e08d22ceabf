use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use crate::catalog::ServiceCategory;
use crate::models::{
    Assignment, AssignmentStatus, MessageLogEntry, NewProviderProfile, NewRating,
    NewServiceRequest, NewTranscriptMessage, NewUser, ProviderDetail, ProviderProfile,
    ProviderRequestSummary, ProviderStats, ProviderSummary, RequestStatus, Review, Role,
    ServiceRequest, TranscriptMessage, User,
};

use super::requests::COMPLETABLE_STATUSES;
use super::{EntityStore, StoreError, StoreFuture};

#[derive(Debug, Clone)]
struct StoredRating {
    rating: NewRating,
    created_at: chrono::DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    users: Vec<User>,
    providers: Vec<ProviderProfile>,
    requests: Vec<ServiceRequest>,
    assignments: Vec<Assignment>,
    ratings: Vec<StoredRating>,
    transcript: Vec<TranscriptMessage>,
    message_log: Vec<MessageLogEntry>,
}

/// Process-local entity store with the same semantics as the Postgres store.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unavailable every operation fails like a lost database.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Inserts a provider user and profile directly.
    pub fn seed_provider(
        &self,
        name: &str,
        phone: &str,
        services: &[ServiceCategory],
        rating_average: f64,
        total_jobs: i32,
        is_online: bool,
    ) -> ProviderDetail {
        let mut state = self.lock_state();
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            phone: phone.to_string(),
            role: Role::Provider,
            whatsapp_name: None,
            created_at: Utc::now(),
        };
        let profile = ProviderProfile {
            id: Uuid::new_v4(),
            user_id: user.id,
            service_types: services.to_vec(),
            is_online,
            rating_average,
            total_jobs,
            bio: format!("{name} has years of experience."),
        };
        state.users.push(user.clone());
        state.providers.push(profile.clone());
        detail_for(&user, &profile)
    }

    pub fn service_requests(&self) -> Vec<ServiceRequest> {
        self.lock_state().requests.clone()
    }

    pub fn assignments(&self) -> Vec<Assignment> {
        self.lock_state().assignments.clone()
    }

    pub fn users(&self) -> Vec<User> {
        self.lock_state().users.clone()
    }

    pub fn providers(&self) -> Vec<ProviderProfile> {
        self.lock_state().providers.clone()
    }

    pub fn rating_count(&self) -> usize {
        self.lock_state().ratings.len()
    }

    pub fn message_log(&self) -> Vec<MessageLogEntry> {
        self.lock_state().message_log.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn with_state<T>(
        &self,
        apply: impl FnOnce(&mut MemoryState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        apply(&mut *self.lock_state())
    }
}

fn detail_for(user: &User, profile: &ProviderProfile) -> ProviderDetail {
    ProviderDetail {
        provider_id: profile.id,
        user_id: user.id,
        name: user.name.clone(),
        phone: user.phone.clone(),
        service_types: profile.service_types.clone(),
        rating_average: profile.rating_average,
        total_jobs: profile.total_jobs,
        bio: profile.bio.clone(),
        is_online: profile.is_online,
    }
}

fn newest_first<T: Clone>(items: impl DoubleEndedIterator<Item = T>, limit: i64) -> Vec<T> {
    items
        .rev()
        .take(usize::try_from(limit).unwrap_or(0))
        .collect()
}

impl MemoryState {
    fn user(&self, user_id: Uuid) -> Option<&User> {
        self.users.iter().find(|user| user.id == user_id)
    }

    fn request_mut(&mut self, request_id: Uuid) -> Option<&mut ServiceRequest> {
        self.requests
            .iter_mut()
            .find(|request| request.id == request_id)
    }
}

impl EntityStore for MemoryStore {
    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.with_state(|_| Ok(())) })
    }

    fn find_user_by_phone<'a>(&'a self, phone: &'a str) -> StoreFuture<'a, Option<User>> {
        Box::pin(async move {
            self.with_state(|state| {
                Ok(state.users.iter().find(|user| user.phone == phone).cloned())
            })
        })
    }

    fn get_user(&self, user_id: Uuid) -> StoreFuture<'_, Option<User>> {
        Box::pin(async move { self.with_state(|state| Ok(state.user(user_id).cloned())) })
    }

    fn create_user(&self, user: NewUser) -> StoreFuture<'_, User> {
        Box::pin(async move {
            self.with_state(|state| {
                if state.users.iter().any(|existing| existing.phone == user.phone) {
                    return Err(StoreError::InvalidData(format!(
                        "user with phone {} already exists",
                        user.phone
                    )));
                }
                let created = User {
                    id: Uuid::new_v4(),
                    name: user.name,
                    phone: user.phone,
                    role: user.role,
                    whatsapp_name: user.whatsapp_name,
                    created_at: Utc::now(),
                };
                state.users.push(created.clone());
                Ok(created)
            })
        })
    }

    fn create_provider_profile(
        &self,
        profile: NewProviderProfile,
    ) -> StoreFuture<'_, ProviderProfile> {
        Box::pin(async move {
            self.with_state(|state| {
                if state
                    .providers
                    .iter()
                    .any(|existing| existing.user_id == profile.user_id)
                {
                    return Err(StoreError::InvalidData(format!(
                        "provider profile for user {} already exists",
                        profile.user_id
                    )));
                }
                let created = ProviderProfile {
                    id: Uuid::new_v4(),
                    user_id: profile.user_id,
                    service_types: profile.service_types,
                    is_online: false,
                    rating_average: 0.0,
                    total_jobs: 0,
                    bio: profile.bio,
                };
                state.providers.push(created.clone());
                Ok(created)
            })
        })
    }

    fn find_provider_by_user(&self, user_id: Uuid) -> StoreFuture<'_, Option<ProviderProfile>> {
        Box::pin(async move {
            self.with_state(|state| {
                Ok(state
                    .providers
                    .iter()
                    .find(|profile| profile.user_id == user_id)
                    .cloned())
            })
        })
    }

    fn set_provider_online(&self, provider_id: Uuid, online: bool) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.with_state(|state| {
                match state
                    .providers
                    .iter_mut()
                    .find(|profile| profile.id == provider_id)
                {
                    Some(profile) => {
                        profile.is_online = online;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            })
        })
    }

    fn list_online_providers(
        &self,
        category: ServiceCategory,
        limit: i64,
    ) -> StoreFuture<'_, Vec<ProviderSummary>> {
        Box::pin(async move {
            self.with_state(|state| {
                let mut listed = state
                    .providers
                    .iter()
                    .filter(|profile| profile.is_online && profile.service_types.contains(&category))
                    .filter_map(|profile| {
                        state.user(profile.user_id).map(|user| ProviderSummary {
                            provider_id: profile.id,
                            user_id: user.id,
                            name: user.name.clone(),
                            service_types: profile.service_types.clone(),
                            rating_average: profile.rating_average,
                            total_jobs: profile.total_jobs,
                            bio: profile.bio.clone(),
                        })
                    })
                    .collect::<Vec<_>>();
                listed.sort_by(|left, right| {
                    right
                        .rating_average
                        .total_cmp(&left.rating_average)
                        .then(right.total_jobs.cmp(&left.total_jobs))
                        .then(left.name.cmp(&right.name))
                });
                listed.truncate(usize::try_from(limit).unwrap_or(0));
                Ok(listed)
            })
        })
    }

    fn get_provider_detail(&self, provider_id: Uuid) -> StoreFuture<'_, Option<ProviderDetail>> {
        Box::pin(async move {
            self.with_state(|state| {
                Ok(state
                    .providers
                    .iter()
                    .find(|profile| profile.id == provider_id)
                    .and_then(|profile| {
                        state
                            .user(profile.user_id)
                            .map(|user| detail_for(user, profile))
                    }))
            })
        })
    }

    fn recent_reviews(&self, ratee_id: Uuid, limit: i64) -> StoreFuture<'_, Vec<Review>> {
        Box::pin(async move {
            self.with_state(|state| {
                let reviews = state
                    .ratings
                    .iter()
                    .filter(|stored| stored.rating.ratee_id == ratee_id)
                    .map(|stored| Review {
                        stars: stored.rating.stars,
                        comment: stored.rating.comment.clone(),
                        reviewer_name: state
                            .user(stored.rating.rater_id)
                            .map(|user| user.name.clone())
                            .unwrap_or_default(),
                        created_at: stored.created_at,
                    })
                    .collect::<Vec<_>>();
                Ok(newest_first(reviews.into_iter(), limit))
            })
        })
    }

    fn provider_stats(&self, provider_id: Uuid) -> StoreFuture<'_, Option<ProviderStats>> {
        Box::pin(async move {
            self.with_state(|state| {
                let completed_jobs = state
                    .requests
                    .iter()
                    .filter(|request| {
                        request.provider_id == Some(provider_id)
                            && request.status == RequestStatus::Completed
                    })
                    .count();
                Ok(state
                    .providers
                    .iter()
                    .find(|profile| profile.id == provider_id)
                    .map(|profile| ProviderStats {
                        rating_average: profile.rating_average,
                        total_jobs: profile.total_jobs,
                        completed_jobs: i64::try_from(completed_jobs).unwrap_or(i64::MAX),
                        is_online: profile.is_online,
                    }))
            })
        })
    }

    fn create_service_request(
        &self,
        request: NewServiceRequest,
    ) -> StoreFuture<'_, ServiceRequest> {
        Box::pin(async move {
            self.with_state(|state| {
                if let Some(existing) = state
                    .requests
                    .iter()
                    .find(|existing| existing.id == request.id)
                {
                    return Ok(existing.clone());
                }
                let created = ServiceRequest {
                    id: request.id,
                    customer_id: request.customer_id,
                    service_type: request.service_type,
                    status: RequestStatus::Created,
                    origin_lat: request.origin_lat,
                    origin_lng: request.origin_lng,
                    address: request.address,
                    description: request.description,
                    provider_id: Some(request.provider_id),
                    accepted_at: None,
                    completed_at: None,
                    created_at: Utc::now(),
                };
                state.requests.push(created.clone());
                Ok(created)
            })
        })
    }

    fn get_service_request(&self, request_id: Uuid) -> StoreFuture<'_, Option<ServiceRequest>> {
        Box::pin(async move {
            self.with_state(|state| {
                Ok(state
                    .requests
                    .iter()
                    .find(|request| request.id == request_id)
                    .cloned())
            })
        })
    }

    fn find_active_request_for_customer(
        &self,
        customer_id: Uuid,
    ) -> StoreFuture<'_, Option<ServiceRequest>> {
        Box::pin(async move {
            self.with_state(|state| {
                Ok(state
                    .requests
                    .iter()
                    .rev()
                    .find(|request| {
                        request.customer_id == customer_id && !request.status.is_terminal()
                    })
                    .cloned())
            })
        })
    }

    fn list_requests_for_customer(
        &self,
        customer_id: Uuid,
        limit: i64,
    ) -> StoreFuture<'_, Vec<ServiceRequest>> {
        Box::pin(async move {
            self.with_state(|state| {
                Ok(newest_first(
                    state
                        .requests
                        .iter()
                        .filter(|request| request.customer_id == customer_id)
                        .cloned(),
                    limit,
                ))
            })
        })
    }

    fn list_requests_for_provider(
        &self,
        provider_id: Uuid,
        limit: i64,
    ) -> StoreFuture<'_, Vec<ProviderRequestSummary>> {
        Box::pin(async move {
            self.with_state(|state| {
                Ok(newest_first(
                    state
                        .requests
                        .iter()
                        .filter(|request| request.provider_id == Some(provider_id))
                        .map(|request| ProviderRequestSummary {
                            request: request.clone(),
                            customer_name: state
                                .user(request.customer_id)
                                .map(|user| user.name.clone())
                                .unwrap_or_default(),
                        }),
                    limit,
                ))
            })
        })
    }

    fn transition_request<'a>(
        &'a self,
        request_id: Uuid,
        from: &'a [RequestStatus],
        to: RequestStatus,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.with_state(|state| {
                let Some(request) = state.request_mut(request_id) else {
                    return Ok(false);
                };
                if !from.contains(&request.status) {
                    return Ok(false);
                }
                request.status = to;
                match to {
                    RequestStatus::ProviderAssigned => request.accepted_at = Some(Utc::now()),
                    RequestStatus::Completed => request.completed_at = Some(Utc::now()),
                    _ => {}
                }
                Ok(true)
            })
        })
    }

    fn complete_service_request(&self, request_id: Uuid) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.with_state(|state| {
                let Some(request) = state.request_mut(request_id) else {
                    return Ok(false);
                };
                if !COMPLETABLE_STATUSES.contains(&request.status) {
                    return Ok(false);
                }
                request.status = RequestStatus::Completed;
                request.completed_at = Some(Utc::now());
                let provider_id = request.provider_id;

                if let Some(profile) = state
                    .providers
                    .iter_mut()
                    .find(|profile| Some(profile.id) == provider_id)
                {
                    profile.total_jobs += 1;
                }
                Ok(true)
            })
        })
    }

    fn create_assignment(
        &self,
        request_id: Uuid,
        provider_id: Uuid,
    ) -> StoreFuture<'_, Assignment> {
        Box::pin(async move {
            self.with_state(|state| {
                if let Some(existing) = state.assignments.iter().find(|assignment| {
                    assignment.request_id == request_id
                        && assignment.provider_id == provider_id
                        && assignment.status == AssignmentStatus::Pending
                }) {
                    return Ok(existing.clone());
                }
                let created = Assignment {
                    id: Uuid::new_v4(),
                    request_id,
                    provider_id,
                    status: AssignmentStatus::Pending,
                    accepted_at: None,
                    created_at: Utc::now(),
                };
                state.assignments.push(created.clone());
                Ok(created)
            })
        })
    }

    fn get_assignment(&self, assignment_id: Uuid) -> StoreFuture<'_, Option<Assignment>> {
        Box::pin(async move {
            self.with_state(|state| {
                Ok(state
                    .assignments
                    .iter()
                    .find(|assignment| assignment.id == assignment_id)
                    .cloned())
            })
        })
    }

    fn claim_assignment(
        &self,
        assignment_id: Uuid,
        target: AssignmentStatus,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.with_state(|state| {
                let Some(assignment) = state
                    .assignments
                    .iter_mut()
                    .find(|assignment| assignment.id == assignment_id)
                else {
                    return Ok(false);
                };
                if assignment.status != AssignmentStatus::Pending {
                    return Ok(false);
                }
                assignment.status = target;
                if target == AssignmentStatus::Accepted {
                    assignment.accepted_at = Some(Utc::now());
                }
                Ok(true)
            })
        })
    }

    fn revoke_accepted_assignment(&self, assignment_id: Uuid) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.with_state(|state| {
                match state.assignments.iter_mut().find(|assignment| {
                    assignment.id == assignment_id && assignment.status == AssignmentStatus::Accepted
                }) {
                    Some(assignment) => {
                        assignment.status = AssignmentStatus::Cancelled;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            })
        })
    }

    fn cancel_pending_assignments(&self, request_id: Uuid) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.with_state(|state| {
                let mut cancelled = 0;
                for assignment in state.assignments.iter_mut().filter(|assignment| {
                    assignment.request_id == request_id
                        && assignment.status == AssignmentStatus::Pending
                }) {
                    assignment.status = AssignmentStatus::Cancelled;
                    cancelled += 1;
                }
                Ok(cancelled)
            })
        })
    }

    fn create_rating(&self, rating: NewRating) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.with_state(|state| {
                if state.ratings.iter().any(|stored| {
                    stored.rating.request_id == rating.request_id
                        && stored.rating.rater_id == rating.rater_id
                }) {
                    return Ok(false);
                }
                let ratee_id = rating.ratee_id;
                state.ratings.push(StoredRating {
                    rating,
                    created_at: Utc::now(),
                });

                let stars = state
                    .ratings
                    .iter()
                    .filter(|stored| stored.rating.ratee_id == ratee_id)
                    .map(|stored| f64::from(stored.rating.stars))
                    .collect::<Vec<_>>();
                let average = stars.iter().sum::<f64>() / stars.len() as f64;
                if let Some(profile) = state
                    .providers
                    .iter_mut()
                    .find(|profile| profile.user_id == ratee_id)
                {
                    profile.rating_average = average;
                }
                Ok(true)
            })
        })
    }

    fn append_transcript(
        &self,
        message: NewTranscriptMessage,
    ) -> StoreFuture<'_, TranscriptMessage> {
        Box::pin(async move {
            self.with_state(|state| {
                let stored = TranscriptMessage {
                    id: Uuid::new_v4(),
                    request_id: message.request_id,
                    sender_id: message.sender_id,
                    content: message.content,
                    kind: message.kind,
                    created_at: Utc::now(),
                };
                state.transcript.push(stored.clone());
                Ok(stored)
            })
        })
    }

    fn list_transcript(&self, request_id: Uuid) -> StoreFuture<'_, Vec<TranscriptMessage>> {
        Box::pin(async move {
            self.with_state(|state| {
                Ok(state
                    .transcript
                    .iter()
                    .filter(|message| message.request_id == request_id)
                    .cloned()
                    .collect())
            })
        })
    }

    fn log_message(&self, entry: MessageLogEntry) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.with_state(|state| {
                state.message_log.push(entry);
                Ok(())
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::MemoryStore;
    use crate::catalog::ServiceCategory;
    use crate::models::{AssignmentStatus, NewRating, NewServiceRequest, NewUser, RequestStatus, Role};
    use crate::repos::EntityStore;

    async fn customer(store: &MemoryStore, phone: &str) -> Uuid {
        store
            .create_user(NewUser {
                name: "Ana".to_string(),
                phone: phone.to_string(),
                role: Role::Customer,
                whatsapp_name: None,
            })
            .await
            .expect("customer should be created")
            .id
    }

    #[tokio::test]
    async fn online_providers_are_sorted_by_rating_and_filtered_by_category() {
        let store = MemoryStore::new();
        store.seed_provider("Low", "1", &[ServiceCategory::Plumbing], 3.9, 4, true);
        store.seed_provider("High", "2", &[ServiceCategory::Plumbing], 4.9, 10, true);
        store.seed_provider("Offline", "3", &[ServiceCategory::Plumbing], 5.0, 10, false);
        store.seed_provider("Gardener", "4", &[ServiceCategory::Gardening], 5.0, 10, true);

        let listed = store
            .list_online_providers(ServiceCategory::Plumbing, 10)
            .await
            .expect("listing should succeed");
        let names = listed.iter().map(|p| p.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["High", "Low"]);
    }

    #[tokio::test]
    async fn claim_succeeds_exactly_once() {
        let store = MemoryStore::new();
        let provider = store.seed_provider("P", "9", &[ServiceCategory::Repair], 4.0, 0, true);
        let customer_id = customer(&store, "1").await;
        let request = store
            .create_service_request(NewServiceRequest {
                id: Uuid::new_v4(),
                customer_id,
                service_type: ServiceCategory::Repair,
                origin_lat: 0.0,
                origin_lng: 0.0,
                address: "123 Main St".to_string(),
                description: String::new(),
                provider_id: provider.provider_id,
            })
            .await
            .expect("request should be created");
        let assignment = store
            .create_assignment(request.id, provider.provider_id)
            .await
            .expect("assignment should be created");
        let again = store
            .create_assignment(request.id, provider.provider_id)
            .await
            .expect("assignment lookup should succeed");
        assert_eq!(assignment.id, again.id);

        assert!(
            store
                .claim_assignment(assignment.id, AssignmentStatus::Rejected)
                .await
                .expect("claim should succeed")
        );
        assert!(
            !store
                .claim_assignment(assignment.id, AssignmentStatus::Accepted)
                .await
                .expect("claim should succeed")
        );
        assert!(
            !store
                .transition_request(request.id, &[RequestStatus::Completed], RequestStatus::Paid)
                .await
                .expect("transition should succeed")
        );
    }

    #[tokio::test]
    async fn rating_is_recorded_once_and_updates_average() {
        let store = MemoryStore::new();
        let provider = store.seed_provider("P", "9", &[ServiceCategory::Repair], 0.0, 0, true);
        let rater_id = customer(&store, "1").await;
        let rating = NewRating {
            request_id: Uuid::new_v4(),
            rater_id,
            ratee_id: provider.user_id,
            stars: 4,
            comment: "good".to_string(),
        };

        assert!(store.create_rating(rating.clone()).await.expect("rating should be stored"));
        assert!(!store.create_rating(rating).await.expect("duplicate should be ignored"));

        let detail = store
            .get_provider_detail(provider.provider_id)
            .await
            .expect("detail should load")
            .expect("provider should exist");
        assert!((detail.rating_average - 4.0).abs() < f64::EPSILON);
        assert_eq!(store.rating_count(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_operation() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(store.ping().await.is_err());
        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
