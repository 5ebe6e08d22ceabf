use std::sync::Arc;

use uuid::Uuid;

use crate::catalog::{FOOTER_TEXT, ServiceCategory, format_service_names};
use crate::messaging::{ListPrompt, ListRow, ListSection};
use crate::models::{ProviderDetail, ProviderSummary, Review};
use crate::repos::{EntityStore, StoreError};

pub const PROVIDER_ROW_PREFIX: &str = "provider_";
const LISTED_PROVIDER_LIMIT: i64 = 10;
const REVIEW_LIMIT: i64 = 3;

/// A provider's profile card with its most recent reviews.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCard {
    pub detail: ProviderDetail,
    pub reviews: Vec<Review>,
}

/// Read-side queries over providers.
#[derive(Clone)]
pub struct ProviderDirectory {
    store: Arc<dyn EntityStore>,
}

impl ProviderDirectory {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Online providers for `category`, best rated first.
    pub async fn list(&self, category: ServiceCategory) -> Result<Vec<ProviderSummary>, StoreError> {
        self.store
            .list_online_providers(category, LISTED_PROVIDER_LIMIT)
            .await
    }

    pub async fn card(&self, provider_id: Uuid) -> Result<Option<ProviderCard>, StoreError> {
        let Some(detail) = self.store.get_provider_detail(provider_id).await? else {
            return Ok(None);
        };
        let reviews = self.store.recent_reviews(detail.user_id, REVIEW_LIMIT).await?;
        Ok(Some(ProviderCard { detail, reviews }))
    }
}

pub fn provider_row_id(provider_id: Uuid) -> String {
    format!("{PROVIDER_ROW_PREFIX}{provider_id}")
}

pub fn parse_provider_row_id(row_id: &str) -> Option<Uuid> {
    row_id
        .strip_prefix(PROVIDER_ROW_PREFIX)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

/// List prompt for a non-empty provider listing. Row text is clamped by the
/// outbox.
pub fn provider_list_prompt(category: ServiceCategory, providers: &[ProviderSummary]) -> ListPrompt {
    let rows = providers
        .iter()
        .map(|provider| ListRow {
            id: provider_row_id(provider.provider_id),
            title: format!("⭐{:.1} {}", provider.rating_average, provider.name),
            description: format!(
                "{} jobs | {}",
                provider.total_jobs,
                format_service_names(&provider.service_types)
            ),
        })
        .collect();
    let plural = if providers.len() > 1 { "s" } else { "" };

    ListPrompt {
        header: format!("{} Providers", category.title()),
        body: format!(
            "We found {} provider{plural} for {}.\n\nSelect a provider to see their profile and reviews.",
            providers.len(),
            category.title()
        ),
        footer: FOOTER_TEXT.to_string(),
        button: "View Providers".to_string(),
        sections: vec![ListSection {
            title: "Available Providers".to_string(),
            rows,
        }],
    }
}

pub fn format_provider_card(card: &ProviderCard) -> String {
    let detail = &card.detail;
    let bio = if detail.bio.trim().is_empty() {
        "No bio available."
    } else {
        detail.bio.as_str()
    };
    let mut text = format!(
        "👤 *{}*\n⭐ Rating: {:.1}/5.0 ({} jobs)\n🛠 Services: {}\n\n📝 *Bio:* {bio}\n\n",
        detail.name,
        detail.rating_average,
        detail.total_jobs,
        format_service_names(&detail.service_types)
    );

    if card.reviews.is_empty() {
        text.push_str("💬 No reviews yet.");
        return text;
    }

    text.push_str("💬 *Recent Reviews:*\n━━━━━━━━━━━━━━━\n");
    for review in &card.reviews {
        let comment = if review.comment.trim().is_empty() {
            "(no comment)".to_string()
        } else {
            format!("\"{}\"", review.comment)
        };
        text.push_str(&format!(
            "{} — {comment} — {}\n",
            star_string(review.stars),
            reviewer_label(&review.reviewer_name)
        ));
    }
    text
}

pub fn star_string(stars: i32) -> String {
    "⭐".repeat(usize::try_from(stars.clamp(0, 5)).unwrap_or(0))
}

/// First name and last initial ("Maria Garcia" becomes "Maria G.").
pub fn reviewer_label(full_name: &str) -> String {
    let mut parts = full_name.split_whitespace();
    match (parts.next(), parts.next().and_then(|last| last.chars().next())) {
        (Some(first), Some(initial)) => format!("{first} {initial}."),
        (Some(first), None) => first.to_string(),
        (None, _) => "Anonymous".to_string(),
    }
}
