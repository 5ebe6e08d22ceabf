use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::ServiceCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Provider,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Provider => "provider",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "customer" => Some(Self::Customer),
            "provider" => Some(Self::Provider),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Created,
    Searching,
    ProviderAssigned,
    ProviderArriving,
    InProgress,
    Completed,
    Cancelled,
    Paid,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Searching => "searching",
            Self::ProviderAssigned => "provider_assigned",
            Self::ProviderArriving => "provider_arriving",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Paid => "paid",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "searching" => Some(Self::Searching),
            "provider_assigned" => Some(Self::ProviderAssigned),
            "provider_arriving" => Some(Self::ProviderArriving),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Paid)
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Created => "🆕",
            Self::Searching => "🔍",
            Self::ProviderAssigned => "👤",
            Self::ProviderArriving => "🚗",
            Self::InProgress => "⏳",
            Self::Completed => "✅",
            Self::Cancelled => "❌",
            Self::Paid => "💰",
        }
    }

    /// Human label, e.g. "provider assigned".
    pub fn label(&self) -> String {
        self.as_str().replace('_', " ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptKind {
    Text,
    Image,
    Location,
}

impl TranscriptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Location => "location",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "location" => Some(Self::Location),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub role: Role,
    pub whatsapp_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub phone: String,
    pub role: Role,
    pub whatsapp_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub service_types: Vec<ServiceCategory>,
    pub is_online: bool,
    pub rating_average: f64,
    pub total_jobs: i32,
    pub bio: String,
}

#[derive(Debug, Clone)]
pub struct NewProviderProfile {
    pub user_id: Uuid,
    pub service_types: Vec<ServiceCategory>,
    pub bio: String,
}

/// Directory row: a provider joined with its user record.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSummary {
    pub provider_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub service_types: Vec<ServiceCategory>,
    pub rating_average: f64,
    pub total_jobs: i32,
    pub bio: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDetail {
    pub provider_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub phone: String,
    pub service_types: Vec<ServiceCategory>,
    pub rating_average: f64,
    pub total_jobs: i32,
    pub bio: String,
    pub is_online: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderStats {
    pub rating_average: f64,
    pub total_jobs: i32,
    pub completed_jobs: i64,
    pub is_online: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    pub stars: i32,
    pub comment: String,
    pub reviewer_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub service_type: ServiceCategory,
    pub status: RequestStatus,
    pub origin_lat: f64,
    pub origin_lng: f64,
    pub address: String,
    pub description: String,
    pub provider_id: Option<Uuid>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A request routed to a provider, with the customer's display name.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequestSummary {
    pub request: ServiceRequest,
    pub customer_name: String,
}

#[derive(Debug, Clone)]
pub struct NewServiceRequest {
    /// Chosen by the caller; inserting the same id twice yields the first row.
    pub id: Uuid,
    pub customer_id: Uuid,
    pub service_type: ServiceCategory,
    pub origin_lat: f64,
    pub origin_lng: f64,
    pub address: String,
    pub description: String,
    pub provider_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub id: Uuid,
    pub request_id: Uuid,
    pub provider_id: Uuid,
    pub status: AssignmentStatus,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRating {
    pub request_id: Uuid,
    pub rater_id: Uuid,
    pub ratee_id: Uuid,
    pub stars: i32,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptMessage {
    pub id: Uuid,
    pub request_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: TranscriptKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTranscriptMessage {
    pub request_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: TranscriptKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageLogEntry {
    pub wamid: Option<String>,
    pub phone_number: String,
    pub direction: MessageDirection,
    pub message_type: String,
    pub content: serde_json::Value,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
