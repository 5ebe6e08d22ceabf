use serde::{Deserialize, Serialize};

use crate::messaging::{ListPrompt, ListRow, ListSection};

pub const SERVICE_ROW_PREFIX: &str = "service_";
pub const FOOTER_TEXT: &str = "Powered by Handy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceCategory {
    Plumbing,
    Electrical,
    Cleaning,
    Gardening,
    Repair,
    Other,
}

impl ServiceCategory {
    pub const ALL: [ServiceCategory; 6] = [
        Self::Plumbing,
        Self::Electrical,
        Self::Cleaning,
        Self::Gardening,
        Self::Repair,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plumbing => "plumbing",
            Self::Electrical => "electrical",
            Self::Cleaning => "cleaning",
            Self::Gardening => "gardening",
            Self::Repair => "repair",
            Self::Other => "other",
        }
    }

    pub fn from_id(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.as_str() == value)
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Plumbing => "🔧 Plumbing",
            Self::Electrical => "⚡ Electrical",
            Self::Cleaning => "🧹 Cleaning",
            Self::Gardening => "🌿 Gardening",
            Self::Repair => "🔨 Repair",
            Self::Other => "📦 Other",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Plumbing => "Pipes, faucets, drains, water heaters",
            Self::Electrical => "Wiring, outlets, lighting, panels",
            Self::Cleaning => "Home, office, deep cleaning",
            Self::Gardening => "Lawn care, landscaping, tree trimming",
            Self::Repair => "General handyman, furniture, appliances",
            Self::Other => "Any other service you need",
        }
    }

    /// Capitalized id, used in compact listings ("Plumbing, Repair").
    pub fn short_name(&self) -> String {
        let id = self.as_str();
        let mut chars = id.chars();
        match chars.next() {
            Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
            None => String::new(),
        }
    }

    pub fn row_id(&self) -> String {
        format!("{SERVICE_ROW_PREFIX}{}", self.as_str())
    }

    pub fn from_row_id(row_id: &str) -> Option<Self> {
        row_id
            .strip_prefix(SERVICE_ROW_PREFIX)
            .and_then(Self::from_id)
    }

    /// Free-text matching against the synonym table. Input is expected
    /// lowercased and trimmed.
    pub fn match_text(text: &str) -> Option<Self> {
        match text {
            "plumbing" | "plumber" | "pipes" => Some(Self::Plumbing),
            "electrical" | "electrician" | "electric" | "wiring" => Some(Self::Electrical),
            "cleaning" | "clean" | "cleaner" => Some(Self::Cleaning),
            "gardening" | "garden" | "lawn" | "landscaping" => Some(Self::Gardening),
            "repair" | "handyman" | "fix" => Some(Self::Repair),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

pub fn service_sections() -> Vec<ListSection> {
    vec![ListSection {
        title: "Available Services".to_string(),
        rows: ServiceCategory::ALL
            .iter()
            .map(|category| ListRow {
                id: category.row_id(),
                title: category.title().to_string(),
                description: category.description().to_string(),
            })
            .collect(),
    }]
}

pub fn service_list_prompt(header: &str, body: &str, button: &str) -> ListPrompt {
    ListPrompt {
        header: header.to_string(),
        body: body.to_string(),
        footer: FOOTER_TEXT.to_string(),
        button: button.to_string(),
        sections: service_sections(),
    }
}

pub fn format_service_titles(services: &[ServiceCategory]) -> String {
    services
        .iter()
        .map(|service| service.title())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn format_service_names(services: &[ServiceCategory]) -> String {
    services
        .iter()
        .map(ServiceCategory::short_name)
        .collect::<Vec<_>>()
        .join(", ")
}
