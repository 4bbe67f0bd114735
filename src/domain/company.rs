use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentStatus {
    Unprocessed,
    Processed,
}

impl EnrichmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentStatus::Unprocessed => "unprocessed",
            EnrichmentStatus::Processed => "processed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialLinks {
    pub facebook: Option<String>,
    pub twitter: Option<String>,
    pub linkedin: Option<String>,
    pub instagram: Option<String>,
    pub youtube: Option<String>,
}

impl SocialLinks {
    pub fn count(&self) -> usize {
        [
            &self.facebook,
            &self.twitter,
            &self.linkedin,
            &self.instagram,
            &self.youtube,
        ]
        .iter()
        .filter(|link| link.is_some())
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub id: String,
    pub legal_name: String,
    pub tax_id: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub municipality: Option<String>,
    pub province: Option<String>,
    pub declared_url: Option<String>,
    pub enrichment_status: EnrichmentStatus,
    pub resolved_url: Option<String>,
    pub url_reachable: Option<bool>,
    pub http_status: Option<i32>,
    pub status_message: Option<String>,
    pub phones: Vec<String>,
    pub social_links: SocialLinks,
    pub has_ecommerce: Option<bool>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub processed_by_worker: Option<String>,
}

impl CompanyRecord {
    pub fn unprocessed(id: impl Into<String>, legal_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            legal_name: legal_name.into(),
            tax_id: None,
            address: None,
            postal_code: None,
            municipality: None,
            province: None,
            declared_url: None,
            enrichment_status: EnrichmentStatus::Unprocessed,
            resolved_url: None,
            url_reachable: None,
            http_status: None,
            status_message: None,
            phones: Vec::new(),
            social_links: SocialLinks::default(),
            has_ecommerce: None,
            last_updated_at: None,
            processed_by_worker: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentOutcome {
    pub resolved_url: Option<String>,
    pub url_reachable: bool,
    pub http_status: Option<i32>,
    pub status_message: String,
    pub phones: Vec<String>,
    pub social_links: SocialLinks,
    pub has_ecommerce: bool,
}

impl EnrichmentOutcome {
    pub fn unmatched(status_message: impl Into<String>, http_status: Option<i32>) -> Self {
        Self {
            resolved_url: None,
            url_reachable: false,
            http_status,
            status_message: status_message.into(),
            phones: Vec::new(),
            social_links: SocialLinks::default(),
            has_ecommerce: false,
        }
    }
}
