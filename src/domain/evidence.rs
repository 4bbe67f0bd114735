use serde::{Deserialize, Serialize};

/// Per-candidate breakdown of how a page scored against a company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEvidence {
    pub candidate_url: String,
    pub score: f64,
    /// Fraction of the legal name's tokens matched, 1.0 for a verbatim hit.
    pub name_match_ratio: f64,
    pub name_in_title_or_meta: bool,
    pub contact_page: bool,
    pub phone_found: bool,
    pub social_count: usize,
    pub province_match: bool,
    pub postal_code_match: bool,
    pub tax_id_match: bool,
}

impl ScoreEvidence {
    pub fn none(candidate_url: impl Into<String>) -> Self {
        Self {
            candidate_url: candidate_url.into(),
            score: 0.0,
            name_match_ratio: 0.0,
            name_in_title_or_meta: false,
            contact_page: false,
            phone_found: false,
            social_count: 0,
            province_match: false,
            postal_code_match: false,
            tax_id_match: false,
        }
    }
}
