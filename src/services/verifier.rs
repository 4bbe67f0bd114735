use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::company::EnrichmentOutcome;
use crate::domain::evidence::ScoreEvidence;
use crate::domain::task::TaskPayload;

use super::candidates::{normalize_company_name, CandidateGenerator};
use super::extractor::{extract_page, fold_text, PageExtract};
use super::fetcher::{FetchError, FetchPage};
use super::worker::ProcessCompany;

#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub exact_name: f64,
    pub title_meta_bonus: f64,
    pub contact_page: f64,
    pub phone_found: f64,
    pub per_social_link: f64,
    pub province: f64,
    pub postal_code: f64,
    pub tax_id: f64,
    pub accept_threshold: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            exact_name: 100.0,
            title_meta_bonus: 15.0,
            contact_page: 15.0,
            phone_found: 15.0,
            per_social_link: 5.0,
            province: 15.0,
            postal_code: 20.0,
            tax_id: 40.0,
            accept_threshold: 60.0,
        }
    }
}

pub enum CandidateOutcome {
    Accepted {
        evidence: ScoreEvidence,
        page: PageExtract,
        status: u16,
        final_url: String,
    },
    Rejected {
        evidence: ScoreEvidence,
        status: u16,
    },
    Unreachable {
        error: FetchError,
    },
}

/// What processing one company produced: the fields to write back, plus
/// the scoring breakdown kept on the task record.
#[derive(Debug, Serialize)]
pub struct EnrichmentReport {
    pub outcome: EnrichmentOutcome,
    pub evidence: Option<ScoreEvidence>,
}

/// Scores a page against a company. Deterministic: the same page and
/// company always produce the same evidence.
pub fn score_page(
    weights: &ScoreWeights,
    candidate_url: &str,
    page: &PageExtract,
    company: &TaskPayload,
) -> ScoreEvidence {
    let mut evidence = ScoreEvidence::none(candidate_url);

    // legal-form suffixes never show up on websites, so match without them
    let name = normalize_company_name(&company.legal_name);
    let tokens: Vec<&str> = name.split_whitespace().collect();

    let title = fold_text(&page.title);
    let meta = fold_text(&page.meta_description);
    let headings = page
        .headings
        .iter()
        .map(|heading| fold_text(heading))
        .collect::<Vec<_>>()
        .join(" ");
    let title_meta = format!("{} {}", title, meta);
    let key_text = format!("{} {}", title_meta, headings);

    let mut score = 0.0;

    if !tokens.is_empty() {
        if key_text.contains(&name) {
            evidence.name_match_ratio = 1.0;
            evidence.name_in_title_or_meta = title_meta.contains(&name);
            score += weights.exact_name;
        } else {
            for end in (1..tokens.len()).rev() {
                let prefix = tokens[..end].join(" ");
                if key_text.contains(&prefix) {
                    evidence.name_match_ratio = end as f64 / tokens.len() as f64;
                    evidence.name_in_title_or_meta = title_meta.contains(&prefix);
                    score += weights.exact_name * evidence.name_match_ratio;
                    break;
                }
            }
        }
        if evidence.name_in_title_or_meta {
            score += weights.title_meta_bonus;
        }
    }

    evidence.contact_page = page.has_contact_page;
    if evidence.contact_page {
        score += weights.contact_page;
    }

    evidence.phone_found = !page.phones.is_empty();
    if evidence.phone_found {
        score += weights.phone_found;
    }

    evidence.social_count = page.social_links.count();
    score += weights.per_social_link * evidence.social_count as f64;

    evidence.province_match = field_in_text(&page.text, company.province.as_deref());
    if evidence.province_match {
        score += weights.province;
    }
    evidence.postal_code_match = field_in_text(&page.text, company.postal_code.as_deref());
    if evidence.postal_code_match {
        score += weights.postal_code;
    }
    evidence.tax_id_match = field_in_text(&page.text, company.tax_id.as_deref());
    if evidence.tax_id_match {
        score += weights.tax_id;
    }

    evidence.score = score;
    evidence
}

fn field_in_text(folded_text: &str, field: Option<&str>) -> bool {
    match field {
        Some(value) => {
            let folded = fold_text(value);
            let folded = folded.trim();
            !folded.is_empty() && folded_text.contains(folded)
        }
        None => false,
    }
}

pub struct Verifier {
    fetcher: Arc<dyn FetchPage>,
    generator: CandidateGenerator,
    weights: ScoreWeights,
}

impl Verifier {
    pub fn new(
        fetcher: Arc<dyn FetchPage>,
        generator: CandidateGenerator,
        weights: ScoreWeights,
    ) -> Self {
        Self {
            fetcher,
            generator,
            weights,
        }
    }

    pub async fn probe(&self, candidate_url: &str, company: &TaskPayload) -> CandidateOutcome {
        let page = match self.fetcher.fetch(candidate_url).await {
            Ok(page) => page,
            Err(error) => return CandidateOutcome::Unreachable { error },
        };

        let extract = extract_page(&page.body);
        let evidence = score_page(&self.weights, candidate_url, &extract, company);

        if evidence.score >= self.weights.accept_threshold {
            CandidateOutcome::Accepted {
                evidence,
                page: extract,
                status: page.status,
                final_url: page.final_url,
            }
        } else {
            CandidateOutcome::Rejected {
                evidence,
                status: page.status,
            }
        }
    }

    /// Probes the declared url first, then generated candidates in order,
    /// stopping at the first accepted page. A company with no accepted
    /// candidate is still a finished enrichment, just an unreachable one.
    pub async fn enrich(&self, company: &TaskPayload) -> EnrichmentReport {
        let mut tried: HashSet<String> = HashSet::new();
        let mut last_status: Option<i32> = None;
        let mut probed_any = false;
        let mut best_rejection: Option<ScoreEvidence> = None;

        // the declared url alone gets probed before any DNS work happens
        let mut candidates: VecDeque<String> =
            CandidateGenerator::declared_candidate(company.declared_url.as_deref())
                .into_iter()
                .collect();
        let mut generated = false;

        loop {
            let Some(candidate) = candidates.pop_front() else {
                if generated {
                    break;
                }
                generated = true;
                candidates.extend(
                    self.generator
                        .generate(&company.legal_name, company.province.as_deref())
                        .await,
                );
                continue;
            };
            if !tried.insert(candidate.clone()) {
                continue;
            }
            probed_any = true;

            match self.probe(&candidate, company).await {
                CandidateOutcome::Accepted {
                    evidence,
                    page,
                    status,
                    final_url,
                } => {
                    log::info!(
                        "matched '{}' to {} (score {:.1})",
                        company.legal_name,
                        final_url,
                        evidence.score
                    );
                    let has_ecommerce = page.has_ecommerce();
                    let outcome = EnrichmentOutcome {
                        resolved_url: Some(final_url),
                        url_reachable: true,
                        http_status: Some(status as i32),
                        status_message: format!("accepted with score {:.1}", evidence.score),
                        phones: page.phones,
                        social_links: page.social_links,
                        has_ecommerce,
                    };
                    return EnrichmentReport {
                        outcome,
                        evidence: Some(evidence),
                    };
                }
                CandidateOutcome::Rejected { evidence, status } => {
                    log::debug!(
                        "rejected {} for '{}' (score {:.1})",
                        candidate,
                        company.legal_name,
                        evidence.score
                    );
                    last_status = Some(status as i32);
                    let better = best_rejection
                        .as_ref()
                        .map(|best| evidence.score > best.score)
                        .unwrap_or(true);
                    if better {
                        best_rejection = Some(evidence);
                    }
                }
                CandidateOutcome::Unreachable { error } => {
                    log::debug!("could not reach {}: {}", candidate, error);
                    if let FetchError::BadStatus(status) = error {
                        last_status = Some(status as i32);
                    }
                }
            }
        }

        let message = if probed_any {
            "no candidate accepted"
        } else {
            "no candidate domains resolved"
        };
        log::info!("no website found for '{}': {}", company.legal_name, message);
        EnrichmentReport {
            outcome: EnrichmentOutcome::unmatched(message, last_status),
            evidence: best_rejection,
        }
    }
}

#[async_trait]
impl ProcessCompany for Verifier {
    async fn process(&self, company: &TaskPayload) -> anyhow::Result<EnrichmentReport> {
        Ok(self.enrich(company).await)
    }
}
