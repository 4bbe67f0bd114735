use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{CompanyStore, StoreError};
use crate::domain::company::{CompanyRecord, EnrichmentOutcome, EnrichmentStatus};

/// Company table stand-in for driving the worker pipeline in tests.
#[derive(Default)]
pub struct MemoryCompanyStore {
    records: Mutex<HashMap<String, CompanyRecord>>,
}

impl MemoryCompanyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: CompanyRecord) {
        self.records.lock().await.insert(record.id.clone(), record);
    }

    pub async fn get(&self, company_id: &str) -> Option<CompanyRecord> {
        self.records.lock().await.get(company_id).cloned()
    }
}

#[async_trait]
impl CompanyStore for MemoryCompanyStore {
    async fn fetch_unprocessed(&self, limit: i64) -> Result<Vec<CompanyRecord>, StoreError> {
        let records = self.records.lock().await;
        let mut unprocessed: Vec<CompanyRecord> = records
            .values()
            .filter(|record| record.enrichment_status == EnrichmentStatus::Unprocessed)
            .cloned()
            .collect();
        unprocessed.sort_by(|a, b| a.id.cmp(&b.id));
        unprocessed.truncate(limit.max(0) as usize);
        Ok(unprocessed)
    }

    async fn write_outcome(
        &self,
        company_id: &str,
        outcome: &EnrichmentOutcome,
        worker_id: &str,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(company_id)
            .ok_or_else(|| StoreError::Database(sqlx::Error::RowNotFound))?;

        record.resolved_url = outcome.resolved_url.clone();
        record.url_reachable = Some(outcome.url_reachable);
        record.http_status = outcome.http_status;
        record.status_message = Some(outcome.status_message.clone());
        record.phones = outcome.phones.clone();
        record.social_links = outcome.social_links.clone();
        record.has_ecommerce = Some(outcome.has_ecommerce);
        record.enrichment_status = EnrichmentStatus::Processed;
        record.last_updated_at = Some(Utc::now());
        record.processed_by_worker = Some(worker_id.to_string());
        Ok(())
    }
}
