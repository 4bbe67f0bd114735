pub mod company_db;
pub mod memory;
pub mod task_db;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::company::{CompanyRecord, EnrichmentOutcome};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Read and write access to the company table, swappable so the worker
/// pipeline can run against an in-memory store.
#[async_trait]
pub trait CompanyStore: Send + Sync {
    async fn fetch_unprocessed(&self, limit: i64) -> Result<Vec<CompanyRecord>, StoreError>;

    async fn write_outcome(
        &self,
        company_id: &str,
        outcome: &EnrichmentOutcome,
        worker_id: &str,
    ) -> Result<(), StoreError>;
}

pub struct PgCompanyStore {
    pool: PgPool,
}

impl PgCompanyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CompanyStore for PgCompanyStore {
    async fn fetch_unprocessed(&self, limit: i64) -> Result<Vec<CompanyRecord>, StoreError> {
        Ok(company_db::get_unprocessed_companies(&self.pool, limit).await?)
    }

    async fn write_outcome(
        &self,
        company_id: &str,
        outcome: &EnrichmentOutcome,
        worker_id: &str,
    ) -> Result<(), StoreError> {
        Ok(company_db::update_enrichment(&self.pool, company_id, outcome, worker_id).await?)
    }
}
