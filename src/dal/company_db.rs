use sqlx::PgPool;

use crate::domain::company::{CompanyRecord, EnrichmentOutcome, EnrichmentStatus};

#[derive(sqlx::FromRow)]
struct UnprocessedCompanyRow {
    id: String,
    legal_name: String,
    tax_id: Option<String>,
    address: Option<String>,
    postal_code: Option<String>,
    municipality: Option<String>,
    province: Option<String>,
    declared_url: Option<String>,
}

pub async fn get_unprocessed_companies(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<CompanyRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, UnprocessedCompanyRow>(
        r#"
        select
            id,
            legal_name,
            tax_id,
            address,
            postal_code,
            municipality,
            province,
            declared_url
        from
            companies
        where
            enrichment_status = 'unprocessed'
        order by
            id
        limit $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let mut record = CompanyRecord::unprocessed(row.id, row.legal_name);
            record.tax_id = row.tax_id;
            record.address = row.address;
            record.postal_code = row.postal_code;
            record.municipality = row.municipality;
            record.province = row.province;
            record.declared_url = row.declared_url;
            record
        })
        .collect())
}

pub async fn update_enrichment(
    pool: &PgPool,
    company_id: &str,
    outcome: &EnrichmentOutcome,
    worker_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        update companies set
            resolved_url = $2,
            url_reachable = $3,
            http_status = $4,
            status_message = $5,
            phone_1 = $6,
            phone_2 = $7,
            phone_3 = $8,
            social_facebook = $9,
            social_twitter = $10,
            social_linkedin = $11,
            social_instagram = $12,
            social_youtube = $13,
            has_ecommerce = $14,
            enrichment_status = $15,
            processed_by_worker = $16,
            last_updated_at = now()
        where
            id = $1
        "#,
    )
    .bind(company_id)
    .bind(&outcome.resolved_url)
    .bind(outcome.url_reachable)
    .bind(outcome.http_status)
    .bind(&outcome.status_message)
    .bind(outcome.phones.first().cloned())
    .bind(outcome.phones.get(1).cloned())
    .bind(outcome.phones.get(2).cloned())
    .bind(&outcome.social_links.facebook)
    .bind(&outcome.social_links.twitter)
    .bind(&outcome.social_links.linkedin)
    .bind(&outcome.social_links.instagram)
    .bind(&outcome.social_links.youtube)
    .bind(outcome.has_ecommerce)
    .bind(EnrichmentStatus::Processed.as_str())
    .bind(worker_id)
    .execute(pool)
    .await?;

    Ok(())
}

