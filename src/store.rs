use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::geo::GeoRecord;

/// One row of `ip_record`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct StoredIpRecord {
    pub id: i32,
    pub ip_address: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub isp: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted(StoredIpRecord),
    Updated(StoredIpRecord),
}

impl SaveOutcome {
    pub fn record(&self) -> &StoredIpRecord {
        match self {
            Self::Inserted(r) | Self::Updated(r) => r,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait IpStore: Send + Sync {
    async fn find_by_ip(&self, ip: &str) -> Result<Option<StoredIpRecord>, StoreError>;

    /// Insert or overwrite the record for `ip` in a single transaction.
    async fn save(&self, ip: &str, geo: &GeoRecord) -> Result<SaveOutcome, StoreError>;

    /// All records, newest write first.
    async fn list_all(&self) -> Result<Vec<StoredIpRecord>, StoreError>;
}

const RECORD_COLUMNS: &str = r#"id, ip_address, country, region, city, isp, "timestamp""#;

pub struct PgIpStore {
    pool: PgPool,
}

impl PgIpStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IpStore for PgIpStore {
    async fn find_by_ip(&self, ip: &str) -> Result<Option<StoredIpRecord>, StoreError> {
        let record = sqlx::query_as::<_, StoredIpRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM ip_record WHERE ip_address = $1 ORDER BY id LIMIT 1"
        ))
        .bind(ip)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn save(&self, ip: &str, geo: &GeoRecord) -> Result<SaveOutcome, StoreError> {
        // Dropping `tx` on any early return rolls it back.
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_scalar::<_, i32>(
            "SELECT id FROM ip_record WHERE ip_address = $1 ORDER BY id LIMIT 1",
        )
        .bind(ip)
        .fetch_optional(&mut *tx)
        .await?;

        let now = Utc::now();
        let outcome = if let Some(id) = existing {
            // Timestamps only move forward, even within one microsecond.
            let record = sqlx::query_as::<_, StoredIpRecord>(&format!(
                "UPDATE ip_record SET country = $2, region = $3, city = $4, isp = $5, \
                 \"timestamp\" = GREATEST($6, \"timestamp\" + INTERVAL '1 microsecond') \
                 WHERE id = $1 RETURNING {RECORD_COLUMNS}"
            ))
            .bind(id)
            .bind(&geo.country)
            .bind(&geo.region)
            .bind(&geo.city)
            .bind(&geo.isp)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            SaveOutcome::Updated(record)
        } else {
            let record = sqlx::query_as::<_, StoredIpRecord>(&format!(
                "INSERT INTO ip_record (ip_address, country, region, city, isp, \"timestamp\") \
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING {RECORD_COLUMNS}"
            ))
            .bind(ip)
            .bind(&geo.country)
            .bind(&geo.region)
            .bind(&geo.city)
            .bind(&geo.isp)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            SaveOutcome::Inserted(record)
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn list_all(&self) -> Result<Vec<StoredIpRecord>, StoreError> {
        let records = sqlx::query_as::<_, StoredIpRecord>(&format!(
            r#"SELECT {RECORD_COLUMNS} FROM ip_record ORDER BY "timestamp" DESC, id DESC"#
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

// --- Mock implementation for testing ---
