//! Postgres persistence. Every write is its own transaction; upserts lean on
//! the schema's unique constraints so that retried pipeline runs stay
//! idempotent.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

mod articles;
mod cves;
mod entities;
mod error;
mod exposure;
mod groups;
mod reports;
mod rows;
mod users;

pub use articles::NewArticle;
pub use error::{is_unique_violation, Result, StoreError};
pub use exposure::AutoExposure;
pub use reports::{PeriodReportRow, PeriodSnapshotRow};
pub use rows::{ArticleSignalWithSlug, ExposureWithCve};

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
