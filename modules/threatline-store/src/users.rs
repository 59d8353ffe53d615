use uuid::Uuid;

use threatline_common::{IndustrySignal, Keyword, Source, User};

use crate::error::Result;
use crate::rows::{IndustrySignalRow, KeywordRow, SourceRow, UserRow};
use crate::Store;

const USER_COLUMNS: &str =
    "id, email, industry_id, digest_frequency, digest_time, last_digest_at, email_enabled, onboarded";

impl Store {
    pub async fn all_users(&self) -> Result<Vec<User>> {
        let rows: Vec<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users"))
                .fetch_all(self.pool())
                .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn user_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(user_id)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(Into::into))
    }

    pub async fn set_last_digest_at(
        &self,
        user_id: Uuid,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE users SET last_digest_at = $2 WHERE id = $1")
            .bind(user_id)
            .bind(at)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn keywords_for_user(&self, user_id: Uuid) -> Result<Vec<Keyword>> {
        let rows: Vec<KeywordRow> =
            sqlx::query_as("SELECT id, user_id, word FROM keywords WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(self.pool())
                .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn active_sources_for_user(&self, user_id: Uuid) -> Result<Vec<Source>> {
        let rows: Vec<SourceRow> = sqlx::query_as(
            "SELECT id, user_id, url, name, source_type, active
             FROM sources WHERE user_id = $1 AND active",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Distinct active RSS URLs across a set of users, for cache pre-warming.
    pub async fn active_rss_urls_for_users(&self, user_ids: &[Uuid]) -> Result<Vec<String>> {
        let urls: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT url FROM sources
             WHERE user_id = ANY($1) AND active AND source_type = 'rss'",
        )
        .bind(user_ids)
        .fetch_all(self.pool())
        .await?;
        Ok(urls)
    }

    pub async fn industry_signals_for_industry(
        &self,
        industry_id: Uuid,
    ) -> Result<Vec<IndustrySignal>> {
        let rows: Vec<IndustrySignalRow> = sqlx::query_as(
            "SELECT id, industry_id, slug, name FROM industry_signals WHERE industry_id = $1",
        )
        .bind(industry_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
