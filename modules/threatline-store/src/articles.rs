use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use threatline_common::Article;

use crate::error::{is_unique_violation, Result, StoreError};
use crate::rows::ArticleRow;
use crate::Store;

const ARTICLE_COLUMNS: &str = "id, source_id, url, title, content, clean_text, raw_html, \
     external_links, author, guid, published_at, entities_extracted, cves_extracted";

/// Fields for a lazily created article row. Enrichment columns start empty.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub source_id: Uuid,
    pub url: String,
    pub title: String,
    pub content: String,
    pub author: Option<String>,
    pub guid: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Store {
    pub async fn article_by_url(&self, url: &str) -> Result<Option<Article>> {
        let row: Option<ArticleRow> =
            sqlx::query_as(&format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE url = $1"))
                .bind(url)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(Into::into))
    }

    /// Find an article by URL or create it. A duplicate-key race with a
    /// concurrent writer is swallowed and the lookup re-run.
    pub async fn find_or_create_article(&self, new: &NewArticle) -> Result<Article> {
        if let Some(existing) = self.article_by_url(&new.url).await? {
            return Ok(existing);
        }

        let inserted: std::result::Result<ArticleRow, sqlx::Error> = sqlx::query_as(&format!(
            "INSERT INTO articles (source_id, url, title, content, author, guid, published_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {ARTICLE_COLUMNS}"
        ))
        .bind(new.source_id)
        .bind(&new.url)
        .bind(&new.title)
        .bind(&new.content)
        .bind(&new.author)
        .bind(&new.guid)
        .bind(new.published_at)
        .fetch_one(self.pool())
        .await;

        match inserted {
            Ok(row) => Ok(row.into()),
            Err(e) if is_unique_violation(&e) => {
                debug!(url = %new.url, "Article insert lost a race, re-reading");
                self.article_by_url(&new.url)
                    .await?
                    .ok_or(StoreError::Database(sqlx::Error::RowNotFound))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn upsert_user_article(
        &self,
        user_id: Uuid,
        article_id: Uuid,
        source_id: Uuid,
        matched: bool,
        matched_keywords: &[String],
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_articles (user_id, article_id, source_id, matched, matched_keywords)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (user_id, article_id)
             DO UPDATE SET matched = EXCLUDED.matched,
                           matched_keywords = EXCLUDED.matched_keywords",
        )
        .bind(user_id)
        .bind(article_id)
        .bind(source_id)
        .bind(matched)
        .bind(matched_keywords)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// URLs the user has already seen, for subtracting from a fresh scrape.
    pub async fn user_article_urls(&self, user_id: Uuid) -> Result<Vec<String>> {
        let urls: Vec<String> = sqlx::query_scalar(
            "SELECT a.url FROM user_articles ua
             JOIN articles a ON a.id = ua.article_id
             WHERE ua.user_id = $1",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(urls)
    }

    pub async fn articles_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Article>> {
        let rows: Vec<ArticleRow> =
            sqlx::query_as(&format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ANY($1)"))
                .bind(ids)
                .fetch_all(self.pool())
                .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn articles_missing_clean_text(&self, ids: &[Uuid]) -> Result<Vec<Article>> {
        let rows: Vec<ArticleRow> = sqlx::query_as(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ANY($1) AND clean_text IS NULL"
        ))
        .bind(ids)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn articles_missing_entities(&self, ids: &[Uuid]) -> Result<Vec<Article>> {
        let rows: Vec<ArticleRow> = sqlx::query_as(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ANY($1) AND NOT entities_extracted"
        ))
        .bind(ids)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn articles_missing_cves(&self, ids: &[Uuid]) -> Result<Vec<Article>> {
        let rows: Vec<ArticleRow> = sqlx::query_as(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ANY($1) AND NOT cves_extracted"
        ))
        .bind(ids)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn set_article_content(
        &self,
        article_id: Uuid,
        clean_text: &str,
        raw_html: Option<&str>,
        external_links: &[String],
    ) -> Result<()> {
        sqlx::query(
            "UPDATE articles
             SET clean_text = $2, raw_html = $3, external_links = $4
             WHERE id = $1",
        )
        .bind(article_id)
        .bind(clean_text)
        .bind(raw_html)
        .bind(external_links)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn set_entities_extracted(&self, article_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE articles SET entities_extracted = TRUE WHERE id = $1")
            .bind(article_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_cves_extracted(&self, article_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE articles SET cves_extracted = TRUE WHERE id = $1")
            .bind(article_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Administrative reset: clears the monotonic extraction flags so the
    /// next run re-enriches the article. The only path that un-sets them.
    pub async fn reset_article_enrichment(&self, article_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE articles
             SET entities_extracted = FALSE, cves_extracted = FALSE, clean_text = NULL
             WHERE id = $1",
        )
        .bind(article_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
