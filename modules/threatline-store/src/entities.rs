use uuid::Uuid;

use threatline_common::ArticleEntity;

use crate::error::Result;
use crate::rows::{ArticleEntityRow, ArticleSignalWithSlug};
use crate::Store;

impl Store {
    /// Bulk insert with skip-duplicates semantics: re-running an extraction
    /// for the same article adds nothing.
    pub async fn insert_article_entities(&self, entities: &[ArticleEntity]) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for entity in entities {
            sqlx::query(
                "INSERT INTO article_entities (article_id, entity_type, name, confidence)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (article_id, entity_type, name) DO NOTHING",
            )
            .bind(entity.article_id)
            .bind(entity.entity_type.to_string())
            .bind(&entity.name)
            .bind(entity.confidence)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn upsert_article_signal(
        &self,
        article_id: Uuid,
        industry_signal_id: Uuid,
        confidence: f64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO article_signals (article_id, industry_signal_id, confidence)
             VALUES ($1, $2, $3)
             ON CONFLICT (article_id, industry_signal_id)
             DO UPDATE SET confidence = EXCLUDED.confidence",
        )
        .bind(article_id)
        .bind(industry_signal_id)
        .bind(confidence)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn entities_for_articles(&self, article_ids: &[Uuid]) -> Result<Vec<ArticleEntity>> {
        let rows: Vec<ArticleEntityRow> = sqlx::query_as(
            "SELECT article_id, entity_type, name, confidence
             FROM article_entities WHERE article_id = ANY($1)",
        )
        .bind(article_ids)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn signals_for_articles(
        &self,
        article_ids: &[Uuid],
    ) -> Result<Vec<ArticleSignalWithSlug>> {
        let rows: Vec<ArticleSignalWithSlug> = sqlx::query_as(
            "SELECT s.article_id, s.industry_signal_id, i.slug, i.name, s.confidence
             FROM article_signals s
             JOIN industry_signals i ON i.id = s.industry_signal_id
             WHERE s.article_id = ANY($1)",
        )
        .bind(article_ids)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}
