use uuid::Uuid;

use threatline_common::ArticleCve;

use crate::error::Result;
use crate::rows::ArticleCveRow;
use crate::Store;

const CVE_COLUMNS: &str = "id, article_id, cve_id, cvss_score, severity, description, \
     cpe_matches, published_date, in_kev, kev_date_added, kev_due_date, kev_ransomware_use";

impl Store {
    /// One representative enriched row per CVE id, used to skip re-querying
    /// the vulnerability database for CVEs any article already enriched.
    pub async fn known_cve_enrichments(&self, cve_ids: &[String]) -> Result<Vec<ArticleCve>> {
        let rows: Vec<ArticleCveRow> = sqlx::query_as(&format!(
            "SELECT DISTINCT ON (cve_id) {CVE_COLUMNS}
             FROM article_cves
             WHERE cve_id = ANY($1)
               AND (cvss_score IS NOT NULL OR description IS NOT NULL)
             ORDER BY cve_id, id"
        ))
        .bind(cve_ids)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn upsert_article_cve(&self, cve: &ArticleCve) -> Result<()> {
        sqlx::query(
            "INSERT INTO article_cves
                 (article_id, cve_id, cvss_score, severity, description, cpe_matches,
                  published_date, in_kev, kev_date_added, kev_due_date, kev_ransomware_use)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (article_id, cve_id)
             DO UPDATE SET cvss_score = EXCLUDED.cvss_score,
                           severity = EXCLUDED.severity,
                           description = EXCLUDED.description,
                           cpe_matches = EXCLUDED.cpe_matches,
                           published_date = EXCLUDED.published_date,
                           in_kev = EXCLUDED.in_kev,
                           kev_date_added = EXCLUDED.kev_date_added,
                           kev_due_date = EXCLUDED.kev_due_date,
                           kev_ransomware_use = EXCLUDED.kev_ransomware_use",
        )
        .bind(cve.article_id)
        .bind(&cve.cve_id)
        .bind(cve.cvss_score)
        .bind(&cve.severity)
        .bind(&cve.description)
        .bind(&cve.cpe_matches)
        .bind(cve.published_date)
        .bind(cve.in_kev)
        .bind(cve.kev_date_added)
        .bind(cve.kev_due_date)
        .bind(cve.kev_ransomware_use)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn cves_for_articles(&self, article_ids: &[Uuid]) -> Result<Vec<ArticleCve>> {
        let rows: Vec<ArticleCveRow> = sqlx::query_as(&format!(
            "SELECT {CVE_COLUMNS} FROM article_cves WHERE article_id = ANY($1)"
        ))
        .bind(article_ids)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// All CVEs attached to a user's matched articles, for retroactive
    /// exposure matching when the tech stack changes.
    pub async fn cves_for_user_matched_articles(&self, user_id: Uuid) -> Result<Vec<ArticleCve>> {
        let rows: Vec<ArticleCveRow> = sqlx::query_as(&format!(
            "SELECT {CVE_COLUMNS} FROM article_cves c
             WHERE EXISTS (
                 SELECT 1 FROM user_articles ua
                 WHERE ua.article_id = c.article_id AND ua.user_id = $1 AND ua.matched
             )"
        ))
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
