use chrono::{DateTime, Utc};
use uuid::Uuid;

use threatline_common::{ExposureState, TechStackItem, UserCveExposure};

use crate::error::Result;
use crate::rows::{ExposureWithCve, TechStackItemRow, UserCveExposureRow};
use crate::Store;

const EXPOSURE_COLUMNS: &str = "id, user_id, cve_id, article_cve_id, tech_stack_item_id, \
     exposure_state, auto_classified, matched_cpe, first_detected_at, patched_at, \
     remediation_deadline, notes";

/// Fields the auto-classifier writes. The upsert's WHERE clause skips any
/// row with auto_classified = FALSE, so manual rows never change here.
#[derive(Debug, Clone)]
pub struct AutoExposure {
    pub user_id: Uuid,
    pub cve_id: String,
    pub article_cve_id: Option<Uuid>,
    pub tech_stack_item_id: Option<Uuid>,
    pub exposure_state: ExposureState,
    pub matched_cpe: Option<String>,
    pub remediation_deadline: Option<DateTime<Utc>>,
}

impl Store {
    pub async fn tech_stack_for_user(&self, user_id: Uuid) -> Result<Vec<TechStackItem>> {
        let rows: Vec<TechStackItemRow> = sqlx::query_as(
            "SELECT id, user_id, vendor, product, version, category, cpe_pattern, active
             FROM tech_stack_items WHERE user_id = $1 AND active",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn create_tech_stack_item(&self, item: &TechStackItem) -> Result<TechStackItem> {
        let row: TechStackItemRow = sqlx::query_as(
            "INSERT INTO tech_stack_items (user_id, vendor, product, version, category, cpe_pattern, active)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (user_id, vendor, product, version)
             DO UPDATE SET category = EXCLUDED.category,
                           cpe_pattern = EXCLUDED.cpe_pattern,
                           active = EXCLUDED.active
             RETURNING id, user_id, vendor, product, version, category, cpe_pattern, active",
        )
        .bind(item.user_id)
        .bind(&item.vendor)
        .bind(&item.product)
        .bind(&item.version)
        .bind(&item.category)
        .bind(&item.cpe_pattern)
        .bind(item.active)
        .fetch_one(self.pool())
        .await?;
        Ok(row.into())
    }

    pub async fn delete_tech_stack_item(&self, user_id: Uuid, item_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM tech_stack_items WHERE id = $1 AND user_id = $2")
            .bind(item_id)
            .bind(user_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn exposure_for(
        &self,
        user_id: Uuid,
        cve_id: &str,
    ) -> Result<Option<UserCveExposure>> {
        let row: Option<UserCveExposureRow> = sqlx::query_as(&format!(
            "SELECT {EXPOSURE_COLUMNS} FROM user_cve_exposures WHERE user_id = $1 AND cve_id = $2"
        ))
        .bind(user_id)
        .bind(cve_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn exposures_for_user(&self, user_id: Uuid) -> Result<Vec<UserCveExposure>> {
        let rows: Vec<UserCveExposureRow> = sqlx::query_as(&format!(
            "SELECT {EXPOSURE_COLUMNS} FROM user_cve_exposures
             WHERE user_id = $1 ORDER BY first_detected_at DESC"
        ))
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Exposures joined with CVSS/KEV facts for the remediation metrics.
    pub async fn exposures_with_cves(&self, user_id: Uuid) -> Result<Vec<ExposureWithCve>> {
        let rows: Vec<ExposureWithCve> = sqlx::query_as(
            "SELECT e.id, e.user_id, e.cve_id, e.exposure_state, e.auto_classified,
                    e.first_detected_at, e.patched_at, e.remediation_deadline,
                    c.cvss_score, c.in_kev
             FROM user_cve_exposures e
             LEFT JOIN article_cves c ON c.id = e.article_cve_id
             WHERE e.user_id = $1",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Upsert an auto-classified exposure. Rows a user has manually
    /// classified (auto_classified = FALSE) are never modified; the insert
    /// path always records `auto_classified = TRUE` and `first_detected_at`
    /// survives re-classification.
    pub async fn upsert_exposure_auto(&self, exposure: &AutoExposure) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_cve_exposures
                 (user_id, cve_id, article_cve_id, tech_stack_item_id, exposure_state,
                  auto_classified, matched_cpe, first_detected_at, remediation_deadline)
             VALUES ($1, $2, $3, $4, $5, TRUE, $6, now(), $7)
             ON CONFLICT (user_id, cve_id)
             DO UPDATE SET exposure_state = EXCLUDED.exposure_state,
                           article_cve_id = EXCLUDED.article_cve_id,
                           tech_stack_item_id = EXCLUDED.tech_stack_item_id,
                           matched_cpe = EXCLUDED.matched_cpe,
                           remediation_deadline = EXCLUDED.remediation_deadline
             WHERE user_cve_exposures.auto_classified",
        )
        .bind(exposure.user_id)
        .bind(&exposure.cve_id)
        .bind(exposure.article_cve_id)
        .bind(exposure.tech_stack_item_id)
        .bind(exposure.exposure_state.to_string())
        .bind(&exposure.matched_cpe)
        .bind(exposure.remediation_deadline)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Manual override. Marks the row as user-owned so the auto-classifier
    /// skips it from now on.
    pub async fn set_exposure_manual(
        &self,
        user_id: Uuid,
        cve_id: &str,
        state: ExposureState,
        patched_at: Option<DateTime<Utc>>,
        notes: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_cve_exposures
                 (user_id, cve_id, exposure_state, auto_classified, patched_at, notes, first_detected_at)
             VALUES ($1, $2, $3, FALSE, $4, $5, now())
             ON CONFLICT (user_id, cve_id)
             DO UPDATE SET exposure_state = EXCLUDED.exposure_state,
                           auto_classified = FALSE,
                           patched_at = EXCLUDED.patched_at,
                           notes = COALESCE(EXCLUDED.notes, user_cve_exposures.notes)",
        )
        .bind(user_id)
        .bind(cve_id)
        .bind(state.to_string())
        .bind(patched_at)
        .bind(notes)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
