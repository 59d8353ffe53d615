use chrono::{DateTime, Utc};
use uuid::Uuid;

use threatline_common::ReportPeriod;

use crate::error::Result;
use crate::Store;

/// A persisted period report. `stats` stays a JSON object on the wire.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PeriodReportRow {
    pub user_id: Uuid,
    pub period: String,
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,
    pub summary: Option<String>,
    pub stats: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PeriodSnapshotRow {
    pub user_id: Uuid,
    pub period: String,
    pub snap_date: DateTime<Utc>,
    pub metrics: serde_json::Value,
}

impl Store {
    pub async fn upsert_period_report(
        &self,
        user_id: Uuid,
        period: ReportPeriod,
        from_date: DateTime<Utc>,
        to_date: DateTime<Utc>,
        summary: Option<&str>,
        stats: &serde_json::Value,
        generated_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO period_reports (user_id, period, from_date, to_date, summary, stats, generated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (user_id, period)
             DO UPDATE SET from_date = EXCLUDED.from_date,
                           to_date = EXCLUDED.to_date,
                           summary = EXCLUDED.summary,
                           stats = EXCLUDED.stats,
                           generated_at = EXCLUDED.generated_at",
        )
        .bind(user_id)
        .bind(period.to_string())
        .bind(from_date)
        .bind(to_date)
        .bind(summary)
        .bind(stats)
        .bind(generated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn period_report(
        &self,
        user_id: Uuid,
        period: ReportPeriod,
    ) -> Result<Option<PeriodReportRow>> {
        let row: Option<PeriodReportRow> = sqlx::query_as(
            "SELECT user_id, period, from_date, to_date, summary, stats, generated_at
             FROM period_reports WHERE user_id = $1 AND period = $2",
        )
        .bind(user_id)
        .bind(period.to_string())
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    pub async fn upsert_period_snapshot(
        &self,
        user_id: Uuid,
        period: ReportPeriod,
        snap_date: DateTime<Utc>,
        metrics: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO period_snapshots (user_id, period, snap_date, metrics)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id, period, snap_date)
             DO UPDATE SET metrics = EXCLUDED.metrics",
        )
        .bind(user_id)
        .bind(period.to_string())
        .bind(snap_date)
        .bind(metrics)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Newest snapshot at or before `cutoff`, the baseline for delta math.
    pub async fn snapshot_at_or_before(
        &self,
        user_id: Uuid,
        period: ReportPeriod,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<PeriodSnapshotRow>> {
        let row: Option<PeriodSnapshotRow> = sqlx::query_as(
            "SELECT user_id, period, snap_date, metrics
             FROM period_snapshots
             WHERE user_id = $1 AND period = $2 AND snap_date <= $3
             ORDER BY snap_date DESC
             LIMIT 1",
        )
        .bind(user_id)
        .bind(period.to_string())
        .bind(cutoff)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }
}
