use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tracing::{info, warn};

use threatline_common::User;
use threatline_scraper::FeedScraper;
use threatline_store::Store;

use crate::email::{render_digest_html, EmailSender};
use crate::pipeline::DigestPipeline;

const TICK_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Stories included in a digest email.
const EMAIL_BRIEF_LIMIT: i64 = 10;

/// Hourly due-time evaluator. There is deliberately no run lease: if the
/// host fires overlapping ticks, both runs hit the same upserts and the
/// second is absorbed as a no-op.
pub struct Scheduler {
    store: Store,
    pipeline: Arc<DigestPipeline>,
    scraper: Arc<FeedScraper>,
    email: Option<Arc<dyn EmailSender>>,
    frontend_url: String,
}

impl Scheduler {
    pub fn new(
        store: Store,
        pipeline: Arc<DigestPipeline>,
        scraper: Arc<FeedScraper>,
        email: Option<Arc<dyn EmailSender>>,
        frontend_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            pipeline,
            scraper,
            email,
            frontend_url: frontend_url.into(),
        }
    }

    /// Run ticks forever, one per hour.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// One scheduling pass: find due users, pre-warm the scrape cache over
    /// their combined RSS URLs, then run each digest. Per-user failures
    /// never abort the loop.
    pub async fn tick(&self) {
        let now = Utc::now();
        let users = match self.store.all_users().await {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "Scheduler could not load users");
                return;
            }
        };

        let due: Vec<&User> = users.iter().filter(|u| is_due(u, now)).collect();
        if due.is_empty() {
            info!(users = users.len(), "Scheduler tick: nobody due");
            return;
        }
        info!(users = users.len(), due = due.len(), "Scheduler tick");

        // Shared cache pre-warm so per-user scrapes mostly hit the cache.
        let due_ids: Vec<uuid::Uuid> = due.iter().map(|u| u.id).collect();
        match self.store.active_rss_urls_for_users(&due_ids).await {
            Ok(urls) => self.scraper.prewarm(&urls).await,
            Err(e) => warn!(error = %e, "Pre-warm URL load failed"),
        }

        for user in due {
            let outcome = self.pipeline.run_for_user(user).await;

            if let Err(e) = self.store.set_last_digest_at(user.id, Utc::now()).await {
                warn!(user_id = %user.id, error = %e, "Failed to record digest time");
            }

            if user.email_enabled && outcome.matched > 0 {
                self.send_digest_email(user).await;
            }
        }
    }

    async fn send_digest_email(&self, user: &User) {
        let Some(sender) = &self.email else {
            info!(user_id = %user.id, "Email skipped: no sender configured");
            return;
        };

        let briefs = match self.store.briefs_for_user(user.id, EMAIL_BRIEF_LIMIT).await {
            Ok(briefs) => briefs,
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "Brief load for email failed");
                return;
            }
        };
        if briefs.is_empty() {
            return;
        }

        let subject = format!("Security digest: {} stories", briefs.len());
        let html = render_digest_html(&briefs, &self.frontend_url);
        if let Err(e) = sender.send(&user.email, &subject, &html).await {
            warn!(user_id = %user.id, error = %e, "Digest email failed");
            return;
        }

        if let Err(e) = self
            .store
            .mark_matched_articles_sent(user.id, Utc::now())
            .await
        {
            warn!(user_id = %user.id, error = %e, "Failed to mark articles sent");
        }
    }
}

/// Whether a user's digest is due at `now`. Daily-or-longer cadences are
/// additionally pinned to the UTC hour of the user's digest time.
pub fn is_due(user: &User, now: DateTime<Utc>) -> bool {
    let interval = user.digest_frequency.interval();

    let elapsed_enough = match user.last_digest_at {
        None => true,
        Some(last) => now - last >= interval,
    };
    if !elapsed_enough {
        return false;
    }

    if user.digest_frequency.is_daily_or_longer() {
        return user.digest_hour() == Some(now.hour());
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use threatline_common::DigestFrequency;
    use uuid::Uuid;

    fn user(frequency: DigestFrequency, digest_time: &str, last: Option<DateTime<Utc>>) -> User {
        User {
            id: Uuid::new_v4(),
            email: "user@example.com".into(),
            industry_id: None,
            digest_frequency: frequency,
            digest_time: digest_time.into(),
            last_digest_at: last,
            email_enabled: true,
            onboarded: true,
        }
    }

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, hour, 30, 0).unwrap()
    }

    #[test]
    fn never_run_hourly_user_is_due() {
        assert!(is_due(&user(DigestFrequency::Hourly, "08:00", None), at_hour(3)));
    }

    #[test]
    fn hourly_user_respects_interval() {
        let now = at_hour(12);
        let recent = user(DigestFrequency::Hourly, "08:00", Some(now - Duration::minutes(30)));
        assert!(!is_due(&recent, now));

        let stale = user(DigestFrequency::Hourly, "08:00", Some(now - Duration::hours(2)));
        assert!(is_due(&stale, now));
    }

    #[test]
    fn daily_user_is_pinned_to_digest_hour() {
        let u = user(DigestFrequency::Daily, "08:00", None);
        assert!(is_due(&u, at_hour(8)));
        assert!(!is_due(&u, at_hour(9)));
    }

    #[test]
    fn daily_user_not_due_within_interval_even_at_hour() {
        let now = at_hour(8);
        let u = user(DigestFrequency::Daily, "08:00", Some(now - Duration::hours(12)));
        assert!(!is_due(&u, now));

        let u = user(DigestFrequency::Daily, "08:00", Some(now - Duration::days(1)));
        assert!(is_due(&u, now));
    }

    #[test]
    fn unparseable_digest_time_never_fires_daily() {
        let u = user(DigestFrequency::Weekly, "not-a-time", None);
        assert!(!is_due(&u, at_hour(8)));
    }

    #[test]
    fn sub_daily_frequency_ignores_digest_hour() {
        let u = user(DigestFrequency::Every6h, "08:00", None);
        assert!(is_due(&u, at_hour(14)));
    }
}
