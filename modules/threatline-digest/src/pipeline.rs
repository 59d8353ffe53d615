//! The per-user digest pipeline: scrape → match → persist → content →
//! entities → CVEs → cluster → brief → period reports. Every stage is
//! best-effort; failures are recorded on the outcome and never abort the
//! run or cross a user boundary.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use llm_client::CompletionService;
use threatline_cluster::{
    cluster_articles, compute_stats, ArticleGroup, BriefingGenerator, ClusterArticle,
    ReportBuilder, ReportInput,
};
use threatline_common::{
    Article, ArticleCve, ArticleEntity, DigestOutcome, FetchedArticle, IndustrySignal,
    ReportPeriod, ThreatlineError, User,
};
use threatline_enrich::{
    extract_cve_ids, ArticleInput, CveEnricher, CveEnrichment, EntityExtractor, ENTITY_BATCH_SIZE,
};
use threatline_exposure::ExposureEngine;
use threatline_scraper::{subtract_seen, ContentExtractor, FeedScraper, KeywordMatcher};
use threatline_store::{NewArticle, Store};

/// Parallel content fetches per user.
const CONTENT_CONCURRENCY: usize = 15;
/// Parallel briefing completions per user.
const BRIEFING_CONCURRENCY: usize = 10;

pub struct DigestPipeline {
    store: Store,
    scraper: Arc<FeedScraper>,
    content: Arc<ContentExtractor>,
    enricher: Arc<CveEnricher>,
    exposure: ExposureEngine,
    /// Absent when OPENAI_API_KEY is not configured; LLM stages are skipped.
    llm: Option<Arc<dyn CompletionService>>,
}

impl DigestPipeline {
    pub fn new(
        store: Store,
        scraper: Arc<FeedScraper>,
        enricher: Arc<CveEnricher>,
        llm: Option<Arc<dyn CompletionService>>,
    ) -> Self {
        let exposure = ExposureEngine::new(store.clone());
        Self {
            store,
            scraper,
            content: Arc::new(ContentExtractor::new()),
            enricher,
            exposure,
            llm,
        }
    }

    /// Run the full digest for one user. Never returns an error: failures
    /// are categorized strings on the outcome.
    pub async fn run_for_user(&self, user: &User) -> DigestOutcome {
        let mut outcome = DigestOutcome::new(user.id);
        let run_start = Utc::now();
        info!(user_id = %user.id, "Digest run starting");

        // Industry signal catalog; empty means entity extraction is skipped.
        let signals = match self.load_signal_catalog(user).await {
            Ok(signals) => signals,
            Err(e) => {
                outcome
                    .errors
                    .push(ThreatlineError::Database(e.to_string()).to_string());
                Vec::new()
            }
        };

        // Scrape + dedupe + match + persist.
        let (articles, scrape_errors) = self.scrape_stage(user).await;
        outcome.errors.extend(scrape_errors);
        outcome.scraped = articles.len();

        let new_articles = match self.store.user_article_urls(user.id).await {
            Ok(urls) => subtract_seen(articles, &urls.into_iter().collect::<HashSet<_>>()),
            Err(e) => {
                outcome
                    .errors
                    .push(ThreatlineError::Database(e.to_string()).to_string());
                Vec::new()
            }
        };

        let matched = self.match_stage(user, new_articles).await;
        outcome.matched = matched.len();

        let mut batch_ids = match self.persist_matched(user, &matched).await {
            Ok(ids) => ids,
            Err(e) => {
                outcome
                    .errors
                    .push(ThreatlineError::Database(e.to_string()).to_string());
                Vec::new()
            }
        };

        // Pull in still-ungrouped articles from earlier runs so a failed
        // enrichment gets retried before clustering.
        if let Ok(ungrouped) = self.store.ungrouped_matched_user_articles(user.id).await {
            let known: HashSet<Uuid> = batch_ids.iter().copied().collect();
            batch_ids.extend(
                ungrouped
                    .iter()
                    .map(|ua| ua.article_id)
                    .filter(|id| !known.contains(id)),
            );
        }

        // Enrichment stages over the batch.
        if let Err(e) = self.content_stage(&batch_ids).await {
            outcome
                .errors
                .push(ThreatlineError::Scrape(e.to_string()).to_string());
        }
        if let Err(e) = self.entity_stage(&batch_ids, &signals).await {
            outcome
                .errors
                .push(ThreatlineError::Llm(e.to_string()).to_string());
        }
        if let Err(e) = self.cve_stage(user, &batch_ids).await {
            outcome
                .errors
                .push(ThreatlineError::Enrichment(e.to_string()).to_string());
        }

        // Cluster and brief.
        let new_groups = match self.cluster_stage(user).await {
            Ok(groups) => groups,
            Err(e) => {
                outcome
                    .errors
                    .push(ThreatlineError::Database(e.to_string()).to_string());
                Vec::new()
            }
        };
        outcome.summarized = self.brief_stage(&new_groups).await;

        // Period reports, failures isolated per period.
        let report_errors = self.report_stage(user).await;
        outcome.errors.extend(report_errors);

        info!(
            user_id = %user.id,
            scraped = outcome.scraped,
            matched = outcome.matched,
            summarized = outcome.summarized,
            errors = outcome.errors.len(),
            elapsed_s = (Utc::now() - run_start).num_seconds(),
            "Digest run complete"
        );
        outcome
    }

    async fn load_signal_catalog(&self, user: &User) -> Result<Vec<IndustrySignal>> {
        match user.industry_id {
            Some(industry_id) => Ok(self
                .store
                .industry_signals_for_industry(industry_id)
                .await?),
            None => Ok(Vec::new()),
        }
    }

    /// Scrape every active source. Per-source failures become categorized
    /// errors; the rest of the batch proceeds.
    async fn scrape_stage(&self, user: &User) -> (Vec<FetchedArticle>, Vec<String>) {
        let mut articles = Vec::new();
        let mut errors = Vec::new();

        let sources = match self.store.active_sources_for_user(user.id).await {
            Ok(sources) => sources,
            Err(e) => {
                errors.push(ThreatlineError::Database(e.to_string()).to_string());
                return (articles, errors);
            }
        };

        for source in &sources {
            match self.scraper.scrape(source).await {
                Ok(mut scraped) => articles.append(&mut scraped),
                Err(e) => {
                    warn!(url = %source.url, error = %e, "Source scrape failed");
                    errors.push(
                        ThreatlineError::Scrape(format!("{}: {e}", source.url)).to_string(),
                    );
                }
            }
        }

        (articles, errors)
    }

    /// In-memory keyword matching; returns only matched articles with the
    /// keywords that hit.
    async fn match_stage(
        &self,
        user: &User,
        articles: Vec<FetchedArticle>,
    ) -> Vec<(FetchedArticle, Vec<String>)> {
        let keywords = match self.store.keywords_for_user(user.id).await {
            Ok(keywords) => keywords,
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "Keyword load failed");
                return Vec::new();
            }
        };
        let words: Vec<String> = keywords.into_iter().map(|k| k.word).collect();
        let matcher = KeywordMatcher::new(&words);

        articles
            .into_iter()
            .filter_map(|article| {
                let result = matcher.match_text(&article.title, &article.content);
                result.matched.then_some((article, result.matched_keywords))
            })
            .collect()
    }

    /// Find-or-create the cross-user Article and upsert this user's link.
    async fn persist_matched(
        &self,
        user: &User,
        matched: &[(FetchedArticle, Vec<String>)],
    ) -> Result<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(matched.len());
        for (fetched, keywords) in matched {
            let article = self
                .store
                .find_or_create_article(&NewArticle {
                    source_id: fetched.source_id,
                    url: fetched.url.clone(),
                    title: fetched.title.clone(),
                    content: fetched.content.clone(),
                    author: fetched.author.clone(),
                    guid: fetched.guid.clone(),
                    published_at: fetched.published_at,
                })
                .await?;
            self.store
                .upsert_user_article(user.id, article.id, fetched.source_id, true, keywords)
                .await?;
            ids.push(article.id);
        }
        Ok(ids)
    }

    /// Fetch full text for batch articles still on their RSS snippet.
    /// Bounded fan-out; per-article failures are logged, never fatal.
    async fn content_stage(&self, batch_ids: &[Uuid]) -> Result<()> {
        let missing = self.store.articles_missing_clean_text(batch_ids).await?;
        if missing.is_empty() {
            return Ok(());
        }
        info!(articles = missing.len(), "Content stage starting");

        let results: Vec<(Uuid, Result<threatline_scraper::ExtractedContent>)> =
            stream::iter(missing.into_iter().map(|article| {
                let content = self.content.clone();
                async move {
                    let extracted = content.extract(&article.url).await;
                    (article.id, extracted)
                }
            }))
            .buffer_unordered(CONTENT_CONCURRENCY)
            .collect()
            .await;

        for (article_id, result) in results {
            match result {
                Ok(extracted) => {
                    self.store
                        .set_article_content(
                            article_id,
                            &extracted.clean_text,
                            Some(&extracted.raw_html),
                            &extracted.external_links,
                        )
                        .await?;
                }
                Err(e) => warn!(article_id = %article_id, error = %e, "Content extraction failed"),
            }
        }
        Ok(())
    }

    /// Batched LLM entity/signal extraction. Batches run sequentially to
    /// respect provider rate limits; each batch persists before the next.
    async fn entity_stage(&self, batch_ids: &[Uuid], signals: &[IndustrySignal]) -> Result<()> {
        let Some(llm) = &self.llm else {
            return Ok(());
        };
        if signals.is_empty() {
            return Ok(());
        }

        let missing = self.store.articles_missing_entities(batch_ids).await?;
        if missing.is_empty() {
            return Ok(());
        }
        info!(articles = missing.len(), "Entity stage starting");

        let extractor = EntityExtractor::new(llm.clone());
        let allowed_slugs: Vec<String> = signals.iter().map(|s| s.slug.clone()).collect();
        let slug_to_id: HashMap<&str, Uuid> =
            signals.iter().map(|s| (s.slug.as_str(), s.id)).collect();

        for batch in missing.chunks(ENTITY_BATCH_SIZE) {
            let inputs: Vec<ArticleInput> = batch
                .iter()
                .map(|article| ArticleInput {
                    id: article.id,
                    title: article.title.clone(),
                    text: article_text(article),
                })
                .collect();

            let extracted = match extractor.extract_batch(&inputs, &allowed_slugs).await {
                Ok(extracted) => extracted,
                Err(e) => {
                    warn!(error = %e, "Entity extraction batch failed");
                    continue;
                }
            };

            for article in batch {
                if let Some(facts) = extracted.get(&article.id) {
                    let rows: Vec<ArticleEntity> = facts
                        .entities
                        .iter()
                        .map(|(entity_type, name, confidence)| ArticleEntity {
                            article_id: article.id,
                            entity_type: *entity_type,
                            name: name.clone(),
                            confidence: *confidence,
                        })
                        .collect();
                    self.store.insert_article_entities(&rows).await?;

                    for (slug, confidence) in &facts.signals {
                        if let Some(signal_id) = slug_to_id.get(slug.as_str()) {
                            self.store
                                .upsert_article_signal(article.id, *signal_id, *confidence)
                                .await?;
                        }
                    }
                }
                self.store.set_entities_extracted(article.id).await?;
            }
        }
        Ok(())
    }

    /// Extract CVE ids across the batch, enrich the ones the store has not
    /// seen, upsert per-article rows, and classify exposures.
    async fn cve_stage(&self, user: &User, batch_ids: &[Uuid]) -> Result<()> {
        let missing = self.store.articles_missing_cves(batch_ids).await?;
        if missing.is_empty() {
            return Ok(());
        }

        // Per-article id lists and the union across the batch.
        let mut ids_by_article: HashMap<Uuid, Vec<String>> = HashMap::new();
        let mut union: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for article in &missing {
            let text = format!("{} {}", article.title, article_text(article));
            let ids = extract_cve_ids(&text);
            for id in &ids {
                if seen.insert(id.clone()) {
                    union.push(id.clone());
                }
            }
            ids_by_article.insert(article.id, ids);
        }

        if !union.is_empty() {
            info!(cves = union.len(), "CVE stage starting");
        }

        // Partition: already enriched vs. new.
        let known_rows = self.store.known_cve_enrichments(&union).await?;
        let mut enrichments: HashMap<String, CveEnrichment> = known_rows
            .iter()
            .map(|row| (row.cve_id.clone(), enrichment_from(row)))
            .collect();

        let to_fetch: Vec<String> = union
            .iter()
            .filter(|id| !enrichments.contains_key(*id))
            .cloned()
            .collect();
        let batch = self.enricher.enrich(&to_fetch).await;
        enrichments.extend(batch.enriched);

        for article in &missing {
            let ids = &ids_by_article[&article.id];
            let mut complete = true;
            for cve_id in ids {
                let Some(enrichment) = enrichments.get(cve_id) else {
                    complete = false;
                    continue;
                };
                let row = ArticleCve {
                    id: Uuid::new_v4(),
                    article_id: article.id,
                    cve_id: cve_id.clone(),
                    cvss_score: enrichment.cvss_score,
                    severity: enrichment.severity.clone(),
                    description: enrichment.description.clone(),
                    cpe_matches: enrichment.cpe_matches.clone(),
                    published_date: enrichment.published_date,
                    in_kev: enrichment.in_kev,
                    kev_date_added: enrichment.kev_date_added,
                    kev_due_date: enrichment.kev_due_date,
                    kev_ransomware_use: enrichment.kev_ransomware_use,
                };
                self.store.upsert_article_cve(&row).await?;
            }
            // The flag only flips once every id has an enrichment row, so
            // a transient NVD failure is retried on the next run.
            if complete {
                self.store.set_cves_extracted(article.id).await?;
            }
        }

        // Keep the exposure ledger current with what this batch surfaced.
        let rows = self.store.cves_for_articles(batch_ids).await?;
        self.exposure.classify_batch(user.id, &rows).await?;
        Ok(())
    }

    /// Cluster ungrouped matched articles into stories.
    async fn cluster_stage(&self, user: &User) -> Result<Vec<(Uuid, Vec<Uuid>)>> {
        let ungrouped = self.store.ungrouped_matched_user_articles(user.id).await?;
        if ungrouped.is_empty() {
            return Ok(Vec::new());
        }

        let article_ids: Vec<Uuid> = ungrouped.iter().map(|ua| ua.article_id).collect();
        let articles = self.store.articles_by_ids(&article_ids).await?;
        let entities = self.store.entities_for_articles(&article_ids).await?;
        let signals = self.store.signals_for_articles(&article_ids).await?;

        let mut entities_by_article: HashMap<Uuid, Vec<String>> = HashMap::new();
        for entity in entities {
            entities_by_article
                .entry(entity.article_id)
                .or_default()
                .push(entity.name);
        }
        let mut signals_by_article: HashMap<Uuid, Vec<String>> = HashMap::new();
        for signal in signals {
            signals_by_article
                .entry(signal.article_id)
                .or_default()
                .push(signal.slug);
        }
        let keywords_by_article: HashMap<Uuid, Vec<String>> = ungrouped
            .iter()
            .map(|ua| (ua.article_id, ua.matched_keywords.clone()))
            .collect();

        let inputs: Vec<ClusterArticle> = articles
            .iter()
            .map(|article| ClusterArticle {
                article_id: article.id,
                title: article.title.clone(),
                published_at: article.published_at,
                entities: entities_by_article.remove(&article.id).unwrap_or_default(),
                signals: signals_by_article.remove(&article.id).unwrap_or_default(),
                keywords: keywords_by_article
                    .get(&article.id)
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect();

        let groups = cluster_articles(&inputs);
        let now = Utc::now();

        let mut created = Vec::with_capacity(groups.len());
        for ArticleGroup {
            title,
            article_ids,
            confidence,
            ..
        } in groups
        {
            let group = self
                .store
                .create_news_group(user.id, &title, confidence, now)
                .await?;
            self.store
                .assign_articles_to_group(user.id, &article_ids, group.id)
                .await?;
            created.push((group.id, article_ids));
        }
        Ok(created)
    }

    /// One briefing completion per new group, bounded fan-out. Returns the
    /// number of groups successfully briefed.
    async fn brief_stage(&self, new_groups: &[(Uuid, Vec<Uuid>)]) -> usize {
        let Some(llm) = &self.llm else {
            return 0;
        };
        if new_groups.is_empty() {
            return 0;
        }

        let generator = Arc::new(BriefingGenerator::new(llm.clone()));
        let results: Vec<bool> = stream::iter(new_groups.to_vec().into_iter().map(
            |(group_id, article_ids)| brief_one(generator.clone(), self.store.clone(), group_id, article_ids),
        ))
        .buffer_unordered(BRIEFING_CONCURRENCY)
        .collect()
        .await;

        results.into_iter().filter(|ok| *ok).count()
    }

    /// Generate all three period reports concurrently, isolating failures.
    async fn report_stage(&self, user: &User) -> Vec<String> {
        let results = futures::future::join_all(
            ReportPeriod::ALL
                .iter()
                .map(|period| self.build_period_report(user, *period)),
        )
        .await;

        results
            .into_iter()
            .zip(ReportPeriod::ALL)
            .filter_map(|(result, period)| {
                result.err().map(|e| {
                    ThreatlineError::Llm(format!("{period} report: {e}")).to_string()
                })
            })
            .collect()
    }

    async fn build_period_report(&self, user: &User, period: ReportPeriod) -> Result<()> {
        let now = Utc::now();
        let since = now - chrono::Duration::days(period.days());

        let groups = self.store.groups_for_user_since(user.id, since).await?;
        let group_ids: Vec<Uuid> = groups.iter().map(|g| g.id).collect();
        let user_articles = self
            .store
            .user_articles_in_groups(user.id, &group_ids)
            .await?;
        let article_ids: Vec<Uuid> = user_articles.iter().map(|ua| ua.article_id).collect();

        let entities = self.store.entities_for_articles(&article_ids).await?;
        let signals = self.store.signals_for_articles(&article_ids).await?;
        let cves = self.store.cves_for_articles(&article_ids).await?;

        let input = ReportInput {
            period,
            now,
            groups,
            signal_names: signals.into_iter().map(|s| s.name).collect(),
            entities,
            cves,
        };
        let stats = compute_stats(&input);

        let summary = match (&self.llm, input.groups.is_empty()) {
            (Some(llm), false) => {
                let builder = ReportBuilder::new(llm.clone());
                Some(builder.generate_summary(&input, &stats).await?)
            }
            _ => None,
        };

        self.store
            .upsert_period_report(
                user.id,
                period,
                input.from_date(),
                now,
                summary.as_deref(),
                &serde_json::to_value(&stats)?,
                now,
            )
            .await?;

        // Snapshot the exposure posture behind every report.
        self.exposure
            .snapshot_and_delta(user.id, period, now)
            .await?;
        Ok(())
    }
}

/// Generate and persist one group's briefing; never fails the caller.
async fn brief_one(
    generator: Arc<BriefingGenerator>,
    store: Store,
    group_id: Uuid,
    article_ids: Vec<Uuid>,
) -> bool {
    let articles = match store.articles_by_ids(&article_ids).await {
        Ok(articles) => articles,
        Err(e) => {
            warn!(group_id = %group_id, error = %e, "Briefing article load failed");
            return false;
        }
    };
    let texts: Vec<(String, String)> = articles
        .iter()
        .map(|a| (a.title.clone(), article_text(a)))
        .collect();

    let briefing = match generator.generate(&texts).await {
        Ok(briefing) => briefing,
        Err(e) => {
            warn!(group_id = %group_id, error = %e, "Briefing generation failed");
            return false;
        }
    };

    match store
        .update_group_briefing(
            group_id,
            &briefing.title,
            &briefing.synopsis,
            &briefing.executive_summary,
            &briefing.impact_analysis,
            &briefing.actionability,
            briefing.case_type,
        )
        .await
    {
        Ok(()) => true,
        Err(e) => {
            warn!(group_id = %group_id, error = %e, "Briefing persist failed");
            false
        }
    }
}

/// Full text when extracted, RSS snippet otherwise.
fn article_text(article: &Article) -> String {
    article
        .clean_text
        .clone()
        .unwrap_or_else(|| article.content.clone())
}

fn enrichment_from(row: &ArticleCve) -> CveEnrichment {
    CveEnrichment {
        cvss_score: row.cvss_score,
        severity: row.severity.clone(),
        description: row.description.clone(),
        cpe_matches: row.cpe_matches.clone(),
        published_date: row.published_date,
        in_kev: row.in_kev,
        kev_date_added: row.kev_date_added,
        kev_due_date: row.kev_due_date,
        kev_ransomware_use: row.kev_ransomware_use,
    }
}
