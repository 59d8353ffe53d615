use thiserror::Error;

/// Categorized pipeline error. Stage failures are recorded in the digest
/// outcome's `errors` list under their category, never rethrown across a
/// user boundary.
#[derive(Error, Debug)]
pub enum ThreatlineError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Scrape error: {0}")]
    Scrape(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Enrichment error: {0}")]
    Enrichment(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
