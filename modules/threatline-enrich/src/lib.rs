pub mod cve;
pub mod entities;
pub mod enricher;
pub mod kev;
pub mod nvd;
pub mod rate_limit;

pub use cve::extract_cve_ids;
pub use entities::{ArticleInput, EntityExtractor, ExtractedFacts, ENTITY_BATCH_SIZE};
pub use enricher::{CveEnricher, CveEnrichment, EnrichmentBatch};
pub use kev::{KevCatalog, KevEntry};
pub use nvd::{NvdClient, NvdData};
pub use rate_limit::SlidingWindowLimiter;
