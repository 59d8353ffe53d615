pub mod cpe;
pub mod engine;
pub mod matcher;
pub mod metrics;

pub use cpe::{generate_cpe_pattern, parse_cpe, Cpe};
pub use engine::ExposureEngine;
pub use matcher::{best_match, classify, match_cpe, MatchLevel};
pub use metrics::{compute_metrics, metrics_delta, MetricsDelta, RemediationMetrics};
