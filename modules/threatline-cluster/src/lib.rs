pub mod briefing;
pub mod cluster;
pub mod report;

pub use briefing::{Briefing, BriefingGenerator};
pub use cluster::{cluster_articles, ArticleGroup, ClusterArticle, MAX_GROUP_SIZE};
pub use report::{compute_stats, ReportBuilder, ReportInput, ReportStats};
