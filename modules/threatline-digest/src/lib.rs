pub mod email;
pub mod pipeline;
pub mod scheduler;

pub use email::{render_digest_html, EmailSender, ResendMailer};
pub use pipeline::DigestPipeline;
pub use scheduler::{is_due, Scheduler};
