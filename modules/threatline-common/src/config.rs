use std::env;

/// Application configuration loaded from environment variables.
/// Optional keys degrade the corresponding capability instead of failing
/// startup: no OPENAI_API_KEY means no briefings, no NVD_API_KEY means the
/// unauthenticated NVD rate tier, no RESEND_API_KEY means no email.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    // AI provider
    pub openai_api_key: String,

    // Vulnerability enrichment
    pub nvd_api_key: Option<String>,

    // Email delivery
    pub resend_api_key: Option<String>,

    // Web server
    pub jwt_secret: String,
    pub frontend_url: String,
    pub web_host: String,
    pub web_port: u16,
}

impl Config {
    /// Load configuration for the API server + scheduler process.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            nvd_api_key: env::var("NVD_API_KEY").ok().filter(|v| !v.is_empty()),
            resend_api_key: env::var("RESEND_API_KEY").ok().filter(|v| !v.is_empty()),
            jwt_secret: required_env("JWT_SECRET"),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: env::var("WEB_PORT")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .expect("WEB_PORT must be a number"),
        }
    }

    /// Log which sensitive vars are present without exposing their values.
    pub fn log_redacted(&self) {
        let vars = [
            ("DATABASE_URL", self.database_url.len()),
            ("OPENAI_API_KEY", self.openai_api_key.len()),
            (
                "NVD_API_KEY",
                self.nvd_api_key.as_deref().map(str::len).unwrap_or(0),
            ),
            (
                "RESEND_API_KEY",
                self.resend_api_key.as_deref().map(str::len).unwrap_or(0),
            ),
            ("JWT_SECRET", self.jwt_secret.len()),
        ];
        for (name, len) in vars {
            if len == 0 {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({len} chars)");
            }
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
