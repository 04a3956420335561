use anyhow::bail;
use clap::Parser;

/// NL→SQL service configuration (environment-sourced).
#[derive(Parser, Clone)]
pub struct ServiceConfig {
    /// Gemini API key used for question→SQL generation.
    #[arg(long, env = "GEMINI_API_KEY")]
    pub gemini_api_key: String,

    /// Gemini model identifier.
    #[arg(long, env = "GEMINI_MODEL", default_value = "gemini-1.5-flash")]
    pub gemini_model: String,

    /// Postgres connection string the generated queries run against.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Bind address for the HTTP server.
    #[arg(long, env = "BIND", default_value = "127.0.0.1:8000")]
    pub bind: String,

    /// Tables the generated SQL may reference (comma-separated).
    #[arg(
        long,
        env = "ALLOWED_TABLES",
        value_delimiter = ',',
        default_value = "customers,products,orders"
    )]
    pub allowed_tables: Vec<String>,

    /// Hard cap applied to every LIMIT clause and to returned rows.
    #[arg(long, env = "MAX_LIMIT", default_value_t = 200)]
    pub max_limit: u64,

    /// Per-statement execution timeout in milliseconds.
    #[arg(long, env = "STATEMENT_TIMEOUT_MS", default_value_t = 5000)]
    pub statement_timeout_ms: u64,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("gemini_api_key", &"<redacted>")
            .field("gemini_model", &self.gemini_model)
            .field("database_url", &"<redacted>")
            .field("bind", &self.bind)
            .field("allowed_tables", &self.allowed_tables)
            .field("max_limit", &self.max_limit)
            .field("statement_timeout_ms", &self.statement_timeout_ms)
            .finish()
    }
}

impl ServiceConfig {
    /// Refuse to serve with a half-configured process.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.gemini_api_key.trim().is_empty() {
            bail!("GEMINI_API_KEY is required and cannot be empty");
        }
        if self.database_url.trim().is_empty() {
            bail!("DATABASE_URL is required and cannot be empty");
        }
        if self.max_limit == 0 {
            bail!("MAX_LIMIT must be positive");
        }
        if self.allowed_tables.iter().all(|t| t.trim().is_empty()) {
            bail!("ALLOWED_TABLES must name at least one table");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ServiceConfig;

    fn base() -> ServiceConfig {
        ServiceConfig {
            gemini_api_key: "sk-live-0123".to_string(),
            gemini_model: "gemini-1.5-flash".to_string(),
            database_url: "postgres://app@localhost/app".to_string(),
            bind: "127.0.0.1:8000".to_string(),
            allowed_tables: vec!["customers".to_string()],
            max_limit: 200,
            statement_timeout_ms: 5000,
        }
    }

    #[test]
    fn accepts_complete_config() {
        base().validate().unwrap();
    }

    #[test]
    fn rejects_blank_required_values() {
        let mut cfg = base();
        cfg.gemini_api_key = "   ".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.database_url = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_row_cap() {
        let mut cfg = base();
        cfg.max_limit = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?}", base());
        assert!(!rendered.contains("sk-live-0123"), "api key leaked: {rendered}");
        assert!(!rendered.contains("postgres://"), "db url leaked: {rendered}");
    }
}
