//! Configuration management

use anyhow::{self, Context, Result};

use crate::types::FailurePolicy;

const DEFAULT_PROGRESS_PREFIX: &str = "collecta.progress";
const DEFAULT_INGEST_MAX_ROWS: usize = 10_000;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// Optional NATS credentials
    pub nats_user: Option<String>,
    pub nats_password: Option<String>,

    /// PostgreSQL connection string
    pub database_url: String,

    /// JWT secret key for token signing/validation
    pub jwt_secret: String,

    /// Subject prefix of the per-user progress channel
    pub progress_subject_prefix: String,

    /// When false, progress events are only logged
    pub progress_enabled: bool,

    /// Behaviour of a distribution run when an update fails
    pub distribution_failure_policy: FailurePolicy,

    /// Maximum data rows accepted per upload
    pub ingest_max_rows: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let nats_url = var("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string());

        let nats_user = var("NATS_USER").filter(|u| !u.is_empty());
        let nats_password = var("NATS_PASSWORD");

        let database_url = var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let jwt_secret = var("JWT_SECRET")
            .context("JWT_SECRET must be set, generate one with: openssl rand -base64 48")?;

        if jwt_secret.len() < 32 {
            anyhow::bail!(
                "JWT_SECRET must be at least 32 bytes (current: {} bytes). Generate one with: openssl rand -base64 48",
                jwt_secret.len()
            );
        }

        const KNOWN_DEV_SECRETS: &[&str] = &[
            "dev-secret-change-in-production-min-32-bytes!!",
        ];
        if KNOWN_DEV_SECRETS.contains(&jwt_secret.as_str()) {
            tracing::warn!("⚠ JWT_SECRET matches a known default, change it for production!");
        }

        let progress_subject_prefix = var("PROGRESS_SUBJECT_PREFIX")
            .map(|p| p.trim().trim_end_matches('.').to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PROGRESS_PREFIX.to_string());

        let progress_enabled = !matches!(
            var("PROGRESS_ENABLED").map(|v| v.trim().to_lowercase()).as_deref(),
            Some("false") | Some("0") | Some("off")
        );

        let distribution_failure_policy = match var("DISTRIBUTION_FAILURE_POLICY") {
            Some(raw) => FailurePolicy::parse(&raw)
                .with_context(|| format!("DISTRIBUTION_FAILURE_POLICY must be 'halt' or 'continue', got '{}'", raw))?,
            None => FailurePolicy::default(),
        };

        let ingest_max_rows = match var("INGEST_MAX_ROWS") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .with_context(|| format!("INGEST_MAX_ROWS must be a positive integer, got '{}'", raw))?,
            None => DEFAULT_INGEST_MAX_ROWS,
        };

        Ok(Self {
            nats_url,
            nats_user,
            nats_password,
            database_url,
            jwt_secret,
            progress_subject_prefix,
            progress_enabled,
            distribution_failure_policy,
            ingest_max_rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "test-secret-key-for-jwt-at-least-32-bytes-long";

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = load(&[("DATABASE_URL", "postgres://test"), ("JWT_SECRET", SECRET)]).unwrap();
        assert_eq!(config.nats_url, "nats://localhost:4222");
        assert!(config.nats_user.is_none());
        assert_eq!(config.progress_subject_prefix, "collecta.progress");
        assert!(config.progress_enabled);
        assert_eq!(config.distribution_failure_policy, FailurePolicy::Halt);
        assert_eq!(config.ingest_max_rows, 10_000);
    }

    #[test]
    fn test_config_requires_database_url() {
        let err = load(&[("JWT_SECRET", SECRET)]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_config_rejects_short_jwt_secret() {
        let err = load(&[("DATABASE_URL", "postgres://test"), ("JWT_SECRET", "short")]).unwrap_err();
        assert!(err.to_string().contains("at least 32 bytes"));
    }

    #[test]
    fn test_config_reads_overrides() {
        let config = load(&[
            ("DATABASE_URL", "postgres://test"),
            ("JWT_SECRET", SECRET),
            ("NATS_USER", "worker"),
            ("NATS_PASSWORD", "pw"),
            ("PROGRESS_SUBJECT_PREFIX", "tenant-a.progress."),
            ("DISTRIBUTION_FAILURE_POLICY", "continue"),
            ("INGEST_MAX_ROWS", "500"),
            ("PROGRESS_ENABLED", "false"),
        ])
        .unwrap();
        assert_eq!(config.nats_user.as_deref(), Some("worker"));
        assert_eq!(config.progress_subject_prefix, "tenant-a.progress");
        assert_eq!(config.distribution_failure_policy, FailurePolicy::Continue);
        assert_eq!(config.ingest_max_rows, 500);
        assert!(!config.progress_enabled);
    }

    #[test]
    fn test_config_rejects_bad_policy_and_row_limit() {
        let base = [("DATABASE_URL", "postgres://test"), ("JWT_SECRET", SECRET)];

        let mut vars = base.to_vec();
        vars.push(("DISTRIBUTION_FAILURE_POLICY", "retry"));
        assert!(load(&vars).is_err());

        let mut vars = base.to_vec();
        vars.push(("INGEST_MAX_ROWS", "0"));
        assert!(load(&vars).is_err());
    }
}
