use std::env;

/// Server configuration loaded from the environment (.env supported via dotenvy).
#[derive(Clone, Debug)]
pub struct Config {
    /// Optional Redis backend. When unset, the guard falls back to
    /// process-local in-memory stores (counters and audit sink).
    pub redis_url: Option<String>,
    /// Secret used to salt composite actor keys (login lockout scoping).
    pub server_secret: String,
    pub bind_addr: String,
    /// Audit retention applied by the periodic cleanup job, in days.
    pub audit_retention_days: u32,
    /// Entries re-hashed per integrity verification pass.
    pub integrity_batch_size: u32,
    /// Extra profanity words appended to the built-in list (comma separated).
    pub profanity_words: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let redis_url = env::var("REDIS_URL").ok().filter(|v| !v.is_empty());

        let server_secret = env::var("SERVER_SECRET").unwrap_or_else(|_| {
            eprintln!("WARNING: SERVER_SECRET not set in .env, using default (NOT SECURE for production)");
            "change-this-secret-in-production".to_string()
        });

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());

        let audit_retention_days = env::var("AUDIT_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(90);

        let integrity_batch_size = env::var("INTEGRITY_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(500);

        let profanity_words = env::var("PROFANITY_WORDS")
            .map(|v| {
                v.split(',')
                    .map(|w| w.trim().to_lowercase())
                    .filter(|w| !w.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            redis_url,
            server_secret,
            bind_addr,
            audit_retention_days,
            integrity_batch_size,
            profanity_words,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        // Only assert on fields not commonly present in CI environments
        let config = Config::from_env();
        assert!(config.audit_retention_days > 0);
        assert!(config.integrity_batch_size > 0);
    }
}
