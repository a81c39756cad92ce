//! Environment configuration.
//!
//! The relay is configured through the environment:
//! `PG_HOST`, `PG_PORT`, `PG_DB`, `PG_USER`, `PG_PASSWORD`,
//! `REDIS_HOST`, `REDIS_PORT`, and optionally `REDIS_PASSWORD`.
//! Unset variables fall back to local defaults.

use velo_error::{ConfigError, Error, Result};

/// Connection endpoints and pool sizing for both backends.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// PostgreSQL host (`PG_HOST`, default `localhost`)
    pub pg_host:         String,
    /// PostgreSQL port (`PG_PORT`, default 5432)
    pub pg_port:         u16,
    /// Database name (`PG_DB`, default `postgres`)
    pub pg_db:           String,
    /// Role (`PG_USER`, default `postgres`)
    pub pg_user:         String,
    /// Password (`PG_PASSWORD`, optional)
    pub pg_password:     Option<String>,
    /// Redis host (`REDIS_HOST`, default `localhost`)
    pub redis_host:      String,
    /// Redis port (`REDIS_PORT`, default 6379)
    pub redis_port:      u16,
    /// Redis AUTH password (`REDIS_PASSWORD`, optional)
    pub redis_password:  Option<String>,
    /// PostgreSQL pool size
    pub pg_pool_size:    usize,
    /// Redis pool size
    pub redis_pool_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            pg_host:         "localhost".to_string(),
            pg_port:         5432,
            pg_db:           "postgres".to_string(),
            pg_user:         "postgres".to_string(),
            pg_password:     None,
            redis_host:      "localhost".to_string(),
            redis_port:      6379,
            redis_password:  None,
            pg_pool_size:    4,
            redis_pool_size: 4,
        }
    }
}

impl RelayConfig {
    /// Load from the environment, falling back to [`RelayConfig::default`]
    /// for unset variables.
    ///
    /// # Errors
    ///
    /// Fails on set-but-unparsable port values.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            pg_host:         env_or("PG_HOST", defaults.pg_host),
            pg_port:         env_port("PG_PORT", defaults.pg_port)?,
            pg_db:           env_or("PG_DB", defaults.pg_db),
            pg_user:         env_or("PG_USER", defaults.pg_user),
            pg_password:     std::env::var("PG_PASSWORD").ok(),
            redis_host:      env_or("REDIS_HOST", defaults.redis_host),
            redis_port:      env_port("REDIS_PORT", defaults.redis_port)?,
            redis_password:  std::env::var("REDIS_PASSWORD").ok(),
            pg_pool_size:    defaults.pg_pool_size,
            redis_pool_size: defaults.redis_pool_size,
        })
    }

    /// The KV conninfo string for the PostgreSQL side.
    #[must_use]
    pub fn pg_conninfo(&self) -> String {
        let mut out = format!(
            "host={} port={} dbname={} user={}",
            self.pg_host, self.pg_port, self.pg_db, self.pg_user
        );
        if let Some(password) = &self.pg_password {
            out.push_str(" password=");
            out.push_str(password);
        }
        out
    }
}

fn env_or(var: &str, default: String) -> String {
    std::env::var(var).unwrap_or(default)
}

fn env_port(var: &str, default: u16) -> Result<u16> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::Config(ConfigError::invalid(var, format!("{raw:?}")))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_environment() {
        temp_env::with_vars_unset(
            ["PG_HOST", "PG_PORT", "PG_DB", "PG_USER", "PG_PASSWORD", "REDIS_HOST", "REDIS_PORT"],
            || {
                let cfg = RelayConfig::from_env().expect("defaults");
                assert_eq!(cfg.pg_host, "localhost");
                assert_eq!(cfg.pg_port, 5432);
                assert_eq!(cfg.redis_port, 6379);
                assert!(cfg.pg_password.is_none());
            },
        );
    }

    #[test]
    fn environment_overrides() {
        temp_env::with_vars(
            [
                ("PG_HOST", Some("db.internal")),
                ("PG_PORT", Some("5433")),
                ("PG_DB", Some("app")),
                ("PG_USER", Some("svc")),
                ("PG_PASSWORD", Some("s3c")),
                ("REDIS_HOST", Some("cache.internal")),
                ("REDIS_PORT", Some("6380")),
            ],
            || {
                let cfg = RelayConfig::from_env().expect("env");
                assert_eq!(cfg.pg_host, "db.internal");
                assert_eq!(cfg.pg_port, 5433);
                assert_eq!(cfg.redis_host, "cache.internal");
                assert_eq!(cfg.redis_port, 6380);
                assert_eq!(
                    cfg.pg_conninfo(),
                    "host=db.internal port=5433 dbname=app user=svc password=s3c"
                );
            },
        );
    }

    #[test]
    fn malformed_port_is_rejected() {
        temp_env::with_var("PG_PORT", Some("not-a-port"), || {
            let err = RelayConfig::from_env().expect_err("reject");
            assert_eq!(err.error_code(), "invalid_config");
        });
    }

    #[test]
    fn conninfo_omits_unset_password() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.pg_conninfo(), "host=localhost port=5432 dbname=postgres user=postgres");
    }
}
