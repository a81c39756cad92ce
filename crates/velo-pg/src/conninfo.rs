//! Key/value connection string parsing.
//!
//! Supports the `host=localhost port=5432 dbname=app user=app password=s`
//! form. Unknown keys are ignored so conninfo strings written for richer
//! clients keep working.

use velo_error::{ConfigError, Error, Result};

/// Parsed PostgreSQL connection parameters.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// Host name or address
    pub host:     String,
    /// TCP port
    pub port:     u16,
    /// Database name
    pub dbname:   String,
    /// Role to authenticate as
    pub user:     String,
    /// Password, if the server requires one
    pub password: Option<String>,
}

impl PgConfig {
    /// Parse a KV conninfo string.
    ///
    /// `user` is required; `dbname` defaults to the user name, `host` to
    /// `localhost`, `port` to 5432.
    ///
    /// # Errors
    ///
    /// Fails on malformed pairs, an unparsable port, or a missing user.
    pub fn parse(conninfo: &str) -> Result<Self> {
        let mut host = None;
        let mut port = None;
        let mut dbname = None;
        let mut user = None;
        let mut password = None;

        for pair in conninfo.split_whitespace() {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(Error::Config(ConfigError::Conninfo(format!(
                    "expected key=value, got {pair:?}"
                ))));
            };
            match key {
                "host" => host = Some(value.to_string()),
                "port" => {
                    let parsed = value.parse::<u16>().map_err(|_| {
                        Error::Config(ConfigError::invalid("port", format!("{value:?}")))
                    })?;
                    port = Some(parsed);
                }
                "dbname" => dbname = Some(value.to_string()),
                "user" => user = Some(value.to_string()),
                "password" => password = Some(value.to_string()),
                _ => {} // tolerated for conninfo compatibility
            }
        }

        let user = user.ok_or_else(|| {
            Error::Config(ConfigError::invalid("user", "missing from conninfo"))
        })?;
        Ok(Self {
            host: host.unwrap_or_else(|| "localhost".to_string()),
            port: port.unwrap_or(5432),
            dbname: dbname.clone().unwrap_or_else(|| user.clone()),
            user,
            password,
        })
    }

    /// Render back to the KV form, omitting the password when unset.
    #[must_use]
    pub fn conninfo(&self) -> String {
        let mut out = format!(
            "host={} port={} dbname={} user={}",
            self.host, self.port, self.dbname, self.user
        );
        if let Some(password) = &self.password {
            out.push_str(" password=");
            out.push_str(password);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_conninfo() {
        let cfg = PgConfig::parse("host=db.internal port=5433 dbname=app user=svc password=s3c")
            .expect("parse");
        assert_eq!(cfg.host, "db.internal");
        assert_eq!(cfg.port, 5433);
        assert_eq!(cfg.dbname, "app");
        assert_eq!(cfg.user, "svc");
        assert_eq!(cfg.password.as_deref(), Some("s3c"));
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg = PgConfig::parse("user=svc").expect("parse");
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.port, 5432);
        assert_eq!(cfg.dbname, "svc");
        assert!(cfg.password.is_none());
    }

    #[test]
    fn user_is_required() {
        assert!(PgConfig::parse("host=localhost").is_err());
    }

    #[test]
    fn malformed_pairs_are_rejected() {
        assert!(PgConfig::parse("user=svc garbage").is_err());
        assert!(PgConfig::parse("port=notaport user=svc").is_err());
    }

    #[test]
    fn conninfo_roundtrip() {
        let original = "host=h port=5432 dbname=d user=u password=p";
        let cfg = PgConfig::parse(original).expect("parse");
        assert_eq!(cfg.conninfo(), original);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let cfg = PgConfig::parse("user=svc sslmode=disable connect_timeout=3").expect("parse");
        assert_eq!(cfg.user, "svc");
    }
}
