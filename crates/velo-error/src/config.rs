//! Configuration errors.

/// Errors raised while loading or parsing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable or conninfo field held an unusable value.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field:  String,
        reason: String,
    },

    /// A malformed key/value connection string.
    #[error("invalid conninfo: {0}")]
    Conninfo(String),
}

impl ConfigError {
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Invalid { .. } => "invalid_config",
            Self::Conninfo(_) => "invalid_conninfo",
        }
    }

    /// Convenience constructor for `Invalid`.
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field:  field.to_string(),
            reason: reason.into(),
        }
    }
}
