//! Error types shared across Relog crates

/// Application-level error kinds that are not owned by a single component
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RelogError {
    #[error("invalid address '{0}': expected host:port")]
    InvalidAddress(String),

    #[error("invalid port in address '{0}'")]
    InvalidPort(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelogError::InvalidAddress("nohost".to_string());
        assert_eq!(
            err.to_string(),
            "invalid address 'nohost': expected host:port"
        );

        let err = RelogError::ConfigError("missing data dir".to_string());
        assert_eq!(err.to_string(), "configuration error: missing data dir");
    }
}
