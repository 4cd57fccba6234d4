//! IOT-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, ThrottleError>;

/// Top-level error type for the idle-I/O throttle.
#[derive(Debug, Error)]
pub enum ThrottleError {
    #[error("[IOT-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[IOT-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[IOT-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[IOT-2001] idle wait cancelled at load {load} (ceiling {ceiling})")]
    Cancelled { ceiling: u64, load: u64 },

    #[error("[IOT-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[IOT-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[IOT-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[IOT-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl ThrottleError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "IOT-1001",
            Self::MissingConfig { .. } => "IOT-1002",
            Self::ConfigParse { .. } => "IOT-1003",
            Self::Cancelled { .. } => "IOT-2001",
            Self::Serialization { .. } => "IOT-2101",
            Self::Io { .. } => "IOT-3002",
            Self::ChannelClosed { .. } => "IOT-3003",
            Self::Runtime { .. } => "IOT-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    ///
    /// Cancellation is deliberate and never retryable: the caller asked to stop.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::ChannelClosed { .. } | Self::Runtime { .. }
        )
    }

    /// Whether this error is the cooperative cancellation outcome of an idle wait.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for ThrottleError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for ThrottleError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<ThrottleError> {
        vec![
            ThrottleError::InvalidConfig {
                details: String::new(),
            },
            ThrottleError::MissingConfig {
                path: PathBuf::new(),
            },
            ThrottleError::ConfigParse {
                context: "",
                details: String::new(),
            },
            ThrottleError::Cancelled {
                ceiling: 0,
                load: 0,
            },
            ThrottleError::Serialization {
                context: "",
                details: String::new(),
            },
            ThrottleError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            ThrottleError::ChannelClosed { component: "" },
            ThrottleError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = all_variants();
        let codes: Vec<&str> = errors.iter().map(ThrottleError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn error_codes_have_iot_prefix() {
        for err in &all_variants() {
            assert!(
                err.code().starts_with("IOT-"),
                "code {} must start with IOT-",
                err.code()
            );
        }
    }

    #[test]
    fn display_includes_code() {
        for err in &all_variants() {
            let msg = err.to_string();
            assert!(
                msg.contains(err.code()),
                "display should contain error code: {msg}"
            );
        }
    }

    #[test]
    fn cancellation_is_not_retryable() {
        let err = ThrottleError::Cancelled {
            ceiling: 10,
            load: 42,
        };
        assert!(err.is_cancelled());
        assert!(!err.is_retryable());
        let msg = err.to_string();
        assert!(msg.contains("42"), "load missing from message: {msg}");
        assert!(msg.contains("10"), "ceiling missing from message: {msg}");
    }

    #[test]
    fn retryable_errors_are_correct() {
        assert!(
            ThrottleError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            }
            .is_retryable()
        );
        assert!(ThrottleError::ChannelClosed { component: "x" }.is_retryable());
        assert!(
            ThrottleError::Runtime {
                details: String::new()
            }
            .is_retryable()
        );
        assert!(
            !ThrottleError::InvalidConfig {
                details: String::new()
            }
            .is_retryable()
        );
        assert!(
            !ThrottleError::MissingConfig {
                path: PathBuf::new()
            }
            .is_retryable()
        );
    }

    #[test]
    fn io_convenience_constructor() {
        let err = ThrottleError::io(
            "/tmp/iot.jsonl",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "IOT-3002");
        assert!(err.to_string().contains("/tmp/iot.jsonl"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: ThrottleError = json_err.into();
        assert_eq!(err.code(), "IOT-2101");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: ThrottleError = toml_err.into();
        assert_eq!(err.code(), "IOT-1003");
    }
}
