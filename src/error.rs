//! Error types for nextjs-infra.
//!
//! Everything that can go wrong locally is a synthesis-time fault: invalid
//! construct properties, broken references, address-space exhaustion or an
//! unreadable asset directory. Deployment faults are the provider's business
//! and never show up here.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for nextjs-infra operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for nextjs-infra.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Construct Errors
    // ========================================================================
    /// A construct was declared with properties the provider would reject.
    #[error("Validation failed for '{construct}': {message}")]
    Validation {
        /// Construct path
        construct: String,
        /// Error message
        message: String,
    },

    /// Two constructs in one stack resolve to the same logical ID.
    #[error("Duplicate construct '{path}' in stack '{stack}' (logical ID '{logical_id}')")]
    DuplicateConstruct {
        /// Stack id
        stack: String,
        /// Construct path
        path: String,
        /// Conflicting logical ID
        logical_id: String,
    },

    /// Two stacks share a construct id or a stack name.
    #[error("Stack '{0}' is already defined in this app")]
    DuplicateStack(String),

    /// Invalid stack name.
    #[error("Invalid stack name '{name}': {message}")]
    InvalidStackName {
        /// Offending name
        name: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Synthesis Errors
    // ========================================================================
    /// A reference points at a stack or resource that does not exist.
    #[error("Unresolved reference to '{logical_id}' in stack '{stack}'")]
    UnresolvedReference {
        /// Target stack id
        stack: String,
        /// Target logical ID
        logical_id: String,
    },

    /// Resources or stacks depend on each other in a loop.
    #[error("Dependency cycle: {0}")]
    DependencyCycle(String),

    /// Not enough address space left for a subnet.
    #[error("Cannot allocate a /{prefix} subnet inside {cidr}: address space exhausted")]
    CidrExhausted {
        /// Enclosing network
        cidr: String,
        /// Requested prefix length
        prefix: u8,
    },

    /// The docker build context cannot be fingerprinted.
    #[error("Asset source '{path}': {message}")]
    AssetSource {
        /// Asset directory
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// One or more plan checks failed.
    #[error("{failed} of {total} plan checks failed")]
    PlanCheckFailed {
        /// Number of failed checks
        failed: usize,
        /// Number of checks run
        total: usize,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // IO / Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Generic error with source.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new validation error.
    pub fn validation(construct: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            construct: construct.into(),
            message: message.into(),
        }
    }

    /// Creates a new asset source error.
    pub fn asset_source(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::AssetSource {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new invalid config error.
    pub fn invalid_config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation { .. }
            | Error::DuplicateConstruct { .. }
            | Error::DuplicateStack(_)
            | Error::InvalidStackName { .. }
            | Error::CidrExhausted { .. } => 2,
            Error::UnresolvedReference { .. } | Error::DependencyCycle(_) => 3,
            Error::Config(_) | Error::InvalidConfig { .. } => 4,
            Error::AssetSource { .. } => 5,
            Error::PlanCheckFailed { .. } => 6,
            _ => 1,
        }
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Adds context with a closure that is only evaluated on error.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Other {
            message: message.into(),
            source: Some(Box::new(e)),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::Other {
            message: f().into(),
            source: Some(Box::new(e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::validation("Vpc", "bad").exit_code(), 2);
        assert_eq!(Error::DependencyCycle("a -> b -> a".into()).exit_code(), 3);
        assert_eq!(Error::Config("missing".into()).exit_code(), 4);
        assert_eq!(
            Error::PlanCheckFailed { failed: 1, total: 5 }.exit_code(),
            6
        );
    }

    #[test]
    fn test_context_wraps_source() {
        let io: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let err = io.context("reading template").unwrap_err();
        assert_eq!(err.to_string(), "reading template");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_cidr_message() {
        let err = Error::CidrExhausted {
            cidr: "10.0.0.0/24".into(),
            prefix: 20,
        };
        assert!(err.to_string().contains("/20"));
    }
}
