// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for Keel cluster objects
#[derive(Error, Debug, Diagnostic)]
pub enum KeelError {
    /// Object is missing required fields or carries malformed values
    #[error("Invalid {kind}: {reason}")]
    #[diagnostic(
        code(keel::invalid_object),
        help("{suggestion}")
    )]
    InvalidObject {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Resource quantity could not be parsed
    #[error("Invalid quantity for {resource}: {value}")]
    #[diagnostic(
        code(keel::invalid_quantity),
        help("Use Kubernetes quantity notation, e.g. '500m' or '2' for cpu and '128Mi' or '1Gi' for memory")
    )]
    InvalidQuantity {
        #[allow(unused)]
        resource: String,
        #[allow(unused)]
        value: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(keel::serialization_error),
        help("Ensure the object format is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for Keel core operations
pub type Result<T> = std::result::Result<T, KeelError>;

impl KeelError {
    /// Create an InvalidObject error
    pub fn invalid_object(
        kind: impl Into<String>,
        reason: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::InvalidObject {
            kind: kind.into(),
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an InvalidQuantity error
    pub fn invalid_quantity(resource: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidQuantity {
            resource: resource.into(),
            value: value.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }
}
