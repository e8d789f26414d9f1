//! Access-checker error types.
//!
//! Errors fall into three categories:
//!
//! - **Configuration**: an unknown or duplicate checker name, or an invalid
//!   `[access]` configuration. Fatal at startup.
//! - **Precondition**: a required construction argument is missing. This is a
//!   programming error and must not be swallowed.
//! - **Evaluation**: the policy could not be evaluated for one request (a
//!   required claim is missing or malformed, patient resolution failed, the
//!   backend lookup failed or timed out). This is distinct from a deliberate
//!   "deny" decision, which is a normal [`AccessDecision`](crate::AccessDecision).

use std::fmt;

/// Errors produced by checker registration, construction and evaluation.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// No factory is registered under the requested checker name.
    #[error("Unknown access checker: '{name}'")]
    UnknownChecker {
        /// The requested name.
        name: String,
    },

    /// A factory is already registered under this name.
    #[error("Access checker '{name}' is already registered")]
    DuplicateChecker {
        /// The duplicated name.
        name: String,
    },

    /// The access configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// A required construction argument was not supplied.
    #[error("Precondition violated: {message}")]
    Precondition {
        /// Description of the violated precondition.
        message: String,
    },

    /// A claim required by the policy is absent from the token.
    #[error("Missing required claim: '{claim}'")]
    MissingClaim {
        /// Claim name.
        claim: String,
    },

    /// A claim required by the policy has an unusable value.
    #[error("Malformed claim '{claim}': {message}")]
    MalformedClaim {
        /// Claim name.
        claim: String,
        /// Why the value could not be used.
        message: String,
    },

    /// The patients a request concerns could not be resolved.
    #[error("Patient resolution failed: {message}")]
    PatientResolution {
        /// Description of the failure.
        message: String,
    },

    /// The backend FHIR server returned an error or could not be reached.
    #[error("Backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },

    /// Evaluation did not finish within the configured deadline.
    #[error("Access evaluation timed out after {millis}ms")]
    EvaluationTimeout {
        /// The deadline in milliseconds.
        millis: u64,
    },
}

impl AccessError {
    /// Creates a new `UnknownChecker` error.
    #[must_use]
    pub fn unknown_checker(name: impl Into<String>) -> Self {
        Self::UnknownChecker { name: name.into() }
    }

    /// Creates a new `DuplicateChecker` error.
    #[must_use]
    pub fn duplicate_checker(name: impl Into<String>) -> Self {
        Self::DuplicateChecker { name: name.into() }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Precondition` error.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Creates a new `MissingClaim` error.
    #[must_use]
    pub fn missing_claim(claim: impl Into<String>) -> Self {
        Self::MissingClaim {
            claim: claim.into(),
        }
    }

    /// Creates a new `MalformedClaim` error.
    #[must_use]
    pub fn malformed_claim(claim: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedClaim {
            claim: claim.into(),
            message: message.into(),
        }
    }

    /// Creates a new `PatientResolution` error.
    #[must_use]
    pub fn patient_resolution(message: impl Into<String>) -> Self {
        Self::PatientResolution {
            message: message.into(),
        }
    }

    /// Creates a new `Backend` error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Returns the error category for logging and response mapping.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownChecker { .. }
            | Self::DuplicateChecker { .. }
            | Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Precondition { .. } => ErrorCategory::Precondition,
            Self::MissingClaim { .. }
            | Self::MalformedClaim { .. }
            | Self::PatientResolution { .. }
            | Self::Backend { .. }
            | Self::EvaluationTimeout { .. } => ErrorCategory::Evaluation,
        }
    }

    /// Returns `true` if this error means a policy could not be evaluated
    /// for a single request.
    #[must_use]
    pub fn is_evaluation_error(&self) -> bool {
        self.category() == ErrorCategory::Evaluation
    }

    /// Returns `true` if this error is caused by the token's claims.
    #[must_use]
    pub fn is_claim_error(&self) -> bool {
        matches!(self, Self::MissingClaim { .. } | Self::MalformedClaim { .. })
    }

    /// Returns `true` if the process should not keep serving after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Configuration | ErrorCategory::Precondition
        )
    }
}

/// Categories of access errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Checker selection or configuration failed.
    Configuration,
    /// A construction precondition was violated.
    Precondition,
    /// A policy could not be evaluated for a request.
    Evaluation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Precondition => write!(f, "precondition"),
            Self::Evaluation => write!(f, "evaluation"),
        }
    }
}
