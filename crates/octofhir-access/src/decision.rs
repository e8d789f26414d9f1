//! Access decisions produced by checkers.
//!
//! An [`AccessDecision`] is an immutable value: whether the request may
//! proceed, and if so, how the backend's response body is post-processed
//! before it reaches the caller.
//!
//! ```
//! use octofhir_access::decision::AccessDecision;
//! use serde_json::json;
//!
//! let decision = AccessDecision::no_op(true);
//! assert!(decision.is_access_granted());
//!
//! let body = json!({"resourceType": "Patient", "id": "123"});
//! assert_eq!(decision.post_process(body.clone()), body);
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

// =============================================================================
// Response Post-Processing
// =============================================================================

/// Transforms a backend response body before it is returned to the caller.
///
/// Implementations must be deterministic and must not perform I/O or mutate
/// shared state; the gateway runs them on the request hot path.
pub trait ResponsePostProcessor: Send + Sync {
    /// Returns the transformed response body.
    fn process(&self, body: serde_json::Value) -> serde_json::Value;
}

/// Post-processor that returns the response unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpPostProcessor;

impl ResponsePostProcessor for NoOpPostProcessor {
    fn process(&self, body: serde_json::Value) -> serde_json::Value {
        body
    }
}

/// Adapts a closure into a [`ResponsePostProcessor`].
pub struct FnPostProcessor<F>(pub F);

impl<F> ResponsePostProcessor for FnPostProcessor<F>
where
    F: Fn(serde_json::Value) -> serde_json::Value + Send + Sync,
{
    fn process(&self, body: serde_json::Value) -> serde_json::Value {
        (self.0)(body)
    }
}

// =============================================================================
// Deny Reason
// =============================================================================

/// Reason attached to a deliberate policy denial.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DenyReason {
    /// Error code for programmatic handling.
    pub code: String,

    /// Human-readable message.
    pub message: String,

    /// Additional details about the denial. Logged, never sent to clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl DenyReason {
    /// Create a custom denial reason.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Attach details to this reason.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Token scopes do not permit the operation.
    #[must_use]
    pub fn insufficient_scope(required: &str) -> Self {
        Self::new(
            "insufficient-scope",
            format!(
                "Token scope does not include required permission: {}",
                required
            ),
        )
        .with_details(serde_json::json!({ "required_scope": required }))
    }

    /// The request touches patients other than the token's patient.
    #[must_use]
    pub fn compartment_violation() -> Self {
        Self::new(
            "compartment-violation",
            "Request is not limited to the authorized patient's compartment",
        )
    }

    /// The request does not identify which patient it concerns.
    #[must_use]
    pub fn patient_not_resolved(resource_type: &str) -> Self {
        Self::new(
            "patient-not-resolved",
            format!(
                "Request for '{}' must be restricted to the authorized patient",
                resource_type
            ),
        )
    }

    /// Write to a resource type that cannot be tied to a patient.
    #[must_use]
    pub fn write_not_permitted(resource_type: &str) -> Self {
        Self::new(
            "write-not-permitted",
            format!(
                "Writes to '{}' are not permitted for patient-scoped tokens",
                resource_type
            ),
        )
    }

    /// A batch/transaction request without a usable Bundle body.
    #[must_use]
    pub fn invalid_bundle(message: impl Into<String>) -> Self {
        Self::new("invalid-bundle", message)
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

// =============================================================================
// Access Decision
// =============================================================================

#[derive(Clone)]
enum Outcome {
    Granted(Option<Arc<dyn ResponsePostProcessor>>),
    Denied(Option<DenyReason>),
}

/// Outcome of a checker evaluating one request.
///
/// A denied decision never holds a post-processor, so it can never mutate a
/// response.
#[derive(Clone)]
pub struct AccessDecision {
    outcome: Outcome,
}

impl AccessDecision {
    /// Decision with an identity post-processor.
    ///
    /// A `false` decision carries no reason.
    #[must_use]
    pub fn no_op(granted: bool) -> Self {
        if granted {
            Self::allow()
        } else {
            Self {
                outcome: Outcome::Denied(None),
            }
        }
    }

    /// Grant access without transforming the response.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            outcome: Outcome::Granted(None),
        }
    }

    /// Grant access and transform the backend response with `processor`.
    #[must_use]
    pub fn allow_with(processor: Arc<dyn ResponsePostProcessor>) -> Self {
        Self {
            outcome: Outcome::Granted(Some(processor)),
        }
    }

    /// Deny access for a policy reason.
    #[must_use]
    pub fn deny(reason: DenyReason) -> Self {
        Self {
            outcome: Outcome::Denied(Some(reason)),
        }
    }

    /// Returns `true` if the request may proceed.
    #[must_use]
    pub fn is_access_granted(&self) -> bool {
        matches!(self.outcome, Outcome::Granted(_))
    }

    /// The denial reason, if access was denied with one.
    #[must_use]
    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match &self.outcome {
            Outcome::Denied(reason) => reason.as_ref(),
            Outcome::Granted(_) => None,
        }
    }

    /// Returns `true` if `post_process` may change the response.
    #[must_use]
    pub fn has_post_processor(&self) -> bool {
        matches!(self.outcome, Outcome::Granted(Some(_)))
    }

    /// Apply this decision's post-processing to a backend response body.
    ///
    /// Identity for no-op and denied decisions.
    #[must_use]
    pub fn post_process(&self, body: serde_json::Value) -> serde_json::Value {
        match &self.outcome {
            Outcome::Granted(Some(processor)) => processor.process(body),
            _ => body,
        }
    }
}

impl fmt::Debug for AccessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Granted(processor) => f
                .debug_struct("Granted")
                .field("post_processor", &processor.is_some())
                .finish(),
            Outcome::Denied(reason) => f.debug_tuple("Denied").field(reason).finish(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
