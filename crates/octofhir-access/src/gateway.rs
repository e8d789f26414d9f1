//! Gateway-side enforcement of access decisions.
//!
//! [`AccessGate`] selects the configured checker factory once at startup and
//! then, per request, evaluates the checker under a deadline, forwards
//! granted requests to the backend and post-processes the response.
//! Denied requests never reach the backend.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

use crate::AccessResult;
use crate::auth_context::AuthContext;
use crate::checker::{AccessChecker, AccessCheckerFactory};
use crate::config::AccessConfig;
use crate::decision::{AccessDecision, DenyReason};
use crate::error::AccessError;
use crate::registry::CheckerRegistry;
use crate::request::RequestDetails;

/// Coding system for deny reason codes in OperationOutcome responses.
pub const DENY_REASON_SYSTEM: &str = "https://octofhir.io/CodeSystem/access-deny-reason";

/// Selected checker factory plus evaluation settings.
#[derive(Clone)]
pub struct AccessGate {
    checker_name: String,
    factory: Arc<dyn AccessCheckerFactory>,
    evaluation_timeout: Duration,
}

impl AccessGate {
    /// Select the configured checker from `registry`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid or names an
    /// unregistered checker.
    pub fn new(registry: &CheckerRegistry, config: &AccessConfig) -> AccessResult<Self> {
        config.validate()?;
        let factory = registry.get(&config.checker).inspect_err(|_| {
            tracing::error!(
                checker = %config.checker,
                available = ?registry.names(),
                "Configured access checker is not registered"
            );
        })?;

        tracing::info!(
            checker = %config.checker,
            timeout_ms = u64::try_from(config.evaluation_timeout.as_millis()).unwrap_or(u64::MAX),
            "Access checker selected"
        );

        Ok(Self {
            checker_name: config.checker.clone(),
            factory,
            evaluation_timeout: config.evaluation_timeout,
        })
    }

    /// Name of the selected checker.
    #[must_use]
    pub fn checker_name(&self) -> &str {
        &self.checker_name
    }

    /// Evaluation deadline.
    #[must_use]
    pub fn evaluation_timeout(&self) -> Duration {
        self.evaluation_timeout
    }

    /// Build a checker for one caller.
    ///
    /// # Errors
    ///
    /// Propagates the factory's error.
    pub fn checker_for(&self, auth: &AuthContext) -> AccessResult<Arc<dyn AccessChecker>> {
        self.factory.create(auth)
    }

    /// Evaluate `request` under the configured deadline.
    ///
    /// # Errors
    ///
    /// Returns the checker's evaluation error, or
    /// [`AccessError::EvaluationTimeout`] if the deadline passes.
    #[tracing::instrument(
        name = "access.authorize",
        skip_all,
        fields(
            checker = %self.checker_name,
            method = %request.method(),
            path = %request.path(),
            operation = %request.operation(),
            request_id = request.request_id().unwrap_or("-"),
        )
    )]
    pub async fn authorize(
        &self,
        checker: &dyn AccessChecker,
        request: &RequestDetails,
    ) -> AccessResult<AccessDecision> {
        let result =
            match tokio::time::timeout(self.evaluation_timeout, checker.check_access(request)).await
            {
                Ok(result) => result,
                Err(_) => Err(AccessError::EvaluationTimeout {
                    millis: u64::try_from(self.evaluation_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                }),
            };

        match &result {
            Ok(decision) if decision.is_access_granted() => {
                tracing::debug!(post_process = decision.has_post_processor(), "Access granted");
            }
            Ok(decision) => {
                tracing::info!(
                    code = decision.deny_reason().map_or("-", |r| r.code.as_str()),
                    "Access denied"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, category = %e.category(), "Access evaluation failed");
            }
        }

        result
    }

    /// Authorize `request` and, if granted, run `forward` and post-process
    /// its response body.
    ///
    /// `forward` is not called unless access is granted.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Denied`] for a denied decision,
    /// [`GatewayError::Evaluation`] if the policy could not be evaluated,
    /// or the error returned by `forward`.
    pub async fn enforce<F, Fut>(
        &self,
        checker: &dyn AccessChecker,
        request: &RequestDetails,
        forward: F,
    ) -> Result<Value, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, GatewayError>>,
    {
        let decision = self.authorize(checker, request).await?;

        if !decision.is_access_granted() {
            let reason = decision
                .deny_reason()
                .cloned()
                .unwrap_or_else(|| DenyReason::new("access-denied", "Access denied"));
            return Err(GatewayError::Denied(reason));
        }

        let body = forward().await?;
        Ok(decision.post_process(body))
    }
}

impl std::fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGate")
            .field("checker_name", &self.checker_name)
            .field("evaluation_timeout", &self.evaluation_timeout)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Gateway Errors
// =============================================================================

/// Errors surfaced to gateway callers.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The policy denied the request.
    #[error("Access denied: {0}")]
    Denied(DenyReason),

    /// The policy could not be evaluated.
    #[error(transparent)]
    Evaluation(#[from] AccessError),

    /// The backend FHIR server failed.
    #[error("Backend error: {message}")]
    Backend {
        /// Description of the failure (logged, not returned to callers).
        message: String,
    },
}

impl GatewayError {
    /// Creates a new `Backend` error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Denied(_) => StatusCode::FORBIDDEN,
            Self::Evaluation(e) if e.is_claim_error() => StatusCode::UNAUTHORIZED,
            Self::Evaluation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Backend { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// OperationOutcome body. Diagnostics are generic; error details stay in
    /// the logs.
    #[must_use]
    pub fn operation_outcome(&self) -> Value {
        let (issue_code, diagnostics, reason) = match self {
            Self::Denied(reason) => ("forbidden", reason.message.as_str(), Some(reason)),
            Self::Evaluation(e) if e.is_claim_error() => (
                "security",
                "Access token does not carry the claims required by the access policy",
                None,
            ),
            Self::Evaluation(AccessError::EvaluationTimeout { .. }) => {
                ("timeout", "Access decision could not be made in time", None)
            }
            Self::Evaluation(_) => ("exception", "Access decision could not be made", None),
            Self::Backend { .. } => ("exception", "Backend FHIR server error", None),
        };

        let mut issue = json!({
            "severity": "error",
            "code": issue_code,
            "diagnostics": diagnostics
        });
        if let Some(reason) = reason {
            issue["details"] = json!({
                "coding": [{
                    "system": DENY_REASON_SYSTEM,
                    "code": reason.code
                }]
            });
        }

        json!({
            "resourceType": "OperationOutcome",
            "issue": [issue]
        })
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/fhir+json"),
        );
        if status == StatusCode::UNAUTHORIZED {
            headers.insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"octofhir\", error=\"invalid_token\""),
            );
        }

        (status, headers, Json(self.operation_outcome())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GatewayError::Denied(DenyReason::compartment_violation()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GatewayError::from(AccessError::missing_claim("patient_id")).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::from(AccessError::patient_resolution("x")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::backend("boom").status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_denied_outcome_carries_code() {
        let outcome =
            GatewayError::Denied(DenyReason::insufficient_scope("patient/Observation.r"))
                .operation_outcome();
        assert_eq!(outcome["resourceType"], "OperationOutcome");
        assert_eq!(outcome["issue"][0]["code"], "forbidden");
        assert_eq!(
            outcome["issue"][0]["details"]["coding"][0]["code"],
            "insufficient-scope"
        );
    }

    #[test]
    fn test_outcome_hides_details() {
        let outcome = GatewayError::from(AccessError::malformed_claim(
            "patient_id",
            "expected a string, got number",
        ))
        .operation_outcome();
        let text = outcome.to_string();
        assert!(!text.contains("patient_id"));
        assert!(!text.contains("number"));

        let outcome = GatewayError::backend("connection refused to 10.0.0.5").operation_outcome();
        assert!(!outcome.to_string().contains("10.0.0.5"));
    }

    #[test]
    fn test_into_response() {
        let response = GatewayError::from(AccessError::missing_claim("scope")).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/fhir+json"
        );
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[test]
    fn test_gate_rejects_unknown_checker() {
        let registry = CheckerRegistry::builtin(&AccessConfig::default()).unwrap();
        let config = AccessConfig {
            checker: "nonexistent".into(),
            ..AccessConfig::default()
        };
        let err = AccessGate::new(&registry, &config).unwrap_err();
        assert!(matches!(err, AccessError::UnknownChecker { .. }));
    }
}
