//! The `demo` checker: grants every request.
//!
//! Intended for local development and as the smallest example of the checker
//! contract. Requests without a resource type (batch/transaction bundles)
//! are granted as well; this is a policy of this checker only.

use std::sync::Arc;

use async_trait::async_trait;

use crate::AccessResult;
use crate::auth_context::AuthContext;
use crate::checker::{AccessChecker, AccessCheckerFactory};
use crate::decision::AccessDecision;
use crate::fhir_context::FhirContext;
use crate::request::RequestDetails;

/// Registry name of this checker.
pub const NAME: &str = "demo";

/// Checker that grants every request without post-processing.
#[derive(Debug, Clone)]
pub struct AllowAllAccessChecker {
    fhir_context: Arc<FhirContext>,
}

impl AllowAllAccessChecker {
    /// Create a checker for a resource-model context.
    #[must_use]
    pub fn new(fhir_context: Arc<FhirContext>) -> Self {
        Self { fhir_context }
    }

    /// Resource-model context the checker was built with.
    #[must_use]
    pub fn fhir_context(&self) -> &FhirContext {
        &self.fhir_context
    }
}

#[async_trait]
impl AccessChecker for AllowAllAccessChecker {
    async fn check_access(&self, request: &RequestDetails) -> AccessResult<AccessDecision> {
        tracing::trace!(
            checker = NAME,
            resource_type = request.resource_type().unwrap_or("-"),
            operation = %request.operation(),
            "Granting request"
        );
        Ok(AccessDecision::no_op(true))
    }
}

/// Factory for [`AllowAllAccessChecker`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllCheckerFactory;

impl AllowAllCheckerFactory {
    /// Create the factory.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl AccessCheckerFactory for AllowAllCheckerFactory {
    fn create(&self, auth: &AuthContext) -> AccessResult<Arc<dyn AccessChecker>> {
        Ok(Arc::new(AllowAllAccessChecker::new(auth.fhir_context().clone())))
    }
}
