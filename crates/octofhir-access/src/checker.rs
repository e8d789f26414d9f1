//! The access-checker plugin contract.

use std::sync::Arc;

use async_trait::async_trait;

use crate::AccessResult;
use crate::auth_context::AuthContext;
use crate::decision::AccessDecision;
use crate::request::RequestDetails;

/// Evaluates access for individual requests.
///
/// A checker is created per caller by an [`AccessCheckerFactory`] and may be
/// shared across tasks; `check_access` must be safe to call concurrently and
/// repeatedly. It must also accept requests without a resource type (e.g.
/// batch/transaction bundles) and return a well-defined decision for them.
///
/// A deliberate "no" is `Ok` with a denied [`AccessDecision`]. `Err` means the
/// policy could not be evaluated (e.g. a required claim is missing).
#[async_trait]
pub trait AccessChecker: Send + Sync {
    /// Decide whether `request` may proceed.
    async fn check_access(&self, request: &RequestDetails) -> AccessResult<AccessDecision>;
}

/// Builds checkers from an [`AuthContext`].
///
/// `create` only stores or wires up the supplied collaborators; it must not
/// perform network I/O.
pub trait AccessCheckerFactory: Send + Sync {
    /// Build a checker bound to `auth`.
    fn create(&self, auth: &AuthContext) -> AccessResult<Arc<dyn AccessChecker>>;
}

impl<F> AccessCheckerFactory for F
where
    F: Fn(&AuthContext) -> AccessResult<Arc<dyn AccessChecker>> + Send + Sync,
{
    fn create(&self, auth: &AuthContext) -> AccessResult<Arc<dyn AccessChecker>> {
        self(auth)
    }
}
