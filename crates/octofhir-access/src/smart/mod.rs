//! SMART on FHIR support used by claims-based checkers.

pub mod operation;
pub mod scopes;

pub use operation::{FhirOperation, Permission};
pub use scopes::{
    Permissions, ResourceType, ScopeContext, ScopeError, SmartScope, SmartScopes,
};
