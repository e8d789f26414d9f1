//! # octofhir-access
//!
//! Pluggable access-checker contract for the OctoFHIR gateway.
//!
//! The gateway sits in front of a FHIR server. For every request it asks an
//! [`AccessChecker`] for an [`AccessDecision`]; granted requests are forwarded
//! to the backend and the decision post-processes the response, denied
//! requests never reach the backend.
//!
//! ## Modules
//!
//! - [`decision`] - Access decisions and response post-processing
//! - [`checker`] - The checker and factory traits
//! - [`registry`] - Name-to-factory registry
//! - [`checkers`] - Built-in checkers (`demo`, `patient`)
//! - [`gateway`] - Enforcement and HTTP error mapping
//! - [`auth_context`] - Dependency bundle handed to factories
//! - [`patient`] - Resolving the patients a request touches
//! - [`client`] - Backend FHIR client
//! - [`config`] - `[access]` configuration
//! - [`smart`] - SMART on FHIR scopes
//!
//! ## Example
//!
//! ```ignore
//! let config = AccessConfig::load("octofhir.toml")?;
//! let registry = CheckerRegistry::builtin(&config)?;
//! let gate = AccessGate::new(&registry, &config)?;
//!
//! let checker = gate.checker_for(&auth_context)?;
//! let body = gate.enforce(checker.as_ref(), &request, || forward(&request)).await?;
//! ```

pub mod auth_context;
pub mod checker;
pub mod checkers;
pub mod client;
pub mod config;
pub mod decision;
pub mod error;
pub mod fhir_context;
pub mod gateway;
pub mod patient;
pub mod registry;
pub mod request;
pub mod smart;
pub mod token;

pub use auth_context::{AuthContext, AuthContextBuilder};
pub use checker::{AccessChecker, AccessCheckerFactory};
pub use checkers::{
    AllowAllAccessChecker, AllowAllCheckerFactory, PatientAccessChecker, PatientCheckerFactory,
};
pub use client::{FhirClient, HttpFhirClient};
pub use config::{AccessConfig, BackendConfig, ClaimsConfig};
pub use decision::{
    AccessDecision, DenyReason, FnPostProcessor, NoOpPostProcessor, ResponsePostProcessor,
};
pub use error::{AccessError, ErrorCategory};
pub use fhir_context::{CompartmentDefinition, CompartmentInclusion, FhirContext, FhirVersion};
pub use gateway::{AccessGate, GatewayError};
pub use patient::{CompartmentPatientFinder, PatientFinder};
pub use registry::{CheckerRegistry, CheckerRegistryBuilder};
pub use request::{RequestDetails, RequestDetailsBuilder};
pub use smart::{FhirOperation, SmartScopes};
pub use token::DecodedToken;

/// Type alias for access-control results.
pub type AccessResult<T> = Result<T, AccessError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use octofhir_access::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AccessResult;
    pub use crate::auth_context::AuthContext;
    pub use crate::checker::{AccessChecker, AccessCheckerFactory};
    pub use crate::config::AccessConfig;
    pub use crate::decision::{AccessDecision, DenyReason, ResponsePostProcessor};
    pub use crate::error::{AccessError, ErrorCategory};
    pub use crate::gateway::{AccessGate, GatewayError};
    pub use crate::registry::CheckerRegistry;
    pub use crate::request::RequestDetails;
}
