//! The `patient` checker: patient-scoped access from token claims.
//!
//! Uses the `patient_id` and `scope` claims of the access token. Scopes are
//! SMART on FHIR resource scopes. A request is granted when:
//!
//! 1. the scopes permit the operation on the resource type, and
//! 2. for Patient-compartment resource types, every patient the request
//!    touches is the token's patient, or
//! 3. for other resource types, the operation only reads.
//!
//! Batch and transaction bundles are checked entry by entry; the first denied
//! entry denies the whole bundle.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::AccessResult;
use crate::auth_context::AuthContext;
use crate::checker::{AccessChecker, AccessCheckerFactory};
use crate::config::ClaimsConfig;
use crate::decision::{AccessDecision, DenyReason};
use crate::fhir_context::FhirContext;
use crate::patient::PatientFinder;
use crate::request::RequestDetails;
use crate::smart::{Permissions, SmartScopes};
use crate::token::DecodedToken;

/// Registry name of this checker.
pub const NAME: &str = "patient";

/// Default claim holding the patient id.
pub const PATIENT_CLAIM: &str = "patient_id";

/// Default claim holding the SMART scopes.
pub const SCOPES_CLAIM: &str = "scope";

/// Patient-scoped checker.
pub struct PatientAccessChecker {
    token: Arc<DecodedToken>,
    fhir_context: Arc<FhirContext>,
    patient_finder: Arc<dyn PatientFinder>,
    patient_claim: String,
    scopes_claim: String,
}

/// Claims resolved once per request.
struct Grant<'a> {
    patient_id: &'a str,
    scopes: SmartScopes,
}

impl PatientAccessChecker {
    fn grant(&self) -> AccessResult<Grant<'_>> {
        let patient_id = self.token.require_str(&self.patient_claim)?;
        let scopes = SmartScopes::parse(&self.token.require_scopes(&self.scopes_claim)?);
        Ok(Grant { patient_id, scopes })
    }

    async fn check_single(
        &self,
        grant: &Grant<'_>,
        request: &RequestDetails,
    ) -> AccessResult<AccessDecision> {
        let operation = request.operation();
        if operation.always_allowed() {
            return Ok(AccessDecision::allow());
        }

        let required = operation.required_permissions(request.method());

        // System-level interactions cannot be tied to a single patient.
        let Some(resource_type) = request.resource_type() else {
            return Ok(AccessDecision::deny(DenyReason::insufficient_scope(
                &required_scope("system", "*", required),
            )));
        };

        if !grant
            .scopes
            .permits(resource_type, required, Some(grant.patient_id))
        {
            return Ok(AccessDecision::deny(DenyReason::insufficient_scope(
                &required_scope("patient", resource_type, required),
            )));
        }

        if !self.fhir_context.is_in_patient_compartment(resource_type) {
            return Ok(if required.is_read_only() {
                AccessDecision::allow()
            } else {
                AccessDecision::deny(DenyReason::write_not_permitted(resource_type))
            });
        }

        let patients = self.patient_finder.find_patients(request).await?;
        if patients.is_empty() {
            return Ok(AccessDecision::deny(DenyReason::patient_not_resolved(
                resource_type,
            )));
        }
        if patients.iter().any(|p| p != grant.patient_id) {
            tracing::debug!(
                checker = NAME,
                resource_type,
                patients = patients.len(),
                "Request touches other patients"
            );
            return Ok(AccessDecision::deny(DenyReason::compartment_violation()));
        }

        Ok(AccessDecision::allow())
    }

    async fn check_bundle(
        &self,
        grant: &Grant<'_>,
        request: &RequestDetails,
    ) -> AccessResult<AccessDecision> {
        let entries = match bundle_entries(request) {
            Ok(entries) => entries,
            Err(reason) => return Ok(AccessDecision::deny(reason)),
        };

        for (index, entry) in entries.iter().enumerate() {
            let entry_request = match entry_request(entry, request.request_id()) {
                Ok(r) => r,
                Err(reason) => return Ok(AccessDecision::deny(reason)),
            };

            let decision = self.check_single(grant, &entry_request).await?;
            if !decision.is_access_granted() {
                tracing::debug!(
                    checker = NAME,
                    entry = index,
                    path = %entry_request.path(),
                    "Bundle entry denied"
                );
                return Ok(decision);
            }
        }

        Ok(AccessDecision::allow())
    }
}

#[async_trait]
impl AccessChecker for PatientAccessChecker {
    async fn check_access(&self, request: &RequestDetails) -> AccessResult<AccessDecision> {
        let grant = self.grant()?;

        if request.operation().is_bundle() {
            self.check_bundle(&grant, request).await
        } else {
            self.check_single(&grant, request).await
        }
    }
}

fn required_scope(context: &str, resource_type: &str, required: Permissions) -> String {
    if required.is_empty() {
        format!("{context}/{resource_type}.*")
    } else {
        format!("{context}/{resource_type}.{required}")
    }
}

fn bundle_entries(request: &RequestDetails) -> Result<&[Value], DenyReason> {
    let Some(body) = request.body() else {
        return Err(DenyReason::invalid_bundle("Request body is missing"));
    };
    if body.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
        return Err(DenyReason::invalid_bundle("Request body is not a Bundle"));
    }
    match body.get("entry") {
        None => Ok(&[]),
        Some(Value::Array(entries)) => Ok(entries.as_slice()),
        Some(_) => Err(DenyReason::invalid_bundle("Bundle.entry must be an array")),
    }
}

fn entry_request(entry: &Value, request_id: Option<&str>) -> Result<RequestDetails, DenyReason> {
    let request = entry.get("request");
    let method = request
        .and_then(|r| r.get("method"))
        .and_then(Value::as_str)
        .ok_or_else(|| DenyReason::invalid_bundle("Bundle entry is missing request.method"))?;
    let url = request
        .and_then(|r| r.get("url"))
        .and_then(Value::as_str)
        .ok_or_else(|| DenyReason::invalid_bundle("Bundle entry is missing request.url"))?;

    let mut builder = RequestDetails::builder(method, url);
    if let Some(resource) = entry.get("resource") {
        builder = builder.body(resource.clone());
    }
    if let Some(id) = request_id {
        builder = builder.request_id(id);
    }
    let details = builder.build();

    if details.operation().is_bundle() {
        return Err(DenyReason::invalid_bundle("Nested bundles are not supported"));
    }
    Ok(details)
}

/// Factory for [`PatientAccessChecker`].
#[derive(Debug, Clone)]
pub struct PatientCheckerFactory {
    patient_claim: String,
    scopes_claim: String,
}

impl PatientCheckerFactory {
    /// Factory using the default claim names.
    #[must_use]
    pub fn new() -> Self {
        Self {
            patient_claim: PATIENT_CLAIM.to_string(),
            scopes_claim: SCOPES_CLAIM.to_string(),
        }
    }

    /// Factory using the configured claim names.
    #[must_use]
    pub fn from_config(claims: &ClaimsConfig) -> Self {
        Self {
            patient_claim: claims.patient.clone(),
            scopes_claim: claims.scope.clone(),
        }
    }
}

impl Default for PatientCheckerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessCheckerFactory for PatientCheckerFactory {
    fn create(&self, auth: &AuthContext) -> AccessResult<Arc<dyn AccessChecker>> {
        Ok(Arc::new(PatientAccessChecker {
            token: auth.token().clone(),
            fhir_context: auth.fhir_context().clone(),
            patient_finder: auth.patient_finder().clone(),
            patient_claim: self.patient_claim.clone(),
            scopes_claim: self.scopes_claim.clone(),
        }))
    }
}
