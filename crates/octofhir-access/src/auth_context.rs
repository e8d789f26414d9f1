//! Dependency bundle handed to checker factories.

use std::fmt;
use std::sync::Arc;

use crate::AccessResult;
use crate::client::FhirClient;
use crate::error::AccessError;
use crate::fhir_context::FhirContext;
use crate::patient::{CompartmentPatientFinder, PatientFinder};
use crate::token::DecodedToken;

/// Everything a factory needs to build a checker for one caller.
///
/// Immutable once built. All collaborators are shared through `Arc`, so
/// cloning an `AuthContext` is cheap.
#[derive(Clone)]
pub struct AuthContext {
    token: Arc<DecodedToken>,
    fhir_client: Arc<dyn FhirClient>,
    fhir_context: Arc<FhirContext>,
    patient_finder: Arc<dyn PatientFinder>,
}

impl AuthContext {
    /// Start building a context.
    #[must_use]
    pub fn builder() -> AuthContextBuilder {
        AuthContextBuilder::default()
    }

    /// Claims of the caller's validated token.
    #[must_use]
    pub fn token(&self) -> &Arc<DecodedToken> {
        &self.token
    }

    /// Client for the backend FHIR server.
    #[must_use]
    pub fn fhir_client(&self) -> &Arc<dyn FhirClient> {
        &self.fhir_client
    }

    /// Resource-model context.
    #[must_use]
    pub fn fhir_context(&self) -> &Arc<FhirContext> {
        &self.fhir_context
    }

    /// Patient resolution helper.
    #[must_use]
    pub fn patient_finder(&self) -> &Arc<dyn PatientFinder> {
        &self.patient_finder
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Claims are not printed.
        f.debug_struct("AuthContext")
            .field("subject", &self.token.subject())
            .field("backend", &self.fhir_client.base_url())
            .field("fhir_version", &self.fhir_context.version())
            .finish_non_exhaustive()
    }
}

/// Builder for [`AuthContext`].
///
/// The token, FHIR client and FHIR context are required. Without an explicit
/// patient finder, a [`CompartmentPatientFinder`] over the given context and
/// client is used.
#[derive(Default)]
pub struct AuthContextBuilder {
    token: Option<Arc<DecodedToken>>,
    fhir_client: Option<Arc<dyn FhirClient>>,
    fhir_context: Option<Arc<FhirContext>>,
    patient_finder: Option<Arc<dyn PatientFinder>>,
}

impl AuthContextBuilder {
    /// Set the decoded token.
    #[must_use]
    pub fn token(mut self, token: impl Into<Arc<DecodedToken>>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the backend client.
    #[must_use]
    pub fn fhir_client(mut self, client: Arc<dyn FhirClient>) -> Self {
        self.fhir_client = Some(client);
        self
    }

    /// Set the resource-model context.
    #[must_use]
    pub fn fhir_context(mut self, context: impl Into<Arc<FhirContext>>) -> Self {
        self.fhir_context = Some(context.into());
        self
    }

    /// Set the patient finder.
    #[must_use]
    pub fn patient_finder(mut self, finder: Arc<dyn PatientFinder>) -> Self {
        self.patient_finder = Some(finder);
        self
    }

    /// Build the context.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Precondition`] if a required argument is missing.
    pub fn build(self) -> AccessResult<AuthContext> {
        let fhir_context = self
            .fhir_context
            .ok_or_else(|| AccessError::precondition("FHIR context is required"))?;
        let token = self
            .token
            .ok_or_else(|| AccessError::precondition("decoded token is required"))?;
        let fhir_client = self
            .fhir_client
            .ok_or_else(|| AccessError::precondition("FHIR client is required"))?;

        let patient_finder = self.patient_finder.unwrap_or_else(|| {
            Arc::new(CompartmentPatientFinder::new(
                fhir_context.clone(),
                fhir_client.clone(),
            ))
        });

        Ok(AuthContext {
            token,
            fhir_client,
            fhir_context,
            patient_finder,
        })
    }
}
