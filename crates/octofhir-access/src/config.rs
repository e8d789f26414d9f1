//! Access-control configuration.
//!
//! Read from the `[access]` table of the gateway configuration file:
//!
//! ```toml
//! [access]
//! checker = "patient"
//! evaluation_timeout = "5s"
//! fhir_version = "R4"
//!
//! [access.claims]
//! patient = "patient_id"
//! scope = "scope"
//!
//! [access.backend]
//! base_url = "http://localhost:8080/fhir"
//! timeout = "10s"
//! ```
//!
//! The checker name can be overridden with `OCTOFHIR_ACCESS_CHECKER`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::AccessResult;
use crate::checkers::{allow_all, patient};
use crate::error::AccessError;
use crate::fhir_context::FhirVersion;

/// Environment variable overriding [`AccessConfig::checker`].
pub const CHECKER_ENV: &str = "OCTOFHIR_ACCESS_CHECKER";

/// Top-level access configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Name of the registered checker to use.
    pub checker: String,

    /// Upper bound for a single access evaluation, including backend lookups.
    #[serde(with = "humantime_serde")]
    pub evaluation_timeout: Duration,

    /// FHIR version of the backend.
    pub fhir_version: FhirVersion,

    /// Token claim names.
    pub claims: ClaimsConfig,

    /// Backend FHIR server.
    pub backend: BackendConfig,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            checker: allow_all::NAME.to_string(),
            evaluation_timeout: Duration::from_secs(5),
            fhir_version: FhirVersion::default(),
            claims: ClaimsConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

/// Names of the token claims used by claims-based checkers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimsConfig {
    /// Claim holding the patient id.
    pub patient: String,
    /// Claim holding the SMART scopes.
    pub scope: String,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            patient: patient::PATIENT_CLAIM.to_string(),
            scope: patient::SCOPES_CLAIM.to_string(),
        }
    }
}

/// Backend FHIR server used for lookups during evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the FHIR API (e.g. `http://localhost:8080/fhir`).
    pub base_url: Option<Url>,

    /// Per-request timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    access: AccessConfig,
}

impl AccessConfig {
    /// Parse the `[access]` table of a TOML document.
    ///
    /// A document without an `[access]` table yields the defaults. Other
    /// tables are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Configuration`] if the TOML is invalid.
    pub fn from_toml_str(content: &str) -> AccessResult<Self> {
        let file: ConfigFile = toml::from_str(content)
            .map_err(|e| AccessError::configuration(format!("invalid access config: {e}")))?;
        Ok(file.access)
    }

    /// Load from a file, apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Configuration`] if the file cannot be read or
    /// parsed, or if the result is invalid.
    pub fn load(path: impl AsRef<Path>) -> AccessResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AccessError::configuration(format!("failed to read {}: {e}", path.display()))
        })?;

        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        tracing::debug!(path = %path.display(), checker = %config.checker, "Loaded access config");
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(checker) = lookup(CHECKER_ENV).filter(|v| !v.trim().is_empty()) {
            tracing::debug!(checker = %checker, "Checker overridden from environment");
            self.checker = checker.trim().to_string();
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Configuration`] describing the first invalid value.
    pub fn validate(&self) -> AccessResult<()> {
        if self.checker.trim().is_empty() {
            return Err(AccessError::configuration("access.checker must not be empty"));
        }
        if self.evaluation_timeout.is_zero() {
            return Err(AccessError::configuration(
                "access.evaluation_timeout must be > 0",
            ));
        }
        if self.claims.patient.trim().is_empty() || self.claims.scope.trim().is_empty() {
            return Err(AccessError::configuration(
                "access.claims names must not be empty",
            ));
        }
        if self.backend.timeout.is_zero() {
            return Err(AccessError::configuration("access.backend.timeout must be > 0"));
        }
        if let Some(url) = &self.backend.base_url
            && !matches!(url.scheme(), "http" | "https")
        {
            return Err(AccessError::configuration(format!(
                "access.backend.base_url must be http(s), got '{}'",
                url.scheme()
            )));
        }
        Ok(())
    }
}
