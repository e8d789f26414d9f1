//! Claims of an already-validated access token.
//!
//! Token parsing and signature validation happen upstream; this module only
//! exposes the decoded claims to checkers.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::AccessResult;
use crate::error::AccessError;

/// Decoded token claims.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct DecodedToken {
    claims: Map<String, Value>,
}

impl DecodedToken {
    /// Wrap a claims object.
    #[must_use]
    pub fn new(claims: Map<String, Value>) -> Self {
        Self { claims }
    }

    /// Build a token from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Precondition`] if `value` is not a JSON object.
    pub fn from_value(value: Value) -> AccessResult<Self> {
        match value {
            Value::Object(claims) => Ok(Self { claims }),
            other => Err(AccessError::precondition(format!(
                "token claims must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Raw claim lookup.
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Subject (`sub`) claim, if present and a string.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.claim("sub").and_then(Value::as_str)
    }

    /// A claim that must be present and a non-empty string.
    ///
    /// # Errors
    ///
    /// [`AccessError::MissingClaim`] if absent or `null`,
    /// [`AccessError::MalformedClaim`] if not a non-empty string.
    pub fn require_str(&self, name: &str) -> AccessResult<&str> {
        match self.claim(name) {
            None | Some(Value::Null) => Err(AccessError::missing_claim(name)),
            Some(Value::String(s)) if s.trim().is_empty() => {
                Err(AccessError::malformed_claim(name, "value is empty"))
            }
            Some(Value::String(s)) => Ok(s.as_str()),
            Some(other) => Err(AccessError::malformed_claim(
                name,
                format!("expected a string, got {}", json_type_name(other)),
            )),
        }
    }

    /// Space-separated scope claim; an array of strings is also accepted.
    ///
    /// # Errors
    ///
    /// Same as [`require_str`](Self::require_str), plus a malformed-claim
    /// error for arrays containing non-strings.
    pub fn require_scopes(&self, name: &str) -> AccessResult<String> {
        match self.claim(name) {
            Some(Value::Array(items)) if items.is_empty() => {
                Err(AccessError::malformed_claim(name, "value is empty"))
            }
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().ok_or_else(|| {
                        AccessError::malformed_claim(name, "scope array must contain strings")
                    })
                })
                .collect::<AccessResult<Vec<_>>>()
                .map(|parts| parts.join(" ")),
            _ => self.require_str(name).map(str::to_string),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
