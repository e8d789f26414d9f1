//! SMART on FHIR scope parsing.
//!
//! Resource scopes take the form `context/Type.permissions`, where
//! permissions are SMART v2 letters (`cruds`, in that order) or a SMART v1
//! suffix (`read`, `write`, `*`). Identity, launch and refresh scopes grant
//! no resource access and are skipped along with anything unrecognised.
//!
//! ```
//! use octofhir_access::smart::{FhirOperation, SmartScopes};
//!
//! let scopes = SmartScopes::parse("launch/patient openid patient/Observation.rs");
//! let search = FhirOperation::Search.required_permissions("GET");
//! let create = FhirOperation::Create.required_permissions("POST");
//! assert!(scopes.permits("Observation", search, Some("123")));
//! assert!(!scopes.permits("Observation", create, Some("123")));
//! ```

use std::fmt;
use std::str::FromStr;

use super::operation::Permission;

/// Why a scope string is not a resource scope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    /// Not shaped like `context/Type.permissions`.
    #[error("Malformed resource scope '{0}'")]
    Malformed(String),

    /// Context other than `patient`, `user` or `system`.
    #[error("Unknown scope context '{0}'")]
    UnknownContext(String),

    /// A letter outside `cruds`.
    #[error("Unknown permission letter '{0}'")]
    UnknownPermission(char),

    /// Letters repeated or out of `cruds` order.
    #[error("Permission letters '{0}' are not in cruds order")]
    PermissionOrder(String),
}

/// Whose data a scope covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeContext {
    /// `patient/`: data of the patient in context.
    Patient,
    /// `user/`: data the signed-in user may see.
    User,
    /// `system/`: backend services, no user present.
    System,
}

impl FromStr for ScopeContext {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient" => Ok(Self::Patient),
            "user" => Ok(Self::User),
            "system" => Ok(Self::System),
            other => Err(ScopeError::UnknownContext(other.to_string())),
        }
    }
}

impl fmt::Display for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Patient => "patient",
            Self::User => "user",
            Self::System => "system",
        })
    }
}

/// Resource type part of a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// A named resource type.
    Specific(String),
    /// `*`
    Wildcard,
}

impl ResourceType {
    fn covers(&self, resource_type: &str) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Specific(name) => name == resource_type,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Specific(name) => f.write_str(name),
            Self::Wildcard => f.write_str("*"),
        }
    }
}

/// Set of granted [`Permission`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions(u8);

impl Permissions {
    /// Every permission (`cruds`).
    #[must_use]
    pub fn all() -> Self {
        Permission::ALL.into_iter().collect()
    }

    /// Whether `permission` is granted.
    #[must_use]
    pub fn contains(self, permission: Permission) -> bool {
        self.0 & permission.bit() != 0
    }

    /// Whether every permission in `other` is granted.
    #[must_use]
    pub fn contains_all(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether nothing is granted.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Non-empty and limited to `r` and `s`.
    #[must_use]
    pub fn is_read_only(self) -> bool {
        let reads = Self::from_iter([Permission::Read, Permission::Search]);
        !self.is_empty() && reads.contains_all(self)
    }

    fn with(self, permission: Permission) -> Self {
        Self(self.0 | permission.bit())
    }
}

impl FromIterator<Permission> for Permissions {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        iter.into_iter().fold(Self::default(), Self::with)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Permission::ALL
            .into_iter()
            .filter(|p| self.contains(*p))
            .try_for_each(|p| write!(f, "{}", p.as_char()))
    }
}

impl FromStr for Permissions {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use Permission::*;

        // SMART v1 suffixes
        match s {
            "read" => return Ok([Read, Search].into_iter().collect()),
            "write" => return Ok([Create, Update, Delete].into_iter().collect()),
            "*" => return Ok(Self::all()),
            "" => return Err(ScopeError::Malformed(s.to_string())),
            _ => {}
        }

        let mut granted = Self::default();
        let mut previous: Option<usize> = None;
        for letter in s.chars() {
            let permission =
                Permission::from_char(letter).ok_or(ScopeError::UnknownPermission(letter))?;
            let rank = permission as usize;
            if previous.is_some_and(|p| p >= rank) {
                return Err(ScopeError::PermissionOrder(s.to_string()));
            }
            previous = Some(rank);
            granted = granted.with(permission);
        }
        Ok(granted)
    }
}

/// One resource scope.
///
/// A SMART v2 `?param=value` filter suffix is accepted and dropped; filters
/// do not narrow what this scope permits here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartScope {
    /// Whose data.
    pub context: ScopeContext,
    /// Which resource type.
    pub resource_type: ResourceType,
    /// Which interactions.
    pub permissions: Permissions,
}

impl SmartScope {
    /// Parse `context/Type.permissions[?filter]`.
    ///
    /// # Errors
    ///
    /// A [`ScopeError`] if `s` is not a resource scope.
    pub fn parse(s: &str) -> Result<Self, ScopeError> {
        let malformed = || ScopeError::Malformed(s.to_string());

        let without_filter = s.split('?').next().unwrap_or_default();
        let (context, target) = without_filter.split_once('/').ok_or_else(malformed)?;
        let (type_name, permissions) = target.rsplit_once('.').ok_or_else(malformed)?;

        let resource_type = match type_name {
            "" => return Err(malformed()),
            "*" => ResourceType::Wildcard,
            name => ResourceType::Specific(name.to_string()),
        };

        Ok(Self {
            context: context.parse()?,
            resource_type,
            permissions: permissions.parse()?,
        })
    }

    /// Whether the scope names `resource_type` (or `*`).
    #[must_use]
    pub fn matches_resource(&self, resource_type: &str) -> bool {
        self.resource_type.covers(resource_type)
    }

    /// Whether the scope grants `required` on `resource_type`.
    ///
    /// `patient/` scopes only count when there is a patient in context.
    #[must_use]
    pub fn matches(
        &self,
        resource_type: &str,
        required: Permissions,
        patient_context: Option<&str>,
    ) -> bool {
        if self.context == ScopeContext::Patient && patient_context.is_none() {
            return false;
        }
        self.matches_resource(resource_type) && self.permissions.contains_all(required)
    }
}

impl fmt::Display for SmartScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}.{}",
            self.context, self.resource_type, self.permissions
        )
    }
}

/// Resource scopes granted by a token's `scope` claim.
#[derive(Debug, Clone, Default)]
pub struct SmartScopes {
    grants: Vec<SmartScope>,
}

impl SmartScopes {
    /// Parse a space-separated scope claim. Never fails: scopes that are
    /// not resource scopes are logged at trace level and skipped.
    #[must_use]
    pub fn parse(claim: &str) -> Self {
        let grants = claim
            .split_whitespace()
            .filter_map(|token| match SmartScope::parse(token) {
                Ok(grant) => Some(grant),
                Err(e) => {
                    tracing::trace!(scope = token, error = %e, "Skipping scope");
                    None
                }
            })
            .collect();
        Self { grants }
    }

    /// Whether any resource scope grants `required` on `resource_type`.
    ///
    /// Use [`FhirOperation::required_permissions`](super::FhirOperation::required_permissions)
    /// to get `required` for a request.
    #[must_use]
    pub fn permits(
        &self,
        resource_type: &str,
        required: Permissions,
        patient_context: Option<&str>,
    ) -> bool {
        self.grants
            .iter()
            .any(|grant| grant.matches(resource_type, required, patient_context))
    }

    /// No resource scopes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}
