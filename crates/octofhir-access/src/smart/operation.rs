//! Classification of FHIR REST interactions.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::scopes::Permissions;

/// One SMART v2 permission letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// `c`
    Create,
    /// `r`
    Read,
    /// `u`
    Update,
    /// `d`
    Delete,
    /// `s`
    Search,
}

impl Permission {
    /// In the canonical `cruds` order.
    pub const ALL: [Permission; 5] = [
        Permission::Create,
        Permission::Read,
        Permission::Update,
        Permission::Delete,
        Permission::Search,
    ];

    /// The scope letter.
    #[must_use]
    pub fn as_char(self) -> char {
        match self {
            Self::Create => 'c',
            Self::Read => 'r',
            Self::Update => 'u',
            Self::Delete => 'd',
            Self::Search => 's',
        }
    }

    /// Parse a scope letter.
    #[must_use]
    pub fn from_char(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_char() == c)
    }

    pub(crate) fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// The REST interaction a request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FhirOperation {
    /// `GET [type]/[id]`
    Read,
    /// `GET [type]/[id]/_history/[vid]`
    VRead,
    /// `PUT [type]/[id]`
    Update,
    /// `PATCH [type]/[id]`
    Patch,
    /// `DELETE [type]/[id]`
    Delete,
    /// `POST [type]`
    Create,
    /// `GET [type]?...` and compartment searches
    Search,
    /// `POST [type]/_search`
    SearchType,
    /// `GET /?...` or `POST /_search`
    SearchSystem,
    /// `GET metadata`
    Capabilities,
    /// `POST /` with a batch Bundle
    Batch,
    /// `POST /` with a transaction Bundle
    Transaction,
    /// `GET [type]/[id]/_history`
    HistoryInstance,
    /// `GET [type]/_history`
    HistoryType,
    /// `GET /_history`
    HistorySystem,
    /// `$name` at system, type or instance level
    Operation,
}

impl FhirOperation {
    /// Permission letter of the interaction itself.
    ///
    /// `None` where no single letter applies: capabilities, bundles (each
    /// entry is checked on its own) and named operations.
    #[must_use]
    pub fn required_permission(self) -> Option<Permission> {
        use FhirOperation::*;
        match self {
            Read | VRead | HistoryInstance | HistoryType | HistorySystem => Some(Permission::Read),
            Search | SearchType | SearchSystem => Some(Permission::Search),
            Create => Some(Permission::Create),
            Update | Patch => Some(Permission::Update),
            Delete => Some(Permission::Delete),
            Capabilities | Batch | Transaction | Operation => None,
        }
    }

    /// Permissions a scope must grant for this interaction sent with `method`.
    ///
    /// A named operation invoked with `GET` or `HEAD` reads; with any other
    /// method it may write, so it needs every permission. Empty for
    /// capabilities and bundles.
    #[must_use]
    pub fn required_permissions(self, method: &str) -> Permissions {
        match self.required_permission() {
            Some(permission) => Permissions::from_iter([permission]),
            None if self == Self::Operation => {
                if method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD") {
                    Permissions::from_iter([Permission::Read])
                } else {
                    Permissions::all()
                }
            }
            None => Permissions::default(),
        }
    }

    /// Granted regardless of scopes.
    #[must_use]
    pub fn always_allowed(self) -> bool {
        self == Self::Capabilities
    }

    /// Batch or transaction.
    #[must_use]
    pub fn is_bundle(self) -> bool {
        matches!(self, Self::Batch | Self::Transaction)
    }

    /// Interaction code as used in CapabilityStatement and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::VRead => "vread",
            Self::Update => "update",
            Self::Patch => "patch",
            Self::Delete => "delete",
            Self::Create => "create",
            Self::Search => "search",
            Self::SearchType => "search-type",
            Self::SearchSystem => "search-system",
            Self::Capabilities => "capabilities",
            Self::Batch => "batch",
            Self::Transaction => "transaction",
            Self::HistoryInstance => "history-instance",
            Self::HistoryType => "history-type",
            Self::HistorySystem => "history-system",
            Self::Operation => "operation",
        }
    }
}

impl fmt::Display for FhirOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
