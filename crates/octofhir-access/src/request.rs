//! Read-only view of an inbound FHIR request.
//!
//! The gateway builds one [`RequestDetails`] per request; checkers only read
//! it. The resource type is absent for system-level requests such as
//! batch/transaction bundles, `GET /_history` or a bare `GET /`.
//!
//! ```
//! use octofhir_access::request::RequestDetails;
//! use octofhir_access::smart::FhirOperation;
//!
//! let request = RequestDetails::builder("GET", "/Observation?patient=Patient/123").build();
//! assert_eq!(request.resource_type(), Some("Observation"));
//! assert_eq!(request.operation(), FhirOperation::Search);
//! assert_eq!(request.query_param("patient"), Some("Patient/123"));
//! ```

use std::collections::HashMap;

use crate::smart::FhirOperation;

/// A FHIR request as seen by access checkers.
#[derive(Debug, Clone)]
pub struct RequestDetails {
    method: String,
    path: String,
    operation: FhirOperation,
    resource_type: Option<String>,
    resource_id: Option<String>,
    compartment: Option<(String, String)>,
    query_params: HashMap<String, Vec<String>>,
    body: Option<serde_json::Value>,
    request_id: Option<String>,
}

impl RequestDetails {
    /// Start building a request from its method and path.
    ///
    /// The path is relative to the FHIR base and may include a query string.
    #[must_use]
    pub fn builder(method: &str, path: &str) -> RequestDetailsBuilder {
        RequestDetailsBuilder::new(method, path)
    }

    /// HTTP method, upper-cased.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Detected FHIR interaction.
    #[must_use]
    pub fn operation(&self) -> FhirOperation {
        self.operation
    }

    /// Target resource type, `None` for system-level requests.
    #[must_use]
    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }

    /// Target resource id for instance-level requests.
    #[must_use]
    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    /// Compartment from the URL, e.g. `("Patient", "123")` for
    /// `/Patient/123/Observation`.
    #[must_use]
    pub fn compartment(&self) -> Option<(&str, &str)> {
        self.compartment
            .as_ref()
            .map(|(t, id)| (t.as_str(), id.as_str()))
    }

    /// First value of a query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of a query parameter, in request order.
    #[must_use]
    pub fn query_values(&self, name: &str) -> &[String] {
        self.query_params
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All query parameters.
    #[must_use]
    pub fn query_params(&self) -> &HashMap<String, Vec<String>> {
        &self.query_params
    }

    /// Parsed JSON request body.
    #[must_use]
    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    /// Gateway-assigned request id, for log correlation.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`RequestDetails`].
#[derive(Debug)]
pub struct RequestDetailsBuilder {
    method: String,
    path: String,
    query_params: HashMap<String, Vec<String>>,
    body: Option<serde_json::Value>,
    request_id: Option<String>,
}

impl RequestDetailsBuilder {
    fn new(method: &str, path: &str) -> Self {
        let mut builder = Self {
            method: method.to_uppercase(),
            path: String::new(),
            query_params: HashMap::new(),
            body: None,
            request_id: None,
        };

        match path.split_once('?') {
            Some((p, query)) => {
                builder.path = p.to_string();
                builder = builder.query(query);
            }
            None => builder.path = path.to_string(),
        }

        builder
    }

    /// Add parameters from a raw (URL-encoded) query string.
    #[must_use]
    pub fn query(mut self, query: &str) -> Self {
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            self.query_params
                .entry(name.into_owned())
                .or_default()
                .push(value.into_owned());
        }
        self
    }

    /// Add a single query parameter value.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Set the JSON request body.
    #[must_use]
    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Set the request id.
    #[must_use]
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Detect the operation and target, and build the request.
    #[must_use]
    pub fn build(self) -> RequestDetails {
        let path = self.path.trim_matches('/').to_string();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let operation = detect_operation(&self.method, &segments, self.body.as_ref());
        let target = parse_target(&segments);

        RequestDetails {
            method: self.method,
            path: format!("/{}", path),
            operation,
            resource_type: target.resource_type,
            resource_id: target.resource_id,
            compartment: target.compartment,
            query_params: self.query_params,
            body: self.body,
            request_id: self.request_id,
        }
    }
}

// =============================================================================
// Operation Detection
// =============================================================================

fn detect_operation(
    method: &str,
    segments: &[&str],
    body: Option<&serde_json::Value>,
) -> FhirOperation {
    match method {
        "GET" | "HEAD" => detect_get_operation(segments),
        "POST" => detect_post_operation(segments, body),
        "PUT" => FhirOperation::Update,
        "PATCH" => FhirOperation::Patch,
        "DELETE" => FhirOperation::Delete,
        _ => FhirOperation::Read,
    }
}

fn detect_get_operation(segments: &[&str]) -> FhirOperation {
    match segments {
        [] => FhirOperation::SearchSystem,
        ["metadata"] => FhirOperation::Capabilities,
        ["_history"] => FhirOperation::HistorySystem,
        [op] if op.starts_with('$') => FhirOperation::Operation,
        [_] => FhirOperation::Search,
        [_, "_history"] => FhirOperation::HistoryType,
        [_, op] if op.starts_with('$') => FhirOperation::Operation,
        [_, special] if special.starts_with('_') => FhirOperation::Search,
        [_, _] => FhirOperation::Read,
        [_, _, "_history"] => FhirOperation::HistoryInstance,
        [_, _, "_history", _] => FhirOperation::VRead,
        [_, _, op] if op.starts_with('$') => FhirOperation::Operation,
        _ => FhirOperation::Search,
    }
}

fn detect_post_operation(segments: &[&str], body: Option<&serde_json::Value>) -> FhirOperation {
    match segments {
        [] => match body
            .and_then(|b| b.get("type"))
            .and_then(serde_json::Value::as_str)
        {
            Some("transaction") => FhirOperation::Transaction,
            Some(_) => FhirOperation::Batch,
            None if body.is_some() => FhirOperation::Batch,
            None => FhirOperation::SearchSystem,
        },
        ["_search"] => FhirOperation::SearchSystem,
        [_, "_search"] => FhirOperation::SearchType,
        segs if segs.iter().any(|s| s.starts_with('$')) => FhirOperation::Operation,
        [_] if body.is_some() => FhirOperation::Create,
        _ => FhirOperation::Search,
    }
}

// =============================================================================
// Path Parsing
// =============================================================================

#[derive(Default)]
struct Target {
    resource_type: Option<String>,
    resource_id: Option<String>,
    compartment: Option<(String, String)>,
}

fn is_special(segment: &str) -> bool {
    segment.starts_with('_') || segment.starts_with('$')
}

fn type_segment(segment: &str) -> Option<String> {
    (!is_special(segment) && segment != "metadata").then(|| segment.to_string())
}

fn parse_target(segments: &[&str]) -> Target {
    match segments {
        [] => Target::default(),

        [rt, ..] if type_segment(rt).is_none() => Target::default(),

        // /ResourceType/id, /ResourceType/id/_history[/vid], /ResourceType/id/$op
        [rt, id, rest @ ..]
            if !is_special(id) && rest.first().is_none_or(|s| is_special(s)) =>
        {
            Target {
                resource_type: type_segment(rt),
                resource_id: Some(id.to_string()),
                compartment: None,
            }
        }

        // /CompartmentType/compartmentId/ResourceType
        [compartment_type, compartment_id, rt] if !is_special(compartment_id) => Target {
            resource_type: type_segment(rt),
            resource_id: None,
            compartment: Some((compartment_type.to_string(), compartment_id.to_string())),
        },

        [rt, ..] => Target {
            resource_type: type_segment(rt),
            ..Target::default()
        },
    }
}

// =============================================================================
// Tests
// =============================================================================
