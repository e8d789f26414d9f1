//! Resolving which patients a request touches.
//!
//! A request can name its patients in several places: the path
//! (`Patient/123`, `Patient/123/Observation`), search parameters
//! (`?subject=Patient/123`), or the resource body. For instance-level
//! requests on compartment resources that carry none of these, the stored
//! resource is fetched from the backend.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::AccessResult;
use crate::client::FhirClient;
use crate::error::AccessError;
use crate::fhir_context::{CompartmentInclusion, FhirContext};
use crate::request::RequestDetails;
use crate::smart::FhirOperation;

/// Resolves the set of patient ids a request refers to.
#[async_trait]
pub trait PatientFinder: Send + Sync {
    /// Patient ids referenced by `request`.
    ///
    /// An empty set means no patient could be identified; it is up to the
    /// caller whether that is acceptable for the resource type.
    async fn find_patients(&self, request: &RequestDetails) -> AccessResult<BTreeSet<String>>;
}

/// [`PatientFinder`] driven by the Patient compartment definition.
pub struct CompartmentPatientFinder {
    fhir_context: Arc<FhirContext>,
    fhir_client: Arc<dyn FhirClient>,
}

impl CompartmentPatientFinder {
    /// Create a finder.
    pub fn new(fhir_context: Arc<FhirContext>, fhir_client: Arc<dyn FhirClient>) -> Self {
        Self {
            fhir_context,
            fhir_client,
        }
    }

    fn from_query(
        request: &RequestDetails,
        inclusions: &[CompartmentInclusion],
        patients: &mut BTreeSet<String>,
    ) {
        for inclusion in inclusions {
            let typed = format!("{}:Patient", inclusion.param);
            for name in [inclusion.param, typed.as_str()] {
                for value in request.query_values(name) {
                    patients.extend(value.split(',').filter_map(patient_id_from_search_value));
                }
            }
        }
    }

    async fn from_backend(
        &self,
        resource_type: &str,
        id: &str,
        inclusions: &[CompartmentInclusion],
    ) -> AccessResult<BTreeSet<String>> {
        let path = format!("{resource_type}/{id}");
        match self.fhir_client.get_resource(&path).await? {
            Some(resource) => {
                check_resource_type(&resource, resource_type)?;
                Ok(patient_references(&resource, inclusions))
            }
            None => {
                tracing::debug!(path = %path, "Resource not found while resolving patients");
                Ok(BTreeSet::new())
            }
        }
    }
}

#[async_trait]
impl PatientFinder for CompartmentPatientFinder {
    #[tracing::instrument(skip_all, fields(path = %request.path(), operation = %request.operation()))]
    async fn find_patients(&self, request: &RequestDetails) -> AccessResult<BTreeSet<String>> {
        let mut patients = BTreeSet::new();

        if let Some(("Patient", id)) = request.compartment() {
            patients.insert(id.to_string());
        }

        let Some(resource_type) = request.resource_type() else {
            return Ok(patients);
        };
        let Some(inclusions) = self
            .fhir_context
            .patient_compartment()
            .get_inclusions(resource_type)
        else {
            return Ok(patients);
        };

        let resource = resource_body(request, resource_type)?;

        if resource_type == "Patient" {
            patients.extend(request.resource_id().map(str::to_string));
            for value in request.query_values("_id") {
                patients.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(str::to_string),
                );
            }
            if let Some(id) = resource.and_then(|b| b.get("id")).and_then(Value::as_str) {
                patients.insert(id.to_string());
            }
            return Ok(patients);
        }

        Self::from_query(request, inclusions, &mut patients);

        if let Some(resource) = resource {
            patients.extend(patient_references(resource, inclusions));
        } else if let Some(patch) = request.body()
            && request.operation() == FhirOperation::Patch
        {
            patients.extend(patch_references(resource_type, patch, inclusions)?);
        }

        // Updates, patches and deletes must also respect the stored resource's
        // patient, otherwise a body could move a resource out of another
        // compartment.
        if let Some(id) = request.resource_id()
            && needs_stored_resource(request.operation(), patients.is_empty())
        {
            let stored = self.from_backend(resource_type, id, inclusions).await?;
            patients.extend(stored);
        }

        tracing::debug!(count = patients.len(), "Resolved patients");
        Ok(patients)
    }
}

fn needs_stored_resource(operation: FhirOperation, nothing_resolved: bool) -> bool {
    match operation {
        FhirOperation::Update | FhirOperation::Patch | FhirOperation::Delete => true,
        FhirOperation::Read
        | FhirOperation::VRead
        | FhirOperation::HistoryInstance
        | FhirOperation::Operation => nothing_resolved,
        _ => false,
    }
}

/// The request body when it is the target resource itself.
///
/// Patch documents and operation inputs (`Parameters`) are not.
fn resource_body<'a>(
    request: &'a RequestDetails,
    resource_type: &str,
) -> AccessResult<Option<&'a Value>> {
    let Some(body) = request.body() else {
        return Ok(None);
    };
    if matches!(
        request.operation(),
        FhirOperation::Patch | FhirOperation::Operation
    ) || body.get("resourceType").and_then(Value::as_str) == Some("Parameters")
    {
        return Ok(None);
    }
    check_resource_type(body, resource_type)?;
    Ok(Some(body))
}

fn check_resource_type(resource: &Value, expected: &str) -> AccessResult<()> {
    match resource.get("resourceType").and_then(Value::as_str) {
        Some(actual) if actual != expected => Err(AccessError::patient_resolution(format!(
            "expected a {expected} resource, got {actual}"
        ))),
        _ => Ok(()),
    }
}

/// Patient ids a patch writes into compartment elements.
///
/// Understands JSON Patch (an array of operations) and FHIRPath Patch (a
/// `Parameters` resource). `move` and `copy` into a compartment element take
/// their value from elsewhere in the stored resource and cannot be resolved.
///
/// Unresolvable or unknown patch bodies are a patient-resolution error.
fn patch_references(
    resource_type: &str,
    patch: &Value,
    inclusions: &[CompartmentInclusion],
) -> AccessResult<BTreeSet<String>> {
    let mut refs = Vec::new();
    match patch {
        Value::Array(ops) => json_patch_references(ops, inclusions, &mut refs)?,
        Value::Object(_)
            if patch.get("resourceType").and_then(Value::as_str) == Some("Parameters") =>
        {
            fhirpath_patch_references(resource_type, patch, inclusions, &mut refs);
        }
        _ => {
            return Err(AccessError::patient_resolution(
                "patch body is neither JSON Patch nor FHIRPath Patch",
            ));
        }
    }
    Ok(refs
        .iter()
        .filter_map(|r| patient_id_from_reference(r))
        .collect())
}

fn json_patch_references(
    ops: &[Value],
    inclusions: &[CompartmentInclusion],
    refs: &mut Vec<String>,
) -> AccessResult<()> {
    for op in ops {
        let Some(path) = op.get("path").and_then(Value::as_str) else {
            continue;
        };
        let element = path
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default();
        let whole_resource = element.is_empty();
        if !whole_resource && !inclusions.iter().any(|i| i.element == element) {
            continue;
        }

        match op.get("op").and_then(Value::as_str) {
            Some("add" | "replace") => {
                let Some(value) = op.get("value") else {
                    continue;
                };
                if whole_resource {
                    collect_inclusion_references(value, inclusions, refs);
                } else {
                    collect_patch_value(value, refs);
                }
            }
            Some(kind @ ("move" | "copy")) => {
                return Err(AccessError::patient_resolution(format!(
                    "cannot resolve patients for '{kind}' into {path}"
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn fhirpath_patch_references(
    resource_type: &str,
    parameters: &Value,
    inclusions: &[CompartmentInclusion],
    refs: &mut Vec<String>,
) {
    let operations = parameters
        .get("parameter")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|p| p.get("name").and_then(Value::as_str) == Some("operation"));

    for operation in operations {
        let parts = operation
            .get("part")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let part = |name: &str| {
            parts
                .iter()
                .find(|p| p.get("name").and_then(Value::as_str) == Some(name))
        };
        let text = |name: &str| {
            part(name)
                .and_then(|p| p.get("valueCode").or_else(|| p.get("valueString")))
                .and_then(Value::as_str)
        };

        if !matches!(text("type"), Some("add" | "insert" | "replace")) {
            continue;
        }
        let Some(path) = text("path") else { continue };

        // `Observation.subject.reference`, or `Observation` plus name `subject` for add.
        let relative = path
            .strip_prefix(resource_type)
            .map(|rest| rest.trim_start_matches('.'))
            .unwrap_or(path);
        let element = match relative.split(['.', '[', '(']).next().unwrap_or_default() {
            "" => text("name").unwrap_or_default(),
            element => element,
        };
        if !inclusions.iter().any(|i| i.element == element) {
            continue;
        }

        let Some(Value::Object(value)) = part("value") else {
            continue;
        };
        for (key, inner) in value {
            if key.starts_with("value") {
                collect_patch_value(inner, refs);
            }
        }
    }
}

/// A patch value is a reference string when it targets `.../reference`.
fn collect_patch_value(value: &Value, refs: &mut Vec<String>) {
    match value {
        Value::String(reference) => refs.push(reference.clone()),
        other => collect_references(other, refs),
    }
}

/// Patient ids referenced from the compartment elements of a resource.
#[must_use]
pub fn patient_references(
    resource: &Value,
    inclusions: &[CompartmentInclusion],
) -> BTreeSet<String> {
    let mut refs = Vec::new();
    collect_inclusion_references(resource, inclusions, &mut refs);
    refs.iter()
        .filter_map(|r| patient_id_from_reference(r))
        .collect()
}

fn collect_inclusion_references(
    resource: &Value,
    inclusions: &[CompartmentInclusion],
    refs: &mut Vec<String>,
) {
    for inclusion in inclusions {
        if let Some(value) = resource.get(inclusion.element) {
            collect_references(value, refs);
        }
    }
}

/// Collect reference strings from an element value.
///
/// Handles `Reference` objects, arrays of them, and backbone elements that
/// wrap a reference in `actor` or `what` (e.g. `Appointment.participant`).
fn collect_references(value: &Value, refs: &mut Vec<String>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_references(item, refs);
            }
        }
        Value::Object(map) => {
            if let Some(reference) = map.get("reference").and_then(Value::as_str) {
                refs.push(reference.to_string());
            } else {
                for nested in ["actor", "what"] {
                    if let Some(inner) = map.get(nested) {
                        collect_references(inner, refs);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Extract the patient id from a literal reference.
///
/// Accepts `Patient/123`, `Patient/123/_history/2` and absolute URLs ending
/// in either form. Returns `None` for other resource types and contained
/// (`#id`) references.
#[must_use]
pub fn patient_id_from_reference(reference: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.starts_with('#') {
        return None;
    }

    let segments: Vec<&str> = reference.split('/').collect();
    let (rtype, id) = match segments.as_slice() {
        [.., rtype, id, "_history", _] => (*rtype, *id),
        [.., rtype, id] => (*rtype, *id),
        _ => return None,
    };

    (rtype == "Patient" && !id.is_empty()).then(|| id.to_string())
}

/// Reference search values may also be a bare id.
fn patient_id_from_search_value(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if value.contains('/') {
        patient_id_from_reference(value)
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Backend stub that serves a single resource and records lookups.
    struct StubClient {
        resource: Option<Value>,
        calls: Mutex<Vec<String>>,
    }

    impl StubClient {
        fn new(resource: Option<Value>) -> Arc<Self> {
            Arc::new(Self {
                resource,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FhirClient for StubClient {
        async fn get_resource(&self, path: &str) -> AccessResult<Option<Value>> {
            self.calls.lock().unwrap().push(path.to_string());
            Ok(self.resource.clone())
        }

        fn base_url(&self) -> &str {
            "http://stub/"
        }
    }

    fn finder(client: Arc<StubClient>) -> CompartmentPatientFinder {
        CompartmentPatientFinder::new(Arc::new(FhirContext::r4()), client)
    }

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_patient_id_from_reference() {
        assert_eq!(patient_id_from_reference("Patient/123"), Some("123".into()));
        assert_eq!(
            patient_id_from_reference("http://example.org/fhir/Patient/abc"),
            Some("abc".into())
        );
        assert_eq!(
            patient_id_from_reference("Patient/123/_history/4"),
            Some("123".into())
        );
        assert_eq!(patient_id_from_reference("Group/1"), None);
        assert_eq!(patient_id_from_reference("#contained"), None);
        assert_eq!(patient_id_from_reference("123"), None);
    }

    #[test]
    fn test_patient_references_from_body() {
        let ctx = FhirContext::r4();
        let inclusions = ctx.patient_compartment().get_inclusions("Appointment").unwrap();
        let appointment = json!({
            "resourceType": "Appointment",
            "participant": [
                {"actor": {"reference": "Patient/p1"}},
                {"actor": {"reference": "Practitioner/dr"}}
            ]
        });
        assert_eq!(patient_references(&appointment, inclusions), ids(&["p1"]));
    }

    #[tokio::test]
    async fn test_patient_read_uses_path_id() {
        let client = StubClient::new(None);
        let req = RequestDetails::builder("GET", "Patient/p1").build();
        let found = finder(client.clone()).find_patients(&req).await.unwrap();
        assert_eq!(found, ids(&["p1"]));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_compartment_search() {
        let req = RequestDetails::builder("GET", "Patient/p1/Observation").build();
        let found = finder(StubClient::new(None)).find_patients(&req).await.unwrap();
        assert_eq!(found, ids(&["p1"]));
    }

    #[tokio::test]
    async fn test_search_params() {
        let req = RequestDetails::builder("GET", "Observation?subject=Patient/p1,p2&code=x").build();
        let found = finder(StubClient::new(None)).find_patients(&req).await.unwrap();
        assert_eq!(found, ids(&["p1", "p2"]));

        let req = RequestDetails::builder("GET", "Observation?patient=p3").build();
        let found = finder(StubClient::new(None)).find_patients(&req).await.unwrap();
        assert_eq!(found, ids(&["p3"]));

        let req = RequestDetails::builder("GET", "Observation?subject=Group/g1").build();
        let found = finder(StubClient::new(None)).find_patients(&req).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_create_body() {
        let req = RequestDetails::builder("POST", "Observation")
            .body(json!({
                "resourceType": "Observation",
                "subject": {"reference": "Patient/p9"}
            }))
            .build();
        let found = finder(StubClient::new(None)).find_patients(&req).await.unwrap();
        assert_eq!(found, ids(&["p9"]));
    }

    #[tokio::test]
    async fn test_body_type_mismatch() {
        let req = RequestDetails::builder("POST", "Observation")
            .body(json!({"resourceType": "Condition", "subject": {"reference": "Patient/p1"}}))
            .build();
        let err = finder(StubClient::new(None))
            .find_patients(&req)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::PatientResolution { .. }));
    }

    #[tokio::test]
    async fn test_read_falls_back_to_backend() {
        let client = StubClient::new(Some(json!({
            "resourceType": "Observation",
            "id": "o1",
            "subject": {"reference": "Patient/p7"}
        })));
        let req = RequestDetails::builder("GET", "Observation/o1").build();
        let found = finder(client.clone()).find_patients(&req).await.unwrap();
        assert_eq!(found, ids(&["p7"]));
        assert_eq!(client.calls(), vec!["Observation/o1".to_string()]);
    }

    #[tokio::test]
    async fn test_update_merges_stored_and_body_patients() {
        let client = StubClient::new(Some(json!({
            "resourceType": "Observation",
            "id": "o1",
            "subject": {"reference": "Patient/other"}
        })));
        let req = RequestDetails::builder("PUT", "Observation/o1")
            .body(json!({
                "resourceType": "Observation",
                "id": "o1",
                "subject": {"reference": "Patient/p1"}
            }))
            .build();
        let found = finder(client).find_patients(&req).await.unwrap();
        assert_eq!(found, ids(&["other", "p1"]));
    }

    fn stored_observation(patient: &str) -> Arc<StubClient> {
        StubClient::new(Some(json!({
            "resourceType": "Observation",
            "id": "o1",
            "subject": {"reference": format!("Patient/{patient}")}
        })))
    }

    fn fhirpath_patch(kind: &str, path: &str, value_key: &str, value: Value) -> Value {
        let mut value_part = json!({"name": "value"});
        value_part[value_key] = value;
        json!({
            "resourceType": "Parameters",
            "parameter": [{
                "name": "operation",
                "part": [
                    {"name": "type", "valueCode": kind},
                    {"name": "path", "valueString": path},
                    value_part
                ]
            }]
        })
    }

    #[tokio::test]
    async fn test_json_patch_resolves_written_references() {
        let req = RequestDetails::builder("PATCH", "Observation/o1")
            .body(json!([
                {"op": "replace", "path": "/subject/reference", "value": "Patient/p2"},
                {"op": "replace", "path": "/status", "value": "final"}
            ]))
            .build();
        let found = finder(stored_observation("p1")).find_patients(&req).await.unwrap();
        assert_eq!(found, ids(&["p1", "p2"]));

        let req = RequestDetails::builder("PATCH", "Observation/o1")
            .body(json!([
                {"op": "add", "path": "/subject", "value": {"reference": "Patient/p3"}}
            ]))
            .build();
        let found = finder(stored_observation("p1")).find_patients(&req).await.unwrap();
        assert_eq!(found, ids(&["p1", "p3"]));
    }

    #[tokio::test]
    async fn test_json_patch_of_other_elements_uses_stored_resource() {
        let client = stored_observation("p1");
        let req = RequestDetails::builder("PATCH", "Observation/o1")
            .body(json!([{"op": "replace", "path": "/status", "value": "amended"}]))
            .build();
        let found = finder(client.clone()).find_patients(&req).await.unwrap();
        assert_eq!(found, ids(&["p1"]));
        assert_eq!(client.calls(), vec!["Observation/o1".to_string()]);
    }

    #[tokio::test]
    async fn test_json_patch_copy_into_subject_is_unresolvable() {
        let req = RequestDetails::builder("PATCH", "Observation/o1")
            .body(json!([{"op": "copy", "from": "/performer/0", "path": "/subject"}]))
            .build();
        let err = finder(stored_observation("p1"))
            .find_patients(&req)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::PatientResolution { .. }));
    }

    #[tokio::test]
    async fn test_fhirpath_patch() {
        let subject = fhirpath_patch(
            "replace",
            "Observation.subject",
            "valueReference",
            json!({"reference": "Patient/p2"}),
        );
        let req = RequestDetails::builder("PATCH", "Observation/o1")
            .body(subject)
            .build();
        let found = finder(stored_observation("p1")).find_patients(&req).await.unwrap();
        assert_eq!(found, ids(&["p1", "p2"]));

        let status = fhirpath_patch("replace", "Observation.status", "valueCode", json!("final"));
        let req = RequestDetails::builder("PATCH", "Observation/o1")
            .body(status)
            .build();
        let found = finder(stored_observation("p1")).find_patients(&req).await.unwrap();
        assert_eq!(found, ids(&["p1"]));
    }

    #[tokio::test]
    async fn test_operation_parameters_body_is_not_the_resource() {
        let req = RequestDetails::builder("POST", "Observation/o1/$validate")
            .body(json!({"resourceType": "Parameters", "parameter": []}))
            .build();
        let found = finder(stored_observation("p1")).find_patients(&req).await.unwrap();
        assert_eq!(found, ids(&["p1"]));
    }

    #[tokio::test]
    async fn test_missing_resource_resolves_nothing() {
        let req = RequestDetails::builder("GET", "Observation/gone").build();
        let found = finder(StubClient::new(None)).find_patients(&req).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_non_compartment_type() {
        let client = StubClient::new(None);
        let req = RequestDetails::builder("GET", "Medication/m1").build();
        let found = finder(client.clone()).find_patients(&req).await.unwrap();
        assert!(found.is_empty());
        assert!(client.calls().is_empty());
    }
}
