use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use octofhir_access::prelude::*;
use octofhir_access::{
    DecodedToken, FhirClient, FhirContext, FnPostProcessor, ResponsePostProcessor,
};
use serde_json::{Value, json};

struct NoBackend;

#[async_trait]
impl FhirClient for NoBackend {
    async fn get_resource(&self, _path: &str) -> AccessResult<Option<Value>> {
        Ok(None)
    }

    fn base_url(&self) -> &str {
        "http://unused/"
    }
}

fn auth(claims: Value) -> AuthContext {
    AuthContext::builder()
        .token(DecodedToken::from_value(claims).unwrap())
        .fhir_client(Arc::new(NoBackend))
        .fhir_context(FhirContext::r4())
        .build()
        .unwrap()
}

fn gate(checker: &str) -> AccessGate {
    let config = AccessConfig {
        checker: checker.to_string(),
        ..AccessConfig::default()
    };
    let registry = CheckerRegistry::builtin(&config).unwrap();
    AccessGate::new(&registry, &config).unwrap()
}

/// Checker returning a fixed decision.
struct Fixed(AccessDecision);

#[async_trait]
impl AccessChecker for Fixed {
    async fn check_access(&self, _request: &RequestDetails) -> AccessResult<AccessDecision> {
        Ok(self.0.clone())
    }
}

/// Checker that never finishes in time.
struct Slow;

#[async_trait]
impl AccessChecker for Slow {
    async fn check_access(&self, _request: &RequestDetails) -> AccessResult<AccessDecision> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(AccessDecision::allow())
    }
}

// Scenario 1: always-allow checker, resource request.
#[tokio::test]
async fn demo_checker_grants_resource_request() {
    let gate = gate("demo");
    let checker = gate.checker_for(&auth(json!({}))).unwrap();

    let request = RequestDetails::builder("GET", "/Patient/123").build();
    let decision = gate.authorize(checker.as_ref(), &request).await.unwrap();
    assert!(decision.is_access_granted());

    let body = json!({"resourceType": "Patient", "id": "123"});
    assert_eq!(decision.post_process(body.clone()), body);
}

// Scenario 2: always-allow checker, bundle request without a resource type.
#[tokio::test]
async fn demo_checker_grants_bundle() {
    let gate = gate("demo");
    let checker = gate.checker_for(&auth(json!({}))).unwrap();

    let request = RequestDetails::builder("POST", "/")
        .body(json!({"resourceType": "Bundle", "type": "batch", "entry": []}))
        .build();
    assert!(request.resource_type().is_none());

    let decision = gate.authorize(checker.as_ref(), &request).await.unwrap();
    assert!(decision.is_access_granted());
}

// Scenario 3: selection by name.
#[test]
fn checker_lookup_by_name() {
    let registry = CheckerRegistry::builtin(&AccessConfig::default()).unwrap();
    assert!(registry.get("demo").is_ok());

    let err = registry.get("nonexistent").err().unwrap();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[tokio::test]
async fn denied_request_never_reaches_backend() {
    let gate = gate("demo");
    let forwarded = AtomicUsize::new(0);

    let checker = Fixed(AccessDecision::deny(DenyReason::compartment_violation()));
    let request = RequestDetails::builder("GET", "/Observation/1").build();
    let result = gate
        .enforce(&checker, &request, || async {
            forwarded.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"resourceType": "Observation"}))
        })
        .await;

    match result {
        Err(GatewayError::Denied(reason)) => assert_eq!(reason.code, "compartment-violation"),
        other => panic!("expected denial, got {other:?}"),
    }
    assert_eq!(forwarded.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn no_op_denial_without_reason() {
    let gate = gate("demo");
    let checker = Fixed(AccessDecision::no_op(false));
    let request = RequestDetails::builder("GET", "/Patient/1").build();

    let result = gate
        .enforce(&checker, &request, || async { Ok(json!({})) })
        .await;
    match result {
        Err(GatewayError::Denied(reason)) => assert_eq!(reason.code, "access-denied"),
        other => panic!("expected denial, got {other:?}"),
    }
}

#[tokio::test]
async fn granted_response_is_post_processed_once() {
    let gate = gate("demo");
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let processor: Arc<dyn ResponsePostProcessor> = Arc::new(FnPostProcessor(move |mut body: Value| {
        counter.fetch_add(1, Ordering::SeqCst);
        body["meta"] = json!({"tag": [{"code": "filtered"}]});
        body
    }));
    let checker = Fixed(AccessDecision::allow_with(processor));

    let request = RequestDetails::builder("GET", "/Patient/1").build();
    let body = gate
        .enforce(&checker, &request, || async {
            Ok(json!({"resourceType": "Patient", "id": "1"}))
        })
        .await
        .unwrap();

    assert_eq!(body["meta"]["tag"][0]["code"], "filtered");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn backend_errors_pass_through() {
    let gate = gate("demo");
    let checker = gate.checker_for(&auth(json!({}))).unwrap();
    let request = RequestDetails::builder("GET", "/Patient/1").build();

    let result = gate
        .enforce(checker.as_ref(), &request, || async {
            Err(GatewayError::backend("connection refused"))
        })
        .await;
    assert!(matches!(result, Err(GatewayError::Backend { .. })));
}

#[tokio::test]
async fn evaluation_errors_are_not_decisions() {
    let gate = gate("patient");
    let checker = gate.checker_for(&auth(json!({"scope": "patient/*.rs"}))).unwrap();
    let forwarded = AtomicUsize::new(0);

    let request = RequestDetails::builder("GET", "/Patient/p1").build();
    let result = gate
        .enforce(checker.as_ref(), &request, || async {
            forwarded.fetch_add(1, Ordering::SeqCst);
            Ok(json!({}))
        })
        .await;

    match result {
        Err(GatewayError::Evaluation(e)) => {
            assert!(e.is_claim_error());
            assert!(e.is_evaluation_error());
        }
        other => panic!("expected evaluation error, got {other:?}"),
    }
    assert_eq!(forwarded.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn slow_checker_times_out() {
    let config = AccessConfig {
        evaluation_timeout: Duration::from_millis(50),
        ..AccessConfig::default()
    };
    let registry = CheckerRegistry::builtin(&config).unwrap();
    let gate = AccessGate::new(&registry, &config).unwrap();

    let request = RequestDetails::builder("GET", "/Patient/1").build();
    let err = gate.authorize(&Slow, &request).await.unwrap_err();
    assert!(matches!(err, AccessError::EvaluationTimeout { millis: 50 }));
}

#[tokio::test]
async fn check_access_is_idempotent() {
    let gate = gate("patient");
    let checker = gate
        .checker_for(&auth(json!({"patient_id": "p1", "scope": "patient/*.rs"})))
        .unwrap();

    for path in ["/Patient/p1", "/Patient/p2", "/Observation", "/Medication"] {
        let request = RequestDetails::builder("GET", path).build();
        let first = checker.check_access(&request).await.unwrap();
        let second = checker.check_access(&request).await.unwrap();
        assert_eq!(first.is_access_granted(), second.is_access_granted(), "{path}");
        assert_eq!(first.deny_reason(), second.deny_reason(), "{path}");
    }
}

#[tokio::test]
async fn shared_checker_serves_concurrent_requests() {
    let gate = gate("patient");
    let checker = gate
        .checker_for(&auth(json!({"patient_id": "p1", "scope": "patient/*.rs"})))
        .unwrap();

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let checker = checker.clone();
            tokio::spawn(async move {
                let patient = format!("p{}", i % 4);
                let request = RequestDetails::builder("GET", &format!("/Patient/{patient}"))
                    .request_id(format!("req-{i}"))
                    .build();
                let decision = checker.check_access(&request).await.unwrap();
                (patient, decision.is_access_granted())
            })
        })
        .collect();

    for handle in handles {
        let (patient, granted) = handle.await.unwrap();
        assert_eq!(granted, patient == "p1", "patient {patient}");
    }
}

#[tokio::test]
async fn patient_checker_transaction_bundle() {
    let gate = gate("patient");
    let checker = gate
        .checker_for(&auth(json!({
            "patient_id": "p1",
            "scope": "patient/Patient.rs patient/Observation.cruds"
        })))
        .unwrap();

    let request = RequestDetails::builder("POST", "/")
        .body(json!({
            "resourceType": "Bundle",
            "type": "transaction",
            "entry": [
                {
                    "request": {"method": "POST", "url": "Observation"},
                    "resource": {
                        "resourceType": "Observation",
                        "subject": {"reference": "Patient/p1"}
                    }
                },
                {"request": {"method": "GET", "url": "Observation?patient=p1"}}
            ]
        }))
        .build();
    let decision = gate.authorize(checker.as_ref(), &request).await.unwrap();
    assert!(decision.is_access_granted());

    let request = RequestDetails::builder("POST", "/")
        .body(json!({
            "resourceType": "Bundle",
            "type": "transaction",
            "entry": [
                {"request": {"method": "DELETE", "url": "Patient/p1"}}
            ]
        }))
        .build();
    let decision = gate.authorize(checker.as_ref(), &request).await.unwrap();
    assert_eq!(
        decision.deny_reason().map(|r| r.code.as_str()),
        Some("insufficient-scope")
    );
}
