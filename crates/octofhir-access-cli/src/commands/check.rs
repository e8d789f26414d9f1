use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use octofhir_access::{
    AccessConfig, AccessError, AccessGate, AccessResult, AuthContext, CheckerRegistry,
    DecodedToken, FhirClient, FhirContext, HttpFhirClient, RequestDetails,
};
use serde_json::{Value, json};

use crate::cli::CheckArgs;
use crate::output::{print_denied, print_granted, print_json};

/// Stand-in backend when no base URL is configured; any lookup fails.
struct OfflineClient;

#[async_trait]
impl FhirClient for OfflineClient {
    async fn get_resource(&self, path: &str) -> AccessResult<Option<Value>> {
        Err(AccessError::backend(format!(
            "no backend configured, cannot fetch {path}"
        )))
    }

    fn base_url(&self) -> &str {
        "(offline)"
    }
}

/// Evaluate one request and print the decision. Returns whether access was granted.
pub async fn run(mut config: AccessConfig, args: CheckArgs) -> Result<bool> {
    if let Some(checker) = args.checker {
        config.checker = checker;
    }
    if let Some(backend) = args.backend {
        config.backend.base_url = Some(backend);
    }

    let registry = CheckerRegistry::builtin(&config)?;
    let gate = AccessGate::new(&registry, &config)?;

    let fhir_client: Arc<dyn FhirClient> = if config.backend.base_url.is_some() {
        Arc::new(HttpFhirClient::from_config(&config.backend)?)
    } else {
        Arc::new(OfflineClient)
    };
    tracing::debug!(
        checker = %config.checker,
        backend = fhir_client.base_url(),
        "Evaluating request"
    );

    let auth = AuthContext::builder()
        .token(parse_claims(&args.claims)?)
        .fhir_client(fhir_client)
        .fhir_context(FhirContext::new(config.fhir_version))
        .build()?;

    let mut request = RequestDetails::builder(&args.method, &args.url).request_id("cli");
    if let Some(path) = &args.body {
        request = request.body(read_json(path)?);
    }
    let request = request.build();

    let checker = gate.checker_for(&auth)?;
    let decision = gate
        .authorize(checker.as_ref(), &request)
        .await
        .context("Access could not be evaluated")?;

    let granted = decision.is_access_granted();
    print_json(&json!({
        "checker": gate.checker_name(),
        "method": request.method(),
        "path": request.path(),
        "operation": request.operation(),
        "resourceType": request.resource_type(),
        "granted": granted,
        "reason": decision.deny_reason(),
    }));

    match decision.deny_reason() {
        _ if granted => print_granted("Access granted"),
        Some(reason) => print_denied(&format!("Access denied ({})", reason.code)),
        None => print_denied("Access denied"),
    }

    Ok(granted)
}

/// Inline JSON object, or a path to a file holding one.
fn parse_claims(claims: &str) -> Result<DecodedToken> {
    let value = if claims.trim_start().starts_with('{') {
        serde_json::from_str(claims).context("Invalid inline claims JSON")?
    } else {
        read_json(Path::new(claims))?
    };
    Ok(DecodedToken::from_value(value)?)
}

fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}
