//! Gateways built from layered configuration.

use std::io::Write;
use std::sync::Arc;

use custos::authz::fixtures::{FixedEvaluator, ManualClock, StubReply, StubTransport};
use custos::authz::{
    AttributeValue, AuthzError, Clock, Decision, DecisionQueryTransport, EnforcementOutcome,
    EnforcementState, TransportError,
};
use custos::{ConfigLoader, Gateway, GatewayError};
use tempfile::{NamedTempFile, TempDir};

const AUTHZ: &str = "https://authz.example/decision";
const EMAIL: &str = "urn:esg:email";
const URI_FORMAT: &str = "urn:oasis:names:tc:SAML:2.0:attrname-format:uri";
const ALICE: &str = "https://openid.example/alice";

fn mapping_file(lines: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{lines}").unwrap();
    file
}

fn stub(clock: &Arc<ManualClock>, reply: StubReply) -> Arc<StubTransport> {
    Arc::new(StubTransport::new(reply).with_clock(Arc::clone(clock) as Arc<dyn Clock>))
}

fn as_transport(stub: &Arc<StubTransport>) -> Arc<dyn DecisionQueryTransport> {
    Arc::clone(stub) as Arc<dyn DecisionQueryTransport>
}

#[tokio::test]
async fn test_cached_permit_from_flat_config() {
    let config = ConfigLoader::new()
        .with_pairs([
            ("pep.authz_service_uri", AUTHZ),
            ("pep.cache_decisions", "true"),
            ("pep.ignore_patterns", "^/static/"),
            ("pep.query.issuer_name", "gateway"),
            ("pep.query.action", "read"),
        ])
        .unwrap()
        .load()
        .unwrap();

    let clock = Arc::new(ManualClock::default());
    let stub = stub(&clock, StubReply::Decisions(vec![Decision::Permit]));
    let gateway = Gateway::builder(config)
        .transport(as_transport(&stub))
        .clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .build()
        .unwrap();

    let first = gateway.authorize(ALICE, "/data/file.nc").await;
    assert_eq!(first.outcome, EnforcementOutcome::Allow);
    assert_eq!(first.state, EnforcementState::Decided);

    let second = gateway.authorize(ALICE, "/data/file.nc").await;
    assert_eq!(second.state, EnforcementState::CachedDecision);

    let filtered = gateway.authorize(ALICE, "/static/logo.png").await;
    assert_eq!(filtered.state, EnforcementState::FilteredOut);

    let calls = stub.calls();
    assert_eq!(calls.len(), 1);
    let (endpoint, query) = &calls[0];
    assert_eq!(endpoint, AUTHZ);
    assert_eq!(query.issuer.value, "gateway");
    assert_eq!(query.subject.value, ALICE);
}

#[tokio::test]
async fn test_uncached_gateway_queries_every_time() {
    let config = ConfigLoader::new()
        .with_pairs([("pep.authz_service_uri", AUTHZ)])
        .unwrap()
        .load()
        .unwrap();

    let clock = Arc::new(ManualClock::default());
    let stub = stub(&clock, StubReply::Decisions(vec![Decision::Deny]));
    let gateway = Gateway::builder(config)
        .transport(as_transport(&stub))
        .build()
        .unwrap();

    for _ in 0..2 {
        let enforcement = gateway.authorize(ALICE, "/data").await;
        assert_eq!(enforcement.outcome, EnforcementOutcome::Deny);
    }
    assert_eq!(gateway.authorize("", "/data").await.outcome, EnforcementOutcome::Unauthorized);
    assert_eq!(stub.call_count(), 3);
}

#[tokio::test]
async fn test_evaluator_and_ignore_list_conflict() {
    let config = ConfigLoader::new()
        .with_pairs([
            ("pep.authz_service_uri", AUTHZ),
            ("pep.ignore_patterns", "^/static/"),
        ])
        .unwrap()
        .load()
        .unwrap();

    let clock = Arc::new(ManualClock::default());
    let result = Gateway::builder(config)
        .transport(as_transport(&stub(&clock, StubReply::Decisions(vec![]))))
        .evaluator(Arc::new(FixedEvaluator::new(Decision::NotApplicable)))
        .build();

    assert!(matches!(result, Err(GatewayError::Authz(AuthzError::Config(_)))));
}

#[tokio::test]
async fn test_local_evaluator_bypass() {
    let config = ConfigLoader::new()
        .with_pairs([("pep.authz_service_uri", AUTHZ)])
        .unwrap()
        .load()
        .unwrap();

    let clock = Arc::new(ManualClock::default());
    let stub = stub(&clock, StubReply::Decisions(vec![Decision::Deny]));
    let evaluator = Arc::new(FixedEvaluator::new(Decision::NotApplicable));
    let gateway = Gateway::builder(config)
        .transport(as_transport(&stub))
        .evaluator(Arc::clone(&evaluator) as Arc<dyn custos::authz::LocalPolicyEvaluator>)
        .build()
        .unwrap();

    let enforcement = gateway.authorize(ALICE, "/public").await;
    assert_eq!(enforcement.outcome, EnforcementOutcome::Allow);
    assert_eq!(evaluator.evaluations(), 1);
    assert_eq!(stub.call_count(), 0);
}

#[tokio::test]
async fn test_resolve_requires_pip() {
    let config = ConfigLoader::new()
        .with_pairs([("pep.authz_service_uri", AUTHZ)])
        .unwrap()
        .load()
        .unwrap();
    let clock = Arc::new(ManualClock::default());
    let gateway = Gateway::builder(config)
        .transport(as_transport(&stub(&clock, StubReply::Values(vec![]))))
        .build()
        .unwrap();

    let err = gateway.resolve(ALICE, EMAIL, URI_FORMAT).await.unwrap_err();
    assert!(matches!(err, AuthzError::Config(_)));
}

#[tokio::test]
async fn test_missing_mapping_file_fails_build() {
    let config = ConfigLoader::new()
        .with_pairs([
            ("pep.authz_service_uri", AUTHZ),
            ("pip.enabled", "true"),
            ("pip.mapping_file", "/nonexistent/attributes.map"),
        ])
        .unwrap()
        .load()
        .unwrap();
    let clock = Arc::new(ManualClock::default());
    let result = Gateway::builder(config)
        .transport(as_transport(&stub(&clock, StubReply::Values(vec![]))))
        .build();

    assert!(matches!(result, Err(GatewayError::Authz(_))));
}

#[tokio::test]
async fn test_attribute_cache_survives_restart() {
    let mapping = mapping_file(&format!(
        "# attribute authorities\n{EMAIL}, https://aa.example/attributes\n"
    ));
    let data_dir = TempDir::new().unwrap();
    let pairs = [
        ("pep.authz_service_uri", AUTHZ.to_string()),
        ("pip.enabled", "true".to_string()),
        ("pip.mapping_file", mapping.path().display().to_string()),
        ("pip.cache_data_dir", data_dir.path().display().to_string()),
        ("pip.query.issuer_name", "gateway-pip".to_string()),
    ];

    let clock = Arc::new(ManualClock::default());
    let authority = stub(&clock, StubReply::Values(vec!["alice@example.org".to_string()]));
    let authz = stub(&clock, StubReply::Decisions(vec![Decision::Permit]));

    let config = ConfigLoader::new().with_pairs(pairs.clone()).unwrap().load().unwrap();
    let gateway = Gateway::builder(config)
        .transport(as_transport(&authz))
        .attribute_transport(as_transport(&authority))
        .clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .build()
        .unwrap();

    let values = gateway.resolve(ALICE, EMAIL, URI_FORMAT).await.unwrap();
    assert_eq!(values, vec![AttributeValue::from("alice@example.org")]);

    let calls = authority.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "https://aa.example/attributes");
    assert_eq!(calls[0].1.issuer.value, "gateway-pip");
    assert_eq!(authz.call_count(), 0);

    let err = gateway
        .resolve(ALICE, "urn:esg:unmapped", URI_FORMAT)
        .await
        .unwrap_err();
    assert!(err.is_no_mapping());

    gateway.shutdown();

    // A restarted gateway answers from the persisted cache.
    authority.set_reply(StubReply::Fail(TransportError::connection(
        "https://aa.example/attributes",
        "connection refused",
    )));
    let config = ConfigLoader::new().with_pairs(pairs).unwrap().load().unwrap();
    let gateway = Gateway::builder(config)
        .transport(as_transport(&authz))
        .attribute_transport(as_transport(&authority))
        .clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .build()
        .unwrap();

    let values = gateway.resolve(ALICE, EMAIL, URI_FORMAT).await.unwrap();
    assert_eq!(values, vec![AttributeValue::from("alice@example.org")]);
    assert_eq!(authority.call_count(), 1);
}

#[tokio::test]
async fn test_reload_mapping_from_file() {
    let mut mapping = mapping_file(&format!("{EMAIL},https://aa-one.example/\n"));
    let config = ConfigLoader::new()
        .with_pairs([
            ("pep.authz_service_uri", AUTHZ.to_string()),
            ("pip.enabled", "true".to_string()),
            ("pip.cache_sessions", "false".to_string()),
            ("pip.mapping_file", mapping.path().display().to_string()),
        ])
        .unwrap()
        .load()
        .unwrap();

    let clock = Arc::new(ManualClock::default());
    let authority = stub(&clock, StubReply::Values(vec!["a@example.org".to_string()]));
    let gateway = Gateway::builder(config)
        .transport(as_transport(&authority))
        .build()
        .unwrap();

    gateway.resolve(ALICE, EMAIL, URI_FORMAT).await.unwrap();

    mapping.as_file_mut().set_len(0).unwrap();
    std::io::Seek::rewind(mapping.as_file_mut()).unwrap();
    writeln!(mapping, "{EMAIL},https://aa-two.example/").unwrap();
    gateway.reload_mapping().unwrap();

    gateway.resolve(ALICE, EMAIL, URI_FORMAT).await.unwrap();

    let endpoints: Vec<String> = authority.calls().into_iter().map(|(e, _)| e).collect();
    assert_eq!(endpoints, vec!["https://aa-one.example/", "https://aa-two.example/"]);
}
