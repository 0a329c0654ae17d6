//! Configuration loading and aggregated startup validation.

mod common;

use common::*;
use serde_json::Value;
use std::sync::Arc;
use tessera_auth::InMemoryDirectory;
use tessera_saml::attributes::NAMEID_FORMAT_UNSPECIFIED;
use tessera_saml::{
    Binding, EngineBootstrap, EngineSettings, FixedClock, InMemoryDispatcher, SigningCredentials,
    TrustStore,
};

fn idp_pems() -> (String, String) {
    let creds = SigningCredentials::self_signed("tessera idp", 365).unwrap();
    let key = String::from_utf8(creds.private_key().private_key_to_pem_pkcs8().unwrap()).unwrap();
    let cert = String::from_utf8(creds.certificate().to_pem().unwrap()).unwrap();
    (key, cert)
}

#[test]
fn test_fixture_metadata_loads() {
    let store = TrustStore::from_json(METADATA_JSON).unwrap();
    assert_eq!(store.len(), 1);

    let rp = store.lookup(DEV_THY_COM).unwrap();
    assert_eq!(rp.entity_id(), DEV_THY_COM);
    assert!(rp.requires_signed_requests());
    assert_eq!(rp.name_id_format(), NAMEID_FORMAT_UNSPECIFIED);
    assert_eq!(rp.signing_keys().count(), 1);
    assert!(rp.encryption_key().is_some());

    let acs = rp.resolve_acs(None, None).unwrap();
    assert_eq!(acs.location, DEV_THY_COM_ACS);
    assert_eq!(acs.binding, Binding::HttpPost);
    assert_eq!(acs.index, 1);
}

#[test]
fn test_lookup_is_case_sensitive() {
    let store = TrustStore::from_json(METADATA_JSON).unwrap();
    assert!(store.lookup(&DEV_THY_COM.to_uppercase()).is_err());
}

#[test]
fn test_signed_requests_without_signing_key_are_rejected() {
    let mut doc: Value = serde_json::from_str(METADATA_JSON).unwrap();
    let keys = doc[DEV_THY_COM]["keys"].as_array_mut().unwrap();
    keys.retain(|k| k["signing"] != Value::Bool(true));

    let err = TrustStore::from_json(&doc.to_string()).unwrap_err();
    assert!(err.problems().iter().any(|p| p.contains(DEV_THY_COM)));
}

#[test]
fn test_fixture_directory_rejects_duplicate_uid() {
    let err = InMemoryDirectory::from_json(DIRECTORY_JSON, &fast_hasher()).unwrap_err();
    let problems = err.problems();
    assert!(problems
        .iter()
        .any(|p| p.contains("user3") && p.contains("already used")));
}

#[test]
fn test_directory_without_duplicate_loads_three_users() {
    let directory =
        InMemoryDirectory::from_json(&directory_json_without_duplicate_uid(), &fast_hasher())
            .unwrap();
    assert_eq!(directory.len(), 3);
}

#[test]
fn test_bootstrap_reports_duplicate_uid_alongside_other_problems() {
    let settings = EngineSettings {
        assertion_lifetime_secs: 0,
        ..EngineSettings::new(IDP_ENTITY_ID)
    };
    let err = EngineBootstrap::new(settings)
        .metadata_json(METADATA_JSON)
        .directory_json(DIRECTORY_JSON)
        .password_hasher(fast_hasher())
        .build(
            Arc::new(InMemoryDispatcher::new()),
            Arc::new(FixedClock::new(scenario_instant())),
        )
        .unwrap_err();

    let problems = err.problems();
    assert!(problems
        .iter()
        .any(|p| p.starts_with("settings: assertion_lifetime_secs")));
    assert!(problems.iter().any(|p| p.starts_with("directory: ")));
    assert!(problems.iter().any(|p| p.starts_with("signing: ")));
    assert!(!problems.iter().any(|p| p.starts_with("metadata: ")));
}

#[tokio::test]
async fn test_bootstrapped_engine_serves_fixture_relying_party() {
    let keys = RpKeys::signing_only();
    let (key, cert) = idp_pems();
    let dispatcher = Arc::new(InMemoryDispatcher::new());
    let clock = Arc::new(FixedClock::new(scenario_instant()));

    let engine = EngineBootstrap::new(EngineSettings::new(IDP_ENTITY_ID))
        .metadata_json(metadata_json_with(&keys))
        .directory_json(directory_json_without_duplicate_uid())
        .signing_pem(key, cert)
        .password_hasher(fast_hasher())
        .build(dispatcher.clone(), clock.clone())
        .unwrap();

    let xml = authn_request_xml("_req_boot", DEV_THY_COM, scenario_instant());
    let report = engine
        .handle_authn_request(
            &redirect(&xml, None, Some(&keys.signing)),
            &tessera_saml::LoginCredentials::new("user2", "user2"),
        )
        .await;

    assert!(report.is_dispatched(), "unexpected failure: {:?}", report.error);
    assert_eq!(dispatcher.delivered().await.len(), 1);
}
