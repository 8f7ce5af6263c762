//! Upload, deploy and check against a local registry

mod common;

use std::sync::Arc;

use message_contracts::compatibility::IncompatibilityKind;
use message_contracts::contract::ContractRole;
use message_contracts::{
    CompatibilityService, ContractError, ContractService, DeploymentService, DeploymentStore, InMemoryStore,
    NewContract, RegistryFactory,
};

use common::EVENT;

struct Services {
    store: Arc<InMemoryStore>,
    contracts: ContractService,
    deployments: DeploymentService,
    compatibility: CompatibilityService,
}

fn services() -> Services {
    let store = Arc::new(InMemoryStore::new());
    let factory = Arc::new(RegistryFactory::default());
    Services {
        contracts: ContractService::new(store.clone(), store.clone(), factory.clone()),
        deployments: DeploymentService::new(store.clone(), store.clone()),
        compatibility: CompatibilityService::new(store.clone(), store.clone()).with_resolver(factory),
        store,
    }
}

fn contract(url: &str, role: ContractRole, version: &str, branch: &str) -> NewContract {
    NewContract::new(EVENT, version, "activ-zone-events", role, url).with_branch(branch)
}

#[test]
fn test_compatible_producer_on_prod() {
    let fixture = common::registry();
    let url = fixture.url();
    let s = services();

    s.contracts
        .upload_contracts("c", "1.0", None, vec![contract(&url, ContractRole::Consumer, "1.0.0", "master")])
        .unwrap();
    s.contracts
        .upload_contracts("p", "2.0", None, vec![contract(&url, ContractRole::Producer, "1.0.0", "master")])
        .unwrap();
    s.deployments.register_deployment("c", "1.0", "PROD").unwrap().unwrap();
    s.deployments.register_deployment("p", "2.0", "PROD").unwrap().unwrap();

    let result = s.compatibility.check_compatibility("c", "1.0", "PROD").unwrap();
    assert!(result.compatible);
    assert_eq!(result.interactions.len(), 1);
    assert_eq!(result.interactions[0].app_name, "p");
    assert_eq!(result.interactions[0].app_version, "2.0");
    assert_eq!(result.message(), "No incompatible interactions found");

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["interactions"][0]["appName"], "p");
    assert_eq!(json["interactions"][0]["role"], "PRODUCER");
}

#[test]
fn test_incompatible_producer_on_prod() {
    let fixture = common::registry();
    let url = fixture.url();
    let s = services();

    s.contracts
        .upload_contracts("c", "1.0", None, vec![contract(&url, ContractRole::Consumer, "1.0.0", "master")])
        .unwrap();
    s.contracts
        .upload_contracts("p", "2.0", None, vec![contract(&url, ContractRole::Producer, "2.0.0", "feature")])
        .unwrap();
    s.deployments.register_deployment("p", "2.0", "PROD").unwrap().unwrap();

    let result = s.compatibility.check_compatibility("c", "1.0", "PROD").unwrap();
    assert!(!result.compatible);
    assert_eq!(result.incompatibilities.len(), 1);
    let incompatibility = &result.incompatibilities[0];
    assert_eq!(incompatibility.target.app_name, "p");
    assert_eq!(incompatibility.target.message_type_version, "2.0.0");
    let kinds: Vec<_> = incompatibility.schema_incompatibilities.iter().map(|s| s.kind).collect();
    assert_eq!(kinds, vec![IncompatibilityKind::ReaderFieldMissingDefaultValue]);
    assert_eq!(incompatibility.schema_incompatibilities[0].message, "zone");

    let message = result.message();
    assert!(message.starts_with("***\nApp c:1.0 is consuming message type ActivZoneEnteredEvent:1.0.0"));
    assert!(message.contains("- App p:2.0 is producing message type ActivZoneEnteredEvent:2.0.0"));
    assert!(message.contains("READER_FIELD_MISSING_DEFAULT_VALUE at /fields/1: zone"));

    // checking the producer finds the same pair, with the producer as source
    s.deployments.register_deployment("c", "1.0", "PROD").unwrap().unwrap();
    let result = s.compatibility.check_compatibility("p", "2.0", "PROD").unwrap();
    assert!(!result.compatible);
    assert_eq!(result.incompatibilities[0].source.app_name, "p");
}

#[test]
fn test_newer_deployment_replaces_counterpart_version() {
    let fixture = common::registry();
    let url = fixture.url();
    let s = services();

    s.contracts
        .upload_contracts("c", "1.0", None, vec![contract(&url, ContractRole::Consumer, "1.0.0", "master")])
        .unwrap();
    s.contracts
        .upload_contracts("p", "2.0", None, vec![contract(&url, ContractRole::Producer, "2.0.0", "feature")])
        .unwrap();
    s.contracts
        .upload_contracts("p", "1.5", None, vec![contract(&url, ContractRole::Producer, "1.0.0", "master")])
        .unwrap();

    s.deployments.register_deployment("p", "2.0", "PROD").unwrap();
    assert!(!s.compatibility.check_compatibility("c", "1.0", "PROD").unwrap().compatible);

    // rolled back
    s.deployments.register_deployment("p", "1.5", "PROD").unwrap();
    let result = s.compatibility.check_compatibility("c", "1.0", "PROD").unwrap();
    assert!(result.compatible);
    assert_eq!(result.interactions[0].app_version, "1.5");

    // other environments are unaffected
    let result = s.compatibility.check_compatibility("c", "1.0", "TEST").unwrap();
    assert!(result.compatible);
    assert!(result.interactions.is_empty());
}

#[test]
fn test_upload_failure_leaves_store_untouched() {
    let fixture = common::registry();
    let url = fixture.url();
    let s = services();

    s.contracts
        .upload_contracts("c", "1.0", Some("tx-1"), vec![contract(&url, ContractRole::Consumer, "1.0.0", "master")])
        .unwrap();
    let err = s
        .contracts
        .upload_contracts("c", "1.0", Some("tx-2"), vec![contract(&url, ContractRole::Consumer, "9.9.9", "master")])
        .unwrap_err();
    assert!(matches!(err, ContractError::Registry(_)));

    let active = s.contracts.all_contracts().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].transaction_id.as_deref(), Some("tx-1"));
    assert!(active[0].resolved_schema.is_some());
    assert!(s.store.newest_deployments().unwrap().is_empty());
}
