//! Registry resolution against local git repositories

mod common;

use message_contracts::error::RegistryError;
use message_contracts::registry::{MessageCategory, RegistryFactory, SchemaRequest, SchemaResolver};
use serde_json::Value;

use common::{COMMAND, EVENT};

fn type_names(schema: &str) -> Vec<String> {
    let protocol: Value = serde_json::from_str(schema).unwrap();
    protocol["types"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| format!("{}.{}", t["namespace"].as_str().unwrap(), t["name"].as_str().unwrap()))
        .collect()
}

fn field_names(schema: &str) -> Vec<String> {
    let protocol: Value = serde_json::from_str(schema).unwrap();
    let event = protocol["types"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == EVENT)
        .unwrap()
        .clone();
    event["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_resolve_with_layered_imports() {
    let fixture = common::registry();
    let registry = RegistryFactory::default().open(&fixture.url()).unwrap();

    let schema = registry.resolve_schema(Some("master"), None, EVENT, "1.0.0").unwrap();
    let protocol: Value = serde_json::from_str(&schema).unwrap();
    assert_eq!(protocol["protocol"], "ActivZoneEnteredEventProtocol");
    assert_eq!(protocol["namespace"], "ch.activ.event");
    assert_eq!(
        type_names(&schema),
        vec![
            "ch.admin.common.Identity",
            "ch.activ.common.ZoneRef",
            "ch.activ.event.ActivZoneEnteredEvent"
        ]
    );
    assert_eq!(field_names(&schema), vec!["identity", "zone", "comment"]);

    registry.close().unwrap();
}

#[test]
fn test_schema_file_from_system_common() {
    let fixture = common::registry();
    let registry = RegistryFactory::default().open(&fixture.url()).unwrap();

    let schema = registry.resolve_schema(None, None, EVENT, "1.1.0").unwrap();
    assert_eq!(field_names(&schema), vec!["identity", "zoneId"]);
}

#[test]
fn test_malformed_descriptor_is_skipped() {
    let fixture = common::registry();
    let registry = RegistryFactory::default().open(&fixture.url()).unwrap();

    let descriptors = registry.descriptors();
    let names: Vec<_> = descriptors.iter().map(|d| (d.name.as_str(), d.category)).collect();
    assert_eq!(
        names,
        vec![(EVENT, MessageCategory::Event), (COMMAND, MessageCategory::Command)]
    );
}

#[test]
fn test_branch_and_commit_selection() {
    let fixture = common::registry();
    let registry = RegistryFactory::default().open(&fixture.url()).unwrap();

    let err = registry.resolve_schema(Some("master"), None, EVENT, "2.0.0").unwrap_err();
    assert!(matches!(err, RegistryError::MessageTypeVersionNotFound { ref version, .. } if version == "2.0.0"));

    let schema = registry.resolve_schema(Some("feature"), None, EVENT, "2.0.0").unwrap();
    assert_eq!(field_names(&schema), vec!["identity", "area"]);

    // a pinned commit wins over the branch
    let feature = fixture.feature.to_string();
    let schema = registry.resolve_schema(Some("master"), Some(&feature), EVENT, "2.0.0").unwrap();
    assert_eq!(field_names(&schema), vec!["identity", "area"]);

    // HEAD means the branch
    let master = fixture.master.to_string();
    assert!(registry.resolve_schema(Some("master"), Some("HEAD"), EVENT, "2.0.0").is_err());
    assert!(registry.resolve_schema(None, Some(&master), EVENT, "1.0.0").is_ok());

    // no branch and no commit restores the default head
    assert!(registry.resolve_schema(None, None, EVENT, "2.0.0").is_err());
}

#[test]
fn test_unknown_type_branch_and_commit() {
    let fixture = common::registry();
    let registry = RegistryFactory::default().open(&fixture.url()).unwrap();

    let err = registry.resolve_schema(None, None, "ActivZoneEnteredEvnt", "1.0.0").unwrap_err();
    match err {
        RegistryError::MessageTypeNotFound { name, suggestion, .. } => {
            assert_eq!(name, "ActivZoneEnteredEvnt");
            assert_eq!(suggestion.as_deref(), Some(EVENT));
        }
        other => panic!("Expected MessageTypeNotFound, got {:?}", other),
    }

    let err = registry.resolve_schema(Some("no-such-branch"), None, EVENT, "1.0.0").unwrap_err();
    assert!(matches!(err, RegistryError::CheckoutFailed { branch: Some(ref b), .. } if b == "no-such-branch"));
    assert!(err.to_string().contains("no-such-branch"));

    let err = registry
        .resolve_schema(None, Some("0123456789abcdef0123456789abcdef01234567"), EVENT, "1.0.0")
        .unwrap_err();
    assert!(matches!(err, RegistryError::CheckoutFailed { commit: Some(_), .. }));

    let err = registry.resolve_schema(None, None, COMMAND, "1.0.0").unwrap_err();
    match err {
        RegistryError::SchemaNotFound { schema, .. } => assert_eq!(schema, "Missing.avdl"),
        other => panic!("Expected SchemaNotFound, got {:?}", other),
    }
}

#[test]
fn test_clone_failure() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no-registry-here");
    let err = RegistryFactory::default().open(&missing.to_string_lossy()).unwrap_err();
    assert!(matches!(err, RegistryError::CloneFailed { .. }));
}

#[test]
fn test_workspace_removed_on_close_and_drop() {
    let fixture = common::registry();
    let factory = RegistryFactory::default();

    let registry = factory.open(&fixture.url()).unwrap();
    let workspace = registry.workspace().to_path_buf();
    assert!(workspace.join("descriptor").is_dir());
    registry.close().unwrap();
    assert!(!workspace.exists());

    let registry = factory.open(&fixture.url()).unwrap();
    let workspace = registry.workspace().to_path_buf();
    assert!(registry.resolve_schema(None, None, "Unknown", "1.0.0").is_err());
    drop(registry);
    assert!(!workspace.exists());
}

#[test]
fn test_resolve_batch_keeps_request_order() {
    let fixture = common::registry();
    let requests = vec![
        SchemaRequest {
            branch: Some("feature".into()),
            commit: None,
            message_type: EVENT.into(),
            version: "2.0.0".into(),
        },
        SchemaRequest {
            branch: Some("master".into()),
            commit: None,
            message_type: EVENT.into(),
            version: "1.0.0".into(),
        },
    ];

    let schemas = RegistryFactory::default().resolve_batch(&fixture.url(), &requests).unwrap();
    assert_eq!(schemas.len(), 2);
    assert_eq!(field_names(&schemas[0]), vec!["identity", "area"]);
    assert_eq!(field_names(&schemas[1]), vec!["identity", "zone", "comment"]);
}
