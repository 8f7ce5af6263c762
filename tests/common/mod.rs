//! Throw-away message type registries backed by local git repositories

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use git2::{Commit, IndexAddOption, Oid, Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;

pub const EVENT: &str = "ActivZoneEnteredEvent";
pub const COMMAND: &str = "ActivStartCommand";

/// A local registry with a `master` branch and a `feature` branch adding version 2.0.0
pub struct RegistryFixture {
    pub dir: TempDir,
    pub master: Oid,
    pub feature: Oid,
}

impl RegistryFixture {
    pub fn url(&self) -> String {
        self.dir.path().to_string_lossy().into_owned()
    }
}

fn write(root: &Path, path: &str, content: &str) {
    let file = root.join(path);
    fs::create_dir_all(file.parent().unwrap()).unwrap();
    fs::write(file, content).unwrap();
}

fn commit_all(repo: &Repository, update_ref: &str, message: &str, parents: &[&Commit]) -> Oid {
    let mut index = repo.index().unwrap();
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let signature = Signature::now("Registry", "registry@example.com").unwrap();
    repo.commit(Some(update_ref), &signature, &signature, message, &tree, parents)
        .unwrap()
}

const DESCRIPTOR_V1: &str = r#"{
    "eventName": "ActivZoneEnteredEvent",
    "definingSystem": "activ",
    "description": "A person entered a zone",
    "versions": [
        { "version": "1.0.0", "valueSchema": "ActivZoneEnteredEvent_v1.0.0.avdl" },
        { "version": "1.1.0", "keySchema": "Key.avdl", "valueSchema": "ActivZoneEnteredEventShared.avdl" }
    ]
}"#;

const DESCRIPTOR_V2: &str = r#"{
    "eventName": "ActivZoneEnteredEvent",
    "versions": [
        { "version": "1.0.0", "valueSchema": "ActivZoneEnteredEvent_v1.0.0.avdl" },
        { "version": "1.1.0", "valueSchema": "ActivZoneEnteredEventShared.avdl" },
        { "version": "2.0.0", "valueSchema": "ActivZoneEnteredEvent_v2.0.0.avdl" }
    ]
}"#;

const EVENT_V1: &str = r#"
@namespace("ch.activ.event")
protocol ActivZoneEnteredEventProtocol {
    import idl "Common.avdl";
    import idl "ActivCommon.avdl";

    /** A person entered a zone */
    record ActivZoneEnteredEvent {
        ch.admin.common.Identity identity;
        ch.activ.common.ZoneRef zone;
        union { null, string } comment = null;
    }
}
"#;

// renames `zone`, which readers of 1.0.0 cannot cope with
const EVENT_V2: &str = r#"
@namespace("ch.activ.event")
protocol ActivZoneEnteredEventProtocol {
    import idl "Common.avdl";
    import idl "ActivCommon.avdl";

    record ActivZoneEnteredEvent {
        ch.admin.common.Identity identity;
        ch.activ.common.ZoneRef area;
    }
}
"#;

const EVENT_SHARED: &str = r#"
@namespace("ch.activ.event")
protocol ActivZoneEnteredEventProtocol {
    import idl "Common.avdl";

    record ActivZoneEnteredEvent {
        ch.admin.common.Identity identity;
        string zoneId;
    }
}
"#;

const ROOT_COMMON: &str = r#"
@namespace("ch.admin.common")
protocol Common {
    record Identity {
        string id;
        timestamp_ms created;
    }
}
"#;

const SYSTEM_COMMON: &str = r#"
@namespace("ch.activ.common")
protocol ActivCommon {
    record ZoneRef {
        string zoneId;
    }
}
"#;

/// Build the registry repository
pub fn registry() -> RegistryFixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let mut options = RepositoryInitOptions::new();
    options.initial_head("master");
    let repo = Repository::init_opts(root, &options).unwrap();

    write(root, "descriptor/_common/Common.avdl", ROOT_COMMON);
    write(root, "descriptor/activ/_common/ActivCommon.avdl", SYSTEM_COMMON);
    write(root, "descriptor/activ/_common/ActivZoneEnteredEventShared.avdl", EVENT_SHARED);
    write(
        root,
        "descriptor/activ/event/activzoneenteredevent/ActivZoneEnteredEvent.json",
        DESCRIPTOR_V1,
    );
    write(
        root,
        "descriptor/activ/event/activzoneenteredevent/ActivZoneEnteredEvent_v1.0.0.avdl",
        EVENT_V1,
    );
    write(root, "descriptor/activ/event/brokenevent/BrokenEvent.json", "{ this is not json");
    write(
        root,
        "descriptor/activ/command/activstartcommand/ActivStartCommand.json",
        r#"{"commandName": "ActivStartCommand", "versions": [{"version": "1.0.0", "valueSchema": "Missing.avdl"}]}"#,
    );
    let master = commit_all(&repo, "HEAD", "Add ActivZoneEnteredEvent", &[]);

    write(
        root,
        "descriptor/activ/event/activzoneenteredevent/ActivZoneEnteredEvent.json",
        DESCRIPTOR_V2,
    );
    write(
        root,
        "descriptor/activ/event/activzoneenteredevent/ActivZoneEnteredEvent_v2.0.0.avdl",
        EVENT_V2,
    );
    let parent = repo.find_commit(master).unwrap();
    let feature = commit_all(&repo, "refs/heads/feature", "Add ActivZoneEnteredEvent 2.0.0", &[&parent]);

    drop(parent);
    drop(repo);
    RegistryFixture { dir, master, feature }
}
