//! Human readable rendering of incompatibilities

use super::validator::SchemaIncompatibility;
use super::{Incompatibility, Interaction};

pub const NO_INCOMPATIBILITIES: &str = "No incompatible interactions found";

const NONE_MARKER: &str = "<none>";

/// Render one block per incompatibility
pub fn render(incompatibilities: &[Incompatibility]) -> String {
    if incompatibilities.is_empty() {
        return NO_INCOMPATIBILITIES.to_string();
    }
    incompatibilities
        .iter()
        .map(describe_incompatibility)
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe_incompatibility(incompatibility: &Incompatibility) -> String {
    let schema_incompatibilities = incompatibility
        .schema_incompatibilities
        .iter()
        .map(|s| format!("  - {}", describe_schema_incompatibility(s)))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "***\n{}, which is incompatible with:\n- {}\n  List of schema incompatibilities:\n{}",
        describe_interaction(&incompatibility.source),
        describe_interaction(&incompatibility.target),
        schema_incompatibilities
    )
}

fn describe_interaction(interaction: &Interaction) -> String {
    format!(
        "App {}:{} is {} message type {}:{} on topic {}",
        interaction.app_name,
        interaction.app_version,
        interaction.role.verb(),
        interaction.message_type,
        interaction.message_type_version,
        interaction.topic
    )
}

fn describe_schema_incompatibility(incompatibility: &SchemaIncompatibility) -> String {
    format!(
        "{} at {}: {}\n    Schema Fragments (check type name for incompatible type):\n    - Reader: {}\n    - Writer: {}",
        incompatibility.kind,
        incompatibility.location,
        incompatibility.message,
        incompatibility.reader_fragment.as_deref().unwrap_or(NONE_MARKER),
        incompatibility.writer_fragment.as_deref().unwrap_or(NONE_MARKER)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compatibility::validator::IncompatibilityKind;
    use crate::contract::ContractRole;

    fn interaction(app: &str, version: &str, role: ContractRole) -> Interaction {
        Interaction {
            app_name: app.into(),
            app_version: version.into(),
            message_type: "messageType".into(),
            message_type_version: "1.0.0".into(),
            topic: "topic".into(),
            role,
        }
    }

    fn schema_incompatibility(kind: IncompatibilityKind, location: &str, message: &str) -> SchemaIncompatibility {
        SchemaIncompatibility {
            kind,
            message: message.into(),
            location: location.into(),
            reader_fragment: Some("\"int\"".into()),
            writer_fragment: None,
        }
    }

    #[test]
    fn test_no_incompatibilities() {
        assert_eq!(render(&[]), "No incompatible interactions found");
    }

    #[test]
    fn test_render_blocks() {
        let incompatibilities = vec![
            Incompatibility {
                source: interaction("app", "1", ContractRole::Consumer),
                target: interaction("other", "2", ContractRole::Producer),
                schema_incompatibilities: vec![
                    schema_incompatibility(IncompatibilityKind::TypeMismatch, "/test1", "description1"),
                    schema_incompatibility(IncompatibilityKind::NameMismatch, "/test2", "description2"),
                ],
            },
            Incompatibility {
                source: interaction("app", "1", ContractRole::Producer),
                target: interaction("third", "3", ContractRole::Consumer),
                schema_incompatibilities: vec![schema_incompatibility(
                    IncompatibilityKind::MissingUnionBranch,
                    "/",
                    "description3",
                )],
            },
        ];

        let expected = "\
***
App app:1 is consuming message type messageType:1.0.0 on topic topic, which is incompatible with:
- App other:2 is producing message type messageType:1.0.0 on topic topic
  List of schema incompatibilities:
  - TYPE_MISMATCH at /test1: description1
    Schema Fragments (check type name for incompatible type):
    - Reader: \"int\"
    - Writer: <none>
  - NAME_MISMATCH at /test2: description2
    Schema Fragments (check type name for incompatible type):
    - Reader: \"int\"
    - Writer: <none>
***
App app:1 is producing message type messageType:1.0.0 on topic topic, which is incompatible with:
- App third:3 is consuming message type messageType:1.0.0 on topic topic
  List of schema incompatibilities:
  - MISSING_UNION_BRANCH at /: description3
    Schema Fragments (check type name for incompatible type):
    - Reader: \"int\"
    - Writer: <none>";

        assert_eq!(render(&incompatibilities), expected);
    }
}
