//! Message type descriptors
//!
//! A registry keeps one JSON descriptor per message type under
//! `descriptor/<system>/<event|command>/<type>/`. Descriptors that cannot be
//! read are skipped so one broken directory never hides the others.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};
use walkdir::WalkDir;

use super::locations::{SchemaLocations, COMMON_DIR};
use crate::error::RegistryError;

/// Category of a message type, which is also its directory name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageCategory {
    Event,
    Command,
}

impl MessageCategory {
    /// Lookup order for message type names
    pub const ALL: [MessageCategory; 2] = [MessageCategory::Event, MessageCategory::Command];

    pub fn subdir(self) -> &'static str {
        match self {
            MessageCategory::Event => "event",
            MessageCategory::Command => "command",
        }
    }
}

impl fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subdir())
    }
}

/// One published version of a message type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTypeVersion {
    pub version: String,
    #[serde(default)]
    pub key_schema: Option<String>,
    pub value_schema: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    message_type_name: Option<String>,
    event_name: Option<String>,
    command_name: Option<String>,
    #[serde(default)]
    versions: Option<Vec<MessageTypeVersion>>,
}

/// A parsed descriptor with the locations of its schema files
#[derive(Debug, Clone)]
pub struct MessageTypeDescriptor {
    pub name: String,
    pub category: MessageCategory,
    pub versions: Vec<MessageTypeVersion>,
    pub locations: SchemaLocations,
    pub file: PathBuf,
}

impl MessageTypeDescriptor {
    /// Read the single JSON descriptor of `message_type_dir`
    pub fn read(message_type_dir: &Path, category: MessageCategory) -> Result<Self, RegistryError> {
        let file = descriptor_file(message_type_dir)?;
        trace!(file = %file.display(), "loading message type descriptor");
        let parse_error = |reason: String| RegistryError::DescriptorParsingFailed {
            path: file.clone(),
            reason,
        };

        let content = fs::read_to_string(&file).map_err(|e| parse_error(e.to_string()))?;
        let raw: RawDescriptor = serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?;
        let legacy_name = match category {
            MessageCategory::Event => raw.event_name,
            MessageCategory::Command => raw.command_name,
        };
        let name = raw
            .message_type_name
            .or(legacy_name)
            .ok_or_else(|| parse_error("missing field `messageTypeName`".to_string()))?;

        Ok(Self {
            name,
            category,
            versions: raw.versions.unwrap_or_default(),
            locations: SchemaLocations::for_message_type_dir(message_type_dir),
            file,
        })
    }

    pub fn find_version(&self, version: &str) -> Option<&MessageTypeVersion> {
        self.versions.iter().find(|v| v.version == version)
    }
}

fn descriptor_file(message_type_dir: &Path) -> Result<PathBuf, RegistryError> {
    let mut candidates: Vec<PathBuf> = child_entries(message_type_dir)
        .into_iter()
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    match candidates.len() {
        0 => Err(RegistryError::MissingDescriptor {
            path: message_type_dir.to_path_buf(),
        }),
        1 => Ok(candidates.remove(0)),
        count => Err(RegistryError::AmbiguousDescriptor {
            path: message_type_dir.to_path_buf(),
            count,
        }),
    }
}

/// Immediate children of `dir`, sorted by file name. A missing directory has no children.
fn child_entries(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .collect()
}

/// All readable descriptors below `<root>/descriptor`, events before commands
pub fn scan(root: &Path) -> Vec<MessageTypeDescriptor> {
    let descriptor_dir = root.join("descriptor");
    if !descriptor_dir.is_dir() {
        warn!(dir = %descriptor_dir.display(), "registry has no descriptor directory");
        return Vec::new();
    }

    let systems: Vec<PathBuf> = child_entries(&descriptor_dir)
        .into_iter()
        .filter(|path| path.is_dir() && path.file_name().is_some_and(|name| name != COMMON_DIR))
        .collect();

    let mut descriptors = Vec::new();
    for category in MessageCategory::ALL {
        for system in &systems {
            let category_dir = system.join(category.subdir());
            for message_type_dir in child_entries(&category_dir) {
                if !message_type_dir.is_dir() {
                    continue;
                }
                match MessageTypeDescriptor::read(&message_type_dir, category) {
                    Ok(descriptor) => descriptors.push(descriptor),
                    Err(e) => {
                        warn!(dir = %message_type_dir.display(), error = %e, "skipping message type descriptor");
                    }
                }
            }
        }
    }
    descriptors
}
