//! Three-tier schema file lookup

use std::path::{Path, PathBuf};

use crate::error::RegistryError;

/// Directory holding schemas shared by a system, or by the whole registry
pub const COMMON_DIR: &str = "_common";

/// Where the schema files of one message type may live, in lookup order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaLocations {
    pub message_type_dir: PathBuf,
    pub system_common_dir: PathBuf,
    pub root_common_dir: PathBuf,
}

impl SchemaLocations {
    /// Derive the locations for `descriptor/<system>/<category>/<type>`
    pub fn for_message_type_dir(message_type_dir: &Path) -> Self {
        let system_dir = message_type_dir.ancestors().nth(2).unwrap_or(message_type_dir);
        let system_common_dir = system_dir.join(COMMON_DIR);
        let descriptor_dir = system_dir.parent().unwrap_or(system_dir);
        Self {
            message_type_dir: message_type_dir.to_path_buf(),
            system_common_dir,
            root_common_dir: descriptor_dir.join(COMMON_DIR),
        }
    }

    /// First existing `filename` in the message type dir, the system common dir, then the root common dir
    pub fn find_schema_file(&self, filename: &str) -> Result<PathBuf, RegistryError> {
        self.search_path()
            .into_iter()
            .map(|dir| dir.join(filename))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| RegistryError::SchemaNotFound {
                schema: filename.to_string(),
                message_type_dir: self.message_type_dir.clone(),
                system_common_dir: self.system_common_dir.clone(),
                root_common_dir: self.root_common_dir.clone(),
            })
    }

    /// Import search path for schemas of this message type
    pub fn search_path(&self) -> Vec<PathBuf> {
        vec![
            self.message_type_dir.clone(),
            self.system_common_dir.clone(),
            self.root_common_dir.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_locations_from_type_dir() {
        let locations = SchemaLocations::for_message_type_dir(Path::new("/repo/descriptor/activ/event/zoneevent"));
        assert_eq!(locations.system_common_dir, PathBuf::from("/repo/descriptor/activ/_common"));
        assert_eq!(locations.root_common_dir, PathBuf::from("/repo/descriptor/_common"));
    }

    #[test]
    fn test_lookup_order() {
        let dir = tempdir().unwrap();
        let type_dir = dir.path().join("descriptor/sys/event/ev");
        let locations = SchemaLocations::for_message_type_dir(&type_dir);
        fs::create_dir_all(&type_dir).unwrap();
        fs::create_dir_all(&locations.system_common_dir).unwrap();
        fs::create_dir_all(&locations.root_common_dir).unwrap();

        fs::write(locations.root_common_dir.join("A.avdl"), "root").unwrap();
        assert_eq!(
            locations.find_schema_file("A.avdl").unwrap(),
            locations.root_common_dir.join("A.avdl")
        );

        fs::write(locations.system_common_dir.join("A.avdl"), "system").unwrap();
        assert_eq!(
            locations.find_schema_file("A.avdl").unwrap(),
            locations.system_common_dir.join("A.avdl")
        );

        fs::write(type_dir.join("A.avdl"), "own").unwrap();
        assert_eq!(locations.find_schema_file("A.avdl").unwrap(), type_dir.join("A.avdl"));
    }

    #[test]
    fn test_missing_schema_names_all_locations() {
        let dir = tempdir().unwrap();
        let locations = SchemaLocations::for_message_type_dir(&dir.path().join("descriptor/sys/command/cmd"));
        let message = locations.find_schema_file("Missing.avdl").unwrap_err().to_string();
        assert!(message.starts_with("Cannot find avro schema Missing.avdl at"));
        assert!(message.contains("sys/_common"));
        assert!(message.contains("descriptor/_common"));
    }
}
