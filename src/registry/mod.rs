//! Message type registry
//!
//! A registry is a git repository of message type descriptors and Avro IDL
//! schemas. [`MessageTypeRegistry`] clones one into a temporary workspace and
//! resolves `(message type, version)` pairs at a branch or commit to the JSON
//! protocol document of their value schema. The workspace lives exactly as long
//! as the handle.

pub mod auth;
pub mod descriptor;
mod git;
pub mod locations;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use git2::{Oid, Repository};
use tempfile::TempDir;
use tracing::{debug, error, info};

use crate::config::{RegistryConfig, RepositoryType};
use crate::error::RegistryError;
use crate::idl::IdlLoader;

pub use auth::{CredentialProvider, Credentials, GitHubAppCredentials};
pub use descriptor::{MessageCategory, MessageTypeDescriptor, MessageTypeVersion};
pub use locations::SchemaLocations;

/// A cloned registry. Dropping or closing it deletes the workspace.
pub struct MessageTypeRegistry {
    url: String,
    // declared before the workspace so the repository is released first
    repo: Repository,
    default_head: Option<Oid>,
    workspace: TempDir,
}

impl std::fmt::Debug for MessageTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageTypeRegistry")
            .field("url", &self.url)
            .field("workspace", &self.workspace.path())
            .finish_non_exhaustive()
    }
}

impl MessageTypeRegistry {
    /// Clone the registry at `url` into a fresh workspace
    pub fn open(url: &str, credentials: Option<Arc<dyn CredentialProvider>>) -> Result<Self, RegistryError> {
        let workspace = tempfile::Builder::new().prefix("message-type-registry").tempdir()?;
        info!(url, workspace = %workspace.path().display(), "cloning message type registry");

        // on failure the workspace is dropped, and with it the partial clone
        let repo = git::clone_repository(url, workspace.path(), credentials.as_ref()).map_err(|source| {
            RegistryError::CloneFailed {
                url: url.to_string(),
                source,
            }
        })?;
        let default_head = git::head_commit(&repo);

        Ok(Self {
            url: url.to_string(),
            repo,
            default_head,
            workspace,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    /// Descriptors at the revision currently checked out
    pub fn descriptors(&self) -> Vec<MessageTypeDescriptor> {
        descriptor::scan(self.workspace.path())
    }

    /// Check out `commit` (or `branch`) and return the value schema of `message_type` at `version`
    /// as a JSON protocol document
    pub fn resolve_schema(
        &self,
        branch: Option<&str>,
        commit: Option<&str>,
        message_type: &str,
        version: &str,
    ) -> Result<String, RegistryError> {
        info!(url = %self.url, message_type, version, "loading schema");
        git::checkout(&self.repo, branch, commit, self.default_head).map_err(|source| {
            RegistryError::CheckoutFailed {
                url: self.url.clone(),
                branch: branch.map(String::from),
                commit: commit.map(String::from),
                source,
            }
        })?;

        let descriptors = self.descriptors();
        let descriptor = descriptors
            .iter()
            .find(|d| d.name == message_type)
            .ok_or_else(|| RegistryError::MessageTypeNotFound {
                url: self.url.clone(),
                name: message_type.to_string(),
                suggestion: closest_name(&descriptors, message_type),
            })?;
        let type_version = descriptor
            .find_version(version)
            .ok_or_else(|| RegistryError::MessageTypeVersionNotFound {
                url: self.url.clone(),
                name: message_type.to_string(),
                version: version.to_string(),
            })?;

        let locations = &descriptor.locations;
        debug!(
            message_type_dir = %locations.message_type_dir.display(),
            system_common_dir = %locations.system_common_dir.display(),
            root_common_dir = %locations.root_common_dir.display(),
            "loading schema files"
        );
        let file = locations.find_schema_file(&type_version.value_schema)?;
        let protocol = IdlLoader::new(locations.search_path())
            .load(&file)
            .map_err(|source| RegistryError::SchemaLoadingFailed { file, source })?;
        Ok(protocol.to_string())
    }

    /// Delete the workspace
    pub fn close(self) -> Result<(), RegistryError> {
        let Self { url, repo, workspace, .. } = self;
        drop(repo);
        let path = workspace.path().to_path_buf();
        info!(url = %url, workspace = %path.display(), "deleting registry workspace");
        workspace.close().map_err(|e| {
            error!(workspace = %path.display(), error = %e, "failed to delete registry workspace");
            RegistryError::Workspace(e)
        })
    }
}

fn closest_name(descriptors: &[MessageTypeDescriptor], name: &str) -> Option<String> {
    let matcher = SkimMatcherV2::default();
    descriptors
        .iter()
        .filter_map(|d| matcher.fuzzy_match(&d.name, name).map(|score| (score, &d.name)))
        .max_by_key(|(score, _)| *score)
        .map(|(_, candidate)| candidate.clone())
}

/// One schema to resolve from a registry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaRequest {
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub message_type: String,
    pub version: String,
}

/// Resolves schemas in batches, one registry at a time
pub trait SchemaResolver: Send + Sync {
    /// Resolve every request against `registry_url`. Results are in request order.
    fn resolve_batch(&self, registry_url: &str, requests: &[SchemaRequest]) -> Result<Vec<String>, RegistryError>;
}

/// Opens registries with the credentials configured for their URL
#[derive(Default)]
pub struct RegistryFactory {
    credentials: HashMap<String, Arc<dyn CredentialProvider>>,
}

impl RegistryFactory {
    /// Build credential providers for every configured repository
    pub fn new(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let mut credentials: HashMap<String, Arc<dyn CredentialProvider>> = HashMap::new();
        for repository in &config.repositories {
            match repository.kind {
                RepositoryType::Github => {
                    let provider = GitHubAppCredentials::from_parameters(&repository.uri, &repository.parameters)?;
                    debug!(uri = %repository.uri, "registered GitHub app credentials");
                    credentials.insert(repository.uri.clone(), Arc::new(provider));
                }
                RepositoryType::Bitbucket | RepositoryType::Local => {}
            }
        }
        Ok(Self { credentials })
    }

    pub fn open(&self, url: &str) -> Result<MessageTypeRegistry, RegistryError> {
        MessageTypeRegistry::open(url, self.credentials.get(url).cloned())
    }
}

impl SchemaResolver for RegistryFactory {
    fn resolve_batch(&self, registry_url: &str, requests: &[SchemaRequest]) -> Result<Vec<String>, RegistryError> {
        let registry = self.open(registry_url)?;
        // an early return drops the handle, which removes the workspace
        let schemas = requests
            .iter()
            .map(|request| {
                registry.resolve_schema(
                    request.branch.as_deref(),
                    request.commit.as_deref(),
                    &request.message_type,
                    &request.version,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        registry.close()?;
        Ok(schemas)
    }
}
