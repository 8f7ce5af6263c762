//! Error types for contract management, registry resolution and compatibility checks

use std::path::PathBuf;

use thiserror::Error;

use crate::contract::{ContractId, ContractState};

/// Result type for contract operations
pub type Result<T> = std::result::Result<T, ContractError>;

/// Top-level error returned by the services
#[derive(Error, Debug)]
pub enum ContractError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("No schema available for {app_name}:{app_version} message type {message_type}:{message_type_version}")]
    SchemaUnavailable {
        app_name: String,
        app_version: String,
        message_type: String,
        message_type_version: String,
    },

    #[error("Registry {url} resolved {resolved} of {requested} requested schemas")]
    IncompleteResolution {
        url: String,
        requested: usize,
        resolved: usize,
    },
}

/// Message type registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Cannot clone message type registry {url}: {source}")]
    CloneFailed {
        url: String,
        #[source]
        source: git2::Error,
    },

    #[error("Failed to checkout branch {} or commit {} in registry {url}: {source}",
        .branch.as_deref().unwrap_or("<none>"), .commit.as_deref().unwrap_or("<none>"))]
    CheckoutFailed {
        url: String,
        branch: Option<String>,
        commit: Option<String>,
        #[source]
        source: git2::Error,
    },

    #[error("Message type directory {} does not contain a JSON descriptor", .path.display())]
    MissingDescriptor { path: PathBuf },

    #[error("Message type directory {} contains {count} JSON descriptors, expected exactly one", .path.display())]
    AmbiguousDescriptor { path: PathBuf, count: usize },

    #[error("Failed to parse message type descriptor {}: {reason}", .path.display())]
    DescriptorParsingFailed { path: PathBuf, reason: String },

    #[error("Message type {name} not found in message type registry {url}{}",
        .suggestion.as_ref().map(|s| format!(" (did you mean {s}?)")).unwrap_or_default())]
    MessageTypeNotFound {
        url: String,
        name: String,
        suggestion: Option<String>,
    },

    #[error("Version {version} for message type {name} not found in message type descriptor of registry {url}")]
    MessageTypeVersionNotFound {
        url: String,
        name: String,
        version: String,
    },

    #[error("Cannot find avro schema {schema} at {} or {} or {}",
        .message_type_dir.display(), .system_common_dir.display(), .root_common_dir.display())]
    SchemaNotFound {
        schema: String,
        message_type_dir: PathBuf,
        system_common_dir: PathBuf,
        root_common_dir: PathBuf,
    },

    #[error("Failed to load schema from file {}: {source}", .file.display())]
    SchemaLoadingFailed {
        file: PathBuf,
        #[source]
        source: IdlError,
    },

    #[error("Registry workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("Invalid registry configuration for {url}: {reason}")]
    InvalidConfiguration { url: String, reason: String },
}

/// Avro IDL parse errors
#[derive(Error, Debug)]
pub enum IdlError {
    #[error("{}:{line}:{column}: {message}", .file.display())]
    Syntax {
        file: PathBuf,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Cannot resolve import {import} from {}", .from.display())]
    ImportNotFound { import: String, from: PathBuf },

    #[error("Undefined type {name} referenced in {}", .file.display())]
    UndefinedType { name: String, file: PathBuf },

    #[error("Type {name} is defined more than once")]
    DuplicateType { name: String },

    #[error("Invalid imported schema {}: {reason}", .file.display())]
    InvalidImport { file: PathBuf, reason: String },

    #[error("IO error reading {}: {source}", .file.display())]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Schema compatibility validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid protocol document: {0}")]
    InvalidProtocol(String),

    #[error("Invalid avro schema in protocol document: {0}")]
    InvalidSchema(#[from] apache_avro::Error),

    #[error("Type {type_name} is not defined in protocol {protocol}")]
    TypeNotFound { type_name: String, protocol: String },
}

/// Contract and deployment store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Contract {id} cannot transition from {from:?}")]
    InvalidTransition { id: ContractId, from: ContractState },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
