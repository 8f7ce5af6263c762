//! Message contracts and deployments

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;

/// Opaque identity of a stored contract, assigned by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(pub u64);

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Role an application plays for a message type on a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractRole {
    Consumer,
    Producer,
}

impl ContractRole {
    pub fn opposite(self) -> Self {
        match self {
            ContractRole::Consumer => ContractRole::Producer,
            ContractRole::Producer => ContractRole::Consumer,
        }
    }

    /// Verb used in human readable reports
    pub fn verb(self) -> &'static str {
        match self {
            ContractRole::Consumer => "consuming",
            ContractRole::Producer => "producing",
        }
    }
}

impl fmt::Display for ContractRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractRole::Consumer => f.write_str("CONSUMER"),
            ContractRole::Producer => f.write_str("PRODUCER"),
        }
    }
}

/// Declared compatibility policy of a contract. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityMode {
    #[default]
    Backward,
    BackwardTransitive,
    Forward,
    ForwardTransitive,
    Full,
    FullTransitive,
    None,
}

/// Lifecycle state of a stored contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContractState {
    #[default]
    Active,
    /// Soft deleted by an operator, kept for history
    Deleted { deleted_at: DateTime<Utc> },
    /// Replaced by a later upload, dropped from the store
    Removed,
}

/// A lifecycle transition applied to an active contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    SoftDelete { at: DateTime<Utc> },
    Remove,
}

/// The tuple identifying one participation of an app version in a message exchange
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContractKey {
    pub app_name: String,
    pub app_version: String,
    pub message_type: String,
    pub message_type_version: String,
    pub topic: String,
    pub role: ContractRole,
}

/// A contract as uploaded, before it is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContract {
    pub message_type: String,
    pub message_type_version: String,
    pub topic: String,
    pub role: ContractRole,
    pub registry_url: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub compatibility_mode: CompatibilityMode,
    #[serde(default)]
    pub encryption_key_id: Option<String>,
    /// Filled in by schema resolution during upload, never taken from the client
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub resolved_schema: Option<String>,
}

impl NewContract {
    pub fn new(
        message_type: impl Into<String>,
        message_type_version: impl Into<String>,
        topic: impl Into<String>,
        role: ContractRole,
        registry_url: impl Into<String>,
    ) -> Self {
        Self {
            message_type: message_type.into(),
            message_type_version: message_type_version.into(),
            topic: topic.into(),
            role,
            registry_url: registry_url.into(),
            branch: None,
            commit_hash: None,
            compatibility_mode: CompatibilityMode::default(),
            encryption_key_id: None,
            resolved_schema: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_commit(mut self, commit_hash: impl Into<String>) -> Self {
        self.commit_hash = Some(commit_hash.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.resolved_schema = Some(schema.into());
        self
    }

    pub fn key(&self, app_name: &str, app_version: &str) -> ContractKey {
        ContractKey {
            app_name: app_name.to_string(),
            app_version: app_version.to_string(),
            message_type: self.message_type.clone(),
            message_type_version: self.message_type_version.clone(),
            topic: self.topic.clone(),
            role: self.role,
        }
    }
}

/// A stored message contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContract {
    pub id: ContractId,
    pub app_name: String,
    pub app_version: String,
    pub message_type: String,
    pub message_type_version: String,
    pub topic: String,
    pub role: ContractRole,
    pub registry_url: String,
    pub branch: Option<String>,
    pub commit_hash: Option<String>,
    pub compatibility_mode: CompatibilityMode,
    pub encryption_key_id: Option<String>,
    pub resolved_schema: Option<String>,
    pub schema_checksum: Option<Checksum>,
    pub transaction_id: Option<String>,
    pub state: ContractState,
    pub created_at: DateTime<Utc>,
}

impl MessageContract {
    /// Build a stored contract from an uploaded one
    pub fn from_new(
        id: ContractId,
        app_name: &str,
        app_version: &str,
        transaction_id: Option<&str>,
        new: NewContract,
    ) -> Self {
        let schema_checksum = new.resolved_schema.as_deref().map(Checksum::of);
        Self {
            id,
            app_name: app_name.to_string(),
            app_version: app_version.to_string(),
            message_type: new.message_type,
            message_type_version: new.message_type_version,
            topic: new.topic,
            role: new.role,
            registry_url: new.registry_url,
            branch: new.branch,
            commit_hash: new.commit_hash,
            compatibility_mode: new.compatibility_mode,
            encryption_key_id: new.encryption_key_id,
            resolved_schema: new.resolved_schema,
            schema_checksum,
            transaction_id: transaction_id.map(String::from),
            state: ContractState::Active,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> ContractKey {
        ContractKey {
            app_name: self.app_name.clone(),
            app_version: self.app_version.clone(),
            message_type: self.message_type.clone(),
            message_type_version: self.message_type_version.clone(),
            topic: self.topic.clone(),
            role: self.role,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ContractState::Active
    }

    /// Whether the contract pins an exact registry revision
    pub fn references_specific_commit(&self) -> bool {
        self.commit_hash.is_some()
    }

    /// Apply a lifecycle transition. Only active contracts can transition.
    pub fn apply(&mut self, transition: Transition) -> Result<ContractState, crate::error::StoreError> {
        if !self.is_active() {
            return Err(crate::error::StoreError::InvalidTransition {
                id: self.id,
                from: self.state,
            });
        }
        self.state = match transition {
            Transition::SoftDelete { at } => ContractState::Deleted { deleted_at: at },
            Transition::Remove => ContractState::Removed,
        };
        Ok(self.state)
    }
}

/// A record that an app version is live on an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: u64,
    pub app_name: String,
    pub app_version: String,
    pub environment: String,
    pub created_at: DateTime<Utc>,
}
