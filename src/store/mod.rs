//! Contract and deployment storage
//!
//! The services only talk to these traits. [`InMemoryStore`] implements both and
//! can persist itself as a JSON snapshot.

mod memory;

use std::collections::BTreeSet;

use crate::contract::{ContractKey, ContractRole, Deployment, MessageContract, NewContract};
use crate::error::StoreError;

pub use memory::InMemoryStore;

pub trait ContractStore: Send + Sync {
    /// Active contracts of one app version
    fn find_active_contracts(&self, app_name: &str, app_version: &str) -> Result<Vec<MessageContract>, StoreError>;

    /// Names of apps with an active contract for `(message_type, topic, role)`, any version
    fn apps_with_role(&self, message_type: &str, topic: &str, role: ContractRole)
        -> Result<BTreeSet<String>, StoreError>;

    /// Active contracts of one app version for `(message_type, topic, role)`, any message type version
    fn find_contracts_with_role(
        &self,
        app_name: &str,
        app_version: &str,
        message_type: &str,
        topic: &str,
        role: ContractRole,
    ) -> Result<Vec<MessageContract>, StoreError>;

    /// Replace the contracts of an app version with `contracts`, atomically.
    ///
    /// Without a transaction id every active contract of the app version is removed.
    /// With one, contracts of other transactions (and untagged ones) are removed, then
    /// contracts of the same transaction that duplicate an incoming one. The batch is
    /// inserted last. Returns the inserted contracts.
    fn replace_contracts(
        &self,
        app_name: &str,
        app_version: &str,
        transaction_id: Option<&str>,
        contracts: Vec<NewContract>,
    ) -> Result<Vec<MessageContract>, StoreError>;

    /// Soft delete the active contracts matching `key`. Returns how many were deleted.
    fn soft_delete_contract(&self, key: &ContractKey) -> Result<usize, StoreError>;

    fn has_active_contracts(&self, app_name: &str, app_version: &str) -> Result<bool, StoreError>;

    fn all_active_contracts(&self) -> Result<Vec<MessageContract>, StoreError>;

    /// Active contracts of the app versions named by `deployments`
    fn contracts_deployed_on(&self, deployments: &[Deployment]) -> Result<Vec<MessageContract>, StoreError>;
}

pub trait DeploymentStore: Send + Sync {
    /// Version of the most recent deployment of `app_name` on `environment`
    fn current_version(&self, app_name: &str, environment: &str) -> Result<Option<String>, StoreError>;

    fn record_deployment(&self, app_name: &str, app_version: &str, environment: &str)
        -> Result<Deployment, StoreError>;

    /// Delete every deployment of `app_name` on `environment`. Returns how many were deleted.
    fn delete_deployment(&self, app_name: &str, environment: &str) -> Result<usize, StoreError>;

    /// The `limit` most recent deployments, newest first
    fn recent_deployments(&self, limit: usize) -> Result<Vec<Deployment>, StoreError>;

    /// Most recent deployment per app and environment
    fn newest_deployments(&self) -> Result<Vec<Deployment>, StoreError>;
}
