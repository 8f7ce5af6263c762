//! In-memory store with JSON snapshots

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ContractStore, DeploymentStore};
use crate::contract::{
    ContractId, ContractKey, ContractRole, ContractState, Deployment, MessageContract, NewContract, Transition,
};
use crate::error::StoreError;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct State {
    next_contract_id: u64,
    next_deployment_id: u64,
    contracts: Vec<MessageContract>,
    deployments: Vec<Deployment>,
}

impl State {
    fn active(&self) -> impl Iterator<Item = &MessageContract> {
        self.contracts.iter().filter(|c| c.is_active())
    }

    fn is_version(contract: &MessageContract, app_name: &str, app_version: &str) -> bool {
        contract.app_name == app_name && contract.app_version == app_version
    }

    /// Remove active contracts matching `predicate`
    fn remove_where(&mut self, predicate: impl Fn(&MessageContract) -> bool) -> Result<usize, StoreError> {
        let mut removed = 0;
        for contract in self.contracts.iter_mut().filter(|c| c.is_active() && predicate(c)) {
            contract.apply(Transition::Remove)?;
            removed += 1;
        }
        self.contracts.retain(|c| c.state != ContractState::Removed);
        Ok(removed)
    }
}

/// Contracts and deployments behind one lock
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot, or start empty when the file does not exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no state file, starting empty");
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)?;
        let state: State = serde_json::from_str(&content)?;
        info!(
            path = %path.display(),
            contracts = state.contracts.len(),
            deployments = state.deployments.len(),
            "loaded state"
        );
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Write a snapshot
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(&*self.read()?)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        debug!(path = %path.display(), "saved state");
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl ContractStore for InMemoryStore {
    fn find_active_contracts(&self, app_name: &str, app_version: &str) -> Result<Vec<MessageContract>, StoreError> {
        let state = self.read()?;
        Ok(state
            .active()
            .filter(|c| State::is_version(c, app_name, app_version))
            .cloned()
            .collect())
    }

    fn apps_with_role(
        &self,
        message_type: &str,
        topic: &str,
        role: ContractRole,
    ) -> Result<BTreeSet<String>, StoreError> {
        let state = self.read()?;
        Ok(state
            .active()
            .filter(|c| c.message_type == message_type && c.topic == topic && c.role == role)
            .map(|c| c.app_name.clone())
            .collect())
    }

    fn find_contracts_with_role(
        &self,
        app_name: &str,
        app_version: &str,
        message_type: &str,
        topic: &str,
        role: ContractRole,
    ) -> Result<Vec<MessageContract>, StoreError> {
        let state = self.read()?;
        Ok(state
            .active()
            .filter(|c| State::is_version(c, app_name, app_version))
            .filter(|c| c.message_type == message_type && c.topic == topic && c.role == role)
            .cloned()
            .collect())
    }

    fn replace_contracts(
        &self,
        app_name: &str,
        app_version: &str,
        transaction_id: Option<&str>,
        contracts: Vec<NewContract>,
    ) -> Result<Vec<MessageContract>, StoreError> {
        let mut state = self.write()?;

        let removed = match transaction_id {
            None => state.remove_where(|c| State::is_version(c, app_name, app_version))?,
            Some(transaction) => {
                let other_transactions = state.remove_where(|c| {
                    State::is_version(c, app_name, app_version) && c.transaction_id.as_deref() != Some(transaction)
                })?;
                let incoming: HashSet<ContractKey> = contracts.iter().map(|c| c.key(app_name, app_version)).collect();
                let duplicates = state.remove_where(|c| {
                    State::is_version(c, app_name, app_version) && incoming.contains(&c.key())
                })?;
                other_transactions + duplicates
            }
        };

        let mut inserted = Vec::with_capacity(contracts.len());
        for contract in contracts {
            state.next_contract_id += 1;
            let id = ContractId(state.next_contract_id);
            let stored = MessageContract::from_new(id, app_name, app_version, transaction_id, contract);
            state.contracts.push(stored.clone());
            inserted.push(stored);
        }

        debug!(
            app_name,
            app_version,
            transaction_id = transaction_id.unwrap_or("<none>"),
            removed,
            inserted = inserted.len(),
            "replaced contracts"
        );
        Ok(inserted)
    }

    fn soft_delete_contract(&self, key: &ContractKey) -> Result<usize, StoreError> {
        let mut state = self.write()?;
        let at = Utc::now();
        let mut deleted = 0;
        for contract in state.contracts.iter_mut().filter(|c| c.is_active() && &c.key() == key) {
            contract.apply(Transition::SoftDelete { at })?;
            deleted += 1;
        }
        Ok(deleted)
    }

    fn has_active_contracts(&self, app_name: &str, app_version: &str) -> Result<bool, StoreError> {
        let state = self.read()?;
        let found = state.active().any(|c| State::is_version(c, app_name, app_version));
        Ok(found)
    }

    fn all_active_contracts(&self) -> Result<Vec<MessageContract>, StoreError> {
        let state = self.read()?;
        Ok(state.active().cloned().collect())
    }

    fn contracts_deployed_on(&self, deployments: &[Deployment]) -> Result<Vec<MessageContract>, StoreError> {
        let state = self.read()?;
        Ok(state
            .active()
            .filter(|c| deployments.iter().any(|d| State::is_version(c, &d.app_name, &d.app_version)))
            .cloned()
            .collect())
    }
}

impl DeploymentStore for InMemoryStore {
    fn current_version(&self, app_name: &str, environment: &str) -> Result<Option<String>, StoreError> {
        let state = self.read()?;
        Ok(state
            .deployments
            .iter()
            .filter(|d| d.app_name == app_name && d.environment == environment)
            .max_by_key(|d| (d.created_at, d.id))
            .map(|d| d.app_version.clone()))
    }

    fn record_deployment(
        &self,
        app_name: &str,
        app_version: &str,
        environment: &str,
    ) -> Result<Deployment, StoreError> {
        let mut state = self.write()?;
        state.next_deployment_id += 1;
        let deployment = Deployment {
            id: state.next_deployment_id,
            app_name: app_name.to_string(),
            app_version: app_version.to_string(),
            environment: environment.to_string(),
            created_at: Utc::now(),
        };
        state.deployments.push(deployment.clone());
        Ok(deployment)
    }

    fn delete_deployment(&self, app_name: &str, environment: &str) -> Result<usize, StoreError> {
        let mut state = self.write()?;
        let before = state.deployments.len();
        state
            .deployments
            .retain(|d| !(d.app_name == app_name && d.environment == environment));
        Ok(before - state.deployments.len())
    }

    fn recent_deployments(&self, limit: usize) -> Result<Vec<Deployment>, StoreError> {
        let state = self.read()?;
        let mut deployments = state.deployments.clone();
        deployments.sort_by_key(|d| std::cmp::Reverse((d.created_at, d.id)));
        deployments.truncate(limit);
        Ok(deployments)
    }

    fn newest_deployments(&self) -> Result<Vec<Deployment>, StoreError> {
        let state = self.read()?;
        let mut newest: BTreeMap<(&str, &str), &Deployment> = BTreeMap::new();
        for deployment in &state.deployments {
            let key = (deployment.app_name.as_str(), deployment.environment.as_str());
            let replace = newest
                .get(&key)
                .map_or(true, |current| (deployment.created_at, deployment.id) > (current.created_at, current.id));
            if replace {
                newest.insert(key, deployment);
            }
        }
        Ok(newest.into_values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn contract(message_type: &str, role: ContractRole) -> NewContract {
        NewContract::new(message_type, "1.0.0", "topic", role, "https://example.com/registry.git")
    }

    fn types(contracts: &[MessageContract]) -> Vec<&str> {
        let mut names: Vec<&str> = contracts.iter().map(|c| c.message_type.as_str()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_untagged_upload_replaces_everything() {
        let store = InMemoryStore::new();
        store
            .replace_contracts("app", "1", None, vec![contract("A", ContractRole::Producer)])
            .unwrap();
        store
            .replace_contracts("app", "1", None, vec![contract("B", ContractRole::Producer)])
            .unwrap();

        let active = store.find_active_contracts("app", "1").unwrap();
        assert_eq!(types(&active), vec!["B"]);
    }

    #[test]
    fn test_same_transaction_accumulates_without_duplicates() {
        let store = InMemoryStore::new();
        store
            .replace_contracts("app", "1", Some("tx"), vec![contract("A", ContractRole::Producer)])
            .unwrap();
        store
            .replace_contracts("app", "1", Some("tx"), vec![contract("B", ContractRole::Consumer)])
            .unwrap();
        store
            .replace_contracts("app", "1", Some("tx"), vec![contract("B", ContractRole::Consumer)])
            .unwrap();

        let active = store.find_active_contracts("app", "1").unwrap();
        assert_eq!(types(&active), vec!["A", "B"]);
    }

    #[test]
    fn test_new_transaction_removes_other_transactions() {
        let store = InMemoryStore::new();
        store
            .replace_contracts("app", "1", None, vec![contract("Untagged", ContractRole::Producer)])
            .unwrap();
        store
            .replace_contracts("app", "1", Some("tx1"), vec![contract("A", ContractRole::Producer)])
            .unwrap();
        store
            .replace_contracts("app", "1", Some("tx2"), vec![contract("B", ContractRole::Producer)])
            .unwrap();

        let active = store.find_active_contracts("app", "1").unwrap();
        assert_eq!(types(&active), vec!["B"]);
        assert_eq!(active[0].transaction_id.as_deref(), Some("tx2"));
    }

    #[test]
    fn test_soft_delete_keeps_history() {
        let store = InMemoryStore::new();
        let inserted = store
            .replace_contracts("app", "1", None, vec![contract("A", ContractRole::Consumer)])
            .unwrap();

        assert_eq!(store.soft_delete_contract(&inserted[0].key()).unwrap(), 1);
        assert_eq!(store.soft_delete_contract(&inserted[0].key()).unwrap(), 0);
        assert!(!store.has_active_contracts("app", "1").unwrap());
        assert!(store.apps_with_role("A", "topic", ContractRole::Consumer).unwrap().is_empty());

        // a later upload removes only active contracts, the deleted one stays
        store.replace_contracts("app", "1", None, vec![]).unwrap();
        let state = store.read().unwrap();
        assert_eq!(state.contracts.len(), 1);
        assert!(matches!(state.contracts[0].state, ContractState::Deleted { .. }));
    }

    #[test]
    fn test_current_version_is_latest_deployment() {
        let store = InMemoryStore::new();
        store.record_deployment("app", "1", "prod").unwrap();
        store.record_deployment("app", "2", "prod").unwrap();
        store.record_deployment("app", "3", "test").unwrap();

        assert_eq!(store.current_version("app", "prod").unwrap().as_deref(), Some("2"));
        assert_eq!(store.current_version("app", "dev").unwrap(), None);

        let newest = store.newest_deployments().unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].app_version, "2");
        assert_eq!(newest[1].environment, "test");

        let recent = store.recent_deployments(2).unwrap();
        assert_eq!(recent.iter().map(|d| d.app_version.as_str()).collect::<Vec<_>>(), vec!["3", "2"]);

        assert_eq!(store.delete_deployment("app", "prod").unwrap(), 2);
        assert_eq!(store.current_version("app", "prod").unwrap(), None);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("contracts.json");

        let store = InMemoryStore::new();
        store
            .replace_contracts("app", "1", Some("tx"), vec![contract("A", ContractRole::Producer)])
            .unwrap();
        store.record_deployment("app", "1", "prod").unwrap();
        store.save(&path).unwrap();

        let loaded = InMemoryStore::open(&path).unwrap();
        assert_eq!(loaded.find_active_contracts("app", "1").unwrap().len(), 1);
        let deployed = loaded.contracts_deployed_on(&loaded.newest_deployments().unwrap()).unwrap();
        assert_eq!(types(&deployed), vec!["A"]);

        // ids continue after the loaded ones
        let next = loaded
            .replace_contracts("app", "2", None, vec![contract("B", ContractRole::Producer)])
            .unwrap();
        assert_eq!(next[0].id, ContractId(2));
    }
}
