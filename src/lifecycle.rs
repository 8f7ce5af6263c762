//! Contract upload and deletion

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::contract::{ContractKey, ContractRole, MessageContract, NewContract};
use crate::error::{ContractError, RegistryError, Result};
use crate::registry::{SchemaRequest, SchemaResolver};
use crate::store::{ContractStore, DeploymentStore};

pub struct ContractService {
    contracts: Arc<dyn ContractStore>,
    deployments: Arc<dyn DeploymentStore>,
    resolver: Arc<dyn SchemaResolver>,
}

impl ContractService {
    pub fn new(
        contracts: Arc<dyn ContractStore>,
        deployments: Arc<dyn DeploymentStore>,
        resolver: Arc<dyn SchemaResolver>,
    ) -> Self {
        Self {
            contracts,
            deployments,
            resolver,
        }
    }

    /// Resolve the schemas of `contracts` and store them as the contracts of the app version.
    ///
    /// Duplicates within the batch are collapsed. Schemas are resolved before the store is
    /// touched, so a resolution failure keeps the previous contracts.
    pub fn upload_contracts(
        &self,
        app_name: &str,
        app_version: &str,
        transaction_id: Option<&str>,
        contracts: Vec<NewContract>,
    ) -> Result<Vec<MessageContract>> {
        let mut contracts = dedupe(app_name, app_version, contracts);
        info!(
            app_name,
            app_version,
            transaction_id = transaction_id.unwrap_or("<none>"),
            contracts = contracts.len(),
            "uploading contracts"
        );

        self.resolve_schemas(&mut contracts)?;
        let stored = self
            .contracts
            .replace_contracts(app_name, app_version, transaction_id, contracts)?;
        for contract in &stored {
            debug!(
                contract = %contract.id,
                message_type = %contract.message_type,
                checksum = contract.schema_checksum.as_ref().map_or("-", |c| c.short()),
                "stored contract"
            );
        }
        Ok(stored)
    }

    /// Resolve every schema from its registry, one registry clone per distinct registry URL
    fn resolve_schemas(&self, contracts: &mut [NewContract]) -> Result<()> {
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, contract) in contracts.iter().enumerate() {
            groups.entry(contract.registry_url.clone()).or_default().push(index);
        }
        if groups.is_empty() {
            return Ok(());
        }

        let batches: Vec<(&String, Vec<usize>, Vec<SchemaRequest>)> = groups
            .iter()
            .map(|(url, indices)| {
                let requests = indices
                    .iter()
                    .map(|&index| {
                        let contract = &contracts[index];
                        SchemaRequest {
                            branch: contract.branch.clone(),
                            commit: contract.commit_hash.clone(),
                            message_type: contract.message_type.clone(),
                            version: contract.message_type_version.clone(),
                        }
                    })
                    .collect();
                (url, indices.clone(), requests)
            })
            .collect();

        let resolver = &self.resolver;
        let results: Vec<(&String, Vec<usize>, std::result::Result<Vec<String>, RegistryError>)> =
            std::thread::scope(|scope| {
                let handles: Vec<_> = batches
                    .into_iter()
                    .map(|(url, indices, requests)| {
                        scope.spawn(move || {
                            debug!(url = %url, schemas = requests.len(), "resolving schemas");
                            (url, indices, resolver.resolve_batch(url, &requests))
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                    .collect()
            });

        for (url, indices, schemas) in results {
            let schemas = schemas?;
            if schemas.len() != indices.len() {
                return Err(ContractError::IncompleteResolution {
                    url: url.clone(),
                    requested: indices.len(),
                    resolved: schemas.len(),
                });
            }
            for (index, schema) in indices.into_iter().zip(schemas) {
                contracts[index].resolved_schema = Some(schema);
            }
        }
        Ok(())
    }

    /// Soft delete the active contracts matching the given tuple. Returns how many were deleted.
    pub fn delete_contract(
        &self,
        app_name: &str,
        app_version: &str,
        message_type: &str,
        message_type_version: &str,
        topic: &str,
        role: ContractRole,
    ) -> Result<usize> {
        let key = ContractKey {
            app_name: app_name.to_string(),
            app_version: app_version.to_string(),
            message_type: message_type.to_string(),
            message_type_version: message_type_version.to_string(),
            topic: topic.to_string(),
            role,
        };
        let deleted = self.contracts.soft_delete_contract(&key)?;
        info!(app_name, app_version, message_type, message_type_version, topic, %role, deleted, "deleted contract");
        Ok(deleted)
    }

    pub fn all_contracts(&self) -> Result<Vec<MessageContract>> {
        Ok(self.contracts.all_active_contracts()?)
    }

    /// Contracts of the app versions currently deployed on `environment`
    pub fn contracts_deployed_on(&self, environment: &str) -> Result<Vec<MessageContract>> {
        let deployed: Vec<_> = self
            .deployments
            .newest_deployments()?
            .into_iter()
            .filter(|d| d.environment == environment)
            .collect();
        Ok(self.contracts.contracts_deployed_on(&deployed)?)
    }
}

fn dedupe(app_name: &str, app_version: &str, contracts: Vec<NewContract>) -> Vec<NewContract> {
    let mut seen = HashSet::new();
    contracts
        .into_iter()
        .filter(|c| seen.insert(c.key(app_name, app_version)))
        .collect()
}
