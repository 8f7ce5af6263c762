//! Deployment notifications and history

use std::sync::Arc;

use tracing::{debug, info};

use crate::contract::Deployment;
use crate::error::Result;
use crate::store::{ContractStore, DeploymentStore};

/// How many deployments [`DeploymentService::recent_deployments`] returns
pub const RECENT_DEPLOYMENTS: usize = 10;

pub struct DeploymentService {
    contracts: Arc<dyn ContractStore>,
    deployments: Arc<dyn DeploymentStore>,
}

impl DeploymentService {
    pub fn new(contracts: Arc<dyn ContractStore>, deployments: Arc<dyn DeploymentStore>) -> Self {
        Self { contracts, deployments }
    }

    /// Record that `app_name` at `app_version` runs on `environment`.
    ///
    /// App versions without active contracts are ignored and yield `None`.
    pub fn register_deployment(
        &self,
        app_name: &str,
        app_version: &str,
        environment: &str,
    ) -> Result<Option<Deployment>> {
        if !self.contracts.has_active_contracts(app_name, app_version)? {
            debug!(app_name, app_version, environment, "no contracts, deployment ignored");
            return Ok(None);
        }
        let deployment = self.deployments.record_deployment(app_name, app_version, environment)?;
        info!(app_name, app_version, environment, id = deployment.id, "registered deployment");
        Ok(Some(deployment))
    }

    /// Forget every deployment of `app_name` on `environment`
    pub fn delete_deployment(&self, app_name: &str, environment: &str) -> Result<usize> {
        let deleted = self.deployments.delete_deployment(app_name, environment)?;
        info!(app_name, environment, deleted, "deleted deployments");
        Ok(deleted)
    }

    pub fn recent_deployments(&self) -> Result<Vec<Deployment>> {
        Ok(self.deployments.recent_deployments(RECENT_DEPLOYMENTS)?)
    }

    /// Most recent deployment per app and environment
    pub fn newest_deployments(&self) -> Result<Vec<Deployment>> {
        Ok(self.deployments.newest_deployments()?)
    }
}
