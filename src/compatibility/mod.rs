//! Deployment-time compatibility checks
//!
//! For every contract of an app version, [`CompatibilityService`] finds the apps
//! playing the opposite role for the same message type and topic, looks up the
//! version each of them currently runs on the target environment, and validates
//! the reader schema against the writer schema of every matching contract pair.
//!
//! Missing counterparts never block a deployment. Schema resolution failures do:
//! they abort the check with an error instead of producing a result.

pub mod report;
pub mod validator;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::contract::{ContractId, ContractRole, MessageContract};
use crate::error::{ContractError, Result};
use crate::registry::{SchemaRequest, SchemaResolver};
use crate::store::{ContractStore, DeploymentStore};

pub use validator::{IncompatibilityKind, SchemaCompatibilityValidator, SchemaIncompatibility};

/// One side of a message exchange
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub app_name: String,
    pub app_version: String,
    pub message_type: String,
    pub message_type_version: String,
    pub topic: String,
    pub role: ContractRole,
}

impl From<&MessageContract> for Interaction {
    fn from(contract: &MessageContract) -> Self {
        Self {
            app_name: contract.app_name.clone(),
            app_version: contract.app_version.clone(),
            message_type: contract.message_type.clone(),
            message_type_version: contract.message_type_version.clone(),
            topic: contract.topic.clone(),
            role: contract.role,
        }
    }
}

/// An interaction whose schemas are not compatible
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Incompatibility {
    /// The side owned by the checked app version
    pub source: Interaction,
    /// The deployed counterpart
    pub target: Interaction,
    pub schema_incompatibilities: Vec<SchemaIncompatibility>,
}

/// Outcome of a compatibility check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityResult {
    pub compatible: bool,
    pub interactions: Vec<Interaction>,
    pub incompatibilities: Vec<Incompatibility>,
}

impl CompatibilityResult {
    fn new(interactions: Vec<Interaction>, incompatibilities: Vec<Incompatibility>) -> Self {
        Self {
            compatible: incompatibilities.is_empty(),
            interactions,
            incompatibilities,
        }
    }

    /// Rendered diagnostics
    pub fn message(&self) -> String {
        report::render(&self.incompatibilities)
    }
}

pub struct CompatibilityService {
    contracts: Arc<dyn ContractStore>,
    deployments: Arc<dyn DeploymentStore>,
    resolver: Option<Arc<dyn SchemaResolver>>,
    validator: SchemaCompatibilityValidator,
}

impl CompatibilityService {
    pub fn new(contracts: Arc<dyn ContractStore>, deployments: Arc<dyn DeploymentStore>) -> Self {
        Self {
            contracts,
            deployments,
            resolver: None,
            validator: SchemaCompatibilityValidator::new(),
        }
    }

    /// Resolve schemas of contracts stored without one
    pub fn with_resolver(mut self, resolver: Arc<dyn SchemaResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Check `app_name` at `app_version` against the counterparts deployed on `environment`
    pub fn check_compatibility(
        &self,
        app_name: &str,
        app_version: &str,
        environment: &str,
    ) -> Result<CompatibilityResult> {
        let mut contracts = self.contracts.find_active_contracts(app_name, app_version)?;
        if contracts.is_empty() {
            info!(app_name, app_version, "no contracts, compatible by default");
            return Ok(CompatibilityResult::new(Vec::new(), Vec::new()));
        }
        contracts.sort_by(|a, b| {
            (&a.message_type, &a.message_type_version, &a.topic, a.role)
                .cmp(&(&b.message_type, &b.message_type_version, &b.topic, b.role))
        });

        let mut check = Check {
            service: self,
            schemas: HashMap::new(),
            interactions: Vec::new(),
            seen: HashSet::new(),
            incompatibilities: Vec::new(),
        };
        for contract in &contracts {
            check.contract(contract, environment)?;
        }

        let result = CompatibilityResult::new(check.interactions, check.incompatibilities);
        info!(
            app_name,
            app_version,
            environment,
            compatible = result.compatible,
            interactions = result.interactions.len(),
            incompatibilities = result.incompatibilities.len(),
            "compatibility check finished"
        );
        Ok(result)
    }

    fn resolve(&self, contract: &MessageContract) -> Result<String> {
        if let Some(schema) = &contract.resolved_schema {
            if contract.schema_checksum.as_ref().is_some_and(|c| !c.verify(schema)) {
                warn!(contract = %contract.id, "stored schema does not match its checksum");
            }
            return Ok(schema.clone());
        }
        let unavailable = || ContractError::SchemaUnavailable {
            app_name: contract.app_name.clone(),
            app_version: contract.app_version.clone(),
            message_type: contract.message_type.clone(),
            message_type_version: contract.message_type_version.clone(),
        };
        let resolver = self.resolver.as_ref().ok_or_else(unavailable)?;
        debug!(contract = %contract.id, registry = %contract.registry_url, "resolving schema on demand");
        let request = SchemaRequest {
            branch: contract.branch.clone(),
            commit: contract.commit_hash.clone(),
            message_type: contract.message_type.clone(),
            version: contract.message_type_version.clone(),
        };
        let mut schemas = resolver.resolve_batch(&contract.registry_url, &[request])?;
        schemas.pop().ok_or_else(unavailable)
    }
}

/// State of one compatibility check
struct Check<'s> {
    service: &'s CompatibilityService,
    /// Schemas resolved during this check
    schemas: HashMap<ContractId, String>,
    interactions: Vec<Interaction>,
    seen: HashSet<Interaction>,
    incompatibilities: Vec<Incompatibility>,
}

impl Check<'_> {
    fn contract(&mut self, contract: &MessageContract, environment: &str) -> Result<()> {
        let service = self.service;
        let store = &service.contracts;
        let counter_role = contract.role.opposite();
        let apps = store.apps_with_role(&contract.message_type, &contract.topic, counter_role)?;
        trace!(contract = %contract.id, counterparts = apps.len(), "counterpart apps");

        for app in &apps {
            let Some(deployed_version) = service.deployments.current_version(app, environment)? else {
                debug!(app = %app, environment, "counterpart not deployed");
                continue;
            };
            let mut counterparts = store.find_contracts_with_role(
                app,
                &deployed_version,
                &contract.message_type,
                &contract.topic,
                counter_role,
            )?;
            counterparts.sort_by(|a, b| a.message_type_version.cmp(&b.message_type_version));

            for counterpart in &counterparts {
                let target = Interaction::from(counterpart);
                if self.seen.insert(target.clone()) {
                    self.interactions.push(target.clone());
                }

                let (reader, writer) = match contract.role {
                    ContractRole::Consumer => (contract, counterpart),
                    ContractRole::Producer => (counterpart, contract),
                };
                let found = self.validate(reader, writer)?;
                if !found.is_empty() {
                    debug!(
                        source = %contract.id,
                        target = %counterpart.id,
                        count = found.len(),
                        "schema incompatibilities found"
                    );
                    self.incompatibilities.push(Incompatibility {
                        source: Interaction::from(contract),
                        target,
                        schema_incompatibilities: found,
                    });
                }
            }
        }
        Ok(())
    }

    fn schema(&mut self, contract: &MessageContract) -> Result<String> {
        if let Some(schema) = self.schemas.get(&contract.id) {
            return Ok(schema.clone());
        }
        let schema = self.service.resolve(contract)?;
        self.schemas.insert(contract.id, schema.clone());
        Ok(schema)
    }

    fn validate(&mut self, reader: &MessageContract, writer: &MessageContract) -> Result<Vec<SchemaIncompatibility>> {
        let reader_schema = self.schema(reader)?;
        let writer_schema = self.schema(writer)?;
        let found = self.service.validator.validate(
            &reader_schema,
            &reader.message_type,
            &writer_schema,
            &writer.message_type,
        )?;
        Ok(found)
    }
}
