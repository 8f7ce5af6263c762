//! Message Contracts CLI
//!
//! Uploads contracts, records deployments and checks whether an app version can
//! be deployed next to the counterparts already running on an environment.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use message_contracts::compatibility::SchemaCompatibilityValidator;
use message_contracts::contract::ContractRole;
use message_contracts::{
    CompatibilityService, ContractService, ContractsConfig, DeploymentService, InMemoryStore, NewContract,
    RegistryFactory,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "message-contracts")]
#[command(about = "Manage message contracts and check deployment compatibility")]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// State file, overriding the configured one
    #[arg(short, long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Role {
    Consumer,
    Producer,
}

impl From<Role> for ContractRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Consumer => ContractRole::Consumer,
            Role::Producer => ContractRole::Producer,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration file
    Init {
        #[arg(default_value = "contracts.toml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Resolve a message type schema from a registry
    Resolve {
        /// Registry clone URL
        #[arg(short, long)]
        registry: String,
        #[arg(short, long)]
        branch: Option<String>,
        #[arg(long)]
        commit: Option<String>,
        message_type: String,
        version: String,
    },

    /// Check two protocol documents for reader/writer compatibility
    Validate {
        /// Reader protocol JSON
        reader: PathBuf,
        /// Writer protocol JSON
        writer: PathBuf,
        /// Root type name, in both documents
        #[arg(short = 't', long)]
        type_name: String,
    },

    /// Upload the contracts of an app version (JSON array)
    Upload {
        #[arg(short, long)]
        app: String,
        #[arg(short = 'V', long)]
        version: String,
        #[arg(short, long)]
        transaction: Option<String>,
        file: PathBuf,
    },

    /// Soft delete one contract
    DeleteContract {
        #[arg(short, long)]
        app: String,
        #[arg(short = 'V', long)]
        version: String,
        #[arg(short, long)]
        message_type: String,
        #[arg(long)]
        message_type_version: String,
        #[arg(short, long)]
        topic: String,
        #[arg(short, long, value_enum)]
        role: Role,
    },

    /// Record a deployment
    Deploy {
        #[arg(short, long)]
        app: String,
        #[arg(short = 'V', long)]
        version: String,
        #[arg(short, long)]
        environment: String,
    },

    /// Delete the deployments of an app on an environment
    Undeploy {
        #[arg(short, long)]
        app: String,
        #[arg(short, long)]
        environment: String,
    },

    /// Check whether an app version can be deployed to an environment
    Check {
        #[arg(short, long)]
        app: String,
        #[arg(short = 'V', long)]
        version: String,
        #[arg(short, long)]
        environment: String,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List active contracts
    Contracts {
        /// Only contracts of the versions deployed on this environment
        #[arg(short, long)]
        environment: Option<String>,
    },

    /// List deployments
    Deployments {
        /// Newest deployment per app and environment instead of the recent history
        #[arg(long)]
        newest: bool,
    },
}

const EXIT_INCOMPATIBLE: i32 = 1;
const EXIT_ERROR: i32 = 2;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(EXIT_ERROR);
        }
    }
}

struct Services {
    store: Arc<InMemoryStore>,
    state_file: PathBuf,
    factory: Arc<RegistryFactory>,
}

impl Services {
    fn open(cli: &Cli) -> Result<Self> {
        let config = ContractsConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
        let state_file = cli.state.clone().unwrap_or_else(|| config.state_file());
        let store = InMemoryStore::open(&state_file)
            .with_context(|| format!("loading state from {}", state_file.display()))?;
        let factory = RegistryFactory::new(&config.registry).context("configuring registries")?;
        Ok(Self {
            store: Arc::new(store),
            state_file,
            factory: Arc::new(factory),
        })
    }

    fn contracts(&self) -> ContractService {
        ContractService::new(self.store.clone(), self.store.clone(), self.factory.clone())
    }

    fn deployments(&self) -> DeploymentService {
        DeploymentService::new(self.store.clone(), self.store.clone())
    }

    fn compatibility(&self) -> CompatibilityService {
        CompatibilityService::new(self.store.clone(), self.store.clone()).with_resolver(self.factory.clone())
    }

    fn save(&self) -> Result<()> {
        self.store
            .save(&self.state_file)
            .with_context(|| format!("saving state to {}", self.state_file.display()))
    }
}

fn run(cli: Cli) -> Result<i32> {
    if let Commands::Init { path, force } = &cli.command {
        if path.exists() && !force {
            anyhow::bail!("{} already exists, use --force to overwrite", path.display());
        }
        ContractsConfig::default()
            .save(path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("📝 Wrote {}", path.display());
        return Ok(0);
    }

    let services = Services::open(&cli)?;

    match cli.command {
        Commands::Init { .. } => {}

        Commands::Resolve {
            registry,
            branch,
            commit,
            message_type,
            version,
        } => {
            let registry = services.factory.open(&registry)?;
            let schema = registry.resolve_schema(branch.as_deref(), commit.as_deref(), &message_type, &version);
            registry.close()?;
            let schema: serde_json::Value = serde_json::from_str(&schema?)?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }

        Commands::Validate {
            reader,
            writer,
            type_name,
        } => {
            let reader_doc =
                fs::read_to_string(&reader).with_context(|| format!("reading {}", reader.display()))?;
            let writer_doc =
                fs::read_to_string(&writer).with_context(|| format!("reading {}", writer.display()))?;
            let found =
                SchemaCompatibilityValidator::new().validate(&reader_doc, &type_name, &writer_doc, &type_name)?;
            if found.is_empty() {
                println!("✅ Compatible");
                return Ok(0);
            }
            println!("❌ {} incompatibilities:", found.len());
            for incompatibility in &found {
                println!("  - {} at {}: {}", incompatibility.kind, incompatibility.location, incompatibility.message);
            }
            return Ok(EXIT_INCOMPATIBLE);
        }

        Commands::Upload {
            app,
            version,
            transaction,
            file,
        } => {
            let content = fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let contracts: Vec<NewContract> =
                serde_json::from_str(&content).with_context(|| format!("parsing {}", file.display()))?;
            let stored = services
                .contracts()
                .upload_contracts(&app, &version, transaction.as_deref(), contracts)?;
            services.save()?;
            println!("📦 Stored {} contracts for {}:{}", stored.len(), app, version);
            for contract in &stored {
                println!(
                    "   {} {} {}:{} on {}",
                    contract.id, contract.role, contract.message_type, contract.message_type_version, contract.topic
                );
            }
        }

        Commands::DeleteContract {
            app,
            version,
            message_type,
            message_type_version,
            topic,
            role,
        } => {
            let deleted = services.contracts().delete_contract(
                &app,
                &version,
                &message_type,
                &message_type_version,
                &topic,
                role.into(),
            )?;
            services.save()?;
            println!("🗑️  Deleted {} contracts", deleted);
        }

        Commands::Deploy {
            app,
            version,
            environment,
        } => {
            let environment = environment.to_uppercase();
            match services.deployments().register_deployment(&app, &version, &environment)? {
                Some(deployment) => {
                    services.save()?;
                    println!("🚀 {}:{} deployed on {}", deployment.app_name, deployment.app_version, environment);
                }
                None => println!("⚠️  {}:{} has no contracts, deployment ignored", app, version),
            }
        }

        Commands::Undeploy { app, environment } => {
            let environment = environment.to_uppercase();
            let deleted = services.deployments().delete_deployment(&app, &environment)?;
            services.save()?;
            println!("🗑️  Deleted {} deployments of {} on {}", deleted, app, environment);
        }

        Commands::Check {
            app,
            version,
            environment,
            json,
        } => {
            let environment = environment.to_uppercase();
            let result = services.compatibility().check_compatibility(&app, &version, &environment)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.compatible {
                println!("✅ {}:{} is compatible with {} ({} interactions)", app, version, environment, result.interactions.len());
            } else {
                println!("{}", result.message());
            }
            return Ok(if result.compatible { 0 } else { EXIT_INCOMPATIBLE });
        }

        Commands::Contracts { environment } => {
            let contracts = match environment {
                Some(environment) => services.contracts().contracts_deployed_on(&environment.to_uppercase())?,
                None => services.contracts().all_contracts()?,
            };
            for contract in &contracts {
                println!(
                    "{}:{} {} {}:{} on {} ({})",
                    contract.app_name,
                    contract.app_version,
                    contract.role,
                    contract.message_type,
                    contract.message_type_version,
                    contract.topic,
                    contract.registry_url
                );
            }
        }

        Commands::Deployments { newest } => {
            let deployments = if newest {
                services.deployments().newest_deployments()?
            } else {
                services.deployments().recent_deployments()?
            };
            for deployment in &deployments {
                println!(
                    "{} {}:{} on {}",
                    deployment.created_at.format("%Y-%m-%d %H:%M:%S"),
                    deployment.app_name,
                    deployment.app_version,
                    deployment.environment
                );
            }
        }
    }

    Ok(0)
}
