//! Message Contracts
//!
//! Deployment-time compatibility checks for applications exchanging Avro
//! messages over shared topics, backed by a git message type registry.
//!
//! ## Features
//!
//! - **Contracts**: Apps declare which message types they produce or consume, per version and topic
//! - **Registry Resolution**: Schemas are resolved from a git registry at a branch or commit
//! - **Avro IDL**: Registry schemas are parsed from IDL, including imports
//! - **Compatibility Checks**: Reader/writer checks against the counterparts deployed on an environment
//!
//! ## Registry Layout
//!
//! ```text
//! descriptor/
//! ├── _common/
//! │   └── Shared.avdl
//! └── activ/
//!     ├── _common/
//!     ├── event/
//!     │   └── activzoneenteredevent/
//!     │       ├── ActivZoneEnteredEvent.json
//!     │       └── ActivZoneEnteredEvent_v1.0.0.avdl
//!     └── command/
//! ```

pub mod checksum;
pub mod compatibility;
pub mod config;
pub mod contract;
pub mod deployment;
pub mod error;
pub mod idl;
pub mod lifecycle;
pub mod registry;
pub mod store;

pub use checksum::Checksum;
pub use compatibility::{CompatibilityResult, CompatibilityService, Incompatibility, Interaction};
pub use config::ContractsConfig;
pub use contract::{ContractRole, MessageContract, NewContract};
pub use deployment::DeploymentService;
pub use error::{ContractError, Result};
pub use lifecycle::ContractService;
pub use registry::{MessageTypeRegistry, RegistryFactory, SchemaResolver};
pub use store::{ContractStore, DeploymentStore, InMemoryStore};
