//! Workflow scaffolding generator.
//!
//! Takes a deployed BPMN process model plus the forms its user tasks use and
//! writes a matching persistence, cache and HTTP layer into a target Rust
//! service, registering each generated module in the service's shared files.

pub mod config;
pub mod deploy;
pub mod error;
pub mod extract;
pub mod form;
pub mod manifest;
pub mod naming;
pub mod patch;
pub mod pipeline;
pub mod scaffold;
pub mod staging;
pub mod synth;
pub mod types;
pub mod zeebe;

pub use config::ScaffoldConfig;
pub use deploy::{DeploymentAdapter, Resource, StaticDeployer, UnconfiguredDeployer};
pub use error::{Result, ScaffoldError};
pub use pipeline::{DeployOutcome, Pipeline};
pub use scaffold::{GenerationReport, Scaffolder};
pub use types::{EntityKey, EntityKind, ProcessDefinition, ProcessMetadata, Task};
pub use zeebe::{ZeebeRestDeployer, ZeebeSettings};
