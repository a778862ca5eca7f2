//! Async front door: deploy through the engine, then generate on a blocking
//! thread.

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::deploy::{DeploymentAdapter, Resource};
use crate::error::{Result, ScaffoldError};
use crate::extract::extract_processes;
use crate::manifest::{Drift, Manifest};
use crate::scaffold::{GenerationReport, Scaffolder};
use crate::types::ProcessMetadata;

#[derive(Clone, Debug, Serialize)]
pub struct DeployOutcome {
    pub processes: Vec<ProcessMetadata>,
    pub report: GenerationReport,
}

#[derive(Clone)]
pub struct Pipeline {
    scaffolder: Arc<Scaffolder>,
    deployer: Arc<dyn DeploymentAdapter>,
}

impl Pipeline {
    pub fn new(scaffolder: Arc<Scaffolder>, deployer: Arc<dyn DeploymentAdapter>) -> Self {
        Self {
            scaffolder,
            deployer,
        }
    }

    pub fn scaffolder(&self) -> &Arc<Scaffolder> {
        &self.scaffolder
    }

    /// Deploy without generating anything.
    pub async fn deploy(&self, resource: &Resource, forms: &[Resource]) -> Result<Vec<ProcessMetadata>> {
        self.deployer.deploy(resource, forms).await
    }

    /// Deploy the model, then generate every process and task it declares.
    ///
    /// The model is parsed before the engine is contacted, so a malformed
    /// document never reaches the engine.
    pub async fn deploy_and_generate(&self, resource: Resource, forms: Vec<Resource>) -> Result<DeployOutcome> {
        extract_processes(&resource.content, self.scaffolder.config().duplicate_extensions)?;

        let processes = self.deployer.deploy(&resource, &forms).await?;
        info!(resource = %resource.name, processes = processes.len(), "Deployment accepted, generating");

        let metadata = processes.clone();
        let model = resource.content;
        let report = self
            .blocking(move |s| s.generate_deployment(&model, &metadata))
            .await?;

        Ok(DeployOutcome { processes, report })
    }

    /// Generate the process entity for metadata supplied by the caller.
    pub async fn generate_process(&self, metadata: ProcessMetadata) -> Result<GenerationReport> {
        self.blocking(move |s| s.generate_process(&metadata)).await
    }

    pub async fn manifest(&self) -> Result<Manifest> {
        self.blocking(|s| s.manifest()).await
    }

    pub async fn verify(&self) -> Result<Vec<Drift>> {
        self.blocking(|s| s.verify()).await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Scaffolder) -> Result<T> + Send + 'static,
    {
        let scaffolder = Arc::clone(&self.scaffolder);
        tokio::task::spawn_blocking(move || f(&scaffolder))
            .await
            .map_err(|e| ScaffoldError::Internal(format!("generation task failed: {}", e)))?
    }
}
