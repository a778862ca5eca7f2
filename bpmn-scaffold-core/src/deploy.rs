//! Deployment adapter seam.
//!
//! Generation needs the engine-assigned identity of each process (version and
//! definition key), so every run starts by deploying the model through a
//! [`DeploymentAdapter`].

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::error::{Result, ScaffoldError};
use crate::types::ProcessMetadata;

/// A named file sent to the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub content: Vec<u8>,
}

impl Resource {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Read `dir/name`. The name must be a plain file name.
    pub fn from_dir(dir: &Path, name: &str) -> Result<Self> {
        validate_resource_name(name)?;
        let path = dir.join(name);
        let content = std::fs::read(&path).map_err(|e| ScaffoldError::io(&path, e))?;
        Ok(Self::new(name, content))
    }
}

/// Reject names that could escape the resources directory.
pub fn validate_resource_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(ScaffoldError::InvalidResource(name.to_string()));
    }
    Ok(())
}

#[async_trait]
pub trait DeploymentAdapter: Send + Sync {
    /// Deploy a process model together with its forms and return the
    /// metadata of every process the engine accepted.
    async fn deploy(&self, resource: &Resource, forms: &[Resource]) -> Result<Vec<ProcessMetadata>>;
}

/// Returns preconfigured metadata without contacting an engine.
#[derive(Debug, Default)]
pub struct StaticDeployer {
    processes: Vec<ProcessMetadata>,
    deployed: Mutex<Vec<String>>,
}

impl StaticDeployer {
    pub fn new(processes: Vec<ProcessMetadata>) -> Self {
        Self {
            processes,
            deployed: Mutex::new(Vec::new()),
        }
    }

    /// Names of every resource passed to `deploy`, in call order.
    pub fn deployed_resources(&self) -> Vec<String> {
        self.deployed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DeploymentAdapter for StaticDeployer {
    async fn deploy(&self, resource: &Resource, forms: &[Resource]) -> Result<Vec<ProcessMetadata>> {
        {
            let mut deployed = self.deployed.lock().unwrap_or_else(PoisonError::into_inner);
            deployed.push(resource.name.clone());
            deployed.extend(forms.iter().map(|f| f.name.clone()));
        }
        if self.processes.is_empty() {
            return Err(ScaffoldError::Deployment("nothing was deployed".to_string()));
        }
        Ok(self
            .processes
            .iter()
            .map(|p| ProcessMetadata {
                resource_name: resource.name.clone(),
                ..p.clone()
            })
            .collect())
    }
}

/// Stands in when no engine endpoint is configured. Every deployment fails
/// with a configuration error; offline generation keeps working.
#[derive(Debug, Default)]
pub struct UnconfiguredDeployer;

#[async_trait]
impl DeploymentAdapter for UnconfiguredDeployer {
    async fn deploy(&self, resource: &Resource, _forms: &[Resource]) -> Result<Vec<ProcessMetadata>> {
        Err(ScaffoldError::Config(format!(
            "cannot deploy '{}': no engine endpoint configured",
            resource.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ProcessMetadata {
        ProcessMetadata {
            bpmn_process_id: "order".to_string(),
            version: 1,
            process_definition_key: 42,
            resource_name: String::new(),
        }
    }

    #[tokio::test]
    async fn static_deployer_stamps_resource_name() {
        let deployer = StaticDeployer::new(vec![meta()]);
        let resource = Resource::new("order.bpmn", b"<definitions/>".to_vec());
        let forms = [Resource::new("review.form", b"{}".to_vec())];

        let result = deployer.deploy(&resource, &forms).await.unwrap();
        assert_eq!(result[0].resource_name, "order.bpmn");
        assert_eq!(deployer.deployed_resources(), vec!["order.bpmn", "review.form"]);
    }

    #[tokio::test]
    async fn empty_deployment_is_an_error() {
        let deployer = StaticDeployer::default();
        let err = deployer
            .deploy(&Resource::new("x.bpmn", Vec::new()), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ScaffoldError::Deployment(_)));
    }

    #[test]
    fn resource_names_cannot_escape() {
        for bad in ["", "../secrets.bpmn", "nested/x.bpmn", "a\\b.bpmn"] {
            assert!(matches!(
                validate_resource_name(bad),
                Err(ScaffoldError::InvalidResource(_))
            ));
        }
        assert!(validate_resource_name("order.bpmn").is_ok());
    }

    #[test]
    fn from_dir_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("order.bpmn"), "<definitions/>").unwrap();
        let resource = Resource::from_dir(dir.path(), "order.bpmn").unwrap();
        assert_eq!(resource.content, b"<definitions/>");

        let err = Resource::from_dir(dir.path(), "missing.bpmn").unwrap_err();
        assert!(matches!(err, ScaffoldError::FileIo { .. }));
    }

    #[tokio::test]
    async fn unconfigured_deployer_refuses() {
        let err = UnconfiguredDeployer
            .deploy(&Resource::new("order.bpmn", Vec::new()), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ScaffoldError::Config(_)));
    }
}
