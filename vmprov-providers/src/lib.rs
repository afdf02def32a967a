use anyhow::Result;
use async_trait::async_trait;
use vmprov_common::{Image, Instance, InstanceSpec, Operation};

/// Remote resource manager used by the provisioning workflow.
///
/// Every method is a single remote call; none of them waits for an operation
/// to finish. Waiting is the caller's job.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Latest non-deprecated image of `family` published in `image_project`.
    async fn get_image_from_family(&self, image_project: &str, family: &str) -> Result<Image>;

    /// Submit a create request. Returns the operation tracking it.
    async fn insert_instance(
        &self,
        project: &str,
        zone: &str,
        spec: &InstanceSpec,
    ) -> Result<Operation>;

    async fn get_zone_operation(
        &self,
        project: &str,
        zone: &str,
        operation: &str,
    ) -> Result<Operation>;

    async fn get_instance(&self, project: &str, zone: &str, name: &str) -> Result<Instance>;

    // Optional: human readable name for logs.
    fn name(&self) -> &'static str {
        "compute"
    }
}

/// Source of OAuth2 bearer tokens for provider calls.
///
/// Handed to the provider at construction; providers never look credentials
/// up on their own.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;

    /// Short description for logs (never includes secret material).
    fn describe(&self) -> String;
}

#[cfg(feature = "gce")]
pub mod credentials;

#[cfg(feature = "gce")]
pub mod gce;

#[cfg(feature = "mock")]
pub mod mock;
