use regex::Regex;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use vmprov_common::{
    Instance, InstanceSpec, ProvisionError, RemoteStep, DEFAULT_DISK_SIZE_GB, DEFAULT_NETWORK,
};
use vmprov_providers::ComputeProvider;

use crate::poller::{wait_for_operation, PollPolicy};

pub const PLACEHOLDER_PROJECT_ID: &str = "your-gcp-project-id";
pub const DEFAULT_ZONE: &str = "us-central1-a";
pub const DEFAULT_MACHINE_TYPE: &str = "e2-custom-8-8192";
pub const DEFAULT_IMAGE_FAMILY: &str = "debian-11";
pub const DEFAULT_IMAGE_PROJECT: &str = "debian-cloud";

/// Everything needed to create one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub project_id: String,
    pub zone: String,
    pub instance_name: String,
    pub machine_type: String,
    pub image_family: String,
    pub image_project: String,
    pub network: String,
    pub disk_size_gb: u64,
    pub assign_public_ip: bool,
}

impl ProvisionRequest {
    pub fn new(
        project_id: impl Into<String>,
        zone: impl Into<String>,
        instance_name: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            zone: zone.into(),
            instance_name: instance_name.into(),
            machine_type: DEFAULT_MACHINE_TYPE.to_string(),
            image_family: DEFAULT_IMAGE_FAMILY.to_string(),
            image_project: DEFAULT_IMAGE_PROJECT.to_string(),
            network: DEFAULT_NETWORK.to_string(),
            disk_size_gb: DEFAULT_DISK_SIZE_GB,
            assign_public_ip: true,
        }
    }

    /// Local checks done before any remote call. Name uniqueness is left to the provider.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        let project = self.project_id.trim();
        if project.is_empty() || project == PLACEHOLDER_PROJECT_ID {
            return Err(ProvisionError::Precondition(
                "no GCP project configured; set VMPROV_PROJECT_ID (or GOOGLE_CLOUD_PROJECT) to your project ID"
                    .to_string(),
            ));
        }
        if self.zone.trim().is_empty() {
            return Err(ProvisionError::Precondition("zone must not be empty".to_string()));
        }
        if !is_valid_instance_name(&self.instance_name) {
            return Err(ProvisionError::Precondition(format!(
                "invalid instance name '{}': use 1-63 lowercase letters, digits or hyphens, starting with a letter",
                self.instance_name
            )));
        }
        if self.machine_type.trim().is_empty() {
            return Err(ProvisionError::Precondition(
                "machine type must not be empty".to_string(),
            ));
        }
        if self.image_family.trim().is_empty() || self.image_project.trim().is_empty() {
            return Err(ProvisionError::Precondition(
                "image family and image project must both be set".to_string(),
            ));
        }
        if self.disk_size_gb == 0 {
            return Err(ProvisionError::Precondition(
                "boot disk size must be at least 1 GB".to_string(),
            ));
        }
        Ok(())
    }
}

/// Compute Engine naming rule (RFC 1035 label).
pub fn is_valid_instance_name(name: &str) -> bool {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    NAME_RE
        .get_or_init(|| {
            Regex::new(r"^[a-z](?:[-a-z0-9]{0,61}[a-z0-9])?$").expect("static regex is valid")
        })
        .is_match(name)
}

/// Drives one instance from request to running resource.
pub struct Provisioner {
    provider: Arc<dyn ComputeProvider>,
    poll: PollPolicy,
}

impl Provisioner {
    pub fn new(provider: Arc<dyn ComputeProvider>) -> Self {
        Self {
            provider,
            poll: PollPolicy::default(),
        }
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Create the instance and wait for it.
    ///
    /// Returns the instance as reported by the provider once the insert
    /// operation is DONE without an error payload.
    pub async fn create_instance(
        &self,
        req: &ProvisionRequest,
        cancel: &CancellationToken,
    ) -> Result<Instance, ProvisionError> {
        req.validate()?;
        let provider = self.provider.as_ref();

        let image = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ProvisionError::Cancelled {
                    operation: format!("image lookup {}/{}", req.image_project, req.image_family),
                });
            }
            res = provider.get_image_from_family(&req.image_project, &req.image_family) => {
                res.map_err(|e| ProvisionError::provider(RemoteStep::ImageLookup, e))?
            }
        };
        tracing::info!(
            "🔍 [provisioning] Boot image {} resolved from family {}/{}",
            image.name,
            req.image_project,
            req.image_family
        );

        let spec = InstanceSpec {
            name: req.instance_name.clone(),
            machine_type: InstanceSpec::machine_type_uri(&req.zone, &req.machine_type),
            source_image: image.self_link,
            disk_size_gb: req.disk_size_gb,
            network: req.network.clone(),
            assign_public_ip: req.assign_public_ip,
        };

        // Nothing billable exists yet; stop here if asked to.
        if cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled {
                operation: format!("insert {}", spec.name),
            });
        }

        tracing::info!(
            "🚀 [provisioning] Creating instance {} in project {} zone {} ({}, provider={})",
            spec.name,
            req.project_id,
            req.zone,
            spec.machine_type,
            provider.name()
        );
        let operation = provider
            .insert_instance(&req.project_id, &req.zone, &spec)
            .await
            .map_err(|e| ProvisionError::provider(RemoteStep::InsertInstance, e))?;

        tracing::info!(
            "⏳ [provisioning] Waiting for operation {} to complete...",
            operation.name
        );
        let finished = wait_for_operation(
            provider,
            &req.project_id,
            &req.zone,
            &operation.name,
            &self.poll,
            cancel,
        )
        .await?;

        if let Some(error) = finished.failure() {
            tracing::error!(
                "❌ [provisioning] Operation {} failed: {}",
                finished.name,
                error
            );
            return Err(ProvisionError::Operation {
                operation: finished.name.clone(),
                error: error.clone(),
            });
        }

        // The instance exists at this point; a cancel only skips reading it back.
        let instance = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ProvisionError::Cancelled {
                    operation: format!("get {}", spec.name),
                });
            }
            res = provider.get_instance(&req.project_id, &req.zone, &spec.name) => {
                res.map_err(|e| ProvisionError::provider(RemoteStep::GetInstance, e))?
            }
        };

        match instance.public_ip() {
            Some(ip) => tracing::info!(
                "✅ [provisioning] Instance {} created successfully with IP: {}",
                instance.name,
                ip
            ),
            None => tracing::warn!(
                "⚠️ [provisioning] Instance {} created but has no external IP",
                instance.name
            ),
        }

        Ok(instance)
    }
}
