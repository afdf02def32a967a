use crate::{ComputeProvider, CredentialProvider};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use vmprov_common::{
    ApiError, Image, Instance, InstanceSpec, Operation, EXTERNAL_NAT_NAME, ONE_TO_ONE_NAT,
};

pub const DEFAULT_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";

/// Compute Engine REST client.
pub struct GceProvider {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl GceProvider {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        Self::with_base_url(credentials, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        credentials: Arc<dyn CredentialProvider>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        // Default reqwest client has no overall timeout; a stalled API call would hang the poll loop.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build Compute Engine HTTP client")?;
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = format!("{}/{}", self.base_url, path);
        let token = self
            .credentials
            .access_token()
            .await
            .with_context(|| format!("failed to obtain access token ({})", self.credentials.describe()))?;
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(&self, label: &str, req: RequestBuilder) -> Result<T> {
        let resp = req
            .send()
            .await
            .with_context(|| format!("{} request failed", label))?;
        let status = resp.status();
        let status_code = status.as_u16();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(
                "❌ [GCE API] {} failed: status={}, response={}",
                label,
                status_code,
                body
            );
            return Err(anyhow::Error::new(api_error(status_code, body)));
        }

        tracing::debug!("✅ [GCE API] {} succeeded: status={}", label, status_code);
        resp.json::<T>()
            .await
            .with_context(|| format!("{} returned an unexpected body", label))
    }
}

/// Build an `ApiError`, pulling the message out of Google's error envelope
/// (`{"error": {"code": .., "message": ..}}`) when there is one.
pub fn api_error(status: u16, body: String) -> ApiError {
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                "empty response body".to_string()
            } else if body.chars().count() > 200 {
                format!("{}... (truncated)", body.chars().take(200).collect::<String>())
            } else {
                body.clone()
            }
        });
    ApiError {
        status,
        message,
        body,
    }
}

/// Request body for `instances.insert`.
pub fn instance_body(spec: &InstanceSpec) -> serde_json::Value {
    let mut network_interface = json!({ "network": spec.network });
    if spec.assign_public_ip {
        network_interface["accessConfigs"] = json!([{
            "name": EXTERNAL_NAT_NAME,
            "type": ONE_TO_ONE_NAT,
        }]);
    }

    json!({
        "name": spec.name,
        "machineType": spec.machine_type,
        "disks": [{
            "boot": true,
            "autoDelete": true,
            "initializeParams": {
                "sourceImage": spec.source_image,
                "diskSizeGb": spec.disk_size_gb.to_string(),
            }
        }],
        "networkInterfaces": [network_interface],
    })
}

#[async_trait]
impl ComputeProvider for GceProvider {
    async fn get_image_from_family(&self, image_project: &str, family: &str) -> Result<Image> {
        let path = format!("projects/{}/global/images/family/{}", image_project, family);
        tracing::info!(
            "🔵 [GCE API] GET {} - Resolving image family: project={}, family={}",
            path,
            image_project,
            family
        );
        let req = self.request(Method::GET, &path).await?;
        let image: Image = self.send(&format!("GET {}", path), req).await?;
        tracing::info!("✅ [GCE API] Image resolved: {} ({})", image.name, image.self_link);
        Ok(image)
    }

    async fn insert_instance(
        &self,
        project: &str,
        zone: &str,
        spec: &InstanceSpec,
    ) -> Result<Operation> {
        let path = format!("projects/{}/zones/{}/instances", project, zone);
        let body = instance_body(spec);
        tracing::info!(
            "🔵 [GCE API] POST {} - Creating instance: name={}, machine_type={}, zone={}",
            path,
            spec.name,
            spec.machine_type,
            zone
        );
        tracing::debug!(
            "🔵 [GCE API] Request payload: {}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );
        let req = self.request(Method::POST, &path).await?.json(&body);
        let op: Operation = self.send(&format!("POST {}", path), req).await?;
        tracing::info!(
            "✅ [GCE API] Insert accepted: operation={}, status={:?}",
            op.name,
            op.status
        );
        Ok(op)
    }

    async fn get_zone_operation(
        &self,
        project: &str,
        zone: &str,
        operation: &str,
    ) -> Result<Operation> {
        let path = format!("projects/{}/zones/{}/operations/{}", project, zone, operation);
        tracing::debug!("🔵 [GCE API] GET {} - Checking operation status", path);
        let req = self.request(Method::GET, &path).await?;
        self.send(&format!("GET {}", path), req).await
    }

    async fn get_instance(&self, project: &str, zone: &str, name: &str) -> Result<Instance> {
        let path = format!("projects/{}/zones/{}/instances/{}", project, zone, name);
        tracing::info!("🔵 [GCE API] GET {} - Fetching instance", path);
        let req = self.request(Method::GET, &path).await?;
        self.send(&format!("GET {}", path), req).await
    }

    fn name(&self) -> &'static str {
        "gce"
    }
}
