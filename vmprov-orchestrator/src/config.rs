use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use uuid::Uuid;

use crate::poller::PollPolicy;
use crate::provisioning::{
    ProvisionRequest, DEFAULT_IMAGE_FAMILY, DEFAULT_IMAGE_PROJECT, DEFAULT_MACHINE_TYPE,
    DEFAULT_ZONE,
};

pub const INSTANCE_NAME_PREFIX: &str = "realtime-vps";

/// Runtime configuration, read from the environment (`.env` is loaded by the binary).
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub request: ProvisionRequest,
    pub poll: PollPolicy,
    pub api_base_url: Option<String>,
}

impl ProvisionConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        // Treat blank values as unset.
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let project_id = get("VMPROV_PROJECT_ID")
            .or_else(|| get("GOOGLE_CLOUD_PROJECT"))
            .unwrap_or_default();
        let zone = get("VMPROV_ZONE").unwrap_or_else(|| DEFAULT_ZONE.to_string());
        let instance_name = get("VMPROV_INSTANCE_NAME").unwrap_or_else(generate_instance_name);

        let mut request = ProvisionRequest::new(project_id, zone, instance_name);
        request.machine_type =
            get("VMPROV_MACHINE_TYPE").unwrap_or_else(|| DEFAULT_MACHINE_TYPE.to_string());
        request.image_family =
            get("VMPROV_IMAGE_FAMILY").unwrap_or_else(|| DEFAULT_IMAGE_FAMILY.to_string());
        request.image_project =
            get("VMPROV_IMAGE_PROJECT").unwrap_or_else(|| DEFAULT_IMAGE_PROJECT.to_string());
        if let Some(v) = get("VMPROV_NETWORK") {
            request.network = v;
        }
        if let Some(v) = get("VMPROV_DISK_SIZE_GB") {
            request.disk_size_gb = v
                .parse()
                .with_context(|| format!("VMPROV_DISK_SIZE_GB must be a positive integer, got '{}'", v))?;
        }
        if let Some(v) = get("VMPROV_PUBLIC_IP") {
            request.assign_public_ip = parse_bool("VMPROV_PUBLIC_IP", &v)?;
        }

        let defaults = PollPolicy::default();
        let poll = PollPolicy {
            initial_delay: get_millis(&get, "VMPROV_POLL_INITIAL_MS")?
                .unwrap_or(defaults.initial_delay),
            max_delay: get_millis(&get, "VMPROV_POLL_MAX_MS")?.unwrap_or(defaults.max_delay),
            multiplier: defaults.multiplier,
            timeout: match get("VMPROV_POLL_TIMEOUT_SECS") {
                Some(v) => Duration::from_secs(v.parse().with_context(|| {
                    format!("VMPROV_POLL_TIMEOUT_SECS must be an integer, got '{}'", v)
                })?),
                None => defaults.timeout,
            },
        };
        if poll.initial_delay.is_zero() || poll.max_delay.is_zero() {
            return Err(anyhow!(
                "VMPROV_POLL_INITIAL_MS and VMPROV_POLL_MAX_MS must be greater than zero"
            ));
        }
        if poll.max_delay < poll.initial_delay {
            return Err(anyhow!(
                "VMPROV_POLL_MAX_MS ({:?}) must not be lower than VMPROV_POLL_INITIAL_MS ({:?})",
                poll.max_delay,
                poll.initial_delay
            ));
        }

        Ok(Self {
            request,
            poll,
            api_base_url: get("VMPROV_API_BASE_URL"),
        })
    }
}

/// `realtime-vps-` followed by six hex characters of a random v4 uuid.
pub fn generate_instance_name() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}-{}", INSTANCE_NAME_PREFIX, &hex[..6])
}

fn get_millis(get: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    match get(key) {
        Some(v) => {
            let ms: u64 = v
                .parse()
                .with_context(|| format!("{} must be an integer (milliseconds), got '{}'", key, v))?;
            Ok(Some(Duration::from_millis(ms)))
        }
        None => Ok(None),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("{} must be a boolean, got '{}'", key, other)),
    }
}
