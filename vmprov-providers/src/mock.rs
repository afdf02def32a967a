use crate::ComputeProvider;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use vmprov_common::{
    AccessConfig, ApiError, Image, Instance, InstanceSpec, NetworkInterface, Operation,
    OperationError, OperationErrorItem, OperationStatus, EXTERNAL_NAT_NAME, ONE_TO_ONE_NAT,
};

pub const MOCK_PUBLIC_IP: &str = "203.0.113.10";
pub const MOCK_INTERNAL_IP: &str = "10.128.0.2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    ImageFromFamily {
        project: String,
        family: String,
    },
    Insert {
        project: String,
        zone: String,
        spec: InstanceSpec,
    },
    GetOperation {
        project: String,
        zone: String,
        operation: String,
    },
    GetInstance {
        project: String,
        zone: String,
        name: String,
    },
}

#[derive(Default)]
struct MockState {
    calls: Vec<MockCall>,
    next_operation: u64,
    // operation name -> (zone, instance name, status checks so far)
    operations: HashMap<String, (String, String, usize)>,
    // (zone, name) -> instance
    instances: HashMap<(String, String), Instance>,
}

/// In-memory compute provider.
///
/// Operations stay `RUNNING` for `pending_polls` status checks and then turn
/// `DONE`, optionally with an error payload. Every call is recorded.
pub struct MockProvider {
    state: Mutex<MockState>,
    pending_polls: usize,
    never_done: bool,
    terminal_error: Option<OperationError>,
    insert_failure: Option<ApiError>,
    latency: Duration,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            pending_polls: 0,
            never_done: false,
            terminal_error: None,
            insert_failure: None,
            latency: Duration::ZERO,
        }
    }

    /// Number of status checks answered with `RUNNING` before `DONE`.
    pub fn with_pending_polls(mut self, polls: usize) -> Self {
        self.pending_polls = polls;
        self
    }

    pub fn never_done(mut self) -> Self {
        self.never_done = true;
        self
    }

    pub fn with_operation_error(mut self, code: &str, message: &str) -> Self {
        self.terminal_error = Some(OperationError {
            errors: vec![OperationErrorItem {
                code: code.to_string(),
                message: message.to_string(),
                location: None,
            }],
        });
        self
    }

    /// Finished operations carry `error: {errors: []}`, which is not a failure.
    pub fn with_empty_operation_error(mut self) -> Self {
        self.terminal_error = Some(OperationError::default());
        self
    }

    pub fn with_insert_failure(mut self, status: u16, message: &str) -> Self {
        self.insert_failure = Some(ApiError {
            status,
            message: message.to_string(),
            body: String::new(),
        });
        self
    }

    /// Delay applied to every call before it is answered.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A panic while holding the lock only happens inside a failing test.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn operation_polls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, MockCall::GetOperation { .. }))
            .count()
    }

    pub fn image_lookups(&self) -> Vec<(String, String)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::ImageFromFamily { project, family } => {
                    Some((project.clone(), family.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn inserted_specs(&self) -> Vec<InstanceSpec> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Insert { spec, .. } => Some(spec.clone()),
                _ => None,
            })
            .collect()
    }

    fn not_found(what: &str) -> anyhow::Error {
        anyhow::Error::new(ApiError {
            status: 404,
            message: format!("The resource '{}' was not found", what),
            body: String::new(),
        })
    }
}

fn realise(spec: &InstanceSpec, zone: &str) -> Instance {
    let access_configs = if spec.assign_public_ip {
        vec![AccessConfig {
            name: Some(EXTERNAL_NAT_NAME.to_string()),
            kind: Some(ONE_TO_ONE_NAT.to_string()),
            nat_ip: Some(MOCK_PUBLIC_IP.to_string()),
        }]
    } else {
        vec![]
    };
    Instance {
        id: Some((1_000_000 + spec.name.len()).to_string()),
        name: spec.name.clone(),
        status: Some("PROVISIONING".to_string()),
        machine_type: Some(spec.machine_type.clone()),
        zone: Some(zone.to_string()),
        self_link: None,
        network_interfaces: vec![NetworkInterface {
            name: Some("nic0".to_string()),
            network: Some(spec.network.clone()),
            network_ip: Some(MOCK_INTERNAL_IP.to_string()),
            access_configs,
        }],
    }
}

#[async_trait]
impl ComputeProvider for MockProvider {
    async fn get_image_from_family(&self, image_project: &str, family: &str) -> Result<Image> {
        self.simulate_latency().await;
        self.lock().calls.push(MockCall::ImageFromFamily {
            project: image_project.to_string(),
            family: family.to_string(),
        });
        let name = format!("{}-v20240110", family);
        Ok(Image {
            self_link: format!(
                "https://www.googleapis.com/compute/v1/projects/{}/global/images/{}",
                image_project, name
            ),
            name,
            family: Some(family.to_string()),
            status: Some("READY".to_string()),
        })
    }

    async fn insert_instance(
        &self,
        project: &str,
        zone: &str,
        spec: &InstanceSpec,
    ) -> Result<Operation> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.calls.push(MockCall::Insert {
            project: project.to_string(),
            zone: zone.to_string(),
            spec: spec.clone(),
        });

        if let Some(err) = &self.insert_failure {
            return Err(anyhow::Error::new(err.clone()));
        }

        let key = (zone.to_string(), spec.name.clone());
        if state.instances.contains_key(&key) {
            return Err(anyhow::Error::new(ApiError {
                status: 409,
                message: format!(
                    "The resource 'projects/{}/zones/{}/instances/{}' already exists",
                    project, zone, spec.name
                ),
                body: String::new(),
            }));
        }

        state.next_operation += 1;
        let op_name = format!("operation-mock-{}", state.next_operation);
        state
            .operations
            .insert(op_name.clone(), (zone.to_string(), spec.name.clone(), 0));
        state.instances.insert(key, realise(spec, zone));

        Ok(Operation {
            name: op_name,
            status: OperationStatus::Pending,
            operation_type: Some("insert".to_string()),
            target_link: None,
            progress: Some(0),
            error: None,
            http_error_status_code: None,
            http_error_message: None,
        })
    }

    async fn get_zone_operation(
        &self,
        project: &str,
        zone: &str,
        operation: &str,
    ) -> Result<Operation> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.calls.push(MockCall::GetOperation {
            project: project.to_string(),
            zone: zone.to_string(),
            operation: operation.to_string(),
        });

        let (instance_zone, instance_name, checks) = match state.operations.get_mut(operation) {
            Some(entry) => {
                entry.2 += 1;
                (entry.0.clone(), entry.1.clone(), entry.2)
            }
            None => return Err(Self::not_found(operation)),
        };

        let done = !self.never_done && checks > self.pending_polls;
        let mut op = Operation {
            name: operation.to_string(),
            status: if done {
                OperationStatus::Done
            } else {
                OperationStatus::Running
            },
            operation_type: Some("insert".to_string()),
            target_link: None,
            progress: Some(if done { 100 } else { 50 }),
            error: None,
            http_error_status_code: None,
            http_error_message: None,
        };

        if done {
            let key = (instance_zone, instance_name);
            op.error = self.terminal_error.clone();
            if op.failure().is_some() {
                state.instances.remove(&key);
                op.http_error_status_code = Some(400);
            } else if let Some(inst) = state.instances.get_mut(&key) {
                inst.status = Some("RUNNING".to_string());
            }
        }

        Ok(op)
    }

    async fn get_instance(&self, project: &str, zone: &str, name: &str) -> Result<Instance> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.calls.push(MockCall::GetInstance {
            project: project.to_string(),
            zone: zone.to_string(),
            name: name.to_string(),
        });
        state
            .instances
            .get(&(zone.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Self::not_found(name))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
