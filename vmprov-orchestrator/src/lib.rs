pub mod config;
pub mod poller;
pub mod provisioning;

pub use config::ProvisionConfig;
pub use poller::{wait_for_operation, PollPolicy, MIN_POLL_DELAY};
pub use provisioning::{ProvisionRequest, Provisioner};
