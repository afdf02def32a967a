use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::OperationError;

/// Remote call a provider failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStep {
    ImageLookup,
    InsertInstance,
    OperationStatus,
    GetInstance,
}

impl RemoteStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStep::ImageLookup => "image lookup",
            RemoteStep::InsertInstance => "instance insert",
            RemoteStep::OperationStatus => "operation status",
            RemoteStep::GetInstance => "instance get",
        }
    }
}

impl fmt::Display for RemoteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-2xx answer from the provider API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("provider API returned status={status}: {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    pub body: String,
}

impl ApiError {
    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }

    pub fn is_permission_denied(&self) -> bool {
        self.status == 401 || self.status == 403
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("{step} failed: {source:#}")]
    Provider {
        step: RemoteStep,
        #[source]
        source: anyhow::Error,
    },

    #[error("operation {operation} finished with error: {error}")]
    Operation {
        operation: String,
        error: OperationError,
    },

    #[error("operation {operation} did not finish within {elapsed:?}")]
    Timeout { operation: String, elapsed: Duration },

    #[error("waiting for operation {operation} was cancelled")]
    Cancelled { operation: String },
}

impl ProvisionError {
    pub fn provider(step: RemoteStep, source: anyhow::Error) -> Self {
        ProvisionError::Provider { step, source }
    }

    /// API error carried by a provider failure, if the failure was an HTTP answer.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            ProvisionError::Provider { source, .. } => {
                source.chain().find_map(|e| e.downcast_ref::<ApiError>())
            }
            _ => None,
        }
    }

    pub fn api_status(&self) -> Option<u16> {
        self.api_error().map(|e| e.status)
    }
}
