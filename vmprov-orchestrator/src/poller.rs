use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vmprov_common::{Operation, ProvisionError, RemoteStep};
use vmprov_providers::ComputeProvider;

/// Floor for any delay between two status checks.
pub const MIN_POLL_DELAY: Duration = Duration::from_millis(100);

/// Backoff between operation status checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
    /// Overall budget, measured from the first status check.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2,
            timeout: Duration::from_secs(600),
        }
    }
}

impl PollPolicy {
    /// Delay after the `attempt`-th unfinished check (0-based). Never below `MIN_POLL_DELAY`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
            .max(MIN_POLL_DELAY)
    }
}

/// Poll `operation` until it reports DONE.
///
/// Issues one status check per iteration and sleeps between checks, so an
/// operation that is still running after N checks is polled exactly N+1
/// times. Whether the finished operation carries an error is left to the
/// caller.
pub async fn wait_for_operation(
    provider: &dyn ComputeProvider,
    project: &str,
    zone: &str,
    operation: &str,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<Operation, ProvisionError> {
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled {
                operation: operation.to_string(),
            });
        }

        let op = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ProvisionError::Cancelled { operation: operation.to_string() });
            }
            res = provider.get_zone_operation(project, zone, operation) => {
                res.map_err(|e| ProvisionError::provider(RemoteStep::OperationStatus, e))?
            }
        };

        if op.is_done() {
            tracing::info!(
                "✅ [poller] Operation {} finished after {} check(s) in {:?}",
                operation,
                attempt + 1,
                started.elapsed()
            );
            return Ok(op);
        }

        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            tracing::warn!(
                "⏱️ [poller] Operation {} still {:?} after {:?}, giving up",
                operation,
                op.status,
                elapsed
            );
            return Err(ProvisionError::Timeout {
                operation: operation.to_string(),
                elapsed,
            });
        }

        let delay = policy.delay_for(attempt).min(policy.timeout - elapsed);
        attempt = attempt.saturating_add(1);
        tracing::debug!(
            "🔄 [poller] Operation {} status={:?} progress={:?}, next check in {:?}",
            operation,
            op.status,
            op.progress,
            delay
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ProvisionError::Cancelled { operation: operation.to_string() });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = PollPolicy::default();
        let delays: Vec<u64> = (0..7).map(|a| policy.delay_for(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10, 10]);
    }

    #[test]
    fn backoff_survives_huge_attempt_counts() {
        let policy = PollPolicy::default();
        assert_eq!(policy.delay_for(u32::MAX), policy.max_delay);
    }

    #[test]
    fn zero_delays_are_floored() {
        let policy = PollPolicy {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..PollPolicy::default()
        };
        for attempt in [0, 1, 10, u32::MAX] {
            assert_eq!(policy.delay_for(attempt), MIN_POLL_DELAY);
        }
    }

    #[test]
    fn multiplier_of_zero_means_constant_delay() {
        let policy = PollPolicy {
            multiplier: 0,
            ..PollPolicy::default()
        };
        assert_eq!(policy.delay_for(5), Duration::from_secs(1));
    }
}
