// Workflow tests. All provisioning here runs against the in-memory provider.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vmprov_common::ProvisionError;
use vmprov_orchestrator::{
    wait_for_operation, PollPolicy, ProvisionRequest, Provisioner, MIN_POLL_DELAY,
};
use vmprov_providers::mock::{MockCall, MockProvider, MOCK_PUBLIC_IP};
use vmprov_providers::ComputeProvider;

fn request(name: &str) -> ProvisionRequest {
    ProvisionRequest::new("test-project", "us-central1-a", name)
}

fn provisioner(mock: &Arc<MockProvider>) -> Provisioner {
    Provisioner::new(mock.clone())
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_scenario() {
    let mock = Arc::new(MockProvider::new().with_pending_polls(3));
    let mut req = request("test-vm-abc123");
    req.machine_type = "e2-custom-8-8192".to_string();
    req.image_family = "debian-11".to_string();

    let instance = provisioner(&mock)
        .create_instance(&req, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(instance.name, "test-vm-abc123");
    let ip = instance.public_ip().unwrap();
    assert!(!ip.is_empty());
    assert_eq!(ip, MOCK_PUBLIC_IP);

    let specs = mock.inserted_specs();
    assert_eq!(specs.len(), 1);
    assert_eq!(
        specs[0].machine_type,
        "zones/us-central1-a/machineTypes/e2-custom-8-8192"
    );
    assert!(specs[0].source_image.contains("debian-11"));
    assert_eq!(specs[0].disk_size_gb, 10);
    assert!(specs[0].assign_public_ip);
}

#[tokio::test(start_paused = true)]
async fn test_poll_count_is_pending_plus_one() {
    for pending in [0usize, 1, 4, 9] {
        let mock = Arc::new(MockProvider::new().with_pending_polls(pending));
        provisioner(&mock)
            .create_instance(&request("vm-poll"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(mock.operation_polls(), pending + 1, "pending={pending}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_polls_are_spaced_by_backoff() {
    let mock = Arc::new(MockProvider::new().with_pending_polls(4));
    let started = tokio::time::Instant::now();
    provisioner(&mock)
        .create_instance(&request("vm-backoff"), &CancellationToken::new())
        .await
        .unwrap();
    // 1s + 2s + 4s + 8s of sleeps between the five checks.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(15), "elapsed={elapsed:?}");
    assert!(elapsed < Duration::from_secs(16), "elapsed={elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_image_lookup_uses_configured_family_and_project() {
    let mock = Arc::new(MockProvider::new());
    let mut req = request("vm-image");
    req.image_family = "ubuntu-2204-lts".to_string();
    req.image_project = "ubuntu-os-cloud".to_string();

    provisioner(&mock)
        .create_instance(&req, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        mock.image_lookups(),
        vec![("ubuntu-os-cloud".to_string(), "ubuntu-2204-lts".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_operation_error_is_reported_not_an_instance() {
    let mock = Arc::new(
        MockProvider::new()
            .with_pending_polls(2)
            .with_operation_error("QUOTA_EXCEEDED", "Quota 'CPUS' exceeded. Limit: 8.0"),
    );

    let err = provisioner(&mock)
        .create_instance(&request("vm-quota"), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ProvisionError::Operation { operation, error } => {
            assert!(operation.starts_with("operation-mock-"));
            assert_eq!(error.errors[0].code, "QUOTA_EXCEEDED");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // The instance is never fetched after a failed operation.
    assert!(!mock
        .calls()
        .iter()
        .any(|c| matches!(c, MockCall::GetInstance { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_success_fetches_instance_by_submitted_name() {
    let mock = Arc::new(MockProvider::new());
    provisioner(&mock)
        .create_instance(&request("vm-fetch"), &CancellationToken::new())
        .await
        .unwrap();

    let last = mock.calls().last().cloned().unwrap();
    assert_eq!(
        last,
        MockCall::GetInstance {
            project: "test-project".to_string(),
            zone: "us-central1-a".to_string(),
            name: "vm-fetch".to_string(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_precondition_failure_makes_no_remote_call() {
    let mock = Arc::new(MockProvider::new());
    let req = ProvisionRequest::new("your-gcp-project-id", "us-central1-a", "vm-1");
    let err = provisioner(&mock)
        .create_instance(&req, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Precondition(_)));

    let err = provisioner(&mock)
        .create_instance(&request("Bad_Name"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Precondition(_)));
    assert!(mock.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_insert_conflict_is_a_provider_error_with_status() {
    let mock = Arc::new(MockProvider::new());
    let p = provisioner(&mock);
    p.create_instance(&request("vm-dup"), &CancellationToken::new())
        .await
        .unwrap();

    let err = p
        .create_instance(&request("vm-dup"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.api_status(), Some(409));
    assert!(matches!(
        err,
        ProvisionError::Provider {
            step: vmprov_common::RemoteStep::InsertInstance,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_insert_permission_failure_is_distinguishable() {
    let mock = Arc::new(MockProvider::new().with_insert_failure(403, "Required 'compute.instances.create' permission"));
    let err = provisioner(&mock)
        .create_instance(&request("vm-denied"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.api_error().unwrap().is_permission_denied());
    assert_eq!(mock.operation_polls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_poll_times_out() {
    let mock = Arc::new(MockProvider::new().never_done());
    let policy = PollPolicy {
        timeout: Duration::from_secs(60),
        ..PollPolicy::default()
    };

    let err = Provisioner::new(mock.clone())
        .with_poll_policy(policy)
        .create_instance(&request("vm-slow"), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ProvisionError::Timeout { elapsed, .. } => {
            assert!(elapsed >= Duration::from_secs(60), "elapsed={elapsed:?}")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // Checks at 0, 1, 3, 7, 15, 25, 35, 45, 55 and 60 seconds.
    assert_eq!(mock.operation_polls(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_polling() {
    let mock = Arc::new(MockProvider::new().never_done());
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(20)).await;
            cancel.cancel();
        });
    }

    let err = provisioner(&mock)
        .create_instance(&request("vm-cancel"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Cancelled { .. }));
    // Checks at 0, 1, 3, 7 and 15 seconds before the cancel at 20.
    assert_eq!(mock.operation_polls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_insert_creates_nothing() {
    let mock = Arc::new(MockProvider::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = provisioner(&mock)
        .create_instance(&request("vm-early"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Cancelled { .. }));
    assert!(mock.inserted_specs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_unknown_operation_is_a_provider_error() {
    let mock = MockProvider::new();
    let err = wait_for_operation(
        &mock as &dyn ComputeProvider,
        "test-project",
        "us-central1-a",
        "operation-missing",
        &PollPolicy::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.api_status(), Some(404));
}

#[tokio::test(start_paused = true)]
async fn test_empty_error_payload_counts_as_success() {
    let mock = Arc::new(
        MockProvider::new()
            .with_pending_polls(1)
            .with_empty_operation_error(),
    );
    let instance = provisioner(&mock)
        .create_instance(&request("vm-empty-error"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(instance.name, "vm-empty-error");
    assert_eq!(instance.public_ip(), Some(MOCK_PUBLIC_IP));
    assert_eq!(mock.operation_polls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_zero_delay_policy_still_spaces_checks() {
    let mock = Arc::new(MockProvider::new().with_pending_polls(50));
    let policy = PollPolicy {
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        ..PollPolicy::default()
    };
    let started = tokio::time::Instant::now();
    Provisioner::new(mock.clone())
        .with_poll_policy(policy)
        .create_instance(&request("vm-zero-delay"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(mock.operation_polls(), 51);
    assert!(started.elapsed() >= MIN_POLL_DELAY * 50, "elapsed={:?}", started.elapsed());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_slow_image_lookup() {
    let mock = Arc::new(MockProvider::new().with_latency(Duration::from_secs(30)));
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        });
    }

    let started = tokio::time::Instant::now();
    let err = provisioner(&mock)
        .create_instance(&request("vm-slow-image"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Cancelled { .. }));
    assert!(started.elapsed() < Duration::from_secs(30), "elapsed={:?}", started.elapsed());
    assert!(mock.inserted_specs().is_empty());
}
