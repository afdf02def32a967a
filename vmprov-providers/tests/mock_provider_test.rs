// Behaviour of the in-memory provider the workflow tests rely on.
#![cfg(feature = "mock")]

use vmprov_common::{InstanceSpec, OperationStatus};
use vmprov_providers::mock::{MockCall, MockProvider, MOCK_PUBLIC_IP};
use vmprov_providers::ComputeProvider;

fn spec(name: &str) -> InstanceSpec {
    InstanceSpec {
        name: name.to_string(),
        machine_type: "zones/us-central1-a/machineTypes/e2-custom-8-8192".to_string(),
        source_image: "projects/debian-cloud/global/images/debian-11-v20240110".to_string(),
        disk_size_gb: 10,
        network: "global/networks/default".to_string(),
        assign_public_ip: true,
    }
}

#[tokio::test]
async fn test_operation_turns_done_after_pending_polls() {
    let mock = MockProvider::new().with_pending_polls(2);
    let op = mock
        .insert_instance("p", "us-central1-a", &spec("vm-1"))
        .await
        .unwrap();
    assert_eq!(op.status, OperationStatus::Pending);

    let mut statuses = vec![];
    for _ in 0..3 {
        let polled = mock
            .get_zone_operation("p", "us-central1-a", &op.name)
            .await
            .unwrap();
        statuses.push(polled.status);
    }
    assert_eq!(
        statuses,
        vec![
            OperationStatus::Running,
            OperationStatus::Running,
            OperationStatus::Done
        ]
    );
    assert_eq!(mock.operation_polls(), 3);

    let inst = mock.get_instance("p", "us-central1-a", "vm-1").await.unwrap();
    assert_eq!(inst.status.as_deref(), Some("RUNNING"));
    assert_eq!(inst.public_ip(), Some(MOCK_PUBLIC_IP));
}

#[tokio::test]
async fn test_duplicate_name_is_rejected() {
    let mock = MockProvider::new();
    mock.insert_instance("p", "z", &spec("vm-1")).await.unwrap();
    let err = mock.insert_instance("p", "z", &spec("vm-1")).await.unwrap_err();
    let api = err.downcast_ref::<vmprov_common::ApiError>().unwrap();
    assert_eq!(api.status, 409);

    // Same name in another zone is fine.
    mock.insert_instance("p", "other-zone", &spec("vm-1"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failed_operation_leaves_no_instance() {
    let mock = MockProvider::new().with_operation_error("QUOTA_EXCEEDED", "Quota 'CPUS' exceeded");
    let op = mock.insert_instance("p", "z", &spec("vm-1")).await.unwrap();
    let done = mock.get_zone_operation("p", "z", &op.name).await.unwrap();
    assert!(done.is_done());
    assert!(done.failure().is_some());
    assert!(mock.get_instance("p", "z", "vm-1").await.is_err());
}

#[tokio::test]
async fn test_calls_are_recorded_in_order() {
    let mock = MockProvider::new();
    mock.get_image_from_family("debian-cloud", "debian-11")
        .await
        .unwrap();
    let _ = mock.get_zone_operation("p", "z", "missing").await;

    assert_eq!(
        mock.calls(),
        vec![
            MockCall::ImageFromFamily {
                project: "debian-cloud".to_string(),
                family: "debian-11".to_string(),
            },
            MockCall::GetOperation {
                project: "p".to_string(),
                zone: "z".to_string(),
                operation: "missing".to_string(),
            },
        ]
    );
}
