use vaultrun::gate::Denial;
use vaultrun::state::RunStatus;
use vaultrun::store::{RunStore, StoreError};
use vaultrun::types::{ComputationRun, ReturnKind, RunSource};

use super::{
    DENIED_REQUEST, GRANTED_REQUEST, Harness, PENDING_REQUEST, PROTECTED_DATASET,
    script_computation,
};

fn computations() -> Vec<vaultrun::types::ComputationDefinition> {
    vec![script_computation(
        1,
        "where.sh",
        "{dataset_file}",
        ReturnKind::Text,
    )]
}

#[tokio::test]
async fn creation_rejects_unapproved_requests() {
    let harness = Harness::new(computations()).await;
    for request in [PENDING_REQUEST, DENIED_REQUEST] {
        let result = harness
            .store
            .create_run(RunSource::ViaRequest(request), 1, Some(4), "value")
            .await;
        assert!(matches!(
            result,
            Err(StoreError::Rejected(Denial::RequestNotApproved))
        ));
    }
    assert_eq!(harness.store.count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn creation_rejects_direct_run_on_protected_dataset() {
    let harness = Harness::new(computations()).await;
    let result = harness
        .store
        .create_run(RunSource::ViaDataset(PROTECTED_DATASET), 1, Some(9), "value")
        .await;
    assert!(matches!(
        result,
        Err(StoreError::Rejected(Denial::NotAllowedOnDataset))
    ));

    // The owner may run directly
    harness
        .store
        .create_run(RunSource::ViaDataset(PROTECTED_DATASET), 1, Some(1), "value")
        .await
        .unwrap();
}

#[tokio::test]
async fn unapproved_runs_never_reach_running() {
    let runs = vec![
        ComputationRun::new(1, RunSource::ViaRequest(PENDING_REQUEST), 1, Some(4), "value"),
        ComputationRun::new(2, RunSource::ViaRequest(DENIED_REQUEST), 1, Some(5), "value"),
        ComputationRun::new(3, RunSource::ViaDataset(PROTECTED_DATASET), 1, Some(9), "value"),
        ComputationRun::new(4, RunSource::ViaRequest(GRANTED_REQUEST), 1, Some(3), "value"),
    ];
    let harness = Harness::with_runs(computations(), runs).await;

    let summary = harness.round().await;
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.succeeded, 1);

    for (id, reason) in [
        (1, Denial::RequestNotApproved),
        (2, Denial::RequestNotApproved),
        (3, Denial::NotAllowedOnDataset),
    ] {
        let run = harness.run(id).await;
        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(run.result_text, Some(reason.to_string()));
    }
    assert_eq!(harness.run(4).await.status, RunStatus::Success);

    // No plaintext is left behind
    assert!(harness.leftover_working_copies().is_empty());
}
