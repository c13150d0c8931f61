use vaultrun::state::{RUN_RETRIES_EXHAUSTED_MESSAGE, RunStatus};
use vaultrun::types::{ReturnKind, RunSource};

use super::{Harness, OPEN_DATASET, script_computation};

#[tokio::test]
async fn corrupt_dataset_is_retried_until_the_ceiling() {
    let harness = Harness::new(vec![script_computation(
        1,
        "mean.sh",
        "{dataset_file} {variable}",
        ReturnKind::Text,
    )])
    .await;
    let run = harness
        .store
        .create_run(RunSource::ViaDataset(OPEN_DATASET), 1, Some(7), "value")
        .await
        .unwrap();

    let path = harness.data_dir().join("open.csv");
    let mut blob = tokio::fs::read(&path).await.unwrap();
    let last = blob.len() - 1;
    blob[last] ^= 0xff;
    tokio::fs::write(&path, blob).await.unwrap();

    for attempt in 1..3 {
        let summary = harness.round().await;
        assert_eq!(summary.requeued, 1);
        let run = harness.run(run.id).await;
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.attempts, attempt);
        assert_eq!(run.result_text, None);
    }

    let summary = harness.round().await;
    assert_eq!(summary.failed, 1);
    let run = harness.run(run.id).await;
    assert_eq!(run.status, RunStatus::Error);
    assert_eq!(run.attempts, 3);
    assert_eq!(run.result_text.as_deref(), Some(RUN_RETRIES_EXHAUSTED_MESSAGE));
    assert!(harness.leftover_working_copies().is_empty());
}

#[tokio::test]
async fn transient_failure_recovers_on_a_later_round() {
    let harness = Harness::new(vec![script_computation(
        1,
        "mean.sh",
        "{dataset_file} {variable}",
        ReturnKind::Text,
    )])
    .await;
    let run = harness
        .store
        .create_run(RunSource::ViaDataset(OPEN_DATASET), 1, Some(7), "value")
        .await
        .unwrap();

    let path = harness.data_dir().join("open.csv");
    let hidden = harness.data_dir().join("open.csv.bak");
    tokio::fs::rename(&path, &hidden).await.unwrap();

    let summary = harness.round().await;
    assert_eq!(summary.requeued, 1);

    tokio::fs::rename(&hidden, &path).await.unwrap();
    let summary = harness.round().await;
    assert_eq!(summary.succeeded, 1);

    let run = harness.run(run.id).await;
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.attempts, 1);
    assert_eq!(run.result_text.as_deref(), Some("mean = 4.2"));
}
