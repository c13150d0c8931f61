use std::collections::HashSet;

use vaultrun::state::{RUN_FAILED_MESSAGE, RunStatus};
use vaultrun::types::{ReturnKind, RunSource};

use super::{Harness, OPEN_DATASET, OTHER_DATASET, script_computation};

#[tokio::test]
async fn runs_on_different_datasets_finish_independently() {
    let harness = Harness::new(vec![
        script_computation(1, "fail.sh", "{dataset_file} {variable}", ReturnKind::Text),
        script_computation(2, "mean.sh", "{dataset_file} {variable}", ReturnKind::Text),
    ])
    .await;
    let failing = harness
        .store
        .create_run(RunSource::ViaDataset(OPEN_DATASET), 1, Some(7), "value")
        .await
        .unwrap();
    let passing = harness
        .store
        .create_run(RunSource::ViaDataset(OTHER_DATASET), 2, Some(7), "value")
        .await
        .unwrap();

    let summary = harness.round().await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 1);

    let failing = harness.run(failing.id).await;
    assert_eq!(failing.status, RunStatus::Error);
    assert_eq!(failing.result_text.as_deref(), Some(RUN_FAILED_MESSAGE));

    let passing = harness.run(passing.id).await;
    assert_eq!(passing.status, RunStatus::Success);
    assert_eq!(passing.result_text.as_deref(), Some("mean = 15.0"));
}

#[tokio::test]
async fn concurrent_runs_on_one_dataset_get_private_copies() {
    let harness = Harness::new(vec![script_computation(
        1,
        "where.sh",
        "{dataset_file}",
        ReturnKind::Text,
    )])
    .await;
    let mut ids = Vec::new();
    for _ in 0..5 {
        let run = harness
            .store
            .create_run(RunSource::ViaDataset(OPEN_DATASET), 1, Some(7), "value")
            .await
            .unwrap();
        ids.push(run.id);
    }

    let summary = harness.round().await;
    assert_eq!(summary.succeeded, 5);

    let mut paths = HashSet::new();
    for id in ids {
        let run = harness.run(id).await;
        let output = run.result_text.unwrap();
        let (path, mode) = output.rsplit_once(' ').unwrap();

        assert!(path.starts_with(harness.work_dir().to_str().unwrap()));
        assert!(path.contains(&format!("open.csv.{id}.")));
        assert_eq!(mode, "600");
        assert!(!std::path::Path::new(path).exists());
        paths.insert(path.to_string());
    }
    assert_eq!(paths.len(), 5);
    assert!(harness.leftover_working_copies().is_empty());
}

#[tokio::test]
async fn ciphertext_is_untouched_by_runs() {
    let harness = Harness::new(vec![script_computation(
        1,
        "mean.sh",
        "{dataset_file} {variable}",
        ReturnKind::Text,
    )])
    .await;
    let path = harness.data_dir().join("open.csv");
    let before = tokio::fs::read(&path).await.unwrap();

    harness
        .store
        .create_run(RunSource::ViaDataset(OPEN_DATASET), 1, Some(7), "value")
        .await
        .unwrap();
    harness.round().await;

    assert_eq!(tokio::fs::read(&path).await.unwrap(), before);
}
