use vaultrun::state::{RUN_FAILED_MESSAGE, RunStatus};
use vaultrun::types::{ReturnKind, RunSource};

use super::{GRANTED_REQUEST, Harness, OPEN_DATASET, script_computation};

#[tokio::test]
async fn text_run_records_script_output() {
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

    let summary = harness.round().await;
    assert_eq!(summary.succeeded, 1);

    let run = harness.run(run.id).await;
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.result_text.as_deref(), Some("mean = 4.2"));
    assert_eq!(run.result_image, None);
}

#[tokio::test]
async fn graph_run_extracts_image_path() {
    let harness = Harness::new(vec![script_computation(
        1,
        "plot.sh",
        "{dataset_file} {variables}",
        ReturnKind::Graph,
    )])
    .await;
    let run = harness
        .store
        .create_run(RunSource::ViaRequest(GRANTED_REQUEST), 1, Some(3), "value")
        .await
        .unwrap();

    harness.round().await;

    let run = harness.run(run.id).await;
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(
        run.result_text.as_deref(),
        Some("Done. Saved plot: /tmp/out/plot_7.png")
    );
    assert_eq!(run.result_image.as_deref(), Some("/tmp/out/plot_7.png"));
}

#[tokio::test]
async fn graph_run_without_plot_marker_fails_with_output() {
    let harness = Harness::new(vec![script_computation(
        1,
        "no_plot.sh",
        "{dataset_file} {variable}",
        ReturnKind::TextAndGraph,
    )])
    .await;
    let run = harness
        .store
        .create_run(RunSource::ViaDataset(OPEN_DATASET), 1, Some(7), "city")
        .await
        .unwrap();

    harness.round().await;

    let run = harness.run(run.id).await;
    assert_eq!(run.status, RunStatus::Error);
    assert_eq!(run.result_text.as_deref(), Some("Column city is not numeric"));
    assert_eq!(run.result_image, None);
}

#[tokio::test]
async fn non_zero_exit_is_terminal_with_generic_message() {
    let harness = Harness::new(vec![script_computation(
        1,
        "fail.sh",
        "{dataset_file} {variable}",
        ReturnKind::Text,
    )])
    .await;
    let run = harness
        .store
        .create_run(RunSource::ViaDataset(OPEN_DATASET), 1, Some(7), "value")
        .await
        .unwrap();

    let summary = harness.round().await;
    assert_eq!(summary.failed, 1);

    let run = harness.run(run.id).await;
    assert_eq!(run.status, RunStatus::Error);
    assert_eq!(run.result_text.as_deref(), Some(RUN_FAILED_MESSAGE));
    assert_eq!(run.attempts, 0);

    // Nothing is left to pick up on the next round
    let next = harness.round().await;
    assert_eq!(next.total(), 0);
}

#[tokio::test]
async fn empty_output_is_error_with_empty_text() {
    let harness = Harness::new(vec![script_computation(
        1,
        "silent.sh",
        "{dataset_file}",
        ReturnKind::Text,
    )])
    .await;
    let run = harness
        .store
        .create_run(RunSource::ViaDataset(OPEN_DATASET), 1, Some(7), "value")
        .await
        .unwrap();

    harness.round().await;

    let run = harness.run(run.id).await;
    assert_eq!(run.status, RunStatus::Error);
    assert_eq!(run.result_text.as_deref(), Some(""));
}

#[tokio::test]
async fn variables_stay_in_one_argument() {
    let harness = Harness::new(vec![script_computation(
        1,
        "args.sh",
        "{dataset_file} {variables} --owner={user_id}",
        ReturnKind::Text,
    )])
    .await;
    let run = harness
        .store
        .create_run(
            RunSource::ViaDataset(OPEN_DATASET),
            1,
            Some(7),
            "a; touch pwned $(id)",
        )
        .await
        .unwrap();

    harness.round().await;

    let run = harness.run(run.id).await;
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(
        run.result_text.as_deref(),
        Some("3|a; touch pwned $(id)|--owner=1")
    );
}
