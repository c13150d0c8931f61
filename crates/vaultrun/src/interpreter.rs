//! Maps script output to a run result

use crate::state::RunUpdate;
use crate::types::ReturnKind;

/// Marker a plotting script prints once its image is written
pub const SAVED_PLOT_MARKER: &str = "Saved plot";

/// Turn trimmed, non-empty script output into the run's final update.
///
/// Text computations succeed with the output as their result. Graph
/// computations must report `Saved plot`; the image path is whatever follows
/// the last `:` in the output.
pub fn interpret(kind: ReturnKind, output: &str) -> RunUpdate {
    if !kind.expects_image() {
        return RunUpdate::success(output, None);
    }

    if !output.contains(SAVED_PLOT_MARKER) {
        return RunUpdate::error(output);
    }

    let trimmed = output.trim();
    let image = trimmed
        .rsplit(':')
        .next()
        .unwrap_or(trimmed)
        .trim()
        .to_string();
    RunUpdate::success(output, Some(image))
}
