//! Result image retrieval

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("run has no result image")]
    NoImage,

    #[error("image path '{0}' escapes the plot directory")]
    OutsidePlotDir(String),

    #[error("failed to read image {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Image bytes ready to serve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Content type for a result file, chosen by extension
pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Resolve a run's image path against `plot_dir`.
///
/// Relative paths are joined to `plot_dir`. Absolute paths are accepted only
/// if they already lie inside it. `..` components are never allowed.
pub fn resolve_image_path(plot_dir: &Path, image: &str) -> Result<PathBuf, MediaError> {
    let candidate = Path::new(image);
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(MediaError::OutsidePlotDir(image.to_string()));
    }

    if candidate.is_absolute() {
        if candidate.starts_with(plot_dir) {
            return Ok(candidate.to_path_buf());
        }
        return Err(MediaError::OutsidePlotDir(image.to_string()));
    }
    Ok(plot_dir.join(candidate))
}

/// Load a run's result image from `plot_dir`
pub async fn load_result_image(
    plot_dir: &Path,
    image: Option<&str>,
) -> Result<ResultImage, MediaError> {
    let image = image.filter(|s| !s.is_empty()).ok_or(MediaError::NoImage)?;
    let path = resolve_image_path(plot_dir, image)?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|source| MediaError::Io {
            path: path.clone(),
            source,
        })?;
    let content_type = content_type_for(&path);
    debug!(path = %path.display(), len = bytes.len(), content_type, "loaded result image");
    Ok(ResultImage {
        bytes,
        content_type,
    })
}
