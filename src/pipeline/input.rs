//! Input resolution: turn the positional argument into a local image path.
//!
//! Local paths are passed through untouched. Existence and format are
//! checked by the OCR stage, which owns the error message. URLs are
//! downloaded into a `TempDir` that lives as long as the returned
//! [`ResolvedImage`], so the file disappears once the extraction is over.

use crate::error::OcrError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// A local image path, possibly backed by a temporary download.
#[derive(Debug)]
pub enum ResolvedImage {
    /// Input was already a local path.
    Local(PathBuf),
    /// Input was a URL; the image lives in `_temp_dir`.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedImage {
    /// Path to the image regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedImage::Local(p) => p,
            ResolvedImage::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the command-line argument to a local image path.
pub async fn resolve_image(input: &str, timeout_secs: u64) -> Result<ResolvedImage, OcrError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        debug!("Using local image: {}", input);
        Ok(ResolvedImage::Local(PathBuf::from(input)))
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedImage, OcrError> {
    info!("Downloading image from: {}", url);

    let failed = |reason: String| OcrError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

    let temp_dir = TempDir::with_prefix("rx-extract")
        .map_err(|e| OcrError::Internal(format!("cannot create temp dir: {e}")))?;
    let file_path = temp_dir.path().join(filename_from_url(url));

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| OcrError::Internal(format!("cannot write downloaded image: {e}")))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());

    Ok(ResolvedImage::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of the URL if it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded-image".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/rx.png"));
        assert!(is_url("http://example.com/rx.png"));
        assert!(!is_url("scripts/fixtures/sample_rx.png"));
        assert!(!is_url("bad.png"));
        assert!(!is_url(""));
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(filename_from_url("https://example.com/scans/rx.jpg"), "rx.jpg");
        assert_eq!(filename_from_url("https://example.com/scans/"), "downloaded-image");
        assert_eq!(filename_from_url("https://example.com/upload"), "downloaded-image");
    }

    #[tokio::test]
    async fn local_path_is_not_checked_here() {
        let resolved = resolve_image("does/not/exist.png", 5).await.unwrap();
        assert_eq!(resolved.path(), Path::new("does/not/exist.png"));
    }
}
