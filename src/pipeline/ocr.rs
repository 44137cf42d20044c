//! Text extraction: prescription image → raw OCR text.
//!
//! The image is decoded with the `image` crate first, sniffing the format from
//! the bytes rather than the extension. A file that is missing, unreadable or
//! not an image is reported without ever starting Tesseract, and whatever
//! the source format was, Tesseract always receives a lossless PNG.

use crate::config::OcrSettings;
use crate::error::OcrError;
use async_trait::async_trait;
use image::{DynamicImage, ImageReader};
use rusty_tesseract::{Args, Image as TesseractImage};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info};

/// Anything that can turn an image file into text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Recognise the text in the image at `path`.
    async fn extract(&self, path: &Path) -> Result<String, OcrError>;
}

/// [`TextExtractor`] backed by the `tesseract` binary.
#[derive(Debug, Clone)]
pub struct TesseractExtractor {
    settings: OcrSettings,
}

impl TesseractExtractor {
    pub fn new(settings: OcrSettings) -> Self {
        Self { settings }
    }

    fn tesseract_args(&self) -> Args {
        Args {
            lang: self.settings.language.clone(),
            dpi: self.settings.dpi,
            psm: self.settings.psm,
            ..Args::default()
        }
    }

    /// Blocking body of [`TextExtractor::extract`].
    fn extract_blocking(&self, path: &Path) -> Result<String, OcrError> {
        let start = Instant::now();
        let image = decode_image(path)?;
        debug!(
            "Decoded {} ({}x{}) in {:?}",
            path.display(),
            image.width(),
            image.height(),
            start.elapsed()
        );

        let workdir = TempDir::with_prefix("rx-ocr")
            .map_err(|e| OcrError::Internal(format!("cannot create temp dir: {e}")))?;
        let png_path = workdir.path().join("prescription.png");
        image
            .save_with_format(&png_path, image::ImageFormat::Png)
            .map_err(|e| OcrError::Internal(format!("cannot write PNG for tesseract: {e}")))?;

        let tess_image = TesseractImage::from_path(png_path.clone())
            .map_err(|e| OcrError::Tesseract(e.to_string()))?;
        let text = rusty_tesseract::image_to_string(&tess_image, &self.tesseract_args())
            .map_err(|e| OcrError::Tesseract(e.to_string()))?;

        info!(
            "OCR complete: {} characters in {:?}",
            text.chars().count(),
            start.elapsed()
        );
        Ok(text)
    }
}

impl Default for TesseractExtractor {
    fn default() -> Self {
        Self::new(OcrSettings::default())
    }
}

#[async_trait]
impl TextExtractor for TesseractExtractor {
    async fn extract(&self, path: &Path) -> Result<String, OcrError> {
        let this = self.clone();
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || this.extract_blocking(&path))
            .await
            .map_err(|e| OcrError::Internal(format!("OCR worker failed: {e}")))?
    }
}

/// Open and decode an image, mapping each failure to the matching [`OcrError`].
pub fn decode_image(path: &Path) -> Result<DynamicImage, OcrError> {
    let reader = ImageReader::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => OcrError::ImageNotFound {
            path: path.to_path_buf(),
        },
        _ => OcrError::ImageUnreadable {
            path: path.to_path_buf(),
            detail: e.to_string(),
        },
    })?;

    let reader = reader
        .with_guessed_format()
        .map_err(|e| OcrError::ImageUnreadable {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

    reader.decode().map_err(|e| OcrError::DecodeFailed {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}
