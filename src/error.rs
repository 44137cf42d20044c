//! Error types for the rx-extract library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`RxError`]: **Fatal**. The pipeline cannot start at all (model
//!   directory missing, corrupt weights, provider not configured, invalid
//!   configuration). Raised while the engines are being built, before any
//!   image is touched.
//!
//! * [`OcrError`]: **Stage failure** of the text extractor. Its `Display`
//!   always starts with [`OCR_ERROR_PREFIX`] so the message printed to the
//!   user is stable regardless of which step failed.
//!
//! * [`SynthesisError`]: **Stage failure** of the instruction synthesizer
//!   (tokenizer, model forward pass, provider call). Returned to the
//!   orchestrator instead of aborting the process.

use std::path::PathBuf;
use thiserror::Error;

/// Prefix carried by every [`OcrError`] message.
pub const OCR_ERROR_PREFIX: &str = "Error processing image with Tesseract: ";

/// Fatal errors raised while preparing the pipeline.
#[derive(Debug, Error)]
pub enum RxError {
    // ── Model errors ──────────────────────────────────────────────────────
    /// The model directory does not exist.
    #[error("Model directory not found: '{path}'\nPass --model-dir or set RX_MODEL_DIR.")]
    ModelDirNotFound { path: PathBuf },

    /// A file the local backend needs is absent from the model directory.
    #[error("Model file missing: '{path}'\nExpected a Hugging Face checkpoint (config.json, tokenizer.json, *.safetensors).")]
    ModelFileMissing { path: PathBuf },

    /// A model file exists but could not be parsed or loaded.
    #[error("Failed to load model from '{path}': {detail}")]
    ModelLoad { path: PathBuf, detail: String },

    /// The requested compute device is not available in this build.
    #[error("Device '{device}' is unavailable: {detail}")]
    UnsupportedDevice { device: String, detail: String },

    // ── Provider errors ───────────────────────────────────────────────────
    /// The configured hosted provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of the text-extraction stage.
///
/// The orchestrator prints this verbatim and skips synthesis.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OcrError {
    /// No file at the given path.
    #[error("Error processing image with Tesseract: no such file: '{}'", .path.display())]
    ImageNotFound { path: PathBuf },

    /// The file exists but could not be opened or read.
    #[error("Error processing image with Tesseract: cannot read '{}': {detail}", .path.display())]
    ImageUnreadable { path: PathBuf, detail: String },

    /// The bytes are not an image we can decode.
    #[error("Error processing image with Tesseract: cannot identify image file '{}': {detail}", .path.display())]
    DecodeFailed { path: PathBuf, detail: String },

    /// URL input could not be fetched.
    #[error("Error processing image with Tesseract: failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Tesseract itself reported an error (binary missing, bad language pack, …).
    #[error("Error processing image with Tesseract: {0}")]
    Tesseract(String),

    /// Unexpected failure inside the extractor (temp dir, worker panic).
    #[error("Error processing image with Tesseract: {0}")]
    Internal(String),
}

/// Failure of the instruction-synthesis stage.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SynthesisError {
    /// The prompt could not be encoded into token ids.
    #[error("tokenization failed: {0}")]
    Tokenization(String),

    /// The model forward pass or sampler failed.
    #[error("generation failed after {generated} tokens: {detail}")]
    Generation { generated: usize, detail: String },

    /// Generated ids could not be decoded back to text.
    #[error("decoding failed: {0}")]
    Decoding(String),

    /// The hosted provider failed after all retries.
    #[error("provider call failed after {retries} retries: {detail}")]
    Provider { retries: u32, detail: String },

    /// Unexpected failure inside the synthesizer (worker panic etc.).
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_ocr_error_carries_prefix() {
        let errors = vec![
            OcrError::ImageNotFound {
                path: "bad.png".into(),
            },
            OcrError::ImageUnreadable {
                path: "bad.png".into(),
                detail: "permission denied".into(),
            },
            OcrError::DecodeFailed {
                path: "bad.png".into(),
                detail: "format unknown".into(),
            },
            OcrError::DownloadFailed {
                url: "https://example.com/rx.png".into(),
                reason: "HTTP 404".into(),
            },
            OcrError::Tesseract("tesseract is not installed".into()),
            OcrError::Internal("worker panicked".into()),
        ];
        for e in errors {
            let msg = e.to_string();
            assert!(msg.starts_with(OCR_ERROR_PREFIX), "got: {msg}");
        }
    }

    #[test]
    fn tesseract_error_is_prefix_plus_detail() {
        let e = OcrError::Tesseract("cannot identify image file".into());
        assert_eq!(
            e.to_string(),
            "Error processing image with Tesseract: cannot identify image file"
        );
    }

    #[test]
    fn generation_error_display() {
        let e = SynthesisError::Generation {
            generated: 12,
            detail: "shape mismatch".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("12 tokens"), "got: {msg}");
        assert!(msg.contains("shape mismatch"));
    }

    #[test]
    fn model_load_display() {
        let e = RxError::ModelLoad {
            path: "/models/granite".into(),
            detail: "truncated safetensors header".into(),
        };
        assert!(e.to_string().contains("/models/granite"));
        assert!(e.to_string().contains("truncated"));
    }
}
