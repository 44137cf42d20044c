//! Pipeline stages for prescription extraction.
//!
//! Each submodule implements one step, so every stage can be tested alone
//! and the generator can be swapped without touching OCR.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ ocr ──▶ synthesize ──▶ postprocess
//! (path/URL) (tesseract) (local | provider) (cleanup, JSON)
//! ```
//!
//! 1. [`input`]: resolve the argument to a local image, downloading URLs
//! 2. [`ocr`]: decode the image and run Tesseract ([`ocr::TextExtractor`])
//! 3. [`synthesize`]: build the prompt and call a [`synthesize::Generator`],
//!    either [`local::LocalModel`] (candle) or [`provider::ProviderGenerator`]
//! 4. [`postprocess`]: deterministic cleanup and structured-record recovery

pub mod input;
pub mod local;
pub mod ocr;
pub mod postprocess;
pub mod provider;
pub mod synthesize;
