//! # rx-extract
//!
//! Read a prescription image and extract medicine names, dosages and
//! instructions with OCR followed by a causal language model.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image path / URL
//!  │
//!  ├─ 1. Input       resolve local file or download from URL
//!  ├─ 2. OCR         decode + Tesseract (spawn_blocking)
//!  ├─ 3. Prompt      fixed instruction template + OCR text
//!  ├─ 4. Generate    local Llama-family model (candle) or hosted provider
//!  ├─ 5. Polish      whitespace cleanup, optional JSON record recovery
//!  └─ 6. Output      printed text or ExtractionOutput JSON
//! ```
//!
//! An OCR failure stops the pipeline with a message starting
//! `"Error processing image with Tesseract: "`; the generator is never called.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rx_extract::{load_generator, ExtractionConfig, Orchestrator, TesseractExtractor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::builder()
//!         .model_dir("models/granite-7b-instruct")
//!         .build()?;
//!     let generator = load_generator(&config)?;
//!     let extractor = TesseractExtractor::new(config.ocr.clone());
//!
//!     let outcome = Orchestrator::new(&extractor, generator.as_ref(), &config)
//!         .process(Some("scan.png"))
//!         .await;
//!     println!("{}", outcome.message());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `rx-extract` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `cuda`  | off     | Lets the local backend run on `--device cuda` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    Backend, DevicePreference, ExtractionConfig, ExtractionConfigBuilder, GenerationParams,
    OcrSettings, WeightDType,
};
pub use error::{OcrError, RxError, SynthesisError, OCR_ERROR_PREFIX};
pub use extract::{
    load_generator, read_image, run, OcrReading, Orchestrator, Outcome, USAGE_MESSAGE,
};
pub use output::{ExtractionOutput, ExtractionStats, Medicine, PrescriptionRecord};
pub use pipeline::local::{LocalModel, TokenCodec};
pub use pipeline::ocr::{TesseractExtractor, TextExtractor};
pub use pipeline::provider::ProviderGenerator;
pub use pipeline::synthesize::{synthesize, Generation, Generator, Synthesis};
pub use prompts::{build_prompt, DEFAULT_PROMPT_TEMPLATE};
