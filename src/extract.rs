//! Orchestration: argument → OCR → synthesis → printable outcome.
//!
//! [`Orchestrator`] borrows an already-built [`TextExtractor`] and
//! [`Generator`], so the model is loaded once by the caller and tests can
//! hand in stubs. [`read_image`] runs OCR alone, so a caller can read the
//! image before loading a model. [`run`] is the all-in-one entry point that
//! builds the engines itself, and only once OCR has produced text.

use crate::config::{Backend, ExtractionConfig};
use crate::error::{OcrError, RxError, SynthesisError};
use crate::output::{ExtractionOutput, ExtractionStats};
use crate::pipeline::input::resolve_image;
use crate::pipeline::local::LocalModel;
use crate::pipeline::ocr::{TesseractExtractor, TextExtractor};
use crate::pipeline::provider::ProviderGenerator;
use crate::pipeline::synthesize::{synthesize, Generator};
use std::time::Instant;
use tracing::{info, warn};

/// Printed when no image argument is given.
pub const USAGE_MESSAGE: &str = "Please provide the path to the prescription image.";

/// Prefix of the message printed when synthesis fails.
pub const SYNTHESIS_ERROR_PREFIX: &str = "Error generating instructions: ";

/// What one invocation ended with.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// No image argument.
    Usage,
    /// The text extractor failed; synthesis was skipped.
    OcrFailed(OcrError),
    /// OCR succeeded but the generator failed.
    SynthesisFailed {
        ocr_text: String,
        error: SynthesisError,
    },
    /// Both stages succeeded.
    Extracted(Box<ExtractionOutput>),
}

impl Outcome {
    /// The line printed to stdout for this outcome.
    ///
    /// In structured mode a parsed record is shown as pretty JSON; without
    /// one the model's text is shown as-is.
    pub fn message(&self) -> String {
        match self {
            Outcome::Usage => USAGE_MESSAGE.to_string(),
            Outcome::OcrFailed(e) => e.to_string(),
            Outcome::SynthesisFailed { error, .. } => format!("{SYNTHESIS_ERROR_PREFIX}{error}"),
            Outcome::Extracted(output) => match output.record {
                Some(ref record) => serde_json::to_string_pretty(record)
                    .unwrap_or_else(|_| output.result.clone()),
                None => output.result.clone(),
            },
        }
    }

    /// Process exit status. Usage and OCR failures keep status 0 so scripts
    /// that key on stdout keep working; a failed generation is an error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::Usage | Outcome::OcrFailed(_) | Outcome::Extracted(_) => 0,
            Outcome::SynthesisFailed { .. } => 1,
        }
    }

    pub fn output(&self) -> Option<&ExtractionOutput> {
        match self {
            Outcome::Extracted(output) => Some(output.as_ref()),
            _ => None,
        }
    }
}

/// Runs the two stages against borrowed engines.
pub struct Orchestrator<'a> {
    extractor: &'a dyn TextExtractor,
    generator: &'a dyn Generator,
    config: &'a ExtractionConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        extractor: &'a dyn TextExtractor,
        generator: &'a dyn Generator,
        config: &'a ExtractionConfig,
    ) -> Self {
        Self {
            extractor,
            generator,
            config,
        }
    }

    /// Process one image argument.
    ///
    /// `None` yields [`Outcome::Usage`] without touching either stage. The
    /// generator runs exactly once when OCR succeeds, whatever the text says,
    /// and never when OCR fails.
    pub async fn process(&self, image: Option<&str>) -> Outcome {
        let Some(source) = image else {
            return Outcome::Usage;
        };
        match read_image(self.extractor, source, self.config).await {
            Ok(reading) => self.complete(reading).await,
            Err(e) => Outcome::OcrFailed(e),
        }
    }

    /// Run synthesis on text that OCR already produced.
    pub async fn complete(&self, reading: OcrReading) -> Outcome {
        let OcrReading {
            source,
            text: ocr_text,
            duration_ms: ocr_duration_ms,
            started,
        } = reading;

        let synthesis = match synthesize(self.generator, &ocr_text, self.config).await {
            Ok(s) => s,
            Err(error) => {
                warn!("Synthesis failed: {}", error);
                return Outcome::SynthesisFailed { ocr_text, error };
            }
        };

        let stats = ExtractionStats {
            ocr_duration_ms,
            generation_duration_ms: synthesis.duration_ms,
            total_duration_ms: started.elapsed().as_millis() as u64,
            prompt_tokens: synthesis.generation.prompt_tokens,
            completion_tokens: synthesis.generation.completion_tokens,
            truncated: synthesis.generation.truncated,
        };
        info!("Extraction finished in {}ms", stats.total_duration_ms);

        Outcome::Extracted(Box::new(ExtractionOutput {
            source,
            ocr_text,
            prompt: synthesis.prompt,
            result: synthesis.result,
            completion: synthesis.generation.completion,
            record: synthesis.record,
            stats,
        }))
    }
}

/// Text read from one image, waiting for synthesis.
#[derive(Debug, Clone)]
pub struct OcrReading {
    pub source: String,
    pub text: String,
    pub duration_ms: u64,
    started: Instant,
}

/// Resolve `source` and run `extractor` on it.
///
/// Needs no generator, so callers can read the image before paying for a
/// model load and stop early on [`OcrError`].
pub async fn read_image(
    extractor: &dyn TextExtractor,
    source: &str,
    config: &ExtractionConfig,
) -> Result<OcrReading, OcrError> {
    let started = Instant::now();
    info!("Processing prescription image: {}", source);

    // Keeps a downloaded image alive until OCR is done.
    let text = match resolve_image(source, config.download_timeout_secs).await {
        Ok(resolved) => extractor.extract(resolved.path()).await,
        Err(e) => Err(e),
    }
    .inspect_err(|e| warn!("OCR failed: {}", e))?;

    if text.trim().is_empty() {
        warn!("OCR returned no text; continuing with an empty prescription");
    }
    Ok(OcrReading {
        source: source.to_string(),
        text,
        duration_ms: started.elapsed().as_millis() as u64,
        started,
    })
}

/// Build the generator selected by `config.backend`.
///
/// For [`Backend::Local`] this loads the full model and blocks accordingly;
/// async callers should run it on a blocking thread.
pub fn load_generator(config: &ExtractionConfig) -> Result<Box<dyn Generator>, RxError> {
    match config.backend {
        Backend::Local => Ok(Box::new(LocalModel::load(
            &config.model_dir,
            config.device,
            config.dtype,
        )?)),
        Backend::Provider => Ok(Box::new(ProviderGenerator::from_config(config)?)),
    }
}

/// Process `image` end to end with engines built from `config`.
///
/// The argument is checked first and OCR runs next: with no image, or an
/// image OCR cannot read, nothing is loaded. Engine construction failures
/// are fatal and come back as `Err`.
pub async fn run(image: Option<&str>, config: &ExtractionConfig) -> Result<Outcome, RxError> {
    let Some(source) = image else {
        return Ok(Outcome::Usage);
    };

    let extractor = TesseractExtractor::new(config.ocr.clone());
    let reading = match read_image(&extractor, source, config).await {
        Ok(reading) => reading,
        Err(e) => return Ok(Outcome::OcrFailed(e)),
    };

    let load_config = config.clone();
    let generator = tokio::task::spawn_blocking(move || load_generator(&load_config))
        .await
        .map_err(|e| RxError::Internal(format!("model loading worker failed: {e}")))??;

    Ok(Orchestrator::new(&extractor, generator.as_ref(), config)
        .complete(reading)
        .await)
}
