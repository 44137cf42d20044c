//! Orchestration tests with stub OCR and generator stages.
//!
//! No Tesseract binary or model weights are needed: both stages are replaced
//! by in-memory doubles that count their calls and record their inputs.

use async_trait::async_trait;
use rx_extract::{
    read_image, ExtractionConfig, GenerationParams, Generation, Generator, OcrError,
    Orchestrator, Outcome, SynthesisError, TesseractExtractor, TextExtractor,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

// ── Test doubles ─────────────────────────────────────────────────────────────

struct StubExtractor {
    reply: Result<String, OcrError>,
    calls: AtomicUsize,
    paths: Mutex<Vec<PathBuf>>,
}

impl StubExtractor {
    fn ok(text: &str) -> Self {
        Self::with(Ok(text.to_string()))
    }

    fn failing(error: OcrError) -> Self {
        Self::with(Err(error))
    }

    fn with(reply: Result<String, OcrError>) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
            paths: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for StubExtractor {
    async fn extract(&self, path: &Path) -> Result<String, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.paths.lock().unwrap().push(path.to_path_buf());
        self.reply.clone()
    }
}

struct StubGenerator {
    reply: Result<String, SynthesisError>,
    prompts: Mutex<Vec<String>>,
}

impl StubGenerator {
    fn ok(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn failing(error: SynthesisError) -> Self {
        Self {
            reply: Err(error),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for StubGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<Generation, SynthesisError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone().map(Generation::from_text)
    }
}

// ── Literal scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn sample_prescription_end_to_end() {
    let extractor = StubExtractor::ok("Amoxicillin 500mg twice daily");
    let generator = StubGenerator::ok("Medicine: Amoxicillin, Dosage: 500mg, Instructions: twice daily");
    let config = ExtractionConfig::default();

    let outcome = Orchestrator::new(&extractor, &generator, &config)
        .process(Some("scripts/fixtures/sample_rx.png"))
        .await;

    assert_eq!(
        outcome.message(),
        "Medicine: Amoxicillin, Dosage: 500mg, Instructions: twice daily"
    );
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(extractor.calls(), 1);
    assert_eq!(
        extractor.paths.lock().unwrap()[0],
        PathBuf::from("scripts/fixtures/sample_rx.png")
    );
    assert_eq!(
        generator.prompts(),
        vec!["Extract the medicine names, dosages, and instructions from the following prescription text:\n\nAmoxicillin 500mg twice daily".to_string()]
    );
}

#[tokio::test]
async fn ocr_failure_prints_error_and_skips_synthesis() {
    let extractor =
        StubExtractor::failing(OcrError::Tesseract("cannot identify image file".into()));
    let generator = StubGenerator::ok("should never be produced");
    let config = ExtractionConfig::default();

    let outcome = Orchestrator::new(&extractor, &generator, &config)
        .process(Some("bad.png"))
        .await;

    assert!(matches!(outcome, Outcome::OcrFailed(_)));
    assert_eq!(
        outcome.message(),
        "Error processing image with Tesseract: cannot identify image file"
    );
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn missing_argument_prints_usage_and_calls_nothing() {
    let extractor = StubExtractor::ok("unused");
    let generator = StubGenerator::ok("unused");
    let config = ExtractionConfig::default();

    let outcome = Orchestrator::new(&extractor, &generator, &config)
        .process(None)
        .await;

    assert_eq!(
        outcome.message(),
        "Please provide the path to the prescription image."
    );
    assert_eq!(extractor.calls(), 0);
    assert_eq!(generator.calls(), 0);
}

// ── Redesigned behaviour ────────────────────────────────────────────────────

#[tokio::test]
async fn ocr_text_mentioning_error_still_reaches_synthesis() {
    let extractor = StubExtractor::ok("Rx: Ondansetron 4mg. Error in previous dose corrected.");
    let generator = StubGenerator::ok("Medicine: Ondansetron, Dosage: 4mg");
    let config = ExtractionConfig::default();

    let outcome = Orchestrator::new(&extractor, &generator, &config)
        .process(Some("rx.png"))
        .await;

    assert!(matches!(outcome, Outcome::Extracted(_)));
    assert_eq!(generator.calls(), 1);
    assert_eq!(outcome.message(), "Medicine: Ondansetron, Dosage: 4mg");
}

#[tokio::test]
async fn empty_ocr_text_is_still_synthesised() {
    let extractor = StubExtractor::ok("");
    let generator = StubGenerator::ok("No medicines found.");
    let config = ExtractionConfig::default();

    let outcome = Orchestrator::new(&extractor, &generator, &config)
        .process(Some("blank.png"))
        .await;

    assert_eq!(generator.calls(), 1);
    assert!(generator.prompts()[0].ends_with("prescription text:\n\n"));
    assert_eq!(outcome.message(), "No medicines found.");
}

#[tokio::test]
async fn synthesis_failure_is_reported_not_fatal() {
    let extractor = StubExtractor::ok("Lisinopril 10mg once daily");
    let generator = StubGenerator::failing(SynthesisError::Generation {
        generated: 3,
        detail: "out of memory".into(),
    });
    let config = ExtractionConfig::default();

    let outcome = Orchestrator::new(&extractor, &generator, &config)
        .process(Some("rx.png"))
        .await;

    match &outcome {
        Outcome::SynthesisFailed { ocr_text, error } => {
            assert_eq!(ocr_text, "Lisinopril 10mg once daily");
            assert!(matches!(error, SynthesisError::Generation { .. }));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(outcome
        .message()
        .starts_with("Error generating instructions: generation failed after 3 tokens"));
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn structured_mode_prints_parsed_record() {
    let extractor = StubExtractor::ok("Metformin 500mg BD x 30 days");
    let generator = StubGenerator::ok(
        r#"Sure. {"medicines":[{"name":"Metformin","dosage":"500mg","frequency":"twice daily","duration":"30 days","instructions":""}],"warnings":[]}"#,
    );
    let config = ExtractionConfig::builder().structured(true).build().unwrap();

    let outcome = Orchestrator::new(&extractor, &generator, &config)
        .process(Some("rx.png"))
        .await;

    let output = outcome.output().expect("extraction succeeded");
    let record = output.record.as_ref().expect("record parsed");
    assert_eq!(record.medicines[0].name, "Metformin");
    assert_eq!(record.medicines[0].duration, "30 days");

    let printed: serde_json::Value = serde_json::from_str(&outcome.message()).unwrap();
    assert_eq!(printed["medicines"][0]["dosage"], "500mg");
    assert!(generator.prompts()[0].contains("Prescription: \"Metformin 500mg BD x 30 days\""));
}

#[tokio::test]
async fn output_records_stage_texts() {
    let extractor = StubExtractor::ok("Cetirizine 10mg at night");
    let generator = StubGenerator::ok("Medicine: Cetirizine");
    let config = ExtractionConfig::default();

    let outcome = Orchestrator::new(&extractor, &generator, &config)
        .process(Some("rx.png"))
        .await;

    let output = outcome.output().unwrap();
    assert_eq!(output.source, "rx.png");
    assert_eq!(output.ocr_text, "Cetirizine 10mg at night");
    assert!(output.prompt.ends_with("Cetirizine 10mg at night"));
    assert_eq!(output.result, "Medicine: Cetirizine");
    assert!(output.record.is_none());
}

// ── OCR ahead of model loading ──────────────────────────────────────────────

#[tokio::test]
async fn ocr_failure_needs_no_generator() {
    let extractor =
        StubExtractor::failing(OcrError::Tesseract("cannot identify image file".into()));
    let config = ExtractionConfig::default();

    let err = read_image(&extractor, "bad.png", &config).await.unwrap_err();

    assert_eq!(
        Outcome::OcrFailed(err).message(),
        "Error processing image with Tesseract: cannot identify image file"
    );
    assert_eq!(extractor.calls(), 1);
}

#[tokio::test]
async fn reading_then_completing_matches_process() {
    let extractor = StubExtractor::ok("Amoxicillin 500mg twice daily");
    let generator = StubGenerator::ok("Medicine: Amoxicillin, Dosage: 500mg, Instructions: twice daily");
    let config = ExtractionConfig::default();

    let reading = read_image(&extractor, "scripts/fixtures/sample_rx.png", &config)
        .await
        .unwrap();
    assert_eq!(reading.text, "Amoxicillin 500mg twice daily");
    assert_eq!(generator.calls(), 0);

    let outcome = Orchestrator::new(&extractor, &generator, &config)
        .complete(reading)
        .await;

    assert_eq!(
        outcome.message(),
        "Medicine: Amoxicillin, Dosage: 500mg, Instructions: twice daily"
    );
    assert_eq!(outcome.output().unwrap().source, "scripts/fixtures/sample_rx.png");
    assert_eq!(extractor.calls(), 1);
    assert_eq!(generator.calls(), 1);
}

// ── Real extractor on bad input (no Tesseract needed) ───────────────────────

#[tokio::test]
async fn tesseract_extractor_on_missing_file() {
    let generator = StubGenerator::ok("unused");
    let config = ExtractionConfig::default();
    let extractor = TesseractExtractor::new(config.ocr.clone());

    let outcome = Orchestrator::new(&extractor, &generator, &config)
        .process(Some("definitely/not/here/rx.png"))
        .await;

    assert!(matches!(
        outcome,
        Outcome::OcrFailed(OcrError::ImageNotFound { .. })
    ));
    assert!(outcome
        .message()
        .starts_with("Error processing image with Tesseract: "));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn tesseract_extractor_on_non_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.png");
    std::fs::write(&path, "Amoxicillin 500mg twice daily").unwrap();

    let generator = StubGenerator::ok("unused");
    let config = ExtractionConfig::default();
    let extractor = TesseractExtractor::new(config.ocr.clone());

    let outcome = Orchestrator::new(&extractor, &generator, &config)
        .process(path.to_str())
        .await;

    assert!(matches!(
        outcome,
        Outcome::OcrFailed(OcrError::DecodeFailed { .. })
    ));
    assert_eq!(generator.calls(), 0);
}
