//! Configuration types for prescription extraction.
//!
//! Every knob of one run lives in [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. The CLI maps flags onto the builder; library
//! callers set only the fields they care about and keep the defaults for the
//! rest.

use crate::error::RxError;
use crate::prompts::{DEFAULT_PROMPT_TEMPLATE, TEXT_PLACEHOLDER};
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Model directory used when none is configured.
///
/// Relative to the working directory, matching the layout where the tool is
/// run from `server/scripts/` next to a checkout of the model.
pub const DEFAULT_MODEL_DIR: &str = "../../granite-7b-instruct";

/// Default bound on the generated sequence length, in tokens (prompt included).
pub const DEFAULT_MAX_LENGTH: usize = 500;

/// Default sampling seed.
pub const DEFAULT_SEED: u64 = 299_792_458;

/// Configuration for one prescription extraction.
///
/// # Example
/// ```rust
/// use rx_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .max_length(800)
///     .ocr_language("eng+fra")
///     .build()
///     .unwrap();
/// assert_eq!(config.generation.max_length, 800);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Which generator runs the synthesis stage. Default: [`Backend::Local`].
    pub backend: Backend,

    /// Directory holding `config.json`, `tokenizer.json` and the safetensors
    /// weights for the local backend. Default: [`DEFAULT_MODEL_DIR`].
    pub model_dir: PathBuf,

    /// Compute device for the local backend. Default: CPU.
    pub device: DevicePreference,

    /// Weight dtype for the local backend. Default: f32.
    pub dtype: WeightDType,

    /// Hosted model identifier for the provider backend.
    pub model: Option<String>,

    /// Hosted provider name (e.g. "openai", "anthropic", "ollama").
    /// If None, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Retries on a failed provider call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Decoding parameters shared by both backends.
    pub generation: GenerationParams,

    /// Tesseract settings.
    pub ocr: OcrSettings,

    /// Prompt template; must contain [`TEXT_PLACEHOLDER`].
    /// If None, uses [`DEFAULT_PROMPT_TEMPLATE`].
    pub prompt_template: Option<String>,

    /// Ask the model for a JSON record and parse it. Default: false.
    pub structured: bool,

    /// Download timeout for URL image inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            device: DevicePreference::default(),
            dtype: WeightDType::default(),
            model: None,
            provider_name: None,
            provider: None,
            max_retries: 3,
            retry_backoff_ms: 500,
            generation: GenerationParams::default(),
            ocr: OcrSettings::default(),
            prompt_template: None,
            structured: false,
            download_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("backend", &self.backend)
            .field("model_dir", &self.model_dir)
            .field("device", &self.device)
            .field("dtype", &self.dtype)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("max_retries", &self.max_retries)
            .field("generation", &self.generation)
            .field("ocr", &self.ocr)
            .field("custom_prompt", &self.prompt_template.is_some())
            .field("structured", &self.structured)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The prompt template in effect.
    pub fn prompt_template(&self) -> &str {
        self.prompt_template
            .as_deref()
            .unwrap_or(DEFAULT_PROMPT_TEMPLATE)
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.model_dir = dir.into();
        self
    }

    pub fn device(mut self, device: DevicePreference) -> Self {
        self.config.device = device;
        self
    }

    pub fn dtype(mut self, dtype: WeightDType) -> Self {
        self.config.dtype = dtype;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.config.generation.max_length = n;
        self
    }

    pub fn temperature(mut self, t: f64) -> Self {
        self.config.generation.temperature = Some(t.clamp(0.0, 2.0));
        self
    }

    pub fn top_p(mut self, p: f64) -> Self {
        self.config.generation.top_p = Some(p.clamp(0.0, 1.0));
        self
    }

    pub fn repetition_penalty(mut self, penalty: f32) -> Self {
        self.config.generation.repetition_penalty = penalty.max(1.0);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.generation.seed = seed;
        self
    }

    pub fn echo_prompt(mut self, v: bool) -> Self {
        self.config.generation.echo_prompt = v;
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr.language = lang.into();
        self
    }

    pub fn ocr_dpi(mut self, dpi: i32) -> Self {
        self.config.ocr.dpi = Some(dpi.clamp(70, 2400));
        self
    }

    pub fn page_segmentation_mode(mut self, psm: i32) -> Self {
        self.config.ocr.psm = Some(psm);
        self
    }

    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.config.prompt_template = Some(template.into());
        self
    }

    pub fn structured(mut self, v: bool) -> Self {
        self.config.structured = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, RxError> {
        let c = &self.config;
        if c.generation.max_length == 0 {
            return Err(RxError::InvalidConfig(
                "max_length must be ≥ 1".into(),
            ));
        }
        if let Some(ref template) = c.prompt_template {
            if !template.contains(TEXT_PLACEHOLDER) {
                return Err(RxError::InvalidConfig(format!(
                    "prompt template must contain the {TEXT_PLACEHOLDER} placeholder"
                )));
            }
        }
        if let Some(psm) = c.ocr.psm {
            if !(0..=13).contains(&psm) {
                return Err(RxError::InvalidConfig(format!(
                    "page segmentation mode must be 0–13, got {psm}"
                )));
            }
        }
        if c.ocr.language.trim().is_empty() {
            return Err(RxError::InvalidConfig("OCR language is empty".into()));
        }
        Ok(self.config)
    }
}

// ── Nested settings ──────────────────────────────────────────────────────

/// Decoding parameters handed to a [`crate::pipeline::synthesize::Generator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Upper bound on the whole sequence (prompt + completion) in tokens.
    /// Default: [`DEFAULT_MAX_LENGTH`].
    ///
    /// Hosted providers cannot count prompt tokens up front, so for them this
    /// is passed as the completion budget.
    pub max_length: usize,

    /// Sampling temperature. `None` decodes greedily. Default: None.
    pub temperature: Option<f64>,

    /// Nucleus-sampling cutoff; only used when `temperature` is set.
    pub top_p: Option<f64>,

    /// Penalty applied to recently generated tokens. 1.0 disables it.
    pub repetition_penalty: f32,

    /// How many trailing tokens the repetition penalty looks at. Default: 64.
    pub repeat_last_n: usize,

    /// Sampler seed. Default: [`DEFAULT_SEED`].
    pub seed: u64,

    /// Return the prompt followed by the completion rather than the
    /// completion alone. Default: true.
    pub echo_prompt: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
            temperature: None,
            top_p: None,
            repetition_penalty: 1.0,
            repeat_last_n: 64,
            seed: DEFAULT_SEED,
            echo_prompt: true,
        }
    }
}

/// Tesseract invocation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrSettings {
    /// Tesseract language code(s), e.g. "eng" or "eng+deu". Default: "eng".
    pub language: String,
    /// DPI hint for scans without resolution metadata. Default: 300.
    pub dpi: Option<i32>,
    /// Page segmentation mode (0–13). Default: 3 (fully automatic).
    pub psm: Option<i32>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            dpi: Some(300),
            psm: Some(3),
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which generator runs the synthesis stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Llama-family checkpoint loaded from `model_dir` and run in-process. (default)
    #[default]
    Local,
    /// Hosted LLM reached through `edgequake-llm`.
    Provider,
}

/// Compute device for the local backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Cpu,
    /// First CUDA device; requires the `cuda` feature.
    Cuda,
}

/// Dtype the local weights are loaded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightDType {
    #[default]
    F32,
    F16,
    Bf16,
}
