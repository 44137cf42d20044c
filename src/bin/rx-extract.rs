//! CLI binary for rx-extract.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, reads the image, loads the generator once OCR has
//! text, and prints the outcome.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rx_extract::{
    load_generator, read_image, Backend, DevicePreference, ExtractionConfig, Orchestrator,
    Outcome, TesseractExtractor, WeightDType, USAGE_MESSAGE,
};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Local model next to the server checkout (default ../../granite-7b-instruct)
  rx-extract scripts/fixtures/sample_rx.png

  # Explicit model directory, completion only
  rx-extract --model-dir models/granite-7b-instruct --no-echo rx.jpg

  # Longer outputs with light sampling
  rx-extract --max-length 1000 --temperature 0.7 --top-p 0.9 rx.png

  # Structured JSON record through a hosted provider
  rx-extract --backend provider --provider openai --structured --json rx.png

  # Image from a URL, German + English OCR
  rx-extract --lang deu+eng https://example.org/scans/rx.png

MODEL DIRECTORY:
  config.json, tokenizer.json and model.safetensors (or sharded
  model-*.safetensors with model.safetensors.index.json). Any Llama-family
  checkpoint in Hugging Face layout works.

ENVIRONMENT VARIABLES:
  RX_MODEL_DIR            Local model directory
  RX_BACKEND              local | provider
  OPENAI_API_KEY          OpenAI API key (provider backend)
  ANTHROPIC_API_KEY       Anthropic API key (provider backend)
  EDGEQUAKE_LLM_PROVIDER  Override provider (with EDGEQUAKE_MODEL)
  RUST_LOG                Log filter, e.g. rx_extract=debug

EXIT STATUS:
  0  result printed, usage printed, or OCR error printed
  1  model could not be loaded or generation failed
"#;

/// Extract medicines, dosages and instructions from a prescription image.
#[derive(Parser, Debug)]
#[command(
    name = "rx-extract",
    version,
    about = "Extract medicines, dosages and instructions from a prescription image",
    long_about = "Runs Tesseract OCR over a prescription image and asks a causal language model \
(a local Llama-family checkpoint, or a hosted provider) to extract the medicine names, dosages \
and instructions.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Prescription image: local path or HTTP/HTTPS URL.
    image: Option<String>,

    /// Directory with config.json, tokenizer.json and safetensors weights.
    #[arg(long, env = "RX_MODEL_DIR", default_value = rx_extract::config::DEFAULT_MODEL_DIR)]
    model_dir: PathBuf,

    /// Generator backend.
    #[arg(long, env = "RX_BACKEND", value_enum, default_value = "local")]
    backend: BackendArg,

    /// Hosted provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "RX_PROVIDER")]
    provider: Option<String>,

    /// Hosted model ID (provider backend).
    #[arg(long, env = "RX_MODEL")]
    model: Option<String>,

    /// Maximum sequence length in tokens, prompt included.
    #[arg(long, env = "RX_MAX_LENGTH", default_value_t = rx_extract::config::DEFAULT_MAX_LENGTH)]
    max_length: usize,

    /// Sampling temperature (0.0–2.0). Greedy decoding when unset.
    #[arg(long, env = "RX_TEMPERATURE")]
    temperature: Option<f64>,

    /// Nucleus-sampling cutoff (with --temperature).
    #[arg(long, env = "RX_TOP_P")]
    top_p: Option<f64>,

    /// Repetition penalty; 1.0 disables it.
    #[arg(long, env = "RX_REPETITION_PENALTY", default_value_t = 1.0)]
    repetition_penalty: f32,

    /// Sampling seed.
    #[arg(long, env = "RX_SEED", default_value_t = rx_extract::config::DEFAULT_SEED)]
    seed: u64,

    /// Print only the completion, without the echoed prompt.
    #[arg(long, env = "RX_NO_ECHO")]
    no_echo: bool,

    /// Compute device for the local model.
    #[arg(long, env = "RX_DEVICE", value_enum, default_value = "cpu")]
    device: DeviceArg,

    /// Weight dtype for the local model.
    #[arg(long, env = "RX_DTYPE", value_enum, default_value = "f32")]
    dtype: DTypeArg,

    /// Tesseract language(s), e.g. eng or eng+deu.
    #[arg(long, env = "RX_OCR_LANG", default_value = "eng")]
    lang: String,

    /// DPI hint passed to Tesseract.
    #[arg(long, env = "RX_OCR_DPI", default_value_t = 300)]
    ocr_dpi: i32,

    /// Tesseract page segmentation mode (0–13).
    #[arg(long, env = "RX_OCR_PSM", default_value_t = 3,
          value_parser = clap::value_parser!(i32).range(0..=13))]
    psm: i32,

    /// Path to a prompt template file containing {text}.
    #[arg(long, env = "RX_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Ask for a JSON prescription record and print it when it parses.
    #[arg(long, env = "RX_STRUCTURED")]
    structured: bool,

    /// Output the full ExtractionOutput as JSON.
    #[arg(long, env = "RX_JSON")]
    json: bool,

    /// Retries per provider call.
    #[arg(long, env = "RX_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// HTTP download timeout in seconds for URL images.
    #[arg(long, env = "RX_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable the progress spinner.
    #[arg(long, env = "RX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "RX_VERBOSE")]
    verbose: bool,

    /// Suppress everything on stderr except errors.
    #[arg(short, long, env = "RX_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Local,
    Provider,
}

impl From<BackendArg> for Backend {
    fn from(v: BackendArg) -> Self {
        match v {
            BackendArg::Local => Backend::Local,
            BackendArg::Provider => Backend::Provider,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DeviceArg {
    Cpu,
    Cuda,
}

impl From<DeviceArg> for DevicePreference {
    fn from(v: DeviceArg) -> Self {
        match v {
            DeviceArg::Cpu => DevicePreference::Cpu,
            DeviceArg::Cuda => DevicePreference::Cuda,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DTypeArg {
    F32,
    F16,
    Bf16,
}

impl From<DTypeArg> for WeightDType {
    fn from(v: DTypeArg) -> Self {
        match v {
            DTypeArg::F32 => WeightDType::F32,
            DTypeArg::F16 => WeightDType::F16,
            DTypeArg::Bf16 => WeightDType::Bf16,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner already says what stage we are in, so INFO logs are
    // muted while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Argument check before any model is loaded ────────────────────────
    let Some(image) = cli.image.as_deref() else {
        println!("{USAGE_MESSAGE}");
        return Ok(ExitCode::SUCCESS);
    };

    let config = build_config(&cli).await?;
    let spinner = show_progress.then(new_spinner);

    // ── OCR before any model is loaded ───────────────────────────────────
    if let Some(ref bar) = spinner {
        bar.set_message("Reading prescription…");
    }
    let extractor = TesseractExtractor::new(config.ocr.clone());
    let reading = match read_image(&extractor, image, &config).await {
        Ok(reading) => reading,
        Err(e) => {
            if let Some(bar) = spinner {
                bar.finish_and_clear();
            }
            let outcome = Outcome::OcrFailed(e);
            print_outcome(&outcome, cli.json)?;
            return Ok(ExitCode::from(outcome.exit_code()));
        }
    };

    // ── Load generator ───────────────────────────────────────────────────
    if let Some(ref bar) = spinner {
        bar.set_message(match config.backend {
            Backend::Local => format!("Loading model from {}…", config.model_dir.display()),
            Backend::Provider => "Connecting to provider…".to_string(),
        });
    }
    let load_config = config.clone();
    let generator = tokio::task::spawn_blocking(move || load_generator(&load_config))
        .await
        .context("Model loading task failed")?;
    let generator = match generator {
        Ok(g) => g,
        Err(e) => {
            if let Some(bar) = spinner {
                bar.finish_and_clear();
            }
            return Err(e).context("Failed to initialise the language model");
        }
    };

    // ── Generate ─────────────────────────────────────────────────────────
    if let Some(ref bar) = spinner {
        bar.set_message("Generating instructions…");
    }
    let outcome = Orchestrator::new(&extractor, generator.as_ref(), &config)
        .complete(reading)
        .await;
    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }

    print_outcome(&outcome, cli.json)?;
    Ok(ExitCode::from(outcome.exit_code()))
}

fn print_outcome(outcome: &Outcome, json: bool) -> Result<()> {
    if !json {
        println!("{}", outcome.message());
        return Ok(());
    }
    let value = match outcome.output() {
        Some(output) => serde_json::to_value(output).context("Failed to serialise output")?,
        None => serde_json::json!({ "error": outcome.message() }),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&value).context("Failed to serialise output")?
    );
    Ok(())
}

fn new_spinner() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .backend(cli.backend.into())
        .model_dir(&cli.model_dir)
        .device(cli.device.into())
        .dtype(cli.dtype.into())
        .max_length(cli.max_length)
        .repetition_penalty(cli.repetition_penalty)
        .seed(cli.seed)
        .echo_prompt(!cli.no_echo)
        .ocr_language(&cli.lang)
        .ocr_dpi(cli.ocr_dpi)
        .page_segmentation_mode(cli.psm)
        .structured(cli.structured)
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout);

    if let Some(t) = cli.temperature {
        builder = builder.temperature(t);
    }
    if let Some(p) = cli.top_p {
        builder = builder.top_p(p);
    }
    if let Some(ref name) = cli.provider {
        builder = builder.provider_name(name);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref path) = cli.prompt_file {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt template from {:?}", path))?;
        builder = builder.prompt_template(template);
    }

    builder.build().context("Invalid configuration")
}
