//! Instruction synthesis: OCR text → prompt → generator → cleaned result.
//!
//! The [`Generator`] trait is the seam between this module and the actual
//! language model. [`crate::pipeline::local::LocalModel`] and
//! [`crate::pipeline::provider::ProviderGenerator`] implement it for real
//! runs, and tests substitute a stub that records the prompt.

use crate::config::{ExtractionConfig, GenerationParams};
use crate::error::SynthesisError;
use crate::output::PrescriptionRecord;
use crate::pipeline::postprocess;
use crate::prompts::{render_prompt, STRUCTURED_PROMPT_TEMPLATE};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Decoded output of one generator call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    /// Decoded sequence: echoed prompt + completion, or the completion alone
    /// when `echo_prompt` is off.
    pub text: String,
    /// Newly generated text only.
    pub completion: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    /// Generation stopped on the length bound rather than end-of-sequence.
    pub truncated: bool,
}

impl Generation {
    /// A generation whose display text and completion are the same string.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            completion: text.clone(),
            text,
            ..Default::default()
        }
    }
}

/// A causal language model reachable through a prompt-in, text-out call.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Run one bounded generation for `prompt`.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, SynthesisError>;

    /// Short label for logs.
    fn name(&self) -> &str {
        "generator"
    }
}

/// Result of the synthesis stage.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub prompt: String,
    /// Text for the user. With `echo_prompt` this is the decoded sequence
    /// as-is; otherwise the cleaned completion.
    pub result: String,
    pub generation: Generation,
    /// Parsed record in structured mode.
    pub record: Option<PrescriptionRecord>,
    pub duration_ms: u64,
}

/// Prompt for `text` under `config`.
pub fn prompt_for(text: &str, config: &ExtractionConfig) -> String {
    if config.structured && config.prompt_template.is_none() {
        render_prompt(STRUCTURED_PROMPT_TEMPLATE, text)
    } else {
        render_prompt(config.prompt_template(), text)
    }
}

/// Build the prompt for `text`, call `generator` once, and shape the output.
///
/// Cleanup only touches the completion, so the echoed OCR text is never
/// rewritten.
pub async fn synthesize(
    generator: &dyn Generator,
    text: &str,
    config: &ExtractionConfig,
) -> Result<Synthesis, SynthesisError> {
    let start = Instant::now();
    let prompt = prompt_for(text, config);
    debug!(
        "Prompt: {} chars, generator '{}', max_length {}",
        prompt.len(),
        generator.name(),
        config.generation.max_length
    );

    let generation = generator.generate(&prompt, &config.generation).await?;
    let result = if config.generation.echo_prompt {
        generation.text.clone()
    } else {
        postprocess::clean_output(&generation.completion)
    };

    let record = if config.structured {
        let record = postprocess::parse_record(&generation.completion);
        match record {
            None => warn!("Structured mode: model output contained no parsable JSON record"),
            Some(ref r) if r.is_empty() => {
                warn!("Structured mode: JSON record parsed but holds no prescription data")
            }
            Some(_) => {}
        }
        record
    } else {
        None
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Synthesis complete: {} prompt tokens, {} completion tokens, {}ms{}",
        generation.prompt_tokens,
        generation.completion_tokens,
        duration_ms,
        if generation.truncated {
            " (hit max_length)"
        } else {
            ""
        }
    );

    Ok(Synthesis {
        prompt,
        result,
        generation,
        record,
        duration_ms,
    })
}
