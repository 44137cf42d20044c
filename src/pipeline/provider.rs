//! Provider backend: send the prompt to a hosted LLM via `edgequake-llm`.
//!
//! Each call is retried with exponential backoff
//! (`retry_backoff_ms * 2^attempt`): 500 ms → 1 s → 2 s with the defaults.

use crate::config::{ExtractionConfig, GenerationParams};
use crate::error::{RxError, SynthesisError};
use crate::pipeline::synthesize::{Generation, Generator};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Model used when a provider is named without a model.
pub const DEFAULT_PROVIDER_MODEL: &str = "gpt-4.1-nano";

/// [`Generator`] backed by a hosted chat-completion provider.
pub struct ProviderGenerator {
    provider: Arc<dyn LLMProvider>,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl ProviderGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, max_retries: u32, retry_backoff_ms: u64) -> Self {
        Self {
            provider,
            max_retries,
            retry_backoff_ms,
        }
    }

    /// Resolve the provider from `config`, then the environment.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, RxError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config.max_retries, config.retry_backoff_ms))
    }
}

#[async_trait]
impl Generator for ProviderGenerator {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, SynthesisError> {
        let messages = vec![ChatMessage::user(prompt)];
        let options = build_options(params);
        if params.repetition_penalty != 1.0 {
            debug!(
                "repetition_penalty {} applies to the local backend only",
                params.repetition_penalty
            );
        }

        let response = with_retries(self.max_retries, self.retry_backoff_ms, || {
            self.provider.chat(&messages, Some(&options))
        })
        .await?;

        debug!(
            "Provider: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(provider_generation(
            prompt,
            response.content,
            response.prompt_tokens,
            response.completion_tokens,
            params,
        ))
    }

    fn name(&self) -> &str {
        "provider"
    }
}

/// Run `call` until it succeeds, at most `max_retries + 1` times, sleeping
/// `backoff_ms * 2^(attempt - 1)` before each retry.
async fn with_retries<T, E, F, Fut>(
    max_retries: u32,
    backoff_ms: u64,
    mut call: F,
) -> Result<T, SynthesisError>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_err: Option<String> = None;
    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = backoff_ms * 2u64.pow(attempt - 1);
            warn!("Provider retry {}/{} after {}ms", attempt, max_retries, backoff);
            sleep(Duration::from_millis(backoff)).await;
        }

        match call().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let err_msg = e.to_string();
                warn!("Provider attempt {} failed: {}", attempt + 1, err_msg);
                last_err = Some(err_msg);
            }
        }
    }

    Err(SynthesisError::Provider {
        retries: max_retries,
        detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
    })
}

/// Shape a chat reply like a local decode: prompt echoed in front when asked.
fn provider_generation(
    prompt: &str,
    completion: String,
    prompt_tokens: usize,
    completion_tokens: usize,
    params: &GenerationParams,
) -> Generation {
    let text = if params.echo_prompt {
        format!("{prompt}{completion}")
    } else {
        completion.clone()
    };
    Generation {
        text,
        completion,
        prompt_tokens,
        completion_tokens,
        truncated: completion_tokens >= params.max_length,
    }
}

/// Build `CompletionOptions` from the generation parameters.
///
/// `repetition_penalty` has no chat-API counterpart and is not sent.
fn build_options(params: &GenerationParams) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(params.temperature.unwrap_or(0.0) as f32),
        top_p: params.top_p.map(|p| p as f32),
        max_tokens: Some(params.max_length),
        ..Default::default()
    }
}

/// Which provider to build, decided from config and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ProviderPlan {
    Named { provider: String, model: String },
    AutoDetect,
}

/// Resolve the provider, from most-specific to least-specific:
///
/// 1. a pre-built provider in `config.provider`;
/// 2. `config.provider_name` (+ `config.model`);
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` together;
/// 4. OpenAI when `OPENAI_API_KEY` is set, with `config.model` if given;
/// 5. `ProviderFactory::from_env` auto-detection.
fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, RxError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    match plan_provider(config, |key| std::env::var(key).ok())? {
        ProviderPlan::Named { provider, model } => create_provider(&provider, &model),
        ProviderPlan::AutoDetect => {
            let (llm_provider, _embedding) =
                ProviderFactory::from_env().map_err(|e| RxError::ProviderNotConfigured {
                    provider: "auto".to_string(),
                    hint: format!(
                        "No LLM provider could be auto-detected from environment.\n\
                        Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                        Error: {}",
                        e
                    ),
                })?;
            Ok(llm_provider)
        }
    }
}

/// Steps 2–5 of [`resolve_provider`], with the environment passed in.
///
/// An explicit `config.model` is never dropped: it overrides
/// `EDGEQUAKE_MODEL`, and without any provider to pin it to it is a
/// configuration error rather than a silent fallback.
fn plan_provider(
    config: &ExtractionConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ProviderPlan, RxError> {
    let non_empty = |key: &str| env(key).filter(|v| !v.is_empty());

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_PROVIDER_MODEL);
        return Ok(ProviderPlan::Named {
            provider: name.clone(),
            model: model.to_string(),
        });
    }

    if let (Some(provider), Some(env_model)) = (
        non_empty("EDGEQUAKE_LLM_PROVIDER"),
        non_empty("EDGEQUAKE_MODEL"),
    ) {
        let model = config.model.clone().unwrap_or(env_model);
        return Ok(ProviderPlan::Named { provider, model });
    }

    if non_empty("OPENAI_API_KEY").is_some() {
        let model = config.model.as_deref().unwrap_or(DEFAULT_PROVIDER_MODEL);
        return Ok(ProviderPlan::Named {
            provider: "openai".to_string(),
            model: model.to_string(),
        });
    }

    if let Some(ref model) = config.model {
        return Err(RxError::InvalidConfig(format!(
            "model '{model}' was given without a provider; pass --provider \
             or set OPENAI_API_KEY"
        )));
    }

    Ok(ProviderPlan::AutoDetect)
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, RxError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        RxError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
