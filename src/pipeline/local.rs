//! Local backend: a Llama-family checkpoint run in-process with candle.
//!
//! The model directory uses the Hugging Face layout:
//!
//! ```text
//! granite-7b-instruct/
//! ├── config.json                    LlamaConfig
//! ├── tokenizer.json                 tokenizers
//! └── model.safetensors              or model-0000N-of-0000M.safetensors
//!                                    + model.safetensors.index.json
//! ```
//!
//! Loading is explicit ([`LocalModel::load`]) and happens once; the loaded
//! model is read-only afterwards and shared behind an `Arc` with the blocking
//! worker that runs the decode loop.

use crate::config::{DevicePreference, GenerationParams, WeightDType};
use crate::error::{RxError, SynthesisError};
use crate::pipeline::synthesize::{Generation, Generator};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaConfig, LlamaEosToks};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info};

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const SINGLE_WEIGHTS_FILE: &str = "model.safetensors";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

/// End-of-sequence spellings tried when `config.json` names none.
const FALLBACK_EOS_TOKENS: &[&str] = &["</s>", "<|endoftext|>", "<|end_of_text|>"];

// ── Tokenizer ────────────────────────────────────────────────────────────

/// Text ⇄ token-id conversion for one model.
#[derive(Clone)]
pub struct TokenCodec {
    tokenizer: Tokenizer,
}

impl TokenCodec {
    /// Load `tokenizer.json`.
    pub fn from_file(path: &Path) -> Result<Self, RxError> {
        if !path.is_file() {
            return Err(RxError::ModelFileMissing {
                path: path.to_path_buf(),
            });
        }
        let tokenizer = Tokenizer::from_file(path).map_err(|e| RxError::ModelLoad {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Ok(Self { tokenizer })
    }

    /// Build from the contents of a `tokenizer.json`.
    pub fn from_json(json: &str) -> Result<Self, RxError> {
        let tokenizer = Tokenizer::from_str(json).map_err(|e| RxError::ModelLoad {
            path: PathBuf::from(TOKENIZER_FILE),
            detail: e.to_string(),
        })?;
        Ok(Self { tokenizer })
    }

    /// Encode `text`, adding the model's special tokens (BOS etc.).
    pub fn encode(&self, text: &str) -> Result<Vec<u32>, SynthesisError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| SynthesisError::Tokenization(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Decode `ids` to text with special tokens stripped.
    pub fn decode(&self, ids: &[u32]) -> Result<String, SynthesisError> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| SynthesisError::Decoding(e.to_string()))
    }

    pub fn token_id(&self, token: &str) -> Option<u32> {
        self.tokenizer.token_to_id(token)
    }
}

// ── Model ────────────────────────────────────────────────────────────────

/// [`Generator`] running a Llama-family model on the local machine.
#[derive(Clone)]
pub struct LocalModel {
    inner: Arc<LocalEngine>,
}

struct LocalEngine {
    model: Llama,
    config: Config,
    codec: TokenCodec,
    device: Device,
    dtype: DType,
    eos_ids: Vec<u32>,
}

impl LocalModel {
    /// Load tokenizer, config and weights from `dir`.
    ///
    /// Blocks for as long as memory-mapping and materialising the weights
    /// takes, which for a 7B model on CPU is tens of seconds.
    pub fn load(dir: &Path, device: DevicePreference, dtype: WeightDType) -> Result<Self, RxError> {
        let start = Instant::now();
        if !dir.is_dir() {
            return Err(RxError::ModelDirNotFound {
                path: dir.to_path_buf(),
            });
        }
        info!("Loading model from {}", dir.display());

        let llama_config = read_llama_config(&dir.join(CONFIG_FILE))?;
        let codec = TokenCodec::from_file(&dir.join(TOKENIZER_FILE))?;
        let weights = weight_files(dir)?;
        debug!("Weight files: {:?}", weights);

        let mut eos_ids = match &llama_config.eos_token_id {
            Some(LlamaEosToks::Single(id)) => vec![*id],
            Some(LlamaEosToks::Multiple(ids)) => ids.clone(),
            None => Vec::new(),
        };
        if eos_ids.is_empty() {
            eos_ids.extend(FALLBACK_EOS_TOKENS.iter().filter_map(|t| codec.token_id(t)));
        }

        let config = llama_config.into_config(false);
        let device = select_device(device)?;
        let dtype = candle_dtype(dtype);

        let load_err = |e: candle_core::Error| RxError::ModelLoad {
            path: dir.to_path_buf(),
            detail: e.to_string(),
        };
        // SAFETY: the weight files are memory-mapped read-only and must not be
        // modified while the model is alive.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weights, dtype, &device) }
            .map_err(load_err)?;
        let model = Llama::load(vb, &config).map_err(load_err)?;

        info!(
            "Model loaded: {} layers, vocab {}, {:?} on {:?} in {:?}",
            config.num_hidden_layers,
            config.vocab_size,
            dtype,
            device,
            start.elapsed()
        );

        Ok(Self {
            inner: Arc::new(LocalEngine {
                model,
                config,
                codec,
                device,
                dtype,
                eos_ids,
            }),
        })
    }
}

#[async_trait]
impl Generator for LocalModel {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, SynthesisError> {
        let engine = Arc::clone(&self.inner);
        let prompt = prompt.to_string();
        let params = params.clone();
        tokio::task::spawn_blocking(move || engine.generate(&prompt, &params))
            .await
            .map_err(|e| SynthesisError::Internal(format!("generation worker failed: {e}")))?
    }

    fn name(&self) -> &str {
        "local"
    }
}

impl LocalEngine {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Generation, SynthesisError> {
        let start = Instant::now();
        let prompt_ids = self.codec.encode(prompt)?;
        if prompt_ids.is_empty() {
            return Err(SynthesisError::Tokenization(
                "prompt encoded to zero tokens".into(),
            ));
        }
        let limit = params.max_length.min(self.config.max_position_embeddings);
        debug!(
            "Prompt is {} tokens; generating up to {} total",
            prompt_ids.len(),
            limit
        );

        let mut cache = Cache::new(true, self.dtype, &self.config, &self.device).map_err(|e| {
            SynthesisError::Generation {
                generated: 0,
                detail: e.to_string(),
            }
        })?;
        let mut sampler = LogitsProcessor::from_sampling(params.seed, sampling(params));

        let mut tokens = prompt_ids.clone();
        let mut index_pos = 0;
        let mut hit_eos = false;
        while tokens.len() < limit {
            let generated = tokens.len() - prompt_ids.len();
            // The first step feeds the whole prompt; later steps only the
            // newest token, the rest is in the KV cache.
            let context = if generated == 0 {
                &tokens[..]
            } else {
                &tokens[tokens.len() - 1..]
            };
            let next = self
                .step(context, index_pos, &tokens, &mut cache, &mut sampler, params)
                .map_err(|e| SynthesisError::Generation {
                    generated,
                    detail: e.to_string(),
                })?;
            index_pos += context.len();
            tokens.push(next);
            if self.eos_ids.contains(&next) {
                hit_eos = true;
                break;
            }
        }

        let new_ids = &tokens[prompt_ids.len()..];
        let completion = self.codec.decode(new_ids)?;
        let text = if params.echo_prompt {
            self.codec.decode(&tokens)?
        } else {
            completion.clone()
        };

        let elapsed = start.elapsed();
        debug!(
            "Generated {} tokens in {:?} ({:.1} tok/s)",
            new_ids.len(),
            elapsed,
            new_ids.len() as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
        );

        Ok(Generation {
            text,
            completion,
            prompt_tokens: prompt_ids.len(),
            completion_tokens: new_ids.len(),
            truncated: !hit_eos,
        })
    }

    /// One forward pass plus sampling.
    fn step(
        &self,
        context: &[u32],
        index_pos: usize,
        history: &[u32],
        cache: &mut Cache,
        sampler: &mut LogitsProcessor,
        params: &GenerationParams,
    ) -> candle_core::Result<u32> {
        let input = Tensor::new(context, &self.device)?.unsqueeze(0)?;
        let logits = self.model.forward(&input, index_pos, cache)?;
        let logits = logits.squeeze(0)?;
        let logits = if params.repetition_penalty == 1.0 {
            logits
        } else {
            let start_at = history.len().saturating_sub(params.repeat_last_n);
            candle_transformers::utils::apply_repeat_penalty(
                &logits,
                params.repetition_penalty,
                &history[start_at..],
            )?
        };
        sampler.sample(&logits)
    }
}

// ── Loading helpers ──────────────────────────────────────────────────────

fn read_llama_config(path: &Path) -> Result<LlamaConfig, RxError> {
    let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => RxError::ModelFileMissing {
            path: path.to_path_buf(),
        },
        _ => RxError::ModelLoad {
            path: path.to_path_buf(),
            detail: e.to_string(),
        },
    })?;
    serde_json::from_str(&raw).map_err(|e| RxError::ModelLoad {
        path: path.to_path_buf(),
        detail: format!("config.json is not a Llama config: {e}"),
    })
}

/// Safetensors files making up the checkpoint in `dir`.
///
/// Order of preference: a single `model.safetensors`; the shards named by
/// `model.safetensors.index.json`; any `*.safetensors` in the directory.
pub fn weight_files(dir: &Path) -> Result<Vec<PathBuf>, RxError> {
    let single = dir.join(SINGLE_WEIGHTS_FILE);
    if single.is_file() {
        return Ok(vec![single]);
    }

    let index_path = dir.join(WEIGHTS_INDEX_FILE);
    if index_path.is_file() {
        let index_err = |detail: String| RxError::ModelLoad {
            path: index_path.clone(),
            detail,
        };
        let raw = std::fs::read_to_string(&index_path).map_err(|e| index_err(e.to_string()))?;
        let index: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| index_err(e.to_string()))?;
        let weight_map = index
            .get("weight_map")
            .and_then(|m| m.as_object())
            .ok_or_else(|| index_err("missing 'weight_map' object".into()))?;
        let shards: BTreeSet<&str> = weight_map.values().filter_map(|v| v.as_str()).collect();

        let mut files = Vec::with_capacity(shards.len());
        for shard in shards {
            let path = dir.join(shard);
            if !path.is_file() {
                return Err(RxError::ModelFileMissing { path });
            }
            files.push(path);
        }
        if files.is_empty() {
            return Err(index_err("'weight_map' lists no files".into()));
        }
        return Ok(files);
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| RxError::ModelLoad {
            path: dir.to_path_buf(),
            detail: e.to_string(),
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "safetensors"))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(RxError::ModelFileMissing { path: single });
    }
    Ok(files)
}

fn select_device(pref: DevicePreference) -> Result<Device, RxError> {
    match pref {
        DevicePreference::Cpu => Ok(Device::Cpu),
        DevicePreference::Cuda => Device::new_cuda(0).map_err(|e| RxError::UnsupportedDevice {
            device: "cuda".into(),
            detail: e.to_string(),
        }),
    }
}

fn candle_dtype(dtype: WeightDType) -> DType {
    match dtype {
        WeightDType::F32 => DType::F32,
        WeightDType::F16 => DType::F16,
        WeightDType::Bf16 => DType::BF16,
    }
}

/// Greedy unless a positive temperature is configured.
fn sampling(params: &GenerationParams) -> Sampling {
    match (params.temperature, params.top_p) {
        (Some(t), _) if t <= 0.0 => Sampling::ArgMax,
        (Some(temperature), Some(p)) => Sampling::TopP { p, temperature },
        (Some(temperature), None) => Sampling::All { temperature },
        (None, _) => Sampling::ArgMax,
    }
}
