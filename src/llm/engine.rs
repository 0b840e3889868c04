//! LLM inference engine using Candle for local model execution

use crate::error::{Result, ZellieError};
use crate::llm::backends::{self, Architecture, LanguageModel};
use crate::llm::device::{self, DevicePreference};
use crate::llm::format::ModelLayout;
use crate::llm::prompts::{ChatTemplate, Prompt};
use candle_core::{Device, IndexOp, Tensor};
use candle_transformers::generation::{LogitsProcessor, Sampling};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokenizers::Tokenizer;

/// Configuration for LLM inference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub max_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: Option<usize>,
    pub repeat_penalty: f32,
    pub repeat_last_n: usize,
    pub seed: Option<u64>,
    pub chat_template: ChatTemplate,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            // Optional keys default to None so clearing them persists
            top_k: None,
            repeat_penalty: 1.1,
            repeat_last_n: 64,
            seed: None,
            chat_template: ChatTemplate::Auto,
        }
    }
}

impl InferenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(ZellieError::InvalidArgument("max_tokens must be greater than 0".to_string()));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(ZellieError::InvalidArgument(format!(
                "temperature must be >= 0, got {}",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ZellieError::InvalidArgument(format!(
                "top_p must be in (0, 1], got {}",
                self.top_p
            )));
        }
        if self.top_k == Some(0) {
            return Err(ZellieError::InvalidArgument("top_k must be greater than 0".to_string()));
        }
        if !self.repeat_penalty.is_finite() || self.repeat_penalty <= 0.0 {
            return Err(ZellieError::InvalidArgument(format!(
                "repeat_penalty must be > 0, got {}",
                self.repeat_penalty
            )));
        }
        Ok(())
    }

    fn sampling(&self) -> Sampling {
        if self.temperature <= 0.0 {
            return Sampling::ArgMax;
        }
        let temperature = self.temperature;
        match self.top_k {
            Some(k) if self.top_p < 1.0 => Sampling::TopKThenTopP { k, p: self.top_p, temperature },
            Some(k) => Sampling::TopK { k, temperature },
            None if self.top_p < 1.0 => Sampling::TopP { p: self.top_p, temperature },
            None => Sampling::All { temperature },
        }
    }

    fn resolved_seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(299_792_458)
        })
    }
}

/// Result of LLM inference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResult {
    pub text: String,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub inference_time_ms: u64,
    pub tokens_per_second: f64,
}

/// Detailed timing breakdown for performance analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingBreakdown {
    pub total_ms: u64,
    pub tokenization_ms: u64,
    pub first_pass_ms: u64,
    pub generation_ms: u64,
    pub decode_ms: u64,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub avg_ms_per_token: f64,
}

/// Information about a loaded model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInferenceInfo {
    pub name: String,
    pub architecture: Architecture,
    pub vocab_size: usize,
    pub context_length: usize,
    pub device: String,
    pub chat_template: ChatTemplate,
}

/// A fully loaded model context: weights, tokenizer and device
pub struct LLMEngine {
    name: String,
    model: Box<dyn LanguageModel>,
    tokenizer: Tokenizer,
    device: Device,
    template: ChatTemplate,
    eos_tokens: HashSet<u32>,
}

impl LLMEngine {
    /// Load a model from the specified path. Every failure is a `ModelLoad` error.
    pub fn load(model_path: &Path, preference: DevicePreference, template: ChatTemplate) -> Result<Self> {
        info!("Loading model from: {}", model_path.display());

        let layout = ModelLayout::resolve(model_path)?;
        debug!("Resolved model layout: {:?}", layout);

        let device = device::select_device(preference)?;

        let tokenizer = Tokenizer::from_file(&layout.tokenizer)
            .map_err(|e| ZellieError::ModelLoad(format!("Failed to load tokenizer: {}", e)))?;

        let backend = backends::load_backend(&layout, &device, tokenizer.get_vocab_size(true))?;
        let template = template.resolve(&tokenizer);

        let mut eos_tokens: HashSet<u32> = backend.eos_token_ids.into_iter().collect();
        for token in template
            .stop_tokens()
            .iter()
            .chain(["</s>", "<|endoftext|>"].iter())
        {
            if let Some(id) = tokenizer.token_to_id(token) {
                eos_tokens.insert(id);
            }
        }

        info!(
            "Model loaded: {} ({}, template {:?})",
            layout.model_name(),
            backend.model.architecture(),
            template
        );

        Ok(Self {
            name: layout.model_name(),
            model: backend.model,
            tokenizer,
            device,
            template,
            eos_tokens,
        })
    }

    pub fn generate(&mut self, prompt: &Prompt, config: &InferenceConfig) -> Result<InferenceResult> {
        let (result, timing) = self.generate_with_timing(prompt, config)?;
        debug!(
            "Generation took {}ms ({} tokens, {:.1}ms/token)",
            timing.total_ms, timing.output_tokens, timing.avg_ms_per_token
        );
        Ok(result)
    }

    pub fn generate_with_timing(
        &mut self,
        prompt: &Prompt,
        config: &InferenceConfig,
    ) -> Result<(InferenceResult, TimingBreakdown)> {
        config.validate()?;
        let total_start = Instant::now();

        // Each call starts from an empty context
        self.model.reset()?;

        let formatted_prompt = self.template.render(prompt);
        debug!("Input prompt: '{}'", formatted_prompt);

        let tokenize_start = Instant::now();
        let encoding = self
            .tokenizer
            .encode(formatted_prompt.as_str(), true)
            .map_err(|e| ZellieError::Inference(format!("Failed to tokenize input: {}", e)))?;
        let mut tokens = encoding.get_ids().to_vec();
        let tokenize_time = tokenize_start.elapsed();
        if tokens.is_empty() {
            return Err(ZellieError::InvalidArgument(
                "Prompt produced no tokens".to_string(),
            ));
        }
        let input_length = tokens.len();
        let context_length = self.model.context_length();
        if input_length >= context_length {
            return Err(ZellieError::InvalidArgument(format!(
                "Prompt is {} tokens but the model context holds {}",
                input_length, context_length
            )));
        }

        let first_pass_start = Instant::now();
        let input = Tensor::new(&tokens[..], &self.device)?.unsqueeze(0)?;
        let mut logits = self.model.forward(&input, 0)?;
        let first_pass_time = first_pass_start.elapsed();
        debug!(
            "Processed prompt ({} tokens) in {}ms",
            input_length,
            first_pass_time.as_millis()
        );

        let mut sampler = LogitsProcessor::from_sampling(config.resolved_seed(), config.sampling());
        let generation_start = Instant::now();
        let mut generated = Vec::new();

        for step in 0..config.max_tokens {
            let mut last = last_token_logits(&logits)?;
            if config.repeat_penalty != 1.0 {
                let start = tokens.len().saturating_sub(config.repeat_last_n);
                last = candle_transformers::utils::apply_repeat_penalty(
                    &last,
                    config.repeat_penalty,
                    &tokens[start..],
                )?;
            }

            let next_token = sampler.sample(&last)?;
            if self.eos_tokens.contains(&next_token) {
                debug!("EOS token {} after {} tokens", next_token, step);
                break;
            }

            tokens.push(next_token);
            generated.push(next_token);

            if step + 1 == config.max_tokens {
                break;
            }
            if input_length + step >= context_length {
                debug!("Context window of {} tokens is full", context_length);
                break;
            }
            let next = Tensor::new(&[next_token], &self.device)?.unsqueeze(0)?;
            logits = self.model.forward(&next, input_length + step)?;
        }
        let generation_time = generation_start.elapsed();

        let decode_start = Instant::now();
        let text = self
            .tokenizer
            .decode(&generated, true)
            .map_err(|e| ZellieError::Inference(format!("Failed to decode generated tokens: {}", e)))?;
        let decode_time = decode_start.elapsed();

        let total_time = total_start.elapsed();
        let timing = TimingBreakdown {
            total_ms: total_time.as_millis() as u64,
            tokenization_ms: tokenize_time.as_millis() as u64,
            first_pass_ms: first_pass_time.as_millis() as u64,
            generation_ms: generation_time.as_millis() as u64,
            decode_ms: decode_time.as_millis() as u64,
            input_tokens: input_length,
            output_tokens: generated.len(),
            avg_ms_per_token: if generated.is_empty() {
                0.0
            } else {
                generation_time.as_millis() as f64 / generated.len() as f64
            },
        };

        let result = InferenceResult {
            text: text.trim().to_string(),
            prompt_tokens: input_length,
            generated_tokens: generated.len(),
            inference_time_ms: timing.total_ms,
            tokens_per_second: if generated.is_empty() {
                0.0
            } else {
                generated.len() as f64 / total_time.as_secs_f64().max(f64::EPSILON)
            },
        };

        debug!(
            "Timing: tokenize {}ms, prompt {}ms, generate {}ms, decode {}ms",
            timing.tokenization_ms, timing.first_pass_ms, timing.generation_ms, timing.decode_ms
        );

        Ok((result, timing))
    }

    pub fn info(&self) -> ModelInferenceInfo {
        ModelInferenceInfo {
            name: self.name.clone(),
            architecture: self.model.architecture(),
            vocab_size: self.model.vocab_size(),
            context_length: self.model.context_length(),
            device: format!("{:?}", self.device),
            chat_template: self.template,
        }
    }
}

/// Logits of the last position, whatever layout the backend returns
fn last_token_logits(logits: &Tensor) -> Result<Tensor> {
    let last = match logits.dims() {
        // [batch_size, seq_len, vocab_size]
        [_, seq_len, _] => logits.i((0, seq_len - 1))?,
        // [seq_len, vocab_size]
        [seq_len, _] => logits.i(seq_len - 1)?,
        _ => logits.clone(),
    };
    Ok(last.to_dtype(candle_core::DType::F32)?)
}
