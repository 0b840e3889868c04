//! Model architectures backed by candle-transformers

use crate::error::{Result, ZellieError};
use crate::llm::format::{ModelLayout, WeightFormat};
use crate::llm::weights;
use candle_core::quantized::gguf_file;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::quantized_llama;
use candle_transformers::models::{llama, phi3};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;

/// Size of the rotary tables candle precomputes for quantized llama
const QUANTIZED_MAX_SEQ_LEN: usize = 4096;

/// Trait for the different model implementations behind an engine
pub trait LanguageModel: Send {
    /// Run `input_ids` (shape `[1, seq_len]`) starting at `position` and return logits
    fn forward(&mut self, input_ids: &Tensor, position: usize) -> Result<Tensor>;
    fn vocab_size(&self) -> usize;
    /// Maximum number of positions the model can attend over
    fn context_length(&self) -> usize;
    /// Drop any KV cache so the next call starts from a blank context
    fn reset(&mut self) -> Result<()>;
    fn architecture(&self) -> Architecture;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    Llama,
    Phi3,
    QuantizedLlama,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Architecture::Llama => "llama",
            Architecture::Phi3 => "phi3",
            Architecture::QuantizedLlama => "llama (gguf)",
        };
        f.write_str(name)
    }
}

impl Architecture {
    /// Read `model_type` and `architectures` from a Hugging Face `config.json`
    pub fn detect(config: &serde_json::Value) -> Option<Self> {
        let model_type = config["model_type"].as_str().unwrap_or("");
        let architecture = config["architectures"]
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|v| v.as_str())
            .unwrap_or("");

        match (model_type, architecture) {
            ("phi3", _) | (_, "Phi3ForCausalLM") => Some(Architecture::Phi3),
            ("llama", _) | ("mistral", _) | (_, "LlamaForCausalLM") | (_, "MistralForCausalLM") => {
                Some(Architecture::Llama)
            }
            _ => None,
        }
    }
}

/// A constructed model plus the end-of-sequence ids its config declares
pub struct LoadedBackend {
    pub model: Box<dyn LanguageModel>,
    pub eos_token_ids: Vec<u32>,
}

/// Build the right backend for a resolved layout
pub fn load_backend(layout: &ModelLayout, device: &Device, tokenizer_vocab: usize) -> Result<LoadedBackend> {
    if layout.format == WeightFormat::Gguf {
        return load_quantized_llama(layout, device, tokenizer_vocab);
    }

    let config_path = layout.config.as_ref().ok_or_else(|| {
        ZellieError::ModelLoad(format!("Missing config.json for {}", layout.root.display()))
    })?;
    let content = std::fs::read_to_string(config_path)
        .map_err(|e| ZellieError::ModelLoad(format!("Failed to read model config: {}", e)))?;
    let config: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| ZellieError::ModelLoad(format!("Failed to parse model config: {}", e)))?;

    let eos_token_ids = eos_ids_from_config(&config);

    let model = match Architecture::detect(&config) {
        Some(Architecture::Phi3) => {
            info!("Loading Phi-3 model");
            load_phi3(layout, device, &config)?
        }
        Some(_) => {
            info!("Loading Llama model");
            load_llama(layout, device, &config)?
        }
        None => {
            warn!(
                "Unknown model type '{}', trying Llama",
                config["model_type"].as_str().unwrap_or("unknown")
            );
            load_llama(layout, device, &config)?
        }
    };

    Ok(LoadedBackend { model, eos_token_ids })
}

/// `eos_token_id` may be a single id or a list of ids
pub fn eos_ids_from_config(config: &serde_json::Value) -> Vec<u32> {
    match &config["eos_token_id"] {
        serde_json::Value::Number(n) => n.as_u64().map(|id| vec![id as u32]).unwrap_or_default(),
        serde_json::Value::Array(ids) => ids
            .iter()
            .filter_map(|v| v.as_u64())
            .map(|id| id as u32)
            .collect(),
        _ => Vec::new(),
    }
}

struct LlamaModel {
    model: llama::Llama,
    cache: llama::Cache,
    config: llama::Config,
    device: Device,
}

impl LanguageModel for LlamaModel {
    fn forward(&mut self, input_ids: &Tensor, position: usize) -> Result<Tensor> {
        self.model
            .forward(input_ids, position, &mut self.cache)
            .map_err(|e| ZellieError::Inference(format!("Llama forward pass failed: {}", e)))
    }

    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn context_length(&self) -> usize {
        self.config.max_position_embeddings
    }

    fn reset(&mut self) -> Result<()> {
        self.cache = llama::Cache::new(true, DType::F32, &self.config, &self.device)
            .map_err(|e| ZellieError::Inference(format!("Failed to reset cache: {}", e)))?;
        Ok(())
    }

    fn architecture(&self) -> Architecture {
        Architecture::Llama
    }
}

fn load_llama(layout: &ModelLayout, device: &Device, config: &serde_json::Value) -> Result<Box<dyn LanguageModel>> {
    let llama_config: llama::LlamaConfig = serde_json::from_value(config.clone())
        .map_err(|e| ZellieError::ModelLoad(format!("Failed to parse Llama config: {}", e)))?;
    let llama_config = llama_config.into_config(cfg!(feature = "flash-attn"));

    let tensors = weights::load_tensors(layout, device)?;
    let vb = VarBuilder::from_tensors(tensors, DType::F32, device);

    let model = llama::Llama::load(vb, &llama_config)
        .map_err(|e| ZellieError::ModelLoad(format!("Failed to load Llama model: {}", e)))?;
    let cache = llama::Cache::new(true, DType::F32, &llama_config, device)
        .map_err(|e| ZellieError::ModelLoad(format!("Failed to initialize Llama cache: {}", e)))?;

    Ok(Box::new(LlamaModel {
        model,
        cache,
        config: llama_config,
        device: device.clone(),
    }))
}

struct Phi3Model {
    model: phi3::Model,
    vocab_size: usize,
    context_length: usize,
}

impl LanguageModel for Phi3Model {
    fn forward(&mut self, input_ids: &Tensor, position: usize) -> Result<Tensor> {
        self.model
            .forward(input_ids, position)
            .map_err(|e| ZellieError::Inference(format!("Phi-3 forward pass failed: {}", e)))
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn context_length(&self) -> usize {
        self.context_length
    }

    fn reset(&mut self) -> Result<()> {
        self.model.clear_kv_cache();
        Ok(())
    }

    fn architecture(&self) -> Architecture {
        Architecture::Phi3
    }
}

fn load_phi3(layout: &ModelLayout, device: &Device, config: &serde_json::Value) -> Result<Box<dyn LanguageModel>> {
    let phi_config: phi3::Config = serde_json::from_value(config.clone())
        .map_err(|e| ZellieError::ModelLoad(format!("Failed to parse Phi-3 config: {}", e)))?;

    let mut tensors = weights::load_tensors(layout, device)?;
    if config["tie_word_embeddings"].as_bool().unwrap_or(false) {
        weights::tie_word_embeddings(&mut tensors)?;
    }
    let vb = VarBuilder::from_tensors(tensors, DType::F32, device);

    let model = phi3::Model::new(&phi_config, vb)
        .map_err(|e| ZellieError::ModelLoad(format!("Failed to load Phi-3 model: {}", e)))?;

    Ok(Box::new(Phi3Model {
        model,
        vocab_size: phi_config.vocab_size,
        context_length: phi_config.max_position_embeddings,
    }))
}

struct QuantizedLlamaModel {
    model: quantized_llama::ModelWeights,
    vocab_size: usize,
    context_length: usize,
}

impl LanguageModel for QuantizedLlamaModel {
    fn forward(&mut self, input_ids: &Tensor, position: usize) -> Result<Tensor> {
        self.model
            .forward(input_ids, position)
            .map_err(|e| ZellieError::Inference(format!("Quantized forward pass failed: {}", e)))
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn context_length(&self) -> usize {
        self.context_length
    }

    // The quantized attention layers drop their cache whenever position 0 is fed
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    fn architecture(&self) -> Architecture {
        Architecture::QuantizedLlama
    }
}

fn load_quantized_llama(layout: &ModelLayout, device: &Device, tokenizer_vocab: usize) -> Result<LoadedBackend> {
    info!("Loading GGUF model");
    let mut file = File::open(&layout.weights)
        .map_err(|e| ZellieError::ModelLoad(format!("Failed to open {}: {}", layout.weights.display(), e)))?;
    let content = gguf_file::Content::read(&mut file)
        .map_err(|e| ZellieError::ModelLoad(format!("Failed to parse GGUF metadata: {}", e)))?;

    let architecture = content
        .metadata
        .get("general.architecture")
        .and_then(|v| v.to_string().ok())
        .cloned()
        .unwrap_or_else(|| "llama".to_string());
    if architecture != "llama" {
        return Err(ZellieError::ModelLoad(format!(
            "Unsupported GGUF architecture '{}' (only llama is supported)",
            architecture
        )));
    }

    let vocab_size = content
        .metadata
        .get("llama.vocab_size")
        .and_then(|v| v.to_u32().ok())
        .map(|v| v as usize)
        .unwrap_or(tokenizer_vocab);
    let context_length = content
        .metadata
        .get("llama.context_length")
        .and_then(|v| v.to_u32().ok())
        .map(|v| (v as usize).min(QUANTIZED_MAX_SEQ_LEN))
        .unwrap_or(QUANTIZED_MAX_SEQ_LEN);
    let eos_token_ids = content
        .metadata
        .get("tokenizer.ggml.eos_token_id")
        .and_then(|v| v.to_u32().ok())
        .into_iter()
        .collect();

    let model = quantized_llama::ModelWeights::from_gguf(content, &mut file, device)
        .map_err(|e| ZellieError::ModelLoad(format!("Failed to load GGUF model: {}", e)))?;

    Ok(LoadedBackend {
        model: Box::new(QuantizedLlamaModel {
            model,
            vocab_size,
            context_length,
        }),
        eos_token_ids,
    })
}
