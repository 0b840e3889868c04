//! Weight loading for safetensors (single or sharded) and PyTorch checkpoints

use crate::error::{Result, ZellieError};
use crate::llm::format::{ModelLayout, WeightFormat};
use candle_core::{Device, Tensor};
use log::{debug, info};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

pub type TensorMap = HashMap<String, Tensor>;

const EMBED_TOKENS: &str = "model.embed_tokens.weight";
const LM_HEAD: &str = "lm_head.weight";

/// Load every tensor of a non-GGUF model onto `device`
pub fn load_tensors(layout: &ModelLayout, device: &Device) -> Result<TensorMap> {
    let tensors = match layout.format {
        WeightFormat::Safetensors => {
            info!("Loading single safetensors model...");
            load_safetensors(&layout.weights, device)?
        }
        WeightFormat::ShardedSafetensors => {
            info!("Loading sharded safetensors model...");
            let mut tensors = TensorMap::new();
            for shard in shard_files(&layout.weights)? {
                debug!("Loading shard: {}", shard.display());
                tensors.extend(load_safetensors(&shard, device)?);
            }
            tensors
        }
        WeightFormat::Pytorch => {
            info!("Loading PyTorch checkpoint...");
            candle_core::pickle::read_all(&layout.weights)
                .map_err(|e| {
                    ZellieError::ModelLoad(format!(
                        "Failed to read PyTorch checkpoint {}: {}",
                        layout.weights.display(),
                        e
                    ))
                })?
                .into_iter()
                .map(|(name, tensor)| Ok((name, tensor.to_device(device)?)))
                .collect::<candle_core::Result<TensorMap>>()
                .map_err(|e| ZellieError::ModelLoad(format!("Failed to move tensors to device: {}", e)))?
        }
        WeightFormat::Gguf => {
            return Err(ZellieError::ModelLoad(
                "GGUF weights are loaded by the quantized backend".to_string(),
            ))
        }
    };

    if tensors.is_empty() {
        return Err(ZellieError::ModelLoad(format!(
            "No tensors found in {}",
            layout.weights.display()
        )));
    }

    info!("Loaded {} tensors", tensors.len());
    Ok(tensors)
}

fn load_safetensors(path: &Path, device: &Device) -> Result<TensorMap> {
    candle_core::safetensors::load(path, device).map_err(|e| {
        ZellieError::ModelLoad(format!("Failed to load safetensors {}: {}", path.display(), e))
    })
}

/// Unique shard file names listed in a safetensors index `weight_map`
pub fn shard_names(index_content: &str) -> Result<Vec<String>> {
    let index: serde_json::Value = serde_json::from_str(index_content).map_err(|e| {
        ZellieError::ModelLoad(format!("Failed to parse safetensors index: {}", e))
    })?;

    let weight_map = index
        .get("weight_map")
        .and_then(|v| v.as_object())
        .ok_or_else(|| {
            ZellieError::ModelLoad("Invalid safetensors index format: missing weight_map".to_string())
        })?;

    let names: BTreeSet<String> = weight_map
        .values()
        .filter_map(|v| v.as_str())
        .map(str::to_string)
        .collect();
    Ok(names.into_iter().collect())
}

/// Shard files referenced by a safetensors index, resolved next to the index
pub fn shard_files(index_path: &Path) -> Result<Vec<PathBuf>> {
    let content = std::fs::read_to_string(index_path).map_err(|e| {
        ZellieError::ModelLoad(format!("Failed to read safetensors index: {}", e))
    })?;
    let base = index_path.parent().unwrap_or_else(|| Path::new("."));

    shard_names(&content)?
        .into_iter()
        .map(|name| {
            let shard = base.join(&name);
            if shard.is_file() {
                Ok(shard)
            } else {
                Err(ZellieError::ModelLoad(format!("Shard file not found: {}", name)))
            }
        })
        .collect()
}

/// Create `lm_head.weight` from the token embeddings when the model ties them
pub fn tie_word_embeddings(tensors: &mut TensorMap) -> Result<()> {
    if tensors.contains_key(LM_HEAD) {
        return Ok(());
    }
    let embed = tensors.get(EMBED_TOKENS).cloned().ok_or_else(|| {
        ZellieError::ModelLoad(format!("Cannot tie embeddings: {} not found", EMBED_TOKENS))
    })?;
    debug!("Creating tied {} from {}", LM_HEAD, EMBED_TOKENS);
    tensors.insert(LM_HEAD.to_string(), embed);
    Ok(())
}
