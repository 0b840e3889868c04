//! Shared fixtures: a tiny randomly initialised Llama that loads in milliseconds
#![allow(dead_code)]

use candle_core::quantized::{gguf_file, GgmlDType, QTensor};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use candle_transformers::models::{llama, phi3};
use serde_json::json;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use zellie::InferenceConfig;

/// Word-level vocabulary; deliberately free of chat template and EOS tokens
pub const VOCAB: &[&str] = &[
    "<unk>", "hello", "world", "rust", "is", "fast", "the", "model", "says", "local", "cat", "dog",
];

pub fn llama_config_json() -> serde_json::Value {
    json!({
        "architectures": ["LlamaForCausalLM"],
        "model_type": "llama",
        "hidden_size": 16,
        "intermediate_size": 32,
        "vocab_size": VOCAB.len(),
        "num_hidden_layers": 1,
        "num_attention_heads": 2,
        "num_key_value_heads": 2,
        "rms_norm_eps": 1e-5,
        "rope_theta": 10000.0,
        "max_position_embeddings": 64,
        "tie_word_embeddings": false
    })
}

pub fn tokenizer_json() -> serde_json::Value {
    let vocab: serde_json::Map<String, serde_json::Value> = VOCAB
        .iter()
        .enumerate()
        .map(|(id, word)| (word.to_string(), json!(id)))
        .collect();

    json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "WhitespaceSplit" },
        "post_processor": null,
        "decoder": null,
        "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "<unk>" }
    })
}

/// Write config, tokenizer and random safetensors weights into `dir`
pub fn write_tiny_model(dir: &Path) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();

    let config = llama_config_json();
    std::fs::write(dir.join("config.json"), serde_json::to_string_pretty(&config).unwrap()).unwrap();
    write_tokenizer(dir);

    let llama_config: llama::LlamaConfig = serde_json::from_value(config).unwrap();
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    llama::Llama::load(vb, &llama_config.into_config(false)).unwrap();
    varmap.save(dir.join("model.safetensors")).unwrap();

    dir.to_path_buf()
}

pub fn phi3_config_json() -> serde_json::Value {
    json!({
        "architectures": ["Phi3ForCausalLM"],
        "model_type": "phi3",
        "hidden_act": "silu",
        "hidden_size": 16,
        "intermediate_size": 32,
        "vocab_size": VOCAB.len(),
        "num_hidden_layers": 1,
        "num_attention_heads": 2,
        "num_key_value_heads": 2,
        "rms_norm_eps": 1e-5,
        "rope_theta": 10000.0,
        "max_position_embeddings": 64,
        "tie_word_embeddings": true
    })
}

fn write_tokenizer(dir: &Path) {
    std::fs::write(
        dir.join("tokenizer.json"),
        serde_json::to_string_pretty(&tokenizer_json()).unwrap(),
    )
    .unwrap();
}

/// Phi-3 with tied embeddings: the saved weights carry no `lm_head.weight`
pub fn write_tiny_phi3(dir: &Path) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();

    let config = phi3_config_json();
    std::fs::write(dir.join("config.json"), serde_json::to_string_pretty(&config).unwrap()).unwrap();
    write_tokenizer(dir);

    let phi_config: phi3::Config = serde_json::from_value(config).unwrap();
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    phi3::Model::new(&phi_config, vb).unwrap();

    let weights = dir.join("model.safetensors");
    varmap.save(&weights).unwrap();
    let mut tensors = candle_core::safetensors::load(&weights, &Device::Cpu).unwrap();
    tensors.remove("lm_head.weight");
    candle_core::safetensors::save(&tensors, &weights).unwrap();

    dir.to_path_buf()
}

/// Split the single-file weights in `source` into two shards plus an index in `dest`
pub fn shard_model(source: &Path, dest: &Path) -> PathBuf {
    std::fs::create_dir_all(dest).unwrap();
    for file in ["config.json", "tokenizer.json"] {
        std::fs::copy(source.join(file), dest.join(file)).unwrap();
    }

    let tensors = candle_core::safetensors::load(source.join("model.safetensors"), &Device::Cpu).unwrap();
    let mut names: Vec<String> = tensors.keys().cloned().collect();
    names.sort();
    let (first, second) = names.split_at(names.len() / 2);

    let mut weight_map = serde_json::Map::new();
    for (shard, part) in [
        ("model-00001-of-00002.safetensors", first),
        ("model-00002-of-00002.safetensors", second),
    ] {
        let shard_tensors: HashMap<String, Tensor> = part
            .iter()
            .map(|name| (name.clone(), tensors[name].clone()))
            .collect();
        candle_core::safetensors::save(&shard_tensors, dest.join(shard)).unwrap();
        for name in part {
            weight_map.insert(name.clone(), json!(shard));
        }
    }

    let index = json!({ "metadata": {}, "weight_map": weight_map });
    std::fs::write(dest.join("model.safetensors.index.json"), index.to_string()).unwrap();
    dest.to_path_buf()
}

/// Unquantized (F32) llama GGUF file with a sibling tokenizer; returns the file path
pub fn write_tiny_gguf(dir: &Path) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    write_tokenizer(dir);

    let (hidden, ff, vocab) = (16usize, 32usize, VOCAB.len());
    let shapes: Vec<(&str, Vec<usize>)> = vec![
        ("token_embd.weight", vec![vocab, hidden]),
        ("output_norm.weight", vec![hidden]),
        ("output.weight", vec![vocab, hidden]),
        ("blk.0.attn_norm.weight", vec![hidden]),
        ("blk.0.attn_q.weight", vec![hidden, hidden]),
        ("blk.0.attn_k.weight", vec![hidden, hidden]),
        ("blk.0.attn_v.weight", vec![hidden, hidden]),
        ("blk.0.attn_output.weight", vec![hidden, hidden]),
        ("blk.0.ffn_norm.weight", vec![hidden]),
        ("blk.0.ffn_gate.weight", vec![ff, hidden]),
        ("blk.0.ffn_up.weight", vec![ff, hidden]),
        ("blk.0.ffn_down.weight", vec![hidden, ff]),
    ];
    let tensors: Vec<(&str, QTensor)> = shapes
        .into_iter()
        .map(|(name, shape)| {
            let tensor = if name.ends_with("norm.weight") {
                Tensor::ones(shape, DType::F32, &Device::Cpu).unwrap()
            } else {
                Tensor::randn(0f32, 0.5, shape, &Device::Cpu).unwrap()
            };
            (name, QTensor::quantize(&tensor, GgmlDType::F32).unwrap())
        })
        .collect();

    let metadata = vec![
        ("general.architecture", gguf_file::Value::String("llama".to_string())),
        ("llama.attention.head_count", gguf_file::Value::U32(2)),
        ("llama.attention.head_count_kv", gguf_file::Value::U32(2)),
        ("llama.block_count", gguf_file::Value::U32(1)),
        ("llama.embedding_length", gguf_file::Value::U32(hidden as u32)),
        ("llama.rope.dimension_count", gguf_file::Value::U32(8)),
        ("llama.attention.layer_norm_rms_epsilon", gguf_file::Value::F32(1e-5)),
        ("llama.context_length", gguf_file::Value::U32(64)),
        ("llama.vocab_size", gguf_file::Value::U32(vocab as u32)),
    ];

    let path = dir.join("tiny.gguf");
    let mut file = File::create(&path).unwrap();
    let metadata_refs: Vec<(&str, &gguf_file::Value)> = metadata.iter().map(|(k, v)| (*k, v)).collect();
    let tensor_refs: Vec<(&str, &QTensor)> = tensors.iter().map(|(k, v)| (*k, v)).collect();
    gguf_file::write(&mut file, &metadata_refs, &tensor_refs).unwrap();
    path
}

/// Greedy, seeded and short so tests stay fast and repeatable
pub fn test_config() -> InferenceConfig {
    InferenceConfig {
        max_tokens: 4,
        temperature: 0.0,
        seed: Some(42),
        ..Default::default()
    }
}
