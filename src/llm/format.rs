//! Model format detection
//!
//! Resolves a user supplied model path (a directory or a single weights file)
//! into the set of files needed to build an engine.

use crate::error::{Result, ZellieError};
use crate::llm::weights;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

pub const GGUF_MAGIC: &[u8; 4] = b"GGUF";

pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const SAFETENSORS_FILE: &str = "model.safetensors";
pub const SAFETENSORS_INDEX_FILE: &str = "model.safetensors.index.json";
pub const PYTORCH_FILE: &str = "pytorch_model.bin";

#[derive(Debug, Clone, PartialEq)]
pub enum WeightFormat {
    Safetensors,
    ShardedSafetensors,
    Pytorch,
    Gguf,
}

impl WeightFormat {
    pub fn from_file_name(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        if name.ends_with(".safetensors.index.json") {
            Some(WeightFormat::ShardedSafetensors)
        } else if name.ends_with(".safetensors") {
            Some(WeightFormat::Safetensors)
        } else if name.ends_with(".bin") || name.ends_with(".pt") || name.ends_with(".pth") {
            Some(WeightFormat::Pytorch)
        } else if name.ends_with(".gguf") {
            Some(WeightFormat::Gguf)
        } else {
            None
        }
    }

    /// GGUF files carry their hyper-parameters in metadata instead of `config.json`
    pub fn needs_config(&self) -> bool {
        !matches!(self, WeightFormat::Gguf)
    }
}

/// Files making up one model on disk
#[derive(Debug, Clone)]
pub struct ModelLayout {
    pub root: PathBuf,
    pub format: WeightFormat,
    pub weights: PathBuf,
    pub config: Option<PathBuf>,
    pub tokenizer: PathBuf,
}

impl ModelLayout {
    /// Resolve a model path, checking that every companion file is present
    pub fn resolve(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ZellieError::ModelLoad(format!(
                "Model path does not exist: {}",
                path.display()
            )));
        }

        let (root, format, weights) = if path.is_dir() {
            let (format, weights) = Self::detect_in_directory(path)?;
            (path.to_path_buf(), format, weights)
        } else {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let format = WeightFormat::from_file_name(&name).ok_or_else(|| {
                ZellieError::ModelLoad(format!(
                    "Unsupported model file: {} (expected .safetensors, .bin, .pt, .pth or .gguf)",
                    path.display()
                ))
            })?;
            let root = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            (root, format, path.to_path_buf())
        };

        match format {
            WeightFormat::Gguf => validate_gguf(&weights)?,
            // Every shard named by the index must be on disk
            WeightFormat::ShardedSafetensors => {
                weights::shard_files(&weights)?;
            }
            _ => {}
        }

        let config = if format.needs_config() {
            let config = root.join(CONFIG_FILE);
            if !config.is_file() {
                return Err(ZellieError::ModelLoad(format!(
                    "Missing {} next to model weights in {}",
                    CONFIG_FILE,
                    root.display()
                )));
            }
            Some(config)
        } else {
            None
        };

        let tokenizer = root.join(TOKENIZER_FILE);
        if !tokenizer.is_file() {
            return Err(ZellieError::ModelLoad(format!(
                "Missing {} next to model weights in {}",
                TOKENIZER_FILE,
                root.display()
            )));
        }

        Ok(Self {
            root,
            format,
            weights,
            config,
            tokenizer,
        })
    }

    fn detect_in_directory(dir: &Path) -> Result<(WeightFormat, PathBuf)> {
        let index = dir.join(SAFETENSORS_INDEX_FILE);
        if index.is_file() {
            return Ok((WeightFormat::ShardedSafetensors, index));
        }

        let single = dir.join(SAFETENSORS_FILE);
        if single.is_file() {
            return Ok((WeightFormat::Safetensors, single));
        }

        let pytorch = dir.join(PYTORCH_FILE);
        if pytorch.is_file() {
            return Ok((WeightFormat::Pytorch, pytorch));
        }

        let mut gguf_files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(|e| {
            ZellieError::ModelLoad(format!("Failed to read model directory {}: {}", dir.display(), e))
        })? {
            let entry = entry.map_err(|e| {
                ZellieError::ModelLoad(format!("Failed to read directory entry: {}", e))
            })?;
            let path = entry.path();
            if path.is_file()
                && path
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case("gguf"))
                    .unwrap_or(false)
            {
                gguf_files.push(path);
            }
        }

        match gguf_files.len() {
            0 => Err(ZellieError::ModelLoad(format!(
                "No model weights found in {} (neither safetensors, pytorch nor gguf)",
                dir.display()
            ))),
            1 => Ok((WeightFormat::Gguf, gguf_files.remove(0))),
            n => Err(ZellieError::ModelLoad(format!(
                "Found {} gguf files in {}; pass the file path directly",
                n,
                dir.display()
            ))),
        }
    }

    /// Directory name or file stem, used as a display name
    pub fn model_name(&self) -> String {
        let source = if self.format == WeightFormat::Gguf {
            self.weights.file_stem()
        } else {
            self.root.file_name()
        };
        source
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "local".to_string())
    }
}

/// Check the GGUF magic bytes before handing the file to candle
pub fn validate_gguf(path: &Path) -> Result<()> {
    let mut file = File::open(path).map_err(|e| {
        ZellieError::ModelLoad(format!("Failed to open {}: {}", path.display(), e))
    })?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).map_err(|_| {
        ZellieError::ModelLoad(format!("File too short to be GGUF: {}", path.display()))
    })?;
    if &magic != GGUF_MAGIC {
        return Err(ZellieError::ModelLoad(format!(
            "Not a GGUF file (bad magic): {}",
            path.display()
        )));
    }
    Ok(())
}
