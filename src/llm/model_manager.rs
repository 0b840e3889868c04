//! Local model management: catalogue, download from the Hugging Face hub and removal

use crate::error::{Result, ZellieError};
use crate::llm::backends::Architecture;
use crate::llm::format::{ModelLayout, CONFIG_FILE, SAFETENSORS_FILE, SAFETENSORS_INDEX_FILE, PYTORCH_FILE, TOKENIZER_FILE};
use crate::llm::weights;
use hf_hub::api::tokio::{Api, ApiRepo};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::fs;

const SUGGESTION_THRESHOLD: f64 = 0.8;

/// Information about a downloadable model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub repo_id: String,
    pub size_mb: u64,
    pub description: String,
    pub architecture: Architecture,
    pub capabilities: Vec<String>,
}

/// Manager for local models - handles download, lookup and removal
pub struct ModelManager {
    models_dir: PathBuf,
    available_models: BTreeMap<String, ModelInfo>,
    downloaded_models: BTreeSet<String>,
    api: Api,
}

impl ModelManager {
    /// Create a new model manager rooted at `models_dir`
    pub async fn new(models_dir: PathBuf) -> Result<Self> {
        if !models_dir.exists() {
            fs::create_dir_all(&models_dir).await.map_err(|e| {
                ZellieError::Configuration(format!("Failed to create models directory: {}", e))
            })?;
        }

        let api = Api::new()
            .map_err(|e| ZellieError::Download(format!("Failed to initialize HF API: {}", e)))?;

        let mut manager = Self {
            models_dir,
            available_models: BTreeMap::new(),
            downloaded_models: BTreeSet::new(),
            api,
        };

        manager.init_available_models();
        manager.scan_downloaded_models().await?;

        Ok(manager)
    }

    fn init_available_models(&mut self) {
        self.available_models.insert(
            "smollm2-360m".to_string(),
            ModelInfo {
                name: "SmolLM2-360M-Instruct".to_string(),
                repo_id: "HuggingFaceTB/SmolLM2-360M-Instruct".to_string(),
                size_mb: 724,
                description: "Tiny Apache-2.0 instruction model, runs anywhere".to_string(),
                architecture: Architecture::Llama,
                capabilities: vec!["instruction-following".to_string(), "code-completion".to_string()],
            },
        );

        self.available_models.insert(
            "tinyllama".to_string(),
            ModelInfo {
                name: "TinyLlama-1.1B-Chat".to_string(),
                repo_id: "TinyLlama/TinyLlama-1.1B-Chat-v1.0".to_string(),
                size_mb: 2200,
                description: "Lightweight Apache-2.0 chat model".to_string(),
                architecture: Architecture::Llama,
                capabilities: vec!["chat".to_string(), "text-generation".to_string()],
            },
        );

        self.available_models.insert(
            "phi-3-mini".to_string(),
            ModelInfo {
                name: "Phi-3-mini-4k-instruct".to_string(),
                repo_id: "microsoft/Phi-3-mini-4k-instruct".to_string(),
                size_mb: 7600,
                description: "MIT licensed model with strong reasoning and code".to_string(),
                architecture: Architecture::Phi3,
                capabilities: vec![
                    "instruction-following".to_string(),
                    "code-generation".to_string(),
                    "reasoning".to_string(),
                ],
            },
        );
    }

    /// Any sub-directory that resolves to a complete model layout counts as downloaded
    async fn scan_downloaded_models(&mut self) -> Result<()> {
        let mut entries = fs::read_dir(&self.models_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() && is_valid_model_directory(&entry.path()) {
                self.downloaded_models
                    .insert(entry.file_name().to_string_lossy().to_string());
            }
        }

        Ok(())
    }

    /// Download a catalogue model into `models_dir/<model_id>`
    pub async fn download_model(&mut self, model_id: &str, force: bool) -> Result<PathBuf> {
        let model_info = self
            .available_models
            .get(model_id)
            .cloned()
            .ok_or_else(|| self.not_found(model_id))?;

        let model_dir = self.models_dir.join(model_id);

        if self.downloaded_models.contains(model_id) {
            if !force {
                return Ok(model_dir);
            }
            self.remove_model(model_id).await?;
        }

        info!("Downloading model: {} ({} MB) from {}", model_info.name, model_info.size_mb, model_info.repo_id);
        fs::create_dir_all(&model_dir).await?;

        let repo = self.api.model(model_info.repo_id.clone());

        fetch(&repo, CONFIG_FILE, &model_dir).await?;
        fetch(&repo, TOKENIZER_FILE, &model_dir).await?;
        for optional in ["tokenizer_config.json", "generation_config.json"] {
            if let Err(e) = fetch(&repo, optional, &model_dir).await {
                warn!("Skipping {}: {}", optional, e);
            }
        }

        if let Ok(cached_index) = fetch_cached(&repo, SAFETENSORS_INDEX_FILE).await {
            let index = fs::read_to_string(&cached_index).await?;
            for shard in weights::shard_names(&index)? {
                fetch(&repo, &shard, &model_dir).await?;
            }
            // Index last: an interrupted download must not resolve as a model
            install(&cached_index, SAFETENSORS_INDEX_FILE, &model_dir).await?;
        } else if fetch(&repo, SAFETENSORS_FILE, &model_dir).await.is_err() {
            fetch(&repo, PYTORCH_FILE, &model_dir).await?;
        }

        if !is_valid_model_directory(&model_dir) {
            return Err(ZellieError::Download(format!(
                "Downloaded files for '{}' do not form a loadable model",
                model_id
            )));
        }

        self.downloaded_models.insert(model_id.to_string());
        info!("Model {} downloaded to {}", model_info.name, model_dir.display());
        Ok(model_dir)
    }

    /// Delete a downloaded model directory
    pub async fn remove_model(&mut self, model_id: &str) -> Result<PathBuf> {
        if !self.downloaded_models.contains(model_id) {
            return Err(ZellieError::ModelNotFound(format!("'{}' is not downloaded", model_id)));
        }

        let model_dir = self.models_dir.join(model_id);
        fs::remove_dir_all(&model_dir).await?;
        self.downloaded_models.remove(model_id);
        info!("Removed model directory {}", model_dir.display());
        Ok(model_dir)
    }

    /// Turn a model name or path into a loadable path.
    /// Existing paths win over names so local checkouts never need registering.
    pub fn resolve(&self, name_or_path: &str) -> Result<PathBuf> {
        let path = Path::new(name_or_path);
        if path.exists() {
            return Ok(path.to_path_buf());
        }

        if let Some(model_path) = self.get_model_path(name_or_path) {
            return Ok(model_path);
        }

        if self.available_models.contains_key(name_or_path) {
            return Err(ZellieError::ModelNotFound(format!(
                "'{}' is not downloaded; run `zellie models download {}`",
                name_or_path, name_or_path
            )));
        }

        Err(self.not_found(name_or_path))
    }

    fn not_found(&self, name: &str) -> ZellieError {
        match self.suggest(name) {
            Some(candidate) => ZellieError::ModelNotFound(format!(
                "'{}' (did you mean '{}'?)",
                name, candidate
            )),
            None => ZellieError::ModelNotFound(format!("'{}'", name)),
        }
    }

    /// Closest known model name, if any is similar enough
    pub fn suggest(&self, name: &str) -> Option<String> {
        let name = name.to_lowercase();
        self.available_models
            .keys()
            .chain(self.downloaded_models.iter())
            .map(|candidate| (candidate, strsim::jaro_winkler(&name, &candidate.to_lowercase())))
            .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(candidate, _)| candidate.clone())
    }

    pub fn get_model_path(&self, model_id: &str) -> Option<PathBuf> {
        if self.downloaded_models.contains(model_id) {
            Some(self.models_dir.join(model_id))
        } else {
            None
        }
    }

    pub fn list_available_models(&self) -> Vec<(&String, &ModelInfo)> {
        self.available_models.iter().collect()
    }

    pub fn list_downloaded_models(&self) -> Vec<String> {
        self.downloaded_models.iter().cloned().collect()
    }

    pub fn get_model_info(&self, model_id: &str) -> Option<&ModelInfo> {
        self.available_models.get(model_id)
    }

    pub fn is_model_downloaded(&self, model_id: &str) -> bool {
        self.downloaded_models.contains(model_id)
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }
}

fn is_valid_model_directory(path: &Path) -> bool {
    ModelLayout::resolve(path).is_ok()
}

/// Fetch one repo file through the hub cache and copy it into `dest_dir`
async fn fetch(repo: &ApiRepo, file: &str, dest_dir: &Path) -> Result<PathBuf> {
    let cached = fetch_cached(repo, file).await?;
    install(&cached, file, dest_dir).await
}

async fn fetch_cached(repo: &ApiRepo, file: &str) -> Result<PathBuf> {
    repo.get(file)
        .await
        .map_err(|e| ZellieError::Download(format!("Failed to download {}: {}", file, e)))
}

async fn install(cached: &Path, file: &str, dest_dir: &Path) -> Result<PathBuf> {
    let dest = dest_dir.join(file);
    fs::copy(cached, &dest)
        .await
        .map_err(|e| ZellieError::Download(format!("Failed to copy {}: {}", file, e)))?;
    info!("Downloaded: {}", file);
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn manager_in(dir: &TempDir) -> ModelManager {
        ModelManager::new(dir.path().to_path_buf()).await.unwrap()
    }

    fn fake_model(root: &Path, name: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        for file in [CONFIG_FILE, TOKENIZER_FILE, SAFETENSORS_FILE] {
            std::fs::write(dir.join(file), b"{}").unwrap();
        }
    }

    #[tokio::test]
    async fn test_model_manager_creation() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager_in(&temp_dir).await;
        assert!(!manager.list_available_models().is_empty());
        assert!(manager.list_downloaded_models().is_empty());
    }

    #[tokio::test]
    async fn test_scan_finds_complete_models_only() {
        let temp_dir = TempDir::new().unwrap();
        fake_model(temp_dir.path(), "my-model");
        std::fs::create_dir_all(temp_dir.path().join("half-done")).unwrap();

        let manager = manager_in(&temp_dir).await;
        assert_eq!(manager.list_downloaded_models(), vec!["my-model".to_string()]);
        assert!(manager.is_model_downloaded("my-model"));
        assert!(!manager.is_model_downloaded("half-done"));
    }

    #[tokio::test]
    async fn test_interrupted_sharded_download_is_not_listed() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("tinyllama");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(CONFIG_FILE), b"{}").unwrap();
        std::fs::write(dir.join(TOKENIZER_FILE), b"{}").unwrap();
        std::fs::write(
            dir.join(SAFETENSORS_INDEX_FILE),
            br#"{"weight_map": {"a": "model-00001-of-00002.safetensors", "b": "model-00002-of-00002.safetensors"}}"#,
        )
        .unwrap();
        std::fs::write(dir.join("model-00001-of-00002.safetensors"), b"{}").unwrap();

        let manager = manager_in(&temp_dir).await;
        assert!(!manager.is_model_downloaded("tinyllama"));
        assert!(manager.get_model_path("tinyllama").is_none());
        let err = manager.resolve("tinyllama").unwrap_err();
        assert!(err.to_string().contains("zellie models download tinyllama"));
    }

    #[tokio::test]
    async fn test_resolve_prefers_existing_path() {
        let temp_dir = TempDir::new().unwrap();
        fake_model(temp_dir.path(), "local");
        let manager = manager_in(&temp_dir).await;

        let direct = temp_dir.path().join("local");
        assert_eq!(manager.resolve(direct.to_str().unwrap()).unwrap(), direct);
        assert_eq!(manager.resolve("local").unwrap(), direct);
    }

    #[tokio::test]
    async fn test_resolve_catalogue_model_not_downloaded() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager_in(&temp_dir).await;

        let err = manager.resolve("tinyllama").unwrap_err();
        assert!(matches!(err, ZellieError::ModelNotFound(_)));
        assert!(err.to_string().contains("zellie models download tinyllama"));
    }

    #[tokio::test]
    async fn test_resolve_suggests_similar_name() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager_in(&temp_dir).await;

        let err = manager.resolve("tinyllamma").unwrap_err();
        assert!(err.to_string().contains("did you mean 'tinyllama'"));
        assert_eq!(manager.suggest("qwerty-zzz"), None);
    }

    #[tokio::test]
    async fn test_remove_model() {
        let temp_dir = TempDir::new().unwrap();
        fake_model(temp_dir.path(), "scratch");
        let mut manager = manager_in(&temp_dir).await;

        let removed = manager.remove_model("scratch").await.unwrap();
        assert!(!removed.exists());
        assert!(!manager.is_model_downloaded("scratch"));
        assert!(manager.remove_model("scratch").await.is_err());
    }

    #[tokio::test]
    async fn test_download_unknown_model_fails_fast() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = manager_in(&temp_dir).await;
        let err = manager.download_model("no-such-model", false).await.unwrap_err();
        assert!(matches!(err, ZellieError::ModelNotFound(_)));
    }
}
