//! Inference bridge: owns loaded models and hands out opaque handles to them
//!
//! A [`ModelHandle`] is only meaningful to the [`InferenceBridge`] that created
//! it. Loading either produces a fully usable handle or an error, releasing is
//! idempotent, and dropping the bridge frees every model it still holds.
//!
//! ```no_run
//! use zellie::llm::bridge::InferenceBridge;
//! use zellie::llm::engine::InferenceConfig;
//!
//! # fn main() -> zellie::Result<()> {
//! let mut bridge = InferenceBridge::new(InferenceConfig::default());
//! let handle = bridge.load("models/smollm2-360m")?;
//! let result = bridge.infer(&handle, "Write a hello world in Rust")?;
//! println!("{}", result.text);
//! bridge.release(&handle);
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, ZellieError};
use crate::llm::device::DevicePreference;
use crate::llm::engine::{InferenceConfig, InferenceResult, LLMEngine, ModelInferenceInfo};
use crate::llm::prompts::Prompt;
use log::{debug, info};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_BRIDGE_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque reference to a model loaded by one bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelHandle {
    bridge: u64,
    slot: u64,
}

impl fmt::Display for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model#{}", self.slot)
    }
}

pub struct InferenceBridge {
    id: u64,
    next_slot: u64,
    models: HashMap<u64, LLMEngine>,
    config: InferenceConfig,
    device: DevicePreference,
}

impl InferenceBridge {
    pub fn new(config: InferenceConfig) -> Self {
        Self {
            id: NEXT_BRIDGE_ID.fetch_add(1, Ordering::Relaxed),
            next_slot: 1,
            models: HashMap::new(),
            config,
            device: DevicePreference::Auto,
        }
    }

    pub fn with_device(mut self, device: DevicePreference) -> Self {
        self.device = device;
        self
    }

    /// Load a model directory or weights file. Fails with `ModelLoad`.
    pub fn load(&mut self, model_path: impl AsRef<Path>) -> Result<ModelHandle> {
        let engine = LLMEngine::load(model_path.as_ref(), self.device, self.config.chat_template)?;

        let handle = ModelHandle {
            bridge: self.id,
            slot: self.next_slot,
        };
        self.next_slot += 1;
        self.models.insert(handle.slot, engine);

        info!("Loaded {} from {}", handle, model_path.as_ref().display());
        Ok(handle)
    }

    /// Run one independent prompt using the bridge's inference config
    pub fn infer(&mut self, handle: &ModelHandle, prompt: &str) -> Result<InferenceResult> {
        let config = self.config.clone();
        self.infer_with(handle, prompt, &config)
    }

    /// Run one independent prompt with a per-call config override
    pub fn infer_with(
        &mut self,
        handle: &ModelHandle,
        prompt: &str,
        config: &InferenceConfig,
    ) -> Result<InferenceResult> {
        // Argument errors win over handle errors
        let prompt = Prompt::new(prompt)?;
        config.validate()?;

        let engine = self.engine_mut(handle)?;
        engine.generate(&prompt, config)
    }

    /// Free the model behind `handle`. Unknown, foreign and released handles are ignored.
    pub fn release(&mut self, handle: &ModelHandle) {
        if handle.bridge != self.id {
            debug!("Ignoring release of {} owned by another bridge", handle);
            return;
        }
        if self.models.remove(&handle.slot).is_some() {
            info!("Released {}", handle);
        }
    }

    pub fn is_loaded(&self, handle: &ModelHandle) -> bool {
        handle.bridge == self.id && self.models.contains_key(&handle.slot)
    }

    pub fn loaded_count(&self) -> usize {
        self.models.len()
    }

    pub fn model_info(&self, handle: &ModelHandle) -> Result<ModelInferenceInfo> {
        self.check_owner(handle)?;
        self.models
            .get(&handle.slot)
            .map(LLMEngine::info)
            .ok_or_else(|| released(handle))
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: InferenceConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    fn engine_mut(&mut self, handle: &ModelHandle) -> Result<&mut LLMEngine> {
        self.check_owner(handle)?;
        self.models.get_mut(&handle.slot).ok_or_else(|| released(handle))
    }

    fn check_owner(&self, handle: &ModelHandle) -> Result<()> {
        if handle.bridge != self.id {
            return Err(ZellieError::Inference(format!(
                "{} does not belong to this bridge",
                handle
            )));
        }
        Ok(())
    }
}

fn released(handle: &ModelHandle) -> ZellieError {
    ZellieError::Inference(format!("{} is not loaded (released or never created)", handle))
}
