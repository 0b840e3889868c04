//! Single-model session that connects a frontend to the local engine

use crate::error::Result;
use crate::llm::bridge::{InferenceBridge, ModelHandle};
use crate::llm::device::DevicePreference;
use crate::llm::engine::{InferenceConfig, InferenceResult, ModelInferenceInfo};
use std::path::Path;

/// Loads one model on creation and releases it when dropped
pub struct AgentBridge {
    bridge: InferenceBridge,
    handle: ModelHandle,
}

impl AgentBridge {
    pub fn new(model_path: impl AsRef<Path>, config: InferenceConfig) -> Result<Self> {
        Self::with_device(model_path, config, DevicePreference::Auto)
    }

    pub fn with_device(
        model_path: impl AsRef<Path>,
        config: InferenceConfig,
        device: DevicePreference,
    ) -> Result<Self> {
        let mut bridge = InferenceBridge::new(config).with_device(device);
        let handle = bridge.load(model_path)?;
        Ok(Self { bridge, handle })
    }

    /// Ask the local model and return only the generated text
    pub fn query(&mut self, prompt: &str) -> Result<String> {
        Ok(self.bridge.infer(&self.handle, prompt)?.text)
    }

    /// Like `query`, with a per-call token budget
    pub fn query_with_limit(&mut self, prompt: &str, max_tokens: usize) -> Result<InferenceResult> {
        let config = InferenceConfig {
            max_tokens,
            ..self.bridge.config().clone()
        };
        self.bridge.infer_with(&self.handle, prompt, &config)
    }

    pub fn model_info(&self) -> Result<ModelInferenceInfo> {
        self.bridge.model_info(&self.handle)
    }
}

impl Drop for AgentBridge {
    fn drop(&mut self) {
        self.bridge.release(&self.handle);
    }
}
