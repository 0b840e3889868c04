//! Local LLM integration: model formats, backends, engine and the inference bridge

pub mod agent;
pub mod backends;
pub mod bridge;
pub mod device;
pub mod engine;
pub mod format;
pub mod model_manager;
pub mod prompts;
pub mod weights;
