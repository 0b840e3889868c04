//! Zellie: local-only LLM inference bridge

#[cfg(feature = "accelerate")]
extern crate accelerate_src;

#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

pub mod cli;
pub mod config;
pub mod error;
pub mod llm;

pub use config::Config;
pub use error::{Result, ZellieError};
pub use llm::agent::AgentBridge;
pub use llm::bridge::{InferenceBridge, ModelHandle};
pub use llm::engine::{InferenceConfig, InferenceResult};
