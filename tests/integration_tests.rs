//! Integration tests for the agent session, model manager and config wiring

mod common;

use common::{test_config, write_tiny_model};
use tempfile::TempDir;
use zellie::llm::device::DevicePreference;
use zellie::llm::model_manager::ModelManager;
use zellie::{AgentBridge, Config, InferenceBridge, ZellieError};

#[test]
fn test_agent_query() {
    let dir = TempDir::new().unwrap();
    let model = write_tiny_model(dir.path());

    let mut agent = AgentBridge::with_device(&model, test_config(), DevicePreference::Cpu).unwrap();
    let text = agent.query("hello world").unwrap();
    assert!(!text.is_empty());

    let result = agent.query_with_limit("hello", 2).unwrap();
    assert!(result.generated_tokens <= 2);

    let info = agent.model_info().unwrap();
    assert_eq!(info.vocab_size, common::VOCAB.len());
}

#[test]
fn test_agent_rejects_empty_prompt() {
    let dir = TempDir::new().unwrap();
    let model = write_tiny_model(dir.path());

    let mut agent = AgentBridge::with_device(&model, test_config(), DevicePreference::Cpu).unwrap();
    assert!(agent.query("").unwrap_err().is_invalid_argument());
}

#[test]
fn test_agent_load_failure() {
    let err = AgentBridge::new("/nonexistent/model", test_config()).err().unwrap();
    assert!(err.is_model_load());
}

#[tokio::test]
async fn test_manager_resolves_local_model_for_bridge() {
    let dir = TempDir::new().unwrap();
    write_tiny_model(&dir.path().join("tiny"));

    let manager = ModelManager::new(dir.path().to_path_buf()).await.unwrap();
    assert!(manager.is_model_downloaded("tiny"));

    let path = manager.resolve("tiny").unwrap();
    let mut bridge = InferenceBridge::new(test_config()).with_device(DevicePreference::Cpu);
    let handle = bridge.load(&path).unwrap();
    assert!(!bridge.infer(&handle, "hello").unwrap().text.is_empty());
    bridge.release(&handle);
}

#[tokio::test]
async fn test_manager_unknown_model() {
    let dir = TempDir::new().unwrap();
    let manager = ModelManager::new(dir.path().to_path_buf()).await.unwrap();
    let err = manager.resolve("no-such-model-anywhere").unwrap_err();
    assert!(matches!(err, ZellieError::ModelNotFound(_)));
}

#[test]
fn test_config_file_drives_inference() {
    let dir = TempDir::new().unwrap();
    let model = write_tiny_model(&dir.path().join("tiny"));
    let config_path = dir.path().join("config.toml");

    let mut config = Config::default();
    config.models.models_dir = dir.path().to_path_buf();
    config.set("inference.max_tokens", "2").unwrap();
    config.set("inference.temperature", "0").unwrap();
    config.set("inference.seed", "7").unwrap();
    config.set("runtime.device", "cpu").unwrap();
    config.save_to(&config_path).unwrap();

    let loaded = Config::load_from(&config_path).unwrap();
    assert_eq!(loaded, config);

    let mut bridge = InferenceBridge::new(loaded.inference.clone()).with_device(loaded.runtime.device);
    let handle = bridge.load(&model).unwrap();
    let result = bridge.infer(&handle, "rust is fast").unwrap();
    assert!(result.generated_tokens <= 2);
}
