//! Zellie: local-only LLM inference from the command line

use clap::Parser;
use colored::Colorize;
use log::{debug, error};
use std::path::Path;
use std::process;
use zellie::cli::{Cli, Commands, ConfigAction, ModelAction};
use zellie::llm::device::DevicePreference;
use zellie::llm::model_manager::ModelManager;
use zellie::{Config, InferenceBridge, Result, ZellieError};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli.command, config, cli.config.as_deref()).await {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

async fn run_command(command: Commands, config: Config, config_path: Option<&Path>) -> Result<()> {
    match command {
        Commands::Infer {
            model,
            prompt,
            max_tokens,
            temperature,
            seed,
            device,
            json,
        } => {
            let manager = ModelManager::new(config.models_dir().clone()).await?;
            let model = model.unwrap_or_else(|| config.models.default_model.clone());
            let model_path = manager.resolve(&model)?;

            let mut inference = config.inference.clone();
            if let Some(max_tokens) = max_tokens {
                inference.max_tokens = max_tokens;
            }
            if let Some(temperature) = temperature {
                inference.temperature = temperature;
            }
            if seed.is_some() {
                inference.seed = seed;
            }
            inference.validate()?;

            let device = match device {
                Some(device) => device.parse::<DevicePreference>()?,
                None => config.runtime.device,
            };

            let mut bridge = InferenceBridge::new(inference).with_device(device);
            let handle = bridge.load(&model_path)?;
            debug!("Model info: {:?}", bridge.model_info(&handle)?);

            // Release on every path, including a failed prompt
            let outcome = run_prompts(&mut bridge, &handle, &prompt, json);
            bridge.release(&handle);
            outcome?;
        }

        Commands::Models { action } => {
            let mut manager = ModelManager::new(config.models_dir().clone()).await?;
            match action {
                ModelAction::List => {
                    println!("📚 Available Models\n");
                    for (id, info) in manager.list_available_models() {
                        let status = if manager.is_model_downloaded(id) {
                            "downloaded".green()
                        } else {
                            "available".yellow()
                        };
                        println!(
                            "  • {} ({}) - {:.1} GB [{}]",
                            id.bold(),
                            info.repo_id,
                            info.size_mb as f64 / 1024.0,
                            status
                        );
                        println!("    {}", info.description);
                    }

                    let local: Vec<String> = manager
                        .list_downloaded_models()
                        .into_iter()
                        .filter(|id| manager.get_model_info(id).is_none())
                        .collect();
                    if !local.is_empty() {
                        println!("\n📁 Other local models:");
                        for id in local {
                            println!("  • {}", id.bold());
                        }
                    }

                    if manager.list_downloaded_models().is_empty() {
                        println!("\n💡 No models downloaded yet. Get started with:");
                        println!("   zellie models download {}", config.models.default_model);
                    }
                }

                ModelAction::Download { model, force } => {
                    println!("⬇️  Downloading model: {}", model);
                    let path = manager.download_model(&model, force).await?;
                    println!("{} Model '{}' ready", "✅".green(), model);
                    println!("📁 Location: {}", path.display());
                }

                ModelAction::Remove { model } => {
                    let path = manager.remove_model(&model).await?;
                    println!("{} Model '{}' removed", "✅".green(), model);
                    println!("📁 Removed directory: {}", path.display());
                }

                ModelAction::Info { model } => {
                    let info = manager
                        .get_model_info(&model)
                        .ok_or_else(|| ZellieError::ModelNotFound(model.clone()))?;
                    println!("📋 Model Information for '{}'\n", model);
                    println!("Name: {}", info.name);
                    println!("Repository: {}", info.repo_id);
                    println!("Architecture: {}", info.architecture);
                    println!("Size: {} MB", info.size_mb);
                    println!("Description: {}", info.description);

                    match manager.get_model_path(&model) {
                        Some(path) => println!("Status: {} ({})", "downloaded".green(), path.display()),
                        None => {
                            println!("Status: {}", "available for download".yellow());
                            println!("\n💡 To download this model, run:");
                            println!("   zellie models download {}", model);
                        }
                    }

                    if !info.capabilities.is_empty() {
                        println!("\nCapabilities:");
                        for capability in &info.capabilities {
                            println!("  • {}", capability);
                        }
                    }
                }
            }
        }

        Commands::Config { action } => {
            let path = config_path
                .map(Path::to_path_buf)
                .unwrap_or_else(Config::config_path);
            match action {
                Some(ConfigAction::Show) | None => {
                    println!("⚙️  Current Configuration\n");
                    println!("Models Directory: {}", config.models_dir().display());
                    println!("Default Model: {}", config.models.default_model);
                    println!("Device: {}", config.runtime.device);
                    println!("\nInference:");
                    println!("  max_tokens: {}", config.inference.max_tokens);
                    println!("  temperature: {}", config.inference.temperature);
                    println!("  top_p: {}", config.inference.top_p);
                    match config.inference.top_k {
                        Some(k) => println!("  top_k: {}", k),
                        None => println!("  top_k: off"),
                    }
                    println!("  repeat_penalty: {}", config.inference.repeat_penalty);
                    println!("  chat_template: {:?}", config.inference.chat_template);
                }

                Some(ConfigAction::Path) => println!("{}", path.display()),

                Some(ConfigAction::Reset) => {
                    Config::default().save_to(&path)?;
                    println!("{} Configuration reset: {}", "✅".green(), path.display());
                }

                Some(ConfigAction::Set { key, value }) => {
                    let mut config = config;
                    config.set(&key, &value)?;
                    config.save_to(&path)?;
                    println!("{} {} = {}", "✅".green(), key, value);
                }
            }
        }
    }

    Ok(())
}

fn run_prompts(
    bridge: &mut InferenceBridge,
    handle: &zellie::ModelHandle,
    prompts: &[String],
    json: bool,
) -> Result<()> {
    let mut results = Vec::with_capacity(prompts.len());
    for prompt in prompts {
        let result = bridge.infer(handle, prompt)?;
        if !json {
            println!("{}", result.text);
            println!(
                "{}",
                format!(
                    "({} tokens, {}ms, {:.1} tokens/sec)",
                    result.generated_tokens, result.inference_time_ms, result.tokens_per_second
                )
                .dimmed()
            );
        }
        results.push(result);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    }
    Ok(())
}
