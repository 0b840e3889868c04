//! CLI interface for Zellie

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "zellie")]
#[command(about = "Local-only LLM inference bridge")]
#[command(long_about = "Load local language models and run independent prompt completions without any network service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one or more independent prompts against a local model
    Infer {
        /// Model name from `models list` or a path to a model directory/file
        #[arg(short, long)]
        model: Option<String>,

        /// Prompt text; repeat the flag to run several prompts
        #[arg(short, long, required = true)]
        prompt: Vec<String>,

        /// Maximum number of tokens to generate per prompt
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Sampling temperature (0 for greedy decoding)
        #[arg(short, long)]
        temperature: Option<f64>,

        /// Seed for reproducible sampling
        #[arg(long)]
        seed: Option<u64>,

        /// Compute device: auto, cpu, cuda, metal
        #[arg(long)]
        device: Option<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Model management commands
    Models {
        #[command(subcommand)]
        action: ModelAction,
    },

    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
pub enum ModelAction {
    /// List catalogue and downloaded models
    List,

    /// Download a model from the catalogue
    Download {
        /// Model name
        model: String,

        /// Force re-download if model exists
        #[arg(short, long)]
        force: bool,
    },

    /// Remove a downloaded model
    Remove {
        /// Model name to remove
        model: String,
    },

    /// Show model information
    Info {
        /// Model name
        model: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Print the configuration file path
    Path,

    /// Reset configuration to defaults
    Reset,

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "inference.max_tokens")
        key: String,

        /// Configuration value
        value: String,
    },
}
