//! Prompt values and chat templates

use crate::error::{Result, ZellieError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokenizers::Tokenizer;

/// Caller supplied input text for one inference call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt(String);

impl Prompt {
    /// Rejects empty and whitespace-only text
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ZellieError::InvalidArgument("Prompt must not be empty".to_string()));
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chat format wrapped around a prompt before tokenization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatTemplate {
    #[default]
    Auto,
    Raw,
    Phi3,
    Llama3,
    Zephyr,
    ChatMl,
}

impl ChatTemplate {
    /// Pick a concrete template from the special tokens the tokenizer knows
    pub fn detect(tokenizer: &Tokenizer) -> Self {
        let has = |token: &str| tokenizer.token_to_id(token).is_some();

        if has("<|start_header_id|>") && has("<|eot_id|>") {
            ChatTemplate::Llama3
        } else if has("<|im_start|>") && has("<|im_end|>") {
            ChatTemplate::ChatMl
        } else if has("<|assistant|>") && has("<|end|>") {
            ChatTemplate::Phi3
        } else if has("<|assistant|>") && has("</s>") {
            ChatTemplate::Zephyr
        } else {
            ChatTemplate::Raw
        }
    }

    /// Resolve `Auto` against a tokenizer, keep explicit choices as they are
    pub fn resolve(self, tokenizer: &Tokenizer) -> Self {
        match self {
            ChatTemplate::Auto => Self::detect(tokenizer),
            other => other,
        }
    }

    pub fn render(&self, prompt: &Prompt) -> String {
        let text = prompt.as_str().trim();
        match self {
            ChatTemplate::Auto | ChatTemplate::Raw => prompt.as_str().to_string(),
            ChatTemplate::Phi3 => format!("<|user|>\n{}<|end|>\n<|assistant|>\n", text),
            ChatTemplate::Llama3 => format!(
                "<|start_header_id|>user<|end_header_id|>\n\n{}<|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n",
                text
            ),
            ChatTemplate::Zephyr => format!("<|user|>\n{}</s>\n<|assistant|>\n", text),
            ChatTemplate::ChatMl => format!("<|im_start|>user\n{}<|im_end|>\n<|im_start|>assistant\n", text),
        }
    }

    /// Tokens that end an assistant turn in this template
    pub fn stop_tokens(&self) -> &'static [&'static str] {
        match self {
            ChatTemplate::Auto | ChatTemplate::Raw => &[],
            ChatTemplate::Phi3 => &["<|end|>", "<|endoftext|>"],
            ChatTemplate::Llama3 => &["<|eot_id|>", "<|end_of_text|>"],
            ChatTemplate::Zephyr => &["</s>"],
            ChatTemplate::ChatMl => &["<|im_end|>", "<|endoftext|>"],
        }
    }
}

impl FromStr for ChatTemplate {
    type Err = ZellieError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(ChatTemplate::Auto),
            "raw" | "none" => Ok(ChatTemplate::Raw),
            "phi3" | "phi" => Ok(ChatTemplate::Phi3),
            "llama3" => Ok(ChatTemplate::Llama3),
            "zephyr" => Ok(ChatTemplate::Zephyr),
            "chatml" => Ok(ChatTemplate::ChatMl),
            other => Err(ZellieError::InvalidArgument(format!(
                "Unknown chat template '{}'. Supported: auto, raw, phi3, llama3, zephyr, chatml",
                other
            ))),
        }
    }
}
