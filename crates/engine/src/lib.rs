//! Runtime configuration and the LLM integration for the study task engine.

pub mod config;
pub mod llm;

pub use config::{AccessConfig, AppConfig, LlmConfig};
pub use llm::{ChatMessage, LlmProvider, LlmService};
