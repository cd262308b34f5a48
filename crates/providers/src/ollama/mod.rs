pub mod client;
pub mod config;

pub use client::OllamaClient;
pub use config::{ModelProfile, OllamaConfig};
