pub mod config;

pub use config::{Config, InferenceConfig, TokenConfig};
