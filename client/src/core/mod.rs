//! Core application infrastructure

pub mod cli;
pub mod config;
pub mod constants;

pub use crate::app::ChatApp;
pub use cli::{CliConfig, Commands};
pub use config::AppConfig;
