//! CLI command handlers
//!
//! # Modules
//!
//! - `run`: Load vectors, cluster them and print the result
//! - `show_config`: Print the effective configuration

pub mod run;
pub mod show_config;
