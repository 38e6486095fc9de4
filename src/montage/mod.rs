//! Video assembly from mappings: target intervals on an output timeline, each filled by an
//! excerpt of a source video.

pub mod acceptance;
pub mod cli;
pub mod commands;
pub mod config;
pub mod effects;
pub mod error;
pub mod features;
mod logging;
pub mod mapping;
pub mod render;
pub mod sources;
pub mod timepoints;
pub mod timestamp;

pub use self::cli::{BuildArgs, MappingCommands};
pub use self::commands::{handle_build, handle_config, handle_mapping_command};
pub use self::config::MontageConfig;
