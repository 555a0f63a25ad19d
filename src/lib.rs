// src/lib.rs
// Main library module declarations

pub mod analysis;
pub mod config;
pub mod domain;
pub mod market_data;
pub mod pipeline;
pub mod trading;

pub use config::Config;
pub use pipeline::{RunningPipeline, SignalPipeline};
