// src/analysis/mod.rs
pub mod engine;
pub mod indicators;

pub use engine::{Bias, IndicatorEngine, IndicatorSnapshot};
pub use indicators::Reading;
