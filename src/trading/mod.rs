// src/trading/mod.rs
pub mod confidence;
pub mod scheduler;
pub mod session;
pub mod signals;
pub mod tracker;

pub use confidence::{ConfidenceResult, ConfidenceScorer, Factor, ScoreInput};
pub use scheduler::{
    Clock, EvaluationScheduler, FeedEvaluator, SchedulerHandle, SchedulerStats, SymbolEvaluator,
};
pub use session::{SessionAssessment, SessionPolicy};
pub use signals::{Evaluation, SignalGenerator, SignalState, Suppression, SuppressionReason};
pub use tracker::{
    spawn_tracking, CallEvent, CallOutcome, CallRecord, CallStats, CallTracker, CallUpdate,
};
