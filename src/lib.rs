//! Smart Sampler - a smart sampling analysis engine for meeting recordings
//!
//! This crate analyzes long meeting recordings by sampling only the
//! behaviorally significant intervals instead of processing everything.
//! It features:
//!
//! - Preset sampling configurations trading cost against quality
//! - Chunked scanning with critical-moment detection and merging
//! - A staged analysis state machine with live progress events
//! - Batch orchestration over a bounded worker pool
//! - PM communication insights, cost estimates, analytics, and export
//!
//! # Example
//!
//! ```rust
//! use smart_sampler::{Engine, EngineConfig, SyntheticMeetingSource};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Register a meeting with the signal source
//!     let source = Arc::new(SyntheticMeetingSource::new());
//!     source.insert_meeting("weekly-sync", 1800.0);
//!
//!     // Start an analysis with the BALANCED preset
//!     let engine = Engine::new(source, EngineConfig::default());
//!     let (run, estimate) = engine
//!         .start_analysis("weekly-sync", "pm-1", "BALANCED", None, None)
//!         .await?;
//!
//!     println!(
//!         "analysis {} started, projected savings ${:.2}",
//!         run.id, estimate.savings
//!     );
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod analytics;
pub mod batch;
pub mod config;
pub mod cost;
pub mod engine;
pub mod export;
pub mod insights;
pub mod protocol;
pub mod sampling;
pub mod signal;

// Re-export commonly used types for convenience
pub use analysis::{AnalysisResults, AnalysisRun, ProgressPublisher};
pub use batch::{BatchOrchestrator, BatchRun};
pub use config::{ConfigOverrides, ConfigRegistry, SamplingConfig};
pub use engine::{Engine, EngineConfig, MomentFilter};
pub use protocol::{
    AnalysisStatus, BatchStatus, CostEstimate, CriticalMoment, MomentReason, Priority,
    ProgressEvent,
};
pub use signal::{MeetingSource, SyntheticMeetingSource};

// Error types
use thiserror::Error;

/// Hard ceiling on the number of meetings in one batch.
pub const MAX_BATCH_SIZE: usize = 100;

/// Errors that can occur in the smart sampling engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// The referenced meeting, analysis, batch, or result does not
    /// exist for the requesting user
    #[error("not found: {0}")]
    NotFound(String),

    /// A config name or override value failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Batch submission above the size ceiling
    #[error("batch of {0} meetings exceeds the limit of {max}", max = MAX_BATCH_SIZE)]
    BatchSizeExceeded(usize),

    /// Export format other than pdf/json
    #[error("unsupported export format: {0}")]
    UnsupportedFormat(String),

    /// A pipeline stage failed; captured into the run record
    #[error("stage {stage} failed: {message}")]
    StageFailure { stage: String, message: String },

    /// The run was cancelled before reaching completion
    #[error("analysis cancelled")]
    Cancelled,
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constants() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "smart-sampler");
    }

    #[test]
    fn test_batch_size_error_names_the_limit() {
        let message = EngineError::BatchSizeExceeded(101).to_string();
        assert!(message.contains("101"));
        assert!(message.contains("100"));
    }

    #[test]
    fn test_cancelled_display() {
        assert_eq!(EngineError::Cancelled.to_string(), "analysis cancelled");
    }
}
