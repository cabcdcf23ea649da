//! Cost projection for sampled analysis.

use crate::protocol::CostEstimate;
use crate::{EngineError, Result};

/// Default full-analysis cost per meeting, in USD.
pub const DEFAULT_PER_MEETING_COST_USD: f64 = 15.0;

/// Pure cost arithmetic over a sampling ratio.
pub struct CostEstimator;

impl CostEstimator {
    /// Project the cost of analyzing `meeting_count` meetings at the
    /// given sampling ratio. Defined for ratios in [0, 1].
    pub fn estimate(
        meeting_count: usize,
        per_meeting_base_cost: f64,
        sampling_ratio: f64,
    ) -> Result<CostEstimate> {
        if !(0.0..=1.0).contains(&sampling_ratio) {
            return Err(EngineError::InvalidConfiguration(format!(
                "sampling_ratio must be between 0 and 1, got {sampling_ratio}"
            )));
        }
        let original_cost = meeting_count as f64 * per_meeting_base_cost;
        let optimized_cost = original_cost * sampling_ratio;
        Ok(CostEstimate {
            original_cost,
            optimized_cost,
            savings: original_cost - optimized_cost,
            savings_percentage: (1.0 - sampling_ratio) * 100.0,
            currency: "USD".to_string(),
        })
    }
}
