//! Historical roll-ups over completed analysis runs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::analysis::AnalysisRun;
use crate::config::ConfigRegistry;
use crate::cost::DEFAULT_PER_MEETING_COST_USD;
use crate::protocol::AnalysisStatus;

/// Half-open reporting window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The trailing `days` days ending now.
    pub fn last_days(days: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::days(days),
            end,
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// One per-period point in the trend series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// Period key, `YYYY-MM-DD`
    pub date: String,
    pub analyses: usize,
    pub cost_savings: f64,
    pub quality_score: f64,
}

/// Usage and trend statistics for one user's completed runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    pub total_analyses: usize,
    pub total_cost_savings: f64,
    pub average_quality_score: f64,
    /// One point per day in the window, empty days included
    pub trend_data: Vec<TrendPoint>,
    pub top_insights: Vec<String>,
    /// Always contains every preset name, zero-filled when unused
    pub config_usage: BTreeMap<String, usize>,
}

/// Rolls historical runs up into [`Analytics`].
pub struct AnalyticsAggregator {
    per_meeting_base_cost: f64,
}

impl Default for AnalyticsAggregator {
    fn default() -> Self {
        Self {
            per_meeting_base_cost: DEFAULT_PER_MEETING_COST_USD,
        }
    }
}

impl AnalyticsAggregator {
    pub fn new(per_meeting_base_cost: f64) -> Self {
        Self {
            per_meeting_base_cost,
        }
    }

    /// Aggregate the completed runs that finished inside the window.
    /// Callers pass runs already scoped to one user.
    pub fn summarize(&self, runs: &[AnalysisRun], window: &TimeWindow) -> Analytics {
        let completed: Vec<&AnalysisRun> = runs
            .iter()
            .filter(|r| r.status == AnalysisStatus::Completed)
            .filter(|r| r.completed_at.is_some_and(|at| window.contains(at)))
            .collect();

        let mut config_usage: BTreeMap<String, usize> = ConfigRegistry::preset_names()
            .into_iter()
            .map(|name| (name.to_string(), 0))
            .collect();
        let mut insight_counts: HashMap<String, usize> = HashMap::new();
        let mut total_cost_savings = 0.0;
        let mut quality_sum = 0.0;

        for run in &completed {
            *config_usage.entry(run.config.name.clone()).or_insert(0) += 1;
            if let Some(results) = &run.results {
                total_cost_savings += results.cost_reduction * self.per_meeting_base_cost;
                quality_sum += results.quality_score;
                for rec in &results.pm_analysis.overall_assessment.recommendations {
                    *insight_counts.entry(rec.clone()).or_insert(0) += 1;
                }
            }
        }

        let average_quality_score = if completed.is_empty() {
            0.0
        } else {
            quality_sum / completed.len() as f64
        };

        let mut ranked_insights: Vec<(String, usize)> = insight_counts.into_iter().collect();
        ranked_insights.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let top_insights = ranked_insights
            .into_iter()
            .take(3)
            .map(|(insight, _)| insight)
            .collect();

        Analytics {
            total_analyses: completed.len(),
            total_cost_savings,
            average_quality_score,
            trend_data: Self::trend_series(&completed, window, self.per_meeting_base_cost),
            top_insights,
            config_usage,
        }
    }

    fn trend_series(
        completed: &[&AnalysisRun],
        window: &TimeWindow,
        base_cost: f64,
    ) -> Vec<TrendPoint> {
        let mut points = Vec::new();
        let mut day = window.start.date_naive();
        let last = window.end.date_naive();
        while day <= last {
            let in_day: Vec<&&AnalysisRun> = completed
                .iter()
                .filter(|r| r.completed_at.is_some_and(|at| at.date_naive() == day))
                .collect();
            let cost_savings = in_day
                .iter()
                .filter_map(|r| r.results.as_ref())
                .map(|res| res.cost_reduction * base_cost)
                .sum();
            let quality_score = if in_day.is_empty() {
                0.0
            } else {
                in_day
                    .iter()
                    .filter_map(|r| r.results.as_ref())
                    .map(|res| res.quality_score)
                    .sum::<f64>()
                    / in_day.len() as f64
            };
            points.push(TrendPoint {
                date: day.format("%Y-%m-%d").to_string(),
                analyses: in_day.len(),
                cost_savings,
                quality_score,
            });
            day = day.succ_opt().expect("date overflow");
        }
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisResults;
    use crate::insights::InsightDeriver;

    fn completed_run(config_name: &str, completed_at: DateTime<Utc>) -> AnalysisRun {
        let config = ConfigRegistry::resolve(config_name, None).unwrap();
        let mut run = AnalysisRun::new("meeting-1".to_string(), "user-1".to_string(), config);
        run.status = AnalysisStatus::Completed;
        run.progress = 100;
        run.completed_at = Some(completed_at);
        run.results = Some(AnalysisResults {
            cost_reduction: 0.75,
            quality_score: 0.88,
            analyzed_duration: 450.0,
            original_duration: 1800.0,
            selected_moments: Vec::new(),
            pm_analysis: InsightDeriver::default().derive(&[]),
        });
        run
    }

    #[test]
    fn test_config_usage_always_has_all_presets() {
        let aggregator = AnalyticsAggregator::default();
        let analytics = aggregator.summarize(&[], &TimeWindow::last_days(7));
        for name in ["COST_OPTIMIZED", "BALANCED", "QUALITY_FOCUSED", "ENTERPRISE"] {
            assert_eq!(analytics.config_usage.get(name), Some(&0));
        }
    }

    #[test]
    fn test_summarize_counts_and_savings() {
        let now = Utc::now();
        let runs = vec![
            completed_run("BALANCED", now - Duration::hours(1)),
            completed_run("BALANCED", now - Duration::hours(2)),
            completed_run("ENTERPRISE", now - Duration::hours(3)),
        ];
        let aggregator = AnalyticsAggregator::default();
        let analytics = aggregator.summarize(&runs, &TimeWindow::last_days(7));

        assert_eq!(analytics.total_analyses, 3);
        assert_eq!(analytics.config_usage["BALANCED"], 2);
        assert_eq!(analytics.config_usage["ENTERPRISE"], 1);
        assert_eq!(analytics.config_usage["COST_OPTIMIZED"], 0);
        assert!((analytics.total_cost_savings - 3.0 * 0.75 * 15.0).abs() < 1e-9);
        assert!((analytics.average_quality_score - 0.88).abs() < 1e-9);
        assert!(!analytics.top_insights.is_empty());
    }

    #[test]
    fn test_runs_outside_window_are_excluded() {
        let now = Utc::now();
        let runs = vec![completed_run("BALANCED", now - Duration::days(30))];
        let aggregator = AnalyticsAggregator::default();
        let analytics = aggregator.summarize(&runs, &TimeWindow::last_days(7));
        assert_eq!(analytics.total_analyses, 0);
    }

    #[test]
    fn test_trend_has_one_point_per_day() {
        let aggregator = AnalyticsAggregator::default();
        let window = TimeWindow::last_days(6);
        let analytics = aggregator.summarize(&[], &window);
        assert_eq!(analytics.trend_data.len(), 7); // inclusive of both endpoints
        for point in &analytics.trend_data {
            assert_eq!(point.analyses, 0);
        }
    }

    #[test]
    fn test_processing_runs_are_not_counted() {
        let config = ConfigRegistry::resolve("BALANCED", None).unwrap();
        let run = AnalysisRun::new("meeting-1".to_string(), "user-1".to_string(), config);
        let aggregator = AnalyticsAggregator::default();
        let analytics = aggregator.summarize(&[run], &TimeWindow::last_days(7));
        assert_eq!(analytics.total_analyses, 0);
    }
}
