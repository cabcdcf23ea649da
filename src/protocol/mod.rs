use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why an interval was flagged as behaviorally significant.
///
/// Content-based reasons outrank structural ones, which outrank plain
/// energy qualification. The ordering is used when a single interval
/// matches several patterns and exactly one reason must be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MomentReason {
    HighEnergyAndKeywords,
    SpeakerTransition,
    PostSilenceHighEnergy,
    DecisionPoint,
    ExecutiveHandoff,
    StakeholderPushback,
}

impl MomentReason {
    /// Selection rank: higher wins when tagging a moment.
    pub fn priority(&self) -> u8 {
        match self {
            MomentReason::DecisionPoint
            | MomentReason::StakeholderPushback
            | MomentReason::ExecutiveHandoff => 2,
            MomentReason::SpeakerTransition | MomentReason::PostSilenceHighEnergy => 1,
            MomentReason::HighEnergyAndKeywords => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MomentReason::HighEnergyAndKeywords => "HIGH_ENERGY_AND_KEYWORDS",
            MomentReason::SpeakerTransition => "SPEAKER_TRANSITION",
            MomentReason::PostSilenceHighEnergy => "POST_SILENCE_HIGH_ENERGY",
            MomentReason::DecisionPoint => "DECISION_POINT",
            MomentReason::ExecutiveHandoff => "EXECUTIVE_HANDOFF",
            MomentReason::StakeholderPushback => "STAKEHOLDER_PUSHBACK",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommunicationType {
    ExecutiveSummary,
    StakeholderInfluence,
    DecisionDefense,
    StatusUpdate,
}

impl CommunicationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommunicationType::ExecutiveSummary => "EXECUTIVE_SUMMARY",
            CommunicationType::StakeholderInfluence => "STAKEHOLDER_INFLUENCE",
            CommunicationType::DecisionDefense => "DECISION_DEFENSE",
            CommunicationType::StatusUpdate => "STATUS_UPDATE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidencePattern {
    Assertive,
    HedgeWords,
    Uncertain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StructurePattern {
    AnswerFirst,
    BuildUp,
    Scattered,
}

/// Derived PM-specific classification attached to a moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PmClassification {
    pub communication_type: CommunicationType,
    pub confidence_pattern: ConfidencePattern,
    pub structure_pattern: StructurePattern,
}

/// A time interval flagged as behaviorally significant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticalMoment {
    /// Interval start in seconds from the beginning of the recording
    pub start_time: f64,
    /// Interval end in seconds, strictly greater than `start_time`
    pub end_time: f64,
    /// Acoustic energy in [0, 1]
    pub energy_level: f64,
    /// Detection confidence in [0, 1]
    pub confidence: f64,
    pub reason: MomentReason,
    pub keywords: Vec<String>,
    pub speaker_ids: Vec<String>,
    pub pm_specific: Option<PmClassification>,
}

impl CriticalMoment {
    pub fn new(
        start_time: f64,
        end_time: f64,
        energy_level: f64,
        confidence: f64,
        reason: MomentReason,
    ) -> Self {
        Self {
            start_time,
            end_time,
            energy_level,
            confidence,
            reason,
            keywords: Vec::new(),
            speaker_ids: Vec::new(),
            pm_specific: None,
        }
    }

    /// Length of this moment in seconds.
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Whether the two time ranges intersect.
    pub fn intersects(&self, other: &CriticalMoment) -> bool {
        self.start_time < other.end_time && other.start_time < self.end_time
    }

    /// Fold `other` into this moment, keeping the higher-priority reason
    /// and the stronger signal values.
    pub fn absorb(&mut self, other: CriticalMoment) {
        self.start_time = self.start_time.min(other.start_time);
        self.end_time = self.end_time.max(other.end_time);
        self.energy_level = self.energy_level.max(other.energy_level);
        let other_wins = (other.reason.priority(), other.confidence)
            > (self.reason.priority(), self.confidence);
        if other_wins {
            self.reason = other.reason;
            self.pm_specific = other.pm_specific;
        }
        self.confidence = self.confidence.max(other.confidence);
        for kw in other.keywords {
            if !self.keywords.contains(&kw) {
                self.keywords.push(kw);
            }
        }
        for sp in other.speaker_ids {
            if !self.speaker_ids.contains(&sp) {
                self.speaker_ids.push(sp);
            }
        }
    }
}

/// Caller-requested scheduling priority for a run or batch.
///
/// Recorded on the run and surfaced in queries; scheduling is currently
/// first-come within the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

/// Status of a single meeting analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AnalysisStatus::Processing)
    }
}

/// Status of a batch of analyses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

/// Projected vs. actual cost of analyzing at a given sampling ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub original_cost: f64,
    pub optimized_cost: f64,
    pub savings: f64,
    pub savings_percentage: f64,
    pub currency: String,
}

/// Progress event for a single running analysis.
///
/// Delivered at-least-once; subscribers must tolerate duplicates and
/// rely only on the monotonicity of `progress` per analysis id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub analysis_id: Uuid,
    pub meeting_id: String,
    /// 0-100, never decreasing for a given analysis
    pub progress: u8,
    pub stage: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moments_found: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_savings: Option<f64>,
}

impl ProgressEvent {
    pub fn new(
        analysis_id: Uuid,
        meeting_id: String,
        progress: u8,
        stage: &str,
        message: &str,
    ) -> Self {
        Self {
            analysis_id,
            meeting_id,
            progress,
            stage: stage.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
            moments_found: None,
            cost_savings: None,
        }
    }
}

/// Aggregate progress event for a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgressEvent {
    pub batch_id: Uuid,
    /// Mean of member-run progress, 0-100
    pub progress: f64,
    pub completed_meetings: usize,
    pub failed_meetings: usize,
    pub total_meetings: usize,
    pub estimated_completion: DateTime<Utc>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_priority_ordering() {
        assert!(
            MomentReason::DecisionPoint.priority()
                > MomentReason::SpeakerTransition.priority()
        );
        assert!(
            MomentReason::StakeholderPushback.priority()
                > MomentReason::PostSilenceHighEnergy.priority()
        );
        assert!(
            MomentReason::PostSilenceHighEnergy.priority()
                > MomentReason::HighEnergyAndKeywords.priority()
        );
    }

    #[test]
    fn test_reason_serializes_screaming_snake() {
        let json = serde_json::to_string(&MomentReason::PostSilenceHighEnergy).unwrap();
        assert_eq!(json, "\"POST_SILENCE_HIGH_ENERGY\"");
    }

    #[test]
    fn test_moment_intersects() {
        let a = CriticalMoment::new(10.0, 20.0, 0.8, 0.9, MomentReason::DecisionPoint);
        let b = CriticalMoment::new(15.0, 25.0, 0.7, 0.8, MomentReason::SpeakerTransition);
        let c = CriticalMoment::new(20.0, 30.0, 0.7, 0.8, MomentReason::SpeakerTransition);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c)); // touching endpoints do not intersect
    }

    #[test]
    fn test_absorb_keeps_higher_priority_reason() {
        let mut a = CriticalMoment::new(10.0, 20.0, 0.5, 0.6, MomentReason::SpeakerTransition);
        let mut b = CriticalMoment::new(15.0, 25.0, 0.9, 0.95, MomentReason::DecisionPoint);
        b.keywords.push("decision".to_string());
        a.absorb(b);
        assert_eq!(a.reason, MomentReason::DecisionPoint);
        assert_eq!(a.start_time, 10.0);
        assert_eq!(a.end_time, 25.0);
        assert_eq!(a.confidence, 0.95);
        assert_eq!(a.energy_level, 0.9);
        assert_eq!(a.keywords, vec!["decision".to_string()]);
    }

    #[test]
    fn test_absorb_does_not_downgrade_reason() {
        let mut a = CriticalMoment::new(10.0, 20.0, 0.9, 0.95, MomentReason::DecisionPoint);
        let b = CriticalMoment::new(12.0, 22.0, 0.5, 0.99, MomentReason::HighEnergyAndKeywords);
        a.absorb(b);
        assert_eq!(a.reason, MomentReason::DecisionPoint);
        assert_eq!(a.confidence, 0.99);
    }

    #[test]
    fn test_priority_serializes_lowercase_and_defaults_normal() {
        assert_eq!(Priority::default(), Priority::Normal);
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"high\"");
    }

    #[test]
    fn test_progress_event_serialization_omits_empty_extras() {
        let event = ProgressEvent::new(
            Uuid::new_v4(),
            "meeting-1".to_string(),
            25,
            "chunk-processing",
            "Processing audio chunks...",
        );
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("moments_found").is_none());
        assert_eq!(value["progress"], 25);
    }
}
