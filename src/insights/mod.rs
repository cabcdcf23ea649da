//! PM insight derivation.
//!
//! Converts the selected critical moments of one run into the
//! five-section `PmInsights` record. Derivation is a pure function of
//! the moment list; the score-to-level cutoffs live in [`LevelLadder`]
//! and are policy, not contract.

use serde::{Deserialize, Serialize};

use crate::protocol::{ConfidencePattern, CriticalMoment, MomentReason, StructurePattern};
use crate::{EngineError, Result};

/// Four-tier proficiency ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkillLevel {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutivePresence {
    pub score: u8,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfluenceSkills {
    pub score: u8,
    pub persuasion_techniques: Vec<String>,
    pub stakeholder_alignment: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationStructure {
    pub clarity: u8,
    pub conciseness: u8,
    pub answer_first: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStorytelling {
    pub score: u8,
    pub visual_support: bool,
    pub contextualizing: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallAssessment {
    pub score: u8,
    pub level: SkillLevel,
    pub recommendations: Vec<String>,
}

/// The five fixed insight sections produced for every completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PmInsights {
    pub executive_presence: ExecutivePresence,
    pub influence_skills: InfluenceSkills,
    pub communication_structure: CommunicationStructure,
    pub data_storytelling: DataStorytelling,
    pub overall_assessment: OverallAssessment,
}

/// Monotonic score-to-level cutoffs.
#[derive(Debug, Clone, Copy)]
pub struct LevelLadder {
    beginner_below: u8,
    intermediate_below: u8,
    advanced_below: u8,
}

impl Default for LevelLadder {
    fn default() -> Self {
        Self {
            beginner_below: 50,
            intermediate_below: 70,
            advanced_below: 85,
        }
    }
}

impl LevelLadder {
    /// Cutoffs must be strictly increasing and at most 100.
    pub fn new(beginner_below: u8, intermediate_below: u8, advanced_below: u8) -> Result<Self> {
        if beginner_below >= intermediate_below
            || intermediate_below >= advanced_below
            || advanced_below > 100
        {
            return Err(EngineError::InvalidConfiguration(format!(
                "level ladder cutoffs must be strictly increasing and at most 100, \
                 got {beginner_below}/{intermediate_below}/{advanced_below}"
            )));
        }
        Ok(Self {
            beginner_below,
            intermediate_below,
            advanced_below,
        })
    }

    pub fn level(&self, score: u8) -> SkillLevel {
        if score < self.beginner_below {
            SkillLevel::Beginner
        } else if score < self.intermediate_below {
            SkillLevel::Intermediate
        } else if score < self.advanced_below {
            SkillLevel::Advanced
        } else {
            SkillLevel::Expert
        }
    }
}

fn to_score(fraction: f64) -> u8 {
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Derives `PmInsights` from a run's selected moments.
#[derive(Debug, Clone, Default)]
pub struct InsightDeriver {
    ladder: LevelLadder,
}

impl InsightDeriver {
    pub fn new(ladder: LevelLadder) -> Self {
        Self { ladder }
    }

    /// Pure derivation: the same moment list always yields the same
    /// insights.
    pub fn derive(&self, moments: &[CriticalMoment]) -> PmInsights {
        if moments.is_empty() {
            return self.baseline();
        }
        let n = moments.len() as f64;
        let mean_confidence = moments.iter().map(|m| m.confidence).sum::<f64>() / n;
        let mean_energy = moments.iter().map(|m| m.energy_level).sum::<f64>() / n;
        let mean_duration = moments.iter().map(|m| m.duration()).sum::<f64>() / n;

        let share = |pred: &dyn Fn(&CriticalMoment) -> bool| {
            moments.iter().filter(|m| pred(m)).count() as f64 / n
        };
        let reason_share = |reason: MomentReason| share(&|m| m.reason == reason);
        let assertive_share = share(&|m| {
            m.pm_specific
                .as_ref()
                .is_some_and(|p| p.confidence_pattern == ConfidencePattern::Assertive)
        });
        let answer_first_share = share(&|m| {
            m.pm_specific
                .as_ref()
                .is_some_and(|p| p.structure_pattern == StructurePattern::AnswerFirst)
        });
        let keyword_share = share(&|m| !m.keywords.is_empty());

        let decision_share = reason_share(MomentReason::DecisionPoint);
        let handoff_share = reason_share(MomentReason::ExecutiveHandoff);
        let pushback_share = reason_share(MomentReason::StakeholderPushback);
        let transition_share = reason_share(MomentReason::SpeakerTransition);

        let presence_score = to_score(
            0.5 * mean_confidence + 0.3 * assertive_share + 0.2 * (decision_share + handoff_share),
        );
        let mut strengths = Vec::new();
        let mut improvements = Vec::new();
        if mean_confidence >= 0.8 {
            strengths.push("Confident delivery".to_string());
        } else {
            improvements.push("More assertive language".to_string());
        }
        if decision_share > 0.0 {
            strengths.push("Drives decisions in the room".to_string());
        }
        if assertive_share < 0.5 {
            improvements.push("Lead with recommendations".to_string());
        }

        let influence_score = to_score(
            0.4 * (1.0 - pushback_share).max(0.0)
                + 0.3 * mean_confidence
                + 0.3 * (transition_share + handoff_share).min(1.0),
        );
        let mut persuasion_techniques = Vec::new();
        if keyword_share >= 0.5 {
            persuasion_techniques.push("Data-driven arguments".to_string());
        }
        if pushback_share > 0.0 {
            persuasion_techniques.push("Engages stakeholder objections".to_string());
        }
        let stakeholder_alignment = to_score(1.0 - pushback_share * 0.5);

        let clarity = to_score(mean_confidence);
        // Long rambling moments read as less concise
        let conciseness = to_score(1.0 - (mean_duration / 60.0).min(1.0) * 0.5);
        let answer_first = answer_first_share >= 0.5;

        let storytelling_score = to_score(0.6 * keyword_share + 0.4 * mean_energy);
        let contextualizing = to_score(mean_energy);

        let structure_mid = (clarity as f64 + conciseness as f64) / 2.0;
        let overall_score = ((presence_score as f64
            + influence_score as f64
            + structure_mid
            + storytelling_score as f64)
            / 4.0)
            .round()
            .clamp(0.0, 100.0) as u8;

        let mut recommendations = Vec::new();
        if presence_score < 70 {
            recommendations.push("Practice executive presence exercises".to_string());
        }
        if influence_score < 70 {
            recommendations.push("Work on assertiveness in challenging situations".to_string());
        }
        if storytelling_score < 70 {
            recommendations.push("Improve data visualization skills".to_string());
        }
        if !answer_first {
            recommendations.push("Lead with the answer before the context".to_string());
        }
        if recommendations.is_empty() {
            recommendations.push("Keep reinforcing current communication habits".to_string());
        }

        PmInsights {
            executive_presence: ExecutivePresence {
                score: presence_score,
                strengths,
                improvements,
            },
            influence_skills: InfluenceSkills {
                score: influence_score,
                persuasion_techniques,
                stakeholder_alignment,
            },
            communication_structure: CommunicationStructure {
                clarity,
                conciseness,
                answer_first,
            },
            data_storytelling: DataStorytelling {
                score: storytelling_score,
                visual_support: false,
                contextualizing,
            },
            overall_assessment: OverallAssessment {
                score: overall_score,
                level: self.ladder.level(overall_score),
                recommendations,
            },
        }
    }

    fn baseline(&self) -> PmInsights {
        PmInsights {
            executive_presence: ExecutivePresence {
                score: 40,
                strengths: Vec::new(),
                improvements: vec!["Not enough signal to assess presence".to_string()],
            },
            influence_skills: InfluenceSkills {
                score: 40,
                persuasion_techniques: Vec::new(),
                stakeholder_alignment: 50,
            },
            communication_structure: CommunicationStructure {
                clarity: 40,
                conciseness: 50,
                answer_first: false,
            },
            data_storytelling: DataStorytelling {
                score: 40,
                visual_support: false,
                contextualizing: 40,
            },
            overall_assessment: OverallAssessment {
                score: 40,
                level: self.ladder.level(40),
                recommendations: vec![
                    "Record longer meetings to unlock full insights".to_string()
                ],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CommunicationType, PmClassification};

    fn moment(reason: MomentReason, confidence: f64, energy: f64) -> CriticalMoment {
        let mut m = CriticalMoment::new(0.0, 10.0, energy, confidence, reason);
        m.keywords.push("roadmap".to_string());
        m.pm_specific = Some(PmClassification {
            communication_type: CommunicationType::DecisionDefense,
            confidence_pattern: if confidence >= 0.85 {
                ConfidencePattern::Assertive
            } else {
                ConfidencePattern::HedgeWords
            },
            structure_pattern: StructurePattern::AnswerFirst,
        });
        m
    }

    #[test]
    fn test_ladder_is_monotonic_and_exhaustive() {
        let ladder = LevelLadder::default();
        assert_eq!(ladder.level(0), SkillLevel::Beginner);
        assert_eq!(ladder.level(49), SkillLevel::Beginner);
        assert_eq!(ladder.level(50), SkillLevel::Intermediate);
        assert_eq!(ladder.level(69), SkillLevel::Intermediate);
        assert_eq!(ladder.level(70), SkillLevel::Advanced);
        assert_eq!(ladder.level(84), SkillLevel::Advanced);
        assert_eq!(ladder.level(85), SkillLevel::Expert);
        assert_eq!(ladder.level(100), SkillLevel::Expert);

        let mut previous = ladder.level(0);
        for score in 0..=100 {
            let level = ladder.level(score);
            assert!(level >= previous);
            previous = level;
        }
    }

    #[test]
    fn test_ladder_rejects_non_monotonic_cutoffs() {
        assert!(LevelLadder::new(70, 50, 85).is_err());
        assert!(LevelLadder::new(50, 50, 85).is_err());
        assert!(LevelLadder::new(50, 70, 101).is_err());
        assert!(LevelLadder::new(50, 70, 85).is_ok());
    }

    #[test]
    fn test_derive_is_pure() {
        let deriver = InsightDeriver::default();
        let moments = vec![
            moment(MomentReason::DecisionPoint, 0.9, 0.85),
            moment(MomentReason::StakeholderPushback, 0.8, 0.7),
        ];
        assert_eq!(deriver.derive(&moments), deriver.derive(&moments));
    }

    #[test]
    fn test_derive_scores_in_range() {
        let deriver = InsightDeriver::default();
        let moments = vec![
            moment(MomentReason::DecisionPoint, 0.95, 0.9),
            moment(MomentReason::ExecutiveHandoff, 0.9, 0.8),
            moment(MomentReason::HighEnergyAndKeywords, 0.85, 0.95),
        ];
        let insights = deriver.derive(&moments);
        assert!(insights.executive_presence.score <= 100);
        assert!(insights.influence_skills.score <= 100);
        assert!(insights.communication_structure.clarity <= 100);
        assert!(insights.data_storytelling.score <= 100);
        assert!(insights.overall_assessment.score <= 100);
        assert!(!insights.overall_assessment.recommendations.is_empty());
    }

    #[test]
    fn test_strong_moments_outrank_weak_ones() {
        let deriver = InsightDeriver::default();
        let strong = vec![
            moment(MomentReason::DecisionPoint, 0.95, 0.9),
            moment(MomentReason::DecisionPoint, 0.92, 0.85),
        ];
        let weak = vec![
            moment(MomentReason::SpeakerTransition, 0.55, 0.3),
            moment(MomentReason::SpeakerTransition, 0.5, 0.3),
        ];
        let strong_overall = deriver.derive(&strong).overall_assessment.score;
        let weak_overall = deriver.derive(&weak).overall_assessment.score;
        assert!(strong_overall > weak_overall);
    }

    #[test]
    fn test_empty_moments_yield_baseline() {
        let deriver = InsightDeriver::default();
        let insights = deriver.derive(&[]);
        assert_eq!(insights.overall_assessment.level, SkillLevel::Beginner);
    }
}
