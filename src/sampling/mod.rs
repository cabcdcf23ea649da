//! Chunking and critical-moment scoring.
//!
//! The [`Chunker`] walks a recording's timeline in overlapping candidate
//! intervals. The [`MomentScorer`] examines the signal windows inside
//! each chunk, flags the ones that qualify as critical moments, and
//! selects a subset whose total duration approximates
//! `duration * sampling_ratio`. Overlapping chunks see the same window
//! twice, so detection deduplicates by interval identity.

use std::collections::HashSet;
use tracing::debug;

use crate::config::SamplingConfig;
use crate::protocol::{
    CommunicationType, ConfidencePattern, CriticalMoment, MomentReason, PmClassification,
    StructurePattern,
};
use crate::signal::SignalWindow;

/// One candidate interval produced by the chunker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkSpan {
    pub index: usize,
    pub start: f64,
    pub end: f64,
}

impl ChunkSpan {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Lazy, finite iterator over candidate intervals.
///
/// Intervals are `chunk_size_seconds` long and advance by
/// `chunk_size_seconds - overlap_seconds`; the final interval is clipped
/// to the recording duration.
pub struct Chunker {
    duration: f64,
    chunk_size: f64,
    step: f64,
    next_start: f64,
    index: usize,
    exhausted: bool,
}

impl Chunker {
    pub fn new(duration: f64, config: &SamplingConfig) -> Self {
        Self {
            duration,
            chunk_size: config.chunk_size_seconds,
            step: config.step_seconds(),
            next_start: 0.0,
            index: 0,
            exhausted: duration <= 0.0,
        }
    }
}

impl Iterator for Chunker {
    type Item = ChunkSpan;

    fn next(&mut self) -> Option<ChunkSpan> {
        if self.exhausted {
            return None;
        }
        let start = self.next_start;
        let end = (start + self.chunk_size).min(self.duration);
        if end >= self.duration {
            self.exhausted = true;
        }
        let span = ChunkSpan {
            index: self.index,
            start,
            end,
        };
        self.index += 1;
        self.next_start = start + self.step;
        Some(span)
    }
}

/// Tunable feature weights and lexicons for moment detection.
///
/// The selection and ranking contract is fixed; the numeric thresholds
/// and vocabularies here are policy, not law.
#[derive(Debug, Clone)]
pub struct ScoringPolicy {
    /// Energy below this counts as silence
    pub silence_energy: f64,
    /// Energy above this right after silence is a spike
    pub spike_energy: f64,
    /// Confidence at or above this reads as assertive delivery
    pub assertive_confidence: f64,
    /// Confidence below this reads as uncertain delivery
    pub uncertain_confidence: f64,
    pub decision_keywords: Vec<String>,
    pub pushback_keywords: Vec<String>,
    pub executive_keywords: Vec<String>,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|w| w.to_string()).collect();
        Self {
            silence_energy: 0.2,
            spike_energy: 0.8,
            assertive_confidence: 0.85,
            uncertain_confidence: 0.65,
            decision_keywords: words(&[
                "decision", "approve", "roadmap", "priority", "timeline", "budget",
            ]),
            pushback_keywords: words(&[
                "concern", "however", "disagree", "alternative", "pushback", "resistance",
            ]),
            executive_keywords: words(&[
                "strategy", "roi", "revenue", "growth", "metrics", "kpi", "impact",
            ]),
        }
    }
}

impl ScoringPolicy {
    fn matches(lexicon: &[String], keywords: &[String]) -> bool {
        keywords.iter().any(|k| lexicon.contains(k))
    }
}

/// Flags and selects critical moments for one recording.
pub struct MomentScorer {
    config: SamplingConfig,
    policy: ScoringPolicy,
}

impl MomentScorer {
    pub fn new(config: SamplingConfig, policy: ScoringPolicy) -> Self {
        Self { config, policy }
    }

    /// Scan every chunk's windows and flag qualifying moments.
    ///
    /// A window qualifies when energy and confidence both meet the
    /// config thresholds, or when it matches a structural or content
    /// pattern regardless of energy. Each moment carries exactly one
    /// reason, the highest-priority one that applies.
    pub fn detect(
        &self,
        chunks: impl Iterator<Item = ChunkSpan>,
        windows: &[SignalWindow],
    ) -> Vec<CriticalMoment> {
        let mut seen: HashSet<(u64, u64)> = HashSet::new();
        let mut moments = Vec::new();

        for chunk in chunks {
            for (idx, window) in windows.iter().enumerate() {
                if !window.overlaps(chunk.start, chunk.end) {
                    continue;
                }
                let key = (window.start_time.to_bits(), window.end_time.to_bits());
                if seen.contains(&key) {
                    continue;
                }
                let prev = idx.checked_sub(1).map(|i| &windows[i]);
                if let Some(moment) = self.score_window(prev, window) {
                    seen.insert(key);
                    moments.push(moment);
                }
            }
        }

        moments.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        debug!(moments = moments.len(), "moment detection finished");
        moments
    }

    fn score_window(
        &self,
        prev: Option<&SignalWindow>,
        window: &SignalWindow,
    ) -> Option<CriticalMoment> {
        let speaker_changed = prev.is_some_and(|p| p.speaker_id != window.speaker_id);
        let post_silence = prev.is_some_and(|p| {
            p.energy < self.policy.silence_energy && window.energy > self.policy.spike_energy
        });
        let meets_thresholds = window.energy >= self.config.energy_threshold
            && window.confidence >= self.config.confidence_threshold
            && !window.keywords.is_empty();

        // Highest-priority applicable reason wins.
        let reason = if ScoringPolicy::matches(&self.policy.decision_keywords, &window.keywords) {
            MomentReason::DecisionPoint
        } else if ScoringPolicy::matches(&self.policy.pushback_keywords, &window.keywords) {
            MomentReason::StakeholderPushback
        } else if speaker_changed
            && ScoringPolicy::matches(&self.policy.executive_keywords, &window.keywords)
        {
            MomentReason::ExecutiveHandoff
        } else if speaker_changed {
            MomentReason::SpeakerTransition
        } else if post_silence {
            MomentReason::PostSilenceHighEnergy
        } else if meets_thresholds {
            MomentReason::HighEnergyAndKeywords
        } else {
            return None;
        };

        let mut moment = CriticalMoment::new(
            window.start_time,
            window.end_time,
            window.energy,
            window.confidence,
            reason,
        );
        moment.keywords = window.keywords.clone();
        if speaker_changed {
            if let Some(p) = prev {
                moment.speaker_ids.push(p.speaker_id.clone());
            }
        }
        moment.speaker_ids.push(window.speaker_id.clone());
        if reason != MomentReason::SpeakerTransition {
            moment.pm_specific = Some(self.classify(window, reason));
        }
        Some(moment)
    }

    fn classify(&self, window: &SignalWindow, reason: MomentReason) -> PmClassification {
        let communication_type = match reason {
            MomentReason::DecisionPoint => CommunicationType::DecisionDefense,
            MomentReason::StakeholderPushback => CommunicationType::StakeholderInfluence,
            MomentReason::ExecutiveHandoff => CommunicationType::ExecutiveSummary,
            MomentReason::PostSilenceHighEnergy => CommunicationType::DecisionDefense,
            _ => CommunicationType::StatusUpdate,
        };
        let confidence_pattern = if window.confidence >= self.policy.assertive_confidence {
            ConfidencePattern::Assertive
        } else if window.confidence >= self.policy.uncertain_confidence {
            ConfidencePattern::HedgeWords
        } else {
            ConfidencePattern::Uncertain
        };
        let structure_pattern = if window.energy > self.policy.spike_energy {
            StructurePattern::AnswerFirst
        } else if window.energy >= self.policy.silence_energy {
            StructurePattern::BuildUp
        } else {
            StructurePattern::Scattered
        };
        PmClassification {
            communication_type,
            confidence_pattern,
            structure_pattern,
        }
    }

    /// Choose the subset of detected moments that fits the sampling
    /// budget, merging overlapping selections.
    ///
    /// Ranking: reason priority, then confidence, then earlier start.
    /// Output is ordered by ascending start time and each range is
    /// disjoint from its neighbors.
    pub fn select(&self, detected: &[CriticalMoment], duration: f64) -> Vec<CriticalMoment> {
        let budget = duration * self.config.sampling_ratio;
        let mut ranked: Vec<&CriticalMoment> = detected.iter().collect();
        ranked.sort_by(|a, b| {
            b.reason
                .priority()
                .cmp(&a.reason.priority())
                .then(b.confidence.total_cmp(&a.confidence))
                .then(a.start_time.total_cmp(&b.start_time))
        });

        let mut used = 0.0;
        let mut picked: Vec<CriticalMoment> = Vec::new();
        for moment in ranked {
            if used + moment.duration() <= budget {
                used += moment.duration();
                picked.push(moment.clone());
            }
        }

        picked.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        let mut merged: Vec<CriticalMoment> = Vec::new();
        for moment in picked {
            match merged.last_mut() {
                Some(last) if last.intersects(&moment) => last.absorb(moment),
                _ => merged.push(moment),
            }
        }
        merged
    }

    /// Heuristic quality score in [0, 1] for a selection, from opening
    /// and closing coverage, detected-moment coverage, and the share of
    /// PM-classified selections.
    pub fn quality_score(
        &self,
        selected: &[CriticalMoment],
        detected: &[CriticalMoment],
        duration: f64,
    ) -> f64 {
        if selected.is_empty() {
            return 0.0;
        }
        let mut score = 0.0;
        let covers_opening = selected
            .iter()
            .any(|m| m.start_time <= self.config.chunk_size_seconds);
        let closing_threshold = (duration - 120.0).max(0.0);
        let covers_closing = selected.iter().any(|m| m.end_time >= closing_threshold);
        if covers_opening {
            score += 0.2;
        }
        if covers_closing {
            score += 0.2;
        }

        let coverage = if detected.is_empty() {
            1.0
        } else {
            let covered = detected
                .iter()
                .filter(|d| {
                    let mid = (d.start_time + d.end_time) / 2.0;
                    selected
                        .iter()
                        .any(|s| s.start_time <= mid && mid <= s.end_time)
                })
                .count();
            covered as f64 / detected.len() as f64
        };
        score += coverage * 0.4;

        let pm_share = selected.iter().filter(|m| m.pm_specific.is_some()).count() as f64
            / selected.len() as f64;
        score += pm_share * 0.2;

        score.clamp(0.0, 1.0)
    }
}
