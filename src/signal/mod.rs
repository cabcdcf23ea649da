//! Signal input seam between the engine and the transcription layer.
//!
//! The engine never decodes audio itself. A [`MeetingSource`] answers
//! whether a meeting exists, how long it is, and what low-level signal
//! windows its recording produced. Production wires a real transcription
//! backend here; [`SyntheticMeetingSource`] is the deterministic stand-in
//! used until persistence lands.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

use crate::{EngineError, Result};

/// One fixed-length window of low-level features for a recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalWindow {
    pub start_time: f64,
    pub end_time: f64,
    /// Acoustic energy in [0, 1]
    pub energy: f64,
    /// Transcription confidence in [0, 1]
    pub confidence: f64,
    /// Salient words recognized in the window
    pub keywords: Vec<String>,
    /// Dominant speaker for the window
    pub speaker_id: String,
}

impl SignalWindow {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Whether this window overlaps the `[start, end)` interval.
    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        self.start_time < end && start < self.end_time
    }
}

/// Supplies recordings to the analysis pipeline.
pub trait MeetingSource: Send + Sync {
    /// Total recording duration in seconds. `NotFound` if the meeting
    /// does not exist or has no audio.
    fn duration(&self, meeting_id: &str) -> Result<f64>;

    /// Signal windows covering the recording, ordered by start time.
    fn signals(&self, meeting_id: &str) -> Result<Vec<SignalWindow>>;
}

/// Window length produced by the synthetic source.
const WINDOW_SECONDS: f64 = 5.0;

const SPEAKERS: &[&str] = &["speaker-pm", "speaker-eng", "speaker-design", "speaker-vp"];

const DECISION_WORDS: &[&str] = &["decision", "approve", "roadmap", "priority", "timeline"];
const PUSHBACK_WORDS: &[&str] = &["concern", "however", "disagree", "alternative", "pushback"];
const EXECUTIVE_WORDS: &[&str] = &["strategy", "budget", "roi", "revenue", "metrics"];
const FILLER_WORDS: &[&str] = &["status", "update", "sync", "agenda", "notes"];

/// Deterministic in-memory meeting source.
///
/// Every registered meeting gets a reproducible signal stream seeded
/// from its id, so scoring over the same meeting always yields the same
/// moments.
pub struct SyntheticMeetingSource {
    meetings: RwLock<HashMap<String, f64>>,
}

impl SyntheticMeetingSource {
    pub fn new() -> Self {
        Self {
            meetings: RwLock::new(HashMap::new()),
        }
    }

    /// Register a meeting with the given recording length in seconds.
    pub fn insert_meeting(&self, meeting_id: impl Into<String>, duration_seconds: f64) {
        self.meetings
            .write()
            .expect("meeting table lock poisoned")
            .insert(meeting_id.into(), duration_seconds);
    }

    pub fn meeting_count(&self) -> usize {
        self.meetings
            .read()
            .expect("meeting table lock poisoned")
            .len()
    }

    fn seed_for(meeting_id: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        meeting_id.hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for SyntheticMeetingSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MeetingSource for SyntheticMeetingSource {
    fn duration(&self, meeting_id: &str) -> Result<f64> {
        self.meetings
            .read()
            .expect("meeting table lock poisoned")
            .get(meeting_id)
            .copied()
            .ok_or_else(|| EngineError::NotFound(format!("meeting {meeting_id:?}")))
    }

    fn signals(&self, meeting_id: &str) -> Result<Vec<SignalWindow>> {
        let duration = self.duration(meeting_id)?;
        let mut rng = StdRng::seed_from_u64(Self::seed_for(meeting_id));
        let mut windows = Vec::new();
        let mut speaker = SPEAKERS[rng.gen_range(0..SPEAKERS.len())].to_string();
        let mut start = 0.0;

        while start < duration {
            let end = (start + WINDOW_SECONDS).min(duration);

            // Occasional speaker change, occasional dead air
            if rng.gen_bool(0.15) {
                speaker = SPEAKERS[rng.gen_range(0..SPEAKERS.len())].to_string();
            }
            let silent = rng.gen_bool(0.08);
            let energy = if silent {
                rng.gen_range(0.0..0.15)
            } else {
                rng.gen_range(0.2..1.0)
            };
            let confidence = rng.gen_range(0.5..1.0);

            let mut keywords = Vec::new();
            if !silent {
                let lexicon = match rng.gen_range(0..10) {
                    0..=1 => DECISION_WORDS,
                    2 => PUSHBACK_WORDS,
                    3..=4 => EXECUTIVE_WORDS,
                    _ => FILLER_WORDS,
                };
                let picks = rng.gen_range(0..3);
                for _ in 0..picks {
                    let word = lexicon[rng.gen_range(0..lexicon.len())].to_string();
                    if !keywords.contains(&word) {
                        keywords.push(word);
                    }
                }
            }

            windows.push(SignalWindow {
                start_time: start,
                end_time: end,
                energy,
                confidence,
                keywords,
                speaker_id: speaker.clone(),
            });
            start = end;
        }

        Ok(windows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_meeting_is_not_found() {
        let source = SyntheticMeetingSource::new();
        let err = source.duration("non-existent-meeting").unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        assert!(source.signals("non-existent-meeting").is_err());
    }

    #[test]
    fn test_signals_cover_recording_in_order() {
        let source = SyntheticMeetingSource::new();
        source.insert_meeting("meeting-1", 123.0);
        let windows = source.signals("meeting-1").unwrap();

        assert!(!windows.is_empty());
        assert_eq!(windows[0].start_time, 0.0);
        assert_eq!(windows.last().unwrap().end_time, 123.0);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end_time, pair[1].start_time);
        }
    }

    #[test]
    fn test_signals_are_deterministic_per_meeting() {
        let source = SyntheticMeetingSource::new();
        source.insert_meeting("meeting-1", 600.0);
        source.insert_meeting("meeting-2", 600.0);

        let a1 = source.signals("meeting-1").unwrap();
        let a2 = source.signals("meeting-1").unwrap();
        let b = source.signals("meeting-2").unwrap();

        assert_eq!(a1.len(), a2.len());
        for (x, y) in a1.iter().zip(&a2) {
            assert_eq!(x.energy, y.energy);
            assert_eq!(x.confidence, y.confidence);
            assert_eq!(x.keywords, y.keywords);
            assert_eq!(x.speaker_id, y.speaker_id);
        }
        // Different meetings should not share a signal stream
        let identical = a1
            .iter()
            .zip(&b)
            .all(|(x, y)| x.energy == y.energy && x.speaker_id == y.speaker_id);
        assert!(!identical);
    }

    #[test]
    fn test_signal_values_in_range() {
        let source = SyntheticMeetingSource::new();
        source.insert_meeting("meeting-1", 1800.0);
        for window in source.signals("meeting-1").unwrap() {
            assert!((0.0..=1.0).contains(&window.energy));
            assert!((0.0..=1.0).contains(&window.confidence));
            assert!(window.end_time > window.start_time);
        }
    }
}
