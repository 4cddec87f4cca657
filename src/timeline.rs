use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::config::TimelineConfig;
use crate::track::Track;

static CUE_TIMING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,2}):(\d{2}):(\d{2}),(\d{3})\s+-->\s+\d{1,2}:\d{2}:\d{2},\d{3}")
        .expect("cue timing pattern is valid")
});

/// Timeline sanity flags for a set of tracks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineAssessment {
    pub flat_cue_starts: bool,
    pub non_monotonic_cues: bool,
}

impl TimelineAssessment {
    pub fn is_plausible(&self) -> bool {
        !self.flat_cue_starts && !self.non_monotonic_cues
    }
}

/// Cue start times in milliseconds, in file order
pub fn cue_starts_ms(text: &str) -> Vec<u64> {
    CUE_TIMING
        .captures_iter(text)
        .filter_map(|caps| {
            let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
            Some(field(1)? * 3_600_000 + field(2)? * 60_000 + field(3)? * 1_000 + field(4)?)
        })
        .collect()
}

/// Format time in seconds to SRT time format (HH:MM:SS,mmm)
pub fn format_srt_time(seconds: f64) -> String {
    format_srt_ms((seconds.max(0.0) * 1000.0).round() as u64)
}

/// Format a millisecond offset as HH:MM:SS,mmm
pub fn format_srt_ms(total_milliseconds: u64) -> String {
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Stateless heuristics that catch broken subtitle timelines
#[derive(Debug, Clone)]
pub struct TimelineValidator {
    min_cues: usize,
    flat_ratio: f64,
    epsilon_ms: f64,
}

impl TimelineValidator {
    pub fn new(min_cues: usize, flat_ratio: f64, epsilon_secs: f64) -> Self {
        Self {
            min_cues,
            flat_ratio,
            epsilon_ms: epsilon_secs * 1000.0,
        }
    }

    pub fn from_config(config: &TimelineConfig) -> Self {
        Self::new(config.min_cues, config.flat_ratio, config.epsilon_secs)
    }

    /// Assess every text track; binary tracks carry no parseable timeline
    pub fn assess(&self, tracks: &[Track]) -> TimelineAssessment {
        let mut assessment = TimelineAssessment::default();
        for track in tracks {
            let Some(text) = track.content() else { continue };
            let single = self.assess_text(text);
            if !single.is_plausible() {
                debug!(
                    "Track {} timeline: flat={} non_monotonic={}",
                    track.label, single.flat_cue_starts, single.non_monotonic_cues
                );
            }
            assessment.flat_cue_starts |= single.flat_cue_starts;
            assessment.non_monotonic_cues |= single.non_monotonic_cues;
        }
        assessment
    }

    pub fn assess_text(&self, text: &str) -> TimelineAssessment {
        let starts = cue_starts_ms(text);

        let non_monotonic_cues = starts
            .windows(2)
            .any(|pair| (pair[1] as f64) + self.epsilon_ms < pair[0] as f64);

        let flat_cue_starts = starts.len() >= self.min_cues && {
            let distinct = starts.iter().collect::<HashSet<_>>().len();
            (distinct as f64 / starts.len() as f64) <= self.flat_ratio
        };

        TimelineAssessment {
            flat_cue_starts,
            non_monotonic_cues,
        }
    }
}

impl Default for TimelineValidator {
    fn default() -> Self {
        Self::from_config(&TimelineConfig::default())
    }
}
