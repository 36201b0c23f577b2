//! Discrete NPC moods and the weights used to describe them to the classifier.

pub mod classifier;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use classifier::{classify, select_mood, shift_mood};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    #[default]
    Neutral,
    Energized,
    Grumpy,
    Sad,
    Bashful,
    Shocked,
    Spooked,
}

impl Mood {
    pub const ALL: [Mood; 7] = [
        Mood::Neutral,
        Mood::Energized,
        Mood::Grumpy,
        Mood::Sad,
        Mood::Bashful,
        Mood::Shocked,
        Mood::Spooked,
    ];

    /// Identifier used in prompts, phrase files and config.
    pub fn as_str(self) -> &'static str {
        match self {
            Mood::Neutral => "neutral",
            Mood::Energized => "energized",
            Mood::Grumpy => "grumpy",
            Mood::Sad => "sad",
            Mood::Bashful => "bashful",
            Mood::Shocked => "shocked",
            Mood::Spooked => "spooked",
        }
    }

    /// Capitalized form used in portrait asset names and on screen.
    pub fn display_name(self) -> &'static str {
        match self {
            Mood::Neutral => "Neutral",
            Mood::Energized => "Energized",
            Mood::Grumpy => "Grumpy",
            Mood::Sad => "Sad",
            Mood::Bashful => "Bashful",
            Mood::Shocked => "Shocked",
            Mood::Spooked => "Spooked",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown mood {0:?}")]
pub struct UnknownMood(pub String);

impl FromStr for Mood {
    type Err = UnknownMood;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Mood::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| UnknownMood(needle.to_string()))
    }
}

/// Outcome of a mood selection: a concrete mood or "keep what you have".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoodChoice {
    Change(Mood),
    NoChange,
}

impl MoodChoice {
    pub const NO_CHANGE: &'static str = "no_change";

    /// Interpret a classifier reply. Anything outside the closed set becomes `NoChange`.
    pub fn parse_label(reply: &str) -> Self {
        let label = reply
            .trim()
            .trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .to_ascii_lowercase();
        if label == Self::NO_CHANGE {
            return MoodChoice::NoChange;
        }
        match label.parse::<Mood>() {
            Ok(mood) => MoodChoice::Change(mood),
            Err(_) => {
                tracing::warn!(%label, "Classifier picked an unknown mood; keeping current");
                MoodChoice::NoChange
            }
        }
    }

    /// The mood to switch to, if it differs from `current`.
    pub fn applied_to(self, current: Mood) -> Option<Mood> {
        match self {
            MoodChoice::Change(mood) if mood != current => Some(mood),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// Advisory per-mood weights, described to the classifier in its prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodWeights {
    weights: Vec<(Mood, f32)>,
}

impl Default for MoodWeights {
    fn default() -> Self {
        Self {
            weights: vec![
                (Mood::Neutral, 3.0),
                (Mood::Energized, 1.0),
                (Mood::Grumpy, 0.9),
                (Mood::Sad, 0.8),
                (Mood::Bashful, 0.8),
                (Mood::Shocked, 0.5),
                (Mood::Spooked, 0.5),
            ],
        }
    }
}

impl MoodWeights {
    pub fn weight(&self, mood: Mood) -> Option<f32> {
        self.weights
            .iter()
            .find(|(m, _)| *m == mood)
            .map(|(_, w)| *w)
    }

    /// Override one weight. Non-positive weights are rejected.
    pub fn set(&mut self, mood: Mood, weight: f32) -> bool {
        if weight <= 0.0 || !weight.is_finite() {
            return false;
        }
        match self.weights.iter_mut().find(|(m, _)| *m == mood) {
            Some(entry) => entry.1 = weight,
            None => self.weights.push((mood, weight)),
        }
        true
    }

    pub fn describe(&self) -> String {
        let mut lines: Vec<String> = self
            .weights
            .iter()
            .map(|(mood, weight)| {
                format!(
                    "  - {mood} (weight: {weight:.1}) - {}",
                    likelihood_label(*weight)
                )
            })
            .collect();
        lines.push(format!("  - {} - keep current mood", MoodChoice::NO_CHANGE));
        lines.join("\n")
    }
}

fn likelihood_label(weight: f32) -> &'static str {
    if weight >= 3.0 {
        "highly favored"
    } else if weight >= 1.5 {
        "more likely"
    } else if weight >= 1.0 {
        "normal"
    } else if weight >= 0.5 {
        "less likely"
    } else {
        "rarely"
    }
}
