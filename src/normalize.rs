//! Text normalization applied to stimuli before scoring
//!
//! Every condition text is lowercased, whitespace is collapsed and
//! punctuation is either stripped or reduced to one final period, so that
//! conditions differ only in their words and tokenization stays comparable.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::permute::find_word;
use crate::stimuli::{Condition, Stimulus, StimulusSet};

/// How punctuation is treated after lowercasing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// Remove all punctuation and end the text with a single period
    Period,
    /// Remove all punctuation
    Strip,
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Period => f.write_str("period"),
            Self::Strip => f.write_str("strip"),
        }
    }
}

impl FromStr for Normalization {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "period" => Ok(Self::Period),
            "strip" => Ok(Self::Strip),
            other => anyhow::bail!("unknown normalization `{other}` (expected period or strip)"),
        }
    }
}

/// Word characters and whitespace survive; everything else is punctuation
fn is_kept(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c.is_whitespace()
}

/// Normalize one text
pub fn normalize_text(text: &str, mode: Normalization) -> String {
    let lowered = text.to_lowercase();
    let stripped: String = lowered.chars().filter(|&c| is_kept(c)).collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    match mode {
        Normalization::Strip => collapsed,
        Normalization::Period => format!("{collapsed}."),
    }
}

/// Normalize every condition text of one stimulus.
///
/// The cue position is recomputed when punctuation-only words disappear.
pub fn normalize_stimulus(stimulus: &Stimulus, mode: Normalization) -> Stimulus {
    let mut out = stimulus.clone();
    for condition in Condition::ALL {
        *out.text_mut(condition) = normalize_text(stimulus.text(condition), mode);
    }
    out.cue_word = normalize_text(&stimulus.cue_word, Normalization::Strip);
    if let Some(pos) = find_word(&out.words(Condition::Sentence), &out.cue_word) {
        out.cue_position = pos;
    }
    out
}

/// Normalized copy of a whole stimulus set
pub fn normalize_stimuli(stimuli: &StimulusSet, mode: Normalization) -> StimulusSet {
    StimulusSet::new(
        stimuli
            .stimuli()
            .iter()
            .map(|s| normalize_stimulus(s, mode))
            .collect(),
    )
}
