//! Stimulus loading for cue audits
//!
//! A stimulus file is a JSON array of stimulus sets. Each set carries one
//! text per experimental condition plus the cue it was built around.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::permute::split_words;

/// Experimental condition of a stimulus text
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
    Sentence,
    Jabberwocky,
    FullScrambled,
    ContentScrambled,
    FunctionScrambled,
    CueDeleted,
}

impl Condition {
    pub const ALL: [Condition; 6] = [
        Condition::Sentence,
        Condition::Jabberwocky,
        Condition::FullScrambled,
        Condition::ContentScrambled,
        Condition::FunctionScrambled,
        Condition::CueDeleted,
    ];

    /// Upper-case label used in audit records
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sentence => "SENTENCE",
            Self::Jabberwocky => "JABBERWOCKY",
            Self::FullScrambled => "FULL_SCRAMBLED",
            Self::ContentScrambled => "CONTENT_SCRAMBLED",
            Self::FunctionScrambled => "FUNCTION_SCRAMBLED",
            Self::CueDeleted => "CUE_DELETED",
        }
    }

    /// Lower-case field name in the stimulus file
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Sentence => "sentence",
            Self::Jabberwocky => "jabberwocky",
            Self::FullScrambled => "full_scrambled",
            Self::ContentScrambled => "content_scrambled",
            Self::FunctionScrambled => "function_scrambled",
            Self::CueDeleted => "cue_deleted",
        }
    }

    /// Short column header for summary tables
    pub fn short_label(self) -> &'static str {
        match self {
            Self::Sentence => "SENT",
            Self::Jabberwocky => "JAB",
            Self::FullScrambled => "FULL_S",
            Self::ContentScrambled => "CONT_S",
            Self::FunctionScrambled => "FUNC_S",
            Self::CueDeleted => "CUE_D",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_uppercase();
        Condition::ALL
            .into_iter()
            .find(|c| c.as_str() == upper)
            .ok_or_else(|| anyhow::anyhow!("unknown condition `{s}`"))
    }
}

/// Seeds used to derive the three scrambles of a stimulus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrambleSeeds {
    pub full_scramble: u64,
    pub content_scramble: u64,
    pub function_scramble: u64,
}

/// One stimulus set: a template sentence in all six conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stimulus {
    pub set_id: u32,
    pub cue_family: String,
    pub cue_word: String,
    /// 0-indexed word position of the cue in the sentence and jabberwocky texts
    pub cue_position: usize,
    pub target_class: String,
    pub sentence: String,
    pub jabberwocky: String,
    pub full_scrambled: String,
    pub content_scrambled: String,
    pub function_scrambled: String,
    pub cue_deleted: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_words: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nonce_words: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seeds: Option<ScrambleSeeds>,
    /// Scrambled conditions whose text came out identical to the jabberwocky
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identity_flags: Vec<Condition>,
}

impl Stimulus {
    /// Text of this stimulus under `condition`
    pub fn text(&self, condition: Condition) -> &str {
        match condition {
            Condition::Sentence => &self.sentence,
            Condition::Jabberwocky => &self.jabberwocky,
            Condition::FullScrambled => &self.full_scrambled,
            Condition::ContentScrambled => &self.content_scrambled,
            Condition::FunctionScrambled => &self.function_scrambled,
            Condition::CueDeleted => &self.cue_deleted,
        }
    }

    pub fn text_mut(&mut self, condition: Condition) -> &mut String {
        match condition {
            Condition::Sentence => &mut self.sentence,
            Condition::Jabberwocky => &mut self.jabberwocky,
            Condition::FullScrambled => &mut self.full_scrambled,
            Condition::ContentScrambled => &mut self.content_scrambled,
            Condition::FunctionScrambled => &mut self.function_scrambled,
            Condition::CueDeleted => &mut self.cue_deleted,
        }
    }

    pub fn words(&self, condition: Condition) -> Vec<String> {
        split_words(self.text(condition))
    }
}

/// Accept both a bare array and an object wrapping it
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StimulusFile {
    Bare(Vec<Stimulus>),
    Wrapped {
        stimuli: Vec<Stimulus>,
        #[allow(dead_code)]
        metadata: Option<serde_json::Value>,
    },
}

/// Collection of stimulus sets
#[derive(Debug, Clone, Default)]
pub struct StimulusSet {
    stimuli: Vec<Stimulus>,
}

impl StimulusSet {
    pub fn new(stimuli: Vec<Stimulus>) -> Self {
        Self { stimuli }
    }

    /// Load stimuli from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read stimuli from {}", path.display()))?;
        let file: StimulusFile = serde_json::from_str(&content)
            .with_context(|| format!("Malformed stimulus file {}", path.display()))?;
        let stimuli = match file {
            StimulusFile::Bare(stimuli) | StimulusFile::Wrapped { stimuli, .. } => stimuli,
        };
        Ok(Self { stimuli })
    }

    /// Write stimuli as a pretty-printed JSON array
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&self.stimuli)?)
            .with_context(|| format!("Failed to write stimuli to {}", path.display()))?;
        Ok(())
    }

    /// Number of stimuli per cue family
    pub fn family_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for s in &self.stimuli {
            *counts.entry(s.cue_family.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Stimuli belonging to one cue family
    pub fn by_family(&self, family: &str) -> Vec<&Stimulus> {
        self.stimuli
            .iter()
            .filter(|s| s.cue_family == family)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stimuli.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stimuli.is_empty()
    }

    pub fn stimuli(&self) -> &[Stimulus] {
        &self.stimuli
    }
}
