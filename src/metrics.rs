//! Sentence-level word-aligned surprisal and entropy
//!
//! Scores whole condition texts rather than the single position after a cue.
//! Every token after the first gets the entropy of the distribution that
//! predicted it and its own surprisal, both in bits. Tokens are then mapped
//! onto whitespace words through their character offsets, and each word
//! reports the mean and the sum over its tokens.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AuditError;
use crate::normalize::{normalize_stimuli, Normalization};
use crate::numerics::{entropy_bits, softmax};
use crate::stimuli::{Condition, StimulusSet};

/// Added to the target probability before taking its log
const PROB_FLOOR: f64 = 1e-10;

/// Per-position logits for a whole text
#[derive(Debug, Clone)]
pub struct SequenceLogits {
    pub ids: Vec<u32>,
    /// Character span `(start, end)` of each token in the text
    pub offsets: Vec<(usize, usize)>,
    /// Row `i` is the distribution over token `i + 1`
    pub logits: Vec<Vec<f32>>,
}

/// Anything that can score every position of a text
pub trait SequenceModel {
    fn model_id(&self) -> &str;
    fn score_sequence(&self, text: &str) -> Result<SequenceLogits>;
}

/// Character spans of the whitespace-delimited words of `text`
pub fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    let mut len = 0;
    for (i, c) in text.chars().enumerate() {
        len = i + 1;
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push((s, i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, len));
    }
    spans
}

/// Token indices per word; each token goes to the first word it overlaps
pub fn map_tokens_to_words(words: &[(usize, usize)], tokens: &[(usize, usize)]) -> Vec<Vec<usize>> {
    let mut mapping = vec![Vec::new(); words.len()];
    for (t, &(ts, te)) in tokens.iter().enumerate() {
        if let Some(w) = words.iter().position(|&(ws, we)| ts < we && te > ws) {
            mapping[w].push(t);
        }
    }
    mapping
}

/// Entropy of the distribution and surprisal of `actual`, in bits
pub fn entropy_and_surprisal(logits: &[f32], actual: u32) -> Result<(f64, f64), AuditError> {
    let probs = softmax(logits)?;
    let p = probs
        .get(actual as usize)
        .copied()
        .ok_or_else(|| AuditError::UnstableNumerics {
            detail: format!("token {actual} outside a {}-way distribution", probs.len()),
        })?;
    Ok((entropy_bits(&probs), -(p + PROB_FLOOR).log2()))
}

/// Aggregated metrics of one whitespace word
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordScore {
    /// Position among the text's whitespace words
    pub index: usize,
    pub word: String,
    pub n_tokens: usize,
    pub entropy_mean: f64,
    pub entropy_sum: f64,
    pub surprisal_mean: f64,
    pub surprisal_sum: f64,
}

/// Token- and word-level metrics of one text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceMetrics {
    pub n_tokens: usize,
    pub n_words: usize,
    pub token_entropies: Vec<f64>,
    pub token_surprisals: Vec<f64>,
    /// Words with at least one scored token
    pub words: Vec<WordScore>,
    pub mean_token_entropy: f64,
    pub mean_token_surprisal: f64,
    pub mean_word_entropy: f64,
    pub mean_word_entropy_sum: f64,
    pub mean_word_surprisal: f64,
    pub mean_word_surprisal_sum: f64,
}

fn mean_or_zero(xs: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = xs.fold((0.0, 0usize), |(s, n), x| (s + x, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

impl SentenceMetrics {
    /// Aggregate scored logits of `text`.
    ///
    /// The first token has no prediction, so a word made of it alone is left
    /// out of the word-level means.
    pub fn from_logits(text: &str, scored: &SequenceLogits) -> Result<Self, AuditError> {
        let n = scored.ids.len();
        if scored.offsets.len() != n || scored.logits.len() + 1 < n {
            return Err(AuditError::InvariantViolation(format!(
                "{} ids, {} offsets, {} logit rows",
                n,
                scored.offsets.len(),
                scored.logits.len()
            )));
        }

        let mut token_entropies = Vec::with_capacity(n.saturating_sub(1));
        let mut token_surprisals = Vec::with_capacity(n.saturating_sub(1));
        for i in 1..n {
            let (h, s) = entropy_and_surprisal(&scored.logits[i - 1], scored.ids[i])?;
            token_entropies.push(h);
            token_surprisals.push(s);
        }

        let spans = word_spans(text);
        let surface: Vec<&str> = text.split_whitespace().collect();
        let predicted = scored.offsets.get(1..).unwrap_or_default();
        let words: Vec<WordScore> = map_tokens_to_words(&spans, predicted)
            .into_iter()
            .enumerate()
            .filter(|(_, tokens)| !tokens.is_empty())
            .map(|(index, tokens)| {
                let ent: Vec<f64> = tokens.iter().map(|&t| token_entropies[t]).collect();
                let sur: Vec<f64> = tokens.iter().map(|&t| token_surprisals[t]).collect();
                let k = tokens.len() as f64;
                WordScore {
                    index,
                    word: surface.get(index).copied().unwrap_or_default().to_string(),
                    n_tokens: tokens.len(),
                    entropy_mean: ent.iter().sum::<f64>() / k,
                    entropy_sum: ent.iter().sum(),
                    surprisal_mean: sur.iter().sum::<f64>() / k,
                    surprisal_sum: sur.iter().sum(),
                }
            })
            .collect();

        Ok(Self {
            n_tokens: token_entropies.len(),
            n_words: spans.len(),
            mean_token_entropy: mean_or_zero(token_entropies.iter().copied()),
            mean_token_surprisal: mean_or_zero(token_surprisals.iter().copied()),
            mean_word_entropy: mean_or_zero(words.iter().map(|w| w.entropy_mean)),
            mean_word_entropy_sum: mean_or_zero(words.iter().map(|w| w.entropy_sum)),
            mean_word_surprisal: mean_or_zero(words.iter().map(|w| w.surprisal_mean)),
            mean_word_surprisal_sum: mean_or_zero(words.iter().map(|w| w.surprisal_sum)),
            token_entropies,
            token_surprisals,
            words,
        })
    }
}

/// Score one text with `model`
pub fn score_text<M: SequenceModel>(model: &M, text: &str) -> Result<SentenceMetrics> {
    let scored = model.score_sequence(text)?;
    Ok(SentenceMetrics::from_logits(text, &scored)?)
}

/// Metrics of one stimulus text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceRecord {
    pub set_id: u32,
    pub cue_family: String,
    pub condition: Condition,
    pub text: String,
    pub metrics: SentenceMetrics,
}

/// Sentence-metrics output document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsOutput {
    pub model: String,
    /// RFC 3339
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalization: Option<Normalization>,
    #[serde(default)]
    pub failures: usize,
    pub records: Vec<SentenceRecord>,
}

impl MetricsOutput {
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write sentence metrics to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sentence metrics from {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Malformed sentence metrics in {}", path.display()))
    }
}

/// Score every stimulus under every requested condition.
///
/// A failing text is logged and counted; the run continues.
pub fn score_stimuli<M: SequenceModel>(
    model: &M,
    stimuli: &StimulusSet,
    conditions: &[Condition],
    normalization: Option<Normalization>,
) -> MetricsOutput {
    let normalized;
    let stimuli = match normalization {
        Some(mode) => {
            normalized = normalize_stimuli(stimuli, mode);
            &normalized
        }
        None => stimuli,
    };

    let mut records = Vec::new();
    let mut failures = 0;
    for stimulus in stimuli.stimuli() {
        for &condition in conditions {
            let text = stimulus.text(condition);
            match score_text(model, text) {
                Ok(metrics) => records.push(SentenceRecord {
                    set_id: stimulus.set_id,
                    cue_family: stimulus.cue_family.clone(),
                    condition,
                    text: text.to_string(),
                    metrics,
                }),
                Err(e) => {
                    warn!("{} set {} {condition}: {e:#}", stimulus.cue_family, stimulus.set_id);
                    failures += 1;
                }
            }
        }
    }
    info!(
        "Scored {} texts with {} ({} failed)",
        records.len(),
        model.model_id(),
        failures
    );

    MetricsOutput {
        model: model.model_id().to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        normalization,
        failures,
        records,
    }
}
