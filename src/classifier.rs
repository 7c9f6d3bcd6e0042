//! Word-aligned class-mass accounting
//!
//! Sub-word vocabularies split words into several tokens, so only tokens
//! that begin a new word can be credited to a word class. The classifier
//! builds a [`WordStartTable`] once per vocabulary, then for each next-token
//! distribution walks the top-K tokens and distributes their probability:
//!
//! - per class: every word-start token adds its probability to each expected
//!   class the strategy assigns it to
//! - exclusive buckets: every top-K token lands in exactly one of
//!   `function`, `target`, `other`, `punctuation` or `continuation`
//! - residual: whatever mass lies outside the top-K
//!
//! Class masses are never renormalized.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

use crate::cue_families::{CueFamily, CueRegistry};
use crate::error::AuditError;
use crate::numerics::{entropy_bits, softmax, top_k_indices};
use crate::strategy::ClassificationStrategy;

const SPECIAL_TOKENS: &[&str] = &["<|endoftext|>", "<unk>", "<pad>", "<s>", "</s>"];

/// SentencePiece word-boundary marker
const SP_SPACE: char = '\u{2581}';

/// Turns token ids back into surface strings
pub trait TokenDecoder {
    fn vocab_size(&self) -> usize;

    /// Surface form of a single token, with a leading space if it opens a word
    fn surface(&self, id: u32) -> Option<String>;
}

impl TokenDecoder for Tokenizer {
    fn vocab_size(&self) -> usize {
        self.get_vocab_size(true)
    }

    fn surface(&self, id: u32) -> Option<String> {
        let piece = self.id_to_token(id)?;
        if piece.starts_with(SP_SPACE) {
            return Some(piece.replace(SP_SPACE, " "));
        }
        self.decode(&[id], false).ok()
    }
}

/// Plain id → surface table
#[derive(Debug, Clone, Default)]
pub struct VocabDecoder {
    pieces: Vec<String>,
}

impl VocabDecoder {
    pub fn new<I, S>(pieces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pieces: pieces.into_iter().map(Into::into).collect(),
        }
    }
}

impl TokenDecoder for VocabDecoder {
    fn vocab_size(&self) -> usize {
        self.pieces.len()
    }

    fn surface(&self, id: u32) -> Option<String> {
        self.pieces.get(id as usize).cloned()
    }
}

/// What a vocabulary entry contributes to word-level accounting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Opens a new word; carries the recovered lowercase word
    WordStart(String),
    Punctuation,
    /// Continues a word, or is special/numeric/otherwise unclassifiable
    Continuation,
}

impl TokenKind {
    /// Classify one decoded surface string
    pub fn from_surface(surface: &str) -> Self {
        if surface.is_empty() || SPECIAL_TOKENS.contains(&surface) {
            return Self::Continuation;
        }

        let mut chars = surface.chars();
        let first = chars.next();
        let second = chars.next();
        if first.is_some_and(char::is_whitespace) && second.is_some_and(char::is_alphabetic) {
            let word = surface
                .trim()
                .trim_end_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            return Self::WordStart(word);
        }

        let trimmed = surface.trim();
        if !trimmed.is_empty() && !trimmed.chars().any(char::is_alphanumeric) {
            return Self::Punctuation;
        }
        Self::Continuation
    }
}

/// Per-vocabulary lookup from token id to [`TokenKind`]
#[derive(Debug, Clone)]
pub struct WordStartTable {
    kinds: Vec<TokenKind>,
}

impl WordStartTable {
    /// Decode the whole vocabulary once
    pub fn build(decoder: &dyn TokenDecoder) -> Self {
        let kinds = (0..decoder.vocab_size() as u32)
            .map(|id| match decoder.surface(id) {
                Some(s) => TokenKind::from_surface(&s),
                None => TokenKind::Continuation,
            })
            .collect();
        Self { kinds }
    }

    /// Ids past the end of the table (padded logit rows) have no kind
    pub fn kind(&self, id: usize) -> Option<&TokenKind> {
        self.kinds.get(id)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn word_start_count(&self) -> usize {
        self.kinds
            .iter()
            .filter(|k| matches!(k, TokenKind::WordStart(_)))
            .count()
    }
}

/// Thresholds past which a measurement is flagged unusable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MassThresholds {
    /// Maximum probability mass allowed outside the top-K
    pub max_residual: f64,
    /// Maximum probability mass allowed on punctuation tokens
    pub max_punctuation: f64,
}

impl Default for MassThresholds {
    fn default() -> Self {
        Self {
            max_residual: 0.30,
            max_punctuation: 0.30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MassFlag {
    HighResidual,
    HighPunctuation,
}

/// Mutually exclusive mass buckets over the top-K tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MassBuckets {
    pub function: f64,
    pub target: f64,
    pub other: f64,
    pub punctuation: f64,
    pub continuation: f64,
}

impl MassBuckets {
    pub fn total(&self) -> f64 {
        self.function + self.target + self.other + self.punctuation + self.continuation
    }
}

/// Word-class mass of one next-token distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMass {
    /// Mass per expected class of the family (membership-based)
    pub class_mass: BTreeMap<String, f64>,
    /// Mass of word-start tokens in any expected class, each counted once
    pub target_mass: f64,
    pub buckets: MassBuckets,
    /// Mass outside the top-K
    pub residual: f64,
    /// Entropy in bits of the renormalized word-start mass
    pub word_start_entropy: f64,
    pub top_k: usize,
    pub word_start_tokens: usize,
    #[serde(default)]
    pub flags: Vec<MassFlag>,
}

impl ClassMass {
    /// Unflagged measurements are eligible for statistics
    pub fn usable(&self) -> bool {
        self.flags.is_empty()
    }

    /// Error describing why this measurement is flagged, if it is
    pub fn threshold_error(&self) -> Option<AuditError> {
        (!self.usable()).then(|| AuditError::HighResidualMass {
            residual: self.residual,
            punctuation: self.buckets.punctuation,
        })
    }
}

/// Classifier over one vocabulary and one classification strategy
pub struct WordAlignedClassifier {
    table: WordStartTable,
    strategy: Box<dyn ClassificationStrategy>,
    thresholds: MassThresholds,
}

impl WordAlignedClassifier {
    pub fn new(
        decoder: &dyn TokenDecoder,
        strategy: Box<dyn ClassificationStrategy>,
        thresholds: MassThresholds,
    ) -> Self {
        Self::with_table(WordStartTable::build(decoder), strategy, thresholds)
    }

    pub fn with_table(
        table: WordStartTable,
        strategy: Box<dyn ClassificationStrategy>,
        thresholds: MassThresholds,
    ) -> Self {
        Self {
            table,
            strategy,
            thresholds,
        }
    }

    pub fn table(&self) -> &WordStartTable {
        &self.table
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Distribute the top-K probability mass of `logits` over `family`'s classes
    pub fn class_mass(
        &self,
        logits: &[f32],
        family: &CueFamily,
        registry: &CueRegistry,
        top_k: usize,
    ) -> Result<ClassMass, AuditError> {
        let probs = softmax(logits)?;
        let top = top_k_indices(&probs, top_k);

        let mut class_mass: BTreeMap<String, f64> = family
            .class_names()
            .into_iter()
            .map(|c| (c.to_string(), 0.0))
            .collect();
        let mut target_mass = 0.0;
        let mut buckets = MassBuckets::default();
        let mut word_start_masses = Vec::new();

        for &id in &top {
            let p = probs[id];
            match self.table.kind(id) {
                Some(TokenKind::WordStart(word)) => {
                    let classes = self.strategy.classify(word, family);
                    for class in &classes {
                        if let Some(mass) = class_mass.get_mut(*class) {
                            *mass += p;
                        }
                    }
                    if !classes.is_empty() {
                        target_mass += p;
                    }

                    if registry.is_closed_class(word) {
                        buckets.function += p;
                    } else if !classes.is_empty() {
                        buckets.target += p;
                    } else {
                        buckets.other += p;
                    }
                    word_start_masses.push(p);
                }
                Some(TokenKind::Punctuation) => buckets.punctuation += p,
                Some(TokenKind::Continuation) | None => buckets.continuation += p,
            }
        }

        let residual = (1.0 - buckets.total()).max(0.0);
        let mut flags = Vec::new();
        if residual > self.thresholds.max_residual {
            flags.push(MassFlag::HighResidual);
        }
        if buckets.punctuation > self.thresholds.max_punctuation {
            flags.push(MassFlag::HighPunctuation);
        }

        Ok(ClassMass {
            class_mass,
            target_mass,
            buckets,
            residual,
            word_start_entropy: entropy_bits(&word_start_masses),
            top_k: top.len(),
            word_start_tokens: word_start_masses.len(),
            flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cue_families::{DETERMINERS, INFINITIVAL_TO};
    use crate::strategy::LexiconStrategy;

    fn decoder() -> VocabDecoder {
        VocabDecoder::new([
            " study",     // 0 VERB
            " the",       // 1 function
            "ing",        // 2 continuation
            ".",          // 3 punctuation
            " blick",     // 4 other
            " build,",    // 5 VERB after trailing punctuation strip
            "<|endoftext|>", // 6 special
            " scientist", // 7 NOUN
        ])
    }

    fn classifier() -> WordAlignedClassifier {
        WordAlignedClassifier::new(
            &decoder(),
            Box::new(LexiconStrategy),
            MassThresholds::default(),
        )
    }

    #[test]
    fn test_token_kinds() {
        assert_eq!(
            TokenKind::from_surface(" Study"),
            TokenKind::WordStart("study".into())
        );
        assert_eq!(TokenKind::from_surface("ing"), TokenKind::Continuation);
        assert_eq!(TokenKind::from_surface(" ."), TokenKind::Punctuation);
        assert_eq!(TokenKind::from_surface(" 42"), TokenKind::Continuation);
        assert_eq!(TokenKind::from_surface("</s>"), TokenKind::Continuation);
        assert_eq!(
            TokenKind::from_surface(" word!"),
            TokenKind::WordStart("word".into())
        );
    }

    #[test]
    fn test_word_start_table() {
        let table = WordStartTable::build(&decoder());
        assert_eq!(table.len(), 8);
        assert_eq!(table.word_start_count(), 5);
        assert_eq!(
            table.kind(5),
            Some(&TokenKind::WordStart("build".into()))
        );
        assert_eq!(table.kind(100), None);
    }

    #[test]
    fn test_uniform_distribution_buckets() {
        let registry = CueRegistry::standard().unwrap();
        let family = registry.get(INFINITIVAL_TO).unwrap();
        let logits = vec![0.0f32; 8];
        let mass = classifier()
            .class_mass(&logits, family, &registry, 8)
            .unwrap();

        let eighth = 1.0 / 8.0;
        assert!((mass.class_mass["VERB"] - 2.0 * eighth).abs() < 1e-12);
        assert!((mass.target_mass - 2.0 * eighth).abs() < 1e-12);
        assert!((mass.buckets.function - eighth).abs() < 1e-12);
        assert!((mass.buckets.target - 2.0 * eighth).abs() < 1e-12);
        assert!((mass.buckets.other - 2.0 * eighth).abs() < 1e-12);
        assert!((mass.buckets.punctuation - eighth).abs() < 1e-12);
        assert!((mass.buckets.continuation - 2.0 * eighth).abs() < 1e-12);
        assert!(mass.residual < 1e-12);
        assert!(mass.usable());
        // five equal word-start tokens
        assert!((mass.word_start_entropy - 5f64.log2()).abs() < 1e-9);
    }

    #[test]
    fn test_residual_flag_with_small_k() {
        let registry = CueRegistry::standard().unwrap();
        let family = registry.get(DETERMINERS).unwrap();
        let logits = vec![0.0f32; 8];
        let mass = classifier()
            .class_mass(&logits, family, &registry, 2)
            .unwrap();
        assert_eq!(mass.top_k, 2);
        assert!((mass.residual - 0.75).abs() < 1e-12);
        assert_eq!(mass.flags, vec![MassFlag::HighResidual]);
        assert!(matches!(
            mass.threshold_error(),
            Some(AuditError::HighResidualMass { .. })
        ));
    }

    #[test]
    fn test_peaked_distribution_on_verb() {
        let registry = CueRegistry::standard().unwrap();
        let family = registry.get(INFINITIVAL_TO).unwrap();
        let mut logits = vec![-20.0f32; 8];
        logits[0] = 20.0;
        let mass = classifier()
            .class_mass(&logits, family, &registry, 1000)
            .unwrap();
        assert!(mass.target_mass > 0.999);
        assert_eq!(mass.top_k, 8);
    }

    #[test]
    fn test_logits_longer_than_vocab() {
        let registry = CueRegistry::standard().unwrap();
        let family = registry.get(DETERMINERS).unwrap();
        let logits = vec![0.0f32; 10];
        let mass = classifier()
            .class_mass(&logits, family, &registry, 10)
            .unwrap();
        assert!((mass.buckets.total() + mass.residual - 1.0).abs() < 1e-9);
        assert!((mass.class_mass["NOUN"] - 0.1).abs() < 1e-12);
        assert_eq!(mass.class_mass["ADJ"], 0.0);
    }

    #[test]
    fn test_nan_logits_rejected() {
        let registry = CueRegistry::standard().unwrap();
        let family = registry.get(INFINITIVAL_TO).unwrap();
        let mut logits = vec![0.0f32; 8];
        logits[3] = f32::NAN;
        let err = classifier()
            .class_mass(&logits, family, &registry, 8)
            .unwrap_err();
        assert!(matches!(err, AuditError::UnstableNumerics { .. }));
    }
}
