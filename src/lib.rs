// Pedantic clippy configuration for statistics/ML code
#![allow(clippy::cast_precision_loss)] // usize→f64/f32 intentional in statistics
#![allow(clippy::cast_possible_truncation)] // usize→u32 in tensor indexing
#![allow(clippy::cast_possible_wrap)] // usize→i64 for context-length serialization
#![allow(clippy::many_single_char_names)] // t, d, n standard in statistics
#![allow(clippy::similar_names)] // related variables like `mean_a`/`mean_b`
#![allow(clippy::module_name_repetitions)] // AuditEngine in audit.rs is fine
// Documentation pedantic - acceptable for research code:
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// Method style pedantic:
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::cast_sign_loss)] // f64→usize when value is known positive

//! jabber-rs: morphosyntax cue audit for causal language models
//!
//! Measures how much next-token probability a model puts on the word class a
//! function-word cue predicts ("to" → verb, "the" → noun phrase), across
//! intact sentences, jabberwocky (nonce content words), scrambled variants,
//! and a cue-deleted control.
//!
//! ## Architecture
//!
//! - `cue_families`: CueRegistry of cue families, target classes, closed-class words
//! - `permute`: Seeded word-level scrambles and cue deletion with invariant checks
//! - `nonce`: Pronounceable nonce-word generator
//! - `stimuli`: Stimulus records, conditions, and locked stimulus files
//! - `generate`: Template-driven stimulus generation and sanity report
//! - `numerics`: Stable softmax, top-K selection, entropy
//! - `strategy`: Word-class classification strategies (lexicon, POS tagger)
//! - `classifier`: Word-aligned next-token class mass
//! - `audit`: Audit engine over stimuli × conditions × context lengths
//! - `contrast`: Paired contrasts, effect sizes, bootstrap CIs, FDR correction,
//!   set-aggregation robustness
//! - `compare`: Cross-model comparison of audit outputs
//! - `normalize`: Lowercasing and punctuation normalization of stimulus texts
//! - `metrics`: Sentence-level word-aligned surprisal and entropy
//! - `entropy`: Entropy effects, position split, word-mean vs word-sum robustness
//! - `report`: JSON/CSV output and console tables
//! - `forward`: Qwen2/LLaMA decoder forward pass
//! - `masks`: Causal attention mask
//! - `model`: AuditModel, the hub-loaded model behind `NextTokenModel`
//! - `error`: AuditError taxonomy and skip reasons

pub mod audit;
pub mod classifier;
pub mod compare;
pub mod contrast;
pub mod cue_families;
pub mod entropy;
pub mod error;
pub mod forward;
pub mod generate;
pub mod masks;
pub mod metrics;
pub mod model;
pub mod nonce;
pub mod normalize;
pub mod numerics;
pub mod permute;
pub mod report;
pub mod stimuli;
pub mod strategy;

pub use audit::{
    locate_cues, parse_context_lengths, truncate_context, AuditConfig, AuditEngine, AuditRecord,
    AuditRun, Checkpoint, ContextLength, CueHit, CueSearch, NextTokenLogits, NextTokenModel,
};
pub use classifier::{
    ClassMass, MassBuckets, MassFlag, MassThresholds, TokenDecoder, TokenKind, VocabDecoder,
    WordAlignedClassifier, WordStartTable,
};
pub use compare::{compare_models, EffectTrend, ModelComparison, DEFAULT_STABLE_WITHIN};
pub use contrast::{
    aggregation_robustness, apply_fdr, benjamini_hochberg, bootstrap_ci, cohens_d,
    contrast_label, key_findings, pair_records, paired_t, AblationRow, ConditionSummary,
    ContrastConfig, ContrastEngine, ContrastReport, ContrastResult, KeyFinding, RobustnessRow,
    SetAggregation, DEFAULT_CONTRASTS, MIN_PAIRS,
};
pub use cue_families::{normalize_word, CueFamily, CueRegistry, WordClass};
pub use entropy::{
    condition_metrics, entropy_effect, position_split, ConditionMetrics, EntropyEffect,
    OrderingCheck, PositionSplit, WordAggregation, ENTROPY_ORDERINGS,
};
pub use error::{AuditError, SkipReason};
pub use forward::{DecoderConfig, DecoderTransformer};
pub use generate::{GenerationConfig, SanityReport, StimulusGenerator, Template};
pub use masks::create_causal_mask;
pub use metrics::{
    score_stimuli, score_text, MetricsOutput, SentenceMetrics, SentenceRecord, SequenceLogits,
    SequenceModel, WordScore,
};
pub use model::{AuditModel, ModelArchitecture};
pub use nonce::NonceGenerator;
pub use normalize::{normalize_stimuli, normalize_text, Normalization};
pub use numerics::{entropy_bits, softmax, top_k_indices};
pub use permute::{
    cue_delete, derive_seed, permute, permute_pinned, split_words, PermutationOutcome,
    ScrambleMode, SlotPartition, DEFAULT_REPLACEMENT, MAX_SHUFFLE_ATTEMPTS,
};
pub use report::{write_contrast_outputs, AuditMetadata, AuditOutput, ContrastFiles};
pub use stimuli::{Condition, Stimulus, StimulusSet};
pub use strategy::{
    ClassificationStrategy, LexiconStrategy, LexiconTagger, PosTagger, PosTaggerStrategy,
    StrategyKind, Upos,
};
