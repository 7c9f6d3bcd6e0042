//! Cue audit engine
//!
//! Walks every (stimulus, condition, cue occurrence, context length) point,
//! asks the model for the next-token distribution right after the cue, and
//! records how much of it lands on the cue family's expected classes.
//! Per-point failures are logged and counted; only setup problems abort.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classifier::{ClassMass, MassThresholds, TokenDecoder, WordAlignedClassifier};
use crate::cue_families::{CueFamily, CueRegistry};
use crate::error::{AuditError, SkipReason};
use crate::normalize::{normalize_stimuli, Normalization};
use crate::permute::{count_word, find_word, DEFAULT_REPLACEMENT};
use crate::report::{AuditMetadata, AuditOutput};
use crate::stimuli::{Condition, Stimulus, StimulusSet};
use crate::strategy::StrategyKind;

const PROGRESS_EVERY: usize = 100;

/// Last-position logits for one context
#[derive(Debug, Clone)]
pub struct NextTokenLogits {
    pub logits: Vec<f32>,
    /// Number of tokens the context was encoded into
    pub token_count: usize,
}

/// Anything that can score the next token after a context string
pub trait NextTokenModel {
    fn model_id(&self) -> &str;

    /// Architecture label recorded in audit metadata, when known
    fn architecture_label(&self) -> Option<String> {
        None
    }

    fn decoder(&self) -> &dyn TokenDecoder;
    fn predict_next(&self, context: &str) -> Result<NextTokenLogits>;
}

/// Number of words of context kept before (and including) the cue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum ContextLength {
    Words(usize),
    Full,
}

impl ContextLength {
    pub const DEFAULTS: [ContextLength; 5] = [
        ContextLength::Words(1),
        ContextLength::Words(2),
        ContextLength::Words(4),
        ContextLength::Words(8),
        ContextLength::Full,
    ];

    /// Record label: the word count, or `full`
    pub fn label(self) -> String {
        match self {
            Self::Words(k) => k.to_string(),
            Self::Full => "full".to_string(),
        }
    }
}

impl From<ContextLength> for i64 {
    fn from(k: ContextLength) -> i64 {
        match k {
            ContextLength::Words(k) => k as i64,
            ContextLength::Full => -1,
        }
    }
}

impl TryFrom<i64> for ContextLength {
    type Error = String;

    fn try_from(v: i64) -> std::result::Result<Self, String> {
        match v {
            -1 => Ok(Self::Full),
            k if k >= 1 => Ok(Self::Words(k as usize)),
            k => Err(format!("invalid context length {k}")),
        }
    }
}

impl fmt::Display for ContextLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for ContextLength {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("full") {
            return Ok(Self::Full);
        }
        let v: i64 = s
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid context length `{s}`"))?;
        Self::try_from(v).map_err(anyhow::Error::msg)
    }
}

/// Parse a comma-separated list such as `1,2,4,8,-1`
pub fn parse_context_lengths(s: &str) -> Result<Vec<ContextLength>> {
    s.split(',')
        .filter(|p| !p.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// How cue occurrences are located in a condition text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CueSearch {
    /// First occurrence of the stimulus's own cue word
    #[default]
    StimulusCue,
    /// First occurrence of any cue of the family
    FamilyFirst,
    /// Every occurrence of any cue of the family
    FamilyAll,
}

impl FromStr for CueSearch {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "stimulus" | "stimulus_cue" => Ok(Self::StimulusCue),
            "first" | "family_first" => Ok(Self::FamilyFirst),
            "all" | "family_all" => Ok(Self::FamilyAll),
            other => bail!("unknown cue search mode `{other}`"),
        }
    }
}

/// Where and how often partial results are written
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub path: PathBuf,
    /// Rewrite the file every this many records
    pub every: usize,
}

/// Configuration for a cue audit
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub context_lengths: Vec<ContextLength>,
    pub top_k: usize,
    pub conditions: Vec<Condition>,
    /// Families to audit (empty = all in the registry)
    pub families: Vec<String>,
    pub strategy: StrategyKind,
    pub cue_search: CueSearch,
    /// Token expected in place of the cue under CUE_DELETED
    pub replacement: String,
    pub thresholds: MassThresholds,
    pub checkpoint: Option<Checkpoint>,
    /// Normalize every condition text before locating cues
    pub normalization: Option<Normalization>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            context_lengths: ContextLength::DEFAULTS.to_vec(),
            top_k: 1000,
            conditions: Condition::ALL.to_vec(),
            families: vec![],
            strategy: StrategyKind::Lexicon,
            cue_search: CueSearch::StimulusCue,
            replacement: DEFAULT_REPLACEMENT.to_string(),
            thresholds: MassThresholds::default(),
            checkpoint: None,
            normalization: None,
        }
    }
}

/// One located cue (or its replacement) in a condition text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CueHit {
    /// Surface form as found in the text
    pub word: String,
    pub index: usize,
}

/// Find the positions to audit in `stimulus` under `condition`.
///
/// Under CUE_DELETED the original cue must be gone and the replacement token
/// takes its place as the context terminator.
pub fn locate_cues(
    stimulus: &Stimulus,
    condition: Condition,
    family: &CueFamily,
    search: CueSearch,
    replacement: &str,
) -> Result<Vec<CueHit>, AuditError> {
    let words = stimulus.words(condition);
    if words.is_empty() {
        return Err(AuditError::EmptyContext(condition));
    }
    let hit = |index: usize| CueHit {
        word: words[index].clone(),
        index,
    };

    if condition == Condition::CueDeleted {
        if count_word(&words, &stimulus.cue_word) > 0 {
            return Err(AuditError::CueNotDeleted {
                condition,
                cue: stimulus.cue_word.clone(),
            });
        }
        return find_word(&words, replacement)
            .map(|i| vec![hit(i)])
            .ok_or_else(|| AuditError::MissingCue {
                condition,
                cue: replacement.to_string(),
            });
    }

    let hits: Vec<CueHit> = match search {
        CueSearch::StimulusCue => find_word(&words, &stimulus.cue_word)
            .map(hit)
            .into_iter()
            .collect(),
        CueSearch::FamilyFirst => words
            .iter()
            .position(|w| family.is_cue(w))
            .map(hit)
            .into_iter()
            .collect(),
        CueSearch::FamilyAll => words
            .iter()
            .enumerate()
            .filter(|(_, w)| family.is_cue(w))
            .map(|(i, _)| hit(i))
            .collect(),
    };

    if hits.is_empty() {
        return Err(AuditError::MissingCue {
            condition,
            cue: stimulus.cue_word.clone(),
        });
    }
    Ok(hits)
}

/// The last `k` words ending at and including `cue_index`
pub fn truncate_context(words: &[String], cue_index: usize, k: ContextLength) -> String {
    let end = cue_index.min(words.len().saturating_sub(1));
    let start = match k {
        ContextLength::Full => 0,
        ContextLength::Words(k) => (end + 1).saturating_sub(k.max(1)),
    };
    words[start..=end].join(" ")
}

/// One audited point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub set_id: u32,
    pub condition: Condition,
    pub cue_family: String,
    pub context_k: String,
    pub cue_word: String,
    pub cue_index: usize,
    pub context: String,
    pub target_class: String,
    #[serde(flatten)]
    pub mass: ClassMass,
    pub token_count: usize,
    /// False when a mass threshold was exceeded; such records are kept but not analyzed
    pub usable: bool,
}

/// Records and skip counts of one audit
#[derive(Debug, Clone, Default)]
pub struct AuditRun {
    pub records: Vec<AuditRecord>,
    pub skips: BTreeMap<SkipReason, usize>,
    pub points_attempted: usize,
}

impl AuditRun {
    fn skip(&mut self, reason: SkipReason) {
        *self.skips.entry(reason).or_insert(0) += 1;
    }

    pub fn total_skipped(&self) -> usize {
        self.skips.values().sum()
    }

    pub fn flagged(&self) -> usize {
        self.records.iter().filter(|r| !r.usable).count()
    }

    pub fn usable_records(&self) -> impl Iterator<Item = &AuditRecord> {
        self.records.iter().filter(|r| r.usable)
    }

    /// Console summary of counts and skips
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Points attempted: {}", self.points_attempted),
            format!("Records:          {}", self.records.len()),
            format!("  flagged:        {}", self.flagged()),
            format!("Skipped:          {}", self.total_skipped()),
        ];
        for (reason, n) in &self.skips {
            lines.push(format!("  {reason:<16}{n}"));
        }
        lines.join("\n")
    }
}

/// Runs a cue audit against one model
pub struct AuditEngine<'a, M: NextTokenModel> {
    model: &'a M,
    registry: &'a CueRegistry,
    classifier: WordAlignedClassifier,
    config: AuditConfig,
    source: String,
}

impl<'a, M: NextTokenModel> AuditEngine<'a, M> {
    /// Build the engine; decodes the model's vocabulary once
    pub fn new(model: &'a M, registry: &'a CueRegistry, config: AuditConfig) -> Self {
        let classifier = WordAlignedClassifier::new(
            model.decoder(),
            config.strategy.build(),
            config.thresholds,
        );
        info!(
            "Word-start table: {} of {} tokens open a word",
            classifier.table().word_start_count(),
            classifier.table().len()
        );
        Self {
            model,
            registry,
            classifier,
            config,
            source: String::new(),
        }
    }

    /// Name of the stimulus file, recorded in checkpoint metadata
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    fn selected_families(&self) -> Result<Vec<&str>> {
        if self.config.families.is_empty() {
            return Ok(self.registry.family_ids());
        }
        for id in &self.config.families {
            if self.registry.get(id).is_err() {
                bail!("unknown cue family `{id}` requested");
            }
        }
        Ok(self.config.families.iter().map(String::as_str).collect())
    }

    /// Audit every selected stimulus under every configured condition and context length
    pub fn run(&self, stimuli: &StimulusSet) -> Result<AuditRun> {
        let families = self.selected_families()?;
        info!(
            "Auditing {} stimuli with {} ({} conditions, {} context lengths, top-k {})",
            stimuli.len(),
            self.model.model_id(),
            self.config.conditions.len(),
            self.config.context_lengths.len(),
            self.config.top_k
        );

        let normalized;
        let stimuli = match self.config.normalization {
            Some(mode) => {
                info!("Normalizing stimulus texts ({mode})");
                normalized = normalize_stimuli(stimuli, mode);
                &normalized
            }
            None => stimuli,
        };

        let mut run = AuditRun::default();
        for stimulus in stimuli.stimuli() {
            if !self.registry.family_ids().contains(&stimulus.cue_family.as_str()) {
                warn!(
                    "set {}: {}",
                    stimulus.set_id,
                    AuditError::UnknownFamily(stimulus.cue_family.clone())
                );
                run.points_attempted += 1;
                run.skip(SkipReason::UnknownFamily);
                continue;
            }
            if !families.contains(&stimulus.cue_family.as_str()) {
                continue;
            }
            for &condition in &self.config.conditions {
                self.audit_condition(stimulus, condition, stimuli, &mut run)?;
            }
        }

        info!(
            "Audit finished: {} records, {} skipped, {} flagged",
            run.records.len(),
            run.total_skipped(),
            run.flagged()
        );
        Ok(run)
    }

    fn audit_condition(
        &self,
        stimulus: &Stimulus,
        condition: Condition,
        stimuli: &StimulusSet,
        run: &mut AuditRun,
    ) -> Result<()> {
        let family = self.registry.get(&stimulus.cue_family)?;
        let hits = match locate_cues(
            stimulus,
            condition,
            family,
            self.config.cue_search,
            &self.config.replacement,
        ) {
            Ok(hits) => hits,
            Err(e) => {
                warn!("{} set {}: {e}", stimulus.cue_family, stimulus.set_id);
                run.points_attempted += 1;
                run.skip(e.skip_reason().unwrap_or(SkipReason::MissingCue));
                return Ok(());
            }
        };

        let words = stimulus.words(condition);
        for hit in &hits {
            for &k in &self.config.context_lengths {
                run.points_attempted += 1;
                if run.points_attempted % PROGRESS_EVERY == 0 {
                    info!(
                        "Progress: {} points, {} records",
                        run.points_attempted,
                        run.records.len()
                    );
                }

                let context = truncate_context(&words, hit.index, k);
                match self.measure(&context, family) {
                    Ok((mass, token_count)) => {
                        if let Some(e) = mass.threshold_error() {
                            debug!("{} set {} {condition} k={k}: {e}", family.id, stimulus.set_id);
                        }
                        run.records.push(AuditRecord {
                            set_id: stimulus.set_id,
                            condition,
                            cue_family: stimulus.cue_family.clone(),
                            context_k: k.label(),
                            cue_word: hit.word.clone(),
                            cue_index: hit.index,
                            context,
                            target_class: stimulus.target_class.clone(),
                            usable: mass.usable(),
                            mass,
                            token_count,
                        });
                        self.maybe_checkpoint(stimuli, run)?;
                    }
                    Err(reason) => run.skip(reason),
                }
            }
        }
        Ok(())
    }

    /// One model call plus class-mass accounting
    fn measure(
        &self,
        context: &str,
        family: &CueFamily,
    ) -> std::result::Result<(ClassMass, usize), SkipReason> {
        let next = self.model.predict_next(context).map_err(|e| {
            warn!("model failed on `{context}`: {e:#}");
            SkipReason::ModelFailure
        })?;
        let mass = self
            .classifier
            .class_mass(&next.logits, family, self.registry, self.config.top_k)
            .map_err(|e| {
                warn!("`{context}`: {e}");
                e.skip_reason().unwrap_or(SkipReason::UnstableNumerics)
            })?;
        Ok((mass, next.token_count))
    }

    fn maybe_checkpoint(&self, stimuli: &StimulusSet, run: &AuditRun) -> Result<()> {
        let Some(checkpoint) = &self.config.checkpoint else {
            return Ok(());
        };
        if checkpoint.every == 0 || run.records.len() % checkpoint.every != 0 {
            return Ok(());
        }
        self.output(stimuli, run).write(&checkpoint.path)?;
        debug!(
            "Checkpoint: {} records -> {}",
            run.records.len(),
            checkpoint.path.display()
        );
        Ok(())
    }

    /// Assemble the audit document for `run`
    pub fn output(&self, stimuli: &StimulusSet, run: &AuditRun) -> AuditOutput {
        AuditOutput {
            metadata: AuditMetadata::new(
                self.model.model_id(),
                self.model.architecture_label(),
                &self.source,
                &self.config,
                self.classifier.strategy_name(),
                stimuli.len(),
                run,
            ),
            results: run.records.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::VocabDecoder;
    use crate::cue_families::INFINITIVAL_TO;

    const SCIENTIST: &str = "the scientist decided to study the ancient artifacts";

    fn stimulus() -> Stimulus {
        Stimulus {
            set_id: 1,
            cue_family: INFINITIVAL_TO.into(),
            cue_word: "to".into(),
            cue_position: 3,
            target_class: "VERB".into(),
            sentence: SCIENTIST.into(),
            jabberwocky: "the blick decided to florp the glaxy zorbs".into(),
            full_scrambled: "zorbs the to florp decided glaxy blick the".into(),
            content_scrambled: "the zorbs decided to glaxy the florp blick".into(),
            function_scrambled: "decided blick the to florp the glaxy zorbs".into(),
            cue_deleted: "the blick decided ke florp the glaxy zorbs".into(),
            content_words: vec![],
            nonce_words: vec![],
            seeds: None,
            identity_flags: vec![],
        }
    }

    /// Puts most mass on " study" when the context ends in "to", else on "."
    struct CueModel {
        decoder: VocabDecoder,
    }

    impl CueModel {
        fn new() -> Self {
            Self {
                decoder: VocabDecoder::new([" study", " the", ".", "ing"]),
            }
        }
    }

    impl NextTokenModel for CueModel {
        fn model_id(&self) -> &str {
            "mock/cue-model"
        }

        fn architecture_label(&self) -> Option<String> {
            Some("mock".into())
        }

        fn decoder(&self) -> &dyn TokenDecoder {
            &self.decoder
        }

        fn predict_next(&self, context: &str) -> Result<NextTokenLogits> {
            let logits = if context.ends_with(" to") || context == "to" {
                vec![5.0, 0.0, 0.0, 0.0]
            } else {
                vec![0.0, 1.0, 0.0, 1.0]
            };
            Ok(NextTokenLogits {
                logits,
                token_count: context.split_whitespace().count(),
            })
        }
    }

    #[test]
    fn test_truncate_context() {
        let words: Vec<String> = SCIENTIST.split_whitespace().map(String::from).collect();
        assert_eq!(truncate_context(&words, 3, ContextLength::Words(1)), "to");
        assert_eq!(
            truncate_context(&words, 3, ContextLength::Words(2)),
            "decided to"
        );
        assert_eq!(
            truncate_context(&words, 3, ContextLength::Words(8)),
            "the scientist decided to"
        );
        assert_eq!(
            truncate_context(&words, 3, ContextLength::Full),
            "the scientist decided to"
        );
    }

    #[test]
    fn test_locate_cue_deleted_uses_replacement() {
        let registry = CueRegistry::standard().unwrap();
        let family = registry.get(INFINITIVAL_TO).unwrap();
        let stim = stimulus();
        let hits = locate_cues(
            &stim,
            Condition::CueDeleted,
            family,
            CueSearch::StimulusCue,
            "ke",
        )
        .unwrap();
        assert_eq!(hits, vec![CueHit { word: "ke".into(), index: 3 }]);
    }

    #[test]
    fn test_locate_cue_deleted_rejects_surviving_cue() {
        let registry = CueRegistry::standard().unwrap();
        let family = registry.get(INFINITIVAL_TO).unwrap();
        let mut stim = stimulus();
        stim.cue_deleted = "the blick decided to florp".into();
        let err = locate_cues(
            &stim,
            Condition::CueDeleted,
            family,
            CueSearch::StimulusCue,
            "ke",
        )
        .unwrap_err();
        assert!(matches!(err, AuditError::CueNotDeleted { .. }));
        assert_eq!(err.skip_reason(), Some(SkipReason::MissingCue));
    }

    #[test]
    fn test_locate_family_all() {
        let registry = CueRegistry::standard().unwrap();
        let family = registry.get(INFINITIVAL_TO).unwrap();
        let mut stim = stimulus();
        stim.jabberwocky = "to go to the lab".into();
        let hits = locate_cues(
            &stim,
            Condition::Jabberwocky,
            family,
            CueSearch::FamilyAll,
            "ke",
        )
        .unwrap();
        assert_eq!(hits.iter().map(|h| h.index).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_context_length_serde() {
        let json = serde_json::to_string(&ContextLength::DEFAULTS.to_vec()).unwrap();
        assert_eq!(json, "[1,2,4,8,-1]");
        let back: Vec<ContextLength> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ContextLength::DEFAULTS.to_vec());
        assert_eq!(
            parse_context_lengths("1, 4,full").unwrap(),
            vec![
                ContextLength::Words(1),
                ContextLength::Words(4),
                ContextLength::Full
            ]
        );
        assert!(parse_context_lengths("0").is_err());
    }

    #[test]
    fn test_engine_run_records_and_skips() {
        let registry = CueRegistry::standard().unwrap();
        let model = CueModel::new();
        let config = AuditConfig {
            context_lengths: vec![ContextLength::Words(1), ContextLength::Full],
            top_k: 10,
            thresholds: MassThresholds {
                max_residual: 0.3,
                max_punctuation: 0.9,
            },
            ..Default::default()
        };
        let engine = AuditEngine::new(&model, &registry, config);

        let mut broken = stimulus();
        broken.set_id = 2;
        broken.content_scrambled = "the zorbs decided glaxy".into();
        let mut unknown = stimulus();
        unknown.set_id = 3;
        unknown.cue_family = "particles".into();
        let set = StimulusSet::new(vec![stimulus(), broken, unknown]);

        let run = engine.run(&set).unwrap();
        // set 1: 6 conditions x 2 lengths; set 2: 5 x 2 plus one missing cue
        assert_eq!(run.records.len(), 22);
        assert_eq!(run.skips.get(&SkipReason::MissingCue), Some(&1));
        assert_eq!(run.skips.get(&SkipReason::UnknownFamily), Some(&1));
        assert_eq!(run.points_attempted, 24);

        let sentence = run
            .records
            .iter()
            .find(|r| r.set_id == 1 && r.condition == Condition::Sentence && r.context_k == "1")
            .unwrap();
        assert_eq!(sentence.context, "to");
        assert!(sentence.mass.target_mass > 0.9);

        let deleted = run
            .records
            .iter()
            .find(|r| r.set_id == 1 && r.condition == Condition::CueDeleted && r.context_k == "full")
            .unwrap();
        assert_eq!(deleted.cue_word, "ke");
        assert_eq!(deleted.context, "the blick decided ke");
        assert!(deleted.mass.target_mass < 0.5);
        assert!(run.summary().contains("missing_cue"));
    }

    #[test]
    fn test_unknown_requested_family_is_setup_error() {
        let registry = CueRegistry::standard().unwrap();
        let model = CueModel::new();
        let config = AuditConfig {
            families: vec!["particles".into()],
            ..Default::default()
        };
        let engine = AuditEngine::new(&model, &registry, config);
        assert!(engine.run(&StimulusSet::new(vec![stimulus()])).is_err());
    }

    #[test]
    fn test_normalization_applies_before_scoring() {
        let registry = CueRegistry::standard().unwrap();
        let model = CueModel::new();
        let mut shouting = stimulus();
        shouting.sentence = "The Scientist, decided TO study the ancient artifacts!".into();
        let set = StimulusSet::new(vec![shouting]);
        let config = |normalization| AuditConfig {
            context_lengths: vec![ContextLength::Full],
            conditions: vec![Condition::Sentence],
            top_k: 10,
            normalization,
            ..Default::default()
        };

        let raw = AuditEngine::new(&model, &registry, config(None));
        let run = raw.run(&set).unwrap();
        assert_eq!(run.records[0].context, "The Scientist, decided TO");
        assert!(run.records[0].mass.target_mass < 0.5);

        let normalized = AuditEngine::new(&model, &registry, config(Some(Normalization::Strip)));
        let run = normalized.run(&set).unwrap();
        assert_eq!(run.records[0].context, "the scientist decided to");
        assert!(run.records[0].mass.target_mass > 0.9);

        let metadata = normalized.output(&set, &run).metadata;
        assert_eq!(metadata.normalization, Some(Normalization::Strip));
        assert_eq!(metadata.architecture.as_deref(), Some("mock"));
    }
}
