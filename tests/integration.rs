//! Integration tests for jabber-rs
//!
//! Note: Tests marked with #[ignore] require a model download.
//! Run them explicitly with: cargo test --ignored

use anyhow::Result;
use jabber_rs::cue_families::INFINITIVAL_TO;
use jabber_rs::{
    compare_models, AuditConfig, AuditEngine, AuditOutput, Condition, ContextLength,
    ContrastConfig, ContrastEngine, CueRegistry, EffectTrend, GenerationConfig, NextTokenLogits,
    NextTokenModel, Normalization, SanityReport, StimulusGenerator, StimulusSet, TokenDecoder,
    VocabDecoder, DEFAULT_STABLE_WITHIN,
};
use std::io::Write;
use tempfile::{tempdir, NamedTempFile};

/// Puts most of its mass on " study" right after "to", elsewhere on " the"
struct ToModel {
    id: &'static str,
    /// Logit of " study" after "to"
    strength: f32,
    decoder: VocabDecoder,
}

impl ToModel {
    fn new() -> Self {
        Self::with_strength("mock/to-model", 4.0)
    }

    fn with_strength(id: &'static str, strength: f32) -> Self {
        Self {
            id,
            strength,
            decoder: VocabDecoder::new([" study", " the", ".", "ing", " glorp"]),
        }
    }
}

impl NextTokenModel for ToModel {
    fn model_id(&self) -> &str {
        self.id
    }

    fn decoder(&self) -> &dyn TokenDecoder {
        &self.decoder
    }

    fn predict_next(&self, context: &str) -> Result<NextTokenLogits> {
        let ends_with_to = context == "to" || context.ends_with(" to");
        let logits = if ends_with_to {
            vec![self.strength, 0.0, -4.0, 0.0, 0.0]
        } else {
            vec![0.0, 2.0, -4.0, 1.0, 0.0]
        };
        Ok(NextTokenLogits {
            logits,
            token_count: context.split_whitespace().count(),
        })
    }
}

fn infinitival_stimuli() -> StimulusSet {
    let registry = CueRegistry::standard().unwrap();
    let generator = StimulusGenerator::new(&registry, GenerationConfig::default());
    let all = generator.generate().unwrap();
    StimulusSet::new(
        all.by_family(INFINITIVAL_TO)
            .into_iter()
            .cloned()
            .collect(),
    )
}

#[test]
fn test_generate_save_load_roundtrip() {
    let registry = CueRegistry::standard().unwrap();
    let config = GenerationConfig::default();
    let stimuli = StimulusGenerator::new(&registry, config.clone())
        .generate()
        .unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("stimuli").join("stimuli_locked.json");
    stimuli.save(&path).unwrap();
    let loaded = StimulusSet::load(&path).unwrap();

    assert_eq!(loaded.len(), stimuli.len());
    assert_eq!(loaded.stimuli(), stimuli.stimuli());
    assert!(SanityReport::check(&loaded, &registry, &config).passed());
}

#[test]
fn test_stimulus_file_formats() {
    let record = r#"{
        "set_id": 1,
        "cue_family": "infinitival_to",
        "cue_word": "to",
        "cue_position": 3,
        "target_class": "VERB",
        "sentence": "the scientist decided to study the ancient artifacts",
        "jabberwocky": "the blicket decided to florp the glorby wuggets",
        "full_scrambled": "wuggets the to glorby decided florp the blicket",
        "content_scrambled": "the florp decided to wuggets the blicket glorby",
        "function_scrambled": "decided blicket the to florp the glorby wuggets",
        "cue_deleted": "the blicket decided ke florp the glorby wuggets"
    }"#;

    let mut bare = NamedTempFile::new().unwrap();
    writeln!(bare, "[{record}]").unwrap();
    let set = StimulusSet::load(bare.path()).unwrap();
    assert_eq!(set.len(), 1);
    assert_eq!(set.stimuli()[0].cue_position, 3);

    let mut wrapped = NamedTempFile::new().unwrap();
    writeln!(
        wrapped,
        r#"{{"metadata": {{"seed": 42}}, "stimuli": [{record}]}}"#
    )
    .unwrap();
    let set = StimulusSet::load(wrapped.path()).unwrap();
    assert_eq!(set.len(), 1);
    assert_eq!(
        set.stimuli()[0].text(Condition::CueDeleted),
        "the blicket decided ke florp the glorby wuggets"
    );
}

#[test]
fn test_malformed_stimulus_file_is_error() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, r#"{{"not": "stimuli"}}"#).unwrap();
    assert!(StimulusSet::load(file.path()).is_err());
}

#[test]
fn test_audit_then_analyze_pipeline() {
    let stimuli = infinitival_stimuli();
    assert_eq!(stimuli.len(), 30);

    let registry = CueRegistry::standard().unwrap();
    let model = ToModel::new();
    let config = AuditConfig {
        context_lengths: vec![ContextLength::Words(1), ContextLength::Full],
        families: vec![INFINITIVAL_TO.to_string()],
        ..Default::default()
    };
    let engine = AuditEngine::new(&model, &registry, config).with_source("stimuli_locked.json");
    let run = engine.run(&stimuli).unwrap();

    assert_eq!(run.total_skipped(), 0);
    assert_eq!(run.records.len(), 30 * 6 * 2);
    assert!(run.records.iter().all(|r| r.usable));

    let dir = tempdir().unwrap();
    let results_path = dir.path().join("audit_results.json");
    engine.output(&stimuli, &run).write(&results_path).unwrap();
    let output = AuditOutput::load(&results_path).unwrap();
    assert_eq!(output.metadata.model, "mock/to-model");
    assert_eq!(output.metadata.num_stimuli, 30);
    assert_eq!(output.results.len(), run.records.len());

    let contrast = ContrastEngine::new(ContrastConfig {
        n_bootstrap: 500,
        ..Default::default()
    });
    let report = contrast.run(&output.results);
    assert!(report.omitted.is_empty());
    assert_eq!(report.results.len(), 5);

    let deleted = report
        .results
        .iter()
        .find(|r| r.cond_b == Condition::CueDeleted)
        .unwrap();
    assert_eq!(deleted.n, 30);
    assert!(deleted.diff > 0.5);
    assert!(deleted.significant);

    let sentence = report
        .results
        .iter()
        .find(|r| r.cond_a == Condition::Sentence)
        .unwrap();
    assert!(sentence.diff.abs() < 1e-12);
    assert!(!sentence.significant);

    let summary = contrast.summary_table(&output.results);
    assert_eq!(summary.len(), 6);
    let ablation = contrast.ablation(&output.results);
    assert_eq!(ablation.len(), 6 * 2);

    let prefix = dir.path().join("audit").to_string_lossy().into_owned();
    let files =
        jabber_rs::write_contrast_outputs(&prefix, &report.results, &summary, &ablation).unwrap();
    let csv = std::fs::read_to_string(&files.contrasts_csv).unwrap();
    assert!(csv.starts_with("cue_family,contrast,"));
    assert_eq!(csv.lines().count(), 1 + 5);
    assert!(files.summary_csv.exists());
    assert!(files.ablation_csv.exists());
    assert!(files.contrasts_json.exists());
}

#[test]
fn test_one_word_context_is_the_cue() {
    let stimuli = infinitival_stimuli();
    let registry = CueRegistry::standard().unwrap();
    let model = ToModel::new();
    let config = AuditConfig {
        context_lengths: vec![ContextLength::Words(1)],
        conditions: vec![Condition::Jabberwocky, Condition::CueDeleted],
        families: vec![INFINITIVAL_TO.to_string()],
        ..Default::default()
    };
    let run = AuditEngine::new(&model, &registry, config)
        .run(&stimuli)
        .unwrap();

    for r in &run.records {
        match r.condition {
            Condition::Jabberwocky => assert_eq!(r.context, "to"),
            Condition::CueDeleted => assert_eq!(r.context, "ke"),
            other => panic!("unexpected condition {other}"),
        }
    }
}

#[test]
fn test_normalized_audits_compare_across_models() {
    let stimuli = infinitival_stimuli();
    let registry = CueRegistry::standard().unwrap();
    let config = AuditConfig {
        context_lengths: vec![ContextLength::Full],
        normalization: Some(Normalization::Period),
        ..Default::default()
    };

    let outputs: Vec<AuditOutput> = [
        ToModel::with_strength("mock/strong", 4.0),
        ToModel::with_strength("mock/weak", 1.0),
    ]
    .iter()
    .map(|model| {
        let engine = AuditEngine::new(model, &registry, config.clone());
        let run = engine.run(&stimuli).unwrap();
        assert_eq!(run.total_skipped(), 0);
        engine.output(&stimuli, &run)
    })
    .collect();
    assert_eq!(outputs[0].metadata.normalization, Some(Normalization::Period));

    let contrast = ContrastConfig {
        n_bootstrap: 200,
        ..Default::default()
    };
    let comparison = compare_models(&outputs, &contrast, DEFAULT_STABLE_WITHIN).unwrap();
    assert_eq!(comparison.models, vec!["mock/strong", "mock/weak"]);

    let deleted = comparison
        .contrasts
        .iter()
        .find(|c| c.contrast == "JABBERWOCKY - CUE_DELETED")
        .unwrap();
    assert!(deleted.diffs[0].unwrap() > deleted.diffs[1].unwrap());
    assert_eq!(deleted.trend, Some(EffectTrend::Weakens));

    let sentence = comparison
        .contrasts
        .iter()
        .find(|c| c.contrast == "SENTENCE - JABBERWOCKY")
        .unwrap();
    assert_eq!(sentence.trend, Some(EffectTrend::Stable));
}

/// Word-aligned sentence metrics against a small hub model
#[test]
#[ignore = "requires model download"]
fn test_real_model_sentence_metrics() {
    let model = jabber_rs::AuditModel::from_pretrained_with_device("Qwen/Qwen2.5-0.5B", true)
        .unwrap();
    let stimuli = StimulusSet::new(infinitival_stimuli().stimuli()[..3].to_vec());
    let output = jabber_rs::score_stimuli(
        &model,
        &stimuli,
        &[Condition::Sentence, Condition::FullScrambled],
        Some(Normalization::Period),
    );
    assert_eq!(output.failures, 0);
    assert_eq!(output.records.len(), 3 * 2);
    for r in &output.records {
        assert_eq!(r.metrics.n_words, r.text.split_whitespace().count());
        assert!(r.metrics.mean_word_entropy > 0.0);
        assert!(r.metrics.mean_word_entropy_sum >= r.metrics.mean_word_entropy);
    }
}

/// Full audit against a small hub model
#[test]
#[ignore = "requires model download"]
fn test_real_model_audit() {
    let model = jabber_rs::AuditModel::from_pretrained_with_device("Qwen/Qwen2.5-0.5B", true)
        .unwrap();
    let registry = CueRegistry::standard().unwrap();
    let stimuli = StimulusSet::new(infinitival_stimuli().stimuli()[..3].to_vec());
    let config = AuditConfig {
        context_lengths: vec![ContextLength::Full],
        families: vec![INFINITIVAL_TO.to_string()],
        ..Default::default()
    };
    let run = AuditEngine::new(&model, &registry, config)
        .run(&stimuli)
        .unwrap();
    assert_eq!(run.records.len(), 3 * 6);

    let mean_target = |c: Condition| {
        let v: Vec<f64> = run
            .records
            .iter()
            .filter(|r| r.condition == c)
            .map(|r| r.mass.target_mass)
            .collect();
        v.iter().sum::<f64>() / v.len() as f64
    };
    assert!(mean_target(Condition::Sentence) > mean_target(Condition::CueDeleted));
}
