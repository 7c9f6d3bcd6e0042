//! Cross-model comparison of audit outputs
//!
//! Runs the same contrast analysis on the audit output of every model and
//! lines the results up: per-condition target mass, per-contrast effect, and
//! how the effect moves from the first model to the last.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::contrast::{mean, ContrastConfig, ContrastEngine};
use crate::report::{csv_field, AuditOutput};
use crate::stimuli::Condition;

/// Default band, in target-mass units, within which an effect counts as stable
pub const DEFAULT_STABLE_WITHIN: f64 = 0.05;

/// Direction of an effect's change from the first model to the last
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectTrend {
    Stable,
    Strengthens,
    Weakens,
}

impl EffectTrend {
    /// Classify by the change in absolute effect size
    pub fn classify(first: f64, last: f64, stable_within: f64) -> Self {
        let change = last.abs() - first.abs();
        if change.abs() < stable_within {
            Self::Stable
        } else if change > 0.0 {
            Self::Strengthens
        } else {
            Self::Weakens
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Strengthens => "strengthens",
            Self::Weakens => "weakens",
        }
    }
}

/// Mean per-set target mass of one (family, condition), one entry per model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionAcrossModels {
    pub cue_family: String,
    pub condition: Condition,
    pub means: Vec<Option<f64>>,
}

/// One contrast, one entry per model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContrastAcrossModels {
    pub cue_family: String,
    pub contrast: String,
    pub diffs: Vec<Option<f64>>,
    pub cohens_d: Vec<Option<f64>>,
    pub significant: Vec<Option<bool>>,
    /// Last model's diff minus the first model's
    pub change: Option<f64>,
    pub trend: Option<EffectTrend>,
}

/// Everything a comparison produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelComparison {
    pub models: Vec<String>,
    pub conditions: Vec<ConditionAcrossModels>,
    pub contrasts: Vec<ContrastAcrossModels>,
    /// Mean target mass over every summary row, per model
    pub overall: Vec<f64>,
}

/// Model labels, disambiguated when two outputs name the same model
fn labels(outputs: &[AuditOutput]) -> Vec<String> {
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    outputs
        .iter()
        .map(|o| {
            let n = seen.entry(o.metadata.model.as_str()).or_insert(0);
            *n += 1;
            if *n == 1 {
                o.metadata.model.clone()
            } else {
                format!("{}#{}", o.metadata.model, n)
            }
        })
        .collect()
}

/// Compare two or more audit outputs under one contrast configuration
pub fn compare_models(
    outputs: &[AuditOutput],
    config: &ContrastConfig,
    stable_within: f64,
) -> Result<ModelComparison> {
    if outputs.len() < 2 {
        bail!("need at least two audit outputs to compare, got {}", outputs.len());
    }
    let models = labels(outputs);
    let n_models = outputs.len();

    let mut conditions: BTreeMap<(String, Condition), Vec<Option<f64>>> = BTreeMap::new();
    let mut contrasts: BTreeMap<(String, String), ContrastAcrossModels> = BTreeMap::new();
    let mut overall = Vec::with_capacity(n_models);

    for (m, output) in outputs.iter().enumerate() {
        let engine = ContrastEngine::new(config.clone());
        let summary = engine.summary_table(&output.results);
        overall.push(mean(&summary.iter().map(|s| s.mean).collect::<Vec<_>>()));
        for row in summary {
            conditions
                .entry((row.cue_family, row.condition))
                .or_insert_with(|| vec![None; n_models])[m] = Some(row.mean);
        }

        for r in engine.run(&output.results).results {
            let entry = contrasts
                .entry((r.cue_family.clone(), r.contrast.clone()))
                .or_insert_with(|| ContrastAcrossModels {
                    cue_family: r.cue_family.clone(),
                    contrast: r.contrast.clone(),
                    diffs: vec![None; n_models],
                    cohens_d: vec![None; n_models],
                    significant: vec![None; n_models],
                    change: None,
                    trend: None,
                });
            entry.diffs[m] = Some(r.diff);
            entry.cohens_d[m] = Some(r.cohens_d);
            entry.significant[m] = Some(r.significant);
        }
    }

    let contrasts: Vec<ContrastAcrossModels> = contrasts
        .into_values()
        .map(|mut c| {
            if let (Some(Some(first)), Some(Some(last))) = (c.diffs.first(), c.diffs.last()) {
                c.change = Some(last - first);
                c.trend = Some(EffectTrend::classify(*first, *last, stable_within));
            }
            c
        })
        .collect();
    info!(
        "Compared {} models over {} contrasts",
        n_models,
        contrasts.len()
    );

    Ok(ModelComparison {
        models,
        conditions: conditions
            .into_iter()
            .map(|((cue_family, condition), means)| ConditionAcrossModels {
                cue_family,
                condition,
                means,
            })
            .collect(),
        contrasts,
        overall,
    })
}

fn cell(v: Option<f64>) -> String {
    v.map_or_else(String::new, |x| format!("{x:.6}"))
}

/// Long-format CSV: one row per (family, contrast, model)
pub fn comparison_csv(comparison: &ModelComparison) -> String {
    let mut out = String::from("cue_family,contrast,model,diff,cohens_d,significant,trend\n");
    for c in &comparison.contrasts {
        let trend = c.trend.map_or("", EffectTrend::as_str);
        for (m, model) in comparison.models.iter().enumerate() {
            let _ = writeln!(
                out,
                "{},{},{},{},{},{},{}",
                csv_field(&c.cue_family),
                csv_field(&c.contrast),
                csv_field(model),
                cell(c.diffs[m]),
                cell(c.cohens_d[m]),
                c.significant[m].map_or_else(String::new, |s| s.to_string()),
                trend
            );
        }
    }
    out
}

/// Console table of contrast effects side by side
pub fn format_comparison_table(comparison: &ModelComparison) -> String {
    let mut out = String::new();
    let _ = write!(out, "{:<16} {:<34}", "Family", "Contrast");
    for m in 0..comparison.models.len() {
        let _ = write!(out, " {:>10}", format!("M{}", m + 1));
    }
    let _ = writeln!(out, " {:>12}", "Trend");
    for c in &comparison.contrasts {
        let _ = write!(out, "{:<16} {:<34}", c.cue_family, c.contrast);
        for (diff, sig) in c.diffs.iter().zip(&c.significant) {
            let marker = if *sig == Some(true) { "*" } else { " " };
            match diff {
                Some(d) => {
                    let _ = write!(out, " {:>+9.4}{marker}", d);
                }
                None => {
                    let _ = write!(out, " {:>10}", "-");
                }
            }
        }
        let _ = writeln!(out, " {:>12}", c.trend.map_or("-", EffectTrend::as_str));
    }
    for (m, (model, overall)) in comparison.models.iter().zip(&comparison.overall).enumerate() {
        let _ = writeln!(out, "M{}: {model} (overall target mass {overall:.4})", m + 1);
    }
    out
}
