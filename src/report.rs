//! Audit and contrast output files, plus console tables

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditConfig, AuditRecord, AuditRun, ContextLength, CueSearch};
use crate::contrast::{AblationRow, ConditionSummary, ContrastResult, KeyFinding, RobustnessRow};
use crate::entropy::{ConditionMetrics, EntropyEffect, OrderingCheck, PositionSplit};
use crate::error::SkipReason;
use crate::normalize::Normalization;
use crate::stimuli::Condition;

/// Header block of an audit output file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditMetadata {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    pub stimuli_file: String,
    /// RFC 3339
    pub timestamp: String,
    pub context_lengths: Vec<ContextLength>,
    pub top_k: usize,
    pub strategy: String,
    #[serde(default)]
    pub cue_search: CueSearch,
    pub num_stimuli: usize,
    pub num_results: usize,
    #[serde(default)]
    pub points_attempted: usize,
    #[serde(default)]
    pub skips: BTreeMap<SkipReason, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalization: Option<Normalization>,
}

impl AuditMetadata {
    pub fn new(
        model: &str,
        architecture: Option<String>,
        stimuli_file: &str,
        config: &AuditConfig,
        strategy: &str,
        num_stimuli: usize,
        run: &AuditRun,
    ) -> Self {
        Self {
            model: model.to_string(),
            architecture,
            stimuli_file: stimuli_file.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            context_lengths: config.context_lengths.clone(),
            top_k: config.top_k,
            strategy: strategy.to_string(),
            cue_search: config.cue_search,
            num_stimuli,
            num_results: run.records.len(),
            points_attempted: run.points_attempted,
            skips: run.skips.clone(),
            normalization: config.normalization,
        }
    }
}

/// Complete audit output document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditOutput {
    pub metadata: AuditMetadata,
    pub results: Vec<AuditRecord>,
}

impl AuditOutput {
    /// Write as pretty JSON, creating the parent directory if needed
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write audit results to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read audit results from {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Malformed audit results in {}", path.display()))
    }
}

const CONTRAST_HEADER: &str = "cue_family,contrast,mean_a,mean_b,diff,t_stat,p_value,\
p_adjusted,significant,cohens_d,ci_low,ci_high,n";

pub(crate) fn csv_field(s: &str) -> String {
    if s.contains(|c: char| matches!(c, ',' | '"' | '\n')) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Contrast table as CSV text
pub fn contrasts_csv(results: &[ContrastResult]) -> String {
    let mut out = String::from(CONTRAST_HEADER);
    out.push('\n');
    for r in results {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{},{},{}",
            csv_field(&r.cue_family),
            csv_field(&r.contrast),
            r.mean_a,
            r.mean_b,
            r.diff,
            r.t_stat,
            r.p_value,
            r.p_adjusted,
            r.significant,
            r.cohens_d,
            r.ci_low,
            r.ci_high,
            r.n
        );
    }
    out
}

/// Family × condition mean table as CSV text (one column per condition present)
pub fn summary_csv(rows: &[ConditionSummary]) -> String {
    let conditions: Vec<Condition> = Condition::ALL
        .into_iter()
        .filter(|c| rows.iter().any(|r| r.condition == *c))
        .collect();
    let mut families: Vec<&str> = Vec::new();
    for r in rows {
        if !families.contains(&r.cue_family.as_str()) {
            families.push(r.cue_family.as_str());
        }
    }

    let mut out = String::from("cue_family");
    for c in &conditions {
        let _ = write!(out, ",{c}");
    }
    out.push('\n');
    for family in families {
        out.push_str(&csv_field(family));
        for c in &conditions {
            match rows
                .iter()
                .find(|r| r.cue_family == family && r.condition == *c)
            {
                Some(r) => {
                    let _ = write!(out, ",{}", r.mean);
                }
                None => out.push(','),
            }
        }
        out.push('\n');
    }
    out
}

/// Context ablation rows as CSV text
pub fn ablation_csv(rows: &[AblationRow]) -> String {
    let mut out = String::from("condition,cue_family,context_k,mean,n\n");
    for r in rows {
        let _ = writeln!(
            out,
            "{},{},{},{},{}",
            r.condition,
            csv_field(&r.cue_family),
            r.context_k,
            r.mean,
            r.n
        );
    }
    out
}

/// Paths written by [`write_contrast_outputs`]
#[derive(Debug, Clone)]
pub struct ContrastFiles {
    pub contrasts_csv: PathBuf,
    pub contrasts_json: PathBuf,
    pub summary_csv: PathBuf,
    pub ablation_csv: PathBuf,
}

impl ContrastFiles {
    pub fn for_prefix(prefix: &str) -> Self {
        Self {
            contrasts_csv: PathBuf::from(format!("{prefix}_contrasts.csv")),
            contrasts_json: PathBuf::from(format!("{prefix}_contrasts.json")),
            summary_csv: PathBuf::from(format!("{prefix}_summary.csv")),
            ablation_csv: PathBuf::from(format!("{prefix}_ablation.csv")),
        }
    }
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

/// Write the contrast CSV and JSON plus the summary and ablation tables
pub fn write_contrast_outputs(
    prefix: &str,
    results: &[ContrastResult],
    summary: &[ConditionSummary],
    ablation: &[AblationRow],
) -> Result<ContrastFiles> {
    let files = ContrastFiles::for_prefix(prefix);
    write_text(&files.contrasts_csv, &contrasts_csv(results))?;
    write_text(
        &files.contrasts_json,
        &serde_json::to_string_pretty(results)?,
    )?;
    write_text(&files.summary_csv, &summary_csv(summary))?;
    write_text(&files.ablation_csv, &ablation_csv(ablation))?;
    Ok(files)
}

/// Fixed-width table of family × condition means
pub fn format_summary_table(rows: &[ConditionSummary]) -> String {
    let conditions: Vec<Condition> = Condition::ALL
        .into_iter()
        .filter(|c| rows.iter().any(|r| r.condition == *c))
        .collect();
    let mut out = format!("{:<18}", "family");
    for c in &conditions {
        let _ = write!(out, "{:>9}", c.short_label());
    }
    out.push('\n');

    let mut families: Vec<&str> = Vec::new();
    for r in rows {
        if !families.contains(&r.cue_family.as_str()) {
            families.push(r.cue_family.as_str());
        }
    }
    for family in families {
        let _ = write!(out, "{family:<18}");
        for c in &conditions {
            match rows
                .iter()
                .find(|r| r.cue_family == family && r.condition == *c)
            {
                Some(r) => {
                    let _ = write!(out, "{:>9.3}", r.mean);
                }
                None => {
                    let _ = write!(out, "{:>9}", "-");
                }
            }
        }
        out.push('\n');
    }
    out
}

/// Fixed-width table of contrast results
pub fn format_contrast_table(results: &[ContrastResult]) -> String {
    let mut out = format!(
        "{:<18}{:<38}{:>9}{:>9}{:>9}{:>10}{:>10}{:>8}  sig\n",
        "family", "contrast", "diff", "ci_low", "ci_high", "p", "p_adj", "d"
    );
    for r in results {
        let _ = writeln!(
            out,
            "{:<18}{:<38}{:>9.4}{:>9.4}{:>9.4}{:>10.4}{:>10.4}{:>8.3}  {}",
            r.cue_family,
            r.contrast,
            r.diff,
            r.ci_low,
            r.ci_high,
            r.p_value,
            r.p_adjusted,
            r.cohens_d,
            if r.significant { "*" } else { "" }
        );
    }
    out
}

pub fn format_key_findings(findings: &[KeyFinding]) -> String {
    let mut out = String::new();
    for f in findings {
        let _ = writeln!(
            out,
            "{}:\n  Significant families: {}/{}\n  Average difference: {:.4}\n  Average Cohen's d: {:.3}\n",
            f.contrast, f.significant_families, f.total_families, f.mean_diff, f.mean_cohens_d
        );
    }
    out
}

/// Fixed-width ablation table for one condition, one column per context length
pub fn format_ablation_table(rows: &[AblationRow], condition: Condition) -> String {
    let rows: Vec<&AblationRow> = rows.iter().filter(|r| r.condition == condition).collect();
    let mut ks: Vec<ContextLength> = rows
        .iter()
        .filter_map(|r| r.context_k.parse().ok())
        .collect();
    ks.sort();
    ks.dedup();

    let mut out = format!("{:<18}", "family");
    for k in &ks {
        let _ = write!(out, "{:>8}", k.label());
    }
    out.push('\n');

    let mut families: Vec<&str> = Vec::new();
    for r in &rows {
        if !families.contains(&r.cue_family.as_str()) {
            families.push(r.cue_family.as_str());
        }
    }
    for family in families {
        let _ = write!(out, "{family:<18}");
        for k in &ks {
            let label = k.label();
            match rows
                .iter()
                .find(|r| r.cue_family == family && r.context_k == label)
            {
                Some(r) => {
                    let _ = write!(out, "{:>8.3}", r.mean);
                }
                None => {
                    let _ = write!(out, "{:>8}", "-");
                }
            }
        }
        out.push('\n');
    }
    out
}

/// Set-aggregation robustness rows as CSV text
pub fn robustness_csv(rows: &[RobustnessRow]) -> String {
    let mut out = String::from(
        "cue_family,contrast,aggregation,alternative,diff,diff_alternative,\
significant,significant_alternative,direction_agrees\n",
    );
    for r in rows {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{}",
            csv_field(&r.cue_family),
            csv_field(&r.contrast),
            r.aggregation,
            r.alternative,
            r.diff,
            r.diff_alternative,
            r.significant,
            r.significant_alternative,
            r.direction_agrees()
        );
    }
    out
}

/// Fixed-width table of contrast diffs under two set aggregations
pub fn format_robustness_table(rows: &[RobustnessRow]) -> String {
    let Some(first) = rows.first() else {
        return String::from("(no contrasts)\n");
    };
    let mut out = format!(
        "{:<18}{:<38}{:>10}{:>10}  agree\n",
        "family", "contrast", first.aggregation, first.alternative
    );
    for r in rows {
        let _ = writeln!(
            out,
            "{:<18}{:<38}{:>10.4}{:>10.4}  {}",
            r.cue_family,
            r.contrast,
            r.diff,
            r.diff_alternative,
            if r.direction_agrees() { "yes" } else { "NO" }
        );
    }
    let agreeing = rows.iter().filter(|r| r.direction_agrees()).count();
    let _ = writeln!(out, "{agreeing}/{} contrasts keep their direction", rows.len());
    out
}

/// Per-condition entropy, surprisal and their gap
pub fn format_condition_metrics(rows: &[ConditionMetrics]) -> String {
    let mut out = format!(
        "{:<20}{:>10}{:>10}{:>11}{:>10}{:>6}\n",
        "condition", "entropy", "ent_sum", "surprisal", "gap", "n"
    );
    for r in rows {
        let _ = writeln!(
            out,
            "{:<20}{:>10.3}{:>10.3}{:>11.3}{:>10.3}{:>6}",
            r.condition.as_str(),
            r.entropy,
            r.entropy_sum,
            r.surprisal,
            r.gap,
            r.n
        );
    }
    out
}

pub fn format_entropy_effect(effect: &EntropyEffect, split: &PositionSplit) -> String {
    format!(
        "{} - {} (n={}):\n  \u{0394} entropy:   {:+.3} bits (d = {:.3}, p = {:.2e})\n  \
\u{0394} surprisal: {:+.3} bits (d = {:.3})\n  function-word positions: \u{0394}H {:+.3}, \
\u{0394}S {:+.3} (n={})\n  content-word positions:  \u{0394}H {:+.3}, \u{0394}S {:+.3} (n={})\n",
        effect.cond_a,
        effect.cond_b,
        effect.n,
        effect.delta_entropy,
        effect.cohens_d_entropy,
        effect.p_entropy,
        effect.delta_surprisal,
        effect.cohens_d_surprisal,
        split.function.delta_entropy,
        split.function.delta_surprisal,
        split.function.n,
        split.content.delta_entropy,
        split.content.delta_surprisal,
        split.content.n,
    )
}

/// Word-mean vs word-sum ordering checks
pub fn format_ordering_checks(checks: &[OrderingCheck]) -> String {
    let mut out = String::new();
    for c in checks {
        let _ = writeln!(
            out,
            "{} < {}: word-mean {:+.4} ({}), word-sum {:+.4} ({}), agreement: {}",
            c.lower,
            c.higher,
            c.diff_word_mean,
            if c.holds_word_mean { "holds" } else { "fails" },
            c.diff_word_sum,
            if c.holds_word_sum { "holds" } else { "fails" },
            if c.agrees() { "yes" } else { "NO" }
        );
    }
    out
}
