//! Statistical contrasts over audit records
//!
//! Pairs usable records of two conditions by stimulus set, then reports the
//! paired t-test, Cohen's d and a bootstrap confidence interval of the mean
//! difference. Raw p-values are corrected with Benjamini-Hochberg across
//! every contrast of one analysis.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use tracing::{debug, info};

use crate::audit::{AuditRecord, ContextLength};
use crate::error::AuditError;
use crate::stimuli::Condition;

/// Fewest matched pairs a contrast is computed on
pub const MIN_PAIRS: usize = 3;

/// The key paired contrasts, as (A, B) for A − B
pub const DEFAULT_CONTRASTS: [(Condition, Condition); 5] = [
    (Condition::Sentence, Condition::Jabberwocky),
    (Condition::Jabberwocky, Condition::FullScrambled),
    (Condition::Jabberwocky, Condition::ContentScrambled),
    (Condition::Jabberwocky, Condition::FunctionScrambled),
    (Condition::Jabberwocky, Condition::CueDeleted),
];

/// How the records of repeated cue occurrences in one stimulus set are
/// combined into the set's value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetAggregation {
    #[default]
    Mean,
    /// The occurrence closest to the start of the text
    First,
    Median,
}

impl SetAggregation {
    fn combine(self, occurrences: Vec<(usize, f64)>) -> f64 {
        match self {
            Self::Mean => {
                occurrences.iter().map(|o| o.1).sum::<f64>() / occurrences.len() as f64
            }
            Self::First => occurrences
                .iter()
                .min_by_key(|o| o.0)
                .map_or(f64::NAN, |o| o.1),
            Self::Median => {
                let mut values: Vec<f64> = occurrences.into_iter().map(|o| o.1).collect();
                values.sort_by(f64::total_cmp);
                percentile(&values, 50.0)
            }
        }
    }
}

impl fmt::Display for SetAggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Mean => "mean",
            Self::First => "first",
            Self::Median => "median",
        })
    }
}

impl FromStr for SetAggregation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mean" => Ok(Self::Mean),
            "first" => Ok(Self::First),
            "median" => Ok(Self::Median),
            other => anyhow::bail!("unknown set aggregation `{other}` (expected mean, first or median)"),
        }
    }
}

/// Configuration for contrast analysis
#[derive(Debug, Clone)]
pub struct ContrastConfig {
    /// Context length the contrasts are computed at
    pub context: ContextLength,
    pub aggregation: SetAggregation,
    /// Significance level for FDR decisions and CI width
    pub alpha: f64,
    pub n_bootstrap: usize,
    pub seed: u64,
    pub contrasts: Vec<(Condition, Condition)>,
}

impl Default for ContrastConfig {
    fn default() -> Self {
        Self {
            context: ContextLength::Full,
            aggregation: SetAggregation::Mean,
            alpha: 0.05,
            n_bootstrap: 10_000,
            seed: 42,
            contrasts: DEFAULT_CONTRASTS.to_vec(),
        }
    }
}

/// Label of a contrast, e.g. `JABBERWOCKY - CUE_DELETED`
pub fn contrast_label(a: Condition, b: Condition) -> String {
    format!("{a} - {b}")
}

/// One paired comparison within a cue family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContrastResult {
    pub cue_family: String,
    pub contrast: String,
    pub cond_a: Condition,
    pub cond_b: Condition,
    pub mean_a: f64,
    pub mean_b: f64,
    pub diff: f64,
    pub t_stat: f64,
    pub p_value: f64,
    pub p_adjusted: f64,
    pub significant: bool,
    pub cohens_d: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    pub n: usize,
}

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample standard deviation (ddof = 1); 0 for fewer than two values
pub fn sample_sd(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let ss: f64 = xs.iter().map(|x| (x - m).powi(2)).sum();
    (ss / (xs.len() - 1) as f64).sqrt()
}

/// Two-sided paired t-test on differences, returning `(t, p)`.
///
/// A zero standard deviation gives `(0, 1)` when the mean difference is
/// zero and `(±inf, 0)` otherwise.
pub fn paired_t(diffs: &[f64]) -> Result<(f64, f64), AuditError> {
    let n = diffs.len();
    if n < 2 {
        return Ok((0.0, 1.0));
    }
    let m = mean(diffs);
    let sd = sample_sd(diffs);
    if sd == 0.0 {
        return Ok(if m == 0.0 {
            (0.0, 1.0)
        } else {
            (m.signum() * f64::INFINITY, 0.0)
        });
    }

    let t = m / (sd / (n as f64).sqrt());
    let dist = StudentsT::new(0.0, 1.0, (n - 1) as f64).map_err(|e| {
        AuditError::UnstableNumerics {
            detail: format!("Student's t with df={}: {e}", n - 1),
        }
    })?;
    let p = 2.0 * dist.sf(t.abs());
    Ok((t, p.clamp(0.0, 1.0)))
}

/// Paired Cohen's d: mean difference over its sample standard deviation
pub fn cohens_d(diffs: &[f64]) -> f64 {
    let sd = sample_sd(diffs);
    if sd > 0.0 {
        mean(diffs) / sd
    } else {
        0.0
    }
}

/// Percentile of sorted data with linear interpolation between order statistics
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = (q / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

/// Percentile bootstrap CI of the mean at level `1 - alpha`
pub fn bootstrap_ci(data: &[f64], n_bootstrap: usize, alpha: f64, seed: u64) -> (f64, f64) {
    if data.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    if n_bootstrap == 0 {
        let m = mean(data);
        return (m, m);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let n = data.len();
    let mut means: Vec<f64> = (0..n_bootstrap)
        .map(|_| (0..n).map(|_| data[rng.gen_range(0..n)]).sum::<f64>() / n as f64)
        .collect();
    means.sort_by(f64::total_cmp);

    (
        percentile(&means, alpha / 2.0 * 100.0),
        percentile(&means, (1.0 - alpha / 2.0) * 100.0),
    )
}

/// Benjamini-Hochberg adjusted p-values, in input order
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    let n = p_values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let mut adjusted = vec![0.0; n];
    let mut running = f64::INFINITY;
    for (rank, &i) in order.iter().enumerate().rev() {
        let scaled = p_values[i] * n as f64 / (rank + 1) as f64;
        running = running.min(scaled);
        adjusted[i] = running.min(1.0);
    }
    adjusted
}

/// Correct every result as one family and set `significant`
pub fn apply_fdr(results: &mut [ContrastResult], alpha: f64) {
    let raw: Vec<f64> = results.iter().map(|r| r.p_value).collect();
    for (r, p) in results.iter_mut().zip(benjamini_hochberg(&raw)) {
        r.p_adjusted = p;
        r.significant = p < alpha;
    }
}

/// Correct separately within each group sharing a key
pub fn apply_fdr_by<K, F>(results: &mut [ContrastResult], alpha: f64, key: F)
where
    K: Ord,
    F: Fn(&ContrastResult) -> K,
{
    let mut groups: BTreeMap<K, Vec<usize>> = BTreeMap::new();
    for (i, r) in results.iter().enumerate() {
        groups.entry(key(r)).or_default().push(i);
    }
    for indices in groups.values() {
        let raw: Vec<f64> = indices.iter().map(|&i| results[i].p_value).collect();
        for (&i, p) in indices.iter().zip(benjamini_hochberg(&raw)) {
            results[i].p_adjusted = p;
            results[i].significant = p < alpha;
        }
    }
}

/// Target mass per stimulus set for one (family, condition, context), with
/// repeated cue occurrences combined by `aggregation`
fn per_set(
    records: &[AuditRecord],
    family: &str,
    condition: Condition,
    context: &str,
    aggregation: SetAggregation,
) -> BTreeMap<u32, f64> {
    let mut acc: BTreeMap<u32, Vec<(usize, f64)>> = BTreeMap::new();
    for r in records.iter().filter(|r| {
        r.usable && r.cue_family == family && r.condition == condition && r.context_k == context
    }) {
        acc.entry(r.set_id)
            .or_default()
            .push((r.cue_index, r.mass.target_mass));
    }
    acc.into_iter()
        .map(|(id, occurrences)| (id, aggregation.combine(occurrences)))
        .collect()
}

/// Matched `(a, b)` target masses joined on set id
pub fn pair_records(
    records: &[AuditRecord],
    family: &str,
    a: Condition,
    b: Condition,
    context: ContextLength,
    aggregation: SetAggregation,
) -> Vec<(f64, f64)> {
    let label = context.label();
    let xs = per_set(records, family, a, &label, aggregation);
    let ys = per_set(records, family, b, &label, aggregation);
    xs.iter()
        .filter_map(|(id, x)| ys.get(id).map(|y| (*x, *y)))
        .collect()
}

/// Mean target mass of one family under one condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSummary {
    pub cue_family: String,
    pub condition: Condition,
    pub mean: f64,
    pub sd: f64,
    pub se: f64,
    pub n: usize,
}

/// Mean target mass per context length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AblationRow {
    pub condition: Condition,
    pub cue_family: String,
    pub context_k: String,
    pub mean: f64,
    pub n: usize,
}

/// Roll-up of one contrast across families
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFinding {
    pub contrast: String,
    pub significant_families: usize,
    pub total_families: usize,
    pub mean_diff: f64,
    pub mean_cohens_d: f64,
}

/// Everything one analysis call produces
#[derive(Debug, Clone, Default)]
pub struct ContrastReport {
    pub results: Vec<ContrastResult>,
    /// Contrasts left out for lack of pairs
    pub omitted: Vec<AuditError>,
}

/// Cue families in order of first appearance
fn families_of(records: &[AuditRecord]) -> Vec<&str> {
    let mut seen = Vec::new();
    for r in records {
        if !seen.contains(&r.cue_family.as_str()) {
            seen.push(r.cue_family.as_str());
        }
    }
    seen
}

/// Paired contrasts and descriptive summaries over audit records
pub struct ContrastEngine {
    config: ContrastConfig,
}

impl ContrastEngine {
    pub fn new(config: ContrastConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContrastConfig {
        &self.config
    }

    /// One contrast for one family, before FDR correction
    pub fn contrast(
        &self,
        records: &[AuditRecord],
        family: &str,
        a: Condition,
        b: Condition,
    ) -> Result<ContrastResult, AuditError> {
        let pairs = pair_records(
            records,
            family,
            a,
            b,
            self.config.context,
            self.config.aggregation,
        );
        let label = contrast_label(a, b);
        if pairs.len() < MIN_PAIRS {
            return Err(AuditError::InsufficientPairs {
                family: family.to_string(),
                label,
                n: pairs.len(),
                min: MIN_PAIRS,
            });
        }

        let xs: Vec<f64> = pairs.iter().map(|p| p.0).collect();
        let ys: Vec<f64> = pairs.iter().map(|p| p.1).collect();
        let diffs: Vec<f64> = pairs.iter().map(|(x, y)| x - y).collect();

        let (t_stat, p_value) = paired_t(&diffs)?;
        let (ci_low, ci_high) = bootstrap_ci(
            &diffs,
            self.config.n_bootstrap,
            self.config.alpha,
            self.config.seed,
        );

        Ok(ContrastResult {
            cue_family: family.to_string(),
            contrast: label,
            cond_a: a,
            cond_b: b,
            mean_a: mean(&xs),
            mean_b: mean(&ys),
            diff: mean(&diffs),
            t_stat,
            p_value,
            p_adjusted: p_value,
            significant: false,
            cohens_d: cohens_d(&diffs),
            ci_low,
            ci_high,
            n: pairs.len(),
        })
    }

    /// Every configured contrast for every family, FDR-corrected together
    pub fn run(&self, records: &[AuditRecord]) -> ContrastReport {
        let mut report = ContrastReport::default();
        for family in families_of(records) {
            for &(a, b) in &self.config.contrasts {
                match self.contrast(records, family, a, b) {
                    Ok(result) => report.results.push(result),
                    Err(e) => {
                        debug!("omitting contrast: {e}");
                        report.omitted.push(e);
                    }
                }
            }
        }
        apply_fdr(&mut report.results, self.config.alpha);
        info!(
            "Computed {} contrasts ({} omitted), {} significant at FDR {}",
            report.results.len(),
            report.omitted.len(),
            report.results.iter().filter(|r| r.significant).count(),
            self.config.alpha
        );
        report
    }

    /// Mean, sd, se and n of per-set target mass per (family, condition).
    ///
    /// Repeated cue occurrences are first combined per set, so `n` counts sets.
    pub fn summary_table(&self, records: &[AuditRecord]) -> Vec<ConditionSummary> {
        let label = self.config.context.label();
        let mut rows = Vec::new();
        for family in families_of(records) {
            for condition in Condition::ALL {
                let values: Vec<f64> =
                    per_set(records, family, condition, &label, self.config.aggregation)
                        .into_values()
                        .collect();
                if values.is_empty() {
                    continue;
                }
                let sd = sample_sd(&values);
                rows.push(ConditionSummary {
                    cue_family: family.to_string(),
                    condition,
                    mean: mean(&values),
                    sd,
                    se: sd / (values.len() as f64).sqrt(),
                    n: values.len(),
                });
            }
        }
        rows
    }

    /// Mean target mass per (condition, family, context length)
    pub fn ablation(&self, records: &[AuditRecord]) -> Vec<AblationRow> {
        let mut acc: BTreeMap<(Condition, String, ContextLength), Vec<f64>> = BTreeMap::new();
        for r in records.iter().filter(|r| r.usable) {
            let Ok(k) = r.context_k.parse::<ContextLength>() else {
                continue;
            };
            acc.entry((r.condition, r.cue_family.clone(), k))
                .or_default()
                .push(r.mass.target_mass);
        }
        acc.into_iter()
            .map(|((condition, cue_family, k), values)| AblationRow {
                condition,
                cue_family,
                context_k: k.label(),
                mean: mean(&values),
                n: values.len(),
            })
            .collect()
    }
}

/// Per-contrast roll-up across families, in order of first appearance
pub fn key_findings(results: &[ContrastResult]) -> Vec<KeyFinding> {
    let mut labels: Vec<&str> = Vec::new();
    for r in results {
        if !labels.contains(&r.contrast.as_str()) {
            labels.push(r.contrast.as_str());
        }
    }
    labels
        .into_iter()
        .map(|label| {
            let group: Vec<&ContrastResult> =
                results.iter().filter(|r| r.contrast == label).collect();
            let diffs: Vec<f64> = group.iter().map(|r| r.diff).collect();
            let ds: Vec<f64> = group.iter().map(|r| r.cohens_d).collect();
            KeyFinding {
                contrast: label.to_string(),
                significant_families: group.iter().filter(|r| r.significant).count(),
                total_families: group.len(),
                mean_diff: mean(&diffs),
                mean_cohens_d: mean(&ds),
            }
        })
        .collect()
}

/// One contrast under the configured and an alternative set aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustnessRow {
    pub cue_family: String,
    pub contrast: String,
    pub aggregation: SetAggregation,
    pub alternative: SetAggregation,
    pub diff: f64,
    pub diff_alternative: f64,
    pub significant: bool,
    pub significant_alternative: bool,
}

impl RobustnessRow {
    /// Same direction of effect under both aggregations
    pub fn direction_agrees(&self) -> bool {
        self.diff.partial_cmp(&0.0) == self.diff_alternative.partial_cmp(&0.0)
    }
}

/// Re-run every contrast with `alternative` set aggregation and join the two
/// runs on (family, contrast)
pub fn aggregation_robustness(
    records: &[AuditRecord],
    config: &ContrastConfig,
    alternative: SetAggregation,
) -> Vec<RobustnessRow> {
    let primary = ContrastEngine::new(config.clone()).run(records);
    let other = ContrastEngine::new(ContrastConfig {
        aggregation: alternative,
        ..config.clone()
    })
    .run(records);

    let rows: Vec<RobustnessRow> = primary
        .results
        .iter()
        .filter_map(|p| {
            let o = other
                .results
                .iter()
                .find(|o| o.cue_family == p.cue_family && o.contrast == p.contrast)?;
            Some(RobustnessRow {
                cue_family: p.cue_family.clone(),
                contrast: p.contrast.clone(),
                aggregation: config.aggregation,
                alternative,
                diff: p.diff,
                diff_alternative: o.diff,
                significant: p.significant,
                significant_alternative: o.significant,
            })
        })
        .collect();
    info!(
        "Aggregation {} vs {}: {}/{} contrasts keep their direction",
        config.aggregation,
        alternative,
        rows.iter().filter(|r| r.direction_agrees()).count(),
        rows.len()
    );
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassMass, MassBuckets};

    fn record(set_id: u32, condition: Condition, k: &str, target: f64) -> AuditRecord {
        AuditRecord {
            set_id,
            condition,
            cue_family: "modals".into(),
            context_k: k.into(),
            cue_word: "can".into(),
            cue_index: 2,
            context: "the blick can".into(),
            target_class: "VERB".into(),
            mass: ClassMass {
                class_mass: BTreeMap::from([("VERB".to_string(), target)]),
                target_mass: target,
                buckets: MassBuckets::default(),
                residual: 0.0,
                word_start_entropy: 0.0,
                top_k: 10,
                word_start_tokens: 1,
                flags: vec![],
            },
            token_count: 3,
            usable: true,
        }
    }

    #[test]
    fn test_paired_t_matches_hand_computation() {
        let (t, p) = paired_t(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((t - 3.872_983_346).abs() < 1e-6);
        assert!((p - 0.030_466_29).abs() < 1e-5);
        assert!((cohens_d(&[1.0, 2.0, 3.0, 4.0]) - 1.936_491_673).abs() < 1e-6);
    }

    #[test]
    fn test_paired_t_zero_variance() {
        assert_eq!(paired_t(&[0.0, 0.0, 0.0]).unwrap(), (0.0, 1.0));
        let (t, p) = paired_t(&[0.1, 0.1, 0.1]).unwrap();
        assert!(t.is_infinite() && t > 0.0);
        assert_eq!(p, 0.0);
        assert_eq!(cohens_d(&[0.1, 0.1, 0.1]), 0.0);
    }

    #[test]
    fn test_percentile_linear_interpolation() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&sorted, 2.5) - 1.075).abs() < 1e-12);
        assert!((percentile(&sorted, 97.5) - 3.925).abs() < 1e-12);
        assert_eq!(percentile(&sorted, 50.0), 2.5);
    }

    #[test]
    fn test_bootstrap_ci() {
        let (lo, hi) = bootstrap_ci(&[0.2, 0.2, 0.2], 500, 0.05, 42);
        assert!((lo - 0.2).abs() < 1e-12 && (hi - 0.2).abs() < 1e-12);

        let data = [0.1, 0.4, 0.2, 0.5, 0.3, 0.6];
        let (lo, hi) = bootstrap_ci(&data, 2000, 0.05, 42);
        assert!(lo < mean(&data) && mean(&data) < hi);
        assert!(lo >= 0.1 && hi <= 0.6);
        assert_eq!(bootstrap_ci(&data, 2000, 0.05, 42), (lo, hi));
    }

    #[test]
    fn test_benjamini_hochberg() {
        let adj = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.005]);
        let expected = [0.02, 0.04, 0.04, 0.02];
        for (a, e) in adj.iter().zip(expected) {
            assert!((a - e).abs() < 1e-12);
        }
        assert!(benjamini_hochberg(&[]).is_empty());
        assert_eq!(benjamini_hochberg(&[0.9, 0.8]), vec![0.9, 0.9]);
    }

    #[test]
    fn test_apply_fdr_by_groups() {
        let base = ContrastResult {
            cue_family: "modals".into(),
            contrast: "A".into(),
            cond_a: Condition::Sentence,
            cond_b: Condition::Jabberwocky,
            mean_a: 0.0,
            mean_b: 0.0,
            diff: 0.0,
            t_stat: 0.0,
            p_value: 0.02,
            p_adjusted: 0.02,
            significant: false,
            cohens_d: 0.0,
            ci_low: 0.0,
            ci_high: 0.0,
            n: 3,
        };
        let mut other = base.clone();
        other.contrast = "B".into();
        other.p_value = 0.04;

        let mut together = vec![base.clone(), other.clone()];
        apply_fdr(&mut together, 0.05);
        assert!((together[0].p_adjusted - 0.04).abs() < 1e-12);

        let mut grouped = vec![base, other];
        apply_fdr_by(&mut grouped, 0.05, |r| r.contrast.clone());
        assert!((grouped[0].p_adjusted - 0.02).abs() < 1e-12);
        assert!(grouped.iter().all(|r| r.significant));
    }

    #[test]
    fn test_pairing_and_insufficient_pairs() {
        let mut records = vec![
            record(1, Condition::Sentence, "full", 0.9),
            record(2, Condition::Sentence, "full", 0.8),
            record(3, Condition::Sentence, "full", 0.7),
            record(1, Condition::Jabberwocky, "full", 0.5),
            record(2, Condition::Jabberwocky, "full", 0.6),
            record(3, Condition::Jabberwocky, "1", 0.2),
        ];
        let engine = ContrastEngine::new(ContrastConfig::default());
        let err = engine
            .contrast(&records, "modals", Condition::Sentence, Condition::Jabberwocky)
            .unwrap_err();
        assert!(matches!(err, AuditError::InsufficientPairs { n: 2, .. }));

        records.push(record(3, Condition::Jabberwocky, "full", 0.3));
        let result = engine
            .contrast(&records, "modals", Condition::Sentence, Condition::Jabberwocky)
            .unwrap();
        assert_eq!(result.n, 3);
        assert!((result.diff - (0.4 + 0.2 + 0.4) / 3.0).abs() < 1e-12);
        assert_eq!(result.contrast, "SENTENCE - JABBERWOCKY");
    }

    #[test]
    fn test_unusable_records_excluded() {
        let mut flagged = record(1, Condition::Sentence, "full", 0.9);
        flagged.usable = false;
        let records = vec![flagged];
        assert!(pair_records(
            &records,
            "modals",
            Condition::Sentence,
            Condition::Sentence,
            ContextLength::Full,
            SetAggregation::Mean
        )
        .is_empty());
    }

    #[test]
    fn test_summary_and_ablation() {
        let records = vec![
            record(1, Condition::Jabberwocky, "full", 0.2),
            record(2, Condition::Jabberwocky, "full", 0.4),
            record(1, Condition::Jabberwocky, "1", 0.1),
            record(1, Condition::Jabberwocky, "8", 0.3),
        ];
        let engine = ContrastEngine::new(ContrastConfig::default());
        let summary = engine.summary_table(&records);
        assert_eq!(summary.len(), 1);
        assert!((summary[0].mean - 0.3).abs() < 1e-12);
        assert_eq!(summary[0].n, 2);

        let ablation = engine.ablation(&records);
        let ks: Vec<&str> = ablation.iter().map(|r| r.context_k.as_str()).collect();
        assert_eq!(ks, vec!["1", "8", "full"]);
        assert!((ablation[2].mean - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_key_findings() {
        let records: Vec<AuditRecord> = (1..=5)
            .flat_map(|i| {
                let base = 0.5 + i as f64 * 0.05;
                [
                    record(i, Condition::Sentence, "full", base + 0.3),
                    record(i, Condition::Jabberwocky, "full", base - (i % 2) as f64 * 0.01),
                ]
            })
            .collect();
        let engine = ContrastEngine::new(ContrastConfig {
            n_bootstrap: 200,
            ..Default::default()
        });
        let report = engine.run(&records);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.omitted.len(), 4);
        let findings = key_findings(&report.results);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].significant_families, 1);
        assert!(findings[0].mean_diff > 0.3);
    }

    #[test]
    fn test_paired_t_large_statistic_keeps_positive_p() {
        let (t, p) = paired_t(&[10.0, 10.001, 9.999, 10.0005]).unwrap();
        assert!(t > 1e3);
        assert!(p > 0.0 && p < 1e-6);
        assert!(!p.is_nan());
    }

    fn occurrence(set_id: u32, cue_index: usize, target: f64) -> AuditRecord {
        let mut r = record(set_id, Condition::Jabberwocky, "full", target);
        r.cue_index = cue_index;
        r
    }

    #[test]
    fn test_summary_averages_sets_not_occurrences() {
        // set 1 has three cue occurrences, set 2 has one
        let records = vec![
            occurrence(1, 2, 0.1),
            occurrence(1, 5, 0.2),
            occurrence(1, 8, 0.3),
            occurrence(2, 2, 0.6),
        ];
        let engine = ContrastEngine::new(ContrastConfig::default());
        let summary = engine.summary_table(&records);
        assert_eq!(summary[0].n, 2);
        assert!((summary[0].mean - (0.2 + 0.6) / 2.0).abs() < 1e-12);

        let first = ContrastEngine::new(ContrastConfig {
            aggregation: SetAggregation::First,
            ..Default::default()
        });
        assert!((first.summary_table(&records)[0].mean - (0.1 + 0.6) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_set_aggregation_combine() {
        let occ = vec![(7, 0.9), (2, 0.1), (4, 0.2)];
        assert!((SetAggregation::Mean.combine(occ.clone()) - 0.4).abs() < 1e-12);
        assert_eq!(SetAggregation::First.combine(occ.clone()), 0.1);
        assert_eq!(SetAggregation::Median.combine(occ), 0.2);
        assert_eq!("First".parse::<SetAggregation>().unwrap(), SetAggregation::First);
        assert!("max".parse::<SetAggregation>().is_err());
    }

    #[test]
    fn test_aggregation_robustness_flags_direction_change() {
        // first occurrences favor SENTENCE; later occurrences reverse the mean
        let mut records = Vec::new();
        for i in 1..=4 {
            let jitter = i as f64 * 0.01;
            for (cond, first, later) in [
                (Condition::Sentence, 0.6 + jitter, 0.1),
                (Condition::Jabberwocky, 0.4, 0.9 - jitter),
            ] {
                let mut a = record(i, cond, "full", first);
                a.cue_index = 1;
                let mut b = record(i, cond, "full", later);
                b.cue_index = 6;
                records.extend([a, b]);
            }
        }
        let config = ContrastConfig {
            n_bootstrap: 100,
            contrasts: vec![(Condition::Sentence, Condition::Jabberwocky)],
            ..Default::default()
        };
        let rows = aggregation_robustness(&records, &config, SetAggregation::First);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].diff < 0.0);
        assert!(rows[0].diff_alternative > 0.0);
        assert!(!rows[0].direction_agrees());

        let same = aggregation_robustness(&records, &config, SetAggregation::Mean);
        assert!(same.iter().all(RobustnessRow::direction_agrees));
    }
}
