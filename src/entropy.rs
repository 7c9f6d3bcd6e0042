//! Entropy effects over sentence metrics
//!
//! Three readings of the same word-aligned scores:
//!
//! - paired condition contrasts in entropy and surprisal
//! - the same contrast split into function-word and content-word positions
//! - a per-condition gap between surprisal and entropy, large when the model
//!   commits to predictions that turn out wrong
//!
//! Word-level means can be taken over per-word token means or per-word token
//! sums; [`aggregation_robustness`] checks that the key orderings hold under
//! both.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::contrast::{cohens_d, mean, paired_t, sample_sd};
use crate::cue_families::CueRegistry;
use crate::metrics::{SentenceMetrics, SentenceRecord};
use crate::stimuli::Condition;

/// Orderings expected to hold, as (lower, higher) entropy
pub const ENTROPY_ORDERINGS: [(Condition, Condition); 3] = [
    (Condition::Sentence, Condition::FunctionScrambled),
    (Condition::Jabberwocky, Condition::FullScrambled),
    (Condition::Sentence, Condition::Jabberwocky),
];

/// How a word's token metrics are folded into one value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordAggregation {
    WordMean,
    WordSum,
}

impl WordAggregation {
    fn entropy(self, m: &SentenceMetrics) -> f64 {
        match self {
            Self::WordMean => m.mean_word_entropy,
            Self::WordSum => m.mean_word_entropy_sum,
        }
    }
}

type SetKey<'a> = (&'a str, u32);

fn by_set(records: &[SentenceRecord], condition: Condition) -> BTreeMap<SetKey<'_>, &SentenceRecord> {
    records
        .iter()
        .filter(|r| r.condition == condition)
        .map(|r| ((r.cue_family.as_str(), r.set_id), r))
        .collect()
}

/// Records of `a` and `b` joined on (family, set id)
fn paired<'a>(
    records: &'a [SentenceRecord],
    a: Condition,
    b: Condition,
) -> Vec<(&'a SentenceRecord, &'a SentenceRecord)> {
    let xs = by_set(records, a);
    let ys = by_set(records, b);
    xs.iter()
        .filter_map(|(key, x)| ys.get(key).map(|y| (*x, *y)))
        .collect()
}

/// Mean entropy and surprisal of one condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionMetrics {
    pub condition: Condition,
    pub n: usize,
    pub entropy: f64,
    pub entropy_se: f64,
    pub entropy_sum: f64,
    pub surprisal: f64,
    pub surprisal_se: f64,
    /// Surprisal minus entropy; positive when the model is confident but wrong
    pub gap: f64,
}

fn se(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        sample_sd(xs) / (xs.len() as f64).sqrt()
    }
}

/// Per-condition means in `Condition::ALL` order, skipping absent conditions
pub fn condition_metrics(records: &[SentenceRecord]) -> Vec<ConditionMetrics> {
    Condition::ALL
        .into_iter()
        .filter_map(|condition| {
            let group: Vec<&SentenceMetrics> = records
                .iter()
                .filter(|r| r.condition == condition)
                .map(|r| &r.metrics)
                .collect();
            if group.is_empty() {
                return None;
            }
            let ent: Vec<f64> = group.iter().map(|m| m.mean_word_entropy).collect();
            let sums: Vec<f64> = group.iter().map(|m| m.mean_word_entropy_sum).collect();
            let sur: Vec<f64> = group.iter().map(|m| m.mean_word_surprisal).collect();
            Some(ConditionMetrics {
                condition,
                n: group.len(),
                entropy: mean(&ent),
                entropy_se: se(&ent),
                entropy_sum: mean(&sums),
                surprisal: mean(&sur),
                surprisal_se: se(&sur),
                gap: mean(&sur) - mean(&ent),
            })
        })
        .collect()
}

/// Paired difference `a - b` in entropy and surprisal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropyEffect {
    pub cond_a: Condition,
    pub cond_b: Condition,
    pub n: usize,
    pub delta_entropy: f64,
    pub delta_surprisal: f64,
    pub cohens_d_entropy: f64,
    pub cohens_d_surprisal: f64,
    pub p_entropy: f64,
}

/// Paired entropy effect; `None` without matched sets
pub fn entropy_effect(records: &[SentenceRecord], a: Condition, b: Condition) -> Option<EntropyEffect> {
    let pairs = paired(records, a, b);
    if pairs.is_empty() {
        return None;
    }
    let d_ent: Vec<f64> = pairs
        .iter()
        .map(|(x, y)| x.metrics.mean_word_entropy - y.metrics.mean_word_entropy)
        .collect();
    let d_sur: Vec<f64> = pairs
        .iter()
        .map(|(x, y)| x.metrics.mean_word_surprisal - y.metrics.mean_word_surprisal)
        .collect();
    let p_entropy = paired_t(&d_ent).map(|(_, p)| p).unwrap_or(f64::NAN);
    Some(EntropyEffect {
        cond_a: a,
        cond_b: b,
        n: pairs.len(),
        delta_entropy: mean(&d_ent),
        delta_surprisal: mean(&d_sur),
        cohens_d_entropy: cohens_d(&d_ent),
        cohens_d_surprisal: cohens_d(&d_sur),
        p_entropy,
    })
}

/// Mean deltas over word positions of one kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionDelta {
    pub n: usize,
    pub delta_entropy: f64,
    pub delta_surprisal: f64,
}

/// `a - b` deltas at function-word and content-word positions of `a`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSplit {
    pub function: PositionDelta,
    pub content: PositionDelta,
}

/// Compare word positions of `a` and `b` index by index.
///
/// A position counts as a function-word position when the word of `a` there
/// is a function word of `registry`.
pub fn position_split(
    records: &[SentenceRecord],
    registry: &CueRegistry,
    a: Condition,
    b: Condition,
) -> PositionSplit {
    let mut function = (Vec::new(), Vec::new());
    let mut content = (Vec::new(), Vec::new());
    for (x, y) in paired(records, a, b) {
        for wa in &x.metrics.words {
            let Some(wb) = y.metrics.words.iter().find(|w| w.index == wa.index) else {
                continue;
            };
            let bucket = if registry.is_function_word(&wa.word) {
                &mut function
            } else {
                &mut content
            };
            bucket.0.push(wa.entropy_mean - wb.entropy_mean);
            bucket.1.push(wa.surprisal_mean - wb.surprisal_mean);
        }
    }
    let delta = |(ent, sur): (Vec<f64>, Vec<f64>)| PositionDelta {
        n: ent.len(),
        delta_entropy: mean(&ent),
        delta_surprisal: mean(&sur),
    };
    PositionSplit {
        function: delta(function),
        content: delta(content),
    }
}

/// Whether `lower < higher` holds under both word aggregations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderingCheck {
    pub lower: Condition,
    pub higher: Condition,
    pub diff_word_mean: f64,
    pub diff_word_sum: f64,
    pub holds_word_mean: bool,
    pub holds_word_sum: bool,
}

impl OrderingCheck {
    pub fn agrees(&self) -> bool {
        self.holds_word_mean == self.holds_word_sum
    }
}

fn condition_mean(records: &[SentenceRecord], condition: Condition, agg: WordAggregation) -> Option<f64> {
    let values: Vec<f64> = records
        .iter()
        .filter(|r| r.condition == condition)
        .map(|r| agg.entropy(&r.metrics))
        .collect();
    (!values.is_empty()).then(|| mean(&values))
}

/// Check each (lower, higher) ordering under word-mean and word-sum entropy.
///
/// Orderings with a missing condition are left out.
pub fn aggregation_robustness(
    records: &[SentenceRecord],
    orderings: &[(Condition, Condition)],
) -> Vec<OrderingCheck> {
    orderings
        .iter()
        .filter_map(|&(lower, higher)| {
            let m = |c, agg| condition_mean(records, c, agg);
            let diff_word_mean =
                m(higher, WordAggregation::WordMean)? - m(lower, WordAggregation::WordMean)?;
            let diff_word_sum =
                m(higher, WordAggregation::WordSum)? - m(lower, WordAggregation::WordSum)?;
            Some(OrderingCheck {
                lower,
                higher,
                diff_word_mean,
                diff_word_sum,
                holds_word_mean: diff_word_mean > 0.0,
                holds_word_sum: diff_word_sum > 0.0,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::WordScore;

    fn word(index: usize, w: &str, entropy: f64, surprisal: f64, n_tokens: usize) -> WordScore {
        WordScore {
            index,
            word: w.into(),
            n_tokens,
            entropy_mean: entropy,
            entropy_sum: entropy * n_tokens as f64,
            surprisal_mean: surprisal,
            surprisal_sum: surprisal * n_tokens as f64,
        }
    }

    fn record(set_id: u32, condition: Condition, words: Vec<WordScore>) -> SentenceRecord {
        let n = words.len() as f64;
        let avg = |f: fn(&WordScore) -> f64| words.iter().map(f).sum::<f64>() / n;
        SentenceRecord {
            set_id,
            cue_family: "modals".into(),
            condition,
            text: words.iter().map(|w| w.word.as_str()).collect::<Vec<_>>().join(" "),
            metrics: SentenceMetrics {
                n_tokens: words.iter().map(|w| w.n_tokens).sum(),
                n_words: words.len(),
                token_entropies: vec![],
                token_surprisals: vec![],
                mean_token_entropy: 0.0,
                mean_token_surprisal: 0.0,
                mean_word_entropy: avg(|w| w.entropy_mean),
                mean_word_entropy_sum: avg(|w| w.entropy_sum),
                mean_word_surprisal: avg(|w| w.surprisal_mean),
                mean_word_surprisal_sum: avg(|w| w.surprisal_sum),
                words,
            },
        }
    }

    fn records() -> Vec<SentenceRecord> {
        (1..=4)
            .flat_map(|i| {
                let jitter = i as f64 * 0.1;
                [
                    record(
                        i,
                        Condition::Jabberwocky,
                        vec![word(0, "the", 2.0 + jitter, 3.0, 1), word(1, "blick", 6.0, 12.0, 3)],
                    ),
                    record(
                        i,
                        Condition::FullScrambled,
                        vec![word(0, "blick", 5.0, 9.0, 1), word(1, "the", 7.0 - jitter, 12.5, 3)],
                    ),
                ]
            })
            .collect()
    }

    #[test]
    fn test_condition_metrics_gap() {
        let rows = condition_metrics(&records());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].condition, Condition::Jabberwocky);
        assert_eq!(rows[0].n, 4);
        assert!((rows[0].entropy - 4.125).abs() < 1e-9);
        assert!((rows[0].gap - (7.5 - 4.125)).abs() < 1e-9);
        assert!(rows[0].entropy_sum > rows[0].entropy);
    }

    #[test]
    fn test_entropy_effect_is_paired() {
        let effect = entropy_effect(&records(), Condition::Jabberwocky, Condition::FullScrambled).unwrap();
        assert_eq!(effect.n, 4);
        assert!(effect.delta_entropy < 0.0);
        assert!(effect.cohens_d_entropy < 0.0);
        assert!(effect.p_entropy < 0.05);
        assert!(entropy_effect(&records(), Condition::Sentence, Condition::Jabberwocky).is_none());
    }

    #[test]
    fn test_position_split_uses_first_condition_words() {
        let registry = CueRegistry::standard().unwrap();
        let split = position_split(&records(), &registry, Condition::Jabberwocky, Condition::FullScrambled);
        assert_eq!(split.function.n, 4);
        assert_eq!(split.content.n, 4);
        // "the" at position 0 of the jabberwocky against "blick" in the scramble
        assert!((split.function.delta_entropy - (2.25 - 5.0)).abs() < 1e-9);
        assert!((split.content.delta_entropy - (6.0 - 6.75)).abs() < 1e-9);
    }

    #[test]
    fn test_aggregation_robustness_detects_disagreement() {
        let checks = aggregation_robustness(
            &records(),
            &[(Condition::Jabberwocky, Condition::FullScrambled)],
        );
        assert_eq!(checks.len(), 1);
        assert!(checks[0].holds_word_mean && checks[0].holds_word_sum);
        assert!(checks[0].agrees());

        // multi-token content word flips the sum ordering only
        let mut flipped = records();
        for r in flipped.iter_mut().filter(|r| r.condition == Condition::FullScrambled) {
            r.metrics.mean_word_entropy_sum = 1.0;
        }
        let checks = aggregation_robustness(
            &flipped,
            &[(Condition::Jabberwocky, Condition::FullScrambled)],
        );
        assert!(checks[0].holds_word_mean && !checks[0].holds_word_sum);
        assert!(!checks[0].agrees());

        assert!(aggregation_robustness(&records(), &ENTROPY_ORDERINGS[..1]).is_empty());
    }
}
