//! Constrained stimulus permutation
//!
//! Produces the scrambled and cue-deleted variants of a jabberwocky sentence
//! while holding the invariants the audit relies on:
//!
//! - every scramble is a permutation (same multiset of words)
//! - a content scramble leaves every function slot untouched, and a function
//!   scramble leaves every content slot untouched
//! - cue deletion swaps exactly one cue for a replacement at the same index
//!
//! All randomness comes from a `StdRng` built per call from an explicit seed,
//! so the same input and seed always give the same output.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cue_families::normalize_word;
use crate::error::AuditError;
use crate::stimuli::Condition;

/// Upper bound on re-draws when a shuffle returns its input unchanged
pub const MAX_SHUFFLE_ATTEMPTS: usize = 10;

/// Nonce function word substituted for the cue in CUE_DELETED
pub const DEFAULT_REPLACEMENT: &str = "ke";

/// Which slots a scramble is allowed to move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrambleMode {
    /// Every word position
    Full,
    /// Content slots only; function words stay put
    Content,
    /// Function slots only; content words stay put
    Function,
}

impl ScrambleMode {
    /// Condition produced by applying this scramble to a jabberwocky sentence
    pub fn condition(self) -> Condition {
        match self {
            Self::Full => Condition::FullScrambled,
            Self::Content => Condition::ContentScrambled,
            Self::Function => Condition::FunctionScrambled,
        }
    }
}

/// Function and content slots of a word list, in original order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotPartition {
    pub function: Vec<(usize, String)>,
    pub content: Vec<(usize, String)>,
}

impl SlotPartition {
    pub fn from_words(words: &[String], function_set: &BTreeSet<String>) -> Self {
        let mut function = Vec::new();
        let mut content = Vec::new();
        for (i, word) in words.iter().enumerate() {
            if function_set.contains(&normalize_word(word)) {
                function.push((i, word.clone()));
            } else {
                content.push((i, word.clone()));
            }
        }
        Self { function, content }
    }

    pub fn function_indices(&self) -> Vec<usize> {
        self.function.iter().map(|(i, _)| *i).collect()
    }

    pub fn content_indices(&self) -> Vec<usize> {
        self.content.iter().map(|(i, _)| *i).collect()
    }
}

/// Result of one permutation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermutationOutcome {
    pub words: Vec<String>,
    /// Output equals input (too few movable slots, or every retry came back unchanged)
    pub identity: bool,
    /// Number of shuffles drawn
    pub attempts: usize,
}

impl PermutationOutcome {
    pub fn text(&self) -> String {
        self.words.join(" ")
    }
}

/// Split a text on whitespace
pub fn split_words(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

/// Stable 64-bit seed from a key string (first 8 bytes of its SHA-256)
pub fn derive_seed(key: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Permute the slots selected by `mode`
pub fn permute(
    words: &[String],
    function_set: &BTreeSet<String>,
    mode: ScrambleMode,
    seed: u64,
) -> PermutationOutcome {
    permute_pinned(words, function_set, mode, seed, None)
}

/// Permute the slots selected by `mode`, never moving the word at `pinned`
pub fn permute_pinned(
    words: &[String],
    function_set: &BTreeSet<String>,
    mode: ScrambleMode,
    seed: u64,
    pinned: Option<usize>,
) -> PermutationOutcome {
    let movable: Vec<usize> = match mode {
        ScrambleMode::Full => (0..words.len()).collect(),
        ScrambleMode::Content => SlotPartition::from_words(words, function_set).content_indices(),
        ScrambleMode::Function => {
            SlotPartition::from_words(words, function_set).function_indices()
        }
    };
    let movable: Vec<usize> = movable
        .into_iter()
        .filter(|&i| Some(i) != pinned)
        .collect();

    let values: Vec<String> = movable.iter().map(|&i| words[i].clone()).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    let (shuffled, attempts) = shuffle_bounded(&values, &mut rng);

    let mut result = words.to_vec();
    for (&idx, word) in movable.iter().zip(shuffled) {
        result[idx] = word;
    }

    let identity = result == words;
    PermutationOutcome {
        words: result,
        identity,
        attempts,
    }
}

/// Shuffle until the order changes, at most `MAX_SHUFFLE_ATTEMPTS` times
fn shuffle_bounded(values: &[String], rng: &mut StdRng) -> (Vec<String>, usize) {
    let mut shuffled = values.to_vec();
    if values.len() <= 1 {
        return (shuffled, 0);
    }

    let mut attempts = 0;
    while attempts < MAX_SHUFFLE_ATTEMPTS {
        shuffled.shuffle(rng);
        attempts += 1;
        if shuffled != values {
            break;
        }
    }
    (shuffled, attempts)
}

/// Index of the first word matching `cue` (case-insensitive, punctuation-stripped)
pub fn find_word(words: &[String], cue: &str) -> Option<usize> {
    let target = normalize_word(cue);
    words.iter().position(|w| normalize_word(w) == target)
}

/// Number of words matching `cue`
pub fn count_word(words: &[String], cue: &str) -> usize {
    let target = normalize_word(cue);
    words.iter().filter(|w| normalize_word(w) == target).count()
}

/// Replace the first occurrence of `cue` with `replacement`.
///
/// Returns the new word list and the replaced index. Later duplicates of the
/// cue are left in place.
pub fn cue_delete(
    words: &[String],
    cue: &str,
    replacement: &str,
) -> Result<(Vec<String>, usize), AuditError> {
    let idx = find_word(words, cue).ok_or_else(|| AuditError::MissingCue {
        condition: Condition::CueDeleted,
        cue: cue.to_string(),
    })?;
    let mut result = words.to_vec();
    result[idx] = replacement.to_string();
    Ok((result, idx))
}

fn multiset(words: &[String]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for w in words {
        *counts.entry(w.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Both lists hold the same words with the same multiplicities
pub fn verify_multiset(before: &[String], after: &[String]) -> Result<(), AuditError> {
    if before.len() != after.len() || multiset(before) != multiset(after) {
        return Err(AuditError::InvariantViolation(format!(
            "word multiset changed: `{}` -> `{}`",
            before.join(" "),
            after.join(" ")
        )));
    }
    Ok(())
}

/// Every index in `fixed` holds the same word before and after
pub fn verify_fixed_slots(
    before: &[String],
    after: &[String],
    fixed: &[usize],
) -> Result<(), AuditError> {
    for &i in fixed {
        if before.get(i) != after.get(i) {
            return Err(AuditError::InvariantViolation(format!(
                "slot {i} moved: `{}` -> `{}`",
                before.join(" "),
                after.join(" ")
            )));
        }
    }
    Ok(())
}

/// Zero occurrences of `cue`, exactly one `replacement`, located at `index`
pub fn verify_cue_deleted(
    words: &[String],
    cue: &str,
    replacement: &str,
    index: usize,
) -> Result<(), AuditError> {
    let cues = count_word(words, cue);
    let replacements = count_word(words, replacement);
    let at_index = words
        .get(index)
        .is_some_and(|w| normalize_word(w) == normalize_word(replacement));

    if cues != 0 || replacements != 1 || !at_index {
        return Err(AuditError::InvariantViolation(format!(
            "cue deletion of `{cue}` -> `{replacement}` at {index} not clean in `{}` \
             (cues={cues}, replacements={replacements})",
            words.join(" ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cue_families::CueRegistry;

    fn words(text: &str) -> Vec<String> {
        split_words(text)
    }

    const SCIENTIST: &str = "the scientist decided to study the ancient artifacts";

    #[test]
    fn test_slot_partition() {
        let registry = CueRegistry::standard().unwrap();
        let slots = SlotPartition::from_words(&words(SCIENTIST), registry.function_words());
        assert_eq!(slots.function_indices(), vec![0, 2, 3, 5]);
        assert_eq!(slots.content_indices(), vec![1, 4, 6, 7]);
    }

    #[test]
    fn test_full_scramble_preserves_multiset() {
        let registry = CueRegistry::standard().unwrap();
        let input = words(SCIENTIST);
        let out = permute(&input, registry.function_words(), ScrambleMode::Full, 7);
        verify_multiset(&input, &out.words).unwrap();
        assert!(!out.identity);
    }

    #[test]
    fn test_content_scramble_fixes_function_slots() {
        let registry = CueRegistry::standard().unwrap();
        let input = words(SCIENTIST);
        let out = permute(&input, registry.function_words(), ScrambleMode::Content, 11);
        verify_multiset(&input, &out.words).unwrap();
        verify_fixed_slots(&input, &out.words, &[0, 2, 3, 5]).unwrap();
    }

    #[test]
    fn test_function_scramble_with_pinned_cue() {
        let registry = CueRegistry::standard().unwrap();
        let input = words(SCIENTIST);
        let seed = derive_seed("infinitival_to_1_function_scrambled");
        let out = permute_pinned(
            &input,
            registry.function_words(),
            ScrambleMode::Function,
            seed,
            Some(3),
        );
        verify_multiset(&input, &out.words).unwrap();
        verify_fixed_slots(&input, &out.words, &[1, 3, 4, 6, 7]).unwrap();
        assert_eq!(out.words[3], "to");
        // {the, decided, the} remain movable, so a change is found within the retry bound
        assert!(!out.identity);
    }

    #[test]
    fn test_single_slot_is_identity() {
        let registry = CueRegistry::standard().unwrap();
        let input = words("the blick");
        let out = permute(&input, registry.function_words(), ScrambleMode::Content, 3);
        assert!(out.identity);
        assert_eq!(out.attempts, 0);
        assert_eq!(out.words, input);
    }

    #[test]
    fn test_identical_words_flag_identity() {
        let registry = CueRegistry::standard().unwrap();
        let input = words("blick blick blick");
        let out = permute(&input, registry.function_words(), ScrambleMode::Full, 3);
        assert!(out.identity);
        assert_eq!(out.attempts, MAX_SHUFFLE_ATTEMPTS);
    }

    #[test]
    fn test_same_seed_same_output() {
        let registry = CueRegistry::standard().unwrap();
        let input = words(SCIENTIST);
        let a = permute(&input, registry.function_words(), ScrambleMode::Full, 99);
        let b = permute(&input, registry.function_words(), ScrambleMode::Full, 99);
        assert_eq!(a, b);
    }

    #[test]
    fn test_cue_delete() {
        let input = words(SCIENTIST);
        let (out, idx) = cue_delete(&input, "to", DEFAULT_REPLACEMENT).unwrap();
        assert_eq!(idx, 3);
        assert_eq!(
            out.join(" "),
            "the scientist decided ke study the ancient artifacts"
        );
        verify_cue_deleted(&out, "to", DEFAULT_REPLACEMENT, 3).unwrap();
    }

    #[test]
    fn test_cue_delete_first_occurrence_only() {
        let input = words("to go to the lab");
        let (out, idx) = cue_delete(&input, "to", "ke").unwrap();
        assert_eq!(idx, 0);
        assert_eq!(out.join(" "), "ke go to the lab");
        assert!(verify_cue_deleted(&out, "to", "ke", 0).is_err());
    }

    #[test]
    fn test_cue_delete_missing() {
        let input = words("the blick florped");
        let err = cue_delete(&input, "to", "ke").unwrap_err();
        assert!(matches!(err, AuditError::MissingCue { .. }));
    }

    #[test]
    fn test_derive_seed_is_stable() {
        assert_eq!(derive_seed("modals_4_full"), derive_seed("modals_4_full"));
        assert_ne!(derive_seed("modals_4_full"), derive_seed("modals_4_content"));
    }
}
