//! Pronounceable nonce words for jabberwocky texts
//!
//! Words are assembled from onset + nucleus + coda syllables and checked
//! against the closed-class lexicon and every word handed out before, so a
//! nonce never collides with a function word or with another nonce.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const ONSETS: &[&str] = &[
    "b", "bl", "br", "c", "cl", "cr", "d", "dr", "f", "fl", "fr", "g", "gl", "gr", "h", "j",
    "k", "kl", "kr", "l", "m", "n", "p", "pl", "pr", "qu", "r", "s", "sc", "sk", "sl", "sm",
    "sn", "sp", "st", "str", "sw", "t", "tr", "th", "v", "w", "wh", "y", "z",
];

const NUCLEI: &[&str] = &["a", "e", "i", "o", "u", "ai", "ea", "ee", "oo", "ou", "ey", "ie"];

const CODAS: &[&str] = &[
    "", "b", "ck", "d", "f", "g", "k", "l", "ll", "m", "n", "ng", "nk", "p", "r", "s", "sh",
    "sk", "sp", "ss", "st", "t", "th", "x", "z",
];

const MAX_ATTEMPTS: usize = 100;
const MIN_LEN: usize = 3;

/// Seeded generator of unique nonce words
pub struct NonceGenerator {
    rng: StdRng,
    used: BTreeSet<String>,
    excluded: BTreeSet<String>,
}

impl NonceGenerator {
    /// `excluded` words (typically the function lexicon and known content
    /// words) are never produced.
    pub fn new<I, S>(seed: u64, excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            rng: StdRng::seed_from_u64(seed),
            used: BTreeSet::new(),
            excluded: excluded
                .into_iter()
                .map(|w| w.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Generate a fresh one-syllable nonce word
    pub fn generate(&mut self) -> String {
        self.generate_syllables(1)
    }

    /// Generate a fresh nonce word of `syllables` syllables.
    ///
    /// Falls back to `zx` plus a random three-digit number if no unused
    /// candidate turns up within the attempt budget.
    pub fn generate_syllables(&mut self, syllables: usize) -> String {
        for _ in 0..MAX_ATTEMPTS {
            let word = self.candidate(syllables.max(1));
            if word.len() >= MIN_LEN && !self.excluded.contains(&word) && !self.used.contains(&word)
            {
                self.used.insert(word.clone());
                return word;
            }
        }

        let mut fallback = format!("zx{}", self.rng.gen_range(100..1000));
        if self.used.contains(&fallback) {
            fallback = format!("{fallback}{}", self.used.len());
        }
        self.used.insert(fallback.clone());
        fallback
    }

    fn candidate(&mut self, syllables: usize) -> String {
        let mut word = String::new();
        for _ in 0..syllables {
            for part in [ONSETS, NUCLEI, CODAS] {
                if let Some(piece) = part.choose(&mut self.rng) {
                    word.push_str(piece);
                }
            }
        }
        word
    }

    /// Number of nonce words handed out so far
    pub fn used_count(&self) -> usize {
        self.used.len()
    }
}
