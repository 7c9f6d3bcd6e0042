//! Word classification strategies
//!
//! A strategy answers one question: which of a cue family's expected classes
//! does a word belong to? The lexicon strategy checks class membership
//! directly. The POS strategy tags the word in isolation and maps the tag
//! onto the family's class names, which makes it a useful cross-check on
//! words the lexicon has never seen.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::cue_families::{normalize_word, CueFamily, ADJECTIVE_WORDS, NOUN_WORDS, VERB_WORDS};

/// Maps a normalized word onto a cue family's expected classes
pub trait ClassificationStrategy {
    /// Short name recorded in audit metadata
    fn name(&self) -> &'static str;

    /// Expected classes of `family` that contain `word`, in family order
    fn classify<'f>(&self, word: &str, family: &'f CueFamily) -> Vec<&'f str>;
}

/// Exact membership in each expected-class word set
#[derive(Debug, Clone, Copy, Default)]
pub struct LexiconStrategy;

impl ClassificationStrategy for LexiconStrategy {
    fn name(&self) -> &'static str {
        "lexicon"
    }

    fn classify<'f>(&self, word: &str, family: &'f CueFamily) -> Vec<&'f str> {
        family.classes_of(word)
    }
}

/// Universal POS tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Upos {
    Adj,
    Adp,
    Adv,
    Aux,
    Cconj,
    Det,
    Noun,
    Num,
    Part,
    Pron,
    Propn,
    Sconj,
    Verb,
    X,
}

impl Upos {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Adj => "ADJ",
            Self::Adp => "ADP",
            Self::Adv => "ADV",
            Self::Aux => "AUX",
            Self::Cconj => "CCONJ",
            Self::Det => "DET",
            Self::Noun => "NOUN",
            Self::Num => "NUM",
            Self::Part => "PART",
            Self::Pron => "PRON",
            Self::Propn => "PROPN",
            Self::Sconj => "SCONJ",
            Self::Verb => "VERB",
            Self::X => "X",
        }
    }
}

impl fmt::Display for Upos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tags a single word out of context
pub trait PosTagger {
    fn tag(&self, word: &str) -> Upos;
}

const CLOSED_CLASS_TAGS: &[(Upos, &[&str])] = &[
    (
        Upos::Det,
        &[
            "a", "an", "the", "this", "that", "these", "those", "some", "any", "each", "every",
            "all", "both", "no", "another", "such", "either", "neither",
        ],
    ),
    (
        Upos::Pron,
        &[
            "i", "you", "he", "she", "it", "we", "they", "me", "him", "her", "us", "them", "my",
            "your", "his", "its", "our", "their", "who", "whom", "what", "which", "someone",
            "anyone", "everyone", "something", "nothing",
        ],
    ),
    (
        Upos::Adp,
        &[
            "of", "in", "on", "at", "with", "from", "by", "about", "into", "through", "during",
            "before", "after", "above", "below", "between", "under", "over", "for", "against",
            "among", "within", "without", "toward", "towards", "across", "along", "around",
            "behind", "beyond", "beside",
        ],
    ),
    (
        Upos::Aux,
        &[
            "is", "are", "was", "were", "be", "been", "being", "am", "has", "have", "had",
            "do", "does", "did", "can", "could", "will", "would", "shall", "should", "may",
            "might", "must", "ought",
        ],
    ),
    (Upos::Cconj, &["and", "or", "but", "nor", "yet"]),
    (
        Upos::Sconj,
        &["if", "whether", "because", "although", "though", "while", "unless", "since"],
    ),
    (Upos::Part, &["to", "not", "n't"]),
    (Upos::Adv, &["very", "too", "also", "just", "only", "then", "now", "here", "there"]),
    (
        Upos::Num,
        &["one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten"],
    ),
];

/// Ordered suffix rules for open-class words not in the lexicon
const SUFFIX_RULES: &[(&str, Upos)] = &[
    ("ly", Upos::Adv),
    ("ing", Upos::Verb),
    ("ed", Upos::Verb),
    ("tion", Upos::Noun),
    ("sion", Upos::Noun),
    ("ment", Upos::Noun),
    ("ness", Upos::Noun),
    ("ity", Upos::Noun),
    ("ist", Upos::Noun),
    ("ism", Upos::Noun),
    ("ous", Upos::Adj),
    ("ful", Upos::Adj),
    ("ive", Upos::Adj),
    ("able", Upos::Adj),
    ("ible", Upos::Adj),
    ("less", Upos::Adj),
    ("ic", Upos::Adj),
    ("al", Upos::Adj),
    ("ize", Upos::Verb),
    ("ise", Upos::Verb),
    ("ate", Upos::Verb),
    ("er", Upos::Noun),
    ("or", Upos::Noun),
];

/// Dictionary tagger: closed-class table, open-class lexicon, then suffix rules
#[derive(Debug, Clone)]
pub struct LexiconTagger {
    table: BTreeMap<String, Upos>,
}

impl LexiconTagger {
    /// Tagger with only the closed-class table
    pub fn closed_class() -> Self {
        let mut table = BTreeMap::new();
        for (tag, words) in CLOSED_CLASS_TAGS {
            for w in *words {
                table.entry((*w).to_string()).or_insert(*tag);
            }
        }
        Self { table }
    }

    /// Add open-class words; closed-class entries are never overwritten
    pub fn with_words<I, S>(mut self, tag: Upos, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for w in words {
            self.table.entry(normalize_word(w.as_ref())).or_insert(tag);
        }
        self
    }

    /// Closed-class table plus the built-in English verb, noun and adjective lists
    pub fn english() -> Self {
        Self::closed_class()
            .with_words(Upos::Verb, VERB_WORDS)
            .with_words(Upos::Noun, NOUN_WORDS)
            .with_words(Upos::Adj, ADJECTIVE_WORDS)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for LexiconTagger {
    fn default() -> Self {
        Self::english()
    }
}

impl PosTagger for LexiconTagger {
    fn tag(&self, word: &str) -> Upos {
        let word = normalize_word(word);
        if let Some(tag) = self.table.get(&word) {
            return *tag;
        }
        if word.chars().any(|c| c.is_ascii_digit()) {
            return Upos::Num;
        }
        if !word.chars().any(char::is_alphabetic) {
            return Upos::X;
        }
        SUFFIX_RULES
            .iter()
            .find(|(suffix, _)| word.len() > suffix.len() + 1 && word.ends_with(suffix))
            .map(|(_, tag)| *tag)
            .unwrap_or(Upos::Noun)
    }
}

fn looks_participial(word: &str) -> bool {
    ["ing", "ed", "en"]
        .iter()
        .any(|s| word.len() > s.len() + 1 && word.ends_with(s))
}

/// Class labels a tag can stand for, before filtering by family
fn labels_for(tag: Upos, word: &str) -> Vec<&'static str> {
    match tag {
        Upos::Verb if looks_participial(word) => vec!["VERB", "PARTICIPLE"],
        Upos::Verb => vec!["VERB"],
        Upos::Aux if looks_participial(word) => vec!["PARTICIPLE"],
        Upos::Noun | Upos::Propn => vec!["NOUN", "NP_START", "CLAUSE_START"],
        Upos::Adj => vec!["ADJ", "NP_START"],
        Upos::Det => vec!["NP_START", "CLAUSE_START"],
        Upos::Num => vec!["NP_START"],
        Upos::Pron => vec!["CLAUSE_START"],
        _ => Vec::new(),
    }
}

/// POS-tagger-backed strategy
#[derive(Debug, Clone, Default)]
pub struct PosTaggerStrategy<T: PosTagger> {
    tagger: T,
}

impl<T: PosTagger> PosTaggerStrategy<T> {
    pub fn new(tagger: T) -> Self {
        Self { tagger }
    }
}

impl<T: PosTagger> ClassificationStrategy for PosTaggerStrategy<T> {
    fn name(&self) -> &'static str {
        "pos"
    }

    fn classify<'f>(&self, word: &str, family: &'f CueFamily) -> Vec<&'f str> {
        let labels = labels_for(self.tagger.tag(word), word);
        family
            .class_names()
            .into_iter()
            .filter(|name| labels.iter().any(|l| l == name))
            .collect()
    }
}

/// Strategy selector used by configuration and the CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Lexicon,
    Pos,
}

impl StrategyKind {
    pub fn build(self) -> Box<dyn ClassificationStrategy> {
        match self {
            Self::Lexicon => Box::new(LexiconStrategy),
            Self::Pos => Box::new(PosTaggerStrategy::new(LexiconTagger::english())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lexicon => "lexicon",
            Self::Pos => "pos",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lexicon" => Ok(Self::Lexicon),
            "pos" | "spacy" => Ok(Self::Pos),
            other => anyhow::bail!("unknown classification strategy `{other}`"),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cue_families::{CueRegistry, AUXILIARIES, DETERMINERS, INFINITIVAL_TO};

    #[test]
    fn test_lexicon_strategy() {
        let registry = CueRegistry::standard().unwrap();
        let det = registry.get(DETERMINERS).unwrap();
        assert_eq!(LexiconStrategy.classify("scientist", det), vec!["NOUN"]);
        assert_eq!(LexiconStrategy.classify("ancient", det), vec!["ADJ"]);
        assert!(LexiconStrategy.classify("blick", det).is_empty());
    }

    #[test]
    fn test_class_names_outlive_the_word() {
        let registry = CueRegistry::standard().unwrap();
        let inf = registry.get(INFINITIVAL_TO).unwrap();
        let classes = {
            let decoded = normalize_word("Study,");
            LexiconStrategy.classify(&decoded, inf)
        };
        assert_eq!(classes, vec!["VERB"]);
    }

    #[test]
    fn test_tagger_closed_class_and_suffixes() {
        let tagger = LexiconTagger::english();
        assert_eq!(tagger.tag("the"), Upos::Det);
        assert_eq!(tagger.tag("To"), Upos::Part);
        assert_eq!(tagger.tag("study"), Upos::Verb);
        assert_eq!(tagger.tag("quickly"), Upos::Adv);
        assert_eq!(tagger.tag("organization"), Upos::Noun);
        assert_eq!(tagger.tag("dangerous"), Upos::Adj);
        assert_eq!(tagger.tag("42"), Upos::Num);
        assert_eq!(tagger.tag("florp"), Upos::Noun);
    }

    #[test]
    fn test_pos_strategy_maps_tags_to_family_classes() {
        let registry = CueRegistry::standard().unwrap();
        let strategy = PosTaggerStrategy::new(LexiconTagger::english());

        let inf = registry.get(INFINITIVAL_TO).unwrap();
        assert_eq!(strategy.classify("study", inf), vec!["VERB"]);
        assert!(strategy.classify("the", inf).is_empty());

        let aux = registry.get(AUXILIARIES).unwrap();
        assert_eq!(strategy.classify("wandering", aux), vec!["PARTICIPLE"]);

        let det = registry.get(DETERMINERS).unwrap();
        assert_eq!(strategy.classify("ancient", det), vec!["ADJ"]);
    }

    #[test]
    fn test_strategy_kind_parse() {
        assert_eq!("POS".parse::<StrategyKind>().unwrap(), StrategyKind::Pos);
        assert_eq!("lexicon".parse::<StrategyKind>().unwrap(), StrategyKind::Lexicon);
        assert!("neural".parse::<StrategyKind>().is_err());
        assert_eq!(StrategyKind::Pos.build().name(), "pos");
    }
}
