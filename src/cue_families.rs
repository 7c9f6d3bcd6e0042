//! Cue family registry
//!
//! Six families of diagnostic cue words, each paired with the word classes a
//! grammatical continuation is expected to come from. The registry is built
//! once and shared by reference; nothing in it is mutated after construction.
//!
//! Two closed-class word lists live here as well:
//!
//! - [`FUNCTION_WORDS`]: the slot lexicon used by the permuter to decide which
//!   template positions are function slots. It deliberately includes the
//!   control and perception verbs the templates keep fixed across conditions.
//! - [`CLOSED_CLASS_WORDS`]: the wider diagnostic lexicon the classifier uses
//!   for its `function` bucket when accounting for next-token mass.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::AuditError;

pub const INFINITIVAL_TO: &str = "infinitival_to";
pub const MODALS: &str = "modals";
pub const DETERMINERS: &str = "determiners";
pub const PREPOSITIONS: &str = "prepositions";
pub const AUXILIARIES: &str = "auxiliaries";
pub const COMPLEMENTIZERS: &str = "complementizers";

/// Characters stripped from both ends of a word before lexicon lookup
const EDGE_PUNCTUATION: &[char] = &[
    '.', ',', '!', '?', ';', ':', '"', '\'', '-', '(', ')', '[', ']', '{', '}',
];

/// Closed-class lexicon for template slot identification
pub const FUNCTION_WORDS: &[&str] = &[
    "a", "about", "agreed", "an", "and", "are", "at", "attempted", "be", "because", "been",
    "began", "being", "believed", "but", "by", "can", "continued", "could", "decided", "did",
    "do", "does", "expected", "felt", "for", "from", "had", "has", "have", "having", "he",
    "heard", "her", "him", "hoped", "i", "if", "in", "is", "it", "knew", "managed", "may", "me",
    "might", "must", "needed", "noticed", "of", "offered", "on", "or", "planned", "promised",
    "said", "saw", "shall", "she", "should", "so", "struggled", "that", "the", "them", "these",
    "they", "this", "those", "thought", "to", "tried", "us", "wanted", "was", "we", "were",
    "whether", "will", "with", "would", "you",
];

/// Closed-class lexicon for the classifier's `function` bucket
pub const CLOSED_CLASS_WORDS: &[&str] = &[
    "a", "about", "above", "after", "against", "all", "also", "although", "am", "among", "an",
    "and", "any", "are", "as", "at", "be", "because", "been", "before", "being", "below",
    "between", "both", "but", "by", "can", "could", "did", "do", "does", "doing", "during",
    "each", "either", "every", "few", "for", "from", "had", "has", "have", "having", "he",
    "her", "here", "herself", "him", "himself", "his", "i", "if", "in", "into", "is", "it",
    "its", "itself", "just", "many", "may", "me", "might", "more", "most", "much", "must", "my",
    "myself", "n't", "neither", "no", "nor", "not", "now", "of", "on", "only", "or", "our",
    "ourselves", "over", "several", "shall", "she", "should", "since", "so", "some", "than",
    "that", "the", "their", "them", "themselves", "then", "there", "these", "they", "this",
    "those", "though", "through", "throughout", "to", "too", "under", "unless", "until", "us",
    "very", "was", "we", "were", "what", "whatever", "when", "where", "whether", "which",
    "while", "who", "whoever", "whom", "whomever", "whose", "will", "with", "within", "without",
    "would", "yet", "you", "your", "yourself",
];

pub(crate) const VERB_WORDS: &[&str] = &[
    "add", "agree", "allow", "analyze", "appear", "argue", "arrange", "ask", "assemble", "bake",
    "be", "become", "begin", "believe", "break", "bring", "build", "buy", "calculate", "call",
    "capture", "carry", "change", "combine", "come", "complete", "compute", "conclude",
    "consider", "construct", "continue", "cook", "count", "create", "cut", "debate", "debug",
    "decide", "defend", "design", "develop", "die", "discuss", "do", "draw", "eat", "edit",
    "end", "enhance", "examine", "explain", "explore", "fall", "feel", "film", "find", "finish",
    "fix", "follow", "get", "give", "go", "grow", "guard", "happen", "have", "hear", "help",
    "hit", "hope", "improve", "include", "investigate", "join", "keep", "kill", "know", "lead",
    "learn", "leave", "let", "live", "lose", "love", "make", "mean", "measure", "meet", "mend",
    "monitor", "move", "navigate", "need", "observe", "offer", "open", "organize", "paint",
    "pass", "pay", "perfect", "perform", "plan", "play", "polish", "practice", "prepare",
    "produce", "protect", "publish", "put", "raise", "reach", "read", "receive", "record",
    "refine", "rehearse", "remember", "repair", "research", "return", "revise", "run", "sail",
    "say", "schedule", "see", "seem", "sell", "send", "serve", "set", "show", "sit", "solve",
    "sort", "speak", "spend", "stand", "start", "stay", "steer", "stop", "study", "support",
    "take", "teach", "tell", "test", "think", "track", "try", "understand", "upgrade", "use",
    "validate", "walk", "want", "watch", "weigh", "win", "work", "write",
];

pub(crate) const NOUN_WORDS: &[&str] = &[
    "air", "architect", "area", "art", "artifacts", "artist", "athlete", "author", "back",
    "blueprint", "boat", "body", "book", "bug", "building", "captain", "car", "case", "change",
    "chef", "child", "city", "code", "community", "company", "composition", "data", "day",
    "detective", "director", "dish", "doctor", "documents", "door", "education", "end",
    "engine", "engineer", "equipment", "experiment", "eye", "face", "fact", "family",
    "findings", "force", "game", "girl", "government", "group", "guy", "hand", "head", "health",
    "historian", "history", "home", "hour", "house", "idea", "information", "kid", "law",
    "level", "life", "line", "man", "manuscript", "materials", "meal", "mechanic", "member",
    "methods", "minute", "moment", "money", "morning", "mother", "musician", "name", "night",
    "novel", "number", "office", "paintings", "parent", "part", "party", "patient", "person",
    "place", "point", "power", "president", "problem", "professor", "programmer", "reason",
    "recipe", "research", "researcher", "result", "room", "sailor", "scientist", "ship", "side",
    "software", "specimens", "story", "strategy", "structure", "student", "symphony", "system",
    "teacher", "team", "techniques", "thing", "time", "tools", "vessel", "war", "water", "way",
    "week", "woman", "word", "work", "world", "year",
];

pub(crate) const ADJECTIVE_WORDS: &[&str] = &[
    "able", "advanced", "ancient", "available", "aware", "bad", "basic", "beautiful", "best",
    "better", "big", "black", "broken", "central", "certain", "challenging", "clear", "common",
    "complex", "comprehensive", "critical", "current", "dead", "delicious", "different",
    "difficult", "early", "easy", "effective", "efficient", "elaborate", "experimental",
    "fascinating", "faulty", "few", "final", "fine", "first", "foreign", "free", "full",
    "fundamental", "good", "great", "happy", "hard", "high", "historical", "hot", "human",
    "important", "innovative", "intricate", "large", "last", "late", "left", "likely", "little",
    "local", "long", "medical", "modern", "mysterious", "national", "natural", "new", "next",
    "old", "open", "other", "own", "particular", "past", "political", "poor", "practical",
    "preliminary", "private", "public", "rare", "ready", "real", "recent", "red", "remarkable",
    "right", "same", "seaworthy", "serious", "short", "significant", "similar", "simple",
    "single", "small", "social", "special", "strong", "sturdy", "sure", "theoretical", "top",
    "unusual", "valuable", "white", "whole", "winning", "wrong", "young",
];

const PARTICIPLE_WORDS: &[&str] = &[
    "analyzed", "analyzing", "assessed", "assessing", "been", "being", "broken", "building",
    "built", "called", "chosen", "come", "completed", "completing", "created", "creating",
    "demonstrated", "demonstrating", "designed", "designing", "developed", "developing",
    "discussed", "discussing", "documented", "documenting", "doing", "done", "evaluated",
    "evaluating", "examined", "examining", "explained", "explaining", "explored", "exploring",
    "finished", "finishing", "fixed", "fixing", "found", "frozen", "getting", "given", "going",
    "gone", "gotten", "had", "having", "helping", "improved", "improving", "inspected",
    "inspecting", "investigated", "investigating", "knowing", "known", "listening", "looking",
    "made", "making", "organized", "organizing", "playing", "prepared", "preparing",
    "presented", "presenting", "processed", "processing", "published", "publishing", "reading",
    "repaired", "repairing", "researched", "researching", "reviewed", "reviewing", "running",
    "said", "saying", "seen", "shown", "solved", "solving", "spoken", "studied", "studying",
    "taken", "talking", "tested", "testing", "thinking", "thought", "told", "tried", "trying",
    "used", "waiting", "walking", "wanted", "watching", "worked", "working", "writing",
    "written",
];

/// Determiners and numerals that open a noun phrase (NP_START adds nouns and adjectives)
const NP_DETERMINER_WORDS: &[&str] = &[
    "a", "all", "an", "another", "any", "both", "each", "every", "her", "his", "its", "many",
    "my", "no", "one", "our", "several", "some", "such", "that", "the", "their", "these",
    "this", "those", "three", "two", "your",
];

/// Pronouns, wh-words and determiners that open a clause (CLAUSE_START adds nouns)
const CLAUSE_OPENER_WORDS: &[&str] = &[
    "a", "all", "an", "any", "anyone", "both", "each", "every", "everyone", "he", "her", "him",
    "his", "how", "i", "it", "its", "me", "my", "no", "our", "she", "some", "someone", "that",
    "the", "their", "them", "these", "they", "this", "those", "us", "we", "what", "when",
    "where", "which", "who", "why", "you", "your",
];

/// Lowercase a word and strip surrounding punctuation
pub fn normalize_word(word: &str) -> String {
    word.trim_matches(EDGE_PUNCTUATION).to_lowercase()
}

/// A named set of member words
#[derive(Debug, Clone, Serialize)]
pub struct WordClass {
    pub name: String,
    words: BTreeSet<String>,
}

impl WordClass {
    pub fn new<I, S>(name: &str, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.to_string(),
            words: words.into_iter().map(|w| normalize_word(w.as_ref())).collect(),
        }
    }

    /// Membership test on an already-normalized word
    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// A family of cue words and the classes a grammatical continuation falls in
#[derive(Debug, Clone, Serialize)]
pub struct CueFamily {
    pub id: String,
    pub name: String,
    pub description: String,
    cue_words: BTreeSet<String>,
    classes: Vec<WordClass>,
    primary_class: String,
}

impl CueFamily {
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            cue_words: BTreeSet::new(),
            classes: Vec::new(),
            primary_class: String::new(),
        }
    }

    pub fn with_cues(mut self, cues: &[&str]) -> Self {
        self.cue_words.extend(cues.iter().map(|c| normalize_word(c)));
        self
    }

    /// Append an expected class; order of insertion is preserved
    pub fn with_class(mut self, class: WordClass) -> Self {
        self.classes.push(class);
        self
    }

    /// Label reported as the stimulus `target_class` (may name a union such as `NOUN_OR_ADJ`)
    pub fn with_primary(mut self, label: &str) -> Self {
        self.primary_class = label.to_string();
        self
    }

    /// Check that the family is usable: at least one cue, at least one
    /// class, and no word listed under two classes.
    pub fn validate(&self) -> Result<(), AuditError> {
        if self.cue_words.is_empty() {
            return Err(AuditError::InvariantViolation(format!(
                "cue family `{}` has no cue words",
                self.id
            )));
        }
        if self.classes.is_empty() {
            return Err(AuditError::InvariantViolation(format!(
                "cue family `{}` has no expected classes",
                self.id
            )));
        }

        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for class in &self.classes {
            for word in class.words() {
                if !seen.insert(word) {
                    return Err(AuditError::OverlappingClasses {
                        family: self.id.clone(),
                        word: word.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Whether `word` (raw surface form) is one of this family's cues
    pub fn is_cue(&self, word: &str) -> bool {
        self.cue_words.contains(&normalize_word(word))
    }

    pub fn cue_words(&self) -> impl Iterator<Item = &str> {
        self.cue_words.iter().map(String::as_str)
    }

    pub fn classes(&self) -> &[WordClass] {
        &self.classes
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.classes.iter().map(|c| c.name.as_str()).collect()
    }

    /// Names of every expected class containing a normalized word
    pub fn classes_of(&self, word: &str) -> Vec<&str> {
        self.classes
            .iter()
            .filter(|c| c.contains(word))
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn is_expected(&self, word: &str) -> bool {
        self.classes.iter().any(|c| c.contains(word))
    }

    pub fn primary_class(&self) -> &str {
        &self.primary_class
    }
}

/// Immutable set of cue families plus the closed-class lexicons
#[derive(Debug, Clone)]
pub struct CueRegistry {
    families: Vec<CueFamily>,
    function_words: BTreeSet<String>,
    closed_class: BTreeSet<String>,
}

impl CueRegistry {
    /// Build a registry, validating every family
    pub fn new(
        families: Vec<CueFamily>,
        function_words: &[&str],
        closed_class: &[&str],
    ) -> Result<Self, AuditError> {
        let mut ids = BTreeSet::new();
        for family in &families {
            family.validate()?;
            if !ids.insert(family.id.as_str()) {
                return Err(AuditError::InvariantViolation(format!(
                    "duplicate cue family `{}`",
                    family.id
                )));
            }
        }

        Ok(Self {
            families,
            function_words: function_words.iter().map(|w| normalize_word(w)).collect(),
            closed_class: closed_class.iter().map(|w| normalize_word(w)).collect(),
        })
    }

    /// The six standard English cue families
    pub fn standard() -> Result<Self, AuditError> {
        let verb = || WordClass::new("VERB", VERB_WORDS);
        let np_start = WordClass::new(
            "NP_START",
            NP_DETERMINER_WORDS
                .iter()
                .chain(NOUN_WORDS)
                .chain(ADJECTIVE_WORDS),
        );
        let clause_start =
            WordClass::new("CLAUSE_START", CLAUSE_OPENER_WORDS.iter().chain(NOUN_WORDS));

        let families = vec![
            CueFamily::new(
                INFINITIVAL_TO,
                "Infinitival TO",
                "Infinitival particle \"to\" expects a base-form verb",
            )
            .with_cues(&["to"])
            .with_class(verb())
            .with_primary("VERB"),
            CueFamily::new(
                MODALS,
                "Modal Auxiliaries",
                "Modal auxiliaries expect a base-form verb",
            )
            .with_cues(&[
                "can", "could", "will", "would", "shall", "should", "may", "might", "must",
                "ought",
            ])
            .with_class(verb())
            .with_primary("VERB"),
            CueFamily::new(
                DETERMINERS,
                "Determiners",
                "Determiners expect a noun or an adjective",
            )
            .with_cues(&[
                "the", "a", "an", "this", "that", "these", "those", "my", "your", "his", "her",
                "its", "our", "their", "some", "any", "each", "every", "all", "both", "many",
                "few", "several", "other", "another", "such", "no",
            ])
            .with_class(WordClass::new("NOUN", NOUN_WORDS))
            .with_class(WordClass::new("ADJ", ADJECTIVE_WORDS))
            .with_primary("NOUN_OR_ADJ"),
            CueFamily::new(
                PREPOSITIONS,
                "Prepositions",
                "Prepositions expect the start of a noun phrase",
            )
            .with_cues(&[
                "of", "in", "on", "at", "with", "from", "by", "about", "as", "into", "through",
                "during", "before", "after", "above", "below", "between", "under", "over",
                "for", "against", "among", "within", "without", "toward", "towards",
                "throughout", "beside", "besides", "behind", "beyond", "across", "along",
                "around",
            ])
            .with_class(np_start)
            .with_primary("NP_START"),
            CueFamily::new(
                AUXILIARIES,
                "Auxiliary Verbs",
                "BE/HAVE auxiliaries expect a participle",
            )
            .with_cues(&[
                "is", "are", "was", "were", "be", "been", "being", "has", "have", "had",
                "having",
            ])
            .with_class(WordClass::new("PARTICIPLE", PARTICIPLE_WORDS))
            .with_primary("PARTICIPLE"),
            CueFamily::new(
                COMPLEMENTIZERS,
                "Complementizers and Wh-words",
                "Complementizers expect the start of an embedded clause",
            )
            .with_cues(&[
                "that", "whether", "if", "who", "what", "which", "where", "when", "why", "how",
            ])
            .with_class(clause_start)
            .with_primary("CLAUSE_START"),
        ];

        Self::new(families, FUNCTION_WORDS, CLOSED_CLASS_WORDS)
    }

    /// Look up a family by id
    pub fn get(&self, id: &str) -> Result<&CueFamily, AuditError> {
        self.families
            .iter()
            .find(|f| f.id == id)
            .ok_or_else(|| AuditError::UnknownFamily(id.to_string()))
    }

    pub fn families(&self) -> &[CueFamily] {
        &self.families
    }

    pub fn family_ids(&self) -> Vec<&str> {
        self.families.iter().map(|f| f.id.as_str()).collect()
    }

    /// Slot lexicon membership for a raw surface form
    pub fn is_function_word(&self, word: &str) -> bool {
        self.function_words.contains(&normalize_word(word))
    }

    pub fn function_words(&self) -> &BTreeSet<String> {
        &self.function_words
    }

    /// Diagnostic closed-class membership for an already-normalized word
    pub fn is_closed_class(&self, word: &str) -> bool {
        self.closed_class.contains(word)
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_builds() {
        let registry = CueRegistry::standard().unwrap();
        assert_eq!(registry.len(), 6);
        assert_eq!(
            registry.family_ids(),
            vec![
                INFINITIVAL_TO,
                MODALS,
                DETERMINERS,
                PREPOSITIONS,
                AUXILIARIES,
                COMPLEMENTIZERS
            ]
        );
    }

    #[test]
    fn test_unknown_family() {
        let registry = CueRegistry::standard().unwrap();
        let err = registry.get("particles").unwrap_err();
        assert_eq!(err, AuditError::UnknownFamily("particles".into()));
    }

    #[test]
    fn test_overlapping_classes_rejected() {
        let family = CueFamily::new("bad", "Bad", "overlap")
            .with_cues(&["x"])
            .with_class(WordClass::new("A", ["run", "walk"]))
            .with_class(WordClass::new("B", ["walk", "talk"]))
            .with_primary("A");
        let err = CueRegistry::new(vec![family], FUNCTION_WORDS, CLOSED_CLASS_WORDS).unwrap_err();
        assert!(matches!(err, AuditError::OverlappingClasses { ref word, .. } if word == "walk"));
    }

    #[test]
    fn test_determiner_classes() {
        let registry = CueRegistry::standard().unwrap();
        let det = registry.get(DETERMINERS).unwrap();
        assert_eq!(det.class_names(), vec!["NOUN", "ADJ"]);
        assert_eq!(det.primary_class(), "NOUN_OR_ADJ");
        assert_eq!(det.classes_of("scientist"), vec!["NOUN"]);
        assert_eq!(det.classes_of("ancient"), vec!["ADJ"]);
        assert!(!det.is_expected("study"));
    }

    #[test]
    fn test_cue_matching_ignores_case_and_punctuation() {
        let registry = CueRegistry::standard().unwrap();
        let modals = registry.get(MODALS).unwrap();
        assert!(modals.is_cue("Should,"));
        assert!(!modals.is_cue("shouldn't"));
        assert!(registry.is_function_word("The"));
        assert!(registry.is_function_word("decided"));
        assert!(!registry.is_function_word("scientist"));
    }

    #[test]
    fn test_normalize_word() {
        assert_eq!(normalize_word("\"Hello!\""), "hello");
        assert_eq!(normalize_word("(to)"), "to");
        assert_eq!(normalize_word("well-known"), "well-known");
    }
}
