//! Locked-design stimulus generation
//!
//! Builds one template sentence per set for each cue family, swaps its
//! content words for nonces to get the jabberwocky text, then derives the
//! scrambled and cue-deleted conditions with the permuter. Every derived text
//! is checked against the permutation invariants before it is kept.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::cue_families::{
    CueRegistry, AUXILIARIES, COMPLEMENTIZERS, DETERMINERS, FUNCTION_WORDS, INFINITIVAL_TO,
    MODALS, PREPOSITIONS,
};
use crate::error::AuditError;
use crate::nonce::NonceGenerator;
use crate::permute::{
    count_word, cue_delete, derive_seed, find_word, permute, permute_pinned, split_words,
    verify_cue_deleted, verify_fixed_slots, verify_multiset, ScrambleMode, SlotPartition,
    DEFAULT_REPLACEMENT,
};
use crate::stimuli::{Condition, ScrambleSeeds, Stimulus, StimulusSet};

const NOUNS_AGENT: &[&str] = &[
    "scientist", "artist", "teacher", "student", "doctor", "chef", "engineer", "musician",
    "author", "mechanic", "programmer", "architect", "researcher", "photographer", "detective",
    "captain", "professor", "coach", "director", "farmer", "baker", "pilot", "surgeon", "lawyer",
    "journalist", "carpenter", "plumber", "electrician", "gardener", "librarian",
];

const NOUNS_PATIENT: &[&str] = &[
    "artifacts", "paintings", "concept", "assignment", "landscape", "patient", "symphony",
    "novel", "engine", "software", "blueprint", "data", "experiment", "recipe", "manuscript",
    "equipment", "specimens", "documents", "vehicle", "instrument", "formula", "strategy",
    "findings", "technique", "method", "discovery", "solution", "project", "design", "prototype",
];

const ADJECTIVES: &[&str] = &[
    "ancient", "beautiful", "difficult", "important", "complex", "delicious", "broken",
    "efficient", "innovative", "comprehensive", "valuable", "intricate", "challenging",
    "experimental", "preliminary", "historical", "modern", "rare", "elaborate", "fundamental",
    "critical", "remarkable", "unusual", "significant", "mysterious", "fascinating", "practical",
    "theoretical", "advanced", "basic",
];

const VERBS_BASE: &[&str] = &[
    "study", "examine", "analyze", "explore", "investigate", "review", "inspect", "evaluate",
    "assess", "test", "repair", "build", "design", "create", "develop", "improve", "fix",
    "complete", "finish", "prepare", "organize", "document", "present", "explain", "discuss",
    "publish", "research", "demonstrate", "solve", "process",
];

/// The first fifteen are control verbs that take an infinitival complement
const VERBS_PAST: &[&str] = &[
    "decided", "wanted", "began", "tried", "planned", "continued", "hoped", "expected",
    "needed", "agreed", "promised", "attempted", "managed", "struggled", "offered", "refused",
    "learned", "forgot", "remembered", "chose", "liked", "loved", "preferred", "wished",
    "demanded", "requested", "intended", "meant", "prepared", "started",
];
const CONTROL_VERBS: usize = 15;

const VERBS_PARTICIPLE_ING: &[&str] = &[
    "studying", "examining", "analyzing", "exploring", "investigating", "reviewing",
    "inspecting", "evaluating", "assessing", "testing", "repairing", "building", "designing",
    "creating", "developing", "improving", "fixing", "completing", "finishing", "preparing",
    "organizing", "documenting", "presenting", "explaining", "discussing", "publishing",
    "researching", "demonstrating", "solving", "processing",
];

const VERBS_PARTICIPLE_ED: &[&str] = &[
    "studied", "examined", "analyzed", "explored", "investigated", "reviewed", "inspected",
    "evaluated", "assessed", "tested", "repaired", "built", "designed", "created", "developed",
    "improved", "fixed", "completed", "finished", "prepared", "organized", "documented",
    "presented", "explained", "discussed", "published", "researched", "demonstrated", "solved",
    "processed",
];

const SPEECH_VERBS: &[&str] = &[
    "said", "thought", "believed", "knew", "expected", "hoped", "realized", "noticed",
    "discovered", "understood",
];

const PREPOSITIONS_LIST: &[&str] = &["with", "in", "on", "at", "for", "about"];
const MODALS_LIST: &[&str] = &["can", "will", "could", "would", "should", "must", "may", "might"];
const AUX_PROGRESSIVE: &[&str] = &["is", "was"];
const AUX_PASSIVE: &[&str] = &["was", "were", "is", "are"];

/// Configuration for stimulus generation
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Stimulus sets per cue family
    pub per_family: usize,
    /// Seed for template sampling and nonce generation
    pub seed: u64,
    /// Nonce function word substituted for the cue in CUE_DELETED
    pub replacement: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            per_family: 30,
            seed: 42,
            replacement: DEFAULT_REPLACEMENT.to_string(),
        }
    }
}

/// A filled template before the derived conditions are built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub set_id: u32,
    pub cue_family: String,
    pub cue_word: String,
    pub cue_position: usize,
    pub target_class: String,
    pub sentence: String,
    pub jabberwocky: String,
    pub content_words: Vec<String>,
    pub nonce_words: Vec<String>,
}

/// Sentence words plus the indices that hold content words
struct Frame {
    words: Vec<String>,
    content_slots: Vec<usize>,
    cue_position: usize,
}

impl Frame {
    fn new(words: &[&str], content_slots: &[usize], cue_position: usize) -> Self {
        Self {
            words: words.iter().map(|w| (*w).to_string()).collect(),
            content_slots: content_slots.to_vec(),
            cue_position,
        }
    }
}

fn sample<'p>(rng: &mut StdRng, pool: &'p [&'p str], n: usize) -> Vec<&'p str> {
    pool.choose_multiple(rng, n.min(pool.len()))
        .copied()
        .collect()
}

fn choices<'p>(rng: &mut StdRng, pool: &'p [&'p str], n: usize) -> Vec<&'p str> {
    (0..n)
        .filter_map(|_| pool.choose(rng).copied())
        .collect()
}

fn cycle<'p>(pool: &[&'p str], i: usize) -> &'p str {
    pool[i % pool.len()]
}

/// Generator for the full locked stimulus set
pub struct StimulusGenerator<'a> {
    registry: &'a CueRegistry,
    config: GenerationConfig,
}

impl<'a> StimulusGenerator<'a> {
    pub fn new(registry: &'a CueRegistry, config: GenerationConfig) -> Self {
        Self { registry, config }
    }

    /// Fill templates for every family, in registry order
    pub fn templates(&self) -> Result<Vec<Template>, AuditError> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut nonces = NonceGenerator::new(
            self.config.seed,
            FUNCTION_WORDS
                .iter()
                .copied()
                .chain(std::iter::once(self.config.replacement.as_str())),
        );

        let mut templates = Vec::new();
        for family in self.registry.families() {
            let frames = self.frames(&family.id, &mut rng)?;
            for (i, frame) in frames.into_iter().enumerate() {
                let mut jabberwocky = frame.words.clone();
                let mut content_words = Vec::with_capacity(frame.content_slots.len());
                let mut nonce_words = Vec::with_capacity(frame.content_slots.len());
                for &slot in &frame.content_slots {
                    let nonce = nonces.generate();
                    content_words.push(frame.words[slot].clone());
                    nonce_words.push(nonce.clone());
                    jabberwocky[slot] = nonce;
                }

                templates.push(Template {
                    set_id: (i + 1) as u32,
                    cue_family: family.id.clone(),
                    cue_word: frame.words[frame.cue_position].clone(),
                    cue_position: frame.cue_position,
                    target_class: family.primary_class().to_string(),
                    sentence: frame.words.join(" "),
                    jabberwocky: jabberwocky.join(" "),
                    content_words,
                    nonce_words,
                });
            }
        }
        Ok(templates)
    }

    fn frames(&self, family: &str, rng: &mut StdRng) -> Result<Vec<Frame>, AuditError> {
        let n = self.config.per_family;
        let agents = sample(rng, NOUNS_AGENT, n);
        let patients = sample(rng, NOUNS_PATIENT, n);
        let adjs = sample(rng, ADJECTIVES, n);

        let frames = match family {
            INFINITIVAL_TO => {
                let controls = sample(rng, &VERBS_PAST[..CONTROL_VERBS], n);
                let bases = sample(rng, VERBS_BASE, n);
                (0..n)
                    .map(|i| {
                        let w = [
                            "the",
                            cycle(&agents, i),
                            cycle(&controls, i),
                            "to",
                            cycle(&bases, i),
                            "the",
                            cycle(&adjs, i),
                            cycle(&patients, i),
                        ];
                        Frame::new(&w, &[1, 4, 6, 7], 3)
                    })
                    .collect()
            }
            MODALS => {
                let modals = choices(rng, MODALS_LIST, n);
                let bases = sample(rng, VERBS_BASE, n);
                (0..n)
                    .map(|i| {
                        let w = [
                            "so",
                            "the",
                            cycle(&agents, i),
                            modals[i],
                            cycle(&bases, i),
                            "a",
                            cycle(&adjs, i),
                            cycle(&patients, i),
                        ];
                        Frame::new(&w, &[2, 4, 6, 7], 3)
                    })
                    .collect()
            }
            DETERMINERS => {
                // "a" as the cue keeps it distinct from the sentence-initial "the"
                let pasts = sample(rng, VERBS_PAST, n);
                (0..n)
                    .map(|i| {
                        let w = [
                            "the",
                            cycle(&agents, i),
                            cycle(&pasts, i),
                            "and",
                            "saw",
                            "a",
                            cycle(&adjs, i),
                            cycle(&patients, i),
                        ];
                        Frame::new(&w, &[1, 2, 6, 7], 5)
                    })
                    .collect()
            }
            PREPOSITIONS => {
                let pasts = sample(rng, VERBS_PAST, n);
                let preps = choices(rng, PREPOSITIONS_LIST, n);
                (0..n)
                    .map(|i| {
                        let w = [
                            "so",
                            "the",
                            cycle(&agents, i),
                            cycle(&pasts, i),
                            preps[i],
                            "a",
                            cycle(&adjs, i),
                            cycle(&patients, i),
                        ];
                        Frame::new(&w, &[2, 3, 6, 7], 4)
                    })
                    .collect()
            }
            AUXILIARIES => (0..n)
                .map(|i| {
                    let adj = cycle(&adjs, i);
                    if i % 2 == 0 {
                        // progressive: so the AGENT is V-ing a ADJ PATIENT
                        let aux = AUX_PROGRESSIVE.choose(rng).copied().unwrap_or("is");
                        let w = [
                            "so",
                            "the",
                            cycle(&agents, i),
                            aux,
                            cycle(VERBS_PARTICIPLE_ING, i),
                            "a",
                            adj,
                            cycle(&patients, i),
                        ];
                        Frame::new(&w, &[2, 4, 6, 7], 3)
                    } else {
                        // passive: so the PATIENT was V-ed by a ADJ AGENT
                        let aux = AUX_PASSIVE.choose(rng).copied().unwrap_or("was");
                        let w = [
                            "so",
                            "the",
                            cycle(&patients, i),
                            aux,
                            cycle(VERBS_PARTICIPLE_ED, i),
                            "by",
                            "a",
                            adj,
                            cycle(&agents, i),
                        ];
                        Frame::new(&w, &[2, 4, 7, 8], 3)
                    }
                })
                .collect(),
            COMPLEMENTIZERS => {
                let second_agents = sample(rng, NOUNS_AGENT, n);
                let speech = sample(rng, SPEECH_VERBS, n);
                let pasts = sample(rng, VERBS_PAST, n);
                (0..n)
                    .map(|i| {
                        let w = [
                            "so",
                            "the",
                            cycle(&agents, i),
                            cycle(&speech, i),
                            "that",
                            "a",
                            cycle(&second_agents, i + 5),
                            cycle(&pasts, i),
                        ];
                        Frame::new(&w, &[2, 3, 6, 7], 4)
                    })
                    .collect()
            }
            other => return Err(AuditError::UnknownFamily(other.to_string())),
        };
        Ok(frames)
    }

    /// Derive all six conditions for one template
    pub fn complete(&self, template: &Template) -> Result<Stimulus, AuditError> {
        let words = split_words(&template.jabberwocky);
        let function_set = self.registry.function_words();

        if find_word(&words, &template.cue_word) != Some(template.cue_position) {
            return Err(AuditError::InvariantViolation(format!(
                "cue `{}` not first found at {} in `{}`",
                template.cue_word, template.cue_position, template.jabberwocky
            )));
        }

        let key = format!("{}_{}", template.cue_family, template.set_id);
        let seeds = ScrambleSeeds {
            full_scramble: derive_seed(&format!("{key}_full_scrambled")),
            content_scramble: derive_seed(&format!("{key}_content_scrambled")),
            function_scramble: derive_seed(&format!("{key}_function_scrambled")),
        };

        let slots = SlotPartition::from_words(&words, function_set);

        let full = permute(&words, function_set, ScrambleMode::Full, seeds.full_scramble);
        verify_multiset(&words, &full.words)?;

        let content = permute(
            &words,
            function_set,
            ScrambleMode::Content,
            seeds.content_scramble,
        );
        verify_multiset(&words, &content.words)?;
        verify_fixed_slots(&words, &content.words, &slots.function_indices())?;

        let function = permute_pinned(
            &words,
            function_set,
            ScrambleMode::Function,
            seeds.function_scramble,
            Some(template.cue_position),
        );
        verify_multiset(&words, &function.words)?;
        let mut fixed = slots.content_indices();
        fixed.push(template.cue_position);
        verify_fixed_slots(&words, &function.words, &fixed)?;

        let (deleted, idx) = cue_delete(&words, &template.cue_word, &self.config.replacement)?;
        verify_cue_deleted(&deleted, &template.cue_word, &self.config.replacement, idx)?;

        let mut identity_flags = Vec::new();
        for (mode, outcome) in [
            (ScrambleMode::Full, &full),
            (ScrambleMode::Content, &content),
            (ScrambleMode::Function, &function),
        ] {
            if outcome.identity {
                warn!(
                    "{} set {}: {} identical to jabberwocky",
                    template.cue_family,
                    template.set_id,
                    mode.condition()
                );
                identity_flags.push(mode.condition());
            }
        }

        Ok(Stimulus {
            set_id: template.set_id,
            cue_family: template.cue_family.clone(),
            cue_word: template.cue_word.clone(),
            cue_position: template.cue_position,
            target_class: template.target_class.clone(),
            sentence: template.sentence.clone(),
            jabberwocky: template.jabberwocky.clone(),
            full_scrambled: full.text(),
            content_scrambled: content.text(),
            function_scrambled: function.text(),
            cue_deleted: deleted.join(" "),
            content_words: template.content_words.clone(),
            nonce_words: template.nonce_words.clone(),
            seeds: Some(seeds),
            identity_flags,
        })
    }

    /// Generate the complete stimulus set
    pub fn generate(&self) -> Result<StimulusSet, AuditError> {
        let templates = self.templates()?;
        info!(
            "Filled {} templates across {} families",
            templates.len(),
            self.registry.len()
        );
        let stimuli = templates
            .iter()
            .map(|t| self.complete(t))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StimulusSet::new(stimuli))
    }
}

/// Per-family results of the generation sanity checks
#[derive(Debug, Clone)]
pub struct FamilySanity {
    pub family: String,
    pub count: usize,
    /// Stimuli whose cue count in a condition is off (expected 1, or 0 for CUE_DELETED)
    pub cue_count_failures: BTreeMap<Condition, usize>,
    /// CUE_DELETED texts without exactly one replacement word
    pub replacement_failures: usize,
    /// Scrambles that came out identical to the jabberwocky text
    pub identical_to_jabberwocky: BTreeMap<Condition, usize>,
}

/// Sanity report over a generated stimulus set
#[derive(Debug, Clone)]
pub struct SanityReport {
    pub expected_per_family: usize,
    pub families: Vec<FamilySanity>,
    pub total: usize,
}

impl SanityReport {
    pub fn check(stimuli: &StimulusSet, registry: &CueRegistry, config: &GenerationConfig) -> Self {
        let mut families = Vec::new();
        for family in registry.families() {
            let members = stimuli.by_family(&family.id);
            let mut cue_count_failures = BTreeMap::new();
            let mut identical = BTreeMap::new();
            let mut replacement_failures = 0;

            for stim in &members {
                for condition in Condition::ALL {
                    let words = stim.words(condition);
                    let expected = usize::from(condition != Condition::CueDeleted);
                    if count_word(&words, &stim.cue_word) != expected {
                        *cue_count_failures.entry(condition).or_insert(0) += 1;
                    }
                    if condition == Condition::CueDeleted
                        && count_word(&words, &config.replacement) != 1
                    {
                        replacement_failures += 1;
                    }
                }
                for condition in [
                    Condition::FullScrambled,
                    Condition::ContentScrambled,
                    Condition::FunctionScrambled,
                ] {
                    if stim.text(condition) == stim.jabberwocky {
                        *identical.entry(condition).or_insert(0) += 1;
                    }
                }
            }

            families.push(FamilySanity {
                family: family.id.clone(),
                count: members.len(),
                cue_count_failures,
                replacement_failures,
                identical_to_jabberwocky: identical,
            });
        }

        Self {
            expected_per_family: config.per_family,
            families,
            total: stimuli.len(),
        }
    }

    /// Counts and cue checks pass, and no scramble came out identical to its jabberwocky
    pub fn passed(&self) -> bool {
        self.families.iter().all(|f| {
            f.count == self.expected_per_family
                && f.cue_count_failures.is_empty()
                && f.replacement_failures == 0
                && f.identical_to_jabberwocky.is_empty()
        })
    }

    /// Human-readable log
    pub fn render(&self) -> String {
        let mut out = String::new();
        let rule = "=".repeat(60);
        let _ = writeln!(out, "{rule}\nSTIMULUS SANITY CHECK\n{rule}");
        for f in &self.families {
            let _ = writeln!(out, "\n{}", f.family.to_uppercase());
            let status = if f.count == self.expected_per_family {
                "PASS"
            } else {
                "FAIL"
            };
            let _ = writeln!(
                out,
                "  count: {}/{} [{status}]",
                f.count, self.expected_per_family
            );
            for condition in Condition::ALL {
                let failures = f.cue_count_failures.get(&condition).copied().unwrap_or(0);
                let status = if failures == 0 { "PASS" } else { "CHECK" };
                let _ = writeln!(
                    out,
                    "  {:<20} cue count off in {failures} [{status}]",
                    condition.field_name()
                );
            }
            if f.replacement_failures > 0 {
                let _ = writeln!(
                    out,
                    "  replacement missing or duplicated in {}",
                    f.replacement_failures
                );
            }
            for (condition, n) in &f.identical_to_jabberwocky {
                let _ = writeln!(
                    out,
                    "  {} identical to jabberwocky in {n}/{} [FAIL]",
                    condition.field_name(),
                    f.count
                );
            }
        }
        let _ = writeln!(
            out,
            "\nTotal stimuli: {} (expected {})\nOverall: {}",
            self.total,
            self.expected_per_family * self.families.len(),
            if self.passed() { "PASS" } else { "CHECK REQUIRED" }
        );
        out
    }
}
