//! Domain error taxonomy for the cue audit
//!
//! Per-item failures during an audit are recoverable: the engine logs them,
//! counts them under a [`SkipReason`], and moves on. Setup failures (model
//! loading, malformed stimulus files) travel as `anyhow::Error` instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stimuli::Condition;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuditError {
    #[error("cue `{cue}` not found in {condition} text")]
    MissingCue { condition: Condition, cue: String },

    #[error("cue `{cue}` still present in {condition} text after deletion")]
    CueNotDeleted { condition: Condition, cue: String },

    #[error("{family}/{label}: only {n} matched pairs (need at least {min})")]
    InsufficientPairs {
        family: String,
        label: String,
        n: usize,
        min: usize,
    },

    #[error("unstable numerics: {detail}")]
    UnstableNumerics { detail: String },

    #[error("mass outside the word-start buckets too high (residual={residual:.4}, punctuation={punctuation:.4})")]
    HighResidualMass { residual: f64, punctuation: f64 },

    #[error("unknown cue family `{0}`")]
    UnknownFamily(String),

    #[error("empty context for condition {0}")]
    EmptyContext(Condition),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("cue family `{family}` lists `{word}` under more than one expected class")]
    OverlappingClasses { family: String, word: String },
}

impl AuditError {
    /// Bucket under which a skipped audit point is counted, if this error is
    /// one the engine recovers from.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::MissingCue { .. } | Self::CueNotDeleted { .. } => Some(SkipReason::MissingCue),
            Self::UnstableNumerics { .. } => Some(SkipReason::UnstableNumerics),
            Self::UnknownFamily(_) => Some(SkipReason::UnknownFamily),
            Self::EmptyContext(_) => Some(SkipReason::EmptyContext),
            Self::InsufficientPairs { .. }
            | Self::HighResidualMass { .. }
            | Self::InvariantViolation(_)
            | Self::OverlappingClasses { .. } => None,
        }
    }
}

/// Why an audit point produced no record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingCue,
    UnstableNumerics,
    UnknownFamily,
    EmptyContext,
    ModelFailure,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingCue => "missing_cue",
            Self::UnstableNumerics => "unstable_numerics",
            Self::UnknownFamily => "unknown_family",
            Self::EmptyContext => "empty_context",
            Self::ModelFailure => "model_failure",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors_map_to_skip_reasons() {
        let err = AuditError::MissingCue {
            condition: Condition::Jabberwocky,
            cue: "to".into(),
        };
        assert_eq!(err.skip_reason(), Some(SkipReason::MissingCue));

        let err = AuditError::UnstableNumerics {
            detail: "NaN".into(),
        };
        assert_eq!(err.skip_reason(), Some(SkipReason::UnstableNumerics));

        let err = AuditError::InvariantViolation("multiset".into());
        assert_eq!(err.skip_reason(), None);
    }

    #[test]
    fn test_error_messages_name_the_condition() {
        let err = AuditError::MissingCue {
            condition: Condition::CueDeleted,
            cue: "ke".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("CUE_DELETED"));
        assert!(msg.contains("ke"));
    }
}
