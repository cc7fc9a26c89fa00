//! Error types shared across the crate.
//!
//! Parsing happens only at the text boundary (checkpoints, domain tables), so
//! [`ParseError`] is kept separate from the learning-time [`LearnError`] and the
//! file-level [`StorageError`].

use std::path::PathBuf;

use thiserror::Error;

/// Malformed predicate, argument, rule or slot text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty input where a {0} was expected")]
    Empty(&'static str),

    #[error("malformed argument '{0}'")]
    Argument(String),

    #[error("malformed predicate '{0}'")]
    Predicate(String),

    #[error("malformed rule '{0}': {1}")]
    Rule(String, String),

    #[error("malformed slot line '{0}': {1}")]
    Slot(String, String),

    #[error("invalid probability '{0}'")]
    Probability(String),
}

/// Failures raised while learning.
#[derive(Debug, Error)]
pub enum LearnError {
    /// Two post-action observations of the same action share no unifiable
    /// structure. The pre-goal tracker is in an inconsistent state.
    #[error(
        "pre-goal for '{action}' cannot be unified with the new observation \
         (existing: {existing}; observed: {observed})"
    )]
    PreGoalDisjoint {
        action: String,
        existing: String,
        observed: String,
    },

    #[error("no domain registered under '{0}'")]
    UnknownDomain(String),

    #[error("policy tree exceeds the maximum depth of {0}")]
    PolicyTreeDepth(usize),

    #[error("policy tree node {0} does not exist")]
    PolicyTreeNode(usize),

    #[error("environment rejected action '{action}': {reason}")]
    Environment { action: String, reason: String },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Failures while reading or writing checkpoint and config files.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt checkpoint {path} (line {line}): {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: ParseError,
    },

    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type LearnResult<T> = Result<T, LearnError>;
