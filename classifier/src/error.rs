// Copyright 2024 Oxide Computer Company

use std::fmt;

/// Errors produced while compiling a rule set into a filter. Queries against
/// a compiled filter cannot fail; every input a query consumes was validated
/// at compile time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An arena allocation failed.
    OutOfMemory,

    /// A rule is malformed: non-prefix mask, inverted port range,
    /// inconsistent IPv6 split, or a constraint on an attribute that is not
    /// in the signature.
    InvalidRule {
        /// Index of the offending rule.
        rule: usize,

        /// What was wrong with it.
        reason: String,
    },

    /// A registry or table dimension exceeds 32 bits, or the signature is
    /// longer than the supported maximum.
    CapacityOverflow,

    /// The signature contains no attributes.
    EmptySignature,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "arena allocation failed"),
            Self::InvalidRule { rule, reason } => {
                write!(f, "invalid rule {}: {}", rule, reason)
            }
            Self::CapacityOverflow => {
                write!(f, "classifier capacity exceeds 32 bits")
            }
            Self::EmptySignature => write!(f, "signature has no attributes"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub(crate) fn invalid_rule(rule: usize, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule,
            reason: reason.into(),
        }
    }
}
