//! Access evaluation under the dominance relation.
//!
//! The evaluator follows a Bell-LaPadula discipline:
//!
//! - **Read** (no read up): a subject may read an object iff the subject label
//!   dominates the object label.
//! - **Write** (no write down): a subject may write an object iff the object
//!   label dominates the subject label. Writing up is allowed, writing to a
//!   lower or disjoint object is not.
//!
//! Evaluation is a total, pure function over two resolved labels. When a label
//! could not be obtained upstream, [`evaluate`] yields
//! [`AccessDecision::Indeterminate`] and the caller picks a [`FailPolicy`].

use std::fmt::{self, Display};

use tracing::debug;

use crate::{error::QueryError, label::Label};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
}

impl Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Read => write!(f, "read"),
            AccessMode::Write => write!(f, "write"),
        }
    }
}

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessDecision {
    Permit,
    Deny,
    /// One of the labels could not be resolved
    Indeterminate,
}

impl AccessDecision {
    /// Resolves the decision to a yes/no answer under the given policy.
    ///
    /// Only `Indeterminate` depends on the policy.
    pub fn is_granted(self, policy: FailPolicy) -> bool {
        match self {
            AccessDecision::Permit => true,
            AccessDecision::Deny => false,
            AccessDecision::Indeterminate => policy == FailPolicy::Open,
        }
    }
}

impl Display for AccessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessDecision::Permit => write!(f, "permit"),
            AccessDecision::Deny => write!(f, "deny"),
            AccessDecision::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

/// How an [`AccessDecision::Indeterminate`] outcome is enforced.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPolicy {
    /// Unresolved labels deny access
    #[default]
    Closed,
    /// Unresolved labels grant access
    Open,
}

/// `a` dominates `b`: `level(a) >= level(b)` and `categories(b) ⊆ categories(a)`.
pub fn dominates(a: &Label, b: &Label) -> bool {
    a.dominates(b)
}

/// Decides whether `subject` may access `object` in the given mode.
pub fn check(subject: &Label, object: &Label, mode: AccessMode) -> AccessDecision {
    let permitted = match mode {
        AccessMode::Read => dominates(subject, object),
        AccessMode::Write => dominates(object, subject),
    };
    let decision = if permitted { AccessDecision::Permit } else { AccessDecision::Deny };
    debug!(%subject, %object, %mode, %decision, "[access] check");
    decision
}

/// Same as [`check`], but accepts the raw outcome of label queries.
///
/// Returns `Indeterminate` if either label could not be resolved.
pub fn evaluate(
    subject: Result<&Label, &QueryError>,
    object: Result<&Label, &QueryError>,
    mode: AccessMode,
) -> AccessDecision {
    match (subject, object) {
        (Ok(subject), Ok(object)) => check(subject, object, mode),
        (subject, object) => {
            debug!(
                subject_error = ?subject.err(),
                object_error = ?object.err(),
                %mode,
                "[access] unresolved label"
            );
            AccessDecision::Indeterminate
        }
    }
}
