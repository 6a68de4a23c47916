//! MAC label model.
//!
//! A [`Label`] is the security classification attached to a subject (a running
//! process) or to an object (a socket, a packet). It combines:
//!
//! - **Level**: a totally ordered sensitivity value, higher is more sensitive
//! - **Categories**: a set of compartment tags used for need-to-know partitioning
//! - **Type**: whether the label classifies a subject or an object
//!
//! Labels are immutable values. They are compared under the dominance relation:
//! `a` dominates `b` when `a` is at least as sensitive as `b` and covers every
//! compartment of `b`.
//!
//! ## Text Representation
//!
//! The [`codec`] submodule converts labels to and from the canonical text form
//! `<level>[:<cat>[,<cat>...]]`, e.g. `2:4,7`.

use std::{
    collections::BTreeSet,
    fmt::{self, Display},
    str::FromStr,
};

use crate::error::MalformedLabel;

pub mod codec;

/// Security level, higher values denote more sensitive data or processes.
pub type Level = u32;

/// Compartment tag.
pub type Category = u16;

/// Class of entity a label applies to.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelType {
    /// Active entity, the clearance of a process
    Subject,
    /// Passive entity, the classification of a socket or a packet
    #[default]
    Object,
}

impl Display for LabelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelType::Subject => write!(f, "subject"),
            LabelType::Object => write!(f, "object"),
        }
    }
}

/// Security classification of a subject or an object.
///
/// Categories are kept in an ordered set, so two labels built from the same
/// compartments in a different order (or with duplicates) are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label {
    level: Level,
    categories: BTreeSet<Category>,
    label_type: LabelType,
}

impl Label {
    /// Creates a new label.
    ///
    /// Never fails: range checks belong to the codec, which is the only
    /// entry point for untrusted input.
    pub fn new(
        level: Level,
        categories: impl IntoIterator<Item = Category>,
        label_type: LabelType,
    ) -> Self {
        Self { level, categories: categories.into_iter().collect(), label_type }
    }

    /// Subject label with the given level and categories.
    pub fn subject(level: Level, categories: impl IntoIterator<Item = Category>) -> Self {
        Self::new(level, categories, LabelType::Subject)
    }

    /// Object label with the given level and categories.
    pub fn object(level: Level, categories: impl IntoIterator<Item = Category>) -> Self {
        Self::new(level, categories, LabelType::Object)
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn categories(&self) -> &BTreeSet<Category> {
        &self.categories
    }

    pub fn label_type(&self) -> LabelType {
        self.label_type
    }

    /// Returns a copy of this label carrying another type tag.
    pub fn with_type(&self, label_type: LabelType) -> Self {
        Self { label_type, ..self.clone() }
    }

    /// Dominance relation.
    ///
    /// `self` dominates `other` iff `self.level >= other.level` and every
    /// category of `other` is also a category of `self`. The relation is
    /// reflexive and transitive; the type tag is not part of it.
    pub fn dominates(&self, other: &Label) -> bool {
        self.level >= other.level && other.categories.is_subset(&self.categories)
    }

    /// Parses the canonical text form into an object label.
    pub fn parse(text: &str) -> Result<Self, MalformedLabel> {
        codec::parse(text)
    }

    /// Parses the canonical text form into a label of the given type.
    pub fn parse_as(text: &str, label_type: LabelType) -> Result<Self, MalformedLabel> {
        codec::parse_as(text, label_type)
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&codec::format(self))
    }
}

impl FromStr for Label {
    type Err = MalformedLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        codec::parse(s)
    }
}
