//! Inclusion predicates deciding which entities get a projected row.
//!
//! Used for option/state filtering in parameter views and for narrowing a
//! file store to one kind.

use crate::model::entity::{attribute_text, EntityKind, EntitySnapshot};
use regex::Regex;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Rule deciding whether one entity is projected.
pub trait InclusionPredicate: Send + Sync {
    fn includes(&self, entity: &EntitySnapshot) -> bool;

    /// Short description for diagnostics.
    fn describe(&self) -> String;
}

/// Includes every scope member.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeAll;

impl InclusionPredicate for IncludeAll {
    fn includes(&self, _entity: &EntitySnapshot) -> bool {
        true
    }

    fn describe(&self) -> String {
        "all".to_string()
    }
}

/// Includes entities whose kind is in the set.
#[derive(Debug, Clone, Default)]
pub struct KindFilter {
    kinds: BTreeSet<EntityKind>,
}

impl KindFilter {
    pub fn new(kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }
}

impl InclusionPredicate for KindFilter {
    fn includes(&self, entity: &EntitySnapshot) -> bool {
        self.kinds.contains(&entity.kind)
    }

    fn describe(&self) -> String {
        let kinds: Vec<&str> = self.kinds.iter().map(|kind| kind.as_str()).collect();
        format!("kind in [{}]", kinds.join(","))
    }
}

/// Includes entities whose text attribute matches a pattern.
///
/// Entities without the attribute are included only when
/// `include_missing` is set, so one pattern can filter value-set rows by
/// option while leaving their parameters alone.
#[derive(Debug, Clone)]
pub struct AttributePattern {
    key: String,
    pattern: Regex,
    include_missing: bool,
}

impl AttributePattern {
    /// Compiles `pattern` for attribute `key`.
    ///
    /// # Errors
    /// - `EmptyKey` when `key` is blank.
    /// - `InvalidPattern` when `pattern` is not a valid regex.
    pub fn new(key: &str, pattern: &str) -> Result<Self, PredicateError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(PredicateError::EmptyKey);
        }
        let pattern = Regex::new(pattern).map_err(|err| PredicateError::InvalidPattern {
            pattern: pattern.to_string(),
            message: err.to_string(),
        })?;
        Ok(Self {
            key: key.to_string(),
            pattern,
            include_missing: false,
        })
    }

    pub fn include_missing(mut self, include_missing: bool) -> Self {
        self.include_missing = include_missing;
        self
    }
}

impl InclusionPredicate for AttributePattern {
    fn includes(&self, entity: &EntitySnapshot) -> bool {
        match attribute_text(&entity.attributes, &self.key) {
            Some(value) => self.pattern.is_match(value),
            None => self.include_missing,
        }
    }

    fn describe(&self) -> String {
        format!("{} =~ /{}/", self.key, self.pattern.as_str())
    }
}

/// Includes entities accepted by every inner predicate.
#[derive(Default)]
pub struct AllOf {
    predicates: Vec<Box<dyn InclusionPredicate>>,
}

impl AllOf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(mut self, predicate: impl InclusionPredicate + 'static) -> Self {
        self.predicates.push(Box::new(predicate));
        self
    }
}

impl InclusionPredicate for AllOf {
    fn includes(&self, entity: &EntitySnapshot) -> bool {
        self.predicates
            .iter()
            .all(|predicate| predicate.includes(entity))
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self
            .predicates
            .iter()
            .map(|predicate| predicate.describe())
            .collect();
        format!("all_of({})", parts.join(" && "))
    }
}

/// Predicate construction errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateError {
    EmptyKey,
    InvalidPattern { pattern: String, message: String },
}

impl Display for PredicateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyKey => write!(f, "attribute key must not be blank"),
            Self::InvalidPattern { pattern, message } => {
                write!(f, "invalid attribute pattern `{pattern}`: {message}")
            }
        }
    }
}

impl Error for PredicateError {}

#[cfg(test)]
mod tests {
    use super::{AllOf, AttributePattern, InclusionPredicate, KindFilter, PredicateError};
    use crate::model::entity::{EntityKind, EntitySnapshot};

    #[test]
    fn attribute_pattern_filters_value_sets_by_option() {
        let predicate = AttributePattern::new("option", "^opt_a$")
            .unwrap()
            .include_missing(true);

        let matching = EntitySnapshot::named(EntityKind::ValueSet, "v1").with_attribute("option", "opt_a");
        let other = EntitySnapshot::named(EntityKind::ValueSet, "v2").with_attribute("option", "opt_b");
        let parameter = EntitySnapshot::named(EntityKind::Parameter, "mass");

        assert!(predicate.includes(&matching));
        assert!(!predicate.includes(&other));
        assert!(predicate.includes(&parameter));
    }

    #[test]
    fn attribute_pattern_rejects_bad_input() {
        assert_eq!(
            AttributePattern::new("  ", ".*").unwrap_err(),
            PredicateError::EmptyKey
        );
        assert!(matches!(
            AttributePattern::new("name", "(").unwrap_err(),
            PredicateError::InvalidPattern { .. }
        ));
    }

    #[test]
    fn all_of_requires_every_predicate() {
        let predicate = AllOf::new()
            .and(KindFilter::new([EntityKind::Folder, EntityKind::File]))
            .and(AttributePattern::new("name", "^keep").unwrap());

        assert!(predicate.includes(&EntitySnapshot::named(EntityKind::File, "keep.txt")));
        assert!(!predicate.includes(&EntitySnapshot::named(EntityKind::File, "drop.txt")));
        assert!(!predicate.includes(&EntitySnapshot::named(EntityKind::Parameter, "keep")));
        assert_eq!(
            predicate.describe(),
            "all_of(kind in [folder,file] && name =~ /^keep/)"
        );
    }
}
