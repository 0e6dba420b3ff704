//! Attribute filters
//!
//! A filter is a conjunction of `key = value` predicates resolved to interned
//! indices once per query. Node attribute sets are supersets of their
//! descendants', so a node failing a predicate prunes its whole subtree.

use crate::index::AttributeDictionary;
use crate::storage::AttributeSets;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What to do with a predicate whose key or value was never ingested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedFilterPolicy {
    /// Drop the predicate; the rest of the filter still applies
    #[default]
    Ignore,
    /// The whole filter matches nothing
    MatchNothing,
}

/// Resolved conjunction of attribute-equality predicates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeFilter {
    predicates: Vec<(String, u32)>,
    match_nothing: bool,
}

impl AttributeFilter {
    /// Filter that accepts every node
    pub fn none() -> Self {
        Self::default()
    }

    pub fn resolve(
        pairs: &BTreeMap<String, String>,
        dictionary: &AttributeDictionary,
        policy: UnresolvedFilterPolicy,
    ) -> Self {
        let mut filter = Self::default();
        for (key, value) in pairs {
            match dictionary.resolve(key, value) {
                Some(index) => filter.predicates.push((key.clone(), index)),
                None => match policy {
                    UnresolvedFilterPolicy::Ignore => {
                        tracing::debug!(key = %key, value = %value, "Dropping unresolved filter predicate");
                    }
                    UnresolvedFilterPolicy::MatchNothing => {
                        tracing::debug!(key = %key, value = %value, "Unresolved filter predicate matches nothing");
                        filter.match_nothing = true;
                    }
                },
            }
        }
        filter
    }

    /// Whether evaluating the filter can reject anything
    pub fn is_active(&self) -> bool {
        self.match_nothing || !self.predicates.is_empty()
    }

    pub fn matches_nothing(&self) -> bool {
        self.match_nothing
    }

    /// Whether a node's attribute sets satisfy every predicate
    pub fn matches(&self, attributes: &AttributeSets) -> bool {
        !self.match_nothing
            && self
                .predicates
                .iter()
                .all(|(key, index)| attributes.contains(key, *index))
    }
}
