// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Label selectors for list operations against the store
//!
//! Derived native objects carry owner labels because the store cannot query
//! owner references.  Selectors combine exact-match labels with existence
//! requirements; the legacy label migration relies on the does-not-exist
//! form to find bindings created under the old ownership scheme.

use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FormatResult;

/// Selects objects by their labels
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct LabelSelector {
    match_labels: BTreeMap<String, String>,
    requirements: Vec<Requirement>,
}

/// An existence constraint on a single label key
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Requirement {
    key: String,
    operator: Operator,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Operator {
    Exists,
    DoesNotExist,
}

impl Requirement {
    pub fn exists(key: &str) -> Requirement {
        Requirement { key: key.to_string(), operator: Operator::Exists }
    }

    pub fn does_not_exist(key: &str) -> Requirement {
        Requirement { key: key.to_string(), operator: Operator::DoesNotExist }
    }
}

impl LabelSelector {
    pub fn new() -> LabelSelector {
        LabelSelector::default()
    }

    /// Selects everything
    pub fn everything() -> LabelSelector {
        LabelSelector::default()
    }

    /// Requires the label `key` to be present with exactly `value`
    pub fn match_label(mut self, key: &str, value: &str) -> LabelSelector {
        self.match_labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Adds an existence requirement
    pub fn require(mut self, requirement: Requirement) -> LabelSelector {
        self.requirements.push(requirement);
        self
    }

    /// Returns whether an object carrying `labels` is selected
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        for (key, value) in &self.match_labels {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
        self.requirements.iter().all(|r| match r.operator {
            Operator::Exists => labels.contains_key(&r.key),
            Operator::DoesNotExist => !labels.contains_key(&r.key),
        })
    }
}

impl Display for LabelSelector {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        let mut terms = Vec::new();
        for (key, value) in &self.match_labels {
            terms.push(format!("{}={}", key, value));
        }
        for r in &self.requirements {
            match r.operator {
                Operator::Exists => terms.push(r.key.clone()),
                Operator::DoesNotExist => terms.push(format!("!{}", r.key)),
            }
        }
        write!(f, "{}", terms.join(","))
    }
}
