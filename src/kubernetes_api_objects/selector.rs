// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    In(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let value = |key: &str| labels.and_then(|l| l.get(key));
        match self {
            Requirement::Equals(key, expected) => value(key) == Some(expected),
            Requirement::In(key, values) => value(key).map_or(false, |v| values.contains(v)),
            Requirement::Exists(key) => value(key).is_some(),
            Requirement::DoesNotExist(key) => value(key).is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Equals(key, value) => write!(f, "{}={}", key, value),
            Requirement::In(key, values) => write!(f, "{} in ({})", key, values.join(",")),
            Requirement::Exists(key) => write!(f, "{}", key),
            Requirement::DoesNotExist(key) => write!(f, "!{}", key),
        }
    }
}

/// A conjunction of label requirements. It is evaluated locally against
/// cached objects and rendered as a label query for list and delete calls.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn new() -> Selector {
        Selector::default()
    }

    pub fn everything() -> Selector {
        Selector::default()
    }

    pub fn equals(mut self, key: &str, value: &str) -> Selector {
        self.requirements.push(Requirement::Equals(key.to_string(), value.to_string()));
        self
    }

    pub fn in_values(mut self, key: &str, values: Vec<String>) -> Selector {
        self.requirements.push(Requirement::In(key.to_string(), values));
        self
    }

    pub fn exists(mut self, key: &str) -> Selector {
        self.requirements.push(Requirement::Exists(key.to_string()));
        self
    }

    pub fn does_not_exist(mut self, key: &str) -> Selector {
        self.requirements.push(Requirement::DoesNotExist(key.to_string()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", rendered.join(","))
    }
}
