//! Filtering of preferred SSH algorithm lists against what is available.
//!
//! The generated file should never pin a host to an algorithm the local SSH
//! client does not offer; when nothing preferred survives the intersection,
//! the configured fallback list keeps the host connectable.

use serde::{Deserialize, Serialize};

/// An algorithm list as written in the configuration: either a
/// comma-separated string or a list of names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlgorithmSpec {
    Csv(String),
    List(Vec<String>),
}

impl AlgorithmSpec {
    /// Normalize into individual names, splitting on commas and whitespace.
    pub fn names(&self) -> Vec<String> {
        match self {
            AlgorithmSpec::List(names) => names
                .iter()
                .flat_map(|n| split_names(n))
                .collect(),
            AlgorithmSpec::Csv(text) => split_names(text),
        }
    }
}

fn split_names(text: &str) -> Vec<String> {
    text.split([',', ' ', '\t'])
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

/// Intersect a preference list against the available set, preserving
/// preference order. Returns `None` when there is nothing to emit; an empty
/// intersection falls back to `fallback` verbatim.
pub fn filter_algorithms(
    preferred: &[String],
    available: &[String],
    fallback: &[String],
) -> Option<String> {
    if preferred.is_empty() {
        return None;
    }
    let filtered: Vec<&String> = preferred
        .iter()
        .filter(|p| available.contains(p))
        .collect();
    let chosen: Vec<&String> = if filtered.is_empty() {
        fallback.iter().collect()
    } else {
        filtered
    };
    if chosen.is_empty() {
        return None;
    }
    Some(
        chosen
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(","),
    )
}
