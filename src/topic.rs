//! Topic arguments and filter matching.

use crate::error::{ClientError, Result};

/// Suffix that turns a topic into a prefix filter (`/a/b/#` matches `/a/b/c`).
pub const WILDCARD_SUFFIX: &str = "#";

/// One topic or a collection of topics.
///
/// Accepted wherever the client subscribes or unsubscribes, so callers can
/// pass `"a"`, `vec!["a", "b"]` or `["a", "b"]` without converting first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topics {
    One(String),
    Many(Vec<String>),
}

impl Topics {
    /// Validate and flatten into a de-duplicated list, preserving first-seen order.
    pub fn into_validated(self) -> Result<Vec<String>> {
        let topics = match self {
            Topics::One(topic) => vec![topic],
            Topics::Many(topics) => topics,
        };
        if topics.is_empty() {
            return Err(ClientError::invalid_argument("topic collection is empty"));
        }

        let mut unique: Vec<String> = Vec::with_capacity(topics.len());
        for topic in topics {
            if topic.is_empty() {
                return Err(ClientError::invalid_argument("topic must not be empty"));
            }
            if !unique.contains(&topic) {
                unique.push(topic);
            }
        }
        Ok(unique)
    }
}

impl From<&str> for Topics {
    fn from(topic: &str) -> Self {
        Topics::One(topic.to_string())
    }
}

impl From<String> for Topics {
    fn from(topic: String) -> Self {
        Topics::One(topic)
    }
}

impl From<&String> for Topics {
    fn from(topic: &String) -> Self {
        Topics::One(topic.clone())
    }
}

impl From<Vec<String>> for Topics {
    fn from(topics: Vec<String>) -> Self {
        Topics::Many(topics)
    }
}

impl From<Vec<&str>> for Topics {
    fn from(topics: Vec<&str>) -> Self {
        Topics::Many(topics.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Topics {
    fn from(topics: &[&str]) -> Self {
        Topics::Many(topics.iter().map(|t| t.to_string()).collect())
    }
}

impl From<&[String]> for Topics {
    fn from(topics: &[String]) -> Self {
        Topics::Many(topics.to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for Topics {
    fn from(topics: [&str; N]) -> Self {
        Topics::Many(topics.iter().map(|t| t.to_string()).collect())
    }
}

impl From<std::collections::BTreeSet<String>> for Topics {
    fn from(topics: std::collections::BTreeSet<String>) -> Self {
        Topics::Many(topics.into_iter().collect())
    }
}

/// True when `filter` selects `topic`.
///
/// A filter matches its exact topic. A filter ending in `#` matches every
/// topic that starts with the part before the `#`; a bare `#` matches all.
pub fn matches(filter: &str, topic: &str) -> bool {
    match filter.strip_suffix(WILDCARD_SUFFIX) {
        Some(prefix) => topic.starts_with(prefix),
        None => filter == topic,
    }
}
