use std::fmt;

use serde::{Deserialize, Serialize};

/// A single `key=value` label. The value may be empty, in which case the
/// label matches purely on its key.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parses `"key=value"` or a bare `"key"`.
    pub fn parse(s: &str) -> Self {
        match s.split_once('=') {
            Some((key, value)) => Self::new(key, value),
            None => Self::new(s, ""),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_empty() {
            write!(f, "{}", self.key)
        } else {
            write!(f, "{}={}", self.key, self.value)
        }
    }
}

pub type LabelArray = Vec<Label>;

pub fn parse_label_array(items: &[&str]) -> LabelArray {
    items.iter().map(|s| Label::parse(s)).collect()
}

pub(crate) fn format_labels(labels: &[Label]) -> String {
    let joined = labels
        .iter()
        .map(Label::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    format!("[{joined}]")
}
