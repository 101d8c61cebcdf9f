use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::{RESERVED_LABEL_SOURCE, ReservedIdentity};
use crate::labels::Label;
use crate::{Error, Result};

/// A predicate over endpoint label sets. An empty selector is the
/// wildcard and matches every endpoint. Equality is structural, so two
/// selectors built from the same labels compare equal regardless of how
/// they were constructed.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointSelector {
    match_labels: BTreeMap<String, String>,
}

impl EndpointSelector {
    /// The selector that matches every endpoint.
    pub fn wildcard() -> Self {
        Self::default()
    }

    pub fn from_labels<I: IntoIterator<Item = Label>>(labels: I) -> Self {
        Self {
            match_labels: labels
                .into_iter()
                .map(|label| (label.key, label.value))
                .collect(),
        }
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            match_labels: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Selector for a reserved identity, e.g. `reserved:host`.
    pub fn reserved(identity: ReservedIdentity) -> Self {
        Self::from_pairs([(
            format!("{RESERVED_LABEL_SOURCE}:{}", identity.name()),
            String::new(),
        )])
    }

    pub fn is_wildcard(&self) -> bool {
        self.match_labels.is_empty()
    }

    /// True when every required label is present in `labels`. An empty
    /// required value matches any value under that key.
    pub fn matches(&self, labels: &[Label]) -> bool {
        self.match_labels.iter().all(|(key, value)| {
            labels
                .iter()
                .any(|label| &label.key == key && (value.is_empty() || &label.value == value))
        })
    }

    pub(crate) fn sanitize(&self) -> Result<()> {
        if self.match_labels.keys().any(|key| key.is_empty()) {
            return Err(Error::EmptyLabelKey);
        }
        Ok(())
    }
}

impl fmt::Display for EndpointSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            return write!(f, "*");
        }
        let joined = self
            .match_labels
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{joined}")
    }
}

pub type EndpointSelectorSlice = Vec<EndpointSelector>;

pub trait SelectsAllEndpoints {
    fn selects_all_endpoints(&self) -> bool;
}

impl SelectsAllEndpoints for [EndpointSelector] {
    fn selects_all_endpoints(&self) -> bool {
        self.iter().any(EndpointSelector::is_wildcard)
    }
}

/// Selector for the local host identity.
pub fn host_selector() -> EndpointSelector {
    EndpointSelector::reserved(ReservedIdentity::Host)
}
