use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::api::{L4Proto, L7Rules};
use crate::labels::LabelArray;
use crate::selector::{EndpointSelector, EndpointSelectorSlice};

/// The application protocol decoder a filter hands traffic to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum L7ParserType {
    #[default]
    None,
    Http,
    Kafka,
    Generic(String),
}

impl L7ParserType {
    pub fn is_none(&self) -> bool {
        matches!(self, L7ParserType::None)
    }

    /// The record that admits everything under this parser.
    pub(crate) fn allow_all_rules(&self) -> L7Rules {
        match self {
            L7ParserType::Kafka => L7Rules::Kafka(vec![]),
            L7ParserType::Generic(protocol) => L7Rules::Generic {
                protocol: protocol.clone(),
                rules: vec![],
            },
            _ => L7Rules::Http(vec![]),
        }
    }
}

impl fmt::Display for L7ParserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            L7ParserType::None => write!(f, "none"),
            L7ParserType::Http => write!(f, "http"),
            L7ParserType::Kafka => write!(f, "kafka"),
            L7ParserType::Generic(name) => write!(f, "{name}"),
        }
    }
}

impl L7Rules {
    /// The parser this rule set demands.
    pub fn parser_type(&self) -> L7ParserType {
        match self {
            L7Rules::Http(rules) if !rules.is_empty() => L7ParserType::Http,
            L7Rules::Kafka(rules) if !rules.is_empty() => L7ParserType::Kafka,
            L7Rules::Generic { protocol, .. } if !protocol.is_empty() => {
                L7ParserType::Generic(protocol.clone())
            }
            _ => L7ParserType::None,
        }
    }
}

/// Per-peer L7 rules, in first-seen insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct L7DataMap {
    entries: Vec<(EndpointSelector, L7Rules)>,
}

impl L7DataMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, selector: &EndpointSelector) -> Option<&L7Rules> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate == selector)
            .map(|(_, rules)| rules)
    }

    pub fn contains(&self, selector: &EndpointSelector) -> bool {
        self.get(selector).is_some()
    }

    /// Replaces the entry for `selector`, appending when absent.
    pub fn insert(&mut self, selector: EndpointSelector, rules: L7Rules) {
        match self.position(&selector) {
            Some(index) => self.entries[index].1 = rules,
            None => self.entries.push((selector, rules)),
        }
    }

    /// Returns the entry for `selector`, appending `default()` first
    /// when absent.
    pub(crate) fn get_or_insert_with(
        &mut self,
        selector: &EndpointSelector,
        default: impl FnOnce() -> L7Rules,
    ) -> &mut L7Rules {
        let index = match self.position(selector) {
            Some(index) => index,
            None => {
                self.entries.push((selector.clone(), default()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index].1
    }

    fn position(&self, selector: &EndpointSelector) -> Option<usize> {
        self.entries
            .iter()
            .position(|(candidate, _)| candidate == selector)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EndpointSelector, &L7Rules)> {
        self.entries.iter().map(|(selector, rules)| (selector, rules))
    }
}

impl FromIterator<(EndpointSelector, L7Rules)> for L7DataMap {
    fn from_iter<T: IntoIterator<Item = (EndpointSelector, L7Rules)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (selector, rules) in iter {
            map.insert(selector, rules);
        }
        map
    }
}

/// One resolved per-port filter. All filters stored under the same
/// `"<port>/<proto>"` key share that port and protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct L4Filter {
    pub port: u16,
    pub protocol: L4Proto,
    /// IANA protocol number matching `protocol`.
    pub u8_proto: u8,
    pub ingress: bool,
    /// Peers admitted at L3, in first-seen order.
    pub endpoints: EndpointSelectorSlice,
    pub l7_parser: L7ParserType,
    pub l7_rules_per_ep: L7DataMap,
    /// One entry per rule that contributed, in merge order.
    pub derived_from_rules: Vec<LabelArray>,
}

pub type L4PolicyMap = BTreeMap<String, L4Filter>;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct L4Policy {
    pub ingress: L4PolicyMap,
    pub egress: L4PolicyMap,
}

impl L4Policy {
    pub fn new() -> Self {
        Self::default()
    }
}
