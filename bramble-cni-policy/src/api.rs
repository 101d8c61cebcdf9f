use std::collections::BTreeMap;
use std::fmt;

use bramble_cni_common::proto::Protocol;
use serde::{Deserialize, Serialize};

use crate::labels::LabelArray;
use crate::selector::EndpointSelector;
use crate::{Error, Result};

/// A declarative network security rule. The endpoint selector decides
/// which endpoints the rule applies to; the ingress and egress clauses
/// describe which peers may talk to them and on which ports.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub endpoint_selector: EndpointSelector,
    #[serde(default)]
    pub ingress: Vec<IngressRule>,
    #[serde(default)]
    pub egress: Vec<EgressRule>,
    /// Provenance labels, carried into the resolved filters.
    #[serde(default)]
    pub labels: LabelArray,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    /// Peers allowed to connect. An empty list allows every peer.
    #[serde(default)]
    pub from_endpoints: Vec<EndpointSelector>,
    #[serde(default)]
    pub to_ports: Vec<PortRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressRule {
    /// Destinations the endpoint may connect to. An empty list allows all.
    #[serde(default)]
    pub to_endpoints: Vec<EndpointSelector>,
    #[serde(default)]
    pub to_ports: Vec<PortRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRule {
    pub ports: Vec<PortProtocol>,
    /// Absent means no application-layer restriction.
    #[serde(default)]
    pub rules: Option<L7Rules>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortProtocol {
    /// Decimal port number. `"0"` means any port.
    pub port: String,
    #[serde(default)]
    pub protocol: L4Proto,
}

impl PortProtocol {
    pub(crate) fn parse_port(&self) -> Result<u16> {
        let port: u32 = self
            .port
            .parse()
            .map_err(|_| Error::InvalidPort(self.port.clone()))?;
        if port > u16::MAX as u32 {
            return Err(Error::PortOutOfRange(port));
        }
        Ok(port as u16)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum L4Proto {
    #[default]
    Any,
    Tcp,
    Udp,
}

impl L4Proto {
    /// The concrete protocols this stands for; `Any` covers both.
    pub fn expand(self) -> &'static [L4Proto] {
        match self {
            L4Proto::Any => &[L4Proto::Tcp, L4Proto::Udp],
            L4Proto::Tcp => &[L4Proto::Tcp],
            L4Proto::Udp => &[L4Proto::Udp],
        }
    }

    pub fn u8_proto(self) -> u8 {
        match self {
            L4Proto::Any => Protocol::Any as u8,
            L4Proto::Tcp => Protocol::Tcp as u8,
            L4Proto::Udp => Protocol::Udp as u8,
        }
    }
}

impl fmt::Display for L4Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            L4Proto::Any => write!(f, "ANY"),
            L4Proto::Tcp => write!(f, "TCP"),
            L4Proto::Udp => write!(f, "UDP"),
        }
    }
}

/// Application-layer match rules for one port rule. Exactly one protocol
/// family per port rule; the variant carries its ordered match records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum L7Rules {
    Http(Vec<HttpRule>),
    Kafka(Vec<KafkaRule>),
    Generic {
        protocol: String,
        /// May be empty: parse as `protocol`, admit everything.
        #[serde(default)]
        rules: Vec<BTreeMap<String, String>>,
    },
}

impl L7Rules {
    /// True when the record admits everything at L7.
    pub fn is_empty(&self) -> bool {
        match self {
            L7Rules::Http(rules) => rules.is_empty(),
            L7Rules::Kafka(rules) => rules.is_empty(),
            L7Rules::Generic { rules, .. } => rules.is_empty(),
        }
    }

    pub(crate) fn sanitize(&self) -> Result<()> {
        match self {
            L7Rules::Http(rules) if rules.is_empty() => Err(Error::EmptyL7Rules),
            L7Rules::Kafka(rules) if rules.is_empty() => Err(Error::EmptyL7Rules),
            L7Rules::Generic { protocol, .. } if protocol.is_empty() => {
                Err(Error::EmptyL7Protocol)
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRule {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub headers: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaRule {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub role: String,
}

impl Rule {
    /// Validates the rule. Must succeed before the rule may enter a
    /// repository.
    pub fn sanitize(&self) -> Result<()> {
        self.endpoint_selector.sanitize()?;
        for ingress in &self.ingress {
            for selector in &ingress.from_endpoints {
                selector.sanitize()?;
            }
            for port_rule in &ingress.to_ports {
                port_rule.sanitize()?;
            }
        }
        for egress in &self.egress {
            for selector in &egress.to_endpoints {
                selector.sanitize()?;
            }
            for port_rule in &egress.to_ports {
                port_rule.sanitize()?;
            }
        }
        Ok(())
    }
}

impl PortRule {
    fn sanitize(&self) -> Result<()> {
        for port_protocol in &self.ports {
            port_protocol.parse_port()?;
        }
        if let Some(rules) = &self.rules {
            rules.sanitize()?;
        }
        Ok(())
    }
}
