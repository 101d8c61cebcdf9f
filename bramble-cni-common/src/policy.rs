use core::fmt::Display;
use std::str::FromStr;

use crate::Error;

/// Direction a policy map entry applies to. `Invalid` is the sentinel the
/// CLI falls back to when an argument fails to parse.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
pub enum TrafficDirection {
    #[default]
    Invalid = 0,
    Ingress = 1,
    Egress = 2,
}

impl Display for TrafficDirection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TrafficDirection::Invalid => write!(f, "INVALID"),
            TrafficDirection::Ingress => write!(f, "INGRESS"),
            TrafficDirection::Egress => write!(f, "EGRESS"),
        }
    }
}

impl FromStr for TrafficDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ingress" => Ok(TrafficDirection::Ingress),
            "egress" => Ok(TrafficDirection::Egress),
            _ => Err(Error::UnknownDirection(s.to_string())),
        }
    }
}

/// One entry in the flat per-identity-pair filter map the data plane
/// consumes. Identities are the numeric handles of the two label sets.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PolicyKey {
    pub src_id: u32,
    pub dst_id: u32,
    /// Zero widens the entry to every destination port.
    pub dst_port: u16,
    /// IANA protocol number; zero widens the entry to every protocol.
    pub proto: u8,
    pub _pad: [u8; 1],
}

impl PolicyKey {
    pub fn new(src_id: u32, dst_id: u32, dst_port: u16, proto: u8) -> Self {
        Self {
            src_id,
            dst_id,
            dst_port,
            proto,
            _pad: [0; 1],
        }
    }
}

/// Verdict attached to a [`PolicyKey`], stored as the numeric encoding
/// of [`Action`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PolicyValue {
    pub action: u8,
}

impl PolicyValue {
    pub fn allow() -> Self {
        Self {
            action: Action::Allow as u8,
        }
    }

    pub fn deny() -> Self {
        Self {
            action: Action::Deny as u8,
        }
    }

    pub fn action(&self) -> Action {
        Action::from(self.action)
    }
}

/// Verdict the data plane applies to traffic matching a key.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
pub enum Action {
    #[default]
    Allow = 0,
    Deny = 1,
}

impl Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Action::Allow => "ALLOW",
            Action::Deny => "DENY",
        })
    }
}

impl From<u8> for Action {
    fn from(value: u8) -> Self {
        if value == Action::Allow as u8 {
            Action::Allow
        } else {
            Action::Deny
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::{Action, PolicyValue, TrafficDirection};

    #[test]
    fn parses_directions_case_insensitively() {
        for case in ["ingress", "Ingress", "InGrEss"] {
            assert_eq!(
                TrafficDirection::from_str(case).unwrap(),
                TrafficDirection::Ingress
            );
        }
        for case in ["egress", "Egress", "EGrEss"] {
            assert_eq!(
                TrafficDirection::from_str(case).unwrap(),
                TrafficDirection::Egress
            );
        }
    }

    #[test]
    fn rejects_unknown_directions() {
        assert!(TrafficDirection::from_str("getItDoneMan").is_err());
        assert_eq!(TrafficDirection::default(), TrafficDirection::Invalid);
    }

    #[test]
    fn action_encoding_round_trips() {
        assert_eq!(PolicyValue::allow().action(), Action::Allow);
        assert_eq!(PolicyValue::deny().action(), Action::Deny);
        assert_eq!(Action::from(0), Action::Allow);
        assert_eq!(Action::from(7), Action::Deny);
    }
}
