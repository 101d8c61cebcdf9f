use std::fmt;

/// Label source prefix for labels derived from reserved identities.
pub const RESERVED_LABEL_SOURCE: &str = "reserved";

/// Well-known identities with fixed numeric handles. Callers resolve
/// names through this table instead of hard-coding the numbers.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ReservedIdentity {
    Host = 1,
    World = 2,
    Health = 4,
}

const RESERVED_IDENTITIES: [ReservedIdentity; 3] = [
    ReservedIdentity::Host,
    ReservedIdentity::World,
    ReservedIdentity::Health,
];

impl ReservedIdentity {
    pub fn from_name(name: &str) -> Option<Self> {
        RESERVED_IDENTITIES
            .into_iter()
            .find(|identity| identity.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            ReservedIdentity::Host => "host",
            ReservedIdentity::World => "world",
            ReservedIdentity::Health => "health",
        }
    }

    pub fn id(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ReservedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
