use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot merge conflicting L7 parsers ({existing}/{incoming}) on {port}")]
    ParserConflict {
        existing: String,
        incoming: String,
        port: String,
    },

    #[error("invalid port {0:?}: not a decimal number")]
    InvalidPort(String),

    #[error("port {0} is out of range")]
    PortOutOfRange(u32),

    #[error("generic L7 rules require a protocol name")]
    EmptyL7Protocol,

    #[error("L7 rule list must not be empty")]
    EmptyL7Rules,

    #[error("selector label keys must not be empty")]
    EmptyLabelKey,
}
