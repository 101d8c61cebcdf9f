pub mod options;
pub mod policy;
pub mod proto;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("unknown traffic direction: {0}")]
    UnknownDirection(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
