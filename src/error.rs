use std::{io, path::PathBuf};

use crate::api::Problem;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure modes of a subcommand.
///
/// Every protocol operation returns `Result<_, Error>`; the variant carries
/// enough structure that callers can recover where the protocol allows it
/// (notably [`Error::Problem`] for the `accountDoesNotExist` fallback during
/// account creation) instead of matching on message strings.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The HTTP round-trip itself failed (DNS, TCP, TLS, timeout).
    #[error("transport error: {0}")]
    Transport(#[source] Box<ureq::Transport>),

    /// The server returned an ACME problem document.
    #[error("the server reported a problem: {0}")]
    Problem(Problem),

    /// Unexpected status code, missing header, or malformed response.
    #[error("{0}")]
    Protocol(String),

    /// The validation hook could not be executed or died abnormally.
    ///
    /// A hook that exits with a nonzero status *declines* a challenge and is
    /// not an error; this variant is reserved for spawn failures and deaths
    /// by signal.
    #[error("hook failed with status {0}")]
    Hook(i32),

    /// Invalid command line input, rejected before any network traffic.
    #[error("{0}")]
    Input(String),

    #[error("{}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Key, CSR, or certificate handling failed.
    #[error("{0}")]
    Crypto(String),
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Error::Input(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        Error::Crypto(msg.into())
    }

    pub fn fs(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// The problem document, when the server sent one.
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            Error::Problem(problem) => Some(problem),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(format!("malformed JSON: {err}"))
    }
}
