/// Error type shared by every stage of a tally run.
///
/// Only configuration problems and an unresolvable live chat are terminal.
/// Request failures during pagination never reach `main`: the fetch loop
/// stops and the run continues with what it already has.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected API payload: {0}")]
    Parse(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TallyError {
    /// Process exit code for this error when it ends the run.
    pub fn exit_code(&self) -> i32 {
        match self {
            TallyError::ConfigMissing(_) | TallyError::InvalidConfig(_) => 2,
            _ => 1,
        }
    }
}

impl From<ureq::Error> for TallyError {
    fn from(e: ureq::Error) -> Self {
        TallyError::Request(e.to_string())
    }
}
