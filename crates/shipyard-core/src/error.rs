//! Error types for Shipyard.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("received status code {code}: {body}")]
    HttpStatus { code: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("provisioning failed on {container}: {source}")]
    Provisioning {
        container: String,
        #[source]
        source: Box<Error>,
    },

    #[error("no build container available: {0}")]
    NoContainerAvailable(String),

    #[error("builder pool is at capacity")]
    CapacityExhausted,

    #[error("queue error: {0}")]
    Queue(String),

    #[error("invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("build environment is missing {0}")]
    MissingCallback(&'static str),
}

impl Error {
    /// Wrap an error raised while provisioning `container`.
    pub fn provisioning(container: impl Into<String>, source: Error) -> Self {
        Error::Provisioning {
            container: container.into(),
            source: Box::new(source),
        }
    }

    /// HTTP status code carried by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::HttpStatus { code, .. } => Some(*code),
            Error::Provisioning { source, .. } => source.status_code(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
