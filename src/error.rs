use std::error::Error as StdError;

use log::error;

use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, Error>;

/// Error is returned from a lookup when fetching flags failed and the service was told to
/// [throw on errors](crate::Service::throw_on_errors).
///
/// The display text is a coarse category; the original failure is available through
/// [std::error::Error::source].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The query could not be encoded or the response body was not the expected JSON.
    #[error("could not parse flag data")]
    Parse(#[from] serde_json::Error),
    /// The request failed, timed out, or the server answered with a non-success status.
    #[error("network error")]
    Network(#[from] TransportError),
    /// Anything else that went wrong while fetching.
    #[error("internal error")]
    Internal(#[source] Box<dyn StdError + Send + Sync>),
}

impl Error {
    /// The human-readable category of the failure.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Parse(_) => "could not parse flag data",
            Error::Network(_) => "network error",
            Error::Internal(_) => "internal error",
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into().into())
    }
}

/// ErrorHandler is told about every failed fetch, whether or not the failure is also returned to
/// the caller.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, error: &Error);
}

impl<F> ErrorHandler for F
where
    F: Fn(&Error) + Send + Sync,
{
    fn handle(&self, error: &Error) {
        self(error)
    }
}

/// The default [ErrorHandler]; writes the failure and its cause to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn handle(&self, error: &Error) {
        match error.source() {
            Some(cause) => error!("failed to fetch feature flags: {}: {}", error, cause),
            None => error!("failed to fetch feature flags: {}", error),
        }
    }
}
