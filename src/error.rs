//! The error type shared by every client in the crate.

use tonic::{Code, Status};

/// A specialized `Result` whose error defaults to [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong when talking to the service.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server rejected the call.
    #[error("rpc error: {}: {}", .0.code(), .0.message())]
    Rpc(#[from] Status),
    /// A channel could not be established.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    /// A long-running operation completed with an error.
    #[error("operation failed: {}: {}", .0.code(), .0.message())]
    Operation(Status),
    /// The request was rejected before it was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The server responded with something that could not be interpreted.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// Some locations could not be reached while listing resources.
    #[error("resources in the following locations are unavailable: {}", .locations.join(", "))]
    PartiallyUnavailable {
        /// The locations that failed to respond.
        locations: Vec<String>,
    },
    /// An error annotated with what had already happened when it occurred.
    #[error("{context}: {source}")]
    Context {
        /// What had already been done.
        context: String,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Wrap the error with a description of the progress made before it happened.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The gRPC status carried by this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<&Status> {
        match self {
            Self::Rpc(status) | Self::Operation(status) => Some(status),
            Self::Context { source, .. } => source.status(),
            _ => None,
        }
    }

    /// The gRPC code of this error. Client-side failures map to the closest code.
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Self::Rpc(status) | Self::Operation(status) => status.code(),
            Self::Transport(_) | Self::PartiallyUnavailable { .. } => Code::Unavailable,
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::Malformed(_) => Code::Internal,
            Self::Context { source, .. } => source.code(),
        }
    }
}

impl From<prost::DecodeError> for Error {
    fn from(err: prost::DecodeError) -> Self {
        Self::Malformed(err.to_string())
    }
}
