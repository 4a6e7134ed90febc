//! Error types for vidshrink

use crate::progress::Stage;
use thiserror::Error;

/// Result type alias for vidshrink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for vidshrink operations
#[derive(Error, Debug)]
pub enum Error {
    /// The runtime lacks the decode/encode primitives the pipeline needs
    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// The source asset could not be opened or played
    #[error("Decode unavailable: {0}")]
    DecodeUnavailable(String),

    /// An encode call failed mid-stream
    #[error("Encoding error: {0}")]
    Encode(String),

    /// Container contract violation or inconsistent sample table
    #[error("Muxing error: {0}")]
    Mux(String),

    /// The caller cancelled the run
    #[error("Cancelled")]
    Cancelled,

    /// Invalid input parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A failure annotated with the pipeline stage it happened in
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },
}

/// Error taxonomy, independent of any stage annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedEnvironment,
    DecodeUnavailable,
    EncodeFailure,
    MuxError,
    Cancelled,
    InvalidInput,
    Io,
}

impl Error {
    /// Wrap this error with the stage it occurred in.
    ///
    /// An error that already carries a stage keeps its innermost one.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            Error::Stage { .. } => self,
            other => Error::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Root kind of this error, looking through stage annotations
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedEnvironment(_) => ErrorKind::UnsupportedEnvironment,
            Error::DecodeUnavailable(_) => ErrorKind::DecodeUnavailable,
            Error::Encode(_) => ErrorKind::EncodeFailure,
            Error::Mux(_) => ErrorKind::MuxError,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Io(_) => ErrorKind::Io,
            Error::Stage { source, .. } => source.kind(),
        }
    }

    /// Stage the error was raised in, if known
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Error code for FFI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub enum ErrorCode {
    /// Success
    Ok = 0,
    /// Invalid input parameter
    InvalidInput = 1,
    /// Decode/encode primitives unavailable
    UnsupportedEnvironment = 2,
    /// Source could not be decoded
    DecodeUnavailable = 3,
    /// I/O error
    IoError = 4,
    /// Encoding error
    EncodeError = 5,
    /// Muxing error
    MuxError = 6,
    /// Run was cancelled
    Cancelled = 7,
}

impl From<&Error> for ErrorCode {
    fn from(err: &Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidInput => ErrorCode::InvalidInput,
            ErrorKind::UnsupportedEnvironment => ErrorCode::UnsupportedEnvironment,
            ErrorKind::DecodeUnavailable => ErrorCode::DecodeUnavailable,
            ErrorKind::Io => ErrorCode::IoError,
            ErrorKind::EncodeFailure => ErrorCode::EncodeError,
            ErrorKind::MuxError => ErrorCode::MuxError,
            ErrorKind::Cancelled => ErrorCode::Cancelled,
        }
    }
}
