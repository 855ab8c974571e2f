//! Error types shared by every Rivulet module.
//!
//! Errors fall into three groups:
//!
//! - Fold errors: a reducer failed or a payload could not be decoded. These
//!   are isolated per event and delivered through an
//!   [`ErrorChannel`](crate::stream::ErrorChannel).
//! - Routine errors: a side-effect pipeline failed for one action. Also
//!   delivered through an error channel; the routine keeps running.
//! - Protocol violations: programmer errors such as reading the state of a
//!   torn-down stream or starting the registry twice. These are returned
//!   synchronously.

use crate::action::Qualifier;

/// Boxed error produced by user code (reducers, routines).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("reducer for `{source_label}` failed: {error}")]
    Reducer {
        source_label: String,
        #[source]
        error: BoxError,
    },

    #[error("could not serialize payload of `{action}`: {error}")]
    Payload {
        action: String,
        #[source]
        error: serde_json::Error,
    },

    #[error("routine `{routine}` failed: {error}")]
    Routine {
        routine: String,
        #[source]
        error: BoxError,
    },

    #[error("state stream `{0}` has been torn down")]
    StreamClosed(String),

    #[error("state stream `{0}` is already connected")]
    AlreadyConnected(String),

    #[error("state stream registry is already started")]
    RegistryStarted,

    #[error("state stream registry has been stopped")]
    RegistryStopped,

    #[error("a state stream named `{0}` is already registered")]
    DuplicateStream(String),

    #[error("cannot strip qualifier `{0}`: qualifier stack is empty")]
    EmptyQualifierStack(Qualifier),

    #[error("cannot strip qualifier `{expected}`: stack head is `{found}`")]
    QualifierMismatch { expected: Qualifier, found: Qualifier },

    #[error("could not convert state of `{stream}`: {error}")]
    State {
        stream: String,
        #[source]
        error: serde_json::Error,
    },

    #[error("snapshot encoding failed: {0}")]
    SnapshotEncode(#[from] rmp_serde::encode::Error),

    #[error("snapshot decoding failed: {0}")]
    SnapshotDecode(#[from] rmp_serde::decode::Error),

    #[error("snapshot json failed: {0}")]
    SnapshotJson(#[from] serde_json::Error),

    #[error("{} uncaught error(s), first: {}", .0.len(), first_message(.0))]
    Uncaught(Vec<Error>),
}

fn first_message(errors: &[Error]) -> String {
    errors
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "<none>".to_string())
}

impl Error {
    /// Wrap a user reducer failure.
    pub fn reducer(source_label: impl Into<String>, error: impl Into<BoxError>) -> Self {
        Self::Reducer {
            source_label: source_label.into(),
            error: error.into(),
        }
    }

    /// Wrap a user routine failure.
    pub fn routine(routine: impl Into<String>, error: impl Into<BoxError>) -> Self {
        Self::Routine {
            routine: routine.into(),
            error: error.into(),
        }
    }

    /// True for errors that indicate a programmer mistake rather than a
    /// failure inside user code.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::StreamClosed(_)
                | Self::AlreadyConnected(_)
                | Self::RegistryStarted
                | Self::RegistryStopped
                | Self::DuplicateStream(_)
                | Self::EmptyQualifierStack(_)
                | Self::QualifierMismatch { .. }
        )
    }

    /// Errors carried by an [`Error::Uncaught`], or the error itself.
    pub fn into_errors(self) -> Vec<Error> {
        match self {
            Self::Uncaught(errors) => errors,
            other => vec![other],
        }
    }
}
