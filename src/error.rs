use std::{fmt, time::Duration};

use thiserror::Error;

/// Identity of an external backend, used for rate limiting and error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Engine,
    Oracle,
    Validator,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Engine => write!(f, "engine"),
            Backend::Oracle => write!(f, "move oracle"),
            Backend::Validator => write!(f, "move validator"),
        }
    }
}

/// Malformed input, rejected before anything is sent anywhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("invalid position '{text}': {reason}")]
    InvalidPosition { text: String, reason: String },

    #[error("move '{token}' is longer than {max} characters")]
    MoveTooLong { token: String, max: usize },

    #[error("'{0}' is neither a command nor a move")]
    InvalidCommand(String),

    #[error("unknown difficulty '{0}' (expected easy, medium or hard)")]
    UnknownDifficulty(String),

    #[error("unknown colour '{0}' (expected white or black)")]
    UnknownColour(String),

    #[error("message has no text to act on")]
    EmptyMessage,
}

/// Failure of a backend round trip. Carries enough to tell where it broke and what was seen.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("could not start engine '{path}': {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error while {phase}: {source}")]
    Io {
        phase: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {after:?} during {phase}")]
    Timeout { phase: String, after: Duration },

    #[error("engine exited unexpectedly during {phase}")]
    UnexpectedExit { phase: String },

    #[error("malformed output during {phase}: '{line}'")]
    Protocol { phase: String, line: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not parse response ({reason}): '{received}'")]
    Parse { reason: String, received: String },

    #[error("backend returned an invalid position '{0}'")]
    InvalidPosition(String),

    #[error("backend returned an illegal move '{0}'")]
    IllegalMove(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        BackendError::Transport(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store holds malformed data: {0}")]
    Format(#[from] serde_json::Error),
}

/// Everything that can abort one coordinator invocation.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("{backend} failed: {source}")]
    Backend {
        backend: Backend,
        #[source]
        source: BackendError,
    },

    #[error("could not acquire the game lock within {waited:?}")]
    Concurrency { waited: Duration },

    #[error("{backend} rate limited, retry after {}s", retry_after.as_secs().max(1))]
    RateLimited {
        backend: Backend,
        retry_after: Duration,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TurnError {
    pub fn backend(backend: Backend, source: BackendError) -> Self {
        TurnError::Backend { backend, source }
    }
}

pub type TurnResult<T> = Result<T, TurnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_message_has_wait_hint() {
        let err = TurnError::RateLimited {
            backend: Backend::Engine,
            retry_after: Duration::from_millis(2500),
        };
        assert_eq!(err.to_string(), "engine rate limited, retry after 2s");

        let err = TurnError::RateLimited {
            backend: Backend::Oracle,
            retry_after: Duration::from_millis(300),
        };
        assert_eq!(err.to_string(), "move oracle rate limited, retry after 1s");
    }

    #[test]
    fn backend_error_names_phase() {
        let err = TurnError::backend(
            Backend::Engine,
            BackendError::Timeout {
                phase: "searching".into(),
                after: Duration::from_secs(60),
            },
        );
        assert_eq!(err.to_string(), "engine failed: timed out after 60s during searching");
    }
}
