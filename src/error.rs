//! Errors raised while talking to a Podman service, together with the
//! classification helpers that tell benign listing hiccups apart from
//! genuine faults.

use http::StatusCode;
use serde::Deserialize;

pub type Result<T> = std::result::Result<T, Error>;

/// Cause reported by libpod when a container ID or name is unknown.
pub const NO_SUCH_CONTAINER: &str = "no such container";

/// Cause reported by libpod when a pod ID or name is unknown.
pub const NO_SUCH_POD: &str = "no such pod";

/// Error body returned by the libpod REST API for any non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, thiserror::Error)]
#[error("{message} (HTTP {response_code}, cause: {because})")]
pub struct ErrorModel {
    #[serde(rename = "cause", default)]
    pub because: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "response", default)]
    pub response_code: u16,
}

impl ErrorModel {
    pub fn new(response_code: u16, because: &str, message: &str) -> Self {
        Self {
            because: because.to_string(),
            message: message.to_string(),
            response_code,
        }
    }

    fn is_not_found(&self) -> bool {
        self.response_code == StatusCode::NOT_FOUND.as_u16()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Podman API error: {0}")]
    Api(#[from] ErrorModel),
    #[error("container {container} has no process on {engine}")]
    ProcesslessContainer {
        container: String,
        engine: &'static str,
    },
    #[error("operation cancelled")]
    Cancelled,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),
    #[error("invalid request: {0}")]
    Request(#[from] http::Error),
    #[error("invalid Podman service URI '{0}'")]
    InvalidUri(String),
    #[error("JSON deserialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Semantic bucket an [`Error`] falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The connection to the engine could not be established or broke down.
    Transport,
    /// The engine doesn't know the container (or pod) in question.
    EntityAbsent,
    /// The container exists but has no process (yet, or anymore).
    NoProcessAttached,
    /// The caller's context was cancelled.
    Cancelled,
    /// Anything else the engine (or our own plumbing) complained about.
    Engine,
}

impl Error {
    pub fn processless(container: &str, engine: &'static str) -> Self {
        Error::ProcesslessContainer {
            container: container.to_string(),
            engine,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Api(model)
                if model.is_not_found()
                    && (model.because == NO_SUCH_CONTAINER || model.because == NO_SUCH_POD) =>
            {
                ErrorClass::EntityAbsent
            }
            Error::ProcesslessContainer { .. } => ErrorClass::NoProcessAttached,
            Error::Cancelled => ErrorClass::Cancelled,
            Error::Io(_) | Error::Http(_) | Error::InvalidUri(_) => ErrorClass::Transport,
            _ => ErrorClass::Engine,
        }
    }

    /// True for a 404 libpod response whose cause is "no such container".
    pub fn is_no_such_container(&self) -> bool {
        matches!(self, Error::Api(model) if model.is_not_found() && model.because == NO_SUCH_CONTAINER)
    }

    pub fn is_processless_container(&self) -> bool {
        matches!(self, Error::ProcesslessContainer { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Containers that vanished between listing and inspection, or that never
    /// got a process, are skipped rather than failing a whole listing.
    pub fn is_skippable_when_listing(&self) -> bool {
        self.is_no_such_container() || self.is_processless_container()
    }
}
