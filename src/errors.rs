//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Program missing, runtime unavailable, or transport not established.
    Start(String),
    /// Malformed or missing wire-level response, or a timed-out wait.
    Protocol(String),
    /// Operation invoked outside its valid session state.
    State(String),
    /// Recorded daemon process is not alive or not reachable.
    DaemonUnavailable(String),
    /// Target-side expression evaluation failure (not a transport fault).
    Evaluation(String),
    /// Configuration parsing or validation failure.
    Config(String),
    /// Caller supplied an argument the operation cannot accept.
    InvalidArgument(String),
    /// File-system or I/O operation failure.
    Io(String),
}

/// Display prefixes, in the order [`AppError::from_wire`] tries them.
const WIRE_PREFIXES: &[(&str, fn(String) -> AppError)] = &[
    ("start: ", AppError::Start),
    ("protocol: ", AppError::Protocol),
    ("state: ", AppError::State),
    ("daemon unavailable: ", AppError::DaemonUnavailable),
    ("evaluation: ", AppError::Evaluation),
    ("config: ", AppError::Config),
    ("invalid argument: ", AppError::InvalidArgument),
    ("io: ", AppError::Io),
];

impl AppError {
    /// Rebuild an error from the text a daemon sent over its socket.
    ///
    /// The daemon forwards `to_string()` verbatim, so the variant is
    /// recovered from the display prefix. Text without a known prefix is
    /// treated as a protocol failure.
    #[must_use]
    pub fn from_wire(text: &str) -> Self {
        for (prefix, build) in WIRE_PREFIXES {
            if let Some(rest) = text.strip_prefix(prefix) {
                return build(rest.to_owned());
            }
        }
        Self::Protocol(text.to_owned())
    }

    /// Message text without the kind prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Start(msg)
            | Self::Protocol(msg)
            | Self::State(msg)
            | Self::DaemonUnavailable(msg)
            | Self::Evaluation(msg)
            | Self::Config(msg)
            | Self::InvalidArgument(msg)
            | Self::Io(msg) => msg,
        }
    }

    /// Prefix the message with `context`, keeping the variant.
    #[must_use]
    pub fn context(self, context: impl Display) -> Self {
        let wrap = |msg: String| format!("{context}: {msg}");
        match self {
            Self::Start(msg) => Self::Start(wrap(msg)),
            Self::Protocol(msg) => Self::Protocol(wrap(msg)),
            Self::State(msg) => Self::State(wrap(msg)),
            Self::DaemonUnavailable(msg) => Self::DaemonUnavailable(wrap(msg)),
            Self::Evaluation(msg) => Self::Evaluation(wrap(msg)),
            Self::Config(msg) => Self::Config(wrap(msg)),
            Self::InvalidArgument(msg) => Self::InvalidArgument(wrap(msg)),
            Self::Io(msg) => Self::Io(wrap(msg)),
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start(msg) => write!(f, "start: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::State(msg) => write!(f, "state: {msg}"),
            Self::DaemonUnavailable(msg) => write!(f, "daemon unavailable: {msg}"),
            Self::Evaluation(msg) => write!(f, "evaluation: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("malformed json: {err}"))
    }
}
