//! Shared error types across filterstack crates.
//!
//! Two families live here:
//! - [`FilterStackError`]: construction-time failures (config parsing,
//!   channel building). Returned through [`Result`].
//! - [`CallError`]: runtime errors flowing through closures. Immutable,
//!   cheaply cloned, and composable so no contributing cause is lost.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// RPC status codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl StatusCode {
    /// String representation used in logs and trailing metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::AlreadyExists => "ALREADY_EXISTS",
            StatusCode::PermissionDenied => "PERMISSION_DENIED",
            StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
            StatusCode::Aborted => "ABORTED",
            StatusCode::OutOfRange => "OUT_OF_RANGE",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::DataLoss => "DATA_LOSS",
            StatusCode::Unauthenticated => "UNAUTHENTICATED",
        }
    }

    /// Inverse of [`StatusCode::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        let code = match s {
            "OK" => StatusCode::Ok,
            "CANCELLED" => StatusCode::Cancelled,
            "UNKNOWN" => StatusCode::Unknown,
            "INVALID_ARGUMENT" => StatusCode::InvalidArgument,
            "DEADLINE_EXCEEDED" => StatusCode::DeadlineExceeded,
            "NOT_FOUND" => StatusCode::NotFound,
            "ALREADY_EXISTS" => StatusCode::AlreadyExists,
            "PERMISSION_DENIED" => StatusCode::PermissionDenied,
            "RESOURCE_EXHAUSTED" => StatusCode::ResourceExhausted,
            "FAILED_PRECONDITION" => StatusCode::FailedPrecondition,
            "ABORTED" => StatusCode::Aborted,
            "OUT_OF_RANGE" => StatusCode::OutOfRange,
            "UNIMPLEMENTED" => StatusCode::Unimplemented,
            "INTERNAL" => StatusCode::Internal,
            "UNAVAILABLE" => StatusCode::Unavailable,
            "DATA_LOSS" => StatusCode::DataLoss,
            "UNAUTHENTICATED" => StatusCode::Unauthenticated,
            _ => return None,
        };
        Some(code)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, FilterStackError>;

/// Unified construction-time error type used by core and channel crates.
#[derive(Debug, Error)]
pub enum FilterStackError {
    /// One or more malformed config fields. Every defect is listed.
    #[error("{context}: [{}]", .errors.join("; "))]
    ConfigParse { context: String, errors: Vec<String> },
    #[error("channel build failed: {0}")]
    ChannelBuild(String),
    #[error("bad config: {0}")]
    BadConfig(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl FilterStackError {
    /// Map to the status an RPC caller would observe.
    pub fn status_code(&self) -> StatusCode {
        match self {
            FilterStackError::ConfigParse { .. } => StatusCode::InvalidArgument,
            FilterStackError::ChannelBuild(_) => StatusCode::Unavailable,
            FilterStackError::BadConfig(_) => StatusCode::InvalidArgument,
            FilterStackError::UnsupportedVersion => StatusCode::Unimplemented,
            FilterStackError::Internal(_) => StatusCode::Internal,
        }
    }

    /// Individual parse defects, empty for other kinds.
    pub fn parse_errors(&self) -> &[String] {
        match self {
            FilterStackError::ConfigParse { errors, .. } => errors,
            _ => &[],
        }
    }
}

/// Runtime error carried through closures.
///
/// A node has a message, an optional status and child errors. Cloning shares
/// the tree; mutation helpers copy the node first when it is shared.
#[derive(Clone)]
pub struct CallError {
    node: Arc<ErrorNode>,
}

#[derive(Clone)]
struct ErrorNode {
    message: Cow<'static, str>,
    status: Option<StatusCode>,
    children: Vec<CallError>,
}

impl CallError {
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            node: Arc::new(ErrorNode {
                message: message.into(),
                status: None,
                children: Vec::new(),
            }),
        }
    }

    /// Error carrying a status from the start.
    pub fn with_code(code: StatusCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(message).with_status(code)
    }

    pub fn cancelled() -> Self {
        Self::with_code(StatusCode::Cancelled, "Cancelled")
    }

    pub fn with_status(mut self, code: StatusCode) -> Self {
        Arc::make_mut(&mut self.node).status = Some(code);
        self
    }

    /// Append `child` as a cause of `self`.
    pub fn add_child(mut self, child: CallError) -> Self {
        Arc::make_mut(&mut self.node).children.push(child);
        self
    }

    /// Compose two optional errors, keeping both causes.
    ///
    /// `None` is the success value: composing with it returns the other side.
    pub fn compose(parent: Option<CallError>, child: Option<CallError>) -> Option<CallError> {
        match (parent, child) {
            (None, child) => child,
            (parent, None) => parent,
            (Some(p), Some(c)) => Some(p.add_child(c)),
        }
    }

    pub fn message(&self) -> &str {
        &self.node.message
    }

    /// Status attached to this node only.
    pub fn own_status(&self) -> Option<StatusCode> {
        self.node.status
    }

    pub fn children(&self) -> &[CallError] {
        &self.node.children
    }

    /// First status found depth-first, with the message of the node holding it.
    pub fn find_status(&self) -> Option<(StatusCode, &str)> {
        if let Some(code) = self.node.status {
            return Some((code, self.message()));
        }
        self.node.children.iter().find_map(|c| c.find_status())
    }

    /// Effective status of the whole tree (`UNKNOWN` when none is attached).
    pub fn status(&self) -> StatusCode {
        self.find_status()
            .map(|(code, _)| code)
            .unwrap_or(StatusCode::Unknown)
    }

    /// Whether any node in the tree has `code`.
    pub fn has_status(&self, code: StatusCode) -> bool {
        self.node.status == Some(code) || self.node.children.iter().any(|c| c.has_status(code))
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.node.message)?;
        if let Some(code) = self.node.status {
            write!(f, " (status={code})")?;
        }
        if !self.node.children.is_empty() {
            f.write_str(" {children: [")?;
            for (i, c) in self.node.children.iter().enumerate() {
                if i > 0 {
                    f.write_str("; ")?;
                }
                write!(f, "{c}")?;
            }
            f.write_str("]}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallError({self})")
    }
}

impl std::error::Error for CallError {}

impl From<FilterStackError> for CallError {
    fn from(e: FilterStackError) -> Self {
        CallError::with_code(e.status_code(), e.to_string())
    }
}
