//! Error types shared by every layer of the runtime.
//!
//! Every failure carries an [`ErrorKind`]. The kind survives the trip through
//! an `Error` response: the wire form is `"<KindName>: <message>"`, which
//! [`Error::from_wire`] parses back.

use std::fmt;

use thiserror::Error;

use crate::path::PathError;

/// Discriminant of an [`Error`], stable across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A path component does not exist.
    Field,
    /// Target is not writeable, or not writeable in the current state.
    NotWriteable,
    /// A value was rejected by a meta.
    Validation,
    /// `when_matches` saw one of its bad values.
    BadValue,
    /// A wait exceeded its deadline.
    Timeout,
    /// A STOP propagated through a waiting Context.
    Aborted,
    /// A remote Error payload surfaced on an in-process Context.
    Response,
    /// Protocol-level surprise.
    Unexpected,
    /// Reserved for the assembly loader.
    Yaml,
    /// Filesystem failure (design persistence).
    Io,
    /// Free-form failure raised by a Part.
    Other,
}

impl ErrorKind {
    /// The name used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Field => "FieldError",
            ErrorKind::NotWriteable => "NotWriteableError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::BadValue => "BadValueError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Aborted => "AbortedError",
            ErrorKind::Response => "ResponseError",
            ErrorKind::Unexpected => "UnexpectedError",
            ErrorKind::Yaml => "YamlError",
            ErrorKind::Io => "IOError",
            ErrorKind::Other => "Error",
        }
    }

    /// Look a kind up by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "FieldError" => ErrorKind::Field,
            "NotWriteableError" => ErrorKind::NotWriteable,
            "ValidationError" => ErrorKind::Validation,
            "BadValueError" => ErrorKind::BadValue,
            "TimeoutError" => ErrorKind::Timeout,
            "AbortedError" => ErrorKind::Aborted,
            "ResponseError" => ErrorKind::Response,
            "UnexpectedError" => ErrorKind::Unexpected,
            "YamlError" => ErrorKind::Yaml,
            "IOError" => ErrorKind::Io,
            "Error" => ErrorKind::Other,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors raised by the data layer and the runtime.
///
/// Errors are `Clone` so a single failure can be handed to several waiters
/// (a hook fan-out reports the same error to the controller and the log).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A path component does not exist.
    #[error("field error: {0}")]
    Field(String),

    /// Target not writeable, or not writeable in the current state.
    #[error("not writeable: {0}")]
    NotWriteable(String),

    /// A value was rejected by a meta.
    #[error("validation error: {0}")]
    Validation(String),

    /// `when_matches` saw one of its bad values.
    #[error("bad value: {0}")]
    BadValue(String),

    /// A wait exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A STOP propagated through the waiting Context.
    #[error("aborted: {0}")]
    Aborted(String),

    /// A remote Error payload received by an in-process Context.
    #[error("response error ({kind}): {message}")]
    Response { kind: ErrorKind, message: String },

    /// Protocol-level surprise (e.g. an Update for an unknown subscription).
    #[error("unexpected: {0}")]
    Unexpected(String),

    /// Reserved for the assembly loader.
    #[error("yaml error: {0}")]
    Yaml(String),

    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(String),

    /// Path validation error.
    #[error("path error: {0}")]
    Path(#[from] PathError),

    /// Free-form failure.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build an error of the given kind.
    ///
    /// `ErrorKind::Response` has no remote kind to wrap, so it is built as a
    /// response carrying `Other`.
    pub fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Field => Error::Field(message),
            ErrorKind::NotWriteable => Error::NotWriteable(message),
            ErrorKind::Validation => Error::Validation(message),
            ErrorKind::BadValue => Error::BadValue(message),
            ErrorKind::Timeout => Error::Timeout(message),
            ErrorKind::Aborted => Error::Aborted(message),
            ErrorKind::Response => Error::Response {
                kind: ErrorKind::Other,
                message,
            },
            ErrorKind::Unexpected => Error::Unexpected(message),
            ErrorKind::Yaml => Error::Yaml(message),
            ErrorKind::Io => Error::Io(message),
            ErrorKind::Other => Error::Other(message),
        }
    }

    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Field(_) | Error::Path(_) => ErrorKind::Field,
            Error::NotWriteable(_) => ErrorKind::NotWriteable,
            Error::Validation(_) => ErrorKind::Validation,
            Error::BadValue(_) => ErrorKind::BadValue,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Aborted(_) => ErrorKind::Aborted,
            Error::Response { .. } => ErrorKind::Response,
            Error::Unexpected(_) => ErrorKind::Unexpected,
            Error::Yaml(_) => ErrorKind::Yaml,
            Error::Io(_) => ErrorKind::Io,
            Error::Other(_) => ErrorKind::Other,
        }
    }

    /// For a `Response` error, the kind the remote end reported.
    pub fn remote_kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Response { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The bare message without the kind prefix.
    pub fn message(&self) -> String {
        match self {
            Error::Field(m)
            | Error::NotWriteable(m)
            | Error::Validation(m)
            | Error::BadValue(m)
            | Error::Timeout(m)
            | Error::Aborted(m)
            | Error::Unexpected(m)
            | Error::Yaml(m)
            | Error::Io(m)
            | Error::Other(m) => m.clone(),
            Error::Response { message, .. } => message.clone(),
            Error::Path(e) => e.to_string(),
        }
    }

    /// Serialized form used in `Error` responses.
    ///
    /// Relayed response errors keep the kind of the original failure.
    pub fn wire_message(&self) -> String {
        let kind = self.remote_kind().unwrap_or_else(|| self.kind());
        format!("{}: {}", kind.name(), self.message())
    }

    /// Parse a wire message back into an error of the same kind.
    pub fn from_wire(message: &str) -> Self {
        if let Some((name, rest)) = message.split_once(": ") {
            if let Some(kind) = ErrorKind::from_name(name) {
                return Error::with_kind(kind, rest);
            }
        }
        Error::Other(message.to_string())
    }

    /// Wrap this error as it would arrive at a remote Context.
    pub fn into_response(self) -> Self {
        match self {
            Error::Response { .. } => self,
            other => Error::Response {
                kind: other.kind(),
                message: other.message(),
            },
        }
    }

    /// Whether this is an `Aborted` error.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Validation(format!("invalid JSON: {}", e))
    }
}

/// Result type alias for the data layer.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_message_roundtrips_kind() {
        let e = Error::Validation("bad choice 'x'".to_string());
        let wire = e.wire_message();
        assert_eq!(wire, "ValidationError: bad choice 'x'");
        assert_eq!(Error::from_wire(&wire), e);
    }

    #[test]
    fn response_error_keeps_remote_kind() {
        let e = Error::NotWriteable("state".to_string()).into_response();
        assert_eq!(e.kind(), ErrorKind::Response);
        assert_eq!(e.remote_kind(), Some(ErrorKind::NotWriteable));
        assert_eq!(e.wire_message(), "NotWriteableError: state");
    }

    #[test]
    fn unknown_prefix_is_other() {
        let e = Error::from_wire("KeyError: 'foo'");
        assert_eq!(e, Error::Other("KeyError: 'foo'".to_string()));
    }

    #[test]
    fn path_error_is_field_kind() {
        let e: Error = PathError::InvalidPath {
            message: "empty".to_string(),
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::Field);
        assert!(format!("{}", e).contains("path error"));
    }

    #[test]
    fn kind_names_roundtrip() {
        for kind in [
            ErrorKind::Field,
            ErrorKind::NotWriteable,
            ErrorKind::Validation,
            ErrorKind::BadValue,
            ErrorKind::Timeout,
            ErrorKind::Aborted,
            ErrorKind::Unexpected,
            ErrorKind::Yaml,
            ErrorKind::Io,
            ErrorKind::Other,
        ] {
            assert_eq!(ErrorKind::from_name(kind.name()), Some(kind));
        }
    }
}
