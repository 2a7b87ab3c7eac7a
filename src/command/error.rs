use std::fmt;

/// Error kinds surfaced on a command's answer. Carried as strings in the
/// event's error field; nothing is ever thrown past the command boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Duplicate listener id
    AlreadyExists,
    /// Listener socket could not bind
    BindFailure,
    /// Unknown listener id
    NotFound,
    /// Empty or missing id on a creation command
    InvalidId,
    /// Outbound dial failed
    ConnectFailure,
    /// Traffic command on an unbound session
    NotBound,
    /// Unknown connection id
    NoConnection,
    /// No response arrived within the request timeout
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::BindFailure => "BindFailure",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::InvalidId => "InvalidId",
            ErrorKind::ConnectFailure => "ConnectFailure",
            ErrorKind::NotBound => "NotBound",
            ErrorKind::NoConnection => "NoConnection",
            ErrorKind::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
