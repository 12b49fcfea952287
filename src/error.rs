use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Transport,
    Timeout,
    Parse,
    Local,
}

#[derive(Debug, Error, Diagnostic)]
pub enum VetError {
    #[error("expected a .{expected} file, got {file}")]
    #[diagnostic(help("pick a file with the .{expected} extension"))]
    InvalidExtension { file: String, expected: &'static str },

    #[error("{file} is {size} bytes, the limit is {limit} bytes")]
    FileTooLarge { file: String, size: u64, limit: u64 },

    #[error("{0} is empty")]
    EmptyFile(String),

    #[error("failed to read {0}")]
    FileRead(PathBuf),

    #[error("not a readable zip archive: {0}")]
    InvalidArchive(String),

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("identifier not in the current catalog: {0}")]
    UnknownIdentifier(String),

    #[error("server returned {status}: {message}")]
    Transport { status: u16, message: String },

    #[error("request failed: {0}")]
    Network(String),

    #[error("no response within {}s", after.as_secs())]
    Timeout { after: Duration },

    #[error("malformed response: {0}")]
    Parse(String),

    #[error("an upload is in flight; wait for the new catalog")]
    UploadInFlight,

    #[error("the upload returned no identifiers")]
    NoIdentifiers,

    #[error("a message is already awaiting a reply")]
    ChatBusy,

    #[error("question is empty")]
    EmptyQuestion,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl VetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VetError::InvalidExtension { .. }
            | VetError::FileTooLarge { .. }
            | VetError::EmptyFile(_)
            | VetError::FileRead(_)
            | VetError::InvalidArchive(_)
            | VetError::InvalidIdentifier(_)
            | VetError::UnknownIdentifier(_)
            | VetError::EmptyQuestion => ErrorKind::Validation,
            VetError::Transport { .. } | VetError::Network(_) | VetError::NoIdentifiers => {
                ErrorKind::Transport
            }
            VetError::Timeout { .. } => ErrorKind::Timeout,
            VetError::Parse(_) => ErrorKind::Parse,
            VetError::ChatBusy
            | VetError::UploadInFlight
            | VetError::ConfigRead(_)
            | VetError::ConfigParse(_)
            | VetError::Filesystem(_) => ErrorKind::Local,
        }
    }

    /// Text shown to the user. Server-supplied messages are passed through
    /// verbatim; empty ones fall back to a default for the error kind.
    pub fn user_message(&self) -> String {
        match self {
            VetError::Transport { status, message } if message.trim().is_empty() => {
                format!("The server rejected the request (HTTP {status}).")
            }
            VetError::Transport { message, .. } => message.clone(),
            VetError::Network(message) if message.trim().is_empty() => {
                "Could not reach the server.".to_string()
            }
            VetError::Timeout { after } => format!(
                "The server did not respond within {} seconds. Please try again.",
                after.as_secs()
            ),
            VetError::Parse(_) => "The server sent a response that could not be read.".to_string(),
            VetError::NoIdentifiers => {
                "Backend did not return any Kepler/TESS IDs.".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_is_verbatim() {
        let err = VetError::Transport {
            status: 422,
            message: "file is not a FITS light curve".to_string(),
        };
        assert_eq!(err.user_message(), "file is not a FITS light curve");
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn empty_server_message_gets_default() {
        let err = VetError::Transport {
            status: 500,
            message: String::new(),
        };
        assert_eq!(
            err.user_message(),
            "The server rejected the request (HTTP 500)."
        );
    }

    #[test]
    fn timeout_is_its_own_kind() {
        let err = VetError::Timeout {
            after: Duration::from_secs(60),
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.user_message().contains("60 seconds"));
    }
}
