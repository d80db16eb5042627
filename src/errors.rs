use crate::session::SessionState;
use std::fmt::{Display, Formatter};
use std::io;

/// The operation of a [`Connection`] that produced an error.
///
/// [`Connection`]: crate::Connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Establishing the transport.
    Open,
    /// Executing a statement.
    Query,
    /// Starting a transaction.
    Begin,
    /// Committing the active transaction.
    Commit,
    /// Rolling back the active transaction.
    Rollback,
    /// Releasing the transport.
    Close,
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Open => "open",
            Operation::Query => "query",
            Operation::Begin => "begin",
            Operation::Commit => "commit",
            Operation::Rollback => "rollback",
            Operation::Close => "close",
        };
        f.write_str(name)
    }
}

/// The error type for the operations of the [`Connection`].
///
/// Variants tell apart what the caller can recover from: a [`ClientError::Query`] or
/// [`ClientError::State`] leaves the connection usable, a [`ClientError::Connection`] closes it.
///
/// [`Connection`]: crate::Connection
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The transport could not be established, was lost, or the server broke the framing.
    #[error("{operation} failed on the transport: {source}")]
    Connection {
        /// The operation that was in flight.
        operation: Operation,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The server rejected or failed the request.
    #[error("{operation} failed on the server: {error}")]
    Query {
        /// The operation that was rejected.
        operation: Operation,
        /// The diagnostic reported by the server.
        error: ServerError,
    },
    /// The operation is not valid in the current state of the connection.
    #[error("cannot {operation} while the connection is {state}")]
    State {
        /// The operation that was refused.
        operation: Operation,
        /// The state the connection was in.
        state: SessionState,
    },
    /// Writing the result into the caller's sink failed. The response was still read to its end.
    #[error("failed to write query result: {source}")]
    Sink {
        /// The error returned by the sink.
        #[source]
        source: io::Error,
    },
}

impl ClientError {
    pub(crate) fn connection(operation: Operation, source: io::Error) -> Self {
        ClientError::Connection { operation, source }
    }

    pub(crate) fn state(operation: Operation, state: SessionState) -> Self {
        ClientError::State { operation, state }
    }

    /// The operation that produced this error.
    pub fn operation(&self) -> Operation {
        match self {
            ClientError::Connection { operation, .. }
            | ClientError::Query { operation, .. }
            | ClientError::State { operation, .. } => *operation,
            ClientError::Sink { .. } => Operation::Query,
        }
    }

    /// Returns `true` when the error has closed the connection it came from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::Connection { .. })
    }
}

/// Diagnostic reported by the server for a failed request.
///
/// The raw text is kept as is. When it starts with an error code, either as `[err:XPST0003] ...`
/// or as `err:XPST0003: ...`, the code is split off the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    raw: String,
    code: Option<String>,
    message: String,
}

impl ServerError {
    pub(crate) fn new(raw: String) -> Self {
        let (code, message) = match split_code(&raw) {
            Some((code, message)) => (Some(code.to_owned()), message.to_owned()),
            None => (None, raw.trim().to_owned()),
        };

        Self { raw, code, message }
    }

    /// The unparsed diagnostic.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The error code, e.g. `err:XPST0003`, when the server sent one.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// The diagnostic without the error code.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_code(raw: &str) -> Option<(&str, &str)> {
    let raw = raw.trim_start();

    if let Some(rest) = raw.strip_prefix('[') {
        let end = rest.find(']')?;
        let code = rest[..end].trim();
        return match code.is_empty() {
            true => None,
            false => Some((code, rest[end + 1..].trim())),
        };
    }

    let token_end = raw.find(char::is_whitespace)?;
    let code = raw[..token_end].strip_suffix(':')?;
    let is_code = code.contains(':')
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ':' || c == '-' || c == '_');

    match is_code {
        true => Some((code, raw[token_end..].trim())),
        false => None,
    }
}
