//! Client library for the Brackit XML query server.
//!
//! A [`Connection`] is a session with the server: it sends XQuery statements, streams their results into any
//! [`Write`](std::io::Write) sink and demarcates transactions. The server does all the query processing and
//! storage; the client only ships statements and results.
//!
//! ```no_run
//! use brackit::{ClientError, Connection};
//!
//! fn main() -> Result<(), ClientError> {
//!     let mut connection = Connection::open("localhost", 11011)?;
//!     connection.query("doc('_master.xml')//collection/@name/string()", &mut std::io::stdout())?;
//!     connection.close()
//! }
//! ```
//!
//! The [`asynchronous`] module provides the same client on top of tokio.
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![warn(unused)]
#![warn(rustdoc::broken_intra_doc_links)]
#![warn(rustdoc::private_intra_doc_links)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rustdoc::invalid_codeblock_attributes)]
#![warn(rustdoc::invalid_html_tags)]
#![warn(rustdoc::invalid_rust_codeblocks)]
#![warn(rustdoc::bare_urls)]
pub mod asynchronous;
mod config;
mod connection;
mod errors;
mod protocol;
mod resource;
mod session;
mod stream;
mod transport;

pub use config::{ConnectionConfig, ConnectionConfigBuilder, DEFAULT_PORT};
pub use connection::Connection;
pub use errors::{ClientError, Operation, ServerError};
pub use resource::AsResource;
pub use session::{SessionState, TransactionState};
pub use stream::DatabaseStream;

/// A [`Result`] with its [`Err`] variant set to [`ClientError`].
///
/// [`Result`]: std::result::Result
/// [`Err`]: std::result::Result::Err
/// [`ClientError`]: crate::errors::ClientError
pub type Result<T> = std::result::Result<T, ClientError>;
