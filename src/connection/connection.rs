use crate::errors::{ClientError, Operation, ServerError};
use crate::protocol::{Command, Reply};
use crate::resource::AsResource;
use crate::session::{SessionState, TransactionState};
use crate::transport::Transport;
use crate::{ConnectionConfig, DatabaseStream, Result};
use std::fmt;
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, trace, warn};

/// A session with a Brackit query server. Sends statements, streams their results into a sink and controls
/// transactions.
///
/// The connection exclusively owns its transport. Every operation takes `&mut self`, so there is never more than
/// one request in flight. The transport is released by [`Connection::close`] or, at the latest, when the
/// connection is dropped.
///
/// Statements commit on their own until [`Connection::begin`] starts an explicit transaction, which lasts until
/// [`Connection::commit`] or [`Connection::rollback`].
///
/// # Examples
///
/// ```no_run
/// # use brackit::{ClientError, Connection};
/// # fn main() -> Result<(), ClientError> {
/// let mut connection = Connection::open("localhost", 11011)?;
///
/// let mut result: Vec<u8> = vec![];
/// connection.query("1+1", &mut result)?;
/// assert_eq!(b"2".to_vec(), result);
///
/// connection.begin()?;
/// connection.query("bit:store('sample.xml', <foo><bar/></foo>)", &mut std::io::sink())?;
/// connection.commit()?;
///
/// connection.close()?;
/// # Ok(())
/// # }
/// ```
pub struct Connection<T = TcpStream>
where
    T: DatabaseStream,
{
    transport: Transport<T>,
    peer: Option<(String, u16)>,
    state: SessionState,
}

impl Connection<TcpStream> {
    /// Connects to the server at `host` and `port` over TCP without timeouts.
    ///
    /// Fails with [`ClientError::Connection`] when the host is unreachable or the port refuses the connection.
    pub fn open(host: &str, port: u16) -> Result<Self> {
        Self::open_with(&ConnectionConfig::new(host, port))
    }

    /// Connects to the server described by `config`, applying its timeouts.
    ///
    /// ```no_run
    /// # use brackit::{ClientError, Connection, ConnectionConfig};
    /// # use std::time::Duration;
    /// # fn main() -> Result<(), ClientError> {
    /// let config = ConnectionConfig::builder("localhost", 11011)
    ///     .connect_timeout(Duration::from_secs(5))
    ///     .build();
    /// let connection = Connection::open_with(&config)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open_with(config: &ConnectionConfig) -> Result<Self> {
        let stream = connect(config).map_err(|e| ClientError::connection(Operation::Open, e))?;
        debug!(address = %config.address(), "connection opened");

        let mut connection = Self::new(stream);
        connection.peer = Some((config.host.clone(), config.port));
        Ok(connection)
    }
}

fn connect(config: &ConnectionConfig) -> io::Result<TcpStream> {
    let address = (config.host.as_str(), config.port);
    let mut stream = match config.connect_timeout {
        None => TcpStream::connect(address)?,
        Some(timeout) => {
            let mut last_error = None;
            let mut connected = None;
            for socket_address in address.to_socket_addrs()? {
                match TcpStream::connect_timeout(&socket_address, timeout) {
                    Ok(stream) => {
                        connected = Some(stream);
                        break;
                    }
                    Err(e) => last_error = Some(e),
                }
            }
            match (connected, last_error) {
                (Some(stream), _) => stream,
                (None, Some(e)) => return Err(e),
                (None, None) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("{} resolved to no addresses", config.address()),
                    ))
                }
            }
        }
    };

    stream.set_nodelay(true)?;
    stream.set_timeouts(config.read_timeout, config.write_timeout)?;
    Ok(stream)
}

impl<T> Connection<T>
where
    T: DatabaseStream,
{
    /// Returns a connection speaking to the server over an already established `stream`.
    ///
    /// Typically, you only need this for custom transports or in tests. For regular usage, refer to
    /// [`Connection::open`].
    pub fn new(stream: T) -> Self {
        Self {
            transport: Transport::new(stream),
            peer: None,
            state: SessionState::Idle,
        }
    }

    /// Executes `statement` and writes its result into `sink` as the server produces it.
    ///
    /// The statement is shipped as is; it can be a string or any reader, e.g. a file with XQuery code. Output
    /// already written to `sink` stays there if the statement fails halfway.
    ///
    /// # Errors
    ///
    /// * [`ClientError::State`] when the connection is closed. Nothing is written to `sink` then.
    /// * [`ClientError::Query`] when the server rejects or fails the statement. The connection stays usable.
    /// * [`ClientError::Sink`] when `sink` fails. The response is still consumed, the connection stays usable.
    /// * [`ClientError::Connection`] when the transport fails. The connection is closed. The same happens when
    ///   reading `statement` fails halfway: the request can no longer be completed, and the error message starts
    ///   with `reading the statement failed`. A configured timeout surfaces here as
    ///   [`io::ErrorKind::TimedOut`].
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use brackit::Connection;
    /// # use std::fs::File;
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let mut connection = Connection::open("localhost", 11011)?;
    /// let mut xquery = File::open("catalog.xq")?;
    ///
    /// connection.query(&mut xquery, &mut std::io::stdout())?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn query<'a, R, W>(&mut self, statement: R, sink: &mut W) -> Result<()>
    where
        R: AsResource<'a>,
        W: Write + ?Sized,
    {
        self.state.check(Operation::Query)?;
        trace!(state = %self.state, "sending query");

        let (sink_error, reply) = self.exchange(Operation::Query, |transport| {
            transport
                .send_cmd(Command::Query)?
                .send_arg(&mut statement.into_read())?
                .flush()?;
            let sink_error = transport.copy_result(sink)?;
            Ok((sink_error, transport.read_reply()?))
        })?;

        match (reply, sink_error) {
            (Reply::Failure(diagnostic), _) => Err(ClientError::Query {
                operation: Operation::Query,
                error: ServerError::new(diagnostic),
            }),
            (Reply::Success(_), Some(source)) => Err(ClientError::Sink { source }),
            (Reply::Success(info), None) => {
                trace!(%info, "query finished");
                Ok(())
            }
        }
    }

    /// Starts an explicit transaction. Statements are no longer committed on their own.
    ///
    /// Fails with [`ClientError::State`] if a transaction is already active.
    pub fn begin(&mut self) -> Result<()> {
        self.transition(Operation::Begin, Command::Begin)
    }

    /// Makes the mutations of the active transaction durable and returns to auto-commit.
    ///
    /// Fails with [`ClientError::State`] if no transaction is active. If the server fails the commit, the
    /// transaction is over nevertheless and the error is returned.
    pub fn commit(&mut self) -> Result<()> {
        self.transition(Operation::Commit, Command::Commit)
    }

    /// Discards the mutations of the active transaction and returns to auto-commit.
    ///
    /// Fails with [`ClientError::State`] if no transaction is active.
    pub fn rollback(&mut self) -> Result<()> {
        self.transition(Operation::Rollback, Command::Rollback)
    }

    /// Runs `f` inside a transaction. Commits when `f` succeeds; rolls back and returns the error of `f` otherwise.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use brackit::{ClientError, Connection};
    /// # fn main() -> Result<(), ClientError> {
    /// let mut connection = Connection::open("localhost", 11011)?;
    /// let mut out = std::io::stdout();
    ///
    /// connection.transaction(|connection| {
    ///     connection.query("insert node <test/> into doc('/sample.xml')/foo/bar", &mut out)?;
    ///     connection.query("doc('/sample.xml')", &mut out)
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn transaction<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Self) -> Result<R>,
    {
        self.begin()?;

        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(error) => {
                if self.state == SessionState::InTransaction {
                    if let Err(rollback_error) = self.rollback() {
                        warn!(%rollback_error, "rollback after failed transaction failed");
                    }
                }
                Err(error)
            }
        }
    }

    /// Releases the transport. Closing a closed connection does nothing.
    ///
    /// An active transaction is abandoned and left to the server to discard.
    pub fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        if self.state == SessionState::InTransaction {
            warn!("closing connection with an active transaction");
        }

        self.state = SessionState::Closed;
        debug!("connection closed");
        self.transport
            .shutdown()
            .map_err(|e| ClientError::connection(Operation::Close, e))
    }

    /// The lifecycle state of this connection.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether an explicit transaction is active.
    pub fn transaction_state(&self) -> TransactionState {
        self.state.transaction()
    }

    /// Returns `true` once the connection has been closed, explicitly or by a transport failure.
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Host this connection was opened to, `None` for connections over a custom stream.
    pub fn host(&self) -> Option<&str> {
        self.peer.as_ref().map(|(host, _)| host.as_str())
    }

    /// Port this connection was opened to, `None` for connections over a custom stream.
    pub fn port(&self) -> Option<u16> {
        self.peer.as_ref().map(|(_, port)| *port)
    }

    fn transition(&mut self, operation: Operation, command: Command) -> Result<()> {
        let next = self.state.check(operation)?;
        trace!(%operation, "sending transaction command");

        let reply = self.exchange(operation, |transport| {
            transport.send_cmd(command)?.flush()?;
            transport.read_reply()
        })?;

        match reply {
            Reply::Success(_) => {
                debug!(%operation, from = %self.state, to = %next, "transaction state changed");
                self.state = next;
                Ok(())
            }
            Reply::Failure(diagnostic) => {
                if operation != Operation::Begin {
                    self.state = next;
                }
                Err(ClientError::Query {
                    operation,
                    error: ServerError::new(diagnostic),
                })
            }
        }
    }

    /// Runs one request/response round trip. A transport failure closes the connection.
    fn exchange<F, R>(&mut self, operation: Operation, round_trip: F) -> Result<R>
    where
        F: FnOnce(&mut Transport<T>) -> io::Result<R>,
    {
        match round_trip(&mut self.transport) {
            Ok(value) => Ok(value),
            Err(error) => {
                warn!(%operation, %error, "transport failed, closing connection");
                self.state = SessionState::Closed;
                let _ = self.transport.shutdown();
                Err(ClientError::connection(operation, error))
            }
        }
    }
}

impl<T> Drop for Connection<T>
where
    T: DatabaseStream,
{
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            debug!(%error, "failed to release transport on drop");
        }
    }
}

impl<T> fmt::Debug for Connection<T>
where
    T: DatabaseStream + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("transport", &self.transport)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .finish()
    }
}
