use crate::asynchronous::resource::AsResource;
use crate::asynchronous::transport::Transport;
use crate::errors::{ClientError, Operation, ServerError};
use crate::protocol::{Command, Reply};
use crate::session::{SessionState, TransactionState};
use crate::{ConnectionConfig, Result};
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// Asynchronous session with a Brackit query server.
///
/// Same contract as the blocking [`Connection`]: one request in flight, explicit transactions, idempotent close.
/// Dropping the connection drops the stream, which releases the socket without the shutdown handshake of
/// [`Connection::close`].
///
/// A request future dropped before it completes, e.g. by `tokio::time::timeout` or `select!`, leaves the rest of
/// its response unread. The next request on the connection then fails with [`ClientError::Connection`] and closes
/// it instead of reading that leftover as its own response.
///
/// # Examples
///
/// ```no_run
/// # use brackit::asynchronous::Connection;
/// # use brackit::ClientError;
/// # async fn example() -> Result<(), ClientError> {
/// let mut connection = Connection::open("localhost", 11011).await?;
///
/// let mut result: Vec<u8> = vec![];
/// connection.query("1+1", &mut result).await?;
/// assert_eq!(b"2".to_vec(), result);
///
/// connection.close().await?;
/// # Ok(())
/// # }
/// ```
///
/// [`Connection`]: crate::Connection
/// [`Connection::close`]: self::Connection::close
pub struct Connection<T = TcpStream>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    transport: Transport<T>,
    peer: Option<(String, u16)>,
    state: SessionState,
    in_flight: bool,
}

impl Connection<TcpStream> {
    /// Connects to the server at `host` and `port` over TCP without timeouts.
    pub async fn open(host: &str, port: u16) -> Result<Self> {
        Self::open_with(&ConnectionConfig::new(host, port)).await
    }

    /// Connects to the server described by `config`. The read and write timeouts bound every socket operation.
    pub async fn open_with(config: &ConnectionConfig) -> Result<Self> {
        let stream = connect(config)
            .await
            .map_err(|e| ClientError::connection(Operation::Open, e))?;
        debug!(address = %config.address(), "connection opened");

        let mut connection = Self::new(stream);
        connection
            .transport
            .set_timeouts(config.read_timeout, config.write_timeout);
        connection.peer = Some((config.host.clone(), config.port));
        Ok(connection)
    }
}

async fn connect(config: &ConnectionConfig) -> io::Result<TcpStream> {
    let address = (config.host.as_str(), config.port);
    let stream = match config.connect_timeout {
        None => TcpStream::connect(address).await?,
        Some(limit) => tokio::time::timeout(limit, TcpStream::connect(address))
            .await
            .map_err(|_| {
                let message = format!("connecting to {} timed out", config.address());
                io::Error::new(io::ErrorKind::TimedOut, message)
            })??,
    };

    stream.set_nodelay(true)?;
    Ok(stream)
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Returns a connection speaking to the server over an already established `stream`.
    pub fn new(stream: T) -> Self {
        Self {
            transport: Transport::new(stream),
            peer: None,
            state: SessionState::Idle,
            in_flight: false,
        }
    }

    /// Executes `statement` and writes its result into `sink` as the server produces it.
    ///
    /// Fails like [`Connection::query`](crate::Connection::query) does.
    pub async fn query<'a, R, W>(&mut self, statement: R, sink: &mut W) -> Result<()>
    where
        R: AsResource<'a>,
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.state.check(Operation::Query)?;
        self.ensure_settled(Operation::Query).await?;
        trace!(state = %self.state, "sending query");

        self.in_flight = true;
        let round_trip = async {
            self.transport
                .send_cmd(Command::Query)
                .await?
                .send_arg(&mut statement.into_read())
                .await?
                .flush()
                .await?;
            let sink_error = self.transport.copy_result(sink).await?;
            Ok::<_, io::Error>((sink_error, self.transport.read_reply().await?))
        }
        .await;
        let (sink_error, reply) = self.settle(Operation::Query, round_trip).await?;

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

    /// Starts an explicit transaction. Fails with [`ClientError::State`] if one is already active.
    pub async fn begin(&mut self) -> Result<()> {
        self.transition(Operation::Begin, Command::Begin).await
    }

    /// Commits the active transaction. Fails with [`ClientError::State`] if none is active.
    pub async fn commit(&mut self) -> Result<()> {
        self.transition(Operation::Commit, Command::Commit).await
    }

    /// Rolls back the active transaction. Fails with [`ClientError::State`] if none is active.
    pub async fn rollback(&mut self) -> Result<()> {
        self.transition(Operation::Rollback, Command::Rollback).await
    }

    /// Shuts the transport down. Closing a closed connection does nothing.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        if self.state == SessionState::InTransaction {
            warn!("closing connection with an active transaction");
        }

        self.state = SessionState::Closed;
        self.in_flight = false;
        debug!("connection closed");
        self.transport
            .shutdown()
            .await
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

    /// Returns `true` once the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Host this connection was opened to.
    pub fn host(&self) -> Option<&str> {
        self.peer.as_ref().map(|(host, _)| host.as_str())
    }

    /// Port this connection was opened to.
    pub fn port(&self) -> Option<u16> {
        self.peer.as_ref().map(|(_, port)| *port)
    }

    async fn transition(&mut self, operation: Operation, command: Command) -> Result<()> {
        let next = self.state.check(operation)?;
        self.ensure_settled(operation).await?;
        trace!(%operation, "sending transaction command");

        self.in_flight = true;
        let round_trip = async {
            self.transport.send_cmd(command).await?.flush().await?;
            self.transport.read_reply().await
        }
        .await;

        match self.settle(operation, round_trip).await? {
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

    /// Closes the connection if an earlier request was abandoned before its response was read to the end.
    async fn ensure_settled(&mut self, operation: Operation) -> Result<()> {
        if !self.in_flight {
            return Ok(());
        }

        warn!(%operation, "previous request was cancelled mid-response, closing connection");
        self.in_flight = false;
        self.state = SessionState::Closed;
        let _ = self.transport.shutdown().await;
        Err(ClientError::connection(
            operation,
            io::Error::new(io::ErrorKind::Other, "a cancelled request left its response unread"),
        ))
    }

    /// Closes the connection when a round trip failed on the transport.
    async fn settle<R>(&mut self, operation: Operation, round_trip: io::Result<R>) -> Result<R> {
        self.in_flight = false;
        match round_trip {
            Ok(value) => Ok(value),
            Err(error) => {
                warn!(%operation, %error, "transport failed, closing connection");
                self.state = SessionState::Closed;
                let _ = self.transport.shutdown().await;
                Err(ClientError::connection(operation, error))
            }
        }
    }
}

impl<T> fmt::Debug for Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("transport", &self.transport)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asynchronous::tests::{FailingStream, MockProbe, MockStream};
    use matches::assert_matches;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn mock(response: impl AsRef<[u8]>) -> (Connection<MockStream>, MockProbe) {
        let stream = MockStream::new(response);
        let probe = stream.probe();
        (Connection::new(stream), probe)
    }

    #[test]
    fn test_formats_as_debug() {
        format!("{:?}", Connection::new(FailingStream));
    }

    #[tokio::test]
    async fn test_query_streams_result_into_sink() {
        let (mut connection, probe) = mock("2\0\0\0");
        let mut sink: Vec<u8> = vec![];

        connection.query("1+1", &mut sink).await.unwrap();

        assert_eq!(b"2".to_vec(), sink);
        assert_eq!(b"\x001+1\x00".to_vec(), probe.written());
    }

    #[tokio::test]
    async fn test_failed_query_keeps_connection_usable() {
        let (mut connection, _) = mock("\0err:XPDY0002: no context\0\u{1}");

        let actual_error = connection.query(".", &mut Vec::<u8>::new()).await.expect_err("Operation must fail");

        assert_matches!(
            actual_error,
            ClientError::Query { ref error, .. } if error.code() == Some("err:XPDY0002") && error.message() == "no context"
        );
        assert_eq!(SessionState::Idle, connection.state());
    }

    #[tokio::test]
    async fn test_transport_failure_closes_connection() {
        let mut connection = Connection::new(FailingStream);

        let actual_error = connection.begin().await.expect_err("Operation must fail");

        assert_matches!(actual_error, ClientError::Connection { operation: Operation::Begin, .. });
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_transaction_state_machine() {
        let (mut connection, probe) = mock("\0\0\0\0");

        assert_matches!(connection.commit().await, Err(ClientError::State { .. }));
        connection.begin().await.unwrap();
        assert_matches!(connection.begin().await, Err(ClientError::State { .. }));
        assert_eq!(TransactionState::Active, connection.transaction_state());
        connection.rollback().await.unwrap();

        assert_eq!(SessionState::Idle, connection.state());
        assert_eq!(vec![0x10u8, 0x12], probe.written());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_queries() {
        let (mut connection, probe) = mock("2\0\0\0");

        connection.close().await.unwrap();
        connection.close().await.unwrap();
        let mut sink: Vec<u8> = vec![];
        let actual_error = connection.query("1+1", &mut sink).await.expect_err("Operation must fail");

        assert_matches!(actual_error, ClientError::State { state: SessionState::Closed, .. });
        assert!(sink.is_empty());
        assert_eq!(1, probe.shutdowns());
    }

    #[tokio::test]
    async fn test_query_accepts_raw_bytes() {
        let (mut connection, probe) = mock("2\0\0\0");
        let mut sink: Vec<u8> = vec![];

        connection.query(&b"1+1"[..], &mut sink).await.unwrap();

        assert_eq!(b"2".to_vec(), sink);
        assert_eq!(b"\x001+1\x00".to_vec(), probe.written());
    }

    #[tokio::test]
    async fn test_cancelled_query_closes_connection_on_next_request() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut connection = Connection::new(client);
        let _responder = tokio::spawn(async move {
            let _ = server.write_all(b"first-").await;
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = server.write_all(b"tail\0\0\0").await;
            let _ = server.write_all(b"2\0\0\0").await;
            server
        });

        let mut sink: Vec<u8> = vec![];
        let cancelled = tokio::time::timeout(Duration::from_millis(50), connection.query("slow", &mut sink)).await;
        assert!(cancelled.is_err());
        assert_eq!(b"first-".to_vec(), sink);

        let mut sink: Vec<u8> = vec![];
        let actual_error = connection.query("1+1", &mut sink).await.expect_err("Operation must fail");

        assert_matches!(actual_error, ClientError::Connection { operation: Operation::Query, .. });
        assert!(connection.is_closed());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_query_blocks_transaction_commands() {
        let (client, _server) = tokio::io::duplex(64);
        let mut connection = Connection::new(client);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            connection.query("slow", &mut Vec::<u8>::new()),
        )
        .await;
        assert!(cancelled.is_err());

        assert_matches!(connection.begin().await, Err(ClientError::Connection { operation: Operation::Begin, .. }));
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_read_timeout_from_config_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ConnectionConfig::builder("127.0.0.1", port)
            .connect_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_millis(100))
            .build();
        let mut connection = Connection::open_with(&config).await.unwrap();

        let actual_error = connection
            .query("1+1", &mut Vec::<u8>::new())
            .await
            .expect_err("Operation must fail");

        assert_matches!(
            actual_error,
            ClientError::Connection { operation: Operation::Query, ref source } if source.kind() == io::ErrorKind::TimedOut
        );
        assert!(connection.is_closed());
        assert_eq!(Some(port), connection.port());
        drop(listener);
    }
}
