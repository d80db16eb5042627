use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// Represents a stream usable as the transport of a [`Connection`].
///
/// Besides reading and writing, the connection needs to release the stream when it is closed and
/// may apply I/O timeouts to it.
///
/// [`Connection`]: crate::Connection
pub trait DatabaseStream: Read + Write {
    /// Releases the stream. Called exactly once by the owning connection.
    fn shutdown(&mut self) -> io::Result<()>;

    /// Applies read and write timeouts. Streams without timeout support may ignore them.
    fn set_timeouts(&mut self, _read: Option<Duration>, _write: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

impl DatabaseStream for TcpStream {
    fn shutdown(&mut self) -> io::Result<()> {
        match TcpStream::shutdown(self, Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            result => result,
        }
    }

    fn set_timeouts(&mut self, read: Option<Duration>, write: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(read)?;
        self.set_write_timeout(write)
    }
}
