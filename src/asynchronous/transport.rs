use crate::protocol::{escape_into, info_string, statement_error, Command, Reply, Unescaper, TERMINATOR};
use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const BUFFER_SIZE: usize = 8 * 1024;

/// Asynchronous framing layer over any `AsyncRead + AsyncWrite` stream. Mirrors the blocking transport; every
/// socket read and write is bounded by the configured timeouts.
pub(crate) struct Transport<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    stream: T,
    buffer: Box<[u8]>,
    start: usize,
    end: usize,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

async fn bounded<F, R>(limit: Option<Duration>, operation: F) -> io::Result<R>
where
    F: Future<Output = io::Result<R>>,
{
    match limit {
        None => operation.await,
        Some(limit) => tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "server did not respond in time"))?,
    }
}

impl<T> Transport<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(stream: T) -> Self {
        Self {
            stream,
            buffer: vec![0; BUFFER_SIZE].into_boxed_slice(),
            start: 0,
            end: 0,
            read_timeout: None,
            write_timeout: None,
        }
    }

    pub(crate) fn set_timeouts(&mut self, read: Option<Duration>, write: Option<Duration>) {
        self.read_timeout = read;
        self.write_timeout = write;
    }

    pub(crate) async fn send_cmd(&mut self, command: Command) -> io::Result<&mut Self> {
        self.write(&[command as u8]).await?;

        Ok(self)
    }

    pub(crate) async fn send_arg(&mut self, argument: &mut (impl AsyncRead + Unpin)) -> io::Result<&mut Self> {
        let mut chunk = vec![0u8; BUFFER_SIZE];
        let mut escaped = Vec::with_capacity(BUFFER_SIZE);

        loop {
            let size = argument.read(&mut chunk).await.map_err(statement_error)?;
            if size == 0 {
                break;
            }
            escaped.clear();
            escape_into(&chunk[..size], &mut escaped);
            self.write(&escaped).await?;
        }
        self.write(&[TERMINATOR]).await?;

        Ok(self)
    }

    pub(crate) async fn flush(&mut self) -> io::Result<&mut Self> {
        let stream = &mut self.stream;
        bounded(self.write_timeout, stream.flush()).await?;

        Ok(self)
    }

    /// Streams the escaped result field into `sink` as it arrives. A failing sink does not interrupt reading; its
    /// first error is returned as `Ok(Some(_))`.
    pub(crate) async fn copy_result<W>(&mut self, sink: &mut W) -> io::Result<Option<io::Error>>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut unescaper = Unescaper::new();
        let mut chunk = Vec::with_capacity(BUFFER_SIZE);
        let mut sink_error = None;

        loop {
            self.fill().await?;
            chunk.clear();
            let decoded = unescaper.feed(&self.buffer[self.start..self.end], &mut chunk);
            self.start += decoded.consumed;

            if sink_error.is_none() && !chunk.is_empty() {
                sink_error = sink.write_all(&chunk).await.err();
            }
            if decoded.finished {
                break;
            }
        }

        if sink_error.is_none() {
            sink_error = sink.flush().await.err();
        }

        Ok(sink_error)
    }

    pub(crate) async fn read_reply(&mut self) -> io::Result<Reply> {
        let info = self.read_string().await?;
        let status = self.read_byte().await?;

        Reply::new(info, status)
    }

    async fn read_string(&mut self) -> io::Result<String> {
        let mut raw = vec![];

        loop {
            self.fill().await?;
            let available = &self.buffer[self.start..self.end];
            match available.iter().position(|&b| b == TERMINATOR) {
                Some(position) => {
                    raw.extend_from_slice(&available[..position]);
                    self.start += position + 1;
                    break;
                }
                None => {
                    raw.extend_from_slice(available);
                    self.start = self.end;
                }
            }
        }

        info_string(raw)
    }

    async fn read_byte(&mut self) -> io::Result<u8> {
        self.fill().await?;
        let byte = self.buffer[self.start];
        self.start += 1;

        Ok(byte)
    }

    pub(crate) async fn shutdown(&mut self) -> io::Result<()> {
        self.start = 0;
        self.end = 0;
        let stream = &mut self.stream;
        bounded(self.write_timeout, stream.shutdown()).await
    }

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stream = &mut self.stream;
        bounded(self.write_timeout, stream.write_all(bytes)).await
    }

    async fn fill(&mut self) -> io::Result<()> {
        if self.start < self.end {
            return Ok(());
        }

        let stream = &mut self.stream;
        let size = bounded(self.read_timeout, stream.read(&mut self.buffer)).await?;
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection mid-response",
            ));
        }

        self.start = 0;
        self.end = size;
        Ok(())
    }
}

impl<T> fmt::Debug for Transport<T>
where
    T: AsyncRead + AsyncWrite + Unpin + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("stream", &self.stream)
            .field("buffered", &(self.end - self.start))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asynchronous::tests::{FailingStream, MockStream, PendingStream};

    #[tokio::test]
    async fn test_transport_sends_command_with_argument() {
        let stream = MockStream::new("");
        let probe = stream.probe();
        let mut transport = Transport::new(stream);

        let _ = transport
            .send_cmd(Command::Query)
            .await
            .unwrap()
            .send_arg(&mut &[b'a', 0, 0xFF][..])
            .await
            .unwrap();

        assert_eq!(vec![0u8, b'a', 0xFF, 0, 0xFF, 0xFF, 0], probe.written());
    }

    #[tokio::test]
    async fn test_transport_fails_to_send_command_with_failing_stream() {
        let mut transport = Transport::new(FailingStream);

        let actual_error = transport.send_cmd(Command::Begin).await.err().expect("Operation must fail");

        assert_eq!(io::ErrorKind::Other, actual_error.kind());
    }

    #[tokio::test]
    async fn test_copying_result_with_escape_bytes_over_small_reads() {
        let stream = MockStream::chunked(&[0xFFu8, 0, 1, 6, 9, 0xFF, 0xFF, 3, 0, b'i', 0, 0], 1);
        let mut transport = Transport::new(stream);
        let mut sink: Vec<u8> = vec![];

        let sink_error = transport.copy_result(&mut sink).await.unwrap();

        assert!(sink_error.is_none());
        assert_eq!(vec![0u8, 1, 6, 9, 0xFF, 3], sink);
        assert_eq!(Reply::Success("i".to_owned()), transport.read_reply().await.unwrap());
    }

    #[tokio::test]
    async fn test_reading_incomplete_result_fails() {
        let mut transport = Transport::new(MockStream::new("partial_result"));

        let actual_error = transport.copy_result(&mut Vec::<u8>::new()).await.expect_err("Operation must fail");

        assert_eq!(io::ErrorKind::UnexpectedEof, actual_error.kind());
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let mut transport = Transport::new(PendingStream);
        transport.set_timeouts(Some(Duration::from_millis(10)), None);

        let actual_error = transport.read_reply().await.expect_err("Operation must fail");

        assert_eq!(io::ErrorKind::TimedOut, actual_error.kind());
    }
}
