use crate::protocol::{info_string, statement_error, timed_out, Command, Reply, Unescaper, TERMINATOR};
use crate::transport::escape_writer::EscapeWriter;
use crate::DatabaseStream;
use std::fmt;
use std::io::{self, Read, Write};

const BUFFER_SIZE: usize = 8 * 1024;

/// Responsible for low-level communication with the [`DatabaseStream`]. It writes request frames and reads
/// response frames.
///
/// As opposed to the [`Connection`], the transport does not know what commands do or which state the session is
/// in. It can only send them and read the replies.
///
/// [`Connection`]: crate::Connection
/// [`DatabaseStream`]: crate::DatabaseStream
pub(crate) struct Transport<T>
where
    T: DatabaseStream,
{
    stream: T,
    buffer: Box<[u8]>,
    start: usize,
    end: usize,
}

impl<T> Transport<T>
where
    T: DatabaseStream,
{
    pub(crate) fn new(stream: T) -> Self {
        Self {
            stream,
            buffer: vec![0; BUFFER_SIZE].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    pub(crate) fn send_cmd(&mut self, command: Command) -> io::Result<&mut Self> {
        self.stream.write_all(&[command as u8]).map_err(timed_out)?;

        Ok(self)
    }

    /// Writes `argument` escaped and terminated. A failing reader is reported through [`statement_error`].
    pub(crate) fn send_arg(&mut self, argument: &mut impl Read) -> io::Result<&mut Self> {
        let mut chunk = vec![0u8; BUFFER_SIZE];
        let mut writer = EscapeWriter::new(&mut self.stream);

        loop {
            let size = match argument.read(&mut chunk) {
                Ok(0) => break,
                Ok(size) => size,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(statement_error(e)),
            };
            writer.write_all(&chunk[..size]).map_err(timed_out)?;
        }
        self.stream.write_all(&[TERMINATOR]).map_err(timed_out)?;

        Ok(self)
    }

    pub(crate) fn flush(&mut self) -> io::Result<&mut Self> {
        self.stream.flush().map_err(timed_out)?;

        Ok(self)
    }

    /// Streams the escaped result field into `sink` as it arrives.
    ///
    /// Transport failures are returned as `Err`. A failing sink does not interrupt reading: the field is consumed
    /// to its terminator and the first sink error is returned as `Ok(Some(_))`.
    pub(crate) fn copy_result<W>(&mut self, sink: &mut W) -> io::Result<Option<io::Error>>
    where
        W: Write + ?Sized,
    {
        let mut unescaper = Unescaper::new();
        let mut chunk = Vec::with_capacity(BUFFER_SIZE);
        let mut sink_error = None;

        loop {
            self.fill()?;
            chunk.clear();
            let decoded = unescaper.feed(&self.buffer[self.start..self.end], &mut chunk);
            self.start += decoded.consumed;

            if sink_error.is_none() && !chunk.is_empty() {
                sink_error = sink.write_all(&chunk).err();
            }
            if decoded.finished {
                break;
            }
        }

        if sink_error.is_none() {
            sink_error = sink.flush().err();
        }

        Ok(sink_error)
    }

    /// Reads the info string and status byte closing every response.
    pub(crate) fn read_reply(&mut self) -> io::Result<Reply> {
        let info = self.read_string()?;
        let status = self.read_byte()?;

        Reply::new(info, status)
    }

    pub(crate) fn read_string(&mut self) -> io::Result<String> {
        let mut raw = vec![];

        loop {
            self.fill()?;
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

    pub(crate) fn read_byte(&mut self) -> io::Result<u8> {
        self.fill()?;
        let byte = self.buffer[self.start];
        self.start += 1;

        Ok(byte)
    }

    pub(crate) fn shutdown(&mut self) -> io::Result<()> {
        self.start = 0;
        self.end = 0;
        self.stream.shutdown()
    }

    /// Makes sure at least one unread byte is buffered.
    fn fill(&mut self) -> io::Result<()> {
        if self.start < self.end {
            return Ok(());
        }

        let size = loop {
            match self.stream.read(&mut self.buffer) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => break result.map_err(timed_out)?,
            }
        };
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
    T: DatabaseStream + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("stream", &self.stream)
            .field("buffered", &(self.end - self.start))
            .finish()
    }
}
