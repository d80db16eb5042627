//! Framing shared by the blocking and the asynchronous client.
//!
//! Payload bytes `0x00` and `0xFF` are prefixed with a single `0xFF`, so an unescaped `0x00`
//! terminates a field.
//!
//! A query response is the escaped result, `0x00`, the info string, `0x00` and a status byte.
//! Transaction commands answer with the info string, `0x00` and the status byte only.

use std::io;

/// Request code written before every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Query = 0x00,
    Begin = 0x10,
    Commit = 0x11,
    Rollback = 0x12,
}

pub(crate) const TERMINATOR: u8 = 0x00;
pub(crate) const ESCAPE: u8 = 0xFF;

const STATUS_OK: u8 = 0x00;
const STATUS_FAILED: u8 = 0x01;

/// Appends `bytes` to `out`, prefixing every byte with special meaning by [`ESCAPE`].
pub(crate) fn escape_into(bytes: &[u8], out: &mut Vec<u8>) {
    out.reserve(bytes.len());
    for &byte in bytes {
        if byte == TERMINATOR || byte == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(byte);
    }
}

/// Decodes the status byte closing every response into `true` on success.
pub(crate) fn decode_status(status: u8) -> io::Result<bool> {
    match status {
        STATUS_OK => Ok(true),
        STATUS_FAILED => Ok(false),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid status byte {:#04x}", other),
        )),
    }
}

/// Info string and status closing a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    /// The request succeeded; carries the server info.
    Success(String),
    /// The request failed; carries the server diagnostic.
    Failure(String),
}

impl Reply {
    pub(crate) fn new(info: String, status: u8) -> io::Result<Self> {
        Ok(match decode_status(status)? {
            true => Reply::Success(info),
            false => Reply::Failure(info),
        })
    }
}

/// Converts a raw info field into a string.
pub(crate) fn info_string(raw: Vec<u8>) -> io::Result<String> {
    String::from_utf8(raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Marks a failure of the caller's statement reader, which leaves the request frame incomplete.
pub(crate) fn statement_error(error: io::Error) -> io::Error {
    io::Error::new(error.kind(), format!("reading the statement failed: {}", error))
}

/// Blocking sockets report an elapsed timeout as `WouldBlock` on unix and `TimedOut` on windows; both become
/// `TimedOut`.
pub(crate) fn timed_out(error: io::Error) -> io::Error {
    match error.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            io::Error::new(io::ErrorKind::TimedOut, "server did not respond in time")
        }
        _ => error,
    }
}

/// Outcome of feeding a chunk of escaped input to a [`Unescaper`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Decoded {
    /// Input bytes consumed, including the terminator if it was found.
    pub(crate) consumed: usize,
    /// Whether the unescaped terminator was reached.
    pub(crate) finished: bool,
}

/// Incrementally removes escaping from a field split over arbitrary chunks.
#[derive(Debug, Default)]
pub(crate) struct Unescaper {
    pending_escape: bool,
}

impl Unescaper {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends the unescaped bytes of `input` to `out` and stops right after the terminator.
    pub(crate) fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) -> Decoded {
        for (i, &byte) in input.iter().enumerate() {
            if self.pending_escape {
                self.pending_escape = false;
                out.push(byte);
                continue;
            }
            match byte {
                ESCAPE => self.pending_escape = true,
                TERMINATOR => {
                    return Decoded {
                        consumed: i + 1,
                        finished: true,
                    }
                }
                _ => out.push(byte),
            }
        }

        Decoded {
            consumed: input.len(),
            finished: false,
        }
    }
}
