use crate::protocol::escape_into;
use std::io::{self, Write};

/// Wraps a writer and escapes every byte with special meaning before passing it on.
///
/// # Examples
/// ## Input
/// `[0, 1, 2, 3, 4, 0xFF]`
/// ## Output
/// `[0xFF, 0, 1, 2, 3, 4, 0xFF, 0xFF]`
pub(crate) struct EscapeWriter<'a, W>
where
    W: Write,
{
    inner: &'a mut W,
    scratch: Vec<u8>,
}

impl<'a, W> EscapeWriter<'a, W>
where
    W: Write,
{
    pub(crate) fn new(inner: &'a mut W) -> Self {
        Self { inner, scratch: vec![] }
    }
}

impl<W> Write for EscapeWriter<'_, W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scratch.clear();
        escape_into(buf, &mut self.scratch);
        self.inner.write_all(&self.scratch)?;

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
