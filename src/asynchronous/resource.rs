use tokio::io::AsyncRead;

/// Asynchronous counterpart of [`AsResource`]: anything a statement can be read from without blocking.
///
/// [`AsResource`]: crate::AsResource
pub trait AsResource<'a> {
    /// The reader producing the statement bytes.
    type Reader: AsyncRead + Unpin;

    /// Turns the value into its reader.
    fn into_read(self) -> Self::Reader;
}

impl<'a, T> AsResource<'a> for &'a mut T
where
    T: AsyncRead + Unpin,
{
    type Reader = &'a mut T;

    fn into_read(self) -> Self::Reader {
        self
    }
}

impl<'a> AsResource<'a> for &'a str {
    type Reader = &'a [u8];

    fn into_read(self) -> Self::Reader {
        self.as_bytes()
    }
}

impl<'a> AsResource<'a> for &'a String {
    type Reader = &'a [u8];

    fn into_read(self) -> Self::Reader {
        self.as_bytes()
    }
}

impl<'a> AsResource<'a> for &'a [u8] {
    type Reader = &'a [u8];

    fn into_read(self) -> Self::Reader {
        self
    }
}
