use std::io::Read;

/// Anything a statement can be read from: a string slice, bytes, or a mutable reference to any
/// reader such as a [`File`] holding XQuery code.
///
/// [`File`]: std::fs::File
pub trait AsResource<'a> {
    /// The reader producing the statement bytes.
    type Reader: Read;

    /// Turns the value into its reader.
    fn into_read(self) -> Self::Reader;
}

impl<'a, T> AsResource<'a> for &'a mut T
where
    T: Read,
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
