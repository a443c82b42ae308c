use std::io::{self, Write};

use courier_common::Header;

/// Streaming MIME multipart body writer.
///
/// Parts are delimited as `--boundary` lines; the body is terminated by
/// [`close`](Self::close).
#[derive(Debug)]
pub struct MultipartWriter<W> {
    inner: W,
    boundary: String,
    parts: usize,
}

impl<W: Write> MultipartWriter<W> {
    /// A writer with a fresh random boundary.
    pub fn new(inner: W) -> Self {
        Self::with_boundary(inner, ulid::Ulid::new().to_string())
    }

    pub fn with_boundary(inner: W, boundary: impl Into<String>) -> Self {
        Self {
            inner,
            boundary: boundary.into(),
            parts: 0,
        }
    }

    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Start a new part with `header` and return the sink for its content.
    ///
    /// # Errors
    /// If the underlying writer fails
    pub fn create_part(&mut self, header: &Header) -> io::Result<&mut W> {
        if self.parts > 0 {
            self.inner.write_all(b"\r\n")?;
        }
        write!(self.inner, "--{}\r\n", self.boundary)?;
        header.write_to(&mut self.inner)?;

        self.parts += 1;
        Ok(&mut self.inner)
    }

    /// Write the closing delimiter and hand back the inner writer.
    ///
    /// # Errors
    /// If the underlying writer fails
    pub fn close(mut self) -> io::Result<W> {
        if self.parts > 0 {
            self.inner.write_all(b"\r\n")?;
        }
        write!(self.inner, "--{}--\r\n", self.boundary)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}
