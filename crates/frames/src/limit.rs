use std::io::{self, Read};

/// Caps the bytes returned since the last [`reset_counter`] call. When the
/// cap is reached a final one-byte probe read distinguishes "exactly at the
/// limit" (clean EOF) from "over the limit", and only the latter fails.
///
/// The overflow surfaces as an [`io::Error`] wrapping [`crate::Error::ReadSizeOverflow`]
/// so that `LimitedReader` composes with any `io::Read` consumer;
/// [`LimitedReader::unwrap_overflow`] maps it back.
///
/// [`reset_counter`]: LimitedReader::reset_counter
pub struct LimitedReader<R> {
    inner: R,
    limit: usize,
    read: usize,
}

impl<R: Read> LimitedReader<R> {
    pub fn new(inner: R, limit: usize) -> Self {
        Self {
            inner,
            limit,
            read: 0,
        }
    }

    /// Grants a fresh byte budget, typically after a successful frame read.
    pub fn reset_counter(&mut self) {
        self.read = 0;
    }

    pub fn bytes_read(&self) -> usize {
        self.read
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Converts an `io::Error` produced by this reader back into the crate
    /// error, passing other errors through as IO errors.
    pub fn unwrap_overflow(err: io::Error) -> crate::Error {
        if err
            .get_ref()
            .is_some_and(|inner| inner.downcast_ref::<Overflow>().is_some())
        {
            let limit = err
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<Overflow>())
                .map(|o| o.limit)
                .unwrap_or_default();
            crate::Error::ReadSizeOverflow { limit }
        } else {
            crate::Error::Io(err)
        }
    }
}

#[derive(Debug)]
struct Overflow {
    limit: usize,
}

impl std::fmt::Display for Overflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "read more than the maximum of {} bytes", self.limit)
    }
}

impl std::error::Error for Overflow {}

impl<R: Read> Read for LimitedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.read >= self.limit {
            // Probe one byte: a clean EOF here means the stream was exactly
            // at the limit, which is not an overflow.
            let mut probe = [0u8; 1];
            let n = self.inner.read(&mut probe)?;
            if n == 0 {
                return Ok(0);
            }
            return Err(io::Error::new(
                io::ErrorKind::Other,
                Overflow { limit: self.limit },
            ));
        }

        let cap = (self.limit - self.read).min(buf.len());
        let n = self.inner.read(&mut buf[..cap])?;
        self.read += n;
        Ok(n)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exactly_at_limit_is_not_an_overflow() {
        let mut reader = LimitedReader::new(io::Cursor::new(b"12345".to_vec()), 5);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"12345");
    }

    #[test]
    fn over_limit_fails_after_probe() {
        let mut reader = LimitedReader::new(io::Cursor::new(b"123456".to_vec()), 5);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert!(matches!(
            LimitedReader::<io::Cursor<Vec<u8>>>::unwrap_overflow(err),
            crate::Error::ReadSizeOverflow { limit: 5 },
        ));
    }

    #[test]
    fn reset_grants_a_fresh_budget() {
        let mut reader = LimitedReader::new(io::Cursor::new(b"aaabbb".to_vec()), 3);
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"aaa");

        reader.reset_counter();
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"bbb");
    }
}
