//! Low-level frame boundary scanners. These deal in raw bytes only; parsing
//! and sanitation happen above.

use std::io::Read;

use crate::{Error, Result};

const READ_CHUNK: usize = 4 * 1024;

fn find(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Splits a YAML stream into documents at the literal `\n---` separator.
/// A leading `---\n` at stream start is a separator, not content.
///
/// The buffer starts at one read chunk and grows by doubling; a frame that
/// exceeds `max_frame_size` is still drained through its separator so that
/// the scanner's position is deterministic, and only then reported as an
/// overflow.
pub(crate) struct YamlScanner<R> {
    src: R,
    buf: Vec<u8>,
    eof: bool,
    at_start: bool,
    max_frame_size: usize,
}

const SEPARATOR: &[u8] = b"\n---";

impl<R: Read> YamlScanner<R> {
    pub fn new(src: R, max_frame_size: usize) -> Self {
        Self {
            src,
            buf: Vec::with_capacity(READ_CHUNK),
            eof: false,
            at_start: true,
            max_frame_size,
        }
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.src.read(&mut chunk)?;
        if n == 0 {
            self.eof = true;
        } else {
            self.buf.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }

    /// Consumes the separator ending at `at` plus the newline that terminates
    /// the separator line, when present.
    fn consume_separator(&mut self, at: usize) -> Result<()> {
        let mut consumed = at + SEPARATOR.len();
        while self.buf.len() <= consumed && !self.eof {
            self.fill()?;
        }
        if self.buf.len() > consumed && self.buf[consumed] == b'\n' {
            consumed += 1;
        }
        self.buf.drain(..consumed);
        Ok(())
    }

    /// Returns the next raw frame, `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.at_start {
            while self.buf.len() < 4 && !self.eof {
                self.fill()?;
            }
            if self.buf.starts_with(b"---\n") {
                self.buf.drain(..4);
            }
            self.at_start = false;
        }

        let mut search_from = 0;
        loop {
            if let Some(i) = find(&self.buf, search_from, SEPARATOR) {
                let frame = self.buf[..i].to_vec();
                self.consume_separator(i)?;
                if frame.len() > self.max_frame_size {
                    return Err(Error::FrameSizeOverflow {
                        limit: self.max_frame_size,
                    });
                }
                return Ok(Some(frame));
            }

            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let frame = std::mem::take(&mut self.buf);
                if frame.len() > self.max_frame_size {
                    return Err(Error::FrameSizeOverflow {
                        limit: self.max_frame_size,
                    });
                }
                return Ok(Some(frame));
            }

            // The frame assembled so far can still end in a partial separator,
            // so it is oversized only once it clears the limit by the
            // separator length.
            if self.buf.len() > self.max_frame_size + SEPARATOR.len() {
                return self.drain_oversized();
            }

            search_from = self.buf.len().saturating_sub(SEPARATOR.len() - 1);
            self.fill()?;
        }
    }

    /// Discards the remainder of an oversized frame, leaving the scanner
    /// positioned at the next frame, then reports the overflow.
    fn drain_oversized(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(i) = find(&self.buf, 0, SEPARATOR) {
                self.consume_separator(i)?;
                return Err(Error::FrameSizeOverflow {
                    limit: self.max_frame_size,
                });
            }
            if self.eof {
                self.buf.clear();
                return Err(Error::FrameSizeOverflow {
                    limit: self.max_frame_size,
                });
            }
            // Keep only enough tail to complete a partial separator.
            let keep = self.buf.len().saturating_sub(SEPARATOR.len() - 1);
            self.buf.drain(..keep);
            self.fill()?;
        }
    }
}

/// Splits in-memory YAML text into documents with the same separator
/// semantics as [`YamlScanner`]. Used to detect multi-document frames.
pub(crate) fn split_documents(text: &str) -> Vec<&str> {
    let mut rest = text.strip_prefix("---\n").unwrap_or(text);
    let mut docs = Vec::new();
    loop {
        match rest.find("\n---") {
            Some(i) => {
                docs.push(&rest[..i]);
                rest = &rest[i + 4..];
                rest = rest.strip_prefix('\n').unwrap_or(rest);
            }
            None => {
                docs.push(rest);
                return docs;
            }
        }
    }
}

/// Reads JSON values one at a time: a byte tokenizer that buffers until a
/// complete top-level value is seen. Values may be separated by any amount
/// of whitespace.
pub(crate) struct JsonScanner<R> {
    src: R,
    buf: Vec<u8>,
    eof: bool,
    max_frame_size: usize,
}

impl<R: Read> JsonScanner<R> {
    pub fn new(src: R, max_frame_size: usize) -> Self {
        Self {
            src,
            buf: Vec::with_capacity(READ_CHUNK),
            eof: false,
            max_frame_size,
        }
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.src.read(&mut chunk)?;
        if n == 0 {
            self.eof = true;
        } else {
            self.buf.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }

    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        // Skip inter-value whitespace.
        loop {
            let ws = self
                .buf
                .iter()
                .take_while(|b| b.is_ascii_whitespace())
                .count();
            self.buf.drain(..ws);
            if !self.buf.is_empty() {
                break;
            }
            if self.eof {
                return Ok(None);
            }
            self.fill()?;
        }

        match self.buf[0] {
            b'{' | b'[' => self.scan_container(),
            b'"' => self.scan_string(),
            _ => self.scan_scalar(),
        }
    }

    /// Extracts the frame ending at `end` (exclusive), accounting for any
    /// bytes already discarded in drain mode.
    fn finish(&mut self, end: usize, discarded: usize) -> Result<Option<Vec<u8>>> {
        let frame: Vec<u8> = self.buf.drain(..end).collect();
        if discarded + frame.len() > self.max_frame_size {
            return Err(Error::FrameSizeOverflow {
                limit: self.max_frame_size,
            });
        }
        Ok(Some(frame))
    }

    fn scan_container(&mut self) -> Result<Option<Vec<u8>>> {
        let mut pos = 0usize;
        let mut discarded = 0usize;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escape = false;

        loop {
            while pos < self.buf.len() {
                let b = self.buf[pos];
                pos += 1;
                if in_string {
                    if escape {
                        escape = false;
                    } else if b == b'\\' {
                        escape = true;
                    } else if b == b'"' {
                        in_string = false;
                    }
                    continue;
                }
                match b {
                    b'"' => in_string = true,
                    b'{' | b'[' => depth += 1,
                    b'}' | b']' => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            return self.finish(pos, discarded);
                        }
                    }
                    _ => (),
                }
            }
            if self.eof {
                // Unterminated value: hand the remainder to the decoder,
                // which reports the real parse error.
                return self.finish(self.buf.len(), discarded);
            }
            // Bound memory while draining an oversized value.
            if discarded + pos > self.max_frame_size {
                discarded += pos;
                self.buf.drain(..pos);
                pos = 0;
            }
            self.fill()?;
        }
    }

    fn scan_string(&mut self) -> Result<Option<Vec<u8>>> {
        let mut pos = 1usize;
        let mut discarded = 0usize;
        let mut escape = false;

        loop {
            while pos < self.buf.len() {
                let b = self.buf[pos];
                pos += 1;
                if escape {
                    escape = false;
                } else if b == b'\\' {
                    escape = true;
                } else if b == b'"' {
                    return self.finish(pos, discarded);
                }
            }
            if self.eof {
                return self.finish(self.buf.len(), discarded);
            }
            if discarded + pos > self.max_frame_size {
                discarded += pos;
                self.buf.drain(..pos);
                pos = 0;
            }
            self.fill()?;
        }
    }

    fn scan_scalar(&mut self) -> Result<Option<Vec<u8>>> {
        let mut pos = 0usize;
        loop {
            while pos < self.buf.len() {
                if self.buf[pos].is_ascii_whitespace() {
                    return self.finish(pos, 0);
                }
                pos += 1;
            }
            if self.eof {
                return self.finish(self.buf.len(), 0);
            }
            self.fill()?;
        }
    }
}
