use std::io::Write;
use std::sync::Mutex;

use crate::sanitize::{SanitizeOptions, Sanitizer};
use crate::{ContentType, Error, Metadata, Result};

/// A byte sink tagged with stream [`Metadata`], the write-side mirror of
/// [`crate::FrameSource`].
pub struct FrameSink {
    writer: Box<dyn Write + Send>,
    metadata: Metadata,
}

impl FrameSink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Box::new(writer),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Wraps the underlying writer through `wrap`, keeping the metadata.
    pub fn map_writer(
        self,
        wrap: impl FnOnce(Box<dyn Write + Send>) -> Box<dyn Write + Send>,
    ) -> Self {
        Self {
            writer: wrap(self.writer),
            metadata: self.metadata,
        }
    }

    pub(crate) fn into_parts(self) -> (Box<dyn Write + Send>, Metadata) {
        (self.writer, self.metadata)
    }
}

#[derive(Debug, Clone)]
pub struct FrameWriterOptions {
    pub max_frame_size: usize,
    pub max_frame_count: usize,
    pub sanitize: SanitizeOptions,
}

impl Default for FrameWriterOptions {
    fn default() -> Self {
        Self {
            max_frame_size: crate::DEFAULT_MAX_FRAME_SIZE,
            max_frame_count: crate::DEFAULT_MAX_FRAME_COUNT,
            sanitize: SanitizeOptions::default(),
        }
    }
}

struct WriterInner {
    writer: Box<dyn Write + Send>,
    successful: usize,
    total: usize,
}

/// Writes sanitized frames to a byte sink. YAML frames are prefixed with the
/// `---\n` document marker; JSON frames are written verbatim. Frames that
/// sanitize to empty are dropped silently.
pub struct FrameWriter {
    content_type: ContentType,
    metadata: Metadata,
    sanitizer: Sanitizer,
    options: FrameWriterOptions,
    inner: Mutex<WriterInner>,
}

impl FrameWriter {
    /// A writer for the YAML or JSON framing implied by `content_type`.
    pub fn new(
        content_type: ContentType,
        sink: FrameSink,
        options: FrameWriterOptions,
    ) -> Result<Self> {
        if crate::FramingType::for_content_type(&content_type).is_none() {
            return Err(Error::UnsupportedContentType {
                content_type: content_type.as_str().to_string(),
                supported: vec![
                    ContentType::YAML.as_str().to_string(),
                    ContentType::JSON.as_str().to_string(),
                ],
            });
        }
        Ok(Self::with_content_type(content_type, sink, options))
    }

    /// A writer whose content type is negotiated from the sink's `Accept`
    /// metadata against `supported` (see [`crate::negotiate_accept`]).
    pub fn negotiated(
        sink: FrameSink,
        supported: &[ContentType],
        options: FrameWriterOptions,
    ) -> Result<Self> {
        let accept = sink.metadata().accept();
        let content_type = crate::negotiate_accept(&accept, supported)?;
        Self::new(content_type, sink, options)
    }

    fn with_content_type(
        content_type: ContentType,
        sink: FrameSink,
        options: FrameWriterOptions,
    ) -> Self {
        let (writer, mut metadata) = sink.into_parts();
        metadata.set_content_type(&content_type);
        Self {
            content_type,
            metadata,
            sanitizer: Sanitizer::new(options.sanitize.clone()),
            options,
            inner: Mutex::new(WriterInner {
                writer,
                successful: 0,
                total: 0,
            }),
        }
    }

    pub fn content_type(&self) -> &ContentType {
        &self.content_type
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn write_frame(&self, frame: &[u8]) -> Result<()> {
        self.write_frame_with_prior(frame, None)
    }

    /// Writes one sanitized frame. For YAML, `prior` supplies the previous
    /// revision of the same document so its comments and sequence style are
    /// carried over.
    pub fn write_frame_with_prior(&self, frame: &[u8], prior: Option<&[u8]>) -> Result<()> {
        let mut inner = self.inner.lock().expect("frame writer poisoned");

        if inner.successful >= self.options.max_frame_count {
            return Err(Error::FrameCountOverflow {
                limit: self.options.max_frame_count,
            });
        }
        if inner.total >= 10 * self.options.max_frame_count {
            return Err(Error::FrameCountOverflow {
                limit: 10 * self.options.max_frame_count,
            });
        }
        inner.total += 1;

        let frame = self
            .sanitizer
            .sanitize_with_prior(&self.content_type, frame, prior)?;
        if frame.is_empty() {
            return Ok(());
        }
        if frame.len() > self.options.max_frame_size {
            return Err(Error::FrameSizeOverflow {
                limit: self.options.max_frame_size,
            });
        }

        if self.content_type == ContentType::YAML {
            write_fully(&mut *inner.writer, b"---\n")?;
        }
        write_fully(&mut *inner.writer, &frame)?;
        inner.writer.flush()?;

        inner.successful += 1;
        tracing::trace!(
            content_type = %self.content_type,
            bytes = frame.len(),
            successful = inner.successful,
            total = inner.total,
            "wrote frame",
        );
        Ok(())
    }
}

/// A single write call: accepting fewer bytes than the frame without an
/// error is a short write.
fn write_fully<W: Write + ?Sized>(writer: &mut W, buf: &[u8]) -> Result<()> {
    let n = writer.write(buf)?;
    if n < buf.len() {
        return Err(Error::ShortWrite);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<StdMutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn yaml_frames_get_document_markers() {
        let buf = SharedBuf::default();
        let writer = FrameWriter::new(
            ContentType::YAML,
            FrameSink::new(buf.clone()),
            FrameWriterOptions::default(),
        )
        .unwrap();

        writer.write_frame(b"a: 1").unwrap();
        writer.write_frame(b"   ").unwrap(); // sanitizes to empty, dropped
        writer.write_frame(b"b: 2\n").unwrap();

        assert_eq!(buf.contents(), "---\na: 1\n---\nb: 2\n");
    }

    #[test]
    fn json_frames_are_written_verbatim() {
        let buf = SharedBuf::default();
        let writer = FrameWriter::new(
            ContentType::JSON,
            FrameSink::new(buf.clone()),
            FrameWriterOptions::default(),
        )
        .unwrap();

        writer.write_frame(b" {\"a\": 1} ").unwrap();
        writer.write_frame(b"{\"b\":2}").unwrap();

        assert_eq!(buf.contents(), "{\"a\":1}\n{\"b\":2}\n");
    }

    #[test]
    fn short_writes_are_reported() {
        struct Shorting;
        impl Write for Shorting {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                Ok(buf.len().saturating_sub(1))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let writer = FrameWriter::new(
            ContentType::JSON,
            FrameSink::new(Shorting),
            FrameWriterOptions::default(),
        )
        .unwrap();
        assert!(matches!(
            writer.write_frame(b"{\"a\":1}"),
            Err(Error::ShortWrite)
        ));
    }

    #[test]
    fn write_count_cap() {
        let buf = SharedBuf::default();
        let writer = FrameWriter::new(
            ContentType::JSON,
            FrameSink::new(buf),
            FrameWriterOptions {
                max_frame_count: 1,
                ..Default::default()
            },
        )
        .unwrap();

        writer.write_frame(b"{\"a\":1}").unwrap();
        assert!(matches!(
            writer.write_frame(b"{\"b\":2}"),
            Err(Error::FrameCountOverflow { limit: 1 })
        ));
    }
}
