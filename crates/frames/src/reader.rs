use std::io::Read;
use std::sync::Mutex;

use bytes::Bytes;

use crate::limit::LimitedReader;
use crate::sanitize::{SanitizeOptions, Sanitizer};
use crate::scan::{JsonScanner, YamlScanner};
use crate::{ContentType, Error, Metadata, Result};

/// How a stream is divided into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingType {
    /// Documents separated by `\n---` at column zero.
    Yaml,
    /// Self-framing: one JSON value per read.
    Json,
    /// The entire stream is one frame. The only mode permitted for content
    /// types other than YAML and JSON.
    Single,
}

impl FramingType {
    pub fn for_content_type(ct: &ContentType) -> Option<FramingType> {
        if *ct == ContentType::YAML {
            Some(FramingType::Yaml)
        } else if *ct == ContentType::JSON {
            Some(FramingType::Json)
        } else {
            None
        }
    }
}

/// A byte source tagged with stream [`Metadata`]. Wrapping the reader
/// preserves the metadata by deep copy.
pub struct FrameSource {
    reader: Box<dyn Read + Send>,
    metadata: Metadata,
}

impl std::fmt::Debug for FrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSource")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl FrameSource {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            metadata: Metadata::new(),
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(std::io::Cursor::new(bytes.into()))
    }

    /// Opens a file source, recording its path as the content location so
    /// that recognition can use the extension.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let mut source = Self::new(file);
        source
            .metadata
            .set_content_location(path.to_string_lossy().into_owned());
        Ok(source)
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

    /// Wraps the underlying reader through `wrap`, keeping the metadata.
    pub fn map_reader(
        self,
        wrap: impl FnOnce(Box<dyn Read + Send>) -> Box<dyn Read + Send>,
    ) -> Self {
        Self {
            reader: wrap(self.reader),
            metadata: self.metadata,
        }
    }

    pub(crate) fn into_parts(self) -> (Box<dyn Read + Send>, Metadata) {
        (self.reader, self.metadata)
    }
}

#[derive(Debug, Clone)]
pub struct FrameReaderOptions {
    pub max_frame_size: usize,
    pub max_frame_count: usize,
    pub sanitize: SanitizeOptions,
}

impl Default for FrameReaderOptions {
    fn default() -> Self {
        Self {
            max_frame_size: crate::DEFAULT_MAX_FRAME_SIZE,
            max_frame_count: crate::DEFAULT_MAX_FRAME_COUNT,
            sanitize: SanitizeOptions::default(),
        }
    }
}

enum RawSource {
    Yaml(YamlScanner<Box<dyn Read + Send>>),
    Json(JsonScanner<Box<dyn Read + Send>>),
    Single {
        reader: Option<LimitedReader<Box<dyn Read + Send>>>,
    },
}

impl RawSource {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        match self {
            RawSource::Yaml(scanner) => scanner.next_frame(),
            RawSource::Json(scanner) => scanner.next_frame(),
            RawSource::Single { reader } => {
                let Some(mut reader) = reader.take() else {
                    return Ok(None);
                };
                let mut frame = Vec::new();
                if let Err(err) = reader.read_to_end(&mut frame) {
                    return Err(
                        match LimitedReader::<Box<dyn Read + Send>>::unwrap_overflow(err) {
                            Error::ReadSizeOverflow { limit } => Error::FrameSizeOverflow { limit },
                            other => other,
                        },
                    );
                }
                Ok(Some(frame))
            }
        }
    }
}

struct ReaderInner {
    source: RawSource,
    successful: usize,
    total: usize,
    eof: bool,
}

/// Reads sanitized frames from a byte stream. Concurrent `read_frame` calls
/// serialize on an internal mutex; counters enforce both the successful
/// frame cap and the `10 ×` total-attempt cap.
pub struct FrameReader {
    content_type: ContentType,
    metadata: Metadata,
    sanitizer: Sanitizer,
    options: FrameReaderOptions,
    inner: Mutex<ReaderInner>,
}

impl std::fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("content_type", &self.content_type)
            .field("metadata", &self.metadata)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl FrameReader {
    /// A reader for the YAML or JSON framing implied by `content_type`.
    /// Other content types must use [`FrameReader::single`].
    pub fn new(
        content_type: ContentType,
        source: FrameSource,
        options: FrameReaderOptions,
    ) -> Result<Self> {
        let Some(framing) = FramingType::for_content_type(&content_type) else {
            return Err(Error::UnsupportedContentType {
                content_type: content_type.as_str().to_string(),
                supported: vec![
                    ContentType::YAML.as_str().to_string(),
                    ContentType::JSON.as_str().to_string(),
                ],
            });
        };
        Ok(Self::with_framing(framing, content_type, source, options))
    }

    /// A reader treating the entire stream as one frame of any content type.
    pub fn single(
        content_type: ContentType,
        source: FrameSource,
        options: FrameReaderOptions,
    ) -> Self {
        Self::with_framing(FramingType::Single, content_type, source, options)
    }

    /// A reader over a source whose content type is inferred from metadata
    /// or content (see [`crate::recognize_source`]).
    pub fn recognized(source: FrameSource, options: FrameReaderOptions) -> Result<Self> {
        let (content_type, source) =
            crate::recognize::recognize_source(source, &[ContentType::YAML, ContentType::JSON])?;
        Self::new(content_type, source, options)
    }

    fn with_framing(
        framing: FramingType,
        content_type: ContentType,
        source: FrameSource,
        options: FrameReaderOptions,
    ) -> Self {
        let (reader, mut metadata) = source.into_parts();
        metadata.set_content_type(&content_type);

        let source = match framing {
            FramingType::Yaml => RawSource::Yaml(YamlScanner::new(reader, options.max_frame_size)),
            FramingType::Json => RawSource::Json(JsonScanner::new(reader, options.max_frame_size)),
            FramingType::Single => RawSource::Single {
                reader: Some(LimitedReader::new(reader, options.max_frame_size)),
            },
        };

        Self {
            content_type,
            metadata,
            sanitizer: Sanitizer::new(options.sanitize.clone()),
            options,
            inner: Mutex::new(ReaderInner {
                source,
                successful: 0,
                total: 0,
                eof: false,
            }),
        }
    }

    pub fn content_type(&self) -> &ContentType {
        &self.content_type
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Returns the next non-empty sanitized frame, or `None` at end of
    /// stream. Frames that sanitize to empty are skipped; they count toward
    /// the total-attempt cap but not the successful cap.
    pub fn read_frame(&self) -> Result<Option<Bytes>> {
        let mut inner = self.inner.lock().expect("frame reader poisoned");
        if inner.eof {
            return Ok(None);
        }

        loop {
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

            let Some(raw) = inner.source.next_frame()? else {
                inner.eof = true;
                return Ok(None);
            };

            let frame = self.sanitizer.sanitize(&self.content_type, &raw)?;
            if frame.is_empty() {
                continue;
            }

            inner.successful += 1;
            tracing::trace!(
                content_type = %self.content_type,
                bytes = frame.len(),
                successful = inner.successful,
                total = inner.total,
                "read frame",
            );
            return Ok(Some(frame));
        }
    }

    /// Drains the stream, collecting every remaining frame.
    pub fn read_all(&self) -> Result<Vec<Bytes>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.read_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn yaml_reader(input: &str, options: FrameReaderOptions) -> FrameReader {
        FrameReader::new(
            ContentType::YAML,
            FrameSource::from_bytes(input.as_bytes().to_vec()),
            options,
        )
        .unwrap()
    }

    #[test]
    fn yaml_framing_and_sanitation_scenario() {
        // Empty and whitespace-only documents are skipped; both real
        // documents fit the 13-byte budget exactly.
        let input = "\n---\n\n---\nfoobar: true\n---\n  \n---\nfoobar: true\n---";
        let reader = yaml_reader(
            input,
            FrameReaderOptions {
                max_frame_size: 13,
                ..Default::default()
            },
        );

        assert_eq!(
            reader.read_frame().unwrap().as_deref(),
            Some(&b"foobar: true\n"[..])
        );
        assert_eq!(
            reader.read_frame().unwrap().as_deref(),
            Some(&b"foobar: true\n"[..])
        );
        assert_eq!(reader.read_frame().unwrap(), None);
        // EOF is sticky.
        assert_eq!(reader.read_frame().unwrap(), None);
    }

    #[test]
    fn json_self_framing_scenario() {
        let input = "{\"foo\":true}\n{\"bar\":\"hello\"}\n";
        let reader = FrameReader::new(
            ContentType::JSON,
            FrameSource::from_bytes(input.as_bytes().to_vec()),
            FrameReaderOptions::default(),
        )
        .unwrap();

        assert_eq!(
            reader.read_frame().unwrap().as_deref(),
            Some(&b"{\"foo\":true}\n"[..])
        );
        assert_eq!(
            reader.read_frame().unwrap().as_deref(),
            Some(&b"{\"bar\":\"hello\"}\n"[..])
        );
        assert_eq!(reader.read_frame().unwrap(), None);
    }

    #[test]
    fn successful_frame_cap() {
        let input = "a: 1\n---\nb: 2\n---\nc: 3\n";
        let reader = yaml_reader(
            input,
            FrameReaderOptions {
                max_frame_count: 2,
                ..Default::default()
            },
        );
        assert!(reader.read_frame().unwrap().is_some());
        assert!(reader.read_frame().unwrap().is_some());
        assert!(matches!(
            reader.read_frame(),
            Err(Error::FrameCountOverflow { limit: 2 })
        ));
    }

    #[test]
    fn total_attempt_cap_counts_empty_frames() {
        // One real frame, then a long run of empty documents: they are
        // skipped rather than returned, but with max_frame_count = 2 the
        // 10x total cap still trips before EOF is reached.
        let input = format!("a: 1{}", "\n---\n".repeat(32));
        let reader = yaml_reader(
            &input,
            FrameReaderOptions {
                max_frame_count: 2,
                ..Default::default()
            },
        );
        assert!(reader.read_frame().unwrap().is_some());
        assert!(matches!(
            reader.read_frame(),
            Err(Error::FrameCountOverflow { limit: 20 })
        ));
    }

    #[test]
    fn oversized_frame_does_not_leak_partial_output() {
        let input = format!("big: {}\n---\nok: 1\n", "x".repeat(64));
        let reader = yaml_reader(
            &input,
            FrameReaderOptions {
                max_frame_size: 16,
                ..Default::default()
            },
        );
        assert!(matches!(
            reader.read_frame(),
            Err(Error::FrameSizeOverflow { limit: 16 })
        ));
        // The stream stays usable for the next frame.
        assert_eq!(reader.read_frame().unwrap().as_deref(), Some(&b"ok: 1\n"[..]));
    }

    #[test]
    fn single_mode_reads_whole_stream_once() {
        let reader = FrameReader::single(
            ContentType::new("text/plain"),
            FrameSource::from_bytes(b"anything at all".to_vec()),
            FrameReaderOptions::default(),
        );
        assert_eq!(
            reader.read_frame().unwrap().as_deref(),
            Some(&b"anything at all"[..])
        );
        assert_eq!(reader.read_frame().unwrap(), None);
    }

    #[test]
    fn single_mode_enforces_the_size_cap() {
        let reader = FrameReader::single(
            ContentType::new("text/plain"),
            FrameSource::from_bytes(vec![b'x'; 32]),
            FrameReaderOptions {
                max_frame_size: 16,
                ..Default::default()
            },
        );
        assert!(matches!(
            reader.read_frame(),
            Err(Error::FrameSizeOverflow { limit: 16 })
        ));
    }

    #[test]
    fn unknown_content_type_requires_single_mode() {
        let err = FrameReader::new(
            ContentType::new("text/plain"),
            FrameSource::from_bytes(b"".to_vec()),
            FrameReaderOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedContentType { .. }));
    }
}
