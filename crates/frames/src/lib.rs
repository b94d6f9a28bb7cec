//! Streaming framing pipeline: reads and writes YAML and JSON byte streams
//! as sequences of self-contained documents ("frames") with bounded memory,
//! idempotent sanitation, and optional comment-preserving rewrites against a
//! prior revision of the same document.

mod content;
mod limit;
mod reader;
mod recognize;
mod sanitize;
mod scan;
mod writer;

pub use self::content::{ContentType, Metadata};
pub use self::limit::LimitedReader;
pub use self::reader::{FrameReader, FrameReaderOptions, FrameSource, FramingType};
pub use self::recognize::{negotiate_accept, recognize_source};
pub use self::sanitize::{
    JsonStyle, SanitizeOptions, Sanitizer, SequenceStyle, LOST_COMMENT_PREAMBLE,
};
pub use self::writer::{FrameSink, FrameWriter, FrameWriterOptions};

/// Upper bound on a single frame, unless overridden.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 3 * 1024 * 1024;

/// Upper bound on successful frames per reader or writer, unless overridden.
pub const DEFAULT_MAX_FRAME_COUNT: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported content type '{content_type}' (supported: {supported:?})")]
    UnsupportedContentType {
        content_type: String,
        supported: Vec<String>,
    },

    #[error("frame was larger than the maximum of {limit} bytes")]
    FrameSizeOverflow { limit: usize },

    #[error("more than {limit} frames were processed")]
    FrameCountOverflow { limit: usize },

    #[error("read more than the maximum of {limit} bytes")]
    ReadSizeOverflow { limit: usize },

    #[error("the underlying writer accepted fewer bytes than the frame length")]
    ShortWrite,

    #[error("expected exactly one document in the frame")]
    TooManyFrames,

    #[error("YAML mapping key is not a scalar")]
    UnsupportedYamlKey,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Type-based equality: variants compare equal regardless of payload.
    pub fn same_kind(&self, other: &Error) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
