use std::cmp::Ordering;
use std::io::Read;

use crate::{ContentType, Error, FrameSource, Result};

/// How many bytes of content may be inspected to classify a stream.
const PEEK_LIMIT: usize = 2048;

/// Determines the content type of `source`, consuming nothing: peeked bytes
/// are chained back ahead of the remaining stream.
///
/// Resolution order: an explicit `Content-Type` in the metadata, the
/// extension of `X-Content-Location`, then content inspection (a leading `{`
/// is JSON; otherwise the first substantive line must parse as a YAML
/// mapping).
pub fn recognize_source(
    mut source: FrameSource,
    supported: &[ContentType],
) -> Result<(ContentType, FrameSource)> {
    if let Some(ct) = source.metadata().content_type() {
        return if supported.contains(&ct) {
            Ok((ct, source))
        } else {
            Err(unsupported(ct.as_str(), supported))
        };
    }

    if let Some(location) = source.metadata().content_location() {
        if let Some(ct) = content_type_for_extension(location) {
            tracing::debug!(location, content_type = %ct, "recognized by extension");
            source.metadata_mut().set_content_type(&ct);
            return if supported.contains(&ct) {
                Ok((ct, source))
            } else {
                Err(unsupported(ct.as_str(), supported))
            };
        }
    }

    // Peek at the content itself, then chain the peeked bytes back ahead of
    // the remaining stream so nothing is lost.
    let (mut reader, metadata) = source.into_parts();
    let mut peeked = vec![0u8; PEEK_LIMIT];
    let mut filled = 0usize;
    while filled < PEEK_LIMIT {
        let n = reader.read(&mut peeked[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    peeked.truncate(filled);

    let ct = classify_peeked(&peeked).ok_or_else(|| unsupported("unrecognized", supported))?;
    tracing::debug!(content_type = %ct, "recognized by content");

    let mut source =
        FrameSource::new(std::io::Cursor::new(peeked).chain(reader)).with_metadata(metadata);
    source.metadata_mut().set_content_type(&ct);
    if supported.contains(&ct) {
        Ok((ct, source))
    } else {
        Err(unsupported(ct.as_str(), supported))
    }
}

fn classify_peeked(peeked: &[u8]) -> Option<ContentType> {
    let first = peeked.iter().find(|b| !b.is_ascii_whitespace())?;
    if *first == b'{' {
        return Some(ContentType::JSON);
    }

    let text = String::from_utf8_lossy(&peeked);
    let line = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && *line != "---" && !line.starts_with('#'))?;
    match serde_yaml::from_str::<serde_yaml::Value>(line) {
        Ok(serde_yaml::Value::Mapping(_)) => Some(ContentType::YAML),
        _ => None,
    }
}

fn content_type_for_extension(location: &str) -> Option<ContentType> {
    let ext = location.rsplit('.').next()?;
    match ext.to_ascii_lowercase().as_str() {
        "yaml" | "yml" => Some(ContentType::YAML),
        "json" => Some(ContentType::JSON),
        _ => None,
    }
}

fn unsupported(content_type: &str, supported: &[ContentType]) -> Error {
    Error::UnsupportedContentType {
        content_type: content_type.to_string(),
        supported: supported.iter().map(|ct| ct.as_str().to_string()).collect(),
    }
}

/// Walks `Accept` values in priority order and returns the first supported
/// media type. Within a single value, ranges are ordered by `q` weight
/// (stable for ties); `*/*` and `type/*` wildcards match the first declared
/// supported type. An empty accept list behaves as `*/*`.
pub fn negotiate_accept(accept: &[String], supported: &[ContentType]) -> Result<ContentType> {
    assert!(!supported.is_empty(), "no supported content types declared");

    if accept.is_empty() {
        return Ok(supported[0].clone());
    }

    for header in accept {
        let mut ranges: Vec<(mime::Mime, f32)> = header
            .split(',')
            .filter_map(|part| {
                let part = part.trim();
                let parsed = part.parse::<mime::Mime>().ok()?;
                let q = parsed
                    .get_param("q")
                    .and_then(|v| v.as_str().parse::<f32>().ok())
                    .unwrap_or(1.0);
                Some((parsed, q))
            })
            .collect();
        ranges.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        for (range, _) in ranges {
            // Compare essences: a parsed range may carry q parameters.
            if range.essence_str() == "*/*" {
                return Ok(supported[0].clone());
            }
            if range.subtype() == mime::STAR {
                let prefix = format!("{}/", range.type_());
                if let Some(ct) = supported.iter().find(|ct| ct.as_str().starts_with(&prefix)) {
                    return Ok(ct.clone());
                }
                continue;
            }
            if let Some(ct) = supported
                .iter()
                .find(|ct| ct.as_str() == range.essence_str())
            {
                return Ok(ct.clone());
            }
        }
    }

    Err(unsupported(&accept.join(", "), supported))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{FrameReader, FrameReaderOptions};

    #[test]
    fn peeked_json_is_recognized_and_nothing_is_lost() {
        let source = FrameSource::from_bytes(b"  \n{\"a\":1}  ".to_vec());
        let (ct, source) =
            recognize_source(source, &[ContentType::YAML, ContentType::JSON]).unwrap();
        assert_eq!(ct, ContentType::JSON);

        let reader = FrameReader::new(ct, source, FrameReaderOptions::default()).unwrap();
        assert_eq!(
            reader.read_frame().unwrap().as_deref(),
            Some(&b"{\"a\":1}\n"[..])
        );
    }

    #[test]
    fn peeked_yaml_is_recognized() {
        let source = FrameSource::from_bytes(b"a: 1".to_vec());
        let (ct, _) = recognize_source(source, &[ContentType::YAML, ContentType::JSON]).unwrap();
        assert_eq!(ct, ContentType::YAML);
    }

    #[test]
    fn extension_wins_over_content() {
        let mut source = FrameSource::from_bytes(b"{\"a\":1}".to_vec());
        source.metadata_mut().set_content_location("dir/object.yaml");
        let (ct, _) = recognize_source(source, &[ContentType::YAML, ContentType::JSON]).unwrap();
        assert_eq!(ct, ContentType::YAML);
    }

    #[test]
    fn unrecognizable_content_is_an_error() {
        let source = FrameSource::from_bytes(b"\x00\x01\x02 binary".to_vec());
        let err =
            recognize_source(source, &[ContentType::YAML, ContentType::JSON]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedContentType { .. }));
    }

    #[test]
    fn accept_negotiation_prefers_earlier_headers_then_weight() {
        let supported = [
            ContentType::new("application/foo"),
            ContentType::YAML,
            ContentType::JSON,
        ];

        let accept = vec![
            "application/bar, application/json;q=0.8".to_string(),
            "application/yaml".to_string(),
        ];
        assert_eq!(
            negotiate_accept(&accept, &supported).unwrap(),
            ContentType::JSON
        );

        let accept = vec![
            "application/bar, */*;q=0.7".to_string(),
            "application/yaml".to_string(),
        ];
        assert_eq!(
            negotiate_accept(&accept, &supported).unwrap(),
            ContentType::new("application/foo")
        );
    }

    #[test]
    fn no_overlap_is_an_error() {
        let accept = vec!["application/bar".to_string()];
        assert!(matches!(
            negotiate_accept(&accept, &[ContentType::JSON]),
            Err(Error::UnsupportedContentType { .. })
        ));
    }
}
