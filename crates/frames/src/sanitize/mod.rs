//! Frame sanitation: every frame that crosses the framing boundary is
//! normalized to a canonical byte form, so that re-reading or re-writing a
//! frame is stable (`sanitize(sanitize(x)) == sanitize(x)`).

mod comments;
mod json;
mod yaml;

use bytes::Bytes;

use crate::{ContentType, Result};

/// First line of the comment block prepended for comments whose fields no
/// longer exist in the document.
pub const LOST_COMMENT_PREAMBLE: &str = "# Comments lost during an update of this file:";

/// Output form for JSON frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonStyle {
    Compact,
    Spaces(usize),
    Tabs,
}

/// Indentation of block sequences relative to their parent key: compact puts
/// the dash at the key's own column, wide indents it two further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStyle {
    Compact,
    Wide,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SanitizeOptions {
    pub json_style: JsonStyle,
    /// Explicit sequence style; `None` auto-detects from the prior frame,
    /// then the current frame, then falls back to compact.
    pub sequence_style: Option<SequenceStyle>,
    /// Whether to transplant comments from a supplied prior frame.
    pub copy_comments: bool,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            json_style: JsonStyle::Compact,
            sequence_style: None,
            copy_comments: true,
        }
    }
}

/// Normalizes frames per content type. Unknown content types pass through
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    options: SanitizeOptions,
}

impl Sanitizer {
    pub fn new(options: SanitizeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SanitizeOptions {
        &self.options
    }

    pub fn sanitize(&self, content_type: &ContentType, frame: &[u8]) -> Result<Bytes> {
        self.sanitize_with_prior(content_type, frame, None)
    }

    /// Sanitizes `frame`, consulting `prior` (the previous revision of the
    /// same document) for YAML comment transplanting and style detection.
    pub fn sanitize_with_prior(
        &self,
        content_type: &ContentType,
        frame: &[u8],
        prior: Option<&[u8]>,
    ) -> Result<Bytes> {
        if *content_type == ContentType::JSON {
            json::sanitize(self.options.json_style, frame)
        } else if *content_type == ContentType::YAML {
            yaml::sanitize(&self.options, frame, prior)
        } else {
            Ok(Bytes::copy_from_slice(frame))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;
    use pretty_assertions::assert_eq;

    fn sanitize_yaml(input: &str) -> String {
        sanitize_yaml_opts(input, SanitizeOptions::default())
    }

    fn sanitize_yaml_opts(input: &str, options: SanitizeOptions) -> String {
        let out = Sanitizer::new(options)
            .sanitize(&ContentType::YAML, input.as_bytes())
            .unwrap();
        String::from_utf8(out.to_vec()).unwrap()
    }

    #[test]
    fn json_whitespace_only_is_empty() {
        let sanitizer = Sanitizer::default();
        let out = sanitizer.sanitize(&ContentType::JSON, b"  \n\t ").unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn json_compact_form() {
        let sanitizer = Sanitizer::default();
        let out = sanitizer
            .sanitize(&ContentType::JSON, b" {\"b\": 1,\n \"a\": [1, 2]} ")
            .unwrap();
        assert_eq!(&out[..], b"{\"b\":1,\"a\":[1,2]}\n");
    }

    #[test]
    fn json_indented_forms() {
        let spaces = Sanitizer::new(SanitizeOptions {
            json_style: JsonStyle::Spaces(2),
            ..Default::default()
        });
        let out = spaces.sanitize(&ContentType::JSON, b"{\"a\":1}").unwrap();
        assert_eq!(std::str::from_utf8(&out).unwrap(), "{\n  \"a\": 1\n}\n");

        let tabs = Sanitizer::new(SanitizeOptions {
            json_style: JsonStyle::Tabs,
            ..Default::default()
        });
        let out = tabs.sanitize(&ContentType::JSON, b"{\"a\":1}").unwrap();
        assert_eq!(std::str::from_utf8(&out).unwrap(), "{\n\t\"a\": 1\n}\n");
    }

    #[test]
    fn yaml_empty_and_comment_only_frames_are_empty() {
        assert_eq!(sanitize_yaml(""), "");
        assert_eq!(sanitize_yaml("   \n \n"), "");
        assert_eq!(sanitize_yaml("# nothing here\n"), "");
        assert_eq!(sanitize_yaml("---\n# still nothing\n"), "");
    }

    #[test]
    fn yaml_multi_document_frames_are_rejected() {
        let sanitizer = Sanitizer::default();
        let err = sanitizer
            .sanitize(&ContentType::YAML, b"a: 1\n---\nb: 2\n")
            .unwrap_err();
        assert!(matches!(err, Error::TooManyFrames));
    }

    #[test]
    fn yaml_normalizes_and_terminates() {
        assert_eq!(sanitize_yaml("foobar: true"), "foobar: true\n");
        assert_eq!(sanitize_yaml("a:\n  b:   1\n"), "a:\n  b: 1\n");
    }

    #[test]
    fn yaml_compact_and_wide_sequence_styles() {
        let input = "spec:\n  ports:\n  - 80\n  - 443\n";
        // Auto-detection keeps the document's own compact style.
        assert_eq!(sanitize_yaml(input), "spec:\n  ports:\n  - 80\n  - 443\n");

        let wide = sanitize_yaml_opts(
            input,
            SanitizeOptions {
                sequence_style: Some(SequenceStyle::Wide),
                ..Default::default()
            },
        );
        assert_eq!(wide, "spec:\n  ports:\n    - 80\n    - 443\n");

        // And a wide document stays wide without an override.
        assert_eq!(sanitize_yaml(&wide), wide);
    }

    #[test]
    fn yaml_own_comments_survive_reemission() {
        let input = concat!(
            "# deployment of the web tier\n",
            "replicas: 3  # scaled up\n",
            "spec:\n",
            "  # pinned\n",
            "  image: nginx\n",
        );
        assert_eq!(sanitize_yaml(input), input);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let cases: &[(&ContentType, &str)] = &[
            (&ContentType::JSON, "{\"b\": 1, \"a\": {\"c\": [1, 2]}}"),
            (&ContentType::YAML, "a: 1\nlist:\n- x\n- y: 2\n"),
            (
                &ContentType::YAML,
                "# head\nkey: value  # line\nnested:\n  deep:\n  - 1\n",
            ),
            (&ContentType::YAML, "text: \"true\"\nnum: \"080\"\n"),
            (&ContentType::YAML, "multi: \"line one\\nline two\"\n"),
        ];
        let sanitizer = Sanitizer::default();
        for (ct, input) in cases {
            let once = sanitizer.sanitize(ct, input.as_bytes()).unwrap();
            let twice = sanitizer.sanitize(ct, &once).unwrap();
            assert_eq!(
                std::str::from_utf8(&once).unwrap(),
                std::str::from_utf8(&twice).unwrap(),
                "sanitize not idempotent for {input:?}",
            );
        }
    }

    #[test]
    fn comment_transplant_from_prior_revision() {
        let prior = concat!(
            "# owner: platform\n",
            "replicas: 3  # scaled for launch\n",
            "image: nginx:1.24  # pinned\n",
        );
        let current = "replicas: 5\nimage: nginx:1.25\n";

        let sanitizer = Sanitizer::default();
        let out = sanitizer
            .sanitize_with_prior(
                &ContentType::YAML,
                current.as_bytes(),
                Some(prior.as_bytes()),
            )
            .unwrap();
        let text = std::str::from_utf8(&out).unwrap();

        assert_eq!(
            text,
            concat!(
                "# owner: platform\n",
                "replicas: 5  # scaled for launch\n",
                "image: nginx:1.25  # pinned\n",
            )
        );
    }

    #[test]
    fn comments_of_removed_fields_are_reported_in_a_header() {
        let prior = "kept: 1\n# this field went away\ngone: 2  # inline note\n";
        let current = "kept: 1\n";

        let sanitizer = Sanitizer::default();
        let out = sanitizer
            .sanitize_with_prior(
                &ContentType::YAML,
                current.as_bytes(),
                Some(prior.as_bytes()),
            )
            .unwrap();
        let text = std::str::from_utf8(&out).unwrap();

        assert_eq!(
            text,
            concat!(
                "# Comments lost during an update of this file:\n",
                "# Field \"gone\": \"this field went away\"\n",
                "# Field \"gone\": \"inline note\"\n",
                "kept: 1\n",
            )
        );
    }

    #[test]
    fn prior_style_wins_over_current_style() {
        let prior = "ports:\n  - 1\n";
        let current = "ports:\n- 80\n- 443\n";
        let sanitizer = Sanitizer::default();
        let out = sanitizer
            .sanitize_with_prior(
                &ContentType::YAML,
                current.as_bytes(),
                Some(prior.as_bytes()),
            )
            .unwrap();
        assert_eq!(
            std::str::from_utf8(&out).unwrap(),
            "ports:\n  - 80\n  - 443\n"
        );
    }

    #[test]
    fn unknown_content_types_pass_through() {
        let sanitizer = Sanitizer::default();
        let out = sanitizer
            .sanitize(&ContentType::new("application/octet-stream"), b"\x00raw\x01")
            .unwrap();
        assert_eq!(&out[..], b"\x00raw\x01");
    }
}
