//! YAML sanitation: re-emits one document from its parsed value tree with a
//! chosen sequence-indentation style, preserving the document's own comments
//! and optionally transplanting comments from a prior revision.

use bytes::Bytes;
use serde_yaml::Value;

use super::comments::{self, CommentMap, Path, PathSeg};
use super::{SanitizeOptions, SequenceStyle, LOST_COMMENT_PREAMBLE};
use crate::{Error, Result};

pub(crate) fn sanitize(
    options: &SanitizeOptions,
    frame: &[u8],
    prior: Option<&[u8]>,
) -> Result<Bytes> {
    let text = std::str::from_utf8(frame).map_err(|err| {
        Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    })?;
    if !has_content(text) {
        return Ok(Bytes::new());
    }

    let docs = crate::scan::split_documents(text);
    if docs.iter().filter(|doc| has_content(doc)).count() > 1 {
        return Err(Error::TooManyFrames);
    }

    let tree: Value = serde_yaml::from_str(text)?;
    let mut comment_map = comments::scan(text);

    let prior_text = prior.and_then(|p| std::str::from_utf8(p).ok());
    let mut lost = Vec::new();
    if let (Some(prior_text), true) = (prior_text, options.copy_comments) {
        if serde_yaml::from_str::<Value>(prior_text).is_ok() {
            let prior_map = comments::scan(prior_text);
            lost = comment_map.transplant_from(&prior_map, &tree);
        } else {
            tracing::debug!("prior frame does not parse; skipping comment transplant");
        }
    }

    let style = options
        .sequence_style
        .or_else(|| prior_text.and_then(detect_sequence_style))
        .or_else(|| detect_sequence_style(text))
        .unwrap_or(SequenceStyle::Compact);

    let mut emitter = Emitter {
        out: String::new(),
        comments: &comment_map,
        style,
    };
    emitter.emit_lost(&lost);
    let mut path = Path::new();
    emitter.emit_root(&tree, &mut path)?;
    for foot in &comment_map.foot {
        emitter.push_comment_line(0, foot);
    }

    Ok(Bytes::from(emitter.out))
}

/// True when the text carries anything besides whitespace, comments and
/// document markers.
fn has_content(text: &str) -> bool {
    text.lines()
        .map(str::trim)
        .any(|line| !line.is_empty() && !line.starts_with('#') && line != "---")
}

/// Infers the sequence-indentation style from the first key-attached
/// sequence in the text: items at the key's own indent are compact, deeper
/// items are wide.
pub(crate) fn detect_sequence_style(text: &str) -> Option<SequenceStyle> {
    let mut last_key_indent: Option<usize> = None;
    for raw in text.lines() {
        let indent = raw.len() - raw.trim_start_matches(' ').len();
        let content = raw[indent..].trim_end();
        if content.is_empty() || content.starts_with('#') || content == "---" {
            continue;
        }
        if content == "-" || content.starts_with("- ") {
            if let Some(key_indent) = last_key_indent {
                return Some(if indent == key_indent {
                    SequenceStyle::Compact
                } else {
                    SequenceStyle::Wide
                });
            }
            continue;
        }
        match comments::split_key(content) {
            Some((_key, rest)) => {
                let (value, _comment) = comments::split_comment(rest);
                last_key_indent = value.is_empty().then_some(indent);
            }
            None => last_key_indent = None,
        }
    }
    None
}

struct Emitter<'a> {
    out: String,
    comments: &'a CommentMap,
    style: SequenceStyle,
}

impl Emitter<'_> {
    fn emit_lost(&mut self, lost: &[(String, String)]) {
        if lost.is_empty() {
            return;
        }
        self.out.push_str(LOST_COMMENT_PREAMBLE);
        self.out.push('\n');
        for (field, comment) in lost {
            self.out
                .push_str(&format!("# Field \"{field}\": \"{comment}\"\n"));
        }
    }

    fn push_indent(&mut self, indent: usize) {
        for _ in 0..indent {
            self.out.push(' ');
        }
    }

    fn push_comment_line(&mut self, indent: usize, body: &str) {
        self.push_indent(indent);
        if body.is_empty() {
            self.out.push_str("#\n");
        } else {
            self.out.push_str("# ");
            self.out.push_str(body);
            self.out.push('\n');
        }
    }

    fn head_comments(&mut self, indent: usize, path: &Path) {
        if let Some(set) = self.comments.get(path) {
            let heads = set.head.clone();
            for head in heads {
                self.push_comment_line(indent, &head);
            }
        }
    }

    fn line_comment(&self, path: &Path) -> String {
        match self.comments.get(path).and_then(|set| set.line.as_ref()) {
            Some(comment) if comment.is_empty() => "  #".to_string(),
            Some(comment) => format!("  # {comment}"),
            None => String::new(),
        }
    }

    fn emit_root(&mut self, value: &Value, path: &mut Path) -> Result<()> {
        match value {
            Value::Mapping(m) if !m.is_empty() => self.emit_mapping(m, 0, path),
            Value::Sequence(s) if !s.is_empty() => self.emit_sequence(s, 0, path),
            Value::Mapping(_) => {
                self.out.push_str("{}\n");
                Ok(())
            }
            Value::Sequence(_) => {
                self.out.push_str("[]\n");
                Ok(())
            }
            scalar => {
                let rendered = render_scalar(scalar).ok_or(Error::UnsupportedYamlKey)?;
                self.out.push_str(&rendered);
                self.out.push('\n');
                Ok(())
            }
        }
    }

    fn emit_mapping(
        &mut self,
        mapping: &serde_yaml::Mapping,
        indent: usize,
        path: &mut Path,
    ) -> Result<()> {
        for (key, value) in mapping {
            let logical = logical_key(key)?;
            path.push(PathSeg::Key(logical));
            self.head_comments(indent, path);
            self.push_indent(indent);
            self.emit_entry(key, value, indent, path)?;
            path.pop();
        }
        Ok(())
    }

    /// Emits `key: value` with the cursor already at the key's column. The
    /// key's nested blocks indent relative to `indent`.
    fn emit_entry(
        &mut self,
        key: &Value,
        value: &Value,
        indent: usize,
        path: &mut Path,
    ) -> Result<()> {
        let key_str = render_scalar(key).ok_or(Error::UnsupportedYamlKey)?;
        let line = self.line_comment(path);
        match value {
            Value::Mapping(child) if !child.is_empty() => {
                self.out.push_str(&format!("{key_str}:{line}\n"));
                self.emit_mapping(child, indent + 2, path)
            }
            Value::Sequence(child) if !child.is_empty() => {
                self.out.push_str(&format!("{key_str}:{line}\n"));
                let item_indent = match self.style {
                    SequenceStyle::Compact => indent,
                    SequenceStyle::Wide => indent + 2,
                };
                self.emit_sequence(child, item_indent, path)
            }
            Value::Mapping(_) => {
                self.out.push_str(&format!("{key_str}: {{}}{line}\n"));
                Ok(())
            }
            Value::Sequence(_) => {
                self.out.push_str(&format!("{key_str}: []{line}\n"));
                Ok(())
            }
            scalar => {
                let rendered = render_scalar(scalar).ok_or(Error::UnsupportedYamlKey)?;
                self.out.push_str(&format!("{key_str}: {rendered}{line}\n"));
                Ok(())
            }
        }
    }

    fn emit_sequence(
        &mut self,
        sequence: &[Value],
        indent: usize,
        path: &mut Path,
    ) -> Result<()> {
        for (i, item) in sequence.iter().enumerate() {
            path.push(PathSeg::Index(i));
            self.head_comments(indent, path);
            match item {
                Value::Mapping(m) if !m.is_empty() => self.emit_mapping_item(m, indent, path)?,
                Value::Sequence(inner) if !inner.is_empty() => {
                    self.push_indent(indent);
                    self.out.push_str("-\n");
                    self.emit_sequence(inner, indent + 2, path)?;
                }
                Value::Mapping(_) => {
                    let line = self.line_comment(path);
                    self.push_indent(indent);
                    self.out.push_str(&format!("- {{}}{line}\n"));
                }
                Value::Sequence(_) => {
                    let line = self.line_comment(path);
                    self.push_indent(indent);
                    self.out.push_str(&format!("- []{line}\n"));
                }
                scalar => {
                    let rendered = render_scalar(scalar).ok_or(Error::UnsupportedYamlKey)?;
                    let line = self.line_comment(path);
                    self.push_indent(indent);
                    self.out.push_str(&format!("- {rendered}{line}\n"));
                }
            }
            path.pop();
        }
        Ok(())
    }

    /// Emits a mapping item in the conventional form: the first entry shares
    /// the dash line, the rest align under it.
    fn emit_mapping_item(
        &mut self,
        mapping: &serde_yaml::Mapping,
        indent: usize,
        path: &mut Path,
    ) -> Result<()> {
        for (i, (key, value)) in mapping.iter().enumerate() {
            let logical = logical_key(key)?;
            path.push(PathSeg::Key(logical));
            if i == 0 {
                self.head_comments(indent, path);
                self.push_indent(indent);
                self.out.push_str("- ");
            } else {
                self.head_comments(indent + 2, path);
                self.push_indent(indent + 2);
            }
            self.emit_entry(key, value, indent + 2, path)?;
            path.pop();
        }
        Ok(())
    }
}

fn logical_key(key: &Value) -> Result<String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        other => render_scalar(other).ok_or(Error::UnsupportedYamlKey),
    }
}

/// Renders a scalar value, or `None` for containers. Strings that could be
/// mistaken for another scalar type, or that carry structure characters,
/// are double-quoted; multi-line strings always are, which also converts
/// folded-style scalars from a prior revision into a form that can carry
/// inline comments.
fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("null".to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(render_number(n)),
        Value::String(s) => Some(if needs_quoting(s) {
            quote_double(s)
        } else {
            s.clone()
        }),
        Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

fn render_number(n: &serde_yaml::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    let f = n.as_f64().unwrap_or(f64::NAN);
    if f.is_nan() {
        ".nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { ".inf" } else { "-.inf" }.to_string()
    } else if f == f.trunc() {
        // Keep the float/integer distinction through a re-parse.
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

fn needs_quoting(s: &str) -> bool {
    if s.is_empty() || s.trim() != s {
        return true;
    }
    if s.contains('\n') || s.contains('\t') {
        return true;
    }
    if s.contains(": ") || s.ends_with(':') || s.contains(" #") {
        return true;
    }
    let first = s.chars().next().unwrap_or(' ');
    if "-?:,[]{}#&*!|>'\"%@`".contains(first) {
        return true;
    }
    const LOOKALIKES: &[&str] = &[
        "null", "~", "true", "false", "yes", "no", "on", "off", "y", "n", ".nan", ".inf", "-.inf",
    ];
    if LOOKALIKES.iter().any(|word| s.eq_ignore_ascii_case(word)) {
        return true;
    }
    if s.parse::<i64>().is_ok() || s.parse::<f64>().is_ok() {
        return true;
    }
    // YAML 1.1 also reads hex, octal and underscore-grouped numbers.
    let lowered = s.to_ascii_lowercase();
    if let Some(hex) = lowered.strip_prefix("0x") {
        if !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return true;
        }
    }
    if let Some(oct) = lowered.strip_prefix("0o") {
        if !oct.is_empty() && oct.chars().all(|c| ('0'..='7').contains(&c)) {
            return true;
        }
    }
    if s.contains('_')
        && s.chars().all(|c| c.is_ascii_digit() || c == '_' || c == '.')
        && s.chars().any(|c| c.is_ascii_digit())
    {
        return true;
    }
    false
}

fn quote_double(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
