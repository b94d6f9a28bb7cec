//! Line-based comment extraction for YAML documents. The sanitizer re-emits
//! documents from the parsed value tree, so comments must be lifted out of
//! the raw text beforehand and re-attached by field path during emission.

use std::collections::HashMap;

/// One step of a field path: a mapping key or a sequence index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum PathSeg {
    Key(String),
    Index(usize),
}

pub(crate) type Path = Vec<PathSeg>;

pub(crate) fn path_display(path: &Path) -> String {
    let mut out = String::new();
    for seg in path {
        match seg {
            PathSeg::Key(k) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(k);
            }
            PathSeg::Index(i) => {
                out.push('[');
                out.push_str(&i.to_string());
                out.push(']');
            }
        }
    }
    out
}

/// The comments attached to one field.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CommentSet {
    /// Full-line `#` comments directly above the field.
    pub head: Vec<String>,
    /// The trailing comment on the field's own line.
    pub line: Option<String>,
}

impl CommentSet {
    fn is_empty(&self) -> bool {
        self.head.is_empty() && self.line.is_none()
    }
}

/// All comments of one document, keyed by field path, plus the trailing
/// comment block at the end of the document.
#[derive(Debug, Clone, Default)]
pub(crate) struct CommentMap {
    pub fields: HashMap<Path, CommentSet>,
    /// Paths in document order; drives deterministic "lost comment" output.
    pub order: Vec<Path>,
    pub foot: Vec<String>,
}

impl CommentMap {
    pub fn get(&self, path: &Path) -> Option<&CommentSet> {
        self.fields.get(path)
    }

    fn record(&mut self, path: Path, set: CommentSet) {
        if set.is_empty() {
            return;
        }
        let entry = self.fields.entry(path.clone()).or_default();
        if !self.order.contains(&path) {
            self.order.push(path);
        }
        if entry.head.is_empty() {
            entry.head = set.head;
        }
        if entry.line.is_none() {
            entry.line = set.line;
        }
    }

    /// Copies comments from `prior` onto fields that exist in `tree` and
    /// have empty slots here. Comments of fields absent from `tree` are
    /// returned as `(field, comment)` pairs in document order.
    pub fn transplant_from(
        &mut self,
        prior: &CommentMap,
        tree: &serde_yaml::Value,
    ) -> Vec<(String, String)> {
        let mut lost = Vec::new();
        for path in &prior.order {
            let set = &prior.fields[path];
            if path_exists(tree, path) {
                self.record(path.clone(), set.clone());
            } else {
                let field = path_display(path);
                for comment in &set.head {
                    lost.push((field.clone(), comment.clone()));
                }
                if let Some(comment) = &set.line {
                    lost.push((field.clone(), comment.clone()));
                }
            }
        }
        if self.foot.is_empty() {
            self.foot = prior.foot.clone();
        }
        lost
    }
}

fn path_exists(tree: &serde_yaml::Value, path: &Path) -> bool {
    let mut node = tree;
    for seg in path {
        match seg {
            PathSeg::Key(k) => {
                let serde_yaml::Value::Mapping(m) = node else {
                    return false;
                };
                match m.get(&serde_yaml::Value::String(k.clone())) {
                    Some(child) => node = child,
                    None => return false,
                }
            }
            PathSeg::Index(i) => {
                let serde_yaml::Value::Sequence(s) = node else {
                    return false;
                };
                match s.get(*i) {
                    Some(child) => node = child,
                    None => return false,
                }
            }
        }
    }
    true
}

enum Ctx {
    Map { indent: usize, key: Option<String> },
    Seq { indent: usize, index: Option<usize> },
}

struct Scanner {
    stack: Vec<Ctx>,
    pending: Vec<String>,
    map: CommentMap,
    /// While inside a block scalar (`|` or `>`), lines indented deeper than
    /// this are content, not structure.
    skip_block: Option<usize>,
}

impl Scanner {
    fn path(&self) -> Path {
        self.stack
            .iter()
            .filter_map(|ctx| match ctx {
                Ctx::Map { key, .. } => key.clone().map(PathSeg::Key),
                Ctx::Seq { index, .. } => index.map(PathSeg::Index),
            })
            .collect()
    }

    fn key_line(&mut self, indent: usize, content: &str) {
        let Some((key, rest)) = split_key(content) else {
            // Not a key line (a wrapped scalar continuation, for example):
            // discard pending comments rather than misattach them.
            self.pending.clear();
            return;
        };

        while let Some(top) = self.stack.last() {
            let pop = match top {
                Ctx::Map { indent: i, .. } => *i > indent,
                Ctx::Seq { indent: i, .. } => *i >= indent,
            };
            if !pop {
                break;
            }
            self.stack.pop();
        }

        match self.stack.last_mut() {
            Some(Ctx::Map { indent: i, key: k }) if *i == indent => *k = Some(key),
            _ => self.stack.push(Ctx::Map {
                indent,
                key: Some(key),
            }),
        }

        let (value, comment) = split_comment(rest);
        if value.starts_with('|') || value.starts_with('>') {
            self.skip_block = Some(indent);
        }
        let set = CommentSet {
            head: std::mem::take(&mut self.pending),
            line: comment,
        };
        self.map.record(self.path(), set);
    }

    fn dash_line(&mut self, indent: usize, rest: &str) {
        while let Some(top) = self.stack.last() {
            let pop = match top {
                Ctx::Map { indent: i, .. } => *i > indent,
                Ctx::Seq { indent: i, .. } => *i > indent,
            };
            if !pop {
                break;
            }
            self.stack.pop();
        }

        match self.stack.last_mut() {
            Some(Ctx::Seq { indent: i, index }) if *i == indent => {
                *index = Some(index.map_or(0, |i| i + 1));
            }
            _ => self.stack.push(Ctx::Seq {
                indent,
                index: Some(0),
            }),
        }

        // Comments above the dash attach to the item itself.
        if !self.pending.is_empty() {
            let set = CommentSet {
                head: std::mem::take(&mut self.pending),
                line: None,
            };
            self.map.record(self.path(), set);
        }

        let rest = rest.trim_start();
        if rest.is_empty() {
            return;
        }
        // The item's first line carries content: either a nested dash or the
        // first key of a mapping item, both at the conventional +2 indent.
        if let Some(inner) = rest.strip_prefix('-').filter(|r| r.is_empty() || r.starts_with(' ')) {
            self.dash_line(indent + 2, inner);
        } else if split_key(rest).is_some() {
            self.key_line(indent + 2, rest);
        } else {
            // Scalar item: the trailing comment belongs to the item.
            let (value, comment) = split_comment(rest);
            if value.starts_with('|') || value.starts_with('>') {
                self.skip_block = Some(indent);
            }
            self.map.record(
                self.path(),
                CommentSet {
                    head: Vec::new(),
                    line: comment,
                },
            );
        }
    }
}

/// Extracts the comment map of a single YAML document.
pub(crate) fn scan(text: &str) -> CommentMap {
    let mut scanner = Scanner {
        stack: Vec::new(),
        pending: Vec::new(),
        map: CommentMap::default(),
        skip_block: None,
    };

    for raw in text.lines() {
        let indent = raw.len() - raw.trim_start_matches(' ').len();
        let content = raw[indent..].trim_end();
        if let Some(threshold) = scanner.skip_block {
            if content.is_empty() || indent > threshold {
                continue;
            }
            scanner.skip_block = None;
        }
        if content.is_empty() {
            continue;
        }
        if let Some(body) = content.strip_prefix('#') {
            scanner.pending.push(comment_body(body));
            continue;
        }
        if content == "---" {
            continue;
        }
        if let Some(rest) = content
            .strip_prefix('-')
            .filter(|r| r.is_empty() || r.starts_with(' '))
        {
            scanner.dash_line(indent, rest);
        } else {
            scanner.key_line(indent, content);
        }
    }

    scanner.map.foot = scanner.pending;
    scanner.map
}

fn comment_body(after_hash: &str) -> String {
    after_hash.strip_prefix(' ').unwrap_or(after_hash).to_string()
}

/// Splits `key: rest` at the first colon outside quotes that ends the key.
/// Returns the unquoted key and everything after the colon.
pub(crate) fn split_key(content: &str) -> Option<(String, &str)> {
    let bytes = content.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    let mut escape = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_double {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_double = false;
            }
            continue;
        }
        if in_single {
            if b == b'\'' {
                in_single = false;
            }
            continue;
        }
        match b {
            b'"' if i == 0 => in_double = true,
            b'\'' if i == 0 => in_single = true,
            b'#' if i == 0 || bytes[i - 1] == b' ' => return None,
            b':' => {
                let rest = &content[i + 1..];
                if rest.is_empty() || rest.starts_with(' ') {
                    return Some((unquote(&content[..i]), rest));
                }
            }
            _ => (),
        }
    }
    None
}

fn unquote(key: &str) -> String {
    let key = key.trim();
    if let Some(inner) = key.strip_prefix('"').and_then(|k| k.strip_suffix('"')) {
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(other) => out.push(other),
                    None => (),
                }
            } else {
                out.push(c);
            }
        }
        out
    } else if let Some(inner) = key.strip_prefix('\'').and_then(|k| k.strip_suffix('\'')) {
        inner.replace("''", "'")
    } else {
        key.to_string()
    }
}

/// Splits a value from its trailing comment, respecting quotes. The comment
/// marker is a `#` preceded by whitespace.
pub(crate) fn split_comment(rest: &str) -> (&str, Option<String>) {
    let bytes = rest.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    let mut escape = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_double {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_double = false;
            }
            continue;
        }
        if in_single {
            if b == b'\'' {
                in_single = false;
            }
            continue;
        }
        match b {
            b'"' => in_double = true,
            b'\'' => in_single = true,
            b'#' => {
                let preceded_by_space =
                    i == 0 || bytes[i - 1] == b' ' || bytes[i - 1] == b'\t';
                if preceded_by_space {
                    return (rest[..i].trim(), Some(comment_body(&rest[i + 1..])));
                }
            }
            _ => (),
        }
    }
    (rest.trim(), None)
}

#[cfg(test)]
mod test {
    use super::*;

    fn key_path(parts: &[&str]) -> Path {
        parts.iter().map(|p| PathSeg::Key(p.to_string())).collect()
    }

    #[test]
    fn head_and_line_comments_attach_to_fields() {
        let map = scan(concat!(
            "# owner: platform team\n",
            "replicas: 3  # scaled up for launch\n",
            "spec:\n",
            "  # inner comment\n",
            "  image: nginx\n",
        ));

        let replicas = map.get(&key_path(&["replicas"])).unwrap();
        assert_eq!(replicas.head, vec!["owner: platform team"]);
        assert_eq!(replicas.line.as_deref(), Some("scaled up for launch"));

        let image = map.get(&key_path(&["spec", "image"])).unwrap();
        assert_eq!(image.head, vec!["inner comment"]);
        assert_eq!(image.line, None);
    }

    #[test]
    fn sequence_items_get_indexed_paths() {
        let map = scan(concat!(
            "ports:\n",
            "- 80  # http\n",
            "# the tls port\n",
            "- 443\n",
            "containers:\n",
            "- name: web  # primary\n",
        ));

        let http = map
            .get(&vec![PathSeg::Key("ports".into()), PathSeg::Index(0)])
            .unwrap();
        assert_eq!(http.line.as_deref(), Some("http"));

        let tls = map
            .get(&vec![PathSeg::Key("ports".into()), PathSeg::Index(1)])
            .unwrap();
        assert_eq!(tls.head, vec!["the tls port"]);

        let name = map
            .get(&vec![
                PathSeg::Key("containers".into()),
                PathSeg::Index(0),
                PathSeg::Key("name".into()),
            ])
            .unwrap();
        assert_eq!(name.line.as_deref(), Some("primary"));
    }

    #[test]
    fn hash_inside_quotes_is_not_a_comment() {
        let map = scan("anchor: \"see #42\"  # the real comment\n");
        let set = map.get(&key_path(&["anchor"])).unwrap();
        assert_eq!(set.line.as_deref(), Some("the real comment"));
    }

    #[test]
    fn trailing_block_becomes_foot() {
        let map = scan("a: 1\n# end of file\n# really\n");
        assert_eq!(map.foot, vec!["end of file", "really"]);
    }

    #[test]
    fn transplant_copies_present_and_reports_lost() {
        let prior = scan(concat!(
            "# keep me\n",
            "kept: 1\n",
            "# lose me\n",
            "gone: 2  # also lost\n",
        ));
        let tree: serde_yaml::Value = serde_yaml::from_str("kept: 1\nadded: 3\n").unwrap();
        let mut current = scan("kept: 1\nadded: 3\n");

        let lost = current.transplant_from(&prior, &tree);
        assert_eq!(
            current.get(&key_path(&["kept"])).unwrap().head,
            vec!["keep me"]
        );
        assert_eq!(
            lost,
            vec![
                ("gone".to_string(), "lose me".to_string()),
                ("gone".to_string(), "also lost".to_string()),
            ]
        );
    }

    #[test]
    fn transplant_never_overwrites_existing_comments() {
        let prior = scan("a: 1  # old\n");
        let tree: serde_yaml::Value = serde_yaml::from_str("a: 2").unwrap();
        let mut current = scan("a: 2  # new\n");
        let lost = current.transplant_from(&prior, &tree);
        assert!(lost.is_empty());
        assert_eq!(
            current.get(&key_path(&["a"])).unwrap().line.as_deref(),
            Some("new")
        );
    }
}
