use bytes::Bytes;
use serde::Serialize;

use super::JsonStyle;
use crate::Result;

pub(crate) fn sanitize(style: JsonStyle, frame: &[u8]) -> Result<Bytes> {
    if frame.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Bytes::new());
    }

    let value: serde_json::Value = serde_json::from_slice(frame)?;
    let mut out = match style {
        JsonStyle::Compact => serde_json::to_vec(&value)?,
        JsonStyle::Spaces(n) => {
            let indent = vec![b' '; n];
            pretty(&value, &indent)?
        }
        JsonStyle::Tabs => pretty(&value, b"\t")?,
    };
    out.push(b'\n');
    Ok(Bytes::from(out))
}

fn pretty(value: &serde_json::Value, indent: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent);
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(out)
}
