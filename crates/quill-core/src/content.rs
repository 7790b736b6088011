//! Conversion of raw item content into the text handed to the chunker.
//!
//! Markdown and plain text pass through untouched. Editor block documents
//! (`{"blocks": [{"type": ..., "data": {...}}]}`) are flattened to markdown.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::ContentType;

static HTML_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>").expect("html tag regex"));

/// Text to send to the provider for `content` of the given type.
pub fn to_plain_text(content: &str, content_type: ContentType) -> Result<String> {
    match content_type {
        ContentType::Markdown | ContentType::Text => Ok(content.to_string()),
        ContentType::Blocks => blocks_to_markdown(content),
    }
}

/// Flatten an editor block document to markdown.
pub fn blocks_to_markdown(doc: &str) -> Result<String> {
    let value: Value = serde_json::from_str(doc)
        .map_err(|e| Error::InvalidInput(format!("invalid block document: {}", e)))?;

    let blocks = match &value {
        Value::Object(map) => map.get("blocks").and_then(Value::as_array),
        Value::Array(arr) => Some(arr),
        _ => None,
    }
    .ok_or_else(|| Error::InvalidInput("block document has no blocks array".to_string()))?;

    let rendered: Vec<String> = blocks
        .iter()
        .filter_map(render_block)
        .filter(|s| !s.is_empty())
        .collect();

    Ok(rendered.join("\n\n"))
}

fn render_block(block: &Value) -> Option<String> {
    let kind = block.get("type").and_then(Value::as_str).unwrap_or_default();
    let data = block.get("data")?;
    let text = || data.get("text").and_then(Value::as_str).map(strip_inline_html);

    match kind {
        "paragraph" => text(),
        "header" => {
            let level = data
                .get("level")
                .and_then(Value::as_u64)
                .unwrap_or(1)
                .clamp(1, 6) as usize;
            text().map(|t| format!("{} {}", "#".repeat(level), t))
        }
        "list" | "listv2" => {
            let ordered = data.get("style").and_then(Value::as_str) == Some("ordered");
            let items = data.get("items").and_then(Value::as_array)?;
            let mut lines = Vec::new();
            render_list(items, ordered, 0, &mut lines);
            Some(lines.join("\n"))
        }
        "checklist" => {
            let items = data.get("items").and_then(Value::as_array)?;
            let lines: Vec<String> = items
                .iter()
                .map(|item| {
                    let checked = item.get("checked").and_then(Value::as_bool).unwrap_or(false);
                    let t = item.get("text").and_then(Value::as_str).unwrap_or_default();
                    format!("- [{}] {}", if checked { "x" } else { " " }, strip_inline_html(t))
                })
                .collect();
            Some(lines.join("\n"))
        }
        "quote" => text().map(|t| {
            t.lines()
                .map(|line| format!("> {}", line))
                .collect::<Vec<_>>()
                .join("\n")
        }),
        "code" => {
            let code = data.get("code").and_then(Value::as_str)?;
            Some(format!("```\n{}\n```", code))
        }
        _ => text(),
    }
}

fn render_list(items: &[Value], ordered: bool, depth: usize, out: &mut Vec<String>) {
    let indent = "  ".repeat(depth);
    for (i, item) in items.iter().enumerate() {
        let (content, nested) = match item {
            Value::String(s) => (s.as_str(), None),
            Value::Object(obj) => (
                obj.get("content").and_then(Value::as_str).unwrap_or_default(),
                obj.get("items").and_then(Value::as_array),
            ),
            _ => continue,
        };
        let bullet = if ordered {
            format!("{}.", i + 1)
        } else {
            "-".to_string()
        };
        out.push(format!("{}{} {}", indent, bullet, strip_inline_html(content)));
        if let Some(children) = nested {
            render_list(children, ordered, depth + 1, out);
        }
    }
}

/// Remove inline markup such as `<b>` or `<a href>` and decode the common
/// entities the editor emits.
fn strip_inline_html(s: &str) -> String {
    HTML_TAG_RE
        .replace_all(s, "")
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}
