use serde_json::{json, Value};

/// Render an Atlassian Document Format (ADF) node tree to markdown.
///
/// Handles the node types that show up in real-world comments: paragraphs,
/// headings 1-6, bullet and ordered lists, code blocks with a language tag,
/// and the inline marks (strong, em, code, link). Anything unrecognized
/// degrades to plain text extraction instead of erroring.
pub fn adf_to_markdown(value: &Value) -> String {
    let mut out = String::new();
    render_block(value, &mut out, 0);
    // Collapse the trailing separator left by the last block.
    out.trim_end().to_string()
}

fn render_block(value: &Value, out: &mut String, list_depth: usize) {
    let Some(obj) = value.as_object() else {
        if let Some(text) = extract_text_from_adf(value) {
            out.push_str(&text);
        }
        return;
    };

    let node_type = obj.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let content = obj.get("content").and_then(|v| v.as_array());

    match node_type {
        "doc" => {
            for child in content.into_iter().flatten() {
                render_block(child, out, list_depth);
            }
        }
        "paragraph" => {
            for child in content.into_iter().flatten() {
                render_inline(child, out);
            }
            out.push_str("\n\n");
        }
        "heading" => {
            let level = obj
                .get("attrs")
                .and_then(|a| a.get("level"))
                .and_then(|l| l.as_u64())
                .unwrap_or(1)
                .clamp(1, 6) as usize;
            out.push_str(&"#".repeat(level));
            out.push(' ');
            for child in content.into_iter().flatten() {
                render_inline(child, out);
            }
            out.push_str("\n\n");
        }
        "bulletList" => {
            for item in content.into_iter().flatten() {
                render_list_item(item, out, list_depth, None);
            }
            if list_depth == 0 {
                out.push('\n');
            }
        }
        "orderedList" => {
            for (i, item) in content.into_iter().flatten().enumerate() {
                render_list_item(item, out, list_depth, Some(i + 1));
            }
            if list_depth == 0 {
                out.push('\n');
            }
        }
        "codeBlock" => {
            let language = obj
                .get("attrs")
                .and_then(|a| a.get("language"))
                .and_then(|l| l.as_str())
                .unwrap_or("");
            out.push_str("```");
            out.push_str(language);
            out.push('\n');
            for child in content.into_iter().flatten() {
                render_inline(child, out);
            }
            out.push_str("\n```\n\n");
        }
        "blockquote" => {
            let mut inner = String::new();
            for child in content.into_iter().flatten() {
                render_block(child, &mut inner, list_depth);
            }
            for line in inner.trim_end().lines() {
                out.push_str("> ");
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }
        "rule" => out.push_str("---\n\n"),
        // Unknown block node: best-effort text extraction.
        _ => {
            if let Some(text) = extract_text_from_adf(value) {
                out.push_str(&text);
                out.push_str("\n\n");
            }
        }
    }
}

fn render_list_item(item: &Value, out: &mut String, depth: usize, ordinal: Option<usize>) {
    out.push_str(&"  ".repeat(depth));
    match ordinal {
        Some(n) => out.push_str(&format!("{n}. ")),
        None => out.push_str("- "),
    }
    let content = item.get("content").and_then(|v| v.as_array());
    let mut first = true;
    for child in content.into_iter().flatten() {
        let child_type = child.get("type").and_then(|v| v.as_str()).unwrap_or("");
        match child_type {
            "paragraph" => {
                if !first {
                    out.push(' ');
                }
                for inline in child
                    .get("content")
                    .and_then(|v| v.as_array())
                    .into_iter()
                    .flatten()
                {
                    render_inline(inline, out);
                }
                first = false;
            }
            "bulletList" | "orderedList" => {
                out.push('\n');
                render_block(child, out, depth + 1);
                return;
            }
            _ => render_block(child, out, depth + 1),
        }
    }
    out.push('\n');
}

fn render_inline(value: &Value, out: &mut String) {
    let Some(obj) = value.as_object() else { return };
    let node_type = obj.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match node_type {
        "text" => {
            let text = obj.get("text").and_then(|v| v.as_str()).unwrap_or("");
            let marks = obj.get("marks").and_then(|v| v.as_array());
            out.push_str(&apply_marks(text, marks));
        }
        "hardBreak" => out.push('\n'),
        "mention" => {
            let name = obj
                .get("attrs")
                .and_then(|a| a.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or("@someone");
            out.push_str(name);
        }
        "emoji" => {
            let shortcut = obj
                .get("attrs")
                .and_then(|a| a.get("shortName"))
                .and_then(|s| s.as_str())
                .unwrap_or("");
            out.push_str(shortcut);
        }
        _ => {
            if let Some(text) = extract_text_from_adf(value) {
                out.push_str(&text);
            }
        }
    }
}

fn apply_marks(text: &str, marks: Option<&Vec<Value>>) -> String {
    let mut result = text.to_string();
    for mark in marks.into_iter().flatten() {
        let mark_type = mark.get("type").and_then(|v| v.as_str()).unwrap_or("");
        result = match mark_type {
            "strong" => format!("**{result}**"),
            "em" => format!("*{result}*"),
            "code" => format!("`{result}`"),
            "link" => {
                let href = mark
                    .get("attrs")
                    .and_then(|a| a.get("href"))
                    .and_then(|h| h.as_str())
                    .unwrap_or("");
                format!("[{result}]({href})")
            }
            "strike" => format!("~~{result}~~"),
            _ => result,
        };
    }
    result
}

/// Extract plain text from any ADF fragment. Fallback path for node types
/// the renderer does not understand.
pub fn extract_text_from_adf(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(arr) => {
            let parts: Vec<String> = arr.iter().filter_map(extract_text_from_adf).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" "))
            }
        }
        Value::Object(obj) => {
            if obj.get("type").and_then(|v| v.as_str()) == Some("text") {
                return obj.get("text").and_then(|v| v.as_str()).map(String::from);
            }
            if let Some(content) = obj.get("content") {
                return extract_text_from_adf(content);
            }
            None
        }
        _ => None,
    }
}

/// Build a minimal ADF document from markdown-ish text, one paragraph per
/// blank-line-separated chunk. Inline formatting is sent verbatim; the
/// source system shows it as plain text, the accepted best-effort for the
/// mirror direction.
pub fn text_to_adf(text: &str) -> Value {
    let paragraphs: Vec<Value> = text
        .split("\n\n")
        .filter(|chunk| !chunk.trim().is_empty())
        .map(|chunk| {
            json!({
                "type": "paragraph",
                "content": [{ "type": "text", "text": chunk.trim() }]
            })
        })
        .collect();
    json!({
        "version": 1,
        "type": "doc",
        "content": paragraphs
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_paragraphs_and_heading() {
        let doc = json!({
            "type": "doc",
            "content": [
                { "type": "heading", "attrs": { "level": 2 },
                  "content": [{ "type": "text", "text": "Context" }] },
                { "type": "paragraph",
                  "content": [{ "type": "text", "text": "first" }] },
                { "type": "paragraph",
                  "content": [{ "type": "text", "text": "second" }] }
            ]
        });
        assert_eq!(adf_to_markdown(&doc), "## Context\n\nfirst\n\nsecond");
    }

    #[test]
    fn renders_inline_marks() {
        let doc = json!({
            "type": "doc",
            "content": [{
                "type": "paragraph",
                "content": [
                    { "type": "text", "text": "bold", "marks": [{ "type": "strong" }] },
                    { "type": "text", "text": " and " },
                    { "type": "text", "text": "docs",
                      "marks": [{ "type": "link", "attrs": { "href": "https://x" } }] }
                ]
            }]
        });
        assert_eq!(adf_to_markdown(&doc), "**bold** and [docs](https://x)");
    }

    #[test]
    fn renders_code_block_with_language() {
        let doc = json!({
            "type": "doc",
            "content": [{
                "type": "codeBlock",
                "attrs": { "language": "rust" },
                "content": [{ "type": "text", "text": "fn main() {}" }]
            }]
        });
        assert_eq!(adf_to_markdown(&doc), "```rust\nfn main() {}\n```");
    }

    #[test]
    fn renders_lists() {
        let doc = json!({
            "type": "doc",
            "content": [
                { "type": "bulletList", "content": [
                    { "type": "listItem", "content": [
                        { "type": "paragraph", "content": [{ "type": "text", "text": "one" }] }
                    ] },
                    { "type": "listItem", "content": [
                        { "type": "paragraph", "content": [{ "type": "text", "text": "two" }] }
                    ] }
                ] },
                { "type": "orderedList", "content": [
                    { "type": "listItem", "content": [
                        { "type": "paragraph", "content": [{ "type": "text", "text": "first" }] }
                    ] }
                ] }
            ]
        });
        assert_eq!(adf_to_markdown(&doc), "- one\n- two\n\n1. first");
    }

    #[test]
    fn unknown_node_degrades_to_text() {
        let doc = json!({
            "type": "doc",
            "content": [{
                "type": "somePanelWeHaveNeverSeen",
                "content": [{ "type": "text", "text": "inner text" }]
            }]
        });
        assert_eq!(adf_to_markdown(&doc), "inner text");
    }

    #[test]
    fn text_to_adf_builds_paragraph_per_chunk() {
        let doc = text_to_adf("first\n\nsecond");
        let content = doc.get("content").and_then(|c| c.as_array()).unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(extract_text_from_adf(&doc).unwrap(), "first second");
    }
}
