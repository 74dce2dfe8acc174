use crate::ast::MacroNode;
use crate::registry::BodyKind;

/// Body handling for `node`. Unregistered nodes with a body are treated as
/// rich text so their content is never dropped.
pub fn body_kind(node: &MacroNode) -> BodyKind {
    match node.macro_type() {
        Some(t) => t.body,
        None if node.body.is_empty() => BodyKind::None,
        None => BodyKind::RichText,
    }
}

/// Render `node` as a storage-format macro element. Nested children are
/// rendered in place of their markers.
pub fn to_xml(node: &MacroNode) -> String {
    let body = node.expand_body(to_xml);
    to_xml_with_body(node, &body)
}

/// Render `node` with an already-prepared body (HTML for rich text, raw text
/// for literal bodies).
pub fn to_xml_with_body(node: &MacroNode, body: &str) -> String {
    let mut out = format!(
        r#"<ac:structured-macro ac:name="{}" ac:schema-version="1">"#,
        escape_xml(&node.name)
    );
    for (key, value) in &node.parameters {
        out.push_str(&format!(
            r#"<ac:parameter ac:name="{}">{}</ac:parameter>"#,
            escape_xml(key),
            escape_xml(value)
        ));
    }
    match body_kind(node) {
        BodyKind::None => {}
        BodyKind::RichText => {
            out.push_str("<ac:rich-text-body>");
            out.push_str(body);
            out.push_str("</ac:rich-text-body>");
        }
        BodyKind::Literal => {
            out.push_str("<ac:plain-text-body>");
            out.push_str(&cdata(body));
            out.push_str("</ac:plain-text-body>");
        }
    }
    out.push_str("</ac:structured-macro>");
    out
}

/// Render `node` in bracket syntax, children in place of their markers.
pub fn to_bracket(node: &MacroNode) -> String {
    let mut out = bracket_open(node);
    if let Some(close) = bracket_close(node) {
        out.push_str(&node.expand_body(to_bracket));
        out.push_str(&close);
    }
    out
}

/// `[NAME k=v ...]`
pub fn bracket_open(node: &MacroNode) -> String {
    let mut out = format!("[{}", node.name.to_ascii_uppercase());
    for (key, value) in &node.parameters {
        out.push(' ');
        out.push_str(key);
        out.push('=');
        out.push_str(&quote_bracket_value(value));
    }
    out.push(']');
    out
}

/// `[/NAME]`, or `None` for macros that never take a body.
pub fn bracket_close(node: &MacroNode) -> Option<String> {
    match body_kind(node) {
        BodyKind::None => None,
        _ => Some(format!("[/{}]", node.name.to_ascii_uppercase())),
    }
}

fn quote_bracket_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.ends_with('/')
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\'' || c == ']');
    if !needs_quotes {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wrap literal text in CDATA. A `]]>` inside the text is split across two
/// sections so it survives.
fn cdata(text: &str) -> String {
    format!("<![CDATA[{}]]>", text.replace("]]>", "]]]]><![CDATA[>"))
}
