//! HTML → Markdown over an html5ever DOM.
//!
//! Block structure is rebuilt from the element tree: every block renders to a
//! string and siblings are joined by blank lines. Inline content is written
//! into a single buffer so whitespace can be collapsed across text nodes.

use crate::engine::HtmlRenderer;
use crate::error::EngineError;
use html5ever::tendril::TendrilSink;
use html5ever::{parse_document, ParseOpts};
use markup5ever_rcdom::{Handle, NodeData, RcDom};

/// Deeper elements are flattened to their text.
const MAX_NESTING: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
pub struct DomRenderer;

impl HtmlRenderer for DomRenderer {
    fn render(&self, html: &[u8]) -> Result<String, EngineError> {
        let text = std::str::from_utf8(html)?;
        let dom = parse_document(RcDom::default(), ParseOpts::default()).one(text);
        let blocks = blocks(&dom.document, 0);
        let joined = blocks.join("\n\n");
        let trimmed = joined.trim_end();
        if trimmed.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("{trimmed}\n"))
    }
}

const CONTAINERS: &[&str] = &[
    "html", "body", "div", "section", "article", "main", "header", "footer", "nav", "aside",
    "figure", "figcaption", "address", "details", "summary", "center", "form", "fieldset", "dl",
    "dt", "dd", "li",
];

const DROPPED: &[&str] = &[
    "head", "script", "style", "template", "title", "noscript", "meta", "link",
];

const BLOCKS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "pre", "blockquote", "hr", "table",
];

fn element_name(node: &Handle) -> Option<&str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(&*name.local),
        _ => None,
    }
}

fn attr(node: &Handle, key: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|a| &*a.name.local == key)
            .map(|a| a.value.to_string()),
        _ => None,
    }
}

fn is_block(node: &Handle) -> bool {
    element_name(node)
        .is_some_and(|n| CONTAINERS.contains(&n) || DROPPED.contains(&n) || BLOCKS.contains(&n))
}

/// Render the children of `parent` as a list of Markdown blocks. Runs of
/// inline content between blocks become paragraphs.
fn blocks(parent: &Handle, depth: usize) -> Vec<String> {
    let mut out = Vec::new();
    if depth > MAX_NESTING {
        push_paragraph(&collapse_whitespace(&text_content(parent)), &mut out);
        return out;
    }

    let mut inline = String::new();
    for child in parent.children.borrow().iter() {
        if is_block(child) {
            push_paragraph(&inline, &mut out);
            inline.clear();
            block(child, depth + 1, &mut out);
        } else {
            inline_node(child, &mut inline, depth + 1);
        }
    }
    push_paragraph(&inline, &mut out);
    out
}

fn push_paragraph(text: &str, out: &mut Vec<String>) {
    let text = text.trim();
    if !text.is_empty() {
        out.push(text.to_string());
    }
}

fn block(node: &Handle, depth: usize, out: &mut Vec<String>) {
    let Some(name) = element_name(node) else {
        return;
    };
    if DROPPED.contains(&name) {
        return;
    }
    if CONTAINERS.contains(&name) {
        out.extend(blocks(node, depth));
        return;
    }

    let rendered = match name {
        "p" => {
            let mut text = String::new();
            inline_children(node, &mut text, depth);
            text
        }
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => heading(node, name, depth),
        "ul" => list(node, false, depth),
        "ol" => list(node, true, depth),
        "pre" => code_block(node),
        "blockquote" => blockquote(node, depth),
        "hr" => "---".to_string(),
        "table" => table(node, depth),
        _ => String::new(),
    };
    push_paragraph(&rendered, out);
}

fn heading(node: &Handle, name: &str, depth: usize) -> String {
    let level: usize = name[1..].parse().unwrap_or(1);
    let mut text = String::new();
    inline_children(node, &mut text, depth);
    let text = collapse_whitespace(&text.replace('\n', " "));
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }
    format!("{} {}", "#".repeat(level), text)
}

fn list(node: &Handle, ordered: bool, depth: usize) -> String {
    let mut number = if ordered {
        attr(node, "start")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(1)
    } else {
        1
    };

    let mut items: Vec<String> = Vec::new();
    for child in node.children.borrow().iter() {
        match element_name(child) {
            Some("li") => {
                let marker = if ordered {
                    format!("{number}. ")
                } else {
                    "- ".to_string()
                };
                number += 1;
                let content = blocks(child, depth + 1).join("\n");
                items.push(indent_item(&marker, &content));
            }
            // A list nested directly in a list continues the previous item.
            Some(inner @ ("ul" | "ol")) => {
                let nested = list(child, inner == "ol", depth + 1);
                match items.last_mut() {
                    Some(last) if !nested.is_empty() => {
                        last.push('\n');
                        last.push_str(&indent_item("  ", &nested));
                    }
                    _ => items.push(nested),
                }
            }
            _ => {}
        }
    }
    items.join("\n")
}

/// Prefix the first line with `marker` and indent the rest to line up.
fn indent_item(marker: &str, content: &str) -> String {
    if content.is_empty() {
        return marker.trim_end().to_string();
    }
    let pad = " ".repeat(marker.len());
    let mut out = String::with_capacity(content.len() + marker.len());
    for (i, line) in content.lines().enumerate() {
        if i == 0 {
            out.push_str(marker);
        } else {
            out.push('\n');
            if !line.is_empty() {
                out.push_str(&pad);
            }
        }
        out.push_str(line);
    }
    out
}

fn code_block(node: &Handle) -> String {
    let code = node
        .children
        .borrow()
        .iter()
        .find(|c| element_name(c) == Some("code"))
        .cloned();
    let language = code
        .as_ref()
        .and_then(language_class)
        .or_else(|| language_class(node))
        .unwrap_or_default();

    let text = text_content(node);
    let text = text.strip_suffix('\n').unwrap_or(&text);
    let fence = "`".repeat(longest_run(text, '`').max(2) + 1);
    format!("{fence}{language}\n{text}\n{fence}")
}

fn language_class(node: &Handle) -> Option<String> {
    let class = attr(node, "class")?;
    class
        .split_whitespace()
        .find_map(|c| c.strip_prefix("language-").or_else(|| c.strip_prefix("lang-")))
        .map(str::to_string)
}

fn longest_run(text: &str, ch: char) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in text.chars() {
        if c == ch {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

fn blockquote(node: &Handle, depth: usize) -> String {
    let inner = blocks(node, depth + 1).join("\n\n");
    inner
        .lines()
        .map(|line| {
            if line.is_empty() {
                ">".to_string()
            } else {
                format!("> {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn table(node: &Handle, depth: usize) -> String {
    let mut rows: Vec<Vec<String>> = Vec::new();
    collect_rows(node, depth, &mut rows);
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    if columns == 0 {
        return String::new();
    }

    let mut lines = Vec::with_capacity(rows.len() + 1);
    for (i, row) in rows.iter_mut().enumerate() {
        row.resize(columns, String::new());
        lines.push(format!("| {} |", row.join(" | ")));
        if i == 0 {
            lines.push(format!("|{}", " --- |".repeat(columns)));
        }
    }
    lines.join("\n")
}

fn collect_rows(node: &Handle, depth: usize, rows: &mut Vec<Vec<String>>) {
    for child in node.children.borrow().iter() {
        match element_name(child) {
            Some("thead" | "tbody" | "tfoot") => collect_rows(child, depth + 1, rows),
            Some("tr") => {
                let cells = child
                    .children
                    .borrow()
                    .iter()
                    .filter(|c| matches!(element_name(c), Some("th" | "td")))
                    .map(|cell| {
                        let mut text = String::new();
                        inline_children(cell, &mut text, depth + 2);
                        collapse_whitespace(&text.replace('\n', " "))
                            .trim()
                            .replace('|', "\\|")
                    })
                    .collect();
                rows.push(cells);
            }
            _ => {}
        }
    }
}

fn inline_children(node: &Handle, buf: &mut String, depth: usize) {
    for child in node.children.borrow().iter() {
        inline_node(child, buf, depth + 1);
    }
}

fn inline_node(node: &Handle, buf: &mut String, depth: usize) {
    let name = match &node.data {
        NodeData::Text { contents } => {
            let text = collapse_whitespace(&contents.borrow());
            push_text(buf, &escape_markdown(&text));
            return;
        }
        NodeData::Element { name, .. } => &*name.local,
        _ => return,
    };

    if depth > MAX_NESTING {
        push_text(buf, &collapse_whitespace(&text_content(node)));
        return;
    }

    match name {
        "strong" | "b" => emphasis(node, buf, depth, "**"),
        "em" | "i" => emphasis(node, buf, depth, "*"),
        "del" | "s" | "strike" => emphasis(node, buf, depth, "~~"),
        "code" | "kbd" | "samp" | "tt" => code_span(&text_content(node), buf),
        "a" => link(node, buf, depth),
        "img" => image(node, buf),
        "br" => buf.push_str("  \n"),
        "input" if attr(node, "type").as_deref() == Some("checkbox") => {
            let checked = attr(node, "checked").is_some();
            buf.push_str(if checked { "[x] " } else { "[ ] " });
        }
        "script" | "style" | "template" | "head" | "title" => {}
        _ => inline_children(node, buf, depth),
    }
}

/// Append `text`, dropping a leading space that would double one already there.
fn push_text(buf: &mut String, text: &str) {
    let text = if buf.ends_with(' ') || buf.ends_with('\n') {
        text.trim_start_matches(' ')
    } else {
        text
    };
    buf.push_str(text);
}

fn emphasis(node: &Handle, buf: &mut String, depth: usize, delimiter: &str) {
    let mut inner = String::new();
    inline_children(node, &mut inner, depth);
    let trimmed = inner.trim();
    if trimmed.is_empty() {
        push_text(buf, &inner);
        return;
    }
    if inner.starts_with(char::is_whitespace) {
        push_text(buf, " ");
    }
    buf.push_str(delimiter);
    buf.push_str(trimmed);
    buf.push_str(delimiter);
    if inner.ends_with(char::is_whitespace) {
        buf.push(' ');
    }
}

fn code_span(text: &str, buf: &mut String) {
    let text = text.replace('\n', " ");
    if text.is_empty() {
        return;
    }
    let fence = "`".repeat(longest_run(&text, '`') + 1);
    let pad = if text.starts_with('`') || text.ends_with('`') {
        " "
    } else {
        ""
    };
    buf.push_str(&format!("{fence}{pad}{text}{pad}{fence}"));
}

fn link(node: &Handle, buf: &mut String, depth: usize) {
    let mut inner = String::new();
    inline_children(node, &mut inner, depth);
    let text = inner.trim();
    let href = attr(node, "href").unwrap_or_default();
    if href.is_empty() {
        push_text(buf, text);
        return;
    }
    let label = if text.is_empty() { href.as_str() } else { text };
    buf.push_str(&format!("[{label}]({}{})", destination(&href), title(node)));
}

fn image(node: &Handle, buf: &mut String) {
    let Some(src) = attr(node, "src").filter(|s| !s.is_empty()) else {
        return;
    };
    let alt = attr(node, "alt").unwrap_or_default().replace(']', "\\]");
    buf.push_str(&format!("![{alt}]({}{})", destination(&src), title(node)));
}

fn destination(url: &str) -> String {
    if url.contains([' ', '(', ')']) {
        format!("<{url}>")
    } else {
        url.to_string()
    }
}

fn title(node: &Handle) -> String {
    match attr(node, "title").filter(|t| !t.is_empty()) {
        Some(t) => format!(" \"{}\"", t.replace('"', "\\\"")),
        None => String::new(),
    }
}

/// Concatenated text of `node` and its descendants, `<br>` as newline.
/// Iterative so arbitrarily deep markup cannot exhaust the stack.
fn text_content(node: &Handle) -> String {
    let mut out = String::new();
    let mut stack = vec![node.clone()];
    while let Some(current) = stack.pop() {
        match &current.data {
            NodeData::Text { contents } => out.push_str(&contents.borrow()),
            NodeData::Element { name, .. } if &*name.local == "br" => out.push('\n'),
            _ => {}
        }
        for child in current.children.borrow().iter().rev() {
            stack.push(child.clone());
        }
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_ascii_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Escape characters that would otherwise start emphasis or code. An
/// underscore inside a word cannot, so it is left alone.
fn escape_markdown(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        let escape = match c {
            '\\' | '*' | '`' => true,
            '_' => {
                let before = i.checked_sub(1).and_then(|j| chars.get(j));
                let after = chars.get(i + 1);
                !(before.is_some_and(|b| b.is_alphanumeric()) && after.is_some_and(|a| a.is_alphanumeric()))
            }
            _ => false,
        };
        if escape {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
