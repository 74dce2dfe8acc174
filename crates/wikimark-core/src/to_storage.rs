//! Markdown with bracket macros → storage XML.

use crate::ast::{split_child_markers, MacroNode, Piece, Segment, Warning, WarningKind};
use crate::bracket_parser;
use crate::config::Config;
use crate::engine::MarkdownRenderer;
use crate::error::ConvertError;
use crate::placeholder::PlaceholderMap;
use crate::registry::BodyKind;
use crate::render::{body_kind, escape_xml, to_xml_with_body};
use crate::Conversion;
use tracing::debug;

pub fn convert(
    markdown: &str,
    config: &Config,
    engine: &dyn MarkdownRenderer,
) -> Result<Conversion, ConvertError> {
    let parsed = bracket_parser::parse_with_limit(markdown, config.options.max_depth);
    debug!(
        segments = parsed.segments.len(),
        warnings = parsed.warnings.len(),
        "parsed bracket macros"
    );

    let mut builder = Builder {
        config,
        engine,
        placeholders: PlaceholderMap::for_input(markdown),
        warnings: parsed.warnings,
    };

    let mut chunks = Vec::with_capacity(parsed.segments.len());
    for segment in &parsed.segments {
        match segment {
            Segment::Text(text) => chunks.push(Chunk::Text(text)),
            Segment::Macro(node) => chunks.push(Chunk::Marker(builder.register(node))),
        }
    }
    let text = splice(&chunks);
    debug!(placeholders = builder.placeholders.len(), "rendering document");

    let html = engine.render(text.as_bytes())?;
    let output = builder.placeholders.resolve(&html);
    Ok(Conversion {
        output,
        warnings: builder.warnings,
    })
}

struct Builder<'a> {
    config: &'a Config,
    engine: &'a dyn MarkdownRenderer,
    placeholders: PlaceholderMap,
    warnings: Vec<Warning>,
}

impl Builder<'_> {
    /// Render `node` to XML and register it, children first. Returns the
    /// node's marker. Recursion is bounded by the parser's nesting limit.
    fn register(&mut self, node: &MacroNode) -> String {
        let child_markers: Vec<String> = node.children.iter().map(|c| self.register(c)).collect();

        let body = match body_kind(node) {
            BodyKind::None => String::new(),
            BodyKind::RichText => {
                let chunks: Vec<Chunk> = split_child_markers(&node.body)
                    .into_iter()
                    .map(|piece| match piece {
                        Piece::Text(t) => Chunk::Text(t),
                        Piece::Child(i) => match child_markers.get(i) {
                            Some(m) => Chunk::Marker(m.clone()),
                            None => Chunk::Text(""),
                        },
                    })
                    .collect();
                self.render_body(node, &splice(&chunks))
            }
            BodyKind::Literal => self.literal_body(&node.body),
        };

        let xml = to_xml_with_body(node, &body);
        self.placeholders.insert(xml)
    }

    /// Convert a rich body's markdown. An engine failure here keeps the raw
    /// text in a bare paragraph instead of failing the document.
    fn render_body(&mut self, node: &MacroNode, markdown: &str) -> String {
        match self.engine.render(markdown.as_bytes()) {
            Ok(html) => html.trim_end_matches('\n').to_string(),
            Err(e) => {
                let message = format!("body of [{}] kept unconverted: {e}", node.name.to_ascii_uppercase());
                tracing::warn!(kind = ?WarningKind::BodyFallback, "{message}");
                self.warnings.push(Warning {
                    kind: WarningKind::BodyFallback,
                    message,
                    position: 0,
                });
                format!("<p>{}</p>", escape_xml(markdown.trim()))
            }
        }
    }

    fn literal_body(&self, body: &str) -> String {
        if !self.config.options.trim_literal_newlines {
            return body.to_string();
        }
        let body = body.strip_prefix("\r\n").or_else(|| body.strip_prefix('\n')).unwrap_or(body);
        let body = body.strip_suffix("\r\n").or_else(|| body.strip_suffix('\n')).unwrap_or(body);
        body.to_string()
    }
}

enum Chunk<'a> {
    Text(&'a str),
    Marker(String),
}

/// Join text and markers back into one markdown string. A marker that sits
/// on a line of its own is fenced with blank lines so the engine gives it a
/// paragraph of its own instead of merging it into neighbouring prose.
fn splice(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        match chunk {
            Chunk::Text(t) => out.push_str(t),
            Chunk::Marker(marker) => {
                let starts_line = out.is_empty() || out.ends_with('\n');
                let ends_line = match chunks.get(i + 1) {
                    None => true,
                    Some(Chunk::Text(next)) => next.starts_with('\n') || next.starts_with("\r\n"),
                    Some(Chunk::Marker(_)) => false,
                };
                if starts_line && ends_line {
                    out.push('\n');
                    out.push_str(marker);
                    out.push('\n');
                } else {
                    out.push_str(marker);
                }
            }
        }
    }
    out
}
