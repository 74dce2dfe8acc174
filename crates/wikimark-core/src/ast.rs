use crate::registry::{self, MacroType};
use std::collections::BTreeMap;
use std::fmt;

/// Start of an internal child marker. Markers look like `\u{E000}3\u{E001}` and
/// stand for `children[3]` at that exact offset in a parent's body.
pub const CHILD_MARKER_START: char = '\u{E000}';
pub const CHILD_MARKER_END: char = '\u{E001}';

pub fn child_marker(index: usize) -> String {
    format!("{CHILD_MARKER_START}{index}{CHILD_MARKER_END}")
}

/// A parsed macro. `name` is always a registered, lower-case macro name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MacroNode {
    pub name: String,
    /// Sorted by key, so every rendering iterates in the same order.
    pub parameters: BTreeMap<String, String>,
    /// Raw body. Nested macros appear as child markers at the offset they
    /// occupied in the source.
    pub body: String,
    /// Nested macros in document order; `children[i]` belongs to marker `i`.
    pub children: Vec<MacroNode>,
}

impl MacroNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn macro_type(&self) -> Option<MacroType> {
        registry::lookup(&self.name)
    }

    /// Append `child` at the current end of the body.
    pub fn attach_child(&mut self, child: MacroNode) {
        self.body.push_str(&child_marker(self.children.len()));
        self.children.push(child);
    }

    /// Body with every child marker replaced by `render(child)`.
    pub fn expand_body<F>(&self, mut render: F) -> String
    where
        F: FnMut(&MacroNode) -> String,
    {
        let mut out = String::with_capacity(self.body.len());
        for piece in split_child_markers(&self.body) {
            match piece {
                Piece::Text(t) => out.push_str(t),
                Piece::Child(i) => match self.children.get(i) {
                    Some(child) => out.push_str(&render(child)),
                    None => out.push_str(&child_marker(i)),
                },
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Macro(MacroNode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    UnknownMacro,
    OrphanClose,
    MismatchedClose,
    UnclosedMacro,
    NestingTooDeep,
    BodyFallback,
}

/// A recoverable anomaly. The offending syntax has already been kept as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
    /// Byte offset in the input that was being parsed.
    pub position: usize,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at byte {})", self.message, self.position)
    }
}

/// Output of either parser. Never holds two adjacent `Text` segments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParseResult {
    pub segments: Vec<Segment>,
    pub warnings: Vec<Warning>,
}

impl ParseResult {
    pub fn macros(&self) -> impl Iterator<Item = &MacroNode> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Macro(m) => Some(m),
            Segment::Text(_) => None,
        })
    }

    pub(crate) fn warn(&mut self, kind: WarningKind, message: String, position: usize) {
        tracing::warn!(?kind, position, "{message}");
        self.warnings.push(Warning {
            kind,
            message,
            position,
        });
    }
}

/// Destination for text and finished macros while a parse is in progress:
/// the top level, or the body of the innermost open macro.
pub trait Sink {
    fn push_text(&mut self, text: &str);
    fn push_macro(&mut self, node: MacroNode);
}

impl Sink for ParseResult {
    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Segment::Text(last)) = self.segments.last_mut() {
            last.push_str(text);
        } else {
            self.segments.push(Segment::Text(text.to_string()));
        }
    }

    fn push_macro(&mut self, node: MacroNode) {
        self.segments.push(Segment::Macro(node));
    }
}

impl Sink for MacroNode {
    fn push_text(&mut self, text: &str) {
        self.body.push_str(text);
    }

    fn push_macro(&mut self, node: MacroNode) {
        self.attach_child(node);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Piece<'a> {
    Text(&'a str),
    Child(usize),
}

/// Split a body into plain text and child-marker references.
/// Anything that only looks like half a marker stays text.
pub fn split_child_markers(body: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut rest = body;
    let mut text_start = 0;
    let mut offset = 0;

    while let Some(idx) = rest.find(CHILD_MARKER_START) {
        let after = &rest[idx + CHILD_MARKER_START.len_utf8()..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let closes = after[digits..].starts_with(CHILD_MARKER_END);
        let consumed = idx + CHILD_MARKER_START.len_utf8();

        if digits > 0 && closes {
            if let Ok(index) = after[..digits].parse::<usize>() {
                let marker_start = offset + idx;
                if marker_start > text_start {
                    pieces.push(Piece::Text(&body[text_start..marker_start]));
                }
                let marker_len = consumed + digits + CHILD_MARKER_END.len_utf8();
                pieces.push(Piece::Child(index));
                offset += marker_len;
                text_start = offset;
                rest = &rest[marker_len..];
                continue;
            }
        }

        offset += consumed;
        rest = &rest[consumed..];
    }

    if text_start < body.len() {
        pieces.push(Piece::Text(&body[text_start..]));
    }
    pieces
}

/// Feed `body` into `sink`, re-attaching each marked child from `children`
/// (taken by index, so every child moves exactly once).
pub fn replay<S>(body: &str, children: &mut [Option<MacroNode>], sink: &mut S)
where
    S: Sink + ?Sized,
{
    for piece in split_child_markers(body) {
        match piece {
            Piece::Text(t) => sink.push_text(t),
            Piece::Child(i) => match children.get_mut(i).and_then(Option::take) {
                Some(child) => sink.push_macro(child),
                None => sink.push_text(&child_marker(i)),
            },
        }
    }
}

/// Fold an abandoned macro back into `sink` as literal text: its opening
/// syntax, then its partial body with nested macros kept as macros.
pub fn demote<S>(open_raw: &str, node: MacroNode, sink: &mut S)
where
    S: Sink + ?Sized,
{
    sink.push_text(open_raw);
    let mut children: Vec<Option<MacroNode>> = node.children.into_iter().map(Some).collect();
    replay(&node.body, &mut children, sink);
}

/// Rebuild a node's body from a re-scan of that body, renumbering markers so
/// children stay in document order.
pub fn rebuild_body(node: &mut MacroNode, rescanned: Vec<Segment>) {
    let mut old: Vec<Option<MacroNode>> = std::mem::take(&mut node.children)
        .into_iter()
        .map(Some)
        .collect();
    node.body.clear();
    for segment in rescanned {
        match segment {
            Segment::Text(t) => replay(&t, &mut old, node),
            Segment::Macro(m) => node.attach_child(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_child_markers() {
        let body = format!("Before {}After{}", child_marker(0), child_marker(12));
        let pieces = split_child_markers(&body);
        assert_eq!(
            pieces,
            vec![
                Piece::Text("Before "),
                Piece::Child(0),
                Piece::Text("After"),
                Piece::Child(12)
            ]
        );
    }

    #[test]
    fn test_split_half_marker_is_text() {
        let body = format!("a{CHILD_MARKER_START}x{CHILD_MARKER_END}b{CHILD_MARKER_START}");
        let pieces = split_child_markers(&body);
        assert_eq!(pieces, vec![Piece::Text(&body)]);
    }

    #[test]
    fn test_parse_result_merges_text() {
        let mut result = ParseResult::default();
        result.push_text("a");
        result.push_text("b");
        result.push_macro(MacroNode::new("toc"));
        result.push_text("c");
        result.push_text("");
        assert_eq!(
            result.segments,
            vec![
                Segment::Text("ab".to_string()),
                Segment::Macro(MacroNode::new("toc")),
                Segment::Text("c".to_string()),
            ]
        );
    }

    #[test]
    fn test_expand_body() {
        let mut node = MacroNode::new("INFO");
        assert_eq!(node.name, "info");
        node.push_text("Before ");
        node.attach_child(MacroNode::new("toc"));
        node.push_text(" After");
        let expanded = node.expand_body(|c| format!("<{}>", c.name));
        assert_eq!(expanded, "Before <toc> After");
    }

    #[test]
    fn test_demote_keeps_nested_macros() {
        let mut node = MacroNode::new("info");
        node.push_text("a ");
        node.attach_child(MacroNode::new("toc"));
        node.push_text(" b");

        let mut result = ParseResult::default();
        result.push_text("x ");
        demote("[INFO]", node, &mut result);

        assert_eq!(
            result.segments,
            vec![
                Segment::Text("x [INFO]a ".to_string()),
                Segment::Macro(MacroNode::new("toc")),
                Segment::Text(" b".to_string()),
            ]
        );
    }

    #[test]
    fn test_rebuild_body_renumbers_in_document_order() {
        let mut node = MacroNode::new("info");
        node.attach_child(MacroNode::new("toc").with_parameter("a", "1"));
        let first = node.body.clone();

        let rescanned = vec![
            Segment::Macro(MacroNode::new("toc").with_parameter("a", "0")),
            Segment::Text(format!(" mid {first}")),
        ];
        rebuild_body(&mut node, rescanned);

        assert_eq!(node.children.len(), 2);
        assert_eq!(node.children[0].parameters["a"], "0");
        assert_eq!(node.children[1].parameters["a"], "1");
        assert_eq!(node.body, format!("{} mid {}", child_marker(0), child_marker(1)));
    }
}
