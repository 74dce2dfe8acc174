use crate::ast::*;
use crate::bracket_parser::DEFAULT_MAX_DEPTH;
use crate::registry::{lookup, BodyKind, MacroType};
use crate::xml_tokenizer::{tokenize, BodyType, Token};
use std::ops::Range;

/// Parse storage-format XML into text and macro segments.
pub fn parse(input: &str) -> ParseResult {
    parse_with_limit(input, DEFAULT_MAX_DEPTH)
}

/// Parse with an explicit nesting limit. Macro elements deeper than
/// `max_depth`, like unknown ones, are kept verbatim as text.
pub fn parse_with_limit(input: &str, max_depth: usize) -> ParseResult {
    let mut parser = Parser {
        input,
        stack: Vec::new(),
        result: ParseResult::default(),
        max_depth,
    };
    for token in tokenize(input) {
        parser.step(token);
    }
    parser.finish()
}

enum Mode {
    Known {
        kind: MacroType,
        node: MacroNode,
        /// Body currently being read, if any.
        body: Option<BodyType>,
        /// End of the last structural token (open tag, parameter, body start).
        prefix_end: usize,
    },
    /// Unknown or too-deep element: reproduced verbatim once it closes.
    Opaque,
}

struct Frame {
    mode: Mode,
    start: usize,
}

struct Parser<'a> {
    input: &'a str,
    stack: Vec<Frame>,
    result: ParseResult,
    max_depth: usize,
}

impl<'a> Parser<'a> {
    fn sink(&mut self) -> &mut dyn Sink {
        match self.stack.last_mut() {
            Some(Frame {
                mode: Mode::Known { node, .. },
                ..
            }) => node,
            _ => &mut self.result,
        }
    }

    fn inside_opaque(&self) -> bool {
        matches!(self.stack.last(), Some(Frame { mode: Mode::Opaque, .. }))
    }

    fn raw(&self, span: Range<usize>) -> &'a str {
        &self.input[span]
    }

    fn step(&mut self, token: Token) {
        if self.inside_opaque() {
            self.step_opaque(token);
            return;
        }

        match token {
            Token::Text { text, .. } => self.text(&text),
            Token::OpenTag { name, span } => self.open(name, span),
            Token::CloseTag { span } => self.close(span),
            Token::Parameter { name, value, span } => {
                let raw = self.raw(span.clone());
                match self.stack.last_mut() {
                    Some(Frame {
                        mode:
                            Mode::Known {
                                node,
                                body: None,
                                prefix_end,
                                ..
                            },
                        ..
                    }) => {
                        node.parameters.insert(name, value);
                        *prefix_end = span.end;
                    }
                    _ => self.sink().push_text(raw),
                }
            }
            Token::BodyStart { kind, span } => {
                let raw = self.raw(span.clone());
                match self.stack.last_mut() {
                    Some(Frame {
                        mode:
                            Mode::Known {
                                body: body @ None,
                                prefix_end,
                                ..
                            },
                        ..
                    }) => {
                        *body = Some(kind);
                        *prefix_end = span.end;
                    }
                    _ => self.sink().push_text(raw),
                }
            }
            Token::BodyEnd { kind, span } => {
                let raw = self.raw(span);
                match self.stack.last_mut() {
                    Some(Frame {
                        mode: Mode::Known { body, .. },
                        ..
                    }) if *body == Some(kind) => *body = None,
                    _ => self.sink().push_text(raw),
                }
            }
        }
    }

    /// Inside an opaque element only nesting matters; its text is taken from
    /// the source span when it closes.
    fn step_opaque(&mut self, token: Token) {
        match token {
            Token::OpenTag { span, .. } => self.stack.push(Frame {
                mode: Mode::Opaque,
                start: span.start,
            }),
            Token::CloseTag { span } => {
                if let Some(frame) = self.stack.pop() {
                    // An enclosing opaque element already covers this span.
                    if !self.inside_opaque() {
                        let raw = self.raw(frame.start..span.end);
                        self.sink().push_text(raw);
                    }
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        match self.stack.last_mut() {
            Some(Frame {
                mode: Mode::Known { node, body, .. },
                ..
            }) => {
                // Formatting whitespace between parameters carries no content.
                if body.is_some() || !text.trim().is_empty() {
                    node.body.push_str(text);
                }
            }
            _ => self.result.push_text(text),
        }
    }

    fn open(&mut self, name: String, span: Range<usize>) {
        let in_plain_body = matches!(
            self.stack.last(),
            Some(Frame {
                mode: Mode::Known {
                    body: Some(BodyType::Plain),
                    ..
                },
                ..
            })
        );

        let kind = match lookup(&name) {
            Some(kind) if !in_plain_body && self.stack.len() < self.max_depth => Some(kind),
            Some(_) if in_plain_body => None,
            Some(_) => {
                self.result.warn(
                    WarningKind::NestingTooDeep,
                    format!("macro nesting deeper than {} levels: {name}", self.max_depth),
                    span.start,
                );
                None
            }
            None => {
                if !in_plain_body {
                    self.result.warn(
                        WarningKind::UnknownMacro,
                        format!("unknown macro {name:?} kept as text"),
                        span.start,
                    );
                }
                None
            }
        };

        let mode = match kind {
            Some(kind) => Mode::Known {
                kind,
                node: MacroNode::new(kind.name),
                body: None,
                prefix_end: span.end,
            },
            None => Mode::Opaque,
        };
        self.stack.push(Frame {
            mode,
            start: span.start,
        });
    }

    fn close(&mut self, span: Range<usize>) {
        let Some(frame) = self.stack.pop() else {
            let raw = self.raw(span.clone());
            self.result.warn(
                WarningKind::OrphanClose,
                format!("orphan close tag {raw}"),
                span.start,
            );
            self.result.push_text(raw);
            return;
        };

        match frame.mode {
            Mode::Opaque => {
                let raw = self.raw(frame.start..span.end);
                self.sink().push_text(raw);
            }
            Mode::Known { kind, mut node, .. } => {
                if kind.body == BodyKind::RichText && node.body.contains("<ac:") {
                    let remaining = self.max_depth.saturating_sub(self.stack.len() + 1);
                    rescan(&mut node, remaining);
                }
                self.sink().push_macro(node);
            }
        }
    }

    fn finish(mut self) -> ParseResult {
        let end = self.input.len();
        while let Some(frame) = self.stack.pop() {
            let rest = self.raw(frame.start..end);
            let open_tag = &rest[..rest.find('>').map_or(rest.len(), |i| i + 1)];
            self.result.warn(
                WarningKind::UnclosedMacro,
                format!("unclosed macro element {open_tag}"),
                frame.start,
            );
            match frame.mode {
                Mode::Opaque => {
                    if !self.inside_opaque() {
                        self.sink().push_text(rest);
                    }
                }
                Mode::Known {
                    node, prefix_end, ..
                } => {
                    let prefix = self.raw(frame.start..prefix_end);
                    demote(prefix, node, self.sink());
                }
            }
        }
        self.result
    }
}

fn rescan(node: &mut MacroNode, max_depth: usize) {
    let rescanned = parse_with_limit(&node.body, max_depth);
    if rescanned.macros().next().is_some() {
        rebuild_body(node, rescanned.segments);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only_macro(result: &ParseResult) -> &MacroNode {
        let macros: Vec<&MacroNode> = result.macros().collect();
        assert_eq!(macros.len(), 1, "expected exactly one macro in {result:?}");
        macros[0]
    }

    fn kinds(result: &ParseResult) -> Vec<WarningKind> {
        result.warnings.iter().map(|w| w.kind).collect()
    }

    #[test]
    fn test_toc_with_parameter() {
        let input = r#"<ac:structured-macro ac:name="toc" ac:schema-version="1"><ac:parameter ac:name="maxLevel">3</ac:parameter></ac:structured-macro>"#;
        let result = parse(input);
        let node = only_macro(&result);
        assert_eq!(node.name, "toc");
        assert_eq!(node.parameters["maxLevel"], "3");
        assert!(node.body.is_empty(), "whitespace-free body expected, got {:?}", node.body);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_rich_body_with_surrounding_html() {
        let input = "<p>before</p>\n<ac:structured-macro ac:name=\"info\">\n  <ac:parameter ac:name=\"title\">Important</ac:parameter>\n  <ac:rich-text-body><p>Body</p></ac:rich-text-body>\n</ac:structured-macro>\n<p>after</p>";
        let result = parse(input);
        assert_eq!(result.segments.len(), 3);
        assert_eq!(result.segments[0], Segment::Text("<p>before</p>\n".to_string()));
        let node = only_macro(&result);
        assert_eq!(node.parameters["title"], "Important");
        assert_eq!(node.body, "<p>Body</p>");
        assert_eq!(result.segments[2], Segment::Text("\n<p>after</p>".to_string()));
    }

    #[test]
    fn test_literal_body_from_cdata() {
        let input = r#"<ac:structured-macro ac:name="code"><ac:parameter ac:name="language">go</ac:parameter><ac:plain-text-body><![CDATA[fmt.Println("x") && a < b]]></ac:plain-text-body></ac:structured-macro>"#;
        let result = parse(input);
        let node = only_macro(&result);
        assert_eq!(node.name, "code");
        assert_eq!(node.parameters["language"], "go");
        assert_eq!(node.body, r#"fmt.Println("x") && a < b"#);
    }

    #[test]
    fn test_nested_macro_position_and_parameters() {
        let input = concat!(
            r#"<ac:structured-macro ac:name="info"><ac:parameter ac:name="title">Outer</ac:parameter>"#,
            r#"<ac:rich-text-body><p>Before</p>"#,
            r#"<ac:structured-macro ac:name="toc"><ac:parameter ac:name="maxLevel">2</ac:parameter></ac:structured-macro>"#,
            r#"<p>After</p></ac:rich-text-body></ac:structured-macro>"#,
        );
        let result = parse(input);
        let node = only_macro(&result);
        assert_eq!(node.parameters.len(), 1, "inner parameter must not leak into the outer macro");
        assert_eq!(node.parameters["title"], "Outer");
        assert_eq!(node.children.len(), 1);
        assert_eq!(node.children[0].parameters["maxLevel"], "2");
        assert_eq!(node.body, format!("<p>Before</p>{}<p>After</p>", child_marker(0)));
    }

    #[test]
    fn test_self_closing_macro() {
        let result = parse(r#"<p>x</p><ac:structured-macro ac:name="toc"/>"#);
        let node = only_macro(&result);
        assert_eq!(node.name, "toc");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_unknown_macro_kept_verbatim() {
        let input = r#"<ac:structured-macro ac:name="jira"><ac:parameter ac:name="key">AB-1</ac:parameter></ac:structured-macro>"#;
        let result = parse(input);
        assert_eq!(result.macros().count(), 0);
        assert_eq!(result.segments, vec![Segment::Text(input.to_string())]);
        assert_eq!(kinds(&result), vec![WarningKind::UnknownMacro]);
    }

    #[test]
    fn test_orphan_close() {
        let result = parse("<p>x</p></ac:structured-macro>");
        assert_eq!(kinds(&result), vec![WarningKind::OrphanClose]);
        assert_eq!(
            result.segments,
            vec![Segment::Text("<p>x</p></ac:structured-macro>".to_string())]
        );
    }

    #[test]
    fn test_unclosed_keeps_prefix_and_children() {
        let input = r#"<ac:structured-macro ac:name="note"><ac:rich-text-body>a<ac:structured-macro ac:name="toc"/>b"#;
        let result = parse(input);
        assert_eq!(kinds(&result), vec![WarningKind::UnclosedMacro]);
        assert_eq!(result.macros().count(), 1);
        assert_eq!(
            result.segments[0],
            Segment::Text(r#"<ac:structured-macro ac:name="note"><ac:rich-text-body>a"#.to_string())
        );
        assert_eq!(result.segments[2], Segment::Text("b".to_string()));
    }

    #[test]
    fn test_depth_limit_keeps_inner_verbatim() {
        let inner = r#"<ac:structured-macro ac:name="tip"><ac:rich-text-body>deep</ac:rich-text-body></ac:structured-macro>"#;
        let input = format!(
            r#"<ac:structured-macro ac:name="note"><ac:rich-text-body>{inner}</ac:rich-text-body></ac:structured-macro>"#
        );
        let result = parse_with_limit(&input, 1);
        let node = only_macro(&result);
        assert_eq!(node.name, "note");
        assert!(node.children.is_empty());
        assert_eq!(node.body, inner);
        assert!(kinds(&result).contains(&WarningKind::NestingTooDeep));
    }
}
