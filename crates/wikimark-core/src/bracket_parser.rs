use crate::ast::*;
use crate::bracket_tokenizer::{tokenize, Tag, Token};
use crate::registry::{lookup, BodyKind, MacroType};

/// Default limit on how many macros may be open at once.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Parse bracket-macro markdown into text and macro segments.
pub fn parse(input: &str) -> ParseResult {
    parse_with_limit(input, DEFAULT_MAX_DEPTH)
}

/// Parse with an explicit nesting limit. Tags that would open a macro deeper
/// than `max_depth` are kept as text.
pub fn parse_with_limit(input: &str, max_depth: usize) -> ParseResult {
    let mut parser = Parser::new(max_depth);
    for token in tokenize(input) {
        parser.step(token);
    }
    parser.finish()
}

struct Frame {
    node: MacroNode,
    kind: MacroType,
    open_raw: String,
    position: usize,
}

struct Parser {
    stack: Vec<Frame>,
    result: ParseResult,
    max_depth: usize,
}

impl Parser {
    fn new(max_depth: usize) -> Self {
        Self {
            stack: Vec::new(),
            result: ParseResult::default(),
            max_depth,
        }
    }

    /// Where text and finished macros currently go.
    fn sink(&mut self) -> &mut dyn Sink {
        match self.stack.last_mut() {
            Some(frame) => &mut frame.node,
            None => &mut self.result,
        }
    }

    fn step(&mut self, token: Token) {
        // A literal body swallows everything up to its own close tag.
        if let Some(top) = self.stack.last_mut() {
            if top.kind.body == BodyKind::Literal {
                let closes_top = matches!(&token, Token::CloseTag(t) if t.name.eq_ignore_ascii_case(&top.node.name));
                if !closes_top {
                    match &token {
                        Token::Text { text, .. } => top.node.body.push_str(text),
                        Token::OpenTag(t) | Token::CloseTag(t) | Token::SelfClose(t) => {
                            top.node.body.push_str(&t.raw)
                        }
                    }
                    return;
                }
            }
        }

        match token {
            Token::Text { text, .. } => self.sink().push_text(&text),
            Token::OpenTag(tag) => self.open(tag),
            Token::CloseTag(tag) => self.close(tag),
            Token::SelfClose(tag) => self.self_close(tag),
        }
    }

    fn open(&mut self, tag: Tag) {
        let Some(kind) = lookup(&tag.name) else {
            self.unknown(&tag);
            return;
        };

        if !kind.has_body() {
            let node = build_node(kind, tag.parameters);
            self.sink().push_macro(node);
            return;
        }

        if self.stack.len() >= self.max_depth {
            self.result.warn(
                WarningKind::NestingTooDeep,
                format!("macro nesting deeper than {} levels: {}", self.max_depth, tag.raw),
                tag.position,
            );
            self.sink().push_text(&tag.raw);
            return;
        }

        self.stack.push(Frame {
            node: build_node(kind, tag.parameters),
            kind,
            open_raw: tag.raw,
            position: tag.position,
        });
    }

    fn close(&mut self, tag: Tag) {
        let Some(top) = self.stack.last() else {
            self.result.warn(
                WarningKind::OrphanClose,
                format!("orphan close tag {}", tag.raw),
                tag.position,
            );
            self.result.push_text(&tag.raw);
            return;
        };

        if !top.node.name.eq_ignore_ascii_case(&tag.name) {
            let message = format!(
                "mismatched close tag {}: expected [/{}]",
                tag.raw,
                top.node.name.to_ascii_uppercase()
            );
            self.result.warn(WarningKind::MismatchedClose, message, tag.position);
            self.sink().push_text(&tag.raw);
            return;
        }

        let Some(frame) = self.stack.pop() else {
            return;
        };
        let mut node = frame.node;
        if frame.kind.body == BodyKind::RichText && node.body.contains('[') {
            let remaining = self.max_depth.saturating_sub(self.stack.len() + 1);
            rescan(&mut node, remaining);
        }
        self.sink().push_macro(node);
    }

    fn self_close(&mut self, tag: Tag) {
        match lookup(&tag.name) {
            Some(kind) => {
                let node = build_node(kind, tag.parameters);
                self.sink().push_macro(node);
            }
            None => self.unknown(&tag),
        }
    }

    fn unknown(&mut self, tag: &Tag) {
        self.result.warn(
            WarningKind::UnknownMacro,
            format!("unknown macro {:?} kept as text", tag.name),
            tag.position,
        );
        self.sink().push_text(&tag.raw);
    }

    fn finish(mut self) -> ParseResult {
        while let Some(frame) = self.stack.pop() {
            self.result.warn(
                WarningKind::UnclosedMacro,
                format!("unclosed macro {}", frame.open_raw),
                frame.position,
            );
            demote(&frame.open_raw, frame.node, self.sink());
        }
        self.result
    }
}

fn build_node(kind: MacroType, parameters: std::collections::BTreeMap<String, String>) -> MacroNode {
    MacroNode {
        name: kind.name.to_string(),
        parameters,
        ..Default::default()
    }
}

/// Look for macros that survived as literal text inside a finished body.
fn rescan(node: &mut MacroNode, max_depth: usize) {
    let rescanned = parse_with_limit(&node.body, max_depth);
    if rescanned.macros().next().is_some() {
        rebuild_body(node, rescanned.segments);
    }
}
