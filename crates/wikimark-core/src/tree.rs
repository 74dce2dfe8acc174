//! Markdown → document-exchange tree.
//!
//! Walks pulldown-cmark events with an explicit frame stack: every `Start`
//! pushes a frame and every `End` pops one, so document depth never turns
//! into call depth. Macros play no part here.

use crate::error::ConvertError;
use pulldown_cmark::{CodeBlockKind, CowStr, Event, Options, Parser, Tag};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "doc")]
pub struct TreeDocument {
    pub version: u32,
    pub content: Vec<Node>,
}

impl TreeDocument {
    pub fn to_json(&self) -> Result<String, ConvertError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConvertError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Node {
    Paragraph {
        content: Vec<Node>,
    },
    Heading {
        attrs: HeadingAttrs,
        content: Vec<Node>,
    },
    BulletList {
        content: Vec<Node>,
    },
    OrderedList {
        attrs: OrderedListAttrs,
        content: Vec<Node>,
    },
    ListItem {
        content: Vec<Node>,
    },
    CodeBlock {
        attrs: CodeBlockAttrs,
        content: Vec<Node>,
    },
    Blockquote {
        content: Vec<Node>,
    },
    Rule,
    Table {
        content: Vec<Node>,
    },
    TableRow {
        content: Vec<Node>,
    },
    TableHeader {
        attrs: CellAttrs,
        content: Vec<Node>,
    },
    TableCell {
        attrs: CellAttrs,
        content: Vec<Node>,
    },
    Text {
        text: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        marks: Vec<Mark>,
    },
    HardBreak,
}

impl Node {
    fn is_inline(&self) -> bool {
        matches!(self, Node::Text { .. } | Node::HardBreak)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeadingAttrs {
    pub level: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderedListAttrs {
    pub order: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeBlockAttrs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellAttrs {
    pub colspan: u32,
    pub rowspan: u32,
}

impl Default for CellAttrs {
    fn default() -> Self {
        Self {
            colspan: 1,
            rowspan: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Mark {
    Strong,
    Em,
    Strike,
    Code,
    Link { attrs: LinkAttrs },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkAttrs {
    pub href: String,
}

pub fn markdown_to_tree(markdown: &str) -> TreeDocument {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut builder = TreeBuilder::default();
    for event in Parser::new_ext(markdown, options) {
        builder.event(event);
    }
    builder.finish()
}

enum Kind {
    Paragraph,
    Heading(u8),
    BulletList,
    OrderedList(u64),
    ListItem,
    CodeBlock(Option<String>),
    Blockquote,
    Table,
    TableHead,
    TableRow,
    TableCell,
    /// Emphasis, strong, strikethrough or link: contributes a mark only.
    Mark,
    Image(String),
    /// Anything else; its children go to the parent.
    Transparent,
}

struct Frame {
    kind: Kind,
    content: Vec<Node>,
    code: String,
}

#[derive(Default)]
struct TreeBuilder {
    root: Vec<Node>,
    stack: Vec<Frame>,
    marks: Vec<Mark>,
}

impl TreeBuilder {
    fn event(&mut self, event: Event) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(_) => self.end(),
            Event::Text(text) => self.text(&text),
            Event::Code(code) => {
                let mut marks = self.marks.clone();
                marks.push(Mark::Code);
                self.push(Node::Text {
                    text: code.to_string(),
                    marks,
                });
            }
            Event::SoftBreak => self.text(" "),
            Event::HardBreak => self.push(Node::HardBreak),
            Event::Rule => self.push(Node::Rule),
            // Raw HTML, footnote references and the rest have no node.
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag) {
        let kind = match tag {
            Tag::Paragraph => Kind::Paragraph,
            Tag::Heading { level, .. } => Kind::Heading(level as u8),
            Tag::BlockQuote(_) => Kind::Blockquote,
            Tag::CodeBlock(CodeBlockKind::Fenced(info)) => Kind::CodeBlock(fence_language(&info)),
            Tag::CodeBlock(CodeBlockKind::Indented) => Kind::CodeBlock(None),
            Tag::List(Some(order)) => Kind::OrderedList(order),
            Tag::List(None) => Kind::BulletList,
            Tag::Item => Kind::ListItem,
            Tag::Table(_) => Kind::Table,
            Tag::TableHead => Kind::TableHead,
            Tag::TableRow => Kind::TableRow,
            Tag::TableCell => Kind::TableCell,
            Tag::Emphasis => self.mark(Mark::Em),
            Tag::Strong => self.mark(Mark::Strong),
            Tag::Strikethrough => self.mark(Mark::Strike),
            Tag::Link { dest_url, .. } => self.mark(Mark::Link {
                attrs: LinkAttrs {
                    href: dest_url.to_string(),
                },
            }),
            Tag::Image { dest_url, .. } => Kind::Image(dest_url.to_string()),
            _ => Kind::Transparent,
        };
        self.stack.push(Frame {
            kind,
            content: Vec::new(),
            code: String::new(),
        });
    }

    fn mark(&mut self, mark: Mark) -> Kind {
        self.marks.push(mark);
        Kind::Mark
    }

    fn end(&mut self) {
        let Some(frame) = self.stack.pop() else {
            return;
        };
        let content = frame.content;
        let node = match frame.kind {
            Kind::Paragraph => Node::Paragraph { content },
            Kind::Heading(level) => Node::Heading {
                attrs: HeadingAttrs { level },
                content,
            },
            Kind::BulletList => Node::BulletList { content },
            Kind::OrderedList(order) => Node::OrderedList {
                attrs: OrderedListAttrs { order },
                content,
            },
            Kind::ListItem => Node::ListItem {
                content: wrap_inline(content),
            },
            Kind::CodeBlock(language) => {
                let text = frame.code.strip_suffix('\n').unwrap_or(&frame.code);
                let content = if text.is_empty() {
                    Vec::new()
                } else {
                    vec![Node::Text {
                        text: text.to_string(),
                        marks: Vec::new(),
                    }]
                };
                Node::CodeBlock {
                    attrs: CodeBlockAttrs { language },
                    content,
                }
            }
            Kind::Blockquote => Node::Blockquote {
                content: wrap_inline(content),
            },
            Kind::Table => Node::Table { content },
            Kind::TableHead | Kind::TableRow => Node::TableRow { content },
            Kind::TableCell => {
                let in_head = matches!(self.stack.last(), Some(Frame { kind: Kind::TableHead, .. }));
                let attrs = CellAttrs::default();
                let content = vec![Node::Paragraph { content }];
                if in_head {
                    Node::TableHeader { attrs, content }
                } else {
                    Node::TableCell { attrs, content }
                }
            }
            Kind::Mark => {
                self.marks.pop();
                content.into_iter().for_each(|n| self.push(n));
                return;
            }
            Kind::Image(url) => {
                let alt: String = content
                    .iter()
                    .filter_map(|n| match n {
                        Node::Text { text, .. } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                let text = if alt.trim().is_empty() { url } else { alt };
                self.push(Node::Text {
                    text,
                    marks: self.marks.clone(),
                });
                return;
            }
            Kind::Transparent => {
                content.into_iter().for_each(|n| self.push(n));
                return;
            }
        };
        self.push(node);
    }

    fn text(&mut self, text: &str) {
        if let Some(Frame {
            kind: Kind::CodeBlock(_),
            code,
            ..
        }) = self.stack.last_mut()
        {
            code.push_str(text);
            return;
        }
        self.push(Node::Text {
            text: text.to_string(),
            marks: self.marks.clone(),
        });
    }

    /// Append to the innermost open frame, merging adjacent text that
    /// carries the same marks.
    fn push(&mut self, node: Node) {
        let content = match self.stack.last_mut() {
            Some(frame) => &mut frame.content,
            None => &mut self.root,
        };
        if let (
            Some(Node::Text {
                text: last,
                marks: last_marks,
            }),
            Node::Text { text, marks },
        ) = (content.last_mut(), &node)
        {
            if last_marks == marks {
                last.push_str(text);
                return;
            }
        }
        content.push(node);
    }

    fn finish(mut self) -> TreeDocument {
        while !self.stack.is_empty() {
            self.end();
        }
        TreeDocument {
            version: 1,
            content: wrap_inline(self.root),
        }
    }
}

fn fence_language(info: &CowStr) -> Option<String> {
    info.split_whitespace().next().map(str::to_string)
}

/// Group runs of inline nodes into paragraphs, for containers that only
/// accept block content.
fn wrap_inline(content: Vec<Node>) -> Vec<Node> {
    let mut out = Vec::with_capacity(content.len());
    let mut run = Vec::new();
    for node in content {
        if node.is_inline() {
            run.push(node);
            continue;
        }
        if !run.is_empty() {
            out.push(Node::Paragraph {
                content: std::mem::take(&mut run),
            });
        }
        out.push(node);
    }
    if !run.is_empty() {
        out.push(Node::Paragraph { content: run });
    }
    out
}
