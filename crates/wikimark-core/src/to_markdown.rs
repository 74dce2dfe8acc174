//! Storage XML → Markdown with bracket macros.
//!
//! Macro elements are rewritten innermost-first into marker pairs wrapped in
//! paragraphs, the remaining HTML goes through the generic engine, and the
//! markers are finally swapped for bracket syntax.
//!
//! Warning positions are byte offsets into the document as it stood when the
//! element was reached; earlier rewrites may have shifted them.

use crate::ast::{Warning, WarningKind};
use crate::config::Config;
use crate::engine::HtmlRenderer;
use crate::error::ConvertError;
use crate::placeholder::MarkerPairs;
use crate::registry::BodyKind;
use crate::render::{body_kind, bracket_close, bracket_open, escape_xml};
use crate::xml_parser;
use crate::xml_tokenizer::{self, BodyType, Token, MACRO_CLOSE, MACRO_OPEN};
use crate::Conversion;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::ops::Range;
use tracing::debug;

static CDATA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("static storage pattern"));

static RICH_BODY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<ac:rich-text-body\s*>(.*)</ac:rich-text-body\s*>").expect("static storage pattern")
});

static WIKI_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<ac:link\b[^>]*/>|<ac:link\b[^>]*>.*?</ac:link\s*>").expect("static storage pattern")
});

static WIKI_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?(?:ac|ri):[^>]*>").expect("static storage pattern"));

/// HTML elements that decide whether a macro sits in running text. The last
/// one before a macro tells: an open `p`, `li`, cell or heading means inline.
static BLOCK_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<(/?)(p|li|td|th|h[1-6]|dt|dd|caption|div|ul|ol|table|tr|blockquote|pre)\b[^>]*>")
        .expect("static storage pattern")
});

pub fn convert(
    storage: &str,
    config: &Config,
    engine: &dyn HtmlRenderer,
) -> Result<Conversion, ConvertError> {
    let mut rewriter = Rewriter {
        config,
        pairs: MarkerPairs::for_input(storage),
        warnings: Vec::new(),
    };

    let mut doc = rewriter.literal_macros_to_code(storage);
    rewriter.rewrite_macros(&mut doc);
    debug!(
        macros = rewriter.pairs.len(),
        warnings = rewriter.warnings.len(),
        "rewrote macro elements"
    );

    let html = strip_wiki_elements(&doc);
    let markdown = engine.render(html.as_bytes())?;
    let markdown = rewriter.pairs.resolve(&markdown);
    let output = if config.output.collapse_blank_lines {
        collapse_blank_lines(&markdown)
    } else {
        markdown
    };

    Ok(Conversion {
        output,
        warnings: rewriter.warnings,
    })
}

struct Rewriter<'a> {
    config: &'a Config,
    pairs: MarkerPairs,
    warnings: Vec<Warning>,
}

struct Open {
    start: usize,
    end: usize,
    self_closing: bool,
}

impl Rewriter<'_> {
    /// Turn literal-body macros into `<pre><code>` before anything else looks
    /// at the document, so markup inside their CDATA is never mistaken for
    /// macro elements. Literal macros survive even when macros are hidden.
    fn literal_macros_to_code(&mut self, storage: &str) -> String {
        let mut out = String::with_capacity(storage.len());
        let mut copied = 0;
        for literal in literal_elements(storage) {
            let element = &storage[literal.span.clone()];
            let parsed = xml_parser::parse_with_limit(element, self.config.options.max_depth);
            let block = match parsed.macros().next() {
                Some(node) if body_kind(node) == BodyKind::Literal => Some(code_block(
                    node.parameters.get("language").map(String::as_str),
                    &node.body,
                )),
                Some(_) => None,
                None => Some(code_block(None, &literal.body)),
            };
            self.absorb(parsed.warnings, literal.span.start);
            out.push_str(&storage[copied..literal.span.start]);
            out.push_str(block.as_deref().unwrap_or(element));
            copied = literal.span.end;
        }
        out.push_str(&storage[copied..]);
        out
    }

    /// Rewrite every remaining macro element, innermost first, until none is
    /// left. Each step removes one opening tag, so the loop is bounded by the
    /// number of macro elements in the input.
    fn rewrite_macros(&mut self, doc: &mut String) {
        // Opening tags we stepped inside because they contain further macros.
        let mut enclosing: Vec<usize> = Vec::new();
        let mut from = 0;

        loop {
            let Some(open) = next_open(doc, from) else {
                match enclosing.pop() {
                    Some(start) => {
                        from = start;
                        continue;
                    }
                    None => break,
                }
            };

            if open.self_closing {
                self.rewrite_element(doc, open.start..open.end);
                from = enclosing.pop().unwrap_or(open.start);
                continue;
            }

            let Some(end) = balanced_close(doc, open.end) else {
                let tag = &doc[open.start..open.end];
                self.warn(
                    WarningKind::UnclosedMacro,
                    format!("unclosed macro element {tag} dropped"),
                    open.start,
                );
                doc.replace_range(open.start..open.end, "");
                from = open.start;
                continue;
            };

            if next_open(doc, open.end).is_some_and(|inner| inner.start < end) {
                enclosing.push(open.start);
                from = open.end;
                continue;
            }

            self.rewrite_element(doc, open.start..end);
            from = enclosing.pop().unwrap_or(open.start);
        }
    }

    /// Replace one innermost macro element (no macro inside it) in place.
    fn rewrite_element(&mut self, doc: &mut String, span: Range<usize>) {
        let element = &doc[span.clone()];
        let parsed = xml_parser::parse_with_limit(element, self.config.options.max_depth);
        let replacement = match parsed.macros().next() {
            Some(node) => match body_kind(node) {
                BodyKind::Literal => code_block(node.parameters.get("language").map(String::as_str), &node.body),
                _ if !self.config.options.show_macros => String::new(),
                _ => {
                    let (open, close) = self.pairs.insert(bracket_open(node), bracket_close(node));
                    let inline = in_running_text(&doc[..span.start]);
                    match close {
                        Some(close) if inline => format!("{open}{}{close}", node.body),
                        Some(close) => format!("<p>{open}</p>{}<p>{close}</p>", node.body),
                        None if inline => open,
                        None => format!("<p>{open}</p>"),
                    }
                }
            },
            // Unknown macro: keep whatever rich content it wraps.
            None => RICH_BODY
                .captures(element)
                .map(|c| c[1].to_string())
                .unwrap_or_default(),
        };

        if parsed.warnings.is_empty() && parsed.macros().next().is_none() {
            self.warn(
                WarningKind::UnknownMacro,
                "unrecognised macro element removed".to_string(),
                span.start,
            );
        }
        self.absorb(parsed.warnings, span.start);
        doc.replace_range(span, &replacement);
    }

    fn absorb(&mut self, warnings: Vec<Warning>, offset: usize) {
        self.warnings.extend(warnings.into_iter().map(|mut w| {
            w.position += offset;
            w
        }));
    }

    fn warn(&mut self, kind: WarningKind, message: String, position: usize) {
        tracing::warn!(?kind, position, "{message}");
        self.warnings.push(Warning {
            kind,
            message,
            position,
        });
    }
}

/// A macro element whose only content is parameters and a plain-text body.
struct LiteralElement {
    span: Range<usize>,
    body: String,
}

struct Candidate {
    start: usize,
    plain_body: bool,
    in_plain_body: bool,
    disqualified: bool,
    body: String,
}

/// Find literal-body macro elements by walking storage tokens. CDATA is a
/// single token, so macro markup inside it is never taken for an element.
/// The returned spans are disjoint and in document order.
fn literal_elements(storage: &str) -> Vec<LiteralElement> {
    let mut found = Vec::new();
    let mut stack: Vec<Candidate> = Vec::new();
    for token in xml_tokenizer::tokenize(storage) {
        match token {
            Token::OpenTag { span, .. } => {
                if let Some(parent) = stack.last_mut() {
                    parent.disqualified = true;
                }
                stack.push(Candidate {
                    start: span.start,
                    plain_body: false,
                    in_plain_body: false,
                    disqualified: false,
                    body: String::new(),
                });
            }
            Token::CloseTag { span } => {
                let Some(candidate) = stack.pop() else { continue };
                if candidate.plain_body && !candidate.disqualified {
                    found.push(LiteralElement {
                        span: candidate.start..span.end,
                        body: candidate.body,
                    });
                }
            }
            Token::BodyStart { kind, .. } => {
                if let Some(top) = stack.last_mut() {
                    match kind {
                        BodyType::Plain => {
                            top.plain_body = true;
                            top.in_plain_body = true;
                        }
                        BodyType::Rich => top.disqualified = true,
                    }
                }
            }
            Token::BodyEnd { .. } => {
                if let Some(top) = stack.last_mut() {
                    top.in_plain_body = false;
                }
            }
            Token::Text { text, span } => {
                let Some(top) = stack.last_mut() else { continue };
                if top.in_plain_body {
                    if storage[span].starts_with("<![CDATA[") {
                        top.body.push_str(&text);
                    } else {
                        top.body.push_str(&xml_tokenizer::unescape(&text));
                    }
                } else if !text.trim().is_empty() {
                    top.disqualified = true;
                }
            }
            Token::Parameter { .. } => {}
        }
    }
    found
}

/// Whether a macro starting right after `before` sits inside a paragraph,
/// list item, cell or heading rather than between blocks.
fn in_running_text(before: &str) -> bool {
    BLOCK_TAG.captures_iter(before).last().is_some_and(|caps| {
        caps[1].is_empty()
            && matches!(
                caps[2].to_ascii_lowercase().as_str(),
                "p" | "li" | "td" | "th" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "dt" | "dd" | "caption"
            )
    })
}

fn next_open(doc: &str, from: usize) -> Option<Open> {
    let caps = MACRO_OPEN.captures_at(doc, from)?;
    let whole = caps.get(0)?;
    Some(Open {
        start: whole.start(),
        end: whole.end(),
        self_closing: caps.get(1).is_some_and(|g| !g.as_str().is_empty()),
    })
}

/// End of the close tag matching an open tag that ends at `from`.
fn balanced_close(doc: &str, from: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut pos = from;
    loop {
        let close = MACRO_CLOSE.find_at(doc, pos)?;
        match next_open(doc, pos) {
            Some(open) if open.start < close.start() => {
                if !open.self_closing {
                    depth += 1;
                }
                pos = open.end;
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return Some(close.end());
                }
                pos = close.end();
            }
        }
    }
}

fn code_block(language: Option<&str>, text: &str) -> String {
    let class = language
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| format!(" class=\"language-{}\"", escape_xml(l)))
        .unwrap_or_default();
    format!("<pre><code{class}>{}</code></pre>", escape_xml(text))
}

/// Drop wiki-only elements with no Markdown meaning: cross-document links
/// entirely, any other `ac:`/`ri:` tag keeping its content. Stray literal
/// sections become escaped text.
fn strip_wiki_elements(doc: &str) -> String {
    let doc = WIKI_LINK.replace_all(doc, "");
    let doc = CDATA.replace_all(&doc, |caps: &Captures| escape_xml(&caps[1]));
    WIKI_TAG.replace_all(&doc, "").into_owned()
}

/// Collapse runs of blank lines to one, outside fenced code, and end with a
/// single newline. Empty output stays empty.
pub fn collapse_blank_lines(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut open_fence: Option<(char, usize)> = None;
    let mut previous_blank = true;

    for line in input.lines() {
        let in_fence = open_fence.is_some();
        match (open_fence, fence_run(line)) {
            (None, Some(fence)) => open_fence = Some(fence),
            (Some((c, n)), Some((c2, n2))) if c == c2 && n2 >= n && line.trim().chars().all(|x| x == c) => {
                open_fence = None
            }
            _ => {}
        }

        let blank = line.trim().is_empty();
        if blank && !in_fence {
            if !previous_blank {
                out.push('\n');
            }
            previous_blank = true;
            continue;
        }
        out.push_str(line);
        out.push('\n');
        previous_blank = false;
    }

    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}

fn fence_run(line: &str) -> Option<(char, usize)> {
    let trimmed = line.trim_start();
    let c = trimmed.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let n = trimmed.chars().take_while(|x| *x == c).count();
    (n >= 3).then_some((c, n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::html_markdown::DomRenderer;

    const NESTED: &str = concat!(
        "<p>Intro</p>",
        r#"<ac:structured-macro ac:name="info" ac:schema-version="1" ac:macro-id="abc">"#,
        r#"<ac:parameter ac:name="title">Read me</ac:parameter>"#,
        "<ac:rich-text-body><p>Before</p>",
        r#"<ac:structured-macro ac:name="toc"><ac:parameter ac:name="maxLevel">2</ac:parameter></ac:structured-macro>"#,
        "<p>After <strong>bold</strong></p></ac:rich-text-body></ac:structured-macro>",
    );

    fn markdown(storage: &str) -> Conversion {
        convert(storage, &Config::default(), &DomRenderer).unwrap()
    }

    fn hidden() -> Config {
        Config::from_toml("[options]\nshow_macros = false").unwrap()
    }

    #[test]
    fn test_code_macro_to_fenced_block() {
        let storage = r#"<ac:structured-macro ac:name="code"><ac:parameter ac:name="language">go</ac:parameter><ac:plain-text-body><![CDATA[fmt.Println("x")]]></ac:plain-text-body></ac:structured-macro>"#;
        let result = markdown(storage);
        assert_eq!(result.output, "```go\nfmt.Println(\"x\")\n```\n");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_code_body_with_macro_markup_is_not_parsed() {
        let storage = r#"<ac:structured-macro ac:name="code"><ac:plain-text-body><![CDATA[<ac:structured-macro ac:name="toc"/> && x]]></ac:plain-text-body></ac:structured-macro>"#;
        let result = markdown(storage);
        assert_eq!(result.output, "```\n<ac:structured-macro ac:name=\"toc\"/> && x\n```\n");
    }

    #[test]
    fn test_nested_macros_innermost_first() {
        let result = markdown(NESTED);
        assert_eq!(
            result.output,
            "Intro\n\n[INFO title=\"Read me\"]\n\nBefore\n\n[TOC maxLevel=2]\n\nAfter **bold**\n\n[/INFO]\n"
        );
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_code_inside_titled_rich_macro_keeps_outer_macro() {
        let storage = concat!(
            r#"<ac:structured-macro ac:name="info" ac:schema-version="1"><ac:parameter ac:name="title">T</ac:parameter>"#,
            "<ac:rich-text-body><p>Intro</p>",
            r#"<ac:structured-macro ac:name="code" ac:schema-version="1"><ac:parameter ac:name="language">go</ac:parameter>"#,
            "<ac:plain-text-body><![CDATA[x := 1]]></ac:plain-text-body></ac:structured-macro>",
            "</ac:rich-text-body></ac:structured-macro>",
        );
        let result = markdown(storage);
        assert_eq!(result.output, "[INFO title=T]\n\nIntro\n\n```go\nx := 1\n```\n\n[/INFO]\n");
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_literal_elements_skip_rich_macros() {
        let storage = concat!(
            r#"<ac:structured-macro ac:name="info"><ac:parameter ac:name="title">T</ac:parameter><ac:rich-text-body>"#,
            r#"<ac:structured-macro ac:name="code"><ac:plain-text-body><![CDATA[a &lt; b]]></ac:plain-text-body></ac:structured-macro>"#,
            "</ac:rich-text-body></ac:structured-macro>",
        );
        let found = literal_elements(storage);
        assert_eq!(found.len(), 1);
        assert!(storage[found[0].span.clone()].starts_with(r#"<ac:structured-macro ac:name="code">"#));
        assert_eq!(found[0].body, "a &lt; b", "CDATA content is taken verbatim");
    }

    #[test]
    fn test_inline_macro_stays_in_its_paragraph() {
        let result = markdown(r#"<p>See <ac:structured-macro ac:name="toc"/> here</p>"#);
        assert_eq!(result.output, "See [TOC] here\n");
    }

    #[test]
    fn test_inline_macro_in_list_item_and_cell() {
        let list = markdown(r#"<ul><li>a <ac:structured-macro ac:name="toc"/> b</li></ul>"#);
        assert_eq!(list.output, "- a [TOC] b\n");
        assert!(in_running_text("<table><tr><td>x "));
        assert!(!in_running_text("<p>x</p>"));
        assert!(!in_running_text(""));
    }

    #[test]
    fn test_marker_text_in_storage_is_not_replaced() {
        let result = markdown(r#"<p>WIKIMARKOPEN0END</p><ac:structured-macro ac:name="toc"/>"#);
        assert_eq!(result.output, "WIKIMARKOPEN0END\n\n[TOC]\n");
    }

    #[test]
    fn test_hidden_macros_are_removed_with_their_bodies() {
        let result = convert(NESTED, &hidden(), &DomRenderer).unwrap();
        assert_eq!(result.output, "Intro\n");
    }

    #[test]
    fn test_hidden_macros_keep_code() {
        let storage = r#"<ac:structured-macro ac:name="code"><ac:plain-text-body><![CDATA[x]]></ac:plain-text-body></ac:structured-macro>"#;
        let result = convert(storage, &hidden(), &DomRenderer).unwrap();
        assert_eq!(result.output, "```\nx\n```\n");
    }

    #[test]
    fn test_self_closing_and_legacy_elements() {
        let result = markdown(r#"<p>a</p><ac:structured-macro ac:name="toc"/><ac:macro ac:name="tip"><ac:rich-text-body><p>t</p></ac:rich-text-body></ac:macro>"#);
        assert_eq!(result.output, "a\n\n[TOC]\n\n[TIP]\n\nt\n\n[/TIP]\n");
    }

    #[test]
    fn test_unknown_macro_unwrapped() {
        let result = markdown(r#"<ac:structured-macro ac:name="panel"><ac:parameter ac:name="x">1</ac:parameter><ac:rich-text-body><p>Kept</p></ac:rich-text-body></ac:structured-macro>"#);
        assert_eq!(result.output, "Kept\n");
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].kind, WarningKind::UnknownMacro);
    }

    #[test]
    fn test_unknown_plain_body_becomes_code() {
        let result = markdown(r#"<ac:structured-macro ac:name="noformat"><ac:plain-text-body><![CDATA[raw *text*]]></ac:plain-text-body></ac:structured-macro>"#);
        assert_eq!(result.output, "```\nraw *text*\n```\n");
        assert_eq!(result.warnings[0].kind, WarningKind::UnknownMacro);
    }

    #[test]
    fn test_unclosed_macro_element() {
        let result = markdown(r#"<ac:structured-macro ac:name="info"><ac:rich-text-body><p>Body</p>"#);
        assert_eq!(result.output, "Body\n");
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].kind, WarningKind::UnclosedMacro);
    }

    #[test]
    fn test_wiki_links_and_references_stripped() {
        let storage = r#"<p>See <ac:link><ri:page ri:content-title="Home"/><ac:plain-text-link-body><![CDATA[Home]]></ac:plain-text-link-body></ac:link> now</p><p><ac:image><ri:attachment ri:filename="a.png"/></ac:image>end</p>"#;
        assert_eq!(markdown(storage).output, "See now\n\nend\n");
    }

    #[test]
    fn test_empty_input() {
        let result = markdown("");
        assert_eq!(result.output, "");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_engine_failure_is_error() {
        let engine = |_: &[u8]| -> Result<String, EngineError> { Err(EngineError::Render("down".into())) };
        let err = convert("<p>x</p>", &Config::default(), &engine).unwrap_err();
        assert!(matches!(err, ConvertError::Engine(_)), "got {err:?}");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("\n\na\n\n\n\nb\n\n"), "a\n\nb\n");
        assert_eq!(collapse_blank_lines(""), "");
        assert_eq!(collapse_blank_lines("\n  \n"), "");
    }

    #[test]
    fn test_collapse_leaves_fenced_code_alone() {
        let md = "```\nx\n\n\n\ny\n```\n\n\n\nz\n";
        assert_eq!(collapse_blank_lines(md), "```\nx\n\n\n\ny\n```\n\nz\n");
    }
}
