use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    Rich,
    Plain,
}

/// Storage-format tokens. Every token keeps the byte span it was read from, so
/// any of them can be demoted back to the exact source text.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Markup between macro elements, or the content of a CDATA section.
    Text { text: String, span: Range<usize> },
    OpenTag { name: String, span: Range<usize> },
    CloseTag { span: Range<usize> },
    Parameter { name: String, value: String, span: Range<usize> },
    BodyStart { kind: BodyType, span: Range<usize> },
    BodyEnd { kind: BodyType, span: Range<usize> },
}

impl Token {
    pub fn span(&self) -> Range<usize> {
        match self {
            Token::Text { span, .. }
            | Token::OpenTag { span, .. }
            | Token::CloseTag { span }
            | Token::Parameter { span, .. }
            | Token::BodyStart { span, .. }
            | Token::BodyEnd { span, .. } => span.clone(),
        }
    }

    pub fn position(&self) -> usize {
        self.span().start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    SelfClosingMacro,
    MacroOpen,
    MacroClose,
    Parameter,
    RichBodyOpen,
    RichBodyClose,
    PlainBodyOpen,
    PlainBodyClose,
    Cdata,
}

/// Element patterns in match priority order. Self-closing macros come before
/// the generic open pattern, which would otherwise swallow the `/`.
static PATTERNS: Lazy<Vec<(Pattern, Regex)>> = Lazy::new(|| {
    let table = [
        (
            Pattern::SelfClosingMacro,
            r#"<ac:(?:structured-)?macro\b[^>]*?\bac:name\s*=\s*["']([^"']*)["'][^>]*?/>"#,
        ),
        (
            Pattern::MacroOpen,
            r#"<ac:(?:structured-)?macro\b[^>]*?\bac:name\s*=\s*["']([^"']*)["'][^>]*>"#,
        ),
        (Pattern::MacroClose, r"</ac:(?:structured-)?macro\s*>"),
        (
            Pattern::Parameter,
            r#"(?s)<ac:parameter\b[^>]*?\bac:name\s*=\s*["']([^"']*)["'][^>]*?(?:/>|>(.*?)</ac:parameter\s*>)"#,
        ),
        (Pattern::RichBodyOpen, r"<ac:rich-text-body\s*>"),
        (Pattern::RichBodyClose, r"</ac:rich-text-body\s*>"),
        (Pattern::PlainBodyOpen, r"<ac:plain-text-body\s*>"),
        (Pattern::PlainBodyClose, r"</ac:plain-text-body\s*>"),
        (Pattern::Cdata, r"(?s)<!\[CDATA\[(.*?)\]\]>"),
    ];
    table
        .into_iter()
        .map(|(kind, src)| (kind, Regex::new(src).expect("static storage pattern")))
        .collect()
});

/// Matches the opening of any macro element; used by the storage pipeline's
/// innermost-first search.
pub static MACRO_OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<ac:(?:structured-)?macro\b[^>]*?(/?)>"#).expect("static storage pattern")
});

pub static MACRO_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</ac:(?:structured-)?macro\s*>").expect("static storage pattern"));

#[derive(Clone, Copy)]
enum NextMatch {
    Unknown,
    At(usize),
    Never,
}

/// Tokenize storage-format XML. Never fails: input that matches no element
/// pattern is text.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut next = vec![NextMatch::Unknown; PATTERNS.len()];
    let mut text_start = 0;
    let mut pos = 0;

    'scan: while pos < input.len() {
        for (i, (kind, regex)) in PATTERNS.iter().enumerate() {
            let stale = match next[i] {
                NextMatch::Unknown => true,
                NextMatch::At(start) => start < pos,
                NextMatch::Never => false,
            };
            if stale {
                next[i] = match regex.find_at(input, pos) {
                    Some(m) => NextMatch::At(m.start()),
                    None => NextMatch::Never,
                };
            }
            if !matches!(next[i], NextMatch::At(start) if start == pos) {
                continue;
            }
            let Some(caps) = regex.captures_at(input, pos) else {
                continue;
            };
            let Some(whole) = caps.get(0) else {
                continue;
            };
            flush_text(input, text_start, pos, &mut tokens);
            emit(*kind, &caps, whole.range(), &mut tokens);
            pos = whole.end();
            text_start = pos;
            continue 'scan;
        }

        // Nothing matches here: skip ahead to the nearest offset where some
        // pattern does, or to the end of input.
        let nearest = next
            .iter()
            .filter_map(|n| match n {
                NextMatch::At(start) if *start > pos => Some(*start),
                _ => None,
            })
            .min();
        pos = match nearest {
            Some(start) => start,
            None => input.len(),
        };
    }

    flush_text(input, text_start, input.len(), &mut tokens);
    tokens
}

fn flush_text(input: &str, start: usize, end: usize, tokens: &mut Vec<Token>) {
    if end > start {
        tokens.push(Token::Text {
            text: input[start..end].to_string(),
            span: start..end,
        });
    }
}

fn emit(kind: Pattern, caps: &Captures<'_>, span: Range<usize>, tokens: &mut Vec<Token>) {
    let group = |i: usize| caps.get(i).map_or("", |m| m.as_str());
    match kind {
        Pattern::SelfClosingMacro => {
            tokens.push(Token::OpenTag {
                name: group(1).to_ascii_lowercase(),
                span: span.clone(),
            });
            tokens.push(Token::CloseTag {
                span: span.end..span.end,
            });
        }
        Pattern::MacroOpen => tokens.push(Token::OpenTag {
            name: group(1).to_ascii_lowercase(),
            span,
        }),
        Pattern::MacroClose => tokens.push(Token::CloseTag { span }),
        Pattern::Parameter => tokens.push(Token::Parameter {
            name: group(1).to_string(),
            value: unescape(group(2)),
            span,
        }),
        Pattern::RichBodyOpen => tokens.push(Token::BodyStart {
            kind: BodyType::Rich,
            span,
        }),
        Pattern::RichBodyClose => tokens.push(Token::BodyEnd {
            kind: BodyType::Rich,
            span,
        }),
        Pattern::PlainBodyOpen => tokens.push(Token::BodyStart {
            kind: BodyType::Plain,
            span,
        }),
        Pattern::PlainBodyClose => tokens.push(Token::BodyEnd {
            kind: BodyType::Plain,
            span,
        }),
        Pattern::Cdata => tokens.push(Token::Text {
            text: group(1).to_string(),
            span,
        }),
    }
}

/// Decode the five predefined XML entities and numeric character references.
/// Unknown entities are left untouched.
pub fn unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp..];
        let decoded = after.find(';').and_then(|semi| {
            let entity = &after[1..semi];
            let c = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            c.map(|c| (c, semi + 1))
        });
        match decoded {
            Some((c, len)) => {
                out.push(c);
                rest = &after[len..];
            }
            None => {
                out.push('&');
                rest = &after[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<&'static str> {
        tokens
            .iter()
            .map(|t| match t {
                Token::Text { .. } => "Text",
                Token::OpenTag { .. } => "Open",
                Token::CloseTag { .. } => "Close",
                Token::Parameter { .. } => "Param",
                Token::BodyStart { .. } => "BodyStart",
                Token::BodyEnd { .. } => "BodyEnd",
            })
            .collect()
    }

    #[test]
    fn test_plain_html_is_text() {
        let input = "<p>Hello <strong>world</strong></p>";
        let tokens = tokenize(input);
        assert_eq!(
            tokens,
            vec![Token::Text {
                text: input.to_string(),
                span: 0..input.len()
            }]
        );
    }

    #[test]
    fn test_macro_with_parameter_and_rich_body() {
        let input = r#"<p>a</p><ac:structured-macro ac:name="info" ac:schema-version="1"><ac:parameter ac:name="title">Tom &amp; Jerry</ac:parameter><ac:rich-text-body><p>Body</p></ac:rich-text-body></ac:structured-macro>"#;
        let tokens = tokenize(input);
        assert_eq!(
            kinds(&tokens),
            vec!["Text", "Open", "Param", "BodyStart", "Text", "BodyEnd", "Close"]
        );
        assert!(matches!(&tokens[1], Token::OpenTag { name, span } if name == "info" && span.start == 8));
        assert!(matches!(&tokens[2], Token::Parameter { name, value, .. } if name == "title" && value == "Tom & Jerry"));
        assert!(matches!(&tokens[4], Token::Text { text, .. } if text == "<p>Body</p>"));
    }

    #[test]
    fn test_self_closing_macro_becomes_open_close_pair() {
        let input = r#"<ac:structured-macro ac:name="TOC" ac:schema-version="1"/>"#;
        let tokens = tokenize(input);
        assert_eq!(kinds(&tokens), vec!["Open", "Close"]);
        assert!(matches!(&tokens[0], Token::OpenTag { name, .. } if name == "toc"));
        assert_eq!(tokens[1].position(), input.len());
    }

    #[test]
    fn test_plain_body_cdata() {
        let input = r#"<ac:structured-macro ac:name="code"><ac:parameter ac:name="language">go</ac:parameter><ac:plain-text-body><![CDATA[fmt.Println("<x>")]]></ac:plain-text-body></ac:structured-macro>"#;
        let tokens = tokenize(input);
        assert_eq!(
            kinds(&tokens),
            vec!["Open", "Param", "BodyStart", "Text", "BodyEnd", "Close"]
        );
        assert!(matches!(&tokens[3], Token::Text { text, .. } if text == r#"fmt.Println("<x>")"#));
        assert!(matches!(&tokens[2], Token::BodyStart { kind: BodyType::Plain, .. }));
    }

    #[test]
    fn test_legacy_macro_and_self_closing_parameter() {
        let input = r#"<ac:macro ac:name='note'><ac:parameter ac:name="icon" /></ac:macro>"#;
        let tokens = tokenize(input);
        assert_eq!(kinds(&tokens), vec!["Open", "Param", "Close"]);
        assert!(matches!(&tokens[1], Token::Parameter { name, value, .. } if name == "icon" && value.is_empty()));
    }

    #[test]
    fn test_macro_without_name_is_text() {
        let input = "<ac:structured-macro>x</ac:structured-macro>";
        let tokens = tokenize(input);
        assert_eq!(kinds(&tokens), vec!["Text", "Close"]);
    }

    #[test]
    fn test_spans_cover_input() {
        let input = r#"x<ac:structured-macro ac:name="note"><ac:rich-text-body>é</ac:rich-text-body></ac:structured-macro>y"#;
        let tokens = tokenize(input);
        let rebuilt: String = tokens.iter().map(|t| &input[t.span()]).collect();
        assert_eq!(rebuilt, input);
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("a &lt;b&gt; &quot;c&quot; &#65;&#x42; &bogus; &"), "a <b> \"c\" AB &bogus; &");
    }
}
