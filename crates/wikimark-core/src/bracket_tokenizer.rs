use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text { text: String, position: usize },
    OpenTag(Tag),
    CloseTag(Tag),
    SelfClose(Tag),
}

/// A recognised `[NAME ...]`, `[/NAME]` or `[NAME .../]`. The name is kept as
/// written; registry validation happens in the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    pub parameters: BTreeMap<String, String>,
    pub position: usize,
    /// Exact source slice, used when the tag has to be demoted to text.
    pub raw: String,
}

impl Token {
    pub fn position(&self) -> usize {
        match self {
            Token::Text { position, .. } => *position,
            Token::OpenTag(t) | Token::CloseTag(t) | Token::SelfClose(t) => t.position,
        }
    }
}

/// Tokenize bracket-macro markdown. Never fails: anything that does not parse
/// as a complete tag is text.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut search_from = 0;

    while let Some(idx) = input[search_from..].find('[') {
        let start = search_from + idx;
        match try_parse_tag(&input[start..]) {
            Some((kind, len)) => {
                flush_text(input, text_start, start, &mut tokens);
                let raw = &input[start..start + len];
                tokens.push(kind.into_token(raw, start));
                text_start = start + len;
                search_from = text_start;
            }
            None => {
                search_from = start + 1;
            }
        }
    }

    flush_text(input, text_start, input.len(), &mut tokens);
    tokens
}

fn flush_text(input: &str, start: usize, end: usize, tokens: &mut Vec<Token>) {
    if end > start {
        tokens.push(Token::Text {
            text: input[start..end].to_string(),
            position: start,
        });
    }
}

enum TagKind {
    Open(String, BTreeMap<String, String>),
    Close(String),
    SelfClose(String, BTreeMap<String, String>),
}

impl TagKind {
    fn into_token(self, raw: &str, position: usize) -> Token {
        let tag = |name: String, parameters: BTreeMap<String, String>| Tag {
            name,
            parameters,
            position,
            raw: raw.to_string(),
        };
        match self {
            TagKind::Open(name, params) => Token::OpenTag(tag(name, params)),
            TagKind::Close(name) => Token::CloseTag(tag(name, BTreeMap::new())),
            TagKind::SelfClose(name, params) => Token::SelfClose(tag(name, params)),
        }
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

fn is_space(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

/// Try to parse a tag at the start of `s` (which begins with `[`).
/// Returns the tag and the number of bytes it spans.
fn try_parse_tag(s: &str) -> Option<(TagKind, usize)> {
    let bytes = s.as_bytes();
    let mut pos = 1; // skip `[`

    let is_closing = bytes.get(pos) == Some(&b'/');
    if is_closing {
        pos += 1;
    }

    let name_start = pos;
    while pos < bytes.len() && is_name_byte(bytes[pos]) {
        pos += 1;
    }
    if pos == name_start {
        return None;
    }
    let name = s[name_start..pos].to_string();

    if is_closing {
        while pos < bytes.len() && is_space(bytes[pos]) {
            pos += 1;
        }
        if bytes.get(pos) == Some(&b']') {
            return Some((TagKind::Close(name), pos + 1));
        }
        return None;
    }

    let mut parameters = BTreeMap::new();
    loop {
        let before_space = pos;
        while pos < bytes.len() && is_space(bytes[pos]) {
            pos += 1;
        }

        match *bytes.get(pos)? {
            b']' => {
                let end = pos + 1;
                // `[text](url)` is a Markdown link, not a macro.
                if bytes.get(end) == Some(&b'(') {
                    return None;
                }
                return Some((TagKind::Open(name, parameters), end));
            }
            b'/' if bytes.get(pos + 1) == Some(&b']') => {
                return Some((TagKind::SelfClose(name, parameters), pos + 2));
            }
            _ => {}
        }

        // Parameters must be separated from the name and from each other.
        if pos == before_space {
            return None;
        }

        let key_start = pos;
        while pos < bytes.len() && is_name_byte(bytes[pos]) {
            pos += 1;
        }
        if pos == key_start || bytes.get(pos) != Some(&b'=') {
            return None;
        }
        let key = s[key_start..pos].to_string();
        pos += 1; // skip `=`

        match *bytes.get(pos)? {
            q @ (b'"' | b'\'') => {
                let (value, len) = parse_quoted(&s[pos..], q)?;
                parameters.insert(key, value);
                pos += len;
            }
            _ => {
                let value_start = pos;
                while pos < bytes.len() && !is_space(bytes[pos]) && bytes[pos] != b']' && bytes[pos] != b'\n' {
                    pos += 1;
                }
                let mut value_end = pos;
                // `k=v/]` closes the tag; the slash is not part of the value.
                if bytes.get(pos) == Some(&b']') && value_end > value_start && bytes[value_end - 1] == b'/' {
                    value_end -= 1;
                    pos -= 1;
                }
                parameters.insert(key, s[value_start..value_end].to_string());
            }
        }
    }
}

/// Parse a quoted value starting at the opening quote. Backslash escapes the
/// quote character and backslash itself; other backslashes are literal. The
/// value may span lines.
fn parse_quoted(s: &str, quote: u8) -> Option<(String, usize)> {
    let mut value = String::new();
    let mut chars = s.char_indices().skip(1);

    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some((_, next)) if next == quote as char || next == '\\' => value.push(next),
                Some((_, next)) => {
                    value.push('\\');
                    value.push(next);
                }
                None => return None,
            }
        } else if c == quote as char {
            return Some((value, i + 1));
        } else {
            value.push(c);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(token: &Token) -> &Tag {
        match token {
            Token::OpenTag(t) | Token::CloseTag(t) | Token::SelfClose(t) => t,
            Token::Text { .. } => panic!("expected a tag, got {token:?}"),
        }
    }

    #[test]
    fn test_plain_text_is_one_token() {
        let input = "# Hello\n\nNo macros here.\n";
        let tokens = tokenize(input);
        assert_eq!(
            tokens,
            vec![Token::Text {
                text: input.to_string(),
                position: 0
            }]
        );
    }

    #[test]
    fn test_open_and_close() {
        let tokens = tokenize("[INFO]Body[/INFO]");
        assert_eq!(tokens.len(), 3);
        assert!(matches!(&tokens[0], Token::OpenTag(t) if t.name == "INFO" && t.raw == "[INFO]"));
        assert!(matches!(&tokens[1], Token::Text { text, position: 6 } if text == "Body"));
        assert!(matches!(&tokens[2], Token::CloseTag(t) if t.name == "INFO" && t.position == 10));
    }

    #[test]
    fn test_unquoted_parameter() {
        let tokens = tokenize("[TOC maxLevel=3]");
        assert_eq!(tokens.len(), 1);
        let t = tag(&tokens[0]);
        assert!(matches!(tokens[0], Token::OpenTag(_)));
        assert_eq!(t.parameters.get("maxLevel").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_quoted_parameters() {
        let tokens = tokenize(r#"[INFO title="Two words" alt='it\'s' path="C:\dir"]"#);
        let t = tag(&tokens[0]);
        assert_eq!(t.parameters["title"], "Two words");
        assert_eq!(t.parameters["alt"], "it's");
        assert_eq!(t.parameters["path"], r"C:\dir");
    }

    #[test]
    fn test_quoted_value_spans_lines() {
        let tokens = tokenize("[INFO title=\"a\nb\"]x[/INFO]");
        assert_eq!(tokens.len(), 3, "got {tokens:?}");
        assert_eq!(tag(&tokens[0]).parameters["title"], "a\nb");
    }

    #[test]
    fn test_self_close_forms() {
        let tokens = tokenize("[TOC/] and [TOC maxLevel=2/] and [TOC depth=\"a b\" /]");
        let closes: Vec<&Tag> = tokens
            .iter()
            .filter(|t| matches!(t, Token::SelfClose(_)))
            .map(tag)
            .collect();
        assert_eq!(closes.len(), 3);
        assert!(closes[0].parameters.is_empty());
        assert_eq!(closes[1].parameters["maxLevel"], "2");
        assert_eq!(closes[2].parameters["depth"], "a b");
    }

    #[test]
    fn test_malformed_brackets_degrade_to_text() {
        for input in ["[", "[]", "[ TOC]", "[TOC", "[TOC key]", "[TOC k=\"open]", "[/]", "[/TOC x=1]", "[TOCk=1]"] {
            let tokens = tokenize(input);
            assert_eq!(
                tokens,
                vec![Token::Text {
                    text: input.to_string(),
                    position: 0
                }],
                "input {input:?} should stay text"
            );
        }
    }

    #[test]
    fn test_malformed_then_valid() {
        let tokens = tokenize("a [b [TOC] c");
        assert_eq!(tokens.len(), 3);
        assert!(matches!(&tokens[0], Token::Text { text, .. } if text == "a [b "));
        assert!(matches!(&tokens[1], Token::OpenTag(t) if t.name == "TOC" && t.position == 5));
        assert!(matches!(&tokens[2], Token::Text { text, position: 10 } if text == " c"));
    }

    #[test]
    fn test_unknown_names_still_tokenized() {
        let tokens = tokenize("[FROBNICATE]x[/FROBNICATE]");
        assert!(matches!(&tokens[0], Token::OpenTag(t) if t.name == "FROBNICATE"));
        assert!(matches!(&tokens[2], Token::CloseTag(t) if t.name == "FROBNICATE"));
    }

    #[test]
    fn test_markdown_link_is_not_a_tag() {
        let input = "See [docs](https://example.com) now";
        let tokens = tokenize(input);
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn test_multibyte_text_positions() {
        let tokens = tokenize("héllo [TOC]");
        assert!(matches!(&tokens[1], Token::OpenTag(t) if t.position == "héllo ".len()));
    }
}
