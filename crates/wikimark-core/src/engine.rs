//! Generic converters the pipelines delegate to. They know nothing about
//! macros; placeholders pass through them as ordinary words.

use crate::error::EngineError;
use pulldown_cmark::{html, Options, Parser};

pub use crate::html_markdown::DomRenderer;

/// Markdown → HTML.
pub trait MarkdownRenderer {
    fn render(&self, markdown: &[u8]) -> Result<String, EngineError>;
}

/// HTML → Markdown.
pub trait HtmlRenderer {
    fn render(&self, html: &[u8]) -> Result<String, EngineError>;
}

/// Default Markdown engine, backed by pulldown-cmark.
#[derive(Debug, Clone, Copy, Default)]
pub struct CmarkRenderer;

impl CmarkRenderer {
    pub fn options() -> Options {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options
    }
}

impl MarkdownRenderer for CmarkRenderer {
    fn render(&self, markdown: &[u8]) -> Result<String, EngineError> {
        let text = std::str::from_utf8(markdown)?;
        let mut out = String::with_capacity(text.len() + text.len() / 2);
        html::push_html(&mut out, Parser::new_ext(text, Self::options()));
        Ok(out)
    }
}

impl<F> MarkdownRenderer for F
where
    F: Fn(&[u8]) -> Result<String, EngineError>,
{
    fn render(&self, markdown: &[u8]) -> Result<String, EngineError> {
        self(markdown)
    }
}

impl<F> HtmlRenderer for F
where
    F: Fn(&[u8]) -> Result<String, EngineError>,
{
    fn render(&self, html: &[u8]) -> Result<String, EngineError> {
        self(html)
    }
}
