pub mod ast;
pub mod bracket_parser;
pub mod bracket_tokenizer;
pub mod config;
pub mod engine;
pub mod error;
pub mod html_markdown;
pub mod placeholder;
pub mod registry;
pub mod render;
pub mod to_markdown;
pub mod to_storage;
pub mod tree;
pub mod xml_parser;
pub mod xml_tokenizer;

use ast::Warning;
use config::Config;
use engine::{CmarkRenderer, DomRenderer, HtmlRenderer, MarkdownRenderer};
pub use error::{ConvertError, EngineError};
pub use tree::TreeDocument;

/// Converted text plus the soft anomalies met on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub output: String,
    pub warnings: Vec<Warning>,
}

/// Options for [`storage_to_markdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageOptions {
    /// Render macros as bracket syntax. When false, macro elements and their
    /// bodies are dropped (literal-body macros still become code blocks).
    pub show_macros: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self { show_macros: true }
    }
}

/// Markdown with bracket macros → storage XML, using the built-in engine.
pub fn markdown_to_storage(markdown: &str) -> Result<String, ConvertError> {
    Ok(markdown_to_storage_with(markdown, &Config::default(), &CmarkRenderer)?.output)
}

pub fn markdown_to_storage_with(
    markdown: &str,
    config: &Config,
    engine: &dyn MarkdownRenderer,
) -> Result<Conversion, ConvertError> {
    to_storage::convert(markdown, config, engine)
}

/// Storage XML → Markdown with bracket macros, using the built-in engine.
pub fn storage_to_markdown(storage: &str, options: &StorageOptions) -> Result<String, ConvertError> {
    let mut config = Config::default();
    config.options.show_macros = options.show_macros;
    Ok(storage_to_markdown_with(storage, &config, &DomRenderer)?.output)
}

pub fn storage_to_markdown_with(
    storage: &str,
    config: &Config,
    engine: &dyn HtmlRenderer,
) -> Result<Conversion, ConvertError> {
    to_markdown::convert(storage, config, engine)
}

/// Markdown → document-exchange tree. Bracket macros are plain text here.
pub fn markdown_to_tree(markdown: &str) -> Result<TreeDocument, ConvertError> {
    Ok(tree::markdown_to_tree(markdown))
}
