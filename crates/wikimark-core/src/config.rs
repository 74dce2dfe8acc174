use crate::bracket_parser::DEFAULT_MAX_DEPTH;
use crate::error::ConvertError;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub options: Options,
    #[serde(default)]
    pub output: Output,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Options {
    /// Storage → markdown: render macros as bracket syntax, or drop them.
    #[serde(default = "default_true")]
    pub show_macros: bool,
    /// Nesting limit for both macro parsers.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Strip one leading and one trailing newline from literal bodies, so
    /// `[CODE]\n...\n[/CODE]` does not gain blank lines.
    #[serde(default = "default_true")]
    pub trim_literal_newlines: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            show_macros: true,
            max_depth: DEFAULT_MAX_DEPTH,
            trim_literal_newlines: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Output {
    #[serde(default = "default_true")]
    pub collapse_blank_lines: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            collapse_blank_lines: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl Config {
    pub fn from_toml(input: &str) -> Result<Self, ConvertError> {
        Ok(toml::from_str(input)?)
    }
}
