//! Opaque marker tokens that carry rendered macros through a generic
//! converter. Markers are plain ASCII words so neither engine touches them.
//!
//! A marker reads `WIKIMARK{salt}{WORD}{id}END`, where the salt is a run of
//! `X` chosen so that no marker-shaped text already in the input can be
//! mistaken for one of ours.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const TAG: &str = "WIKIMARK";
const SUFFIX: &str = "END";
/// Markdown → storage: one marker per rendered macro.
const MACRO_WORD: &str = "MACRO";
/// Storage → markdown: a marker pair around each macro's body.
const OPEN_WORD: &str = "OPEN";
const CLOSE_WORD: &str = "CLOSE";

static MACRO_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<p>\s*WIKIMARK(X*)MACRO(\d+)END\s*</p>|WIKIMARK(X*)MACRO(\d+)END").expect("static marker pattern")
});

static PAIR_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"WIKIMARK(X*)(OPEN|CLOSE)(\d+)END").expect("static marker pattern"));

/// Shortest salt whose markers for `words` do not occur anywhere in `input`.
fn salt_for(input: &str, words: &[&str]) -> String {
    let mut salt = String::new();
    while words.iter().any(|word| input.contains(&format!("{TAG}{salt}{word}"))) {
        salt.push('X');
    }
    salt
}

fn marker(salt: &str, word: &str, id: usize) -> String {
    format!("{TAG}{salt}{word}{id}{SUFFIX}")
}

/// Rendered storage XML keyed by marker ID.
///
/// IDs are handed out in insertion order, and callers insert children before
/// their parents, so a replacement can only mention markers with smaller IDs.
#[derive(Debug, Default)]
pub struct PlaceholderMap {
    salt: String,
    replacements: Vec<String>,
}

impl PlaceholderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A map whose markers cannot collide with text already in `input`.
    pub fn for_input(input: &str) -> Self {
        Self {
            salt: salt_for(input, &[MACRO_WORD]),
            replacements: Vec::new(),
        }
    }

    /// Store `replacement` and return the marker standing in for it.
    pub fn insert(&mut self, replacement: String) -> String {
        let id = self.replacements.len();
        self.replacements.push(replacement);
        marker(&self.salt, MACRO_WORD, id)
    }

    pub fn len(&self) -> usize {
        self.replacements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }

    /// Replace every marker in `document`. Replacements are finalised in
    /// ascending ID order, each substituting the already-final replacements of
    /// lower IDs, so nested markers resolve in one pass. A marker the engine
    /// wrapped in a paragraph loses the wrapper.
    pub fn resolve(&self, document: &str) -> String {
        let mut resolved: Vec<String> = Vec::with_capacity(self.replacements.len());
        for (id, replacement) in self.replacements.iter().enumerate() {
            let done = self.substitute(replacement, |other| (other < id).then(|| resolved[other].as_str()));
            resolved.push(done);
        }
        self.substitute(document, |id| resolved.get(id).map(String::as_str))
    }

    fn substitute<'r, F>(&self, text: &str, lookup: F) -> String
    where
        F: Fn(usize) -> Option<&'r str>,
    {
        MACRO_TOKEN
            .replace_all(text, |caps: &Captures| {
                let (salt, id) = match (caps.get(1), caps.get(2)) {
                    (Some(salt), Some(id)) => (salt, id),
                    _ => match (caps.get(3), caps.get(4)) {
                        (Some(salt), Some(id)) => (salt, id),
                        _ => return caps[0].to_string(),
                    },
                };
                let replacement = (salt.as_str() == self.salt)
                    .then(|| id.as_str().parse::<usize>().ok())
                    .flatten()
                    .and_then(&lookup);
                match replacement {
                    Some(replacement) => replacement.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

/// Bracket open/close strings keyed by marker ID.
#[derive(Debug, Default)]
pub struct MarkerPairs {
    salt: String,
    pairs: Vec<(String, Option<String>)>,
}

impl MarkerPairs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairs whose markers cannot collide with text already in `input`.
    pub fn for_input(input: &str) -> Self {
        Self {
            salt: salt_for(input, &[OPEN_WORD, CLOSE_WORD]),
            pairs: Vec::new(),
        }
    }

    /// Store a pair and return its (open, close) markers. Body-less macros
    /// have no close marker.
    pub fn insert(&mut self, open: String, close: Option<String>) -> (String, Option<String>) {
        let id = self.pairs.len();
        let close_marker = close.as_ref().map(|_| marker(&self.salt, CLOSE_WORD, id));
        self.pairs.push((open, close));
        (marker(&self.salt, OPEN_WORD, id), close_marker)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Replace every marker in `document`. No replacement contains a marker,
    /// so order does not matter.
    pub fn resolve(&self, document: &str) -> String {
        PAIR_TOKEN
            .replace_all(document, |caps: &Captures| {
                let pair = (caps[1] == self.salt)
                    .then(|| caps[3].parse::<usize>().ok())
                    .flatten()
                    .and_then(|id| self.pairs.get(id));
                let replacement = match (pair, &caps[2]) {
                    (Some((open, _)), "OPEN") => Some(open.as_str()),
                    (Some((_, close)), _) => close.as_deref(),
                    (None, _) => None,
                };
                replacement.unwrap_or(&caps[0]).to_string()
            })
            .into_owned()
    }
}
