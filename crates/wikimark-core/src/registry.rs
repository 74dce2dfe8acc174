/// How a macro's body content is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    None,
    /// Further markup, possibly containing nested macros.
    RichText,
    /// Opaque text (source code) that is never reinterpreted as markup.
    Literal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacroType {
    pub name: &'static str,
    pub body: BodyKind,
}

impl MacroType {
    pub fn has_body(&self) -> bool {
        self.body != BodyKind::None
    }
}

const MACROS: &[MacroType] = &[
    MacroType { name: "toc", body: BodyKind::None },
    MacroType { name: "info", body: BodyKind::RichText },
    MacroType { name: "warning", body: BodyKind::RichText },
    MacroType { name: "note", body: BodyKind::RichText },
    MacroType { name: "tip", body: BodyKind::RichText },
    MacroType { name: "expand", body: BodyKind::RichText },
    MacroType { name: "code", body: BodyKind::Literal },
];

/// Case-insensitive lookup of a registered macro.
pub fn lookup(name: &str) -> Option<MacroType> {
    MACROS.iter().find(|m| m.name.eq_ignore_ascii_case(name)).copied()
}

/// All registered macros, in registration order.
pub fn all() -> &'static [MacroType] {
    MACROS
}
