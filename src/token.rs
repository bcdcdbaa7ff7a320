/// A 1-based position in the normalized template source.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// How an overriding `block` combines with the block it overrides.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum BlockMode {
    #[default]
    Replace,
    Append,
    Prepend,
}

/// A single attribute as written inside `(...)`.
///
/// `value` is the raw expression source; `None` means a bare boolean attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub name: String,
    pub value: Option<String>,
    pub must_escape: bool,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Tag(String),
    Id(String),
    Class(String),
    /// Plain text; may still contain `#{}`, `!{}` and `#[]` markers.
    Text(String),
    /// A line starting with `<`, emitted verbatim.
    TextHtml(String),
    Comment {
        text: String,
        buffer: bool,
    },
    Doctype(Option<String>),
    StartAttributes,
    Attribute(RawAttribute),
    EndAttributes,
    /// `&attributes(expr)`
    AttributesSpread(String),
    /// `#{expr}` in tag position.
    Interpolation(String),
    Code {
        source: String,
        buffer: bool,
        must_escape: bool,
    },
    /// A lone `-` introducing a pipeless block of statements.
    BlockCode,
    If(String),
    Unless(String),
    ElseIf(String),
    /// `else`; a trailing condition is kept so the parser can reject it.
    Else(Option<String>),
    Case(String),
    When(String),
    Default,
    Each {
        value: String,
        key: Option<String>,
        source: String,
    },
    EachOf {
        value: String,
        source: String,
    },
    While(String),
    Mixin {
        name: String,
        params: Option<String>,
    },
    /// `+name(args)` or `+#{expr}(args)`.
    Call {
        name: String,
        interpolated: bool,
        args: Option<String>,
    },
    Block {
        name: String,
        mode: BlockMode,
    },
    /// A bare `block` inside a mixin body.
    MixinBlock,
    Yield,
    Extends,
    Include {
        filter: Option<String>,
    },
    Path(String),
    Filter(String),
    Indent(usize),
    Outdent,
    Newline,
    Eos,
    StartPipelessText,
    EndPipelessText,
    Slash,
    Colon,
    Dot,
}

impl TokenKind {
    /// Short human name used in parse errors.
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::Tag(_) => "tag",
            Self::Id(_) => "id",
            Self::Class(_) => "class",
            Self::Text(_) => "text",
            Self::TextHtml(_) => "text-html",
            Self::Comment { .. } => "comment",
            Self::Doctype(_) => "doctype",
            Self::StartAttributes => "start-attributes",
            Self::Attribute(_) => "attribute",
            Self::EndAttributes => "end-attributes",
            Self::AttributesSpread(_) => "&attributes",
            Self::Interpolation(_) => "interpolation",
            Self::Code { .. } => "code",
            Self::BlockCode => "blockcode",
            Self::If(_) => "if",
            Self::Unless(_) => "unless",
            Self::ElseIf(_) => "else-if",
            Self::Else(_) => "else",
            Self::Case(_) => "case",
            Self::When(_) => "when",
            Self::Default => "default",
            Self::Each { .. } => "each",
            Self::EachOf { .. } => "each-of",
            Self::While(_) => "while",
            Self::Mixin { .. } => "mixin",
            Self::Call { .. } => "call",
            Self::Block { .. } => "block",
            Self::MixinBlock => "mixin-block",
            Self::Yield => "yield",
            Self::Extends => "extends",
            Self::Include { .. } => "include",
            Self::Path(_) => "path",
            Self::Filter(_) => "filter",
            Self::Indent(_) => "indent",
            Self::Outdent => "outdent",
            Self::Newline => "newline",
            Self::Eos => "eos",
            Self::StartPipelessText => "start-pipeless-text",
            Self::EndPipelessText => "end-pipeless-text",
            Self::Slash => "slash",
            Self::Colon => "colon",
            Self::Dot => "dot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: Location,
}

impl Token {
    pub const fn new(kind: TokenKind, location: Location) -> Self {
        Self { kind, location }
    }
}
