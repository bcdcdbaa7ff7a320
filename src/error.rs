use thiserror::Error;

use crate::token::Location;

pub type PugmillResult<T> = std::result::Result<T, PugmillError>;

/// Stable machine-readable codes for lexical errors.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LexErrorCode {
    InconsistentIndentation,
    BracketMismatch,
    NoEndBracket,
    SyntaxError,
    InvalidClassName,
    InvalidId,
    NoCaseExpression,
    NoWhenExpression,
    NoWhileExpression,
    NoEachExpression,
    MalformedEach,
    NoConditionalExpression,
    NoExtendsPath,
    NoIncludePath,
    NoMixinName,
    NoCodeExpression,
    UnexpectedText,
    UnterminatedPipelessText,
}

impl LexErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InconsistentIndentation => "INCONSISTENT_INDENTATION",
            Self::BracketMismatch => "BRACKET_MISMATCH",
            Self::NoEndBracket => "NO_END_BRACKET",
            Self::SyntaxError => "SYNTAX_ERROR",
            Self::InvalidClassName => "INVALID_CLASS_NAME",
            Self::InvalidId => "INVALID_ID",
            Self::NoCaseExpression => "NO_CASE_EXPRESSION",
            Self::NoWhenExpression => "NO_WHEN_EXPRESSION",
            Self::NoWhileExpression => "NO_WHILE_EXPRESSION",
            Self::NoEachExpression => "NO_EACH_EXPRESSION",
            Self::MalformedEach => "MALFORMED_EACH",
            Self::NoConditionalExpression => "NO_CONDITIONAL_EXPRESSION",
            Self::NoExtendsPath => "NO_EXTENDS_PATH",
            Self::NoIncludePath => "NO_INCLUDE_PATH",
            Self::NoMixinName => "NO_MIXIN_NAME",
            Self::NoCodeExpression => "NO_CODE_EXPRESSION",
            Self::UnexpectedText => "UNEXPECTED_TEXT",
            Self::UnterminatedPipelessText => "UNTERMINATED_PIPELESS_TEXT",
        }
    }

    /// True for the codes produced by unbalanced or unterminated brackets.
    pub const fn is_bracket_error(self) -> bool {
        matches!(self, Self::BracketMismatch | Self::NoEndBracket)
    }
}

impl std::fmt::Display for LexErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("{code} at line {line}, column {column}: {message}")]
pub struct LexError {
    pub code: LexErrorCode,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl LexError {
    pub fn new(code: LexErrorCode, message: impl Into<String>, location: Location) -> Self {
        Self {
            code,
            message: message.into(),
            line: location.line,
            column: location.column,
        }
    }

    pub const fn location(&self) -> Location {
        Location::new(self.line, self.column)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum ParseErrorKind {
    #[error("Expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },
    #[error("Unexpected end of input{expected_what}")]
    UnexpectedEOF {
        /// Describes what was expected, e.g., " (expected 'outdent')"
        expected_what: String,
    },
    #[error("`else` cannot have a condition, perhaps you meant `else if`")]
    ElseWithCondition,
    #[error("Invalid expression `{expression}`: {message}")]
    InvalidExpression { expression: String, message: String },
    #[error("Duplicate attribute \"{name}\" is not allowed")]
    DuplicateAttribute { name: String },
    #[error("Anonymous blocks are not allowed unless they are part of a mixin")]
    BlockOutsideMixin,
    #[error("Self-closing tag <{tag}/> cannot have content")]
    SelfClosingContent { tag: String },
    #[error("Code cannot be followed by an indented block")]
    CodeWithBlock,
    #[error("{0}")]
    Message(String),
}

impl ParseErrorKind {
    pub fn unexpected_eof(expected: Option<&str>) -> Self {
        Self::UnexpectedEOF {
            expected_what: expected.map_or_else(String::new, |e| format!(" (expected '{e}')")),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("Parse error at line {line}, column {column}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    #[source]
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub const fn new(kind: ParseErrorKind, location: Location) -> Self {
        Self {
            line: location.line,
            column: location.column,
            kind,
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum LinkErrorKind {
    #[error(
        "EXTENDS_NOT_FIRST: declaration of template inheritance (\"extends\") should be the first thing in the file, and there can only be one"
    )]
    ExtendsNotFirst,
    #[error(
        "UNEXPECTED_NODES_IN_EXTENDING_ROOT: only named blocks and mixins can appear at the top level of an extending template, found {node}"
    )]
    UnexpectedNodesInExtendingRoot { node: String },
    #[error("could not resolve template path \"{target}\"")]
    UnresolvedPath { target: String },
    #[error("circular reference to \"{target}\" through extends/include")]
    CircularReference { target: String },
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("Link error in {path} at line {line}, column {column}: {kind}")]
pub struct LinkError {
    pub path: String,
    pub line: usize,
    pub column: usize,
    #[source]
    pub kind: LinkErrorKind,
}

impl LinkError {
    pub fn new(kind: LinkErrorKind, path: &str, location: Location) -> Self {
        Self {
            path: path.to_string(),
            line: location.line,
            column: location.column,
            kind,
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum RenderError {
    #[error("Mixin \"{name}\" is not defined (line {line}, column {column})")]
    UndefinedMixin {
        name: String,
        line: usize,
        column: usize,
    },
    #[error("Filter \"{name}\" is not registered (line {line}, column {column})")]
    UnknownFilter {
        name: String,
        line: usize,
        column: usize,
    },
    #[error("`while` loop exceeded {limit} iterations (line {line}, column {column})")]
    IterationLimit {
        limit: usize,
        line: usize,
        column: usize,
    },
    #[error("Mixin calls nested deeper than {limit} (line {line}, column {column})")]
    CallDepth {
        limit: usize,
        line: usize,
        column: usize,
    },
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum PugmillError {
    #[error("Template already exists: {template_name}")]
    TemplateExists { template_name: String },
    #[error("Template not found: {template_name}")]
    MissingTemplate { template_name: String },
    #[error("Failed to read template {path}: {message}")]
    Io { path: String, message: String },
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("Rendering error: {0}")]
    Render(#[from] RenderError),
    #[error("In {path}: {source}")]
    Included {
        path: String,
        #[source]
        source: Box<PugmillError>,
    },
}

impl PugmillError {
    /// Attaches the template path a failure happened in, unless it already has one.
    pub fn in_template(self, path: &str) -> Self {
        match self {
            Self::Included { .. } | Self::Link(_) => self,
            Self::TemplateExists { .. }
            | Self::MissingTemplate { .. }
            | Self::Io { .. }
            | Self::Lex(_)
            | Self::Parse(_)
            | Self::Render(_) => Self::Included {
                path: path.to_string(),
                source: Box::new(self),
            },
        }
    }

    /// The innermost error, looking through `Included` wrappers.
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Included { source, .. } => source.root_cause(),
            Self::TemplateExists { .. }
            | Self::MissingTemplate { .. }
            | Self::Io { .. }
            | Self::Lex(_)
            | Self::Parse(_)
            | Self::Link(_)
            | Self::Render(_) => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_lex_error_display() {
        let err = LexError::new(
            LexErrorCode::NoEndBracket,
            "The end of the string reached with no closing bracket } found.",
            Location::new(3, 7),
        );
        assert_eq!(
            err.to_string(),
            "NO_END_BRACKET at line 3, column 7: The end of the string reached with no closing bracket } found."
        );
        assert!(err.code.is_bracket_error());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_error_display() {
        let err = ParseError::new(ParseErrorKind::ElseWithCondition, Location::new(4, 1));
        assert_eq!(
            err.to_string(),
            "Parse error at line 4, column 1: `else` cannot have a condition, perhaps you meant `else if`"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_included_wrapping() {
        let err: PugmillError =
            ParseError::new(ParseErrorKind::BlockOutsideMixin, Location::new(1, 1)).into();
        let wrapped = err.clone().in_template("partials/nav.pug");
        assert!(wrapped.to_string().starts_with("In partials/nav.pug: "));
        assert_eq!(wrapped.root_cause(), &err);
        // Wrapping twice keeps the innermost path.
        let again = wrapped.clone().in_template("layout.pug");
        assert_eq!(again, wrapped);
    }
}
