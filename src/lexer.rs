use std::borrow::Cow;
use std::cmp::Ordering;

use tracing::{debug, trace};

use crate::brackets::{BracketError, BracketErrorKind, BracketState, scan_balanced};
use crate::error::{LexError, LexErrorCode};
use crate::token::{BlockMode, Location, RawAttribute, Token, TokenKind};

type LexResult<T> = Result<T, LexError>;

/// Strips a leading BOM and turns `\r\n` and lone `\r` into `\n`.
pub fn normalize(source: &str) -> Cow<'_, str> {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    if source.contains('\r') {
        Cow::Owned(source.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(source)
    }
}

/// Tokenizes a whole template.
pub fn lex(source: &str) -> LexResult<Vec<Token>> {
    let normalized = normalize(source);
    let tokens = Lexer::new(&normalized).tokenize()?;
    debug!(tokens = tokens.len(), "lexed template");
    Ok(tokens)
}

/// Tokenizes a fragment that starts at `origin` in some enclosing source,
/// such as the body of a `#[...]` tag interpolation.
pub fn lex_at(source: &str, origin: Location) -> LexResult<Vec<Token>> {
    Lexer::with_origin(source, origin).tokenize()
}

const fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Length of the leading `[-\w]*` run.
fn word_len(s: &str) -> usize {
    s.find(|c: char| !(is_word(c) || c == '-'))
        .unwrap_or(s.len())
}

fn has_name_start(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_alphabetic() || c == '_')
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Characters that, next to whitespace inside an attribute value, mean the
/// expression carries on past the whitespace.
const fn is_operator_char(c: char) -> bool {
    matches!(
        c,
        '+' | '-' | '*' | '/' | '%' | '?' | ':' | '<' | '>' | '=' | '&' | '|' | '.'
    )
}

/// Mixin call parentheses hold attributes rather than arguments when they
/// open with `name=`.
fn looks_like_attributes(content: &str) -> bool {
    let content = content.trim_start();
    let name = word_len(content);
    if name == 0 {
        return false;
    }
    let after = content[name..].trim_start_matches(' ');
    (after.starts_with('=') && !after.starts_with("==")) || after.starts_with("!=")
}

fn bracket_lex_error(err: BracketError, location: Location) -> LexError {
    match err.kind {
        BracketErrorKind::Mismatch => LexError::new(
            LexErrorCode::BracketMismatch,
            "The closing bracket does not match the innermost open bracket.",
            location,
        ),
        BracketErrorKind::Unterminated => LexError::new(
            LexErrorCode::NoEndBracket,
            "The end of the string was reached with no closing bracket found.",
            location,
        ),
        BracketErrorKind::NewlineInString => LexError::new(
            LexErrorCode::SyntaxError,
            "Unexpected newline inside a quoted string.",
            location,
        ),
    }
}

/// Checks every `#{`, `!{` and `#[` marker in a line of text for balanced
/// brackets. Escaped markers are skipped.
fn check_interpolation_markers(text: &str, location: Location) -> LexResult<()> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' && (text[i + 1..].starts_with("#{") || text[i + 1..].starts_with("!{") || text[i + 1..].starts_with("#[")) {
            i += 3;
            continue;
        }
        let open = match (b, bytes.get(i + 1)) {
            (b'#' | b'!', Some(b'{')) => '{',
            (b'#', Some(b'[')) => '[',
            _ => {
                i += 1;
                continue;
            }
        };
        let start = i + 2;
        let close = scan_balanced(&text[start..], open).map_err(|e| {
            bracket_lex_error(
                e,
                Location::new(location.line, location.column + start + e.offset),
            )
        })?;
        i = start + close + 1;
    }
    Ok(())
}

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    /// Current line number (1-indexed, relative to `origin`)
    line: usize,
    /// Byte offset where the current line starts
    line_start_pos: usize,
    origin: Location,
    indent_stack: Vec<usize>,
    /// Tabs or spaces, fixed by the first indented line.
    indent_char: Option<char>,
    tokens: Vec<Token>,
    ended: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self::with_origin(input, Location::new(1, 1))
    }

    pub fn with_origin(input: &'a str, origin: Location) -> Self {
        Lexer {
            input,
            pos: 0,
            line: 1,
            line_start_pos: 0,
            origin,
            indent_stack: vec![0],
            indent_char: None,
            tokens: Vec::new(),
            ended: false,
        }
    }

    pub fn tokenize(mut self) -> LexResult<Vec<Token>> {
        self.skip_leading_blank_lines();
        while !self.ended {
            self.advance_token()?;
        }
        Ok(self.tokens)
    }

    // --- Cursor helpers ---

    #[inline]
    fn column_at(&self, line: usize, line_start: usize, pos: usize) -> usize {
        if line == 1 {
            self.origin.column + pos - line_start
        } else {
            pos - line_start + 1
        }
    }

    #[inline]
    fn location(&self) -> Location {
        Location::new(
            self.origin.line + self.line - 1,
            self.column_at(self.line, self.line_start_pos, self.pos),
        )
    }

    /// Location of an absolute byte offset at or after the cursor.
    fn location_at(&self, offset: usize) -> Location {
        let end = offset.min(self.input.len());
        let mut line = self.line;
        let mut line_start = self.line_start_pos;
        if end > self.pos {
            for (i, c) in self.input[self.pos..end].char_indices() {
                if c == '\n' {
                    line += 1;
                    line_start = self.pos + i + 1;
                }
            }
        }
        Location::new(
            self.origin.line + line - 1,
            self.column_at(line, line_start, end),
        )
    }

    #[inline]
    fn make_error(&self, code: LexErrorCode, message: impl Into<String>) -> LexError {
        LexError::new(code, message, self.location())
    }

    fn bracket_error(&self, err: BracketError, base: usize) -> LexError {
        bracket_lex_error(err, self.location_at(base + err.offset))
    }

    #[inline]
    fn advance_by_char(&mut self, current_char: char, char_len: usize) {
        if current_char == '\n' {
            self.line += 1;
            self.line_start_pos = self.pos + char_len;
        }
        self.pos += char_len;
    }

    /// Advances `len` bytes that are known not to contain a newline.
    #[inline]
    fn advance_bytes(&mut self, len: usize) {
        self.pos += len;
    }

    /// Advances to an absolute offset, tracking any newlines on the way.
    fn advance_to(&mut self, target: usize) {
        while self.pos < target {
            let Some(c) = self.rest().chars().next() else {
                break;
            };
            self.advance_by_char(c, c.len_utf8());
        }
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn rest_of_line(&self) -> &'a str {
        let rest = self.rest();
        &rest[..rest.find('\n').unwrap_or(rest.len())]
    }

    fn peek(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    /// Peeks a keyword followed by a word boundary.
    fn peek_keyword(&self, keyword: &str) -> bool {
        self.peek(keyword)
            && !self.rest()[keyword.len()..].starts_with(|c: char| is_word(c) || c == '-')
    }

    /// Consume `s` if the remaining input starts with it.
    /// Assumes `s` does not contain newlines.
    fn consume(&mut self, s: &str) -> bool {
        if self.peek(s) {
            self.advance_bytes(s.len());
            true
        } else {
            false
        }
    }

    fn consume_spaces(&mut self) {
        let rest = self.rest();
        let len = rest.len() - rest.trim_start_matches([' ', '\t']).len();
        self.advance_bytes(len);
    }

    fn consume_line(&mut self) {
        let len = self.rest_of_line().len();
        self.advance_bytes(len);
    }

    fn current_indent(&self) -> usize {
        self.indent_stack.last().copied().unwrap_or(0)
    }

    fn push(&mut self, kind: TokenKind, location: Location) {
        self.tokens.push(Token::new(kind, location));
    }

    fn push_text(&mut self, text: &str, location: Location) -> LexResult<()> {
        check_interpolation_markers(text, location)?;
        self.push(TokenKind::Text(text.to_string()), location);
        Ok(())
    }

    fn skip_leading_blank_lines(&mut self) {
        loop {
            let line = self.rest_of_line();
            if !line.trim().is_empty() || self.pos + line.len() >= self.input.len() {
                break;
            }
            self.advance_bytes(line.len());
            self.advance_by_char('\n', 1);
        }
        self.consume_spaces();
    }

    fn advance_token(&mut self) -> LexResult<()> {
        let scanners: [fn(&mut Self) -> LexResult<bool>; 31] = [
            Self::scan_eos,
            Self::scan_newline,
            Self::scan_yield,
            Self::scan_doctype,
            Self::scan_interpolation,
            Self::scan_case,
            Self::scan_when,
            Self::scan_default,
            Self::scan_extends,
            Self::scan_block,
            Self::scan_include,
            Self::scan_mixin,
            Self::scan_call,
            Self::scan_conditional,
            Self::scan_each,
            Self::scan_while,
            Self::scan_tag,
            Self::scan_filter,
            Self::scan_block_code,
            Self::scan_code,
            Self::scan_id,
            Self::scan_dot,
            Self::scan_class,
            Self::scan_attrs,
            Self::scan_attributes_spread,
            Self::scan_text,
            Self::scan_text_html,
            Self::scan_comment,
            Self::scan_slash,
            Self::scan_colon,
            Self::fail,
        ];
        for scanner in scanners {
            if scanner(self)? {
                return Ok(());
            }
        }
        Ok(())
    }

    // --- Scanners ---

    fn scan_eos(&mut self) -> LexResult<bool> {
        if !self.eof() {
            return Ok(false);
        }
        let location = self.location();
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.push(TokenKind::Outdent, location);
        }
        self.push(TokenKind::Eos, location);
        self.ended = true;
        Ok(true)
    }

    fn measure_indent(&mut self, indent: &str) -> LexResult<usize> {
        let Some(first) = indent.chars().next() else {
            return Ok(0);
        };
        let expected = *self.indent_char.get_or_insert(first);
        if indent.chars().any(|c| c != expected) {
            return Err(self.make_error(
                LexErrorCode::InconsistentIndentation,
                "Invalid indentation, you can use tabs or spaces but not both",
            ));
        }
        Ok(indent.len())
    }

    fn scan_newline(&mut self) -> LexResult<bool> {
        if !self.peek("\n") {
            return Ok(false);
        }
        loop {
            self.advance_by_char('\n', 1);
            let line = self.rest_of_line();
            if line.trim().is_empty() {
                self.advance_bytes(line.len());
                if self.peek("\n") {
                    continue;
                }
                // Trailing blank lines; the end-of-stream scanner takes over.
                return Ok(true);
            }
            break;
        }

        let line = self.rest_of_line();
        let indent = &line[..line.len() - line.trim_start_matches([' ', '\t']).len()];
        let width = self.measure_indent(indent)?;
        self.advance_bytes(indent.len());
        let location = self.location();

        match width.cmp(&self.current_indent()) {
            Ordering::Greater => {
                trace!(line = location.line, width, "indent");
                self.indent_stack.push(width);
                self.push(TokenKind::Indent(width), location);
            }
            Ordering::Less => {
                while self.current_indent() > width {
                    self.indent_stack.pop();
                    trace!(line = location.line, width, "outdent");
                    self.push(TokenKind::Outdent, location);
                }
                if self.current_indent() != width {
                    return Err(LexError::new(
                        LexErrorCode::InconsistentIndentation,
                        format!(
                            "Inconsistent indentation. Expecting either {} or {} spaces/tabs.",
                            self.current_indent(),
                            width
                        ),
                        location,
                    ));
                }
            }
            Ordering::Equal => self.push(TokenKind::Newline, location),
        }
        Ok(true)
    }

    fn scan_yield(&mut self) -> LexResult<bool> {
        if !self.peek_keyword("yield") {
            return Ok(false);
        }
        let location = self.location();
        self.consume("yield");
        self.push(TokenKind::Yield, location);
        Ok(true)
    }

    fn scan_doctype(&mut self) -> LexResult<bool> {
        if !self.peek_keyword("doctype") {
            return Ok(false);
        }
        let location = self.location();
        self.consume("doctype");
        let value = self.rest_of_line().trim();
        self.consume_line();
        let value = (!value.is_empty()).then(|| value.to_string());
        self.push(TokenKind::Doctype(value), location);
        Ok(true)
    }

    fn scan_interpolation(&mut self) -> LexResult<bool> {
        if !self.peek("#{") {
            return Ok(false);
        }
        let location = self.location();
        let start = self.pos + 2;
        let close = scan_balanced(&self.input[start..], '{')
            .map_err(|e| self.bracket_error(e, start))?;
        let expr = self.input[start..start + close].trim();
        self.advance_to(start + close + 1);
        self.push(TokenKind::Interpolation(expr.to_string()), location);
        Ok(true)
    }

    /// `keyword expr` where the expression runs to the end of the line.
    fn scan_keyword_expression(
        &mut self,
        keyword: &str,
        code: LexErrorCode,
        kind: fn(String) -> TokenKind,
    ) -> LexResult<bool> {
        if !self.peek_keyword(keyword) {
            return Ok(false);
        }
        let location = self.location();
        self.consume(keyword);
        let expr = self.rest_of_line().trim();
        if expr.is_empty() {
            return Err(LexError::new(
                code,
                format!("`{keyword}` requires an expression"),
                location,
            ));
        }
        self.consume_line();
        self.push(kind(expr.to_string()), location);
        Ok(true)
    }

    fn scan_case(&mut self) -> LexResult<bool> {
        self.scan_keyword_expression("case", LexErrorCode::NoCaseExpression, TokenKind::Case)
    }

    fn scan_while(&mut self) -> LexResult<bool> {
        self.scan_keyword_expression("while", LexErrorCode::NoWhileExpression, TokenKind::While)
    }

    fn scan_when(&mut self) -> LexResult<bool> {
        if !self.peek_keyword("when") {
            return Ok(false);
        }
        let location = self.location();
        self.consume("when");
        self.consume_spaces();

        // The expression stops at a top-level `:` that starts a block expansion.
        let line = self.rest_of_line();
        let mut state = BracketState::new();
        let mut end = line.len();
        let mut prev = ' ';
        for (i, c) in line.char_indices() {
            if c == ':'
                && !state.is_nested()
                && !prev.is_whitespace()
                && line[i + 1..].chars().next().is_none_or(char::is_whitespace)
            {
                end = i;
                break;
            }
            state
                .feed(c, i)
                .map_err(|e| self.bracket_error(e, self.pos))?;
            prev = c;
        }

        let expr = line[..end].trim();
        if expr.is_empty() {
            return Err(LexError::new(
                LexErrorCode::NoWhenExpression,
                "`when` requires an expression",
                location,
            ));
        }
        self.advance_bytes(end);
        self.push(TokenKind::When(expr.to_string()), location);
        Ok(true)
    }

    fn scan_default(&mut self) -> LexResult<bool> {
        if !self.peek_keyword("default") {
            return Ok(false);
        }
        let location = self.location();
        self.consume("default");
        self.push(TokenKind::Default, location);
        Ok(true)
    }

    /// The rest of the line as a path; emits a `Path` token.
    fn scan_path(&mut self, code: LexErrorCode, keyword: &str) -> LexResult<()> {
        self.consume_spaces();
        let location = self.location();
        let path = self.rest_of_line().trim();
        if path.is_empty() {
            return Err(LexError::new(
                code,
                format!("missing path for {keyword}"),
                location,
            ));
        }
        self.consume_line();
        self.push(TokenKind::Path(path.to_string()), location);
        Ok(())
    }

    fn scan_extends(&mut self) -> LexResult<bool> {
        let keyword = if self.peek_keyword("extends") {
            "extends"
        } else if self.peek_keyword("extend") {
            "extend"
        } else {
            return Ok(false);
        };
        let location = self.location();
        self.consume(keyword);
        self.push(TokenKind::Extends, location);
        self.scan_path(LexErrorCode::NoExtendsPath, "extends")?;
        Ok(true)
    }

    fn peek_block_mode(&self) -> Option<(&'static str, BlockMode)> {
        let (keyword, mode) = if self.peek_keyword("append") {
            ("append", BlockMode::Append)
        } else if self.peek_keyword("prepend") {
            ("prepend", BlockMode::Prepend)
        } else {
            return None;
        };
        // `append` with nothing after it is a plain tag name.
        let name = self.rest_of_line()[keyword.len()..].trim();
        (!name.is_empty()).then_some((keyword, mode))
    }

    fn scan_block(&mut self) -> LexResult<bool> {
        let location = self.location();
        if let Some((keyword, mode)) = self.peek_block_mode() {
            self.consume(keyword);
            let name = self.rest_of_line().trim();
            self.consume_line();
            self.push(
                TokenKind::Block {
                    name: name.to_string(),
                    mode,
                },
                location,
            );
            return Ok(true);
        }

        if !self.peek_keyword("block") {
            return Ok(false);
        }
        self.consume("block");
        if self.rest_of_line().trim().is_empty() {
            self.consume_line();
            self.push(TokenKind::MixinBlock, location);
            return Ok(true);
        }

        self.consume_spaces();
        let mode = match self.peek_block_mode() {
            Some((keyword, mode)) => {
                self.consume(keyword);
                mode
            }
            None => BlockMode::Replace,
        };
        let name = self.rest_of_line().trim();
        self.consume_line();
        self.push(
            TokenKind::Block {
                name: name.to_string(),
                mode,
            },
            location,
        );
        Ok(true)
    }

    fn scan_include(&mut self) -> LexResult<bool> {
        if !self.peek_keyword("include") {
            return Ok(false);
        }
        let location = self.location();
        self.consume("include");
        let filter = if self.consume(":") {
            let len = word_len(self.rest());
            let name = &self.rest()[..len];
            self.advance_bytes(len);
            Some(name.to_string())
        } else {
            None
        };
        self.push(TokenKind::Include { filter }, location);
        self.scan_path(LexErrorCode::NoIncludePath, "include")?;
        Ok(true)
    }

    /// Balanced `( ... )` content at the cursor, with the cursor moved past it.
    fn scan_parenthesized(&mut self) -> LexResult<&'a str> {
        let start = self.pos + 1;
        let close = scan_balanced(&self.input[start..], '(')
            .map_err(|e| self.bracket_error(e, start))?;
        let content = &self.input[start..start + close];
        self.advance_to(start + close + 1);
        Ok(content)
    }

    fn scan_mixin(&mut self) -> LexResult<bool> {
        if !self.peek_keyword("mixin") {
            return Ok(false);
        }
        let location = self.location();
        self.consume("mixin");
        self.consume_spaces();
        let len = word_len(self.rest());
        if len == 0 {
            return Err(LexError::new(
                LexErrorCode::NoMixinName,
                "`mixin` requires a name",
                location,
            ));
        }
        let name = &self.rest()[..len];
        self.advance_bytes(len);
        self.consume_spaces();
        let params = if self.peek("(") {
            Some(self.scan_parenthesized()?.trim().to_string())
        } else {
            None
        };
        self.push(
            TokenKind::Mixin {
                name: name.to_string(),
                params,
            },
            location,
        );
        Ok(true)
    }

    fn scan_call(&mut self) -> LexResult<bool> {
        if !self.peek("+") {
            return Ok(false);
        }
        let location = self.location();
        self.advance_bytes(1);
        self.consume_spaces();

        let (name, interpolated) = if self.peek("#{") {
            let start = self.pos + 2;
            let close = scan_balanced(&self.input[start..], '{')
                .map_err(|e| self.bracket_error(e, start))?;
            let expr = self.input[start..start + close].trim();
            self.advance_to(start + close + 1);
            (expr, true)
        } else {
            let len = word_len(self.rest());
            if len == 0 {
                return Err(LexError::new(
                    LexErrorCode::NoMixinName,
                    "mixin call requires a name",
                    location,
                ));
            }
            let name = &self.rest()[..len];
            self.advance_bytes(len);
            (name, false)
        };

        let mut args = None;
        if self.peek("(") {
            let start = self.pos + 1;
            let close = scan_balanced(&self.input[start..], '(')
                .map_err(|e| self.bracket_error(e, start))?;
            let content = &self.input[start..start + close];
            if !looks_like_attributes(content) {
                args = Some(content.trim().to_string());
                self.advance_to(start + close + 1);
            }
        }

        self.push(
            TokenKind::Call {
                name: name.to_string(),
                interpolated,
                args,
            },
            location,
        );
        Ok(true)
    }

    fn scan_conditional(&mut self) -> LexResult<bool> {
        if self.peek_keyword("else") {
            let location = self.location();
            self.consume("else");
            self.consume_spaces();
            if self.peek_keyword("if") {
                self.consume("if");
                let expr = self.rest_of_line().trim();
                if expr.is_empty() {
                    return Err(LexError::new(
                        LexErrorCode::NoConditionalExpression,
                        "`else if` requires an expression",
                        location,
                    ));
                }
                self.consume_line();
                self.push(TokenKind::ElseIf(expr.to_string()), location);
            } else {
                let rest = self.rest_of_line().trim();
                let condition = if rest.is_empty() || rest.starts_with(':') {
                    None
                } else {
                    self.consume_line();
                    Some(rest.to_string())
                };
                self.push(TokenKind::Else(condition), location);
            }
            return Ok(true);
        }

        Ok(self.scan_keyword_expression(
            "if",
            LexErrorCode::NoConditionalExpression,
            TokenKind::If,
        )? || self.scan_keyword_expression(
            "unless",
            LexErrorCode::NoConditionalExpression,
            TokenKind::Unless,
        )?)
    }

    fn scan_each(&mut self) -> LexResult<bool> {
        let keyword = if self.peek_keyword("each") {
            "each"
        } else if self.peek_keyword("for") {
            "for"
        } else {
            return Ok(false);
        };
        let location = self.location();
        self.consume(keyword);
        let body = self.rest_of_line().trim();
        if body.is_empty() {
            return Err(LexError::new(
                LexErrorCode::NoEachExpression,
                format!("`{keyword}` requires an expression"),
                location,
            ));
        }
        self.consume_line();

        let malformed = || {
            LexError::new(
                LexErrorCode::MalformedEach,
                format!("malformed {keyword} statement: `{keyword} {body}`"),
                location,
            )
        };

        let value_len = body
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
            .unwrap_or(body.len());
        let value = &body[..value_len];
        if !is_identifier(value) {
            return Err(malformed());
        }

        let mut rest = body[value_len..].trim_start();
        let mut key = None;
        if let Some(after_comma) = rest.strip_prefix(',') {
            let after_comma = after_comma.trim_start();
            let key_len = after_comma
                .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
                .unwrap_or(after_comma.len());
            let name = &after_comma[..key_len];
            if !is_identifier(name) {
                return Err(malformed());
            }
            key = Some(name.to_string());
            rest = after_comma[key_len..].trim_start();
        }

        let is_keyword = |s: &str, kw: &str| {
            s.starts_with(kw) && s[kw.len()..].chars().next().is_none_or(char::is_whitespace)
        };
        let of = if is_keyword(rest, "in") {
            false
        } else if is_keyword(rest, "of") {
            true
        } else {
            return Err(malformed());
        };

        let source = rest[2..].trim();
        if source.is_empty() {
            return Err(LexError::new(
                LexErrorCode::NoEachExpression,
                format!("`{keyword}` requires a collection to iterate"),
                location,
            ));
        }

        let kind = if of {
            if key.is_some() {
                return Err(malformed());
            }
            TokenKind::EachOf {
                value: value.to_string(),
                source: source.to_string(),
            }
        } else {
            TokenKind::Each {
                value: value.to_string(),
                key,
                source: source.to_string(),
            }
        };
        self.push(kind, location);
        Ok(true)
    }

    fn scan_tag(&mut self) -> LexResult<bool> {
        let rest = self.rest();
        if !rest.starts_with(is_word) {
            return Ok(false);
        }
        let len = rest
            .find(|c: char| !(is_word(c) || c == '-' || c == ':'))
            .unwrap_or(rest.len());
        let name = rest[..len].trim_end_matches(['-', ':']);
        let location = self.location();
        self.advance_bytes(name.len());
        self.push(TokenKind::Tag(name.to_string()), location);
        Ok(true)
    }

    fn scan_filter(&mut self) -> LexResult<bool> {
        if !self.peek(":") {
            return Ok(false);
        }
        let len = word_len(&self.rest()[1..]);
        if len == 0 {
            return Ok(false);
        }
        let location = self.location();
        let name = &self.rest()[1..=len];
        self.advance_bytes(len + 1);
        self.push(TokenKind::Filter(name.to_string()), location);
        self.scan_attrs()?;
        if self.rest_of_line().trim().is_empty() {
            self.consume_line();
            self.scan_pipeless_text(false)?;
        }
        Ok(true)
    }

    fn scan_block_code(&mut self) -> LexResult<bool> {
        if !self.peek("-") || !self.rest_of_line()[1..].trim().is_empty() {
            return Ok(false);
        }
        let location = self.location();
        self.consume_line();
        self.push(TokenKind::BlockCode, location);
        self.scan_pipeless_text(false)?;
        Ok(true)
    }

    fn scan_code(&mut self) -> LexResult<bool> {
        let (flag, buffer, must_escape) = if self.peek("!=") {
            ("!=", true, false)
        } else if self.peek("=") {
            ("=", true, true)
        } else if self.peek("-") {
            ("-", false, false)
        } else {
            return Ok(false);
        };
        let location = self.location();
        self.consume(flag);
        let source = self.rest_of_line().trim();
        if source.is_empty() {
            return Err(LexError::new(
                LexErrorCode::NoCodeExpression,
                format!("`{flag}` requires an expression"),
                location,
            ));
        }
        self.consume_line();
        self.push(
            TokenKind::Code {
                source: source.to_string(),
                buffer,
                must_escape,
            },
            location,
        );
        Ok(true)
    }

    fn scan_id(&mut self) -> LexResult<bool> {
        if !self.peek("#") {
            return Ok(false);
        }
        let location = self.location();
        if self.peek("#[") {
            // A line opening with tag interpolation is plain text.
            let line = self.rest_of_line();
            self.consume_line();
            self.push_text(line, location)?;
            return Ok(true);
        }
        let len = word_len(&self.rest()[1..]);
        let name = &self.rest()[1..=len];
        if !has_name_start(name) {
            return Err(self.make_error(
                LexErrorCode::InvalidId,
                format!("\"{}\" is not a valid ID.", self.rest_of_line()),
            ));
        }
        self.advance_bytes(len + 1);
        self.push(TokenKind::Id(name.to_string()), location);
        Ok(true)
    }

    fn scan_dot(&mut self) -> LexResult<bool> {
        if !self.peek(".") || !self.rest_of_line()[1..].trim().is_empty() {
            return Ok(false);
        }
        let location = self.location();
        self.consume_line();
        self.push(TokenKind::Dot, location);
        self.scan_pipeless_text(true)?;
        Ok(true)
    }

    fn scan_class(&mut self) -> LexResult<bool> {
        if !self.peek(".") {
            return Ok(false);
        }
        let len = word_len(&self.rest()[1..]);
        let name = &self.rest()[1..=len];
        if !has_name_start(name) {
            return Err(self.make_error(
                LexErrorCode::InvalidClassName,
                format!("\"{}\" is not a valid class name.", self.rest_of_line()),
            ));
        }
        let location = self.location();
        self.advance_bytes(len + 1);
        self.push(TokenKind::Class(name.to_string()), location);
        Ok(true)
    }

    fn scan_attrs(&mut self) -> LexResult<bool> {
        if !self.peek("(") {
            return Ok(false);
        }
        let location = self.location();
        let start = self.pos + 1;
        let close = scan_balanced(&self.input[start..], '(')
            .map_err(|e| self.bracket_error(e, start))?;
        let content = &self.input[start..start + close];
        let attributes = self.parse_attributes(content, start)?;

        self.push(TokenKind::StartAttributes, location);
        for attribute in attributes {
            let location = attribute.location;
            self.push(TokenKind::Attribute(attribute), location);
        }
        self.advance_to(start + close + 1);
        let end = self.location();
        self.push(TokenKind::EndAttributes, end);
        Ok(true)
    }

    /// Splits the inside of `( ... )` into attributes.
    fn parse_attributes(&self, content: &str, base: usize) -> LexResult<Vec<RawAttribute>> {
        let skip_separators = |s: &str| {
            s.len() - s.trim_start_matches(|c: char| c.is_whitespace() || c == ',').len()
        };
        let skip_whitespace = |s: &str| s.len() - s.trim_start().len();

        let mut attributes = Vec::new();
        let mut i = 0;
        loop {
            i += skip_separators(&content[i..]);
            if i >= content.len() {
                break;
            }
            let location = self.location_at(base + i);
            let rest = &content[i..];

            let (name, name_len) = match rest.chars().next() {
                Some(quote @ ('\'' | '"')) => {
                    let end = rest[1..].find(quote).ok_or_else(|| {
                        LexError::new(
                            LexErrorCode::SyntaxError,
                            "unterminated quoted attribute name",
                            location,
                        )
                    })?;
                    (&rest[1..=end], end + 2)
                }
                _ => {
                    let len = rest
                        .char_indices()
                        .find(|&(j, c)| {
                            c.is_whitespace()
                                || c == ','
                                || c == '='
                                || (c == '!' && rest[j + 1..].starts_with('='))
                        })
                        .map_or(rest.len(), |(j, _)| j);
                    (&rest[..len], len)
                }
            };
            if name.is_empty() {
                return Err(LexError::new(
                    LexErrorCode::SyntaxError,
                    "expected an attribute name",
                    location,
                ));
            }
            i += name_len;

            let ws = skip_whitespace(&content[i..]);
            let after = &content[i + ws..];
            let must_escape = if after.starts_with("!=") {
                i += ws + 2;
                false
            } else if after.starts_with('=') {
                i += ws + 1;
                true
            } else {
                attributes.push(RawAttribute {
                    name: name.to_string(),
                    value: None,
                    must_escape: true,
                    location,
                });
                continue;
            };

            i += skip_whitespace(&content[i..]);
            let len = self.attribute_value_len(&content[i..], base + i)?;
            let value = content[i..i + len].trim();
            if value.is_empty() {
                return Err(LexError::new(
                    LexErrorCode::SyntaxError,
                    format!("expected a value for attribute \"{name}\""),
                    location,
                ));
            }
            attributes.push(RawAttribute {
                name: name.to_string(),
                value: Some(value.to_string()),
                must_escape,
                location,
            });
            i += len;
        }
        Ok(attributes)
    }

    /// Length of an attribute value expression: it ends at top-level
    /// whitespace or a comma, unless an operator joins it to what follows.
    fn attribute_value_len(&self, src: &str, base: usize) -> LexResult<usize> {
        let mut state = BracketState::new();
        let mut last = None;
        for (i, c) in src.char_indices() {
            if !state.is_nested() {
                if c == ',' {
                    return Ok(i);
                }
                if c.is_whitespace() {
                    let next = src[i..].trim_start().chars().next();
                    let continues = last.is_some_and(is_operator_char)
                        || next.is_some_and(|n| is_operator_char(n) && n != '-');
                    if !continues {
                        return Ok(i);
                    }
                    continue;
                }
            }
            state
                .feed(c, i)
                .map_err(|e| self.bracket_error(e, base))?;
            if !c.is_whitespace() {
                last = Some(c);
            }
        }
        Ok(src.len())
    }

    fn scan_attributes_spread(&mut self) -> LexResult<bool> {
        if !self.peek_keyword("&attributes") {
            return Ok(false);
        }
        let location = self.location();
        self.consume("&attributes");
        if !self.peek("(") {
            return Err(self.make_error(
                LexErrorCode::SyntaxError,
                "expected `(` after &attributes",
            ));
        }
        let expr = self.scan_parenthesized()?.trim();
        self.push(TokenKind::AttributesSpread(expr.to_string()), location);
        Ok(true)
    }

    fn scan_text(&mut self) -> LexResult<bool> {
        if self.peek("|") {
            self.advance_bytes(1);
            self.consume(" ");
            let location = self.location();
            let text = self.rest_of_line();
            self.consume_line();
            self.push_text(text, location)?;
            return Ok(true);
        }
        if !self.peek(" ") {
            return Ok(false);
        }
        if self.rest_of_line().trim().is_empty() {
            self.consume_line();
            return Ok(true);
        }
        self.advance_bytes(1);
        let location = self.location();
        let text = self.rest_of_line();
        self.consume_line();
        self.push_text(text, location)?;
        Ok(true)
    }

    fn scan_text_html(&mut self) -> LexResult<bool> {
        if !self.peek("<") {
            return Ok(false);
        }
        let location = self.location();
        let text = self.rest_of_line();
        check_interpolation_markers(text, location)?;
        self.consume_line();
        self.push(TokenKind::TextHtml(text.to_string()), location);
        Ok(true)
    }

    fn scan_comment(&mut self) -> LexResult<bool> {
        if !self.peek("//") {
            return Ok(false);
        }
        let location = self.location();
        self.advance_bytes(2);
        let buffer = !self.consume("-");
        let text = self.rest_of_line();
        self.consume_line();
        self.push(
            TokenKind::Comment {
                text: text.to_string(),
                buffer,
            },
            location,
        );
        self.scan_pipeless_text(false)?;
        Ok(true)
    }

    fn scan_slash(&mut self) -> LexResult<bool> {
        if !self.peek("/") {
            return Ok(false);
        }
        let location = self.location();
        self.advance_bytes(1);
        self.push(TokenKind::Slash, location);
        Ok(true)
    }

    fn scan_colon(&mut self) -> LexResult<bool> {
        if !self.peek(": ") && !self.peek(":\t") {
            return Ok(false);
        }
        let location = self.location();
        self.advance_bytes(1);
        self.consume_spaces();
        self.push(TokenKind::Colon, location);
        Ok(true)
    }

    fn fail(&mut self) -> LexResult<bool> {
        let snippet: String = self.rest().chars().take(5).collect();
        Err(self.make_error(
            LexErrorCode::UnexpectedText,
            format!("unexpected text \"{snippet}\""),
        ))
    }

    /// Captures the lines indented deeper than the current block as raw
    /// text. The cursor must sit at the end of the introducing line.
    fn scan_pipeless_text(&mut self, interpolate: bool) -> LexResult<bool> {
        let rest = self.rest();
        if !rest.starts_with('\n') {
            return Ok(false);
        }
        let top = self.current_indent();

        let mut lines = Vec::new();
        let mut block_lines = 0;
        let mut base = usize::MAX;
        let mut offset = 0;
        while rest[offset..].starts_with('\n') {
            let line_start = offset + 1;
            let line_end = rest[line_start..]
                .find('\n')
                .map_or(rest.len(), |i| line_start + i);
            let line = &rest[line_start..line_end];
            let indent = line.len() - line.trim_start_matches([' ', '\t']).len();
            let blank = line.trim().is_empty();
            if !blank && indent <= top {
                break;
            }
            lines.push((line, blank));
            if !blank {
                base = base.min(indent);
                block_lines = lines.len();
            }
            offset = line_end;
        }
        // Trailing blank lines are left for the newline scanner.
        lines.truncate(block_lines);
        if lines.is_empty() {
            return Ok(false);
        }

        let start = self.location();
        self.push(TokenKind::StartPipelessText, start);
        for (i, (line, blank)) in lines.into_iter().enumerate() {
            self.advance_by_char('\n', 1);
            let location = self.location();
            if i > 0 {
                self.push(TokenKind::Newline, location);
            }
            let text = if blank { "" } else { &line[base..] };
            let text_location = self.location_at(self.pos + if blank { 0 } else { base });
            if interpolate {
                check_interpolation_markers(text, text_location)?;
            }
            self.push(TokenKind::Text(text.to_string()), text_location);
            self.advance_bytes(line.len());
        }
        let end = self.location();
        self.push(TokenKind::EndPipelessText, end);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    fn error(src: &str) -> LexError {
        lex(src).unwrap_err()
    }

    fn text(s: &str) -> TokenKind {
        TokenKind::Text(s.to_string())
    }

    fn tag(s: &str) -> TokenKind {
        TokenKind::Tag(s.to_string())
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_tag_with_text() {
        assert_eq!(kinds("p Hello"), [tag("p"), text("Hello"), TokenKind::Eos]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_input() {
        assert_eq!(kinds(""), [TokenKind::Eos]);
        assert_eq!(kinds("\n\n  \n"), [TokenKind::Eos]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_indentation() {
        assert_eq!(
            kinds("div\n  p\n    span\nfooter"),
            [
                tag("div"),
                TokenKind::Indent(2),
                tag("p"),
                TokenKind::Indent(4),
                tag("span"),
                TokenKind::Outdent,
                TokenKind::Outdent,
                tag("footer"),
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_trailing_outdents_and_blank_lines() {
        assert_eq!(
            kinds("ul\n\n  li\n\n    a\n\n"),
            [
                tag("ul"),
                TokenKind::Indent(2),
                tag("li"),
                TokenKind::Indent(4),
                tag("a"),
                TokenKind::Outdent,
                TokenKind::Outdent,
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_inconsistent_indentation() {
        let err = error("div\n    p\n  span");
        assert_eq!(err.code, LexErrorCode::InconsistentIndentation);
        assert_eq!(err.line, 3);

        let err = error("div\n  p\n\tspan");
        assert_eq!(err.code, LexErrorCode::InconsistentIndentation);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_tabs_are_accepted_consistently() {
        assert_eq!(
            kinds("div\n\tp"),
            [tag("div"), TokenKind::Indent(1), tag("p"), TokenKind::Outdent, TokenKind::Eos]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_normalizes_line_endings_and_bom() {
        assert_eq!(
            kinds("\u{feff}div\r\n  p\r  span"),
            kinds("div\n  p\n  span")
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_id_and_classes() {
        assert_eq!(
            kinds("#main.a.b-c text"),
            [
                TokenKind::Id("main".to_string()),
                TokenKind::Class("a".to_string()),
                TokenKind::Class("b-c".to_string()),
                text("text"),
                TokenKind::Eos,
            ]
        );
        assert_eq!(error(".123").code, LexErrorCode::InvalidClassName);
        assert_eq!(error("#1").code, LexErrorCode::InvalidId);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_tag_names() {
        assert_eq!(kinds("svg:rect")[0], tag("svg:rect"));
        assert_eq!(
            kinds("a: img"),
            [tag("a"), TokenKind::Colon, tag("img"), TokenKind::Eos]
        );
        assert_eq!(kinds("my-element/")[..2], [tag("my-element"), TokenKind::Slash]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_attributes() {
        let tokens = kinds(r#"a(href='/x' class="a b", checked data-n=1 + 2 title!=raw)"#);
        let attrs: Vec<(String, Option<String>, bool)> = tokens
            .into_iter()
            .filter_map(|t| match t {
                TokenKind::Attribute(a) => Some((a.name, a.value, a.must_escape)),
                _ => None,
            })
            .collect();
        assert_eq!(
            attrs,
            [
                ("href".to_string(), Some("'/x'".to_string()), true),
                ("class".to_string(), Some("\"a b\"".to_string()), true),
                ("checked".to_string(), None, true),
                ("data-n".to_string(), Some("1 + 2".to_string()), true),
                ("title".to_string(), Some("raw".to_string()), false),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_attributes_span_lines() {
        let tokens = lex("input(\n  type='text'\n  value=name\n)\np").unwrap();
        let value = tokens
            .iter()
            .find(|t| matches!(&t.kind, TokenKind::Attribute(a) if a.name == "value"))
            .unwrap();
        assert_eq!(value.location, Location::new(3, 3));
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Eos);
        assert!(tokens.iter().any(|t| t.kind == tag("p")));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_attribute_errors() {
        assert_eq!(error("a(title='a\nb')").code, LexErrorCode::SyntaxError);
        assert_eq!(error("a(href=f[x)").code, LexErrorCode::BracketMismatch);
        assert_eq!(error("a(href=(x)").code, LexErrorCode::NoEndBracket);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_text_interpolation_brackets() {
        assert_eq!(error("p Hi #{a]}").code, LexErrorCode::BracketMismatch);
        let err = error("p Hi #{a");
        assert_eq!(err.code, LexErrorCode::NoEndBracket);
        assert_eq!(err.line, 1);
        assert_eq!(error("p #[b (x]").code, LexErrorCode::BracketMismatch);
        assert!(lex(r"p not \#{interpolated").is_ok());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_piped_text() {
        assert_eq!(
            kinds("p\n  | one\n  |two\n  |"),
            [
                tag("p"),
                TokenKind::Indent(2),
                text("one"),
                TokenKind::Newline,
                text("two"),
                TokenKind::Newline,
                text(""),
                TokenKind::Outdent,
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_pipeless_text() {
        assert_eq!(
            kinds("script.\n  if (a) {\n    b()\n  }\n\np"),
            [
                tag("script"),
                TokenKind::Dot,
                TokenKind::StartPipelessText,
                text("if (a) {"),
                TokenKind::Newline,
                text("  b()"),
                TokenKind::Newline,
                text("}"),
                TokenKind::EndPipelessText,
                TokenKind::Newline,
                tag("p"),
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_comments() {
        assert_eq!(
            kinds("// visible\n//- hidden\n  body line"),
            [
                TokenKind::Comment {
                    text: " visible".to_string(),
                    buffer: true
                },
                TokenKind::Newline,
                TokenKind::Comment {
                    text: " hidden".to_string(),
                    buffer: false
                },
                TokenKind::StartPipelessText,
                text("body line"),
                TokenKind::EndPipelessText,
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_code() {
        assert_eq!(
            kinds("p= name\n- var x = 1\n!= raw"),
            [
                tag("p"),
                TokenKind::Code {
                    source: "name".to_string(),
                    buffer: true,
                    must_escape: true
                },
                TokenKind::Newline,
                TokenKind::Code {
                    source: "var x = 1".to_string(),
                    buffer: false,
                    must_escape: false
                },
                TokenKind::Newline,
                TokenKind::Code {
                    source: "raw".to_string(),
                    buffer: true,
                    must_escape: false
                },
                TokenKind::Eos,
            ]
        );
        assert_eq!(error("p=").code, LexErrorCode::NoCodeExpression);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_block_code() {
        assert_eq!(
            kinds("-\n  var a = 1\n  a++"),
            [
                TokenKind::BlockCode,
                TokenKind::StartPipelessText,
                text("var a = 1"),
                TokenKind::Newline,
                text("a++"),
                TokenKind::EndPipelessText,
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_conditionals() {
        assert_eq!(
            kinds("if a\nelse if b\nelse\nunless c"),
            [
                TokenKind::If("a".to_string()),
                TokenKind::Newline,
                TokenKind::ElseIf("b".to_string()),
                TokenKind::Newline,
                TokenKind::Else(None),
                TokenKind::Newline,
                TokenKind::Unless("c".to_string()),
                TokenKind::Eos,
            ]
        );
        assert_eq!(kinds("else x")[0], TokenKind::Else(Some("x".to_string())));
        assert_eq!(error("if").code, LexErrorCode::NoConditionalExpression);
        assert_eq!(kinds("iframe")[0], tag("iframe"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_case_when() {
        assert_eq!(
            kinds("case n\n  when 1: p one\n  default"),
            [
                TokenKind::Case("n".to_string()),
                TokenKind::Indent(2),
                TokenKind::When("1".to_string()),
                TokenKind::Colon,
                tag("p"),
                text("one"),
                TokenKind::Newline,
                TokenKind::Default,
                TokenKind::Outdent,
                TokenKind::Eos,
            ]
        );
        assert_eq!(kinds("when 'a:b'")[0], TokenKind::When("'a:b'".to_string()));
        assert_eq!(error("case").code, LexErrorCode::NoCaseExpression);
        assert_eq!(error("when").code, LexErrorCode::NoWhenExpression);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_each() {
        assert_eq!(
            kinds("each v, i in items")[0],
            TokenKind::Each {
                value: "v".to_string(),
                key: Some("i".to_string()),
                source: "items".to_string()
            }
        );
        assert_eq!(
            kinds("for x of list")[0],
            TokenKind::EachOf {
                value: "x".to_string(),
                source: "list".to_string()
            }
        );
        assert_eq!(error("each").code, LexErrorCode::NoEachExpression);
        assert_eq!(error("each 1 in x").code, LexErrorCode::MalformedEach);
        assert_eq!(error("each x on y").code, LexErrorCode::MalformedEach);
        assert_eq!(error("while").code, LexErrorCode::NoWhileExpression);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_blocks() {
        assert_eq!(
            kinds("block content\nblock append scripts\nprepend head\nblock"),
            [
                TokenKind::Block {
                    name: "content".to_string(),
                    mode: BlockMode::Replace
                },
                TokenKind::Newline,
                TokenKind::Block {
                    name: "scripts".to_string(),
                    mode: BlockMode::Append
                },
                TokenKind::Newline,
                TokenKind::Block {
                    name: "head".to_string(),
                    mode: BlockMode::Prepend
                },
                TokenKind::Newline,
                TokenKind::MixinBlock,
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_extends_and_include() {
        assert_eq!(
            kinds("extends layout\ninclude:cdata data.txt"),
            [
                TokenKind::Extends,
                TokenKind::Path("layout".to_string()),
                TokenKind::Newline,
                TokenKind::Include {
                    filter: Some("cdata".to_string())
                },
                TokenKind::Path("data.txt".to_string()),
                TokenKind::Eos,
            ]
        );
        assert_eq!(error("extends").code, LexErrorCode::NoExtendsPath);
        assert_eq!(error("include ").code, LexErrorCode::NoIncludePath);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_mixins() {
        assert_eq!(
            kinds("mixin link(href, ...rest)")[0],
            TokenKind::Mixin {
                name: "link".to_string(),
                params: Some("href, ...rest".to_string())
            }
        );
        assert_eq!(
            kinds("+link('/a', 'b')")[0],
            TokenKind::Call {
                name: "link".to_string(),
                interpolated: false,
                args: Some("'/a', 'b'".to_string())
            }
        );
        let tokens = kinds("+link(href='/a')");
        assert_eq!(
            tokens[0],
            TokenKind::Call {
                name: "link".to_string(),
                interpolated: false,
                args: None
            }
        );
        assert_eq!(tokens[1], TokenKind::StartAttributes);
        assert_eq!(
            kinds("+#{kind}()")[0],
            TokenKind::Call {
                name: "kind".to_string(),
                interpolated: true,
                args: Some(String::new())
            }
        );
        assert_eq!(error("mixin").code, LexErrorCode::NoMixinName);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_filters() {
        assert_eq!(
            kinds(":cdata\n  raw <text>"),
            [
                TokenKind::Filter("cdata".to_string()),
                TokenKind::StartPipelessText,
                text("raw <text>"),
                TokenKind::EndPipelessText,
                TokenKind::Eos,
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_misc_tokens() {
        assert_eq!(
            kinds("doctype html")[0],
            TokenKind::Doctype(Some("html".to_string()))
        );
        assert_eq!(kinds("<b>raw</b>")[0], TokenKind::TextHtml("<b>raw</b>".to_string()));
        assert_eq!(
            kinds("div&attributes(attrs)")[1],
            TokenKind::AttributesSpread("attrs".to_string())
        );
        assert_eq!(kinds("#{tagName} hi")[0], TokenKind::Interpolation("tagName".to_string()));
        assert_eq!(kinds("#[b bold] text")[0], text("#[b bold] text"));
        assert_eq!(kinds("yield")[0], TokenKind::Yield);
        assert_eq!(error("{oops}").code, LexErrorCode::UnexpectedText);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_locations() {
        let tokens = lex("div\n  p.note Hello").unwrap();
        assert_eq!(tokens[2].location, Location::new(2, 3));
        assert_eq!(tokens[3].location, Location::new(2, 4));
        assert_eq!(tokens[4].location, Location::new(2, 10));

        let nested = lex_at("b bold", Location::new(5, 9)).unwrap();
        assert_eq!(nested[0].location, Location::new(5, 9));
        assert_eq!(nested[1].location, Location::new(5, 11));
    }
}
