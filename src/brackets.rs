//! Bracket and string tracking shared by the lexer (interpolation, attribute
//! lists, mixin arguments) and the parser (splitting text into segments).

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Frame {
    Paren,
    Brace,
    Bracket,
    /// Inside a backtick template literal.
    Template,
    /// Inside `${ ... }` of a template literal.
    TemplateExpr,
}

impl Frame {
    const fn open(c: char) -> Option<Self> {
        match c {
            '(' => Some(Self::Paren),
            '{' => Some(Self::Brace),
            '[' => Some(Self::Bracket),
            _ => None,
        }
    }

    const fn closes_with(self, c: char) -> bool {
        matches!(
            (self, c),
            (Self::Paren, ')') | (Self::Brace | Self::TemplateExpr, '}') | (Self::Bracket, ']')
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BracketErrorKind {
    /// A closing bracket that does not match the innermost open one.
    Mismatch,
    /// Input ended while a bracket or string was still open.
    Unterminated,
    /// A raw newline inside a single- or double-quoted string.
    NewlineInString,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BracketError {
    pub kind: BracketErrorKind,
    /// Byte offset of the offending character in the scanned input.
    pub offset: usize,
}

/// Incremental bracket/string state machine, fed one character at a time.
#[derive(Debug, Clone, Default)]
pub struct BracketState {
    stack: Vec<Frame>,
    quote: Option<char>,
    escaped: bool,
    dollar: bool,
}

impl BracketState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while inside any bracket, string or template literal.
    pub fn is_nested(&self) -> bool {
        !self.stack.is_empty() || self.quote.is_some()
    }

    pub fn feed(&mut self, c: char, offset: usize) -> Result<(), BracketError> {
        if self.escaped {
            self.escaped = false;
            return Ok(());
        }

        if let Some(quote) = self.quote {
            match c {
                '\\' => self.escaped = true,
                '\n' => {
                    return Err(BracketError {
                        kind: BracketErrorKind::NewlineInString,
                        offset,
                    });
                }
                c if c == quote => self.quote = None,
                _ => {}
            }
            return Ok(());
        }

        if matches!(self.stack.last(), Some(Frame::Template)) {
            let dollar = std::mem::replace(&mut self.dollar, c == '$');
            match c {
                '\\' => self.escaped = true,
                '`' => {
                    self.stack.pop();
                }
                '{' if dollar => self.stack.push(Frame::TemplateExpr),
                _ => {}
            }
            return Ok(());
        }

        match c {
            '(' | '{' | '[' => {
                if let Some(frame) = Frame::open(c) {
                    self.stack.push(frame);
                }
            }
            ')' | '}' | ']' => match self.stack.last() {
                Some(frame) if frame.closes_with(c) => {
                    self.stack.pop();
                }
                _ => {
                    return Err(BracketError {
                        kind: BracketErrorKind::Mismatch,
                        offset,
                    });
                }
            },
            '\'' | '"' => self.quote = Some(c),
            '`' => {
                self.dollar = false;
                self.stack.push(Frame::Template);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Scans `src`, which starts just after an `open` bracket, and returns the byte
/// offset of the matching close bracket.
pub fn scan_balanced(src: &str, open: char) -> Result<usize, BracketError> {
    let mut state = BracketState::new();
    if let Some(frame) = Frame::open(open) {
        state.stack.push(frame);
    }

    for (offset, c) in src.char_indices() {
        state.feed(c, offset)?;
        if !state.is_nested() {
            return Ok(offset);
        }
    }

    Err(BracketError {
        kind: BracketErrorKind::Unterminated,
        offset: src.len(),
    })
}
