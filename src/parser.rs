#![allow(
    clippy::wildcard_enum_match_arm,
    reason = "productions only name the token kinds they accept"
)]

use std::path::Path;

use tracing::debug;

use crate::ast::{
    Attribute, Block, Code, Element, MixinCall, MixinDef, MixinName, Node, NodeKind, Param,
    Segment, Text,
};
use crate::brackets::{BracketErrorKind, BracketState, scan_balanced};
use crate::error::{ParseError, ParseErrorKind};
use crate::expr::{Expr, Statement};
use crate::lexer::lex_at;
use crate::token::{Location, RawAttribute, Token, TokenKind};
use crate::value::Value;

type ParseResult<T> = Result<T, ParseError>;

static EOS: TokenKind = TokenKind::Eos;

/// Builds the tree for a token stream produced by the lexer (after comment
/// stripping).
pub fn parse(tokens: Vec<Token>) -> ParseResult<Block> {
    let block = Parser::new(tokens).parse_document()?;
    debug!(nodes = block.count_nodes(), "parsed template");
    Ok(block)
}

fn parse_expression(source: &str, location: Location) -> ParseResult<Expr> {
    Expr::parse(source).map_err(|e| {
        ParseError::new(
            ParseErrorKind::InvalidExpression {
                expression: source.to_string(),
                message: e.message,
            },
            location,
        )
    })
}

fn parse_statements(source: &str, location: Location) -> ParseResult<Vec<Statement>> {
    Statement::parse_all(source).map_err(|e| {
        ParseError::new(
            ParseErrorKind::InvalidExpression {
                expression: source.to_string(),
                message: e.message,
            },
            location,
        )
    })
}

/// Splits `src` at commas that are not nested in brackets or strings.
fn split_top_level(src: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut state = BracketState::new();
    let mut start = 0;
    for (i, c) in src.char_indices() {
        if c == ',' && !state.is_nested() {
            parts.push(&src[start..i]);
            start = i + 1;
            continue;
        }
        // Malformed input surfaces when the pieces are parsed as expressions.
        if state.feed(c, i).is_err() {
            break;
        }
    }
    parts.push(&src[start..]);
    parts
}

fn parse_params(source: &str, location: Location) -> ParseResult<Vec<Param>> {
    let mut params = Vec::new();
    if source.trim().is_empty() {
        return Ok(params);
    }
    let parts = split_top_level(source);
    let count = parts.len();
    for (i, part) in parts.into_iter().enumerate() {
        let part = part.trim();
        let invalid = |message: &str| {
            ParseError::new(
                ParseErrorKind::InvalidExpression {
                    expression: part.to_string(),
                    message: message.to_string(),
                },
                location,
            )
        };
        if let Some(name) = part.strip_prefix("...") {
            if i + 1 != count {
                return Err(invalid("a rest parameter must be last"));
            }
            if !is_identifier(name.trim()) {
                return Err(invalid("expected a parameter name"));
            }
            params.push(Param {
                name: name.trim().to_string(),
                default: None,
                rest: true,
            });
            continue;
        }
        let (name, default) = match part.split_once('=') {
            Some((name, default)) => (name.trim(), Some(parse_expression(default, location)?)),
            None => (part, None),
        };
        if !is_identifier(name) {
            return Err(invalid("expected a parameter name"));
        }
        params.push(Param {
            name: name.to_string(),
            default,
            rest: false,
        });
    }
    Ok(params)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn convert_attribute(raw: RawAttribute) -> ParseResult<Attribute> {
    let Some(source) = raw.value else {
        return Ok(Attribute {
            name: raw.name,
            raw_value: None,
            value: Expr::literal(true),
            must_escape: raw.must_escape,
            quoted: false,
        });
    };
    let value = parse_expression(&source, raw.location)?;
    let quoted = source.starts_with(['\'', '"'])
        && matches!(value.as_literal(), Some(Value::String(_)));
    Ok(Attribute {
        name: raw.name,
        raw_value: Some(source),
        value,
        must_escape: raw.must_escape,
        quoted,
    })
}

fn literal_attribute(name: &str, value: &str) -> Attribute {
    Attribute {
        name: name.to_string(),
        raw_value: Some(format!("'{value}'")),
        value: Expr::literal(value),
        must_escape: true,
        quoted: true,
    }
}

/// Splits text into literal runs and `#{}`, `!{}`, `#[]` segments.
pub fn split_segments(raw: &str, location: Location) -> ParseResult<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < raw.len() {
        let rest = &raw[i..];
        if let Some(escaped) = rest.strip_prefix('\\') {
            if escaped.starts_with("#{") || escaped.starts_with("!{") || escaped.starts_with("#[") {
                literal.push_str(&escaped[..2]);
                i += 3;
                continue;
            }
        }

        let marker = if rest.starts_with("#{") {
            Some(('{', false))
        } else if rest.starts_with("!{") {
            Some(('{', true))
        } else if rest.starts_with("#[") {
            Some(('[', false))
        } else {
            None
        };
        let Some((open, unescaped)) = marker else {
            let Some(c) = rest.chars().next() else {
                break;
            };
            literal.push(c);
            i += c.len_utf8();
            continue;
        };

        let start = i + 2;
        let marker_location = Location::new(location.line, location.column + i);
        let close = scan_balanced(&raw[start..], open).map_err(|e| {
            let message = match e.kind {
                BracketErrorKind::Mismatch => "mismatched bracket in interpolation",
                BracketErrorKind::Unterminated | BracketErrorKind::NewlineInString => {
                    "unterminated interpolation"
                }
            };
            ParseError::new(ParseErrorKind::Message(message.to_string()), marker_location)
        })?;
        let content = &raw[start..start + close];

        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        if open == '[' {
            segments.push(Segment::Tag(Box::new(parse_tag_interpolation(
                content,
                Location::new(location.line, location.column + start),
            )?)));
        } else {
            let expr = parse_expression(content, marker_location)?;
            segments.push(if unescaped {
                Segment::Unescaped(expr)
            } else {
                Segment::Escaped(expr)
            });
        }
        i = start + close + 1;
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Lexes and parses the body of `#[...]` as its own little template.
fn parse_tag_interpolation(content: &str, location: Location) -> ParseResult<Node> {
    let tokens = lex_at(content, location).map_err(|e| {
        let location = e.location();
        ParseError::new(ParseErrorKind::Message(e.to_string()), location)
    })?;
    let mut block = Parser::new(tokens).parse_document()?;
    Ok(if block.nodes.len() == 1 {
        block.nodes.remove(0)
    } else {
        Node::new(NodeKind::Block(block), location)
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    mixin_depth: usize,
}

impl Parser {
    const fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            mixin_depth: 0,
        }
    }

    fn peek(&self) -> &TokenKind {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &TokenKind {
        self.tokens.get(self.pos + n).map_or(&EOS, |t| &t.kind)
    }

    fn location(&self) -> Location {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.location)
            .unwrap_or_default()
    }

    fn advance(&mut self) -> Token {
        let location = self.location();
        match self.tokens.get_mut(self.pos) {
            Some(slot) => {
                self.pos += 1;
                std::mem::replace(slot, Token::new(TokenKind::Eos, location))
            }
            None => Token::new(TokenKind::Eos, location),
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let kind = match self.peek() {
            TokenKind::Eos => ParseErrorKind::unexpected_eof(Some(expected)),
            found => ParseErrorKind::UnexpectedToken {
                expected: expected.to_string(),
                found: found.describe().to_string(),
            },
        };
        ParseError::new(kind, self.location())
    }

    fn parse_document(&mut self) -> ParseResult<Block> {
        let mut block = Block::new();
        loop {
            match self.peek() {
                TokenKind::Eos => break,
                TokenKind::Newline => {
                    self.advance();
                }
                _ => self.push_node(&mut block)?,
            }
        }
        Ok(block)
    }

    fn push_node(&mut self, block: &mut Block) -> ParseResult<()> {
        let node = self.parse_expr()?;
        match node.kind {
            NodeKind::Block(inner) => block.nodes.extend(inner.nodes),
            _ => block.push(node),
        }
        Ok(())
    }

    /// An indented block: `indent node* outdent`.
    fn parse_block(&mut self) -> ParseResult<Block> {
        if !matches!(self.peek(), TokenKind::Indent(_)) {
            return Err(self.unexpected("indent"));
        }
        self.advance();
        let mut block = Block::new();
        loop {
            match self.peek() {
                TokenKind::Outdent => {
                    self.advance();
                    break;
                }
                TokenKind::Newline => {
                    self.advance();
                }
                TokenKind::Eos => return Err(self.unexpected("outdent")),
                _ => self.push_node(&mut block)?,
            }
        }
        Ok(block)
    }

    fn parse_optional_block(&mut self) -> ParseResult<Block> {
        if matches!(self.peek(), TokenKind::Indent(_)) {
            self.parse_block()
        } else {
            Ok(Block::new())
        }
    }

    fn parse_expr(&mut self) -> ParseResult<Node> {
        let location = self.location();
        match self.peek() {
            TokenKind::Tag(_) => {
                let TokenKind::Tag(name) = self.advance().kind else {
                    return Err(self.unexpected("tag"));
                };
                let element = self.parse_element(&name, true)?;
                Ok(Node::new(NodeKind::Tag { name, element }, location))
            }
            TokenKind::Id(_) | TokenKind::Class(_) | TokenKind::StartAttributes => {
                let element = self.parse_element("div", true)?;
                Ok(Node::new(
                    NodeKind::Tag {
                        name: "div".to_string(),
                        element,
                    },
                    location,
                ))
            }
            TokenKind::Interpolation(_) => {
                let TokenKind::Interpolation(source) = self.advance().kind else {
                    return Err(self.unexpected("interpolation"));
                };
                let expr = parse_expression(&source, location)?;
                let element = self.parse_element(&source, true)?;
                Ok(Node::new(NodeKind::InterpolatedTag { expr, element }, location))
            }
            TokenKind::Text(_) => self.parse_text(true),
            TokenKind::TextHtml(_) => self.parse_text_html(),
            TokenKind::Comment { .. } => self.parse_comment(),
            TokenKind::Doctype(_) => {
                let TokenKind::Doctype(value) = self.advance().kind else {
                    return Err(self.unexpected("doctype"));
                };
                Ok(Node::new(NodeKind::Doctype(value), location))
            }
            TokenKind::Code { .. } => self.parse_code(false),
            TokenKind::BlockCode => self.parse_block_code(),
            TokenKind::If(_) | TokenKind::Unless(_) => self.parse_conditional(),
            TokenKind::Case(_) => self.parse_case(),
            TokenKind::Each { .. } | TokenKind::EachOf { .. } => self.parse_each(),
            TokenKind::While(_) => {
                let TokenKind::While(source) = self.advance().kind else {
                    return Err(self.unexpected("while"));
                };
                let test = parse_expression(&source, location)?;
                let block = self.parse_optional_block()?;
                Ok(Node::new(NodeKind::While { test, block }, location))
            }
            TokenKind::Mixin { .. } => self.parse_mixin(),
            TokenKind::Call { .. } => self.parse_call(),
            TokenKind::Block { .. } => {
                let TokenKind::Block { name, mode } = self.advance().kind else {
                    return Err(self.unexpected("block"));
                };
                let block = self.parse_optional_block()?;
                Ok(Node::new(NodeKind::NamedBlock { name, mode, block }, location))
            }
            TokenKind::MixinBlock => {
                if self.mixin_depth == 0 {
                    return Err(ParseError::new(ParseErrorKind::BlockOutsideMixin, location));
                }
                self.advance();
                Ok(Node::new(NodeKind::MixinBlock, location))
            }
            TokenKind::Yield => {
                self.advance();
                Ok(Node::new(NodeKind::YieldBlock, location))
            }
            TokenKind::Extends => {
                self.advance();
                let path = self.parse_path()?;
                Ok(Node::new(NodeKind::Extends { path }, location))
            }
            TokenKind::Include { .. } => self.parse_include(),
            TokenKind::Filter(_) => self.parse_filter(),
            TokenKind::Else(_) | TokenKind::ElseIf(_) => Err(ParseError::new(
                ParseErrorKind::Message(
                    "`else` must follow an `if`, `unless`, `else if` or `each` block".to_string(),
                ),
                location,
            )),
            _ => Err(self.unexpected("a tag, text, code or keyword")),
        }
    }

    fn parse_path(&mut self) -> ParseResult<String> {
        match self.peek() {
            TokenKind::Path(_) => {
                let TokenKind::Path(path) = self.advance().kind else {
                    return Err(self.unexpected("path"));
                };
                Ok(path)
            }
            _ => Err(self.unexpected("path")),
        }
    }

    /// Attributes, inline content and the indented block of a tag (or of a
    /// mixin call, which shares the syntax).
    fn parse_element(&mut self, name: &str, allow_self_closing: bool) -> ParseResult<Element> {
        let mut element = Element::default();
        let mut has_id = false;

        loop {
            let location = self.location();
            match self.peek() {
                TokenKind::Id(_) => {
                    let TokenKind::Id(id) = self.advance().kind else {
                        return Err(self.unexpected("id"));
                    };
                    // The first id on a tag wins.
                    if !has_id {
                        has_id = true;
                        element.attributes.push(literal_attribute("id", &id));
                    }
                }
                TokenKind::Class(_) => {
                    let TokenKind::Class(class) = self.advance().kind else {
                        return Err(self.unexpected("class"));
                    };
                    element.attributes.push(literal_attribute("class", &class));
                }
                TokenKind::StartAttributes => {
                    self.advance();
                    for attribute in self.parse_attribute_list()? {
                        if attribute.name == "id" {
                            if has_id {
                                continue;
                            }
                            has_id = true;
                        } else if attribute.name != "class"
                            && element.attributes.iter().any(|a| a.name == attribute.name)
                        {
                            return Err(ParseError::new(
                                ParseErrorKind::DuplicateAttribute {
                                    name: attribute.name,
                                },
                                location,
                            ));
                        }
                        element.attributes.push(attribute);
                    }
                }
                TokenKind::AttributesSpread(_) => {
                    let TokenKind::AttributesSpread(source) = self.advance().kind else {
                        return Err(self.unexpected("&attributes"));
                    };
                    element.spreads.push(parse_expression(&source, location)?);
                }
                _ => break,
            }
        }

        if matches!(self.peek(), TokenKind::Dot) {
            element.text_only = true;
            self.advance();
        }

        let location = self.location();
        match self.peek() {
            TokenKind::Text(_) => {
                let text = self.parse_text(false)?;
                element.block.push(text);
            }
            TokenKind::Code { .. } => {
                let code = self.parse_code(true)?;
                element.block.push(code);
            }
            TokenKind::Colon => {
                self.advance();
                self.push_node(&mut element.block)?;
            }
            TokenKind::Slash if allow_self_closing => {
                self.advance();
                element.self_closing = true;
            }
            TokenKind::Newline
            | TokenKind::Indent(_)
            | TokenKind::Outdent
            | TokenKind::Eos
            | TokenKind::StartPipelessText => {}
            _ => return Err(self.unexpected("text, code, `:` or a newline")),
        }

        if element.text_only {
            if matches!(self.peek(), TokenKind::StartPipelessText) {
                let (raw, text_location) = self.parse_pipeless_lines()?;
                let segments = split_segments(&raw, text_location)?;
                element
                    .block
                    .push(Node::new(NodeKind::Text(Text { raw, segments }), text_location));
            }
        } else if matches!(self.peek(), TokenKind::Indent(_)) {
            let block = self.parse_block()?;
            element.block.nodes.extend(block.nodes);
        }

        if element.self_closing && !element.block.is_empty() {
            return Err(ParseError::new(
                ParseErrorKind::SelfClosingContent {
                    tag: name.to_string(),
                },
                location,
            ));
        }
        Ok(element)
    }

    fn parse_attribute_list(&mut self) -> ParseResult<Vec<Attribute>> {
        let mut attributes = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Attribute(_) => {
                    let TokenKind::Attribute(raw) = self.advance().kind else {
                        return Err(self.unexpected("attribute"));
                    };
                    attributes.push(convert_attribute(raw)?);
                }
                TokenKind::EndAttributes => {
                    self.advance();
                    return Ok(attributes);
                }
                _ => return Err(self.unexpected("end-attributes")),
            }
        }
    }

    /// Consecutive text lines; with `block`, piped lines separated by
    /// newlines join with `\n`.
    fn parse_text(&mut self, block: bool) -> ParseResult<Node> {
        let location = self.location();
        let mut raw = String::new();
        loop {
            match self.peek() {
                TokenKind::Text(_) => {
                    if let TokenKind::Text(line) = self.advance().kind {
                        raw.push_str(&line);
                    }
                }
                TokenKind::Newline if block && matches!(self.peek_at(1), TokenKind::Text(_)) => {
                    self.advance();
                    raw.push('\n');
                }
                _ => break,
            }
        }
        let segments = split_segments(&raw, location)?;
        Ok(Node::new(NodeKind::Text(Text { raw, segments }), location))
    }

    fn parse_text_html(&mut self) -> ParseResult<Node> {
        let location = self.location();
        let mut raw = String::new();
        loop {
            match self.peek() {
                TokenKind::TextHtml(_) => {
                    if let TokenKind::TextHtml(line) = self.advance().kind {
                        if !raw.is_empty() {
                            raw.push('\n');
                        }
                        raw.push_str(&line);
                    }
                }
                TokenKind::Newline if matches!(self.peek_at(1), TokenKind::TextHtml(_)) => {
                    self.advance();
                }
                _ => break,
            }
        }
        let segments = split_segments(&raw, location)?;
        let text = Node::new(NodeKind::Text(Text { raw, segments }), location);
        if !matches!(self.peek(), TokenKind::Indent(_)) {
            return Ok(text);
        }
        let mut block = Block::new();
        block.push(text);
        block.nodes.extend(self.parse_block()?.nodes);
        Ok(Node::new(NodeKind::Block(block), location))
    }

    /// `start-pipeless-text (text newline)* end-pipeless-text`, joined with `\n`.
    fn parse_pipeless_lines(&mut self) -> ParseResult<(String, Location)> {
        self.advance();
        let location = self.location();
        let mut raw = String::new();
        loop {
            match self.advance().kind {
                TokenKind::Text(line) => raw.push_str(&line),
                TokenKind::Newline => raw.push('\n'),
                TokenKind::EndPipelessText => return Ok((raw, location)),
                _ => return Err(ParseError::new(
                    ParseErrorKind::unexpected_eof(Some("end-pipeless-text")),
                    location,
                )),
            }
        }
    }

    fn parse_comment(&mut self) -> ParseResult<Node> {
        let location = self.location();
        let TokenKind::Comment { text, buffer } = self.advance().kind else {
            return Err(self.unexpected("comment"));
        };
        if !matches!(self.peek(), TokenKind::StartPipelessText) {
            return Ok(Node::new(NodeKind::Comment { text, buffer }, location));
        }
        let (body, body_location) = self.parse_pipeless_lines()?;
        let segments = vec![Segment::Literal(body.clone())];
        let block = Block::from(vec![Node::new(
            NodeKind::Text(Text {
                raw: body,
                segments,
            }),
            body_location,
        )]);
        Ok(Node::new(
            NodeKind::BlockComment {
                text,
                buffer,
                block,
            },
            location,
        ))
    }

    fn parse_code(&mut self, inline: bool) -> ParseResult<Node> {
        let location = self.location();
        let TokenKind::Code {
            source,
            buffer,
            must_escape,
        } = self.advance().kind
        else {
            return Err(self.unexpected("code"));
        };
        let code = if buffer {
            Code::Output {
                expr: parse_expression(&source, location)?,
                escape: must_escape,
            }
        } else {
            Code::Statements(parse_statements(&source, location)?)
        };
        if !inline && matches!(self.peek(), TokenKind::Indent(_)) {
            return Err(ParseError::new(ParseErrorKind::CodeWithBlock, self.location()));
        }
        Ok(Node::new(NodeKind::Code(code), location))
    }

    fn parse_block_code(&mut self) -> ParseResult<Node> {
        let location = self.location();
        self.advance();
        let mut statements = Vec::new();
        if matches!(self.peek(), TokenKind::StartPipelessText) {
            let (body, body_location) = self.parse_pipeless_lines()?;
            for (offset, line) in body.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let line_location =
                    Location::new(body_location.line + offset, body_location.column);
                statements.extend(parse_statements(line, line_location)?);
            }
        }
        Ok(Node::new(NodeKind::Code(Code::Statements(statements)), location))
    }

    fn parse_conditional(&mut self) -> ParseResult<Node> {
        let location = self.location();
        let (source, negate) = match self.advance().kind {
            TokenKind::If(source) => (source, false),
            TokenKind::Unless(source) => (source, true),
            _ => return Err(self.unexpected("if")),
        };
        let test = parse_expression(&source, location)?;
        let consequent = self.parse_optional_block()?;

        let mut else_ifs = Vec::new();
        let mut otherwise = None;
        loop {
            let branch_location = self.location();
            match self.peek() {
                TokenKind::Newline
                    if matches!(self.peek_at(1), TokenKind::ElseIf(_) | TokenKind::Else(_)) =>
                {
                    self.advance();
                }
                TokenKind::ElseIf(_) => {
                    let TokenKind::ElseIf(source) = self.advance().kind else {
                        return Err(self.unexpected("else if"));
                    };
                    let test = parse_expression(&source, branch_location)?;
                    let block = self.parse_optional_block()?;
                    else_ifs.push((test, block, branch_location));
                }
                TokenKind::Else(condition) => {
                    if condition.is_some() {
                        return Err(ParseError::new(
                            ParseErrorKind::ElseWithCondition,
                            branch_location,
                        ));
                    }
                    self.advance();
                    let block = self.parse_else_body()?;
                    otherwise = Some(Box::new(Node::new(NodeKind::Block(block), branch_location)));
                    break;
                }
                _ => break,
            }
        }

        let mut alternate = otherwise;
        for (test, consequent, branch_location) in else_ifs.into_iter().rev() {
            alternate = Some(Box::new(Node::new(
                NodeKind::Conditional {
                    test,
                    negate: false,
                    consequent,
                    alternate,
                },
                branch_location,
            )));
        }
        Ok(Node::new(
            NodeKind::Conditional {
                test,
                negate,
                consequent,
                alternate,
            },
            location,
        ))
    }

    /// Body of an `else`: an indented block or a `: node` expansion.
    fn parse_else_body(&mut self) -> ParseResult<Block> {
        if matches!(self.peek(), TokenKind::Colon) {
            self.advance();
            let mut block = Block::new();
            self.push_node(&mut block)?;
            return Ok(block);
        }
        self.parse_optional_block()
    }

    fn parse_case(&mut self) -> ParseResult<Node> {
        let location = self.location();
        let TokenKind::Case(source) = self.advance().kind else {
            return Err(self.unexpected("case"));
        };
        let expr = parse_expression(&source, location)?;
        let mut block = Block::new();
        if matches!(self.peek(), TokenKind::Indent(_)) {
            self.advance();
            loop {
                match self.peek() {
                    TokenKind::Outdent => {
                        self.advance();
                        break;
                    }
                    TokenKind::Newline => {
                        self.advance();
                    }
                    TokenKind::Comment { .. } => {
                        self.parse_comment()?;
                    }
                    TokenKind::When(_) | TokenKind::Default => block.push(self.parse_when()?),
                    _ => return Err(self.unexpected("when, default or newline")),
                }
            }
        }
        Ok(Node::new(NodeKind::Case { expr, block }, location))
    }

    fn parse_when(&mut self) -> ParseResult<Node> {
        let location = self.location();
        let expr = match self.advance().kind {
            TokenKind::When(source) => Some(parse_expression(&source, location)?),
            TokenKind::Default => None,
            _ => return Err(self.unexpected("when")),
        };
        let block = match self.peek() {
            TokenKind::Colon => {
                self.advance();
                let mut block = Block::new();
                self.push_node(&mut block)?;
                Some(block)
            }
            TokenKind::Indent(_) => Some(self.parse_block()?),
            _ => None,
        };
        Ok(Node::new(NodeKind::When { expr, block }, location))
    }

    fn parse_each(&mut self) -> ParseResult<Node> {
        let location = self.location();
        let (value, key, source) = match self.advance().kind {
            TokenKind::Each { value, key, source } => (value, key, source),
            TokenKind::EachOf { value, source } => (value, None, source),
            _ => return Err(self.unexpected("each")),
        };
        let expr = parse_expression(&source, location)?;
        let block = self.parse_optional_block()?;

        if matches!(self.peek(), TokenKind::Newline)
            && matches!(self.peek_at(1), TokenKind::Else(_))
        {
            self.advance();
        }
        let mut alternate = None;
        if let TokenKind::Else(condition) = self.peek() {
            if condition.is_some() {
                return Err(ParseError::new(
                    ParseErrorKind::ElseWithCondition,
                    self.location(),
                ));
            }
            self.advance();
            alternate = Some(self.parse_else_body()?);
        }

        Ok(Node::new(
            NodeKind::Each {
                value,
                key,
                expr,
                block,
                alternate,
            },
            location,
        ))
    }

    fn parse_mixin(&mut self) -> ParseResult<Node> {
        let location = self.location();
        let TokenKind::Mixin { name, params } = self.advance().kind else {
            return Err(self.unexpected("mixin"));
        };
        let params = parse_params(params.as_deref().unwrap_or_default(), location)?;
        self.mixin_depth += 1;
        let block = self.parse_optional_block();
        self.mixin_depth -= 1;
        Ok(Node::new(
            NodeKind::Mixin(MixinDef {
                name,
                params,
                block: block?,
            }),
            location,
        ))
    }

    fn parse_call(&mut self) -> ParseResult<Node> {
        let location = self.location();
        let TokenKind::Call {
            name,
            interpolated,
            args,
        } = self.advance().kind
        else {
            return Err(self.unexpected("call"));
        };
        let name = if interpolated {
            MixinName::Dynamic(parse_expression(&name, location)?)
        } else {
            MixinName::Static(name)
        };
        let args = match args {
            Some(source) => Expr::parse_list(&source).map_err(|e| {
                ParseError::new(
                    ParseErrorKind::InvalidExpression {
                        expression: source.clone(),
                        message: e.message,
                    },
                    location,
                )
            })?,
            None => Vec::new(),
        };
        let element = self.parse_element("mixin call", false)?;
        let block = (!element.block.is_empty()).then_some(element.block);
        Ok(Node::new(
            NodeKind::MixinCall(MixinCall {
                name,
                args,
                attributes: element.attributes,
                spreads: element.spreads,
                block,
            }),
            location,
        ))
    }

    fn parse_include(&mut self) -> ParseResult<Node> {
        let location = self.location();
        let TokenKind::Include { filter } = self.advance().kind else {
            return Err(self.unexpected("include"));
        };
        let path = self.parse_path()?;
        let extension = Path::new(&path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_string);
        let raw = filter.is_some() || extension.is_some_and(|e| e != "pug");
        if raw {
            return Ok(Node::new(NodeKind::RawInclude { path, filter }, location));
        }
        let block = self.parse_optional_block()?;
        Ok(Node::new(NodeKind::Include { path, block }, location))
    }

    fn parse_filter(&mut self) -> ParseResult<Node> {
        let location = self.location();
        let TokenKind::Filter(name) = self.advance().kind else {
            return Err(self.unexpected("filter"));
        };
        let attributes = if matches!(self.peek(), TokenKind::StartAttributes) {
            self.advance();
            self.parse_attribute_list()?
        } else {
            Vec::new()
        };
        let text = match self.peek() {
            TokenKind::Text(_) => match self.advance().kind {
                TokenKind::Text(text) => text,
                _ => String::new(),
            },
            TokenKind::StartPipelessText => self.parse_pipeless_lines()?.0,
            _ => String::new(),
        };
        Ok(Node::new(
            NodeKind::Filter {
                name,
                attributes,
                text,
            },
            location,
        ))
    }
}
