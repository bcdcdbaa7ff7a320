use crate::expr::{Expr, Statement};
use crate::token::{BlockMode, Location};

/// An ordered list of nodes; order is render order.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub nodes: Vec<Node>,
}

impl Block {
    pub const fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn push(&mut self, node: Node) {
        self.nodes.push(node);
    }

    /// Total number of nodes in this block, counting nested ones.
    pub fn count_nodes(&self) -> usize {
        self.nodes.iter().map(Node::count_nodes).sum()
    }
}

impl From<Vec<Node>> for Block {
    fn from(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub location: Location,
}

impl Node {
    pub const fn new(kind: NodeKind, location: Location) -> Self {
        Self { kind, location }
    }

    /// Child blocks of this node, in source order.
    pub fn blocks(&self) -> Vec<&Block> {
        match &self.kind {
            NodeKind::Block(block)
            | NodeKind::BlockComment { block, .. }
            | NodeKind::Case { block, .. }
            | NodeKind::While { block, .. }
            | NodeKind::NamedBlock { block, .. }
            | NodeKind::Include { block, .. } => vec![block],
            NodeKind::Tag { element, .. } | NodeKind::InterpolatedTag { element, .. } => {
                vec![&element.block]
            }
            NodeKind::When { block, .. } => block.iter().collect(),
            NodeKind::Conditional {
                consequent,
                alternate,
                ..
            } => {
                let mut blocks = vec![consequent];
                if let Some(alternate) = alternate {
                    blocks.extend(alternate.blocks());
                }
                blocks
            }
            NodeKind::Each {
                block, alternate, ..
            } => std::iter::once(block).chain(alternate).collect(),
            NodeKind::Mixin(mixin) => vec![&mixin.block],
            NodeKind::MixinCall(call) => call.block.iter().collect(),
            NodeKind::Text(_)
            | NodeKind::Code(_)
            | NodeKind::Comment { .. }
            | NodeKind::Doctype(_)
            | NodeKind::MixinBlock
            | NodeKind::RawInclude { .. }
            | NodeKind::Extends { .. }
            | NodeKind::YieldBlock
            | NodeKind::Filter { .. } => Vec::new(),
        }
    }

    /// Mutable access to every child block, in source order.
    pub fn blocks_mut(&mut self) -> Vec<&mut Block> {
        match &mut self.kind {
            NodeKind::Block(block)
            | NodeKind::BlockComment { block, .. }
            | NodeKind::Case { block, .. }
            | NodeKind::While { block, .. }
            | NodeKind::NamedBlock { block, .. }
            | NodeKind::Include { block, .. } => vec![block],
            NodeKind::Tag { element, .. } | NodeKind::InterpolatedTag { element, .. } => {
                vec![&mut element.block]
            }
            NodeKind::When { block, .. } => block.iter_mut().collect(),
            NodeKind::Conditional {
                consequent,
                alternate,
                ..
            } => {
                let mut blocks = vec![consequent];
                if let Some(alternate) = alternate {
                    blocks.extend(alternate.blocks_mut());
                }
                blocks
            }
            NodeKind::Each {
                block, alternate, ..
            } => std::iter::once(block).chain(alternate.as_mut()).collect(),
            NodeKind::Mixin(mixin) => vec![&mut mixin.block],
            NodeKind::MixinCall(call) => call.block.iter_mut().collect(),
            NodeKind::Text(_)
            | NodeKind::Code(_)
            | NodeKind::Comment { .. }
            | NodeKind::Doctype(_)
            | NodeKind::MixinBlock
            | NodeKind::RawInclude { .. }
            | NodeKind::Extends { .. }
            | NodeKind::YieldBlock
            | NodeKind::Filter { .. } => Vec::new(),
        }
    }

    pub fn count_nodes(&self) -> usize {
        1 + self.blocks().into_iter().map(Block::count_nodes).sum::<usize>()
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// A plain group of nodes with no markup of its own.
    Block(Block),
    Tag {
        name: String,
        element: Element,
    },
    /// `#{expr}` in tag position; the tag name is computed at render time.
    InterpolatedTag {
        expr: Expr,
        element: Element,
    },
    Text(Text),
    Code(Code),
    Comment {
        text: String,
        buffer: bool,
    },
    /// A comment followed by an indented body.
    BlockComment {
        text: String,
        buffer: bool,
        block: Block,
    },
    Doctype(Option<String>),
    /// `if`/`unless`. `alternate` is either another `Conditional` (else if)
    /// or a `Block` node (else).
    Conditional {
        test: Expr,
        negate: bool,
        consequent: Block,
        alternate: Option<Box<Node>>,
    },
    /// Children are `When` nodes.
    Case {
        expr: Expr,
        block: Block,
    },
    /// `expr` is `None` for `default`; `block` is `None` for a fallthrough `when`.
    When {
        expr: Option<Expr>,
        block: Option<Block>,
    },
    Each {
        value: String,
        key: Option<String>,
        expr: Expr,
        block: Block,
        alternate: Option<Block>,
    },
    While {
        test: Expr,
        block: Block,
    },
    Mixin(MixinDef),
    MixinCall(MixinCall),
    /// A bare `block` inside a mixin body.
    MixinBlock,
    NamedBlock {
        name: String,
        mode: BlockMode,
        block: Block,
    },
    Include {
        path: String,
        /// Content indented under the `include`, spliced at the included
        /// template's `yield`.
        block: Block,
    },
    /// An include whose content is used as text, optionally run through a filter.
    RawInclude {
        path: String,
        filter: Option<String>,
    },
    Extends {
        path: String,
    },
    YieldBlock,
    Filter {
        name: String,
        attributes: Vec<Attribute>,
        text: String,
    },
}

impl NodeKind {
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::Block(_) => "Block",
            Self::Tag { .. } => "Tag",
            Self::InterpolatedTag { .. } => "InterpolatedTag",
            Self::Text(_) => "Text",
            Self::Code(_) => "Code",
            Self::Comment { .. } => "Comment",
            Self::BlockComment { .. } => "BlockComment",
            Self::Doctype(_) => "Doctype",
            Self::Conditional { .. } => "Conditional",
            Self::Case { .. } => "Case",
            Self::When { .. } => "When",
            Self::Each { .. } => "Each",
            Self::While { .. } => "While",
            Self::Mixin(_) => "Mixin",
            Self::MixinCall(_) => "MixinCall",
            Self::MixinBlock => "MixinBlock",
            Self::NamedBlock { .. } => "NamedBlock",
            Self::Include { .. } => "Include",
            Self::RawInclude { .. } => "RawInclude",
            Self::Extends { .. } => "Extends",
            Self::YieldBlock => "YieldBlock",
            Self::Filter { .. } => "Filter",
        }
    }
}

/// Everything a tag carries besides its name.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub attributes: Vec<Attribute>,
    /// `&attributes(expr)` spreads, merged after the literal attributes.
    pub spreads: Vec<Expr>,
    pub block: Block,
    /// Written with a trailing `/`.
    pub self_closing: bool,
    /// The body is a pipeless text block (`script.`).
    pub text_only: bool,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    /// Source text of the value; `None` for a bare boolean attribute.
    pub raw_value: Option<String>,
    pub value: Expr,
    pub must_escape: bool,
    /// The value is a plain string literal.
    pub quoted: bool,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Text {
    /// The text as written, markers included.
    pub raw: String,
    pub segments: Vec<Segment>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    /// `#{expr}`
    Escaped(Expr),
    /// `!{expr}`
    Unescaped(Expr),
    /// `#[tag ...]`
    Tag(Box<Node>),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Code {
    /// `= expr` or `!= expr`.
    Output { expr: Expr, escape: bool },
    /// `- statement` or a block of statements.
    Statements(Vec<Statement>),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
    /// `...name`, collecting the remaining arguments.
    pub rest: bool,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct MixinDef {
    pub name: String,
    pub params: Vec<Param>,
    pub block: Block,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum MixinName {
    Static(String),
    /// `+#{expr}`
    Dynamic(Expr),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct MixinCall {
    pub name: MixinName,
    pub args: Vec<Expr>,
    pub attributes: Vec<Attribute>,
    pub spreads: Vec<Expr>,
    /// Content indented under the call, rendered where the mixin says `block`.
    pub block: Option<Block>,
}
