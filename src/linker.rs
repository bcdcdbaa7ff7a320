#![allow(
    clippy::wildcard_enum_match_arm,
    reason = "the linker only rewrites inheritance and include nodes"
)]

//! Resolves `extends`, named blocks and includes into a single tree, and
//! hoists mixin definitions into one pool.

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::ast::{Block, Code, MixinDef, Node, NodeKind, Segment, Text};
use crate::error::{LinkError, LinkErrorKind, PugmillError, PugmillResult};
use crate::interface::TemplateResolver;
use crate::lexer::lex;
use crate::options::Options;
use crate::parser::parse;
use crate::strip::strip_comments;
use crate::token::{BlockMode, Location};

/// A fully resolved template: no `Extends`, `Include` or `RawInclude` nodes
/// remain, and every mixin definition has moved into `mixins`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Linked {
    pub block: Block,
    pub mixins: IndexMap<String, MixinDef>,
}

/// Lexes, strips comments from and parses one template source.
pub(crate) fn parse_source(source: &str, options: &Options) -> PugmillResult<Block> {
    let tokens = strip_comments(lex(source)?, options.strip_options())?;
    Ok(parse(tokens)?)
}

/// Links the tree parsed from the template at `path`, loading every parent
/// and included template through `resolver`.
///
/// # Errors
/// - `LinkError` for a misplaced `extends`, unexpected top-level content in an
///   extending template, an unresolvable path or a circular reference.
/// - Lex and parse errors from loaded templates, wrapped with their path.
pub fn link(
    block: Block,
    path: &str,
    resolver: &dyn TemplateResolver,
    options: &Options,
) -> PugmillResult<Linked> {
    let mut linker = Linker {
        resolver,
        options,
        stack: vec![path.to_string()],
    };
    let mut block = linker.link_template(block, path)?;
    let mut mixins = IndexMap::new();
    hoist_mixins(&mut block, &mut mixins);
    debug!(
        path,
        nodes = block.count_nodes(),
        mixins = mixins.len(),
        "linked template"
    );
    Ok(Linked { block, mixins })
}

struct Linker<'r> {
    resolver: &'r dyn TemplateResolver,
    options: &'r Options,
    /// Templates currently being linked, outermost first.
    stack: Vec<String>,
}

impl Linker<'_> {
    fn link_template(&mut self, block: Block, path: &str) -> PugmillResult<Block> {
        let mut nodes = block.nodes;
        let extends = match nodes.first() {
            Some(Node {
                kind: NodeKind::Extends { path: target },
                location,
            }) => Some((target.clone(), *location)),
            _ => None,
        };
        match extends {
            Some((target, location)) => {
                nodes.remove(0);
                self.extend(nodes, path, &target, location)
            }
            None => {
                let mut block = Block::from(nodes);
                self.resolve_includes(&mut block, path)?;
                Ok(block)
            }
        }
    }

    fn extend(
        &mut self,
        nodes: Vec<Node>,
        path: &str,
        target: &str,
        location: Location,
    ) -> PugmillResult<Block> {
        // Includes resolve first so their mixins and statements can sit at the root.
        let mut root = Block::from(nodes);
        self.resolve_includes(&mut root, path)?;
        let mut parts = ExtendingRoot::default();
        parts.sort(root.nodes, path)?;
        let ExtendingRoot {
            mut codes,
            overrides,
            mixins,
        } = parts;

        let parent_path = self.resolve_path(path, target);
        let (mut merged, _) = self.link_nested(&parent_path, path, location)?;

        for (name, mode, block) in overrides {
            trace!(name = %name, ?mode, "merging block");
            if !merge_block(&mut merged, &name, mode, &block) {
                warn!(
                    path = %path,
                    name = %name,
                    parent = %parent_path,
                    "block does not match any block declared by the parent template"
                );
            }
        }

        codes.extend(merged.nodes);
        codes.extend(mixins);
        Ok(Block::from(codes))
    }

    /// Loads and links another template while it is on the path stack.
    /// The flag tells whether that template extends a parent.
    fn link_nested(
        &mut self,
        target: &str,
        from: &str,
        location: Location,
    ) -> PugmillResult<(Block, bool)> {
        if self.stack.iter().any(|p| p == target) {
            return Err(LinkError::new(
                LinkErrorKind::CircularReference {
                    target: target.to_string(),
                },
                from,
                location,
            )
            .into());
        }
        let source = self.fetch(target, from, location)?;
        debug!(path = %target, "loading template");
        let parsed = parse_source(&source, self.options).map_err(|e| e.in_template(target))?;
        let extends = matches!(
            parsed.nodes.first().map(|node| &node.kind),
            Some(NodeKind::Extends { .. })
        );

        self.stack.push(target.to_string());
        let linked = self
            .link_template(parsed, target)
            .map_err(|e| e.in_template(target));
        self.stack.pop();
        Ok((linked?, extends))
    }

    fn fetch(&self, target: &str, from: &str, location: Location) -> PugmillResult<String> {
        self.resolver
            .resolve(target)
            .map(std::borrow::Cow::into_owned)
            .map_err(|e| match e {
                PugmillError::MissingTemplate { .. } => LinkError::new(
                    LinkErrorKind::UnresolvedPath {
                        target: target.to_string(),
                    },
                    from,
                    location,
                )
                .into(),
                other => other,
            })
    }

    fn resolve_includes(&mut self, block: &mut Block, path: &str) -> PugmillResult<()> {
        for node in &mut block.nodes {
            let location = node.location;
            match &mut node.kind {
                NodeKind::Extends { .. } => {
                    return Err(
                        LinkError::new(LinkErrorKind::ExtendsNotFirst, path, location).into(),
                    );
                }
                NodeKind::Include {
                    path: target,
                    block: content,
                } => {
                    let target = self.resolve_path(path, target);
                    let mut content = std::mem::take(content);
                    self.resolve_includes(&mut content, path)?;
                    let included = self.include(&target, content, path, location)?;
                    node.kind = NodeKind::Block(included);
                    continue;
                }
                NodeKind::RawInclude {
                    path: target,
                    filter,
                } => {
                    let target = self.resolve_path(path, target);
                    let filter = filter.take();
                    let text = self.fetch(&target, path, location)?;
                    trace!(path = %target, ?filter, "raw include");
                    node.kind = match filter {
                        Some(name) => NodeKind::Filter {
                            name,
                            attributes: Vec::new(),
                            text,
                        },
                        None => NodeKind::Text(Text {
                            segments: vec![Segment::Literal(text.clone())],
                            raw: text,
                        }),
                    };
                    continue;
                }
                _ => {}
            }
            for child in node.blocks_mut() {
                self.resolve_includes(child, path)?;
            }
        }
        Ok(())
    }

    fn include(
        &mut self,
        target: &str,
        content: Block,
        from: &str,
        location: Location,
    ) -> PugmillResult<Block> {
        let (mut included, extends) = self.link_nested(target, from, location)?;
        // Blocks an included template inherited are not open to the includer.
        if extends {
            flatten_named_blocks(&mut included);
        }
        if !content.is_empty() && !replace_yields(&mut included, &content) {
            let path = default_yield_path(&included);
            push_at(&mut included, &path, Node::new(NodeKind::Block(content), location));
        }
        Ok(included)
    }

    fn resolve_path(&self, current: &str, target: &str) -> String {
        let joined = match target.strip_prefix('/') {
            Some(rest) => match &self.options.basedir {
                Some(base) => format!("{}/{rest}", base.trim_end_matches('/')),
                None => rest.to_string(),
            },
            None => match current.rfind('/') {
                Some(i) => format!("{}/{target}", &current[..i]),
                None => target.to_string(),
            },
        };
        let mut path = normalize_path(&joined);
        let file = path.rsplit('/').next().unwrap_or_default();
        if !file.contains('.') {
            path.push_str(".pug");
        }
        path
    }
}

/// Collapses `.` and `..` segments. `..` never climbs above the root.
fn normalize_path(path: &str) -> String {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    let joined = segments.join("/");
    if path.starts_with('/') {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Top-level content of an extending template, sorted by role.
#[derive(Default)]
struct ExtendingRoot {
    codes: Vec<Node>,
    overrides: Vec<(String, BlockMode, Block)>,
    mixins: Vec<Node>,
}

impl ExtendingRoot {
    /// Spliced includes are plain blocks; their content is sorted like the
    /// root's own.
    fn sort(&mut self, nodes: Vec<Node>, path: &str) -> PugmillResult<()> {
        for node in nodes {
            match node.kind {
                NodeKind::NamedBlock { name, mode, block } => {
                    self.overrides.push((name, mode, block));
                }
                NodeKind::Block(block) => self.sort(block.nodes, path)?,
                NodeKind::Mixin(_) => self.mixins.push(node),
                NodeKind::Code(Code::Statements(_)) => self.codes.push(node),
                NodeKind::Comment { .. } | NodeKind::BlockComment { .. } => {}
                other => {
                    return Err(LinkError::new(
                        LinkErrorKind::UnexpectedNodesInExtendingRoot {
                            node: other.describe().to_string(),
                        },
                        path,
                        node.location,
                    )
                    .into());
                }
            }
        }
        Ok(())
    }
}

/// Applies a child's block override to every matching declaration in
/// `block`. Returns whether anything matched.
fn merge_block(block: &mut Block, name: &str, mode: BlockMode, content: &Block) -> bool {
    let mut found = false;
    for node in &mut block.nodes {
        if let NodeKind::NamedBlock {
            name: declared,
            mode: BlockMode::Replace,
            block: target,
        } = &mut node.kind
        {
            if declared == name {
                found = true;
                match mode {
                    BlockMode::Replace => *target = content.clone(),
                    BlockMode::Append => target.nodes.extend(content.nodes.iter().cloned()),
                    BlockMode::Prepend => {
                        let existing = std::mem::take(&mut target.nodes);
                        target.nodes = content.nodes.clone();
                        target.nodes.extend(existing);
                    }
                }
                continue;
            }
        }
        for child in node.blocks_mut() {
            found |= merge_block(child, name, mode, content);
        }
    }
    found
}

fn flatten_named_blocks(block: &mut Block) {
    for node in &mut block.nodes {
        if let NodeKind::NamedBlock { block: inner, .. } = &mut node.kind {
            let inner = std::mem::take(inner);
            node.kind = NodeKind::Block(inner);
        }
        for child in node.blocks_mut() {
            flatten_named_blocks(child);
        }
    }
}

/// Puts a copy of `content` in place of every `yield`. Returns whether
/// there was one.
fn replace_yields(block: &mut Block, content: &Block) -> bool {
    let mut found = false;
    for node in &mut block.nodes {
        if matches!(node.kind, NodeKind::YieldBlock) {
            node.kind = NodeKind::Block(content.clone());
            found = true;
            continue;
        }
        for child in node.blocks_mut() {
            found |= replace_yields(child, content);
        }
    }
    found
}

fn yield_target(node: &Node) -> Option<&Block> {
    match &node.kind {
        NodeKind::Block(block) if !block.is_empty() => Some(block),
        NodeKind::Tag { element, .. } | NodeKind::InterpolatedTag { element, .. }
            if !element.text_only && !element.block.is_empty() =>
        {
            Some(&element.block)
        }
        _ => None,
    }
}

fn yield_target_mut(node: &mut Node) -> Option<&mut Block> {
    match &mut node.kind {
        NodeKind::Block(block) if !block.is_empty() => Some(block),
        NodeKind::Tag { element, .. } | NodeKind::InterpolatedTag { element, .. }
            if !element.text_only && !element.block.is_empty() =>
        {
            Some(&mut element.block)
        }
        _ => None,
    }
}

/// Child indices leading to the deepest, last non-text-only block.
fn default_yield_path(block: &Block) -> Vec<usize> {
    let mut path = Vec::new();
    let mut current = block;
    while let Some((i, inner)) = current
        .nodes
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, node)| yield_target(node).map(|inner| (i, inner)))
    {
        path.push(i);
        current = inner;
    }
    path
}

fn push_at(block: &mut Block, path: &[usize], node: Node) {
    match path.split_first() {
        Some((&i, rest)) => match block.nodes.get_mut(i).and_then(yield_target_mut) {
            Some(inner) => push_at(inner, rest, node),
            None => block.push(node),
        },
        None => block.push(node),
    }
}

fn hoist_mixins(block: &mut Block, mixins: &mut IndexMap<String, MixinDef>) {
    let nodes = std::mem::take(&mut block.nodes);
    for mut node in nodes {
        for child in node.blocks_mut() {
            hoist_mixins(child, mixins);
        }
        match node.kind {
            NodeKind::Mixin(mixin) => {
                if mixins.contains_key(&mixin.name) {
                    warn!(name = %mixin.name, "mixin redefined; the later definition wins");
                }
                mixins.insert(mixin.name.clone(), mixin);
            }
            _ => block.push(node),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::MemoryResolver;

    fn link_with(resolver: &MemoryResolver, path: &str, options: &Options) -> PugmillResult<Linked> {
        let source = resolver.resolve(path)?;
        let block = parse_source(&source, options)?;
        link(block, path, resolver, options)
    }

    fn link_path(resolver: &MemoryResolver, path: &str) -> PugmillResult<Linked> {
        link_with(resolver, path, &Options::default())
    }

    /// Raw text of every text node, in tree order.
    fn texts(block: &Block) -> Vec<String> {
        let mut out = Vec::new();
        for node in &block.nodes {
            if let NodeKind::Text(text) = &node.kind {
                out.push(text.raw.clone());
            }
            for child in node.blocks() {
                out.extend(texts(child));
            }
        }
        out
    }

    fn link_error(result: PugmillResult<Linked>) -> LinkErrorKind {
        match result.unwrap_err().root_cause() {
            PugmillError::Link(e) => e.kind.clone(),
            other => panic!("expected a link error, got {other}"),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_block_modes() {
        let resolver: MemoryResolver = [
            (
                "layout.pug",
                "html\n  body\n    block content\n      p default\n    block scripts\n      p base\n    block footer\n      p foot",
            ),
            (
                "page.pug",
                "extends layout\nblock content\n  p override\nblock append scripts\n  p extra\nblock prepend footer\n  p first",
            ),
        ]
        .into_iter()
        .collect();
        let linked = link_path(&resolver, "page.pug").unwrap();
        assert_eq!(
            texts(&linked.block),
            ["override", "base", "extra", "first", "foot"]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_multi_level_extends() {
        let resolver: MemoryResolver = [
            ("base.pug", "block a\n  p base-a\nblock b\n  p base-b"),
            ("mid.pug", "extends base\nblock a\n  p mid-a\n  block inner\n    p mid-inner"),
            ("leaf.pug", "extends mid\nblock inner\n  p leaf-inner\nblock append b\n  p leaf-b"),
        ]
        .into_iter()
        .collect();
        let linked = link_path(&resolver, "leaf.pug").unwrap();
        assert_eq!(
            texts(&linked.block),
            ["mid-a", "leaf-inner", "base-b", "leaf-b"]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_extending_root_rules() {
        let resolver: MemoryResolver = [
            ("layout.pug", "block content"),
            ("late.pug", "block a\nextends layout"),
            ("stray.pug", "extends layout\np stray"),
            (
                "allowed.pug",
                "extends layout\n//- note\n- var title = 'x'\nmixin m\n  p m\nblock content\n  +m",
            ),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            link_error(link_path(&resolver, "late.pug")),
            LinkErrorKind::ExtendsNotFirst
        );
        assert_eq!(
            link_error(link_path(&resolver, "stray.pug")),
            LinkErrorKind::UnexpectedNodesInExtendingRoot {
                node: "Tag".to_string()
            }
        );
        let linked = link_path(&resolver, "allowed.pug").unwrap();
        assert!(linked.mixins.contains_key("m"));
        assert!(matches!(
            linked.block.nodes[0].kind,
            NodeKind::Code(Code::Statements(_))
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_include_and_yield() {
        let resolver: MemoryResolver = [
            ("index.pug", "div\n  include partials/card\n    p inside\n  include partials/plain\n    p appended"),
            ("partials/card.pug", "section\n  h2 title\n  yield\n  p after"),
            ("partials/plain.pug", "ul\n  li one\n  li two"),
        ]
        .into_iter()
        .collect();
        let linked = link_path(&resolver, "index.pug").unwrap();
        assert_eq!(
            texts(&linked.block),
            ["title", "inside", "after", "one", "two", "appended"]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_included_extends_strips_blocks() {
        let resolver: MemoryResolver = [
            ("index.pug", "include widget\nblock side\n  p index-side"),
            ("widget.pug", "extends frame\nblock body\n  p widget"),
            ("frame.pug", "div\n  block body"),
        ]
        .into_iter()
        .collect();
        let linked = link_path(&resolver, "index.pug").unwrap();
        assert_eq!(texts(&linked.block), ["widget", "index-side"]);
        let has_named = linked
            .block
            .nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::NamedBlock { .. }))
            .count();
        assert_eq!(has_named, 1);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_included_blocks_stay_overridable() {
        let resolver: MemoryResolver = [
            ("layout.pug", "html\n  include head\n  block body\n    p body"),
            ("head.pug", "block title\n  p default"),
            ("page.pug", "extends layout\nblock title\n  p child"),
            ("append.pug", "extends layout\nblock append title\n  p more"),
        ]
        .into_iter()
        .collect();
        let linked = link_path(&resolver, "page.pug").unwrap();
        assert_eq!(texts(&linked.block), ["child", "body"]);
        let linked = link_path(&resolver, "append.pug").unwrap();
        assert_eq!(texts(&linked.block), ["default", "more", "body"]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_extending_root_includes() {
        let resolver: MemoryResolver = [
            ("layout.pug", "main\n  block content"),
            ("mixins.pug", "//- shared\n- var greeting = 'hi'\nmixin m\n  p from mixin"),
            ("page.pug", "extends layout\ninclude mixins\nblock content\n  +m"),
            ("markup.pug", "p stray"),
            ("stray.pug", "extends layout\ninclude markup\nblock content\n  p x"),
        ]
        .into_iter()
        .collect();
        let linked = link_path(&resolver, "page.pug").unwrap();
        assert!(linked.mixins.contains_key("m"));
        assert!(matches!(
            linked.block.nodes[0].kind,
            NodeKind::Code(Code::Statements(_))
        ));

        let err = link_path(&resolver, "stray.pug").unwrap_err();
        let PugmillError::Link(link) = &err else {
            panic!("expected a link error, got {err}");
        };
        assert_eq!(link.path, "stray.pug");
        assert_eq!(
            link.kind,
            LinkErrorKind::UnexpectedNodesInExtendingRoot {
                node: "Tag".to_string()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_every_yield_receives_content() {
        let resolver: MemoryResolver = [
            ("index.pug", "include twice\n  p inner"),
            ("twice.pug", "header\n  yield\nfooter\n  yield"),
        ]
        .into_iter()
        .collect();
        let linked = link_path(&resolver, "index.pug").unwrap();
        assert_eq!(texts(&linked.block), ["inner", "inner"]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_raw_includes() {
        let resolver: MemoryResolver = [
            ("index.pug", "pre\n  include notes.txt\nscript\n  include:cdata data.xml"),
            ("notes.txt", "<b>kept</b>"),
            ("data.xml", "<x/>"),
        ]
        .into_iter()
        .collect();
        let linked = link_path(&resolver, "index.pug").unwrap();
        assert_eq!(texts(&linked.block), ["<b>kept</b>"]);
        let NodeKind::Tag { element, .. } = &linked.block.nodes[1].kind else {
            panic!("expected script tag");
        };
        assert!(matches!(
            &element.block.nodes[0].kind,
            NodeKind::Filter { name, text, .. } if name == "cdata" && text == "<x/>"
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_missing_and_circular() {
        let resolver: MemoryResolver = [
            ("a.pug", "include b"),
            ("b.pug", "include a"),
            ("self.pug", "extends self"),
            ("lost.pug", "p\n  include nowhere"),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            link_error(link_path(&resolver, "a.pug")),
            LinkErrorKind::CircularReference {
                target: "a.pug".to_string()
            }
        );
        assert!(matches!(
            link_error(link_path(&resolver, "self.pug")),
            LinkErrorKind::CircularReference { .. }
        ));
        let err = link_path(&resolver, "lost.pug").unwrap_err();
        let PugmillError::Link(link) = &err else {
            panic!("expected a link error, got {err}");
        };
        assert_eq!(link.path, "lost.pug");
        assert_eq!(link.line, 2);
        assert_eq!(
            link.kind,
            LinkErrorKind::UnresolvedPath {
                target: "nowhere.pug".to_string()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_errors_in_included_templates_carry_path() {
        let resolver: MemoryResolver = [("index.pug", "include broken"), ("broken.pug", "p(")]
            .into_iter()
            .collect();
        let err = link_path(&resolver, "index.pug").unwrap_err();
        assert!(matches!(
            &err,
            PugmillError::Included { path, .. } if path == "broken.pug"
        ));
        assert!(matches!(err.root_cause(), PugmillError::Lex(_)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_path_resolution() {
        let resolver = MemoryResolver::new();
        let options = Options::default().with_basedir("/views");
        let linker = Linker {
            resolver: &resolver,
            options: &options,
            stack: Vec::new(),
        };
        assert_eq!(linker.resolve_path("pages/home.pug", "card"), "pages/card.pug");
        assert_eq!(
            linker.resolve_path("pages/home.pug", "../shared/./nav"),
            "shared/nav.pug"
        );
        assert_eq!(linker.resolve_path("home.pug", "/layout"), "/views/layout.pug");
        assert_eq!(linker.resolve_path("home.pug", "style.css"), "style.css");
        assert_eq!(linker.resolve_path("a/b.pug", "../../../x"), "x.pug");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_mixins_hoisted() {
        let resolver: MemoryResolver = [(
            "index.pug",
            "+a\nmixin a\n  p first\ndiv\n  mixin a\n    p second\n  mixin b\n    mixin c\n      p c",
        )]
        .into_iter()
        .collect();
        let linked = link_path(&resolver, "index.pug").unwrap();
        assert_eq!(
            linked.mixins.keys().collect::<Vec<_>>(),
            ["a", "c", "b"]
        );
        assert_eq!(texts(&linked.mixins["a"].block), ["second"]);
        assert_eq!(linked.block.nodes.len(), 2);
    }
}
