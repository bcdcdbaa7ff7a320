use crate::ast::{Block, Code, Element, MixinName, Node, NodeKind, Segment};
use crate::error::PugmillResult;
use crate::expr::{AssignOp, Expr, Statement};
use crate::interface::{MemoryResolver, TemplateResolver};
use crate::linker::{Linked, link, parse_source};
use crate::options::{Filters, Options};
use crate::render;
use crate::value::Value;

/// Path a template compiled from a bare string is linked under.
const ANONYMOUS_PATH: &str = "template.pug";

/// A Template is a compiled template: lexed, parsed, and linked against its
/// `extends` and `include` targets, ready to be rendered any number of times.
///
/// The linked tree is immutable after compilation, so one `Template` can be
/// shared across threads and rendered concurrently.
///
/// # Example
///
/// ```rust
/// use pugmill::{Template, Value};
///
/// let template = Template::new("p Hello #{name}").unwrap();
/// let data = Value::map().with("name", "World");
/// assert_eq!(template.render(&data).unwrap(), "<p>Hello World</p>");
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    name: Option<String>,
    linked: Linked,
    options: Options,
    #[cfg_attr(feature = "serde", serde(skip))]
    filters: Filters,
}

impl Template {
    /// Compiles a self-contained template with default options.
    ///
    /// # Errors
    ///
    /// Returns a lex, parse or link error. Any `extends` or `include` fails
    /// with an unresolved path, since there is nothing to resolve against.
    pub fn new<T: Into<String>>(source: T) -> PugmillResult<Self> {
        Self::with_options(source, Options::default())
    }

    /// Compiles a self-contained template with the given options.
    ///
    /// # Errors
    ///
    /// See [`Template::new`].
    pub fn with_options<T: Into<String>>(source: T, options: Options) -> PugmillResult<Self> {
        let source = source.into();
        let block = parse_source(&source, &options)?;
        let linked = link(block, ANONYMOUS_PATH, &MemoryResolver::new(), &options)?;
        Ok(Self {
            source,
            name: None,
            linked,
            options,
            filters: Filters::new(),
        })
    }

    /// Compiles the template stored as `name`, loading its `extends` and
    /// `include` targets through `resolver`.
    ///
    /// # Arguments
    ///
    /// * `name` - Path of the template; relative includes resolve against its directory
    /// * `resolver` - Source of the template and everything it references
    /// * `options` - Compilation and rendering settings
    ///
    /// # Errors
    ///
    /// * `PugmillError::MissingTemplate` if `resolver` has no template under `name`
    /// * Lex, parse or link errors, wrapped in `PugmillError::Included` when
    ///   they come from a referenced file
    pub fn compile(
        name: &str,
        resolver: &dyn TemplateResolver,
        options: &Options,
    ) -> PugmillResult<Self> {
        let source = resolver.resolve(name)?.into_owned();
        let block = parse_source(&source, options)?;
        let linked = link(block, name, resolver, options)?;
        Ok(Self {
            source,
            name: Some(name.to_string()),
            linked,
            options: options.clone(),
            filters: Filters::new(),
        })
    }

    /// Replaces the filters available to `:name` blocks.
    #[must_use]
    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub const fn linked(&self) -> &Linked {
        &self.linked
    }

    /// Names of the mixins defined by this template and everything it links.
    pub fn mixins(&self) -> impl Iterator<Item = &str> {
        self.linked.mixins.keys().map(String::as_str)
    }

    /// Renders the template against `data`.
    ///
    /// Missing data is not an error: absent names and members render as
    /// empty output and count as false.
    ///
    /// # Errors
    ///
    /// Returns `PugmillError::Render` for an undefined mixin, an unknown
    /// filter, or a loop or call depth past the configured limits.
    ///
    /// # Example
    ///
    /// ```rust
    /// use pugmill::{Template, Value};
    ///
    /// let template = Template::new("each n in nums\n  li= n\nelse\n  li none").unwrap();
    /// let data = Value::map().with("nums", vec![1, 2]);
    /// assert_eq!(template.render(&data).unwrap(), "<li>1</li><li>2</li>");
    /// assert_eq!(template.render(&Value::Null).unwrap(), "<li>none</li>");
    /// ```
    pub fn render(&self, data: &Value) -> PugmillResult<String> {
        Ok(render::render(&self.linked, data, &self.options, &self.filters)?)
    }

    /// Lists the root data names the template reads, in first-use order.
    ///
    /// Names bound by `each` loops, mixin parameters or statements are left
    /// out, as are the `attributes` and `block` bindings inside mixins.
    ///
    /// ```
    /// use pugmill::Template;
    ///
    /// let template = Template::new("- var greeting = 'Hi'\np #{greeting} #{user.name}\neach item in items\n  li= item").unwrap();
    /// assert_eq!(template.variables(), vec!["user", "items"]);
    /// ```
    pub fn variables(&self) -> Vec<String> {
        let mut collector = VariableCollector::default();
        collector.block(&self.linked.block);
        for mixin in self.linked.mixins.values() {
            for param in &mixin.params {
                if let Some(default) = &param.default {
                    collector.expr(default);
                }
            }
            collector.scoped(|c| {
                c.bound.extend(mixin.params.iter().map(|p| p.name.as_str()));
                c.bound.extend(["attributes", "block"]);
                c.block(&mixin.block);
            });
        }
        collector.found.into_iter().map(str::to_string).collect()
    }
}

#[derive(Default)]
struct VariableCollector<'a> {
    bound: Vec<&'a str>,
    found: Vec<&'a str>,
}

impl<'a> VariableCollector<'a> {
    fn name(&mut self, name: &'a str) {
        if !self.bound.contains(&name) && !self.found.contains(&name) {
            self.found.push(name);
        }
    }

    fn expr(&mut self, expr: &'a Expr) {
        let mut names = Vec::new();
        expr.collect_identifiers(&mut names);
        for name in names {
            self.name(name);
        }
    }

    /// Runs `f`, then forgets the names it bound.
    fn scoped(&mut self, f: impl FnOnce(&mut Self)) {
        let mark = self.bound.len();
        f(self);
        self.bound.truncate(mark);
    }

    fn block(&mut self, block: &'a Block) {
        for node in &block.nodes {
            self.node(node);
        }
    }

    fn element(&mut self, element: &'a Element) {
        for attribute in &element.attributes {
            self.expr(&attribute.value);
        }
        for spread in &element.spreads {
            self.expr(spread);
        }
        self.block(&element.block);
    }

    fn statement(&mut self, statement: &'a Statement) {
        match statement {
            Statement::Declare { name, value } => {
                self.expr(value);
                self.bound.push(name);
            }
            Statement::Assign { name, op, value } => {
                self.expr(value);
                if *op != AssignOp::Set {
                    self.name(name);
                }
                self.bound.push(name);
            }
        }
    }

    fn node(&mut self, node: &'a Node) {
        match &node.kind {
            NodeKind::Block(block)
            | NodeKind::NamedBlock { block, .. }
            | NodeKind::BlockComment { block, .. } => self.block(block),
            NodeKind::Tag { element, .. } => self.element(element),
            NodeKind::InterpolatedTag { expr, element } => {
                self.expr(expr);
                self.element(element);
            }
            NodeKind::Text(text) => {
                for segment in &text.segments {
                    match segment {
                        Segment::Literal(_) => {}
                        Segment::Escaped(expr) | Segment::Unescaped(expr) => self.expr(expr),
                        Segment::Tag(node) => self.node(node),
                    }
                }
            }
            NodeKind::Code(Code::Output { expr, .. }) => self.expr(expr),
            NodeKind::Code(Code::Statements(statements)) => {
                for statement in statements {
                    self.statement(statement);
                }
            }
            NodeKind::Conditional {
                test,
                consequent,
                alternate,
                ..
            } => {
                self.expr(test);
                self.block(consequent);
                if let Some(alternate) = alternate {
                    self.node(alternate);
                }
            }
            NodeKind::Case { expr, block } | NodeKind::While { test: expr, block } => {
                self.expr(expr);
                self.block(block);
            }
            NodeKind::When { expr, block } => {
                if let Some(expr) = expr {
                    self.expr(expr);
                }
                if let Some(block) = block {
                    self.block(block);
                }
            }
            NodeKind::Each {
                value,
                key,
                expr,
                block,
                alternate,
            } => {
                self.expr(expr);
                self.scoped(|c| {
                    c.bound.push(value);
                    c.bound.extend(key.as_deref());
                    c.block(block);
                });
                if let Some(alternate) = alternate {
                    self.block(alternate);
                }
            }
            NodeKind::MixinCall(call) => {
                if let MixinName::Dynamic(expr) = &call.name {
                    self.expr(expr);
                }
                for arg in &call.args {
                    self.expr(arg);
                }
                for attribute in &call.attributes {
                    self.expr(&attribute.value);
                }
                for spread in &call.spreads {
                    self.expr(spread);
                }
                if let Some(block) = &call.block {
                    self.block(block);
                }
            }
            NodeKind::Filter { attributes, .. } => {
                for attribute in attributes {
                    self.expr(&attribute.value);
                }
            }
            NodeKind::Comment { .. }
            | NodeKind::Doctype(_)
            | NodeKind::Mixin(_)
            | NodeKind::MixinBlock
            | NodeKind::Include { .. }
            | NodeKind::RawInclude { .. }
            | NodeKind::Extends { .. }
            | NodeKind::YieldBlock => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LinkErrorKind, PugmillError};

    #[test]
    #[ntest::timeout(100)]
    fn test_render() {
        let template = Template::new("p Hello #{name}").unwrap();
        let data = Value::map().with("name", "World");
        assert_eq!(template.render(&data).unwrap(), "<p>Hello World</p>");
        assert_eq!(template.render(&Value::Null).unwrap(), "<p>Hello </p>");
        assert_eq!(template.name(), None);
        assert_eq!(template.source(), "p Hello #{name}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_standalone_include_fails() {
        let err = Template::new("include other").unwrap_err();
        assert!(matches!(
            err,
            PugmillError::Link(ref e) if e.kind == LinkErrorKind::UnresolvedPath { target: "other.pug".to_string() }
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_compile_with_resolver() {
        let resolver: MemoryResolver = [
            ("pages/home.pug", "extends ../layout\nblock body\n  include parts/hero"),
            ("layout.pug", "body\n  block body"),
            ("pages/parts/hero.pug", "h1= title"),
        ]
        .into_iter()
        .collect();
        let template = Template::compile("pages/home.pug", &resolver, &Options::default()).unwrap();
        assert_eq!(template.name(), Some("pages/home.pug"));
        let data = Value::map().with("title", "Hi");
        assert_eq!(template.render(&data).unwrap(), "<body><h1>Hi</h1></body>");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_custom_filters() {
        let mut filters = Filters::new();
        filters.register("upper", |text, _| text.to_uppercase());
        let template = Template::new("p\n  :upper loud").unwrap().with_filters(filters);
        assert_eq!(template.render(&Value::Null).unwrap(), "<p>LOUD</p>");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_variables() {
        let src = "\
- var local = 1
- count += 1
p= local + title
each item, i in items
  li(class=kind)= item + i
mixin card(heading, size=defaultSize)
  h2(class=attributes.class)= heading + suffix
  if block
    block
+card(cardTitle)
case mode
  when 'a': p= extra";
        let template = Template::new(src).unwrap();
        assert_eq!(
            template.variables(),
            vec![
                "count",
                "title",
                "items",
                "kind",
                "cardTitle",
                "mode",
                "extra",
                "defaultSize",
                "suffix"
            ]
        );
        assert_eq!(template.mixins().collect::<Vec<_>>(), vec!["card"]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_template_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Template>();

        let template = std::sync::Arc::new(Template::new("p= n").unwrap());
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let template = std::sync::Arc::clone(&template);
                std::thread::spawn(move || template.render(&Value::map().with("n", n)).unwrap())
            })
            .collect();
        let outputs: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outputs, vec!["<p>0</p>", "<p>1</p>", "<p>2</p>", "<p>3</p>"]);
    }
}
