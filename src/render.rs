use std::borrow::Cow;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::ast::{Attribute, Block, Code, Element, MixinCall, MixinDef, MixinName, Node, NodeKind, Segment, Text};
use crate::error::RenderError;
use crate::expr::{Expr, Scope, Statement};
use crate::linker::Linked;
use crate::options::{Filters, Options};
use crate::token::Location;
use crate::value::Value;

type RenderResult = Result<(), RenderError>;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Appends `text` to `out` with `& < > " '` replaced by entities.
pub fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    escape_into(&mut out, text);
    out
}

/// Markup for a `doctype` keyword; unknown keywords become a custom doctype.
pub fn doctype_markup(name: &str) -> Cow<'static, str> {
    let markup = match name.to_ascii_lowercase().as_str() {
        "html" => "<!DOCTYPE html>",
        "xml" => r#"<?xml version="1.0" encoding="utf-8" ?>"#,
        "transitional" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd">"#
        }
        "strict" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Strict//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd">"#
        }
        "frameset" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Frameset//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-frameset.dtd">"#
        }
        "1.1" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">"#
        }
        "basic" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML Basic 1.1//EN" "http://www.w3.org/TR/xhtml-basic/xhtml-basic11.dtd">"#
        }
        "mobile" => {
            r#"<!DOCTYPE html PUBLIC "-//WAPFORUM//DTD XHTML Mobile 1.2//EN" "http://www.openmobilealliance.org/tech/DTD/xhtml-mobile12.dtd">"#
        }
        "plist" => {
            r#"<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">"#
        }
        _ => return Cow::Owned(format!("<!DOCTYPE {name}>")),
    };
    Cow::Borrowed(markup)
}

/// The doctype a `doctype` node stands for. A bare `doctype` takes the
/// configured one, then `html`.
fn doctype_name<'a>(value: Option<&'a str>, options: &'a Options) -> &'a str {
    value.or(options.doctype.as_deref()).unwrap_or("html")
}

/// The first `doctype` in tree order.
fn find_doctype(block: &Block) -> Option<Option<&str>> {
    block.nodes.iter().find_map(|node| {
        if let NodeKind::Doctype(value) = &node.kind {
            Some(value.as_deref())
        } else {
            node.blocks().into_iter().find_map(find_doctype)
        }
    })
}

/// Class names contributed by one `class` value: strings as-is, arrays
/// flattened, maps by their truthy keys.
fn push_classes(value: &Value, escape: bool, classes: &mut Vec<String>) {
    match value {
        Value::Null | Value::Bool(_) => {}
        Value::Array(items) => {
            for item in items {
                push_classes(item, escape, classes);
            }
        }
        Value::Map(map) => {
            for (name, enabled) in map {
                if enabled.is_truthy() {
                    classes.push(if escape { escape_html(name) } else { name.clone() });
                }
            }
        }
        Value::String(_) | Value::Int(_) | Value::Float(_) => {
            let class = value.to_output();
            if !class.is_empty() {
                classes.push(if escape { escape_html(&class) } else { class });
            }
        }
    }
}

fn style_text(value: &Value) -> String {
    match value {
        Value::Map(map) => map
            .iter()
            .filter(|(_, v)| !matches!(v, Value::Null | Value::Bool(false)))
            .map(|(k, v)| format!("{k}:{};", v.to_output()))
            .collect(),
        Value::Null
        | Value::Bool(_)
        | Value::Int(_)
        | Value::Float(_)
        | Value::String(_)
        | Value::Array(_) => value.to_output(),
    }
}

/// Renders a linked template against `data`.
///
/// # Errors
/// Calling an undefined mixin, an unregistered filter, a `while` loop over
/// its iteration limit, or mixin calls nested past `max_call_depth`.
pub fn render(
    linked: &Linked,
    data: &Value,
    options: &Options,
    filters: &Filters,
) -> Result<String, RenderError> {
    let doctype = find_doctype(&linked.block)
        .map(|value| doctype_name(value, options))
        .or(options.doctype.as_deref())
        .map(doctype_markup);
    let terse = doctype
        .as_deref()
        .is_some_and(|markup| markup.eq_ignore_ascii_case("<!doctype html>"));
    let xml = doctype
        .as_deref()
        .is_some_and(|markup| markup.starts_with("<?xml"));

    let mut renderer = Renderer {
        mixins: &linked.mixins,
        options,
        filters,
        root: data,
        frames: vec![Frame {
            scopes: vec![IndexMap::new()],
            content: None,
            caller: 0,
        }],
        current: 0,
        terse,
        xml,
        out: String::new(),
    };
    debug!(terse, xml, "rendering template");
    renderer.render_block(&linked.block)?;
    debug!(bytes = renderer.out.len(), "rendered template");
    Ok(renderer.out)
}

/// Name resolution for one call frame, falling back to the root data.
struct FrameScope<'a> {
    scopes: &'a [IndexMap<String, Value>],
    root: &'a Value,
}

impl Scope for FrameScope<'_> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.root.get(name))
    }
}

/// The template itself, or one mixin invocation.
struct Frame<'t> {
    scopes: Vec<IndexMap<String, Value>>,
    /// Block content passed to the mixin call.
    content: Option<&'t Block>,
    /// Frame the content renders in.
    caller: usize,
}

struct Renderer<'t> {
    mixins: &'t IndexMap<String, MixinDef>,
    options: &'t Options,
    filters: &'t Filters,
    root: &'t Value,
    frames: Vec<Frame<'t>>,
    current: usize,
    terse: bool,
    xml: bool,
    out: String,
}

const fn render_error_location(location: Location) -> (usize, usize) {
    (location.line, location.column)
}

impl<'t> Renderer<'t> {
    fn eval(&self, expr: &Expr) -> Value {
        let scope = FrameScope {
            scopes: &self.frames[self.current].scopes,
            root: self.root,
        };
        expr.eval(&scope)
    }

    fn push_scope(&mut self, scope: IndexMap<String, Value>) {
        self.frames[self.current].scopes.push(scope);
    }

    fn pop_scope(&mut self) {
        self.frames[self.current].scopes.pop();
    }

    fn render_block(&mut self, block: &'t Block) -> RenderResult {
        for node in &block.nodes {
            self.render_node(node)?;
        }
        Ok(())
    }

    fn render_node(&mut self, node: &'t Node) -> RenderResult {
        match &node.kind {
            NodeKind::Block(block) | NodeKind::NamedBlock { block, .. } => self.render_block(block),
            NodeKind::Tag { name, element } => self.render_tag(name, element),
            NodeKind::InterpolatedTag { expr, element } => {
                let name = self.eval(expr).to_output();
                self.render_tag(&name, element)
            }
            NodeKind::Text(text) => self.render_text(text),
            NodeKind::Code(Code::Output { expr, escape }) => {
                let value = self.eval(expr).to_output();
                if *escape {
                    escape_into(&mut self.out, &value);
                } else {
                    self.out.push_str(&value);
                }
                Ok(())
            }
            NodeKind::Code(Code::Statements(statements)) => {
                for statement in statements {
                    self.execute(statement);
                }
                Ok(())
            }
            NodeKind::Comment { text, buffer } => {
                if *buffer {
                    self.out.push_str("<!--");
                    self.out.push_str(text);
                    self.out.push_str("-->");
                }
                Ok(())
            }
            NodeKind::BlockComment {
                text,
                buffer,
                block,
            } => {
                if *buffer {
                    self.out.push_str("<!--");
                    self.out.push_str(text);
                    self.render_block(block)?;
                    self.out.push_str("-->");
                }
                Ok(())
            }
            NodeKind::Doctype(value) => {
                let name = doctype_name(value.as_deref(), self.options);
                self.out.push_str(&doctype_markup(name));
                Ok(())
            }
            NodeKind::Conditional {
                test,
                negate,
                consequent,
                alternate,
            } => {
                if self.eval(test).is_truthy() != *negate {
                    self.render_block(consequent)
                } else if let Some(alternate) = alternate {
                    self.render_node(alternate)
                } else {
                    Ok(())
                }
            }
            NodeKind::Case { expr, block } => self.render_case(expr, block),
            NodeKind::Each {
                value,
                key,
                expr,
                block,
                alternate,
            } => self.render_each(value, key.as_deref(), expr, block, alternate.as_ref()),
            NodeKind::While { test, block } => self.render_while(test, block, node.location),
            NodeKind::MixinCall(call) => self.render_call(call, node.location),
            NodeKind::MixinBlock => self.render_mixin_block(),
            NodeKind::Filter {
                name,
                attributes,
                text,
            } => {
                let mut evaluated = IndexMap::new();
                for attribute in attributes {
                    evaluated.insert(attribute.name.clone(), self.eval(&attribute.value));
                }
                let output = self.filters.apply(name, text, &evaluated).ok_or_else(|| {
                    let (line, column) = render_error_location(node.location);
                    RenderError::UnknownFilter {
                        name: name.clone(),
                        line,
                        column,
                    }
                })?;
                self.out.push_str(&output);
                Ok(())
            }
            // Definitions are hoisted by the linker; the rest never survive linking.
            NodeKind::When { .. }
            | NodeKind::Mixin(_)
            | NodeKind::Include { .. }
            | NodeKind::RawInclude { .. }
            | NodeKind::Extends { .. }
            | NodeKind::YieldBlock => Ok(()),
        }
    }

    fn render_tag(&mut self, name: &str, element: &'t Element) -> RenderResult {
        self.out.push('<');
        self.out.push_str(name);
        self.render_attributes(&element.attributes, &element.spreads);

        let void = element.self_closing || (!self.xml && VOID_ELEMENTS.contains(&name));
        if void && element.block.is_empty() {
            if self.terse && !element.self_closing {
                self.out.push('>');
            } else {
                self.out.push_str("/>");
            }
            return Ok(());
        }

        self.out.push('>');
        self.render_block(&element.block)?;
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
        Ok(())
    }

    fn render_attributes(&mut self, attributes: &[Attribute], spreads: &[Expr]) {
        let mut classes = Vec::new();
        let mut entries: IndexMap<String, (Value, bool)> = IndexMap::new();
        for attribute in attributes {
            let value = self.eval(&attribute.value);
            if attribute.name == "class" {
                push_classes(&value, attribute.must_escape, &mut classes);
            } else {
                entries.insert(attribute.name.clone(), (value, attribute.must_escape));
            }
        }
        for spread in spreads {
            if let Value::Map(map) = self.eval(spread) {
                for (name, value) in map {
                    if name == "class" {
                        push_classes(&value, true, &mut classes);
                    } else {
                        entries.insert(name, (value, true));
                    }
                }
            }
        }

        if !classes.is_empty() {
            self.out.push_str(" class=\"");
            self.out.push_str(&classes.join(" "));
            self.out.push('"');
        }
        for (name, (value, escape)) in &entries {
            self.write_attribute(name, value, *escape);
        }
    }

    fn write_attribute(&mut self, name: &str, value: &Value, escape: bool) {
        let text = match value {
            Value::Null | Value::Bool(false) => return,
            Value::Bool(true) => {
                self.out.push(' ');
                self.out.push_str(name);
                if !self.terse {
                    self.out.push_str("=\"");
                    self.out.push_str(name);
                    self.out.push('"');
                }
                return;
            }
            Value::Map(_) if name == "style" => style_text(value),
            Value::Map(_) => {
                self.out.push(' ');
                self.out.push_str(name);
                self.out.push_str("=\"");
                escape_into(&mut self.out, &value.to_json());
                self.out.push('"');
                return;
            }
            Value::Array(items) => items
                .iter()
                .map(Value::to_output)
                .collect::<Vec<_>>()
                .join(" "),
            Value::Int(_) | Value::Float(_) | Value::String(_) => value.to_output(),
        };
        self.out.push(' ');
        self.out.push_str(name);
        self.out.push_str("=\"");
        if escape {
            escape_into(&mut self.out, &text);
        } else {
            self.out.push_str(&text);
        }
        self.out.push('"');
    }

    fn render_text(&mut self, text: &'t Text) -> RenderResult {
        for segment in &text.segments {
            match segment {
                Segment::Literal(literal) => self.out.push_str(literal),
                Segment::Escaped(expr) => {
                    let value = self.eval(expr).to_output();
                    escape_into(&mut self.out, &value);
                }
                Segment::Unescaped(expr) => {
                    let value = self.eval(expr).to_output();
                    self.out.push_str(&value);
                }
                Segment::Tag(node) => self.render_node(node)?,
            }
        }
        Ok(())
    }

    fn execute(&mut self, statement: &Statement) {
        match statement {
            Statement::Declare { name, value } => {
                let value = self.eval(value);
                if let Some(scope) = self.frames[self.current].scopes.last_mut() {
                    scope.insert(name.clone(), value);
                }
            }
            Statement::Assign { name, op, value } => {
                let value = self.eval(value);
                let current = self.eval(&Expr::Ident(name.clone()));
                let updated = op.apply(&current, value);
                let frame = &mut self.frames[self.current];
                let index = frame
                    .scopes
                    .iter()
                    .rposition(|scope| scope.contains_key(name.as_str()))
                    .unwrap_or(0);
                if let Some(scope) = frame.scopes.get_mut(index) {
                    scope.insert(name.clone(), updated);
                }
            }
        }
    }

    /// Renders the first matching `when`, falling through bodiless ones,
    /// else `default`.
    fn render_case(&mut self, expr: &Expr, block: &'t Block) -> RenderResult {
        let value = self.eval(expr);
        let mut falling = false;
        let mut default = None;
        for node in &block.nodes {
            let NodeKind::When { expr, block } = &node.kind else {
                continue;
            };
            let Some(expr) = expr else {
                if falling {
                    if let Some(block) = block {
                        return self.render_block(block);
                    }
                }
                default = default.or(block.as_ref());
                continue;
            };
            if falling || value.strict_eq(&self.eval(expr)) {
                match block {
                    Some(block) => return self.render_block(block),
                    None => falling = true,
                }
            }
        }
        match default {
            Some(block) => self.render_block(block),
            None => Ok(()),
        }
    }

    fn render_each(
        &mut self,
        value_name: &str,
        key_name: Option<&str>,
        expr: &Expr,
        block: &'t Block,
        alternate: Option<&'t Block>,
    ) -> RenderResult {
        let entries: Vec<(Value, Value)> = match self.eval(expr) {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (Value::from(i), item))
                .collect(),
            Value::Map(map) => map
                .into_iter()
                .map(|(key, item)| (Value::String(key), item))
                .collect(),
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_) => {
                Vec::new()
            }
        };

        if entries.is_empty() {
            return match alternate {
                Some(alternate) => self.render_block(alternate),
                None => Ok(()),
            };
        }

        for (key, item) in entries {
            let mut scope = IndexMap::new();
            scope.insert(value_name.to_string(), item);
            if let Some(key_name) = key_name {
                scope.insert(key_name.to_string(), key);
            }
            self.push_scope(scope);
            let result = self.render_block(block);
            self.pop_scope();
            result?;
        }
        Ok(())
    }

    fn render_while(&mut self, test: &Expr, block: &'t Block, location: Location) -> RenderResult {
        let mut iterations = 0_usize;
        while self.eval(test).is_truthy() {
            if let Some(limit) = self.options.max_while_iterations {
                if iterations >= limit {
                    let (line, column) = render_error_location(location);
                    return Err(RenderError::IterationLimit {
                        limit,
                        line,
                        column,
                    });
                }
            }
            iterations += 1;
            self.render_block(block)?;
        }
        Ok(())
    }

    /// The `attributes` map a mixin body sees.
    fn call_attributes(&self, call: &MixinCall) -> Value {
        let mut classes = Vec::new();
        let mut rest = IndexMap::new();
        for attribute in &call.attributes {
            let value = self.eval(&attribute.value);
            if attribute.name == "class" {
                push_classes(&value, false, &mut classes);
            } else {
                rest.insert(attribute.name.clone(), value);
            }
        }
        for spread in &call.spreads {
            if let Value::Map(map) = self.eval(spread) {
                for (name, value) in map {
                    if name == "class" {
                        push_classes(&value, false, &mut classes);
                    } else {
                        rest.insert(name, value);
                    }
                }
            }
        }

        let mut attributes = IndexMap::new();
        if !classes.is_empty() {
            attributes.insert("class".to_string(), Value::String(classes.join(" ")));
        }
        attributes.extend(rest);
        Value::Map(attributes)
    }

    fn render_call(&mut self, call: &'t MixinCall, location: Location) -> RenderResult {
        let name = match &call.name {
            MixinName::Static(name) => Cow::Borrowed(name.as_str()),
            MixinName::Dynamic(expr) => Cow::Owned(self.eval(expr).to_output()),
        };
        let mixins = self.mixins;
        let (line, column) = render_error_location(location);
        let Some(mixin) = mixins.get(&*name) else {
            return Err(RenderError::UndefinedMixin {
                name: name.into_owned(),
                line,
                column,
            });
        };
        if self.frames.len() > self.options.max_call_depth {
            return Err(RenderError::CallDepth {
                limit: self.options.max_call_depth,
                line,
                column,
            });
        }
        trace!(name = %name, depth = self.frames.len(), "calling mixin");

        let mut args = call.args.iter().map(|arg| self.eval(arg)).collect::<Vec<_>>().into_iter();
        let mut scope = IndexMap::new();
        for param in &mixin.params {
            let value = if param.rest {
                Value::Array(args.by_ref().collect())
            } else {
                match args.next().filter(|arg| !arg.is_null()) {
                    Some(arg) => arg,
                    None => param
                        .default
                        .as_ref()
                        .map_or(Value::Null, |default| self.eval(default)),
                }
            };
            scope.insert(param.name.clone(), value);
        }
        scope.insert("attributes".to_string(), self.call_attributes(call));
        scope.insert("block".to_string(), Value::Bool(call.block.is_some()));

        self.frames.push(Frame {
            scopes: vec![scope],
            content: call.block.as_ref(),
            caller: self.current,
        });
        let previous = self.current;
        self.current = self.frames.len() - 1;
        let result = self.render_block(&mixin.block);
        self.current = previous;
        self.frames.pop();
        result
    }

    /// A bare `block` in a mixin body: the call's content, in the caller's scope.
    fn render_mixin_block(&mut self) -> RenderResult {
        let frame = &self.frames[self.current];
        let (Some(content), caller) = (frame.content, frame.caller) else {
            return Ok(());
        };
        let previous = self.current;
        self.current = caller;
        let result = self.render_block(content);
        self.current = previous;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::MemoryResolver;
    use crate::linker::{link, parse_source};

    fn render_with(src: &str, data: &Value, options: &Options) -> Result<String, RenderError> {
        let block = parse_source(src, options).unwrap();
        let linked = link(block, "test.pug", &MemoryResolver::new(), options).unwrap();
        render(&linked, data, options, &Filters::new())
    }

    fn render_src(src: &str, data: &Value) -> String {
        render_with(src, data, &Options::default()).unwrap()
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_escape() {
        assert_eq!(escape_html(r#"<a href="x">'&'</a>"#), "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_text_interpolation() {
        let data = Value::map().with("name", "<b>");
        assert_eq!(render_src("p Hello #{name}", &data), "<p>Hello &lt;b&gt;</p>");
        assert_eq!(render_src("p Hello !{name}", &data), "<p>Hello <b></p>");
        assert_eq!(render_src("p= name", &data), "<p>&lt;b&gt;</p>");
        assert_eq!(render_src("p!= name", &data), "<p><b></p>");
        assert_eq!(
            render_src("p see #[em #{name}] now", &data),
            "<p>see <em>&lt;b&gt;</em> now</p>"
        );
        assert_eq!(render_src("p= missing.deep", &data), "<p></p>");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_attributes() {
        let data = Value::map()
            .with("active", true)
            .with("extra", vec!["x", "y"])
            .with("styles", Value::map().with("color", "red").with("margin", 0))
            .with("attrs", Value::map().with("title", "t").with("class", "spread"));
        assert_eq!(
            render_src("a.btn(class=extra href='/?a=1&b=2')", &data),
            r#"<a class="btn x y" href="/?a=1&amp;b=2"></a>"#
        );
        assert_eq!(
            render_src("div(class={on: active, off: !active})", &data),
            r#"<div class="on"></div>"#
        );
        assert_eq!(
            render_src("div(style=styles)", &data),
            r#"<div style="color:red;margin:0;"></div>"#
        );
        assert_eq!(
            render_src("div#main(title='a')&attributes(attrs)", &data),
            r#"<div class="spread" id="main" title="t"></div>"#
        );
        assert_eq!(
            render_src("div(data-x!='<raw>' data-y='<esc>')", &data),
            r#"<div data-x="<raw>" data-y="&lt;esc&gt;"></div>"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_boolean_attributes_and_terse_mode() {
        let data = Value::map();
        assert_eq!(
            render_src("input(type='checkbox' checked)", &data),
            render_src("input(type='checkbox' checked=true)", &data)
        );
        assert_eq!(
            render_src("input(type='checkbox' checked=false)", &data),
            r#"<input type="checkbox"/>"#
        );
        assert_eq!(
            render_src("input(checked)", &data),
            r#"<input checked="checked"/>"#
        );
        assert_eq!(
            render_src("doctype html\ninput(checked)\nbr\nfoo/", &data),
            "<!DOCTYPE html><input checked><br><foo/>"
        );
        assert_eq!(
            render_src("br", &Value::Null),
            "<br/>"
        );
        assert_eq!(
            render_with("br", &data, &Options::default().with_doctype("html")).unwrap(),
            "<br>"
        );
        assert_eq!(
            render_src("doctype xml\nbr\nitem/", &data),
            r#"<?xml version="1.0" encoding="utf-8" ?><br></br><item/>"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_doctypes() {
        assert_eq!(render_src("doctype", &Value::Null), "<!DOCTYPE html>");
        assert!(render_src("doctype strict", &Value::Null).contains("XHTML 1.0 Strict"));
        assert_eq!(
            render_src("doctype html PUBLIC \"x\"", &Value::Null),
            "<!DOCTYPE html PUBLIC \"x\">"
        );
        assert_eq!(
            render_src("doctype transitional\ninput(checked)", &Value::Null),
            format!("{}<input checked=\"checked\"/>", doctype_markup("transitional"))
        );

        // A bare doctype takes the configured one for both markup and mode.
        let strict = Options::default().with_doctype("strict");
        assert_eq!(
            render_with("doctype\nbr\ninput(checked)", &Value::Null, &strict).unwrap(),
            format!("{}<br/><input checked=\"checked\"/>", doctype_markup("strict"))
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_conditionals() {
        let src = "if n > 1\n  p many\nelse if n == 1\n  p one\nelse\n  p none\nunless n\n  p zero";
        assert_eq!(render_src(src, &Value::map().with("n", 5)), "<p>many</p>");
        assert_eq!(render_src(src, &Value::map().with("n", 1)), "<p>one</p>");
        assert_eq!(render_src(src, &Value::map().with("n", 0)), "<p>none</p><p>zero</p>");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_case() {
        let src = "case friends\n  when 0\n    p no friends\n  when 1\n    p a friend\n  default\n    p #{friends} friends";
        assert_eq!(render_src(src, &Value::map().with("friends", 1)), "<p>a friend</p>");
        assert_eq!(render_src(src, &Value::map().with("friends", 10)), "<p>10 friends</p>");

        let fallthrough = "case n\n  when 'a'\n  when 'b'\n    p ab\n  default: p other";
        assert_eq!(render_src(fallthrough, &Value::map().with("n", "a")), "<p>ab</p>");
        assert_eq!(render_src(fallthrough, &Value::map().with("n", "c")), "<p>other</p>");

        let into_default = "case n\n  when 'a'\n  default\n    p other\n  when 'b'\n    p b";
        assert_eq!(render_src(into_default, &Value::map().with("n", "a")), "<p>other</p>");
        assert_eq!(render_src(into_default, &Value::map().with("n", "b")), "<p>b</p>");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_each() {
        let src = "ul\n  each item, i in items\n    li= i + ': ' + item\n  else\n    li none";
        assert_eq!(
            render_src(src, &Value::map().with("items", vec!["a", "b"])),
            "<ul><li>0: a</li><li>1: b</li></ul>"
        );
        assert_eq!(
            render_src(src, &Value::map().with("items", Vec::<Value>::new())),
            "<ul><li>none</li></ul>"
        );
        assert_eq!(render_src(src, &Value::map()), "<ul><li>none</li></ul>");

        let map_src = "each value, key in obj\n  p #{key}=#{value}";
        let data = Value::map().with("obj", Value::map().with("b", 1).with("a", 2));
        assert_eq!(render_src(map_src, &data), "<p>b=1</p><p>a=2</p>");
        assert_eq!(
            render_src("for x of [1, 2]\n  i= x", &Value::Null),
            "<i>1</i><i>2</i>"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_loop_scope_does_not_leak() {
        let src = "each item in [1]\n  - var inner = 'x'\np= item\np= inner";
        assert_eq!(render_src(src, &Value::Null), "<p></p><p></p>");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_statements_and_while() {
        let src = "- var i = 0\nwhile i < 3\n  span= i\n  - i++\n- var label = 'n' + i\np= label";
        assert_eq!(
            render_src(src, &Value::Null),
            "<span>0</span><span>1</span><span>2</span><p>n3</p>"
        );

        let options = Options::default().with_max_while_iterations(Some(5));
        let err = render_with("while true\n  p", &Value::Null, &options).unwrap_err();
        assert_eq!(
            err,
            RenderError::IterationLimit {
                limit: 5,
                line: 1,
                column: 1
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_mixins() {
        let src = "mixin greet(name='World')\n  p Hello, #{name}!\n+greet\n+greet('Zig')";
        assert_eq!(
            render_src(src, &Value::Null),
            "<p>Hello, World!</p><p>Hello, Zig!</p>"
        );

        let rest = "mixin list(id, ...items)\n  ul(id=id)\n    each item in items\n      li= item\n+list('l', 1, 2)";
        assert_eq!(
            render_src(rest, &Value::Null),
            r#"<ul id="l"><li>1</li><li>2</li></ul>"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_mixin_block_and_attributes() {
        let src = "mixin card(title)\n  .card&attributes(attributes)\n    h2= title\n    if block\n      block\n    else\n      p empty\n- var who = 'caller'\n+card('A')(class='wide' data-id=7)\n  p= who\n+card('B')";
        assert_eq!(
            render_src(src, &Value::Null),
            r#"<div class="card wide" data-id="7"><h2>A</h2><p>caller</p></div><div class="card"><h2>B</h2><p>empty</p></div>"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_mixin_scope_isolation() {
        let src = "mixin show\n  p= local + '|' + global\n- var local = 'l'\n+show";
        let data = Value::map().with("global", "g");
        assert_eq!(render_src(src, &data), "<p>|g</p>");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_mixin_errors() {
        let err = render_with("+nope", &Value::Null, &Options::default()).unwrap_err();
        assert!(matches!(err, RenderError::UndefinedMixin { ref name, .. } if name == "nope"));

        let options = Options::default().with_max_call_depth(8);
        let err = render_with("mixin r\n  +r\n+r", &Value::Null, &options).unwrap_err();
        assert!(matches!(err, RenderError::CallDepth { limit: 8, .. }));

        let dynamic = "mixin a\n  p a\n+#{'a'}";
        assert_eq!(render_src(dynamic, &Value::Null), "<p>a</p>");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_comments_and_text() {
        assert_eq!(
            render_src("// visible\n//- hidden\np", &Value::Null),
            "<!-- visible--><p></p>"
        );
        assert_eq!(
            render_src("//\n  a\n  b", &Value::Null),
            "<!--a\nb-->"
        );
        assert_eq!(
            render_src("p\n  | one\n  | two", &Value::Null),
            "<p>one\ntwo</p>"
        );
        assert_eq!(
            render_src("<div>\np inside\n</div>", &Value::Null),
            "<div><p>inside</p></div>"
        );
        assert_eq!(
            render_src("script.\n  if (a < b) go();", &Value::Null),
            "<script>if (a < b) go();</script>"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_filters() {
        assert_eq!(
            render_src(":cdata\n  raw <x>", &Value::Null),
            "<![CDATA[\nraw <x>\n]]>"
        );
        let err = render_with(":nope text", &Value::Null, &Options::default()).unwrap_err();
        assert!(matches!(err, RenderError::UnknownFilter { ref name, .. } if name == "nope"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_interpolated_tag_name() {
        let data = Value::map().with("level", 2);
        assert_eq!(render_src("#{'h' + level} Title", &data), "<h2>Title</h2>");
    }
}
