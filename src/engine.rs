use std::borrow::Cow;
use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{PugmillError, PugmillResult};
use crate::interface::{PugmillInterface, TemplateResolver, lookup};
use crate::linker::parse_source;
use crate::options::{Filters, Options};
use crate::template::Template;
use crate::value::Value;

/// `PugmillEngine` is the primary implementation of the `PugmillInterface` trait,
/// holding a set of named template sources that can `extends` and `include`
/// one another.
///
/// Templates are checked for lexical and syntax errors when added, and linked
/// when compiled or rendered, so templates may be added in any order.
///
/// # Examples
///
/// ```
/// use pugmill::{PugmillEngine, PugmillInterface, Value};
///
/// // Create a new engine
/// let mut engine = PugmillEngine::new();
///
/// // Add a layout and a page extending it
/// engine.add_template("layout", "main\n  block content\n    p default").unwrap();
/// engine.add_template("page", "extends layout\nblock content\n  p Hello, #{name}!").unwrap();
///
/// // Render the page
/// let data = Value::map().with("name", "World");
/// let output = engine.render("page", &data).unwrap();
/// assert_eq!(output, "<main><p>Hello, World!</p></main>");
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct PugmillEngine {
    templates: HashMap<String, String>,
    options: Options,
    #[cfg_attr(feature = "serde", serde(skip))]
    filters: Filters,
}

impl PugmillEngine {
    /// Creates a new empty `PugmillEngine` instance.
    ///
    /// # Returns
    ///
    /// A new engine with no templates, default options and the built-in filters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty engine that compiles with `options`.
    ///
    /// # Examples
    ///
    /// ```
    /// use pugmill::{Options, PugmillEngine, PugmillInterface, Value};
    ///
    /// let mut engine = PugmillEngine::with_options(Options::default().with_doctype("html"));
    /// engine.add_template("form", "input(checked)").unwrap();
    /// assert_eq!(engine.render("form", &Value::Null).unwrap(), "<input checked>");
    /// ```
    pub fn with_options(options: Options) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub const fn options(&self) -> &Options {
        &self.options
    }

    pub const fn filters_mut(&mut self) -> &mut Filters {
        &mut self.filters
    }

    /// Registers a filter for `:name` blocks and `include:name` includes.
    ///
    /// # Arguments
    ///
    /// * `name` - The name used after the `:`
    /// * `filter` - Receives the raw text and the filter's evaluated attributes
    ///
    /// # Examples
    ///
    /// ```
    /// use pugmill::{PugmillEngine, PugmillInterface, Value};
    ///
    /// let mut engine = PugmillEngine::new();
    /// engine.register_filter("shout", |text, _| text.to_uppercase());
    /// engine.add_template("t", ":shout hey").unwrap();
    /// assert_eq!(engine.render("t", &Value::Null).unwrap(), "HEY");
    /// ```
    pub fn register_filter<N, F>(&mut self, name: N, filter: F) -> &mut Self
    where
        N: Into<String>,
        F: Fn(&str, &IndexMap<String, Value>) -> String + Send + Sync + 'static,
    {
        self.filters.register(name, filter);
        self
    }

    /// Names of the registered templates, in no particular order.
    pub fn template_names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

impl TemplateResolver for PugmillEngine {
    fn resolve(&self, path: &str) -> PugmillResult<Cow<'_, str>> {
        lookup(&self.templates, path)
            .map(|source| Cow::Borrowed(source.as_str()))
            .ok_or_else(|| PugmillError::MissingTemplate {
                template_name: path.to_string(),
            })
    }
}

impl PugmillInterface for PugmillEngine {
    /// Adds a new template to the engine with the given name and content.
    ///
    /// # Arguments
    ///
    /// * `name` - The name to identify this template by; `extends` and `include`
    ///   paths are matched against it, with or without a `.pug` extension
    /// * `content` - The template source
    ///
    /// # Returns
    ///
    /// * `Ok(())` if the template was successfully added
    /// * `Err(PugmillError::TemplateExists)` if a template with the given name already exists
    /// * `Err(PugmillError::Lex)` or `Err(PugmillError::Parse)` if the content is malformed
    ///
    /// # Examples
    ///
    /// ```
    /// use pugmill::{PugmillEngine, PugmillInterface};
    ///
    /// let mut engine = PugmillEngine::new();
    /// engine.add_template("greeting", "p Hello, #{name}!").unwrap();
    /// assert!(engine.add_template("greeting", "p again").is_err());
    /// ```
    fn add_template<N: AsRef<str>, C: Into<String>>(
        &mut self,
        name: N,
        content: C,
    ) -> PugmillResult<()> {
        let name = name.as_ref();

        if self.templates.contains_key(name) {
            return Err(PugmillError::TemplateExists {
                template_name: name.to_string(),
            });
        }

        let content = content.into();
        parse_source(&content, &self.options)?;
        debug!(name, bytes = content.len(), "added template");

        self.templates.insert(name.to_string(), content);

        Ok(())
    }

    /// Compiles the template with the given name, linking it against the other
    /// registered templates.
    ///
    /// # Arguments
    ///
    /// * `template_name` - The name of the template to compile
    ///
    /// # Returns
    ///
    /// * `Ok(Template)` carrying this engine's options and filters
    /// * `Err(PugmillError::MissingTemplate)` if no template with the given name exists
    /// * `Err(PugmillError::Link)` for a misplaced `extends`, or a missing or circular reference
    ///
    /// # Examples
    ///
    /// ```
    /// use pugmill::{PugmillEngine, PugmillInterface, Value};
    ///
    /// let mut engine = PugmillEngine::new();
    /// engine.add_template("nav", "nav\n  yield").unwrap();
    /// engine.add_template("home", "include nav\n  a(href='/') Home").unwrap();
    ///
    /// let template = engine.compile("home").unwrap();
    /// assert_eq!(template.render(&Value::Null).unwrap(), r#"<nav><a href="/">Home</a></nav>"#);
    /// ```
    fn compile<N: AsRef<str>>(&self, template_name: N) -> PugmillResult<Template> {
        let template = Template::compile(template_name.as_ref(), self, &self.options)?;
        Ok(template.with_filters(self.filters.clone()))
    }

    /// Renders the template with the given name against `data`.
    ///
    /// # Arguments
    ///
    /// * `template_name` - The name of the template to render
    /// * `data` - The root data; a map whose keys are the template's variables
    ///
    /// # Returns
    ///
    /// * `Ok(String)` containing the rendered HTML
    /// * `Err(PugmillError::MissingTemplate)` if no template with the given name exists
    /// * Other errors from linking or rendering (undefined mixins, unknown filters, etc.)
    ///
    /// # Examples
    ///
    /// ```
    /// use pugmill::{PugmillEngine, PugmillInterface, Value};
    ///
    /// let mut engine = PugmillEngine::new();
    /// engine.add_template("friends", "case n\n  when 0\n    p no friends\n  when 1\n    p a friend\n  default\n    p #{n} friends").unwrap();
    ///
    /// let output = engine.render("friends", &Value::map().with("n", 1)).unwrap();
    /// assert_eq!(output, "<p>a friend</p>");
    /// ```
    fn render<N: AsRef<str>>(&self, template_name: N, data: &Value) -> PugmillResult<String> {
        self.compile(template_name)?.render(data)
    }

    /// Lists the root data names the template reads, including those read by
    /// the templates it extends and includes.
    ///
    /// # Examples
    ///
    /// ```
    /// use pugmill::{PugmillEngine, PugmillInterface};
    ///
    /// let mut engine = PugmillEngine::new();
    /// engine.add_template("greeting", "p Hello, #{name}!").unwrap();
    ///
    /// assert_eq!(engine.variables("greeting").unwrap(), vec!["name"]);
    /// ```
    fn variables<N: AsRef<str>>(&self, template_name: N) -> PugmillResult<Vec<String>> {
        Ok(self.compile(template_name)?.variables())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkErrorKind;

    #[test]
    #[ntest::timeout(100)]
    fn test_add_template_validates() {
        let mut engine = PugmillEngine::new();
        engine.add_template("ok", "p fine").unwrap();
        assert_eq!(
            engine.add_template("ok", "p again").unwrap_err(),
            PugmillError::TemplateExists {
                template_name: "ok".to_string()
            }
        );

        let err = engine.add_template("bad", "p\nelse").unwrap_err();
        assert!(matches!(err, PugmillError::Parse(_)));
        let err = engine.add_template("bad", "p(").unwrap_err();
        assert!(matches!(err, PugmillError::Lex(_)));
        assert_eq!(engine.template_names().count(), 1);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_missing_template() {
        let engine = PugmillEngine::new();
        assert_eq!(
            engine.render("nope", &Value::Null).unwrap_err(),
            PugmillError::MissingTemplate {
                template_name: "nope".to_string()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_linking_across_templates() {
        let mut engine = PugmillEngine::new();
        engine
            .add_template("layout.pug", "html\n  body\n    block content\n    block scripts\n      script(src='/a.js')")
            .unwrap();
        engine
            .add_template(
                "page",
                "extends layout\nblock content\n  h1= title\nblock append scripts\n  script(src='/b.js')",
            )
            .unwrap();
        let output = engine
            .render("page", &Value::map().with("title", "Home"))
            .unwrap();
        assert_eq!(
            output,
            r#"<html><body><h1>Home</h1><script src="/a.js"></script><script src="/b.js"></script></body></html>"#
        );
        assert_eq!(engine.variables("page").unwrap(), vec!["title"]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_errors_from_included_templates() {
        let mut engine = PugmillEngine::new();
        engine.add_template("a", "include b").unwrap();
        engine.add_template("b", "include a").unwrap();
        engine.add_template("c", "div\n  include missing").unwrap();

        let err = engine.compile("a").unwrap_err();
        assert!(matches!(
            err.root_cause(),
            PugmillError::Link(e) if matches!(e.kind, LinkErrorKind::CircularReference { .. })
        ));

        let err = engine.compile("c").unwrap_err();
        assert!(matches!(
            err,
            PugmillError::Link(ref e) if e.path == "c" && e.line == 2
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_engine_filters_reach_templates() {
        let mut engine = PugmillEngine::new();
        engine.register_filter("wrap", |text, attrs| {
            let tag = attrs.get("tag").and_then(Value::as_str).unwrap_or("span");
            format!("<{tag}>{text}</{tag}>")
        });
        engine.add_template("t", "div\n  :wrap(tag='em') hi").unwrap();
        assert_eq!(
            engine.render("t", &Value::Null).unwrap(),
            "<div><em>hi</em></div>"
        );
        assert!(engine.filters_mut().contains("cdata"));
    }
}
