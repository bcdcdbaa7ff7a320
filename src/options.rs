use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::strip::StripOptions;
use crate::value::Value;

/// Compilation and rendering settings.
///
/// # Example
///
/// ```
/// use pugmill::Options;
///
/// let options = Options::default()
///     .with_doctype("html")
///     .with_max_while_iterations(Some(100));
/// assert_eq!(options.doctype.as_deref(), Some("html"));
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Options {
    /// Doctype assumed when the template does not declare one. Decides
    /// terse and XML output.
    pub doctype: Option<String>,
    pub strip_unbuffered_comments: bool,
    pub strip_buffered_comments: bool,
    /// `None` lets `while` loops run unbounded.
    pub max_while_iterations: Option<usize>,
    pub max_call_depth: usize,
    /// Root for `/`-prefixed include and extends paths.
    pub basedir: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            doctype: None,
            strip_unbuffered_comments: true,
            strip_buffered_comments: false,
            max_while_iterations: Some(10_000),
            max_call_depth: 256,
            basedir: None,
        }
    }
}

impl Options {
    #[must_use]
    pub fn with_doctype<T: Into<String>>(mut self, doctype: T) -> Self {
        self.doctype = Some(doctype.into());
        self
    }

    #[must_use]
    pub const fn with_comment_stripping(mut self, unbuffered: bool, buffered: bool) -> Self {
        self.strip_unbuffered_comments = unbuffered;
        self.strip_buffered_comments = buffered;
        self
    }

    #[must_use]
    pub const fn with_max_while_iterations(mut self, limit: Option<usize>) -> Self {
        self.max_while_iterations = limit;
        self
    }

    #[must_use]
    pub const fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    #[must_use]
    pub fn with_basedir<T: Into<String>>(mut self, basedir: T) -> Self {
        self.basedir = Some(basedir.into());
        self
    }

    pub(crate) const fn strip_options(&self) -> StripOptions {
        StripOptions {
            strip_unbuffered: self.strip_unbuffered_comments,
            strip_buffered: self.strip_buffered_comments,
        }
    }
}

/// A filter receives the raw text of a `:name` block and its evaluated
/// attributes, and returns the text to emit.
pub type FilterFn = Arc<dyn Fn(&str, &IndexMap<String, Value>) -> String + Send + Sync>;

/// Named filters available to `:name` blocks and `include:name` includes.
///
/// `plain` and `cdata` are always registered.
///
/// ```
/// use pugmill::Filters;
///
/// let mut filters = Filters::new();
/// filters.register("shout", |text, _| text.to_uppercase());
/// assert_eq!(filters.apply("shout", "hi", &Default::default()).as_deref(), Some("HI"));
/// ```
#[derive(Clone)]
pub struct Filters {
    filters: IndexMap<String, FilterFn>,
}

impl Filters {
    pub fn new() -> Self {
        let mut filters = Self {
            filters: IndexMap::new(),
        };
        filters.register("plain", |text, _| text.to_string());
        filters.register("cdata", |text, _| format!("<![CDATA[\n{text}\n]]>"));
        filters
    }

    /// Registers `filter` under `name`, replacing any filter already there.
    pub fn register<N, F>(&mut self, name: N, filter: F) -> &mut Self
    where
        N: Into<String>,
        F: Fn(&str, &IndexMap<String, Value>) -> String + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(filter));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Runs the named filter, or returns `None` when it is not registered.
    pub fn apply(
        &self,
        name: &str,
        text: &str,
        attributes: &IndexMap<String, Value>,
    ) -> Option<String> {
        self.filters.get(name).map(|filter| filter(text, attributes))
    }
}

impl Default for Filters {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Filters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.filters.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_defaults() {
        let options = Options::default();
        assert!(options.strip_unbuffered_comments);
        assert!(!options.strip_buffered_comments);
        assert_eq!(options.max_while_iterations, Some(10_000));
        assert_eq!(
            options.strip_options(),
            StripOptions {
                strip_unbuffered: true,
                strip_buffered: false
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_builtin_filters() {
        let filters = Filters::new();
        let attrs = IndexMap::new();
        assert_eq!(filters.apply("plain", "a<b", &attrs).as_deref(), Some("a<b"));
        assert_eq!(
            filters.apply("cdata", "x", &attrs).as_deref(),
            Some("<![CDATA[\nx\n]]>")
        );
        assert!(filters.apply("markdown", "x", &attrs).is_none());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_filter_sees_attributes() {
        let mut filters = Filters::new();
        filters.register("wrap", |text, attrs| {
            let tag = attrs.get("tag").and_then(Value::as_str).unwrap_or("span");
            format!("<{tag}>{text}</{tag}>")
        });
        let mut attrs = IndexMap::new();
        attrs.insert("tag".to_string(), Value::from("em"));
        assert_eq!(
            filters.apply("wrap", "hi", &attrs).as_deref(),
            Some("<em>hi</em>")
        );
        assert!(format!("{filters:?}").contains("wrap"));
    }
}
