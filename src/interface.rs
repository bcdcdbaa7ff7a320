use std::borrow::Cow;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{PugmillError, PugmillResult};
use crate::template::Template;
use crate::value::Value;

/// Loads template sources for `extends` and `include`.
///
/// Paths handed to a resolver are already normalized by the linker:
/// `/`-separated, no `.` or `..` segments, and with an extension.
pub trait TemplateResolver {
    /// Returns the source text stored under `path`.
    ///
    /// # Errors
    /// - `PugmillError::MissingTemplate` if nothing is stored under `path`.
    /// - `PugmillError::Io` if the source exists but could not be read.
    fn resolve(&self, path: &str) -> PugmillResult<Cow<'_, str>>;
}

/// `PugmillInterface` is the host-facing side of the engine: register
/// templates by name, then compile or render them.
pub trait PugmillInterface {
    /// `add_template` tries to make a new template available in the engine.
    ///
    /// # Errors
    /// - If the template name is a duplicate.
    /// - If the template has lexical or syntax errors.
    fn add_template<N: AsRef<str>, C: Into<String>>(
        &mut self,
        name: N,
        content: C,
    ) -> PugmillResult<()>;

    /// `compile` links the named template against the other registered
    /// templates, producing a [`Template`] that can be rendered repeatedly.
    ///
    /// # Errors
    /// - If the template name is not found.
    /// - If linking fails (missing or circular `extends`/`include`, misplaced `extends`).
    fn compile<N: AsRef<str>>(&self, template_name: N) -> PugmillResult<Template>;

    /// `render` compiles the named template and renders it against `data`.
    ///
    /// # Errors
    /// - Everything `compile` can return.
    /// - Render errors such as calling an undefined mixin.
    fn render<N: AsRef<str>>(&self, template_name: N, data: &Value) -> PugmillResult<String>;

    /// `variables` lists the root data names the template reads, so a host
    /// can check its data before rendering.
    ///
    /// # Errors
    /// - Everything `compile` can return.
    fn variables<N: AsRef<str>>(&self, template_name: N) -> PugmillResult<Vec<String>>;
}

pub(crate) fn lookup<'a>(templates: &'a HashMap<String, String>, path: &str) -> Option<&'a String> {
    templates
        .get(path)
        .or_else(|| path.strip_suffix(".pug").and_then(|p| templates.get(p)))
}

/// Resolves templates from an in-memory map. A path ending in `.pug` also
/// matches an entry stored without the extension.
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    templates: HashMap<String, String>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<N: Into<String>, C: Into<String>>(&mut self, path: N, content: C) -> &mut Self {
        self.templates.insert(path.into(), content.into());
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        lookup(&self.templates, path).is_some()
    }
}

impl<N: Into<String>, C: Into<String>> FromIterator<(N, C)> for MemoryResolver {
    fn from_iter<I: IntoIterator<Item = (N, C)>>(iter: I) -> Self {
        Self {
            templates: iter
                .into_iter()
                .map(|(path, content)| (path.into(), content.into()))
                .collect(),
        }
    }
}

impl TemplateResolver for MemoryResolver {
    fn resolve(&self, path: &str) -> PugmillResult<Cow<'_, str>> {
        lookup(&self.templates, path)
            .map(|source| Cow::Borrowed(source.as_str()))
            .ok_or_else(|| PugmillError::MissingTemplate {
                template_name: path.to_string(),
            })
    }
}

/// Resolves templates from files below a root directory.
#[derive(Debug, Clone)]
pub struct FileSystemResolver {
    root: PathBuf,
}

impl FileSystemResolver {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }
}

impl TemplateResolver for FileSystemResolver {
    fn resolve(&self, path: &str) -> PugmillResult<Cow<'_, str>> {
        let file = self.root.join(path.trim_start_matches('/'));
        debug!(path = %file.display(), "reading template");
        match std::fs::read_to_string(&file) {
            Ok(source) => Ok(Cow::Owned(source)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(PugmillError::MissingTemplate {
                template_name: path.to_string(),
            }),
            Err(e) => Err(PugmillError::Io {
                path: path.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_memory_resolver() {
        let resolver: MemoryResolver = [("layout", "p a"), ("nav.pug", "nav")].into_iter().collect();
        assert_eq!(resolver.resolve("layout.pug").unwrap(), "p a");
        assert_eq!(resolver.resolve("nav.pug").unwrap(), "nav");
        assert!(resolver.contains("layout"));
        assert_eq!(
            resolver.resolve("missing.pug").unwrap_err(),
            PugmillError::MissingTemplate {
                template_name: "missing.pug".to_string()
            }
        );
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_file_system_resolver() {
        let dir = std::env::temp_dir().join(format!("pugmill-resolver-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("partials")).unwrap();
        std::fs::write(dir.join("partials/nav.pug"), "nav Home").unwrap();

        let resolver = FileSystemResolver::new(&dir);
        assert_eq!(resolver.resolve("partials/nav.pug").unwrap(), "nav Home");
        assert!(matches!(
            resolver.resolve("partials/missing.pug"),
            Err(PugmillError::MissingTemplate { .. })
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
