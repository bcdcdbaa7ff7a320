//! An indentation-sensitive HTML template language.
//!
//! Source text goes through four phases: [`lexer::lex`] turns it into tokens,
//! [`parser::parse`] builds a tree, [`linker::link`] resolves `extends` and
//! `include` against a [`TemplateResolver`], and [`render::render`] walks the
//! linked tree against a [`Value`]. [`Template`] and [`PugmillEngine`] run the
//! whole pipeline.
//!
//! ```
//! let html = pugmill::render("ul\n  each n in nums\n    li= n", &pugmill::Value::map().with("nums", vec![1, 2])).unwrap();
//! assert_eq!(html, "<ul><li>1</li><li>2</li></ul>");
//! ```

pub mod ast;
mod brackets;
mod engine;
mod error;
pub mod expr;
mod interface;
pub mod lexer;
pub mod linker;
mod options;
pub mod parser;
pub mod render;
pub mod strip;
mod template;
pub mod token;
mod value;

// Crate-level imports to make convenient imports for the rest of the library.
pub(crate) use error::PugmillResult;

// Public exports.
pub use engine::PugmillEngine;
pub use error::{
    LexError, LexErrorCode, LinkError, LinkErrorKind, ParseError, ParseErrorKind, PugmillError,
    RenderError,
};
pub use interface::{FileSystemResolver, MemoryResolver, PugmillInterface, TemplateResolver};
pub use options::{FilterFn, Filters, Options};
pub use template::Template;
pub use value::Value;

/// Compiles a template that does not `extends` or `include` anything.
///
/// # Errors
///
/// Returns the first lex, parse or link error.
pub fn compile(source: &str, options: &Options) -> PugmillResult<Template> {
    Template::with_options(source, options.clone())
}

/// Compiles and renders `source` in one step, with default options.
///
/// # Errors
///
/// Returns the first compile or render error.
pub fn render(source: &str, data: &Value) -> PugmillResult<String> {
    Template::new(source)?.render(data)
}
