//! Rich error types with intent for IDE-grade diagnostics
//!
//! Error types carry structured information, not just text.
//! This enables:
//! - Beautiful terminal output via miette
//! - Suggestions and help text
//! - Downcasting from a `miette::Report` in tests and host code

use miette::{Diagnostic, NamedSource, SourceSpan};
use std::sync::Arc;
use thiserror::Error;

/// A template source file for error reporting
#[derive(Debug, Clone)]
pub struct TemplateSource {
    /// Name of the template (usually a path-like string)
    pub name: String,
    /// The full source text
    pub source: Arc<String>,
}

impl TemplateSource {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: Arc::new(source.into()),
        }
    }

    pub fn from_arc(name: impl Into<String>, source: Arc<String>) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }

    /// Create a NamedSource for miette
    pub fn named_source(&self) -> NamedSource<String> {
        NamedSource::new(&self.name, (*self.source).clone())
    }
}

/// All engine errors
#[derive(Error, Debug, Diagnostic)]
pub enum EngineError {
    #[error("Syntax error")]
    #[diagnostic(code(plait::syntax))]
    Syntax(#[from] SyntaxError),

    #[error("Unterminated tag")]
    #[diagnostic(code(plait::unterminated))]
    Unterminated(#[from] UnterminatedTagError),

    #[error("Malformed fragment header")]
    #[diagnostic(code(plait::fragment_header))]
    FragmentHeader(#[from] FragmentHeaderError),

    #[error("Misplaced import")]
    #[diagnostic(code(plait::import_placement))]
    ImportPlacement(#[from] ImportPlacementError),

    #[error("Duplicate extends")]
    #[diagnostic(code(plait::duplicate_extends))]
    DuplicateExtends(#[from] DuplicateExtendsError),

    #[error("Directive inside fragment")]
    #[diagnostic(code(plait::directive_in_fragment))]
    DirectiveInFragment(#[from] DirectiveInFragmentError),

    #[error("Undefined variable")]
    #[diagnostic(code(plait::undefined))]
    Undefined(#[from] UndefinedError),

    #[error("Unknown field")]
    #[diagnostic(code(plait::unknown_field))]
    UnknownField(#[from] UnknownFieldError),

    #[error("Type error")]
    #[diagnostic(code(plait::type_error))]
    Type(#[from] TypeError),

    #[error("Unknown filter")]
    #[diagnostic(code(plait::unknown_filter))]
    UnknownFilter(#[from] UnknownFilterError),

    #[error("Unknown fragment")]
    #[diagnostic(code(plait::unknown_fragment))]
    UnknownFragment(#[from] UnknownFragmentError),

    #[error("Unknown code hook")]
    #[diagnostic(code(plait::unknown_hook))]
    UnknownHook(#[from] UnknownHookError),

    #[error("Load failed")]
    #[diagnostic(code(plait::load_failed))]
    LoadFailed(#[from] LoadFailedError),
}

// ============================================================================
// Compile errors — always fatal to the compile call, no partial program
// ============================================================================

/// Syntax error inside an expression tag
#[derive(Error, Debug, Diagnostic)]
#[error("Unexpected {found}")]
#[diagnostic(code(plait::syntax::unexpected), help("Expected {expected}"))]
pub struct SyntaxError {
    /// What we found
    pub found: String,
    /// What we expected
    pub expected: String,
    /// Location in source
    #[label("here")]
    pub span: SourceSpan,
    /// The source code
    #[source_code]
    pub src: NamedSource<String>,
}

/// A tag whose closing delimiter never appears
#[derive(Error, Debug, Diagnostic)]
#[error("No closing `{close}` in {remainder:?}")]
#[diagnostic(
    code(plait::syntax::unterminated),
    help("Add `{close}` to close this tag")
)]
pub struct UnterminatedTagError {
    /// The closing delimiter that was never found
    pub close: String,
    /// The unparsed input, from the open delimiter to end of input
    pub remainder: String,
    /// Where the tag was opened
    #[label("opened here")]
    pub open_span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

/// A fragment definition whose header is not `name(params)`
#[derive(Error, Debug, Diagnostic)]
#[error("Bad fragment definition {snippet:?}")]
#[diagnostic(
    code(plait::syntax::fragment_header),
    help("A fragment opens with `name(params)` before its body")
)]
pub struct FragmentHeaderError {
    /// Leading text of the offending tag body
    pub snippet: String,
    #[label("expected `name(params)` here")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

/// An import directive after non-import content
#[derive(Error, Debug, Diagnostic)]
#[error("Cannot have anything before import directives")]
#[diagnostic(
    code(plait::syntax::import_placement),
    help("Move every `#import` to the top of the template")
)]
pub struct ImportPlacementError {
    #[label("import appears after other content")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

/// A second extends directive
#[derive(Error, Debug, Diagnostic)]
#[error("Can only extend one template")]
#[diagnostic(code(plait::syntax::duplicate_extends))]
pub struct DuplicateExtendsError {
    #[label("second extends")]
    pub span: SourceSpan,
    #[label("first extends was here")]
    pub first_span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

/// An import/extends directive inside a fragment body
#[derive(Error, Debug, Diagnostic)]
#[error("`{directive}` is not allowed inside a fragment body")]
#[diagnostic(
    code(plait::syntax::directive_in_fragment),
    help("Fragments render synchronously and cannot load other templates")
)]
pub struct DirectiveInFragmentError {
    /// The offending directive (`#import` or `#extends`)
    pub directive: String,
    #[label("inside a fragment definition")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

// ============================================================================
// Render errors
// ============================================================================

/// Undefined variable
#[derive(Error, Debug, Diagnostic)]
#[error("Variable `{name}` is not defined")]
#[diagnostic(
    code(plait::undefined),
    help("Available variables: {}", available.join(", "))
)]
pub struct UndefinedError {
    /// The undefined variable name
    pub name: String,
    /// Variables that are available in scope
    pub available: Vec<String>,
    #[label("not found in scope")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

/// Unknown field access on a value
#[derive(Error, Debug, Diagnostic)]
#[error("Value of type `{base_type}` has no field `{field}`")]
#[diagnostic(
    code(plait::unknown_field),
    help("Available fields: {}", known_fields.join(", "))
)]
pub struct UnknownFieldError {
    pub base_type: String,
    pub field: String,
    pub known_fields: Vec<String>,
    #[label("this field doesn't exist")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

/// Type error (e.g., indexing a number)
#[derive(Error, Debug, Diagnostic)]
#[error("Expected {expected}, found {found}")]
#[diagnostic(code(plait::type_error))]
pub struct TypeError {
    pub expected: String,
    pub found: String,
    /// Context for the error
    pub context: String,
    #[label("{context}")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

/// Unknown filter
#[derive(Error, Debug, Diagnostic)]
#[error("Unknown filter `{name}`")]
#[diagnostic(
    code(plait::unknown_filter),
    help("Available filters: {}", known_filters.join(", "))
)]
pub struct UnknownFilterError {
    pub name: String,
    pub known_filters: Vec<String>,
    #[label("this filter doesn't exist")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

/// A call to a fragment that was never registered
#[derive(Error, Debug, Diagnostic)]
#[error("Fragment `{name}` is not registered")]
#[diagnostic(
    code(plait::unknown_fragment),
    help("Compile the template that defines `{name}` before rendering")
)]
pub struct UnknownFragmentError {
    pub name: String,
    #[label("invoked here")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

/// A code tag whose body has no registered hook
#[derive(Error, Debug, Diagnostic)]
#[error("No code hook registered for {body:?}")]
#[diagnostic(
    code(plait::unknown_hook),
    help("Register the hook on the engine before rendering")
)]
pub struct UnknownHookError {
    /// The trimmed tag body used as the registry key
    pub body: String,
    #[label("this code tag")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

/// A dependency fetch that the transport reported as failed
#[derive(Error, Debug, Diagnostic)]
#[error("Failed to load template `{name}`: {reason}")]
#[diagnostic(code(plait::load_failed))]
pub struct LoadFailedError {
    /// The template name that could not be resolved
    pub name: String,
    /// Transport-supplied reason
    pub reason: String,
}
