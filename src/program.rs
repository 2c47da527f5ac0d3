//! The compiled intermediate form
//!
//! A [`Program`] is an ordered list of operations, self-contained and
//! replayable: compile once, render many times. Invariants maintained by the
//! compiler: `Import` ops precede every other op, and at most one `Extend`
//! op exists, always in tail position.

use miette::SourceSpan;

use crate::error::TemplateSource;
use crate::expr::Expr;

/// One operation of a compiled template
#[derive(Debug, Clone)]
pub enum Op {
    /// A batch of literal runs, emitted verbatim in order
    Literals(Vec<String>),
    /// Evaluate the expression and emit its value, unescaped
    Emit(Expr),
    /// Evaluate the expression and emit its value through the escape utility
    EmitEscaped(Expr),
    /// Invoke the host code hook registered under `body`
    Code { body: String, span: SourceSpan },
    /// Emit the translation of the enclosed text
    Localize(String),
    /// Resolve a named block against the active provider chain
    Block(String),
    /// Load and render the named template before this one's body runs
    Import(String),
    /// Render the named parent template around this one's output
    Extend(String),
}

/// A compiled template
#[derive(Debug, Clone)]
pub struct Program {
    /// Originating source, kept for runtime diagnostics
    pub source: TemplateSource,
    pub ops: Vec<Op>,
}

impl Program {
    /// The template name this program was compiled from
    pub fn name(&self) -> &str {
        &self.source.name
    }

    /// Names of the templates this program imports, in source order
    pub fn imports(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Import(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// The inheritance target, if this program extends another template
    pub fn extends(&self) -> Option<&str> {
        self.ops.iter().find_map(|op| match op {
            Op::Extend(name) => Some(name.as_str()),
            _ => None,
        })
    }
}
