//! plait — a template compiler and cooperative rendering runtime
//!
//! Templates compile once into a replayable [`Program`]; an [`Engine`]
//! interprets programs against a data context and delivers markup through a
//! completion callback, loading cross-template dependencies on demand with
//! version-checked caching.
//!
//! # Syntax Overview
//!
//! ```text
//! {{ expr }}              - Expression interpolation (unescaped)
//! {@ expr @}              - Interpolation through the escape utility
//! {% code %}              - Host code hook (data-dependent loops/branches)
//! {# comment #}           - Comment, discarded
//! {_ text _}              - Localized literal
//! {$ name $}              - Block reference (template inheritance)
//! {= name(params) .. =}   - Fragment definition
//! #import path            - Render another template first (once)
//! #extends path           - Inherit from a parent template
//! ```
//!
//! # Example
//!
//! ```ignore
//! use plait::{Engine, MemoryTransport, RenderArgs, RenderContext};
//!
//! let transport = MemoryTransport::new();
//! let mut engine = Engine::new(transport.clone());
//!
//! let program = engine.compiler().compile("hello.tpl", "hello {{ ctx.planet }}")?;
//! transport.insert("hello.tpl", program, None);
//!
//! let ctx = RenderContext::new(data);
//! let rendered = engine.render_sync("hello.tpl", ctx, RenderArgs::default())?;
//! assert_eq!(rendered.markup, "hello world");
//! ```

pub mod compile;
pub mod error;
pub mod expr;
pub mod program;
pub mod runtime;
pub mod scan;
pub mod text;

pub use compile::Compiler;
pub use error::{EngineError, TemplateSource};
pub use expr::{Scope, Value};
pub use program::{Op, Program};
pub use runtime::{
    BlockResolver, DirTransport, Engine, Fragments, HookCtx, Hooks, MemoryTransport,
    PostProcessors, RenderArgs, RenderContext, Rendered, TemplateCache, Transport, Version,
};
