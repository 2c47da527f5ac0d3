//! Execution runtime
//!
//! Everything that happens after compilation: the template cache and its
//! version-checked loader, the fragment/hook/post-processor registries, the
//! op interpreter, and the session engine that sequences imports,
//! inheritance, and completion callbacks.

mod cache;
mod interp;
mod loader;
mod registry;
mod session;

pub use cache::{CacheEntry, TemplateCache, Version};
pub use interp::{AfterQueue, BlockResolver, HookCtx};
pub use loader::{DirTransport, Fetched, MemoryTransport, Transport};
pub use registry::{CodeHook, Fragment, Fragments, Hooks, PostFn, PostProcessors};
pub use session::{DoneFn, Engine, RenderArgs, RenderContext, Rendered};
