//! Process-scoped registries
//!
//! Fragments, code hooks, and post-render processors live in handle-based
//! registries: cloning a registry clones the handle, not the contents, so an
//! engine and its compiler share state while tests can build isolated
//! instances. No implicit globals anywhere.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use miette::Result;

use crate::expr::Value;
use crate::program::Program;
use crate::runtime::interp::HookCtx;

/// A named, parameterized compiled sub-program
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Formal parameter names, in declaration order
    pub params: Vec<String>,
    pub program: Rc<Program>,
}

/// Registry of fragments, keyed by name. Last registration wins.
#[derive(Clone, Default)]
pub struct Fragments(Rc<RefCell<HashMap<String, Rc<Fragment>>>>);

impl Fragments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, fragment: Fragment) {
        self.0
            .borrow_mut()
            .insert(name.to_string(), Rc::new(fragment));
    }

    pub fn lookup(&self, name: &str) -> Option<Rc<Fragment>> {
        self.0.borrow().get(name).cloned()
    }

    /// Remove a registration; returns whether it existed
    pub fn invalidate(&self, name: &str) -> bool {
        self.0.borrow_mut().remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

/// A host callback bound to a `{% … %}` tag body
pub type CodeHook = Rc<dyn Fn(&mut HookCtx<'_>) -> Result<()>>;

/// Registry of code hooks, keyed by the trimmed tag body
#[derive(Clone, Default)]
pub struct Hooks(Rc<RefCell<HashMap<String, CodeHook>>>);

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        body: impl Into<String>,
        hook: impl Fn(&mut HookCtx<'_>) -> Result<()> + 'static,
    ) {
        self.0.borrow_mut().insert(body.into(), Rc::new(hook));
    }

    pub fn lookup(&self, body: &str) -> Option<CodeHook> {
        self.0.borrow().get(body).cloned()
    }

    pub fn invalidate(&self, body: &str) -> bool {
        self.0.borrow_mut().remove(body).is_some()
    }
}

/// A post-render processor; receives every value queued under its key
/// during one render, in queue order
pub type PostFn = Rc<dyn Fn(&[Value])>;

/// Registry of post-render processors, keyed by notification key
#[derive(Clone, Default)]
pub struct PostProcessors(Rc<RefCell<HashMap<String, PostFn>>>);

impl PostProcessors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: impl Into<String>, f: impl Fn(&[Value]) + 'static) {
        self.0.borrow_mut().insert(key.into(), Rc::new(f));
    }

    pub fn lookup(&self, key: &str) -> Option<PostFn> {
        self.0.borrow().get(key).cloned()
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.0.borrow_mut().remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TemplateSource;

    fn dummy_fragment() -> Fragment {
        Fragment {
            params: vec!["x".to_string()],
            program: Rc::new(Program {
                source: TemplateSource::new("f", ""),
                ops: Vec::new(),
            }),
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let fragments = Fragments::new();
        assert!(fragments.lookup("f").is_none());
        fragments.register("f", dummy_fragment());
        assert!(fragments.lookup("f").is_some());
    }

    #[test]
    fn test_handles_share_state() {
        let a = Fragments::new();
        let b = a.clone();
        a.register("f", dummy_fragment());
        assert!(b.lookup("f").is_some());
    }

    #[test]
    fn test_isolated_instances() {
        let a = Fragments::new();
        let b = Fragments::new();
        a.register("f", dummy_fragment());
        assert!(b.lookup("f").is_none());
    }

    #[test]
    fn test_invalidate() {
        let fragments = Fragments::new();
        fragments.register("f", dummy_fragment());
        assert!(fragments.invalidate("f"));
        assert!(!fragments.invalidate("f"));
        assert!(fragments.lookup("f").is_none());
    }
}
