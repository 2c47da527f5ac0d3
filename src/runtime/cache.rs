//! Template cache
//!
//! Process-wide mapping from template name to its compiled program, the
//! version it was fetched at, and whether it has rendered at least once.
//! Entries are replaced wholesale, never mutated field by field.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::program::Program;

/// An opaque, comparable version token for a cached template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version(String);

impl Version {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Version(s.to_string())
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Version(s)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One cached template
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub program: Rc<Program>,
    /// The version the program was delivered at, if the transport knows one
    pub version: Option<Version>,
    /// Set after the first successful render under this name; consulted to
    /// skip redundant side-effecting re-renders of imported dependencies
    pub rendered: bool,
}

/// The cache itself: a cheap-clone handle over shared entries
#[derive(Clone, Default)]
pub struct TemplateCache(Rc<RefCell<HashMap<String, CacheEntry>>>);

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a freshly fetched program, replacing any previous entry.
    /// The rendered-once flag starts cleared.
    pub fn install(&self, name: &str, program: Rc<Program>, version: Option<Version>) {
        self.0.borrow_mut().insert(
            name.to_string(),
            CacheEntry {
                program,
                version,
                rendered: false,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<CacheEntry> {
        self.0.borrow().get(name).cloned()
    }

    pub fn invalidate(&self, name: &str) -> bool {
        self.0.borrow_mut().remove(name).is_some()
    }

    /// Set the rendered-once flag; a no-op for names not in the cache
    pub fn mark_rendered(&self, name: &str) {
        if let Some(entry) = self.0.borrow_mut().get_mut(name) {
            entry.rendered = true;
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.borrow().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TemplateSource;

    fn program(name: &str) -> Rc<Program> {
        Rc::new(Program {
            source: TemplateSource::new(name, ""),
            ops: Vec::new(),
        })
    }

    #[test]
    fn test_install_and_get() {
        let cache = TemplateCache::new();
        cache.install("a", program("a"), Some("v1".into()));
        let entry = cache.get("a").unwrap();
        assert_eq!(entry.version, Some("v1".into()));
        assert!(!entry.rendered);
    }

    #[test]
    fn test_reinstall_clears_rendered_flag() {
        let cache = TemplateCache::new();
        cache.install("a", program("a"), Some("v1".into()));
        cache.mark_rendered("a");
        assert!(cache.get("a").unwrap().rendered);

        // Wholesale replacement
        cache.install("a", program("a"), Some("v2".into()));
        let entry = cache.get("a").unwrap();
        assert_eq!(entry.version, Some("v2".into()));
        assert!(!entry.rendered);
    }

    #[test]
    fn test_mark_rendered_unknown_name_is_noop() {
        let cache = TemplateCache::new();
        cache.mark_rendered("ghost");
        assert!(!cache.contains("ghost"));
    }
}
