//! Dependency transports
//!
//! The engine resolves template names through a [`Transport`]: `request`
//! begins a fetch, `poll` drains completions. The engine never blocks on a
//! fetch — callers queue FIFO on the loading entry and resume when the
//! transport delivers. A transport that never delivers leaves them parked;
//! liveness is the host's responsibility.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::compile::Compiler;
use crate::program::Program;
use crate::runtime::cache::Version;
use crate::runtime::registry::Fragments;

/// One completed fetch. `result` carries the program and its declared
/// version, or a reason string when the name could not be resolved.
pub struct Fetched {
    pub name: String,
    pub result: Result<(Program, Option<Version>), String>,
}

/// The boundary to whatever delivers compiled templates into the process
pub trait Transport {
    /// Begin fetching `name`. Completion arrives through [`Transport::poll`].
    fn request(&mut self, name: &str);

    /// Drain fetches that have completed since the last poll
    fn poll(&mut self) -> Vec<Fetched>;
}

#[derive(Default)]
struct MemoryInner {
    templates: HashMap<String, (Program, Option<Version>)>,
    /// When held, requests wait for an explicit release
    held: bool,
    waiting: Vec<String>,
    ready: Vec<String>,
    request_counts: HashMap<String, usize>,
}

/// An in-memory transport.
///
/// Resolves immediately by default. [`MemoryTransport::hold`] switches to
/// manual delivery so tests can observe queued-while-loading behavior;
/// [`MemoryTransport::release`] then lets a named fetch complete at the next
/// poll. Clones share state, so a test can keep a handle to a transport it
/// has boxed into an engine.
#[derive(Clone, Default)]
pub struct MemoryTransport(Rc<RefCell<MemoryInner>>);

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template the transport can deliver
    pub fn insert(&self, name: impl Into<String>, program: Program, version: Option<Version>) {
        self.0
            .borrow_mut()
            .templates
            .insert(name.into(), (program, version));
    }

    /// Stop auto-delivering: requests queue until released
    pub fn hold(&self) {
        self.0.borrow_mut().held = true;
    }

    /// Allow one queued fetch of `name` to complete at the next poll
    pub fn release(&self, name: &str) -> bool {
        let mut inner = self.0.borrow_mut();
        if let Some(at) = inner.waiting.iter().position(|n| n == name) {
            let name = inner.waiting.remove(at);
            inner.ready.push(name);
            true
        } else {
            false
        }
    }

    /// Allow every queued fetch to complete at the next poll
    pub fn release_all(&self) {
        let mut inner = self.0.borrow_mut();
        let mut waiting = std::mem::take(&mut inner.waiting);
        inner.ready.append(&mut waiting);
    }

    /// How many times `name` has been requested over this transport's life
    pub fn times_requested(&self, name: &str) -> usize {
        self.0
            .borrow()
            .request_counts
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

impl Transport for MemoryTransport {
    fn request(&mut self, name: &str) {
        let mut inner = self.0.borrow_mut();
        *inner.request_counts.entry(name.to_string()).or_insert(0) += 1;
        if inner.held {
            inner.waiting.push(name.to_string());
        } else {
            inner.ready.push(name.to_string());
        }
    }

    fn poll(&mut self) -> Vec<Fetched> {
        let mut inner = self.0.borrow_mut();
        let ready = std::mem::take(&mut inner.ready);
        ready
            .into_iter()
            .map(|name| {
                let result = match inner.templates.get(&name) {
                    Some((program, version)) => Ok((program.clone(), version.clone())),
                    None => Err(format!("template `{name}` does not exist")),
                };
                Fetched { name, result }
            })
            .collect()
    }
}

/// A filesystem transport rooted at a directory.
///
/// Reads the named file relative to the root and compiles it on fetch, so
/// fragment definitions in fetched templates register as usual.
pub struct DirTransport {
    root: Utf8PathBuf,
    compiler: Compiler,
    completed: Vec<Fetched>,
}

impl DirTransport {
    /// Create a transport rooted at `root`, registering fragments from
    /// fetched templates into `fragments`
    pub fn new(root: impl AsRef<Utf8Path>, fragments: Fragments) -> Self {
        Self {
            root: root.as_ref().to_owned(),
            compiler: Compiler::new(fragments),
            completed: Vec::new(),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}

impl Transport for DirTransport {
    fn request(&mut self, name: &str) {
        let path = self.root.join(name);
        debug!(%path, "fetching template");
        let result = match std::fs::read_to_string(&path) {
            Ok(text) => self
                .compiler
                .compile(name, text)
                .map(|program| (program, None))
                .map_err(|err| format!("{err}")),
            Err(err) => Err(format!("cannot read {path}: {err}")),
        };
        self.completed.push(Fetched {
            name: name.to_string(),
            result,
        });
    }

    fn poll(&mut self) -> Vec<Fetched> {
        std::mem::take(&mut self.completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TemplateSource;

    fn program(name: &str) -> Program {
        Program {
            source: TemplateSource::new(name, ""),
            ops: Vec::new(),
        }
    }

    #[test]
    fn test_memory_auto_delivery() {
        let transport = MemoryTransport::new();
        transport.insert("a", program("a"), None);

        let mut boxed: Box<dyn Transport> = Box::new(transport.clone());
        boxed.request("a");
        let batch = boxed.poll();
        assert_eq!(batch.len(), 1);
        assert!(batch[0].result.is_ok());
    }

    #[test]
    fn test_memory_missing_name_errors() {
        let mut transport = MemoryTransport::new();
        transport.request("ghost");
        let batch = transport.poll();
        assert!(batch[0].result.is_err());
    }

    #[test]
    fn test_memory_hold_and_release() {
        let mut transport = MemoryTransport::new();
        transport.insert("a", program("a"), None);
        transport.hold();

        transport.request("a");
        assert!(transport.poll().is_empty());

        assert!(transport.release("a"));
        let batch = transport.poll();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].name, "a");
    }

    #[test]
    fn test_memory_counts_requests() {
        let mut transport = MemoryTransport::new();
        transport.insert("a", program("a"), None);
        transport.request("a");
        transport.request("a");
        assert_eq!(transport.times_requested("a"), 2);
        assert_eq!(transport.times_requested("b"), 0);
    }
}
