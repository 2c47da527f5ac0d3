//! Rendering sessions and the engine
//!
//! A session binds one compiled program to one data context and one
//! completion callback. The engine drives sessions through an explicit
//! ready-queue: single-threaded and cooperative, with suspension at exactly
//! two points — a dependency fetch that has not completed, and a nested
//! import/extends render awaiting a child session. No locks, no threads,
//! no timeouts, no cancellation: once requested, a render runs to
//! completion or stays parked until its transport delivers.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use miette::{miette, Result};
use tracing::{debug, warn};

use crate::compile::Compiler;
use crate::error::LoadFailedError;
use crate::expr::{Scope, Value};
use crate::program::Program;
use crate::runtime::cache::{TemplateCache, Version};
use crate::runtime::interp::{
    resolve_dynamic_block, AfterQueue, BlockResolver, Interp, Services,
};
use crate::runtime::loader::{Fetched, Transport};
use crate::runtime::registry::{Fragments, Hooks, PostProcessors};

/// The data context one render runs against
#[derive(Debug, Clone)]
pub struct RenderContext {
    /// The data the template sees as `ctx`
    pub data: Value,
    /// Expected versions of dependencies, by template name. A cached entry
    /// at a different version is evicted and re-fetched.
    pub versions: HashMap<String, Version>,
}

impl RenderContext {
    pub fn new(data: impl Into<Value>) -> Self {
        Self {
            data: data.into(),
            versions: HashMap::new(),
        }
    }

    /// Pin the version this render expects for `name`
    pub fn with_version(mut self, name: impl Into<String>, version: impl Into<Version>) -> Self {
        self.versions.insert(name.into(), version.into());
        self
    }

    fn version_of(&self, name: &str) -> Option<Version> {
        self.versions.get(name).cloned()
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new(Value::None)
    }
}

/// Caller-supplied auxiliary arguments, passed through to the callback
#[derive(Clone)]
pub struct RenderArgs {
    /// The block provider chain, most-derived resolvers first
    pub blocks: Vec<BlockResolver>,
    /// Opaque payload the engine never interprets; templates see it as `args`
    pub user: Value,
}

impl Default for RenderArgs {
    fn default() -> Self {
        Self {
            blocks: Vec::new(),
            user: Value::None,
        }
    }
}

/// A completed render
pub struct Rendered {
    pub data: Value,
    pub markup: String,
    pub args: RenderArgs,
}

impl std::fmt::Debug for Rendered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rendered")
            .field("data", &self.data)
            .field("markup", &self.markup)
            .finish_non_exhaustive()
    }
}

/// Completion callback: results always arrive here, never as return values,
/// because a render may suspend on dependency loads
pub type DoneFn = Box<dyn FnOnce(Result<Rendered>)>;

enum Completion {
    /// Deliver to the caller
    Done(DoneFn),
    /// An import child: resume the origin session at the next import
    Import { origin: u64, next: usize },
    /// An extends parent: the origin session completes with this markup
    Extend { origin: u64 },
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    /// Resolve this session's own program through the loader
    Start,
    /// Parked until the program's fetch installs
    AwaitProgram,
    /// Start every import load before rendering any of them
    LoadImports,
    /// Parked until all import fetches install
    AwaitImports { remaining: usize },
    /// Render imports strictly sequentially from this index
    RunImports { next: usize },
    /// Parked on an import child session
    AwaitImport,
    /// Interpret this program's own ops, then arrange inheritance
    Body,
    /// Parked until the extends target's fetch installs
    AwaitParentLoad,
    /// Parked on the parent session rendering into our buffer
    AwaitParent,
}

struct Session {
    name: String,
    program: Option<Rc<Program>>,
    ctx: RenderContext,
    args: RenderArgs,
    scope: Scope,
    /// Output buffer, exclusively owned — except for the extends handoff
    out: Vec<String>,
    after: AfterQueue,
    phase: Phase,
    completion: Option<Completion>,
}

enum Load {
    Ready,
    Queued,
}

/// The rendering engine: compiler services, registries, template cache,
/// dependency loader, and the session scheduler, in one handle.
pub struct Engine {
    fragments: Fragments,
    hooks: Hooks,
    post: PostProcessors,
    cache: TemplateCache,
    translator: Rc<dyn Fn(&str) -> String>,
    globals: Scope,
    transport: Box<dyn Transport>,
    /// In-flight fetches and their FIFO waiter queues
    pending: HashMap<String, Vec<u64>>,
    sessions: HashMap<u64, Session>,
    ready: VecDeque<u64>,
    next_id: u64,
}

impl Engine {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            fragments: Fragments::new(),
            hooks: Hooks::new(),
            post: PostProcessors::new(),
            cache: TemplateCache::new(),
            translator: Rc::new(|s: &str| s.to_string()),
            globals: Scope::new(),
            transport: Box::new(transport),
            pending: HashMap::new(),
            sessions: HashMap::new(),
            ready: VecDeque::new(),
            next_id: 0,
        }
    }

    /// An engine sharing a fragment registry built elsewhere — the shape a
    /// compiling transport needs, so fetched templates register their
    /// fragments where the engine will look them up
    pub fn with_fragments(transport: impl Transport + 'static, fragments: Fragments) -> Self {
        let mut engine = Self::new(transport);
        engine.fragments = fragments;
        engine
    }

    /// Handle to the fragment registry this engine renders from
    pub fn fragments(&self) -> Fragments {
        self.fragments.clone()
    }

    /// Handle to the code hook registry
    pub fn hooks(&self) -> Hooks {
        self.hooks.clone()
    }

    /// Handle to the post-render processor registry
    pub fn post_processors(&self) -> PostProcessors {
        self.post.clone()
    }

    /// Handle to the template cache
    pub fn cache(&self) -> TemplateCache {
        self.cache.clone()
    }

    /// A compiler wired to this engine's fragment registry
    pub fn compiler(&self) -> Compiler {
        Compiler::new(self.fragments.clone())
    }

    /// Replace the translation lookup used by localize tags
    pub fn set_translator(&mut self, f: impl Fn(&str) -> String + 'static) {
        self.translator = Rc::new(f);
    }

    /// The base scope every session starts from; register host functions
    /// and process-wide variables here
    pub fn globals_mut(&mut self) -> &mut Scope {
        &mut self.globals
    }

    /// Render the named template against `ctx`.
    ///
    /// The result is delivered through `done` once the template and every
    /// dependency below it has loaded and rendered. Call [`Engine::pump`]
    /// to drive transport completions.
    pub fn render(&mut self, name: &str, ctx: RenderContext, args: RenderArgs, done: DoneFn) {
        let scope = self.session_scope(&ctx, &args);
        let sid = self.insert(Session {
            name: name.to_string(),
            program: None,
            ctx,
            args,
            scope,
            out: Vec::new(),
            after: Rc::new(RefCell::new(Vec::new())),
            phase: Phase::Start,
            completion: Some(Completion::Done(done)),
        });
        debug!(session = sid, template = %name, "render requested");
        self.ready.push_back(sid);
        self.drain_ready();
    }

    /// Render an already-compiled program directly (the execution boundary:
    /// a host process hands over raw compiled input)
    pub fn render_program(
        &mut self,
        program: Program,
        ctx: RenderContext,
        args: RenderArgs,
        done: DoneFn,
    ) {
        let scope = self.session_scope(&ctx, &args);
        let name = program.name().to_string();
        let sid = self.insert(Session {
            name,
            program: Some(Rc::new(program)),
            ctx,
            args,
            scope,
            out: Vec::new(),
            after: Rc::new(RefCell::new(Vec::new())),
            phase: Phase::LoadImports,
            completion: Some(Completion::Done(done)),
        });
        self.ready.push_back(sid);
        self.drain_ready();
    }

    /// Render and pump until done. Errors if the render stays suspended on
    /// a dependency the transport never delivered.
    pub fn render_sync(
        &mut self,
        name: &str,
        ctx: RenderContext,
        args: RenderArgs,
    ) -> Result<Rendered> {
        let slot = Rc::new(RefCell::new(None));
        let receiver = slot.clone();
        self.render(
            name,
            ctx,
            args,
            Box::new(move |result| {
                *receiver.borrow_mut() = Some(result);
            }),
        );
        self.pump();
        let result = slot.borrow_mut().take().unwrap_or_else(|| {
            Err(miette!(
                "render of `{name}` did not complete; a dependency is still loading"
            ))
        });
        result
    }

    /// Invoke a registered fragment from host code and return its markup
    /// synchronously, running any post-render notifications it queued
    pub fn render_fragment(&mut self, name: &str, args: &[Value]) -> Result<String> {
        let after: AfterQueue = Rc::new(RefCell::new(Vec::new()));
        let services = self.services_for(&after);
        let markup = services
            .try_invoke(name, args, &[], &self.globals)
            .ok_or_else(|| miette!("fragment `{name}` is not registered"))??;
        self.dispatch_after(&after);
        Ok(markup)
    }

    /// Drive transport completions until no further progress is possible
    pub fn pump(&mut self) {
        loop {
            self.drain_ready();
            let batch = self.transport.poll();
            if batch.is_empty() {
                break;
            }
            for fetched in batch {
                self.install(fetched);
            }
        }
    }

    // ========================================================================
    // Loader state machine: absent -> loading -> ready(version)
    // ========================================================================

    fn ensure_loaded(&mut self, name: &str, want: Option<Version>, sid: u64) -> Load {
        if let Some(queue) = self.pending.get_mut(name) {
            // Already loading: queue, never re-fetch
            debug!(session = sid, template = %name, "queued on in-flight fetch");
            queue.push(sid);
            return Load::Queued;
        }

        if let Some(entry) = self.cache.get(name) {
            match &want {
                None => return Load::Ready,
                Some(v) if entry.version.as_ref() == Some(v) => return Load::Ready,
                Some(v) => {
                    warn!(
                        template = %name,
                        cached = ?entry.version,
                        requested = %v,
                        "stale cache entry, re-fetching"
                    );
                    // Replaced wholesale; in-flight renders of the stale
                    // version are not retried
                    self.cache.invalidate(name);
                }
            }
        }

        debug!(template = %name, "fetching");
        self.pending.insert(name.to_string(), vec![sid]);
        self.transport.request(name);
        Load::Queued
    }

    fn install(&mut self, fetched: Fetched) {
        match fetched.result {
            Ok((program, version)) => {
                debug!(template = %fetched.name, version = ?version, "installing fetched template");
                self.cache
                    .install(&fetched.name, Rc::new(program), version);
                // Resume waiters in FIFO order
                for sid in self.pending.remove(&fetched.name).unwrap_or_default() {
                    self.ready.push_back(sid);
                }
            }
            Err(reason) => {
                warn!(template = %fetched.name, %reason, "fetch failed");
                for sid in self.pending.remove(&fetched.name).unwrap_or_default() {
                    if let Some(session) = self.sessions.remove(&sid) {
                        let err = LoadFailedError {
                            name: fetched.name.clone(),
                            reason: reason.clone(),
                        };
                        self.fail(session, miette::Report::new(err));
                    }
                }
            }
        }
    }

    // ========================================================================
    // Session scheduler
    // ========================================================================

    fn drain_ready(&mut self) {
        while let Some(sid) = self.ready.pop_front() {
            self.step(sid);
        }
    }

    fn step(&mut self, sid: u64) {
        let Some(mut s) = self.sessions.remove(&sid) else {
            // Torn down while queued (a sibling load failed)
            return;
        };

        loop {
            match s.phase {
                Phase::Start => {
                    let want = s.ctx.version_of(&s.name);
                    match self.ensure_loaded(&s.name, want, sid) {
                        Load::Ready => {
                            let entry = self.cache.get(&s.name).expect("ready entries are cached");
                            s.program = Some(entry.program);
                            s.phase = Phase::LoadImports;
                        }
                        Load::Queued => {
                            s.phase = Phase::AwaitProgram;
                            break;
                        }
                    }
                }
                Phase::AwaitProgram => match self.cache.get(&s.name) {
                    Some(entry) => {
                        s.program = Some(entry.program);
                        s.phase = Phase::LoadImports;
                    }
                    None => {
                        let err = LoadFailedError {
                            name: s.name.clone(),
                            reason: "fetch completed without installing a program".to_string(),
                        };
                        return self.fail(s, miette::Report::new(err));
                    }
                },
                Phase::LoadImports => {
                    let program = s.program.clone().expect("program bound before imports");
                    // Two-phase: start every load before rendering any import
                    let mut remaining = 0usize;
                    for name in program.imports() {
                        let want = s.ctx.version_of(name);
                        if matches!(self.ensure_loaded(name, want, sid), Load::Queued) {
                            remaining += 1;
                        }
                    }
                    if remaining == 0 {
                        s.phase = Phase::RunImports { next: 0 };
                    } else {
                        s.phase = Phase::AwaitImports { remaining };
                        break;
                    }
                }
                Phase::AwaitImports { remaining } => {
                    let left = remaining - 1;
                    if left == 0 {
                        s.phase = Phase::RunImports { next: 0 };
                    } else {
                        s.phase = Phase::AwaitImports { remaining: left };
                        break;
                    }
                }
                Phase::RunImports { next } => {
                    let program = s.program.clone().expect("program bound before imports");
                    let imports: Vec<String> =
                        program.imports().into_iter().map(String::from).collect();

                    let mut next = next;
                    let mut spawn = None;
                    while next < imports.len() {
                        let name = &imports[next];
                        let Some(entry) = self.cache.get(name) else {
                            let err = LoadFailedError {
                                name: name.clone(),
                                reason: "import vanished from the cache".to_string(),
                            };
                            return self.fail(s, miette::Report::new(err));
                        };
                        if entry.rendered {
                            // Render-once: already available, skip re-render
                            debug!(template = %name, "import already rendered, skipping");
                            next += 1;
                            continue;
                        }
                        spawn = Some((name.clone(), entry.program));
                        break;
                    }

                    match spawn {
                        None => s.phase = Phase::Body,
                        Some((name, program)) => {
                            let child_args = RenderArgs::default();
                            let child_scope = self.session_scope(&s.ctx, &child_args);
                            let child = Session {
                                name,
                                program: Some(program),
                                ctx: s.ctx.clone(),
                                args: child_args,
                                scope: child_scope,
                                out: Vec::new(),
                                after: Rc::new(RefCell::new(Vec::new())),
                                phase: Phase::LoadImports,
                                completion: Some(Completion::Import {
                                    origin: sid,
                                    next: next + 1,
                                }),
                            };
                            s.phase = Phase::AwaitImport;
                            let child_sid = self.insert(child);
                            self.sessions.insert(sid, s);
                            self.ready.push_back(child_sid);
                            return;
                        }
                    }
                }
                Phase::Body => {
                    let program = s.program.clone().expect("program bound before body");
                    let services = self.services_for(&s.after);
                    let resolvers = s.args.blocks.clone();
                    let result = Interp {
                        services: &services,
                        resolvers: &resolvers,
                        source: &program.source,
                    }
                    .run(&program.ops, &mut s.scope, &mut s.out);

                    if let Err(err) = result {
                        return self.fail(s, err);
                    }

                    let Some(parent) = program.extends().map(String::from) else {
                        return self.finish(s, None);
                    };
                    match self.ensure_loaded(&parent, s.ctx.version_of(&parent), sid) {
                        Load::Ready => return self.spawn_parent(sid, s),
                        Load::Queued => {
                            s.phase = Phase::AwaitParentLoad;
                            break;
                        }
                    }
                }
                Phase::AwaitParentLoad => return self.spawn_parent(sid, s),
                // Resumed by child-session completion, not by stepping
                Phase::AwaitImport | Phase::AwaitParent => break,
            }
        }

        self.sessions.insert(sid, s);
    }

    /// Spawn the extends parent: it renders into the child's own buffer,
    /// with the child's resolver chain plus one resolver answering from the
    /// child's scope and the fragment registry
    fn spawn_parent(&mut self, sid: u64, mut s: Session) {
        let parent_name = s
            .program
            .as_ref()
            .and_then(|p| p.extends())
            .expect("extends target recorded")
            .to_string();
        let Some(entry) = self.cache.get(&parent_name) else {
            let err = LoadFailedError {
                name: parent_name,
                reason: "extends target vanished from the cache".to_string(),
            };
            return self.fail(s, miette::Report::new(err));
        };

        let mut blocks = s.args.blocks.clone();
        let services = self.services_for(&s.after);
        let child_scope = s.scope.clone();
        blocks.push(Rc::new(move |name: &str| {
            resolve_dynamic_block(&services, &child_scope, name)
        }) as BlockResolver);

        let parent_args = RenderArgs {
            blocks,
            user: s.args.user.clone(),
        };
        let parent_scope = self.session_scope(&s.ctx, &parent_args);
        let parent = Session {
            name: parent_name.clone(),
            program: Some(entry.program),
            ctx: s.ctx.clone(),
            args: parent_args,
            scope: parent_scope,
            // Single-directional buffer handoff: parent and child compose
            // into the same output, nothing is captured and spliced
            out: std::mem::take(&mut s.out),
            after: Rc::new(RefCell::new(Vec::new())),
            phase: Phase::LoadImports,
            completion: Some(Completion::Extend { origin: sid }),
        };

        debug!(child = %s.name, parent = %parent_name, "rendering inheritance target");
        s.phase = Phase::AwaitParent;
        let pid = self.insert(parent);
        self.sessions.insert(sid, s);
        self.ready.push_back(pid);
    }

    /// Completion, in order: join the buffer, invoke the completion, run
    /// post-render notifications, set the rendered-once flag, release refs
    fn finish(&mut self, mut s: Session, markup_override: Option<String>) {
        let markup = markup_override.unwrap_or_else(|| s.out.concat());
        debug!(template = %s.name, bytes = markup.len(), "render complete");

        match s.completion.take() {
            Some(Completion::Done(done)) => {
                let args = std::mem::take(&mut s.args);
                done(Ok(Rendered {
                    data: s.ctx.data.clone(),
                    markup,
                    args,
                }));
            }
            Some(Completion::Import { origin, next }) => {
                // Import output is discarded; imports run for their effects
                if let Some(origin_session) = self.sessions.get_mut(&origin) {
                    origin_session.phase = Phase::RunImports { next };
                    self.ready.push_back(origin);
                }
            }
            Some(Completion::Extend { origin }) => {
                // The parent finished the shared buffer; the origin session
                // completes with the composed markup
                if let Some(origin_session) = self.sessions.remove(&origin) {
                    self.finish(origin_session, Some(markup));
                }
            }
            None => {}
        }

        self.dispatch_after(&s.after);
        self.cache.mark_rendered(&s.name);
        // buffer, scope, and context references drop with the session
    }

    /// A propagated error completes the request with the error — never with
    /// partial markup — and tears down the session chain above it
    fn fail(&mut self, mut s: Session, err: miette::Report) {
        warn!(template = %s.name, "render failed: {err}");
        match s.completion.take() {
            Some(Completion::Done(done)) => done(Err(err)),
            Some(Completion::Import { origin, .. }) | Some(Completion::Extend { origin }) => {
                if let Some(origin_session) = self.sessions.remove(&origin) {
                    self.fail(origin_session, err);
                }
            }
            None => {}
        }
    }

    /// Run registered post-render processors, one call per key, with every
    /// value queued under that key in order
    fn dispatch_after(&mut self, after: &AfterQueue) {
        let queued: Vec<(String, Value)> = after.borrow_mut().drain(..).collect();
        let mut grouped: Vec<(String, Vec<Value>)> = Vec::new();
        for (key, value) in queued {
            match grouped.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1.push(value),
                None => grouped.push((key, vec![value])),
            }
        }
        for (key, values) in grouped {
            if let Some(f) = self.post.lookup(&key) {
                f(&values);
            }
        }
    }

    fn services_for(&self, after: &AfterQueue) -> Services {
        Services {
            fragments: self.fragments.clone(),
            hooks: self.hooks.clone(),
            translator: self.translator.clone(),
            after: after.clone(),
        }
    }

    fn session_scope(&self, ctx: &RenderContext, args: &RenderArgs) -> Scope {
        let mut scope = self.globals.clone();
        scope.set("ctx", ctx.data.clone());
        scope.set("args", args.user.clone());
        scope
    }

    fn insert(&mut self, session: Session) -> u64 {
        let sid = self.next_id;
        self.next_id += 1;
        self.sessions.insert(sid, session);
        sid
    }
}
