//! Program interpreter
//!
//! Walks a program's operations in order against one output buffer. Body
//! interpretation is fully synchronous — imports and extends are sequenced
//! by the session layer and skipped here. Fragment invocation happens from
//! expression position and renders into an isolated buffer.

use std::cell::RefCell;
use std::rc::Rc;

use miette::Result;

use crate::error::{TemplateSource, UnknownHookError};
use crate::expr::{CallOutlet, Evaluator, Scope, Value};
use crate::program::Op;
use crate::runtime::registry::{Fragment, Fragments, Hooks};
use crate::text;

/// One resolver in the block provider chain. Returning `None` is the
/// "no such block here" sentinel; the next resolver in the chain is asked.
pub type BlockResolver = Rc<dyn Fn(&str) -> Option<String>>;

/// After-render notifications collected during one session, in queue order
pub type AfterQueue = Rc<RefCell<Vec<(String, Value)>>>;

/// The handles every interpretation needs; cloning clones handles
#[derive(Clone)]
pub(crate) struct Services {
    pub fragments: Fragments,
    pub hooks: Hooks,
    pub translator: Rc<dyn Fn(&str) -> String>,
    pub after: AfterQueue,
}

impl Services {
    /// Invoke a fragment by name; `None` when it was never registered
    pub fn try_invoke(
        &self,
        name: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
        caller: &Scope,
    ) -> Option<Result<String>> {
        let fragment = self.fragments.lookup(name)?;
        Some(self.invoke_def(&fragment, args, kwargs, caller))
    }

    /// Render a fragment synchronously and return the joined markup.
    ///
    /// The fragment sees the caller's scope with its parameters bound in a
    /// pushed level: positionally, then by keyword; missing parameters are
    /// none. The fragment owns an isolated buffer — never the caller's.
    pub fn invoke_def(
        &self,
        fragment: &Fragment,
        args: &[Value],
        kwargs: &[(String, Value)],
        caller: &Scope,
    ) -> Result<String> {
        let mut scope = caller.clone();
        scope.push_scope();
        for (i, param) in fragment.params.iter().enumerate() {
            let value = args
                .get(i)
                .cloned()
                .or_else(|| {
                    kwargs
                        .iter()
                        .find(|(k, _)| k == param)
                        .map(|(_, v)| v.clone())
                })
                .unwrap_or(Value::None);
            scope.set(param.clone(), value);
        }

        let mut out = Vec::new();
        Interp {
            services: self,
            resolvers: &[],
            source: &fragment.program.source,
        }
        .run(&fragment.program.ops, &mut scope, &mut out)?;
        Ok(out.concat())
    }
}

/// Dynamic block fallback: a scope value under the block's name, then a
/// zero-argument fragment. Failures are swallowed — a missing or failing
/// block renders nothing.
pub(crate) fn resolve_dynamic_block(
    services: &Services,
    scope: &Scope,
    name: &str,
) -> Option<String> {
    if let Some(value) = scope.get(name) {
        return Some(value.render_to_string());
    }
    match services.try_invoke(name, &[], &[], scope) {
        Some(Ok(markup)) => Some(markup),
        _ => None,
    }
}

/// Makes fragments callable from expression position.
/// Fragment output is markup and comes back safe (never re-escaped).
struct FragmentOutlet<'a> {
    services: &'a Services,
    caller: &'a Scope,
}

impl CallOutlet for FragmentOutlet<'_> {
    fn call(
        &self,
        name: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Option<Result<Value>> {
        self.services
            .try_invoke(name, args, kwargs, self.caller)
            .map(|result| result.map(|markup| Value::Safe(Box::new(Value::String(markup)))))
    }
}

/// The explicit environment handed to a host code hook
pub struct HookCtx<'a> {
    /// The session's variable scope; hooks may read and set variables
    pub scope: &'a mut Scope,
    out: &'a mut Vec<String>,
    after: &'a AfterQueue,
}

impl HookCtx<'_> {
    /// Append markup to the session's output buffer
    pub fn emit(&mut self, markup: impl Into<String>) {
        self.out.push(markup.into());
    }

    /// Append a value's rendering, unescaped
    pub fn emit_value(&mut self, value: &Value) {
        self.out.push(value.render_to_string());
    }

    /// Append a value's rendering through the escape utility
    pub fn emit_escaped(&mut self, value: &Value) {
        if value.is_safe() {
            self.out.push(value.render_to_string());
        } else {
            self.out.push(text::escape(&value.render_to_string()));
        }
    }

    /// Queue a post-render notification for `key`
    pub fn after_render(&mut self, key: impl Into<String>, value: Value) {
        self.after.borrow_mut().push((key.into(), value));
    }
}

/// Interpreter for one program's ops
pub(crate) struct Interp<'a> {
    pub services: &'a Services,
    pub resolvers: &'a [BlockResolver],
    pub source: &'a TemplateSource,
}

impl Interp<'_> {
    /// Run `ops` in order against `scope` and `out`.
    ///
    /// Output preserves source document order exactly, including
    /// interleavings of literal and computed segments.
    pub fn run(&self, ops: &[Op], scope: &mut Scope, out: &mut Vec<String>) -> Result<()> {
        for op in ops {
            match op {
                Op::Literals(runs) => out.extend(runs.iter().cloned()),
                Op::Emit(expr) => {
                    let outlet = FragmentOutlet {
                        services: self.services,
                        caller: scope,
                    };
                    let value = Evaluator::new(scope, self.source)
                        .with_outlet(&outlet)
                        .eval(expr)?;
                    out.push(value.render_to_string());
                }
                Op::EmitEscaped(expr) => {
                    let outlet = FragmentOutlet {
                        services: self.services,
                        caller: scope,
                    };
                    let value = Evaluator::new(scope, self.source)
                        .with_outlet(&outlet)
                        .eval(expr)?;
                    if value.is_safe() {
                        out.push(value.render_to_string());
                    } else {
                        out.push(text::escape(&value.render_to_string()));
                    }
                }
                Op::Code { body, span } => {
                    let hook = self.services.hooks.lookup(body).ok_or_else(|| {
                        UnknownHookError {
                            body: body.clone(),
                            span: *span,
                            src: self.source.named_source(),
                        }
                    })?;
                    hook(&mut HookCtx {
                        scope,
                        out,
                        after: &self.services.after,
                    })?;
                }
                Op::Localize(message) => out.push((self.services.translator)(message)),
                Op::Block(name) => self.block_ref(name, scope, out),
                // Sequenced by the session, not the interpreter
                Op::Import(_) | Op::Extend(_) => {}
            }
        }
        Ok(())
    }

    /// Walk the provider chain first-match-wins, then the dynamic fallback,
    /// then silently emit nothing
    fn block_ref(&self, name: &str, scope: &Scope, out: &mut Vec<String>) {
        for resolver in self.resolvers {
            if let Some(markup) = resolver(name) {
                out.push(markup);
                return;
            }
        }
        if let Some(markup) = resolve_dynamic_block(self.services, scope, name) {
            out.push(markup);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::Compiler;

    fn services() -> Services {
        Services {
            fragments: Fragments::new(),
            hooks: Hooks::new(),
            translator: Rc::new(|s: &str| s.to_string()),
            after: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn run(services: &Services, src: &str, scope: &mut Scope) -> Result<String> {
        let program = Compiler::new(services.fragments.clone()).compile("test", src)?;
        let mut out = Vec::new();
        Interp {
            services,
            resolvers: &[],
            source: &program.source,
        }
        .run(&program.ops, scope, &mut out)?;
        Ok(out.concat())
    }

    #[test]
    fn test_plain_text_round_trips() {
        let services = services();
        let out = run(&services, "hello there", &mut Scope::new()).unwrap();
        assert_eq!(out, "hello there");
    }

    #[test]
    fn test_emit_value_unescaped() {
        let services = services();
        let mut scope = Scope::new();
        scope.set("data", Value::from("<b>raw</b>"));
        let out = run(&services, "{{ data }}", &mut scope).unwrap();
        assert_eq!(out, "<b>raw</b>");
    }

    #[test]
    fn test_emit_escaped() {
        let services = services();
        let mut scope = Scope::new();
        scope.set("x", Value::from("<script>"));
        let out = run(&services, "{@ x @}", &mut scope).unwrap();
        assert_eq!(out, "&lt;script&gt;");
    }

    #[test]
    fn test_safe_value_not_double_escaped() {
        let services = services();
        let mut scope = Scope::new();
        scope.set("x", Value::Safe(Box::new(Value::from("<b>ok</b>"))));
        let out = run(&services, "{@ x @}", &mut scope).unwrap();
        assert_eq!(out, "<b>ok</b>");
    }

    #[test]
    fn test_hook_effects_interleave_in_order() {
        let services = services();
        services.hooks.register("mark", |ctx: &mut HookCtx| {
            ctx.emit("<mark>");
            Ok(())
        });
        let mut scope = Scope::new();
        scope.set("x", Value::Int(1));
        scope.set("y", Value::Int(2));
        let out = run(&services, "A {{x}} B {% mark %} C {{y}} D", &mut scope).unwrap();
        assert_eq!(out, "A 1 B <mark> C 2 D");
    }

    #[test]
    fn test_unregistered_hook_is_an_error() {
        let services = services();
        assert!(run(&services, "{% nothing here %}", &mut Scope::new()).is_err());
    }

    #[test]
    fn test_hook_can_loop_over_context() {
        let services = services();
        services.hooks.register("each item", |ctx: &mut HookCtx| {
            let Some(Value::List(items)) = ctx.scope.get("items").cloned() else {
                return Ok(());
            };
            for item in items {
                ctx.emit("<li>");
                ctx.emit_escaped(&item);
                ctx.emit("</li>");
            }
            Ok(())
        });
        let mut scope = Scope::new();
        scope.set("items", Value::from(vec!["a", "<b>"]));
        let out = run(&services, "<ul>{% each item %}</ul>", &mut scope).unwrap();
        assert_eq!(out, "<ul><li>a</li><li>&lt;b&gt;</li></ul>");
    }

    #[test]
    fn test_localize_goes_through_translator() {
        let mut services = services();
        services.translator = Rc::new(|s: &str| format!("¡{s}!"));
        let out = run(&services, "{_ hello _}", &mut Scope::new()).unwrap();
        assert_eq!(out, "¡hello!");
    }

    #[test]
    fn test_block_chain_first_match_wins() {
        let services = services();
        let program = Compiler::new(services.fragments.clone())
            .compile("test", "{$ b $}")
            .unwrap();

        let child: BlockResolver = Rc::new(|_name| None);
        let parent: BlockResolver = Rc::new(|name| {
            (name == "b").then(|| "parent content".to_string())
        });
        let resolvers = vec![child, parent];

        let mut out = Vec::new();
        Interp {
            services: &services,
            resolvers: &resolvers,
            source: &program.source,
        }
        .run(&program.ops, &mut Scope::new(), &mut out)
        .unwrap();
        assert_eq!(out.concat(), "parent content");
    }

    #[test]
    fn test_block_dynamic_fallback_to_scope() {
        let services = services();
        let mut scope = Scope::new();
        scope.set("header", Value::from("from scope"));
        let out = run(&services, "{$ header $}", &mut scope).unwrap();
        assert_eq!(out, "from scope");
    }

    #[test]
    fn test_block_without_any_provider_is_silent() {
        let services = services();
        let out = run(&services, "a{$ ghost $}b", &mut Scope::new()).unwrap();
        assert_eq!(out, "ab");
    }

    #[test]
    fn test_fragment_invocation_round_trip() {
        let services = services();
        // Compiling the definition registers the fragment
        run(&services, "{= f(x) {{x}} =}", &mut Scope::new()).unwrap();

        let markup = services
            .try_invoke("f", &[Value::Int(5)], &[], &Scope::new())
            .unwrap()
            .unwrap();
        assert_eq!(markup, "5");
    }

    #[test]
    fn test_fragment_callable_from_expression() {
        let services = services();
        let mut scope = Scope::new();
        let out = run(
            &services,
            r#"{= li(text) <li>{{text}}</li> =}<ul>{{ li("One") }}{{ li("Two") }}</ul>"#,
            &mut scope,
        )
        .unwrap();
        assert_eq!(out, "<ul><li>One</li><li>Two</li></ul>");
    }

    #[test]
    fn test_fragment_kwargs_and_missing_params() {
        let services = services();
        run(&services, "{= pair(a, b) {{a}}/{{b}} =}", &mut Scope::new()).unwrap();

        let markup = services
            .try_invoke("pair", &[], &[("b".to_string(), Value::Int(2))], &Scope::new())
            .unwrap()
            .unwrap();
        // `a` was never supplied and renders as nothing
        assert_eq!(markup, "/2");
    }

    #[test]
    fn test_fragment_sees_the_calling_scope() {
        let services = services();
        let mut scope = Scope::new();
        scope.set("greeting", Value::from("hi"));
        let out = run(
            &services,
            "{= hail(name) {{greeting}}, {{name}} =}{{ hail(\"you\") }}",
            &mut scope,
        )
        .unwrap();
        assert_eq!(out, "hi, you");
    }

    #[test]
    fn test_after_render_queue_collects() {
        let services = services();
        services.hooks.register("note", |ctx: &mut HookCtx| {
            ctx.after_render("scroll", Value::Int(7));
            Ok(())
        });
        run(&services, "{% note %}", &mut Scope::new()).unwrap();
        let after = services.after.borrow();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].0, "scroll");
    }
}
