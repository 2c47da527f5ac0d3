//! Template compiler
//!
//! Transforms template source into a [`Program`]. The compiler keeps an
//! explicit stack of frames — the root template plus one frame per open
//! fragment definition — each owning its own pending-literal buffer and op
//! list, so deeply nested definitions never grow the call stack.
//!
//! Compiling a fragment definition registers the fragment in the
//! [`Fragments`] registry as a documented side effect.

use miette::Result;
use tracing::debug;

use crate::error::{
    DirectiveInFragmentError, DuplicateExtendsError, FragmentHeaderError, ImportPlacementError,
    TemplateSource, UnterminatedTagError,
};
use crate::expr::parse_expression;
use crate::program::{Op, Program};
use crate::runtime::{Fragment, Fragments};
use crate::scan::{self, TagKind};

/// Create a span from offset and length
fn span(offset: usize, len: usize) -> miette::SourceSpan {
    miette::SourceSpan::new(offset.into(), len)
}

/// One compile frame: the root template or an open fragment definition
struct Frame {
    /// Pending literal runs, flushed as one batched op
    literals: Vec<String>,
    ops: Vec<Op>,
    /// Set for fragment frames
    fragment: Option<OpenFragment>,
}

struct OpenFragment {
    name: String,
    params: Vec<String>,
    /// One past the last body byte of this definition
    body_end: usize,
    /// Where the enclosing frame resumes after the closer
    resume: usize,
}

impl Frame {
    fn root() -> Self {
        Self {
            literals: Vec::new(),
            ops: Vec::new(),
            fragment: None,
        }
    }

    fn fragment(open: OpenFragment) -> Self {
        Self {
            literals: Vec::new(),
            ops: Vec::new(),
            fragment: Some(open),
        }
    }

    fn flush_literals(&mut self) {
        if !self.literals.is_empty() {
            self.ops.push(Op::Literals(std::mem::take(&mut self.literals)));
        }
    }
}

/// The template compiler
pub struct Compiler {
    fragments: Fragments,
}

impl Compiler {
    /// Create a compiler that registers fragment definitions into `fragments`
    pub fn new(fragments: Fragments) -> Self {
        Self { fragments }
    }

    /// Compile template source into a program.
    ///
    /// Pure apart from the documented fragment-registration side effect.
    /// Every error is fatal: no partial program is ever returned.
    pub fn compile(&self, name: impl Into<String>, text: impl Into<String>) -> Result<Program> {
        Pass {
            source: TemplateSource::new(name, text),
            fragments: &self.fragments,
            frames: vec![Frame::root()],
            cursor: 0,
            saw_content: false,
            extend: None,
        }
        .run()
    }
}

/// State for one compile call
struct Pass<'a> {
    source: TemplateSource,
    fragments: &'a Fragments,
    frames: Vec<Frame>,
    cursor: usize,
    /// Whether anything beyond whitespace and directives was seen yet
    /// (tracked to reject imports after content)
    saw_content: bool,
    /// The single inheritance target and the span of its directive
    extend: Option<(String, miette::SourceSpan)>,
}

impl Pass<'_> {
    fn run(mut self) -> Result<Program> {
        let text = self.source.source.clone();
        let input: &str = text.as_str();

        loop {
            // Close any fragment frame whose body span is exhausted
            while let Some(end) = self.frame_end() {
                if self.cursor < end {
                    break;
                }
                self.finish_fragment();
            }

            let limit = self.frame_end().unwrap_or(input.len());
            if self.cursor >= limit && self.frames.len() == 1 {
                break;
            }

            match scan::next_opening(&input[..limit], self.cursor) {
                None => {
                    self.push_literal(&input[self.cursor..limit]);
                    self.cursor = limit;
                }
                Some(open) => {
                    self.push_literal(&input[self.cursor..open.at]);
                    self.handle_tag(&input, open, limit)?;
                }
            }
        }

        // Finalization: flush, then the inheritance render wraps everything
        let mut root = self.frames.pop().expect("root frame");
        root.flush_literals();
        if let Some((target, _)) = self.extend.take() {
            root.ops.push(Op::Extend(target));
        }

        Ok(Program {
            source: self.source,
            ops: root.ops,
        })
    }

    /// The current frame's body end, or `None` for the root frame
    fn frame_end(&self) -> Option<usize> {
        self.frames
            .last()
            .and_then(|f| f.fragment.as_ref())
            .map(|open| open.body_end)
    }

    fn in_fragment(&self) -> bool {
        self.frames.len() > 1
    }

    fn frame(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("at least the root frame")
    }

    fn push_literal(&mut self, literal: &str) {
        if literal.is_empty() {
            return;
        }
        if !literal.trim().is_empty() {
            self.saw_content = true;
        }
        self.frame().literals.push(literal.to_string());
    }

    /// Flush pending literals, then append `op`
    fn push_op(&mut self, op: Op) {
        self.saw_content = true;
        let frame = self.frame();
        frame.flush_literals();
        frame.ops.push(op);
    }

    fn handle_tag(&mut self, input: &str, open: scan::Opening, limit: usize) -> Result<()> {
        let body_start = open.at + open.len;
        let close = scan::find_close(&input[..limit], open.kind, body_start).ok_or_else(|| {
            UnterminatedTagError {
                close: open.kind.close_label().to_string(),
                remainder: input[open.at..limit].to_string(),
                open_span: span(open.at, open.len),
                src: self.source.named_source(),
            }
        })?;
        let body = input[body_start..close.body_end].trim();
        self.cursor = close.resume;

        match open.kind {
            TagKind::Emit => {
                let expr = parse_expression(&self.source, body_start, close.body_end)?;
                self.push_op(Op::Emit(expr));
            }
            TagKind::EmitEscaped => {
                let expr = parse_expression(&self.source, body_start, close.body_end)?;
                self.push_op(Op::EmitEscaped(expr));
            }
            TagKind::Code => {
                self.push_op(Op::Code {
                    body: body.to_string(),
                    span: span(body_start, close.body_end - body_start),
                });
            }
            TagKind::Comment => {
                // Discarded; produces no operation
            }
            TagKind::Localize => {
                self.push_op(Op::Localize(body.to_string()));
            }
            TagKind::Block => {
                self.push_op(Op::Block(body.to_string()));
            }
            TagKind::Fragment => {
                self.open_fragment(input, body_start, close)?;
            }
            TagKind::Import => {
                if self.in_fragment() {
                    return Err(DirectiveInFragmentError {
                        directive: "#import".to_string(),
                        span: span(open.at, open.len),
                        src: self.source.named_source(),
                    })?;
                }
                if self.saw_content {
                    return Err(ImportPlacementError {
                        span: span(open.at, open.len),
                        src: self.source.named_source(),
                    })?;
                }
                // No literal flush: pending whitespace stays pending so
                // import ops keep their all-first position
                self.frame().ops.push(Op::Import(body.to_string()));
            }
            TagKind::Extends => {
                if self.in_fragment() {
                    return Err(DirectiveInFragmentError {
                        directive: "#extends".to_string(),
                        span: span(open.at, open.len),
                        src: self.source.named_source(),
                    })?;
                }
                let directive_span = span(open.at, open.len);
                if let Some((_, first_span)) = &self.extend {
                    return Err(DuplicateExtendsError {
                        span: directive_span,
                        first_span: *first_span,
                        src: self.source.named_source(),
                    })?;
                }
                self.extend = Some((body.to_string(), directive_span));
            }
        }

        Ok(())
    }

    /// Parse a fragment header and push a new compile frame for its body
    fn open_fragment(&mut self, input: &str, body_start: usize, close: scan::Closing) -> Result<()> {
        self.saw_content = true;

        let header = parse_fragment_header(input, body_start, close.body_end).ok_or_else(|| {
            let body = &input[body_start..close.body_end];
            FragmentHeaderError {
                snippet: body.chars().take(20).collect(),
                span: span(body_start, close.body_end - body_start),
                src: self.source.named_source(),
            }
        })?;

        // The fragment body is whatever follows the header, minus the
        // whitespace that pads the delimiters
        let bytes = input.as_bytes();
        let mut body_from = header.body_from;
        let mut body_end = close.body_end;
        while body_from < body_end && bytes[body_from].is_ascii_whitespace() {
            body_from += 1;
        }
        while body_end > body_from && bytes[body_end - 1].is_ascii_whitespace() {
            body_end -= 1;
        }

        self.frames.push(Frame::fragment(OpenFragment {
            name: header.name,
            params: header.params,
            body_end,
            resume: close.resume,
        }));
        self.cursor = body_from;
        Ok(())
    }

    /// Finish the current fragment frame: register it and resume the parent
    fn finish_fragment(&mut self) {
        let mut frame = self.frames.pop().expect("fragment frame");
        frame.flush_literals();
        let open = frame.fragment.expect("fragment frame has a header");

        debug!(name = %open.name, params = open.params.len(), "registered fragment");
        self.fragments.register(
            &open.name,
            Fragment {
                params: open.params,
                program: std::rc::Rc::new(Program {
                    source: self.source.clone(),
                    ops: frame.ops,
                }),
            },
        );
        self.cursor = open.resume;
    }
}

struct FragmentHeader {
    name: String,
    params: Vec<String>,
    /// Byte offset where the fragment body begins
    body_from: usize,
}

/// Parse `name(params)` at the start of a fragment tag body
fn parse_fragment_header(input: &str, start: usize, end: usize) -> Option<FragmentHeader> {
    let bytes = input.as_bytes();
    let mut i = start;

    while i < end && bytes[i].is_ascii_whitespace() {
        i += 1;
    }

    let name_start = i;
    while i < end && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    if i == name_start {
        return None;
    }
    let name = input[name_start..i].to_string();

    while i < end && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if i >= end || bytes[i] != b'(' {
        return None;
    }
    i += 1;

    let params_start = i;
    while i < end && bytes[i] != b')' {
        i += 1;
    }
    if i >= end {
        return None;
    }
    let params = input[params_start..i]
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    Some(FragmentHeader {
        name,
        params,
        body_from: i + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(src: &str) -> Result<Program> {
        Compiler::new(Fragments::new()).compile("test", src)
    }

    fn compile_with(fragments: &Fragments, src: &str) -> Result<Program> {
        Compiler::new(fragments.clone()).compile("test", src)
    }

    #[test]
    fn test_tag_free_source_is_one_literal_batch() {
        let program = compile("hello there").unwrap();
        assert_eq!(program.ops.len(), 1);
        let Op::Literals(runs) = &program.ops[0] else {
            panic!("expected a literal batch");
        };
        assert_eq!(runs, &vec!["hello there".to_string()]);
    }

    #[test]
    fn test_empty_source() {
        let program = compile("").unwrap();
        assert!(program.ops.is_empty());
    }

    #[test]
    fn test_interpolation() {
        let program = compile("{{ data }}").unwrap();
        assert_eq!(program.ops.len(), 1);
        assert!(matches!(program.ops[0], Op::Emit(_)));
    }

    #[test]
    fn test_escaped_interpolation() {
        let program = compile("{@ x @}").unwrap();
        assert!(matches!(program.ops[0], Op::EmitEscaped(_)));
    }

    #[test]
    fn test_literals_flush_before_ops() {
        let program = compile("Testing {{ data }} stuff").unwrap();
        assert_eq!(program.ops.len(), 3);
        assert!(matches!(&program.ops[0], Op::Literals(runs) if runs == &vec!["Testing ".to_string()]));
        assert!(matches!(program.ops[1], Op::Emit(_)));
        assert!(matches!(&program.ops[2], Op::Literals(runs) if runs == &vec![" stuff".to_string()]));
    }

    #[test]
    fn test_interleaving_preserves_order() {
        let program = compile("A {{x}} B {% code %} C {{y}} D").unwrap();
        let kinds: Vec<&str> = program
            .ops
            .iter()
            .map(|op| match op {
                Op::Literals(_) => "lit",
                Op::Emit(_) => "emit",
                Op::Code { .. } => "code",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["lit", "emit", "lit", "code", "lit", "emit", "lit"]
        );
    }

    #[test]
    fn test_comment_is_discarded() {
        let program =
            compile("{# this should not appear {{ data }} either #}Other stuff").unwrap();
        assert_eq!(program.ops.len(), 1);
        let Op::Literals(runs) = &program.ops[0] else {
            panic!("expected a literal batch");
        };
        assert_eq!(runs, &vec!["Other stuff".to_string()]);
        // The commented text never reaches the operations
        let ops = format!("{:?}", program.ops);
        assert!(!ops.contains("should not appear"));
        assert!(!ops.contains("data"));
    }

    #[test]
    fn test_localize_preserves_text() {
        let program = compile(r#"{_ this is "localized" _}"#).unwrap();
        let Op::Localize(text) = &program.ops[0] else {
            panic!("expected a localize op");
        };
        assert_eq!(text, r#"this is "localized""#);
    }

    #[test]
    fn test_unterminated_tag() {
        let err = compile("{{ data").unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("{{ data"), "got: {msg}");
    }

    #[test]
    fn test_unterminated_code_tag() {
        assert!(compile("{% stuff ").is_err());
    }

    #[test]
    fn test_expression_errors_fail_the_compile() {
        assert!(compile("{{ a + }}").is_err());
    }

    #[test]
    fn test_import_order() {
        let program = compile("#import a\n#import b\n").unwrap();
        assert_eq!(program.imports(), vec!["a", "b"]);
        // Imports stay in front of the whitespace literal batch
        assert!(matches!(program.ops[0], Op::Import(_)));
        assert!(matches!(program.ops[1], Op::Import(_)));
    }

    #[test]
    fn test_import_after_content_is_an_error() {
        assert!(compile("{{ work }} #import some/template\n{{ more }}").is_err());
    }

    #[test]
    fn test_import_after_sole_content_is_an_error() {
        // Content before the import errors even with nothing after it
        assert!(compile("{{ work }} #import some/template\n").is_err());
    }

    #[test]
    fn test_whitespace_before_import_is_tolerated() {
        let program = compile("  \n#import a\n #import b\n").unwrap();
        assert_eq!(program.imports(), vec!["a", "b"]);
    }

    #[test]
    fn test_extends_recorded_at_tail() {
        let program = compile("#extends base/page\nSome other stuff").unwrap();
        assert_eq!(program.extends(), Some("base/page"));
        assert!(matches!(program.ops.last(), Some(Op::Extend(_))));
    }

    #[test]
    fn test_duplicate_extends_is_an_error() {
        assert!(compile("#extends a\n#extends b\n").is_err());
    }

    #[test]
    fn test_fragment_registration() {
        let fragments = Fragments::new();
        let program = compile_with(&fragments, "{= f(x) {{x}} =}").unwrap();
        // The definition leaves nothing in the enclosing program
        assert!(program.ops.is_empty());

        let fragment = fragments.lookup("f").unwrap();
        assert_eq!(fragment.params, vec!["x".to_string()]);
        assert_eq!(fragment.program.ops.len(), 1);
    }

    #[test]
    fn test_enclosing_compile_resumes_after_fragment() {
        let fragments = Fragments::new();
        let program = compile_with(&fragments, "before {= f(x) {{x}} =} after").unwrap();
        let Op::Literals(runs) = &program.ops[0] else {
            panic!("expected a literal batch");
        };
        assert_eq!(runs, &vec!["before ".to_string()]);
        let Op::Literals(runs) = &program.ops[1] else {
            panic!("expected a literal batch");
        };
        assert_eq!(runs, &vec![" after".to_string()]);
    }

    #[test]
    fn test_nested_fragment_definitions() {
        let fragments = Fragments::new();
        compile_with(&fragments, "{= outer(x) A {= inner(y) {{y}} =} B =}").unwrap();
        assert!(fragments.lookup("outer").is_some());
        assert!(fragments.lookup("inner").is_some());
    }

    #[test]
    fn test_bad_fragment_header() {
        assert!(compile("{= not a header =}").is_err());
    }

    #[test]
    fn test_fragment_with_several_params() {
        let fragments = Fragments::new();
        compile_with(&fragments, "{= row(a, b, c) {{a}}{{b}}{{c}} =}").unwrap();
        let fragment = fragments.lookup("row").unwrap();
        assert_eq!(fragment.params, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_directives_rejected_in_fragment_body() {
        assert!(compile("{= f() #import a\n =}").is_err());
        assert!(compile("{= f() #extends a\n =}").is_err());
    }

    #[test]
    fn test_block_reference() {
        let program = compile("{$ header $}").unwrap();
        let Op::Block(name) = &program.ops[0] else {
            panic!("expected a block op");
        };
        assert_eq!(name, "header");
    }
}
