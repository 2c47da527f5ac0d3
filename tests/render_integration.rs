//! Integration tests over the filesystem transport
//!
//! These render the committed fixture templates end to end: directory
//! loading, compile-on-fetch fragment registration, inheritance, imports.

use std::collections::HashMap;
use std::process::Command;

use pretty_assertions::assert_eq;

use plait::{DirTransport, Engine, Fragments, RenderArgs, RenderContext, Value};

fn fixture_root() -> String {
    format!("{}/tests/fixtures/site", env!("CARGO_MANIFEST_DIR"))
}

fn fixture_engine() -> Engine {
    let fragments = Fragments::new();
    let transport = DirTransport::new(fixture_root(), fragments.clone());
    Engine::with_fragments(transport, fragments)
}

fn data(entries: &[(&str, Value)]) -> Value {
    let map: HashMap<String, Value> = entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    Value::Dict(map)
}

#[test]
fn test_inheritance_over_directory_transport() {
    let mut engine = fixture_engine();
    let ctx = RenderContext::new(data(&[("title", Value::from("hello"))]));

    let rendered = engine
        .render_sync("page.tpl", ctx, RenderArgs::default())
        .unwrap();
    // The child's own output (the newline after its fragment definition)
    // lands first; the parent then composes around it in the same buffer
    assert_eq!(
        rendered.markup,
        "\n<main><h1>HELLO</h1></main><footer>Thanks for visiting</footer>\n"
    );
}

#[test]
fn test_inheritance_with_translated_footer() {
    let mut engine = fixture_engine();
    engine.set_translator(|text| match text {
        "Thanks for visiting" => "Merci de votre visite".to_string(),
        other => other.to_string(),
    });

    let ctx = RenderContext::new(data(&[("title", Value::from("salut"))]));
    let rendered = engine
        .render_sync("page.tpl", ctx, RenderArgs::default())
        .unwrap();
    assert!(rendered.markup.contains("<h1>SALUT</h1>"));
    assert!(rendered.markup.contains("Merci de votre visite"));
}

#[test]
fn test_import_registers_fragments_for_the_importer() {
    let mut engine = fixture_engine();
    let rendered = engine
        .render_sync("toolbar.tpl", RenderContext::default(), RenderArgs::default())
        .unwrap();
    assert_eq!(
        rendered.markup,
        "<button>Save</button> <button>Cancel</button>\n"
    );
}

#[test]
fn test_missing_template_surfaces_a_load_error() {
    let mut engine = fixture_engine();
    let err = engine
        .render_sync("nope.tpl", RenderContext::default(), RenderArgs::default())
        .unwrap_err();
    assert!(format!("{err}").contains("nope.tpl"));
}

#[test]
fn test_cli_renders_a_fixture() {
    let root = fixture_root();
    let output = Command::new(env!("CARGO_BIN_EXE_plait"))
        .args([
            "render",
            &format!("{root}/page.tpl"),
            "--root",
            &root,
            "--var",
            "title=hello",
        ])
        .output()
        .expect("binary runs");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("<h1>HELLO</h1>"));
}

#[test]
fn test_cli_check_reports_compile_errors() {
    let output = Command::new(env!("CARGO_BIN_EXE_plait"))
        .args(["check", &format!("{}/broken.tpl", fixture_root())])
        .output()
        .expect("binary runs");
    // The file doesn't exist: the command must fail, not render
    assert!(!output.status.success());
}
