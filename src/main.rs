use std::collections::HashMap;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use plait::{DirTransport, Engine, Fragments, RenderArgs, RenderContext, Value};

#[derive(Parser)]
#[command(name = "plait", about = "Template compiler and renderer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a template and report diagnostics without rendering
    Check {
        /// Template file
        file: Utf8PathBuf,
    },
    /// Render a template to stdout
    Render {
        /// Template file
        file: Utf8PathBuf,

        /// Template root for imports and inheritance (defaults to the
        /// file's parent directory)
        #[arg(short, long)]
        root: Option<Utf8PathBuf>,

        /// Context values the template sees under `ctx`
        #[arg(short, long, value_name = "KEY=VALUE")]
        var: Vec<String>,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Check { file } => check(file),
        Command::Render { file, root, var } => render(file, root, var),
    }
}

fn check(file: Utf8PathBuf) -> Result<()> {
    let text = std::fs::read_to_string(&file)?;
    let compiler = plait::Compiler::new(Fragments::new());
    match compiler.compile(file.as_str(), text) {
        Ok(program) => {
            println!("{} {} ({} ops)", "✓".green(), file, program.ops.len());
            Ok(())
        }
        Err(err) => {
            // miette's debug rendering is the fancy diagnostic report
            eprintln!("{err:?}");
            std::process::exit(1);
        }
    }
}

fn render(file: Utf8PathBuf, root: Option<Utf8PathBuf>, vars: Vec<String>) -> Result<()> {
    let root = match root {
        Some(root) => root,
        None => file
            .parent()
            .map(|p| p.to_owned())
            .ok_or_else(|| eyre!("{file} has no parent directory"))?,
    };
    let name = file
        .strip_prefix(&root)
        .map_err(|_| eyre!("{file} is not under the template root {root}"))?;

    let fragments = Fragments::new();
    let transport = DirTransport::new(&root, fragments.clone());
    let mut engine = Engine::with_fragments(transport, fragments);

    let mut data = HashMap::new();
    for pair in vars {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(eyre!("expected KEY=VALUE, got {pair:?}"));
        };
        data.insert(key.to_string(), parse_value(value));
    }

    let ctx = RenderContext::new(Value::Dict(data));
    match engine.render_sync(name.as_str(), ctx, RenderArgs::default()) {
        Ok(rendered) => {
            println!("{}", rendered.markup);
            Ok(())
        }
        Err(err) => {
            eprintln!("{err:?}");
            std::process::exit(1);
        }
    }
}

/// Interpret a command-line value: int, bool, or string
fn parse_value(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Int(n);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}
