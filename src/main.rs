//! Vellum CLI
//!
//! Usage:
//!   vellum [OPTIONS] [FILE]
//!   vellum --path templates --template pages/home.html
//!
//! Options:
//!   -t, --template <NAME>  Render a named template from the search paths
//!   -p, --path <DIR>       Add a search path, optionally as NAMESPACE=DIR
//!   -c, --context <FILE>   Context variables (JSON, or TOML with a .toml extension)
//!       --config <FILE>    Engine configuration (TOML)
//!   -d, --debug            Surface runtime errors and keep whitespace
//!       --dump             Print the compiled program instead of rendering
//!   -h, --help             Print help

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use vellum::{Context, Engine, EngineConfig, TemplateError};

#[derive(Parser)]
#[command(name = "vellum")]
#[command(about = "Render templates with inheritance, includes and auto-escaping")]
struct Cli {
    /// Template file (reads from stdin if neither this nor --template is given)
    input: Option<PathBuf>,

    /// Render a named template from the search paths
    #[arg(short, long, conflicts_with = "input")]
    template: Option<String>,

    /// Template search path; use NAMESPACE=DIR to bind it to `@NAMESPACE/...`
    #[arg(short, long = "path", value_name = "DIR")]
    paths: Vec<String>,

    /// Context variables (JSON, or TOML when the file ends in .toml)
    #[arg(short, long)]
    context: Option<PathBuf>,

    /// Engine configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Debug mode: runtime errors abort the render
    #[arg(short, long)]
    debug: bool,

    /// Print the compiled program instead of rendering
    #[arg(long)]
    dump: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => match EngineConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config '{}': {}", path.display(), e);
                process::exit(1);
            }
        },
        None => EngineConfig::default(),
    };
    if cli.debug {
        config.debug = true;
    }

    let mut engine = Engine::new(config);
    for path in &cli.paths {
        match path.split_once('=') {
            Some((namespace, dir)) if !namespace.is_empty() => engine.add_path(dir, Some(namespace)),
            _ => engine.add_path(path, None),
        }
    }

    let context = match &cli.context {
        Some(path) => match load_context(path) {
            Ok(context) => context,
            Err(message) => {
                eprintln!("Error loading context '{}': {}", path.display(), message);
                process::exit(1);
            }
        },
        None => Context::new(),
    };

    let name = match (&cli.template, &cli.input) {
        (Some(name), _) => name.clone(),
        (None, Some(path)) => match fs::read_to_string(path) {
            Ok(source) => {
                let name = path.display().to_string();
                engine.set_string_template(name.clone(), source);
                name
            }
            Err(e) => {
                eprintln!("Error reading file '{}': {}", path.display(), e);
                process::exit(1);
            }
        },
        (None, None) => {
            let mut source = String::new();
            if let Err(e) = io::stdin().read_to_string(&mut source) {
                eprintln!("Error reading from stdin: {}", e);
                process::exit(1);
            }
            engine.set_string_template("(stdin)", source);
            "(stdin)".to_string()
        }
    };

    let result = if cli.dump {
        engine.compile(&name).map(|artifact| artifact.to_string())
    } else {
        engine.render(&name, &context)
    };

    match result {
        Ok(output) => print!("{}", output),
        Err(e) => {
            report(&e);
            process::exit(1);
        }
    }
}

fn load_context(path: &Path) -> Result<Context, String> {
    let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    if is_toml {
        let value: toml::Value = toml::from_str(&text).map_err(|e| e.to_string())?;
        Context::from_serialize(&value).map_err(|e| e.to_string())
    } else {
        let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| e.to_string())?;
        Context::from_serialize(&value).map_err(|e| e.to_string())
    }
}

fn report(error: &TemplateError) {
    eprintln!("{}", error.format_report());
}
