use clap::{Args, Parser, Subcommand};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::prelude::*;
use wikimark_core::config::Config;
use wikimark_core::engine::{CmarkRenderer, DomRenderer};

#[derive(Parser)]
#[command(name = "wikimark", about = "Convert between Markdown with bracket macros and wiki storage XML")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Markdown with bracket macros → storage XML.
    ToStorage {
        #[command(flatten)]
        files: IoArgs,

        /// Path to a TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Storage XML → Markdown with bracket macros.
    ToMarkdown {
        #[command(flatten)]
        files: IoArgs,

        /// Path to a TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Drop macros instead of rendering them as bracket syntax.
        #[arg(long)]
        hide_macros: bool,
    },
    /// Markdown → document tree JSON.
    ToTree {
        #[command(flatten)]
        files: IoArgs,

        /// Single-line JSON instead of pretty-printed.
        #[arg(long)]
        compact: bool,
    },
}

#[derive(Args)]
struct IoArgs {
    /// Input file. Omit to read from stdin.
    #[arg()]
    input: Option<PathBuf>,

    /// Output file. Omit to write to stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() {
    // Logs go to stderr; stdout carries the converted document.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    let (files, result) = match cli.command {
        Command::ToStorage { files, config } => {
            let config = load_config(config.as_deref());
            let input = read_input(files.input.as_deref());
            let result = wikimark_core::markdown_to_storage_with(&input, &config, &CmarkRenderer)
                .map(|conversion| conversion.output);
            (files, result)
        }
        Command::ToMarkdown {
            files,
            config,
            hide_macros,
        } => {
            let mut config = load_config(config.as_deref());
            if hide_macros {
                config.options.show_macros = false;
            }
            let input = read_input(files.input.as_deref());
            let result = wikimark_core::storage_to_markdown_with(&input, &config, &DomRenderer)
                .map(|conversion| conversion.output);
            (files, result)
        }
        Command::ToTree { files, compact } => {
            let input = read_input(files.input.as_deref());
            let result = wikimark_core::markdown_to_tree(&input).and_then(|tree| {
                if compact {
                    tree.to_json()
                } else {
                    tree.to_json_pretty().map(|json| json + "\n")
                }
            });
            (files, result)
        }
    };

    let source = files
        .input
        .as_deref()
        .map_or_else(|| "<stdin>".to_string(), |p| p.display().to_string());
    let output = result.unwrap_or_else(|e| {
        eprintln!("Error converting {source}: {e}");
        std::process::exit(1);
    });
    tracing::debug!(%source, bytes = output.len(), "conversion finished");
    write_output(&output, files.output.as_deref());
}

fn load_config(path: Option<&Path>) -> Config {
    let Some(path) = path else {
        return Config::default();
    };
    let toml_str = read_file(path);
    Config::from_toml(&toml_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config {}: {e}", path.display());
        std::process::exit(1);
    })
}

fn read_input(path: Option<&Path>) -> String {
    if let Some(path) = path {
        return read_file(path);
    }
    let mut input = String::new();
    io::stdin().read_to_string(&mut input).unwrap_or_else(|e| {
        eprintln!("Error reading stdin: {e}");
        std::process::exit(1);
    });
    input
}

fn read_file(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading {}: {e}", path.display());
        std::process::exit(1);
    })
}

fn write_output(content: &str, output: Option<&Path>) {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            std::fs::write(path, content).unwrap_or_else(|e| {
                eprintln!("Error writing {}: {e}", path.display());
                std::process::exit(1);
            });
        }
        None => {
            io::stdout().write_all(content.as_bytes()).unwrap_or_else(|e| {
                eprintln!("Error writing stdout: {e}");
                std::process::exit(1);
            });
        }
    }
}
