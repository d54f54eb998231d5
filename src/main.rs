/*!
Main binary for jsonrefs.
*/

use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use log::info;
use std::io::{self, ErrorKind, IsTerminal, Read, Write};
use std::{
    fs::{self, File},
    path::PathBuf,
};

use jsonrefs::{Settings, Type, TypeRegistry, render, tokenizer::Tokenizer};

/// Inspect JSON documents that use `$id`/`$ref`/`$type` metadata.
#[derive(Parser)]
#[command(
    name = "jr",
    version,
    about,
    arg_required_else_help = true,
    long_about = None,
    disable_help_subcommand = true
)]
struct Args {
    /// What to do with the document
    #[command(subcommand)]
    command: Commands,
    /// Optional path to a JSON settings file (metadata key spellings,
    /// limits)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Size in bytes of the ring buffer the input is streamed through
    #[arg(long, global = true, value_name = "BYTES")]
    buffer_size: Option<usize>,
    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,
}

/// Available subcommands for `jr`
#[derive(Subcommand)]
enum Commands {
    /// Print the token stream of a document, one token per line with its
    /// line and column
    Tokens {
        #[arg(value_name = "FILE")]
        /// Optional path to JSON file. If omitted, reads from STDIN
        input: Option<PathBuf>,
    },
    /// Deserialize a document and print the reconstructed object graph
    Graph {
        #[arg(value_name = "FILE")]
        /// Optional path to JSON file. If omitted, reads from STDIN
        input: Option<PathBuf>,
        /// Do not pretty-print the graph, instead use compact
        #[arg(long, action = ArgAction::SetTrue)]
        compact: bool,
        /// Display depth of the graph
        #[arg(long, action = ArgAction::SetTrue)]
        depth: bool,
    },
}

/// Entry point for main binary.
///
/// Reads the document from the given file or, if piped in, from STDIN, and
/// streams it through a ring buffer. Output goes to STDOUT.
fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    let settings = load_settings(&args)?;

    match args.command {
        Commands::Tokens { input } => {
            let Some(reader) = open_input(input)? else {
                return Ok(Args::command().print_help()?);
            };
            print_tokens(reader, &settings)
        }
        Commands::Graph {
            input,
            compact,
            depth,
        } => {
            let Some(reader) = open_input(input)? else {
                return Ok(Args::command().print_help()?);
            };
            let registry = TypeRegistry::new();
            let graph = jsonrefs::from_reader(
                reader,
                &Type::Any,
                &registry,
                &settings,
            )
            .with_context(|| "Failed to deserialize document")?;

            if depth {
                println!("Depth: {}", render::depth(&graph));
            }
            render::write_graph(&mut io::stdout().lock(), &graph, !compact)
        }
    }
}

/// Reads the settings file, if any, and applies command line overrides.
fn load_settings(args: &Args) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| {
                format!("Failed to read settings file {path:?}")
            })?;
            Settings::from_json(&text).with_context(|| {
                format!("Failed to load settings from {path:?}")
            })?
        }
        None => Settings::default(),
    };
    if let Some(buffer_size) = args.buffer_size {
        settings.buffer_size = buffer_size;
    }
    settings.validate()?;
    info!("using a {}-byte read buffer", settings.buffer_size);
    Ok(settings)
}

/// Opens the input file, or STDIN when it is piped. `None` means there is no
/// input to read.
fn open_input(path: Option<PathBuf>) -> Result<Option<Box<dyn Read>>> {
    if let Some(path) = path {
        let file = File::open(&path)
            .with_context(|| format!("Failed to read file {path:?}"))?;
        return Ok(Some(Box::new(file)));
    }
    if io::stdin().is_terminal() {
        // No piped input and no file specified
        return Ok(None);
    }
    Ok(Some(Box::new(io::stdin().lock())))
}

/// Writes `line:column<TAB>kind<TAB>text` for every token.
fn print_tokens(reader: Box<dyn Read>, settings: &Settings) -> Result<()> {
    let mut tokenizer = Tokenizer::from_reader(reader, settings.buffer_size)?;
    let mut out = io::stdout().lock();
    loop {
        let kind = tokenizer
            .read_next_token()
            .with_context(|| "Failed to tokenize document")?;
        let token = tokenizer.token();
        let position = token.position();
        let written = writeln!(
            out,
            "{}:{}\t{}\t{}",
            position.line,
            position.column,
            kind,
            token.text()
        );
        match written {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::BrokenPipe => return Ok(()),
            Err(err) => return Err(err).context("write tokens to stdout"),
        }
        if kind == jsonrefs::tokenizer::TokenKind::EndOfDocument {
            return Ok(());
        }
    }
}
