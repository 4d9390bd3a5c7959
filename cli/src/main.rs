mod test_runner;

use std::path::Path;
use std::process;

use clap::{Parser, Subcommand};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use blocks::{BlockGraph, Program};
use interpreter::{RuntimeConfig, SystemClock};

const SUBCOMMANDS: &[&str] = &["run", "test", "help"];

#[derive(Parser)]
#[command(name = "blockrun", version, about = "Block program runner")]
struct Cli {
    /// Disable colored error output
    #[arg(long, global = true)]
    no_color: bool,

    /// Log engine activity at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a program, press the green flag, and run until idle
    Run(RunArgs),

    /// Run .test.toml test files
    Test(TestArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// TOML program file
    file: String,

    /// Runtime configuration file (TOML)
    #[arg(long)]
    config: Option<String>,

    /// Give up after this many ticks
    #[arg(long, default_value_t = 600)]
    max_ticks: u64,

    /// Load only, don't run (exit 0 if valid)
    #[arg(long)]
    check: bool,

    /// Print the loaded block graph
    #[arg(long)]
    graph: bool,

    /// List the stack roots in the program
    #[arg(long)]
    list_stacks: bool,

    /// Suppress program output (just check for errors)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .test.toml file or directory containing them
    path: String,

    /// Run only tests in these categories (subfolder names). Repeatable.
    #[arg(short, long)]
    category: Vec<String>,

    /// List available categories and exit
    #[arg(long)]
    list_categories: bool,
}

fn main() {
    // `blockrun file.toml` works like `blockrun run file.toml`.
    let mut args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args
        .iter()
        .skip(1)
        .position(|a| !a.starts_with('-'))
        .map(|p| p + 1)
    {
        if !SUBCOMMANDS.contains(&args[pos].as_str()) {
            args.insert(pos, "run".to_string());
        }
    }

    let cli = Cli::parse_from(&args);
    init_logging(cli.verbose);

    match cli.command {
        Command::Run(run_args) => do_run(run_args, cli.no_color),
        Command::Test(test_args) => {
            let path = Path::new(&test_args.path);
            if test_args.list_categories {
                test_runner::list_categories(path);
                return;
            }
            let exit_code = test_runner::run_tests(path, cli.no_color, &test_args.category);
            process::exit(exit_code);
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn do_run(args: RunArgs, no_color: bool) {
    let color_choice = if no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };

    let config = match &args.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        },
        None => RuntimeConfig::default(),
    };

    let source = match std::fs::read_to_string(&args.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", args.file, e);
            process::exit(1);
        }
    };

    let mut files = SimpleFiles::new();
    let file_id = files.add(args.file.clone(), source.clone());

    let program = match blocks::parser::Parser::new(source, file_id).parse() {
        Ok(p) => p,
        Err(errors) => {
            let writer = StandardStream::stderr(color_choice);
            let config = term::Config::default();
            for error in &errors {
                let diagnostic = error.to_diagnostic();
                let _ =
                    term::emit_to_write_style(&mut writer.lock(), &config, &files, &diagnostic);
            }
            process::exit(1);
        }
    };

    debug!(
        file = %args.file,
        blocks = program.blocks.len(),
        mutations = program.mutations.len(),
        "program loaded"
    );

    if args.check || args.graph || args.list_stacks {
        let graph = match build_graph(&program) {
            Ok(graph) => graph,
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        };
        if args.list_stacks {
            for root in graph.stacks() {
                println!("{} {}", root, graph.opcode(root).unwrap_or("(no opcode)"));
            }
        } else if args.graph {
            for root in graph.stacks() {
                print_chain(&graph, root, 0);
            }
        } else {
            eprintln!("ok: {} loaded successfully", args.file);
        }
        return;
    }

    let result = if args.quiet {
        interpreter::run_program(&program, std::io::sink(), SystemClock::shared(), config, args.max_ticks)
    } else {
        interpreter::run_program(&program, std::io::stdout(), SystemClock::shared(), config, args.max_ticks)
    };

    match result {
        Ok(summary) if !summary.idle => {
            eprintln!(
                "warning: still running after {} ticks, stopped",
                summary.ticks
            );
        }
        Ok(_) => {}
        Err(error) => {
            eprintln!("runtime error: {}", error);
            process::exit(1);
        }
    }
}

fn load_config(path: &str) -> Result<RuntimeConfig, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("cannot read '{}': {}", path, e))?;
    toml::from_str(&text).map_err(|e| format!("invalid config '{}': {}", path, e))
}

/// Apply a program's mutations to a fresh graph without running anything.
fn build_graph(program: &Program) -> Result<BlockGraph, blocks::GraphError> {
    let mut graph = BlockGraph::new();
    for mutation in program.to_mutations() {
        graph.apply(mutation)?;
    }
    Ok(graph)
}

fn print_chain(graph: &BlockGraph, first: &str, indent: usize) {
    let pad = "  ".repeat(indent);
    let mut current = Some(first.to_string());
    while let Some(id) = current {
        let Some(block) = graph.get(&id) else {
            break;
        };
        let values: Vec<String> = graph
            .field_values(&id)
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        println!(
            "{}{} {} {}",
            pad,
            id,
            block.opcode().unwrap_or("(no opcode)"),
            values.join(" ")
        );
        for (name, field) in &block.fields {
            if let Some(child) = &field.block {
                println!("{}  [{}]", pad, name);
                print_chain(graph, child, indent + 2);
            }
        }
        current = graph.next(&id).cloned();
    }
}
