//! The Kiln compiler CLI.
//!
//! Provides the `kilnc` command with the following subcommands:
//!
//! - `kilnc build <tree.json>` - Compile a JSON foreign parse tree with the
//!   bytecode or text backend
//! - `kilnc run <tree.json>` - Compile with the bytecode backend and run a
//!   static method in the reference interpreter
//!
//! Options:
//! - `--backend` - `bytecode` (class listing) or `text` (C-like source)
//! - `--output` - Write the result to a file instead of stdout
//! - `--source` - Source text the tree was parsed from, for diagnostics
//! - `--class-name` - Name of the script class (default: input file stem)
//! - `--no-strict` - Leave unresolved nodes to code generation
//! - `--verbose` - Debug logging (`RUST_LOG` overrides the default filter)

mod pipeline;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kiln_codegen::bytecode::{Interpreter, Value};
use kiln_codegen::compile::MAIN_METHOD;
use kiln_typeck::InferOptions;

use pipeline::{BackendKind, CompileOptions, PipelineError};

#[derive(Parser)]
#[command(name = "kilnc", version, about = "The Kiln compiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InputArgs {
    /// Path to the JSON foreign parse tree
    tree: PathBuf,

    /// Source file the tree was parsed from (enables rendered diagnostics)
    #[arg(long)]
    source: Option<PathBuf>,

    /// Name of the script class (defaults to the input file stem)
    #[arg(long = "class-name")]
    class_name: Option<String>,

    /// Do not fail inference on unresolved nodes
    #[arg(long = "no-strict")]
    no_strict: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a foreign parse tree
    Build {
        #[command(flatten)]
        input: InputArgs,

        /// Backend to generate code with
        #[arg(long, value_enum, default_value = "bytecode")]
        backend: BackendKind,

        /// Output path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compile with the bytecode backend and run a static method
    Run {
        #[command(flatten)]
        input: InputArgs,

        /// Class holding the method (defaults to the script class)
        #[arg(long)]
        class: Option<String>,

        /// Static method to invoke
        #[arg(long, default_value = MAIN_METHOD)]
        method: String,

        /// Integer arguments, in order
        #[arg(long = "arg", allow_negative_numbers = true)]
        args: Vec<i32>,
    },
}

fn main() {
    let cli = Cli::parse();

    let (input, result) = match cli.command {
        Commands::Build {
            input,
            backend,
            output,
        } => {
            init_logging(input.verbose);
            let result = build(&input, backend, output.as_deref());
            (input, result)
        }
        Commands::Run {
            input,
            class,
            method,
            args,
        } => {
            init_logging(input.verbose);
            let result = run(&input, class.as_deref(), &method, &args);
            (input, result)
        }
    };

    if let Err(e) = result {
        let file = input.source.as_ref().unwrap_or(&input.tree).display().to_string();
        let source = input
            .source
            .as_deref()
            .and_then(|path| pipeline::read_file(path).ok());
        eprint!("{}", e.report(&file, source.as_deref()));
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn compile_options(input: &InputArgs) -> Result<CompileOptions, PipelineError> {
    let source = match &input.source {
        Some(path) => Some(pipeline::read_file(path)?),
        None => None,
    };
    Ok(CompileOptions {
        class_name: input.class_name.clone(),
        source,
        infer: InferOptions {
            strict: !input.no_strict,
        },
    })
}

/// The file the script class is named after: the source if given,
/// otherwise the tree itself.
fn naming_file(input: &InputArgs) -> String {
    input
        .source
        .as_ref()
        .unwrap_or(&input.tree)
        .display()
        .to_string()
}

/// Execute the build pipeline: read tree -> transform -> infer -> codegen -> write.
fn build(input: &InputArgs, backend: BackendKind, output: Option<&Path>) -> Result<(), PipelineError> {
    let options = compile_options(input)?;
    let tree = pipeline::load_tree(&pipeline::read_file(&input.tree)?)?;
    let bytes = pipeline::build(&tree, &naming_file(input), backend, &options)?;

    let written = match output {
        Some(path) => std::fs::write(path, &bytes).map_err(|e| (path.display().to_string(), e)),
        None => std::io::stdout()
            .write_all(&bytes)
            .map_err(|e| ("<stdout>".to_string(), e)),
    };
    written.map_err(|(path, e)| PipelineError::Io {
        path,
        message: e.to_string(),
    })?;
    if let Some(path) = output {
        eprintln!("  Compiled: {}", path.display());
    }
    Ok(())
}

/// Compile with the bytecode backend and invoke `class.method` in the
/// reference interpreter, printing its output and result.
fn run(input: &InputArgs, class: Option<&str>, method: &str, args: &[i32]) -> Result<(), PipelineError> {
    let options = compile_options(input)?;
    let tree = pipeline::load_tree(&pipeline::read_file(&input.tree)?)?;
    let ast = pipeline::typed_ast(&tree, &naming_file(input), &options)?;
    let classes = pipeline::compile_bytecode(&ast)?.into_classes();

    let script = ast.class_name(ast.root()).unwrap_or_default().to_string();
    let class = class.unwrap_or(&script);
    let values: Vec<Value> = if method == MAIN_METHOD && args.is_empty() {
        vec![Value::Null]
    } else {
        args.iter().map(|&a| Value::Int(a)).collect()
    };

    let mut interp = Interpreter::new(&classes);
    let result = interp.invoke_static(class, method, values);
    print!("{}", interp.output());
    let result = result.map_err(|e| PipelineError::Run(e.to_string()))?;

    let return_type = classes
        .iter()
        .find(|c| c.name == class)
        .and_then(|c| c.method(method))
        .map(|m| m.return_type.clone());
    if let (Some(value), Some(ty)) = (result, return_type) {
        println!("{}", value.render(&ty));
    }
    Ok(())
}
