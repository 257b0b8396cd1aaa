//! The compilation pipeline: foreign tree -> AST -> typed AST -> backend
//! output, and the reporting of whatever stage fails.

use std::fmt;
use std::ops::Range;
use std::path::Path;

use ariadne::{Color, Config, Label, Report, ReportKind, Source};
use tracing::{debug, info_span};

use kiln_ast::{Ast, ForeignNode, TransformError, Transformer};
use kiln_codegen::bytecode::ListingAssembler;
use kiln_codegen::{compile, BytecodeBackend, CompileError, TextBackend};
use kiln_common::{LineIndex, Position};
use kiln_typeck::diagnostics::{position_range, render_diagnostic};
use kiln_typeck::{infer_all, HostTypes, InferOptions, InferenceError};

/// Which [`kiln_codegen::Backend`] to drive.
#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    /// Stack-machine classes, serialized as a listing.
    Bytecode,
    /// C-like source.
    Text,
}

/// Options shared by every command that compiles.
#[derive(Clone, Debug, Default)]
pub struct CompileOptions {
    /// Overrides the script class name derived from the input file.
    pub class_name: Option<String>,
    /// Source text, used for line numbers and rendered diagnostics.
    pub source: Option<String>,
    pub infer: InferOptions,
}

/// A failure in any pipeline stage.
#[derive(Debug)]
pub enum PipelineError {
    Io { path: String, message: String },
    Json(serde_json::Error),
    Transform(TransformError),
    Inference(InferenceError),
    Compile(CompileError),
    /// The interpreter stopped with a runtime error.
    Run(String),
}

impl PipelineError {
    /// Source position of the failure, when the stage records one.
    pub fn position(&self) -> Option<Position> {
        match self {
            PipelineError::Io { .. } | PipelineError::Json(_) | PipelineError::Run(_) => None,
            PipelineError::Transform(err) => Some(err.position()),
            PipelineError::Inference(err) => Some(err.position()),
            PipelineError::Compile(err) => Some(err.position),
        }
    }

    /// Format for the terminal: `file:line: message`, or an ariadne
    /// report when the source text is available.
    pub fn report(&self, file: &str, source: Option<&str>) -> String {
        match (self, source) {
            (PipelineError::Inference(err), Some(source)) => render_diagnostic(err, source, file),
            (PipelineError::Transform(err), Some(source)) => {
                render_positioned("E0001", &err.to_string(), err.position(), source)
            }
            (PipelineError::Compile(err), Some(source)) => {
                render_positioned("E0201", &err.to_string(), err.position, source)
            }
            _ => match self.position() {
                Some(position) => format!("{}:{}: {}\n", file, position.line, self),
                None => format!("error: {}\n", self),
            },
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Io { path, message } => write!(f, "cannot read `{}`: {}", path, message),
            PipelineError::Json(err) => write!(f, "malformed parse tree: {}", err),
            PipelineError::Transform(err) => write!(f, "{}", err),
            PipelineError::Inference(err) => write!(f, "{}", err),
            PipelineError::Compile(err) => write!(f, "{}", err),
            PipelineError::Run(message) => write!(f, "runtime error: {}", message),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<TransformError> for PipelineError {
    fn from(err: TransformError) -> Self {
        PipelineError::Transform(err)
    }
}

impl From<InferenceError> for PipelineError {
    fn from(err: InferenceError) -> Self {
        PipelineError::Inference(err)
    }
}

impl From<CompileError> for PipelineError {
    fn from(err: CompileError) -> Self {
        PipelineError::Compile(err)
    }
}

fn render_positioned(code: &str, message: &str, position: Position, source: &str) -> String {
    let index = LineIndex::new(source);
    let span: Range<usize> = position_range(position, &index, source.len());
    let report = Report::build(ReportKind::Error, span.clone())
        .with_code(code)
        .with_message(message)
        .with_config(Config::default().with_color(false))
        .with_label(Label::new(span).with_message(message).with_color(Color::Red))
        .finish();
    let mut buf = Vec::new();
    if report.write(Source::from(source), &mut buf).is_err() {
        return format!("{}\n", message);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

// ── Stages ─────────────────────────────────────────────────────────────

pub fn read_file(path: &Path) -> Result<String, PipelineError> {
    std::fs::read_to_string(path).map_err(|e| PipelineError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Parse a JSON foreign tree.
pub fn load_tree(json: &str) -> Result<ForeignNode, PipelineError> {
    serde_json::from_str(json).map_err(PipelineError::Json)
}

/// Transform and infer. `file` names the script class unless
/// `options.class_name` overrides it.
pub fn typed_ast(tree: &ForeignNode, file: &str, options: &CompileOptions) -> Result<Ast, PipelineError> {
    let index = options.source.as_deref().map(LineIndex::new);
    let mut transformer = Transformer::new(file);
    if let Some(name) = &options.class_name {
        transformer = transformer.class_name(name.clone());
    }
    if let Some(index) = &index {
        transformer = transformer.line_index(index);
    }
    let mut ast = {
        let _span = info_span!("transform", file).entered();
        transformer.run(tree)?
    };

    let host = HostTypes::standard();
    let stats = {
        let _span = info_span!("infer", strict = options.infer.strict).entered();
        infer_all(&mut ast, &host, &options.infer)?
    };
    debug!(
        initial_deferred = stats.initial_deferred,
        sweeps = stats.sweeps,
        remaining = stats.remaining,
        "inference finished"
    );
    Ok(ast)
}

pub fn compile_bytecode(ast: &Ast) -> Result<ListingAssembler, PipelineError> {
    let _span = info_span!("codegen", backend = "bytecode").entered();
    Ok(compile(ast, BytecodeBackend::new())?)
}

pub fn compile_text(ast: &Ast) -> Result<String, PipelineError> {
    let _span = info_span!("codegen", backend = "text").entered();
    Ok(compile(ast, TextBackend::new())?)
}

/// Run every stage and return the chosen backend's serialized output.
pub fn build(
    tree: &ForeignNode,
    file: &str,
    backend: BackendKind,
    options: &CompileOptions,
) -> Result<Vec<u8>, PipelineError> {
    let ast = typed_ast(tree, file, options)?;
    match backend {
        BackendKind::Bytecode => {
            use kiln_codegen::bytecode::Assembler;
            Ok(compile_bytecode(&ast)?.generate())
        }
        BackendKind::Text => Ok(compile_text(&ast)?.into_bytes()),
    }
}
