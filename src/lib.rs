//! Lume: a small statically typed scripting language with a bytecode VM.
//!
//! A source program runs through four stages: lexical analysis, parsing,
//! type-directed compilation to bytecode, and stack-based execution.
//! Compiled chunks can also be serialized and re-loaded.

pub mod ast;
pub mod bytecode;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod repl;
pub mod span;
pub mod types;

use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use bytecode::vm::{CALL_STACK_SIZE, STACK_SIZE};
use bytecode::{Chunk, Compiler, ImportsResolver, VM};
use error::{CompileError, LumeError};

/// The result of compiling a source file: the chunk plus any non-fatal
/// warnings. The caller decides whether warnings fail the build.
pub struct CompiledProgram {
    pub chunk: Chunk,
    pub warnings: Vec<CompileError>,
}

/// Compile a source string. `path` names the program for diagnostics and
/// import-cycle detection; imports are resolved through `resolver`.
pub fn compile_source(
    source: &str,
    path: &str,
    resolver: Option<Box<dyn ImportsResolver>>,
) -> Result<CompiledProgram, LumeError> {
    let tokens = lexer::Scanner::new(source).scan_tokens()?;
    let program = parser::Parser::new(tokens).parse(path)?;

    let mut compiler = Compiler::new(source);
    if let Some(resolver) = resolver {
        compiler.set_resolver(resolver);
    }
    compiler.compile(&program)?;

    let warnings = std::mem::take(&mut compiler.warnings);
    Ok(CompiledProgram {
        chunk: compiler.into_chunk(),
        warnings,
    })
}

/// Execute a compiled chunk on a fresh VM.
pub fn run_chunk(chunk: Chunk) -> Result<(), LumeError> {
    let mut vm = VM::new(Rc::new(chunk), STACK_SIZE, CALL_STACK_SIZE);
    vm.run()?;
    Ok(())
}

/// Compile and run a source string without import support.
pub fn run(source: &str) -> Result<(), LumeError> {
    let program = compile_source(source, "<memory>", None)?;
    run_chunk(program.chunk)
}

/// Resolves imports relative to a working directory. Identity is the
/// normalized joined path; nothing is read from disk to compare.
pub struct WorkingDirectoryResolver {
    working_directory: PathBuf,
}

impl WorkingDirectoryResolver {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        normalize(&self.working_directory.join(path))
    }
}

impl ImportsResolver for WorkingDirectoryResolver {
    fn resolve(&self, path: &str) -> std::io::Result<String> {
        std::fs::read_to_string(self.full_path(path))
    }

    fn is_same(&self, a: &str, b: &str) -> bool {
        self.full_path(a) == self.full_path(b)
    }
}

/// Lexically normalize a path: resolve `.` and `..` components without
/// touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_executes_source() {
        run("assertEq(1 + 1, 2)").unwrap();
    }

    #[test]
    fn test_run_surfaces_compile_errors() {
        assert!(matches!(
            run("a := missing"),
            Err(LumeError::Compile(_))
        ));
    }

    #[test]
    fn test_run_surfaces_runtime_errors() {
        assert!(matches!(run("assertEq(1, 2)"), Err(LumeError::Runtime(_))));
    }

    #[test]
    fn test_compile_source_reports_warnings() {
        let program = compile_source(
            "func f() number { return 1 }\nf()",
            "warn.lume",
            None,
        )
        .unwrap();
        assert_eq!(program.warnings.len(), 1);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize(Path::new("a/./b/../c")),
            PathBuf::from("a/c")
        );
        assert_eq!(normalize(Path::new("../x")), PathBuf::from("../x"));
    }

    #[test]
    fn test_working_directory_resolver_identity() {
        let resolver = WorkingDirectoryResolver::new("dir");
        assert!(resolver.is_same("a.lume", "./a.lume"));
        assert!(resolver.is_same("sub/../a.lume", "a.lume"));
        assert!(!resolver.is_same("a.lume", "b.lume"));
    }
}
