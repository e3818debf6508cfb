//! Lume CLI: run or compile files, or start the REPL.

use std::path::Path;
use std::process;
use std::rc::Rc;

use lumelang::bytecode::vm::{CALL_STACK_SIZE, STACK_SIZE};
use lumelang::bytecode::{decode_chunk, disassemble_chunk, encode_chunk, Chunk, Compiler, VM};
use lumelang::lexer::Scanner;
use lumelang::parser::Parser;
use lumelang::repl::Repl;
use lumelang::WorkingDirectoryResolver;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CLI command to execute.
enum Command {
    /// Run a script or bytecode file
    Run {
        file: String,
        bytecode: bool,
        ignore_warnings: bool,
    },
    /// Compile a script to a bytecode file
    Compile {
        file: String,
        output: String,
        ignore_warnings: bool,
    },
    /// Start the REPL
    Repl,
}

/// CLI options parsed from arguments.
struct Options {
    command: Command,
    debug: bool,
}

fn print_usage() {
    eprintln!("Lume {} - the Lume language", VERSION);
    eprintln!();
    eprintln!("Usage: lume [options] <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  run <file>               Run a program");
    eprintln!("  compile <file> <output>  Compile a program to bytecode");
    eprintln!("  repl                     Start an interactive session");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --bytecode, -c      Treat the run file as compiled bytecode");
    eprintln!("  --ignore-warnings   Do not fail on compiler warnings");
    eprintln!("  --debug, -D         Trace pipeline stages and dump bytecode");
    eprintln!("  --help, -h          Show this help message");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  lume run program.lume");
    eprintln!("  lume run build.lumec -c");
    eprintln!("  lume compile program.lume build.lumec");
}

fn parse_args(args: &[String]) -> Option<Options> {
    let mut debug = false;
    let mut bytecode = false;
    let mut ignore_warnings = false;
    let mut positional = Vec::new();

    for arg in args {
        match arg.as_str() {
            "--debug" | "-D" => debug = true,
            "--bytecode" | "-c" => bytecode = true,
            "--ignore-warnings" => ignore_warnings = true,
            "--help" | "-h" => return None,
            other if other.starts_with('-') => {
                eprintln!("unknown option: {}", other);
                return None;
            }
            other => positional.push(other.to_string()),
        }
    }

    let command = match positional.first().map(String::as_str) {
        Some("run") => {
            let [_, file] = positional.as_slice() else {
                eprintln!("run takes exactly one file");
                return None;
            };
            Command::Run {
                file: file.clone(),
                bytecode,
                ignore_warnings,
            }
        }
        Some("compile") => {
            let [_, file, output] = positional.as_slice() else {
                eprintln!("compile takes a file and an output path");
                return None;
            };
            Command::Compile {
                file: file.clone(),
                output: output.clone(),
                ignore_warnings,
            }
        }
        Some("repl") | None => Command::Repl,
        Some(other) => {
            eprintln!("unknown command: {}", other);
            return None;
        }
    };

    Some(Options { command, debug })
}

/// Read, lex, parse and compile a source file into a chunk.
fn make_chunk(file: &str, ignore_warnings: bool, debug: bool) -> Result<Chunk, i32> {
    if debug {
        eprintln!("reading {}", file);
    }
    let source = std::fs::read_to_string(file).map_err(|err| {
        eprintln!("cannot read {}: {}", file, err);
        1
    })?;

    if debug {
        eprintln!("lexing");
    }
    let tokens = Scanner::new(&source).scan_tokens().map_err(|err| {
        eprintln!("{}", err);
        eprintln!("{}", lumelang::error::render_snippet(&source, err.span()));
        1
    })?;

    if debug {
        eprintln!("parsing {} tokens", tokens.len());
    }
    let program = Parser::new(tokens).parse(file).map_err(|err| {
        eprintln!("{}", err.render(&source));
        1
    })?;

    if debug {
        eprintln!("compiling");
    }
    let mut compiler = Compiler::new(source.as_str());
    let directory = Path::new(file).parent().unwrap_or(Path::new("."));
    compiler.set_resolver(Box::new(WorkingDirectoryResolver::new(directory)));

    compiler.compile(&program).map_err(|err| {
        eprintln!("{}", err.render());
        1
    })?;

    if !compiler.warnings.is_empty() {
        for warning in &compiler.warnings {
            eprintln!("{}", warning.render());
        }
        if !ignore_warnings {
            eprintln!(
                "compiler reported warning(s) (ignore warnings with the --ignore-warnings option)"
            );
            return Err(1);
        }
    }

    Ok(compiler.into_chunk())
}

fn run_command(file: &str, bytecode: bool, ignore_warnings: bool, debug: bool) -> i32 {
    let chunk = if bytecode {
        if debug {
            eprintln!("reading bytecode from {}", file);
        }
        let bytes = match std::fs::read(file) {
            Ok(bytes) => bytes,
            Err(err) => {
                eprintln!("cannot read {}: {}", file, err);
                return 1;
            }
        };
        match decode_chunk(&bytes) {
            Ok(chunk) => chunk,
            Err(err) => {
                eprintln!("cannot load {}: {}", file, err);
                return 1;
            }
        }
    } else {
        match make_chunk(file, ignore_warnings, debug) {
            Ok(chunk) => chunk,
            Err(code) => return code,
        }
    };

    if debug {
        eprintln!("{}", disassemble_chunk(&chunk));
        eprintln!("executing");
    }

    let mut vm = VM::new(Rc::new(chunk), STACK_SIZE, CALL_STACK_SIZE);
    match vm.run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("runtime error: {}", err);
            1
        }
    }
}

fn compile_command(file: &str, output: &str, ignore_warnings: bool, debug: bool) -> i32 {
    let chunk = match make_chunk(file, ignore_warnings, debug) {
        Ok(chunk) => chunk,
        Err(code) => return code,
    };

    if debug {
        eprintln!("serializing chunk");
    }
    let bytes = match encode_chunk(&chunk) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("cannot serialize: {}", err);
            return 1;
        }
    };

    if let Err(err) = std::fs::write(output, bytes) {
        eprintln!("cannot write {}: {}", output, err);
        return 1;
    }

    0
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let Some(options) = parse_args(&args) else {
        print_usage();
        process::exit(2);
    };

    let code = match options.command {
        Command::Run {
            file,
            bytecode,
            ignore_warnings,
        } => run_command(&file, bytecode, ignore_warnings, options.debug),
        Command::Compile {
            file,
            output,
            ignore_warnings,
        } => compile_command(&file, &output, ignore_warnings, options.debug),
        Command::Repl => {
            Repl::new().run();
            0
        }
    };

    process::exit(code);
}
