//! Interactive REPL.
//!
//! One compiler and one VM live for the whole session: every line is
//! appended to the same chunk and the VM resumes from its current
//! instruction pointer, so variables and globals persist across lines.

use std::path::PathBuf;
use std::rc::Rc;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::bytecode::vm::{CALL_STACK_SIZE, STACK_SIZE};
use crate::bytecode::{Chunk, Compiler, VM};
use crate::lexer::Scanner;
use crate::parser::Parser;
use crate::WorkingDirectoryResolver;

const HISTORY_FILE: &str = ".lume_history";

pub struct Repl {
    compiler: Compiler,
    vm: VM,
    history_file: PathBuf,
}

impl Repl {
    pub fn new() -> Self {
        let mut compiler = Compiler::new("");
        compiler.set_resolver(Box::new(WorkingDirectoryResolver::new(".")));

        Self {
            compiler,
            vm: VM::new(Rc::new(Chunk::new()), STACK_SIZE, CALL_STACK_SIZE),
            history_file: Self::history_path(),
        }
    }

    fn history_path() -> PathBuf {
        match dirs::home_dir() {
            Some(home) => home.join(HISTORY_FILE),
            None => PathBuf::from(HISTORY_FILE),
        }
    }

    pub fn run(&mut self) {
        println!("Lume REPL");
        println!("Type \"exit\" to leave.\n");

        let mut editor = match DefaultEditor::new() {
            Ok(editor) => editor,
            Err(err) => {
                eprintln!("cannot open terminal: {}", err);
                return;
            }
        };
        let _ = editor.load_history(&self.history_file);

        loop {
            match editor.readline("> ") {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if line == "exit" || line == "quit" {
                        break;
                    }

                    let _ = editor.add_history_entry(line);
                    self.execute(line);
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("readline error: {}", err);
                    break;
                }
            }
        }

        let _ = editor.save_history(&self.history_file);
    }

    /// Compile one line into the session chunk and resume the VM on it.
    fn execute(&mut self, line: &str) {
        let tokens = match Scanner::new(line).scan_tokens() {
            Ok(tokens) => tokens,
            Err(err) => {
                eprintln!("{}", err);
                return;
            }
        };

        let program = match Parser::new(tokens).parse("REPL") {
            Ok(program) => program,
            Err(err) => {
                eprintln!("{}", err.render(line));
                return;
            }
        };

        self.compiler.set_source(line);
        if let Err(err) = self.compiler.compile(&program) {
            eprintln!("{}", err.render());
            return;
        }

        for warning in self.compiler.warnings.drain(..) {
            eprintln!("warning: {}", warning.render());
        }

        self.vm.set_chunk(Rc::new(self.compiler.chunk().clone()));
        loop {
            match self.vm.next() {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    eprintln!("runtime error: {}", err);
                    break;
                }
            }
        }
    }
}

impl Default for Repl {
    fn default() -> Self {
        Self::new()
    }
}
