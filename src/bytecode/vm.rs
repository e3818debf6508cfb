//! Stack-based virtual machine for executing bytecode.

use std::collections::HashMap;
use std::rc::Rc;

use crate::bytecode::chunk::Chunk;
use crate::bytecode::globals;
use crate::bytecode::instruction::Op;
use crate::bytecode::stack::Stack;
use crate::bytecode::value::{Value, Variable};
use crate::error::RuntimeError;

/// Result type for VM execution.
pub type VmResult<T> = Result<T, RuntimeError>;

/// Default value stack capacity.
pub const STACK_SIZE: usize = 256;
/// Default call stack capacity.
pub const CALL_STACK_SIZE: usize = 256;

/// A call frame, capturing everything needed to resume the caller.
#[derive(Debug, Clone)]
struct Call {
    chunk: Rc<Chunk>,
    ip: usize,
    /// Stack top before the arguments were pushed.
    stack_end: usize,
    variable_end: usize,
    scope: usize,
}

/// The virtual machine.
///
/// The value stack is partitioned by `variable_end`: every slot below it
/// holds a `Variable`, every slot above holds an evaluation temporary. The
/// paired `Descend`/`Ascend` instructions keep this partition in sync with
/// the compiler's symbol stack.
#[derive(Debug)]
pub struct VM {
    chunk: Rc<Chunk>,

    ip: usize,
    scope: usize,

    globals: HashMap<String, Value>,
    variable_end: usize,

    stack: Stack<Value>,
    call: Stack<Call>,
}

impl VM {
    pub fn new(chunk: Rc<Chunk>, stack_size: usize, call_stack_size: usize) -> Self {
        Self {
            chunk,
            ip: 0,
            scope: 0,
            globals: globals::default_globals(),
            variable_end: 0,
            stack: Stack::new(stack_size),
            call: Stack::new(call_stack_size),
        }
    }

    /// Replace the chunk while keeping all other state. The REPL uses this
    /// to resume execution on a grown chunk.
    pub fn set_chunk(&mut self, chunk: Rc<Chunk>) {
        self.chunk = chunk;
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    pub fn get_global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Drive execution until the chunk is exhausted or the top-level
    /// returns.
    pub fn run(&mut self) -> VmResult<()> {
        while self.next()? {}
        Ok(())
    }

    /// Whether the instruction pointer is still inside the current chunk.
    pub fn has_next(&self) -> bool {
        self.ip < self.chunk.code.len()
    }

    /// Execute one instruction. Returns whether execution should continue.
    pub fn next(&mut self) -> VmResult<bool> {
        if !self.has_next() {
            return Ok(false);
        }

        let byte = self.next_byte();
        let op = Op::from_u8(byte).unwrap_or_else(|| panic!("invalid byte code {}", byte));

        match op {
            Op::Return => {
                if self.call.is_empty() {
                    return Ok(false);
                }

                let value = self.stack.pop();
                let frame = self.call.pop();

                self.variable_end = frame.variable_end;
                self.stack.truncate(frame.stack_end);
                self.scope = frame.scope;

                self.ip = frame.ip;
                self.chunk = frame.chunk;

                self.purge_vars();

                self.stack.push(value);
            }

            Op::Pop => {
                self.stack.pop();
            }

            Op::Constant => {
                let value = self.read_constant().clone();
                self.stack.push(value);
            }

            Op::Add => {
                let r = self.pop_number();
                let l = self.pop_number();
                self.stack.push(Value::Number(l + r));
            }

            Op::Sub => {
                let r = self.pop_number();
                let l = self.pop_number();
                self.stack.push(Value::Number(l - r));
            }

            Op::Mul => {
                let r = self.pop_number();
                let l = self.pop_number();
                self.stack.push(Value::Number(l * r));
            }

            Op::Div => {
                // division by zero follows IEEE-754
                let r = self.pop_number();
                let l = self.pop_number();
                self.stack.push(Value::Number(l / r));
            }

            Op::Negate => {
                let value = self.pop_number();
                self.stack.push(Value::Number(-value));
            }

            Op::Equals => {
                let r = self.stack.pop();
                let l = self.stack.pop();
                self.stack.push(Value::Bool(l.equals(&r)));
            }

            Op::NotEqual => {
                let r = self.stack.pop();
                let l = self.stack.pop();
                self.stack.push(Value::Bool(!l.equals(&r)));
            }

            Op::Not => {
                let value = self.pop_bool();
                self.stack.push(Value::Bool(!value));
            }

            Op::And => {
                let r = self.pop_bool();
                let l = self.pop_bool();
                self.stack.push(Value::Bool(l && r));
            }

            Op::Or => {
                let r = self.pop_bool();
                let l = self.pop_bool();
                self.stack.push(Value::Bool(l || r));
            }

            Op::Less => {
                let r = self.pop_number();
                let l = self.pop_number();
                self.stack.push(Value::Bool(l < r));
            }

            Op::LessOrEqual => {
                let r = self.pop_number();
                let l = self.pop_number();
                self.stack.push(Value::Bool(l <= r));
            }

            Op::Greater => {
                let r = self.pop_number();
                let l = self.pop_number();
                self.stack.push(Value::Bool(l > r));
            }

            Op::GreaterOrEqual => {
                let r = self.pop_number();
                let l = self.pop_number();
                self.stack.push(Value::Bool(l >= r));
            }

            Op::Call => {
                let callee = self.stack.pop();
                self.call_value(callee)?;
            }

            Op::Jump => {
                let offset = self.next_u16() as usize;
                self.ip += offset;
            }

            Op::Loop => {
                let offset = self.next_u16() as usize;
                self.ip -= offset;
            }

            Op::JumpFalse => {
                let offset = self.next_u16() as usize;
                if !self.pop_bool() {
                    self.ip += offset;
                }
            }

            Op::GetLocal => {
                let name = self.read_name();
                let Some(index) = self.find_var(&name) else {
                    return Err(RuntimeError::UndefinedLocal(name));
                };

                let Value::Variable(variable) = self.stack.get(index) else {
                    unreachable!();
                };
                // the held value is aliased, not cloned; container methods
                // rely on this
                let value = variable.value.clone();
                self.stack.push(value);
            }

            Op::SetLocal => {
                let value = self.stack.pop();
                let name = self.read_name();

                let Some(index) = self.find_var(&name) else {
                    return Err(RuntimeError::UnassignableLocal(name));
                };

                let Value::Variable(variable) = self.stack.get_mut(index) else {
                    unreachable!();
                };
                variable.value = value.deep_clone();
            }

            Op::DeclareLocal => {
                let name = self.read_name();
                let value = self.stack.pop().deep_clone();
                self.add_var(name, value);
            }

            Op::GetGlobal => {
                let name = self.read_name();
                let Some(value) = self.globals.get(&name) else {
                    return Err(RuntimeError::UndefinedGlobal(name));
                };
                let value = value.clone();
                self.stack.push(value);
            }

            Op::SetGlobal => {
                let name = self.read_name();
                let value = self.stack.pop();
                self.globals.insert(name, value);
            }

            Op::True => self.stack.push(Value::Bool(true)),
            Op::False => self.stack.push(Value::Bool(false)),
            Op::Nil => self.stack.push(Value::Nil),

            Op::FormList => {
                let count = self.next_u16() as usize;

                let mut items = vec![Value::Nil; count];
                for i in (0..count).rev() {
                    items[i] = self.stack.pop();
                }

                self.stack.push(Value::new_list(items));
            }

            Op::NewList => {
                self.stack.push(Value::new_list(Vec::new()));
            }

            Op::Append => {
                let value = self.stack.pop();
                let list = self.stack.pop();
                match &list {
                    Value::List(items) => items.borrow_mut().push(value),
                    other => panic!("vm: append to non-list {}", other.type_name()),
                }
                self.stack.push(list);
            }

            Op::ConcatLists => {
                let r = self.pop_list();
                let l = self.pop_list();

                let mut items = l.borrow().clone();
                items.extend(r.borrow().iter().cloned());
                self.stack.push(Value::new_list(items));
            }

            Op::Descend => self.descend(),
            Op::Ascend => self.ascend(),

            Op::StringConversion => {
                let value = self.stack.pop();
                self.stack.push(Value::from(value.to_string()));
            }

            Op::StringConcatenation => {
                let r = self.pop_string();
                let l = self.pop_string();
                self.stack.push(Value::from(format!("{}{}", l, r)));
            }

            Op::Swap => {
                let r = self.stack.pop();
                let l = self.stack.pop();
                self.stack.push(r);
                self.stack.push(l);
            }

            Op::AccessProperty => {
                let source = self.stack.pop();
                let property = self.read_name();

                let member = source.get(&property)?;

                // bind the receiver so a following call passes `this`
                let member = match member {
                    Value::Function(function) => {
                        let mut bound = (*function).clone();
                        bound.parent = Some(source);
                        Value::Function(Rc::new(bound))
                    }
                    Value::Builtin(mut builtin) => {
                        builtin.parent = Some(Box::new(source));
                        Value::Builtin(builtin)
                    }
                    other => other,
                };

                self.stack.push(member);
            }

            Op::Breakpoint => {}
        }

        Ok(true)
    }

    /// Invoke a function value re-entrantly and run it to completion. This
    /// is the embeddable mirror of the `Call` instruction.
    pub fn call(&mut self, callee: Value, args: Vec<Value>) -> VmResult<Value> {
        match callee {
            Value::Function(function) => {
                self.call.push(Call {
                    chunk: self.chunk.clone(),
                    ip: self.ip,
                    stack_end: self.stack.len(),
                    variable_end: self.variable_end,
                    scope: self.scope,
                });

                for (parameter, value) in function.parameters.iter().zip(args) {
                    self.add_var(parameter.name.clone(), value);
                }

                if let Some(parent) = &function.parent {
                    self.add_var("this".to_string(), parent.clone());
                }

                self.variable_end = self.stack.len();

                self.chunk = function.chunk.clone();
                self.ip = 0;

                // drive instructions until the matching return pops the
                // frame pushed above
                let depth = self.call.len();
                while self.call.len() >= depth {
                    if !self.next()? {
                        break;
                    }
                }

                Ok(self.stack.pop())
            }

            Value::Builtin(builtin) => {
                let parent = builtin.parent.clone();
                (builtin.f)(Some(self), parent.as_deref(), &args)
            }

            other => Err(RuntimeError::NotCallable(other.debug_string())),
        }
    }

    /// The `Call` instruction: dispatch on the popped callee.
    fn call_value(&mut self, callee: Value) -> VmResult<()> {
        match callee {
            Value::Function(function) => {
                let arity = function.parameters.len();

                self.call.push(Call {
                    chunk: self.chunk.clone(),
                    ip: self.ip,
                    stack_end: self.stack.len() - arity,
                    variable_end: self.variable_end,
                    scope: self.scope,
                });

                // rewrap the argument slots in place as named variables
                for (i, parameter) in function.parameters.iter().enumerate() {
                    let slot = self.stack.len() - arity + i;
                    let value = self.stack.get(slot).clone();
                    *self.stack.get_mut(slot) = Value::Variable(Box::new(Variable {
                        name: parameter.name.clone(),
                        value,
                        scope: self.scope,
                    }));
                }

                if let Some(parent) = &function.parent {
                    self.add_var("this".to_string(), parent.clone());
                }

                self.variable_end = self.stack.len();

                self.chunk = function.chunk.clone();
                self.ip = 0;

                Ok(())
            }

            Value::Builtin(builtin) => {
                let arity = builtin.signature.params.len();

                let mut args = vec![Value::Nil; arity];
                for i in (0..arity).rev() {
                    args[i] = self.stack.pop();
                }

                let parent = builtin.parent.clone();
                let value = (builtin.f)(Some(self), parent.as_deref(), &args)?;
                self.stack.push(value);

                Ok(())
            }

            other => Err(RuntimeError::NotCallable(other.debug_string())),
        }
    }

    // ===== Variables and scope =====

    fn descend(&mut self) {
        self.scope += 1;
    }

    fn ascend(&mut self) {
        if self.scope == 0 {
            panic!("invalid scope");
        }
        self.scope -= 1;

        self.purge_vars();
    }

    /// Pop every topmost variable whose scope exceeds the current one.
    fn purge_vars(&mut self) {
        while self.variable_end > 0 {
            let Value::Variable(variable) = self.stack.get(self.variable_end - 1) else {
                panic!("vm: variable region holds a non-variable");
            };
            if variable.scope <= self.scope {
                break;
            }

            self.variable_end -= 1;
            self.stack.pop();
        }
    }

    fn add_var(&mut self, name: String, value: Value) {
        self.variable_end += 1;
        self.stack.push(Value::Variable(Box::new(Variable {
            name,
            value,
            scope: self.scope,
        })));
    }

    /// Find the nearest variable with the given name, top-down within the
    /// variable region.
    fn find_var(&self, name: &str) -> Option<usize> {
        for i in (0..self.variable_end).rev() {
            if let Value::Variable(variable) = self.stack.get(i) {
                if variable.name == name {
                    return Some(i);
                }
            }
        }

        None
    }

    // ===== Chunk reading =====

    fn next_byte(&mut self) -> u8 {
        let byte = self.chunk.code[self.ip];
        self.ip += 1;
        byte
    }

    fn next_u16(&mut self) -> u16 {
        let hi = self.next_byte() as u16;
        let lo = self.next_byte() as u16;
        (hi << 8) | lo
    }

    fn read_constant(&mut self) -> &Value {
        let index = self.next_byte() as usize;
        &self.chunk.constants[index]
    }

    fn read_name(&mut self) -> String {
        match self.read_constant() {
            Value::String(name) => name.to_string(),
            other => panic!("vm: name constant is a {}", other.type_name()),
        }
    }

    // ===== Typed pops =====
    //
    // Operand types are guaranteed by the compiler; a mismatch here is an
    // unrecoverable bug, not a user error.

    fn pop_number(&mut self) -> f64 {
        match self.stack.pop() {
            Value::Number(n) => n,
            other => panic!("vm: expected number on stack, got {}", other.type_name()),
        }
    }

    fn pop_bool(&mut self) -> bool {
        match self.stack.pop() {
            Value::Bool(b) => b,
            other => panic!("vm: expected boolean on stack, got {}", other.type_name()),
        }
    }

    fn pop_string(&mut self) -> Rc<str> {
        match self.stack.pop() {
            Value::String(s) => s,
            other => panic!("vm: expected string on stack, got {}", other.type_name()),
        }
    }

    fn pop_list(&mut self) -> Rc<std::cell::RefCell<Vec<Value>>> {
        match self.stack.pop() {
            Value::List(items) => items,
            other => panic!("vm: expected list on stack, got {}", other.type_name()),
        }
    }

    /// The live value stack, bottom first. Exposed for tests and the
    /// disassembling tracer.
    pub fn stack_values(&self) -> &[Value] {
        self.stack.as_slice()
    }
}
