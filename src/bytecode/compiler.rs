//! Bytecode compiler: walks the AST in one pass, emitting instructions
//! while deducing and checking types.

use std::mem;
use std::rc::Rc;

use crate::ast::{BinaryOp, Block, Expr, ExprKind, Program, Stmt, StmtKind, UnaryOp};
use crate::bytecode::chunk::Chunk;
use crate::bytecode::globals;
use crate::bytecode::instruction::Op;
use crate::bytecode::stack::Stack;
use crate::bytecode::value::{Function, Value};
use crate::error::CompileError;
use crate::lexer::Scanner;
use crate::parser::Parser;
use crate::span::Span;
use crate::types::{FunctionSignature, TypeKind, TypeSignature};

/// Result type for compilation.
pub type CompileResult<T> = Result<T, CompileError>;

/// Resolves import paths to source text. The compiler performs no path
/// normalization itself; `is_same` is its only identity on paths.
pub trait ImportsResolver {
    fn resolve(&self, path: &str) -> std::io::Result<String>;
    fn is_same(&self, a: &str, b: &str) -> bool;
}

/// A declared name on the compiler's symbol stack.
#[derive(Debug, Clone)]
pub struct LocalVariable {
    name: String,
    signature: TypeSignature,
    scope: usize,
}

/// The bytecode compiler.
///
/// The write cursor `ip` may move backwards to patch jump operands and is
/// restored afterwards. The symbol stack holds one entry per declared name,
/// deepest scope on top, popped when its scope exits.
pub struct Compiler {
    chunk: Chunk,
    ip: usize,
    scope: usize,

    locals: Stack<LocalVariable>,
    file_stack: Stack<String>,
    resolved: Vec<String>,
    resolver: Option<Box<dyn ImportsResolver>>,

    source: String,
    /// Non-fatal diagnostics, surfaced by the driver.
    pub warnings: Vec<CompileError>,
}

impl Compiler {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            chunk: Chunk::new(),
            ip: 0,
            scope: 0,
            locals: Stack::new(256),
            file_stack: Stack::new(256),
            resolved: Vec::new(),
            resolver: None,
            source: source.into(),
            warnings: Vec::new(),
        }
    }

    pub fn set_resolver(&mut self, resolver: Box<dyn ImportsResolver>) {
        self.resolver = Some(resolver);
    }

    /// Swap the source buffer used for diagnostics (the REPL feeds one line
    /// at a time).
    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = source.into();
    }

    /// The chunk compiled so far.
    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn into_chunk(self) -> Chunk {
        self.chunk
    }

    /// Compile a program into the current chunk. Imports are resolved
    /// first, in encounter order, once each.
    pub fn compile(&mut self, program: &Program) -> CompileResult<()> {
        self.file_stack.push(program.path.clone());

        for path in &program.imports {
            self.resolve_import(path)?;
        }

        for stmt in &program.statements {
            self.compile_stmt(stmt)?;
        }

        self.file_stack.pop();

        Ok(())
    }

    // ===== Statements =====

    fn compile_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match &stmt.kind {
            StmtKind::Expression(expr) => {
                self.compile_expr(expr)?;
            }

            StmtKind::Block(block) => {
                self.compile_block(block)?;
            }

            StmtKind::If {
                condition,
                then,
                otherwise,
            } => {
                let sig = self.deduce_signature(condition)?;
                if sig.kind() != TypeKind::Boolean {
                    return Err(self.error(
                        format!(
                            "conditional requires boolean; cannot use non-boolean type {}",
                            sig
                        ),
                        condition.span,
                    ));
                }

                self.compile_expr(condition)?;

                // jump over the body when the condition was false; the
                // distance is patched once it is known
                self.emit(Op::JumpFalse);
                let jump_by_pos = self.ip;
                self.advance(2);

                self.compile_block(then)?;

                let mut jump_over_else = 0;
                if otherwise.is_some() {
                    self.emit(Op::Jump);
                    jump_over_else = self.ip;
                    self.advance(2);
                }

                self.put_u16(jump_by_pos, jump_offset(self.ip - jump_by_pos - 2));

                if let Some(otherwise) = otherwise {
                    self.compile_stmt(otherwise)?;
                    self.put_u16(jump_over_else, jump_offset(self.ip - jump_over_else - 2));
                }
            }

            StmtKind::While { condition, body } => {
                let sig = self.deduce_signature(condition)?;
                if sig.kind() != TypeKind::Boolean {
                    return Err(self.error(
                        format!("cannot loop over value of type {}; requires boolean", sig),
                        condition.span,
                    ));
                }

                let condition_pos = self.ip;
                self.compile_expr(condition)?;

                self.emit(Op::JumpFalse);
                let jump_value_pos = self.ip;
                self.advance(2);

                self.compile_block(body)?;

                self.emit(Op::Loop);
                self.add_u16(jump_offset(self.ip - condition_pos + 2));

                self.put_u16(jump_value_pos, jump_offset(self.ip - jump_value_pos - 2));
            }

            StmtKind::Assign {
                name,
                value,
                declare,
            } => {
                if name == "_" {
                    // the sink name turns any expression into a statement
                    self.compile_expr(value)?;
                    self.emit(Op::Pop);
                } else {
                    if *declare && self.is_var_declared_here(name) {
                        return Err(self.error(
                            format!("{} is already declared in this scope", name),
                            stmt.span,
                        ));
                    }

                    self.add_set_var(name, value, *declare)?;
                }
            }

            StmtKind::Return(value) => {
                self.compile_expr(value)?;
                self.emit(Op::Return);
            }

            StmtKind::Breakpoint => {
                self.emit(Op::Breakpoint);
            }
        }

        Ok(())
    }

    fn compile_block(&mut self, block: &Block) -> CompileResult<()> {
        self.add_descend();
        for stmt in &block.statements {
            self.compile_stmt(stmt)?;
        }
        self.add_ascend();

        Ok(())
    }

    // ===== Expressions =====

    fn compile_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        match &expr.kind {
            ExprKind::String(value) => {
                self.emit_value(Value::from(value.as_str()));
            }

            ExprKind::Number(value) => {
                self.emit_value(Value::Number(*value));
            }

            ExprKind::Bool(value) => {
                self.emit(if *value { Op::True } else { Op::False });
            }

            ExprKind::Nil => {
                self.emit(Op::Nil);
            }

            ExprKind::List { items, .. } => {
                if items.is_empty() {
                    self.emit(Op::NewList);
                } else if self.is_tree_constant(expr) {
                    let value = self.compute(expr)?;
                    self.emit_value(value);
                } else {
                    for item in items {
                        self.compile_expr(item)?;
                    }
                    self.emit(Op::FormList);
                    assert!(items.len() < 65536, "list literal too large");
                    self.add_u16(items.len() as u16);
                }
            }

            ExprKind::Reference(name) => {
                self.add_get_var(name, expr.span)?;
            }

            ExprKind::Binary { .. } => {
                self.compile_binary(expr)?;
            }

            ExprKind::Unary { op, operand } => {
                if self.is_tree_constant(expr) {
                    let value = self.compute(expr)?;
                    self.emit_value(value);
                } else {
                    // operand types are verified before any code is emitted
                    self.deduce_signature(expr)?;
                    self.compile_expr(operand)?;

                    match op {
                        UnaryOp::Negate => self.emit(Op::Negate),
                        UnaryOp::Not => self.emit(Op::Not),
                    }
                }
            }

            ExprKind::Access { source, property } => {
                self.compile_expr(source)?;
                self.emit(Op::AccessProperty);
                self.add_name(property);
            }

            ExprKind::Call { source, args, keep } => {
                // a single check covers callability, arity and argument
                // types, resolving the inner sentinel for list methods
                let out = self.check_call(source, args, expr.span)?;

                if !keep && out.kind() != TypeKind::Nil {
                    self.warn(
                        format!(
                            "shouldn't void result of function call (output is non-nil {})",
                            out
                        ),
                        expr.span,
                    );
                }

                for arg in args {
                    if self.is_tree_constant(arg) {
                        let value = self.compute(arg)?;
                        self.emit_value(value);
                    } else {
                        self.compile_expr(arg)?;
                    }
                }

                self.compile_expr(source)?;
                self.emit(Op::Call);

                if !keep {
                    self.emit(Op::Pop);
                }
            }

            ExprKind::Function(literal) => {
                // reserve a pending constant slot; the finished function
                // replaces it once its chunk exists
                let slot = self.chunk.constants.len();
                assert!(slot < 256, "too many constants in chunk");
                self.chunk.constants.push(Value::Nil);

                self.emit(Op::Constant);
                self.add_byte(slot as u8);

                // register the function's own name so the body may refer to
                // itself
                let signature = self.deduce_signature(expr)?;
                self.register_var(&literal.name, signature);

                let saved_chunk = mem::take(&mut self.chunk);
                let saved_ip = mem::replace(&mut self.ip, 0);

                let body = self.compile_function_body(literal);

                let inner = mem::replace(&mut self.chunk, saved_chunk);
                self.ip = saved_ip;
                body?;

                self.chunk.constants[slot] = Value::Function(Rc::new(Function {
                    name: literal.name.clone(),
                    parameters: literal.parameters.clone(),
                    yields: literal.yield_signature.clone(),
                    chunk: Rc::new(inner),
                    parent: None,
                }));
            }
        }

        Ok(())
    }

    /// Compile a function body into the (already swapped-in) fresh chunk.
    /// Factored out so the caller can restore its own chunk on error.
    fn compile_function_body(&mut self, literal: &crate::ast::FunctionLiteral) -> CompileResult<()> {
        self.descend();
        for parameter in &literal.parameters {
            self.register_var(&parameter.name, parameter.signature.clone());
        }

        self.affirm_return_signature_block(&literal.body, &literal.yield_signature)?;
        self.compile_block(&literal.body)?;

        // a body that falls through returns nil implicitly
        self.emit(Op::Nil);
        self.emit(Op::Return);

        self.ascend();

        Ok(())
    }

    fn compile_binary(&mut self, expr: &Expr) -> CompileResult<()> {
        if self.is_tree_constant(expr) {
            let value = self.compute(expr)?;
            self.emit_value(value);
            return Ok(());
        }

        let ExprKind::Binary { op, left, right } = &expr.kind else {
            unreachable!("compile_binary called on non-binary node");
        };

        // verifies operand types for every operator
        let result = self.deduce_signature(expr)?;

        self.compile_expr(left)?;
        self.compile_expr(right)?;

        match op {
            BinaryOp::Add => {
                if result.kind() == TypeKind::String {
                    self.emit(Op::StringConcatenation);
                } else if result.kind() == TypeKind::List {
                    self.emit(Op::ConcatLists);
                } else {
                    self.emit(Op::Add);
                }
            }
            BinaryOp::Subtract => self.emit(Op::Sub),
            BinaryOp::Multiply => self.emit(Op::Mul),
            BinaryOp::Divide => self.emit(Op::Div),
            BinaryOp::Equal => self.emit(Op::Equals),
            BinaryOp::NotEqual => self.emit(Op::NotEqual),
            BinaryOp::Less => self.emit(Op::Less),
            BinaryOp::Greater => self.emit(Op::Greater),
            BinaryOp::LessEqual => self.emit(Op::LessOrEqual),
            BinaryOp::GreaterEqual => self.emit(Op::GreaterOrEqual),
            BinaryOp::And => self.emit(Op::And),
            BinaryOp::Or => self.emit(Op::Or),
        }

        Ok(())
    }

    // ===== Type deduction =====

    /// Exhaustively deduce the type signature of an expression, reporting
    /// every type error on the way.
    pub fn deduce_signature(&mut self, expr: &Expr) -> CompileResult<TypeSignature> {
        match &expr.kind {
            ExprKind::String(_) => Ok(TypeSignature::String),
            ExprKind::Number(_) => Ok(TypeSignature::Number),
            ExprKind::Bool(_) => Ok(TypeSignature::Boolean),
            ExprKind::Nil => Ok(TypeSignature::Nil),

            ExprKind::Reference(name) => self.get_var_signature(name, expr.span),

            ExprKind::List { items, content } => {
                let mut contents = content.clone();

                for item in items {
                    let sig = self.deduce_signature(item)?;
                    match &contents {
                        None => contents = Some(sig),
                        Some(current) if !current.matches(&sig) => {
                            // mixed element types widen the list to any
                            contents = Some(TypeSignature::Any);
                        }
                        Some(_) => {}
                    }
                }

                let contents = contents
                    .ok_or_else(|| self.error("can't deduce content type", expr.span))?;

                Ok(TypeSignature::List(Box::new(contents)))
            }

            ExprKind::Binary { op, left, right } => {
                let l = self.deduce_signature(left)?;
                let r = self.deduce_signature(right)?;

                if !l.matches(&r) {
                    return Err(self.error(
                        format!(
                            "cannot perform binary {} on different types: {} and {}",
                            op, l, r
                        ),
                        expr.span,
                    ));
                }

                match op {
                    BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide => {
                        if l.kind() != TypeKind::Number {
                            return Err(self.error(
                                format!("cannot perform binary {} on non-number type {}", op, l),
                                expr.span,
                            ));
                        }
                        Ok(TypeSignature::Number)
                    }
                    BinaryOp::Add => match &l {
                        TypeSignature::String => Ok(TypeSignature::String),
                        TypeSignature::Number => Ok(TypeSignature::Number),
                        TypeSignature::List(contents) => {
                            Ok(TypeSignature::List(contents.clone()))
                        }
                        _ => Err(self.error(
                            format!("cannot perform binary addition on type {}", l),
                            expr.span,
                        )),
                    },
                    BinaryOp::And | BinaryOp::Or => {
                        if l.kind() != TypeKind::Boolean {
                            return Err(self.error(
                                format!("cannot perform binary {} on non-boolean type {}", op, l),
                                expr.span,
                            ));
                        }
                        Ok(TypeSignature::Boolean)
                    }
                    BinaryOp::Equal | BinaryOp::NotEqual => Ok(TypeSignature::Boolean),
                    BinaryOp::Less
                    | BinaryOp::Greater
                    | BinaryOp::LessEqual
                    | BinaryOp::GreaterEqual => {
                        if l.kind() != TypeKind::Number {
                            return Err(self.error(
                                format!(
                                    "cannot perform number comparison ({}) on non-number type {}",
                                    op, l
                                ),
                                expr.span,
                            ));
                        }
                        Ok(TypeSignature::Boolean)
                    }
                }
            }

            ExprKind::Unary { op, operand } => {
                let sig = self.deduce_signature(operand)?;

                match op {
                    UnaryOp::Negate => {
                        if sig.kind() != TypeKind::Number {
                            return Err(self.error(
                                format!(
                                    "cannot perform negation on type {} (must be number)",
                                    sig
                                ),
                                expr.span,
                            ));
                        }
                        Ok(TypeSignature::Number)
                    }
                    UnaryOp::Not => {
                        if sig.kind() != TypeKind::Boolean {
                            return Err(self.error(
                                format!(
                                    "cannot perform negation on type {} (must be boolean)",
                                    sig
                                ),
                                expr.span,
                            ));
                        }
                        Ok(TypeSignature::Boolean)
                    }
                }
            }

            ExprKind::Access { source, property } => {
                let sig = self.deduce_signature(source)?;

                match sig.kind() {
                    TypeKind::String => crate::bytecode::value::string_prototype(property)
                        .map(|b| TypeSignature::Function(b.signature))
                        .ok_or_else(|| {
                            self.error(
                                format!("string has no property {}", property),
                                expr.span,
                            )
                        }),
                    TypeKind::List => crate::bytecode::value::list_prototype(property)
                        .map(|b| TypeSignature::Function(b.signature))
                        .ok_or_else(|| {
                            self.error(format!("list has no property {}", property), expr.span)
                        }),
                    TypeKind::Object => {
                        if let Some(builtin) = crate::bytecode::value::object_prototype(property)
                        {
                            return Ok(TypeSignature::Function(builtin.signature));
                        }

                        let TypeSignature::Object(members) = &sig else {
                            unreachable!();
                        };
                        members.get(property).cloned().ok_or_else(|| {
                            self.error(
                                format!("object has no property {}", property),
                                expr.span,
                            )
                        })
                    }
                    _ => Err(self.error(
                        format!("cannot access property from value of type {}", sig),
                        expr.span,
                    )),
                }
            }

            ExprKind::Call { source, args, .. } => self.check_call(source, args, expr.span),

            ExprKind::Function(literal) => {
                let params = literal
                    .parameters
                    .iter()
                    .map(|p| p.signature.clone())
                    .collect();

                Ok(TypeSignature::Function(FunctionSignature::new(
                    params,
                    literal.yield_signature.clone(),
                )))
            }
        }
    }

    /// Verify that a call is well typed and return its result signature.
    /// When the callee is a list method, the `inner` sentinel in its
    /// signature resolves to the receiver's element type.
    fn check_call(
        &mut self,
        source: &Expr,
        args: &[Expr],
        span: Span,
    ) -> CompileResult<TypeSignature> {
        let sig = self.deduce_signature(source)?;

        let TypeSignature::Function(f) = &sig else {
            return Err(self.error(
                format!("cannot call non-function value of type {}", sig),
                span,
            ));
        };
        let f = f.clone();

        if args.len() != f.params.len() {
            return Err(self.error(
                format!(
                    "wrong argument count: function of signature {} got {}, requires {}",
                    sig,
                    args.len(),
                    f.params.len()
                ),
                span,
            ));
        }

        // element type of the receiver, when calling through a list access
        let mut inner_type = None;
        if let ExprKind::Access { source: receiver, .. } = &source.kind {
            let receiver_sig = self.deduce_signature(receiver)?;
            if let TypeSignature::List(contents) = receiver_sig {
                inner_type = Some(*contents);
            }
        }

        for (i, arg) in args.iter().enumerate() {
            let given = self.deduce_signature(arg)?;

            let required = resolve_inner(&f.params[i], inner_type.as_ref()).ok_or_else(|| {
                self.error(
                    format!("function source ({}) has no inner type", sig),
                    source.span,
                )
            })?;

            if !required.matches(&given) {
                return Err(self.error(
                    format!(
                        "argument #{} has wrong type signature. requires {}, got {}",
                        i, required, given
                    ),
                    arg.span,
                ));
            }
        }

        resolve_inner(&f.yields, inner_type.as_ref()).ok_or_else(|| {
            self.error(
                format!("function source ({}) has no inner type", sig),
                source.span,
            )
        })
    }

    /// Walk a function body and verify every `return` yields a value whose
    /// signature matches the declared yield type.
    fn affirm_return_signature_block(
        &mut self,
        block: &Block,
        yields: &TypeSignature,
    ) -> CompileResult<()> {
        self.descend();
        for stmt in &block.statements {
            self.affirm_return_signature(stmt, yields)?;
        }
        self.ascend();

        Ok(())
    }

    fn affirm_return_signature(
        &mut self,
        stmt: &Stmt,
        yields: &TypeSignature,
    ) -> CompileResult<()> {
        match &stmt.kind {
            StmtKind::Block(block) => self.affirm_return_signature_block(block, yields)?,

            StmtKind::Return(value) => {
                let sig = self.deduce_signature(value)?;
                if !yields.matches(&sig) {
                    return Err(self.error(
                        format!(
                            "function cannot return a value with type {}. defined to be {}",
                            sig, yields
                        ),
                        stmt.span,
                    ));
                }
            }

            StmtKind::If {
                then, otherwise, ..
            } => {
                self.affirm_return_signature_block(then, yields)?;
                if let Some(otherwise) = otherwise {
                    self.affirm_return_signature(otherwise, yields)?;
                }
            }

            StmtKind::While { body, .. } => {
                self.affirm_return_signature_block(body, yields)?;
            }

            StmtKind::Assign {
                name,
                value,
                declare,
            } => {
                if *declare {
                    let sig = self.deduce_signature(value)?;
                    self.register_var(name, sig);
                } else if name != "_" {
                    let declared = self.get_var_signature(name, stmt.span)?;
                    let sig = self.deduce_signature(value)?;

                    if !declared.matches(&sig) {
                        return Err(self.error(
                            format!(
                                "cannot assign value of type {} to variable {} of type {}",
                                sig, name, declared
                            ),
                            value.span,
                        ));
                    }
                }
            }

            StmtKind::Expression(_) | StmtKind::Breakpoint => {}
        }

        Ok(())
    }

    // ===== Variables =====

    fn get_var_signature(&self, name: &str, span: Span) -> CompileResult<TypeSignature> {
        for i in (0..self.locals.len()).rev() {
            let local = self.locals.get(i);
            if local.name == name {
                return Ok(local.signature.clone());
            }
        }

        if let Some(signature) = globals::GLOBAL_SIGNATURES.get(name) {
            return Ok(signature.clone());
        }

        Err(self.error(format!("variable {} not defined", name), span))
    }

    fn add_get_var(&mut self, name: &str, span: Span) -> CompileResult<()> {
        if self.is_local(name) {
            self.emit(Op::GetLocal);
            self.add_name(name);
        } else if globals::is_global(name) {
            self.emit(Op::GetGlobal);
            self.add_name(name);
        } else {
            return Err(self.error(format!("variable {} not defined", name), span));
        }

        Ok(())
    }

    fn add_set_var(&mut self, name: &str, value: &Expr, declare: bool) -> CompileResult<()> {
        self.compile_expr(value)?;

        let sig = self.deduce_signature(value)?;

        if declare {
            self.emit(Op::DeclareLocal);
            self.register_var(name, sig);
        } else {
            let declared = self.get_var_signature(name, value.span)?;

            if !declared.matches(&sig) {
                return Err(self.error(
                    format!(
                        "cannot assign value of type {} to variable {} of type {}",
                        sig, name, declared
                    ),
                    value.span,
                ));
            }

            self.emit(Op::SetLocal);
        }

        self.add_name(name);

        Ok(())
    }

    fn register_var(&mut self, name: &str, signature: TypeSignature) {
        self.locals.push(LocalVariable {
            name: name.to_string(),
            signature,
            scope: self.scope,
        });
    }

    /// Whether a variable with this name is declared in the current scope.
    fn is_var_declared_here(&self, name: &str) -> bool {
        for i in (0..self.locals.len()).rev() {
            let local = self.locals.get(i);
            if local.scope != self.scope {
                break;
            }
            if local.name == name {
                return true;
            }
        }

        false
    }

    fn is_local(&self, name: &str) -> bool {
        (0..self.locals.len())
            .rev()
            .any(|i| self.locals.get(i).name == name)
    }

    // ===== Constant folding =====

    /// Whether a tree can be evaluated at compile time. References are
    /// never constant, except as the source of a call that resolves to a
    /// `Constant` builtin.
    fn is_tree_constant(&self, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::String(_) | ExprKind::Number(_) | ExprKind::Bool(_) | ExprKind::Nil => true,

            ExprKind::List { items, .. } => items.iter().all(|item| self.is_tree_constant(item)),

            ExprKind::Binary { left, right, .. } => {
                self.is_tree_constant(left) && self.is_tree_constant(right)
            }

            ExprKind::Unary { operand, .. } => self.is_tree_constant(operand),

            ExprKind::Call { source, args, .. } => {
                args.iter().all(|arg| self.is_tree_constant(arg))
                    && self.resolve_constant_builtin(source).is_some()
            }

            ExprKind::Reference(_) | ExprKind::Access { .. } | ExprKind::Function(_) => false,
        }
    }

    /// Resolve a call source to a foldable builtin: an unshadowed global
    /// reference whose builtin carries the `Constant` flag.
    fn resolve_constant_builtin(&self, source: &Expr) -> Option<crate::bytecode::value::Builtin> {
        let ExprKind::Reference(name) = &source.kind else {
            return None;
        };
        if self.is_local(name) {
            return None;
        }

        globals::lookup(name).filter(|builtin| builtin.constant)
    }

    /// Pre-evaluate a constant tree into a value.
    fn compute(&mut self, expr: &Expr) -> CompileResult<Value> {
        match &expr.kind {
            ExprKind::String(value) => Ok(Value::from(value.as_str())),
            ExprKind::Number(value) => Ok(Value::Number(*value)),
            ExprKind::Bool(value) => Ok(Value::Bool(*value)),
            ExprKind::Nil => Ok(Value::Nil),

            ExprKind::List { items, .. } => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.compute(item)?);
                }
                Ok(Value::new_list(values))
            }

            ExprKind::Binary { .. } => self.compute_binary(expr),

            ExprKind::Unary { op, operand } => {
                let value = self.compute(operand)?;

                match (op, &value) {
                    (UnaryOp::Negate, Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnaryOp::Negate, other) => Err(self.error(
                        format!(
                            "cannot perform negation on type {} (must be number)",
                            other.type_name()
                        ),
                        expr.span,
                    )),
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Not, other) => Err(self.error(
                        format!(
                            "cannot perform negation on type {} (must be boolean)",
                            other.type_name()
                        ),
                        expr.span,
                    )),
                }
            }

            ExprKind::Call { source, args, .. } => {
                let builtin = self
                    .resolve_constant_builtin(source)
                    .expect("compute called on non-constant call");

                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.compute(arg)?);
                }

                (builtin.f)(None, None, &values)
                    .map_err(|err| self.error(err.to_string(), expr.span))
            }

            ExprKind::Reference(_) | ExprKind::Access { .. } | ExprKind::Function(_) => {
                unreachable!("compute called on non-constant tree")
            }
        }
    }

    fn compute_binary(&mut self, expr: &Expr) -> CompileResult<Value> {
        let ExprKind::Binary { op, left, right } = &expr.kind else {
            unreachable!("compute_binary called on non-binary node");
        };

        let l = self.compute(left)?;
        let r = self.compute(right)?;

        if std::mem::discriminant(&l) != std::mem::discriminant(&r) {
            return Err(self.error(
                format!(
                    "cannot perform binary {} on different types {} and {}",
                    op,
                    l.type_name(),
                    r.type_name()
                ),
                expr.span,
            ));
        }

        match op {
            BinaryOp::Add => match (&l, &r) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::String(a), Value::String(b)) => Ok(Value::from(format!("{}{}", a, b))),
                (Value::List(a), Value::List(b)) => {
                    let mut items = a.borrow().clone();
                    items.extend(b.borrow().iter().cloned());
                    Ok(Value::new_list(items))
                }
                _ => Err(self.error(
                    format!("cannot add values of type {}", l.type_name()),
                    expr.span,
                )),
            },

            BinaryOp::Subtract
            | BinaryOp::Multiply
            | BinaryOp::Divide
            | BinaryOp::Less
            | BinaryOp::Greater
            | BinaryOp::LessEqual
            | BinaryOp::GreaterEqual => {
                let (Value::Number(a), Value::Number(b)) = (&l, &r) else {
                    return Err(self.error(
                        format!("cannot do binary {} on non-number type {}", op, l.type_name()),
                        expr.span,
                    ));
                };

                Ok(match op {
                    BinaryOp::Subtract => Value::Number(a - b),
                    BinaryOp::Multiply => Value::Number(a * b),
                    BinaryOp::Divide => Value::Number(a / b),
                    BinaryOp::Less => Value::Bool(a < b),
                    BinaryOp::Greater => Value::Bool(a > b),
                    BinaryOp::LessEqual => Value::Bool(a <= b),
                    BinaryOp::GreaterEqual => Value::Bool(a >= b),
                    _ => unreachable!(),
                })
            }

            BinaryOp::And | BinaryOp::Or => {
                let (Value::Bool(a), Value::Bool(b)) = (&l, &r) else {
                    return Err(self.error(
                        format!(
                            "cannot do binary {} on non-boolean type {}",
                            op,
                            l.type_name()
                        ),
                        expr.span,
                    ));
                };

                Ok(Value::Bool(match op {
                    BinaryOp::And => *a && *b,
                    BinaryOp::Or => *a || *b,
                    _ => unreachable!(),
                }))
            }

            BinaryOp::Equal => Ok(Value::Bool(l.equals(&r))),
            BinaryOp::NotEqual => Ok(Value::Bool(!l.equals(&r))),
        }
    }

    // ===== Imports =====

    fn resolve_import(&mut self, path: &str) -> CompileResult<()> {
        let Some(resolver) = &self.resolver else {
            return Err(self.error(
                format!("cannot resolve import {}: no resolver configured", path),
                Span::default(),
            ));
        };

        // already imported and available
        if self.resolved.iter().any(|p| resolver.is_same(path, p)) {
            return Ok(());
        }

        // a path on the file stack means we came from it
        for i in (0..self.file_stack.len()).rev() {
            if resolver.is_same(path, self.file_stack.get(i)) {
                return Err(self.error("recursive imports", Span::default()));
            }
        }

        let source = resolver
            .resolve(path)
            .map_err(|err| self.error(format!("cannot resolve import {}: {}", path, err), Span::default()))?;

        let tokens = Scanner::new(&source).scan_tokens().map_err(|err| {
            let span = err.span();
            CompileError {
                description: err.to_string(),
                span,
                source: source.clone(),
                trace: self.trace(),
            }
        })?;

        let program = Parser::new(tokens).parse(path).map_err(|err| {
            let span = err.span();
            CompileError {
                description: err.to_string(),
                span,
                source: source.clone(),
                trace: self.trace(),
            }
        })?;

        // swap the source so diagnostics for the imported file point at its
        // own text
        let saved_source = mem::replace(&mut self.source, source);
        let result = self.compile(&program);
        self.source = saved_source;
        result?;

        self.resolved.push(path.to_string());

        Ok(())
    }

    // ===== Scope tracking =====

    fn descend(&mut self) {
        self.scope += 1;
    }

    fn add_descend(&mut self) {
        self.descend();
        self.emit(Op::Descend);
    }

    fn ascend(&mut self) {
        self.scope -= 1;

        while !self.locals.is_empty() && self.locals.peek().scope > self.scope {
            self.locals.pop();
        }
    }

    fn add_ascend(&mut self) {
        self.ascend();
        self.emit(Op::Ascend);
    }

    // ===== Code emission =====

    /// Write a byte at the cursor, zero-filling any gap left by `advance`.
    fn add_byte(&mut self, byte: u8) {
        while self.chunk.code.len() <= self.ip {
            self.chunk.code.push(0);
        }

        self.chunk.code[self.ip] = byte;
        self.ip += 1;
    }

    fn emit(&mut self, op: Op) {
        self.add_byte(op as u8);
    }

    /// Emit `Constant` with the pool index of `value`.
    fn emit_value(&mut self, value: Value) {
        self.emit(Op::Constant);
        let index = self.chunk.add_constant(value);
        self.add_byte(index);
    }

    /// Write the pool index of a name string.
    fn add_name(&mut self, name: &str) {
        let index = self.chunk.add_constant(Value::from(name));
        self.add_byte(index);
    }

    fn add_u16(&mut self, value: u16) {
        self.add_byte((value >> 8) as u8);
        self.add_byte((value & 0xff) as u8);
    }

    /// Write an u16 at an arbitrary position, preserving the cursor.
    fn put_u16(&mut self, position: usize, value: u16) {
        let start = self.ip;
        self.ip = position;
        self.add_u16(value);
        self.ip = start;
    }

    fn advance(&mut self, amount: usize) {
        self.ip += amount;
    }

    // ===== Diagnostics =====

    fn trace(&self) -> Vec<String> {
        self.file_stack.as_slice().to_vec()
    }

    fn error(&self, description: impl Into<String>, span: Span) -> CompileError {
        CompileError {
            description: description.into(),
            span,
            source: self.source.clone(),
            trace: self.trace(),
        }
    }

    fn warn(&mut self, description: impl Into<String>, span: Span) {
        let warning = self.error(description, span);
        self.warnings.push(warning);
    }
}

/// Narrow a jump distance, asserting it fits the operand.
fn jump_offset(distance: usize) -> u16 {
    assert!(distance < 65536, "jump too large");
    distance as u16
}

/// Substitute the `inner` sentinel with a receiver's element type. `None`
/// when the signature needs an element type that is not available.
fn resolve_inner(
    signature: &TypeSignature,
    inner: Option<&TypeSignature>,
) -> Option<TypeSignature> {
    match signature {
        TypeSignature::Inner => inner.cloned(),
        TypeSignature::List(contents) => Some(TypeSignature::List(Box::new(resolve_inner(
            contents, inner,
        )?))),
        TypeSignature::Composite(a, b) => Some(TypeSignature::Composite(
            Box::new(resolve_inner(a, inner)?),
            Box::new(resolve_inner(b, inner)?),
        )),
        TypeSignature::Function(f) => {
            let params = f
                .params
                .iter()
                .map(|p| resolve_inner(p, inner))
                .collect::<Option<Vec<_>>>()?;
            let yields = resolve_inner(&f.yields, inner)?;
            Some(TypeSignature::Function(FunctionSignature::new(
                params, yields,
            )))
        }
        other => Some(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn compile_source(source: &str) -> CompileResult<Chunk> {
        let mut compiler = Compiler::new(source);
        compile_into(&mut compiler, source)?;
        Ok(compiler.into_chunk())
    }

    fn compile_into(compiler: &mut Compiler, source: &str) -> CompileResult<()> {
        let tokens = Scanner::new(source)
            .scan_tokens()
            .unwrap_or_else(|e| panic!("lex error: {}", e));
        let program = Parser::new(tokens)
            .parse("test.lume")
            .unwrap_or_else(|e| panic!("parse error: {}", e));
        compiler.compile(&program)
    }

    /// In-memory resolver for import tests.
    struct MapResolver {
        files: HashMap<&'static str, &'static str>,
    }

    impl ImportsResolver for MapResolver {
        fn resolve(&self, path: &str) -> std::io::Result<String> {
            self.files
                .get(path)
                .map(|s| s.to_string())
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()))
        }

        fn is_same(&self, a: &str, b: &str) -> bool {
            a == b
        }
    }

    fn ops_of(chunk: &Chunk) -> Vec<Op> {
        let mut ops = Vec::new();
        let mut i = 0;
        while i < chunk.code.len() {
            let op = Op::from_u8(chunk.code[i]).expect("valid opcode");
            ops.push(op);
            i += 1 + op.operand_size();
        }
        ops
    }

    #[test]
    fn test_empty_program_compiles_to_empty_chunk() {
        let chunk = compile_source("").unwrap();
        assert!(chunk.is_empty());
        assert!(chunk.constants.is_empty());
    }

    #[test]
    fn test_literal_statement_leaves_value() {
        let chunk = compile_source("_ = 1").unwrap();
        assert_eq!(chunk.code[0], Op::Constant as u8);
        assert_eq!(chunk.code[2], Op::Pop as u8);
        assert!(chunk.constants[0].equals(&Value::Number(1.0)));
    }

    #[test]
    fn test_constant_folding_of_arithmetic() {
        let chunk = compile_source("_ = 1 + 2 * 3").unwrap();
        // the whole expression folds to a single constant
        assert_eq!(ops_of(&chunk), vec![Op::Constant, Op::Pop]);
        assert!(chunk.constants[0].equals(&Value::Number(7.0)));
    }

    #[test]
    fn test_constant_builtin_folds_in_argument_position() {
        let chunk = compile_source("write(str(1 + 2))").unwrap();
        // str(1 + 2) collapses into the single constant "3"; only the
        // write call survives to runtime
        assert_eq!(
            ops_of(&chunk),
            vec![Op::Constant, Op::GetGlobal, Op::Call, Op::Pop]
        );
        assert!(chunk.constants[0].equals(&Value::from("3")));
    }

    #[test]
    fn test_non_constant_builtins_are_not_folded() {
        let chunk = compile_source("write(\"hi\")").unwrap();
        assert!(ops_of(&chunk).contains(&Op::Call));
    }

    #[test]
    fn test_folding_preserves_runtime_type_errors() {
        let err = compile_source("_ = 1 + \"a\"").unwrap_err();
        assert!(err.description.contains("different types"), "{}", err);
    }

    #[test]
    fn test_constant_pool_deduplicates_across_statements() {
        let chunk = compile_source("a := 1\nb := 1").unwrap();
        let ones = chunk
            .constants
            .iter()
            .filter(|c| c.equals(&Value::Number(1.0)))
            .count();
        assert_eq!(ones, 1);
    }

    #[test]
    fn test_declare_emits_declare_local() {
        let chunk = compile_source("a := 1").unwrap();
        assert_eq!(ops_of(&chunk), vec![Op::Constant, Op::DeclareLocal]);
    }

    #[test]
    fn test_reassign_emits_set_local() {
        let chunk = compile_source("a := 1\na = 2").unwrap();
        assert_eq!(
            ops_of(&chunk),
            vec![Op::Constant, Op::DeclareLocal, Op::Constant, Op::SetLocal]
        );
    }

    #[test]
    fn test_redeclaration_in_same_scope_errors() {
        let err = compile_source("a := 1\na := 2").unwrap_err();
        assert!(err.description.contains("already declared"), "{}", err);
    }

    #[test]
    fn test_shadowing_in_inner_scope_is_allowed() {
        assert!(compile_source("a := 1\nif true { a := 2 }").is_ok());
    }

    #[test]
    fn test_undefined_reference_errors() {
        let err = compile_source("_ = missing").unwrap_err();
        assert!(err.description.contains("not defined"), "{}", err);
    }

    #[test]
    fn test_assignment_type_mismatch_errors() {
        let err = compile_source("a := 1\na = \"x\"").unwrap_err();
        assert!(err.description.contains("cannot assign"), "{}", err);
    }

    #[test]
    fn test_non_boolean_condition_errors() {
        let err = compile_source("if 1 { }").unwrap_err();
        assert!(err.description.contains("requires boolean"), "{}", err);

        let err = compile_source("while \"x\" { }").unwrap_err();
        assert!(err.description.contains("requires boolean"), "{}", err);
    }

    #[test]
    fn test_calling_non_function_errors() {
        let err = compile_source("a := 1\na()").unwrap_err();
        assert!(err.description.contains("cannot call"), "{}", err);
    }

    #[test]
    fn test_arity_mismatch_errors() {
        let err = compile_source("write(\"a\", \"b\")").unwrap_err();
        assert!(err.description.contains("wrong argument count"), "{}", err);
    }

    #[test]
    fn test_argument_type_mismatch_errors() {
        let err = compile_source("write(1)").unwrap_err();
        assert!(err.description.contains("wrong type signature"), "{}", err);
    }

    #[test]
    fn test_void_result_warning() {
        let mut compiler = Compiler::new("");
        compile_into(
            &mut compiler,
            "func f() number { return 1 }\nf()",
        )
        .unwrap();
        assert_eq!(compiler.warnings.len(), 1);
        assert!(compiler.warnings[0].description.contains("void result"));
    }

    #[test]
    fn test_keeping_result_produces_no_warning() {
        let mut compiler = Compiler::new("");
        compile_into(&mut compiler, "func f() number { return 1 }\na := f()").unwrap();
        assert!(compiler.warnings.is_empty());
    }

    #[test]
    fn test_if_else_jump_shape() {
        let chunk = compile_source("if true { } else { }").unwrap();
        // TRUE, JUMP_FALSE over then, then-block, JUMP over else, else-block
        let ops = ops_of(&chunk);
        assert_eq!(
            ops,
            vec![
                Op::True,
                Op::JumpFalse,
                Op::Descend,
                Op::Ascend,
                Op::Jump,
                Op::Descend,
                Op::Ascend,
            ]
        );

        // JUMP_FALSE lands past the unconditional jump
        assert_eq!(chunk.read_u16(2), 5);
        // JUMP lands at the end
        assert_eq!(chunk.read_u16(7), 2);
    }

    #[test]
    fn test_while_loop_jumps_back_to_condition() {
        let chunk = compile_source("i := 0\nwhile i < 3 { i = i + 1 }").unwrap();
        let code = &chunk.code;

        // find the LOOP instruction and reconstruct its target
        let mut i = 0;
        let mut loop_at = None;
        while i < code.len() {
            let op = Op::from_u8(code[i]).unwrap();
            if op == Op::Loop {
                loop_at = Some(i);
            }
            i += 1 + op.operand_size();
        }

        let loop_at = loop_at.expect("loop instruction present");
        let offset = chunk.read_u16(loop_at + 1) as usize;
        // the condition starts right after the declaration (CONSTANT i, DECLARE_LOCAL i)
        assert_eq!(loop_at + 3 - offset, 4);
    }

    #[test]
    fn test_empty_list_compiles_to_new_list() {
        let chunk = compile_source("_ = []").unwrap();
        assert_eq!(ops_of(&chunk), vec![Op::NewList, Op::Pop]);
    }

    #[test]
    fn test_constant_list_is_folded() {
        let chunk = compile_source("_ = [1, 2, 3]").unwrap();
        assert_eq!(ops_of(&chunk), vec![Op::Constant, Op::Pop]);
        assert!(chunk.constants[0].equals(&Value::new_list(vec![
            Value::Number(1.0),
            Value::Number(2.0),
            Value::Number(3.0),
        ])));
    }

    #[test]
    fn test_dynamic_list_uses_form_list() {
        let chunk = compile_source("a := 1\n_ = [a, 2]").unwrap();
        assert!(ops_of(&chunk).contains(&Op::FormList));
    }

    #[test]
    fn test_string_addition_uses_concatenation() {
        let chunk = compile_source("a := \"x\"\nb := a + \"y\"").unwrap();
        assert!(ops_of(&chunk).contains(&Op::StringConcatenation));
    }

    #[test]
    fn test_list_addition_uses_concat_lists() {
        let chunk = compile_source("a := [1]\nb := a + [2]").unwrap();
        assert!(ops_of(&chunk).contains(&Op::ConcatLists));
    }

    #[test]
    fn test_function_literal_replaces_pending_constant() {
        let chunk = compile_source("func add(a: number, b: number) number { return a + b }")
            .unwrap();

        let function = chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Value::Function(f) => Some(f.clone()),
                _ => None,
            })
            .expect("function constant present");

        assert_eq!(function.name, "add");
        assert_eq!(function.parameters.len(), 2);
        assert!(!function.chunk.is_empty());
    }

    #[test]
    fn test_function_can_reference_itself() {
        assert!(compile_source(
            "func fact(n: number) number {\n\
             if n <= 1 { return 1 }\n\
             return n * fact(n - 1)\n\
             }"
        )
        .is_ok());
    }

    #[test]
    fn test_return_type_mismatch_errors() {
        let err = compile_source("func f() number { return \"x\" }").unwrap_err();
        assert!(err.description.contains("cannot return"), "{}", err);
    }

    #[test]
    fn test_list_method_inner_resolution() {
        // map over numbers with a number function type checks
        assert!(compile_source(
            "xs := [1, 2, 3]\n\
             xs.map(func(x: number) number { return x * x })"
        )
        .is_ok());

        // and a mismatched function errors
        let err = compile_source(
            "xs := [1, 2, 3]\n\
             xs.map(func(x: string) string { return x })",
        )
        .unwrap_err();
        assert!(err.description.contains("wrong type signature"), "{}", err);
    }

    #[test]
    fn test_missing_property_errors() {
        let err = compile_source("a := \"s\"\n_ = a.missing()").unwrap_err();
        assert!(err.description.contains("no property"), "{}", err);
    }

    #[test]
    fn test_composite_annotation_accepts_both_sides() {
        assert!(compile_source(
            "func f(x: number|string) nil { }\nf(1)\nf(\"a\")"
        )
        .is_ok());

        let err =
            compile_source("func f(x: number|string) nil { }\nf(true)").unwrap_err();
        assert!(err.description.contains("wrong type signature"), "{}", err);
    }

    #[test]
    fn test_mixed_list_deduces_any() {
        // a mixed literal folds and is accepted where any list is expected
        assert!(compile_source("assertEq(type([1, \"a\"]), \"list[any]\")").is_ok());
    }

    #[test]
    fn test_descend_ascend_counts_match() {
        let chunk = compile_source(
            "if true { a := 1 } else { b := 2 }\nwhile false { c := 3 }",
        )
        .unwrap();
        let ops = ops_of(&chunk);
        let descends = ops.iter().filter(|op| **op == Op::Descend).count();
        let ascends = ops.iter().filter(|op| **op == Op::Ascend).count();
        assert_eq!(descends, ascends);
        assert_eq!(descends, 3);
    }

    #[test]
    fn test_import_compiles_into_same_chunk() {
        let mut compiler = Compiler::new("");
        compiler.set_resolver(Box::new(MapResolver {
            files: HashMap::from([("util.lume", "shared := 42")]),
        }));

        compile_into(
            &mut compiler,
            "import \"util.lume\"\nassertEq(shared, 42)",
        )
        .unwrap();

        let chunk = compiler.chunk();
        assert!(ops_of(chunk).contains(&Op::DeclareLocal));
    }

    #[test]
    fn test_import_resolved_once() {
        let mut compiler = Compiler::new("");
        compiler.set_resolver(Box::new(MapResolver {
            files: HashMap::from([("util.lume", "x := 1")]),
        }));

        compile_into(
            &mut compiler,
            "import \"util.lume\"\nimport \"util.lume\"",
        )
        .unwrap();

        let declares = ops_of(compiler.chunk())
            .iter()
            .filter(|op| **op == Op::DeclareLocal)
            .count();
        assert_eq!(declares, 1);
    }

    #[test]
    fn test_recursive_import_errors() {
        let mut compiler = Compiler::new("");
        compiler.set_resolver(Box::new(MapResolver {
            files: HashMap::from([
                ("a.lume", "import \"b.lume\""),
                ("b.lume", "import \"a.lume\""),
            ]),
        }));

        let tokens = Scanner::new("import \"b.lume\"").scan_tokens().unwrap();
        let program = Parser::new(tokens).parse("a.lume").unwrap();
        let err = compiler.compile(&program).unwrap_err();
        assert!(err.description.contains("recursive imports"), "{}", err);
    }

    #[test]
    fn test_error_carries_import_trace() {
        let mut compiler = Compiler::new("");
        compiler.set_resolver(Box::new(MapResolver {
            files: HashMap::from([("bad.lume", "x := missing")]),
        }));

        let tokens = Scanner::new("import \"bad.lume\"").scan_tokens().unwrap();
        let program = Parser::new(tokens).parse("main.lume").unwrap();
        let err = compiler.compile(&program).unwrap_err();

        assert!(err.trace.contains(&"main.lume".to_string()));
        assert!(err.trace.contains(&"bad.lume".to_string()));
        // the rendered snippet points at the imported file's source
        assert!(err.render().contains("x := missing"));
    }
}
