//! Parser tests.

use crate::ast::{BinaryOp, Expr, ExprKind, Program, Stmt, StmtKind, UnaryOp};
use crate::error::ParseError;
use crate::lexer::Scanner;
use crate::parser::Parser;
use crate::types::TypeSignature;

fn parse(source: &str) -> Program {
    try_parse(source).expect("parse should succeed")
}

fn try_parse(source: &str) -> Result<Program, ParseError> {
    let tokens = Scanner::new(source).scan_tokens().expect("lex");
    Parser::new(tokens).parse("test.lume")
}

fn first_stmt(source: &str) -> Stmt {
    parse(source).statements.into_iter().next().expect("one statement")
}

fn assign_value(source: &str) -> Expr {
    match first_stmt(source).kind {
        StmtKind::Assign { value, .. } => value,
        other => panic!("expected assignment, got {:?}", other),
    }
}

#[test]
fn test_empty_program() {
    let program = parse("");
    assert!(program.statements.is_empty());
    assert!(program.imports.is_empty());
}

#[test]
fn test_imports_are_collected() {
    let program = parse("import \"a.lume\"\nimport \"b.lume\"\nx := 1");
    assert_eq!(program.imports, vec!["a.lume", "b.lume"]);
    assert_eq!(program.statements.len(), 1);
}

#[test]
fn test_declaration_vs_assignment() {
    match first_stmt("a := 1").kind {
        StmtKind::Assign { declare, .. } => assert!(declare),
        other => panic!("unexpected {:?}", other),
    }
    match first_stmt("a = 1").kind {
        StmtKind::Assign { declare, .. } => assert!(!declare),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_precedence() {
    // 1 + 2 * 3 parses as 1 + (2 * 3)
    let value = assign_value("_ = 1 + 2 * 3");
    let ExprKind::Binary {
        op: BinaryOp::Add,
        right,
        ..
    } = value.kind
    else {
        panic!("expected addition at the top");
    };
    assert!(matches!(
        right.kind,
        ExprKind::Binary {
            op: BinaryOp::Multiply,
            ..
        }
    ));
}

#[test]
fn test_grouping_overrides_precedence() {
    let value = assign_value("_ = (1 + 2) * 3");
    let ExprKind::Binary {
        op: BinaryOp::Multiply,
        left,
        ..
    } = value.kind
    else {
        panic!("expected multiplication at the top");
    };
    assert!(matches!(
        left.kind,
        ExprKind::Binary {
            op: BinaryOp::Add,
            ..
        }
    ));
}

#[test]
fn test_unary_operators() {
    let value = assign_value("_ = -1");
    assert!(matches!(
        value.kind,
        ExprKind::Unary {
            op: UnaryOp::Negate,
            ..
        }
    ));

    let value = assign_value("_ = !true");
    assert!(matches!(
        value.kind,
        ExprKind::Unary {
            op: UnaryOp::Not,
            ..
        }
    ));
}

#[test]
fn test_comparison_and_logic() {
    let value = assign_value("_ = a < 2 && b == 3");
    let ExprKind::Binary {
        op: BinaryOp::And,
        left,
        right,
    } = value.kind
    else {
        panic!("expected && at the top");
    };
    assert!(matches!(left.kind, ExprKind::Binary { op: BinaryOp::Less, .. }));
    assert!(matches!(
        right.kind,
        ExprKind::Binary {
            op: BinaryOp::Equal,
            ..
        }
    ));
}

#[test]
fn test_list_literals() {
    let value = assign_value("_ = [1, 2, 3]");
    let ExprKind::List { items, content } = value.kind else {
        panic!("expected a list literal");
    };
    assert_eq!(items.len(), 3);
    assert!(content.is_none());

    // empty literals are annotated with `any`
    let value = assign_value("_ = []");
    let ExprKind::List { items, content } = value.kind else {
        panic!("expected a list literal");
    };
    assert!(items.is_empty());
    assert_eq!(content, Some(TypeSignature::Any));
}

#[test]
fn test_statement_call_discards_result() {
    let stmt = first_stmt("write(\"hi\")");
    let StmtKind::Expression(expr) = stmt.kind else {
        panic!("expected an expression statement");
    };
    let ExprKind::Call { keep, .. } = expr.kind else {
        panic!("expected a call");
    };
    assert!(!keep);
}

#[test]
fn test_call_in_expression_keeps_result() {
    let value = assign_value("a := f()");
    let ExprKind::Call { keep, .. } = value.kind else {
        panic!("expected a call");
    };
    assert!(keep);
}

#[test]
fn test_property_chain() {
    let stmt = first_stmt("xs.map(f)");
    let StmtKind::Expression(expr) = stmt.kind else {
        panic!("expected an expression statement");
    };
    let ExprKind::Call { source, keep, .. } = expr.kind else {
        panic!("expected a call");
    };
    assert!(!keep);
    assert!(matches!(source.kind, ExprKind::Access { .. }));
}

#[test]
fn test_chained_calls_keep_intermediate_results() {
    let stmt = first_stmt("s.split(\",\").length()");
    let StmtKind::Expression(expr) = stmt.kind else {
        panic!("expected an expression statement");
    };
    // outermost call is the statement-level one and discards its result
    let ExprKind::Call { source, keep, .. } = expr.kind else {
        panic!("expected a call");
    };
    assert!(!keep);

    // the inner split() call keeps its result for the chain
    let ExprKind::Access { source, .. } = source.kind else {
        panic!("expected access");
    };
    let ExprKind::Call { keep, .. } = source.kind else {
        panic!("expected inner call");
    };
    assert!(keep);
}

#[test]
fn test_if_else_chain() {
    let stmt = first_stmt("if a == 1 { } else if a == 2 { } else { }");
    let StmtKind::If { otherwise, .. } = stmt.kind else {
        panic!("expected if");
    };
    let StmtKind::If { otherwise, .. } = otherwise.expect("else-if").kind else {
        panic!("expected nested if");
    };
    assert!(matches!(
        otherwise.expect("final else").kind,
        StmtKind::Block(_)
    ));
}

#[test]
fn test_while_statement() {
    let stmt = first_stmt("while i < 3 { i = i + 1 }");
    let StmtKind::While { body, .. } = stmt.kind else {
        panic!("expected while");
    };
    assert_eq!(body.statements.len(), 1);
}

#[test]
fn test_func_statement_desugars_to_declaration() {
    let stmt = first_stmt("func add(a: number, b: number) number { return a + b }");
    let StmtKind::Assign {
        name,
        value,
        declare,
    } = stmt.kind
    else {
        panic!("expected a declaring assignment");
    };
    assert!(declare);
    assert_eq!(name, "add");

    let ExprKind::Function(literal) = value.kind else {
        panic!("expected a function literal");
    };
    assert_eq!(literal.name, "add");
    assert_eq!(literal.parameters.len(), 2);
    assert_eq!(literal.yield_signature, TypeSignature::Number);
}

#[test]
fn test_anonymous_function_literal() {
    let value = assign_value("f := func(x: number) number { return x }");
    let ExprKind::Function(literal) = value.kind else {
        panic!("expected a function literal");
    };
    assert_eq!(literal.name, "*");
}

#[test]
fn test_function_without_yield_defaults_to_nil() {
    let stmt = first_stmt("func f() { }");
    let StmtKind::Assign { value, .. } = stmt.kind else {
        panic!("expected assignment");
    };
    let ExprKind::Function(literal) = value.kind else {
        panic!("expected function literal");
    };
    assert_eq!(literal.yield_signature, TypeSignature::Nil);
}

#[test]
fn test_type_annotations() {
    let stmt = first_stmt(
        "func f(a: list[number], b: number|string, c: func(string) any) nil { }",
    );
    let StmtKind::Assign { value, .. } = stmt.kind else {
        panic!("expected assignment");
    };
    let ExprKind::Function(literal) = value.kind else {
        panic!("expected function literal");
    };

    assert_eq!(
        literal.parameters[0].signature,
        TypeSignature::List(Box::new(TypeSignature::Number))
    );
    assert!(matches!(
        literal.parameters[1].signature,
        TypeSignature::Composite(_, _)
    ));
    assert!(matches!(
        literal.parameters[2].signature,
        TypeSignature::Function(_)
    ));
}

#[test]
fn test_unsupported_type_errors() {
    let err = try_parse("func f(a: widget) nil { }").unwrap_err();
    assert!(matches!(err, ParseError::UnsupportedType(name, _) if name == "widget"));
}

#[test]
fn test_return_statement() {
    let program = parse("func f() number { return 1 + 2 }");
    assert_eq!(program.statements.len(), 1);
}

#[test]
fn test_breakpoint_statement() {
    assert!(matches!(first_stmt("breakpoint").kind, StmtKind::Breakpoint));
}

#[test]
fn test_invalid_statement_errors() {
    let err = try_parse("+ 1").unwrap_err();
    assert!(matches!(err, ParseError::InvalidStatement(_)));
}

#[test]
fn test_unclosed_block_errors() {
    assert!(try_parse("if true { a := 1").is_err());
}

#[test]
fn test_bare_expression_statement() {
    let stmt = first_stmt("a == 1");
    assert!(matches!(stmt.kind, StmtKind::Expression(_)));
}
