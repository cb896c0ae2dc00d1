use crate::optimizer::ast::{AstNode, NodeKind};

const INDENT: &str = "    ";

/// Renders any node to normalized source text. Statements produce one or
/// more full lines (no trailing newline); expressions produce a single
/// fragment.
pub fn print_program(node: &AstNode) -> String {
    if node.is_expression() {
        print_expression(node, 0)
    } else {
        let mut lines = vec![];
        print_statement(node, 0, &mut lines);
        lines.join("\n")
    }
}

fn push_line(lines: &mut Vec<String>, depth: usize, text: String) {
    lines.push(format!("{}{}", INDENT.repeat(depth), text));
}

fn print_statement(node: &AstNode, depth: usize, lines: &mut Vec<String>) {
    match node.kind() {
        NodeKind::VAR_DECLARATION { .. } | NodeKind::ASSIGNMENT { .. } => {
            push_line(lines, depth, format!("{};", print_inline_statement(node)));
        }
        NodeKind::RETURN { expression } => {
            match expression {
                Some(expression) => {
                    push_line(lines, depth, format!("return {};", print_expression(expression, 0)))
                }
                None => push_line(lines, depth, "return;".to_string()),
            }
        }
        NodeKind::SCOPE_BLOCK(statements) => {
            push_line(lines, depth, "{".to_string());
            for statement in statements {
                print_statement(statement, depth + 1, lines);
            }
            push_line(lines, depth, "}".to_string());
        }
        NodeKind::BRANCH { condition, if_branch, else_branch } => {
            push_line(lines, depth, format!("if ({}) {{", print_expression(condition, 0)));
            print_block_body(if_branch, depth, lines);
            match else_branch {
                Some(else_branch) => {
                    push_line(lines, depth, "} else {".to_string());
                    print_block_body(else_branch, depth, lines);
                    push_line(lines, depth, "}".to_string());
                }
                None => push_line(lines, depth, "}".to_string()),
            }
        }
        NodeKind::FOR_LOOP { initializer, condition, update, body } => {
            push_line(lines, depth, format!(
                "for ({}; {}; {}) {{",
                print_statement_list_inline(initializer),
                print_expression(condition, 0),
                print_statement_list_inline(update),
            ));
            print_block_body(body, depth, lines);
            push_line(lines, depth, "}".to_string());
        }
        NodeKind::WHILE_LOOP { condition, body } => {
            push_line(lines, depth, format!("while ({}) {{", print_expression(condition, 0)));
            print_block_body(body, depth, lines);
            push_line(lines, depth, "}".to_string());
        }
        NodeKind::FUNCTION { return_type, identifier, parameters, body } => {
            let parameters: Vec<String> = parameters.iter()
                .map(|parameter| print_inline_statement(parameter))
                .collect();
            push_line(lines, depth, format!(
                "{} {}({}) {{", return_type, identifier, parameters.join(", ")
            ));
            print_block_body(body, depth, lines);
            push_line(lines, depth, "}".to_string());
        }
        NodeKind::PARAMETER { .. } => {
            push_line(lines, depth, print_inline_statement(node));
        }
        // Expressions reached through the statement path are printed flat.
        _ => push_line(lines, depth, format!("{};", print_expression(node, 0))),
    }
}

/// Prints a block's statements at the next indent level without emitting the
/// surrounding braces; control-flow headers own those.
fn print_block_body(node: &AstNode, depth: usize, lines: &mut Vec<String>) {
    match node.kind() {
        NodeKind::SCOPE_BLOCK(statements) => {
            for statement in statements {
                print_statement(statement, depth + 1, lines);
            }
        }
        _ => print_statement(node, depth + 1, lines),
    }
}

/// Statement rendering without the trailing semicolon, for loop headers and
/// parameter lists.
fn print_inline_statement(node: &AstNode) -> String {
    match node.kind() {
        NodeKind::VAR_DECLARATION { datatype, identifier, expression } => match expression {
            Some(expression) => format!("{} {} = {}", datatype, identifier, print_expression(expression, 0)),
            None => format!("{} {}", datatype, identifier),
        },
        NodeKind::ASSIGNMENT { target, expression } => {
            format!("{} = {}", print_expression(target, 0), print_expression(expression, 0))
        }
        NodeKind::PARAMETER { datatype, identifier } => format!("{} {}", datatype, identifier),
        _ => print_expression(node, 0),
    }
}

/// Renders the statements of a loop header block, comma separated.
fn print_statement_list_inline(node: &AstNode) -> String {
    match node.kind() {
        NodeKind::SCOPE_BLOCK(statements) => {
            let rendered: Vec<String> = statements.iter()
                .map(|statement| print_inline_statement(statement))
                .collect();
            rendered.join(", ")
        }
        _ => print_inline_statement(node),
    }
}

fn print_expression(node: &AstNode, min_precedence: u8) -> String {
    match node.kind() {
        NodeKind::LITERAL(literal) => literal.to_string(),
        NodeKind::IDENTIFIER(name) => name.clone(),
        NodeKind::BINARY_OP { op, lhs, rhs } => {
            let precedence = op.precedence();
            let text = format!(
                "{} {} {}",
                print_expression(lhs, precedence),
                op.symbol(),
                print_expression(rhs, precedence + 1),
            );
            if precedence < min_precedence {
                format!("({})", text)
            } else {
                text
            }
        }
        NodeKind::UNARY_OP { op, expression } => {
            format!("{}{}", op.symbol(), print_expression(expression, u8::MAX))
        }
        NodeKind::INDEX_ACCESS { target, index } => {
            format!("{}[{}]", print_expression(target, u8::MAX), print_expression(index, 0))
        }
        NodeKind::EXPRESSION_LIST(items) => {
            let rendered: Vec<String> = items.iter()
                .map(|item| match item {
                    Some(item) => print_expression(item, 0),
                    None => "none".to_string(),
                })
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
        NodeKind::FUNC_CALL { function, arguments } => {
            let name = function.identifier_name().unwrap_or("<function>");
            let arguments: Vec<String> = arguments.iter()
                .map(|argument| print_expression(argument, 0))
                .collect();
            format!("{}({})", name, arguments.join(", "))
        }
        NodeKind::EXTERNAL_CALL { identifier, arguments } => {
            let arguments: Vec<String> = arguments.iter()
                .map(|argument| print_expression(argument, 0))
                .collect();
            format!("{}({})", identifier, arguments.join(", "))
        }
        // Statements reached through the expression path render flat on one
        // line; this only happens in diagnostics.
        _ => {
            let mut lines = vec![];
            print_statement(node, 0, &mut lines);
            lines.join(" ")
        }
    }
}
