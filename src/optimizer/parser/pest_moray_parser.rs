use std::collections::HashMap;

use crate::pest::Parser;

use super::AstParser;
use super::super::ast::{
    Ast,
    AstNode,
    BinaryOperation,
    DataType,
    Literal,
    NodeKind,
    PrimitiveDataType,
    UnaryOperation,
};

/// Moray parser parses a string into a series of tokens.
/// These tokens are defined as a Context-Free-Grammar in the src/moray.pest
/// file. The tokens generated from this parser are then formalised into the
/// generic abstract syntax tree implementation.
#[derive(Parser)]
#[grammar = "moray.pest"]
struct MorayParser;

/// PestMorayParser is a concrete AstParser.
/// It uses the pest library to generate a token sequence from a source string
/// that is then converted into an Ast. Functions must be defined before they
/// are called; calls to known functions embed the callee's definition, calls
/// to unknown names become opaque external calls. The last function defined
/// is the program entry.
pub struct PestMorayParser;

impl AstParser for PestMorayParser {
    fn default() -> Self {
        PestMorayParser
    }

    fn parse(&self, source: &str) -> Ast {
        self.parse_into_program(source)
    }
}

type FunctionTable = HashMap<String, AstNode>;

impl PestMorayParser {
    fn parse_into_program(&self, source: &str) -> Ast {
        let pairs = match MorayParser::parse(Rule::program, source) {
            Ok(pairs) => pairs,
            Err(error) => panic!("Syntax Error: {}", error),
        };

        let mut functions: FunctionTable = FunctionTable::new();
        let mut entry: Option<AstNode> = None;

        for pair in pairs {
            if pair.as_rule() != Rule::program {
                panic!("Program should start with the program rule.");
            }
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::function_definition => {
                        let function = self.parse_pair_function(inner, &functions);
                        let name = function.identifier_name()
                            .map(str::to_string)
                            .unwrap_or_default();
                        functions.insert(name, function.clone());
                        entry = Some(function);
                    }
                    Rule::EOI => {}
                    rule => panic!("Whoops! Unprocessed pest rule: {:?}", rule),
                }
            }
        }

        match entry {
            Some(root) => Ast::new(root),
            None => panic!("Program has been parsed without error but contains no function."),
        }
    }

    fn parse_pair_function(&self, pair: pest::iterators::Pair<Rule>, functions: &FunctionTable) -> AstNode {
        let mut return_type = None;
        let mut identifier = String::new();
        let mut parameters = vec![];
        let mut body = None;

        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::datatype => return_type = Some(self.parse_pair_datatype(inner)),
                Rule::identifier => identifier = inner.as_str().to_string(),
                Rule::parameter_list => {
                    for parameter in inner.into_inner() {
                        parameters.push(self.parse_pair_parameter(parameter));
                    }
                }
                Rule::scope_block => body = Some(self.parse_pair_scope_block(inner, functions)),
                rule => panic!("Whoops! Unprocessed function rule: {:?}", rule),
            }
        }

        AstNode::new(NodeKind::FUNCTION {
            return_type: return_type.unwrap_or_else(|| panic!("Function '{}' is missing a return type.", identifier)),
            identifier,
            parameters,
            body: Box::new(body.unwrap_or_else(AstNode::empty_block)),
        })
    }

    fn parse_pair_parameter(&self, pair: pest::iterators::Pair<Rule>) -> AstNode {
        let mut inner = pair.into_inner();
        let datatype = self.parse_pair_datatype(inner.next().unwrap());
        let identifier = inner.next().unwrap().as_str().to_string();
        AstNode::new(NodeKind::PARAMETER { datatype, identifier })
    }

    fn parse_pair_datatype(&self, pair: pest::iterators::Pair<Rule>) -> DataType {
        let mut secret = false;
        let mut primitive = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::secret_qualifier => secret = true,
                Rule::primitive_type => {
                    primitive = PrimitiveDataType::parse(inner.as_str());
                }
                rule => panic!("Whoops! Unprocessed datatype rule: {:?}", rule),
            }
        }
        let primitive = primitive.unwrap_or_else(|| panic!("Datatype is missing its primitive."));
        DataType { primitive, secret }
    }

    fn parse_pair_scope_block(&self, pair: pest::iterators::Pair<Rule>, functions: &FunctionTable) -> AstNode {
        let statements = pair.into_inner()
            .map(|statement| self.parse_pair_statement(statement, functions))
            .collect();
        AstNode::new(NodeKind::SCOPE_BLOCK(statements))
    }

    fn parse_pair_statement(&self, pair: pest::iterators::Pair<Rule>, functions: &FunctionTable) -> AstNode {
        match pair.as_rule() {
            Rule::variable_declaration | Rule::for_declaration => {
                self.parse_pair_variable_declaration(pair, functions)
            }
            Rule::assign_statement | Rule::for_assignment => {
                self.parse_pair_assignment(pair, functions)
            }
            Rule::if_statement => self.parse_pair_if_statement(pair, functions),
            Rule::for_statement => self.parse_pair_for_statement(pair, functions),
            Rule::while_statement => self.parse_pair_while_statement(pair, functions),
            Rule::return_statement => self.parse_pair_return_statement(pair, functions),
            rule => panic!("Whoops! Unprocessed statement rule: {:?}", rule),
        }
    }

    fn parse_pair_variable_declaration(&self, pair: pest::iterators::Pair<Rule>, functions: &FunctionTable) -> AstNode {
        let mut inner = pair.into_inner();
        let datatype = self.parse_pair_datatype(inner.next().unwrap());
        let identifier = inner.next().unwrap().as_str().to_string();
        let expression = inner.next()
            .map(|value| Box::new(self.parse_pair_expression(value, functions)));
        AstNode::new(NodeKind::VAR_DECLARATION { datatype, identifier, expression })
    }

    fn parse_pair_assignment(&self, pair: pest::iterators::Pair<Rule>, functions: &FunctionTable) -> AstNode {
        let mut inner = pair.into_inner();
        let target = self.parse_pair_assignment_target(inner.next().unwrap(), functions);
        let expression = self.parse_pair_expression(inner.next().unwrap(), functions);
        AstNode::new(NodeKind::ASSIGNMENT {
            target: Box::new(target),
            expression: Box::new(expression),
        })
    }

    fn parse_pair_assignment_target(&self, pair: pest::iterators::Pair<Rule>, functions: &FunctionTable) -> AstNode {
        let mut inner = pair.into_inner();
        let identifier = AstNode::identifier(inner.next().unwrap().as_str());
        match inner.next() {
            Some(index) => AstNode::new(NodeKind::INDEX_ACCESS {
                target: Box::new(identifier),
                index: Box::new(self.parse_pair_expression(index, functions)),
            }),
            None => identifier,
        }
    }

    fn parse_pair_if_statement(&self, pair: pest::iterators::Pair<Rule>, functions: &FunctionTable) -> AstNode {
        let mut condition = None;
        let mut blocks = vec![];
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::kw_if | Rule::kw_else => {}
                Rule::scope_block => blocks.push(self.parse_pair_scope_block(inner, functions)),
                _ => condition = Some(self.parse_pair_expression(inner, functions)),
            }
        }
        let mut blocks = blocks.into_iter();
        AstNode::new(NodeKind::BRANCH {
            condition: Box::new(condition.unwrap_or_else(|| panic!("If statement is missing its condition."))),
            if_branch: Box::new(blocks.next().unwrap_or_else(AstNode::empty_block)),
            else_branch: blocks.next().map(Box::new),
        })
    }

    fn parse_pair_for_statement(&self, pair: pest::iterators::Pair<Rule>, functions: &FunctionTable) -> AstNode {
        let mut initializer = None;
        let mut condition = None;
        let mut update = None;
        let mut body = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::kw_for => {}
                Rule::for_initializer => {
                    let statements = inner.into_inner()
                        .map(|statement| self.parse_pair_statement(statement, functions))
                        .collect();
                    initializer = Some(AstNode::new(NodeKind::SCOPE_BLOCK(statements)));
                }
                Rule::for_update => {
                    let statements = inner.into_inner()
                        .map(|statement| self.parse_pair_statement(statement, functions))
                        .collect();
                    update = Some(AstNode::new(NodeKind::SCOPE_BLOCK(statements)));
                }
                Rule::scope_block => body = Some(self.parse_pair_scope_block(inner, functions)),
                _ => condition = Some(self.parse_pair_expression(inner, functions)),
            }
        }
        AstNode::new(NodeKind::FOR_LOOP {
            initializer: Box::new(initializer.unwrap_or_else(AstNode::empty_block)),
            condition: Box::new(condition.unwrap_or_else(|| panic!("For statement is missing its condition."))),
            update: Box::new(update.unwrap_or_else(AstNode::empty_block)),
            body: Box::new(body.unwrap_or_else(AstNode::empty_block)),
        })
    }

    fn parse_pair_while_statement(&self, pair: pest::iterators::Pair<Rule>, functions: &FunctionTable) -> AstNode {
        let mut condition = None;
        let mut body = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::kw_while => {}
                Rule::scope_block => body = Some(self.parse_pair_scope_block(inner, functions)),
                _ => condition = Some(self.parse_pair_expression(inner, functions)),
            }
        }
        AstNode::new(NodeKind::WHILE_LOOP {
            condition: Box::new(condition.unwrap_or_else(|| panic!("While statement is missing its condition."))),
            body: Box::new(body.unwrap_or_else(AstNode::empty_block)),
        })
    }

    fn parse_pair_return_statement(&self, pair: pest::iterators::Pair<Rule>, functions: &FunctionTable) -> AstNode {
        let expression = pair.into_inner()
            .find(|inner| inner.as_rule() != Rule::kw_return)
            .map(|value| Box::new(self.parse_pair_expression(value, functions)));
        AstNode::new(NodeKind::RETURN { expression })
    }

    fn parse_pair_expression(&self, pair: pest::iterators::Pair<Rule>, functions: &FunctionTable) -> AstNode {
        match pair.as_rule() {
            Rule::logic_or | Rule::logic_xor | Rule::logic_and
            | Rule::bit_or | Rule::bit_xor | Rule::bit_and
            | Rule::equality | Rule::comparison
            | Rule::term | Rule::factor => self.parse_pair_binary_chain(pair, functions),
            Rule::unary => self.parse_pair_unary(pair, functions),
            Rule::grouped => {
                let inner = pair.into_inner().next()
                    .unwrap_or_else(|| panic!("Empty parenthesised expression."));
                self.parse_pair_expression(inner, functions)
            }
            Rule::integer | Rule::decimal | Rule::boolean
            | Rule::char_literal | Rule::string_literal => Self::parse_pair_literal(pair),
            Rule::identifier => AstNode::identifier(pair.as_str()),
            Rule::function_call => self.parse_pair_call(pair, functions),
            Rule::index_access => {
                let mut inner = pair.into_inner();
                let target = AstNode::identifier(inner.next().unwrap().as_str());
                let index = self.parse_pair_expression(inner.next().unwrap(), functions);
                AstNode::new(NodeKind::INDEX_ACCESS {
                    target: Box::new(target),
                    index: Box::new(index),
                })
            }
            Rule::expression_list => {
                let items = pair.into_inner()
                    .map(|element| self.parse_pair_list_element(element, functions))
                    .collect();
                AstNode::new(NodeKind::EXPRESSION_LIST(items))
            }
            rule => panic!("Whoops! Unprocessed expression rule: {:?}", rule),
        }
    }

    /// Folds an operator chain such as `a - b - c` left associatively.
    fn parse_pair_binary_chain(&self, pair: pest::iterators::Pair<Rule>, functions: &FunctionTable) -> AstNode {
        let mut inner = pair.into_inner();
        let first = inner.next()
            .unwrap_or_else(|| panic!("Binary expression chain is empty."));
        let mut node = self.parse_pair_expression(first, functions);

        while let Some(operator) = inner.next() {
            let rhs = inner.next()
                .unwrap_or_else(|| panic!("Operator '{}' is missing its right operand.", operator.as_str()));
            let op = Self::binary_operation_from_symbol(operator.as_str());
            node = AstNode::binary(node, op, self.parse_pair_expression(rhs, functions));
        }
        node
    }

    fn parse_pair_unary(&self, pair: pest::iterators::Pair<Rule>, functions: &FunctionTable) -> AstNode {
        let mut inner = pair.into_inner();
        let first = inner.next()
            .unwrap_or_else(|| panic!("Empty unary expression."));
        if first.as_rule() == Rule::unary_op {
            let op = match first.as_str() {
                "!" => UnaryOperation::LOGICAL_NOT,
                "~" => UnaryOperation::BITWISE_NOT,
                symbol => panic!("Whoops! Unprocessed unary operator: {}", symbol),
            };
            let operand = self.parse_pair_expression(inner.next().unwrap(), functions);
            AstNode::new(NodeKind::UNARY_OP {
                op,
                expression: Box::new(operand),
            })
        } else {
            self.parse_pair_expression(first, functions)
        }
    }

    fn parse_pair_call(&self, pair: pest::iterators::Pair<Rule>, functions: &FunctionTable) -> AstNode {
        let mut inner = pair.into_inner();
        let name = inner.next().unwrap().as_str().to_string();
        let arguments: Vec<AstNode> = inner.next()
            .map(|list| {
                list.into_inner()
                    .map(|argument| self.parse_pair_expression(argument, functions))
                    .collect()
            })
            .unwrap_or_default();

        match functions.get(&name) {
            Some(function) => AstNode::new(NodeKind::FUNC_CALL {
                function: Box::new(function.clone_with_fresh_ids()),
                arguments,
            }),
            None => AstNode::new(NodeKind::EXTERNAL_CALL { identifier: name, arguments }),
        }
    }

    fn parse_pair_list_element(&self, pair: pest::iterators::Pair<Rule>, functions: &FunctionTable) -> Option<AstNode> {
        let inner = pair.into_inner().next()
            .unwrap_or_else(|| panic!("Empty expression list element."));
        match inner.as_rule() {
            Rule::none_placeholder => None,
            _ => Some(self.parse_pair_expression(inner, functions)),
        }
    }

    /// Parses a pest token pair into an AST literal
    fn parse_pair_literal(pair: pest::iterators::Pair<Rule>) -> AstNode {
        let literal = match pair.as_rule() {
            Rule::integer => Literal::INT(pair.as_str().parse().unwrap()),
            Rule::decimal => {
                let text = pair.as_str();
                if let Some(stripped) = text.strip_suffix('f') {
                    Literal::FLOAT(stripped.parse().unwrap())
                } else {
                    Literal::DOUBLE(text.parse().unwrap())
                }
            }
            Rule::boolean => Literal::BOOL(pair.as_str().parse().unwrap()),
            Rule::char_literal => {
                let text = pair.as_str();
                Literal::CHAR(text.chars().nth(1).unwrap())
            }
            Rule::string_literal => {
                let text = pair.as_str();
                Literal::STRING(text[1..text.len() - 1].to_string())
            }
            rule => panic!("Whoops! Unprocessed literal rule: {:?}", rule),
        };
        AstNode::literal(literal)
    }

    fn binary_operation_from_symbol(symbol: &str) -> BinaryOperation {
        match symbol {
            "+" => BinaryOperation::ADD,
            "-" => BinaryOperation::SUB,
            "*" => BinaryOperation::MUL,
            "/" => BinaryOperation::DIV,
            "%" => BinaryOperation::MOD,
            "+++" => BinaryOperation::FHE_ADD,
            "---" => BinaryOperation::FHE_SUB,
            "***" => BinaryOperation::FHE_MUL,
            "==" => BinaryOperation::EQUAL,
            "!=" => BinaryOperation::NOT_EQUAL,
            ">" => BinaryOperation::GREATER_THAN,
            "<" => BinaryOperation::LESS_THAN,
            ">=" => BinaryOperation::GREATER_EQUAL,
            "<=" => BinaryOperation::LESS_EQUAL,
            "&&" => BinaryOperation::LOGICAL_AND,
            "||" => BinaryOperation::LOGICAL_OR,
            "^^" => BinaryOperation::LOGICAL_XOR,
            "&" => BinaryOperation::BITWISE_AND,
            "|" => BinaryOperation::BITWISE_OR,
            "^" => BinaryOperation::BITWISE_XOR,
            _ => panic!("Whoops! Unprocessed binary operator: {}", symbol),
        }
    }
}

/// Moray Parser Module Tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::printer::print_program;

    fn parse(source: &str) -> Ast {
        <PestMorayParser as AstParser>::default().parse(source)
    }

    fn roundtrip(source: &str) -> String {
        print_program(parse(source).root())
    }

    #[test]
    fn parse_print_roundtrip_is_stable() {
        let source = "int f(secret int a) {\n    return a * (4 * 7);\n}";
        assert_eq!(roundtrip(source), source);
    }

    #[test]
    fn operator_precedence_matches_c() {
        assert_eq!(
            roundtrip("int f() {\n    return 1 + 2 * 3;\n}"),
            "int f() {\n    return 1 + 2 * 3;\n}"
        );
        assert_eq!(
            roundtrip("int f() {\n    return (1 + 2) * 3;\n}"),
            "int f() {\n    return (1 + 2) * 3;\n}"
        );
    }

    #[test]
    fn fhe_operators_parse() {
        let ast = parse("secret int f(secret int a, secret int b) { return a *** b +++ a; }");
        let printed = print_program(ast.root());
        assert!(printed.contains("a *** b +++ a"));
    }

    #[test]
    fn expression_lists_accept_none_placeholders() {
        let ast = parse("int f() { return {none, 1, none, 2 * 3}; }");
        let printed = print_program(ast.root());
        assert!(printed.contains("{none, 1, none, 6}") || printed.contains("{none, 1, none, 2 * 3}"));
    }

    #[test]
    fn keywords_do_not_swallow_identifier_prefixes() {
        let ast = parse("int f() { int formula = 1; return formula; }");
        let printed = print_program(ast.root());
        assert!(printed.contains("int formula = 1;"));
    }

    #[test]
    fn known_calls_embed_their_callee() {
        let ast = parse("int g(int x) { return x + 1; }\nint f() { return g(2); }");
        let root = ast.root();
        let printed = print_program(root);
        assert!(printed.starts_with("int f()"));

        fn find_call(node: &AstNode) -> bool {
            if let NodeKind::FUNC_CALL { function, .. } = node.kind() {
                return matches!(function.kind(), NodeKind::FUNCTION { identifier, .. } if identifier == "g");
            }
            node.children().iter().any(|child| find_call(child))
        }
        assert!(find_call(root));
    }

    #[test]
    fn unknown_calls_become_external() {
        let ast = parse("int f() { return rotate(2); }");
        fn find_external(node: &AstNode) -> bool {
            if let NodeKind::EXTERNAL_CALL { identifier, .. } = node.kind() {
                return identifier == "rotate";
            }
            node.children().iter().any(|child| find_external(child))
        }
        assert!(find_external(ast.root()));
    }

    #[test]
    fn for_loops_with_multi_statement_headers() {
        let source = "int f(int n) {\n    int x;\n    for (int i = 0, x = 0; i < n; ) {\n        x = x + 1;\n    }\n    return x;\n}";
        assert_eq!(roundtrip(source), source);
    }

    #[test]
    #[should_panic(expected = "Syntax Error")]
    fn syntax_errors_panic() {
        parse("int f( { }");
    }
}
