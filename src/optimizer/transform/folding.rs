use crate::optimizer::ast::{BinaryOperation, Literal, UnaryOperation};
use crate::optimizer::error::ProgramError;

/// Applies a binary operator to two literal operands at compile time.
///
/// Returns `Ok(None)` when the combination is not foldable; that includes
/// division and modulo by zero, which the engine recovers from locally by
/// leaving the expression for the runtime. Operands of differing primitive
/// type are a fatal type mismatch: implicit conversions are not applied.
pub fn fold_binary(op: BinaryOperation, lhs: &Literal, rhs: &Literal) -> Result<Option<Literal>, ProgramError> {
    let op = op.plaintext_equivalent();
    let folded = match (lhs, rhs) {
        (Literal::INT(a), Literal::INT(b)) => fold_int(op, *a, *b),
        (Literal::BOOL(a), Literal::BOOL(b)) => fold_bool(op, *a, *b),
        (Literal::FLOAT(a), Literal::FLOAT(b)) => fold_float(op, *a as f64, *b as f64)
            .map(|literal| match literal {
                Literal::DOUBLE(value) => Literal::FLOAT(value as f32),
                other => other,
            }),
        (Literal::DOUBLE(a), Literal::DOUBLE(b)) => fold_float(op, *a, *b),
        (Literal::CHAR(a), Literal::CHAR(b)) => fold_char(op, *a, *b),
        (Literal::STRING(a), Literal::STRING(b)) => fold_string(op, a, b),
        _ => {
            return Err(ProgramError::type_mismatch(
                op.symbol(),
                lhs.type_name(),
                rhs.type_name(),
            ));
        }
    };
    Ok(folded)
}

/// Applies a unary operator to a literal operand at compile time.
pub fn fold_unary(op: UnaryOperation, operand: &Literal) -> Option<Literal> {
    match (op, operand) {
        (UnaryOperation::LOGICAL_NOT, Literal::BOOL(value)) => Some(Literal::BOOL(!value)),
        (UnaryOperation::BITWISE_NOT, Literal::BOOL(value)) => Some(Literal::BOOL(!value)),
        (UnaryOperation::BITWISE_NOT, Literal::INT(value)) => Some(Literal::INT(!value)),
        _ => None,
    }
}

fn fold_int(op: BinaryOperation, a: i64, b: i64) -> Option<Literal> {
    Some(match op {
        BinaryOperation::ADD => Literal::INT(a.wrapping_add(b)),
        BinaryOperation::SUB => Literal::INT(a.wrapping_sub(b)),
        BinaryOperation::MUL => Literal::INT(a.wrapping_mul(b)),
        BinaryOperation::DIV => {
            if b == 0 {
                return None;
            }
            Literal::INT(a.wrapping_div(b))
        }
        BinaryOperation::MOD => {
            if b == 0 {
                return None;
            }
            Literal::INT(a.wrapping_rem(b))
        }
        BinaryOperation::EQUAL => Literal::BOOL(a == b),
        BinaryOperation::NOT_EQUAL => Literal::BOOL(a != b),
        BinaryOperation::GREATER_THAN => Literal::BOOL(a > b),
        BinaryOperation::LESS_THAN => Literal::BOOL(a < b),
        BinaryOperation::GREATER_EQUAL => Literal::BOOL(a >= b),
        BinaryOperation::LESS_EQUAL => Literal::BOOL(a <= b),
        BinaryOperation::BITWISE_AND => Literal::INT(a & b),
        BinaryOperation::BITWISE_OR => Literal::INT(a | b),
        BinaryOperation::BITWISE_XOR => Literal::INT(a ^ b),
        _ => return None,
    })
}

fn fold_bool(op: BinaryOperation, a: bool, b: bool) -> Option<Literal> {
    Some(match op {
        BinaryOperation::LOGICAL_AND | BinaryOperation::BITWISE_AND => Literal::BOOL(a && b),
        BinaryOperation::LOGICAL_OR | BinaryOperation::BITWISE_OR => Literal::BOOL(a || b),
        BinaryOperation::LOGICAL_XOR | BinaryOperation::BITWISE_XOR => Literal::BOOL(a ^ b),
        BinaryOperation::EQUAL => Literal::BOOL(a == b),
        BinaryOperation::NOT_EQUAL => Literal::BOOL(a != b),
        _ => return None,
    })
}

fn fold_float(op: BinaryOperation, a: f64, b: f64) -> Option<Literal> {
    Some(match op {
        BinaryOperation::ADD => Literal::DOUBLE(a + b),
        BinaryOperation::SUB => Literal::DOUBLE(a - b),
        BinaryOperation::MUL => Literal::DOUBLE(a * b),
        // IEEE division is total; only the integral zero cases are declined.
        BinaryOperation::DIV => Literal::DOUBLE(a / b),
        BinaryOperation::EQUAL => Literal::BOOL(a == b),
        BinaryOperation::NOT_EQUAL => Literal::BOOL(a != b),
        BinaryOperation::GREATER_THAN => Literal::BOOL(a > b),
        BinaryOperation::LESS_THAN => Literal::BOOL(a < b),
        BinaryOperation::GREATER_EQUAL => Literal::BOOL(a >= b),
        BinaryOperation::LESS_EQUAL => Literal::BOOL(a <= b),
        _ => return None,
    })
}

fn fold_char(op: BinaryOperation, a: char, b: char) -> Option<Literal> {
    Some(match op {
        BinaryOperation::EQUAL => Literal::BOOL(a == b),
        BinaryOperation::NOT_EQUAL => Literal::BOOL(a != b),
        BinaryOperation::GREATER_THAN => Literal::BOOL(a > b),
        BinaryOperation::LESS_THAN => Literal::BOOL(a < b),
        BinaryOperation::GREATER_EQUAL => Literal::BOOL(a >= b),
        BinaryOperation::LESS_EQUAL => Literal::BOOL(a <= b),
        _ => return None,
    })
}

fn fold_string(op: BinaryOperation, a: &str, b: &str) -> Option<Literal> {
    Some(match op {
        BinaryOperation::EQUAL => Literal::BOOL(a == b),
        BinaryOperation::NOT_EQUAL => Literal::BOOL(a != b),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_folds() {
        assert_eq!(
            fold_binary(BinaryOperation::MUL, &Literal::INT(22), &Literal::INT(11)).unwrap(),
            Some(Literal::INT(242))
        );
        assert_eq!(
            fold_binary(BinaryOperation::SUB, &Literal::INT(3), &Literal::INT(3)).unwrap(),
            Some(Literal::INT(0))
        );
    }

    #[test]
    fn fhe_aliases_fold_like_arithmetic() {
        assert_eq!(
            fold_binary(BinaryOperation::FHE_ADD, &Literal::INT(1), &Literal::INT(2)).unwrap(),
            Some(Literal::INT(3))
        );
    }

    #[test]
    fn division_by_zero_is_declined_not_fatal() {
        assert_eq!(
            fold_binary(BinaryOperation::DIV, &Literal::INT(6), &Literal::INT(0)).unwrap(),
            None
        );
        assert_eq!(
            fold_binary(BinaryOperation::MOD, &Literal::INT(6), &Literal::INT(0)).unwrap(),
            None
        );
    }

    #[test]
    fn comparisons_yield_bools() {
        assert_eq!(
            fold_binary(BinaryOperation::LESS_THAN, &Literal::INT(0), &Literal::INT(3)).unwrap(),
            Some(Literal::BOOL(true))
        );
    }

    #[test]
    fn mismatched_primitive_types_are_fatal() {
        let result = fold_binary(BinaryOperation::ADD, &Literal::INT(1), &Literal::DOUBLE(1.0));
        assert!(result.is_err());
    }

    #[test]
    fn logical_operators_require_bools() {
        assert_eq!(
            fold_binary(BinaryOperation::LOGICAL_AND, &Literal::INT(1), &Literal::INT(1)).unwrap(),
            None
        );
        assert_eq!(
            fold_binary(BinaryOperation::LOGICAL_XOR, &Literal::BOOL(true), &Literal::BOOL(true)).unwrap(),
            Some(Literal::BOOL(false))
        );
    }

    #[test]
    fn unary_folding() {
        assert_eq!(fold_unary(UnaryOperation::LOGICAL_NOT, &Literal::BOOL(true)), Some(Literal::BOOL(false)));
        assert_eq!(fold_unary(UnaryOperation::BITWISE_NOT, &Literal::INT(0)), Some(Literal::INT(-1)));
        assert_eq!(fold_unary(UnaryOperation::LOGICAL_NOT, &Literal::INT(1)), None);
    }

    #[test]
    fn modulo_is_integral_only() {
        assert_eq!(
            fold_binary(BinaryOperation::MOD, &Literal::DOUBLE(4.0), &Literal::DOUBLE(2.0)).unwrap(),
            None
        );
    }
}
