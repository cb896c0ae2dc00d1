use enum_assoc::Assoc;
use serde::Serialize;

/// Unary Operations are symbolic functions with one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Assoc)]
#[func(pub const fn symbol(&self) -> &'static str)]
#[allow(non_camel_case_types)]
pub enum UnaryOperation {
    /// ! <rhs>, defined on booleans
    #[assoc(symbol = "!")]
    LOGICAL_NOT,

    /// ~ <rhs>, defined on integral types
    #[assoc(symbol = "~")]
    BITWISE_NOT,
}

/// Binary Operations are symbolic functions with two arguments.
///
/// The FHE variants are semantically identical to their plain arithmetic
/// counterparts but are kept distinct so the execution runtime can map them
/// onto ciphertext instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Assoc)]
#[func(pub const fn symbol(&self) -> &'static str)]
#[func(pub const fn precedence(&self) -> u8)]
#[allow(non_camel_case_types)]
pub enum BinaryOperation {
    #[assoc(symbol = "+")]
    #[assoc(precedence = 9)]
    ADD,            // <lhs> + <rhs>
    #[assoc(symbol = "-")]
    #[assoc(precedence = 9)]
    SUB,            // <lhs> - <rhs>
    #[assoc(symbol = "*")]
    #[assoc(precedence = 10)]
    MUL,            // <lhs> * <rhs>
    #[assoc(symbol = "/")]
    #[assoc(precedence = 10)]
    DIV,            // <lhs> / <rhs>
    #[assoc(symbol = "%")]
    #[assoc(precedence = 10)]
    MOD,            // <lhs> % <rhs>

    #[assoc(symbol = "+++")]
    #[assoc(precedence = 9)]
    FHE_ADD,        // ciphertext addition
    #[assoc(symbol = "---")]
    #[assoc(precedence = 9)]
    FHE_SUB,        // ciphertext subtraction
    #[assoc(symbol = "***")]
    #[assoc(precedence = 10)]
    FHE_MUL,        // ciphertext multiplication

    #[assoc(symbol = "==")]
    #[assoc(precedence = 7)]
    EQUAL,          // <lhs> == <rhs>
    #[assoc(symbol = "!=")]
    #[assoc(precedence = 7)]
    NOT_EQUAL,      // <lhs> != <rhs>
    #[assoc(symbol = ">")]
    #[assoc(precedence = 8)]
    GREATER_THAN,   // <lhs> >  <rhs>
    #[assoc(symbol = "<")]
    #[assoc(precedence = 8)]
    LESS_THAN,      // <lhs> <  <rhs>
    #[assoc(symbol = ">=")]
    #[assoc(precedence = 8)]
    GREATER_EQUAL,  // <lhs> >= <rhs>
    #[assoc(symbol = "<=")]
    #[assoc(precedence = 8)]
    LESS_EQUAL,     // <lhs> <= <rhs>

    #[assoc(symbol = "&&")]
    #[assoc(precedence = 3)]
    LOGICAL_AND,    // <lhs> && <rhs>
    #[assoc(symbol = "||")]
    #[assoc(precedence = 1)]
    LOGICAL_OR,     // <lhs> || <rhs>
    #[assoc(symbol = "^^")]
    #[assoc(precedence = 2)]
    LOGICAL_XOR,    // <lhs> ^^ <rhs>

    #[assoc(symbol = "&")]
    #[assoc(precedence = 6)]
    BITWISE_AND,    // <lhs> & <rhs>
    #[assoc(symbol = "|")]
    #[assoc(precedence = 4)]
    BITWISE_OR,     // <lhs> | <rhs>
    #[assoc(symbol = "^")]
    #[assoc(precedence = 5)]
    BITWISE_XOR,    // <lhs> ^ <rhs>
}

impl BinaryOperation {
    /// Gates that contribute to multiplicative depth in a circuit.
    pub fn is_multiplicative(&self) -> bool {
        matches!(self, BinaryOperation::LOGICAL_AND | BinaryOperation::MUL | BinaryOperation::FHE_MUL)
    }

    /// XOR-like gates are free with respect to multiplicative depth and
    /// distribute with AND, which is what the cone rewriter exploits.
    pub fn is_xor(&self) -> bool {
        matches!(self, BinaryOperation::LOGICAL_XOR)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(self,
            BinaryOperation::EQUAL | BinaryOperation::NOT_EQUAL
          | BinaryOperation::GREATER_THAN | BinaryOperation::LESS_THAN
          | BinaryOperation::GREATER_EQUAL | BinaryOperation::LESS_EQUAL)
    }

    /// Maps the FHE aliases onto the arithmetic operation they compute.
    pub fn plaintext_equivalent(&self) -> BinaryOperation {
        match self {
            BinaryOperation::FHE_ADD => BinaryOperation::ADD,
            BinaryOperation::FHE_SUB => BinaryOperation::SUB,
            BinaryOperation::FHE_MUL => BinaryOperation::MUL,
            other => *other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_are_printable() {
        assert_eq!(BinaryOperation::ADD.symbol(), "+");
        assert_eq!(BinaryOperation::FHE_MUL.symbol(), "***");
        assert_eq!(BinaryOperation::LOGICAL_XOR.symbol(), "^^");
        assert_eq!(UnaryOperation::BITWISE_NOT.symbol(), "~");
    }

    #[test]
    fn multiplicative_gates() {
        assert!(BinaryOperation::LOGICAL_AND.is_multiplicative());
        assert!(BinaryOperation::FHE_MUL.is_multiplicative());
        assert!(!BinaryOperation::LOGICAL_XOR.is_multiplicative());
        assert!(!BinaryOperation::ADD.is_multiplicative());
    }

    #[test]
    fn fhe_aliases_map_to_arithmetic() {
        assert_eq!(BinaryOperation::FHE_ADD.plaintext_equivalent(), BinaryOperation::ADD);
        assert_eq!(BinaryOperation::SUB.plaintext_equivalent(), BinaryOperation::SUB);
    }
}
