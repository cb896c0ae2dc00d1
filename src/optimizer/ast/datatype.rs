use std::fmt;

use serde::Serialize;
use strum_macros::EnumString;

use super::literals::Literal;

/// Primitive data types supported by the AST model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, EnumString)]
pub enum PrimitiveDataType {
    #[strum(serialize = "bool")]
    Bool,
    #[strum(serialize = "char")]
    Char,
    #[strum(serialize = "int")]
    Int,
    #[strum(serialize = "float")]
    Float,
    #[strum(serialize = "double")]
    Double,
    #[strum(serialize = "string")]
    String,
}

impl PrimitiveDataType {
    /// Convert a string representation to a primitive data type.
    pub fn parse(datatype: &str) -> Option<PrimitiveDataType> {
        datatype.trim().parse().ok()
    }

    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveDataType::Bool => "bool",
            PrimitiveDataType::Char => "char",
            PrimitiveDataType::Int => "int",
            PrimitiveDataType::Float => "float",
            PrimitiveDataType::Double => "double",
            PrimitiveDataType::String => "string",
        }
    }

    /// The literal a variable of this type holds when it is all-zero.
    /// Used by the branch multiplexer to drop vanishing product terms.
    pub fn zero_literal(&self) -> Option<Literal> {
        match self {
            PrimitiveDataType::Bool => Some(Literal::BOOL(false)),
            PrimitiveDataType::Int => Some(Literal::INT(0)),
            PrimitiveDataType::Float => Some(Literal::FLOAT(0.0)),
            PrimitiveDataType::Double => Some(Literal::DOUBLE(0.0)),
            _ => None,
        }
    }
}

/// A datatype is a primitive together with its secrecy. Secret values are
/// ciphertext-bound at runtime; secrecy is a data-flow property, so any
/// operation with a secret operand yields a secret result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DataType {
    pub primitive: PrimitiveDataType,
    pub secret: bool,
}

impl DataType {
    pub fn plaintext(primitive: PrimitiveDataType) -> Self {
        DataType { primitive, secret: false }
    }

    pub fn secret(primitive: PrimitiveDataType) -> Self {
        DataType { primitive, secret: true }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secret {
            write!(f, "secret {}", self.primitive.name())
        } else {
            write!(f, "{}", self.primitive.name())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_primitive_names() {
        assert_eq!(PrimitiveDataType::parse("int"), Some(PrimitiveDataType::Int));
        assert_eq!(PrimitiveDataType::parse(" bool "), Some(PrimitiveDataType::Bool));
        assert_eq!(PrimitiveDataType::parse("i64"), None);
    }

    #[test]
    fn display_includes_secret_qualifier() {
        assert_eq!(DataType::secret(PrimitiveDataType::Int).to_string(), "secret int");
        assert_eq!(DataType::plaintext(PrimitiveDataType::Double).to_string(), "double");
    }
}
