use std::fmt;

use serde::Serialize;

/// Literals are defined constants within a program. See NodeKind for more
/// detail on their usage. They are divided by their representation in text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[allow(non_camel_case_types)]
pub enum Literal {
    /// Form: false | true
    BOOL(bool),

    /// Form: '%c'
    CHAR(char),

    /// Form: %d
    INT(i64),

    /// Form: %d.%df
    FLOAT(f32),

    /// Form: %d.%d
    DOUBLE(f64),

    /// Form: "%c*"
    STRING(String),
}

impl Literal {
    /// Name of the primitive type this literal inhabits, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::BOOL(_) => "bool",
            Literal::CHAR(_) => "char",
            Literal::INT(_) => "int",
            Literal::FLOAT(_) => "float",
            Literal::DOUBLE(_) => "double",
            Literal::STRING(_) => "string",
        }
    }

    /// Interprets the literal as a branch/loop condition.
    /// Numeric values follow the C convention of non-zero being true.
    /// Strings have no truth value.
    pub fn truthiness(&self) -> Option<bool> {
        match self {
            Literal::BOOL(value) => Some(*value),
            Literal::CHAR(value) => Some(*value != '\0'),
            Literal::INT(value) => Some(*value != 0),
            Literal::FLOAT(value) => Some(*value != 0.0),
            Literal::DOUBLE(value) => Some(*value != 0.0),
            Literal::STRING(_) => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Literal::INT(value) => *value == 0,
            Literal::FLOAT(value) => *value == 0.0,
            Literal::DOUBLE(value) => *value == 0.0,
            _ => false,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::BOOL(value) => write!(f, "{}", value),
            Literal::CHAR(value) => write!(f, "'{}'", value),
            Literal::INT(value) => write!(f, "{}", value),
            Literal::FLOAT(value) => write!(f, "{:?}f", value),
            Literal::DOUBLE(value) => write!(f, "{:?}", value),
            Literal::STRING(value) => write!(f, "\"{}\"", value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(Literal::INT(242).to_string(), "242");
        assert_eq!(Literal::BOOL(false).to_string(), "false");
        assert_eq!(Literal::DOUBLE(2.0).to_string(), "2.0");
        assert_eq!(Literal::FLOAT(1.5).to_string(), "1.5f");
        assert_eq!(Literal::STRING("hi".into()).to_string(), "\"hi\"");
    }

    #[test]
    fn truthiness_follows_c_conventions() {
        assert_eq!(Literal::INT(0).truthiness(), Some(false));
        assert_eq!(Literal::INT(-3).truthiness(), Some(true));
        assert_eq!(Literal::BOOL(true).truthiness(), Some(true));
        assert_eq!(Literal::STRING("".into()).truthiness(), None);
    }
}
