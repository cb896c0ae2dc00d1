use std::collections::HashMap;

use super::ast_node::AstNode;
use super::datatype::DataType;
use super::scope::ScopedIdentifier;

/// The information the engine tracks per variable: its declared type and,
/// when the variable provably equals some expression at the current program
/// point, that expression. `None` means runtime-dependent, do not substitute.
#[derive(Debug, Clone)]
pub struct TypedValue {
    pub datatype: DataType,
    pub value: Option<AstNode>,
}

impl TypedValue {
    pub fn unknown(datatype: DataType) -> Self {
        TypedValue { datatype, value: None }
    }

    pub fn known(datatype: DataType, value: AstNode) -> Self {
        TypedValue { datatype, value: Some(value) }
    }
}

/// Maps scoped identifiers to their tracked values for the duration of one
/// pass invocation.
///
/// Snapshots are deep, id-preserving clones of the whole map; speculative
/// loop unrolling takes one before running and swaps it back in on rollback.
#[derive(Debug, Clone, Default)]
pub struct VariableEnvironment {
    values: HashMap<ScopedIdentifier, TypedValue>,
}

impl VariableEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, id: ScopedIdentifier, value: TypedValue) {
        self.values.insert(id, value);
    }

    pub fn get(&self, id: &ScopedIdentifier) -> Option<&TypedValue> {
        self.values.get(id)
    }

    pub fn has(&self, id: &ScopedIdentifier) -> bool {
        self.values.contains_key(id)
    }

    /// Marks a variable as runtime-dependent while keeping its type.
    pub fn invalidate(&mut self, id: &ScopedIdentifier) {
        if let Some(entry) = self.values.get_mut(id) {
            entry.value = None;
        }
    }

    pub fn snapshot(&self) -> VariableEnvironment {
        self.clone()
    }

    pub fn restore(&mut self, snapshot: VariableEnvironment) {
        *self = snapshot;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ScopedIdentifier, &TypedValue)> {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::ast::ast_node::NodeId;
    use crate::optimizer::ast::scope::ScopeId;
    use crate::optimizer::ast::{Literal, PrimitiveDataType};

    fn scoped(name: &str) -> ScopedIdentifier {
        ScopedIdentifier::new(ScopeId::of(NodeId::fresh()), name)
    }

    #[test]
    fn snapshot_and_restore_round_trip() {
        let mut env = VariableEnvironment::new();
        let x = scoped("x");
        let int = DataType::plaintext(PrimitiveDataType::Int);
        env.put(x.clone(), TypedValue::known(int, AstNode::literal(Literal::INT(1))));

        let snapshot = env.snapshot();
        env.put(x.clone(), TypedValue::known(int, AstNode::literal(Literal::INT(9))));
        env.invalidate(&x);
        assert!(env.get(&x).unwrap().value.is_none());

        env.restore(snapshot);
        let restored = env.get(&x).unwrap().value.as_ref().unwrap();
        assert_eq!(restored.as_int_literal(), Some(1));
    }

    #[test]
    fn invalidate_keeps_the_type() {
        let mut env = VariableEnvironment::new();
        let x = scoped("x");
        let secret_int = DataType::secret(PrimitiveDataType::Int);
        env.put(x.clone(), TypedValue::known(secret_int, AstNode::literal(Literal::INT(4))));
        env.invalidate(&x);
        assert_eq!(env.get(&x).unwrap().datatype, secret_int);
    }
}
