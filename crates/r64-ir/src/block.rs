//! Basic blocks.

use alloc::{
    string::{String, ToString},
    vec::Vec,
};

use riscv64_encoder::Gpr;

use crate::{
    error::ValueError,
    register_file::RegisterFile,
    statement::{Statement, StatementType},
    value::{Immediate, Value, ValueInfo, ValueRef},
};

/// How control leaves a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Unconditional jump to another block of the same function.
    Jump(u32),
    /// Leave the function.
    FunctionExit,
}

/// A basic block: an ordered list of statements and exactly one exit.
#[derive(Debug, Clone)]
pub struct Block {
    /// Block index, unique within the function.
    pub id: u32,
    /// Id of the owning function, used to reject cross-function values.
    pub function: u64,
    /// Statements in program order.
    pub statements: Vec<Statement>,
    /// The terminator. Newly added blocks exit the function until the
    /// producer points them somewhere.
    pub exit: Exit,
    /// Register-file snapshot at block entry, filled during allocation
    /// and used to coordinate across the dominator tree.
    pub register_file: RegisterFile,
}

impl Block {
    /// Create an empty block.
    pub fn new(id: u32, function: u64) -> Self {
        Self {
            id,
            function,
            statements: Vec::new(),
            exit: Exit::FunctionExit,
            register_file: RegisterFile::new(),
        }
    }

    /// Point this block's exit at `target`.
    pub fn jump(&mut self, target: u32) {
        self.exit = Exit::Jump(target);
    }

    /// The blocks this one can fall through to.
    pub fn successors(&self) -> impl Iterator<Item = u32> {
        match self.exit {
            Exit::Jump(target) => Some(target),
            Exit::FunctionExit => None,
        }
        .into_iter()
    }

    /// Append a read of physical register `register`.
    ///
    /// Reading x0 produces `Constant(0)` and no statement.
    pub fn append_read_register(&mut self, register: Gpr) -> Value {
        if register == Gpr::ZERO {
            return Value::Constant(0);
        }
        self.push_result(None, StatementType::ReadRegister(register))
    }

    /// Append a write of `value` into physical register `register`.
    ///
    /// Writing x0 is silently discarded. Fails if `value` belongs to a
    /// different function.
    pub fn append_write_register(&mut self, register: Gpr, value: Value) -> Result<(), ValueError> {
        self.check_value(value)?;
        if register == Gpr::ZERO {
            return Ok(());
        }
        self.statements.push(Statement::new(
            None,
            StatementType::WriteRegister {
                register,
                value: ValueInfo::new(value, Immediate::Unlimited),
            },
        ));
        Ok(())
    }

    /// Append the wrapping sum of `a` and `b`.
    ///
    /// Two constants fold at build time and no statement is emitted. If
    /// exactly one operand is a constant it is swapped into the
    /// immediate-eligible `b` position (add commutes). Fails if either
    /// value belongs to a different function.
    pub fn append_add(
        &mut self,
        a: Value,
        b: Value,
        name: Option<&str>,
    ) -> Result<Value, ValueError> {
        self.check_value(a)?;
        self.check_value(b)?;
        let (a, b) = match (a, b) {
            (Value::Constant(ca), Value::Constant(cb)) => {
                return Ok(Value::Constant(ca.wrapping_add(cb)));
            }
            (Value::Constant(_), Value::Result(_)) => (b, a),
            _ => (a, b),
        };
        Ok(self.push_result(
            name.map(|n| n.to_string()),
            StatementType::Add {
                a: ValueInfo::new(a, Immediate::None),
                b: ValueInfo::new(
                    b,
                    Immediate::Sized {
                        bits: 12,
                        signed: true,
                    },
                ),
            },
        ))
    }

    /// Reference to the result of the statement at `index`.
    pub fn result(&self, index: u32) -> ValueRef {
        ValueRef {
            function: self.function,
            block: self.id,
            statement: index,
        }
    }

    fn push_result(&mut self, name: Option<String>, op: StatementType) -> Value {
        let index = self.statements.len() as u32;
        self.statements.push(Statement::new(name, op));
        Value::Result(self.result(index))
    }

    fn check_value(&self, value: Value) -> Result<(), ValueError> {
        match value.result() {
            Some(r) if r.function != self.function => Err(ValueError::InvalidValue(r)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_x0_is_constant_zero() {
        let mut block = Block::new(2, 0);
        assert_eq!(block.append_read_register(Gpr::ZERO), Value::Constant(0));
        assert!(block.statements.is_empty());
    }

    #[test]
    fn test_write_x0_is_discarded() {
        let mut block = Block::new(2, 0);
        block
            .append_write_register(Gpr::ZERO, Value::Constant(7))
            .unwrap();
        assert!(block.statements.is_empty());
    }

    #[test]
    fn test_add_folds_constants() {
        let mut block = Block::new(2, 0);
        let sum = block
            .append_add(Value::Constant(u64::MAX), Value::Constant(3), None)
            .unwrap();
        assert_eq!(sum, Value::Constant(2));
        assert!(block.statements.is_empty());
    }

    #[test]
    fn test_add_swaps_constant_to_immediate_side() {
        let mut block = Block::new(2, 0);
        let v = block.append_read_register(Gpr::A0);
        let sum = block.append_add(Value::Constant(21), v, None).unwrap();
        let StatementType::Add { a, b } = &block.statements[1].op else {
            panic!("expected an add");
        };
        assert_eq!(a.value, v);
        assert_eq!(b.value, Value::Constant(21));
        assert_eq!(sum.result().unwrap().statement, 1);
    }

    #[test]
    fn test_add_rejects_foreign_value() {
        let mut block = Block::new(2, 0);
        let foreign = Value::Result(ValueRef {
            function: 99,
            block: 2,
            statement: 0,
        });
        let err = block.append_add(foreign, Value::Constant(1), None);
        assert!(matches!(err, Err(ValueError::InvalidValue(_))));
    }
}
