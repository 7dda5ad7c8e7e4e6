//! Register-allocation verification.
//!
//! An independent re-execution of the allocated program against a
//! simulated register file and spill array. The verifier trusts nothing
//! the allocator wrote: every operand read is checked against what the
//! simulation says the register actually holds at that point. Failures
//! here are allocator bugs, never input errors.

use riscv64_encoder::Gpr;
use thiserror::Error;

use r64_ir::{
    Function, MemoryAction, ReadAllocation, Statement, StatementType, Value, ValueInfo, ValueRef,
    PROLOGUE_BLOCK,
};

/// Errors raised by verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// A value-producing statement has no allocation.
    #[error("missing allocation at block {block} statement {statement}")]
    MissingAllocation { block: u32, statement: u32 },
    /// A statement that produces no value carries an allocation.
    #[error("allocation on non-value statement at block {block} statement {statement}")]
    AllocationForNonValue { block: u32, statement: u32 },
    /// A block's register-file snapshot disagrees with the simulation.
    #[error("register file mismatch entering block {block} at {register}")]
    InvalidRegisterFile { block: u32, register: Gpr },
    /// An operand register holds a different value than expected.
    #[error("{register} holds a different value at block {block} statement {statement}")]
    RegisterHoldsDifferentValue {
        block: u32,
        statement: u32,
        register: Gpr,
    },
    /// A memory action references an empty slot or has no register.
    #[error("invalid memory action at block {block} statement {statement}")]
    InvalidMemoryAction { block: u32, statement: u32 },
    /// x0 was used as an allocation target.
    #[error("invalid register {register} at block {block} statement {statement}")]
    InvalidRegister {
        block: u32,
        statement: u32,
        register: Gpr,
    },
    /// A merge point expects a value no path supplies.
    #[error("no value arrives in {register} at block {block}")]
    MissingPhiAt { block: u32, register: Gpr },
    /// A restore did not bring the displaced value back.
    #[error("invalid restore via {register} at block {block} statement {statement}")]
    InvalidRestore {
        block: u32,
        statement: u32,
        register: Gpr,
    },
}

/// Simulated machine state: SSA values per register and spill slot.
#[derive(Debug, Clone, Default)]
struct Simulator {
    regs: [Option<Value>; 32],
    spill: Vec<Option<Value>>,
}

impl Simulator {
    fn get(&self, register: Gpr) -> Option<Value> {
        self.regs[register.num() as usize]
    }

    fn set(&mut self, register: Gpr, value: Value) {
        self.regs[register.num() as usize] = Some(value);
    }

    fn slot(&self, slot: usize) -> Option<Value> {
        self.spill.get(slot).copied().flatten()
    }

    fn set_slot(&mut self, slot: usize, value: Value) {
        if slot >= self.spill.len() {
            self.spill.resize(slot + 1, None);
        }
        self.spill[slot] = Some(value);
    }
}

/// Simulate the allocated program and check register-file consistency.
pub fn verify_register_allocation(function: &Function) -> Result<(), VerificationError> {
    let block_count = function.blocks.len();
    // Blocks carry at most two outgoing edges; two bits per block cover
    // them all.
    let mut edge_visited = vec![false; block_count * 2];
    let mut stack = vec![(PROLOGUE_BLOCK, Simulator::default())];

    while let Some((block_id, mut sim)) = stack.pop() {
        check_block_entry(function, block_id, &sim)?;
        let block = &function.blocks[block_id as usize];
        for (index, statement) in block.statements.iter().enumerate() {
            simulate_statement(function, &mut sim, block_id, index as u32, statement)?;
        }
        for (edge, succ) in block.successors().enumerate() {
            let bit = block_id as usize * 2 + edge;
            if !edge_visited[bit] {
                edge_visited[bit] = true;
                stack.push((succ, sim.clone()));
            }
        }
    }
    Ok(())
}

/// Every value the block's snapshot expects must arrive in the right
/// register on this path.
fn check_block_entry(
    function: &Function,
    block_id: u32,
    sim: &Simulator,
) -> Result<(), VerificationError> {
    let block = &function.blocks[block_id as usize];
    for (register, expected) in block.register_file.occupied() {
        match sim.get(register) {
            None => {
                // The prologue legitimately starts with an empty
                // simulated file; its expectations are its own reads.
                if block_id != PROLOGUE_BLOCK {
                    return Err(VerificationError::MissingPhiAt {
                        block: block_id,
                        register,
                    });
                }
            }
            Some(Value::Result(found)) if found == expected => {}
            Some(_) => {
                return Err(VerificationError::InvalidRegisterFile {
                    block: block_id,
                    register,
                });
            }
        }
    }
    Ok(())
}

fn simulate_statement(
    function: &Function,
    sim: &mut Simulator,
    block: u32,
    statement_index: u32,
    statement: &Statement,
) -> Result<(), VerificationError> {
    // Allocation presence must match value production.
    if statement.produces_value() && statement.allocation.is_none() {
        return Err(VerificationError::MissingAllocation {
            block,
            statement: statement_index,
        });
    }
    if !statement.produces_value() && statement.allocation.is_some() {
        return Err(VerificationError::AllocationForNonValue {
            block,
            statement: statement_index,
        });
    }

    // Operand before-actions, then the operand checks themselves.
    for operand in statement.operands() {
        apply_action(
            sim,
            &operand.allocation,
            operand.allocation.before,
            block,
            statement_index,
        )?;
    }
    for operand in statement.operands() {
        check_operand(sim, operand, block, statement_index)?;
    }

    match &statement.op {
        StatementType::WriteRegister { register, value } => {
            // Park a displaced occupant, perform the write, restore.
            if let Some(scratch) = value.allocation.restore {
                let Some(parked) = sim.get(*register) else {
                    return Err(VerificationError::InvalidRestore {
                        block,
                        statement: statement_index,
                        register: scratch,
                    });
                };
                sim.set(scratch, parked);
                sim.set(*register, value.value);
                let restored = sim.get(scratch).ok_or(VerificationError::InvalidRestore {
                    block,
                    statement: statement_index,
                    register: scratch,
                })?;
                sim.set(*register, restored);
            } else {
                sim.set(*register, value.value);
            }
        }
        StatementType::ReadRegister(_) | StatementType::Add { .. } => {
            let vref = ValueRef {
                function: function.id,
                block,
                statement: statement_index,
            };
            let Some(allocation) = statement.allocation else {
                return Err(VerificationError::MissingAllocation {
                    block,
                    statement: statement_index,
                });
            };
            if allocation.register.is_none() && allocation.spill_slot.is_none() {
                return Err(VerificationError::MissingAllocation {
                    block,
                    statement: statement_index,
                });
            }
            if let Some(register) = allocation.register {
                if register == Gpr::ZERO {
                    return Err(VerificationError::InvalidRegister {
                        block,
                        statement: statement_index,
                        register,
                    });
                }
                sim.set(register, Value::Result(vref));
            }
            if let Some(slot) = allocation.spill_slot {
                sim.set_slot(slot, Value::Result(vref));
            }
        }
    }

    // Operand after-actions restore downstream expectations.
    for operand in statement.operands() {
        apply_action(
            sim,
            &operand.allocation,
            operand.allocation.after,
            block,
            statement_index,
        )?;
    }
    Ok(())
}

fn apply_action(
    sim: &mut Simulator,
    allocation: &ReadAllocation,
    action: Option<MemoryAction>,
    block: u32,
    statement: u32,
) -> Result<(), VerificationError> {
    let Some(action) = action else {
        return Ok(());
    };
    let register = allocation
        .register
        .ok_or(VerificationError::InvalidMemoryAction { block, statement })?;
    match action {
        MemoryAction::LoadImmediate(constant) => {
            sim.set(register, Value::Constant(constant));
        }
        MemoryAction::LoadFromSpill(slot) => {
            let value = sim
                .slot(slot)
                .ok_or(VerificationError::InvalidMemoryAction { block, statement })?;
            sim.set(register, value);
        }
        MemoryAction::StoreToSpill(slot) => {
            let value = sim
                .get(register)
                .ok_or(VerificationError::InvalidMemoryAction { block, statement })?;
            sim.set_slot(slot, value);
        }
    }
    Ok(())
}

/// An operand with a register must find exactly its value there.
fn check_operand(
    sim: &Simulator,
    operand: &ValueInfo,
    block: u32,
    statement: u32,
) -> Result<(), VerificationError> {
    match operand.allocation.register {
        None => {
            if operand.needs_register() {
                return Err(VerificationError::MissingAllocation { block, statement });
            }
        }
        Some(register) => {
            if register == Gpr::ZERO {
                return Err(VerificationError::InvalidRegister {
                    block,
                    statement,
                    register,
                });
            }
            match sim.get(register) {
                Some(found) if found == operand.value => {}
                _ => {
                    return Err(VerificationError::RegisterHoldsDifferentValue {
                        block,
                        statement,
                        register,
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regalloc::allocate_registers;
    use r64_ir::{RegisterAllocation, Value, ENTRY_BLOCK};

    fn build_sum() -> Function {
        let mut function = Function::init("f");
        let a = function.add_parameter(None).unwrap();
        let b = function.add_parameter(None).unwrap();
        let sum = function.blocks[ENTRY_BLOCK as usize]
            .append_add(a, b, None)
            .unwrap();
        function.set_function_exit(ENTRY_BLOCK, sum).unwrap();
        function.add_pseudo_instructions().unwrap();
        function
    }

    #[test]
    fn test_valid_allocation_passes() {
        let mut function = build_sum();
        allocate_registers(&mut function).unwrap();
        verify_register_allocation(&function).unwrap();
    }

    #[test]
    fn test_missing_allocation_is_reported() {
        let mut function = build_sum();
        allocate_registers(&mut function).unwrap();
        function.blocks[ENTRY_BLOCK as usize].statements[0].allocation = None;
        assert!(matches!(
            verify_register_allocation(&function),
            Err(VerificationError::MissingAllocation { .. })
        ));
    }

    #[test]
    fn test_wrong_register_is_reported() {
        let mut function = build_sum();
        allocate_registers(&mut function).unwrap();
        // Claim the sum was computed into t0 without moving it there.
        function.blocks[ENTRY_BLOCK as usize].statements[0].allocation =
            Some(RegisterAllocation::register(Gpr::T0));
        assert!(matches!(
            verify_register_allocation(&function),
            Err(VerificationError::RegisterHoldsDifferentValue { .. })
        ));
    }

    #[test]
    fn test_allocation_on_write_is_reported() {
        let mut function = build_sum();
        allocate_registers(&mut function).unwrap();
        // The epilogue's first statement is the a0 write.
        function.blocks[r64_ir::EPILOGUE_BLOCK as usize].statements[0].allocation =
            Some(RegisterAllocation::register(Gpr::T0));
        assert!(matches!(
            verify_register_allocation(&function),
            Err(VerificationError::AllocationForNonValue { .. })
        ));
    }

    #[test]
    fn test_x0_allocation_is_reported() {
        let mut function = build_sum();
        allocate_registers(&mut function).unwrap();
        function.blocks[ENTRY_BLOCK as usize].statements[0].allocation =
            Some(RegisterAllocation::register(Gpr::ZERO));
        assert!(matches!(
            verify_register_allocation(&function),
            Err(VerificationError::InvalidRegister { .. })
        ));
    }

    #[test]
    fn test_spilled_program_verifies() {
        let mut function = Function::init("f");
        let mut params = Vec::new();
        for _ in 0..8 {
            params.push(function.add_parameter(None).unwrap());
        }
        let mut partials = Vec::new();
        for i in 0..11u64 {
            let p = params[(i % 8) as usize];
            partials.push(
                function.blocks[ENTRY_BLOCK as usize]
                    .append_add(p, Value::Constant(1000 + i), None)
                    .unwrap(),
            );
        }
        let mut total = partials[0];
        for &partial in &partials[1..] {
            total = function.blocks[ENTRY_BLOCK as usize]
                .append_add(total, partial, None)
                .unwrap();
        }
        for &p in &params {
            total = function.blocks[ENTRY_BLOCK as usize]
                .append_add(total, p, None)
                .unwrap();
        }
        function.set_function_exit(ENTRY_BLOCK, total).unwrap();
        function.add_pseudo_instructions().unwrap();
        allocate_registers(&mut function).unwrap();
        assert!(function.spill_size.unwrap() > 0);
        verify_register_allocation(&function).unwrap();
    }
}
