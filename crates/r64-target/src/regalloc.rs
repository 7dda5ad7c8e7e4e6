//! Register allocation.
//!
//! The allocator walks the dominator chain from the epilogue block up to
//! the prologue. Each block is processed backwards: a statement's result
//! register is freed at its definition, and operands are bound on their
//! first (last-in-program-order) use. Downstream expectations flow
//! between blocks through per-block register-file snapshots, which are
//! merged across successors. When no register is free, the occupant
//! defined nearest the root, earliest in its block, is evicted to a
//! spill slot and reloaded after the borrowing use.

use log::trace;
use riscv64_encoder::Gpr;
use thiserror::Error;

use r64_ir::{
    Function, FunctionError, MemoryAction, RegisterAllocation, RegisterFile, Spill, Statement,
    StatementType, Value, ValueError, ValueInfo, ValueRef, EPILOGUE_BLOCK,
};

/// Errors raised during register allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// Successor register files disagree about a register's occupant.
    #[error("successor register files disagree on {register}")]
    InvalidMerge { register: Gpr },
    /// A fixed-register write conflicts with a committed constraint.
    #[error("fixed-register write conflicts on {register}")]
    InvalidConstraint { register: Gpr },
    /// No legal free register and the value is not spillable.
    #[error("no register available at block {block} statement {statement}")]
    InvalidValue { block: u32, statement: u32 },
    /// A value belongs to a different function.
    #[error(transparent)]
    Value(#[from] ValueError),
    /// The function is not ready for allocation.
    #[error(transparent)]
    Function(#[from] FunctionError),
}

/// Assign a register or spill slot to every value-producing statement
/// and a register to every operand read that needs one.
///
/// On success `function.spill_size` holds the number of spill slots the
/// materializer must reserve stack space for.
pub fn allocate_registers(function: &mut Function) -> Result<(), AllocationError> {
    if !function.has_exit() {
        return Err(FunctionError::NoExit.into());
    }
    let block_count = function.blocks.len() as u32;
    let cfg = function.compute_cfg();
    let depths: Vec<u32> = (0..block_count)
        .map(|block| cfg.get_dominator_tree_depth(block))
        .collect();
    let chain: Vec<u32> = cfg.dominator_iter(EPILOGUE_BLOCK).collect();

    let mut allocator = RegisterAllocator {
        file: RegisterFile::new(),
        spill: Spill::new(),
        depths,
    };
    for &block in &chain {
        allocator.allocate_block(function, block)?;
    }
    function.spill_size = Some(allocator.spill.size());
    trace!(
        "allocated {}: {} spill slots",
        function.name,
        allocator.spill.size()
    );
    Ok(())
}

struct RegisterAllocator {
    /// Downstream register expectations at the current walk point.
    file: RegisterFile,
    /// Live spill slots at the current walk point.
    spill: Spill,
    /// Dominator-tree depth per block, for eviction scoring.
    depths: Vec<u32>,
}

impl RegisterAllocator {
    fn allocate_block(
        &mut self,
        function: &mut Function,
        block: u32,
    ) -> Result<(), AllocationError> {
        // Merge what the successors expect at their entry.
        let mut file = RegisterFile::new();
        for succ in function.blocks[block as usize].successors() {
            file.merge(&function.blocks[succ as usize].register_file)
                .map_err(|register| AllocationError::InvalidMerge { register })?;
        }
        self.file = file;

        for index in (0..function.blocks[block as usize].statements.len()).rev() {
            self.process_statement(function, block, index)?;
        }

        function.blocks[block as usize].register_file = self.file.clone();
        Ok(())
    }

    fn process_statement(
        &mut self,
        function: &mut Function,
        block: u32,
        index: usize,
    ) -> Result<(), AllocationError> {
        if function.blocks[block as usize].statements[index].produces_value() {
            self.process_definition(function, block, index)?;
        }

        // Registers this statement is already touching; operand and
        // scratch searches must not hand them out twice.
        let mut in_use: Vec<Gpr> = Vec::new();
        match function.blocks[block as usize].statements[index].op {
            StatementType::ReadRegister(_) => {}
            StatementType::Add { .. } => {
                self.resolve_operand(function, block, index, 0, None, &mut in_use)?;
                self.resolve_operand(function, block, index, 1, None, &mut in_use)?;
            }
            StatementType::WriteRegister { register, .. } => {
                self.resolve_operand(function, block, index, 0, Some(register), &mut in_use)?;
                self.constrain_write(function, block, index, register, &in_use)?;
            }
        }
        Ok(())
    }

    /// Free a definition's register and slot; the value does not exist
    /// above this point. Results nothing ever read still get a home so
    /// the instruction has somewhere to write.
    fn process_definition(
        &mut self,
        function: &mut Function,
        block: u32,
        index: usize,
    ) -> Result<(), AllocationError> {
        let vref = ValueRef {
            function: function.id,
            block,
            statement: index as u32,
        };
        let statement = &function.blocks[block as usize].statements[index];
        let preferred = statement.preferred_register();
        let computes = needs_compute_register(statement);
        let reads_register = matches!(statement.op, StatementType::ReadRegister(_));
        match statement.allocation {
            Some(allocation) => {
                if let Some(register) = allocation.register {
                    debug_assert_eq!(self.file.get(register), Some(vref));
                    self.file.clear(register);
                }
                if let Some(slot) = allocation.spill_slot {
                    self.spill.delete(slot);
                    // An evicted add still computes into a register
                    // before the store; pick one free at this point.
                    if allocation.register.is_none() && computes {
                        let register =
                            self.find_free(&[]).ok_or(AllocationError::InvalidValue {
                                block,
                                statement: index as u32,
                            })?;
                        let statement = &mut function.blocks[block as usize].statements[index];
                        if let Some(allocation) = statement.allocation.as_mut() {
                            allocation.register = Some(register);
                        }
                    }
                }
            }
            None => {
                // Dead result: no downstream use seeded an allocation.
                if let Some(register) = self.find_free_with_preference(preferred, &[]) {
                    let statement = &mut function.blocks[block as usize].statements[index];
                    statement.allocation = Some(RegisterAllocation::register(register));
                } else if reads_register {
                    // A dead register read can store straight to a slot.
                    let slot = self.spill.put(vref);
                    let statement = &mut function.blocks[block as usize].statements[index];
                    statement.allocation = Some(RegisterAllocation {
                        register: None,
                        spill_slot: Some(slot),
                    });
                } else {
                    return Err(AllocationError::InvalidValue {
                        block,
                        statement: index as u32,
                    });
                }
            }
        }
        Ok(())
    }

    /// Bind one operand read: reuse a live binding, otherwise try the
    /// definition's preferred register or the caller's hint, then the
    /// highest free register, finally evict an occupant.
    fn resolve_operand(
        &mut self,
        function: &mut Function,
        block: u32,
        index: usize,
        which: usize,
        hint: Option<Gpr>,
        in_use: &mut Vec<Gpr>,
    ) -> Result<(), AllocationError> {
        let (value, needs_register) = {
            let operand = operand(&function.blocks[block as usize].statements[index], which);
            (operand.value, operand.needs_register())
        };
        if !needs_register {
            return Ok(());
        }

        match value {
            Value::Constant(constant) => {
                // The constant is rematerialized into a scratch register
                // right before the instruction.
                let (register, evicted) =
                    self.take_register(function, None, hint, in_use, block, index)?;
                let operand =
                    operand_mut(&mut function.blocks[block as usize].statements[index], which);
                operand.allocation.register = Some(register);
                operand.allocation.before = Some(MemoryAction::LoadImmediate(constant));
                if let Some(slot) = evicted {
                    operand.allocation.after = Some(MemoryAction::LoadFromSpill(slot));
                }
                in_use.push(register);
            }
            Value::Result(vref) => {
                if vref.function != function.id {
                    return Err(ValueError::InvalidValue(vref).into());
                }
                let definition = function
                    .statement(vref)
                    .ok_or(ValueError::InvalidValue(vref))?;
                let preference = definition.preferred_register();
                match definition.allocation {
                    Some(RegisterAllocation {
                        register: Some(register),
                        ..
                    }) if self.file.get(register) == Some(vref) => {
                        // The downstream binding is live here; reuse it.
                        let operand = operand_mut(
                            &mut function.blocks[block as usize].statements[index],
                            which,
                        );
                        operand.allocation.register = Some(register);
                        in_use.push(register);
                    }
                    Some(RegisterAllocation {
                        spill_slot: Some(slot),
                        ..
                    }) => {
                        // The value lives in a spill slot; reload it into
                        // a scratch register for this use.
                        let (register, evicted) =
                            self.take_register(function, None, hint, in_use, block, index)?;
                        let operand = operand_mut(
                            &mut function.blocks[block as usize].statements[index],
                            which,
                        );
                        operand.allocation.register = Some(register);
                        operand.allocation.before = Some(MemoryAction::LoadFromSpill(slot));
                        if let Some(slot) = evicted {
                            operand.allocation.after = Some(MemoryAction::LoadFromSpill(slot));
                        }
                        in_use.push(register);
                    }
                    Some(_) => {
                        // An allocation without a live binding or slot
                        // means the value is used above its definition.
                        return Err(AllocationError::InvalidValue {
                            block,
                            statement: index as u32,
                        });
                    }
                    None => {
                        // First use on the backward walk: bind the value
                        // from its definition down to here.
                        let (register, evicted) =
                            self.take_register(function, preference, hint, in_use, block, index)?;
                        if let Some(definition) = function.statement_mut(vref) {
                            definition.allocation = Some(RegisterAllocation::register(register));
                        }
                        self.file.set(register, vref);
                        let operand = operand_mut(
                            &mut function.blocks[block as usize].statements[index],
                            which,
                        );
                        operand.allocation.register = Some(register);
                        if let Some(slot) = evicted {
                            operand.allocation.after = Some(MemoryAction::LoadFromSpill(slot));
                        }
                        in_use.push(register);
                    }
                }
            }
        }
        Ok(())
    }

    /// A write's target register is a hard constraint. If downstream
    /// code expects a different value there, that occupant is parked in
    /// a scratch register around the write and restored afterwards.
    fn constrain_write(
        &mut self,
        function: &mut Function,
        block: u32,
        index: usize,
        register: Gpr,
        in_use: &[Gpr],
    ) -> Result<(), AllocationError> {
        let Some(occupant) = self.file.get(register) else {
            return Ok(());
        };
        let operand_result = operand(&function.blocks[block as usize].statements[index], 0)
            .value
            .result();
        if Some(occupant) == operand_result {
            return Ok(());
        }
        let scratch = self
            .find_free(in_use)
            .ok_or(AllocationError::InvalidConstraint { register })?;
        trace!(
            "write to {} displaces {:?}; parking in {}",
            register,
            occupant,
            scratch
        );
        let operand = operand_mut(&mut function.blocks[block as usize].statements[index], 0);
        operand.allocation.restore = Some(scratch);
        Ok(())
    }

    /// Find a register for a value, preferring `preferred` then `hint`,
    /// then the highest free register, finally evicting an occupant.
    /// Returns the register and the spill slot of an evicted value.
    fn take_register(
        &mut self,
        function: &mut Function,
        preferred: Option<Gpr>,
        hint: Option<Gpr>,
        in_use: &[Gpr],
        block: u32,
        index: usize,
    ) -> Result<(Gpr, Option<usize>), AllocationError> {
        for candidate in preferred.into_iter().chain(hint) {
            if candidate != Gpr::ZERO
                && self.file.get(candidate).is_none()
                && !in_use.contains(&candidate)
            {
                return Ok((candidate, None));
            }
        }
        if let Some(register) = self.find_free(in_use) {
            return Ok((register, None));
        }
        let (register, slot) =
            self.evict(function, in_use)
                .ok_or(AllocationError::InvalidValue {
                    block,
                    statement: index as u32,
                })?;
        Ok((register, Some(slot)))
    }

    fn find_free_with_preference(&self, preferred: Option<Gpr>, in_use: &[Gpr]) -> Option<Gpr> {
        if let Some(register) = preferred {
            if register != Gpr::ZERO
                && self.file.get(register).is_none()
                && !in_use.contains(&register)
            {
                return Some(register);
            }
        }
        self.find_free(in_use)
    }

    /// The highest-indexed free register, scanned from x31 downward.
    /// x0 and fp are never handed out.
    fn find_free(&self, in_use: &[Gpr]) -> Option<Gpr> {
        for num in (1..=31u8).rev() {
            let register = Gpr::new(num);
            if register == Gpr::FP
                || self.file.get(register).is_some()
                || in_use.contains(&register)
            {
                continue;
            }
            return Some(register);
        }
        None
    }

    /// Evict the occupant with the best eviction score: the value
    /// defined nearest the root and earliest in its block is the least
    /// recently live on the backward walk. Its definition keeps the
    /// spill slot as its home; the freed register is returned.
    fn evict(&mut self, function: &mut Function, in_use: &[Gpr]) -> Option<(Gpr, usize)> {
        let mut best: Option<(Gpr, ValueRef, (u32, u32))> = None;
        for (register, vref) in self.file.occupied() {
            if register == Gpr::FP || in_use.contains(&register) {
                continue;
            }
            let score = (self.depths[vref.block as usize], vref.statement);
            let better = match &best {
                None => true,
                Some((_, _, best_score)) => score < *best_score,
            };
            if better {
                best = Some((register, vref, score));
            }
        }
        let (register, vref, _) = best?;
        let slot = self.spill.put(vref);
        trace!("evicting {:?} from {} to slot {}", vref, register, slot);
        if let Some(definition) = function.statement_mut(vref) {
            definition.allocation = Some(RegisterAllocation {
                register: None,
                spill_slot: Some(slot),
            });
        }
        self.file.clear(register);
        Some((register, slot))
    }
}

/// Whether a statement's result must pass through a register before it
/// can be stored to a spill slot.
fn needs_compute_register(statement: &Statement) -> bool {
    matches!(statement.op, StatementType::Add { .. })
}

fn operand(statement: &Statement, which: usize) -> &ValueInfo {
    match (&statement.op, which) {
        (StatementType::WriteRegister { value, .. }, 0) => value,
        (StatementType::Add { a, .. }, 0) => a,
        (StatementType::Add { b, .. }, 1) => b,
        _ => unreachable!("statement has no operand {which}"),
    }
}

fn operand_mut(statement: &mut Statement, which: usize) -> &mut ValueInfo {
    match (&mut statement.op, which) {
        (StatementType::WriteRegister { value, .. }, 0) => value,
        (StatementType::Add { a, .. }, 0) => a,
        (StatementType::Add { b, .. }, 1) => b,
        _ => unreachable!("statement has no operand {which}"),
    }
}
