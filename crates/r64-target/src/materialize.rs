//! Lowering of allocated IR into RV64I machine code.
//!
//! The materializer starts at the prologue and follows the unique jump
//! chain to the epilogue, emitting instructions for each statement.
//! Moves the allocator already elided by preference simply produce
//! nothing here. A non-zero spill count reserves an 8-byte frame for
//! the saved frame pointer; spill slots are addressed fp-relative below
//! it.

use log::trace;
use riscv64_encoder::{add, addi, addiw, jalr, ld, lui, sd, Gpr};
use thiserror::Error;

use r64_ir::{
    Exit, Function, MemoryAction, RegisterAllocation, Statement, StatementType, Value,
    PROLOGUE_BLOCK,
};

use crate::{elf::ElfWriter, emit::CodeBuffer};

/// Size of the frame-pointer save area when spill slots exist.
const FRAME_SIZE: i32 = 8;

/// Errors raised during materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MaterializationError {
    /// A statement reached the materializer without an allocation.
    #[error("no register allocation at block {block} statement {statement}")]
    NoRegisterAllocation { block: u32, statement: u32 },
    /// The constant does not fit the supported `li` strategies.
    #[error("cannot materialize immediate {0:#x}")]
    UnsupportedImmediate(u64),
    /// The jump chain does not reach the epilogue.
    #[error("block {block} revisited while walking the jump chain")]
    MalformedLayout { block: u32 },
}

/// Lower `function` and append its code and symbol to the object writer.
pub fn materialize(
    function: &Function,
    writer: &mut ElfWriter,
) -> Result<(), MaterializationError> {
    let spill_size = function
        .spill_size
        .ok_or(MaterializationError::NoRegisterAllocation {
            block: PROLOGUE_BLOCK,
            statement: 0,
        })?;
    let has_frame = spill_size > 0;

    let mut code = CodeBuffer::new();
    if has_frame {
        code.emit(sd(Gpr::SP, Gpr::FP, -8));
        code.emit(addi(Gpr::FP, Gpr::SP, 0));
    }

    // Follow the jump chain; block array order is irrelevant here.
    let mut visited = vec![false; function.blocks.len()];
    let mut block_id = PROLOGUE_BLOCK;
    loop {
        if visited[block_id as usize] {
            return Err(MaterializationError::MalformedLayout { block: block_id });
        }
        visited[block_id as usize] = true;
        let block = &function.blocks[block_id as usize];
        for (index, statement) in block.statements.iter().enumerate() {
            materialize_statement(&mut code, block_id, index as u32, statement)?;
        }
        match block.exit {
            Exit::Jump(target) => block_id = target,
            Exit::FunctionExit => break,
        }
    }

    if has_frame {
        code.emit(ld(Gpr::FP, Gpr::FP, -8));
    }
    code.emit(jalr(Gpr::ZERO, Gpr::RA, 0));

    trace!(
        "materialized {}: {} bytes, {} spill slots",
        function.name,
        code.len(),
        spill_size
    );
    writer.add_symbol_at_end(&function.name);
    writer.append_code(&code.as_bytes());
    Ok(())
}

fn materialize_statement(
    code: &mut CodeBuffer,
    block: u32,
    index: u32,
    statement: &Statement,
) -> Result<(), MaterializationError> {
    for operand in statement.operands() {
        emit_action(code, operand.allocation.register, operand.allocation.before)?;
    }

    match &statement.op {
        StatementType::ReadRegister(source) => {
            let allocation = allocation_of(statement, block, index)?;
            if let Some(register) = allocation.register {
                emit_move(code, register, *source);
            }
            if let Some(slot) = allocation.spill_slot {
                code.emit(sd(Gpr::FP, *source, slot_offset(slot)));
            }
        }
        StatementType::WriteRegister { register, value } => {
            if let Some(scratch) = value.allocation.restore {
                emit_move(code, scratch, *register);
            }
            match value.value {
                Value::Constant(constant) if value.allocation.register.is_none() => {
                    emit_load_immediate(code, *register, constant)?;
                }
                _ => {
                    let source = value.allocation.register.ok_or(
                        MaterializationError::NoRegisterAllocation {
                            block,
                            statement: index,
                        },
                    )?;
                    emit_move(code, *register, source);
                }
            }
            if let Some(scratch) = value.allocation.restore {
                emit_move(code, *register, scratch);
            }
        }
        StatementType::Add { a, b } => {
            let allocation = allocation_of(statement, block, index)?;
            let rd = allocation
                .register
                .ok_or(MaterializationError::NoRegisterAllocation {
                    block,
                    statement: index,
                })?;
            let ra =
                a.allocation
                    .register
                    .ok_or(MaterializationError::NoRegisterAllocation {
                        block,
                        statement: index,
                    })?;
            match (b.allocation.register, b.value) {
                (Some(rb), _) => code.emit(add(rd, ra, rb)),
                (None, Value::Constant(constant)) => {
                    code.emit(addi(rd, ra, constant as i64 as i32));
                }
                (None, Value::Result(_)) => {
                    return Err(MaterializationError::NoRegisterAllocation {
                        block,
                        statement: index,
                    });
                }
            }
            if let Some(slot) = allocation.spill_slot {
                code.emit(sd(Gpr::FP, rd, slot_offset(slot)));
            }
        }
    }

    for operand in statement.operands() {
        emit_action(code, operand.allocation.register, operand.allocation.after)?;
    }
    Ok(())
}

fn allocation_of(
    statement: &Statement,
    block: u32,
    index: u32,
) -> Result<RegisterAllocation, MaterializationError> {
    statement
        .allocation
        .ok_or(MaterializationError::NoRegisterAllocation {
            block,
            statement: index,
        })
}

/// fp-relative byte offset of a spill slot, below the fp save area.
fn slot_offset(slot: usize) -> i32 {
    -8 * slot as i32 - FRAME_SIZE - 8
}

fn emit_action(
    code: &mut CodeBuffer,
    register: Option<Gpr>,
    action: Option<MemoryAction>,
) -> Result<(), MaterializationError> {
    let Some(action) = action else {
        return Ok(());
    };
    // The allocator only attaches actions to register-bound reads.
    let Some(register) = register else {
        return Ok(());
    };
    match action {
        MemoryAction::LoadImmediate(constant) => emit_load_immediate(code, register, constant)?,
        MemoryAction::LoadFromSpill(slot) => code.emit(ld(register, Gpr::FP, slot_offset(slot))),
        MemoryAction::StoreToSpill(slot) => {
            code.emit(sd(Gpr::FP, register, slot_offset(slot)))
        }
    }
    Ok(())
}

/// `mv rd, rs`, elided when source and destination agree.
fn emit_move(code: &mut CodeBuffer, rd: Gpr, rs: Gpr) {
    if rd != rs {
        code.emit(addi(rd, rs, 0));
    }
}

/// Materialize a constant into `rd`.
///
/// An i12 value is a single `addi`; an i32 value is `lui` + `addiw`
/// with the carry-adjusted upper part. Wider constants are not yet
/// supported.
fn emit_load_immediate(
    code: &mut CodeBuffer,
    rd: Gpr,
    constant: u64,
) -> Result<(), MaterializationError> {
    let value = constant as i64;
    if (-2048..2048).contains(&value) {
        code.emit(addi(rd, Gpr::ZERO, value as i32));
        return Ok(());
    }
    if value >= i32::MIN as i64 && value <= i32::MAX as i64 {
        let low = ((value as i32) << 20) >> 20;
        let high = ((value as i32).wrapping_sub(low) as u32) >> 12;
        code.emit(lui(rd, high & 0xfffff));
        code.emit(addiw(rd, rd, low));
        return Ok(());
    }
    Err(MaterializationError::UnsupportedImmediate(constant))
}
