//! RV64 Intermediate Representation (IR).
//!
//! This crate defines the core types of the backend:
//! - Values (SSA constants and statement results)
//! - Statements (register reads/writes and adds) with operand bundles
//! - Blocks (basic blocks with a single exit)
//! - Functions (prologue/epilogue/entry blocks plus the producer API)
//! - The control-flow graph analysis (BFS numbering, post-order,
//!   predecessors, immediate dominators, dominator depths)
//! - Register-file and spill-slot bookkeeping shared with the allocator

#![no_std]

extern crate alloc;

mod block;
mod cfg;
mod error;
mod function;
mod intset;
mod register_file;
mod simple_cfg;
mod statement;
mod value;

pub use block::{Block, Exit};
pub use cfg::{Cfg, DominatorIter, Successors, UNREACHABLE};
pub use error::{FunctionError, ValueError};
pub use function::{Function, SavedRegisters, ENTRY_BLOCK, EPILOGUE_BLOCK, PROLOGUE_BLOCK};
pub use intset::IntSet;
pub use register_file::{RegisterFile, Spill};
pub use simple_cfg::SimpleCfg;
pub use statement::{Operands, OperandsMut, Statement, StatementType};
pub use value::{
    Immediate, MemoryAction, ReadAllocation, RegisterAllocation, Value, ValueInfo, ValueRef,
};
