//! RV64 target implementation.
//!
//! This crate turns an analyzed IR function into a linkable object:
//! - Register allocation over the dominator chain
//! - Independent verification of the allocated program
//! - Lowering to RV64I machine code
//! - ELF64 relocatable object emission

mod elf;
mod emit;
mod materialize;
mod regalloc;
mod verify;

use thiserror::Error;

use r64_ir::Function;

pub use elf::{ElfWriter, Relocation, R_RISCV_CALL_PLT, R_RISCV_HI20, R_RISCV_LO12_I};
pub use emit::CodeBuffer;
pub use materialize::{materialize, MaterializationError};
pub use regalloc::{allocate_registers, AllocationError};
pub use verify::{verify_register_allocation, VerificationError};

/// Any failure on the allocate → verify → materialize path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error(transparent)]
    Materialization(#[from] MaterializationError),
}

/// Compile a function: allocate registers, verify the allocation, and
/// materialize code and symbol into `writer`.
pub fn compile_function(
    function: &mut Function,
    writer: &mut ElfWriter,
) -> Result<(), BackendError> {
    allocate_registers(function)?;
    verify_register_allocation(function)?;
    materialize(function, writer)?;
    Ok(())
}
