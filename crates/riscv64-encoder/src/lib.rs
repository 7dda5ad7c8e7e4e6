//! RISC-V 64-bit instruction encoder.
//!
//! This crate provides the RV64I register model and functions to encode
//! the RV64I instruction subset used by the backend into binary form.

#![no_std]

extern crate alloc;

mod inst;
mod regs;

pub use inst::{add, addi, addiw, jalr, ld, lui, sd, Inst};
pub use regs::Gpr;
