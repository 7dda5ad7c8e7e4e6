//! Functions.

use alloc::{
    string::{String, ToString},
    vec::Vec,
};
use core::sync::atomic::{AtomicU64, Ordering};

use riscv64_encoder::Gpr;

use crate::{
    block::{Block, Exit},
    cfg::{Cfg, Successors},
    error::FunctionError,
    statement::Statement,
    value::{Value, ValueRef},
};

/// Block index of the prologue.
pub const PROLOGUE_BLOCK: u32 = 0;
/// Block index of the epilogue.
pub const EPILOGUE_BLOCK: u32 = 1;
/// Block index of the entry block.
pub const ENTRY_BLOCK: u32 = 2;

/// Process-wide counter minting function identities. Uniqueness across
/// concurrent compilations is the only guarantee.
static NEXT_FUNCTION_ID: AtomicU64 = AtomicU64::new(0);

/// The callee-saved registers captured by the prologue, paired with the
/// SSA value each read produced.
#[derive(Debug, Clone, Default)]
pub struct SavedRegisters {
    pub entries: Vec<(Gpr, Value)>,
}

/// A function under construction or compilation.
///
/// Three blocks exist from initialization on: the prologue (index 0,
/// jumping to the entry), the epilogue (index 1, exiting the function),
/// and the entry (index 2, terminator set by the producer).
#[derive(Debug, Clone)]
pub struct Function {
    /// Display name, also used for the object-file symbol.
    pub name: String,
    /// Process-unique id.
    pub id: u64,
    /// Blocks in creation order.
    pub blocks: Vec<Block>,
    /// Present after `compute_cfg`.
    pub cfg: Option<Cfg>,
    /// Number of spill slots, present after allocation.
    pub spill_size: Option<usize>,
    /// Callee-saved registers read at the prologue.
    pub saved_registers: SavedRegisters,
    has_exit: bool,
    parameters: usize,
}

/// Callee-saved registers in capture order.
const CALLEE_SAVED: [Gpr; 16] = [
    Gpr::RA,
    Gpr::SP,
    Gpr::GP,
    Gpr::TP,
    Gpr::FP,
    Gpr::S1,
    Gpr::S2,
    Gpr::S3,
    Gpr::S4,
    Gpr::S5,
    Gpr::S6,
    Gpr::S7,
    Gpr::S8,
    Gpr::S9,
    Gpr::S10,
    Gpr::S11,
];

impl Function {
    /// Create a function with its prologue, epilogue and entry blocks.
    ///
    /// The prologue reads every callee-saved register so the epilogue
    /// can restore them, and unconditionally jumps to the entry.
    pub fn init(name: &str) -> Self {
        let id = NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed);
        let mut function = Self {
            name: name.to_string(),
            id,
            blocks: Vec::new(),
            cfg: None,
            spill_size: None,
            saved_registers: SavedRegisters::default(),
            has_exit: false,
            parameters: 0,
        };
        let prologue = function.add_block();
        let epilogue = function.add_block();
        let entry = function.add_block();
        debug_assert_eq!(prologue, PROLOGUE_BLOCK);
        debug_assert_eq!(epilogue, EPILOGUE_BLOCK);
        debug_assert_eq!(entry, ENTRY_BLOCK);
        function.blocks[PROLOGUE_BLOCK as usize].jump(ENTRY_BLOCK);
        for register in CALLEE_SAVED {
            let value = function.blocks[PROLOGUE_BLOCK as usize].append_read_register(register);
            function.saved_registers.entries.push((register, value));
        }
        function
    }

    /// Append an empty block and return its index.
    pub fn add_block(&mut self) -> u32 {
        let id = self.blocks.len() as u32;
        self.blocks.push(Block::new(id, self.id));
        id
    }

    /// Read the next ABI argument register into the prologue.
    pub fn add_parameter(&mut self, name: Option<&str>) -> Result<Value, FunctionError> {
        let index = self.parameters;
        let register =
            Gpr::arg_register(index).ok_or(FunctionError::TooManyParameters(index))?;
        self.parameters += 1;
        let value = self.blocks[PROLOGUE_BLOCK as usize].append_read_register(register);
        if let (Some(name), Value::Result(r)) = (name, value) {
            self.blocks[r.block as usize].statements[r.statement as usize].name =
                Some(name.to_string());
        }
        Ok(value)
    }

    /// Terminate the function: `block` jumps to the epilogue, which
    /// writes `return_value` into a0. Legal exactly once.
    pub fn set_function_exit(
        &mut self,
        block: u32,
        return_value: Value,
    ) -> Result<(), FunctionError> {
        if self.has_exit {
            return Err(FunctionError::MultipleExits);
        }
        self.blocks[block as usize].jump(EPILOGUE_BLOCK);
        self.blocks[EPILOGUE_BLOCK as usize].append_write_register(Gpr::A0, return_value)?;
        self.has_exit = true;
        Ok(())
    }

    /// Append the epilogue writes restoring the callee-saved registers
    /// from the values the prologue captured.
    pub fn add_pseudo_instructions(&mut self) -> Result<(), FunctionError> {
        if !self.has_exit {
            return Err(FunctionError::NoExit);
        }
        for index in 0..self.saved_registers.entries.len() {
            let (register, value) = self.saved_registers.entries[index];
            self.blocks[EPILOGUE_BLOCK as usize].append_write_register(register, value)?;
        }
        Ok(())
    }

    /// Whether `set_function_exit` has been called.
    pub fn has_exit(&self) -> bool {
        self.has_exit
    }

    /// Build and analyze the CFG from the block exits.
    pub fn compute_cfg(&mut self) -> &Cfg {
        let succs = self
            .blocks
            .iter()
            .map(|block| match block.exit {
                Exit::Jump(target) => Successors::One(target),
                Exit::FunctionExit => Successors::None,
            })
            .collect();
        self.cfg.insert(Cfg::analyze(succs))
    }

    /// The statement a result reference points at, if it belongs to
    /// this function.
    pub fn statement(&self, r: ValueRef) -> Option<&Statement> {
        if r.function != self.id {
            return None;
        }
        self.blocks
            .get(r.block as usize)?
            .statements
            .get(r.statement as usize)
    }

    /// Mutable access to the statement a result reference points at.
    pub fn statement_mut(&mut self, r: ValueRef) -> Option<&mut Statement> {
        if r.function != self.id {
            return None;
        }
        self.blocks
            .get_mut(r.block as usize)?
            .statements
            .get_mut(r.statement as usize)
    }
}
