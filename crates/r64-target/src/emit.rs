//! Code emission.

use riscv64_encoder::Inst;

/// A code buffer that accumulates RV64I instructions.
///
/// Instructions are stored in structured form and encoded to binary
/// only when `as_bytes()` is called.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    instructions: Vec<Inst>,
}

impl CodeBuffer {
    /// Create a new empty code buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a structured instruction.
    pub fn emit(&mut self, inst: Inst) {
        self.instructions.push(inst);
    }

    /// Get the structured instructions.
    pub fn instructions(&self) -> &[Inst] {
        &self.instructions
    }

    /// Get the current code size in bytes.
    pub fn len(&self) -> usize {
        self.instructions.len() * 4
    }

    /// Whether nothing has been emitted.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Get the code as encoded little-endian bytes.
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.instructions.len() * 4);
        for inst in &self.instructions {
            bytes.extend_from_slice(&inst.encode().to_le_bytes());
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riscv64_encoder::{addi, Gpr};

    #[test]
    fn test_code_buffer() {
        let mut buf = CodeBuffer::new();
        assert!(buf.is_empty());

        let inst = addi(Gpr::A0, Gpr::A1, 5);
        buf.emit(inst);
        assert_eq!(buf.len(), 4);

        buf.emit(inst);
        assert_eq!(buf.len(), 8);

        let bytes = buf.as_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes[0..4], inst.encode().to_le_bytes());
    }
}
