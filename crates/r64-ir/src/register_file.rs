//! Register-file and spill-slot bookkeeping.

use alloc::vec::Vec;

use riscv64_encoder::Gpr;

use crate::value::ValueRef;

/// A dense mapping from physical register to the SSA value currently
/// assigned to it, or empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterFile {
    regs: [Option<ValueRef>; 32],
}

impl RegisterFile {
    /// Create an empty register file.
    pub fn new() -> Self {
        Self::default()
    }

    /// The value assigned to `register`, if any.
    pub fn get(&self, register: Gpr) -> Option<ValueRef> {
        self.regs[register.num() as usize]
    }

    /// Assign `value` to `register`.
    pub fn set(&mut self, register: Gpr, value: ValueRef) {
        debug_assert!(register != Gpr::ZERO, "x0 is never an allocation target");
        self.regs[register.num() as usize] = Some(value);
    }

    /// Clear the assignment of `register`.
    pub fn clear(&mut self, register: Gpr) {
        self.regs[register.num() as usize] = None;
    }

    /// Whether no register is assigned.
    pub fn is_empty(&self) -> bool {
        self.regs.iter().all(Option::is_none)
    }

    /// Iterate over the occupied registers.
    pub fn occupied(&self) -> impl Iterator<Item = (Gpr, ValueRef)> + '_ {
        self.regs
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| (Gpr::new(i as u8), v)))
    }

    /// Field-wise merge of another register file into this one.
    ///
    /// Empty entries take the other side's occupant. Two non-empty
    /// entries that disagree make the merge fail; the conflicting
    /// register is returned.
    pub fn merge(&mut self, other: &RegisterFile) -> Result<(), Gpr> {
        for i in 0..32 {
            match (self.regs[i], other.regs[i]) {
                (_, None) => {}
                (None, Some(v)) => self.regs[i] = Some(v),
                (Some(a), Some(b)) => {
                    if a != b {
                        return Err(Gpr::new(i as u8));
                    }
                }
            }
        }
        Ok(())
    }
}

/// A growable array of spill slots with a lowest-free-slot cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Spill {
    slots: Vec<Option<ValueRef>>,
    lowest_free_index: usize,
}

impl Spill {
    /// Create an empty spill array.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `value` the lowest free slot and return its index.
    pub fn put(&mut self, value: ValueRef) -> usize {
        let slot = self.lowest_free_index;
        if slot == self.slots.len() {
            self.slots.push(Some(value));
        } else {
            self.slots[slot] = Some(value);
        }
        // Advance the cursor to the next free slot.
        self.lowest_free_index = self.slots[slot + 1..]
            .iter()
            .position(Option::is_none)
            .map(|p| slot + 1 + p)
            .unwrap_or(self.slots.len());
        slot
    }

    /// Release `slot` and lower the cursor.
    pub fn delete(&mut self, slot: usize) {
        self.slots[slot] = None;
        if slot < self.lowest_free_index {
            self.lowest_free_index = slot;
        }
    }

    /// The occupant of `slot`, if any.
    pub fn get(&self, slot: usize) -> Option<ValueRef> {
        self.slots.get(slot).copied().flatten()
    }

    /// Total number of slots ever in use at once.
    pub fn size(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vr(statement: u32) -> ValueRef {
        ValueRef {
            function: 0,
            block: 2,
            statement,
        }
    }

    #[test]
    fn test_register_file_set_get() {
        let mut file = RegisterFile::new();
        assert!(file.is_empty());
        file.set(Gpr::A0, vr(0));
        assert_eq!(file.get(Gpr::A0), Some(vr(0)));
        file.clear(Gpr::A0);
        assert!(file.is_empty());
    }

    #[test]
    fn test_register_file_merge_disjoint() {
        let mut a = RegisterFile::new();
        a.set(Gpr::A0, vr(0));
        let mut b = RegisterFile::new();
        b.set(Gpr::A1, vr(1));
        assert!(a.merge(&b).is_ok());
        assert_eq!(a.get(Gpr::A0), Some(vr(0)));
        assert_eq!(a.get(Gpr::A1), Some(vr(1)));
    }

    #[test]
    fn test_register_file_merge_agreeing() {
        let mut a = RegisterFile::new();
        a.set(Gpr::A0, vr(0));
        let mut b = RegisterFile::new();
        b.set(Gpr::A0, vr(0));
        assert!(a.merge(&b).is_ok());
    }

    #[test]
    fn test_register_file_merge_conflict() {
        let mut a = RegisterFile::new();
        a.set(Gpr::A0, vr(0));
        let mut b = RegisterFile::new();
        b.set(Gpr::A0, vr(1));
        assert_eq!(a.merge(&b), Err(Gpr::A0));
    }

    #[test]
    fn test_spill_put_delete() {
        let mut spill = Spill::new();
        assert_eq!(spill.put(vr(0)), 0);
        assert_eq!(spill.put(vr(1)), 1);
        assert_eq!(spill.put(vr(2)), 2);
        spill.delete(1);
        // The lowest free slot is reused first.
        assert_eq!(spill.put(vr(3)), 1);
        assert_eq!(spill.put(vr(4)), 3);
        assert_eq!(spill.size(), 4);
    }
}
