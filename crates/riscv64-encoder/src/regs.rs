//! RISC-V 64-bit general-purpose registers.

/// RISC-V 64-bit general-purpose register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Gpr(u8);

impl Gpr {
    /// Create a new GPR from register number (0-31).
    ///
    /// # Panics
    ///
    /// Panics if the register number is >= 32.
    pub fn new(num: u8) -> Self {
        assert!(num < 32, "Register number must be < 32");
        Self(num)
    }

    /// Get the register number (0-31).
    pub fn num(&self) -> u8 {
        self.0
    }

    /// Get the argument register for the given argument index.
    ///
    /// The RISC-V calling convention passes the first eight integer
    /// arguments in a0-a7. Returns `None` for indexes >= 8.
    pub fn arg_register(index: usize) -> Option<Gpr> {
        if index < 8 {
            Some(Gpr(10 + index as u8))
        } else {
            None
        }
    }

    /// Whether the callee must preserve this register across a call.
    ///
    /// On RV64I: ra, sp, gp, tp, fp/s0, s1-s11.
    pub fn is_callee_saved(&self) -> bool {
        matches!(self.0, 1..=4 | 8..=9 | 18..=27)
    }

    /// The ABI name of this register ("a0", "s11", ...).
    pub fn abi_name(&self) -> &'static str {
        match self.0 {
            0 => "zero",
            1 => "ra",
            2 => "sp",
            3 => "gp",
            4 => "tp",
            5 => "t0",
            6 => "t1",
            7 => "t2",
            8 => "fp",
            9 => "s1",
            10 => "a0",
            11 => "a1",
            12 => "a2",
            13 => "a3",
            14 => "a4",
            15 => "a5",
            16 => "a6",
            17 => "a7",
            18 => "s2",
            19 => "s3",
            20 => "s4",
            21 => "s5",
            22 => "s6",
            23 => "s7",
            24 => "s8",
            25 => "s9",
            26 => "s10",
            27 => "s11",
            28 => "t3",
            29 => "t4",
            30 => "t5",
            31 => "t6",
            _ => unreachable!(),
        }
    }
}

// Named registers
impl Gpr {
    // x0: hard-wired zero
    pub const ZERO: Gpr = Gpr(0);
    // x1: return address
    pub const RA: Gpr = Gpr(1);
    // x2: stack pointer
    pub const SP: Gpr = Gpr(2);
    // x3: global pointer
    pub const GP: Gpr = Gpr(3);
    // x4: thread pointer
    pub const TP: Gpr = Gpr(4);
    // x5: temporary
    pub const T0: Gpr = Gpr(5);
    // x6: temporary
    pub const T1: Gpr = Gpr(6);
    // x7: temporary
    pub const T2: Gpr = Gpr(7);
    // x8: saved register / frame pointer
    pub const FP: Gpr = Gpr(8);
    // x8: alias of FP
    pub const S0: Gpr = Gpr(8);
    // x9: saved register
    pub const S1: Gpr = Gpr(9);
    // x10: argument / return value
    pub const A0: Gpr = Gpr(10);
    // x11: argument / return value
    pub const A1: Gpr = Gpr(11);
    // x12: argument
    pub const A2: Gpr = Gpr(12);
    // x13: argument
    pub const A3: Gpr = Gpr(13);
    // x14: argument
    pub const A4: Gpr = Gpr(14);
    // x15: argument
    pub const A5: Gpr = Gpr(15);
    // x16: argument
    pub const A6: Gpr = Gpr(16);
    // x17: argument
    pub const A7: Gpr = Gpr(17);
    // x18: saved register
    pub const S2: Gpr = Gpr(18);
    // x19: saved register
    pub const S3: Gpr = Gpr(19);
    // x20: saved register
    pub const S4: Gpr = Gpr(20);
    // x21: saved register
    pub const S5: Gpr = Gpr(21);
    // x22: saved register
    pub const S6: Gpr = Gpr(22);
    // x23: saved register
    pub const S7: Gpr = Gpr(23);
    // x24: saved register
    pub const S8: Gpr = Gpr(24);
    // x25: saved register
    pub const S9: Gpr = Gpr(25);
    // x26: saved register
    pub const S10: Gpr = Gpr(26);
    // x27: saved register
    pub const S11: Gpr = Gpr(27);
    // x28: temporary
    pub const T3: Gpr = Gpr(28);
    // x29: temporary
    pub const T4: Gpr = Gpr(29);
    // x30: temporary
    pub const T5: Gpr = Gpr(30);
    // x31: temporary
    pub const T6: Gpr = Gpr(31);
}

impl core::fmt::Display for Gpr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.abi_name())
    }
}
