//! Enumerations shared across decode, execute and the assembler.
//!
//! Condition codes, shift kinds and the data-processing opcode list are
//! derived with `EnumFromStr` (from `armutil-derive`), so `armasm` can parse
//! a mnemonic suffix straight into one of these without a hand-written match
//! arm per variant.

use armutil_derive::EnumFromStr;
use num_derive::{FromPrimitive, ToPrimitive};

/// Processor mode. Banking only ever affects R8-R14 (FIQ) or R13-R14
/// (IRQ/SVC); User is the baseline bank for R0-R7 and R15.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, FromPrimitive, ToPrimitive)]
pub enum Mode {
    User = 0b10000,
    Fiq = 0b10001,
    Irq = 0b10010,
    Svc = 0b10011,
}

impl Mode {
    pub fn from_cpsr_bits(bits: u32) -> Option<Mode> {
        match bits & 0x1F {
            0b10000 => Some(Mode::User),
            0b10001 => Some(Mode::Fiq),
            0b10010 => Some(Mode::Irq),
            0b10011 => Some(Mode::Svc),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        self as u32
    }

    pub fn is_privileged(self) -> bool {
        self != Mode::User
    }
}

/// ARM condition codes. `NV` is reserved and always evaluates false.
#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumFromStr)]
pub enum Condition {
    EQ,
    NE,
    CS,
    CC,
    MI,
    PL,
    VS,
    VC,
    HI,
    LS,
    GE,
    LT,
    GT,
    LE,
    AL,
    NV,
}

impl Default for Condition {
    fn default() -> Self {
        Condition::AL
    }
}

/// Shifter operand kinds.
#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumFromStr)]
pub enum ShiftKind {
    LSL,
    LSR,
    ASR,
    ROR,
    RRX,
}

/// Data-processing opcodes.
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive, EnumFromStr)]
pub enum DpOpcode {
    AND,
    EOR,
    SUB,
    RSB,
    ADD,
    ADC,
    SBC,
    RSC,
    TST,
    TEQ,
    CMP,
    CMN,
    ORR,
    MOV,
    BIC,
    MVN,
}

impl DpOpcode {
    /// "Test" opcodes compute flags but never write `Rd`.
    pub fn is_test(self) -> bool {
        matches!(
            self,
            DpOpcode::TST | DpOpcode::TEQ | DpOpcode::CMP | DpOpcode::CMN
        )
    }

    /// Opcodes whose carry/overflow come from the ALU's add/subtract,
    /// rather than from the shifter.
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            DpOpcode::SUB
                | DpOpcode::RSB
                | DpOpcode::ADD
                | DpOpcode::ADC
                | DpOpcode::SBC
                | DpOpcode::RSC
                | DpOpcode::CMP
                | DpOpcode::CMN
        )
    }
}

/// Which flag bit a breakpoint or history entry refers to.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum FlagBit {
    N,
    Z,
    C,
    V,
    I,
    F,
}

/// Exception kinds the simulator core can inject.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Exception {
    Reset,
    Swi,
    Irq,
    Fiq,
}

impl Exception {
    pub fn vector(self) -> u32 {
        match self {
            Exception::Reset => super::constants::VECTOR_RESET,
            Exception::Swi => super::constants::VECTOR_SWI,
            Exception::Irq => super::constants::VECTOR_IRQ,
            Exception::Fiq => super::constants::VECTOR_FIQ,
        }
    }

    pub fn mode(self) -> Mode {
        match self {
            Exception::Reset | Exception::Swi => Mode::Svc,
            Exception::Irq => Mode::Irq,
            Exception::Fiq => Mode::Fiq,
        }
    }

    /// Whether this exception sets CPSR.I, and whether it additionally sets
    /// CPSR.F.
    pub fn masks(self) -> (bool, bool) {
        match self {
            Exception::Reset => (true, true),
            Exception::Swi => (true, false),
            Exception::Irq => (true, false),
            Exception::Fiq => (true, true),
        }
    }

    /// ARM exception priority, highest first. Used to break ties when two
    /// exceptions are due on the same cycle.
    pub fn priority(self) -> u8 {
        match self {
            Exception::Reset => 0,
            Exception::Fiq => 1,
            Exception::Swi => 2,
            Exception::Irq => 3,
        }
    }
}
