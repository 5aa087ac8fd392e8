//! The cross-cutting breakpoint hit type shared by `exec` (which detects
//! hits while it performs an instruction's register/memory accesses) and
//! `simulator` (which surfaces the first one as a [`crate::simulator::StepOutcome`]).

use crate::enums::{FlagBit, Mode};
use crate::memory::MemFlags;
use crate::registers::RegFlags;

/// One of the four breakpoint domains spec'd in §4.8, populated at the
/// point an instruction's access actually matched an armed mask.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BreakpointHit {
    Memory { address: u32, flags: MemFlags },
    Register { mode: Mode, id: u8, flags: RegFlags },
    Flag(FlagBit),
}
