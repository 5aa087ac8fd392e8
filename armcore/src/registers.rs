//! Banked register file: R0-R15 across {User, FIQ, IRQ, SVC}, CPSR/SPSR,
//! and per-register/per-bank breakpoint masks.
//!
//! Physical storage holds only the registers ARM actually banks in
//! separate slots, rather than one array per mode. R0-R7 and R15 are common
//! to every mode; R8-R12 are banked only for FIQ; R13-R14 are banked for
//! FIQ, IRQ and SVC individually (User also has its own R13/R14 slot,
//! matching real ARM).

use crate::enums::Mode;
use bitflags::bitflags;
use std::collections::HashMap;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct RegFlags: u8 {
        const READ  = 0b01;
        const WRITE = 0b10;
    }
}

pub const PC: u8 = 15;
pub const LR: u8 = 14;
pub const SP: u8 = 13;

fn mode_index(mode: Mode) -> usize {
    match mode {
        Mode::User => 0,
        Mode::Fiq => 1,
        Mode::Irq => 2,
        Mode::Svc => 3,
    }
}

#[derive(Debug)]
pub struct RegisterFile {
    r0_r7: [u32; 8],
    r8_r12_common: [u32; 5],
    r8_r12_fiq: [u32; 5],
    /// indexed by [mode_index][0 for R13, 1 for R14]
    r13_r14: [[u32; 2]; 4],
    pc: u32,
    cpsr: u32,
    spsr: [u32; 4], // indexed by mode_index; spsr[User] is unused/invalid
    mode: Mode,
    breakpoints: HashMap<(Mode, u8), RegFlags>,
    deactivate_depth: u32,
}

impl Default for RegisterFile {
    fn default() -> Self {
        RegisterFile {
            r0_r7: [0; 8],
            r8_r12_common: [0; 5],
            r8_r12_fiq: [0; 5],
            r13_r14: [[0; 2]; 4],
            pc: 0,
            cpsr: Mode::Svc.bits(),
            spsr: [0; 4],
            mode: Mode::Svc,
            breakpoints: HashMap::new(),
            deactivate_depth: 0,
        }
    }
}

impl RegisterFile {
    pub fn new() -> RegisterFile {
        RegisterFile::default()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.cpsr = (self.cpsr & !crate::constants::CPSR_MODE_MASK) | mode.bits();
    }

    /// Reads logical register `id` (0..=15) as seen from `mode`, without
    /// touching breakpoint bookkeeping. Use [`check_access`] separately to
    /// test whether this read should raise a breakpoint.
    pub fn read(&self, mode: Mode, id: u8) -> u32 {
        match id {
            0..=7 => self.r0_r7[id as usize],
            8..=12 => {
                if mode == Mode::Fiq {
                    self.r8_r12_fiq[(id - 8) as usize]
                } else {
                    self.r8_r12_common[(id - 8) as usize]
                }
            }
            13 => self.r13_r14[mode_index(mode)][0],
            14 => self.r13_r14[mode_index(mode)][1],
            15 => self.pc,
            _ => unreachable!("register id out of range: {id}"),
        }
    }

    /// Writes logical register `id` as seen from `mode`, returning the
    /// previous value so callers can append an inverse history entry.
    /// R15 writes clamp to `max(value, PC_OFFSET)`.
    pub fn write(&mut self, mode: Mode, id: u8, value: u32) -> u32 {
        let old = self.read(mode, id);
        match id {
            0..=7 => self.r0_r7[id as usize] = value,
            8..=12 => {
                if mode == Mode::Fiq {
                    self.r8_r12_fiq[(id - 8) as usize] = value;
                } else {
                    self.r8_r12_common[(id - 8) as usize] = value;
                }
            }
            13 => self.r13_r14[mode_index(mode)][0] = value,
            14 => self.r13_r14[mode_index(mode)][1] = value,
            15 => self.pc = value.max(crate::constants::PC_OFFSET),
            _ => unreachable!("register id out of range: {id}"),
        }
        old
    }

    /// Sets register `id` without clamping, bypassing the R15 invariant.
    /// Used only by `stepBack` to restore a prior raw value exactly.
    pub fn write_raw(&mut self, mode: Mode, id: u8, value: u32) {
        match id {
            15 => self.pc = value,
            _ => {
                self.write(mode, id, value);
            }
        }
    }

    pub fn cpsr(&self) -> u32 {
        self.cpsr
    }

    pub fn set_cpsr(&mut self, value: u32) -> u32 {
        let old = self.cpsr;
        self.cpsr = value;
        if let Some(m) = Mode::from_cpsr_bits(value) {
            self.mode = m;
        }
        old
    }

    pub fn spsr(&self, mode: Mode) -> Option<u32> {
        if mode == Mode::User {
            None
        } else {
            Some(self.spsr[mode_index(mode)])
        }
    }

    pub fn set_spsr(&mut self, mode: Mode, value: u32) -> Option<u32> {
        if mode == Mode::User {
            return None;
        }
        let old = self.spsr[mode_index(mode)];
        self.spsr[mode_index(mode)] = value;
        Some(old)
    }

    pub fn set_breakpoint(&mut self, mode: Mode, id: u8, flags: RegFlags) {
        if flags.is_empty() {
            self.breakpoints.remove(&(mode, id));
        } else {
            self.breakpoints.insert((mode, id), flags);
        }
    }

    /// Returns whether accessing register `id` in `mode` with `kind` should
    /// raise a breakpoint, honoring the deactivation counter used during
    /// disassembly/explain.
    pub fn check_access(&self, mode: Mode, id: u8, kind: RegFlags) -> bool {
        if self.deactivate_depth > 0 {
            return false;
        }
        self.breakpoints
            .get(&(mode, id))
            .is_some_and(|f| f.intersects(kind))
    }

    pub fn deactivate_breakpoints(&mut self) {
        self.deactivate_depth += 1;
    }

    pub fn reactivate_breakpoints(&mut self) {
        self.deactivate_depth = self.deactivate_depth.saturating_sub(1);
    }
}

/// RAII guard that deactivates register (and, via the simulator, memory)
/// breakpoints for its lifetime. Strictly nested: dropping an inner guard
/// never re-activates breakpoints while an outer guard is still alive,
/// because the depth counter is decremented rather than reset.
pub struct BreakpointGuard<'a> {
    regs: &'a mut RegisterFile,
}

impl<'a> BreakpointGuard<'a> {
    pub fn new(regs: &'a mut RegisterFile) -> Self {
        regs.deactivate_breakpoints();
        BreakpointGuard { regs }
    }
}

impl Drop for BreakpointGuard<'_> {
    fn drop(&mut self) {
        self.regs.reactivate_breakpoints();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn banking_isolates_fiq_r8() {
        let mut regs = RegisterFile::new();
        regs.write(Mode::User, 8, 111);
        regs.write(Mode::Fiq, 8, 222);
        assert_eq!(regs.read(Mode::User, 8), 111);
        assert_eq!(regs.read(Mode::Fiq, 8), 222);
        assert_eq!(regs.read(Mode::Svc, 8), 111);
    }

    #[test]
    fn r13_r14_banked_per_mode() {
        let mut regs = RegisterFile::new();
        regs.write(Mode::User, 13, 1);
        regs.write(Mode::Irq, 13, 2);
        regs.write(Mode::Svc, 13, 3);
        assert_eq!(regs.read(Mode::User, 13), 1);
        assert_eq!(regs.read(Mode::Irq, 13), 2);
        assert_eq!(regs.read(Mode::Svc, 13), 3);
    }

    #[test]
    fn pc_write_clamps_to_offset() {
        let mut regs = RegisterFile::new();
        regs.write(Mode::User, 15, 2);
        assert_eq!(regs.read(Mode::User, 15), crate::constants::PC_OFFSET);
    }

    #[test]
    fn breakpoint_guard_is_strictly_nested() {
        let mut regs = RegisterFile::new();
        regs.set_breakpoint(Mode::User, 0, RegFlags::READ);
        assert!(regs.check_access(Mode::User, 0, RegFlags::READ));
        {
            let _outer = BreakpointGuard::new(&mut regs);
            assert!(!regs.check_access(Mode::User, 0, RegFlags::READ));
            {
                let _inner = BreakpointGuard::new(&mut regs);
                assert!(!regs.check_access(Mode::User, 0, RegFlags::READ));
            }
            assert!(!regs.check_access(Mode::User, 0, RegFlags::READ));
        }
        assert!(regs.check_access(Mode::User, 0, RegFlags::READ));
    }

    #[test]
    fn spsr_invalid_in_user_mode() {
        let mut regs = RegisterFile::new();
        assert_eq!(regs.spsr(Mode::User), None);
        assert_eq!(regs.set_spsr(Mode::User, 5), None);
        assert_eq!(regs.set_spsr(Mode::Svc, 7), Some(0));
        assert_eq!(regs.spsr(Mode::Svc), Some(7));
    }
}
