//! Per-family execution semantics. Each function takes the
//! already-decoded instruction plus the machine state it's allowed to touch,
//! applies the effect, and appends an undo [`Entry`] per write so
//! `stepBack` can replay it.

use crate::breakpoints::BreakpointHit;
use crate::decode::{
    Branch, DataProcessing, Multiply, Operand2, PsrOp, PsrTransfer, SingleTransfer, Swap, Swi,
    TransferOffset,
};
use crate::enums::{DpOpcode, Mode};
use crate::error::ExecutionError;
use crate::history::{Entry, HistoryKey, HistoryLog, Writer};
use crate::memory::{MemFlags, Memory};
use crate::registers::{RegFlags, RegisterFile, LR, PC};
use crate::shifter;

/// What happened after executing one instruction, beyond the ordinary
/// "registers/memory changed" effect already captured in history.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExecOutcome {
    Continue,
    Halted,
    SoftwareInterrupt(u32),
}

fn record_reg(history: &mut HistoryLog, mode: Mode, id: u8, old: u32, new: u32, cycle: u64) {
    if old != new {
        history.record(Entry {
            writer: Writer::Register,
            key: HistoryKey::Register { mode, id },
            old,
            new,
            cycle,
        });
    }
}

fn write_reg(regs: &mut RegisterFile, history: &mut HistoryLog, mode: Mode, id: u8, value: u32, cycle: u64) {
    let old = regs.write(mode, id, value);
    record_reg(history, mode, id, old, value, cycle);
}

/// Writes `id` and, if an armed write-breakpoint matches, appends a
/// [`BreakpointHit`] for the caller to surface once the instruction finishes
/// applying the rest of its effects.
fn write_reg_checked(
    regs: &mut RegisterFile,
    history: &mut HistoryLog,
    mode: Mode,
    id: u8,
    value: u32,
    cycle: u64,
    hits: &mut Vec<BreakpointHit>,
) {
    if regs.check_access(mode, id, RegFlags::WRITE) {
        hits.push(BreakpointHit::Register { mode, id, flags: RegFlags::WRITE });
    }
    write_reg(regs, history, mode, id, value, cycle);
}

/// Reads `id` and, if an armed read-breakpoint matches, appends a
/// [`BreakpointHit`].
fn read_reg_checked(regs: &RegisterFile, mode: Mode, id: u8, hits: &mut Vec<BreakpointHit>) -> u32 {
    if regs.check_access(mode, id, RegFlags::READ) {
        hits.push(BreakpointHit::Register { mode, id, flags: RegFlags::READ });
    }
    regs.read(mode, id)
}

/// Reads a memory operand and, if an armed read-breakpoint matches (byte or
/// uninitialized-access), appends a [`BreakpointHit`].
fn read_mem_checked(memory: &Memory, address: u32, size: u32, hits: &mut Vec<BreakpointHit>) {
    if let Some(flags) = memory.pending_breakpoint(address, size, MemFlags::READ | MemFlags::UNINITIALIZED) {
        hits.push(BreakpointHit::Memory { address, flags });
    }
}

/// Checks a memory write-breakpoint before the caller performs the write.
fn write_mem_checked(memory: &Memory, address: u32, size: u32, hits: &mut Vec<BreakpointHit>) {
    if let Some(flags) = memory.pending_breakpoint(address, size, MemFlags::WRITE) {
        hits.push(BreakpointHit::Memory { address, flags });
    }
}

fn write_cpsr(regs: &mut RegisterFile, history: &mut HistoryLog, value: u32, cycle: u64) {
    let old = regs.set_cpsr(value);
    if old != value {
        history.record(Entry {
            writer: Writer::Cpsr,
            key: HistoryKey::Cpsr,
            old,
            new: value,
            cycle,
        });
    }
}

fn resolve_operand2(
    regs: &RegisterFile,
    mode: Mode,
    op2: Operand2,
    carry_in: bool,
    hits: &mut Vec<BreakpointHit>,
) -> (u32, bool) {
    match op2 {
        Operand2::Immediate(v) => (v, carry_in),
        Operand2::Register { rm, shift } => {
            let value = if rm == PC {
                regs.read(mode, PC) + crate::constants::PC_OFFSET
            } else {
                read_reg_checked(regs, mode, rm, hits)
            };
            match shift.amount {
                shifter::ShiftAmount::Immediate(imm) => {
                    shifter::apply_immediate(value, shift.kind, imm, carry_in)
                }
                shifter::ShiftAmount::Register(rs) => {
                    let amount = read_reg_checked(regs, mode, rs, hits) & 0xFF;
                    shifter::apply_register_shift(value, shift.kind, amount, carry_in)
                }
            }
        }
    }
}

fn add_with_flags(a: u32, b: u32, carry_in: u32) -> (u32, bool, bool) {
    let (r1, c1) = a.overflowing_add(b);
    let (result, c2) = r1.overflowing_add(carry_in);
    let carry = c1 || c2;
    let overflow = ((a ^ result) & (b ^ result)) & 0x8000_0000 != 0;
    (result, carry, overflow)
}

fn sub_with_flags(a: u32, b: u32, borrow_in: u32) -> (u32, bool, bool) {
    // ARM computes SUB as A + ~B + carry_in, where carry_in=1 means "no
    // borrow". `borrow_in` here is the incoming carry bit (1 = no borrow).
    add_with_flags(a, !b, borrow_in)
}

/// Executes a data-processing instruction. Returns the next
/// PC when the destination is R15, otherwise `None`.
pub fn data_processing(
    insn: DataProcessing,
    regs: &mut RegisterFile,
    history: &mut HistoryLog,
    cycle: u64,
    hits: &mut Vec<BreakpointHit>,
) -> Option<u32> {
    let mode = regs.mode();
    let cpsr = regs.cpsr();
    let flags_in = crate::flags::Flags::from_cpsr(cpsr);
    let (op2, shifter_carry) = resolve_operand2(regs, mode, insn.operand2, flags_in.c, hits);
    let rn = if insn.rn == PC {
        regs.read(mode, PC) + crate::constants::PC_OFFSET
    } else {
        read_reg_checked(regs, mode, insn.rn, hits)
    };

    let (result, carry, overflow) = match insn.opcode {
        DpOpcode::AND | DpOpcode::TST => (rn & op2, shifter_carry, flags_in.v),
        DpOpcode::EOR | DpOpcode::TEQ => (rn ^ op2, shifter_carry, flags_in.v),
        DpOpcode::SUB | DpOpcode::CMP => sub_with_flags(rn, op2, 1),
        DpOpcode::RSB => sub_with_flags(op2, rn, 1),
        DpOpcode::ADD | DpOpcode::CMN => add_with_flags(rn, op2, 0),
        DpOpcode::ADC => add_with_flags(rn, op2, flags_in.c as u32),
        DpOpcode::SBC => sub_with_flags(rn, op2, flags_in.c as u32),
        DpOpcode::RSC => sub_with_flags(op2, rn, flags_in.c as u32),
        DpOpcode::ORR => (rn | op2, shifter_carry, flags_in.v),
        DpOpcode::MOV => (op2, shifter_carry, flags_in.v),
        DpOpcode::BIC => (rn & !op2, shifter_carry, flags_in.v),
        DpOpcode::MVN => (!op2, shifter_carry, flags_in.v),
    };

    if insn.s {
        let mut flags = flags_in;
        flags.n = result & 0x8000_0000 != 0;
        flags.z = result == 0;
        flags.c = carry;
        flags.v = overflow;
        if insn.rd == PC {
            // Writing CPSR from SPSR on an `S`-suffixed PC-destination
            // instruction is the ARM "return from exception" idiom.
            if let Some(spsr) = regs.spsr(mode) {
                write_cpsr(regs, history, spsr, cycle);
            }
        } else {
            write_cpsr(regs, history, flags.write_into_cpsr(cpsr), cycle);
        }
    }

    if insn.opcode.is_test() {
        return None;
    }

    write_reg_checked(regs, history, mode, insn.rd, result, cycle, hits);
    if insn.rd == PC {
        Some(result)
    } else {
        None
    }
}

fn transfer_address(
    regs: &RegisterFile,
    mode: Mode,
    insn_rn: u8,
    offset_value: u32,
    up: bool,
    pre: bool,
    hits: &mut Vec<BreakpointHit>,
) -> (u32, u32) {
    let base = if insn_rn == PC {
        regs.read(mode, PC) + crate::constants::PC_OFFSET
    } else {
        read_reg_checked(regs, mode, insn_rn, hits)
    };
    let offset_addr = if up {
        base.wrapping_add(offset_value)
    } else {
        base.wrapping_sub(offset_value)
    };
    let access_addr = if pre { offset_addr } else { base };
    (access_addr, offset_addr)
}

/// Executes LDR/STR.
pub fn single_transfer(
    insn: SingleTransfer,
    regs: &mut RegisterFile,
    memory: &mut Memory,
    history: &mut HistoryLog,
    cycle: u64,
    hits: &mut Vec<BreakpointHit>,
) -> Result<Option<u32>, ExecutionError> {
    let mode = regs.mode();
    let flags_in = crate::flags::Flags::from_cpsr(regs.cpsr());
    let offset_value = match insn.offset {
        TransferOffset::Immediate(v) => v,
        TransferOffset::Register { rm, shift } => {
            let value = read_reg_checked(regs, mode, rm, hits);
            match shift.amount {
                shifter::ShiftAmount::Immediate(imm) => {
                    shifter::apply_immediate(value, shift.kind, imm, flags_in.c).0
                }
                shifter::ShiftAmount::Register(_) => {
                    // LDR/STR register-specified shift amounts are not part
                    // of the ARMv4 encoding this core implements; treat the
                    // immediate-shift-amount of zero as a no-op fallback.
                    value
                }
            }
        }
    };

    let (access_addr, offset_addr) =
        transfer_address(regs, mode, insn.rn, offset_value, insn.up, insn.pre, hits);
    let size = if insn.byte { 1 } else { 4 };

    let mut next_pc = None;
    if insn.load {
        read_mem_checked(memory, access_addr, size, hits);
        let loaded = memory.read(access_addr, size, false)?;
        write_reg_checked(regs, history, mode, insn.rd, loaded, cycle, hits);
        if insn.rd == PC {
            next_pc = Some(loaded);
        }
    } else {
        let value = if insn.rd == PC {
            regs.read(mode, PC) + crate::constants::PC_OFFSET
        } else {
            read_reg_checked(regs, mode, insn.rd, hits)
        };
        write_mem_checked(memory, access_addr, size, hits);
        let old = memory.read(access_addr, size, true).unwrap_or(0);
        memory.write(access_addr, size, value)?;
        history.record(Entry {
            writer: Writer::Memory,
            key: HistoryKey::Memory {
                address: access_addr,
                size,
            },
            old,
            new: value,
            cycle,
        });
    }

    // Writeback is skipped for LDR when Rd == Rn: the loaded value already
    // overwrote the base register, so a subsequent writeback would clobber
    // the load (left unenforced, matching the reference simulator's
    // "unpredictable in hardware, harmless here" stance; see DESIGN.md).
    if insn.writeback && !(insn.load && insn.rd == insn.rn) && insn.rn != PC {
        write_reg_checked(regs, history, mode, insn.rn, offset_addr, cycle, hits);
    }

    Ok(next_pc)
}

/// Executes LDM/STM.
pub fn block_transfer(
    insn: crate::decode::BlockTransfer,
    regs: &mut RegisterFile,
    memory: &mut Memory,
    history: &mut HistoryLog,
    cycle: u64,
    hits: &mut Vec<BreakpointHit>,
) -> Result<Option<u32>, ExecutionError> {
    let mode = regs.mode();
    let access_mode = if insn.user_bank { Mode::User } else { mode };
    let base = read_reg_checked(regs, mode, insn.rn, hits);
    let registers: Vec<u8> = (0..16).filter(|i| insn.register_list & (1 << i) != 0).collect();
    let count = registers.len() as u32;

    let mut addr = if insn.up {
        base
    } else {
        base.wrapping_sub(count * 4)
    };
    if insn.pre == insn.up {
        addr = addr.wrapping_add(4);
    }

    let mut next_pc = None;
    for r in &registers {
        if insn.load {
            read_mem_checked(memory, addr, 4, hits);
            let value = memory.read(addr, 4, false)?;
            write_reg_checked(regs, history, access_mode, *r, value, cycle, hits);
            if *r == PC {
                next_pc = Some(value);
            }
        } else {
            let value = if *r == PC {
                regs.read(access_mode, PC) + crate::constants::PC_OFFSET
            } else {
                read_reg_checked(regs, access_mode, *r, hits)
            };
            write_mem_checked(memory, addr, 4, hits);
            let old = memory.read(addr, 4, true).unwrap_or(0);
            memory.write(addr, 4, value)?;
            history.record(Entry {
                writer: Writer::Memory,
                key: HistoryKey::Memory { address: addr, size: 4 },
                old,
                new: value,
                cycle,
            });
        }
        addr = addr.wrapping_add(4);
    }

    if insn.writeback {
        let new_base = if insn.up {
            base.wrapping_add(count * 4)
        } else {
            base.wrapping_sub(count * 4)
        };
        write_reg_checked(regs, history, mode, insn.rn, new_base, cycle, hits);
    }

    Ok(next_pc)
}

/// Executes B/BL. Returns the branch target.
pub fn branch(insn: Branch, regs: &mut RegisterFile, history: &mut HistoryLog, cycle: u64, hits: &mut Vec<BreakpointHit>) -> u32 {
    let mode = regs.mode();
    let pc = read_reg_checked(regs, mode, PC, hits) + crate::constants::PC_OFFSET;
    let target = (pc as i64 + insn.offset as i64) as u32;
    if insn.link {
        let return_addr = regs.read(mode, PC) + crate::constants::WORD_BYTES;
        write_reg_checked(regs, history, mode, LR, return_addr, cycle, hits);
    }
    target
}

/// Executes MUL/MLA. `Rd` and `Rm` must not alias on real
/// hardware; this core does not enforce that restriction.
pub fn multiply(insn: Multiply, regs: &mut RegisterFile, history: &mut HistoryLog, cycle: u64, hits: &mut Vec<BreakpointHit>) {
    let mode = regs.mode();
    let rm = read_reg_checked(regs, mode, insn.rm, hits);
    let rs = read_reg_checked(regs, mode, insn.rs, hits);
    let mut result = rm.wrapping_mul(rs);
    if insn.accumulate {
        result = result.wrapping_add(read_reg_checked(regs, mode, insn.rn, hits));
    }
    if insn.s {
        let cpsr = regs.cpsr();
        let mut flags = crate::flags::Flags::from_cpsr(cpsr);
        flags.n = result & 0x8000_0000 != 0;
        flags.z = result == 0;
        write_cpsr(regs, history, flags.write_into_cpsr(cpsr), cycle);
    }
    write_reg_checked(regs, history, mode, insn.rd, result, cycle, hits);
}

/// Executes SWP/SWPB: an atomic memory read-modify-write.
pub fn swap(
    insn: Swap,
    regs: &mut RegisterFile,
    memory: &mut Memory,
    history: &mut HistoryLog,
    cycle: u64,
    hits: &mut Vec<BreakpointHit>,
) -> Result<(), ExecutionError> {
    let mode = regs.mode();
    let addr = read_reg_checked(regs, mode, insn.rn, hits);
    let size = if insn.byte { 1 } else { 4 };
    read_mem_checked(memory, addr, size, hits);
    let loaded = memory.read(addr, size, false)?;
    let stored = read_reg_checked(regs, mode, insn.rm, hits);
    write_mem_checked(memory, addr, size, hits);
    memory.write(addr, size, stored)?;
    history.record(Entry {
        writer: Writer::Memory,
        key: HistoryKey::Memory { address: addr, size },
        old: loaded,
        new: stored,
        cycle,
    });
    write_reg_checked(regs, history, mode, insn.rd, loaded, cycle, hits);
    Ok(())
}

/// Decodes `MRS`/`MSR`.
pub fn psr_transfer(insn: PsrTransfer, regs: &mut RegisterFile, history: &mut HistoryLog, cycle: u64, hits: &mut Vec<BreakpointHit>) {
    let mode = regs.mode();
    match insn.op {
        PsrOp::Mrs { rd } => {
            let value = if insn.spsr {
                regs.spsr(mode).unwrap_or(0)
            } else {
                regs.cpsr()
            };
            write_reg_checked(regs, history, mode, rd, value, cycle, hits);
        }
        PsrOp::Msr { field_mask, source } => {
            let flags_in = crate::flags::Flags::from_cpsr(regs.cpsr());
            let (value, _) = resolve_operand2(regs, mode, source, flags_in.c, hits);
            // field_mask bit 0 selects the control (low byte) field, bit 3
            // selects the flags (top byte) field; the two status-extension
            // fields ARMv4 never uses are ignored. The control field is
            // writable only from a privileged mode; from User mode that bit
            // of the field mask is silently dropped, matching MSR's
            // real-hardware behavior rather than faulting.
            let mut write_mask = 0u32;
            if field_mask & 0b0001 != 0 && mode.is_privileged() {
                write_mask |= 0x0000_00FF;
            }
            if field_mask & 0b1000 != 0 {
                write_mask |= 0xFF00_0000;
            }
            if insn.spsr {
                if let Some(old) = regs.spsr(mode) {
                    let new = (old & !write_mask) | (value & write_mask);
                    regs.set_spsr(mode, new);
                    history.record(Entry {
                        writer: Writer::Spsr,
                        key: HistoryKey::Spsr { mode },
                        old,
                        new,
                        cycle,
                    });
                }
            } else {
                let old = regs.cpsr();
                let new = (old & !write_mask) | (value & write_mask);
                write_cpsr(regs, history, new, cycle);
            }
        }
    }
}

/// `SWI`/`SWI` comment field: the simulator is responsible
/// for injecting the exception; this just surfaces the comment value.
pub fn software_interrupt(insn: Swi) -> ExecOutcome {
    ExecOutcome::SoftwareInterrupt(insn.comment)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decode::{decode, Decoded};

    #[test]
    fn mov_immediate_sets_register() {
        let word = (0b1110 << 28) | (0b00 << 26) | (1 << 25) | (0b1101 << 21) | (0 << 12) | 5;
        let Decoded::DataProcessing(insn) = decode(word, 0x80).unwrap() else {
            panic!()
        };
        let mut regs = RegisterFile::new();
        let mut history = HistoryLog::new();
        data_processing(insn, &mut regs, &mut history, 0, &mut Vec::new());
        assert_eq!(regs.read(regs.mode(), 0), 5);
    }

    #[test]
    fn add_sets_carry_on_overflow() {
        let word = (0b1110 << 28) | (0b00 << 26) | (1 << 25) | (1 << 20) | (0b0100 << 21) | (0 << 16) | (0 << 12) | 1;
        let Decoded::DataProcessing(insn) = decode(word, 0x80).unwrap() else {
            panic!()
        };
        let mut regs = RegisterFile::new();
        let mut history = HistoryLog::new();
        regs.write(regs.mode(), 0, 0xFFFF_FFFF);
        data_processing(insn, &mut regs, &mut history, 0, &mut Vec::new());
        assert_eq!(regs.read(regs.mode(), 0), 0);
        assert!(crate::flags::Flags::from_cpsr(regs.cpsr()).c);
        assert!(crate::flags::Flags::from_cpsr(regs.cpsr()).z);
    }

    #[test]
    fn branch_with_link_saves_return_address() {
        let mut regs = RegisterFile::new();
        let mut history = HistoryLog::new();
        let insn = Branch {
            cond: crate::enums::Condition::AL,
            link: true,
            offset: 16,
        };
        let start_pc = regs.read(regs.mode(), PC);
        let target = branch(insn, &mut regs, &mut history, 0, &mut Vec::new());
        assert_eq!(target, start_pc + crate::constants::PC_OFFSET + 16);
        assert_eq!(regs.read(regs.mode(), LR), start_pc + 4);
    }

    #[test]
    fn write_breakpoint_fires_on_register_destination() {
        let word = (0b1110 << 28) | (0b00 << 26) | (1 << 25) | (0b1101 << 21) | (0 << 12) | 7;
        let Decoded::DataProcessing(insn) = decode(word, 0x80).unwrap() else {
            panic!()
        };
        let mut regs = RegisterFile::new();
        regs.set_breakpoint(regs.mode(), 0, RegFlags::WRITE);
        let mut history = HistoryLog::new();
        let mut hits = Vec::new();
        data_processing(insn, &mut regs, &mut history, 0, &mut hits);
        assert_eq!(
            hits,
            vec![BreakpointHit::Register { mode: regs.mode(), id: 0, flags: RegFlags::WRITE }]
        );
    }

    #[test]
    fn read_breakpoint_fires_on_operand_register() {
        // ADD R0, R1, R1
        let word = (0b1110 << 28) | (0b00 << 26) | (0b0100 << 21) | (1 << 16) | (0 << 12) | 1;
        let Decoded::DataProcessing(insn) = decode(word, 0x80).unwrap() else {
            panic!()
        };
        let mut regs = RegisterFile::new();
        regs.set_breakpoint(regs.mode(), 1, RegFlags::READ);
        let mut history = HistoryLog::new();
        let mut hits = Vec::new();
        data_processing(insn, &mut regs, &mut history, 0, &mut hits);
        assert!(hits.contains(&BreakpointHit::Register { mode: regs.mode(), id: 1, flags: RegFlags::READ }));
    }
}
