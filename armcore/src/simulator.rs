//! The fetch-decode-execute loop and the four breakpoint domains layered
//! on top of it.

use crate::breakpoints::BreakpointHit;
use crate::decode::{decode, Decoded};
use crate::enums::{Exception, FlagBit, Mode};
use crate::error::ExecutionError;
use crate::exceptions::{inject, InterruptSchedule};
use crate::exec;
use crate::flags::Flags;
use crate::history::HistoryLog;
use crate::memory::{MemFlags, Memory};
use crate::registers::{RegisterFile, PC};
use std::collections::HashSet;

/// What a single [`Simulator::step`] call produced.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StepOutcome {
    Stepped,
    Halted,
    Breakpoint(BreakpointHit),
    Exception(Exception),
}

#[derive(Debug, Default)]
struct FlagWatches(HashSet<FlagBit>);

impl FlagWatches {
    fn changed(&self, before: Flags, after: Flags) -> Option<FlagBit> {
        let pairs: [(FlagBit, bool, bool); 6] = [
            (FlagBit::N, before.n, after.n),
            (FlagBit::Z, before.z, after.z),
            (FlagBit::C, before.c, after.c),
            (FlagBit::V, before.v, after.v),
            (FlagBit::I, before.i, after.i),
            (FlagBit::F, before.f, after.f),
        ];
        pairs
            .into_iter()
            .find(|(bit, b, a)| self.0.contains(bit) && b != a)
            .map(|(bit, _, _)| bit)
    }
}

/// Owns the whole machine: registers, memory, interrupt lines and the undo
/// log. This is the type the assembler's test harness and any frontend
/// drive through [`crate::facade::Interpreter`].
#[derive(Debug)]
pub struct Simulator {
    regs: RegisterFile,
    memory: Memory,
    history: HistoryLog,
    interrupts: InterruptSchedule,
    flag_watches: FlagWatches,
    cycle: u64,
    halted: bool,
    breakpoints_suppressed: u32,
}

impl Simulator {
    /// Boots a fresh machine over `memory`, with PC pointing at `CODE`'s
    /// (or the synthetic `SNIPPET` section's) first byte. This core has no
    /// bootstrap bytes at the reset vector, so execution starts directly
    /// where the assembler placed the first instruction rather than at
    /// `INTVEC`.
    pub fn new(memory: Memory) -> Simulator {
        let entry = memory.entry_point();
        let mut regs = RegisterFile::new();
        regs.write_raw(regs.mode(), PC, entry);
        Simulator {
            regs,
            memory,
            history: HistoryLog::new(),
            interrupts: InterruptSchedule::new(),
            flag_watches: FlagWatches::default(),
            cycle: 0,
            halted: false,
            breakpoints_suppressed: 0,
        }
    }

    /// Suppresses memory/register breakpoints for the lifetime of the
    /// returned guard. Used while computing disassembly or `getCurrentInfos`
    /// text, which reads memory/registers without that counting as a user
    /// access.
    pub fn suppress_breakpoints(&mut self) -> BreakpointSuppressGuard<'_> {
        self.breakpoints_suppressed += 1;
        self.regs.deactivate_breakpoints();
        BreakpointSuppressGuard { sim: self }
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut HistoryLog {
        &mut self.history
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Forces the machine to a halted state without a `HALT` instruction
    /// having executed. Used by the facade when it silently swallows a
    /// trailing out-of-bounds fetch at the end of a snippet program.
    pub fn force_halt(&mut self) {
        self.halted = true;
    }

    /// Arms, reconfigures or disarms a periodic interrupt source. See
    /// [`InterruptSchedule::configure`] for the parameter semantics.
    pub fn configure_interrupt(
        &mut self,
        exception: Exception,
        clear: bool,
        first_at_cycle: u64,
        period: u64,
        base_cycle: u64,
    ) {
        self.interrupts
            .configure(exception, clear, first_at_cycle, period, base_cycle);
    }

    pub fn watch_flag(&mut self, bit: FlagBit) {
        self.flag_watches.0.insert(bit);
    }

    pub fn unwatch_flag(&mut self, bit: FlagBit) {
        self.flag_watches.0.remove(&bit);
    }

    /// Fetches, decodes and executes the instruction at the current PC,
    /// then checks for a due interrupt.
    pub fn step(&mut self) -> Result<StepOutcome, ExecutionError> {
        if self.halted {
            return Ok(StepOutcome::Halted);
        }

        let mode = self.regs.mode();
        let pc = self.regs.read(mode, PC);

        if self.breakpoints_suppressed == 0 {
            if let Some(flags) = self.memory.pending_breakpoint(pc, 4, MemFlags::EXECUTE) {
                return Ok(StepOutcome::Breakpoint(BreakpointHit::Memory { address: pc, flags }));
            }
        }

        let word = self.memory.read(pc, 4, false)?;
        let flags_before = Flags::from_cpsr(self.regs.cpsr());
        let decoded = decode(word, pc)?;

        if !decoded.condition().eval(flags_before) {
            self.advance_pc(pc);
            self.cycle += 1;
            return self.poll_interrupts();
        }

        let mut hits = Vec::new();
        let next_pc = self.execute(decoded, pc, &mut hits)?;

        match next_pc {
            Some(target) => self.regs.write_raw(self.regs.mode(), PC, target),
            None => self.advance_pc(pc),
        }

        self.cycle += 1;

        let flags_after = Flags::from_cpsr(self.regs.cpsr());
        if let Some(bit) = self.flag_watches.changed(flags_before, flags_after) {
            hits.push(BreakpointHit::Flag(bit));
        }

        // All of the instruction's mutations (registers, memory, history)
        // are already applied by the time we get here: a breakpoint hit
        // unwinds the current step but preserves all state mutations
        // already applied by the failing instruction. Only the first hit
        // is reported; the rest stay recorded in history and would surface
        // on the next step if still armed. `check_access`/
        // `pending_breakpoint` already honor breakpoint suppression at the
        // source, so `hits` is empty whenever suppression is active.
        if let Some(hit) = hits.into_iter().next() {
            return Ok(StepOutcome::Breakpoint(hit));
        }

        self.poll_interrupts()
    }

    fn advance_pc(&mut self, current_pc: u32) {
        let target = current_pc + crate::constants::WORD_BYTES;
        self.regs.write_raw(self.regs.mode(), PC, target);
    }

    fn execute(
        &mut self,
        decoded: Decoded,
        pc: u32,
        hits: &mut Vec<BreakpointHit>,
    ) -> Result<Option<u32>, ExecutionError> {
        match decoded {
            Decoded::DataProcessing(insn) => Ok(exec::data_processing(
                insn,
                &mut self.regs,
                &mut self.history,
                self.cycle,
                hits,
            )),
            Decoded::SingleTransfer(insn) => exec::single_transfer(
                insn,
                &mut self.regs,
                &mut self.memory,
                &mut self.history,
                self.cycle,
                hits,
            ),
            Decoded::BlockTransfer(insn) => exec::block_transfer(
                insn,
                &mut self.regs,
                &mut self.memory,
                &mut self.history,
                self.cycle,
                hits,
            ),
            Decoded::Branch(insn) => {
                Ok(Some(exec::branch(insn, &mut self.regs, &mut self.history, self.cycle, hits)))
            }
            Decoded::Multiply(insn) => {
                exec::multiply(insn, &mut self.regs, &mut self.history, self.cycle, hits);
                Ok(None)
            }
            Decoded::Swi(insn) => {
                let exec::ExecOutcome::SoftwareInterrupt(comment) = exec::software_interrupt(insn) else {
                    unreachable!()
                };
                let _ = comment;
                let vector = inject(Exception::Swi, pc + crate::constants::WORD_BYTES, &mut self.regs, &mut self.history, self.cycle);
                Ok(Some(vector))
            }
            Decoded::PsrTransfer(insn) => {
                exec::psr_transfer(insn, &mut self.regs, &mut self.history, self.cycle, hits);
                Ok(None)
            }
            Decoded::Swap(insn) => {
                exec::swap(insn, &mut self.regs, &mut self.memory, &mut self.history, self.cycle, hits)?;
                Ok(None)
            }
            Decoded::Halt(_) => {
                self.halted = true;
                Ok(None)
            }
        }
    }

    fn poll_interrupts(&mut self) -> Result<StepOutcome, ExecutionError> {
        if self.halted {
            return Ok(StepOutcome::Halted);
        }
        if let Some(exception) = self.interrupts.poll(self.cycle, self.regs.cpsr()) {
            // External interrupts are detected at the start of the next
            // fetch, with PC already advanced past the instruction that just
            // retired. The banked LR must receive the architectural
            // PC-reads-as-instr+8 value minus one instruction width, so
            // `SUBS PC, LR, #4` resumes at the already-advanced PC.
            let pc = self.regs.read(self.regs.mode(), PC);
            let return_address = pc
                .wrapping_add(crate::constants::PC_OFFSET)
                .wrapping_sub(crate::constants::WORD_BYTES);
            inject(exception, return_address, &mut self.regs, &mut self.history, self.cycle);
            return Ok(StepOutcome::Exception(exception));
        }
        Ok(StepOutcome::Stepped)
    }

    /// Undoes the last `n` instructions' worth of writes.
    /// `n == 0` is a no-op.
    pub fn step_back(&mut self, n: u64) {
        let entries = self.history.pop_cycles(n);
        for entry in entries {
            match entry.key {
                crate::history::HistoryKey::Register { mode, id } => {
                    self.regs.write_raw(mode, id, entry.old);
                }
                crate::history::HistoryKey::Memory { address, size } => {
                    let _ = self.memory.write(address, size, entry.old);
                }
                crate::history::HistoryKey::Cpsr => {
                    self.regs.set_cpsr(entry.old);
                }
                crate::history::HistoryKey::Spsr { mode } => {
                    self.regs.set_spsr(mode, entry.old);
                }
            }
        }
        self.cycle = self.cycle.saturating_sub(n);
        self.halted = false;
    }
}

/// RAII guard returned by [`Simulator::suppress_breakpoints`]. Strictly
/// nested the same way [`crate::registers::BreakpointGuard`] is.
pub struct BreakpointSuppressGuard<'a> {
    sim: &'a mut Simulator,
}

impl Drop for BreakpointSuppressGuard<'_> {
    fn drop(&mut self) {
        self.sim.breakpoints_suppressed = self.sim.breakpoints_suppressed.saturating_sub(1);
        self.sim.regs.reactivate_breakpoints();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::memory::{Section, SectionTag};

    fn mov_r0_imm(value: u32) -> u32 {
        (0b1110 << 28) | (0b00 << 26) | (1 << 25) | (0b1101 << 21) | value
    }

    fn make_sim(words: &[u32]) -> Simulator {
        let mut memory = Memory::new();
        let mut code = Section::new(64);
        for (i, w) in words.iter().enumerate() {
            code.write_word(i as u32 * 4, *w).unwrap();
        }
        memory.mount(SectionTag::Code, crate::constants::CODE_BASE, code);
        memory.mount(SectionTag::Intvec, crate::constants::INTVEC_BASE, Section::new(0x80));
        memory.mount(SectionTag::Data, crate::constants::DATA_BASE, Section::new(64));
        let mut sim = Simulator::new(memory);
        sim.regs.write_raw(sim.regs.mode(), PC, crate::constants::CODE_BASE);
        sim
    }

    #[test]
    fn steps_advance_pc_by_word_size() {
        let mut sim = make_sim(&[mov_r0_imm(1), mov_r0_imm(2)]);
        sim.step().unwrap();
        assert_eq!(sim.registers().read(sim.registers().mode(), PC), crate::constants::CODE_BASE + 4);
    }

    #[test]
    fn halt_stops_further_progress() {
        let halt_word = (0b1110u32 << 28) | (0b1110 << 24);
        let mut sim = make_sim(&[halt_word]);
        let outcome = sim.step().unwrap();
        assert_eq!(outcome, StepOutcome::Halted);
        assert!(sim.is_halted());
    }

    #[test]
    fn step_back_restores_prior_register_value() {
        let mut sim = make_sim(&[mov_r0_imm(5), mov_r0_imm(9)]);
        sim.step().unwrap();
        sim.step().unwrap();
        assert_eq!(sim.registers().read(sim.registers().mode(), 0), 9);
        sim.step_back(1);
        assert_eq!(sim.registers().read(sim.registers().mode(), 0), 5);
    }
}
