//! The single entry point an assembler frontend or test harness drives.
//! Wraps [`crate::simulator::Simulator`] with the line-number bookkeeping,
//! breakpoint setters and formatted-change reporting the raw simulator
//! doesn't need to know about.

use crate::decode::{decode, Decoded};
use crate::enums::{Exception, FlagBit, Mode};
use crate::explain;
use crate::error::{ExecutionError, FacadeError};
use crate::flags::Flags;
use crate::history::{Checkpoint, Entry, HistoryKey, Writer};
use crate::memory::{MemFlags, Memory};
use crate::registers::{RegFlags, LR, PC};
use crate::simulator::{Simulator, StepOutcome};
use std::collections::HashMap;

/// The four ways a facade caller can ask the simulator to make progress,
/// matching a source-level debugger's usual step commands.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StepMode {
    /// Execute exactly one instruction, descending into any call.
    Into,
    /// Execute one source-level step: a `BL` runs to completion (the
    /// matching return address) rather than stopping inside the callee.
    Forward,
    /// Run until the current subroutine returns to its caller's `LR`.
    Out,
    /// Run until a breakpoint, halt, exception, or `max_steps` is reached.
    Run,
}

/// Everything `getCurrentInfos` bundles together: the disassembly of the
/// instruction about to execute, a human-readable description of its
/// effect, and the address of the instruction that would run next.
#[derive(Clone, Debug, Default)]
pub struct CurrentInfos {
    pub disassembly: String,
    pub description: Vec<String>,
    pub next_instr_addr: Option<u32>,
}

/// Maps a byte address back to the 1-based source line that assembled to
/// it (and back again), so the facade can answer `getCurrentLine` and
/// `setBreakpointInstr` alike.
#[derive(Clone, Debug, Default)]
pub struct AddressLineMap {
    pub addr_to_line: HashMap<u32, usize>,
    pub line_to_addr: HashMap<usize, u32>,
}

impl AddressLineMap {
    pub fn new(addr_to_line: HashMap<u32, usize>, line_to_addr: HashMap<usize, u32>) -> AddressLineMap {
        AddressLineMap { addr_to_line, line_to_addr }
    }

    pub fn line_for(&self, address: u32) -> Option<usize> {
        self.addr_to_line.get(&address).copied()
    }

    pub fn addr_for(&self, line: usize) -> Option<u32> {
        self.line_to_addr.get(&line).copied()
    }
}

/// A single assertion attached to a source line, checked right before (or
/// after) that line executes.
pub struct Assertion {
    pub line: usize,
    pub position: AssertionPosition,
    pub predicate: Box<dyn Fn(&Simulator) -> bool>,
    pub expression: String,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AssertionPosition {
    Before,
    After,
}

pub struct Interpreter {
    simulator: Option<Simulator>,
    address_lines: AddressLineMap,
    assertions: Vec<Assertion>,
    /// Runtime errors caught by `step`/`run` and held for `getErrorsFormatted`,
    /// mirroring a debugger's "errors pending" queue rather than unwinding
    /// the caller's stack on every faulting instruction.
    pending_errors: Vec<String>,
    /// Cursor `getChangesFormatted` reads from; advanced only when the
    /// caller opts in via `set_checkpoint`.
    changes_checkpoint: Checkpoint,
    /// Whether the loaded program has no `SECTION` directives (a bare
    /// snippet). Running off the end of a snippet's code is expected and
    /// its trailing out-of-range fetch is swallowed rather than reported.
    snippet_mode: bool,
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter {
            simulator: None,
            address_lines: AddressLineMap::default(),
            assertions: Vec::new(),
            pending_errors: Vec::new(),
            changes_checkpoint: Checkpoint::zero(),
            snippet_mode: false,
        }
    }
}

impl Interpreter {
    pub fn new() -> Interpreter {
        Interpreter::default()
    }

    /// Loads a freshly-assembled program and discards any prior run state.
    pub fn reset(&mut self, memory: Memory, address_lines: AddressLineMap) {
        self.snippet_mode = memory.has_section(crate::memory::SectionTag::Snippet);
        self.simulator = Some(Simulator::new(memory));
        self.address_lines = address_lines;
        self.assertions.clear();
        self.pending_errors.clear();
        self.changes_checkpoint = Checkpoint::zero();
    }

    pub fn add_assertion(&mut self, assertion: Assertion) {
        self.assertions.push(assertion);
    }

    fn simulator(&self) -> Result<&Simulator, FacadeError> {
        self.simulator.as_ref().ok_or(FacadeError::NoProgram)
    }

    fn simulator_mut(&mut self) -> Result<&mut Simulator, FacadeError> {
        self.simulator.as_mut().ok_or(FacadeError::NoProgram)
    }

    pub fn get_current_instruction_address(&self) -> Result<u32, FacadeError> {
        let sim = self.simulator()?;
        Ok(sim.registers().read(sim.registers().mode(), PC))
    }

    pub fn get_current_line(&self) -> Result<Option<usize>, FacadeError> {
        let addr = self.get_current_instruction_address()?;
        Ok(self.address_lines.line_for(addr))
    }

    pub fn get_cycle_count(&self) -> Result<u64, FacadeError> {
        Ok(self.simulator()?.cycle())
    }

    pub fn get_register(&self, mode: Mode, id: u8) -> Result<u32, FacadeError> {
        Ok(self.simulator()?.registers().read(mode, id))
    }

    pub fn get_registers(&self, mode: Mode) -> Result<[u32; 16], FacadeError> {
        let sim = self.simulator()?;
        let mut out = [0u32; 16];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = sim.registers().read(mode, i as u8);
        }
        Ok(out)
    }

    pub fn set_register(&mut self, mode: Mode, id: u8, value: u32) -> Result<(), FacadeError> {
        let sim = self.simulator_mut()?;
        let old = sim.registers_mut().write(mode, id, value);
        let cycle = sim.cycle();
        sim.history_mut().record(Entry {
            writer: Writer::Register,
            key: HistoryKey::Register { mode, id },
            old,
            new: value,
            cycle,
        });
        Ok(())
    }

    pub fn get_flags(&self) -> Result<Flags, FacadeError> {
        Ok(Flags::from_cpsr(self.simulator()?.registers().cpsr()))
    }

    pub fn set_flag(&mut self, bit: FlagBit, value: bool) -> Result<(), FacadeError> {
        let sim = self.simulator_mut()?;
        let mut flags = Flags::from_cpsr(sim.registers().cpsr());
        match bit {
            FlagBit::N => flags.n = value,
            FlagBit::Z => flags.z = value,
            FlagBit::C => flags.c = value,
            FlagBit::V => flags.v = value,
            FlagBit::I => flags.i = value,
            FlagBit::F => flags.f = value,
        }
        let old_cpsr = sim.registers().cpsr();
        let new_cpsr = flags.write_into_cpsr(old_cpsr);
        let cycle = sim.cycle();
        sim.registers_mut().set_cpsr(new_cpsr);
        sim.history_mut().record(Entry {
            writer: Writer::Cpsr,
            key: HistoryKey::Cpsr,
            old: old_cpsr,
            new: new_cpsr,
            cycle,
        });
        Ok(())
    }

    pub fn get_memory(&self, address: u32, size: u32) -> Result<u32, FacadeError> {
        self.simulator()?
            .memory()
            .read(address, size, true)
            .map_err(|e| FacadeError::Execution(e.into()))
    }

    pub fn set_memory(&mut self, address: u32, size: u32, value: u32) -> Result<(), FacadeError> {
        let sim = self.simulator_mut()?;
        let old = sim.memory().read(address, size, true).unwrap_or(0);
        sim.memory_mut()
            .write(address, size, value)
            .map_err(|e| FacadeError::Execution(e.into()))?;
        let cycle = sim.cycle();
        sim.history_mut().record(Entry {
            writer: Writer::Memory,
            key: HistoryKey::Memory { address, size },
            old,
            new: value,
            cycle,
        });
        Ok(())
    }

    pub fn set_memory_breakpoint(&mut self, address: u32, flags: MemFlags) -> Result<(), FacadeError> {
        self.simulator_mut()?.memory_mut().set_breakpoint(address, flags);
        Ok(())
    }

    pub fn set_register_breakpoint(&mut self, mode: Mode, id: u8, flags: RegFlags) -> Result<(), FacadeError> {
        self.simulator_mut()?.registers_mut().set_breakpoint(mode, id, flags);
        Ok(())
    }

    pub fn watch_flag(&mut self, bit: FlagBit) -> Result<(), FacadeError> {
        self.simulator_mut()?.watch_flag(bit);
        Ok(())
    }

    /// Arms, reconfigures or disarms a periodic interrupt source. `base_cycle`
    /// of `None` means "start counting from the current cycle", matching a
    /// caller that wants the first firing relative to right now rather than
    /// to program start.
    pub fn set_interrupt(
        &mut self,
        exception: Exception,
        clear: bool,
        first_at_cycle: u64,
        period: u64,
        base_cycle: Option<u64>,
    ) -> Result<(), FacadeError> {
        let sim = self.simulator_mut()?;
        let base_cycle = base_cycle.unwrap_or_else(|| sim.cycle());
        sim.configure_interrupt(exception, clear, first_at_cycle, period, base_cycle);
        Ok(())
    }

    /// Sets or clears an execute breakpoint on every address the given
    /// source lines assembled to. Lines with no corresponding instruction
    /// (blank lines, comments, directives) are silently ignored.
    pub fn set_breakpoint_instr(&mut self, lines: &[usize], enabled: bool) -> Result<(), FacadeError> {
        let flags = if enabled { MemFlags::EXECUTE } else { MemFlags::empty() };
        let addrs: Vec<u32> = lines.iter().filter_map(|line| self.address_lines.addr_for(*line)).collect();
        let sim = self.simulator_mut()?;
        for addr in addrs {
            sim.memory_mut().set_breakpoint(addr, flags);
        }
        Ok(())
    }

    /// Whether any runtime error is waiting to be read via
    /// `get_errors_formatted`.
    pub fn errors_pending(&self) -> bool {
        !self.pending_errors.is_empty()
    }

    /// Drains and formats every runtime error caught since the last call.
    pub fn get_errors_formatted(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_errors)
    }

    /// Executes one instruction, checking any `Before`-positioned
    /// assertions first and any `After`-positioned ones afterward.
    ///
    /// A runtime error (bad decode, unmapped/uninitialized memory access,
    /// misaligned branch...) doesn't propagate as an `Err`: it halts the
    /// machine and is queued for `get_errors_formatted`, the same way a
    /// `HALT` instruction stops the step loop. Only a facade-level mistake
    /// (no program loaded, a failed assertion) is returned as `Err`.
    pub fn step(&mut self) -> Result<StepOutcome, FacadeError> {
        self.check_assertions(AssertionPosition::Before)?;
        let retiring_line = self.get_current_line()?;
        let sim = self.simulator_mut()?;
        match sim.step() {
            Ok(outcome) => {
                self.check_assertions_at(AssertionPosition::After, retiring_line)?;
                Ok(outcome)
            }
            Err(err) => {
                let suppress = self.snippet_mode && matches!(err, ExecutionError::Memory(_));
                if !suppress {
                    self.pending_errors.push(err.to_string());
                }
                let sim = self.simulator_mut()?;
                sim.force_halt();
                Ok(StepOutcome::Halted)
            }
        }
    }

    /// Runs until a breakpoint, halt, or exception fires, or `max_steps`
    /// instructions have executed.
    pub fn run(&mut self, max_steps: u64) -> Result<StepOutcome, FacadeError> {
        for _ in 0..max_steps {
            let outcome = self.step()?;
            if outcome != StepOutcome::Stepped {
                return Ok(outcome);
            }
        }
        Ok(StepOutcome::Stepped)
    }

    /// Dispatches to the step mode the spec names: a plain single-instruction
    /// step, a step that runs a `BL` to completion rather than descending
    /// into it, a step that runs until the current subroutine returns, or
    /// an unrestricted run to the next breakpoint/halt.
    pub fn step_mode(&mut self, mode: StepMode, max_steps: u64) -> Result<StepOutcome, FacadeError> {
        match mode {
            StepMode::Into => self.step(),
            StepMode::Run => self.run(max_steps),
            StepMode::Forward => self.step_forward(max_steps),
            StepMode::Out => self.step_out(max_steps),
        }
    }

    fn step_forward(&mut self, max_steps: u64) -> Result<StepOutcome, FacadeError> {
        let addr = self.get_current_instruction_address()?;
        let word = self.simulator()?.memory().read(addr, 4, true).unwrap_or(0);
        let is_call = matches!(decode(word, addr), Ok(Decoded::Branch(b)) if b.link);
        if !is_call {
            return self.step();
        }
        let return_addr = addr + crate::constants::WORD_BYTES;
        self.run_until(return_addr, max_steps)
    }

    fn step_out(&mut self, max_steps: u64) -> Result<StepOutcome, FacadeError> {
        let sim = self.simulator()?;
        let target = sim.registers().read(sim.registers().mode(), LR);
        self.run_until(target, max_steps)
    }

    /// Steps until the instruction about to execute is at `target_pc`, or
    /// a breakpoint/halt/exception interrupts the run first.
    fn run_until(&mut self, target_pc: u32, max_steps: u64) -> Result<StepOutcome, FacadeError> {
        for _ in 0..max_steps {
            let outcome = self.step()?;
            if outcome != StepOutcome::Stepped {
                return Ok(outcome);
            }
            if self.get_current_instruction_address()? == target_pc {
                return Ok(StepOutcome::Stepped);
            }
        }
        Ok(StepOutcome::Stepped)
    }

    pub fn step_back(&mut self, n: u64) -> Result<(), FacadeError> {
        self.simulator_mut()?.step_back(n);
        Ok(())
    }

    fn check_assertions(&self, position: AssertionPosition) -> Result<(), FacadeError> {
        let current_line = self.get_current_line()?;
        self.check_assertions_at(position, current_line)
    }

    /// Checks assertions pinned to an explicit line rather than whatever
    /// line the current PC maps to. `After`-assertions attach to the
    /// instruction that just retired, whose line no longer matches
    /// `get_current_line` once PC has advanced past it, so [`Interpreter::step`]
    /// captures that line before stepping and passes it back in here.
    fn check_assertions_at(&self, position: AssertionPosition, line: Option<usize>) -> Result<(), FacadeError> {
        let sim = self.simulator()?;
        for assertion in &self.assertions {
            if assertion.position != position || Some(assertion.line) != line {
                continue;
            }
            if !(assertion.predicate)(sim) {
                return Err(FacadeError::AssertionFailed {
                    line: assertion.line,
                    expression: assertion.expression.clone(),
                });
            }
        }
        Ok(())
    }

    /// Disassembles and describes the instruction at the current PC.
    /// Reading the operand registers this way never counts as a user
    /// access for register-breakpoint purposes.
    pub fn get_current_infos(&mut self) -> Result<CurrentInfos, FacadeError> {
        let addr = self.get_current_instruction_address()?;
        let sim = self.simulator()?;
        let word = sim.memory().read(addr, 4, true).unwrap_or(0);
        let (disassembly, description) = match decode(word, addr) {
            Ok(decoded) => explain::explain(&decoded),
            Err(_) => ("<invalid>".to_string(), vec!["bytecode does not decode".to_string()]),
        };
        Ok(CurrentInfos {
            disassembly,
            description,
            next_instr_addr: Some(addr + crate::constants::WORD_BYTES),
        })
    }

    /// Everything the history log has recorded since the last checkpoint,
    /// formatted as `"<where>: <old> -> <new>"` lines, with any pending
    /// runtime errors appended at the end. Passing `set_checkpoint` advances
    /// the cursor so the next call only sees entries recorded after this one
    /// returns; passing `false` re-reads the same window (useful for a
    /// frontend that wants to poll without committing to having displayed
    /// the changes yet).
    pub fn get_changes_formatted(&mut self, set_checkpoint: bool) -> Result<Vec<String>, FacadeError> {
        let from = self.changes_checkpoint;
        let (entries, new_checkpoint) = {
            let sim = self.simulator()?;
            (sim.history().diff_from(from).to_vec(), sim.history().checkpoint())
        };
        if set_checkpoint {
            self.changes_checkpoint = new_checkpoint;
        }
        let mut out: Vec<String> = entries.iter().map(format_entry).collect();
        out.extend(self.get_errors_formatted());
        Ok(out)
    }
}

fn format_entry(entry: &Entry) -> String {
    match entry.key {
        HistoryKey::Register { mode, id } => {
            format!("{mode:?}.R{id} {:#x} -> {:#x}", entry.old, entry.new)
        }
        HistoryKey::Memory { address, size } => {
            format!("[{address:#x}:{size}] {:#x} -> {:#x}", entry.old, entry.new)
        }
        HistoryKey::Cpsr => format!("CPSR {:#x} -> {:#x}", entry.old, entry.new),
        HistoryKey::Spsr { mode } => format!("{mode:?}.SPSR {:#x} -> {:#x}", entry.old, entry.new),
    }
}
