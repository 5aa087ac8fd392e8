//! Two-pass assembly: parse every line into a [`LineRecord`], assign
//! addresses and build the label table in one left-to-right walk, then
//! resolve literal-pool slots and patch every deferred [`Dependency`] once
//! every label has a final address.

use crate::ast::{AssertOperand, AssertionText, CmpOp, LineRecord};
use crate::dependency::{Dependency, DependencyKind, PoolValue};
use crate::encoder::{encode_data_directive, encode_instruction, encode_reserve, EncodedLine};
use crate::error::{AssembleError, ParseError};
use crate::labels::LabelTable;
use crate::parser::parse_program;
use armcore::constants::PC_OFFSET;
use armcore::flags::Flags;
use armcore::memory::{Memory, Section, SectionTag};
use armcore::simulator::Simulator;
use armcore::{facade, FlagBit};
use std::collections::{BTreeMap, HashMap};

/// How the program counter reads back while an instruction executes. Only
/// `Plus8` (the classic three-stage-pipeline model) is implemented.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum PcBehavior {
    #[default]
    Plus8,
    Real,
}

#[derive(Clone, Copy, Debug)]
pub struct AssemblerSettings {
    pub pc_behavior: PcBehavior,
    pub max_total_mem: u32,
}

impl Default for AssemblerSettings {
    fn default() -> AssemblerSettings {
        AssemblerSettings {
            pc_behavior: PcBehavior::Plus8,
            max_total_mem: u32::MAX,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AssertionPosition {
    Before,
    After,
}

/// A parsed assertion, attached to the address its position resolves to.
#[derive(Clone, Debug)]
pub struct Assertion {
    pub line: usize,
    pub position: AssertionPosition,
    pub text: AssertionText,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum LastLineType {
    None,
    Label,
    Section,
    Bytecode,
}

/// The state built up over one assembly run: every section's bytes, the
/// label table, the line/address maps, and anything that went wrong along
/// the way. Assembly never panics on bad input — every failure becomes an
/// entry in `errors`.
#[derive(Default)]
pub struct Assembler {
    pub sections: HashMap<SectionTag, Vec<u8>>,
    pub mem_info: HashMap<SectionTag, (u32, u32)>,
    pub labels: LabelTable,
    pub addr_to_line: BTreeMap<u32, Vec<usize>>,
    pub line_to_addr: HashMap<usize, u32>,
    pub assertions: BTreeMap<u32, Assertion>,
    pub dependencies: Vec<Dependency>,
    pub errors: Vec<AssembleError>,
    /// Literal-pool slot address already assigned for each distinct
    /// `AddrPtr` value, so a repeated `LDR Rn, =value` reuses the same
    /// word instead of growing the pool again. Populated by
    /// `resolve_literal_pool`, consumed by `resolve_dependencies`.
    pool_slots: HashMap<PoolValue, u32>,
}

impl Assembler {
    pub fn assemble(source: &str, settings: &AssemblerSettings) -> Assembler {
        let mut assembler = Assembler::default();

        if settings.pc_behavior == PcBehavior::Real {
            assembler.errors.push(AssembleError::UnsupportedPcBehavior);
            return assembler;
        }

        let (records, parse_errors) = parse_program(source);
        assembler.errors.extend(parse_errors.into_iter().map(AssembleError::Parse));

        let mut current_section: Option<SectionTag> = None;
        let mut current_addr: Option<u32> = None;
        let mut last_line_type = LastLineType::None;
        let mut snippet_mode = false;

        for (line, record) in &records {
            let line = *line;
            match record {
                LineRecord::Section(tag) => {
                    let base = tag.base_address();
                    let addr = current_addr.map(|a| a.max(base)).unwrap_or(base);
                    current_addr = Some(addr);
                    current_section = Some(*tag);
                    assembler.sections.entry(*tag).or_default();
                    last_line_type = LastLineType::Section;
                }
                LineRecord::Label(name) => {
                    snippet_mode |= enter_snippet_if_needed(&mut current_section, &mut current_addr);
                    let addr = current_addr.expect("snippet entry sets an address");
                    if let Some(first_line) = assembler.labels.insert(name.clone(), addr, line) {
                        assembler.errors.push(AssembleError::DuplicateLabel {
                            name: name.clone(),
                            first_line,
                            second_line: line,
                        });
                    }
                    last_line_type = LastLineType::Label;
                }
                LineRecord::Assertion(text) => {
                    snippet_mode |= enter_snippet_if_needed(&mut current_section, &mut current_addr);
                    let addr = current_addr.expect("snippet entry sets an address");
                    // A standalone assertion attaches to the instruction about
                    // to be assembled (Before) unless the line right above it
                    // was itself bytecode, in which case it checks that
                    // instruction's result (After).
                    let position = match last_line_type {
                        LastLineType::Bytecode => AssertionPosition::After,
                        _ => AssertionPosition::Before,
                    };
                    let patch_addr = match position {
                        AssertionPosition::After => addr.saturating_sub(armcore::constants::WORD_BYTES),
                        AssertionPosition::Before => addr,
                    };
                    assembler.assertions.insert(
                        patch_addr,
                        Assertion {
                            line,
                            position,
                            text: text.clone(),
                        },
                    );
                }
                LineRecord::Data(directive) => {
                    snippet_mode |= enter_snippet_if_needed(&mut current_section, &mut current_addr);
                    let addr = current_addr.expect("snippet entry sets an address");
                    let tag = current_section.expect("snippet entry sets a section");
                    match encode_data_directive(directive) {
                        Ok(encoded) => assembler.commit(tag, addr, line, encoded, &mut current_addr),
                        Err(message) => assembler.errors.push(range_error(line, message)),
                    }
                    last_line_type = LastLineType::Bytecode;
                }
                LineRecord::Reserve(count) => {
                    snippet_mode |= enter_snippet_if_needed(&mut current_section, &mut current_addr);
                    let addr = current_addr.expect("snippet entry sets an address");
                    let tag = current_section.expect("snippet entry sets a section");
                    assembler.commit(tag, addr, line, encode_reserve(*count), &mut current_addr);
                    last_line_type = LastLineType::Bytecode;
                }
                LineRecord::Instruction(instr) => {
                    snippet_mode |= enter_snippet_if_needed(&mut current_section, &mut current_addr);
                    let addr = current_addr.expect("snippet entry sets an address");
                    let tag = current_section.expect("snippet entry sets a section");
                    match encode_instruction(instr) {
                        Ok(encoded) => assembler.commit(tag, addr, line, encoded, &mut current_addr),
                        Err(message) => assembler.errors.push(range_error(line, message)),
                    }
                    last_line_type = LastLineType::Bytecode;
                }
            }
        }

        if !snippet_mode {
            for name in armcore::constants::REQUIRED_SECTIONS {
                let tag = match name {
                    "INTVEC" => SectionTag::Intvec,
                    "CODE" => SectionTag::Code,
                    "DATA" => SectionTag::Data,
                    _ => unreachable!(),
                };
                if !assembler.sections.contains_key(&tag) {
                    assembler.errors.push(AssembleError::MissingSection { name });
                }
            }
        }

        assembler.resolve_literal_pool(snippet_mode);
        assembler.resolve_dependencies();

        for (tag, bytes) in &assembler.sections {
            let base = tag.base_address();
            assembler.mem_info.insert(*tag, (base, base + bytes.len() as u32));
        }

        let total: u32 = assembler.sections.values().map(|b| b.len() as u32).sum();
        if total > settings.max_total_mem {
            assembler.errors.push(AssembleError::TotalMemoryExceeded {
                size: total,
                limit: settings.max_total_mem,
            });
        }

        assembler
    }

    /// Writes `encoded`'s bytes into `tag`'s section at `addr` (padding with
    /// zero bytes if address assignment left a gap — see the module-level
    /// note on `currentAddr` below), records its source line, turns its
    /// relative dependency offsets into absolute addresses, and advances
    /// `current_addr` past it.
    fn commit(
        &mut self,
        tag: SectionTag,
        addr: u32,
        line: usize,
        encoded: EncodedLine,
        current_addr: &mut Option<u32>,
    ) {
        let base = tag.base_address();
        let offset = (addr - base) as usize;
        let section = self.sections.entry(tag).or_default();
        if section.len() < offset + encoded.bytes.len() {
            section.resize(offset + encoded.bytes.len(), 0);
        }
        section[offset..offset + encoded.bytes.len()].copy_from_slice(&encoded.bytes);

        self.addr_to_line.entry(addr).or_default().push(line);
        self.line_to_addr.insert(line, addr);

        for (byte_offset, kind) in encoded.dependencies {
            self.dependencies.push(Dependency {
                address: addr + byte_offset as u32,
                line,
                kind,
            });
        }

        *current_addr = Some(addr + encoded.bytes.len() as u32);
    }

    /// Appends one little-endian word per distinct [`PoolValue`] referenced
    /// by an `AddrPtr` dependency to the end of CODE (or the snippet
    /// section), reusing a slot for repeated references to the same value.
    fn resolve_literal_pool(&mut self, snippet_mode: bool) {
        let pool_tag = if snippet_mode { SectionTag::Snippet } else { SectionTag::Code };
        let mut slots: HashMap<PoolValue, u32> = HashMap::new();
        let pending: Vec<PoolValue> = self
            .dependencies
            .iter()
            .filter_map(|d| match &d.kind {
                DependencyKind::AddrPtr { value } => Some(value.clone()),
                _ => None,
            })
            .collect();

        for value in pending {
            if slots.contains_key(&value) {
                continue;
            }
            let word = match &value {
                PoolValue::Immediate(v) => *v,
                PoolValue::Label(name) => match self.labels.get(name) {
                    Some(addr) => addr,
                    None => {
                        self.errors.push(AssembleError::UndefinedLabel {
                            name: name.clone(),
                            line: 0,
                        });
                        0
                    }
                },
            };
            let base = pool_tag.base_address();
            let section = self.sections.entry(pool_tag).or_default();
            let addr = base + section.len() as u32;
            section.extend_from_slice(&word.to_le_bytes());
            slots.insert(value, addr);
        }

        self.pool_slots = slots;
    }

    /// Patches every deferred reference now that every label (and every
    /// literal-pool slot) has a final address.
    fn resolve_dependencies(&mut self) {
        let dependencies = self.dependencies.clone();
        for dep in &dependencies {
            let target = match &dep.kind {
                DependencyKind::Addr { label } | DependencyKind::AddrBranch { label } | DependencyKind::DataAddr { label } => {
                    match self.labels.get(label) {
                        Some(addr) => addr,
                        None => {
                            self.errors.push(AssembleError::UndefinedLabel {
                                name: label.clone(),
                                line: dep.line,
                            });
                            continue;
                        }
                    }
                }
                DependencyKind::AddrPtr { value } => match self.pool_slots.get(value) {
                    Some(addr) => *addr,
                    None => continue,
                },
            };

            match &dep.kind {
                DependencyKind::Addr { .. } | DependencyKind::AddrPtr { .. } => {
                    self.patch_pc_relative(dep.address, target);
                }
                DependencyKind::AddrBranch { .. } => {
                    self.patch_branch(dep.address, dep.line, target);
                }
                DependencyKind::DataAddr { .. } => {
                    self.write_word(dep.address, target);
                }
            }
        }
    }

    /// The `addr`/`addrptr` patch formula: the low 12 bits hold the
    /// unsigned distance from `patch_address + 8` to `target`, and bit 23
    /// records whether `target` is at or after that point.
    fn patch_pc_relative(&mut self, patch_address: u32, target: u32) {
        let diff = target as i64 - (patch_address as i64 + PC_OFFSET as i64);
        let mut extra = (diff.unsigned_abs() as u32) & 0xFFF;
        if diff >= 0 {
            extra |= 1 << 23;
        }
        self.or_word(patch_address, extra);
    }

    /// The `addrbranch` patch formula: a word-granular signed 24-bit offset
    /// from `patch_address + 8` to `target`.
    fn patch_branch(&mut self, patch_address: u32, line: usize, target: u32) {
        let diff = target as i64 - (patch_address as i64 + PC_OFFSET as i64);
        if diff % 4 != 0 {
            self.errors.push(AssembleError::MisalignedBranch { line, diff });
        }
        let extra = ((diff / 4) as u32) & 0xFF_FFFF;
        self.or_word(patch_address, extra);
    }

    fn or_word(&mut self, address: u32, extra: u32) {
        if let Some((tag, offset)) = self.locate(address) {
            let section = self.sections.get_mut(&tag).expect("locate() only returns mounted tags");
            let idx = offset as usize;
            let mut word = u32::from_le_bytes(section[idx..idx + 4].try_into().expect("4-byte word"));
            word |= extra;
            section[idx..idx + 4].copy_from_slice(&word.to_le_bytes());
        }
    }

    fn write_word(&mut self, address: u32, value: u32) {
        if let Some((tag, offset)) = self.locate(address) {
            let section = self.sections.get_mut(&tag).expect("locate() only returns mounted tags");
            let idx = offset as usize;
            section[idx..idx + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    fn locate(&self, address: u32) -> Option<(SectionTag, u32)> {
        self.sections.iter().find_map(|(tag, bytes)| {
            let base = tag.base_address();
            if address >= base && address < base + bytes.len() as u32 {
                Some((*tag, address - base))
            } else {
                None
            }
        })
    }

    /// Builds the runtime [`Memory`], address-to-line map, and assertion
    /// predicates that [`facade::Interpreter::reset`] needs. Fails if
    /// anything went wrong during assembly.
    pub fn into_memory(self) -> Result<(Memory, facade::AddressLineMap, Vec<facade::Assertion>), Vec<AssembleError>> {
        if !self.errors.is_empty() {
            return Err(self.errors);
        }

        let mut memory = Memory::new();
        for (tag, bytes) in &self.sections {
            memory.mount(*tag, tag.base_address(), Section::from_bytes(bytes));
        }

        let address_lines = facade::AddressLineMap::new(
            self.addr_to_line
                .iter()
                .map(|(addr, lines)| (*addr, *lines.last().expect("non-empty by construction")))
                .collect(),
            self.line_to_addr.clone(),
        );

        let mut assertions = Vec::new();
        for (addr, assertion) in &self.assertions {
            let Some(&line) = self.addr_to_line.get(addr).and_then(|lines| lines.last()) else {
                // No instruction ever landed at this address (an assertion
                // trailing the program with nothing left to check against);
                // it can never match a current line, so it is dropped here
                // rather than kept as dead weight that can never fire.
                continue;
            };
            let position = match assertion.position {
                AssertionPosition::Before => facade::AssertionPosition::Before,
                AssertionPosition::After => facade::AssertionPosition::After,
            };
            assertions.push(facade::Assertion {
                line,
                position,
                predicate: build_predicate(&assertion.text),
                expression: assertion.text.text.clone(),
            });
        }

        Ok((memory, address_lines, assertions))
    }
}

fn enter_snippet_if_needed(current_section: &mut Option<SectionTag>, current_addr: &mut Option<u32>) -> bool {
    if current_section.is_none() {
        *current_section = Some(SectionTag::Snippet);
        *current_addr = Some(SectionTag::Snippet.base_address());
        true
    } else {
        false
    }
}

fn range_error(line: usize, message: String) -> AssembleError {
    AssembleError::Parse(ParseError::Range { line, message })
}

fn build_predicate(text: &AssertionText) -> Box<dyn Fn(&Simulator) -> bool> {
    let lhs = text.lhs.clone();
    let rhs = text.rhs.clone();
    let op = text.op;
    Box::new(move |sim: &Simulator| {
        let l = read_operand(sim, &lhs);
        let r = read_operand(sim, &rhs);
        match op {
            CmpOp::Eq => l == r,
            CmpOp::Ne => l != r,
            CmpOp::Gt => (l as i32) > (r as i32),
            CmpOp::Lt => (l as i32) < (r as i32),
            CmpOp::Ge => (l as i32) >= (r as i32),
            CmpOp::Le => (l as i32) <= (r as i32),
        }
    })
}

fn read_operand(sim: &Simulator, operand: &AssertOperand) -> u32 {
    match operand {
        AssertOperand::Register(id) => sim.registers().read(sim.registers().mode(), *id),
        AssertOperand::Flag(bit) => {
            let flags = Flags::from_cpsr(sim.registers().cpsr());
            let set = match bit {
                FlagBit::N => flags.n,
                FlagBit::Z => flags.z,
                FlagBit::C => flags.c,
                FlagBit::V => flags.v,
                FlagBit::I => flags.i,
                FlagBit::F => flags.f,
            };
            set as u32
        }
        AssertOperand::Memory(addr) => sim.memory().read(*addr, 4, true).unwrap_or(0),
        AssertOperand::Integer(v) => *v,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hello_addition_assembles_and_resolves() {
        let source = "SECTION INTVEC\nSECTION CODE\nMOV R0, #2\nADD R0, R0, #3\nSECTION DATA\n";
        let assembler = Assembler::assemble(source, &AssemblerSettings::default());
        assert!(assembler.errors.is_empty(), "{:?}", assembler.errors);
        let code = assembler.sections.get(&SectionTag::Code).unwrap();
        assert!(code.len() >= 8);
    }

    #[test]
    fn undefined_label_branch_is_reported() {
        let source = "SECTION INTVEC\nSECTION CODE\nB nowhere\nSECTION DATA\n";
        let assembler = Assembler::assemble(source, &AssemblerSettings::default());
        assert!(assembler
            .errors
            .iter()
            .any(|e| matches!(e, AssembleError::UndefinedLabel { name, .. } if name == "nowhere")));
    }

    #[test]
    fn label_branch_round_trips_to_a_backward_offset() {
        let source = "SECTION INTVEC\nSECTION CODE\nloop:\nMOV R0, #1\nB loop\nSECTION DATA\n";
        let assembler = Assembler::assemble(source, &AssemblerSettings::default());
        assert!(assembler.errors.is_empty(), "{:?}", assembler.errors);
        let code = assembler.sections.get(&SectionTag::Code).unwrap();
        let word = u32::from_le_bytes(code[4..8].try_into().unwrap());
        // branch back to offset 0 from an instruction at offset 4: diff =
        // -(4 + 8) = -12, word-granular = -3.
        assert_eq!(word & 0xFF_FFFF, (-3i32 as u32) & 0xFF_FFFF);
    }

    #[test]
    fn snippet_mode_skips_required_sections() {
        let source = "MOV R0, #1\nADD R0, R0, #1\n";
        let assembler = Assembler::assemble(source, &AssemblerSettings::default());
        assert!(assembler.errors.is_empty(), "{:?}", assembler.errors);
        assert!(assembler.sections.contains_key(&SectionTag::Snippet));
    }

    #[test]
    fn missing_data_section_is_reported() {
        let source = "SECTION INTVEC\nSECTION CODE\nMOV R0, #1\n";
        let assembler = Assembler::assemble(source, &AssemblerSettings::default());
        assert!(assembler
            .errors
            .iter()
            .any(|e| matches!(e, AssembleError::MissingSection { name } if *name == "DATA")));
    }

    #[test]
    fn literal_pool_reuses_a_slot_for_a_repeated_reference() {
        let source = "SECTION INTVEC\nSECTION CODE\nLDR R0, =target\nLDR R1, =target\nSECTION DATA\ntarget: DCD 42\n";
        let assembler = Assembler::assemble(source, &AssemblerSettings::default());
        assert!(assembler.errors.is_empty(), "{:?}", assembler.errors);
        assert_eq!(assembler.pool_slots.len(), 1);
    }
}
