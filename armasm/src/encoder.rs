//! Turns one parsed [`InstructionLine`]/[`DataDirective`] into bytes, plus
//! any [`DependencyKind`] the driver must patch once every label has an address.
//!
//! Mirrors `armcore::decode`'s bit layout exactly (in the inverse
//! direction), field for field, so that `decode(encode(insn)) == insn` for
//! every instruction this encoder can produce.

use crate::ast::*;
use crate::dependency::{DependencyKind, PoolValue};
use crate::mnemonic::{self, Family};
use armcore::{Condition, DpOpcode, ShiftKind};
use armutil::EnumFromStr;
use num_traits::ToPrimitive;

/// Bytes for one assembled line, plus the byte offset (relative to the
/// start of `bytes`) and kind of any reference that can't be resolved until
/// every label in the program has an address.
#[derive(Clone, Debug, Default)]
pub struct EncodedLine {
    pub bytes: Vec<u8>,
    pub dependencies: Vec<(usize, DependencyKind)>,
}

impl EncodedLine {
    fn word(word: u32) -> EncodedLine {
        EncodedLine {
            bytes: word.to_le_bytes().to_vec(),
            dependencies: Vec::new(),
        }
    }

    fn word_with_dependency(word: u32, dependency: DependencyKind) -> EncodedLine {
        EncodedLine {
            bytes: word.to_le_bytes().to_vec(),
            dependencies: vec![(0, dependency)],
        }
    }
}

fn cond_bits(cond: Condition) -> u32 {
    let ordinal = match cond {
        Condition::EQ => 0,
        Condition::NE => 1,
        Condition::CS => 2,
        Condition::CC => 3,
        Condition::MI => 4,
        Condition::PL => 5,
        Condition::VS => 6,
        Condition::VC => 7,
        Condition::HI => 8,
        Condition::LS => 9,
        Condition::GE => 10,
        Condition::LT => 11,
        Condition::GT => 12,
        Condition::LE => 13,
        Condition::AL => 14,
        Condition::NV => 15,
    };
    ordinal << 28
}

fn expect_register(op: &Operand) -> Result<u8, String> {
    match op {
        Operand::Register(r) => Ok(*r),
        Operand::WritebackRegister(r) => Ok(*r),
        other => Err(format!("expected a register operand, got {other:?}")),
    }
}

fn signed_u32(sign: Sign, value: u32) -> u32 {
    if sign.is_positive() {
        value
    } else {
        (value as i64 * -1) as u32
    }
}

/// Finds an 8-bit immediate and even rotate amount such that
/// `imm8.rotate_right(rotate*2) == value`, the inverse of
/// `decode::decode_operand2`'s immediate path.
fn encode_rotated_immediate(value: u32) -> Option<(u32, u32)> {
    for rotate in 0..16u32 {
        let candidate = value.rotate_left(rotate * 2);
        if candidate <= 0xFF {
            return Some((rotate, candidate));
        }
    }
    None
}

/// Encodes the 12-bit `Operand2`/shifter-operand field (bits 11-0) plus
/// whether bit 25 (`I`, data-processing) should be set.
fn encode_operand2(op: &Operand) -> Result<(u32, bool), String> {
    match op {
        Operand::Immediate { sign, value } => {
            let v = signed_u32(*sign, *value);
            let (rotate, imm8) = encode_rotated_immediate(v)
                .ok_or_else(|| format!("immediate {v:#x} cannot be encoded as a rotated 8-bit value"))?;
            Ok(((rotate << 8) | imm8, true))
        }
        Operand::Register(rm) => Ok((encode_shift_fields(*rm, None), false)),
        Operand::ShiftedRegister { rm, shift } => Ok((encode_shift_fields(*rm, Some(shift)), false)),
        other => Err(format!("expected a register or immediate operand, got {other:?}")),
    }
}

fn shift_kind_bits(kind: ShiftKind) -> u32 {
    match kind {
        ShiftKind::LSL => 0,
        ShiftKind::LSR => 1,
        ShiftKind::ASR => 2,
        ShiftKind::ROR | ShiftKind::RRX => 3,
    }
}

fn encode_shift_fields(rm: u8, shift: Option<&ShiftSpec>) -> u32 {
    let Some(spec) = shift else {
        return rm as u32;
    };
    if spec.kind == ShiftKind::RRX {
        return (shift_kind_bits(spec.kind) << 5) | rm as u32;
    }
    let kind = shift_kind_bits(spec.kind);
    match &spec.amount {
        None | Some(ShiftAmountSpec::Immediate(0)) => (kind << 5) | rm as u32,
        Some(ShiftAmountSpec::Immediate(n)) => ((n & 0x1F) << 7) | (kind << 5) | rm as u32,
        Some(ShiftAmountSpec::Register(rs)) => ((*rs as u32) << 8) | (kind << 5) | (1 << 4) | rm as u32,
    }
}

fn encode_data_processing(resolved: &mnemonic::Resolved, operands: &[Operand]) -> Result<EncodedLine, String> {
    let opcode = DpOpcode::from_str(resolved.base).map_err(|e| e.to_string())?;
    let (rd, rn, op2) = if matches!(opcode, DpOpcode::MOV | DpOpcode::MVN) {
        let [rd_op, op2] = take2(operands)?;
        (expect_register(rd_op)?, 0u8, op2)
    } else if opcode.is_test() {
        let [rn_op, op2] = take2(operands)?;
        (0u8, expect_register(rn_op)?, op2)
    } else {
        let [rd_op, rn_op, op2] = take3(operands)?;
        (expect_register(rd_op)?, expect_register(rn_op)?, op2)
    };
    let (bits11_0, imm_flag) = encode_operand2(op2)?;
    let word = cond_bits(resolved.cond)
        | (imm_flag as u32) << 25
        | opcode.to_u32().expect("DpOpcode fits in 4 bits") << 21
        | (resolved.s_bit as u32) << 20
        | (rn as u32) << 16
        | (rd as u32) << 12
        | bits11_0;
    Ok(EncodedLine::word(word))
}

fn take2(operands: &[Operand]) -> Result<[&Operand; 2], String> {
    match operands {
        [a, b] => Ok([a, b]),
        _ => Err(format!("expected 2 operands, got {}", operands.len())),
    }
}

fn take3(operands: &[Operand]) -> Result<[&Operand; 3], String> {
    match operands {
        [a, b, c] => Ok([a, b, c]),
        _ => Err(format!("expected 3 operands, got {}", operands.len())),
    }
}

fn encode_address_transfer(
    resolved: &mnemonic::Resolved,
    rd: u8,
    operand: &Operand,
) -> Result<EncodedLine, String> {
    let cond = cond_bits(resolved.cond);
    let base = cond | (0b01 << 26) | (resolved.byte as u32) << 22 | (resolved.load as u32) << 20 | (rd as u32) << 12;

    match operand {
        Operand::Address(addr) => {
            let pre = addr.pre_indexed;
            let writeback = if pre { addr.writeback } else { false };
            let (imm_flag, up, offset_bits) = match &addr.offset {
                AddressOffset::None => (false, true, 0u32),
                AddressOffset::Immediate { sign, value } => {
                    if *value > 0xFFF {
                        return Err(format!("address offset {value:#x} does not fit in 12 bits"));
                    }
                    (false, sign.is_positive(), *value)
                }
                AddressOffset::Register { sign, rm, shift } => {
                    (true, sign.is_positive(), encode_shift_fields(*rm, shift.as_ref()))
                }
            };
            let word = base
                | (imm_flag as u32) << 25
                | (pre as u32) << 24
                | (up as u32) << 23
                | (writeback as u32) << 21
                | (addr.rn as u32) << 16
                | offset_bits;
            Ok(EncodedLine::word(word))
        }
        Operand::Label(name) => {
            let word = base | (1 << 24) | (armcore::registers::PC as u32) << 16;
            Ok(EncodedLine::word_with_dependency(
                word,
                DependencyKind::Addr { label: name.clone() },
            ))
        }
        Operand::LiteralPoolLabel(name) => {
            let word = base | (1 << 24) | (armcore::registers::PC as u32) << 16;
            Ok(EncodedLine::word_with_dependency(
                word,
                DependencyKind::AddrPtr { value: PoolValue::Label(name.clone()) },
            ))
        }
        Operand::LiteralPoolImmediate(value) => {
            let word = base | (1 << 24) | (armcore::registers::PC as u32) << 16;
            Ok(EncodedLine::word_with_dependency(
                word,
                DependencyKind::AddrPtr { value: PoolValue::Immediate(*value) },
            ))
        }
        other => Err(format!("invalid LDR/STR operand {other:?}")),
    }
}

fn encode_block_transfer(resolved: &mnemonic::Resolved, operands: &[Operand]) -> Result<EncodedLine, String> {
    let [base_op, list_op] = take2(operands)?;
    let rn = expect_register(base_op)?;
    let writeback = matches!(base_op, Operand::WritebackRegister(_));
    let Operand::RegisterList { mask, user_bank } = list_op else {
        return Err(format!("expected a register list, got {list_op:?}"));
    };
    let word = cond_bits(resolved.cond)
        | (0b100 << 25)
        | (resolved.block_mode.pre as u32) << 24
        | (resolved.block_mode.up as u32) << 23
        | (*user_bank as u32) << 22
        | (writeback as u32) << 21
        | (resolved.load as u32) << 20
        | (rn as u32) << 16
        | *mask as u32;
    Ok(EncodedLine::word(word))
}

fn encode_branch(resolved: &mnemonic::Resolved, operands: &[Operand]) -> Result<EncodedLine, String> {
    let [target] = operands else {
        return Err(format!("expected 1 operand, got {}", operands.len()));
    };
    let Operand::Label(name) = target else {
        return Err(format!("branch target must be a label, got {target:?}"));
    };
    let word = cond_bits(resolved.cond) | (0b101 << 25) | (resolved.link as u32) << 24;
    Ok(EncodedLine::word_with_dependency(
        word,
        DependencyKind::AddrBranch { label: name.clone() },
    ))
}

fn encode_multiply(resolved: &mnemonic::Resolved, operands: &[Operand]) -> Result<EncodedLine, String> {
    let (rd, rm, rs, rn) = if resolved.accumulate {
        let [rd, rm, rs, rn] = match operands {
            [a, b, c, d] => [a, b, c, d],
            _ => return Err(format!("MLA expects 4 operands, got {}", operands.len())),
        };
        (
            expect_register(rd)?,
            expect_register(rm)?,
            expect_register(rs)?,
            expect_register(rn)?,
        )
    } else {
        let [rd, rm, rs] = take3(operands)?;
        (expect_register(rd)?, expect_register(rm)?, expect_register(rs)?, 0u8)
    };
    let word = cond_bits(resolved.cond)
        | (resolved.accumulate as u32) << 21
        | (resolved.s_bit as u32) << 20
        | (rd as u32) << 16
        | (rn as u32) << 12
        | (rs as u32) << 8
        | 0b1001 << 4
        | rm as u32;
    Ok(EncodedLine::word(word))
}

fn encode_swi(resolved: &mnemonic::Resolved, operands: &[Operand]) -> Result<EncodedLine, String> {
    let comment = match operands {
        [] => 0,
        [Operand::Immediate { sign, value }] => signed_u32(*sign, *value) & 0x00FF_FFFF,
        other => return Err(format!("invalid SWI operand(s) {other:?}")),
    };
    let word = cond_bits(resolved.cond) | (0b1111 << 24) | comment;
    Ok(EncodedLine::word(word))
}

fn psr_selector(op: &Operand) -> Result<(bool, u8), String> {
    let Operand::Label(name) = op else {
        return Err(format!("expected CPSR/SPSR, got {op:?}"));
    };
    let upper = name.to_uppercase();
    let (base, suffix) = upper.split_once('_').unwrap_or((upper.as_str(), ""));
    let spsr = match base {
        "CPSR" => false,
        "SPSR" => true,
        _ => return Err(format!("expected CPSR/SPSR, got \"{name}\"")),
    };
    let field_mask = match suffix {
        "" => 0b1001,
        "C" => 0b0001,
        "F" => 0b1000,
        "CF" | "FC" => 0b1001,
        other => return Err(format!("unknown PSR field suffix \"_{other}\"")),
    };
    Ok((spsr, field_mask))
}

fn encode_psr_transfer(resolved: &mnemonic::Resolved, operands: &[Operand]) -> Result<EncodedLine, String> {
    let cond = cond_bits(resolved.cond);
    if resolved.base == "MRS" {
        let [rd_op, psr_op] = take2(operands)?;
        let rd = expect_register(rd_op)?;
        let (spsr, _) = psr_selector(psr_op)?;
        let word = cond | (0b00010 << 23) | (spsr as u32) << 22 | (rd as u32) << 12;
        Ok(EncodedLine::word(word))
    } else {
        let [psr_op, source] = take2(operands)?;
        let (spsr, field_mask) = psr_selector(psr_op)?;
        let (bits11_0, imm_flag) = encode_operand2(source)?;
        let word = cond
            | (0b00010 << 23)
            | (spsr as u32) << 22
            | (0b10 << 20)
            | (field_mask as u32) << 16
            | (imm_flag as u32) << 25
            | bits11_0;
        Ok(EncodedLine::word(word))
    }
}

fn encode_swap(resolved: &mnemonic::Resolved, operands: &[Operand]) -> Result<EncodedLine, String> {
    let [rd_op, rm_op, addr_op] = take3(operands)?;
    let rd = expect_register(rd_op)?;
    let rm = expect_register(rm_op)?;
    let Operand::Address(addr) = addr_op else {
        return Err(format!("SWP's third operand must be [Rn], got {addr_op:?}"));
    };
    let word = cond_bits(resolved.cond)
        | (0b00010 << 23)
        | (resolved.byte as u32) << 22
        | (addr.rn as u32) << 16
        | (rd as u32) << 12
        | 0b1001 << 4
        | rm as u32;
    Ok(EncodedLine::word(word))
}

/// Encodes one parsed instruction line into bytes plus any deferred
/// dependency, or an error message (wrapped by the caller into a
/// `ParseError::Range` at the line it came from).
pub fn encode_instruction(line: &InstructionLine) -> Result<EncodedLine, String> {
    let resolved = mnemonic::resolve(&line.mnemonic)
        .ok_or_else(|| format!("unknown mnemonic \"{}\"", line.mnemonic))?;
    match resolved.family {
        Family::DataProcessing => encode_data_processing(&resolved, &line.operands),
        Family::Memory => {
            let [rd_op, addr_op] = take2(&line.operands)?;
            let rd = expect_register(rd_op)?;
            encode_address_transfer(&resolved, rd, addr_op)
        }
        Family::Block => encode_block_transfer(&resolved, &line.operands),
        Family::Branch => encode_branch(&resolved, &line.operands),
        Family::Multiply => encode_multiply(&resolved, &line.operands),
        Family::Swi => encode_swi(&resolved, &line.operands),
        Family::PsrTransfer => encode_psr_transfer(&resolved, &line.operands),
        Family::Swap => encode_swap(&resolved, &line.operands),
        Family::Nop => {
            // The canonical ARM no-op: `MOV R0, R0` with the mnemonic's own
            // condition, never touching flags.
            let word = cond_bits(resolved.cond) | (1 << 25) | (0b1101 << 21);
            Ok(EncodedLine::word(word))
        }
        Family::Halt => Ok(EncodedLine::word(cond_bits(resolved.cond) | (0b1110 << 24))),
    }
}

/// Encodes a `DCD`/`DCW`/`DCB` directive. A `DCD` value that names a label
/// produces a `DataAddr` dependency at that word's offset; every other
/// value is known immediately.
pub fn encode_data_directive(directive: &DataDirective) -> Result<EncodedLine, String> {
    let width = match directive.width {
        DataWidth::Byte => 1usize,
        DataWidth::Half => 2,
        DataWidth::Word => 4,
    };
    let mut bytes = Vec::with_capacity(directive.values.len() * width);
    let mut dependencies = Vec::new();
    for value in &directive.values {
        match value {
            DataValue::Integer(v) => {
                bytes.extend_from_slice(&v.to_le_bytes()[..width]);
            }
            DataValue::Label(name) => {
                if directive.width != DataWidth::Word {
                    return Err("only DCD can reference a label".to_string());
                }
                dependencies.push((bytes.len(), DependencyKind::DataAddr { label: name.clone() }));
                bytes.extend_from_slice(&0u32.to_le_bytes());
            }
        }
    }
    Ok(EncodedLine { bytes, dependencies })
}

/// Encodes a `SPACE n` reserve directive as `n` zero bytes.
pub fn encode_reserve(count: u32) -> EncodedLine {
    EncodedLine {
        bytes: vec![0u8; count as usize],
        dependencies: Vec::new(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use armcore::decode::{decode, Decoded};

    fn instr(mnemonic: &str, operands: Vec<Operand>) -> InstructionLine {
        InstructionLine {
            mnemonic: mnemonic.to_string(),
            operands,
        }
    }

    #[test]
    fn encodes_mov_immediate_round_trips_through_decode() {
        let line = instr("MOV", vec![Operand::Register(0), Operand::Immediate { sign: Sign::Plus, value: 2 }]);
        let encoded = encode_instruction(&line).unwrap();
        let word = u32::from_le_bytes(encoded.bytes.try_into().unwrap());
        let Decoded::DataProcessing(dp) = decode(word, 0x80).unwrap() else {
            panic!("expected data processing")
        };
        assert_eq!(dp.opcode, DpOpcode::MOV);
        assert_eq!(dp.rd, 0);
        assert_eq!(dp.operand2, armcore::decode::Operand2::Immediate(2));
    }

    #[test]
    fn encodes_add_register_form() {
        let line = instr(
            "ADD",
            vec![Operand::Register(2), Operand::Register(0), Operand::Register(1)],
        );
        let encoded = encode_instruction(&line).unwrap();
        let word = u32::from_le_bytes(encoded.bytes.try_into().unwrap());
        let Decoded::DataProcessing(dp) = decode(word, 0x80).unwrap() else {
            panic!("expected data processing")
        };
        assert_eq!(dp.opcode, DpOpcode::ADD);
        assert_eq!(dp.rd, 2);
        assert_eq!(dp.rn, 0);
    }

    #[test]
    fn encodes_ldr_immediate_offset() {
        let line = instr(
            "LDR",
            vec![
                Operand::Register(0),
                Operand::Address(AddressOperand {
                    rn: 1,
                    pre_indexed: true,
                    writeback: false,
                    offset: AddressOffset::Immediate { sign: Sign::Plus, value: 4 },
                }),
            ],
        );
        let encoded = encode_instruction(&line).unwrap();
        let word = u32::from_le_bytes(encoded.bytes.try_into().unwrap());
        let Decoded::SingleTransfer(st) = decode(word, 0x80).unwrap() else {
            panic!("expected single transfer")
        };
        assert!(st.load);
        assert_eq!(st.rn, 1);
        assert_eq!(st.offset, armcore::decode::TransferOffset::Immediate(4));
    }

    #[test]
    fn ldr_literal_label_produces_addrptr_dependency() {
        let line = instr("LDR", vec![Operand::Register(0), Operand::LiteralPoolLabel("foo".to_string())]);
        let encoded = encode_instruction(&line).unwrap();
        assert_eq!(encoded.dependencies.len(), 1);
        assert!(matches!(&encoded.dependencies[0].1, DependencyKind::AddrPtr { .. }));
    }

    #[test]
    fn branch_produces_addrbranch_dependency() {
        let line = instr("BNE", vec![Operand::Label("loop".to_string())]);
        let encoded = encode_instruction(&line).unwrap();
        let word = u32::from_le_bytes(encoded.bytes.clone().try_into().unwrap());
        let Decoded::Branch(b) = decode(word, 0x80).unwrap() else {
            panic!("expected branch")
        };
        assert_eq!(b.cond, Condition::NE);
        assert_eq!(encoded.dependencies.len(), 1);
    }

    #[test]
    fn immediate_that_cannot_rotate_is_an_error() {
        let line = instr("MOV", vec![Operand::Register(0), Operand::Immediate { sign: Sign::Plus, value: 0x101 }]);
        assert!(encode_instruction(&line).is_err());
    }

    #[test]
    fn dcd_with_label_produces_dataaddr_dependency() {
        let directive = DataDirective {
            width: DataWidth::Word,
            values: vec![DataValue::Integer(1), DataValue::Label("foo".to_string())],
        };
        let encoded = encode_data_directive(&directive).unwrap();
        assert_eq!(encoded.bytes.len(), 8);
        assert_eq!(encoded.dependencies, vec![(4, DependencyKind::DataAddr { label: "foo".to_string() })]);
    }
}
