//! Turns one `pest` parse of a line into the structured [`LineRecord`]s.
//! A label and a following directive/instruction on the same physical
//! line both attach to that line's 1-based index.

use crate::ast::*;
use crate::error::ParseError;
use armcore::{FlagBit, SectionTag, ShiftKind};
use armutil::EnumFromStr;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "./grammar.pest"]
pub struct ArmParser;

/// Parses the whole source text into one `Vec<LineRecord>` per (1-based)
/// source line. Blank/comment-only lines yield an empty vector. This
/// resynchronizes at the next newline on a syntax error, collecting every
/// diagnostic instead of stopping at the first one.
pub fn parse_program(source: &str) -> (Vec<(usize, LineRecord)>, Vec<ParseError>) {
    let mut records = Vec::new();
    let mut errors = Vec::new();

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = idx + 1;
        match ArmParser::parse(Rule::line, raw_line) {
            Ok(mut pairs) => {
                let line_pair = pairs.next().unwrap();
                match line_to_records(line_pair) {
                    Ok(recs) => records.extend(recs.into_iter().map(|r| (line_no, r))),
                    Err(message) => errors.push(match message.strip_prefix(RANGE_ERROR_PREFIX) {
                        Some(message) => ParseError::Range { line: line_no, message: message.to_string() },
                        None => ParseError::Syntax { line: line_no, message },
                    }),
                }
            }
            Err(err) => errors.push(ParseError::Syntax {
                line: line_no,
                message: err.variant.message().to_string(),
            }),
        }
    }

    (records, errors)
}

fn line_to_records(line: Pair<Rule>) -> Result<Vec<LineRecord>, String> {
    let mut out = Vec::new();
    for inner in line.into_inner() {
        match inner.as_rule() {
            Rule::label_def => {
                let name = inner.into_inner().next().unwrap().as_str().to_string();
                out.push(LineRecord::Label(name));
            }
            Rule::section_directive => {
                let name = inner.into_inner().next().unwrap().as_str().to_uppercase();
                let tag = match name.as_str() {
                    "INTVEC" => SectionTag::Intvec,
                    "CODE" => SectionTag::Code,
                    "DATA" => SectionTag::Data,
                    _ => return Err(format!("unknown section \"{name}\"")),
                };
                out.push(LineRecord::Section(tag));
            }
            Rule::assertion => out.push(LineRecord::Assertion(build_assertion(inner)?)),
            Rule::data_directive => out.push(LineRecord::Data(build_data_directive(inner)?)),
            Rule::reserve_directive => {
                let n = parse_integer(inner.into_inner().next().unwrap())?;
                out.push(LineRecord::Reserve(n));
            }
            Rule::instruction => out.push(LineRecord::Instruction(build_instruction(inner)?)),
            Rule::EOI => {}
            other => return Err(format!("unexpected token {other:?}")),
        }
    }
    Ok(out)
}

fn build_instruction(pair: Pair<Rule>) -> Result<InstructionLine, String> {
    let mut inner = pair.into_inner();
    let mnemonic = inner.next().unwrap().as_str().to_uppercase();
    let mut operands = Vec::new();
    if let Some(list) = inner.next() {
        for operand_pair in list.into_inner() {
            operands.push(build_operand(operand_pair)?);
        }
    }
    Ok(InstructionLine { mnemonic, operands })
}

fn build_operand(pair: Pair<Rule>) -> Result<Operand, String> {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::literal_pool_ref => {
            let target = inner.into_inner().next().unwrap();
            Ok(match target.as_rule() {
                Rule::integer => Operand::LiteralPoolImmediate(parse_integer(target)?),
                Rule::identifier => Operand::LiteralPoolLabel(target.as_str().to_string()),
                _ => unreachable!(),
            })
        }
        Rule::address_operand => Ok(Operand::Address(build_address_operand(inner)?)),
        Rule::reg_list => Ok(build_reg_list(inner)?),
        Rule::shifted_register => {
            let mut p = inner.into_inner();
            let rm = reg_id(p.next().unwrap().as_str())?;
            let shift = build_shift(p.next().unwrap())?;
            Ok(Operand::ShiftedRegister { rm, shift })
        }
        Rule::writeback_register => {
            let reg_pair = inner.into_inner().next().unwrap();
            Ok(Operand::WritebackRegister(reg_id(reg_pair.as_str())?))
        }
        Rule::register => Ok(Operand::Register(reg_id(inner.as_str())?)),
        Rule::immediate => {
            let (sign, value) = build_signed_int(inner.into_inner().next().unwrap())?;
            Ok(Operand::Immediate { sign, value })
        }
        Rule::identifier => Ok(Operand::Label(inner.as_str().to_string())),
        other => Err(format!("unexpected operand token {other:?}")),
    }
}

fn build_address_operand(pair: Pair<Rule>) -> Result<AddressOperand, String> {
    let full_text = pair.as_str().to_string();
    let mut parts = pair.into_inner();
    let rn = reg_id(parts.next().unwrap().as_str())?;
    let offset_pair = parts.next();

    // The grammar's first alternative puts the offset *inside* the
    // brackets (pre-indexed, optionally `!`-writeback); the second puts it
    // *after* a closing `]` (post-indexed, always writeback). Distinguish
    // by what follows the operand's one `]`, since pest doesn't label
    // which alternative matched.
    let bracket_close = full_text.find(']').expect("address operand always has ']'");
    let after_bracket = &full_text[bracket_close + 1..];
    let pre_indexed = !after_bracket.trim_start().starts_with(',');

    let offset = match offset_pair {
        Some(p) => build_addr_offset(p)?,
        None => AddressOffset::None,
    };

    let writeback = if pre_indexed {
        after_bracket.contains('!')
    } else {
        true
    };

    Ok(AddressOperand {
        rn,
        pre_indexed,
        writeback,
        offset,
    })
}

fn build_addr_offset(pair: Pair<Rule>) -> Result<AddressOffset, String> {
    let mut inner = pair.into_inner().peekable();
    let first = inner.next().unwrap();
    match first.as_rule() {
        Rule::signed_int => {
            let (sign, value) = build_signed_int(first)?;
            Ok(AddressOffset::Immediate { sign, value })
        }
        Rule::sign | Rule::register => {
            let (sign, reg_pair) = if first.as_rule() == Rule::sign {
                (parse_sign(first.as_str()), inner.next().unwrap())
            } else {
                (Sign::Plus, first)
            };
            let rm = reg_id(reg_pair.as_str())?;
            let shift = match inner.next() {
                Some(s) => Some(build_shift(s)?),
                None => None,
            };
            Ok(AddressOffset::Register { sign, rm, shift })
        }
        other => Err(format!("unexpected address-offset token {other:?}")),
    }
}

fn build_shift(pair: Pair<Rule>) -> Result<ShiftSpec, String> {
    let mut inner = pair.into_inner();
    let kind_str = inner.next().unwrap().as_str().to_uppercase();
    let kind = ShiftKind::from_str(&kind_str).map_err(|e| e.to_string())?;
    let amount = match inner.next() {
        None => None,
        Some(p) if p.as_rule() == Rule::integer => Some(ShiftAmountSpec::Immediate(parse_integer(p)?)),
        Some(p) => Some(ShiftAmountSpec::Register(reg_id(p.as_str())?)),
    };
    Ok(ShiftSpec { kind, amount })
}

fn build_reg_list(pair: Pair<Rule>) -> Result<Operand, String> {
    let text = pair.as_str();
    let user_bank = text.trim_end().ends_with('^');
    let mut mask = 0u16;
    for range in pair.into_inner() {
        let mut regs = range.into_inner();
        let lo = reg_id(regs.next().unwrap().as_str())?;
        let hi = match regs.next() {
            Some(p) => reg_id(p.as_str())?,
            None => lo,
        };
        let (lo, hi) = (lo.min(hi), lo.max(hi));
        for r in lo..=hi {
            mask |= 1 << r;
        }
    }
    Ok(Operand::RegisterList { mask, user_bank })
}

fn build_data_directive(pair: Pair<Rule>) -> Result<DataDirective, String> {
    let mut inner = pair.into_inner();
    let kw = inner.next().unwrap().as_str().to_uppercase();
    let width = match kw.as_str() {
        "DCB" => DataWidth::Byte,
        "DCW" => DataWidth::Half,
        "DCD" => DataWidth::Word,
        _ => return Err(format!("unknown data directive \"{kw}\"")),
    };
    let mut values = Vec::new();
    for value_pair in inner {
        let v = value_pair.into_inner().next().unwrap();
        values.push(match v.as_rule() {
            Rule::integer => DataValue::Integer(parse_integer(v)?),
            Rule::identifier => DataValue::Label(v.as_str().to_string()),
            _ => unreachable!(),
        });
    }
    Ok(DataDirective { width, values })
}

fn build_assertion(pair: Pair<Rule>) -> Result<AssertionText, String> {
    let text = pair.as_str().to_string();
    let mut inner = pair.into_inner();
    let lhs = build_assert_operand(inner.next().unwrap())?;
    let op = match inner.next().unwrap().as_str() {
        "==" => CmpOp::Eq,
        "!=" => CmpOp::Ne,
        ">=" => CmpOp::Ge,
        "<=" => CmpOp::Le,
        ">" => CmpOp::Gt,
        "<" => CmpOp::Lt,
        other => return Err(format!("unknown comparison operator \"{other}\"")),
    };
    let rhs = build_assert_operand(inner.next().unwrap())?;
    Ok(AssertionText { lhs, op, rhs, text })
}

fn build_assert_operand(pair: Pair<Rule>) -> Result<AssertOperand, String> {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::mem_operand => {
            let addr = parse_integer(inner.into_inner().next().unwrap())?;
            Ok(AssertOperand::Memory(addr))
        }
        Rule::flag_name => {
            let bit = match inner.as_str().to_uppercase().as_str() {
                "N" => FlagBit::N,
                "Z" => FlagBit::Z,
                "C" => FlagBit::C,
                "V" => FlagBit::V,
                "I" => FlagBit::I,
                "F" => FlagBit::F,
                other => return Err(format!("unknown flag \"{other}\"")),
            };
            Ok(AssertOperand::Flag(bit))
        }
        Rule::register => Ok(AssertOperand::Register(reg_id(inner.as_str())?)),
        Rule::integer => Ok(AssertOperand::Integer(parse_integer(inner)?)),
        other => Err(format!("unexpected assertion operand {other:?}")),
    }
}

fn build_signed_int(pair: Pair<Rule>) -> Result<(Sign, u32), String> {
    let s = pair.as_str();
    if let Some(rest) = s.strip_prefix('-') {
        Ok((Sign::Minus, rest.parse_integer_str()?))
    } else {
        Ok((Sign::Plus, s.strip_prefix('+').unwrap_or(s).parse_integer_str()?))
    }
}

fn parse_sign(s: &str) -> Sign {
    if s == "-" {
        Sign::Minus
    } else {
        Sign::Plus
    }
}

fn reg_id(text: &str) -> Result<u8, String> {
    match text.to_uppercase().as_str() {
        "SP" => Ok(13),
        "LR" => Ok(14),
        "PC" => Ok(15),
        other => other
            .strip_prefix('R')
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|&n| n <= 15)
            .ok_or_else(|| format!("invalid register \"{text}\"")),
    }
}

fn parse_integer(pair: Pair<Rule>) -> Result<u32, String> {
    pair.as_str().parse_integer_str()
}

trait ParseIntegerStr {
    fn parse_integer_str(&self) -> Result<u32, String>;
}

impl ParseIntegerStr for str {
    fn parse_integer_str(&self) -> Result<u32, String> {
        let s = self.trim();
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16).map_err(|_| range_error_text(s))
        } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
            u32::from_str_radix(bin, 2).map_err(|_| range_error_text(s))
        } else if let Some(ch) = s.strip_prefix('\'') {
            let body = ch.strip_suffix('\'').unwrap_or(ch);
            let c = if let Some(escaped) = body.strip_prefix('\\') {
                match escaped {
                    "n" => '\n',
                    "t" => '\t',
                    "0" => '\0',
                    "\\" => '\\',
                    "'" => '\'',
                    other => other.chars().next().unwrap_or('\0'),
                }
            } else {
                body.chars().next().unwrap_or('\0')
            };
            Ok(c as u32)
        } else {
            s.parse::<u32>().map_err(|_| range_error_text(s))
        }
    }
}

/// Marks a literal's out-of-range message so [`parse_program`] can surface
/// it as a [`ParseError::Range`] instead of a plain syntax error.
const RANGE_ERROR_PREFIX: &str = "\u{0}range\u{0}";

fn range_error_text(literal: &str) -> String {
    format!("{RANGE_ERROR_PREFIX}integer literal \"{literal}\" does not fit in 32 bits")
}
