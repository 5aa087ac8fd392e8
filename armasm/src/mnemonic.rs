//! Splits a raw mnemonic token into its base opcode, condition suffix and
//! family-specific modifier suffix.
//!
//! ARM mnemonics are ambiguous to split greedily: `BLE` could be read as
//! `BL` + the (invalid) suffix `E`, or as `B` + the condition `LE`. This
//! module tries candidate base mnemonics longest-first and backtracks to a
//! shorter base whenever the remainder doesn't fully parse as
//! `<condition><family-suffix>`, which resolves exactly that ambiguity in
//! favor of the reading that actually means something.

use armcore::Condition;
use armutil::EnumFromStr;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Family {
    DataProcessing,
    Memory,
    Block,
    Branch,
    Multiply,
    Swi,
    PsrTransfer,
    Swap,
    Nop,
    Halt,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct BlockAddrMode {
    pub pre: bool,
    pub up: bool,
}

impl BlockAddrMode {
    const IA: BlockAddrMode = BlockAddrMode { pre: false, up: true };
    const IB: BlockAddrMode = BlockAddrMode { pre: true, up: true };
    const DA: BlockAddrMode = BlockAddrMode { pre: false, up: false };
    const DB: BlockAddrMode = BlockAddrMode { pre: true, up: false };
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Resolved {
    pub base: &'static str,
    pub family: Family,
    pub cond: Condition,
    pub s_bit: bool,
    pub byte: bool,
    pub load: bool,
    pub link: bool,
    pub accumulate: bool,
    pub block_mode: BlockAddrMode,
}

struct BaseSpec {
    name: &'static str,
    family: Family,
    load: bool,
    link: bool,
    accumulate: bool,
}

const BASES: &[BaseSpec] = &[
    BaseSpec { name: "AND", family: Family::DataProcessing, load: false, link: false, accumulate: false },
    BaseSpec { name: "EOR", family: Family::DataProcessing, load: false, link: false, accumulate: false },
    BaseSpec { name: "SUB", family: Family::DataProcessing, load: false, link: false, accumulate: false },
    BaseSpec { name: "RSB", family: Family::DataProcessing, load: false, link: false, accumulate: false },
    BaseSpec { name: "ADD", family: Family::DataProcessing, load: false, link: false, accumulate: false },
    BaseSpec { name: "ADC", family: Family::DataProcessing, load: false, link: false, accumulate: false },
    BaseSpec { name: "SBC", family: Family::DataProcessing, load: false, link: false, accumulate: false },
    BaseSpec { name: "RSC", family: Family::DataProcessing, load: false, link: false, accumulate: false },
    BaseSpec { name: "TST", family: Family::DataProcessing, load: false, link: false, accumulate: false },
    BaseSpec { name: "TEQ", family: Family::DataProcessing, load: false, link: false, accumulate: false },
    BaseSpec { name: "CMP", family: Family::DataProcessing, load: false, link: false, accumulate: false },
    BaseSpec { name: "CMN", family: Family::DataProcessing, load: false, link: false, accumulate: false },
    BaseSpec { name: "ORR", family: Family::DataProcessing, load: false, link: false, accumulate: false },
    BaseSpec { name: "MOV", family: Family::DataProcessing, load: false, link: false, accumulate: false },
    BaseSpec { name: "BIC", family: Family::DataProcessing, load: false, link: false, accumulate: false },
    BaseSpec { name: "MVN", family: Family::DataProcessing, load: false, link: false, accumulate: false },
    BaseSpec { name: "LDR", family: Family::Memory, load: true, link: false, accumulate: false },
    BaseSpec { name: "STR", family: Family::Memory, load: false, link: false, accumulate: false },
    BaseSpec { name: "LDM", family: Family::Block, load: true, link: false, accumulate: false },
    BaseSpec { name: "STM", family: Family::Block, load: false, link: false, accumulate: false },
    BaseSpec { name: "MLA", family: Family::Multiply, load: false, link: false, accumulate: true },
    BaseSpec { name: "MUL", family: Family::Multiply, load: false, link: false, accumulate: false },
    BaseSpec { name: "SWI", family: Family::Swi, load: false, link: false, accumulate: false },
    BaseSpec { name: "MRS", family: Family::PsrTransfer, load: false, link: false, accumulate: false },
    BaseSpec { name: "MSR", family: Family::PsrTransfer, load: false, link: false, accumulate: false },
    BaseSpec { name: "SWP", family: Family::Swap, load: false, link: false, accumulate: false },
    BaseSpec { name: "NOP", family: Family::Nop, load: false, link: false, accumulate: false },
    BaseSpec { name: "HALT", family: Family::Halt, load: false, link: false, accumulate: false },
    BaseSpec { name: "BL", family: Family::Branch, load: false, link: true, accumulate: false },
    BaseSpec { name: "B", family: Family::Branch, load: false, link: false, accumulate: false },
];

fn split_cond_suffix<'a>(remainder: &'a str, suffixes: &[&'a str]) -> Option<(Condition, &'a str)> {
    for suf in suffixes {
        if let Some(cond_part) = remainder.strip_suffix(suf) {
            if cond_part.is_empty() {
                return Some((Condition::AL, suf));
            }
            if cond_part.len() == 2 {
                if let Ok(cond) = Condition::from_str(cond_part) {
                    if cond != Condition::NV {
                        return Some((cond, suf));
                    }
                }
            }
        }
    }
    None
}

/// Parses `token` (already uppercased) into a base mnemonic, condition and
/// family-specific suffix, trying longer base names first and backtracking
/// on a remainder that doesn't fully parse (see module docs).
pub fn resolve(token: &str) -> Option<Resolved> {
    let mut candidates: Vec<&BaseSpec> = BASES.iter().collect();
    candidates.sort_by_key(|b| std::cmp::Reverse(b.name.len()));

    for base in candidates {
        let Some(remainder) = token.strip_prefix(base.name) else {
            continue;
        };
        match base.family {
            Family::DataProcessing | Family::Multiply => {
                if let Some((cond, suf)) = split_cond_suffix(remainder, &["S", ""]) {
                    return Some(Resolved {
                        base: base.name,
                        family: base.family,
                        cond,
                        s_bit: suf == "S",
                        byte: false,
                        load: base.load,
                        link: base.link,
                        accumulate: base.accumulate,
                        block_mode: BlockAddrMode::default(),
                    });
                }
            }
            Family::Memory | Family::Swap => {
                if let Some((cond, suf)) = split_cond_suffix(remainder, &["B", ""]) {
                    return Some(Resolved {
                        base: base.name,
                        family: base.family,
                        cond,
                        s_bit: false,
                        byte: suf == "B",
                        load: base.load,
                        link: base.link,
                        accumulate: base.accumulate,
                        block_mode: BlockAddrMode::default(),
                    });
                }
            }
            Family::Block => {
                if let Some((cond, suf)) = split_cond_suffix(remainder, &["IA", "IB", "DA", "DB", ""]) {
                    let block_mode = match suf {
                        "IB" => BlockAddrMode::IB,
                        "DA" => BlockAddrMode::DA,
                        "DB" => BlockAddrMode::DB,
                        _ => BlockAddrMode::IA,
                    };
                    return Some(Resolved {
                        base: base.name,
                        family: base.family,
                        cond,
                        s_bit: false,
                        byte: false,
                        load: base.load,
                        link: base.link,
                        accumulate: base.accumulate,
                        block_mode,
                    });
                }
            }
            Family::Branch | Family::Swi | Family::PsrTransfer | Family::Nop | Family::Halt => {
                if let Some((cond, _)) = split_cond_suffix(remainder, &[""]) {
                    return Some(Resolved {
                        base: base.name,
                        family: base.family,
                        cond,
                        s_bit: false,
                        byte: false,
                        load: base.load,
                        link: base.link,
                        accumulate: base.accumulate,
                        block_mode: BlockAddrMode::default(),
                    });
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolves_plain_mnemonic_to_al() {
        let r = resolve("MOV").unwrap();
        assert_eq!(r.base, "MOV");
        assert_eq!(r.cond, Condition::AL);
        assert!(!r.s_bit);
    }

    #[test]
    fn resolves_condition_and_s_bit() {
        let r = resolve("ADDEQS").unwrap();
        assert_eq!(r.base, "ADD");
        assert_eq!(r.cond, Condition::EQ);
        assert!(r.s_bit);
    }

    #[test]
    fn ble_backtracks_to_b_plus_le_condition() {
        let r = resolve("BLE").unwrap();
        assert_eq!(r.base, "B");
        assert_eq!(r.cond, Condition::LE);
        assert!(!r.link);
    }

    #[test]
    fn bleq_is_bl_plus_eq_condition() {
        let r = resolve("BLEQ").unwrap();
        assert_eq!(r.base, "BL");
        assert_eq!(r.cond, Condition::EQ);
        assert!(r.link);
    }

    #[test]
    fn ldreqb_splits_condition_and_byte_suffix() {
        let r = resolve("LDREQB").unwrap();
        assert_eq!(r.base, "LDR");
        assert_eq!(r.cond, Condition::EQ);
        assert!(r.byte);
        assert!(r.load);
    }

    #[test]
    fn unknown_mnemonic_resolves_to_none() {
        assert!(resolve("FROB").is_none());
    }
}
