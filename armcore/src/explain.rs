//! Human-readable disassembly and per-instruction effect text: the
//! "explain" half of each family's `decode`/`explain`/`execute` trio, used
//! to drive a pedagogical display of what the instruction about to run
//! will do.

use crate::decode::{
    BlockTransfer, Branch, DataProcessing, Decoded, Multiply, Operand2, PsrOp, PsrTransfer,
    SingleTransfer, Swap, Swi, TransferOffset,
};
use crate::enums::{Condition, DpOpcode, ShiftKind};
use crate::registers::{LR, PC, SP};
use crate::shifter::{Shift, ShiftAmount};

fn reg_name(id: u8) -> String {
    match id {
        SP => "sp".to_string(),
        LR => "lr".to_string(),
        PC => "pc".to_string(),
        r => format!("r{r}"),
    }
}

fn cond_suffix(cond: Condition) -> &'static str {
    match cond {
        Condition::EQ => "eq",
        Condition::NE => "ne",
        Condition::CS => "cs",
        Condition::CC => "cc",
        Condition::MI => "mi",
        Condition::PL => "pl",
        Condition::VS => "vs",
        Condition::VC => "vc",
        Condition::HI => "hi",
        Condition::LS => "ls",
        Condition::GE => "ge",
        Condition::LT => "lt",
        Condition::GT => "gt",
        Condition::LE => "le",
        Condition::AL => "",
        Condition::NV => "nv",
    }
}

fn shift_text(shift: &Shift) -> String {
    if shift.kind == ShiftKind::RRX {
        return "rrx".to_string();
    }
    match shift.amount {
        ShiftAmount::Immediate(0) => String::new(),
        ShiftAmount::Immediate(n) => format!(", {:?} #{n}", shift.kind).to_lowercase(),
        ShiftAmount::Register(r) => format!(", {:?} {}", shift.kind, reg_name(r)).to_lowercase(),
    }
}

fn operand2_text(op2: &Operand2) -> String {
    match op2 {
        Operand2::Immediate(v) => format!("#{v:#x}"),
        Operand2::Register { rm, shift } => format!("{}{}", reg_name(*rm), shift_text(shift)),
    }
}

fn dp_mnemonic(opcode: DpOpcode) -> &'static str {
    match opcode {
        DpOpcode::AND => "and",
        DpOpcode::EOR => "eor",
        DpOpcode::SUB => "sub",
        DpOpcode::RSB => "rsb",
        DpOpcode::ADD => "add",
        DpOpcode::ADC => "adc",
        DpOpcode::SBC => "sbc",
        DpOpcode::RSC => "rsc",
        DpOpcode::TST => "tst",
        DpOpcode::TEQ => "teq",
        DpOpcode::CMP => "cmp",
        DpOpcode::CMN => "cmn",
        DpOpcode::ORR => "orr",
        DpOpcode::MOV => "mov",
        DpOpcode::BIC => "bic",
        DpOpcode::MVN => "mvn",
    }
}

fn dp_effect(opcode: DpOpcode) -> &'static str {
    match opcode {
        DpOpcode::AND => "bitwise AND",
        DpOpcode::EOR => "bitwise XOR",
        DpOpcode::SUB => "subtraction",
        DpOpcode::RSB => "reverse subtraction",
        DpOpcode::ADD => "addition",
        DpOpcode::ADC => "addition with carry",
        DpOpcode::SBC => "subtraction with carry",
        DpOpcode::RSC => "reverse subtraction with carry",
        DpOpcode::TST => "bitwise AND (result discarded)",
        DpOpcode::TEQ => "bitwise XOR (result discarded)",
        DpOpcode::CMP => "subtraction (result discarded)",
        DpOpcode::CMN => "addition (result discarded)",
        DpOpcode::ORR => "bitwise OR",
        DpOpcode::MOV => "move",
        DpOpcode::BIC => "bit clear",
        DpOpcode::MVN => "move-negated",
    }
}

fn data_processing(insn: &DataProcessing) -> (String, Vec<String>) {
    let mnemonic = dp_mnemonic(insn.opcode);
    let s = if insn.s { "s" } else { "" };
    let disasm = if insn.opcode.is_test() {
        format!("{mnemonic}{} {}, {}", cond_suffix(insn.cond), reg_name(insn.rn), operand2_text(&insn.operand2))
    } else if matches!(insn.opcode, DpOpcode::MOV | DpOpcode::MVN) {
        format!("{mnemonic}{s}{} {}, {}", cond_suffix(insn.cond), reg_name(insn.rd), operand2_text(&insn.operand2))
    } else {
        format!(
            "{mnemonic}{s}{} {}, {}, {}",
            cond_suffix(insn.cond),
            reg_name(insn.rd),
            reg_name(insn.rn),
            operand2_text(&insn.operand2)
        )
    };
    let mut desc = vec![format!("performs {} with operand2 {}", dp_effect(insn.opcode), operand2_text(&insn.operand2))];
    if insn.opcode.is_test() {
        desc.push("discards the result, updating flags only".to_string());
    } else {
        desc.push(format!("writes the result into {}", reg_name(insn.rd)));
    }
    if insn.s {
        desc.push("updates N, Z, C, V from the result".to_string());
    }
    (disasm, desc)
}

fn single_transfer(insn: &SingleTransfer) -> (String, Vec<String>) {
    let mnemonic = if insn.load { "ldr" } else { "str" };
    let b = if insn.byte { "b" } else { "" };
    let offset = match insn.offset {
        TransferOffset::Immediate(v) => format!("#{v:#x}"),
        TransferOffset::Register { rm, shift } => format!("{}{}", reg_name(rm), shift_text(&shift)),
    };
    let addr = if insn.pre {
        format!("[{}, {}]{}", reg_name(insn.rn), offset, if insn.writeback { "!" } else { "" })
    } else {
        format!("[{}], {}", reg_name(insn.rn), offset)
    };
    let disasm = format!("{mnemonic}{b}{} {}, {}", cond_suffix(insn.cond), reg_name(insn.rd), addr);
    let width = if insn.byte { "byte" } else { "word" };
    let mut desc = if insn.load {
        vec![format!("loads a {width} from memory into {}", reg_name(insn.rd))]
    } else {
        vec![format!("stores {} to memory as a {width}", reg_name(insn.rd))]
    };
    if insn.writeback {
        desc.push(format!("writes the computed address back into {}", reg_name(insn.rn)));
    }
    (disasm, desc)
}

fn block_transfer(insn: &BlockTransfer) -> (String, Vec<String>) {
    let mnemonic = if insn.load { "ldm" } else { "stm" };
    let mode = match (insn.pre, insn.up) {
        (false, true) => "ia",
        (true, true) => "ib",
        (false, false) => "da",
        (true, false) => "db",
    };
    let regs: Vec<String> = (0..16u8).filter(|i| insn.register_list & (1 << i) != 0).map(reg_name).collect();
    let disasm = format!(
        "{mnemonic}{mode}{} {}{}, {{{}}}{}",
        cond_suffix(insn.cond),
        reg_name(insn.rn),
        if insn.writeback { "!" } else { "" },
        regs.join(", "),
        if insn.user_bank { "^" } else { "" }
    );
    let verb = if insn.load { "loads" } else { "stores" };
    let mut desc = vec![format!("{verb} {} register(s) starting from {}", regs.len(), reg_name(insn.rn))];
    if insn.user_bank {
        desc.push("uses the User-mode register bank regardless of current mode".to_string());
    }
    if insn.writeback {
        desc.push(format!("writes the new address back into {}", reg_name(insn.rn)));
    }
    (disasm, desc)
}

fn branch(insn: &Branch) -> (String, Vec<String>) {
    let mnemonic = if insn.link { "bl" } else { "b" };
    let disasm = format!("{mnemonic}{} {:+#x}", cond_suffix(insn.cond), insn.offset);
    let mut desc = vec![format!("branches PC by {:+} bytes", insn.offset)];
    if insn.link {
        desc.push("saves the return address into lr".to_string());
    }
    (disasm, desc)
}

fn multiply(insn: &Multiply) -> (String, Vec<String>) {
    let mnemonic = if insn.accumulate { "mla" } else { "mul" };
    let s = if insn.s { "s" } else { "" };
    let disasm = if insn.accumulate {
        format!(
            "{mnemonic}{s}{} {}, {}, {}, {}",
            cond_suffix(insn.cond),
            reg_name(insn.rd),
            reg_name(insn.rm),
            reg_name(insn.rs),
            reg_name(insn.rn)
        )
    } else {
        format!(
            "{mnemonic}{s}{} {}, {}, {}",
            cond_suffix(insn.cond),
            reg_name(insn.rd),
            reg_name(insn.rm),
            reg_name(insn.rs)
        )
    };
    let mut desc = vec![format!("multiplies {} by {}", reg_name(insn.rm), reg_name(insn.rs))];
    if insn.accumulate {
        desc.push(format!("adds {} to the product", reg_name(insn.rn)));
    }
    desc.push(format!("writes the low 32 bits into {}", reg_name(insn.rd)));
    (disasm, desc)
}

fn swi(insn: &Swi) -> (String, Vec<String>) {
    let disasm = format!("swi{} #{:#x}", cond_suffix(insn.cond), insn.comment);
    let desc = vec![
        "raises a software interrupt".to_string(),
        "saves CPSR to SPSR_svc and the return address to lr_svc".to_string(),
        "switches to SVC mode and branches to the SWI vector".to_string(),
    ];
    (disasm, desc)
}

fn psr_transfer(insn: &PsrTransfer) -> (String, Vec<String>) {
    let psr = if insn.spsr { "SPSR" } else { "CPSR" };
    match &insn.op {
        PsrOp::Mrs { rd } => (
            format!("mrs{} {}, {psr}", cond_suffix(insn.cond), reg_name(*rd)),
            vec![format!("copies {psr} into {}", reg_name(*rd))],
        ),
        PsrOp::Msr { source, .. } => (
            format!("msr{} {psr}, {}", cond_suffix(insn.cond), operand2_text(source)),
            vec![format!("writes the selected fields of {psr}")],
        ),
    }
}

fn swap(insn: &Swap) -> (String, Vec<String>) {
    let b = if insn.byte { "b" } else { "" };
    let disasm = format!(
        "swp{b}{} {}, {}, [{}]",
        cond_suffix(insn.cond),
        reg_name(insn.rd),
        reg_name(insn.rm),
        reg_name(insn.rn)
    );
    let width = if insn.byte { "byte" } else { "word" };
    let desc = vec![format!(
        "atomically swaps a {width} at [{}] with {}, loading the old value into {}",
        reg_name(insn.rn),
        reg_name(insn.rm),
        reg_name(insn.rd)
    )];
    (disasm, desc)
}

/// Disassembles `decoded` into one mnemonic-like line, plus an ordered list
/// of short effect sentences (what `getCurrentInfos` surfaces as
/// `description`).
pub fn explain(decoded: &Decoded) -> (String, Vec<String>) {
    match decoded {
        Decoded::DataProcessing(i) => data_processing(i),
        Decoded::SingleTransfer(i) => single_transfer(i),
        Decoded::BlockTransfer(i) => block_transfer(i),
        Decoded::Branch(i) => branch(i),
        Decoded::Multiply(i) => multiply(i),
        Decoded::Swi(i) => swi(i),
        Decoded::PsrTransfer(i) => psr_transfer(i),
        Decoded::Swap(i) => swap(i),
        Decoded::Halt(i) => (format!("halt{}", cond_suffix(i.cond)), vec!["stops the simulator".to_string()]),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decode::decode;

    #[test]
    fn explains_mov_immediate() {
        let word = (0b1110 << 28) | (0b00 << 26) | (1 << 25) | (0b1101 << 21) | (0 << 12) | 2;
        let decoded = decode(word, 0x80).unwrap();
        let (disasm, desc) = explain(&decoded);
        assert_eq!(disasm, "mov r0, #0x2");
        assert!(desc.iter().any(|l| l.contains("r0")));
    }

    #[test]
    fn explains_branch_with_link() {
        let word = (0b1110u32 << 28) | (0b101 << 25) | (1 << 24) | 4;
        let decoded = decode(word, 0x80).unwrap();
        let (disasm, desc) = explain(&decoded);
        assert!(disasm.starts_with("bl "));
        assert!(desc.iter().any(|l| l.contains("lr")));
    }
}
