//! End-to-end scenarios assembling and running complete programs through
//! `Assembler` and `armcore::facade::Interpreter`, mirroring the way
//! Cicada-16's `tests/integration_test.rs` exercises its own assembler and
//! core together rather than unit-testing either half in isolation.

use armasm::driver::{Assembler, AssemblerSettings};
use armcore::facade::Interpreter;
use armcore::memory::{Section, SectionTag};
use armcore::simulator::Simulator;
use armcore::{Mode, StepOutcome};

fn assemble_ok(source: &str) -> Assembler {
    let assembler = Assembler::assemble(source, &AssemblerSettings::default());
    assert!(assembler.errors.is_empty(), "unexpected errors: {:?}", assembler.errors);
    assembler
}

fn interpreter_for(source: &str) -> Interpreter {
    let assembler = assemble_ok(source);
    let (memory, address_lines, assertions) = assembler.into_memory().expect("assembly succeeded");
    let mut interp = Interpreter::new();
    interp.reset(memory, address_lines);
    for assertion in assertions {
        interp.add_assertion(assertion);
    }
    interp
}

#[test]
fn hello_addition() {
    let mut interp = interpreter_for(
        "SECTION INTVEC\nSECTION CODE\nMOV R0, #2\nMOV R1, #3\nADD R2, R0, R1\nSECTION DATA\n",
    );
    for _ in 0..3 {
        interp.step().unwrap();
    }
    assert_eq!(interp.get_register(Mode::Svc, 0).unwrap(), 2);
    assert_eq!(interp.get_register(Mode::Svc, 1).unwrap(), 3);
    assert_eq!(interp.get_register(Mode::Svc, 2).unwrap(), 5);
    assert_eq!(interp.get_cycle_count().unwrap(), 3);
    assert_eq!(interp.get_current_instruction_address().unwrap(), 0x8C);
}

#[test]
fn label_branch_loop() {
    let mut interp = interpreter_for(
        "SECTION INTVEC\nSECTION CODE\nMOV R0, #0\nloop: ADD R0, R0, #1\nCMP R0, #3\nBNE loop\nSECTION DATA\n",
    );
    for _ in 0..10 {
        interp.step().unwrap();
    }
    assert_eq!(interp.get_register(Mode::Svc, 0).unwrap(), 3);
    let flags = interp.get_flags().unwrap();
    assert!(flags.z);
    assert!(!flags.n);
    assert_eq!(interp.get_cycle_count().unwrap(), 10);
}

#[test]
fn literal_pool_load() {
    let mut interp = interpreter_for(
        "SECTION INTVEC\nSECTION CODE\nLDR R0, =0xDEADBEEF\nSECTION DATA\n",
    );
    interp.step().unwrap();
    assert_eq!(interp.get_register(Mode::Svc, 0).unwrap(), 0xDEAD_BEEF);

    let assembler = assemble_ok("SECTION INTVEC\nSECTION CODE\nLDR R0, =0xDEADBEEF\nSECTION DATA\n");
    let code = assembler.sections.get(&SectionTag::Code).unwrap();
    // One instruction word (4 bytes) plus one pool word (4 bytes).
    assert_eq!(code.len(), 8);
    let pool_word = u32::from_le_bytes(code[4..8].try_into().unwrap());
    assert_eq!(pool_word, 0xDEAD_BEEF);
}

#[test]
fn byte_store_leaves_neighbouring_bytes_unset() {
    let source = "SECTION INTVEC\nSECTION CODE\nMOV R0, #0xAB\nMOV R1, #0x1000\nSTRB R0, [R1]\nLDRB R2, [R1]\nSECTION DATA\n";
    let mut interp = interpreter_for(source);
    for _ in 0..4 {
        interp.step().unwrap();
    }
    assert_eq!(interp.get_register(Mode::Svc, 2).unwrap(), 0xAB);
    assert_eq!(interp.get_memory(0x1000, 1).unwrap(), 0xAB);

    // Drive the same program directly against `Simulator` to observe the
    // initialization mask the facade's `get_memory(..., allow_uninitialized)`
    // path deliberately hides.
    let assembler = assemble_ok(source);
    let (memory, _, _) = assembler.into_memory().unwrap();
    let mut sim = Simulator::new(memory);
    for _ in 0..4 {
        sim.step().unwrap();
    }
    let data = sim.memory().section(SectionTag::Data).unwrap();
    assert!(data.is_initialized(0));
    assert!(!data.is_initialized(1));
    assert!(!data.is_initialized(2));
    assert!(!data.is_initialized(3));
}

#[test]
fn step_back_restores_prior_state_and_replays_forward() {
    let mut interp = interpreter_for(
        "SECTION INTVEC\nSECTION CODE\nMOV R0, #2\nMOV R1, #3\nADD R2, R0, R1\nSECTION DATA\n",
    );
    for _ in 0..3 {
        interp.step().unwrap();
    }
    interp.step_back(2).unwrap();
    assert_eq!(interp.get_register(Mode::Svc, 0).unwrap(), 2);
    assert_eq!(interp.get_register(Mode::Svc, 1).unwrap(), 0);
    assert_eq!(interp.get_register(Mode::Svc, 2).unwrap(), 0);
    assert_eq!(interp.get_cycle_count().unwrap(), 1);

    interp.step().unwrap();
    assert_eq!(interp.get_register(Mode::Svc, 1).unwrap(), 3);
}

#[test]
fn assertion_failure_is_reported_by_line() {
    // The ASSERT attaches `After` to the preceding `MOV`, so it fires the
    // moment that instruction retires rather than waiting for the `ADD`.
    let source = "SECTION INTVEC\nSECTION CODE\nMOV R0, #2\nASSERT R0 == 3\nADD R0, R0, #1\nSECTION DATA\n";
    let mut interp = interpreter_for(source);
    let err = interp.step();
    assert!(err.is_err(), "expected the ASSERT to fail right after the MOV runs");
}

#[test]
fn snippet_program_halts_quietly_off_the_end() {
    let mut interp = interpreter_for("MOV R0, #1\nMOV R1, #2\n");
    let outcome1 = interp.step_mode(armcore::facade::StepMode::Into, 1).unwrap();
    assert_eq!(outcome1, StepOutcome::Stepped);
    interp.step().unwrap();
    let outcome = interp.step().unwrap();
    assert_eq!(outcome, StepOutcome::Halted);
    assert!(!interp.errors_pending(), "snippet-mode overrun should not surface as a user error");
}
