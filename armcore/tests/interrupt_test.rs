//! The periodic-interrupt end-to-end scenario from the simulator's scenario
//! set: a program looping on a no-op instruction takes a scheduled IRQ at an
//! exact cycle count and lands in IRQ mode with the banked registers spec'd
//! for that transition.

use armcore::{Exception, Mode, Section, SectionTag, Simulator, StepOutcome};
use armcore::memory::Memory;
use armcore::registers::{LR, PC};

/// `MOV R0, #0`, AL condition: a cheap stand-in for NOP that leaves no
/// state worth asserting on, matching the way `armcore::simulator`'s own
/// inline tests build raw instruction words without going through the
/// assembler.
fn mov_r0_zero() -> u32 {
    (0b1110 << 28) | (0b00 << 26) | (1 << 25) | (0b1101 << 21)
}

fn make_simulator(instruction_count: usize) -> Simulator {
    let mut memory = Memory::new();
    let mut code = Section::new(64);
    for i in 0..instruction_count {
        code.write_word(i as u32 * 4, mov_r0_zero()).unwrap();
    }
    memory.mount(SectionTag::Code, armcore::constants::CODE_BASE, code);

    let mut intvec = Section::new(0x80);
    // A no-op at the IRQ vector so stepping past the injection doesn't fault
    // on fetching an uninitialized word.
    intvec.write_word(armcore::constants::VECTOR_IRQ, mov_r0_zero()).unwrap();
    memory.mount(SectionTag::Intvec, armcore::constants::INTVEC_BASE, intvec);
    memory.mount(SectionTag::Data, armcore::constants::DATA_BASE, Section::new(64));
    Simulator::new(memory)
}

#[test]
fn scheduled_irq_fires_at_the_configured_cycle() {
    let mut sim = make_simulator(8);
    sim.configure_interrupt(Exception::Irq, false, 5, 0, 0);

    let mut outcome = StepOutcome::Stepped;
    for _ in 0..5 {
        outcome = sim.step().unwrap();
    }

    assert_eq!(outcome, StepOutcome::Exception(Exception::Irq));
    assert_eq!(sim.registers().mode(), Mode::Irq);

    let next_fetch_pc = armcore::constants::CODE_BASE + 5 * armcore::constants::WORD_BYTES;
    let expected_lr =
        next_fetch_pc + armcore::constants::PC_OFFSET - armcore::constants::WORD_BYTES;
    assert_eq!(sim.registers().read(Mode::Irq, LR), expected_lr);
    assert_eq!(sim.registers().read(Mode::Irq, PC), armcore::constants::VECTOR_IRQ);

    let svc_cpsr_before = Mode::Svc.bits();
    assert_eq!(sim.registers().spsr(Mode::Irq), Some(svc_cpsr_before));
    assert_ne!(sim.registers().cpsr() & (1 << armcore::constants::CPSR_I_BIT), 0);
}

#[test]
fn one_shot_irq_does_not_refire_on_a_later_step() {
    let mut sim = make_simulator(8);
    sim.configure_interrupt(Exception::Irq, false, 5, 0, 0);
    for _ in 0..5 {
        sim.step().unwrap();
    }
    assert!(!sim.is_halted());
    // IRQ mode masks further IRQs, so stepping through the vector's (blank)
    // memory shouldn't re-trigger the same source.
    let outcome = sim.step().unwrap();
    assert_ne!(outcome, StepOutcome::Exception(Exception::Irq));
}

#[test]
fn masked_irq_stays_pending_until_the_mask_is_lifted() {
    let mut sim = make_simulator(8);
    sim.configure_interrupt(Exception::Irq, false, 2, 0, 0);
    let masked_cpsr = sim.registers().cpsr() | (1 << armcore::constants::CPSR_I_BIT);
    sim.registers_mut().set_cpsr(masked_cpsr);

    // Due at cycle 2 but masked: the instruction still retires normally.
    for _ in 0..2 {
        let outcome = sim.step().unwrap();
        assert_eq!(outcome, StepOutcome::Stepped);
    }
    assert_eq!(sim.registers().mode(), Mode::Svc);

    // Unmask and the still-pending source fires on the very next poll.
    let unmasked_cpsr = sim.registers().cpsr() & !(1 << armcore::constants::CPSR_I_BIT);
    sim.registers_mut().set_cpsr(unmasked_cpsr);
    let outcome = sim.step().unwrap();
    assert_eq!(outcome, StepOutcome::Exception(Exception::Irq));
}
