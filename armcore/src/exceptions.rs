//! Exception/interrupt scheduling and injection.
//!
//! IRQ and FIQ are periodic, not level-style: a frontend calls
//! [`InterruptSchedule::configure`] with a first-due cycle and an optional
//! repeat period (relative to some base cycle count), and the simulator
//! polls [`InterruptSchedule::poll`] once per retired instruction. This
//! mirrors a teaching simulator's notion of an interrupt source that fires
//! on a schedule the test author controls, rather than a free-running
//! peripheral raising a line at an unpredictable time.

use crate::enums::{Exception, Mode};
use crate::history::{Entry, HistoryKey, HistoryLog, Writer};
use crate::registers::{RegisterFile, LR};

/// One configured interrupt source. `next_due` is the absolute cycle count
/// at which the source next fires; `period == 0` means one-shot (the
/// schedule is cleared after it fires once).
#[derive(Clone, Copy, Debug)]
struct Schedule {
    next_due: u64,
    period: u64,
}

#[derive(Debug, Default)]
pub struct InterruptSchedule {
    irq: Option<Schedule>,
    fiq: Option<Schedule>,
}

impl InterruptSchedule {
    pub fn new() -> InterruptSchedule {
        InterruptSchedule::default()
    }

    fn slot(&mut self, exception: Exception) -> Option<&mut Option<Schedule>> {
        match exception {
            Exception::Irq => Some(&mut self.irq),
            Exception::Fiq => Some(&mut self.fiq),
            Exception::Reset | Exception::Swi => None,
        }
    }

    /// Arms (or disarms) an interrupt source. `first_at_cycle` is how many
    /// cycles after `base_cycle` the source first fires; `period` is the
    /// repeat interval afterward, or `0` for a single firing. Passing
    /// `clear: true` disarms the source regardless of the other arguments,
    /// matching a frontend that wants to silence a source it previously
    /// armed.
    pub fn configure(
        &mut self,
        exception: Exception,
        clear: bool,
        first_at_cycle: u64,
        period: u64,
        base_cycle: u64,
    ) {
        let Some(slot) = self.slot(exception) else {
            return;
        };
        if clear {
            *slot = None;
        } else {
            *slot = Some(Schedule {
                next_due: base_cycle + first_at_cycle,
                period,
            });
        }
    }

    pub fn is_armed(&self, exception: Exception) -> bool {
        match exception {
            Exception::Irq => self.irq.is_some(),
            Exception::Fiq => self.fiq.is_some(),
            Exception::Reset | Exception::Swi => false,
        }
    }

    /// The highest-priority unmasked interrupt due at `cycle`, if any. FIQ
    /// beats IRQ when both are due on the same cycle. A source that is due
    /// but masked stays pending (its `next_due` doesn't advance) so it
    /// fires as soon as the mask is lifted, rather than being skipped.
    pub fn poll(&mut self, cycle: u64, cpsr: u32) -> Option<Exception> {
        let i_masked = (cpsr >> crate::constants::CPSR_I_BIT) & 1 != 0;
        let f_masked = (cpsr >> crate::constants::CPSR_F_BIT) & 1 != 0;

        if let Some(sched) = self.fiq {
            if sched.next_due <= cycle && !f_masked {
                self.advance(Exception::Fiq, sched);
                return Some(Exception::Fiq);
            }
        }
        if let Some(sched) = self.irq {
            if sched.next_due <= cycle && !i_masked {
                self.advance(Exception::Irq, sched);
                return Some(Exception::Irq);
            }
        }
        None
    }

    fn advance(&mut self, exception: Exception, sched: Schedule) {
        let slot = self.slot(exception).expect("reset/swi never scheduled");
        if sched.period == 0 {
            *slot = None;
        } else {
            *slot = Some(Schedule {
                next_due: sched.next_due + sched.period,
                period: sched.period,
            });
        }
    }
}

/// Vectors to `exception`: saves PC to the exception mode's banked LR,
/// saves CPSR to its banked SPSR, switches mode, applies the I/F masks and
/// sets PC to the exception's vector. Returns the vectored PC.
///
/// Every register this touches is also appended to `history` so `stepBack`
/// can unwind an exception exactly like any other instruction.
pub fn inject(
    exception: Exception,
    return_address: u32,
    regs: &mut RegisterFile,
    history: &mut HistoryLog,
    cycle: u64,
) -> u32 {
    let target_mode = exception.mode();
    let old_cpsr = regs.cpsr();

    let old_lr = regs.write(target_mode, LR, return_address);
    history.record(Entry {
        writer: Writer::Register,
        key: HistoryKey::Register {
            mode: target_mode,
            id: LR,
        },
        old: old_lr,
        new: return_address,
        cycle,
    });

    if let Some(old_spsr) = regs.set_spsr(target_mode, old_cpsr) {
        history.record(Entry {
            writer: Writer::Spsr,
            key: HistoryKey::Spsr { mode: target_mode },
            old: old_spsr,
            new: old_cpsr,
            cycle,
        });
    }

    let (set_i, set_f) = exception.masks();
    let mut new_cpsr = (old_cpsr & !crate::constants::CPSR_MODE_MASK) | target_mode.bits();
    if set_i {
        new_cpsr |= 1 << crate::constants::CPSR_I_BIT;
    }
    if set_f {
        new_cpsr |= 1 << crate::constants::CPSR_F_BIT;
    }
    regs.set_cpsr(new_cpsr);
    history.record(Entry {
        writer: Writer::Cpsr,
        key: HistoryKey::Cpsr,
        old: old_cpsr,
        new: new_cpsr,
        cycle,
    });

    // write_raw: the generic R15 write path clamps to PC_OFFSET, which would
    // corrupt the reset vector (address 0).
    let vector = exception.vector();
    let old_pc = regs.read(target_mode, crate::registers::PC);
    regs.write_raw(target_mode, crate::registers::PC, vector);
    history.record(Entry {
        writer: Writer::Register,
        key: HistoryKey::Register {
            mode: target_mode,
            id: crate::registers::PC,
        },
        old: old_pc,
        new: vector,
        cycle,
    });

    vector
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fiq_beats_irq_on_the_same_cycle() {
        let mut schedule = InterruptSchedule::new();
        schedule.configure(Exception::Irq, false, 10, 0, 0);
        schedule.configure(Exception::Fiq, false, 10, 0, 0);
        assert_eq!(schedule.poll(10, 0), Some(Exception::Fiq));
    }

    #[test]
    fn masked_interrupts_stay_pending_rather_than_being_skipped() {
        let mut schedule = InterruptSchedule::new();
        schedule.configure(Exception::Irq, false, 5, 0, 0);
        let cpsr = 1 << crate::constants::CPSR_I_BIT;
        assert_eq!(schedule.poll(5, cpsr), None);
        assert_eq!(schedule.poll(5, 0), Some(Exception::Irq));
    }

    #[test]
    fn periodic_schedule_refires_after_its_period() {
        let mut schedule = InterruptSchedule::new();
        schedule.configure(Exception::Irq, false, 4, 3, 0);
        assert_eq!(schedule.poll(3, 0), None);
        assert_eq!(schedule.poll(4, 0), Some(Exception::Irq));
        assert_eq!(schedule.poll(6, 0), None);
        assert_eq!(schedule.poll(7, 0), Some(Exception::Irq));
    }

    #[test]
    fn one_shot_schedule_fires_once() {
        let mut schedule = InterruptSchedule::new();
        schedule.configure(Exception::Fiq, false, 0, 0, 2);
        assert_eq!(schedule.poll(2, 0), Some(Exception::Fiq));
        assert_eq!(schedule.poll(100, 0), None);
    }

    #[test]
    fn clear_disarms_a_configured_source() {
        let mut schedule = InterruptSchedule::new();
        schedule.configure(Exception::Irq, false, 0, 0, 0);
        assert!(schedule.is_armed(Exception::Irq));
        schedule.configure(Exception::Irq, true, 0, 0, 0);
        assert!(!schedule.is_armed(Exception::Irq));
        assert_eq!(schedule.poll(0, 0), None);
    }

    #[test]
    fn injection_vectors_to_irq_and_banks_lr_and_spsr() {
        let mut regs = RegisterFile::new();
        let mut history = HistoryLog::new();
        let vector = inject(Exception::Irq, 0x100, &mut regs, &mut history, 0);
        assert_eq!(vector, crate::constants::VECTOR_IRQ);
        assert_eq!(regs.read(Mode::Irq, LR), 0x100);
        assert_eq!(regs.mode(), Mode::Irq);
        assert_eq!(regs.read(Mode::Irq, crate::registers::PC), crate::constants::VECTOR_IRQ);
    }
}
