//! Condition code evaluation against CPSR flags.

use crate::enums::Condition;
use crate::flags::Flags;

impl Condition {
    /// Evaluates this condition against the given flags. `NV` is reserved
    /// and always evaluates to `false`.
    pub fn eval(self, flags: Flags) -> bool {
        match self {
            Condition::EQ => flags.z,
            Condition::NE => !flags.z,
            Condition::CS => flags.c,
            Condition::CC => !flags.c,
            Condition::MI => flags.n,
            Condition::PL => !flags.n,
            Condition::VS => flags.v,
            Condition::VC => !flags.v,
            Condition::HI => flags.c && !flags.z,
            Condition::LS => !flags.c || flags.z,
            Condition::GE => flags.n == flags.v,
            Condition::LT => flags.n != flags.v,
            Condition::GT => !flags.z && (flags.n == flags.v),
            Condition::LE => flags.z || (flags.n != flags.v),
            Condition::AL => true,
            Condition::NV => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn al_always_true_nv_always_false() {
        let flags = Flags::default();
        assert!(Condition::AL.eval(flags));
        assert!(!Condition::NV.eval(flags));
    }

    #[test]
    fn eq_tracks_zero_flag() {
        let mut flags = Flags::default();
        flags.z = true;
        assert!(Condition::EQ.eval(flags));
        assert!(!Condition::NE.eval(flags));
    }

    #[test]
    fn gt_requires_not_zero_and_n_eq_v() {
        let mut flags = Flags::default();
        flags.n = true;
        flags.v = true;
        assert!(Condition::GT.eval(flags));
        flags.z = true;
        assert!(!Condition::GT.eval(flags));
    }
}
