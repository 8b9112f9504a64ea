// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Pure scalar evaluators: total functions from operator and operands to
//! result or trap kind, with no shared state.

pub(crate) mod float;
pub(crate) mod int;

use crate::instr::{BinOp, CvtOp, FCvtOp, ICvtOp, ITestOp, RelOp, Sign, TestOp, UnOp};
use crate::trap::TrapKind;
use crate::values::Val;

pub(crate) use float::{float32, float64};
pub(crate) use int::{int32, int64};

/// Failure of a scalar or vector evaluator.
///
/// `Type` means the operand did not match the operator, which a validated
/// module cannot produce; the machine reports it as a crash.
#[derive(Debug)]
pub(crate) enum NumericError {
    Trap(TrapKind),
    Type,
}

impl From<TrapKind> for NumericError {
    fn from(kind: TrapKind) -> Self {
        NumericError::Trap(kind)
    }
}

pub(crate) fn unop(op: UnOp, v: Val) -> Result<Val, NumericError> {
    match (op, v) {
        (UnOp::I32(op), Val::I32(x)) => Ok(Val::I32(int32::unop(op, x))),
        (UnOp::I64(op), Val::I64(x)) => Ok(Val::I64(int64::unop(op, x))),
        (UnOp::F32(op), Val::F32(x)) => Ok(float32::unop(op, f32::from_bits(x)).into()),
        (UnOp::F64(op), Val::F64(x)) => Ok(float64::unop(op, f64::from_bits(x)).into()),
        _ => Err(NumericError::Type),
    }
}

pub(crate) fn binop(op: BinOp, a: Val, b: Val) -> Result<Val, NumericError> {
    match (op, a, b) {
        (BinOp::I32(op), Val::I32(a), Val::I32(b)) => Ok(Val::I32(int32::binop(op, a, b)?)),
        (BinOp::I64(op), Val::I64(a), Val::I64(b)) => Ok(Val::I64(int64::binop(op, a, b)?)),
        (BinOp::F32(op), Val::F32(a), Val::F32(b)) => {
            Ok(float32::binop(op, f32::from_bits(a), f32::from_bits(b)).into())
        }
        (BinOp::F64(op), Val::F64(a), Val::F64(b)) => {
            Ok(float64::binop(op, f64::from_bits(a), f64::from_bits(b)).into())
        }
        _ => Err(NumericError::Type),
    }
}

pub(crate) fn testop(op: TestOp, v: Val) -> Result<Val, NumericError> {
    let res = match (op, v) {
        (TestOp::I32(ITestOp::Eqz), Val::I32(x)) => x == 0,
        (TestOp::I64(ITestOp::Eqz), Val::I64(x)) => x == 0,
        _ => return Err(NumericError::Type),
    };
    Ok(Val::I32(res as i32))
}

pub(crate) fn relop(op: RelOp, a: Val, b: Val) -> Result<Val, NumericError> {
    let res = match (op, a, b) {
        (RelOp::I32(op), Val::I32(a), Val::I32(b)) => int32::relop(op, a, b),
        (RelOp::I64(op), Val::I64(a), Val::I64(b)) => int64::relop(op, a, b),
        (RelOp::F32(op), Val::F32(a), Val::F32(b)) => {
            float32::relop(op, f32::from_bits(a), f32::from_bits(b))
        }
        (RelOp::F64(op), Val::F64(a), Val::F64(b)) => {
            float64::relop(op, f64::from_bits(a), f64::from_bits(b))
        }
        _ => return Err(NumericError::Type),
    };
    Ok(Val::I32(res as i32))
}

pub(crate) fn cvtop(op: CvtOp, v: Val) -> Result<Val, NumericError> {
    use NumericError::Type;
    Ok(match (op, v) {
        // conversions to i32
        (CvtOp::I32(ICvtOp::WrapI64), Val::I64(x)) => Val::I32(x as i32),
        (CvtOp::I32(ICvtOp::TruncF32(s)), Val::F32(x)) => {
            Val::I32(int::trunc_i32(f32::from_bits(x) as f64, s)?)
        }
        (CvtOp::I32(ICvtOp::TruncF64(s)), Val::F64(x)) => {
            Val::I32(int::trunc_i32(f64::from_bits(x), s)?)
        }
        (CvtOp::I32(ICvtOp::TruncSatF32(s)), Val::F32(x)) => {
            Val::I32(int::trunc_sat_i32(f32::from_bits(x) as f64, s))
        }
        (CvtOp::I32(ICvtOp::TruncSatF64(s)), Val::F64(x)) => {
            Val::I32(int::trunc_sat_i32(f64::from_bits(x), s))
        }
        (CvtOp::I32(ICvtOp::ReinterpretFloat), Val::F32(x)) => Val::I32(x as i32),

        // conversions to i64
        (CvtOp::I64(ICvtOp::ExtendI32(Sign::Signed)), Val::I32(x)) => Val::I64(x as i64),
        (CvtOp::I64(ICvtOp::ExtendI32(Sign::Unsigned)), Val::I32(x)) => Val::I64(x as u32 as i64),
        (CvtOp::I64(ICvtOp::TruncF32(s)), Val::F32(x)) => {
            Val::I64(int::trunc_i64(f32::from_bits(x) as f64, s)?)
        }
        (CvtOp::I64(ICvtOp::TruncF64(s)), Val::F64(x)) => {
            Val::I64(int::trunc_i64(f64::from_bits(x), s)?)
        }
        (CvtOp::I64(ICvtOp::TruncSatF32(s)), Val::F32(x)) => {
            Val::I64(int::trunc_sat_i64(f32::from_bits(x) as f64, s))
        }
        (CvtOp::I64(ICvtOp::TruncSatF64(s)), Val::F64(x)) => {
            Val::I64(int::trunc_sat_i64(f64::from_bits(x), s))
        }
        (CvtOp::I64(ICvtOp::ReinterpretFloat), Val::F64(x)) => Val::I64(x as i64),

        // conversions to f32
        (CvtOp::F32(FCvtOp::ConvertI32(Sign::Signed)), Val::I32(x)) => (x as f32).into(),
        (CvtOp::F32(FCvtOp::ConvertI32(Sign::Unsigned)), Val::I32(x)) => (x as u32 as f32).into(),
        (CvtOp::F32(FCvtOp::ConvertI64(Sign::Signed)), Val::I64(x)) => (x as f32).into(),
        (CvtOp::F32(FCvtOp::ConvertI64(Sign::Unsigned)), Val::I64(x)) => (x as u64 as f32).into(),
        (CvtOp::F32(FCvtOp::DemoteF64), Val::F64(x)) => (f64::from_bits(x) as f32).into(),
        (CvtOp::F32(FCvtOp::ReinterpretInt), Val::I32(x)) => Val::F32(x as u32),

        // conversions to f64
        (CvtOp::F64(FCvtOp::ConvertI32(Sign::Signed)), Val::I32(x)) => (x as f64).into(),
        (CvtOp::F64(FCvtOp::ConvertI32(Sign::Unsigned)), Val::I32(x)) => (x as u32 as f64).into(),
        (CvtOp::F64(FCvtOp::ConvertI64(Sign::Signed)), Val::I64(x)) => (x as f64).into(),
        (CvtOp::F64(FCvtOp::ConvertI64(Sign::Unsigned)), Val::I64(x)) => (x as u64 as f64).into(),
        (CvtOp::F64(FCvtOp::PromoteF32), Val::F32(x)) => (f32::from_bits(x) as f64).into(),
        (CvtOp::F64(FCvtOp::ReinterpretInt), Val::I64(x)) => Val::F64(x as u64),

        _ => return Err(Type),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::{FBinOp, FUnOp, IBinOp, IRelOp, IUnOp, PackSize};

    fn ibin32(op: IBinOp, a: i32, b: i32) -> Result<i32, TrapKind> {
        int32::binop(op, a, b)
    }

    #[test]
    fn division_traps() {
        assert_eq!(
            ibin32(IBinOp::DivS, 1, 0),
            Err(TrapKind::IntegerDivideByZero)
        );
        assert_eq!(
            ibin32(IBinOp::DivS, i32::MIN, -1),
            Err(TrapKind::IntegerOverflow)
        );
        assert_eq!(ibin32(IBinOp::RemS, i32::MIN, -1), Ok(0));
        assert_eq!(
            ibin32(IBinOp::RemU, 7, 0),
            Err(TrapKind::IntegerDivideByZero)
        );
        assert_eq!(ibin32(IBinOp::DivU, -1, 2), Ok((u32::MAX / 2) as i32));
    }

    #[test]
    fn shifts_mask_their_count() {
        assert_eq!(ibin32(IBinOp::Shl, 1, 33), Ok(2));
        assert_eq!(ibin32(IBinOp::ShrU, i32::MIN, 31), Ok(1));
        assert_eq!(ibin32(IBinOp::ShrS, i32::MIN, 31), Ok(-1));
        assert_eq!(ibin32(IBinOp::Rotl, 0x4000_0001, 1), Ok(-0x7fff_fffe));
        assert_eq!(int64::binop(IBinOp::Rotr, 1, 1), Ok(i64::MIN));
    }

    #[test]
    fn extend_within_width() {
        assert_eq!(int32::unop(IUnOp::ExtendS(PackSize::Pack8), 0x80), -128);
        assert_eq!(
            int64::unop(IUnOp::ExtendS(PackSize::Pack32), 0x8000_0000),
            i32::MIN as i64
        );
        assert_eq!(int32::unop(IUnOp::Clz, 1), 31);
        assert_eq!(int32::unop(IUnOp::Ctz, 0), 32);
    }

    #[test]
    fn trunc_bounds() {
        let f = |x: f32| cvtop(CvtOp::I32(ICvtOp::TruncF32(Sign::Signed)), x.into());
        assert!(matches!(f(-2147483648.0), Ok(Val::I32(i32::MIN))));
        assert!(matches!(
            f(2147483648.0),
            Err(NumericError::Trap(TrapKind::IntegerOverflow))
        ));
        assert!(matches!(
            f(f32::NAN),
            Err(NumericError::Trap(TrapKind::InvalidConversionToInteger))
        ));
        // values in (-1, 0) truncate to zero for the unsigned variant
        let g = |x: f64| cvtop(CvtOp::I32(ICvtOp::TruncF64(Sign::Unsigned)), x.into());
        assert!(matches!(g(-0.75), Ok(Val::I32(0))));
        assert!(matches!(
            g(-1.0),
            Err(NumericError::Trap(TrapKind::IntegerOverflow))
        ));
    }

    #[test]
    fn trunc_sat_clamps() {
        let f = |x: f64| cvtop(CvtOp::I64(ICvtOp::TruncSatF64(Sign::Signed)), x.into());
        assert!(matches!(f(f64::NAN), Ok(Val::I64(0))));
        assert!(matches!(f(1e300), Ok(Val::I64(i64::MAX))));
        assert!(matches!(f(-1e300), Ok(Val::I64(i64::MIN))));
        let g = |x: f64| cvtop(CvtOp::I32(ICvtOp::TruncSatF64(Sign::Unsigned)), x.into());
        assert!(matches!(g(-5.0), Ok(Val::I32(0))));
        assert!(matches!(g(5e9), Ok(Val::I32(-1)))); // u32::MAX
    }

    #[test]
    fn float_min_max_follow_wasm() {
        assert!(float32::binop(FBinOp::Min, f32::NAN, 1.0).is_nan());
        assert!(float32::binop(FBinOp::Max, 1.0, f32::NAN).is_nan());
        assert!(
            float64::binop(FBinOp::Min, 0.0, -0.0).is_sign_negative(),
            "min(+0, -0) must be -0"
        );
        assert!(float64::binop(FBinOp::Max, 0.0, -0.0).is_sign_positive());
    }

    #[test]
    fn nearest_ties_to_even() {
        assert_eq!(float64::unop(FUnOp::Nearest, 2.5), 2.0);
        assert_eq!(float64::unop(FUnOp::Nearest, 3.5), 4.0);
        assert_eq!(float64::unop(FUnOp::Nearest, -0.5), -0.0);
        assert!(float64::unop(FUnOp::Nearest, -0.5).is_sign_negative());
        assert_eq!(float32::unop(FUnOp::Nearest, 4.6), 5.0);
    }

    #[test]
    fn relops() {
        assert_eq!(int32::relop(IRelOp::LtU, -1, 0), false);
        assert_eq!(int32::relop(IRelOp::LtS, -1, 0), true);
        assert!(!float32::relop(crate::instr::FRelOp::Eq, f32::NAN, f32::NAN));
        assert!(float32::relop(crate::instr::FRelOp::Ne, f32::NAN, f32::NAN));
    }
}
