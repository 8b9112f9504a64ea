// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Integer operator evaluators, generated once per width.

use crate::instr::Sign;
use crate::trap::TrapKind;

macro_rules! int_impl {
    ($name:ident, $t:ty, $u:ty) => {
        pub(crate) mod $name {
            use crate::instr::{IBinOp, IRelOp, IUnOp, PackSize};
            use crate::trap::TrapKind;

            pub fn unop(op: IUnOp, x: $t) -> $t {
                match op {
                    IUnOp::Clz => x.leading_zeros() as $t,
                    IUnOp::Ctz => x.trailing_zeros() as $t,
                    IUnOp::Popcnt => x.count_ones() as $t,
                    IUnOp::ExtendS(PackSize::Pack8) => x as i8 as $t,
                    IUnOp::ExtendS(PackSize::Pack16) => x as i16 as $t,
                    IUnOp::ExtendS(PackSize::Pack32) => x as i32 as $t,
                }
            }

            pub fn binop(op: IBinOp, x: $t, y: $t) -> Result<$t, TrapKind> {
                Ok(match op {
                    IBinOp::Add => x.wrapping_add(y),
                    IBinOp::Sub => x.wrapping_sub(y),
                    IBinOp::Mul => x.wrapping_mul(y),
                    IBinOp::DivS => {
                        if y == 0 {
                            return Err(TrapKind::IntegerDivideByZero);
                        }
                        x.checked_div(y).ok_or(TrapKind::IntegerOverflow)?
                    }
                    IBinOp::DivU => {
                        if y == 0 {
                            return Err(TrapKind::IntegerDivideByZero);
                        }
                        ((x as $u) / (y as $u)) as $t
                    }
                    IBinOp::RemS => {
                        if y == 0 {
                            return Err(TrapKind::IntegerDivideByZero);
                        }
                        x.wrapping_rem(y)
                    }
                    IBinOp::RemU => {
                        if y == 0 {
                            return Err(TrapKind::IntegerDivideByZero);
                        }
                        ((x as $u) % (y as $u)) as $t
                    }
                    IBinOp::And => x & y,
                    IBinOp::Or => x | y,
                    IBinOp::Xor => x ^ y,
                    IBinOp::Shl => x.wrapping_shl(y as u32),
                    IBinOp::ShrS => x.wrapping_shr(y as u32),
                    IBinOp::ShrU => ((x as $u).wrapping_shr(y as u32)) as $t,
                    IBinOp::Rotl => x.rotate_left((y as u32) % <$t>::BITS),
                    IBinOp::Rotr => x.rotate_right((y as u32) % <$t>::BITS),
                })
            }

            pub fn relop(op: IRelOp, x: $t, y: $t) -> bool {
                match op {
                    IRelOp::Eq => x == y,
                    IRelOp::Ne => x != y,
                    IRelOp::LtS => x < y,
                    IRelOp::LtU => (x as $u) < (y as $u),
                    IRelOp::GtS => x > y,
                    IRelOp::GtU => (x as $u) > (y as $u),
                    IRelOp::LeS => x <= y,
                    IRelOp::LeU => (x as $u) <= (y as $u),
                    IRelOp::GeS => x >= y,
                    IRelOp::GeU => (x as $u) >= (y as $u),
                }
            }
        }
    };
}

int_impl!(int32, i32, u32);
int_impl!(int64, i64, u64);

/// Trapping float-to-i32 truncation. The range check runs in f64, which
/// represents every i32 and the power-of-two bounds exactly.
pub(crate) fn trunc_i32(x: f64, sign: Sign) -> Result<i32, TrapKind> {
    if x.is_nan() {
        return Err(TrapKind::InvalidConversionToInteger);
    }
    let t = libm::trunc(x);
    match sign {
        Sign::Signed if (-2147483648.0..2147483648.0).contains(&t) => Ok(t as i32),
        Sign::Unsigned if t > -1.0 && t < 4294967296.0 => Ok(t as u32 as i32),
        _ => Err(TrapKind::IntegerOverflow),
    }
}

/// Trapping float-to-i64 truncation.
pub(crate) fn trunc_i64(x: f64, sign: Sign) -> Result<i64, TrapKind> {
    if x.is_nan() {
        return Err(TrapKind::InvalidConversionToInteger);
    }
    let t = libm::trunc(x);
    match sign {
        Sign::Signed if (-9223372036854775808.0..9223372036854775808.0).contains(&t) => {
            Ok(t as i64)
        }
        Sign::Unsigned if t > -1.0 && t < 18446744073709551616.0 => Ok(t as u64 as i64),
        _ => Err(TrapKind::IntegerOverflow),
    }
}

/// Saturating float-to-i32 truncation: NaN becomes 0, out-of-range values
/// clamp.
pub(crate) fn trunc_sat_i32(x: f64, sign: Sign) -> i32 {
    if x.is_nan() {
        return 0;
    }
    let t = libm::trunc(x);
    match sign {
        Sign::Signed => {
            if t <= -2147483649.0 {
                i32::MIN
            } else if t >= 2147483648.0 {
                i32::MAX
            } else {
                t as i32
            }
        }
        Sign::Unsigned => {
            if t <= -1.0 {
                0
            } else if t >= 4294967296.0 {
                u32::MAX as i32
            } else {
                t as u32 as i32
            }
        }
    }
}

/// Saturating float-to-i64 truncation.
pub(crate) fn trunc_sat_i64(x: f64, sign: Sign) -> i64 {
    if x.is_nan() {
        return 0;
    }
    let t = libm::trunc(x);
    match sign {
        Sign::Signed => {
            if t < -9223372036854775808.0 {
                i64::MIN
            } else if t >= 9223372036854775808.0 {
                i64::MAX
            } else {
                t as i64
            }
        }
        Sign::Unsigned => {
            if t <= -1.0 {
                0
            } else if t >= 18446744073709551616.0 {
                u64::MAX as i64
            } else {
                t as u64 as i64
            }
        }
    }
}
