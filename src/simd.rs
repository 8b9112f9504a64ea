// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Pure vector evaluators over [`V128`], lane views included.
//!
//! Like the scalar evaluators, these are total functions; an
//! operator/shape combination that validation rules out comes back as
//! [`NumericError::Type`] and is reported as a crash by the machine.

use crate::instr::{FUnOp, Half, Shape, Sign, VecBinOp, VecBitsOp, VecCvtOp, VecRelOp, VecShiftOp, VecUnOp};
use crate::numeric::{NumericError, float32, float64, int};
use crate::values::{V128, Val};

macro_rules! lane_view {
    ($to:ident, $from:ident, $t:ty, $n:expr) => {
        impl V128 {
            pub(crate) fn $to(self) -> [$t; $n] {
                let mut out = [<$t>::from_le_bytes([0; 16 / $n]); $n];
                for (i, lane) in out.iter_mut().enumerate() {
                    let mut b = [0u8; 16 / $n];
                    b.copy_from_slice(&self.0[i * (16 / $n)..(i + 1) * (16 / $n)]);
                    *lane = <$t>::from_le_bytes(b);
                }
                out
            }

            pub(crate) fn $from(lanes: [$t; $n]) -> V128 {
                let mut out = [0u8; 16];
                for (i, lane) in lanes.iter().enumerate() {
                    out[i * (16 / $n)..(i + 1) * (16 / $n)].copy_from_slice(&lane.to_le_bytes());
                }
                V128(out)
            }
        }
    };
}

lane_view!(to_i8x16, from_i8x16, i8, 16);
lane_view!(to_u8x16, from_u8x16, u8, 16);
lane_view!(to_i16x8, from_i16x8, i16, 8);
lane_view!(to_u16x8, from_u16x8, u16, 8);
lane_view!(to_i32x4, from_i32x4, i32, 4);
lane_view!(to_u32x4, from_u32x4, u32, 4);
lane_view!(to_i64x2, from_i64x2, i64, 2);
lane_view!(to_u64x2, from_u64x2, u64, 2);
lane_view!(to_f32x4, from_f32x4, f32, 4);
lane_view!(to_f64x2, from_f64x2, f64, 2);

macro_rules! lane_fns {
    ($map:ident, $zip:ident, $cmp:ident, $to:ident, $from:ident, $t:ty) => {
        fn $map(v: V128, f: impl Fn($t) -> $t) -> V128 {
            let mut a = v.$to();
            for x in &mut a {
                *x = f(*x);
            }
            V128::$from(a)
        }

        fn $zip(a: V128, b: V128, f: impl Fn($t, $t) -> $t) -> V128 {
            let mut a = a.$to();
            let b = b.$to();
            for (x, y) in a.iter_mut().zip(b) {
                *x = f(*x, y);
            }
            V128::$from(a)
        }

        /// Comparison producing an all-ones/all-zeroes lane mask.
        fn $cmp(a: V128, b: V128, f: impl Fn($t, $t) -> bool) -> V128 {
            let a = a.$to();
            let b = b.$to();
            let size = 16 / a.len();
            let mut out = [0u8; 16];
            for (i, (x, y)) in a.into_iter().zip(b).enumerate() {
                if f(x, y) {
                    out[i * size..(i + 1) * size].fill(0xff);
                }
            }
            V128::from_le_bytes(out)
        }
    };
}

lane_fns!(map_i8, zip_i8, cmp_i8, to_i8x16, from_i8x16, i8);
lane_fns!(map_i16, zip_i16, cmp_i16, to_i16x8, from_i16x8, i16);
lane_fns!(map_i32, zip_i32, cmp_i32, to_i32x4, from_i32x4, i32);
lane_fns!(map_i64, zip_i64, cmp_i64, to_i64x2, from_i64x2, i64);
lane_fns!(map_f32, zip_f32, cmp_f32, to_f32x4, from_f32x4, f32);
lane_fns!(map_f64, zip_f64, cmp_f64, to_f64x2, from_f64x2, f64);

pub(crate) fn splat(shape: Shape, v: Val) -> Result<V128, NumericError> {
    Ok(match (shape, v) {
        (Shape::I8x16, Val::I32(x)) => V128::from_i8x16([x as i8; 16]),
        (Shape::I16x8, Val::I32(x)) => V128::from_i16x8([x as i16; 8]),
        (Shape::I32x4, Val::I32(x)) => V128::from_i32x4([x; 4]),
        (Shape::I64x2, Val::I64(x)) => V128::from_i64x2([x; 2]),
        (Shape::F32x4, Val::F32(x)) => V128::from_f32x4([f32::from_bits(x); 4]),
        (Shape::F64x2, Val::F64(x)) => V128::from_f64x2([f64::from_bits(x); 2]),
        _ => return Err(NumericError::Type),
    })
}

pub(crate) fn extract_lane(
    shape: Shape,
    lane: u8,
    sign: Option<Sign>,
    v: V128,
) -> Result<Val, NumericError> {
    let i = lane as usize;
    if i >= shape.lanes() {
        return Err(NumericError::Type);
    }
    Ok(match (shape, sign) {
        (Shape::I8x16, Some(Sign::Signed)) => Val::I32(v.to_i8x16()[i] as i32),
        (Shape::I8x16, Some(Sign::Unsigned)) => Val::I32(v.to_u8x16()[i] as i32),
        (Shape::I16x8, Some(Sign::Signed)) => Val::I32(v.to_i16x8()[i] as i32),
        (Shape::I16x8, Some(Sign::Unsigned)) => Val::I32(v.to_u16x8()[i] as i32),
        (Shape::I32x4, None) => Val::I32(v.to_i32x4()[i]),
        (Shape::I64x2, None) => Val::I64(v.to_i64x2()[i]),
        (Shape::F32x4, None) => Val::F32(v.to_u32x4()[i]),
        (Shape::F64x2, None) => Val::F64(v.to_u64x2()[i]),
        _ => return Err(NumericError::Type),
    })
}

pub(crate) fn replace_lane(
    shape: Shape,
    lane: u8,
    v: V128,
    x: Val,
) -> Result<V128, NumericError> {
    let i = lane as usize;
    if i >= shape.lanes() {
        return Err(NumericError::Type);
    }
    Ok(match (shape, x) {
        (Shape::I8x16, Val::I32(x)) => {
            let mut a = v.to_i8x16();
            a[i] = x as i8;
            V128::from_i8x16(a)
        }
        (Shape::I16x8, Val::I32(x)) => {
            let mut a = v.to_i16x8();
            a[i] = x as i16;
            V128::from_i16x8(a)
        }
        (Shape::I32x4, Val::I32(x)) => {
            let mut a = v.to_i32x4();
            a[i] = x;
            V128::from_i32x4(a)
        }
        (Shape::I64x2, Val::I64(x)) => {
            let mut a = v.to_i64x2();
            a[i] = x;
            V128::from_i64x2(a)
        }
        (Shape::F32x4, Val::F32(x)) => {
            let mut a = v.to_u32x4();
            a[i] = x;
            V128::from_u32x4(a)
        }
        (Shape::F64x2, Val::F64(x)) => {
            let mut a = v.to_u64x2();
            a[i] = x;
            V128::from_u64x2(a)
        }
        _ => return Err(NumericError::Type),
    })
}

pub(crate) fn unop(shape: Shape, op: VecUnOp, v: V128) -> Result<V128, NumericError> {
    use Shape::*;
    use VecUnOp::*;
    let float_op = |op: VecUnOp| match op {
        Abs => Some(FUnOp::Abs),
        Neg => Some(FUnOp::Neg),
        Sqrt => Some(FUnOp::Sqrt),
        Ceil => Some(FUnOp::Ceil),
        Floor => Some(FUnOp::Floor),
        Trunc => Some(FUnOp::Trunc),
        Nearest => Some(FUnOp::Nearest),
        Popcnt => None,
    };
    Ok(match (shape, op) {
        (I8x16, Abs) => map_i8(v, i8::wrapping_abs),
        (I8x16, Neg) => map_i8(v, i8::wrapping_neg),
        (I8x16, Popcnt) => map_i8(v, |x| x.count_ones() as i8),
        (I16x8, Abs) => map_i16(v, i16::wrapping_abs),
        (I16x8, Neg) => map_i16(v, i16::wrapping_neg),
        (I32x4, Abs) => map_i32(v, i32::wrapping_abs),
        (I32x4, Neg) => map_i32(v, i32::wrapping_neg),
        (I64x2, Abs) => map_i64(v, i64::wrapping_abs),
        (I64x2, Neg) => map_i64(v, i64::wrapping_neg),
        (F32x4, op) => {
            let op = float_op(op).ok_or(NumericError::Type)?;
            map_f32(v, |x| float32::unop(op, x))
        }
        (F64x2, op) => {
            let op = float_op(op).ok_or(NumericError::Type)?;
            map_f64(v, |x| float64::unop(op, x))
        }
        _ => return Err(NumericError::Type),
    })
}

pub(crate) fn binop(shape: Shape, op: VecBinOp, a: V128, b: V128) -> Result<V128, NumericError> {
    use Shape::*;
    use VecBinOp::*;
    Ok(match (shape, op) {
        // i8x16
        (I8x16, Add) => zip_i8(a, b, i8::wrapping_add),
        (I8x16, Sub) => zip_i8(a, b, i8::wrapping_sub),
        (I8x16, MinS) => zip_i8(a, b, i8::min),
        (I8x16, MaxS) => zip_i8(a, b, i8::max),
        (I8x16, MinU) => unsigned8(a, b, u8::min),
        (I8x16, MaxU) => unsigned8(a, b, u8::max),
        (I8x16, AddSatS) => zip_i8(a, b, i8::saturating_add),
        (I8x16, SubSatS) => zip_i8(a, b, i8::saturating_sub),
        (I8x16, AddSatU) => unsigned8(a, b, u8::saturating_add),
        (I8x16, SubSatU) => unsigned8(a, b, u8::saturating_sub),
        (I8x16, AvgrU) => unsigned8(a, b, |x, y| ((x as u16 + y as u16 + 1) / 2) as u8),
        (I8x16, Narrow(sign)) => {
            let mut out = [0u8; 16];
            let (a, b) = (a.to_i16x8(), b.to_i16x8());
            for (i, x) in a.into_iter().chain(b).enumerate() {
                out[i] = match sign {
                    Sign::Signed => x.clamp(i8::MIN as i16, i8::MAX as i16) as i8 as u8,
                    Sign::Unsigned => x.clamp(0, u8::MAX as i16) as u8,
                };
            }
            V128::from_u8x16(out)
        }
        (I8x16, Swizzle) => {
            let (a, idx) = (a.to_u8x16(), b.to_u8x16());
            let mut out = [0u8; 16];
            for (o, i) in out.iter_mut().zip(idx) {
                *o = if (i as usize) < 16 { a[i as usize] } else { 0 };
            }
            V128::from_u8x16(out)
        }

        // i16x8
        (I16x8, Add) => zip_i16(a, b, i16::wrapping_add),
        (I16x8, Sub) => zip_i16(a, b, i16::wrapping_sub),
        (I16x8, Mul) => zip_i16(a, b, i16::wrapping_mul),
        (I16x8, MinS) => zip_i16(a, b, i16::min),
        (I16x8, MaxS) => zip_i16(a, b, i16::max),
        (I16x8, MinU) => unsigned16(a, b, u16::min),
        (I16x8, MaxU) => unsigned16(a, b, u16::max),
        (I16x8, AddSatS) => zip_i16(a, b, i16::saturating_add),
        (I16x8, SubSatS) => zip_i16(a, b, i16::saturating_sub),
        (I16x8, AddSatU) => unsigned16(a, b, u16::saturating_add),
        (I16x8, SubSatU) => unsigned16(a, b, u16::saturating_sub),
        (I16x8, AvgrU) => unsigned16(a, b, |x, y| ((x as u32 + y as u32 + 1) / 2) as u16),
        (I16x8, Q15MulRSatS) => zip_i16(a, b, |x, y| {
            (((x as i32 * y as i32) + 0x4000) >> 15).clamp(i16::MIN as i32, i16::MAX as i32) as i16
        }),
        (I16x8, Narrow(sign)) => {
            let mut out = [0u16; 8];
            let (a, b) = (a.to_i32x4(), b.to_i32x4());
            for (i, x) in a.into_iter().chain(b).enumerate() {
                out[i] = match sign {
                    Sign::Signed => x.clamp(i16::MIN as i32, i16::MAX as i32) as i16 as u16,
                    Sign::Unsigned => x.clamp(0, u16::MAX as i32) as u16,
                };
            }
            V128::from_u16x8(out)
        }
        (I16x8, ExtMul(half, sign)) => {
            let range = half_range(half, 8);
            let mut out = [0i16; 8];
            match sign {
                Sign::Signed => {
                    let (a, b) = (a.to_i8x16(), b.to_i8x16());
                    for (o, i) in out.iter_mut().zip(range) {
                        *o = (a[i] as i16).wrapping_mul(b[i] as i16);
                    }
                }
                Sign::Unsigned => {
                    let (a, b) = (a.to_u8x16(), b.to_u8x16());
                    for (o, i) in out.iter_mut().zip(range) {
                        *o = (a[i] as u16).wrapping_mul(b[i] as u16) as i16;
                    }
                }
            }
            V128::from_i16x8(out)
        }

        // i32x4
        (I32x4, Add) => zip_i32(a, b, i32::wrapping_add),
        (I32x4, Sub) => zip_i32(a, b, i32::wrapping_sub),
        (I32x4, Mul) => zip_i32(a, b, i32::wrapping_mul),
        (I32x4, MinS) => zip_i32(a, b, i32::min),
        (I32x4, MaxS) => zip_i32(a, b, i32::max),
        (I32x4, MinU) => {
            let (x, y) = (a.to_u32x4(), b.to_u32x4());
            let mut out = x;
            for (o, y) in out.iter_mut().zip(y) {
                *o = (*o).min(y);
            }
            V128::from_u32x4(out)
        }
        (I32x4, MaxU) => {
            let (x, y) = (a.to_u32x4(), b.to_u32x4());
            let mut out = x;
            for (o, y) in out.iter_mut().zip(y) {
                *o = (*o).max(y);
            }
            V128::from_u32x4(out)
        }
        (I32x4, DotI16x8S) => {
            let (a, b) = (a.to_i16x8(), b.to_i16x8());
            let mut out = [0i32; 4];
            for (i, o) in out.iter_mut().enumerate() {
                let lo = a[2 * i] as i32 * b[2 * i] as i32;
                let hi = a[2 * i + 1] as i32 * b[2 * i + 1] as i32;
                *o = lo.wrapping_add(hi);
            }
            V128::from_i32x4(out)
        }
        (I32x4, ExtMul(half, sign)) => {
            let range = half_range(half, 4);
            let mut out = [0i32; 4];
            match sign {
                Sign::Signed => {
                    let (a, b) = (a.to_i16x8(), b.to_i16x8());
                    for (o, i) in out.iter_mut().zip(range) {
                        *o = (a[i] as i32).wrapping_mul(b[i] as i32);
                    }
                }
                Sign::Unsigned => {
                    let (a, b) = (a.to_u16x8(), b.to_u16x8());
                    for (o, i) in out.iter_mut().zip(range) {
                        *o = (a[i] as u32).wrapping_mul(b[i] as u32) as i32;
                    }
                }
            }
            V128::from_i32x4(out)
        }

        // i64x2
        (I64x2, Add) => zip_i64(a, b, i64::wrapping_add),
        (I64x2, Sub) => zip_i64(a, b, i64::wrapping_sub),
        (I64x2, Mul) => zip_i64(a, b, i64::wrapping_mul),
        (I64x2, ExtMul(half, sign)) => {
            let range = half_range(half, 2);
            let mut out = [0i64; 2];
            match sign {
                Sign::Signed => {
                    let (a, b) = (a.to_i32x4(), b.to_i32x4());
                    for (o, i) in out.iter_mut().zip(range) {
                        *o = (a[i] as i64).wrapping_mul(b[i] as i64);
                    }
                }
                Sign::Unsigned => {
                    let (a, b) = (a.to_u32x4(), b.to_u32x4());
                    for (o, i) in out.iter_mut().zip(range) {
                        *o = (a[i] as u64).wrapping_mul(b[i] as u64) as i64;
                    }
                }
            }
            V128::from_i64x2(out)
        }

        // floats
        (F32x4, Add) => zip_f32(a, b, |x, y| x + y),
        (F32x4, Sub) => zip_f32(a, b, |x, y| x - y),
        (F32x4, Mul) => zip_f32(a, b, |x, y| x * y),
        (F32x4, Div) => zip_f32(a, b, |x, y| x / y),
        (F32x4, Min) => zip_f32(a, b, float32::min),
        (F32x4, Max) => zip_f32(a, b, float32::max),
        (F32x4, PMin) => zip_f32(a, b, |x, y| if y < x { y } else { x }),
        (F32x4, PMax) => zip_f32(a, b, |x, y| if x < y { y } else { x }),
        (F64x2, Add) => zip_f64(a, b, |x, y| x + y),
        (F64x2, Sub) => zip_f64(a, b, |x, y| x - y),
        (F64x2, Mul) => zip_f64(a, b, |x, y| x * y),
        (F64x2, Div) => zip_f64(a, b, |x, y| x / y),
        (F64x2, Min) => zip_f64(a, b, float64::min),
        (F64x2, Max) => zip_f64(a, b, float64::max),
        (F64x2, PMin) => zip_f64(a, b, |x, y| if y < x { y } else { x }),
        (F64x2, PMax) => zip_f64(a, b, |x, y| if x < y { y } else { x }),

        _ => return Err(NumericError::Type),
    })
}

pub(crate) fn relop(shape: Shape, op: VecRelOp, a: V128, b: V128) -> Result<V128, NumericError> {
    use Shape::*;
    use VecRelOp::*;
    Ok(match shape {
        I8x16 => match op {
            Eq => cmp_i8(a, b, |x, y| x == y),
            Ne => cmp_i8(a, b, |x, y| x != y),
            LtS => cmp_i8(a, b, |x, y| x < y),
            LtU => cmp_i8(a, b, |x, y| (x as u8) < (y as u8)),
            GtS => cmp_i8(a, b, |x, y| x > y),
            GtU => cmp_i8(a, b, |x, y| (x as u8) > (y as u8)),
            LeS => cmp_i8(a, b, |x, y| x <= y),
            LeU => cmp_i8(a, b, |x, y| (x as u8) <= (y as u8)),
            GeS => cmp_i8(a, b, |x, y| x >= y),
            GeU => cmp_i8(a, b, |x, y| (x as u8) >= (y as u8)),
            _ => return Err(NumericError::Type),
        },
        I16x8 => match op {
            Eq => cmp_i16(a, b, |x, y| x == y),
            Ne => cmp_i16(a, b, |x, y| x != y),
            LtS => cmp_i16(a, b, |x, y| x < y),
            LtU => cmp_i16(a, b, |x, y| (x as u16) < (y as u16)),
            GtS => cmp_i16(a, b, |x, y| x > y),
            GtU => cmp_i16(a, b, |x, y| (x as u16) > (y as u16)),
            LeS => cmp_i16(a, b, |x, y| x <= y),
            LeU => cmp_i16(a, b, |x, y| (x as u16) <= (y as u16)),
            GeS => cmp_i16(a, b, |x, y| x >= y),
            GeU => cmp_i16(a, b, |x, y| (x as u16) >= (y as u16)),
            _ => return Err(NumericError::Type),
        },
        I32x4 => match op {
            Eq => cmp_i32(a, b, |x, y| x == y),
            Ne => cmp_i32(a, b, |x, y| x != y),
            LtS => cmp_i32(a, b, |x, y| x < y),
            LtU => cmp_i32(a, b, |x, y| (x as u32) < (y as u32)),
            GtS => cmp_i32(a, b, |x, y| x > y),
            GtU => cmp_i32(a, b, |x, y| (x as u32) > (y as u32)),
            LeS => cmp_i32(a, b, |x, y| x <= y),
            LeU => cmp_i32(a, b, |x, y| (x as u32) <= (y as u32)),
            GeS => cmp_i32(a, b, |x, y| x >= y),
            GeU => cmp_i32(a, b, |x, y| (x as u32) >= (y as u32)),
            _ => return Err(NumericError::Type),
        },
        I64x2 => match op {
            Eq => cmp_i64(a, b, |x, y| x == y),
            Ne => cmp_i64(a, b, |x, y| x != y),
            LtS => cmp_i64(a, b, |x, y| x < y),
            GtS => cmp_i64(a, b, |x, y| x > y),
            LeS => cmp_i64(a, b, |x, y| x <= y),
            GeS => cmp_i64(a, b, |x, y| x >= y),
            _ => return Err(NumericError::Type),
        },
        F32x4 => match op {
            Eq => cmp_f32(a, b, |x, y| x == y),
            Ne => cmp_f32(a, b, |x, y| x != y),
            Lt => cmp_f32(a, b, |x, y| x < y),
            Gt => cmp_f32(a, b, |x, y| x > y),
            Le => cmp_f32(a, b, |x, y| x <= y),
            Ge => cmp_f32(a, b, |x, y| x >= y),
            _ => return Err(NumericError::Type),
        },
        F64x2 => match op {
            Eq => cmp_f64(a, b, |x, y| x == y),
            Ne => cmp_f64(a, b, |x, y| x != y),
            Lt => cmp_f64(a, b, |x, y| x < y),
            Gt => cmp_f64(a, b, |x, y| x > y),
            Le => cmp_f64(a, b, |x, y| x <= y),
            Ge => cmp_f64(a, b, |x, y| x >= y),
            _ => return Err(NumericError::Type),
        },
    })
}

pub(crate) fn shift(
    shape: Shape,
    op: VecShiftOp,
    v: V128,
    count: i32,
) -> Result<V128, NumericError> {
    let c = count as u32 % shape.lane_bits();
    Ok(match shape {
        Shape::I8x16 => match op {
            VecShiftOp::Shl => map_i8(v, |x| x.wrapping_shl(c)),
            VecShiftOp::ShrS => map_i8(v, |x| x.wrapping_shr(c)),
            VecShiftOp::ShrU => map_i8(v, |x| ((x as u8) >> c) as i8),
        },
        Shape::I16x8 => match op {
            VecShiftOp::Shl => map_i16(v, |x| x.wrapping_shl(c)),
            VecShiftOp::ShrS => map_i16(v, |x| x.wrapping_shr(c)),
            VecShiftOp::ShrU => map_i16(v, |x| ((x as u16) >> c) as i16),
        },
        Shape::I32x4 => match op {
            VecShiftOp::Shl => map_i32(v, |x| x.wrapping_shl(c)),
            VecShiftOp::ShrS => map_i32(v, |x| x.wrapping_shr(c)),
            VecShiftOp::ShrU => map_i32(v, |x| ((x as u32) >> c) as i32),
        },
        Shape::I64x2 => match op {
            VecShiftOp::Shl => map_i64(v, |x| x.wrapping_shl(c)),
            VecShiftOp::ShrS => map_i64(v, |x| x.wrapping_shr(c)),
            VecShiftOp::ShrU => map_i64(v, |x| ((x as u64) >> c) as i64),
        },
        Shape::F32x4 | Shape::F64x2 => return Err(NumericError::Type),
    })
}

pub(crate) fn bitmask(shape: Shape, v: V128) -> Result<i32, NumericError> {
    let mut out = 0i32;
    match shape {
        Shape::I8x16 => {
            for (i, x) in v.to_i8x16().into_iter().enumerate() {
                out |= ((x < 0) as i32) << i;
            }
        }
        Shape::I16x8 => {
            for (i, x) in v.to_i16x8().into_iter().enumerate() {
                out |= ((x < 0) as i32) << i;
            }
        }
        Shape::I32x4 => {
            for (i, x) in v.to_i32x4().into_iter().enumerate() {
                out |= ((x < 0) as i32) << i;
            }
        }
        Shape::I64x2 => {
            for (i, x) in v.to_i64x2().into_iter().enumerate() {
                out |= ((x < 0) as i32) << i;
            }
        }
        Shape::F32x4 | Shape::F64x2 => return Err(NumericError::Type),
    }
    Ok(out)
}

pub(crate) fn any_true(v: V128) -> bool {
    v != V128::ZERO
}

pub(crate) fn all_true(shape: Shape, v: V128) -> Result<bool, NumericError> {
    Ok(match shape {
        Shape::I8x16 => v.to_i8x16().iter().all(|&x| x != 0),
        Shape::I16x8 => v.to_i16x8().iter().all(|&x| x != 0),
        Shape::I32x4 => v.to_i32x4().iter().all(|&x| x != 0),
        Shape::I64x2 => v.to_i64x2().iter().all(|&x| x != 0),
        Shape::F32x4 | Shape::F64x2 => return Err(NumericError::Type),
    })
}

pub(crate) fn bits(op: VecBitsOp, a: V128, b: V128) -> V128 {
    let mut out = a.to_le_bytes();
    let b = b.to_le_bytes();
    for (x, y) in out.iter_mut().zip(b) {
        *x = match op {
            VecBitsOp::And => *x & y,
            VecBitsOp::AndNot => *x & !y,
            VecBitsOp::Or => *x | y,
            VecBitsOp::Xor => *x ^ y,
        };
    }
    V128::from_le_bytes(out)
}

pub(crate) fn not(v: V128) -> V128 {
    let mut out = v.to_le_bytes();
    for x in &mut out {
        *x = !*x;
    }
    V128::from_le_bytes(out)
}

/// `(v1 & mask) | (v2 & !mask)`.
pub(crate) fn bitselect(v1: V128, v2: V128, mask: V128) -> V128 {
    bits(VecBitsOp::Or, bits(VecBitsOp::And, v1, mask), bits(VecBitsOp::AndNot, v2, mask))
}

/// Lane selection out of the 32 concatenated lanes of `a` and `b`.
pub(crate) fn shuffle(lanes: &[u8; 16], a: V128, b: V128) -> V128 {
    let a = a.to_u8x16();
    let b = b.to_u8x16();
    let mut out = [0u8; 16];
    for (o, &i) in out.iter_mut().zip(lanes) {
        let i = i as usize % 32;
        *o = if i < 16 { a[i] } else { b[i - 16] };
    }
    V128::from_u8x16(out)
}

pub(crate) fn convert(op: VecCvtOp, v: V128) -> V128 {
    use VecCvtOp::*;
    match op {
        I16x8ExtendI8x16(half, sign) => {
            let range = half_range(half, 8);
            let mut out = [0i16; 8];
            match sign {
                Sign::Signed => {
                    let a = v.to_i8x16();
                    for (o, i) in out.iter_mut().zip(range) {
                        *o = a[i] as i16;
                    }
                }
                Sign::Unsigned => {
                    let a = v.to_u8x16();
                    for (o, i) in out.iter_mut().zip(range) {
                        *o = a[i] as i16;
                    }
                }
            }
            V128::from_i16x8(out)
        }
        I32x4ExtendI16x8(half, sign) => {
            let range = half_range(half, 4);
            let mut out = [0i32; 4];
            match sign {
                Sign::Signed => {
                    let a = v.to_i16x8();
                    for (o, i) in out.iter_mut().zip(range) {
                        *o = a[i] as i32;
                    }
                }
                Sign::Unsigned => {
                    let a = v.to_u16x8();
                    for (o, i) in out.iter_mut().zip(range) {
                        *o = a[i] as i32;
                    }
                }
            }
            V128::from_i32x4(out)
        }
        I64x2ExtendI32x4(half, sign) => {
            let range = half_range(half, 2);
            let mut out = [0i64; 2];
            match sign {
                Sign::Signed => {
                    let a = v.to_i32x4();
                    for (o, i) in out.iter_mut().zip(range) {
                        *o = a[i] as i64;
                    }
                }
                Sign::Unsigned => {
                    let a = v.to_u32x4();
                    for (o, i) in out.iter_mut().zip(range) {
                        *o = a[i] as i64;
                    }
                }
            }
            V128::from_i64x2(out)
        }
        I16x8ExtAddPairwiseI8x16(sign) => {
            let mut out = [0i16; 8];
            match sign {
                Sign::Signed => {
                    let a = v.to_i8x16();
                    for (i, o) in out.iter_mut().enumerate() {
                        *o = a[2 * i] as i16 + a[2 * i + 1] as i16;
                    }
                }
                Sign::Unsigned => {
                    let a = v.to_u8x16();
                    for (i, o) in out.iter_mut().enumerate() {
                        *o = (a[2 * i] as u16 + a[2 * i + 1] as u16) as i16;
                    }
                }
            }
            V128::from_i16x8(out)
        }
        I32x4ExtAddPairwiseI16x8(sign) => {
            let mut out = [0i32; 4];
            match sign {
                Sign::Signed => {
                    let a = v.to_i16x8();
                    for (i, o) in out.iter_mut().enumerate() {
                        *o = a[2 * i] as i32 + a[2 * i + 1] as i32;
                    }
                }
                Sign::Unsigned => {
                    let a = v.to_u16x8();
                    for (i, o) in out.iter_mut().enumerate() {
                        *o = (a[2 * i] as u32 + a[2 * i + 1] as u32) as i32;
                    }
                }
            }
            V128::from_i32x4(out)
        }
        I32x4TruncSatF32x4(sign) => {
            let a = v.to_f32x4();
            let mut out = [0i32; 4];
            for (o, x) in out.iter_mut().zip(a) {
                *o = int::trunc_sat_i32(x as f64, sign);
            }
            V128::from_i32x4(out)
        }
        I32x4TruncSatF64x2Zero(sign) => {
            let a = v.to_f64x2();
            let mut out = [0i32; 4];
            for (o, x) in out.iter_mut().zip(a) {
                *o = int::trunc_sat_i32(x, sign);
            }
            V128::from_i32x4(out)
        }
        F32x4ConvertI32x4(sign) => {
            let mut out = [0f32; 4];
            match sign {
                Sign::Signed => {
                    let a = v.to_i32x4();
                    for (o, x) in out.iter_mut().zip(a) {
                        *o = x as f32;
                    }
                }
                Sign::Unsigned => {
                    let a = v.to_u32x4();
                    for (o, x) in out.iter_mut().zip(a) {
                        *o = x as f32;
                    }
                }
            }
            V128::from_f32x4(out)
        }
        F64x2ConvertLowI32x4(sign) => {
            let mut out = [0f64; 2];
            match sign {
                Sign::Signed => {
                    let a = v.to_i32x4();
                    for (o, x) in out.iter_mut().zip(a) {
                        *o = x as f64;
                    }
                }
                Sign::Unsigned => {
                    let a = v.to_u32x4();
                    for (o, x) in out.iter_mut().zip(a) {
                        *o = x as f64;
                    }
                }
            }
            V128::from_f64x2(out)
        }
        F32x4DemoteF64x2Zero => {
            let a = v.to_f64x2();
            V128::from_f32x4([a[0] as f32, a[1] as f32, 0.0, 0.0])
        }
        F64x2PromoteLowF32x4 => {
            let a = v.to_f32x4();
            V128::from_f64x2([a[0] as f64, a[1] as f64])
        }
    }
}

fn half_range(half: Half, n: usize) -> core::ops::Range<usize> {
    match half {
        Half::Low => 0..n,
        Half::High => n..2 * n,
    }
}

fn unsigned8(a: V128, b: V128, f: impl Fn(u8, u8) -> u8) -> V128 {
    let mut a = a.to_u8x16();
    let b = b.to_u8x16();
    for (x, y) in a.iter_mut().zip(b) {
        *x = f(*x, y);
    }
    V128::from_u8x16(a)
}

fn unsigned16(a: V128, b: V128, f: impl Fn(u16, u16) -> u16) -> V128 {
    let mut a = a.to_u16x8();
    let b = b.to_u16x8();
    for (x, y) in a.iter_mut().zip(b) {
        *x = f(*x, y);
    }
    V128::from_u16x8(a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_views_round_trip() {
        let v = V128::from_i32x4([1, -2, 3, -4]);
        assert_eq!(v.to_i32x4(), [1, -2, 3, -4]);
        let v = V128::from_f64x2([1.5, -2.5]);
        assert_eq!(v.to_f64x2(), [1.5, -2.5]);
    }

    #[test]
    fn saturating_narrow() {
        let a = V128::from_i16x8([300, -300, 5, 0, 0, 0, 0, 0]);
        let b = V128::from_i16x8([0; 8]);
        let out = binop(Shape::I8x16, VecBinOp::Narrow(Sign::Signed), a, b).unwrap();
        assert_eq!(&out.to_i8x16()[..3], &[127, -128, 5]);
        let out = binop(Shape::I8x16, VecBinOp::Narrow(Sign::Unsigned), a, b).unwrap();
        assert_eq!(&out.to_u8x16()[..3], &[255, 0, 5]);
    }

    #[test]
    fn bitmask_reads_sign_bits() {
        let v = V128::from_i32x4([-1, 1, -2, 2]);
        assert_eq!(bitmask(Shape::I32x4, v).unwrap(), 0b0101);
    }

    #[test]
    fn comparison_masks() {
        let a = V128::from_i16x8([1, 2, 3, 4, 5, 6, 7, 8]);
        let b = V128::from_i16x8([1, 0, 3, 0, 5, 0, 7, 0]);
        let mask = relop(Shape::I16x8, VecRelOp::Eq, a, b).unwrap();
        assert_eq!(mask.to_i16x8(), [-1, 0, -1, 0, -1, 0, -1, 0]);
        assert!(!all_true(Shape::I16x8, mask).unwrap());
        assert!(any_true(mask));
    }

    #[test]
    fn shifts_mask_count_by_lane_width() {
        let v = V128::from_i8x16([1; 16]);
        let out = shift(Shape::I8x16, VecShiftOp::Shl, v, 9).unwrap();
        assert_eq!(out.to_i8x16(), [2; 16]);
    }

    #[test]
    fn swizzle_out_of_range_is_zero() {
        let a = V128::from_u8x16([
            10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25,
        ]);
        let idx = V128::from_u8x16([0, 15, 16, 255, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let out = binop(Shape::I8x16, VecBinOp::Swizzle, a, idx).unwrap();
        assert_eq!(&out.to_u8x16()[..5], &[10, 25, 0, 0, 11]);
    }

    #[test]
    fn extend_and_extmul() {
        let v = V128::from_i8x16([-1, 2, -3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, -16]);
        let low = convert(VecCvtOp::I16x8ExtendI8x16(Half::Low, Sign::Signed), v);
        assert_eq!(&low.to_i16x8()[..4], &[-1, 2, -3, 4]);
        let high = convert(VecCvtOp::I16x8ExtendI8x16(Half::High, Sign::Unsigned), v);
        assert_eq!(high.to_i16x8()[7], 240);

        let out = binop(Shape::I16x8, VecBinOp::ExtMul(Half::Low, Sign::Signed), v, v).unwrap();
        assert_eq!(&out.to_i16x8()[..3], &[1, 4, 9]);
    }

    #[test]
    fn float_lanes() {
        let a = V128::from_f32x4([1.0, f32::NAN, 3.0, -0.0]);
        let b = V128::from_f32x4([2.0, 1.0, 1.0, 0.0]);
        let min = binop(Shape::F32x4, VecBinOp::Min, a, b).unwrap().to_f32x4();
        assert_eq!(min[0], 1.0);
        assert!(min[1].is_nan());
        assert_eq!(min[2], 1.0);
        assert!(min[3].is_sign_negative());
    }

    #[test]
    fn trunc_sat_lanes() {
        let v = V128::from_f32x4([1.9, -1.9, 3e10, f32::NAN]);
        let out = convert(VecCvtOp::I32x4TruncSatF32x4(Sign::Signed), v);
        assert_eq!(out.to_i32x4(), [1, -1, i32::MAX, 0]);
    }
}
